//! Error type for the bridge.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::error;
use std::fmt::{Display, Formatter};

use crate::engine::{ServerSpecError, Status};

/// Error type for channel operations.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// The channel's driver is gone.
    ChannelClosed,

    /// The engine rejected or failed the query.
    Query(Status),

    /// The server list cannot change while queries are in flight.
    SetServersPending,

    /// A server spec string was misformatted.
    BadServerSpec,

    /// Two local IPv4 addresses were specified.
    TwoIpv4LocalAddresses,

    /// Two local IPv6 addresses were specified.
    TwoIpv6LocalAddresses,

    /// Engine library or instance setup failed.
    Setup(Status),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Error::ChannelClosed => write!(f, "channel closed"),
            Error::Query(status) => status.fmt(f),
            Error::SetServersPending => {
                write!(f, "there are pending queries")
            }
            Error::BadServerSpec => write!(f, "misformatted server spec"),
            Error::TwoIpv4LocalAddresses => {
                write!(f, "cannot specify two IPv4 addresses")
            }
            Error::TwoIpv6LocalAddresses => {
                write!(f, "cannot specify two IPv6 addresses")
            }
            Error::Setup(_) => write!(f, "engine setup failed"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::ChannelClosed => None,
            Error::Query(status) => Some(status),
            Error::SetServersPending => None,
            Error::BadServerSpec => None,
            Error::TwoIpv4LocalAddresses => None,
            Error::TwoIpv6LocalAddresses => None,
            Error::Setup(status) => Some(status),
        }
    }
}

impl From<ServerSpecError> for Error {
    fn from(_: ServerSpecError) -> Self {
        Error::BadServerSpec
    }
}
