//! Bookkeeping for queries that are waiting on the engine.
//!
//! Every lookup handed to the engine is represented by a [`PendingQuery`]
//! stored in the driver's slot map. The slot map key,
//! [`QueryToken`][crate::engine::QueryToken], is what the engine gets to
//! carry around and hand back on completion. Keys are generation checked,
//! so a token that has already been consumed simply fails to resolve
//! instead of touching an unrelated query.
//!
//! Completions are not answered in place. Capturing a completion removes
//! the pending entry and pairs it with the captured outcome into a
//! [`Delivery`], which the driver processes once the engine callback has
//! fully unwound.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use crate::engine::{HostRecord, RecordType, Status};
use crate::error::Error;
use bytes::Bytes;
use tokio::sync::oneshot;

//------------ QueryKind -----------------------------------------------------

/// What sort of lookup a pending query was dispatched as.
///
/// The kind decides how a captured outcome gets decoded: name lookups
/// produce a raw answer buffer, reverse lookups produce a host record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum QueryKind {
    /// A name lookup for the given record type.
    Lookup(RecordType),

    /// A reverse lookup of an address.
    Reverse,
}

impl QueryKind {
    /// Returns the label used for tracing this kind of query.
    pub fn label(self) -> &'static str {
        match self {
            QueryKind::Lookup(rtype) => rtype.label(),
            QueryKind::Reverse => "reverse",
        }
    }
}

//------------ PendingQuery --------------------------------------------------

/// A query that has been dispatched to the engine.
///
/// The entry lives in the driver's slot map from just before the engine
/// sees the query until its completion is captured, at which point it is
/// removed and turned into a [`Delivery`].
pub(crate) struct PendingQuery<T> {
    /// The kind of lookup that was dispatched.
    pub kind: QueryKind,

    /// The reply channel of the caller awaiting the result.
    pub reply: oneshot::Sender<Result<T, Error>>,
}

//------------ Captured ------------------------------------------------------

/// The outcome of a query as captured from an engine callback.
///
/// Payloads are deep copies. The byte slices and host records the engine
/// hands to the completion callbacks are only valid for the duration of
/// the callback, while a captured outcome has to survive until the driver
/// processes it after the callback has unwound.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Captured {
    /// The query failed with the given status.
    Failed(Status),

    /// A name lookup completed with a raw answer buffer.
    Answer(Bytes),

    /// A reverse lookup completed with a host record.
    Host(HostRecord),
}

//------------ Delivery ------------------------------------------------------

/// A captured completion waiting to be decoded and delivered.
///
/// Deliveries queue up while the engine is processing and are finished in
/// capture order once control returns to the driver.
pub(crate) struct Delivery<T> {
    /// The kind of lookup the outcome belongs to.
    pub kind: QueryKind,

    /// The reply channel of the caller awaiting the result.
    pub reply: oneshot::Sender<Result<T, Error>>,

    /// The captured outcome.
    pub outcome: Captured,
}

//============ Tests =========================================================
