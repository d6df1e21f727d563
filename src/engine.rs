//! The resolver engine interface.
//!
//! The engine is the external party that actually performs DNS resolution:
//! it composes queries, talks to servers over sockets it owns, applies its
//! own retry and timeout policy, and reports results through callbacks. This
//! module defines the two traits that tie such an engine to the bridge: the
//! [`Engine`] trait implemented by the engine itself and the [`EngineNotify`]
//! trait through which the engine calls back into the bridge. It also
//! provides the value types crossing that boundary.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::error;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use slotmap::new_key_type;
use smallvec::SmallVec;

//------------ SocketId ------------------------------------------------------

/// The engine's identifier for one of its sockets.
///
/// The engine opens and closes its sockets itself and only tells the bridge
/// which descriptor to watch. The identifier is the raw descriptor value and
/// serves as the registry key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SocketId(pub i32);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

//------------ QueryToken ----------------------------------------------------

new_key_type! {
    /// A handle to a query that is waiting on the engine.
    ///
    /// Tokens are handed to [`Engine::query`] and returned through the
    /// completion methods of [`EngineNotify`]. A token is valid for exactly
    /// one completion. The underlying slot is generation checked, so a
    /// token that has already completed stays invalid even if its slot is
    /// reused for a later query.
    pub struct QueryToken;
}

//------------ RecordType ----------------------------------------------------

/// The DNS record types a query can ask for.
///
/// The bridge does not interpret answer data itself, so this is a plain
/// selector shared between query dispatch and the
/// [`ResultDecoder`][crate::decode::ResultDecoder].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RecordType {
    /// An IPv4 host address.
    A,

    /// An IPv6 host address.
    Aaaa,

    /// A certification authority authorization record.
    Caa,

    /// A canonical name record.
    Cname,

    /// A mail exchanger record.
    Mx,

    /// A naming authority pointer record.
    Naptr,

    /// A name server record.
    Ns,

    /// A domain name pointer record.
    Ptr,

    /// A start of authority record.
    Soa,

    /// A service locator record.
    Srv,

    /// A text record.
    Txt,

    /// All record types at once.
    ///
    /// The answer buffer is decoded in multiple passes, one per concrete
    /// type. See [`decode_any`][crate::decode::decode_any] for the pass
    /// order.
    Any,

    /// Address records together with the canonical-name chain.
    ///
    /// This is the combined first pass of an [`Any`][Self::Any] decode; it
    /// never appears in a query the engine receives.
    AOrCname,
}

impl RecordType {
    /// Returns the label used when tracing queries of this type.
    pub fn label(self) -> &'static str {
        match self {
            RecordType::A => "resolve4",
            RecordType::Aaaa => "resolve6",
            RecordType::Caa => "resolveCaa",
            RecordType::Cname => "resolveCname",
            RecordType::Mx => "resolveMx",
            RecordType::Naptr => "resolveNaptr",
            RecordType::Ns => "resolveNs",
            RecordType::Ptr => "resolvePtr",
            RecordType::Soa => "resolveSoa",
            RecordType::Srv => "resolveSrv",
            RecordType::Txt => "resolveTxt",
            RecordType::Any | RecordType::AOrCname => "resolveAny",
        }
    }
}

//------------ Status --------------------------------------------------------

/// A failure status reported by the engine.
///
/// This mirrors the error enumeration of the common resolver engines, with
/// one variant per native code. Statuses travel verbatim from the engine to
/// the caller; the bridge only ever looks at [`ConnectionRefused`] for its
/// fallback-server heuristic and at [`NoData`] when sequencing an `Any`
/// decode.
///
/// [`ConnectionRefused`]: Self::ConnectionRefused
/// [`NoData`]: Self::NoData
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Status {
    /// The server answered but the answer held no data.
    NoData,

    /// The server claims the query was misformatted.
    FormErr,

    /// The server reported a general failure.
    ServFail,

    /// The queried name does not exist.
    NotFound,

    /// The server does not implement the requested operation.
    NotImplemented,

    /// The server refused the query.
    Refused,

    /// The query could not be composed.
    BadQuery,

    /// The queried name is malformed.
    BadName,

    /// The address family is not supported.
    BadFamily,

    /// The answer could not be parsed.
    BadResponse,

    /// No server could be contacted.
    ConnectionRefused,

    /// The query timed out.
    Timeout,

    /// Unexpected end of file.
    Eof,

    /// A configuration file could not be read.
    File,

    /// The engine ran out of memory.
    NoMemory,

    /// The engine instance is being destroyed.
    Destruction,

    /// A string argument is misformatted.
    BadString,

    /// Illegal flags were specified.
    BadFlags,

    /// The given hostname is not numeric.
    NoName,

    /// Illegal hints flags were specified.
    BadHints,

    /// The engine library has not been initialized.
    NotInitialized,

    /// The iphlpapi DLL could not be loaded.
    LoadIphlpapi,

    /// The GetNetworkParams function could not be found.
    AddrGetNetworkParams,

    /// The query was cancelled.
    Cancelled,
}

impl Status {
    /// Returns the native code name for this status.
    ///
    /// These are the fixed upper-case names callers match on, for instance
    /// `"ETIMEOUT"` or `"ENOTFOUND"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::NoData => "ENODATA",
            Status::FormErr => "EFORMERR",
            Status::ServFail => "ESERVFAIL",
            Status::NotFound => "ENOTFOUND",
            Status::NotImplemented => "ENOTIMP",
            Status::Refused => "EREFUSED",
            Status::BadQuery => "EBADQUERY",
            Status::BadName => "EBADNAME",
            Status::BadFamily => "EBADFAMILY",
            Status::BadResponse => "EBADRESP",
            Status::ConnectionRefused => "ECONNREFUSED",
            Status::Timeout => "ETIMEOUT",
            Status::Eof => "EOF",
            Status::File => "EFILE",
            Status::NoMemory => "ENOMEM",
            Status::Destruction => "EDESTRUCTION",
            Status::BadString => "EBADSTR",
            Status::BadFlags => "EBADFLAGS",
            Status::NoName => "ENONAME",
            Status::BadHints => "EBADHINTS",
            Status::NotInitialized => "ENOTINITIALIZED",
            Status::LoadIphlpapi => "ELOADIPHLPAPI",
            Status::AddrGetNetworkParams => "EADDRGETNETWORKPARAMS",
            Status::Cancelled => "ECANCELLED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Status::NoData => write!(f, "server returned no data"),
            Status::FormErr => write!(f, "query was misformatted"),
            Status::ServFail => write!(f, "server returned general failure"),
            Status::NotFound => write!(f, "domain name not found"),
            Status::NotImplemented => {
                write!(f, "server does not implement operation")
            }
            Status::Refused => write!(f, "server refused query"),
            Status::BadQuery => write!(f, "misformatted query"),
            Status::BadName => write!(f, "misformatted domain name"),
            Status::BadFamily => write!(f, "unsupported address family"),
            Status::BadResponse => write!(f, "misformatted answer"),
            Status::ConnectionRefused => {
                write!(f, "could not contact DNS servers")
            }
            Status::Timeout => {
                write!(f, "timeout while contacting DNS servers")
            }
            Status::Eof => write!(f, "unexpected end of file"),
            Status::File => write!(f, "error reading configuration file"),
            Status::NoMemory => write!(f, "out of memory"),
            Status::Destruction => write!(f, "engine is being destroyed"),
            Status::BadString => write!(f, "misformatted string"),
            Status::BadFlags => write!(f, "illegal flags specified"),
            Status::NoName => write!(f, "given hostname is not numeric"),
            Status::BadHints => write!(f, "illegal hints flags specified"),
            Status::NotInitialized => {
                write!(f, "engine library not yet initialized")
            }
            Status::LoadIphlpapi => write!(f, "error loading iphlpapi.dll"),
            Status::AddrGetNetworkParams => {
                write!(f, "could not find GetNetworkParams function")
            }
            Status::Cancelled => write!(f, "query cancelled"),
        }
    }
}

impl error::Error for Status {}

//------------ ServerSpec ----------------------------------------------------

/// One entry of the engine's server list.
///
/// A port of zero means the engine's default port for that transport.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ServerSpec {
    /// The server address.
    addr: IpAddr,

    /// The UDP port, zero for the engine default.
    udp_port: u16,

    /// The TCP port, zero for the engine default.
    tcp_port: u16,
}

impl ServerSpec {
    /// Creates a server spec with default ports.
    pub fn new(addr: IpAddr) -> Self {
        ServerSpec {
            addr,
            udp_port: 0,
            tcp_port: 0,
        }
    }

    /// Creates a server spec with the given port for both transports.
    pub fn with_port(addr: IpAddr, port: u16) -> Self {
        ServerSpec {
            addr,
            udp_port: port,
            tcp_port: port,
        }
    }

    /// Returns the server address.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Returns the UDP port, zero for the engine default.
    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    /// Returns the TCP port, zero for the engine default.
    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    /// Returns whether this is the engine's built-in fallback server.
    ///
    /// Engines that cannot read system DNS configuration silently fall back
    /// to the IPv4 loopback address with default ports. That signature is
    /// what channel-level fallback detection looks for.
    pub fn is_default_loopback(&self) -> bool {
        self.addr == IpAddr::V4(Ipv4Addr::LOCALHOST)
            && self.udp_port == 0
            && self.tcp_port == 0
    }
}

impl FromStr for ServerSpec {
    type Err = ServerSpecError;

    /// Parses a server spec from its textual form.
    ///
    /// Accepted forms are a bare address such as `"192.0.2.1"` or `"2001:db8::1"`,
    /// or an address with a port such as `"192.0.2.1:53"` or `"[2001:db8::1]:53"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = IpAddr::from_str(s) {
            return Ok(ServerSpec::new(addr));
        }
        let (addr, port) = if let Some(tail) = s.strip_prefix('[') {
            // Bracketed IPv6 with a port.
            let (addr, port) = tail.split_once("]:").ok_or(ServerSpecError)?;
            (IpAddr::from_str(addr), port)
        } else {
            let (addr, port) = s.rsplit_once(':').ok_or(ServerSpecError)?;
            (IpAddr::from_str(addr), port)
        };
        let addr = addr.map_err(|_| ServerSpecError)?;
        let port = u16::from_str(port).map_err(|_| ServerSpecError)?;
        Ok(ServerSpec::with_port(addr, port))
    }
}

impl fmt::Display for ServerSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.addr, self.udp_port) {
            (_, 0) => self.addr.fmt(f),
            (IpAddr::V4(addr), port) => write!(f, "{}:{}", addr, port),
            (IpAddr::V6(addr), port) => write!(f, "[{}]:{}", addr, port),
        }
    }
}

//------------ ServerSpecError -----------------------------------------------

/// A server spec string was misformatted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ServerSpecError;

impl fmt::Display for ServerSpecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "misformatted server spec")
    }
}

impl error::Error for ServerSpecError {}

//------------ HostRecord ----------------------------------------------------

/// A decoded host record reported by the engine.
///
/// This is the "already decoded" completion form used for reverse lookups:
/// a primary name, any number of aliases, and any number of addresses. The
/// engine only lends its record to the completion callback, so the bridge
/// clones it before the callback returns.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HostRecord {
    /// The primary name of the host.
    pub name: String,

    /// Alias names for the host.
    pub aliases: SmallVec<[String; 4]>,

    /// Addresses of the host.
    pub addresses: SmallVec<[IpAddr; 4]>,
}

//------------ Options -------------------------------------------------------

/// Options for configuring an engine instance.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// The query timeout. Zero means the engine's own default.
    pub timeout: Duration,

    /// The number of query attempts. Zero means the engine's own default.
    pub tries: u32,

    /// Whether failed responses are surfaced instead of silently retried.
    ///
    /// The bridge always sets this: the caller, not the engine, decides what
    /// to do with a server that answers `REFUSED` or `SERVFAIL`.
    pub surface_failures: bool,
}

//------------ Engine --------------------------------------------------------

/// An asynchronous DNS resolver engine.
///
/// The engine owns its sockets and its protocol behavior. The bridge never
/// performs I/O on the engine's behalf; it only watches the sockets the
/// engine names through [`EngineNotify::socket_state`] and reports their
/// readiness back through [`process_fd`][Self::process_fd].
///
/// All methods taking a `notify` argument may invoke callbacks on it before
/// returning; they are always called from the single driver task. Engines
/// must drain a ready socket to would-block within
/// [`process_fd`][Self::process_fd], as readiness is edge-reported.
pub trait Engine: Send + Sized + 'static {
    /// Initializes process-wide library state.
    ///
    /// Called under a lock before the first instance of this engine type is
    /// configured. Every call is matched by exactly one
    /// [`library_cleanup`][Self::library_cleanup] call.
    fn library_init() -> Result<(), Status>;

    /// Tears down process-wide library state.
    fn library_cleanup();

    /// Creates a configured engine instance.
    ///
    /// No callbacks can fire during configuration; engines open their
    /// sockets lazily once the first query is dispatched.
    fn configure(options: &Options) -> Result<Self, Status>;

    /// Starts a name query.
    ///
    /// On `Ok` the engine has accepted the query and will complete it
    /// exactly once through [`EngineNotify::query_complete`] with the given
    /// token, possibly before this call returns. On `Err` the engine has
    /// rejected the query and will not invoke the completion callback.
    fn query(
        &mut self,
        notify: &mut dyn EngineNotify,
        name: &str,
        rtype: RecordType,
        token: QueryToken,
    ) -> Result<(), Status>;

    /// Starts a reverse lookup for an address.
    ///
    /// Completion arrives through [`EngineNotify::host_complete`] under the
    /// same contract as [`query`][Self::query].
    fn reverse(
        &mut self,
        notify: &mut dyn EngineNotify,
        addr: IpAddr,
        token: QueryToken,
    ) -> Result<(), Status>;

    /// Processes I/O readiness.
    ///
    /// `read` and `write` name the socket that became readable respectively
    /// writable; `None` stands for "no socket". Called with both `None` for
    /// the periodic timeout sweep.
    fn process_fd(
        &mut self,
        notify: &mut dyn EngineNotify,
        read: Option<SocketId>,
        write: Option<SocketId>,
    );

    /// Returns the current server list.
    fn servers(&self) -> Vec<ServerSpec>;

    /// Replaces the server list.
    ///
    /// An empty list resets the engine to its own default configuration.
    fn set_servers(&mut self, servers: &[ServerSpec]) -> Result<(), Status>;

    /// Sets the local IPv4 address for outgoing queries.
    ///
    /// The unspecified address clears the binding.
    fn set_local_v4(&mut self, addr: Ipv4Addr);

    /// Sets the local IPv6 address for outgoing queries.
    ///
    /// The unspecified address clears the binding.
    fn set_local_v6(&mut self, addr: Ipv6Addr);

    /// Aborts all in-flight queries.
    ///
    /// Every outstanding query completes through its normal completion
    /// callback with [`Status::Cancelled`].
    fn cancel(&mut self, notify: &mut dyn EngineNotify);

    /// Destroys the engine instance.
    ///
    /// Outstanding queries complete with [`Status::Destruction`] or
    /// [`Status::Cancelled`] and a close notification is delivered for every
    /// watched socket, all before this call returns. Dropping an engine
    /// without calling this must still release its native resources, just
    /// without the notifications.
    fn destroy(self, notify: &mut dyn EngineNotify);
}

//------------ EngineNotify --------------------------------------------------

/// The callback surface the bridge offers to the engine.
///
/// The engine invokes these from within [`Engine`] method calls on the
/// driver task, never from its own threads.
pub trait EngineNotify {
    /// The engine's socket watch request.
    ///
    /// With `readable` or `writable` set, the bridge is to watch the socket
    /// for exactly the requested readiness, superseding any earlier request
    /// for the same socket. With neither set, the engine has closed the
    /// socket and the watch must end.
    fn socket_state(&mut self, socket: SocketId, readable: bool, writable: bool);

    /// A query completed with a raw answer buffer.
    ///
    /// The buffer is only valid for the duration of the call. `timeouts`
    /// reports how often the query timed out before completing.
    fn query_complete(
        &mut self,
        token: QueryToken,
        answer: Result<&[u8], Status>,
        timeouts: u32,
    );

    /// A reverse lookup completed with a host record.
    ///
    /// The record is only lent for the duration of the call.
    fn host_complete(
        &mut self,
        token: QueryToken,
        record: Result<&HostRecord, Status>,
        timeouts: u32,
    );
}

//============ Tests =========================================================
