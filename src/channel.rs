//! Queries into a resolver engine from async code.
//!
//! A [`Channel`] is a cloneable handle for submitting lookups. All the
//! actual work happens in the [`Driver`] returned alongside it: the driver
//! owns the engine, feeds it socket readiness and timer sweeps, and hands
//! captured completions back to the callers. The two halves talk through
//! an [`mpsc`] channel of [`Cmd`] values, each carrying a [`oneshot`]
//! sender for its reply.
//!
//! The engine only ever runs on the driver's task. Every entry point into
//! the engine may complete queries synchronously, so the driver lets the
//! call unwind, then delivers whatever completions the bridge captured
//! before it touches the engine again.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use crate::bridge::{Bridge, PollEvent};
use crate::decode::{decode_any, ResultDecoder};
use crate::engine::{Engine, Options, RecordType, ServerSpec, Status};
use crate::error::Error;
use crate::library::LibraryGuard;
use crate::poll::Poller;
use crate::query::{Captured, Delivery, PendingQuery, QueryKind};
use crate::timer::IdleTimer;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

//------------ Constants -----------------------------------------------------

/// Capacity of the channel that transports commands to the driver.
const DEF_CHAN_CAP: usize = 8;

/// Capacity of the channel that transports socket readiness to the driver.
const POLL_EVENT_CHAN_CAP: usize = 8;

/// Default number of attempts per query.
const DEF_TRIES: u32 = 4;

//------------ Config --------------------------------------------------------

/// Configuration of a query channel.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// The query timeout handed to the engine.
    timeout: Duration,

    /// The number of attempts per query handed to the engine.
    tries: u32,
}

impl Config {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the query timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the query timeout.
    ///
    /// The value is handed to the engine as given. Zero selects the
    /// engine's own default. It also bounds the period of the sweep
    /// timer that runs while sockets are being watched.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Returns the number of attempts per query.
    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Sets the number of attempts per query.
    ///
    /// Zero selects the engine's own default.
    pub fn set_tries(&mut self, tries: u32) {
        self.tries = tries;
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            tries: DEF_TRIES,
        }
    }
}

//------------ Channel -------------------------------------------------------

/// A handle for sending queries to a resolver engine.
#[derive(Debug)]
pub struct Channel<T> {
    /// The sender half of the command channel.
    sender: mpsc::Sender<Cmd<T>>,
}

impl<T> Channel<T> {
    /// Creates a new channel with default configuration.
    ///
    /// Returns the channel and the driver that runs its engine. The driver
    /// needs to be run while any queries are active, which is most easily
    /// achieved by spawning it into a runtime. It terminates when the last
    /// channel is dropped.
    ///
    /// Fails if the engine library or the engine itself cannot be set up.
    pub fn new<E, P, D>(
        poller: P,
        decoder: D,
    ) -> Result<(Self, Driver<E, P, D>), Error>
    where
        E: Engine,
        P: Poller,
        D: ResultDecoder<Output = T>,
    {
        Self::with_config(poller, decoder, Default::default())
    }

    /// Creates a new channel with the given configuration.
    ///
    /// Returns the channel and the driver that runs its engine. The driver
    /// needs to be run while any queries are active, which is most easily
    /// achieved by spawning it into a runtime. It terminates when the last
    /// channel is dropped.
    ///
    /// Fails if the engine library or the engine itself cannot be set up.
    pub fn with_config<E, P, D>(
        poller: P,
        decoder: D,
        config: Config,
    ) -> Result<(Self, Driver<E, P, D>), Error>
    where
        E: Engine,
        P: Poller,
        D: ResultDecoder<Output = T>,
    {
        let (sender, driver) = Driver::new(poller, decoder, config)?;
        Ok((Self { sender }, driver))
    }

    /// Looks up records of the given type under a name.
    ///
    /// Returns the decoded result once the engine completes the lookup.
    /// Dropping the returned future does not stop the lookup, its result
    /// is simply discarded on completion.
    pub async fn query(
        &self,
        name: &str,
        rtype: RecordType,
    ) -> Result<T, Error> {
        let (tx, rx) = oneshot::channel();
        let cmd = Cmd::Query {
            name: name.into(),
            rtype,
            reply: tx,
        };
        self.sender.send(cmd).await.map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Looks up the host name of an address.
    pub async fn reverse(&self, addr: IpAddr) -> Result<T, Error> {
        let (tx, rx) = oneshot::channel();
        let cmd = Cmd::Reverse { addr, reply: tx };
        self.sender.send(cmd).await.map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Returns the servers the engine currently queries.
    pub async fn servers(&self) -> Result<Vec<ServerSpec>, Error> {
        let (tx, rx) = oneshot::channel();
        let cmd = Cmd::Servers { reply: tx };
        self.sender.send(cmd).await.map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Replaces the servers the engine queries.
    ///
    /// Fails with [`Error::SetServersPending`] while queries are in
    /// flight. An empty list resets the engine to its own defaults.
    pub async fn set_servers(
        &self,
        servers: Vec<ServerSpec>,
    ) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        let cmd = Cmd::SetServers { servers, reply: tx };
        self.sender.send(cmd).await.map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Sets the local addresses queries are sent from.
    ///
    /// At most one address per family can be given. A family that is not
    /// given is reset to the unspecified address, letting the system pick.
    pub async fn set_local_address(
        &self,
        first: IpAddr,
        second: Option<IpAddr>,
    ) -> Result<(), Error> {
        let (v4, v6) = match (first, second) {
            (IpAddr::V4(first), None) => (first, Ipv6Addr::UNSPECIFIED),
            (IpAddr::V6(first), None) => (Ipv4Addr::UNSPECIFIED, first),
            (IpAddr::V4(first), Some(IpAddr::V6(second))) => (first, second),
            (IpAddr::V6(first), Some(IpAddr::V4(second))) => (second, first),
            (IpAddr::V4(_), Some(IpAddr::V4(_))) => {
                return Err(Error::TwoIpv4LocalAddresses)
            }
            (IpAddr::V6(_), Some(IpAddr::V6(_))) => {
                return Err(Error::TwoIpv6LocalAddresses)
            }
        };
        let (tx, rx) = oneshot::channel();
        let cmd = Cmd::SetLocalAddress { v4, v6, reply: tx };
        self.sender.send(cmd).await.map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Cancels all queries currently in flight.
    ///
    /// The queries complete with [`Status::Cancelled`].
    pub async fn cancel(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        let cmd = Cmd::Cancel { reply: tx };
        self.sender.send(cmd).await.map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

//------------ Cmd -----------------------------------------------------------

/// A command sent from a [`Channel`] to its [`Driver`].
enum Cmd<T> {
    /// Look up records of the given type under a name.
    Query {
        /// The name to look up.
        name: String,

        /// The record type to ask for.
        rtype: RecordType,

        /// Where the result goes.
        reply: oneshot::Sender<Result<T, Error>>,
    },

    /// Look up the host name of an address.
    Reverse {
        /// The address to look up.
        addr: IpAddr,

        /// Where the result goes.
        reply: oneshot::Sender<Result<T, Error>>,
    },

    /// Report the servers the engine currently queries.
    Servers {
        /// Where the server list goes.
        reply: oneshot::Sender<Vec<ServerSpec>>,
    },

    /// Replace the servers the engine queries.
    SetServers {
        /// The new server list.
        servers: Vec<ServerSpec>,

        /// Where the outcome goes.
        reply: oneshot::Sender<Result<(), Error>>,
    },

    /// Set the local addresses queries are sent from.
    SetLocalAddress {
        /// The IPv4 source address, unspecified to let the system pick.
        v4: Ipv4Addr,

        /// The IPv6 source address, unspecified to let the system pick.
        v6: Ipv6Addr,

        /// Acknowledged once the engine has been updated.
        reply: oneshot::Sender<()>,
    },

    /// Cancel all queries currently in flight.
    Cancel {
        /// Acknowledged once the engine has been told.
        reply: oneshot::Sender<()>,
    },
}

//------------ Driver --------------------------------------------------------

/// The machinery that runs a channel's resolver engine.
pub struct Driver<E: Engine, P: Poller, D: ResultDecoder> {
    /// The options the engine was configured with.
    options: Options,

    /// The decoder turning captured answers into caller results.
    decoder: D,

    /// The engine. Only `None` during teardown.
    engine: Option<E>,

    /// The state the engine reports into: sockets, timer, queries.
    bridge: Bridge<P, D::Output>,

    /// The receiver half of the command channel.
    receiver: mpsc::Receiver<Cmd<D::Output>>,

    /// The receiver half of the poll event channel.
    events: mpsc::Receiver<PollEvent>,

    /// The number of queries dispatched but not yet delivered.
    in_flight: usize,

    /// Whether the most recently delivered query got a response.
    ///
    /// Starts out `true`. Only a completion with
    /// [`Status::ConnectionRefused`] clears it.
    last_query_ok: bool,

    /// Whether the engine still runs on its initial default server list.
    is_servers_default: bool,

    /// Keeps the engine library initialized.
    ///
    /// Declared last so the engine is gone by the time it drops.
    _library: LibraryGuard<E>,
}

impl<E: Engine, P: Poller, D: ResultDecoder> Driver<E, P, D> {
    /// Creates a new driver and the sender feeding it.
    fn new(
        poller: P,
        decoder: D,
        config: Config,
    ) -> Result<(mpsc::Sender<Cmd<D::Output>>, Self), Error> {
        let library = LibraryGuard::acquire().map_err(Error::Setup)?;
        let options = Options {
            timeout: config.timeout,
            tries: config.tries,
            surface_failures: true,
        };
        let engine = E::configure(&options).map_err(Error::Setup)?;
        let (sender, receiver) = mpsc::channel(DEF_CHAN_CAP);
        let (event_tx, events) = mpsc::channel(POLL_EVENT_CHAN_CAP);
        let bridge =
            Bridge::new(poller, IdleTimer::new(config.timeout), event_tx);
        Ok((
            sender,
            Driver {
                options,
                decoder,
                engine: Some(engine),
                bridge,
                receiver,
                events,
                in_flight: 0,
                last_query_ok: true,
                is_servers_default: true,
                _library: library,
            },
        ))
    }

    /// Runs the driver.
    ///
    /// Terminates once the last channel is dropped. All queries still in
    /// flight at that point fail.
    pub async fn run(mut self) {
        loop {
            // Deliveries captured during the previous engine call go out
            // before anything else happens.
            while let Some(delivery) = self.bridge.deferred.pop_front() {
                self.finish_query(delivery);
            }
            tokio::select! {
                biased;
                event = self.events.recv() => {
                    let event =
                        event.expect("the bridge keeps an event sender");
                    self.handle_poll_event(event);
                }
                _ = self.bridge.timer.tick() => {
                    self.handle_timeout();
                }
                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_cmd(cmd),
                        None => break,
                    }
                }
            }
        }
        self.teardown();
    }

    /// Feeds socket readiness into the engine.
    fn handle_poll_event(&mut self, event: PollEvent) {
        if !self.bridge.watches(event.socket) {
            trace!("Dropping readiness for retired socket {}", event.socket);
            return;
        }
        self.bridge.timer.poke();
        let read = event.readiness.readable.then_some(event.socket);
        let write = event.readiness.writable.then_some(event.socket);
        let engine = self.engine.as_mut().expect("engine missing");
        engine.process_fd(&mut self.bridge, read, write);
    }

    /// Sweeps the engine for timed out queries.
    fn handle_timeout(&mut self) {
        assert!(self.bridge.has_sockets(), "sweep without watched sockets");
        trace!("Sweeping engine for timeouts");
        let engine = self.engine.as_mut().expect("engine missing");
        engine.process_fd(&mut self.bridge, None, None);
    }

    /// Handles a command from a channel handle.
    fn handle_cmd(&mut self, cmd: Cmd<D::Output>) {
        match cmd {
            Cmd::Query { name, rtype, reply } => {
                self.dispatch_query(name, rtype, reply)
            }
            Cmd::Reverse { addr, reply } => self.dispatch_reverse(addr, reply),
            Cmd::Servers { reply } => {
                let engine = self.engine.as_ref().expect("engine missing");
                _ = reply.send(engine.servers());
            }
            Cmd::SetServers { servers, reply } => {
                let res = self.set_servers(servers);
                _ = reply.send(res);
            }
            Cmd::SetLocalAddress { v4, v6, reply } => {
                let engine = self.engine.as_mut().expect("engine missing");
                engine.set_local_v4(v4);
                engine.set_local_v6(v6);
                _ = reply.send(());
            }
            Cmd::Cancel { reply } => {
                trace!("Cancelling all queries in flight");
                let engine = self.engine.as_mut().expect("engine missing");
                engine.cancel(&mut self.bridge);
                _ = reply.send(());
            }
        }
    }

    /// Dispatches a name lookup to the engine.
    fn dispatch_query(
        &mut self,
        name: String,
        rtype: RecordType,
        reply: oneshot::Sender<Result<D::Output, Error>>,
    ) {
        trace!("Dispatching {} for {name}", rtype.label());
        self.in_flight += 1;
        if let Err(status) = self.ensure_servers() {
            self.finish_in_flight();
            _ = reply.send(Err(Error::Setup(status)));
            return;
        }
        let token = self.bridge.queries.insert(PendingQuery {
            kind: QueryKind::Lookup(rtype),
            reply,
        });
        let engine = self.engine.as_mut().expect("engine missing");
        if let Err(status) =
            engine.query(&mut self.bridge, &name, rtype, token)
        {
            let pending = self
                .bridge
                .queries
                .remove(token)
                .expect("failed query completed anyway");
            self.finish_in_flight();
            _ = pending.reply.send(Err(Error::Query(status)));
        }
    }

    /// Dispatches a reverse lookup to the engine.
    fn dispatch_reverse(
        &mut self,
        addr: IpAddr,
        reply: oneshot::Sender<Result<D::Output, Error>>,
    ) {
        trace!("Dispatching reverse for {addr}");
        self.in_flight += 1;
        if let Err(status) = self.ensure_servers() {
            self.finish_in_flight();
            _ = reply.send(Err(Error::Setup(status)));
            return;
        }
        let token = self.bridge.queries.insert(PendingQuery {
            kind: QueryKind::Reverse,
            reply,
        });
        let engine = self.engine.as_mut().expect("engine missing");
        if let Err(status) = engine.reverse(&mut self.bridge, addr, token) {
            let pending = self
                .bridge
                .queries
                .remove(token)
                .expect("failed query completed anyway");
            self.finish_in_flight();
            _ = pending.reply.send(Err(Error::Query(status)));
        }
    }

    /// Makes sure queries go to the system's servers when they should.
    ///
    /// An engine created while the system configuration was unreadable
    /// falls back to localhost. When the previous query went unanswered
    /// and the server list was never changed by hand, the engine is
    /// recreated so it reads the system configuration again. A server
    /// list that does not look like the fallback marks the list as no
    /// longer default instead, which disables the check for good.
    fn ensure_servers(&mut self) -> Result<(), Status> {
        if self.last_query_ok || !self.is_servers_default {
            return Ok(());
        }
        let engine = self.engine.as_ref().expect("engine missing");
        let servers = engine.servers();
        if !matches!(
            servers.as_slice(),
            [server] if server.is_default_loopback()
        ) {
            self.is_servers_default = false;
            return Ok(());
        }
        trace!("Recreating engine to pick up system servers");
        let fresh = E::configure(&self.options)?;
        let old = self.engine.take().expect("engine missing");
        old.destroy(&mut self.bridge);
        self.engine = Some(fresh);
        Ok(())
    }

    /// Replaces the engine's server list.
    fn set_servers(&mut self, servers: Vec<ServerSpec>) -> Result<(), Error> {
        if self.in_flight > 0 {
            return Err(Error::SetServersPending);
        }
        let engine = self.engine.as_mut().expect("engine missing");
        engine.set_servers(&servers).map_err(Error::Query)?;
        if !servers.is_empty() {
            self.is_servers_default = false;
        }
        Ok(())
    }

    /// Decodes a captured completion and hands the result to the caller.
    fn finish_query(&mut self, delivery: Delivery<D::Output>) {
        let Delivery { kind, reply, outcome } = delivery;
        let (ok, result) = match outcome {
            Captured::Failed(status) => {
                trace!("Delivering {} failure: {status}", kind.label());
                (
                    status != Status::ConnectionRefused,
                    Err(Error::Query(status)),
                )
            }
            Captured::Answer(answer) => {
                trace!("Delivering {} answer", kind.label());
                let mut out = D::Output::default();
                let res = match kind {
                    QueryKind::Lookup(RecordType::Any) => {
                        decode_any(&self.decoder, &answer, &mut out)
                    }
                    QueryKind::Lookup(rtype) => {
                        self.decoder.decode(rtype, &answer, &mut out)
                    }
                    QueryKind::Reverse => {
                        panic!("raw answer for a reverse lookup")
                    }
                };
                (true, res.map(|()| out).map_err(Error::Query))
            }
            Captured::Host(record) => {
                trace!("Delivering {} host record", kind.label());
                if !matches!(kind, QueryKind::Reverse) {
                    panic!("host record for a name lookup");
                }
                let mut out = D::Output::default();
                self.decoder.host_names(&record, &mut out);
                (true, Ok(out))
            }
        };
        _ = reply.send(result);
        self.last_query_ok = ok;
        self.finish_in_flight();
    }

    /// Marks one dispatched query as finished.
    fn finish_in_flight(&mut self) {
        self.in_flight = self
            .in_flight
            .checked_sub(1)
            .expect("in-flight query counter underflow");
    }

    /// Destroys the engine and fails whatever is still pending.
    fn teardown(&mut self) {
        trace!("Shutting down, last channel is gone");
        if let Some(engine) = self.engine.take() {
            engine.destroy(&mut self.bridge);
        }
        while let Some(delivery) = self.bridge.deferred.pop_front() {
            self.finish_query(delivery);
        }
        for (_, pending) in self.bridge.queries.drain() {
            trace!("Dropping undelivered {} query", pending.kind.label());
            _ = pending.reply.send(Err(Error::ChannelClosed));
        }
    }
}

//============ Tests =========================================================
