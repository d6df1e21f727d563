//! The bridge between the engine and the host event loop.
//!
//! [`Bridge`] is the state the engine talks to while it is processing: the
//! registry of watched sockets, the idle timer, the slot map of pending
//! queries and the queue of captured completions. It implements
//! [`EngineNotify`], so every engine callback lands here.
//!
//! Socket watching is delegated to one spawned task per socket. The bridge
//! hands each watcher a [`watch`] channel carrying the currently wanted
//! interest. Sending a new value supersedes the previous interest rather
//! than adding to it, and dropping the sender ends the watcher. Readiness
//! found by a watcher is reported to the driver through an [`mpsc`] channel
//! and fed back into the engine from there, never from the watcher itself.
//!
//! Completions are captured, not delivered: the engine may complete a query
//! from within a call the driver is still making, so the bridge only moves
//! the pending entry and a deep copy of the payload into [`Bridge::deferred`].
//! The [`Driver`][crate::channel::Driver] delivers once the engine call has
//! returned.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use crate::engine::{EngineNotify, HostRecord, QueryToken, SocketId, Status};
use crate::poll::{Interest, PollHandle, Poller, Readiness};
use crate::query::{Captured, Delivery, PendingQuery};
use crate::timer::IdleTimer;
use bytes::Bytes;
use slotmap::SlotMap;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, watch};
use tracing::{trace, warn};

//------------ PollEvent -----------------------------------------------------

/// Readiness a watcher task found on a socket.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PollEvent {
    /// The socket that became ready.
    pub socket: SocketId,

    /// The directions it is ready in.
    pub readiness: Readiness,
}

//------------ SocketTask ----------------------------------------------------

/// The bridge's handle on a spawned socket watcher.
struct SocketTask {
    /// The interest the watcher arms the poller with.
    ///
    /// Sending replaces the previous interest. Dropping the sender ends
    /// the watcher task.
    interest: watch::Sender<Interest>,
}

//------------ Bridge --------------------------------------------------------

/// The engine facing state of a channel driver.
pub(crate) struct Bridge<P: Poller, T> {
    /// The poller sockets get registered with.
    poller: P,

    /// The watchers of all sockets the engine currently cares about.
    tasks: HashMap<SocketId, SocketTask>,

    /// The timer that sweeps the engine while sockets are watched.
    pub timer: IdleTimer,

    /// Where watcher tasks report readiness to.
    event_tx: mpsc::Sender<PollEvent>,

    /// All queries currently waiting on the engine.
    pub queries: SlotMap<QueryToken, PendingQuery<T>>,

    /// Captured completions the driver has yet to deliver.
    pub deferred: VecDeque<Delivery<T>>,
}

impl<P: Poller, T> Bridge<P, T> {
    /// Creates a bridge with no watched sockets and no pending queries.
    pub fn new(
        poller: P,
        timer: IdleTimer,
        event_tx: mpsc::Sender<PollEvent>,
    ) -> Self {
        Bridge {
            poller,
            tasks: HashMap::new(),
            timer,
            event_tx,
            queries: SlotMap::with_key(),
            deferred: VecDeque::new(),
        }
    }

    /// Returns whether the socket is currently being watched.
    pub fn watches(&self, socket: SocketId) -> bool {
        self.tasks.contains_key(&socket)
    }

    /// Returns whether any socket is currently being watched.
    pub fn has_sockets(&self) -> bool {
        !self.tasks.is_empty()
    }
}

//--- EngineNotify

impl<P: Poller, T> EngineNotify for Bridge<P, T> {
    fn socket_state(
        &mut self,
        socket: SocketId,
        readable: bool,
        writable: bool,
    ) {
        let want = Interest::new(readable, writable);
        if want.is_empty() {
            trace!("Dropping watch on socket {socket}");
            self.tasks
                .remove(&socket)
                .expect("close for a socket that is not being watched");
            if self.tasks.is_empty() {
                self.timer.stop();
            }
            return;
        }

        if let Some(task) = self.tasks.get(&socket) {
            // The watcher may already have exited during teardown.
            _ = task.interest.send(want);
            return;
        }

        let handle = match self.poller.register(socket) {
            Ok(handle) => handle,
            Err(err) => {
                // The engine will hit the socket error itself and fail
                // the affected queries.
                warn!("Cannot watch socket {socket}: {err}");
                return;
            }
        };
        trace!("Watching socket {socket}");
        let (tx, rx) = watch::channel(want);
        tokio::spawn(watch_socket(socket, handle, rx, self.event_tx.clone()));
        self.tasks.insert(socket, SocketTask { interest: tx });
        if self.tasks.len() == 1 {
            self.timer.start();
        }
    }

    fn query_complete(
        &mut self,
        token: QueryToken,
        result: Result<&[u8], Status>,
        timeouts: u32,
    ) {
        let Some(pending) = self.queries.remove(token) else {
            trace!("Ignoring completion for unknown query {token:?}");
            return;
        };
        trace!(
            "Captured {} completion after {timeouts} timeouts",
            pending.kind.label()
        );
        let outcome = match result {
            Ok(answer) => Captured::Answer(Bytes::copy_from_slice(answer)),
            Err(status) => Captured::Failed(status),
        };
        self.deferred.push_back(Delivery {
            kind: pending.kind,
            reply: pending.reply,
            outcome,
        });
    }

    fn host_complete(
        &mut self,
        token: QueryToken,
        result: Result<&HostRecord, Status>,
        timeouts: u32,
    ) {
        let Some(pending) = self.queries.remove(token) else {
            trace!("Ignoring completion for unknown query {token:?}");
            return;
        };
        trace!(
            "Captured {} completion after {timeouts} timeouts",
            pending.kind.label()
        );
        let outcome = match result {
            Ok(record) => Captured::Host(record.clone()),
            Err(status) => Captured::Failed(status),
        };
        self.deferred.push_back(Delivery {
            kind: pending.kind,
            reply: pending.reply,
            outcome,
        });
    }
}

//------------ watch_socket --------------------------------------------------

/// Watches one socket for the interest sent through `interest`.
///
/// Runs until either the interest sender or the event receiver goes away.
/// Readiness is reported through `events`; a poll error is reported as
/// ready in both directions so that the engine picks the error up from
/// the socket itself.
async fn watch_socket<H: PollHandle>(
    socket: SocketId,
    mut handle: H,
    mut interest: watch::Receiver<Interest>,
    events: mpsc::Sender<PollEvent>,
) {
    loop {
        let want = *interest.borrow_and_update();
        if want.is_empty() {
            if interest.changed().await.is_err() {
                return;
            }
            continue;
        }
        tokio::select! {
            res = interest.changed() => {
                if res.is_err() {
                    return;
                }
            }
            res = handle.ready(want) => {
                let readiness = match res {
                    Ok(readiness) => readiness,
                    Err(err) => {
                        warn!("Cannot poll socket {socket}: {err}");
                        Readiness { readable: true, writable: true }
                    }
                };
                let event = PollEvent { socket, readiness };
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}

//============ Tests =========================================================
