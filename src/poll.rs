//! Socket readiness polling.
//!
//! The engine owns its sockets; the bridge only needs to know when they
//! become readable or writable. The [`Poller`] trait is the seam towards
//! the host loop's readiness primitive and [`TokioPoller`] is the stock
//! implementation over [`AsyncFd`]. Registration hands out one
//! [`PollHandle`] per socket which the bridge's watcher task polls with the
//! currently requested interest.
//!
//! [`AsyncFd`]: tokio::io::unix::AsyncFd

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::future::Future;
use std::io;
use std::pin::Pin;

use crate::engine::SocketId;

//------------ Interest ------------------------------------------------------

/// The readiness kinds a socket watch asks for.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Interest {
    /// Wait for the socket to become readable.
    read: bool,

    /// Wait for the socket to become writable.
    write: bool,
}

impl Interest {
    /// Creates an interest set.
    pub fn new(read: bool, write: bool) -> Self {
        Interest { read, write }
    }

    /// Returns whether read readiness is wanted.
    pub fn read(self) -> bool {
        self.read
    }

    /// Returns whether write readiness is wanted.
    pub fn write(self) -> bool {
        self.write
    }

    /// Returns whether no readiness is wanted at all.
    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

//------------ Readiness -----------------------------------------------------

/// The readiness a socket reported.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Readiness {
    /// The socket is readable.
    pub readable: bool,

    /// The socket is writable.
    pub writable: bool,
}

//------------ Poller --------------------------------------------------------

/// A source of readiness polling for engine-owned sockets.
pub trait Poller: Send + 'static {
    /// The handle for one registered socket.
    type Handle: PollHandle;

    /// Registers a socket with the host loop.
    ///
    /// The socket stays owned by the engine; dropping the returned handle
    /// must end the registration without closing the socket.
    fn register(&mut self, socket: SocketId) -> io::Result<Self::Handle>;
}

//------------ PollHandle ----------------------------------------------------

/// The poll registration of a single socket.
pub trait PollHandle: Send + 'static {
    /// Waits until the socket is ready for any of the given interests.
    ///
    /// The interest set is never empty. Readiness is reported edge-wise:
    /// once returned, it is not reported again until the socket has been
    /// drained to would-block and becomes ready anew.
    fn ready<'a>(
        &'a mut self,
        interest: Interest,
    ) -> Pin<Box<dyn Future<Output = io::Result<Readiness>> + Send + 'a>>;
}

//------------ TokioPoller ---------------------------------------------------

/// A [`Poller`] over tokio's [`AsyncFd`].
///
/// [`AsyncFd`]: tokio::io::unix::AsyncFd
#[cfg(unix)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioPoller;

#[cfg(unix)]
mod unix {
    use std::future::Future;
    use std::io;
    use std::os::fd::{AsRawFd, RawFd};
    use std::pin::Pin;

    use tokio::io::unix::AsyncFd;
    use tokio::io::Interest as FdInterest;

    use super::{Interest, PollHandle, Poller, Readiness, TokioPoller};
    use crate::engine::SocketId;

    /// A descriptor lent to the poll registration.
    ///
    /// Carries no ownership: dropping it leaves the descriptor open for the
    /// engine.
    #[derive(Debug)]
    struct BorrowedSock(RawFd);

    impl AsRawFd for BorrowedSock {
        fn as_raw_fd(&self) -> RawFd {
            self.0
        }
    }

    /// The poll registration of one engine socket.
    #[derive(Debug)]
    pub struct FdHandle {
        /// The registered descriptor.
        fd: AsyncFd<BorrowedSock>,
    }

    impl Poller for TokioPoller {
        type Handle = FdHandle;

        fn register(&mut self, socket: SocketId) -> io::Result<FdHandle> {
            let fd = AsyncFd::with_interest(
                BorrowedSock(socket.0 as RawFd),
                FdInterest::READABLE | FdInterest::WRITABLE,
            )?;
            Ok(FdHandle { fd })
        }
    }

    impl PollHandle for FdHandle {
        fn ready<'a>(
            &'a mut self,
            interest: Interest,
        ) -> Pin<Box<dyn Future<Output = io::Result<Readiness>> + Send + 'a>>
        {
            Box::pin(async move {
                let mut guard = self.fd.ready(fd_interest(interest)).await?;
                let ready = guard.ready();
                guard.clear_ready();
                Ok(Readiness {
                    readable: ready.is_readable(),
                    writable: ready.is_writable(),
                })
            })
        }
    }

    /// Converts an interest set into tokio's.
    fn fd_interest(interest: Interest) -> FdInterest {
        if interest.read() && interest.write() {
            FdInterest::READABLE | FdInterest::WRITABLE
        } else if interest.write() {
            FdInterest::WRITABLE
        } else {
            FdInterest::READABLE
        }
    }
}

#[cfg(unix)]
pub use self::unix::FdHandle;

//============ Tests =========================================================
