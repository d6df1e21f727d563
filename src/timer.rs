//! The shared idle timer of a channel.
//!
//! The engine handles its own query timeouts, but it only notices them when
//! it is asked to look. While any socket is being watched, the channel keeps
//! one repeating timer running and sweeps the engine on every expiry. Socket
//! readiness counts as progress and pushes the next expiry out.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use core::cmp;
use core::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

//------------ Configuration Constants ---------------------------------------

/// The sweep period bounds.
///
/// A configured timeout of zero means "engine default", which sweeps at the
/// maximum period. Anything else is capped into this range: sweeping slower
/// than the engine's timeout granularity would delay timeouts, sweeping
/// much faster than once a millisecond is pointless work.
const SWEEP_PERIOD: DefMinMax<Duration> = DefMinMax::new(
    Duration::from_millis(1000),
    Duration::from_millis(1),
    Duration::from_millis(1000),
);

//------------ IdleTimer -----------------------------------------------------

/// A repeating timer that runs while sockets are watched.
#[derive(Debug)]
pub(crate) struct IdleTimer {
    /// The armed interval, if the timer is running.
    interval: Option<Interval>,

    /// The configured timeout, zero for the engine default.
    timeout: Duration,
}

impl IdleTimer {
    /// Creates a stopped timer for the given configured timeout.
    pub(crate) fn new(timeout: Duration) -> Self {
        IdleTimer {
            interval: None,
            timeout,
        }
    }

    /// Returns whether the timer is currently running.
    pub(crate) fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Starts the timer. Does nothing if it is already running.
    pub(crate) fn start(&mut self) {
        if self.interval.is_some() {
            return;
        }
        let period = if self.timeout.is_zero() {
            SWEEP_PERIOD.default()
        } else {
            SWEEP_PERIOD.limit(self.timeout)
        };
        let mut interval =
            tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    /// Stops the timer. Does nothing if it is already stopped.
    pub(crate) fn stop(&mut self) {
        self.interval = None;
    }

    /// Pushes the next expiry a full period out.
    ///
    /// Called when a socket reports readiness: I/O progress means the
    /// engine saw its sockets just now and the sweep can wait. Does nothing
    /// while the timer is stopped.
    pub(crate) fn poke(&mut self) {
        if let Some(interval) = self.interval.as_mut() {
            interval.reset();
        }
    }

    /// Waits for the next expiry.
    ///
    /// Pends forever while the timer is stopped.
    pub(crate) async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

//------------ DefMinMax -----------------------------------------------------

/// The default, minimum, and maximum values for a config variable.
#[derive(Clone, Copy)]
struct DefMinMax<T> {
    /// The default value,
    def: T,

    /// The minimum value,
    min: T,

    /// The maximum value,
    max: T,
}

impl<T> DefMinMax<T> {
    /// Creates a new value.
    const fn new(def: T, min: T, max: T) -> Self {
        Self { def, min, max }
    }

    /// Returns the default value.
    fn default(self) -> T {
        self.def
    }

    /// Trims the given value to fit into the minimum/maximum range.
    fn limit(self, value: T) -> T
    where
        T: Ord,
    {
        cmp::max(self.min, cmp::min(self.max, value))
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use tokio_test::task::spawn;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stopped_timer_pends() {
        let mut timer = IdleTimer::new(Duration::from_millis(100));
        assert!(!timer.is_running());

        let mut tick = spawn(timer.tick());
        assert_pending!(tick.poll());

        // Even well past the period nothing fires.
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_pending!(tick.poll());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn fires_once_per_period() {
        let mut timer = IdleTimer::new(Duration::from_millis(100));
        timer.start();
        assert!(timer.is_running());

        // Not before the period has elapsed.
        let mut tick = spawn(timer.tick());
        assert_pending!(tick.poll());
        tokio::time::advance(Duration::from_millis(99)).await;
        assert_pending!(tick.poll());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_ready!(tick.poll());
        drop(tick);

        // And again a full period later.
        let mut tick = spawn(timer.tick());
        assert_pending!(tick.poll());
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_ready!(tick.poll());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn poke_defers_expiry() {
        let mut timer = IdleTimer::new(Duration::from_millis(100));
        timer.start();

        tokio::time::advance(Duration::from_millis(99)).await;
        timer.poke();

        // The old expiry has been pushed out a full period.
        let mut tick = spawn(timer.tick());
        tokio::time::advance(Duration::from_millis(99)).await;
        assert_pending!(tick.poll());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_ready!(tick.poll());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn start_is_idempotent() {
        let mut timer = IdleTimer::new(Duration::from_millis(100));
        timer.start();
        tokio::time::advance(Duration::from_millis(99)).await;

        // A second start must not rewind the running interval.
        timer.start();
        tokio::time::advance(Duration::from_millis(1)).await;
        let mut tick = spawn(timer.tick());
        assert_ready!(tick.poll());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stop_then_restart() {
        let mut timer = IdleTimer::new(Duration::from_millis(100));
        timer.start();
        timer.stop();
        assert!(!timer.is_running());
        timer.poke();
        assert!(!timer.is_running());

        timer.start();
        tokio::time::advance(Duration::from_millis(100)).await;
        timer.tick().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn period_is_capped() {
        // A huge configured timeout still sweeps at the maximum period.
        let mut timer = IdleTimer::new(Duration::from_secs(3600));
        timer.start();
        let mut tick = spawn(timer.tick());
        assert_pending!(tick.poll());
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_ready!(tick.poll());
        drop(tick);

        // Zero means engine default and sweeps at the default period.
        let mut timer = IdleTimer::new(Duration::ZERO);
        timer.start();
        let mut tick = spawn(timer.tick());
        assert_pending!(tick.poll());
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_ready!(tick.poll());
    }
}
