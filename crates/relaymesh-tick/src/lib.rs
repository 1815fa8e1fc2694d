//! Fixed-interval tick scheduler for the relaymesh server loop.
//!
//! The relay's periodic work (heartbeats, idle-proxy eviction, listing
//! refresh) all hangs off one cadence inside the main loop's
//! `tokio::select!`, so no timers ever race the room state:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         event = transport.next_event() => { /* dispatch */ }
//!         tick = scheduler.wait() => { /* heartbeat + sweeps */ }
//!     }
//! }
//! ```
//!
//! When the loop falls behind (a burst of events), missed ticks are
//! skipped and the cadence restarts from now — heartbeats are liveness
//! signals, catching up on them has no value.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// Configuration for the tick scheduler.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Interval between ticks.
    pub interval: Duration,
    /// Random jitter (0–max) added to the first tick so several servers
    /// started together don't align their cadences.
    pub initial_jitter: Duration,
}

impl TickConfig {
    /// Config with the given interval and the default 50 ms jitter cap.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            initial_jitter: Duration::from_millis(50),
        }
    }
}

/// Information about a fired tick, returned by [`TickScheduler::wait`].
#[derive(Debug, Clone, Copy)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// `true` when the tick fired late and missed ticks were skipped.
    pub overrun: bool,
}

/// Fixed-interval scheduler with skip-on-overrun.
pub struct TickScheduler {
    interval: Duration,
    next_tick: Instant,
    tick_count: u64,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_us = config.initial_jitter.as_micros() as u64;
            Duration::from_micros(rand::rng().random_range(0..max_us))
        };
        debug!(interval_ms = config.interval.as_millis() as u64, "tick scheduler created");
        Self {
            interval: config.interval,
            next_tick: Instant::now() + config.interval + jitter,
            tick_count: 0,
        }
    }

    /// Waits until the next tick is due.
    pub async fn wait(&mut self) -> TickInfo {
        time::sleep_until(self.next_tick).await;

        let now = Instant::now();
        self.tick_count += 1;

        // More than 10% late counts as an overrun; reschedule from now
        // instead of trying to catch up.
        let late_by = now.saturating_duration_since(self.next_tick);
        let overrun = late_by > self.interval / 10;
        if overrun {
            let skipped = late_by.as_nanos() / self.interval.as_nanos().max(1);
            if skipped > 0 {
                warn!(
                    tick = self.tick_count,
                    skipped = skipped as u64,
                    "tick overrun, skipping ahead"
                );
            }
            self.next_tick = now + self.interval;
        } else {
            self.next_tick += self.interval;
        }

        trace!(tick = self.tick_count, overrun, "tick fired");
        TickInfo {
            tick: self.tick_count,
            overrun,
        }
    }

    /// Ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The configured interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
