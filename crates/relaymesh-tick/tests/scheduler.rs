//! Tests for the tick scheduler, using Tokio's paused clock for
//! deterministic timing.

use std::time::Duration;

use relaymesh_tick::{TickConfig, TickScheduler};

fn config(interval_ms: u64) -> TickConfig {
    TickConfig {
        interval: Duration::from_millis(interval_ms),
        // No jitter in tests: exact deadlines matter here.
        initial_jitter: Duration::ZERO,
    }
}

#[tokio::test(start_paused = true)]
async fn test_ticks_fire_at_the_configured_interval() {
    let mut scheduler = TickScheduler::new(config(100));
    let start = tokio::time::Instant::now();

    for expected in 1..=3u64 {
        let info = scheduler.wait().await;
        assert_eq!(info.tick, expected);
        assert!(!info.overrun);
    }

    // Three ticks at 100 ms each on the auto-advancing paused clock.
    assert_eq!(start.elapsed(), Duration::from_millis(300));
    assert_eq!(scheduler.tick_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_loop_iteration_is_reported_as_overrun() {
    let mut scheduler = TickScheduler::new(config(100));
    scheduler.wait().await;

    // Simulate a main-loop stall well past several deadlines.
    tokio::time::advance(Duration::from_millis(450)).await;

    let info = scheduler.wait().await;
    assert!(info.overrun);

    // The cadence restarts from now instead of replaying missed ticks.
    let start = tokio::time::Instant::now();
    scheduler.wait().await;
    assert_eq!(start.elapsed(), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_tick_count_is_monotonic() {
    let mut scheduler = TickScheduler::new(config(10));
    let mut last = 0;
    for _ in 0..5 {
        let info = scheduler.wait().await;
        assert!(info.tick > last);
        last = info.tick;
    }
}
