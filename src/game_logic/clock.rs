use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Whole seconds left in a round: `ceil(duration - (now - start))`, never
/// below zero and never above `duration_seconds`.
pub fn remaining_seconds(start: DateTime<Utc>, now: DateTime<Utc>, duration_seconds: u64) -> u64 {
    let elapsed_ms = (now - start).num_milliseconds().max(0);
    let total_ms = duration_seconds.saturating_mul(1000) as i64;
    let remaining_ms = total_ms - elapsed_ms;
    if remaining_ms <= 0 {
        0
    } else {
        (remaining_ms as u64).div_ceil(1000)
    }
}

pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used to drive rounds in tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickerEvent {
    /// Emitted whenever the displayed whole-second value changes.
    Remaining {
        round_started_at: DateTime<Utc>,
        seconds: u64,
    },
    /// Emitted exactly once, after which the ticker stops.
    TimedOut { round_started_at: DateTime<Utc> },
}

/// Periodic sampler for one round. Dropping it cancels the underlying task.
#[derive(Debug)]
pub struct RoundTicker {
    round_started_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

impl RoundTicker {
    pub fn spawn(
        round_started_at: DateTime<Utc>,
        duration_seconds: u64,
        period: StdDuration,
        clock: Arc<dyn Clock>,
        events: mpsc::Sender<TickerEvent>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_reported: Option<u64> = None;

            loop {
                interval.tick().await;
                let seconds = remaining_seconds(round_started_at, clock.now(), duration_seconds);

                if seconds == 0 {
                    tracing::debug!(round.started_at = %round_started_at, "Round timer expired");
                    let _ = events.send(TickerEvent::TimedOut { round_started_at }).await;
                    break;
                }

                if last_reported != Some(seconds) {
                    last_reported = Some(seconds);
                    if events
                        .send(TickerEvent::Remaining {
                            round_started_at,
                            seconds,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });

        Self {
            round_started_at,
            handle,
        }
    }

    pub fn round_started_at(&self) -> DateTime<Utc> {
        self.round_started_at
    }
}

impl Drop for RoundTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_remaining_seconds_rounds_up() {
        let start = t0();
        assert_eq!(remaining_seconds(start, start, 60), 60);
        assert_eq!(
            remaining_seconds(start, start + ChronoDuration::milliseconds(1), 60),
            60
        );
        assert_eq!(
            remaining_seconds(start, start + ChronoDuration::milliseconds(1000), 60),
            59
        );
        assert_eq!(
            remaining_seconds(start, start + ChronoDuration::milliseconds(59_001), 60),
            1
        );
    }

    #[test]
    fn test_remaining_seconds_floors_at_zero() {
        let start = t0();
        assert_eq!(remaining_seconds(start, start + ChronoDuration::seconds(60), 60), 0);
        assert_eq!(remaining_seconds(start, start + ChronoDuration::seconds(600), 60), 0);
    }

    #[test]
    fn test_remaining_seconds_clock_behind_start() {
        let start = t0();
        assert_eq!(remaining_seconds(start, start - ChronoDuration::seconds(5), 30), 30);
    }

    #[tokio::test]
    async fn test_ticker_times_out_exactly_once() {
        let clock = ManualClock::new(t0());
        let (tx, mut rx) = mpsc::channel(16);
        let _ticker = RoundTicker::spawn(
            t0(),
            15,
            StdDuration::from_millis(5),
            Arc::new(clock.clone()),
            tx,
        );

        assert_eq!(
            rx.recv().await,
            Some(TickerEvent::Remaining {
                round_started_at: t0(),
                seconds: 15
            })
        );

        clock.advance(ChronoDuration::seconds(15));
        let mut timeouts = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, TickerEvent::TimedOut { .. }) {
                timeouts += 1;
            }
        }
        assert_eq!(timeouts, 1);
    }

    #[tokio::test]
    async fn test_dropping_ticker_cancels_task() {
        let clock = ManualClock::new(t0());
        let (tx, mut rx) = mpsc::channel(16);
        let ticker = RoundTicker::spawn(
            t0(),
            60,
            StdDuration::from_millis(5),
            Arc::new(clock),
            tx,
        );
        assert!(rx.recv().await.is_some());

        drop(ticker);
        // The aborted task drops its sender, so the channel drains and closes.
        while rx.recv().await.is_some() {}
    }
}
