use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::sync::watch;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Fixed-interval ticker aligned to wall-clock boundaries
///
/// With a 15 minute interval jobs fire at XX:00, XX:15, XX:30 and XX:45. The
/// job is awaited inline and late ticks are skipped, so runs never overlap.
pub struct Scheduler {
    interval: Duration,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            interval: interval.max(Duration::from_secs(1)),
            shutdown,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop every `run` loop of this scheduler after its current job
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Call `job` on every boundary until `stop` is called
    pub async fn run<F, Fut>(&self, name: &str, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut stop = self.shutdown.subscribe();
        if *stop.borrow() {
            return;
        }

        let delay = delay_until_boundary(Utc::now(), self.interval);
        tracing::info!("⏰ {} starts in {:?}, then every {:?}", name, delay, self.interval);

        let mut ticker = interval_at(Instant::now() + delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::debug!("🔄 [{}] Tick at {}", name, Utc::now().format("%H:%M:%S"));
                    job().await;
                }
                _ = stop.changed() => break,
            }
            if *stop.borrow() {
                break;
            }
        }

        tracing::info!("{} stopped", name);
    }
}

/// Time from `now` to the next multiple of `interval` since the epoch (zero on a boundary)
pub fn delay_until_boundary(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1) as i64;
    let now_ms = now.timestamp_millis();
    let remainder = now_ms.rem_euclid(interval_ms);

    if remainder == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((interval_ms - remainder) as u64)
    }
}
