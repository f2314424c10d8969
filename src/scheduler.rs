//! Periodic background tasks
//!
//! The first tick fires one full period after spawning. Stopping wakes the loop
//! immediately and drops a tick that is still in flight; a stop request always
//! wins over a pending tick.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

pub struct PeriodicTask {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the loop and wait for it to exit
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!("{} task panicked: {}", self.name, e);
            }
        }
        tracing::debug!("{} task stopped", self.name);
    }
}

/// Spawn `tick` every `period` until stopped
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> PeriodicTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    tokio::select! {
                        biased;
                        _ = stop_rx.changed() => break,
                        _ = tick() => {}
                    }
                }
            }
        }
    });

    tracing::debug!("{} task started (every {}ms)", name, period.as_millis());
    PeriodicTask {
        name,
        stop_tx,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let task = spawn_periodic("counter", Duration::from_secs(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        time::sleep(Duration::from_secs(9)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.stop().await;
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_running_tick() {
        let started = Arc::new(AtomicU32::new(0));
        let finished = Arc::new(AtomicU32::new(0));
        let (s, f) = (started.clone(), finished.clone());
        let task = spawn_periodic("slow", Duration::from_secs(1), move || {
            let (s, f) = (s.clone(), f.clone());
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                time::sleep(Duration::from_secs(30)).await;
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        let stopping = time::Instant::now();
        task.stop().await;
        assert!(stopping.elapsed() < Duration::from_secs(1));

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
