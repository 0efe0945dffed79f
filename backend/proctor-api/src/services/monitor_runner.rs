use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::models::{MonitorSnapshot, ViolationSummary};
use crate::services::devices::MonitorError;
use crate::services::ledger::ViolationLedger;
use crate::services::presence_monitor::PresenceMonitor;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// What a session needs from its proctoring monitor.
#[async_trait]
pub trait MonitorControl: Send {
    async fn start(&mut self) -> Result<(), MonitorError>;

    /// Stops polling and releases the capture device before returning.
    /// Calling it when not running is a no-op.
    async fn stop(&mut self);

    fn snapshot(&self) -> MonitorSnapshot;

    fn violation_summary(&self) -> ViolationSummary;
}

struct RunningMonitor {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<Option<PresenceMonitor>>,
}

/// Runs a [`PresenceMonitor`] on its own tokio task, polling at a fixed
/// cadence independent of the session clock. Device reads happen on the
/// blocking pool so a stalled camera never holds a runtime worker.
pub struct MonitorHandle {
    idle: Option<PresenceMonitor>,
    running: Option<RunningMonitor>,
    ledger: ViolationLedger,
    poll_interval: Duration,
    stop_wait: Duration,
    open_retry: RetryConfig,
    snapshots: watch::Receiver<MonitorSnapshot>,
    publisher: Option<watch::Sender<MonitorSnapshot>>,
}

impl MonitorHandle {
    pub fn new(monitor: PresenceMonitor, poll_interval: Duration, stop_wait: Duration) -> Self {
        let ledger = monitor.ledger().clone();
        let (publisher, snapshots) = watch::channel(monitor.snapshot());
        Self {
            idle: Some(monitor),
            running: None,
            ledger,
            poll_interval,
            stop_wait,
            open_retry: RetryConfig::default(),
            snapshots,
            publisher: Some(publisher),
        }
    }

    pub fn with_open_retry(mut self, open_retry: RetryConfig) -> Self {
        self.open_retry = open_retry;
        self
    }

    pub fn ledger(&self) -> &ViolationLedger {
        &self.ledger
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

#[async_trait]
impl MonitorControl for MonitorHandle {
    async fn start(&mut self) -> Result<(), MonitorError> {
        if self.running.is_some() {
            return Ok(());
        }
        let (Some(mut monitor), Some(publisher)) = (self.idle.take(), self.publisher.take())
        else {
            return Err(MonitorError::DeviceUnavailable(
                "monitor has already been stopped".to_string(),
            ));
        };

        let opened = retry_async_with_config(self.open_retry.clone(), || {
            let result = monitor.start();
            async move { result }
        })
        .await;

        if let Err(e) = opened {
            tracing::warn!(error = %e, "presence monitor failed to start");
            self.idle = Some(monitor);
            self.publisher = Some(publisher);
            return Err(e);
        }

        let _ = publisher.send(monitor.snapshot());
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let poll_interval = self.poll_interval;

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let polled = tokio::task::spawn_blocking(move || {
                            let result = monitor.poll_once();
                            (monitor, result)
                        })
                        .await;

                        match polled {
                            Ok((returned, _)) => monitor = returned,
                            Err(e) => {
                                // The monitor was dropped with the failed poll,
                                // which already released the device.
                                tracing::error!(error = %e, "monitor poll task failed");
                                return None;
                            }
                        }
                        let _ = publisher.send(monitor.snapshot());
                    }
                }
            }

            monitor.stop();
            let _ = publisher.send(monitor.snapshot());
            Some(monitor)
        });

        self.running = Some(RunningMonitor { shutdown, join });
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(RunningMonitor { shutdown, mut join }) = self.running.take() {
            let _ = shutdown.send(true);

            match tokio::time::timeout(self.stop_wait, &mut join).await {
                Ok(Ok(Some(_stopped))) => {}
                Ok(Ok(None)) => tracing::warn!("presence monitor ended after a failed poll"),
                Ok(Err(e)) => tracing::error!(error = %e, "presence monitor task failed"),
                Err(_) => {
                    tracing::warn!(
                        wait_ms = self.stop_wait.as_millis() as u64,
                        "presence monitor did not stop in time, aborting"
                    );
                    join.abort();
                }
            }
        }

        if let Some(mut monitor) = self.idle.take() {
            monitor.stop();
        }
        self.publisher = None;
        self.ledger.freeze();
    }

    fn snapshot(&self) -> MonitorSnapshot {
        let mut snapshot = *self.snapshots.borrow();
        if self.running.is_none() {
            snapshot.running = false;
        }
        snapshot
    }

    fn violation_summary(&self) -> ViolationSummary {
        self.ledger.summarize()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FrameReport, Region};
    use crate::services::devices::{CaptureDevice, RegionCountDetector, RemoteFeed};
    use crate::services::presence_monitor::PresencePolicy;
    use crate::utils::clock::{Clock, ManualClock};
    use std::sync::Arc;

    fn handle(feed: &RemoteFeed, clock: Arc<dyn Clock>) -> MonitorHandle {
        let monitor = PresenceMonitor::new(
            Arc::new(feed.clone()),
            Arc::new(RegionCountDetector::new(30)),
            clock.clone(),
            ViolationLedger::new(clock),
            PresencePolicy::default(),
        );
        MonitorHandle::new(
            monitor,
            Duration::from_millis(20),
            Duration::from_millis(500),
        )
        .with_open_retry(RetryConfig::no_retry())
    }

    fn two_faces() -> FrameReport {
        let face = |x| Region {
            x,
            y: 40,
            width: 90,
            height: 90,
        };
        FrameReport {
            width: 640,
            height: 480,
            regions: vec![face(10), face(300)],
            audio_level: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_in_background_until_stopped() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let feed = RemoteFeed::new(clock.clone(), Duration::from_secs(2));
        let mut monitor = handle(&feed, clock);

        feed.push(two_faces());
        monitor.start().await.unwrap();
        assert!(feed.is_claimed());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let snapshot = monitor.snapshot();
        assert!(snapshot.running);
        assert_eq!(snapshot.subject_count, 2);
        assert_eq!(snapshot.polls, 1);
        assert!(snapshot.skipped_polls >= 1);
        assert_eq!(monitor.violation_summary().multiple_subjects, 1);

        feed.push(two_faces());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(monitor.violation_summary().multiple_subjects, 2);

        monitor.stop().await;
        assert!(!feed.is_claimed());
        assert!(!monitor.snapshot().running);
        assert!(monitor.ledger().is_frozen());

        let frozen = monitor.violation_summary();
        feed.push(two_faces());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(monitor.violation_summary(), frozen);

        // Second stop is a no-op.
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_fails_when_device_is_taken() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let feed = RemoteFeed::new(clock.clone(), Duration::from_secs(2));
        let _other = CaptureDevice::open(&feed).unwrap();
        let mut monitor = handle(&feed, clock);

        let err = monitor.start().await.unwrap_err();

        assert!(matches!(err, MonitorError::DeviceUnavailable(_)));
        assert!(!monitor.is_running());
        assert!(!monitor.snapshot().running);
    }

    #[tokio::test(start_paused = true)]
    async fn cannot_restart_after_stop() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let feed = RemoteFeed::new(clock.clone(), Duration::from_secs(2));
        let mut monitor = handle(&feed, clock);

        monitor.start().await.unwrap();
        monitor.stop().await;

        assert!(monitor.start().await.is_err());
        assert!(!feed.is_claimed());
    }
}
