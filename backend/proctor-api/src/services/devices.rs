//! Capture seams used by the presence monitor.
//!
//! A device is opened exclusively when monitoring starts and released by
//! dropping the source it handed out. `RemoteFeed` is the in-process device
//! fed by a client-side detector over HTTP. Each pushed report is handed to a
//! source at most once; polls with nothing new are skipped.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::models::{Frame, FrameReport};
use crate::utils::clock::Clock;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("frame capture failed: {0}")]
    CaptureError(String),

    #[error("audio input unavailable: {0}")]
    AudioUnavailable(String),
}

pub trait CaptureDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, MonitorError>;
}

pub trait FrameSource: Send {
    /// May block for bounded device I/O time.
    fn read_frame(&mut self) -> Result<Frame, MonitorError>;
}

pub trait SubjectDetector: Send + Sync {
    fn count_subjects(&self, frame: &Frame) -> usize;
}

pub trait AudioDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioSource>, MonitorError>;
}

pub trait AudioSource: Send {
    /// Mean absolute sample magnitude of one buffer.
    fn read_level(&mut self) -> Result<f32, MonitorError>;
}

/// Counts detector regions large enough to be a face at webcam distance.
#[derive(Debug, Clone, Copy)]
pub struct RegionCountDetector {
    pub min_size_px: u32,
}

impl RegionCountDetector {
    pub fn new(min_size_px: u32) -> Self {
        Self { min_size_px }
    }
}

impl SubjectDetector for RegionCountDetector {
    fn count_subjects(&self, frame: &Frame) -> usize {
        frame
            .regions
            .iter()
            .filter(|r| r.width >= self.min_size_px && r.height >= self.min_size_px)
            .count()
    }
}

#[derive(Debug, Clone)]
struct FeedEntry {
    sequence: u64,
    frame: Frame,
    audio_level: Option<f32>,
}

struct FeedInner {
    clock: Arc<dyn Clock>,
    stall_timeout: Duration,
    latest: Mutex<Option<FeedEntry>>,
    video_claimed: AtomicBool,
    audio_claimed: AtomicBool,
}

/// Device whose frames are pushed in by the client rather than read from
/// local hardware. Cloning shares the feed.
#[derive(Clone)]
pub struct RemoteFeed {
    inner: Arc<FeedInner>,
}

impl RemoteFeed {
    pub fn new(clock: Arc<dyn Clock>, stall_timeout: std::time::Duration) -> Self {
        let stall_timeout = Duration::from_std(stall_timeout).unwrap_or(Duration::seconds(2));
        Self {
            inner: Arc::new(FeedInner {
                clock,
                stall_timeout,
                latest: Mutex::new(None),
                video_claimed: AtomicBool::new(false),
                audio_claimed: AtomicBool::new(false),
            }),
        }
    }

    pub fn push(&self, report: FrameReport) {
        let mut latest = self.inner.latest.lock().unwrap_or_else(|e| e.into_inner());
        let sequence = latest.as_ref().map_or(1, |entry| entry.sequence + 1);
        *latest = Some(FeedEntry {
            sequence,
            frame: Frame {
                captured_at: self.inner.clock.now(),
                width: report.width,
                height: report.height,
                regions: report.regions,
            },
            audio_level: report.audio_level,
        });
    }

    pub fn is_claimed(&self) -> bool {
        self.inner.video_claimed.load(Ordering::Acquire)
    }

    /// Latest report newer than `seen`, provided the feed has not stalled.
    fn next_entry(&self, seen: u64) -> Result<FeedEntry, MonitorError> {
        let now = self.inner.clock.now();
        let latest = self.inner.latest.lock().unwrap_or_else(|e| e.into_inner());
        match latest.as_ref() {
            Some(entry) if now - entry.frame.captured_at > self.inner.stall_timeout => {
                Err(MonitorError::CaptureError(format!(
                    "feed stalled, last frame at {}",
                    entry.frame.captured_at
                )))
            }
            Some(entry) if entry.sequence <= seen => {
                Err(MonitorError::CaptureError("no new frame".to_string()))
            }
            Some(entry) => Ok(entry.clone()),
            None => Err(MonitorError::CaptureError(
                "no frame received yet".to_string(),
            )),
        }
    }

    fn last_frame_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|entry| entry.frame.captured_at)
    }
}

impl std::fmt::Debug for RemoteFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFeed")
            .field("claimed", &self.is_claimed())
            .field("last_frame_at", &self.last_frame_at())
            .finish()
    }
}

impl CaptureDevice for RemoteFeed {
    fn open(&self) -> Result<Box<dyn FrameSource>, MonitorError> {
        if self
            .inner
            .video_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MonitorError::DeviceUnavailable(
                "feed is already claimed by another monitor".to_string(),
            ));
        }
        Ok(Box::new(RemoteFrameSource {
            feed: self.clone(),
            seen: 0,
        }))
    }
}

impl AudioDevice for RemoteFeed {
    fn open(&self) -> Result<Box<dyn AudioSource>, MonitorError> {
        if self
            .inner
            .audio_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(MonitorError::AudioUnavailable(
                "feed audio is already claimed".to_string(),
            ));
        }
        Ok(Box::new(RemoteAudioSource {
            feed: self.clone(),
            seen: 0,
        }))
    }
}

struct RemoteFrameSource {
    feed: RemoteFeed,
    seen: u64,
}

impl FrameSource for RemoteFrameSource {
    fn read_frame(&mut self) -> Result<Frame, MonitorError> {
        let entry = self.feed.next_entry(self.seen)?;
        self.seen = entry.sequence;
        Ok(entry.frame)
    }
}

impl Drop for RemoteFrameSource {
    fn drop(&mut self) {
        self.feed
            .inner
            .video_claimed
            .store(false, Ordering::Release);
    }
}

struct RemoteAudioSource {
    feed: RemoteFeed,
    seen: u64,
}

impl AudioSource for RemoteAudioSource {
    fn read_level(&mut self) -> Result<f32, MonitorError> {
        let entry = self.feed.next_entry(self.seen)?;
        self.seen = entry.sequence;
        entry.audio_level.ok_or_else(|| {
            MonitorError::CaptureError("latest report carries no audio level".to_string())
        })
    }
}

impl Drop for RemoteAudioSource {
    fn drop(&mut self) {
        self.feed
            .inner
            .audio_claimed
            .store(false, Ordering::Release);
    }
}
