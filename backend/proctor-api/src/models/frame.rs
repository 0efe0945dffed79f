use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Bounding box of one candidate subject, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub regions: Vec<Region>,
}

/// Client-side detector output posted for a session's remote feed.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FrameReport {
    #[validate(range(min = 1, max = 8192, message = "frame width out of range"))]
    pub width: u32,
    #[validate(range(min = 1, max = 8192, message = "frame height out of range"))]
    pub height: u32,
    #[validate(length(max = 32, message = "too many regions in one frame"))]
    #[serde(default)]
    pub regions: Vec<Region>,
    /// Mean absolute sample magnitude of the matching audio buffer, if the
    /// client has a microphone.
    #[validate(range(min = 0.0, message = "audio level must not be negative"))]
    pub audio_level: Option<f32>,
}

/// What the monitor currently believes, published after every poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub running: bool,
    pub subject_count: usize,
    pub subject_present: bool,
    pub multiple_subjects: bool,
    pub absence_flagged: bool,
    pub audio_enabled: bool,
    pub last_seen_subject_at: Option<DateTime<Utc>>,
    pub polls: u64,
    pub skipped_polls: u64,
}
