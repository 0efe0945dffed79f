use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::MonitorSettings;
use crate::metrics::MONITOR_POLLS_TOTAL;
use crate::models::{MonitorSnapshot, ViolationKind};
use crate::services::devices::{
    AudioDevice, AudioSource, CaptureDevice, FrameSource, MonitorError, SubjectDetector,
};
use crate::services::ledger::ViolationLedger;
use crate::utils::clock::Clock;

#[derive(Debug, Clone, Copy)]
pub struct PresencePolicy {
    /// How long zero-subject frames are tolerated after the last single-subject frame.
    pub absence_grace: Duration,
    pub audio_threshold: f32,
    /// Consecutive loud buffers needed before an audio anomaly is recorded.
    pub audio_sustain_buffers: u32,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            absence_grace: Duration::seconds(3),
            audio_threshold: 1000.0,
            audio_sustain_buffers: 3,
        }
    }
}

impl From<&MonitorSettings> for PresencePolicy {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            absence_grace: settings.absence_grace(),
            audio_threshold: settings.audio_threshold,
            audio_sustain_buffers: settings.audio_sustain_buffers,
        }
    }
}

/// Result of one successful frame poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub subject_count: usize,
    pub recorded: Vec<ViolationKind>,
}

#[derive(Default)]
struct MonitorState {
    frames: Option<Box<dyn FrameSource>>,
    audio: Option<Box<dyn AudioSource>>,
    running: bool,
    subject_count: usize,
    subject_present: bool,
    multiple_subjects: bool,
    absence_flagged: bool,
    last_seen_subject_at: Option<DateTime<Utc>>,
    loud_buffers: u32,
    audio_flagged: bool,
    polls: u64,
    skipped_polls: u64,
}

/// Classifies subject presence frame by frame and turns persistent anomalies
/// into ledger entries. Owns the capture device between `start` and `stop`.
pub struct PresenceMonitor {
    camera: Arc<dyn CaptureDevice>,
    detector: Arc<dyn SubjectDetector>,
    microphone: Option<Arc<dyn AudioDevice>>,
    clock: Arc<dyn Clock>,
    ledger: ViolationLedger,
    policy: PresencePolicy,
    state: MonitorState,
}

impl PresenceMonitor {
    pub fn new(
        camera: Arc<dyn CaptureDevice>,
        detector: Arc<dyn SubjectDetector>,
        clock: Arc<dyn Clock>,
        ledger: ViolationLedger,
        policy: PresencePolicy,
    ) -> Self {
        Self {
            camera,
            detector,
            microphone: None,
            clock,
            ledger,
            policy,
            state: MonitorState::default(),
        }
    }

    pub fn with_microphone(mut self, microphone: Arc<dyn AudioDevice>) -> Self {
        self.microphone = Some(microphone);
        self
    }

    pub fn ledger(&self) -> &ViolationLedger {
        &self.ledger
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.state.running {
            return Ok(());
        }

        let frames = self.camera.open()?;

        // A missing microphone only disables audio checks.
        let audio = match &self.microphone {
            Some(microphone) => match microphone.open() {
                Ok(source) => Some(source),
                Err(e) => {
                    tracing::warn!(error = %e, "audio monitoring disabled");
                    None
                }
            },
            None => None,
        };

        self.state = MonitorState {
            frames: Some(frames),
            audio,
            running: true,
            last_seen_subject_at: Some(self.clock.now()),
            ..MonitorState::default()
        };

        tracing::info!(
            audio_enabled = self.state.audio.is_some(),
            "presence monitor started"
        );
        Ok(())
    }

    /// Acquires and classifies one frame. A `CaptureError` means this poll was
    /// skipped; the monitor stays running.
    pub fn poll_once(&mut self) -> Result<PollOutcome, MonitorError> {
        if !self.state.running {
            return Err(MonitorError::CaptureError(
                "monitor is not running".to_string(),
            ));
        }

        let mut recorded = Vec::new();
        self.poll_audio(&mut recorded);

        let frame = match self.state.frames.as_mut().map(|source| source.read_frame()) {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                self.state.skipped_polls += 1;
                MONITOR_POLLS_TOTAL.with_label_values(&["skipped"]).inc();
                tracing::debug!(error = %e, "frame poll skipped");
                return Err(e);
            }
            None => {
                return Err(MonitorError::CaptureError(
                    "capture device released".to_string(),
                ))
            }
        };

        let now = self.clock.now();
        let subject_count = self.detector.count_subjects(&frame);
        self.state.subject_count = subject_count;
        self.state.polls += 1;
        MONITOR_POLLS_TOTAL.with_label_values(&["ok"]).inc();

        match subject_count {
            0 => {
                self.state.subject_present = false;
                let last_seen = self.state.last_seen_subject_at.unwrap_or(now);
                if !self.state.absence_flagged && now - last_seen > self.policy.absence_grace {
                    self.state.absence_flagged = true;
                    self.record(ViolationKind::AbsentSubject, &mut recorded);
                }
            }
            1 => {
                self.state.subject_present = true;
                self.state.multiple_subjects = false;
                self.state.absence_flagged = false;
                self.state.last_seen_subject_at = Some(now);
            }
            _ => {
                self.state.subject_present = true;
                self.state.multiple_subjects = true;
                self.record(ViolationKind::MultipleSubjects, &mut recorded);
            }
        }

        tracing::debug!(subject_count, violations = recorded.len(), "frame classified");

        Ok(PollOutcome {
            subject_count,
            recorded,
        })
    }

    fn poll_audio(&mut self, recorded: &mut Vec<ViolationKind>) {
        let Some(source) = self.state.audio.as_mut() else {
            return;
        };

        let level = match source.read_level() {
            Ok(level) => level,
            Err(e) => {
                tracing::debug!(error = %e, "audio poll skipped");
                return;
            }
        };

        if level > self.policy.audio_threshold {
            self.state.loud_buffers += 1;
            if !self.state.audio_flagged
                && self.state.loud_buffers >= self.policy.audio_sustain_buffers
            {
                self.state.audio_flagged = true;
                self.record(ViolationKind::AudioAnomaly, recorded);
            }
        } else {
            self.state.loud_buffers = 0;
            self.state.audio_flagged = false;
        }
    }

    fn record(&self, kind: ViolationKind, recorded: &mut Vec<ViolationKind>) {
        if self.ledger.record(kind).is_some() {
            recorded.push(kind);
        }
    }

    /// Releases the devices and freezes the ledger. Safe to call repeatedly.
    pub fn stop(&mut self) {
        let was_running = self.state.running;
        self.state.frames = None;
        self.state.audio = None;
        self.state.running = false;
        self.ledger.freeze();

        if was_running {
            tracing::info!(
                polls = self.state.polls,
                skipped = self.state.skipped_polls,
                violations = self.ledger.summarize().total,
                "presence monitor stopped"
            );
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            running: self.state.running,
            subject_count: self.state.subject_count,
            subject_present: self.state.subject_present,
            multiple_subjects: self.state.multiple_subjects,
            absence_flagged: self.state.absence_flagged,
            audio_enabled: self.state.audio.is_some(),
            last_seen_subject_at: self.state.last_seen_subject_at,
            polls: self.state.polls,
            skipped_polls: self.state.skipped_polls,
        }
    }
}

impl Drop for PresenceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
