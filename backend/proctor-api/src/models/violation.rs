use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    AbsentSubject,
    MultipleSubjects,
    AudioAnomaly,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::AbsentSubject => "absent_subject",
            ViolationKind::MultipleSubjects => "multiple_subjects",
            ViolationKind::AudioAnomaly => "audio_anomaly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub kind: ViolationKind,
    pub occurred_at: DateTime<Utc>,
    pub frame_sequence: u64,
}

/// Totals over a ledger. `dropped` counts events that were summarized but not
/// retained because the ledger hit its capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub total: u64,
    pub absent_subject: u64,
    pub multiple_subjects: u64,
    pub audio_anomaly: u64,
    pub dropped: u64,
}

impl ViolationSummary {
    pub fn count(&self, kind: ViolationKind) -> u64 {
        match kind {
            ViolationKind::AbsentSubject => self.absent_subject,
            ViolationKind::MultipleSubjects => self.multiple_subjects,
            ViolationKind::AudioAnomaly => self.audio_anomaly,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.total == 0
    }
}
