use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    QuestionTick(QuestionTick),
    QuestionExpired(QuestionExpired),
    SessionCompleted(SessionCompleted),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QuestionTick {
    pub session_id: String,
    pub question_index: usize,
    pub remaining_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QuestionExpired {
    pub session_id: String,
    pub question_index: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionCompleted {
    pub session_id: String,
    pub score: usize,
    pub passed: bool,
    pub timestamp: DateTime<Utc>,
}

impl TimerEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            TimerEvent::QuestionTick(_) => "question-tick",
            TimerEvent::QuestionExpired(_) => "question-expired",
            TimerEvent::SessionCompleted(_) => "session-completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TimerEvent::SessionCompleted(_))
    }
}
