use serde::{Deserialize, Serialize};
use validator::Validate;

pub mod answer;
pub mod frame;
pub mod question;
pub mod timer;
pub mod violation;

pub use answer::{AnswerRecord, Selection};
pub use frame::{Frame, FrameReport, MonitorSnapshot, Region};
pub use question::{Question, QuestionError};
pub use violation::{ViolationEvent, ViolationKind, ViolationSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::NotStarted => "not_started",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        }
    }
}

/// What the presentation layer renders while a question is open.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionView {
    pub current_index: usize,
    pub total_questions: usize,
    pub seconds_remaining: u32,
    pub current_question: String,
    pub selectable_options: Vec<String>,
    pub selected: Selection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionBreakdown {
    pub question_index: usize,
    pub selected: Selection,
    pub correct_index: usize,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    pub score: usize,
    pub total: usize,
    pub percentage: f64,
    pub passed: bool,
    pub breakdown: Vec<QuestionBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultView {
    #[serde(flatten)]
    pub report: ScoreReport,
    pub violation_summary: ViolationSummary,
}

/// The only fields downstream scheduling needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardOutcome {
    pub passed: bool,
    pub score: usize,
}

impl From<&ScoreReport> for DashboardOutcome {
    fn from(report: &ScoreReport) -> Self {
        Self {
            passed: report.passed,
            score: report.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssessmentView {
    NotStarted { total_questions: usize },
    InProgress(QuestionView),
    Completed(ResultView),
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAssessmentRequest {
    #[validate(length(max = 200, message = "Too many skills"))]
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateAssessmentResponse {
    pub session_id: String,
    pub total_questions: usize,
    pub question_time_limit_seconds: u64,
    pub pass_threshold: usize,
}
