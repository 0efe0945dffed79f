use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AssessmentSettings;
use crate::metrics::{
    ANSWERS_RECORDED_TOTAL, DEADLINE_EXPIRIES_TOTAL, SESSIONS_ACTIVE, SESSIONS_TOTAL,
};
use crate::models::{
    AnswerRecord, AssessmentView, DashboardOutcome, MonitorSnapshot, Question, QuestionError,
    QuestionView, ResultView, Selection, SessionStatus,
};
use crate::services::devices::MonitorError;
use crate::services::monitor_runner::MonitorControl;
use crate::services::scorer;
use crate::utils::clock::Clock;

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("option {option} is out of range for question {question} ({count} options)")]
    InvalidOption {
        question: usize,
        option: usize,
        count: usize,
    },

    #[error("proctoring monitor failed to start: {0}")]
    MonitorStartFailed(#[source] MonitorError),

    #[error("invalid session setup: {0}")]
    InvalidSetup(String),

    #[error(transparent)]
    InvalidQuestion(#[from] QuestionError),

    #[error("session is no longer running")]
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub question_time_limit: Duration,
    pub pass_threshold: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            question_time_limit: Duration::seconds(10),
            pass_threshold: 7,
        }
    }
}

impl From<&AssessmentSettings> for SessionSettings {
    fn from(settings: &AssessmentSettings) -> Self {
        Self {
            question_time_limit: settings.question_time_limit(),
            pass_threshold: settings.pass_threshold,
        }
    }
}

/// Result of an `advance` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Advance {
    Moved { to: usize },
    Completed,
    /// The question had already been advanced past; nothing changed.
    Stale,
}

/// One candidate's attempt: question sequencing, per-question deadlines and
/// answer capture. Owns the proctoring monitor for its whole lifetime.
pub struct AssessmentSession<M: MonitorControl> {
    id: Uuid,
    questions: Vec<Question>,
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
    monitor: M,
    status: SessionStatus,
    current_index: usize,
    deadline_at: Option<DateTime<Utc>>,
    answers: BTreeMap<usize, AnswerRecord>,
    completed_at: Option<DateTime<Utc>>,
}

impl<M: MonitorControl> AssessmentSession<M> {
    pub fn new(
        id: Uuid,
        questions: Vec<Question>,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
        monitor: M,
    ) -> Result<Self, SessionError> {
        if questions.is_empty() {
            return Err(SessionError::InvalidSetup(
                "a session needs at least one question".to_string(),
            ));
        }
        if settings.question_time_limit <= Duration::zero() {
            return Err(SessionError::InvalidSetup(
                "question time limit must be positive".to_string(),
            ));
        }
        if settings.pass_threshold > questions.len() {
            return Err(SessionError::InvalidSetup(format!(
                "pass threshold {} exceeds {} questions",
                settings.pass_threshold,
                questions.len()
            )));
        }
        for question in &questions {
            question.validate()?;
        }

        Ok(Self {
            id,
            questions,
            settings,
            clock,
            monitor,
            status: SessionStatus::NotStarted,
            current_index: 0,
            deadline_at: None,
            answers: BTreeMap::new(),
            completed_at: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn deadline_at(&self) -> Option<DateTime<Utc>> {
        self.deadline_at
    }

    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn answers(&self) -> &BTreeMap<usize, AnswerRecord> {
        &self.answers
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    pub fn monitor(&self) -> &M {
        &self.monitor
    }

    pub fn monitor_snapshot(&self) -> MonitorSnapshot {
        self.monitor.snapshot()
    }

    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::NotStarted {
            return Err(self.rejected("start", "session has already been started"));
        }

        self.monitor
            .start()
            .await
            .map_err(SessionError::MonitorStartFailed)?;

        self.current_index = 0;
        self.deadline_at = Some(self.clock.now() + self.settings.question_time_limit);
        self.status = SessionStatus::InProgress;

        SESSIONS_TOTAL.with_label_values(&["started"]).inc();
        SESSIONS_ACTIVE.inc();
        tracing::info!(
            session_id = %self.id,
            questions = self.questions.len(),
            "assessment started"
        );
        Ok(())
    }

    /// Records or replaces the selection for the open question. Does not move
    /// on; the candidate may change their mind until they advance.
    pub fn submit_answer(
        &mut self,
        question: usize,
        selection: Selection,
    ) -> Result<(), SessionError> {
        self.require_in_progress("submit_answer")?;
        if question != self.current_index {
            return Err(self.rejected(
                "submit_answer",
                &format!(
                    "question {} is not open (current is {})",
                    question, self.current_index
                ),
            ));
        }

        let current = &self.questions[self.current_index];
        if let Selection::Option(option) = selection {
            if option >= current.option_count() {
                return Err(SessionError::InvalidOption {
                    question,
                    option,
                    count: current.option_count(),
                });
            }
        }

        let record = AnswerRecord {
            question_index: question,
            selected: selection,
            correct_index: current.correct_index,
            recorded_at: self.clock.now(),
        };
        self.answers.insert(question, record);

        tracing::debug!(session_id = %self.id, question, selected = ?selection.index(), "answer recorded");
        Ok(())
    }

    /// Freezes the answer for `question` (as unanswered if nothing was
    /// selected) and opens the next one, or completes the session after the
    /// last. Repeating the request for a question already advanced past is a
    /// no-op.
    pub async fn advance(&mut self, question: usize) -> Result<Advance, SessionError> {
        match self.status {
            SessionStatus::NotStarted => {
                return Err(self.rejected("advance", "session has not started"));
            }
            SessionStatus::Completed => {
                if self.answers.contains_key(&question) {
                    return Ok(Advance::Stale);
                }
                return Err(self.rejected("advance", "session is completed"));
            }
            SessionStatus::InProgress => {}
        }

        if question < self.current_index {
            tracing::debug!(session_id = %self.id, question, "stale advance ignored");
            return Ok(Advance::Stale);
        }
        if question > self.current_index {
            return Err(self.rejected(
                "advance",
                &format!(
                    "question {} has not been reached (current is {})",
                    question, self.current_index
                ),
            ));
        }

        self.fill_unanswered();

        if self.current_index + 1 == self.questions.len() {
            self.complete().await;
            return Ok(Advance::Completed);
        }

        self.current_index += 1;
        self.deadline_at = Some(self.clock.now() + self.settings.question_time_limit);
        tracing::debug!(session_id = %self.id, question = self.current_index, "question opened");
        Ok(Advance::Moved {
            to: self.current_index,
        })
    }

    /// True once the open question's deadline has passed. Never blocks.
    pub fn check_deadline(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::InProgress
            && self.deadline_at.is_some_and(|deadline| now >= deadline)
    }

    /// Auto-submits the open question if its deadline has passed. Returns the
    /// expired index and where the session went.
    pub async fn expire_if_due(&mut self, now: DateTime<Utc>) -> Option<(usize, Advance)> {
        if !self.check_deadline(now) {
            return None;
        }
        let expired = self.current_index;
        DEADLINE_EXPIRIES_TOTAL.inc();
        tracing::info!(session_id = %self.id, question = expired, "question time expired");
        match self.advance(expired).await {
            Ok(outcome) => Some((expired, outcome)),
            Err(e) => {
                tracing::error!(session_id = %self.id, error = %e, "auto-advance failed");
                None
            }
        }
    }

    /// Ends the attempt immediately, keeping whatever was selected for the
    /// open question.
    pub async fn submit_early(&mut self) -> Result<(), SessionError> {
        self.require_in_progress("submit_early")?;
        self.fill_unanswered();
        tracing::info!(session_id = %self.id, question = self.current_index, "submitted early");
        self.complete().await;
        Ok(())
    }

    /// Stops the monitor without completing. Used when the owning actor goes
    /// away while the attempt is still open.
    pub async fn abandon(&mut self) {
        if self.status == SessionStatus::InProgress {
            SESSIONS_TOTAL.with_label_values(&["abandoned"]).inc();
            SESSIONS_ACTIVE.dec();
            tracing::warn!(session_id = %self.id, "assessment abandoned");
        }
        self.monitor.stop().await;
    }

    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> u32 {
        match (self.status, self.deadline_at) {
            (SessionStatus::InProgress, Some(deadline)) => {
                let millis = (deadline - now).num_milliseconds().max(0);
                ((millis + 999) / 1000) as u32
            }
            _ => 0,
        }
    }

    pub fn question_view(&self, now: DateTime<Utc>) -> Option<QuestionView> {
        if self.status != SessionStatus::InProgress {
            return None;
        }
        let question = &self.questions[self.current_index];
        Some(QuestionView {
            current_index: self.current_index,
            total_questions: self.questions.len(),
            seconds_remaining: self.seconds_remaining(now),
            current_question: question.text.clone(),
            selectable_options: question.options.clone(),
            selected: self
                .answers
                .get(&self.current_index)
                .map_or(Selection::Unanswered, |record| record.selected),
        })
    }

    pub fn result(&self) -> Option<ResultView> {
        if self.status != SessionStatus::Completed {
            return None;
        }
        Some(ResultView {
            report: scorer::score(&self.questions, &self.answers, self.settings.pass_threshold),
            violation_summary: self.monitor.violation_summary(),
        })
    }

    pub fn outcome(&self) -> Option<DashboardOutcome> {
        self.result().map(|result| DashboardOutcome::from(&result.report))
    }

    pub fn view(&self, now: DateTime<Utc>) -> AssessmentView {
        match self.status {
            SessionStatus::NotStarted => AssessmentView::NotStarted {
                total_questions: self.questions.len(),
            },
            SessionStatus::InProgress => match self.question_view(now) {
                Some(view) => AssessmentView::InProgress(view),
                None => AssessmentView::NotStarted {
                    total_questions: self.questions.len(),
                },
            },
            SessionStatus::Completed => match self.result() {
                Some(result) => AssessmentView::Completed(result),
                None => AssessmentView::NotStarted {
                    total_questions: self.questions.len(),
                },
            },
        }
    }

    fn fill_unanswered(&mut self) {
        let index = self.current_index;
        let correct_index = self.questions[index].correct_index;
        let now = self.clock.now();
        self.answers.entry(index).or_insert_with(|| AnswerRecord {
            question_index: index,
            selected: Selection::Unanswered,
            correct_index,
            recorded_at: now,
        });
    }

    async fn complete(&mut self) {
        self.status = SessionStatus::Completed;
        self.deadline_at = None;
        self.completed_at = Some(self.clock.now());
        self.monitor.stop().await;

        for record in self.answers.values() {
            let outcome = match record.selected {
                Selection::Unanswered => "unanswered",
                _ if record.is_correct() => "correct",
                _ => "incorrect",
            };
            ANSWERS_RECORDED_TOTAL.with_label_values(&[outcome]).inc();
        }
        SESSIONS_TOTAL.with_label_values(&["completed"]).inc();
        SESSIONS_ACTIVE.dec();

        tracing::info!(
            session_id = %self.id,
            answered = self.answers.len(),
            violations = self.monitor.violation_summary().total,
            "assessment completed"
        );
    }

    fn require_in_progress(&self, operation: &str) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::InProgress => Ok(()),
            SessionStatus::NotStarted => Err(self.rejected(operation, "session has not started")),
            SessionStatus::Completed => Err(self.rejected(operation, "session is completed")),
        }
    }

    fn rejected(&self, operation: &str, reason: &str) -> SessionError {
        tracing::warn!(session_id = %self.id, operation, reason, "transition rejected");
        SessionError::InvalidTransition(format!("{}: {}", operation, reason))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ViolationSummary;
    use crate::utils::clock::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Monitor double that counts lifecycle calls.
    #[derive(Default, Clone)]
    pub(crate) struct CountingMonitor {
        pub starts: Arc<AtomicUsize>,
        pub stops: Arc<AtomicUsize>,
        pub running: bool,
        pub fail_start: bool,
    }

    #[async_trait]
    impl MonitorControl for CountingMonitor {
        async fn start(&mut self) -> Result<(), MonitorError> {
            if self.fail_start {
                return Err(MonitorError::DeviceUnavailable("camera busy".into()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.running = true;
            Ok(())
        }

        async fn stop(&mut self) {
            if self.running {
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
            self.running = false;
        }

        fn snapshot(&self) -> MonitorSnapshot {
            MonitorSnapshot {
                running: self.running,
                ..MonitorSnapshot::default()
            }
        }

        fn violation_summary(&self) -> ViolationSummary {
            ViolationSummary::default()
        }
    }

    pub(crate) fn sample_questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                text: format!("Question {}", i + 1),
                options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                correct_index: (i * 3) % 4,
            })
            .collect()
    }

    fn session(
        monitor: CountingMonitor,
    ) -> (AssessmentSession<CountingMonitor>, ManualClock) {
        let clock = ManualClock::default();
        let session = AssessmentSession::new(
            Uuid::new_v4(),
            sample_questions(10),
            SessionSettings::default(),
            Arc::new(clock.clone()),
            monitor,
        )
        .unwrap();
        (session, clock)
    }

    #[tokio::test]
    async fn start_opens_first_question_with_deadline() {
        let monitor = CountingMonitor::default();
        let (mut session, clock) = session(monitor.clone());

        session.start().await.unwrap();

        assert_eq!(session.status(), SessionStatus::InProgress);
        assert_eq!(session.current_index(), 0);
        assert_eq!(
            session.deadline_at(),
            Some(clock.now() + Duration::seconds(10))
        );
        assert_eq!(monitor.starts.load(Ordering::SeqCst), 1);
        assert_eq!(session.question_view(clock.now()).unwrap().seconds_remaining, 10);
    }

    #[tokio::test]
    async fn failed_monitor_start_leaves_session_unstarted() {
        let (mut session, _) = session(CountingMonitor {
            fail_start: true,
            ..CountingMonitor::default()
        });

        let err = session.start().await.unwrap_err();

        assert!(matches!(err, SessionError::MonitorStartFailed(_)));
        assert_eq!(session.status(), SessionStatus::NotStarted);
        assert!(session.deadline_at().is_none());
        assert!(session.submit_answer(0, Selection::Option(0)).is_err());
    }

    #[tokio::test]
    async fn selection_can_change_until_advance() {
        let (mut session, _) = session(CountingMonitor::default());
        session.start().await.unwrap();

        session.submit_answer(0, Selection::Option(1)).unwrap();
        session.submit_answer(0, Selection::Option(2)).unwrap();
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.answers()[&0].selected, Selection::Option(2));

        assert_eq!(session.advance(0).await.unwrap(), Advance::Moved { to: 1 });
        let err = session.submit_answer(0, Selection::Option(3)).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition(_)));
        assert_eq!(session.answers()[&0].selected, Selection::Option(2));
    }

    #[tokio::test]
    async fn out_of_range_option_is_rejected_without_mutation() {
        let (mut session, _) = session(CountingMonitor::default());
        session.start().await.unwrap();

        let err = session.submit_answer(0, Selection::Option(4)).unwrap_err();

        assert_eq!(
            err,
            SessionError::InvalidOption {
                question: 0,
                option: 4,
                count: 4
            }
        );
        assert!(session.answers().is_empty());
    }

    #[tokio::test]
    async fn repeated_advance_for_same_question_is_a_no_op() {
        let (mut session, clock) = session(CountingMonitor::default());
        session.start().await.unwrap();

        clock.advance_millis(2_000);
        assert_eq!(session.advance(0).await.unwrap(), Advance::Moved { to: 1 });
        let deadline = session.deadline_at();

        assert_eq!(session.advance(0).await.unwrap(), Advance::Stale);
        assert_eq!(session.current_index(), 1);
        assert_eq!(session.deadline_at(), deadline);
        assert_eq!(session.answers().len(), 1);
    }

    #[tokio::test]
    async fn advance_without_selection_records_unanswered() {
        let (mut session, _) = session(CountingMonitor::default());
        session.start().await.unwrap();

        session.advance(0).await.unwrap();

        assert_eq!(session.answers()[&0].selected, Selection::Unanswered);
    }

    #[tokio::test]
    async fn deadline_expiry_auto_advances_once() {
        let (mut session, clock) = session(CountingMonitor::default());
        session.start().await.unwrap();

        clock.advance_millis(9_999);
        assert!(!session.check_deadline(clock.now()));
        clock.advance_millis(1);
        assert!(session.check_deadline(clock.now()));
        assert!(session.check_deadline(clock.now()));

        let expired = session.current_index();
        session.advance(expired).await.unwrap();

        assert!(!session.check_deadline(clock.now()));
        assert_eq!(session.answers()[&0].selected, Selection::Unanswered);
        // A late user advance for the expired question loses the race.
        assert_eq!(session.advance(expired).await.unwrap(), Advance::Stale);
        assert_eq!(session.current_index(), 1);
    }

    #[tokio::test]
    async fn completing_every_question_leaves_no_gaps_and_stops_monitor() {
        let monitor = CountingMonitor::default();
        let (mut session, _) = session(monitor.clone());
        session.start().await.unwrap();

        for i in 0..10 {
            if i % 2 == 0 {
                session.submit_answer(i, Selection::Option(0)).unwrap();
            }
            let expected = if i == 9 {
                Advance::Completed
            } else {
                Advance::Moved { to: i + 1 }
            };
            assert_eq!(session.advance(i).await.unwrap(), expected);
        }

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.answers().len(), 10);
        assert!(session.deadline_at().is_none());
        assert_eq!(monitor.stops.load(Ordering::SeqCst), 1);
        assert!(!session.monitor_snapshot().running);

        assert_eq!(session.advance(9).await.unwrap(), Advance::Stale);
        assert!(session.submit_answer(9, Selection::Option(0)).is_err());
        assert!(session.submit_early().await.is_err());
    }

    #[tokio::test]
    async fn seven_correct_answers_pass() {
        let (mut session, _) = session(CountingMonitor::default());
        session.start().await.unwrap();

        for i in 0..10 {
            if i < 7 {
                let correct = session.questions()[i].correct_index;
                session.submit_answer(i, Selection::Option(correct)).unwrap();
            }
            session.advance(i).await.unwrap();
        }

        let result = session.result().unwrap();
        assert_eq!(result.report.score, 7);
        assert!(result.report.passed);
        assert_eq!(
            session.outcome(),
            Some(DashboardOutcome {
                passed: true,
                score: 7
            })
        );
    }

    #[tokio::test]
    async fn expire_if_due_advances_only_past_deadline() {
        let (mut session, clock) = session(CountingMonitor::default());
        session.start().await.unwrap();
        session.submit_answer(0, Selection::Option(2)).unwrap();

        assert_eq!(session.expire_if_due(clock.now()).await, None);
        clock.advance_millis(10_000);
        assert_eq!(
            session.expire_if_due(clock.now()).await,
            Some((0, Advance::Moved { to: 1 }))
        );
        assert_eq!(session.expire_if_due(clock.now()).await, None);
        // The selection made before expiry is kept.
        assert_eq!(session.answers()[&0].selected, Selection::Option(2));
    }

    #[tokio::test]
    async fn submit_early_freezes_answers_at_current_question() {
        let monitor = CountingMonitor::default();
        let (mut session, _) = session(monitor.clone());
        session.start().await.unwrap();

        for i in 0..3 {
            session.submit_answer(i, Selection::Option(1)).unwrap();
            session.advance(i).await.unwrap();
        }
        session.submit_early().await.unwrap();

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.answers().len(), 4);
        assert_eq!(session.answers()[&3].selected, Selection::Unanswered);
        assert_eq!(monitor.stops.load(Ordering::SeqCst), 1);

        // Never-reached questions cannot be advanced after completion.
        assert!(matches!(
            session.advance(5).await,
            Err(SessionError::InvalidTransition(_))
        ));
        let result = session.result().unwrap();
        assert_eq!(result.report.breakdown.len(), 10);
    }

    #[tokio::test]
    async fn operations_before_start_are_rejected() {
        let (mut session, clock) = session(CountingMonitor::default());

        assert!(session.advance(0).await.is_err());
        assert!(session.submit_early().await.is_err());
        assert!(!session.check_deadline(clock.now()));
        assert!(session.result().is_none());
        assert!(matches!(
            session.view(clock.now()),
            AssessmentView::NotStarted { total_questions: 10 }
        ));
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (mut session, _) = session(CountingMonitor::default());
        session.start().await.unwrap();
        assert!(matches!(
            session.start().await,
            Err(SessionError::InvalidTransition(_))
        ));
    }

    #[test]
    fn setup_rejects_malformed_input() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let empty = AssessmentSession::new(
            Uuid::new_v4(),
            Vec::new(),
            SessionSettings::default(),
            clock.clone(),
            CountingMonitor::default(),
        );
        assert!(matches!(empty, Err(SessionError::InvalidSetup(_))));

        let mut bad = sample_questions(10);
        bad[3].correct_index = 9;
        let malformed = AssessmentSession::new(
            Uuid::new_v4(),
            bad,
            SessionSettings::default(),
            clock,
            CountingMonitor::default(),
        );
        assert!(matches!(malformed, Err(SessionError::InvalidQuestion(_))));
    }
}
