use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::Config;
use crate::metrics::SESSIONS_EVICTED_TOTAL;
use crate::models::QuestionError;
use crate::services::assessment_session::{AssessmentSession, SessionError, SessionSettings};
use crate::services::devices::{RegionCountDetector, RemoteFeed};
use crate::services::ledger::ViolationLedger;
use crate::services::monitor_runner::MonitorHandle;
use crate::services::presence_monitor::{PresenceMonitor, PresencePolicy};
use crate::services::question_bank::{QuestionBank, StaticQuestionBank};
use crate::services::session_actor::{ActorTimings, SessionActor, SessionHandle};
use crate::utils::clock::{Clock, SystemClock};

pub mod assessment_session;
pub mod devices;
pub mod ledger;
pub mod monitor_runner;
pub mod presence_monitor;
pub mod question_bank;
pub mod scorer;
pub mod session_actor;

/// A running attempt and the feed its monitor reads from.
#[derive(Clone, Debug)]
pub struct SessionEntry {
    pub handle: SessionHandle,
    pub feed: RemoteFeed,
}

pub struct AppState {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub question_bank: Arc<dyn QuestionBank>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, QuestionError> {
        let bank = match &config.question_bank.path {
            Some(path) => {
                tracing::info!(path = %path, "loading question bank from file");
                StaticQuestionBank::from_path(path)?
            }
            None => StaticQuestionBank::embedded()?,
        };
        Ok(Self::with_parts(
            config,
            Arc::new(SystemClock),
            Arc::new(bank),
        ))
    }

    pub fn with_parts(
        config: Config,
        clock: Arc<dyn Clock>,
        question_bank: Arc<dyn QuestionBank>,
    ) -> Self {
        Self {
            config,
            clock,
            question_bank,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a fresh attempt with its own monitor and actor. Every call gets
    /// a new id, so a retake never sees an earlier attempt's state.
    pub async fn create_session(&self, skills: &[String]) -> Result<SessionEntry, SessionError> {
        let questions = self
            .question_bank
            .generate(skills, self.config.assessment.question_count)?;

        let id = Uuid::new_v4();
        let monitor_settings = &self.config.monitor;
        let feed = RemoteFeed::new(self.clock.clone(), monitor_settings.stall_timeout());
        let ledger = ViolationLedger::with_capacity_limit(
            self.clock.clone(),
            monitor_settings.ledger_capacity,
        );
        let presence = PresenceMonitor::new(
            Arc::new(feed.clone()),
            Arc::new(RegionCountDetector::new(monitor_settings.min_subject_size_px)),
            self.clock.clone(),
            ledger,
            PresencePolicy::from(monitor_settings),
        )
        .with_microphone(Arc::new(feed.clone()));
        let monitor = MonitorHandle::new(
            presence,
            monitor_settings.poll_interval(),
            monitor_settings.stall_timeout() + monitor_settings.poll_interval(),
        );

        let session = AssessmentSession::new(
            id,
            questions,
            SessionSettings::from(&self.config.assessment),
            self.clock.clone(),
            monitor,
        )?;
        let handle = SessionActor::spawn(
            session,
            self.clock.clone(),
            ActorTimings::from(&self.config),
        );

        let entry = SessionEntry { handle, feed };
        self.sessions
            .write()
            .await
            .insert(id.to_string(), entry.clone());

        tracing::info!(session_id = %id, skills = skills.len(), "assessment created");
        Ok(entry)
    }

    pub async fn session(&self, id: &str) -> Option<SessionEntry> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drops every attempt whose actor has retired. Returns how many went.
    pub async fn evict_retired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.handle.is_closed());
        let evicted = before - sessions.len();

        if evicted > 0 {
            SESSIONS_EVICTED_TOTAL.inc_by(evicted as u64);
            tracing::info!(evicted, remaining = sessions.len(), "retired assessments evicted");
        }
        evicted
    }

    /// Background loop that periodically evicts retired attempts.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::clone(self);
        let interval = state.config.retention.sweep_interval();
        tracing::info!(
            "Starting session sweeper loop (interval {}s)",
            interval.as_secs()
        );

        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                state.evict_retired().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;
    use std::time::Duration;

    fn state() -> Arc<AppState> {
        let mut config = Config::default();
        config.retention.completed_ttl_secs = 30;
        config.retention.unstarted_timeout_secs = 60;
        config.retention.sweep_interval_secs = 5;
        Arc::new(AppState::with_parts(
            config,
            Arc::new(ManualClock::default()),
            Arc::new(StaticQuestionBank::embedded().unwrap()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn completed_attempt_is_evicted_after_ttl() {
        let state = state();
        let entry = state.create_session(&["rust".to_string()]).await.unwrap();
        let id = entry.handle.id().to_string();

        entry.handle.start().await.unwrap();
        assert!(entry.feed.is_claimed());
        entry.handle.submit().await.unwrap();
        assert!(!entry.feed.is_claimed());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(state.evict_retired().await, 0);
        assert!(state.session(&id).await.is_some());

        tokio::time::advance(Duration::from_secs(25)).await;
        while !entry.handle.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.evict_retired().await, 1);
        assert_eq!(state.session_count().await, 0);
        assert!(state.session(&id).await.is_none());
        assert!(!entry.feed.is_claimed());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_attempt_never_started() {
        let state = state();
        let idle = state.create_session(&[]).await.unwrap();
        let active = state.create_session(&[]).await.unwrap();
        active.handle.start().await.unwrap();
        let sweeper = state.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(70)).await;

        assert!(idle.handle.is_closed());
        assert_eq!(state.session_count().await, 1);
        assert!(state.session(&active.handle.id().to_string()).await.is_some());
        assert!(active.feed.is_claimed());
        sweeper.abort();
    }
}
