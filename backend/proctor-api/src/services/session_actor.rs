use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::Config;

use crate::models::timer::{QuestionExpired, QuestionTick, SessionCompleted, TimerEvent};
use crate::models::{AssessmentView, DashboardOutcome, MonitorSnapshot, Selection, SessionStatus};
use crate::services::assessment_session::{Advance, AssessmentSession, SessionError};
use crate::services::monitor_runner::MonitorControl;
use crate::utils::clock::Clock;

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

/// Timing of an actor's own task, independent of the question deadlines.
#[derive(Debug, Clone, Copy)]
pub struct ActorTimings {
    pub tick_interval: Duration,
    /// An attempt never started within this window is abandoned.
    pub unstarted_timeout: Duration,
    /// A completed attempt keeps answering reads for this long.
    pub completed_ttl: Duration,
}

impl From<&Config> for ActorTimings {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.clock.tick_interval(),
            unstarted_timeout: config.retention.unstarted_timeout(),
            completed_ttl: config.retention.completed_ttl(),
        }
    }
}

enum SessionCommand {
    Start(Reply<Result<(), SessionError>>),
    SelectOption {
        question: usize,
        selection: Selection,
        reply: Reply<Result<(), SessionError>>,
    },
    Advance {
        question: usize,
        reply: Reply<Result<Advance, SessionError>>,
    },
    Submit(Reply<Result<(), SessionError>>),
    View(Reply<AssessmentView>),
    Outcome(Reply<Option<DashboardOutcome>>),
    Monitor(Reply<MonitorSnapshot>),
}

/// Cloneable front for a session running on its own task. User commands and
/// clock expiries are applied one at a time, in arrival order.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<TimerEvent>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Start).await?
    }

    pub async fn select_option(
        &self,
        question: usize,
        selection: Selection,
    ) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SelectOption {
            question,
            selection,
            reply,
        })
        .await?
    }

    pub async fn advance(&self, question: usize) -> Result<Advance, SessionError> {
        self.request(|reply| SessionCommand::Advance { question, reply })
            .await?
    }

    pub async fn submit(&self) -> Result<(), SessionError> {
        self.request(SessionCommand::Submit).await?
    }

    pub async fn view(&self) -> Result<AssessmentView, SessionError> {
        self.request(SessionCommand::View).await
    }

    pub async fn outcome(&self) -> Result<Option<DashboardOutcome>, SessionError> {
        self.request(SessionCommand::Outcome).await
    }

    pub async fn monitor_snapshot(&self) -> Result<MonitorSnapshot, SessionError> {
        self.request(SessionCommand::Monitor).await
    }

    /// True once the actor has stopped and no longer accepts commands.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }
}

pub struct SessionActor<M: MonitorControl> {
    session: AssessmentSession<M>,
    clock: Arc<dyn Clock>,
    timings: ActorTimings,
    commands: mpsc::Receiver<SessionCommand>,
    events: broadcast::Sender<TimerEvent>,
    completion_announced: bool,
}

impl<M: MonitorControl + 'static> SessionActor<M> {
    /// Moves the session onto a new task and returns its handle. The task
    /// ends, stopping the monitor, once every handle has been dropped, the
    /// attempt sat unstarted for `unstarted_timeout`, or `completed_ttl` has
    /// passed since completion.
    pub fn spawn(
        session: AssessmentSession<M>,
        clock: Arc<dyn Clock>,
        timings: ActorTimings,
    ) -> SessionHandle {
        let id = session.id();
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let actor = SessionActor {
            session,
            clock,
            timings,
            commands,
            events: events.clone(),
            completion_announced: false,
        };
        tokio::spawn(actor.run());

        SessionHandle {
            id,
            commands: command_tx,
            events,
        }
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.timings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let retire = tokio::time::sleep(self.timings.unstarted_timeout);
        tokio::pin!(retire);
        let mut retire_armed = true;
        tracing::debug!(session_id = %self.session.id(), "session actor running");

        loop {
            // Only an attempt in progress has a deadline to watch.
            let ticking = self.session.status() == SessionStatus::InProgress;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = ticker.tick(), if ticking => self.on_tick().await,
                () = &mut retire, if retire_armed => {
                    tracing::info!(
                        session_id = %self.session.id(),
                        status = ?self.session.status(),
                        "session actor retired"
                    );
                    break;
                }
            }

            if self.session.status() == SessionStatus::InProgress {
                retire_armed = false;
            }
            if self.announce_completion() {
                retire
                    .as_mut()
                    .reset(Instant::now() + self.timings.completed_ttl);
                retire_armed = true;
            }
        }

        self.commands.close();
        self.session.abandon().await;
        tracing::debug!(session_id = %self.session.id(), "session actor stopped");
    }

    async fn handle(&mut self, command: SessionCommand) {
        // A dropped reply receiver only means the caller went away.
        match command {
            SessionCommand::Start(reply) => {
                let _ = reply.send(self.session.start().await);
            }
            SessionCommand::SelectOption {
                question,
                selection,
                reply,
            } => {
                let _ = reply.send(self.session.submit_answer(question, selection));
            }
            SessionCommand::Advance { question, reply } => {
                let _ = reply.send(self.session.advance(question).await);
            }
            SessionCommand::Submit(reply) => {
                let _ = reply.send(self.session.submit_early().await);
            }
            SessionCommand::View(reply) => {
                let _ = reply.send(self.session.view(self.clock.now()));
            }
            SessionCommand::Outcome(reply) => {
                let _ = reply.send(self.session.outcome());
            }
            SessionCommand::Monitor(reply) => {
                let _ = reply.send(self.session.monitor_snapshot());
            }
        }
    }

    async fn on_tick(&mut self) {
        if self.session.status() != SessionStatus::InProgress {
            return;
        }
        let now = self.clock.now();
        let session_id = self.session.id().to_string();

        if let Some((expired, _)) = self.session.expire_if_due(now).await {
            self.publish(TimerEvent::QuestionExpired(QuestionExpired {
                session_id,
                question_index: expired,
                timestamp: Utc::now(),
            }));
            return;
        }

        self.publish(TimerEvent::QuestionTick(QuestionTick {
            session_id,
            question_index: self.session.current_index(),
            remaining_seconds: self.session.seconds_remaining(now),
            timestamp: Utc::now(),
        }));
    }

    /// Publishes `SessionCompleted` the first time the session is seen
    /// completed. Returns whether it did.
    fn announce_completion(&mut self) -> bool {
        if self.completion_announced || self.session.status() != SessionStatus::Completed {
            return false;
        }
        self.completion_announced = true;
        if let Some(outcome) = self.session.outcome() {
            self.publish(TimerEvent::SessionCompleted(SessionCompleted {
                session_id: self.session.id().to_string(),
                score: outcome.score,
                passed: outcome.passed,
                timestamp: Utc::now(),
            }));
        }
        true
    }

    fn publish(&self, event: TimerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
