use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    handlers::assessments::find_session,
    models::{
        timer::{SessionCompleted, TimerEvent},
        AssessmentView,
    },
    services::AppState,
};

/// SSE endpoint for per-question timer events
/// GET /api/v1/assessments/{id}/stream
pub async fn assessment_stream(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (axum::http::StatusCode, String)> {
    tracing::info!("Client connected to SSE stream: session={}", session_id);

    let entry = find_session(&state, &session_id).await?;
    // Subscribe before reading the view so a completion in between is not lost.
    let events = entry.handle.subscribe();

    let already_completed = match entry.handle.view().await {
        Ok(AssessmentView::Completed(result)) => Some(TimerEvent::SessionCompleted(
            SessionCompleted {
                session_id: session_id.clone(),
                score: result.report.score,
                passed: result.report.passed,
                timestamp: Utc::now(),
            },
        )),
        _ => None,
    };

    let stream = match already_completed {
        Some(event) => stream::once(async move { Ok(to_sse_event(&event)) }).boxed(),
        None => create_event_stream(session_id, events).boxed(),
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &TimerEvent) -> Event {
    Event::default()
        .event(event.event_name())
        .data(event.to_sse_data())
}

/// Forwards session events until the completion event has been sent.
fn create_event_stream(
    session_id: String,
    events: broadcast::Receiver<TimerEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (session_id, events, false),
        |(sid, mut events, final_sent)| async move {
            if final_sent {
                return None;
            }

            loop {
                match events.recv().await {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        if terminal {
                            tracing::info!("Assessment completed, closing stream: session={}", sid);
                        }
                        return Some((Ok(to_sse_event(&event)), (sid, events, terminal)));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "SSE client lagging: session={}", sid);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        },
    )
}
