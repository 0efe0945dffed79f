use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    models::{
        answer::{AdvanceRequest, SelectOptionRequest},
        CreateAssessmentRequest, CreateAssessmentResponse, FrameReport, Selection,
    },
    services::{assessment_session::SessionError, AppState, SessionEntry},
};

type ApiError = (StatusCode, String);

fn error_response(e: SessionError) -> ApiError {
    let status = match &e {
        SessionError::InvalidTransition(_) => StatusCode::CONFLICT,
        SessionError::InvalidOption { .. } => StatusCode::BAD_REQUEST,
        SessionError::MonitorStartFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::InvalidSetup(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::InvalidQuestion(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::Closed => StatusCode::GONE,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "assessment request failed");
    }
    (status, e.to_string())
}

pub(crate) async fn find_session(state: &AppState, id: &str) -> Result<SessionEntry, ApiError> {
    state
        .session(id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Assessment not found".to_string()))
}

pub async fn create_assessment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAssessmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    let entry = state.create_session(&req.skills).await.map_err(error_response)?;
    let settings = &state.config.assessment;

    Ok((
        StatusCode::CREATED,
        Json(CreateAssessmentResponse {
            session_id: entry.handle.id().to_string(),
            total_questions: settings.question_count,
            question_time_limit_seconds: settings.question_time_limit_secs,
            pass_threshold: settings.pass_threshold,
        }),
    ))
}

pub async fn start_assessment(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Starting assessment: {}", session_id);

    let entry = find_session(&state, &session_id).await?;
    entry.handle.start().await.map_err(error_response)?;
    let view = entry.handle.view().await.map_err(error_response)?;

    Ok((StatusCode::OK, Json(view)))
}

pub async fn select_option(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<SelectOptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    let entry = find_session(&state, &session_id).await?;
    let selection = req
        .option_index
        .map_or(Selection::Unanswered, Selection::Option);
    entry
        .handle
        .select_option(req.question_index, selection)
        .await
        .map_err(error_response)?;
    let view = entry.handle.view().await.map_err(error_response)?;

    Ok((StatusCode::OK, Json(view)))
}

pub async fn advance_question(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<AdvanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    let entry = find_session(&state, &session_id).await?;
    let advance = entry
        .handle
        .advance(req.question_index)
        .await
        .map_err(error_response)?;
    let view = entry.handle.view().await.map_err(error_response)?;

    Ok((
        StatusCode::OK,
        Json(json!({ "advance": advance, "view": view })),
    ))
}

pub async fn submit_assessment(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Submitting assessment early: {}", session_id);

    let entry = find_session(&state, &session_id).await?;
    entry.handle.submit().await.map_err(error_response)?;
    let view = entry.handle.view().await.map_err(error_response)?;

    Ok((StatusCode::OK, Json(view)))
}

pub async fn get_assessment(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = find_session(&state, &session_id).await?;
    let view = entry.handle.view().await.map_err(error_response)?;

    Ok((StatusCode::OK, Json(view)))
}

pub async fn get_outcome(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = find_session(&state, &session_id).await?;

    match entry.handle.outcome().await.map_err(error_response)? {
        Some(outcome) => Ok((StatusCode::OK, Json(outcome))),
        None => Err((
            StatusCode::CONFLICT,
            "Assessment has not been completed".to_string(),
        )),
    }
}

pub async fn push_frame(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(report): Json<FrameReport>,
) -> Result<impl IntoResponse, ApiError> {
    if let Err(e) = report.validate() {
        return Err((StatusCode::BAD_REQUEST, format!("Validation error: {}", e)));
    }

    let entry = find_session(&state, &session_id).await?;
    entry.feed.push(report);
    let snapshot = entry.handle.monitor_snapshot().await.map_err(error_response)?;

    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}
