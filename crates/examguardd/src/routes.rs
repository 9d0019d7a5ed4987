//! HTTP surface: registration, verification and admin endpoints.

use crate::config::Config;
use crate::engine::{AnomalyOverview, EngineHandle, SystemStatus};
use crate::error::{AppError, AppResult};
use crate::upload::{self, ImageUpload};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use examguard_core::{Analytics, Frame, MatchCandidate};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(index))
        .route("/register", post(register))
        .route("/verify", post(verify))
        .route("/api/verify", post(api_verify))
        .route("/admin/analytics", get(analytics))
        .route("/admin/anomalies", get(anomalies))
        .route("/system_status", get(system_status))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn index() -> Json<Value> {
    Json(json!({
        "name": "examguard",
        "version": env!("CARGO_PKG_VERSION"),
        "routes": [
            "POST /register",
            "POST /verify",
            "POST /api/verify",
            "GET /admin/analytics",
            "GET /admin/anomalies",
            "GET /system_status",
        ],
    }))
}

#[derive(Serialize)]
struct RegisterResponse {
    success: bool,
    identity_id: Uuid,
    message: String,
    quality_score: f32,
    warnings: Vec<String>,
}

async fn register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<RegisterResponse>> {
    let form = upload::read_registration(multipart).await?;
    let frame = decode(form.image).await?;

    let application_id = form.applicant.application_id.clone();
    let registered = state.engine.register(frame, form.applicant).await?.map_err(|rejection| {
        tracing::info!(%application_id, reason = %rejection, "registration rejected");
        AppError::from(rejection)
    })?;

    Ok(Json(RegisterResponse {
        success: true,
        identity_id: registered.identity_id,
        message: registered.message,
        quality_score: registered.quality_score,
        warnings: registered.warnings,
    }))
}

#[derive(Serialize)]
struct VerifyResponse {
    verified: bool,
    matches: Vec<MatchCandidate>,
    message: String,
    quality_score: f32,
    quality_feedback: String,
}

async fn verify(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<VerifyResponse>> {
    let image = upload::read_image(multipart).await?;
    let outcome = state.engine.verify(decode(image).await?).await?;

    Ok(Json(VerifyResponse {
        verified: outcome.verified,
        matches: outcome.matches,
        message: outcome.message,
        quality_score: outcome.quality.score,
        quality_feedback: outcome.quality.feedback,
    }))
}

#[derive(Serialize)]
struct ApiVerifyResponse {
    verified: bool,
    matches: Vec<MatchCandidate>,
    message: String,
    timestamp: String,
}

async fn api_verify(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<ApiVerifyResponse>> {
    let image = upload::read_image(multipart).await?;
    let outcome = state.engine.verify(decode(image).await?).await?;

    Ok(Json(ApiVerifyResponse {
        verified: outcome.verified,
        matches: outcome.matches,
        message: outcome.message,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

async fn analytics(State(state): State<AppState>) -> AppResult<Json<Analytics>> {
    Ok(Json(state.engine.analytics().await?))
}

async fn anomalies(State(state): State<AppState>) -> AppResult<Json<AnomalyOverview>> {
    Ok(Json(state.engine.anomalies().await?))
}

async fn system_status(State(state): State<AppState>) -> AppResult<Json<SystemStatus>> {
    Ok(Json(state.engine.status().await?))
}

/// Decode off the async runtime; the upload is dropped once decoded.
async fn decode(image: ImageUpload) -> AppResult<Frame> {
    let ImageUpload { file_name, bytes } = image;
    let decoded = tokio::task::spawn_blocking(move || Frame::decode(&bytes))
        .await
        .map_err(|e| AppError::Internal(format!("decode task failed: {e}")))?;

    decoded.map_err(|e| {
        tracing::debug!(%file_name, error = %e, "undecodable upload");
        AppError::BadRequest("Unable to read image".into())
    })
}
