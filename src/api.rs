// Local HTTP API consumed by the rendering layer

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::auth::DEFAULT_VERIFY_ACTION;
use crate::error::ApiError;
use crate::history::timeline_view;
use crate::models::{
    ClaimRequest, Deposit, DepositRequest, HistoryEvent, HistoryQuery, SignalIntentRequest,
    TxSubmitted, TIMELINE_CAP,
};
use crate::refresh::Trigger;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/deposits", get(list_deposits).post(deposit_funds))
        .route("/api/deposits/mine", get(my_deposits))
        .route("/api/deposits/:id/withdraw", post(withdraw_remaining))
        .route("/api/history", get(history))
        .route(
            "/api/intent",
            get(intent).post(signal_intent).delete(cancel_intent),
        )
        .route("/api/intent/claim", post(claim_funds))
        .route("/api/status", get(status))
        .route("/api/refresh", post(refresh))
        .route(
            "/api/session",
            get(session).post(sign_in).delete(sign_out),
        )
        .route("/api/world-id", post(verify_personhood))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let head = state.ledger.block_number().await.ok();
    let db_health = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();

    let status = if head.is_some() && db_health {
        "healthy"
    } else {
        "unhealthy"
    };
    let model = state.refresh.model();

    Json(json!({
        "status": status,
        "ledger": if head.is_some() { "up" } else { "down" },
        "head": head,
        "database": if db_health { "up" } else { "down" },
        "lastRefreshed": model.last_refreshed,
    }))
}

async fn list_deposits(State(state): State<Arc<AppState>>) -> Json<Vec<Deposit>> {
    let model = state.refresh.model();
    Json(model.snapshot.available_deposits().into_iter().cloned().collect())
}

async fn my_deposits(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Deposit>>, ApiError> {
    let model = state.refresh.model();
    let identity = model
        .active_identity(Utc::now())
        .ok_or_else(|| ApiError::Unauthorized("sign in to see your deposits".into()))?;
    Ok(Json(
        model
            .snapshot
            .seller_deposits(identity)
            .into_iter()
            .cloned()
            .collect(),
    ))
}

async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEvent>>, ApiError> {
    let model = state.refresh.model();
    let mine = if query.mine {
        let identity = model
            .active_identity(Utc::now())
            .ok_or_else(|| ApiError::Unauthorized("sign in to filter your activity".into()))?;
        Some(identity)
    } else {
        None
    };
    let limit = query.limit.min(TIMELINE_CAP);
    Ok(Json(timeline_view(&model.history, mine, limit)))
}

async fn intent(State(state): State<Arc<AppState>>) -> Json<Value> {
    let model = state.refresh.model();
    let current = model.intent.state();
    Json(json!({
        "intent": current,
        "pendingClaim": model.intent.pending_claim(),
        "canSignalIntent": current.can_signal_intent(),
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let model = state.refresh.model();
    Json(json!({
        "identity": model.active_identity(Utc::now()),
        "txStatus": model.tx_status,
        "lastRefreshed": model.last_refreshed,
        "generation": model.generation,
        "inFlight": model.in_flight,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ViewTrigger {
    Focus,
    Visible,
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    trigger: ViewTrigger,
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> impl IntoResponse {
    let trigger = match request.trigger {
        ViewTrigger::Focus => Trigger::Focus,
        ViewTrigger::Visible => Trigger::Visible,
    };
    let accepted = state.refresh.trigger(trigger);
    (StatusCode::ACCEPTED, Json(json!({ "accepted": accepted })))
}

async fn signal_intent(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignalIntentRequest>,
) -> Result<Json<TxSubmitted>, ApiError> {
    let submitted = state
        .actions
        .signal_intent(request.deposit_id, &request.amount)
        .await?;
    Ok(Json(submitted))
}

async fn cancel_intent(State(state): State<Arc<AppState>>) -> Result<Json<TxSubmitted>, ApiError> {
    Ok(Json(state.actions.cancel_intent().await?))
}

async fn claim_funds(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<TxSubmitted>, ApiError> {
    Ok(Json(state.actions.claim_funds(&request.proof).await?))
}

async fn deposit_funds(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<TxSubmitted>, ApiError> {
    Ok(Json(state.actions.deposit_funds(&request).await?))
}

async fn withdraw_remaining(
    State(state): State<Arc<AppState>>,
    Path(deposit_id): Path<u64>,
) -> Result<Json<TxSubmitted>, ApiError> {
    Ok(Json(state.actions.withdraw_remaining(deposit_id).await?))
}

async fn session(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let session = state.auth.current().await?;
    Ok(Json(json!({
        "authenticated": session.is_some(),
        "session": session,
    })))
}

async fn sign_in(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let session = state.auth.sign_in().await?;
    Ok(Json(json!({
        "authenticated": true,
        "session": session,
    })))
}

#[derive(Debug, Deserialize)]
struct PersonhoodRequest {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    signal: String,
}

async fn verify_personhood(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PersonhoodRequest>,
) -> Result<Json<Value>, ApiError> {
    let action = request.action.as_deref().unwrap_or(DEFAULT_VERIFY_ACTION);
    let verdict = state.auth.verify_personhood(action, &request.signal).await?;
    Ok(Json(json!({
        "verified": verdict.verified,
        "detail": verdict.detail,
    })))
}

async fn sign_out(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.auth.sign_out().await?;
    info!("Session cleared via API");
    Ok(StatusCode::NO_CONTENT)
}
