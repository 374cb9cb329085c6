//! Mutation and table read routes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use ferry_engine::{ApplyRequest, ApplyResponse, FetchResponse};

use crate::auth::AuthUser;
use crate::db::{self, StoredMutation};
use crate::error::{AppError, Result};
use crate::handlers::{handle_apply, handle_fetch, FetchQuery};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/mutations", post(apply_handler))
        .route("/mutations/{key}", get(ledger_handler))
        .route("/records/{table}", get(fetch_handler))
}

/// POST /mutations - Apply one queued mutation.
async fn apply_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<ApplyRequest>,
) -> Result<Json<ApplyResponse>> {
    let response = handle_apply(&state.pool, &auth, request).await?;
    Ok(Json(response))
}

/// GET /mutations/{key} - Look up a committed idempotency key.
async fn ledger_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(key): Path<String>,
) -> Result<Json<StoredMutation>> {
    let stored = db::get_applied(&state.pool, &key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("mutation {key}")))?;
    auth.authorize(&stored.user_id)?;
    Ok(Json(stored))
}

/// GET /records/{table} - Read one page of a table.
async fn fetch_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(table): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Result<Json<FetchResponse>> {
    let response = handle_fetch(&state.pool, table, query).await?;
    Ok(Json(response))
}
