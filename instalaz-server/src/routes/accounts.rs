use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use libinstalaz::clock::Clock;
use libinstalaz::oauth::TokenInfo;
use libinstalaz::types::{
    AccountUpdate, ActivityEntry, NewAccount, PostHistoryEntry, RefreshType, TokenStatus,
};
use libinstalaz::Account;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Deserialize)]
struct ListQuery {
    account_id: Option<i64>,
    limit: Option<usize>,
}

impl ListQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

async fn list_accounts(State(state): State<AppState>) -> AppResult<Json<Vec<Account>>> {
    Ok(Json(state.service.database().list_accounts().await?))
}

/// Manually configured account; the token comes later via `/auth/login?account_id=`
async fn create_account(
    State(state): State<AppState>,
    Json(new): Json<NewAccount>,
) -> AppResult<(StatusCode, Json<Account>)> {
    let service = &state.service;
    let account = service
        .database()
        .create_account(&new, service.clock().timestamp())
        .await?;
    service
        .activity()
        .info(Some(account.id), "account_created", &format!("Created {}", account.name))
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_account(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<Account>> {
    Ok(Json(state.service.database().require_account(id).await?))
}

async fn update_account(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<AccountUpdate>,
) -> AppResult<Json<Account>> {
    let service = &state.service;
    let account = service
        .database()
        .update_account(id, &update, service.clock().timestamp())
        .await?;
    Ok(Json(account))
}

async fn delete_account(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<Value>> {
    if !state.service.database().delete_account(id).await? {
        return Err(AppError::NotFound(format!("account {}", id)));
    }
    Ok(Json(json!({ "deleted": id })))
}

async fn token_status(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<TokenStatus>> {
    Ok(Json(state.service.tokens().token_status(id).await?))
}

/// Ask Facebook about the stored token
async fn token_check(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<TokenInfo>> {
    Ok(Json(state.service.oauth().debug_token(id).await?))
}

async fn token_refresh(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Json<TokenStatus>> {
    state
        .service
        .oauth()
        .refresh_token(id, RefreshType::ManualRefresh)
        .await?;
    Ok(Json(state.service.tokens().token_status(id).await?))
}

async fn activity(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<ActivityEntry>>> {
    let entries = state
        .service
        .activity()
        .recent(query.account_id, query.limit())
        .await?;
    Ok(Json(entries))
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<PostHistoryEntry>>> {
    let entries = state
        .service
        .database()
        .post_history(query.account_id, query.limit())
        .await?;
    Ok(Json(entries))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/accounts", get(list_accounts).post(create_account))
        .route(
            "/api/accounts/{id}",
            get(get_account).put(update_account).delete(delete_account),
        )
        .route("/api/token/status/{id}", get(token_status))
        .route("/api/token/check/{id}", get(token_check))
        .route("/api/token/refresh/{id}", post(token_refresh))
        .route("/api/activity", get(activity))
        .route("/api/history", get(history))
}
