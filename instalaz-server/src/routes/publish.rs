//! Manual publishing
//!
//! The busy lock is taken before responding, so a second click while a
//! publish runs gets 409 straight away. The publish itself runs in a spawned
//! task; its outcome lands in the account's run status and the activity log.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use libinstalaz::content::CandidatePage;
use libinstalaz::service::posting::{validate_selection, SelectedRequest, Trigger};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::AppResult;
use crate::state::AppState;

type Accepted = (StatusCode, Json<Value>);

fn accepted(account_id: i64) -> Accepted {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "started", "account_id": account_id })),
    )
}

/// Publish the next unposted content
async fn run(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Accepted> {
    let posting = state.service.posting().clone();
    let lease = posting.acquire(id).await?;

    tokio::spawn(async move {
        if let Err(e) = posting.run_next(lease, Trigger::Manual).await {
            debug!(account_id = id, "Manual run ended with error: {}", e);
        }
    });
    Ok(accepted(id))
}

/// Publish items picked from the preview
async fn publish(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<SelectedRequest>,
) -> AppResult<Accepted> {
    let account = state.service.database().require_account(id).await?;
    validate_selection(&account, &request)?;

    let posting = state.service.posting().clone();
    let lease = posting.acquire(id).await?;
    tokio::spawn(async move {
        if let Err(e) = posting.run_selected(lease, request).await {
            debug!(account_id = id, "Selective publish ended with error: {}", e);
        }
    });
    Ok(accepted(id))
}

#[derive(Deserialize)]
struct PreviewQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    #[serde(default)]
    include_used: bool,
}

async fn preview(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PreviewQuery>,
) -> AppResult<Json<CandidatePage>> {
    let service = &state.service;
    let account = service.database().require_account(id).await?;
    let page_size = query
        .page_size
        .unwrap_or_else(|| account.kind.preview_page_size());
    let page = service
        .content()
        .candidates(&account, query.page.unwrap_or(1), page_size, query.include_used)
        .await?;
    Ok(Json(page))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/run/{id}", post(run))
        .route("/publish/{id}", post(publish))
        .route("/preview/{id}", get(preview))
}
