use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect};
use axum::routing::get;
use axum::{Json, Router};
use libinstalaz::clock::Clock;
use libinstalaz::notify::NotifierStatus;
use libinstalaz::schedule_settings::ScheduleSettings;
use libinstalaz::token_store::token_status_at;
use libinstalaz::types::{RunStatus, TokenStatus};
use libinstalaz::{Account, AccountStatus};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Serialize)]
struct DashboardAccount {
    #[serde(flatten)]
    account: Account,
    token: TokenStatus,
}

#[derive(Serialize)]
struct Dashboard {
    accounts: Vec<DashboardAccount>,
    schedule: ScheduleSettings,
    notifications: NotifierStatus,
    /// Ids of active accounts whose token is close to expiry
    expiring: Vec<i64>,
}

/// Accounts with run and token status
async fn dashboard(State(state): State<AppState>) -> AppResult<Json<Dashboard>> {
    let service = &state.service;
    let now = service.clock().timestamp();
    let warning_days = service.config().tokens.expiry_warning_days;

    let expiring = service
        .tokens()
        .expiring_accounts(warning_days)
        .await?
        .into_iter()
        .map(|a| a.id)
        .collect();
    let accounts = service
        .database()
        .list_accounts()
        .await?
        .into_iter()
        .map(|account| DashboardAccount {
            token: token_status_at(account.token_expires_at.filter(|_| account.has_token), now),
            account,
        })
        .collect();

    Ok(Json(Dashboard {
        accounts,
        schedule: state.scheduler.settings(),
        notifications: service.notifier().status(),
        expiring,
    }))
}

#[derive(Deserialize)]
struct OnboardingQuery {
    step: Option<u32>,
    error: Option<String>,
}

#[derive(Serialize)]
struct Onboarding {
    step: Option<u32>,
    error: Option<String>,
    app_configured: bool,
    accounts_connected: usize,
    /// `configure_app`, `connect_instagram` or `done`
    next_step: &'static str,
    redirect_uri: String,
}

async fn onboarding(
    State(state): State<AppState>,
    Query(query): Query<OnboardingQuery>,
) -> AppResult<Json<Onboarding>> {
    let service = &state.service;
    let app_configured = service.oauth().is_app_configured().await?;
    let accounts_connected = service
        .database()
        .list_accounts()
        .await?
        .iter()
        .filter(|a| a.ig_user_id.is_some() && a.has_token)
        .count();

    let next_step = if !app_configured {
        "configure_app"
    } else if accounts_connected == 0 {
        "connect_instagram"
    } else {
        "done"
    };

    Ok(Json(Onboarding {
        step: query.step,
        error: query.error,
        app_configured,
        accounts_connected,
        next_step,
        redirect_uri: service.config().redirect_uri(),
    }))
}

#[derive(Serialize)]
struct AccountRun {
    id: i64,
    name: String,
    status: AccountStatus,
    busy: bool,
    last_run: RunStatus,
}

async fn status(State(state): State<AppState>) -> AppResult<Json<Vec<AccountRun>>> {
    let runs = state
        .service
        .database()
        .list_accounts()
        .await?
        .into_iter()
        .map(|a| AccountRun {
            id: a.id,
            name: a.name,
            status: a.status,
            busy: a.busy_since.is_some(),
            last_run: a.last_run,
        })
        .collect();
    Ok(Json(runs))
}

async fn keep_alive() -> &'static str {
    "Alive"
}

async fn index() -> impl IntoResponse {
    Redirect::to("/dashboard")
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/dashboard", get(dashboard))
        .route("/onboarding", get(onboarding))
        .route("/status", get(status))
        .route("/keep-alive", get(keep_alive))
}
