//! Onboarding and Facebook login
//!
//! Every browser-facing endpoint here answers with a redirect; failures are
//! carried back to `/onboarding` in the `error` query parameter.

use axum::extract::{Path, Query, State};
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{Form, Router};
use libinstalaz::clock::Clock;
use libinstalaz::AccountStatus;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::AppResult;
use crate::state::AppState;

fn onboarding_error(step: Option<u32>, message: &str) -> Redirect {
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    match step {
        Some(step) => Redirect::to(&format!("/onboarding?step={}&error={}", step, encoded)),
        None => Redirect::to(&format!("/onboarding?error={}", encoded)),
    }
}

#[derive(Deserialize)]
struct AppCredentialsForm {
    #[serde(default)]
    app_id: String,
    #[serde(default)]
    app_secret: String,
}

async fn save_fb_credentials(
    State(state): State<AppState>,
    Form(form): Form<AppCredentialsForm>,
) -> Redirect {
    match state
        .service
        .oauth()
        .save_app_credentials(&form.app_id, &form.app_secret)
        .await
    {
        Ok(()) => {
            info!("Facebook App credentials saved");
            Redirect::to("/onboarding?step=3")
        }
        Err(e) => onboarding_error(Some(2), &e.to_string()),
    }
}

#[derive(Deserialize)]
struct LoginQuery {
    account_id: Option<i64>,
}

/// Send the browser to Facebook; `account_id` reconnects that account
async fn login(State(state): State<AppState>, Query(query): Query<LoginQuery>) -> Redirect {
    let service = &state.service;
    let redirect_uri = service.config().redirect_uri();
    match service.oauth().begin(query.account_id, &redirect_uri).await {
        Ok(url) => Redirect::to(&url),
        Err(e) => {
            warn!("Could not start Facebook login: {}", e);
            onboarding_error(Some(2), &e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>) -> Redirect {
    if let Some(error) = query.error {
        let message = query.error_description.unwrap_or(error);
        warn!("Facebook login declined: {}", message);
        return onboarding_error(None, &message);
    }
    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return onboarding_error(None, "Missing authorization code or state");
    };

    let service = &state.service;
    let redirect_uri = service.config().redirect_uri();
    match service
        .oauth()
        .complete(&code, &oauth_state, &redirect_uri)
        .await
    {
        Ok(connected) => {
            info!(
                accounts = connected.accounts.len(),
                reconnected = connected.reconnected,
                "Facebook login completed"
            );
            Redirect::to("/onboarding?step=5")
        }
        Err(e) => {
            warn!("Facebook login failed: {}", e);
            onboarding_error(None, &e.to_string())
        }
    }
}

async fn logout(State(state): State<AppState>, Path(id): Path<i64>) -> AppResult<Redirect> {
    let service = &state.service;
    let account = service.database().require_account(id).await?;
    service
        .database()
        .set_account_status(id, AccountStatus::Disconnected, service.clock().timestamp())
        .await?;
    service
        .activity()
        .info(Some(id), "account_disconnected", &format!("Disconnected {}", account.name))
        .await?;
    Ok(Redirect::to("/dashboard"))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/save-fb-credentials", post(save_fb_credentials))
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/logout/{id}", post(logout))
}
