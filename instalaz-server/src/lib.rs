//! Instalaz dashboard server
//!
//! JSON and redirect endpoints over [`libinstalaz`]: onboarding and OAuth,
//! account management, manual and selective publishing, schedule settings
//! and notification checks.

pub mod error;
pub mod routes;
pub mod state;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::dashboard::router())
        .merge(routes::auth::router())
        .merge(routes::accounts::router())
        .merge(routes::publish::router())
        .merge(routes::schedule::router())
        .merge(routes::notifications::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
