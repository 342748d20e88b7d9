use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use libinstalaz::schedule_settings::ScheduleSettings;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

async fn get_settings(State(state): State<AppState>) -> Json<ScheduleSettings> {
    Json(state.scheduler.settings())
}

/// Replace the schedule; accepts the named form or the legacy list of times
async fn save_settings(State(state): State<AppState>, body: String) -> AppResult<Json<ScheduleSettings>> {
    let settings = ScheduleSettings::from_json(&body)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    settings.save(state.scheduler.settings_path())?;
    info!(
        enabled = settings.enabled,
        morning = %settings.morning,
        afternoon = %settings.afternoon,
        evening = %settings.evening,
        night = %settings.night,
        "Schedule settings saved"
    );
    Ok(Json(settings))
}

/// Fire every schedule-enabled account now
async fn trigger_schedule(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        match scheduler.trigger_all().await {
            Ok(results) => {
                let failed = results.iter().filter(|r| !r.succeeded()).count();
                info!(total = results.len(), failed, "Triggered schedule finished");
            }
            Err(e) => warn!("Triggered schedule failed: {}", e),
        }
    });
    (StatusCode::ACCEPTED, Json(json!({ "status": "triggered" })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedule-settings", get(get_settings).post(save_settings))
        .route("/trigger-schedule", post(trigger_schedule))
}
