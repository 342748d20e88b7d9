use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use libinstalaz::notify::NotifierStatus;
use serde_json::{json, Value};

use crate::state::AppState;

async fn status(State(state): State<AppState>) -> Json<NotifierStatus> {
    Json(state.service.notifier().status())
}

async fn test(State(state): State<AppState>) -> Json<Value> {
    let notifier = state.service.notifier();
    let status = notifier.status();
    if !status.enabled {
        return Json(json!({
            "sent": false,
            "message": "Telegram is not configured. Set TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID.",
        }));
    }

    let sent = notifier
        .send("🔔 <b>Instalaz</b>\nTest notification: Telegram is connected.")
        .await;
    let message = if sent {
        "Test notification sent"
    } else {
        "Telegram rejected the test message; check the bot token and chat id"
    };
    Json(json!({ "sent": sent, "message": message }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications/status", get(status))
        .route("/notifications/test", post(test))
}
