use std::any::Any;

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::{app_state::AppState, key_rotation::mask_key, models::ChatMessage, responses};

// --- Payloads y Respuestas de la API ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    message: Option<String>,
    #[serde(default)]
    chat_history: Option<Vec<ChatMessage>>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    response: String,
}

impl ChatResponse {
    fn new(text: impl Into<String>) -> Json<Self> {
        Json(Self { response: text.into() })
    }
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/info", get(info_handler))
        .route("/api/health", get(health_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> (StatusCode, Json<ChatResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Petición de chat inválida: {}", rejection);
            return (StatusCode::BAD_REQUEST, ChatResponse::new(responses::MISSING_MESSAGE));
        }
    };

    let message = match request.message.as_deref().map(str::trim) {
        Some(message) if !message.is_empty() => message.to_string(),
        _ => return (StatusCode::BAD_REQUEST, ChatResponse::new(responses::MISSING_MESSAGE)),
    };
    let history = request.chat_history.unwrap_or_default();

    let reply = state.chat.respond(&message, &history).await;
    (StatusCode::OK, ChatResponse::new(reply))
}

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}

#[axum::debug_handler]
async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let knowledge = state.knowledge.snapshot();
    let keys = state.keys.snapshot();
    let available = keys
        .iter()
        .filter(|k| k.requests_in_window < state.keys.limit())
        .count();
    let llm_enabled = !keys.is_empty();
    let section_titles: Vec<&str> = knowledge.sections.iter().map(|s| s.title.as_str()).collect();

    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at.to_rfc3339(),
        "model": state.config.gemini_model,
        "llm_enabled": llm_enabled,
        "api_keys": {
            "total": keys.len(),
            "available": available,
            "requests_per_minute": state.keys.limit(),
            "seconds_until_available": state.keys.time_until_available().as_secs(),
            "next_key": state.keys.peek_available_key().map(|k| mask_key(&k)),
            "keys": keys,
        },
        "knowledge_base": {
            "path": state.knowledge.path().display().to_string(),
            "sections": section_titles,
            "faq_entries": knowledge.subsection_count(),
            "loaded_at": knowledge.loaded_at.map(|t| t.to_rfc3339()),
        },
        "chat": {
            "max_history_messages": state.config.max_history_messages,
            "specialist_after_messages": state.config.specialist_after_messages,
            "invented_info_guard": state.config.invented_info_guard,
        },
    }))
}

/// Un pánico en un handler se convierte en una disculpa con estado 200 para
/// que el widget siga respondiendo.
pub fn panic_to_apology(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "desconocido".to_string());
    error!("Pánico atendiendo una petición: {}", detail);
    (StatusCode::OK, ChatResponse::new(responses::GENERIC_APOLOGY)).into_response()
}
