use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::{chat::ChatService, config::AppConfig, key_rotation::ApiKeyManager, knowledge::KnowledgeStore};

/// Estado compartido por los handlers; todo lo mutable vive detrás de los
/// servicios (claves y base de conocimiento).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub chat: Arc<ChatService>,
    pub keys: Arc<ApiKeyManager>,
    pub knowledge: Arc<KnowledgeStore>,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
}
