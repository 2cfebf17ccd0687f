//! Carga y gestión de configuración de la aplicación (servidor, Gemini y
//! base de conocimiento).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_NUMBERED_KEYS: usize = 10;

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub static_dir: PathBuf,

    pub gemini_api_url: String,
    pub gemini_model: String,
    pub gemini_api_keys: Vec<String>,
    pub requests_per_minute: u32,
    pub llm_timeout: Duration,

    pub knowledge_base_path: PathBuf,
    pub knowledge_refresh_interval: Duration,
    pub rules_path: Option<PathBuf>,

    pub max_history_messages: usize,
    pub specialist_after_messages: usize,
    pub invented_info_guard: bool,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server_addr = var("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());
        let static_dir = PathBuf::from(var("STATIC_DIR").unwrap_or_else(|| "public".to_string()));

        let gemini_api_url = var("GEMINI_API_URL").unwrap_or_else(|| DEFAULT_GEMINI_URL.to_string());
        let gemini_model = var("GEMINI_MODEL").unwrap_or_else(|| "gemini-1.5-flash".to_string());
        let gemini_api_keys = collect_api_keys(&var);

        let requests_per_minute: u32 = parse_or(&var, "GEMINI_REQUESTS_PER_MINUTE", 15)?;
        if requests_per_minute == 0 {
            return Err(anyhow!("GEMINI_REQUESTS_PER_MINUTE debe ser mayor que cero"));
        }
        let timeout_secs: u64 = parse_or(&var, "LLM_TIMEOUT_SECS", 10)?;
        let llm_timeout = Duration::from_secs(timeout_secs.clamp(5, 15));

        let knowledge_base_path = PathBuf::from(
            var("KNOWLEDGE_BASE_PATH").unwrap_or_else(|| "knowledge/base_conocimiento.md".to_string()),
        );
        let refresh_secs: u64 = parse_or(&var, "KNOWLEDGE_REFRESH_SECS", 30)?;
        let rules_path = var("CHATBOT_RULES_PATH").map(PathBuf::from);

        let max_history_messages = parse_or(&var, "MAX_HISTORY_MESSAGES", 10)?;
        let specialist_after_messages = parse_or(&var, "SPECIALIST_AFTER_MESSAGES", 5)?;
        let invented_info_guard = match var("INVENTED_INFO_GUARD").as_deref() {
            None => true,
            Some(v) => parse_bool(v)
                .ok_or_else(|| anyhow!("INVENTED_INFO_GUARD no es un booleano válido: {v}"))?,
        };

        Ok(Self {
            server_addr,
            static_dir,
            gemini_api_url,
            gemini_model,
            gemini_api_keys,
            requests_per_minute,
            llm_timeout,
            knowledge_base_path,
            knowledge_refresh_interval: Duration::from_secs(refresh_secs.max(1)),
            rules_path,
            max_history_messages,
            specialist_after_messages,
            invented_info_guard,
        })
    }
}

/// Une `GEMINI_API_KEYS` (separadas por comas), `GEMINI_API_KEY` y
/// `GEMINI_API_KEY_1..10`, sin duplicados y en ese orden.
fn collect_api_keys(var: &impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    if let Some(list) = var("GEMINI_API_KEYS") {
        candidates.extend(list.split(',').map(|k| k.trim().to_string()));
    }
    candidates.extend(var("GEMINI_API_KEY"));
    for i in 1..=MAX_NUMBERED_KEYS {
        candidates.extend(var(&format!("GEMINI_API_KEY_{i}")));
    }

    let mut keys: Vec<String> = Vec::new();
    for key in candidates {
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("Valor inválido para {name} ({raw}): {e}")),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "si" | "sí" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
