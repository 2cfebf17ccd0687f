//! Cliente de la API REST de Gemini (`generateContent`) con rotación de
//! claves. La clave viaja en la cabecera `x-goog-api-key`, nunca en la URL.
//! Un 429 marca la clave como agotada y se reintenta una sola vez con la
//! siguiente disponible.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::AppConfig;
use crate::key_rotation::{mask_key, ApiKeyManager};
use crate::models::ChatMessage;

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no hay claves de API configuradas")]
    NotConfigured,
    #[error("todas las claves están en su límite; disponible en {retry_after:?}")]
    NoKeyAvailable { retry_after: Duration },
    #[error("el proveedor rechazó la petición por cuota (429)")]
    QuotaExceeded,
    #[error("tiempo de espera agotado")]
    Timeout,
    #[error("el proveedor respondió {0}")]
    Http(StatusCode),
    #[error("error de transporte: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("respuesta mal formada: {0}")]
    Malformed(String),
    #[error("URL inválida: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

// El texto de un `reqwest::Error` incluye la URL; se descarta antes de
// guardarlo para que nunca llegue a los logs.
impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err)
        }
    }
}

// --- Cuerpos de la API de Gemini ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part { text: Some(text.to_string()) }],
        }
    }
}

/// Gestor de llamadas al LLM.
#[derive(Debug, Clone)]
pub struct LlmManager {
    http: reqwest::Client,
    api_url: String,
    model: String,
    keys: Arc<ApiKeyManager>,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig, keys: Arc<ApiKeyManager>) -> Result<Self, LlmError> {
        Self::new(&cfg.gemini_api_url, &cfg.gemini_model, keys, cfg.llm_timeout)
    }

    pub fn new(
        api_url: &str,
        model: &str,
        keys: Arc<ApiKeyManager>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            model: model.trim().to_string(),
            keys,
        })
    }

    /// Genera una respuesta para `message` con el historial reciente.
    pub async fn generate(
        &self,
        system_prompt: &str,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<String, LlmError> {
        if self.keys.is_empty() {
            return Err(LlmError::NotConfigured);
        }
        let request = build_request(system_prompt, history, message);

        let mut retried = false;
        loop {
            let key = self.keys.acquire().ok_or_else(|| LlmError::NoKeyAvailable {
                retry_after: self.keys.time_until_available(),
            })?;

            match self.send(&key, &request).await {
                Err(LlmError::QuotaExceeded) => {
                    self.keys.mark_throttled(&key);
                    if retried {
                        return Err(LlmError::QuotaExceeded);
                    }
                    warn!("Cuota agotada para la clave {}; probando con otra", mask_key(&key));
                    retried = true;
                }
                other => return other,
            }
        }
    }

    async fn send(&self, key: &str, request: &GenerateRequest) -> Result<String, LlmError> {
        let url = Url::parse(&format!("{}/models/{}:generateContent", self.api_url, self.model))?;

        debug!("Llamando a Gemini ({}) con la clave {}", self.model, mask_key(key));
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::QuotaExceeded);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Gemini respondió {}: {}", status, body);
            return Err(LlmError::Http(status));
        }

        let payload: GenerateResponse = response.json().await?;
        payload
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .filter_map(|part| part.text)
            .map(|text| text.trim().to_string())
            .find(|text| !text.is_empty())
            .ok_or_else(|| LlmError::Malformed("la respuesta no contiene texto".to_string()))
    }
}

fn build_request(system_prompt: &str, history: &[ChatMessage], message: &str) -> GenerateRequest {
    let mut contents: Vec<Content> = history
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| {
            let role = if m.is_user() { "user" } else { "model" };
            Content::text(Some(role), &m.content)
        })
        .collect();
    contents.push(Content::text(Some("user"), message));

    GenerateRequest {
        system_instruction: Content::text(None, system_prompt),
        contents,
        generation_config: GenerationConfig { temperature: 0.4, max_output_tokens: 512 },
    }
}
