// Módulos de la aplicación
mod api;
mod app_state;
mod chat;
mod classifier;
mod config;
mod guard;
mod key_rotation;
mod knowledge;
mod llm;
mod models;
mod responses;
mod rules;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::Router;
use chrono::Utc;
use tokio::sync::oneshot;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::chat::{ChatService, ChatSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 2. Cargar configuración y tabla de reglas
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;
    let rules = rules::RuleSet::load(cfg.rules_path.as_deref()).context("Error al cargar la tabla de reglas")?;
    let classifier = Arc::new(classifier::IntentClassifier::new(rules)?);

    // 3. Base de conocimiento con refresco periódico
    let knowledge = Arc::new(knowledge::KnowledgeStore::open(&cfg.knowledge_base_path));
    knowledge.clone().spawn_refresher(cfg.knowledge_refresh_interval);

    // 4. Claves de API y cliente del LLM
    let keys = Arc::new(key_rotation::ApiKeyManager::new(
        cfg.gemini_api_keys.clone(),
        cfg.requests_per_minute,
    ));
    let llm = if keys.is_empty() {
        None
    } else {
        Some(llm::LlmManager::from_config(&cfg, keys.clone()).context("Error inicializando el cliente de Gemini")?)
    };
    let guard = if cfg.invented_info_guard {
        Some(guard::InventedInfoGuard::new()?)
    } else {
        warn!("Filtro de información inventada desactivado");
        None
    };

    let chat = ChatService::new(
        classifier,
        knowledge.clone(),
        llm,
        guard,
        ChatSettings {
            max_history_messages: cfg.max_history_messages,
            specialist_after_messages: cfg.specialist_after_messages,
        },
    );

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: Arc::new(cfg.clone()),
        chat: Arc::new(chat),
        keys,
        knowledge,
        started_at: Utc::now(),
        started: Instant::now(),
    };

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state))
        .fallback_service(ServeDir::new(&cfg.static_dir))
        .layer(CatchPanicLayer::custom(api::panic_to_apology))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Canal para la señal de apagado (Ctrl-C).
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🥑 Servidor escuchando en http://{}", cfg.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
