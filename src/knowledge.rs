//! Base de conocimiento en markdown (`##` secciones, `###` subsecciones).
//!
//! El fichero se relee sólo cuando su fecha de modificación avanza; mientras
//! tanto se sirve una instantánea inmutable compartida.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::{normalize, tokenize};
use crate::models::{Entity, KnowledgeSection, KnowledgeSubsection};

/// Contenido cargado en un momento dado.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeSnapshot {
    pub sections: Vec<KnowledgeSection>,
    pub raw: String,
    pub modified: Option<SystemTime>,
    pub loaded_at: Option<DateTime<Utc>>,
}

impl KnowledgeSnapshot {
    fn from_markdown(raw: String, modified: Option<SystemTime>) -> Self {
        Self {
            sections: parse_markdown(&raw),
            raw,
            modified,
            loaded_at: Some(Utc::now()),
        }
    }

    /// Busca una pregunta frecuente que coincida con el mensaje: al menos dos
    /// palabras de más de tres letras en común con el título, o el valor de
    /// una entidad contenido en el título.
    pub fn find_faq_answer(&self, message: &str, entities: &[Entity]) -> Option<&str> {
        let message_words = significant_words(message);

        self.sections
            .iter()
            .filter(|s| is_faq_title(&s.title))
            .flat_map(|s| s.subsections.iter())
            .find(|faq| {
                let title = normalize(&faq.title);
                let shared = significant_words(&title).intersection(&message_words).count();
                shared >= 2
                    || entities
                        .iter()
                        .any(|e| !e.value.is_empty() && title.contains(&normalize(&e.value)))
            })
            .map(|faq| faq.content.as_str())
            .filter(|content| !content.is_empty())
    }

    pub fn subsection_count(&self) -> usize {
        self.sections.iter().map(|s| s.subsections.len()).sum()
    }
}

fn is_faq_title(title: &str) -> bool {
    let title = normalize(title);
    title.contains("preguntas frecuentes") || tokenize(&title).contains(&"faq")
}

fn significant_words(text: &str) -> HashSet<String> {
    let text = normalize(text);
    tokenize(&text)
        .into_iter()
        .filter(|w| w.chars().count() > 3)
        .map(str::to_string)
        .collect()
}

/// Convierte el markdown en secciones, en orden de aparición. El texto previo
/// al primer `##` se descarta.
pub fn parse_markdown(text: &str) -> Vec<KnowledgeSection> {
    let mut sections: Vec<KnowledgeSection> = Vec::new();

    for line in text.lines() {
        if let Some(title) = heading(line, "## ") {
            sections.push(KnowledgeSection {
                title: title.to_string(),
                content: String::new(),
                subsections: Vec::new(),
            });
        } else if let Some(title) = heading(line, "### ") {
            if let Some(section) = sections.last_mut() {
                section.subsections.push(KnowledgeSubsection {
                    title: title.to_string(),
                    content: String::new(),
                });
            }
        } else if let Some(section) = sections.last_mut() {
            let target = match section.subsections.last_mut() {
                Some(sub) => &mut sub.content,
                None => &mut section.content,
            };
            target.push_str(line);
            target.push('\n');
        }
    }

    for section in &mut sections {
        section.content = section.content.trim().to_string();
        for sub in &mut section.subsections {
            sub.content = sub.content.trim().to_string();
        }
    }
    sections
}

fn heading<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.strip_prefix(marker).map(str::trim)
}

/// Almacén con recarga por fecha de modificación.
#[derive(Debug)]
pub struct KnowledgeStore {
    path: PathBuf,
    current: RwLock<Arc<KnowledgeSnapshot>>,
}

impl KnowledgeStore {
    /// Abre el fichero. Si no existe o no se puede leer, arranca vacío y lo
    /// reintenta en cada refresco.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self {
            path: path.into(),
            current: RwLock::new(Arc::new(KnowledgeSnapshot::default())),
        };
        match store.refresh_if_changed() {
            Ok(_) => {
                let snapshot = store.snapshot();
                info!(
                    "Base de conocimiento cargada: {} secciones desde {}",
                    snapshot.sections.len(),
                    store.path.display()
                );
            }
            Err(e) => warn!("Base de conocimiento no disponible ({}): {:#}", store.path.display(), e),
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<KnowledgeSnapshot> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Relee el fichero si su fecha de modificación es posterior a la de la
    /// instantánea actual. Devuelve `true` si hubo recarga.
    pub fn refresh_if_changed(&self) -> Result<bool> {
        let metadata = std::fs::metadata(&self.path)
            .with_context(|| format!("No se pudo consultar {}", self.path.display()))?;
        let modified = metadata.modified().ok();

        let cached = self.snapshot().modified;
        let newer = match (modified, cached) {
            (Some(m), Some(c)) => m > c,
            (_, None) => true,
            (None, Some(_)) => false,
        };
        if !newer {
            return Ok(false);
        }

        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("No se pudo leer {}", self.path.display()))?;
        let snapshot = KnowledgeSnapshot::from_markdown(raw, modified);
        debug!("Base de conocimiento recargada: {} secciones", snapshot.sections.len());

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
        Ok(true)
    }

    pub fn find_faq_answer(&self, message: &str, entities: &[Entity]) -> Option<String> {
        self.snapshot().find_faq_answer(message, entities).map(str::to_string)
    }

    /// Tarea de fondo que consulta la fecha de modificación cada `every`.
    pub fn spawn_refresher(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                // La lectura del fichero es bloqueante: va al pool de bloqueo.
                let store = self.clone();
                match tokio::task::spawn_blocking(move || store.refresh_if_changed()).await {
                    Ok(Ok(true)) => info!("Base de conocimiento actualizada desde {}", self.path.display()),
                    Ok(Ok(false)) => {}
                    Ok(Err(e)) => debug!("Refresco de la base de conocimiento omitido: {:#}", e),
                    Err(e) => warn!("La tarea de refresco falló: {}", e),
                }
            }
        })
    }
}
