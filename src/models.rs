//! Modelos de dominio (intenciones, entidades, secciones de conocimiento y
//! mensajes del chat).

use serde::{Deserialize, Serialize};

/// Categoría gruesa de un mensaje del usuario.
///
/// `Question` y `Unknown` sólo aparecen como resultado; nunca se declaran en
/// la tabla de reglas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Greeting,
    Price,
    Availability,
    Delivery,
    Payment,
    Product,
    Quality,
    Contact,
    Question,
    Unknown,
}

impl Intent {
    /// Indica si la categoría puede declararse con palabras clave.
    pub fn is_scored(self) -> bool {
        !matches!(self, Self::Question | Self::Unknown)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Greeting => "GREETING",
            Self::Price => "PRICE",
            Self::Availability => "AVAILABILITY",
            Self::Delivery => "DELIVERY",
            Self::Payment => "PAYMENT",
            Self::Product => "PRODUCT",
            Self::Quality => "QUALITY",
            Self::Contact => "CONTACT",
            Self::Question => "QUESTION",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Segmento de cliente detectado en el mensaje.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Wholesale,
    Retail,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub score: u32,
}

/// Valor estructurado extraído por regex. `position` es el desplazamiento en
/// caracteres dentro del mensaje original.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub position: usize,
}

/// Resultado completo del clasificador para un mensaje.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub intent: IntentResult,
    pub query_type: QueryType,
    pub entities: Vec<Entity>,
    pub is_question: bool,
}

/// Sección `##` de la base de conocimiento.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeSection {
    pub title: String,
    pub content: String,
    pub subsections: Vec<KnowledgeSubsection>,
}

/// Subsección `###` dentro de una sección.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeSubsection {
    pub title: String,
    pub content: String,
}

/// Mensaje del historial enviado por el widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn is_user(&self) -> bool {
        self.role.eq_ignore_ascii_case("user")
    }
}
