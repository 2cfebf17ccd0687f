//! Tabla de reglas compartida (palabras clave por categoría y patrones de
//! entidades). Se embebe en el binario y puede sustituirse por un fichero
//! externo con `CHATBOT_RULES_PATH`.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::models::{Intent, QueryType};

const EMBEDDED_RULES: &str = include_str!("../rules/chatbot_rules.json");

/// Palabras clave asociadas a una categoría. El orden de declaración en la
/// tabla decide los empates.
#[derive(Debug, Clone, Deserialize)]
pub struct KeywordRule<C> {
    pub category: C,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityPattern {
    #[serde(rename = "type")]
    pub kind: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleSet {
    pub intents: Vec<KeywordRule<Intent>>,
    pub query_types: Vec<KeywordRule<QueryType>>,
    pub question_words: Vec<String>,
    pub entity_patterns: Vec<EntityPattern>,
}

impl RuleSet {
    /// Tabla embebida en el binario.
    pub fn embedded() -> Result<Self> {
        Self::from_json(EMBEDDED_RULES).context("La tabla de reglas embebida no es válida")
    }

    /// Carga la tabla desde `path` si se indica; si no, usa la embebida.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("No se pudo leer {}", path.display()))?;
                let rules = Self::from_json(&raw)
                    .with_context(|| format!("Tabla de reglas inválida en {}", path.display()))?;
                info!("Tabla de reglas cargada desde {}", path.display());
                Ok(rules)
            }
            None => Self::embedded(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let rules: RuleSet = serde_json::from_str(raw)?;
        rules.validate()?;
        Ok(rules)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.intents {
            if !rule.category.is_scored() {
                return Err(anyhow!(
                    "La categoría {} no puede declararse con palabras clave",
                    rule.category
                ));
            }
            if !seen.insert(rule.category) {
                return Err(anyhow!("Categoría duplicada: {}", rule.category));
            }
            check_keywords(&rule.keywords, &rule.category.to_string())?;
        }

        let mut seen = HashSet::new();
        for rule in &self.query_types {
            if rule.category == QueryType::Unknown {
                return Err(anyhow!("El tipo de consulta 'unknown' no admite palabras clave"));
            }
            if !seen.insert(rule.category) {
                return Err(anyhow!("Tipo de consulta duplicado: {:?}", rule.category));
            }
            check_keywords(&rule.keywords, &format!("{:?}", rule.category))?;
        }
        Ok(())
    }
}

fn check_keywords(keywords: &[String], owner: &str) -> Result<()> {
    if keywords.is_empty() {
        return Err(anyhow!("La categoría {owner} no tiene palabras clave"));
    }
    if let Some(bad) = keywords.iter().find(|k| k.trim().is_empty()) {
        return Err(anyhow!("Palabra clave vacía en {owner}: {bad:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_table_keeps_declaration_order() {
        let rules = RuleSet::embedded().unwrap();
        let order: Vec<Intent> = rules.intents.iter().map(|r| r.category).collect();
        assert_eq!(
            order,
            vec![
                Intent::Greeting,
                Intent::Price,
                Intent::Availability,
                Intent::Delivery,
                Intent::Payment,
                Intent::Product,
                Intent::Quality,
                Intent::Contact,
            ]
        );
        assert_eq!(rules.query_types[0].category, QueryType::Wholesale);
        assert_eq!(rules.entity_patterns.len(), 4);
    }

    #[test]
    fn rejects_result_only_categories() {
        let raw = r#"{
            "intents": [{"category": "unknown", "keywords": ["x"]}],
            "query_types": [],
            "question_words": [],
            "entity_patterns": []
        }"#;
        assert!(RuleSet::from_json(raw).is_err());
    }

    #[test]
    fn rejects_duplicated_categories() {
        let raw = r#"{
            "intents": [
                {"category": "price", "keywords": ["precio"]},
                {"category": "price", "keywords": ["costo"]}
            ],
            "query_types": [],
            "question_words": [],
            "entity_patterns": []
        }"#;
        assert!(RuleSet::from_json(raw).is_err());
    }

    #[test]
    fn loads_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, EMBEDDED_RULES.as_bytes()).unwrap();
        let rules = RuleSet::load(Some(file.path())).unwrap();
        assert_eq!(rules.intents.len(), 8);
    }
}
