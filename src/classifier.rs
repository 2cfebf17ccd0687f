//! Clasificador de intenciones y entidades basado en palabras clave.
//!
//! Flujo:
//!   1. Normalización del mensaje (minúsculas, sin acentos, recortado).
//!   2. Puntuación por categoría: 2 puntos por palabra completa, 1 por subcadena.
//!   3. Se elige la puntuación estrictamente mayor; los empates conservan el
//!      orden de declaración de la tabla de reglas.
//!   4. Extracción de entidades por regex, independiente de la intención.

use anyhow::{Context, Result};
use regex::Regex;

use crate::models::{Classification, Entity, Intent, IntentResult, QueryType};
use crate::rules::{KeywordRule, RuleSet};

struct CompiledPattern {
    kind: String,
    regex: Regex,
}

pub struct IntentClassifier {
    intents: Vec<KeywordRule<Intent>>,
    query_types: Vec<KeywordRule<QueryType>>,
    question_words: Vec<String>,
    patterns: Vec<CompiledPattern>,
}

impl IntentClassifier {
    /// Compila los patrones de la tabla. Un patrón inválido es un error de
    /// arranque, no de petición.
    pub fn new(rules: RuleSet) -> Result<Self> {
        let patterns = rules
            .entity_patterns
            .iter()
            .map(|p| {
                Regex::new(&p.pattern)
                    .map(|regex| CompiledPattern { kind: p.kind.clone(), regex })
                    .with_context(|| format!("Patrón de entidad inválido ({}): {}", p.kind, p.pattern))
            })
            .collect::<Result<Vec<_>>>()?;

        let normalize_all =
            |words: Vec<String>| -> Vec<String> { words.iter().map(|w| normalize(w)).collect() };

        Ok(Self {
            intents: rules
                .intents
                .into_iter()
                .map(|r| KeywordRule { category: r.category, keywords: normalize_all(r.keywords) })
                .collect(),
            query_types: rules
                .query_types
                .into_iter()
                .map(|r| KeywordRule { category: r.category, keywords: normalize_all(r.keywords) })
                .collect(),
            question_words: normalize_all(rules.question_words),
            patterns,
        })
    }

    pub fn classify(&self, message: &str) -> Classification {
        let text = NormalizedText::new(message);
        Classification {
            intent: self.intent_of(&text),
            query_type: self.query_type_of(&text),
            entities: self.entities_of(&text),
            is_question: self.question_in(&text),
        }
    }

    pub fn detect_intent(&self, message: &str) -> IntentResult {
        self.intent_of(&NormalizedText::new(message))
    }

    pub fn detect_query_type(&self, message: &str) -> QueryType {
        self.query_type_of(&NormalizedText::new(message))
    }

    pub fn extract_entities(&self, message: &str) -> Vec<Entity> {
        self.entities_of(&NormalizedText::new(message))
    }

    pub fn is_question(&self, message: &str) -> bool {
        self.question_in(&NormalizedText::new(message))
    }

    fn intent_of(&self, text: &NormalizedText) -> IntentResult {
        match best_category(&self.intents, text) {
            Some((intent, score)) => IntentResult { intent, score },
            None if self.question_in(text) => IntentResult { intent: Intent::Question, score: 0 },
            None => IntentResult { intent: Intent::Unknown, score: 0 },
        }
    }

    fn query_type_of(&self, text: &NormalizedText) -> QueryType {
        best_category(&self.query_types, text)
            .map(|(kind, _)| kind)
            .unwrap_or(QueryType::Unknown)
    }

    fn question_in(&self, text: &NormalizedText) -> bool {
        if text.raw.contains('?') || text.raw.contains('¿') {
            return true;
        }
        self.question_words
            .iter()
            .any(|word| text.padded.starts_with(&format!(" {word} ")))
    }

    fn entities_of(&self, text: &NormalizedText) -> Vec<Entity> {
        let mut found: Vec<(usize, usize, Entity)> = Vec::new();
        for (order, pattern) in self.patterns.iter().enumerate() {
            for m in pattern.regex.find_iter(&text.raw) {
                let position = text.lead + text.raw[..m.start()].chars().count();
                found.push((
                    position,
                    order,
                    Entity { kind: pattern.kind.clone(), value: m.as_str().to_string(), position },
                ));
            }
        }
        found.sort_by_key(|(position, order, _)| (*position, *order));
        found.into_iter().map(|(_, _, entity)| entity).collect()
    }
}

/// Mensaje normalizado con su versión tokenizada (` tok1 tok2 `) para buscar
/// palabras completas y frases.
struct NormalizedText {
    raw: String,
    padded: String,
    /// Caracteres de espacio recortados al inicio del mensaje original.
    lead: usize,
}

impl NormalizedText {
    fn new(message: &str) -> Self {
        let raw = normalize(message);
        let padded = format!(" {} ", tokenize(&raw).join(" "));
        let lead = message.chars().take_while(|c| c.is_whitespace()).count();
        Self { raw, padded, lead }
    }

    fn keyword_score(&self, keyword: &str) -> u32 {
        if keyword.is_empty() {
            0
        } else if self.padded.contains(&format!(" {keyword} ")) {
            2
        } else if self.raw.contains(keyword) {
            1
        } else {
            0
        }
    }
}

fn best_category<C: Copy>(rules: &[KeywordRule<C>], text: &NormalizedText) -> Option<(C, u32)> {
    let mut best: Option<(C, u32)> = None;
    for rule in rules {
        let score: u32 = rule.keywords.iter().map(|k| text.keyword_score(k)).sum();
        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((rule.category, score));
        }
    }
    best
}

/// Minúsculas, recorte y plegado de vocales acentuadas.
pub fn normalize(text: &str) -> String {
    text.trim().chars().map(fold_char).collect()
}

// Siempre un carácter por carácter: si la minúscula se expande (p. ej. 'İ')
// se queda con el primero, así los desplazamientos no se mueven.
fn fold_char(c: char) -> char {
    match c.to_lowercase().next().unwrap_or(c) {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        other => other,
    }
}

/// Divide un texto ya normalizado en palabras alfanuméricas.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}
