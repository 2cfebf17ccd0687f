//! Filtro heurístico de información inventada en respuestas del LLM.
//!
//! Busca horarios, teléfonos, correos, direcciones y enlaces; si alguno no
//! aparece en la base de conocimiento, la respuesta se descarta. Es un filtro
//! de mejor esfuerzo: puede dar falsos positivos y negativos.

use anyhow::{Context, Result};
use regex::Regex;

use crate::classifier::normalize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Accepted,
    Rejected { kind: &'static str, fragment: String },
}

pub struct InventedInfoGuard {
    patterns: Vec<(&'static str, Regex)>,
}

const PATTERNS: &[(&str, &str)] = &[
    ("schedule", r"(?i)\b\d{1,2}:\d{2}\s*(?:am|pm|hrs|horas|h)?\b"),
    (
        "schedule",
        r"(?i)\bde\s+(?:lunes|martes|mi[eé]rcoles|jueves|viernes|s[aá]bado|domingo)\s+a\s+(?:lunes|martes|mi[eé]rcoles|jueves|viernes|s[aá]bado|domingo)\b",
    ),
    ("phone", r"\+?\(?\d{2,4}\)?[\s.-]?\d{3,4}[\s.-]?\d{4}\b"),
    ("email", r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b"),
    (
        "address",
        r"(?i)\b(?:calle|avenida|av\.|blvd\.?|boulevard|colonia|col\.|carretera)\s+[^\n,;]{1,40}?\d+",
    ),
    ("url", r"(?i)\b(?:https?://|www\.)[^\s)]+"),
];

// Puntuación de la frase que el patrón de URL arrastra al final.
const TRAILING_PUNCTUATION: &[char] = &[',', ';', ':', '!', '?', '.', '"', '\''];

impl InventedInfoGuard {
    pub fn new() -> Result<Self> {
        let patterns = PATTERNS
            .iter()
            .map(|(kind, pattern)| {
                Regex::new(pattern)
                    .map(|re| (*kind, re))
                    .with_context(|| format!("Patrón de filtro inválido: {pattern}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Acepta la respuesta sólo si todos los datos de contacto, horario o
    /// ubicación que menciona aparecen en `knowledge`.
    pub fn check(&self, reply: &str, knowledge: &str) -> GuardVerdict {
        let known = compact(knowledge);
        for (kind, regex) in &self.patterns {
            for m in regex.find_iter(reply) {
                let fragment = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
                if !known.contains(&compact(fragment)) {
                    return GuardVerdict::Rejected { kind: *kind, fragment: fragment.to_string() };
                }
            }
        }
        GuardVerdict::Accepted
    }
}

// Sin espacios ni separadores para que "443 123 4567" y "443-123-4567" coincidan.
fn compact(text: &str) -> String {
    normalize(text)
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '.' | '(' | ')'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KB: &str = "## Contacto\nHorario de lunes a viernes, 9:00 a 18:00 hrs.\n\
                      Teléfono: +52 443 123 4567\nCorreo: ventas@aguacates.mx\n\
                      Oficina en Avenida Madero 120, Morelia.\n\
                      Catálogo en www.aguacates.mx";

    fn guard() -> InventedInfoGuard {
        InventedInfoGuard::new().unwrap()
    }

    #[test]
    fn accepts_facts_present_in_knowledge() {
        let reply = "Atendemos de lunes a viernes de 9:00 a 18:00. Escríbenos a ventas@aguacates.mx \
                     o llama al 443-123-4567. Estamos en Avenida Madero 120.";
        assert_eq!(guard().check(reply, KB), GuardVerdict::Accepted);
    }

    #[test]
    fn rejects_invented_schedule() {
        let verdict = guard().check("Abrimos de lunes a sábado a las 7:30 am.", KB);
        assert!(matches!(verdict, GuardVerdict::Rejected { kind: "schedule", .. }));
    }

    #[test]
    fn rejects_invented_contact_data() {
        let g = guard();
        let cases = [
            ("Llámanos al 55 9876 5432", "phone"),
            ("Escribe a info@otro-dominio.com", "email"),
            ("Visita www.aguacates-falsos.com", "url"),
            ("Estamos en Calle Hidalgo 45", "address"),
        ];
        for (reply, expected) in cases {
            match g.check(reply, KB) {
                GuardVerdict::Rejected { kind, .. } => assert_eq!(kind, expected, "{reply}"),
                GuardVerdict::Accepted => panic!("aceptada: {reply}"),
            }
        }
    }

    #[test]
    fn known_url_followed_by_punctuation_passes() {
        let g = guard();
        for reply in [
            "Consulta www.aguacates.mx, ahí está el catálogo.",
            "Visita www.aguacates.mx; también por WhatsApp.",
            "¡Entra a www.aguacates.mx!",
        ] {
            assert_eq!(g.check(reply, KB), GuardVerdict::Accepted, "{reply}");
        }
        match g.check("Visita www.aguacates-falsos.com, ahí está.", KB) {
            GuardVerdict::Rejected { kind, fragment } => {
                assert_eq!(kind, "url");
                assert_eq!(fragment, "www.aguacates-falsos.com");
            }
            GuardVerdict::Accepted => panic!("aceptada"),
        }
    }

    #[test]
    fn plain_answers_pass() {
        let reply = "El aguacate Hass tiene piel rugosa y pulpa cremosa.";
        assert_eq!(guard().check(reply, ""), GuardVerdict::Accepted);
    }
}
