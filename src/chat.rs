//! Resolución de respuestas del chat.
//!
//! Orden de decisión:
//!   1. Primer mensaje o saludo: bienvenida fija.
//!   2. Pregunta frecuente de la base de conocimiento.
//!   3. LLM con el historial reciente y el filtro de información inventada.
//!   4. Cualquier fallo del LLM: texto local según intención y segmento.
//!   5. A partir del sexto mensaje del usuario se sugiere hablar con un
//!      especialista.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classifier::IntentClassifier;
use crate::guard::{GuardVerdict, InventedInfoGuard};
use crate::knowledge::KnowledgeStore;
use crate::llm::LlmManager;
use crate::models::{ChatMessage, Classification, Intent};
use crate::responses;

#[derive(Debug, Clone, Copy)]
pub struct ChatSettings {
    pub max_history_messages: usize,
    pub specialist_after_messages: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self { max_history_messages: 10, specialist_after_messages: 5 }
    }
}

pub struct ChatService {
    classifier: Arc<IntentClassifier>,
    knowledge: Arc<KnowledgeStore>,
    llm: Option<LlmManager>,
    guard: Option<InventedInfoGuard>,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        classifier: Arc<IntentClassifier>,
        knowledge: Arc<KnowledgeStore>,
        llm: Option<LlmManager>,
        guard: Option<InventedInfoGuard>,
        settings: ChatSettings,
    ) -> Self {
        Self { classifier, knowledge, llm, guard, settings }
    }

    /// Devuelve siempre un texto para el usuario; ningún fallo se propaga.
    pub async fn respond(&self, message: &str, history: &[ChatMessage]) -> String {
        let user_turns = history.iter().filter(|m| m.is_user()).count() + 1;
        let classification = self.classifier.classify(message);
        debug!(
            intent = %classification.intent.intent,
            score = classification.intent.score,
            query_type = ?classification.query_type,
            entities = classification.entities.len(),
            "Mensaje clasificado"
        );

        if user_turns <= 1 || classification.intent.intent == Intent::Greeting {
            return responses::WELCOME.to_string();
        }

        let reply = match self.knowledge.find_faq_answer(message, &classification.entities) {
            Some(answer) => {
                info!("Respuesta tomada de las preguntas frecuentes");
                answer
            }
            None => self.ask_llm(message, history, &classification).await,
        };

        if user_turns > self.settings.specialist_after_messages && reply != responses::SPECIALIST_CONTACT {
            format!("{reply}{}", responses::SPECIALIST_SUFFIX)
        } else {
            reply
        }
    }

    async fn ask_llm(&self, message: &str, history: &[ChatMessage], classification: &Classification) -> String {
        let fallback = || responses::fallback_for(classification).to_string();

        let Some(llm) = &self.llm else {
            return fallback();
        };

        let snapshot = self.knowledge.snapshot();
        let prompt = system_prompt(&snapshot.raw);
        let recent = recent_history(history, self.settings.max_history_messages);

        match llm.generate(&prompt, recent, message).await {
            Ok(text) => match &self.guard {
                Some(guard) => match guard.check(&text, &snapshot.raw) {
                    GuardVerdict::Accepted => text,
                    GuardVerdict::Rejected { kind, fragment } => {
                        warn!("Respuesta del LLM descartada ({kind}): {fragment:?}");
                        responses::SPECIALIST_CONTACT.to_string()
                    }
                },
                None => text,
            },
            Err(e) => {
                warn!("Usando respuesta local: {}", e);
                fallback()
            }
        }
    }
}

fn recent_history(history: &[ChatMessage], max: usize) -> &[ChatMessage] {
    &history[history.len().saturating_sub(max)..]
}

fn system_prompt(knowledge: &str) -> String {
    const RULES: &str = r#"
Eres el asistente comercial de una empresa exportadora de aguacate Hass.
Respondes en español, de forma breve, amable y clara.
Atiendes tanto a clientes de mayoreo (toneladas, contenedores, exportación) como de menudeo (cajas, kilos).
Sólo puedes usar la información de la base de conocimiento que aparece abajo.
No inventes horarios, direcciones, teléfonos, correos, precios ni enlaces.
Si la información no está en la base de conocimiento, sugiere contactar a un especialista.
"#;
    if knowledge.trim().is_empty() {
        RULES.trim().to_string()
    } else {
        format!("{}\n\nBase de conocimiento:\n{}", RULES.trim(), knowledge.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::key_rotation::ApiKeyManager;
    use crate::rules::RuleSet;

    const KB: &str = "\
## Contacto
Teléfono: 443 123 4567

## Preguntas Frecuentes

### ¿Cuál es el pedido mínimo de mayoreo?
El pedido mínimo de mayoreo es un pallet.
";

    struct Fixture {
        _file: tempfile::NamedTempFile,
        knowledge: Arc<KnowledgeStore>,
    }

    fn fixture() -> Fixture {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KB.as_bytes()).unwrap();
        let knowledge = Arc::new(KnowledgeStore::open(file.path()));
        Fixture { _file: file, knowledge }
    }

    fn service(fx: &Fixture, llm: Option<LlmManager>) -> ChatService {
        let classifier = Arc::new(IntentClassifier::new(RuleSet::embedded().unwrap()).unwrap());
        ChatService::new(
            classifier,
            fx.knowledge.clone(),
            llm,
            Some(InventedInfoGuard::new().unwrap()),
            ChatSettings { max_history_messages: 2, specialist_after_messages: 5 },
        )
    }

    fn llm_for(server: &MockServer) -> LlmManager {
        llm_with_timeout(server, Duration::from_secs(5))
    }

    fn llm_with_timeout(server: &MockServer, timeout: Duration) -> LlmManager {
        let keys = Arc::new(ApiKeyManager::new(vec!["k1".to_string()], 10));
        LlmManager::new(&server.uri(), "test-model", keys, timeout).unwrap()
    }

    fn gemini_reply(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        }))
    }

    /// Historial con `n` mensajes previos del usuario.
    fn history(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .flat_map(|i| {
                [
                    ChatMessage { role: "user".into(), content: format!("mensaje {i}") },
                    ChatMessage { role: "assistant".into(), content: format!("respuesta {i}") },
                ]
            })
            .collect()
    }

    #[tokio::test]
    async fn first_message_gets_welcome() {
        let fx = fixture();
        let chat = service(&fx, None);
        assert_eq!(chat.respond("¿Cuánto cuesta una tonelada?", &[]).await, responses::WELCOME);
    }

    #[tokio::test]
    async fn greeting_gets_welcome_mid_conversation() {
        let fx = fixture();
        let chat = service(&fx, None);
        assert_eq!(chat.respond("Hola, buenas tardes", &history(3)).await, responses::WELCOME);
    }

    #[tokio::test]
    async fn wholesale_price_question_falls_back_to_wholesale_text() {
        let fx = fixture();
        let chat = service(&fx, None);
        let reply = chat.respond("¿Cuánto cuesta una tonelada?", &history(1)).await;
        assert_eq!(reply, responses::PRICE_WHOLESALE);
    }

    #[tokio::test]
    async fn sixth_message_appends_specialist_suffix() {
        let fx = fixture();
        let chat = service(&fx, None);
        let reply = chat.respond("zzz qwerty", &history(5)).await;
        assert_eq!(reply, format!("{}{}", responses::GENERIC, responses::SPECIALIST_SUFFIX));

        let reply = chat.respond("zzz qwerty", &history(4)).await;
        assert_eq!(reply, responses::GENERIC);
    }

    #[tokio::test]
    async fn faq_answer_wins_over_llm() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(gemini_reply("no")).expect(0).mount(&server).await;

        let chat = service(&fx, Some(llm_for(&server)));
        let reply = chat.respond("¿Qué pedido mínimo piden en mayoreo?", &history(1)).await;
        assert_eq!(reply, "El pedido mínimo de mayoreo es un pallet.");
    }

    #[tokio::test]
    async fn llm_reply_is_used_and_history_is_trimmed() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(gemini_reply("Nuestro Hass es de Michoacán."))
            .expect(1)
            .mount(&server)
            .await;

        let chat = service(&fx, Some(llm_for(&server)));
        let reply = chat.respond("De qué región es su fruta", &history(3)).await;
        assert_eq!(reply, "Nuestro Hass es de Michoacán.");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        // Dos mensajes de historial más el mensaje actual.
        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        let system = body["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(system.contains("Preguntas Frecuentes"));
    }

    #[tokio::test]
    async fn invented_contact_data_is_replaced() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(gemini_reply("Llámanos al 55 9876 5432."))
            .mount(&server)
            .await;

        let chat = service(&fx, Some(llm_for(&server)));
        let reply = chat.respond("Necesito hablar con alguien", &history(5)).await;
        assert_eq!(reply, responses::SPECIALIST_CONTACT);
    }

    #[tokio::test]
    async fn known_contact_data_passes_the_guard() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(gemini_reply("Llámanos al 443-123-4567."))
            .mount(&server)
            .await;

        let chat = service(&fx, Some(llm_for(&server)));
        let reply = chat.respond("Necesito hablar con alguien", &history(1)).await;
        assert_eq!(reply, "Llámanos al 443-123-4567.");
    }

    #[tokio::test]
    async fn llm_failure_uses_intent_text() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let chat = service(&fx, Some(llm_for(&server)));
        let reply = chat.respond("Quiero 3 kilos, ¿cómo es el envío a domicilio?", &history(2)).await;
        assert_eq!(reply, responses::DELIVERY_RETAIL);
    }

    #[tokio::test]
    async fn llm_timeout_uses_intent_text() {
        let fx = fixture();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(gemini_reply("demasiado tarde").set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let chat = service(&fx, Some(llm_with_timeout(&server, Duration::from_millis(300))));
        let reply = chat.respond("Quiero 3 kilos, ¿cómo es el envío a domicilio?", &history(2)).await;
        assert_eq!(reply, responses::DELIVERY_RETAIL);
    }

    #[test]
    fn recent_history_keeps_the_tail() {
        let h = history(3);
        assert_eq!(recent_history(&h, 2), &h[4..]);
        assert_eq!(recent_history(&h, 50).len(), 6);
        assert!(recent_history(&h, 0).is_empty());
    }
}
