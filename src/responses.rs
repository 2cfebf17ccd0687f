//! Textos fijos del chatbot: bienvenida, respuestas locales por intención y
//! mensajes de error seguros para el usuario.

use crate::models::{Classification, Intent, QueryType};

pub const WELCOME: &str = "¡Hola! 🥑 Bienvenido a nuestro servicio de aguacate Hass de exportación. \
Puedo ayudarte con precios, disponibilidad, envíos y formas de pago, tanto para mayoreo como para menudeo. \
¿En qué te puedo ayudar?";

pub const PRICE_WHOLESALE: &str = "Para mayoreo manejamos precios por tonelada que dependen del calibre, \
la temporada y el destino. Con gusto te preparamos una cotización: indícanos volumen, calibre y puerto o \
ciudad de entrega.";

pub const PRICE_RETAIL: &str = "Para menudeo vendemos por caja y por kilo. El precio varía según el calibre \
y la temporada; dinos cuántos kilos o cajas necesitas y tu ciudad para darte el precio actualizado.";

pub const PRICE_GENERAL: &str = "Nuestros precios dependen del volumen, el calibre y la temporada. \
¿Buscas comprar por mayoreo (toneladas o contenedores) o por menudeo (cajas o kilos)?";

pub const AVAILABILITY: &str = "Contamos con aguacate Hass prácticamente todo el año gracias a las distintas \
floraciones de Michoacán. Cuéntanos el volumen y la fecha que necesitas para confirmar disponibilidad.";

pub const DELIVERY_WHOLESALE: &str = "Para mayoreo y exportación embarcamos en contenedores refrigerados \
y tarimas. Coordinamos la logística hasta el puerto o la frontera que nos indiques.";

pub const DELIVERY_RETAIL: &str = "Para pedidos de menudeo hacemos entregas locales y envíos por paquetería. \
Compártenos tu ciudad y código postal para calcular el envío.";

pub const DELIVERY_GENERAL: &str = "Realizamos envíos nacionales e internacionales. El tiempo y costo de \
entrega dependen del volumen y del destino. ¿A dónde necesitas el envío?";

pub const PAYMENT: &str = "Aceptamos transferencia bancaria y depósito. Para mayoreo trabajamos con anticipo \
y saldo contra embarque; emitimos factura en todos los pedidos.";

pub const PRODUCT: &str = "Comercializamos aguacate Hass de Michoacán en distintos calibres, seleccionado y \
empacado según el mercado de destino. ¿Qué calibre o presentación te interesa?";

pub const QUALITY: &str = "Nuestra fruta cumple con los estándares de inocuidad y certificaciones requeridas \
para exportación, y cuidamos la cadena de frío desde el empaque hasta la entrega.";

pub const CONTACT: &str = "Puedes contactar a uno de nuestros especialistas por teléfono, WhatsApp o correo. \
Con gusto te atenderán para resolver tu pedido.";

pub const GENERIC_QUESTION: &str = "Buena pregunta. No tengo ese dato a la mano, pero uno de nuestros \
especialistas puede darte la información exacta.";

pub const GENERIC: &str = "Gracias por tu mensaje. Puedo ayudarte con precios, disponibilidad, envíos, pagos y \
calidad de nuestro aguacate. ¿Sobre qué te gustaría saber?";

pub const SPECIALIST_CONTACT: &str = "Para darte información precisa sobre ese punto, te recomiendo contactar \
directamente a uno de nuestros especialistas; con gusto te atenderán.";

pub const SPECIALIST_SUFFIX: &str = "\n\n¿Prefieres hablar con una persona? Uno de nuestros especialistas \
puede atenderte directamente por teléfono o WhatsApp.";

pub const MISSING_MESSAGE: &str = "Lo siento, no recibí tu mensaje. ¿Podrías escribirlo de nuevo?";

pub const GENERIC_APOLOGY: &str = "Lo siento, tuve un problema al procesar tu mensaje. Por favor, intenta \
de nuevo en un momento.";

/// Respuesta local para una clasificación; se usa cuando el LLM no está
/// disponible.
pub fn fallback_for(classification: &Classification) -> &'static str {
    match (classification.intent.intent, classification.query_type) {
        (Intent::Price, QueryType::Wholesale) => PRICE_WHOLESALE,
        (Intent::Price, QueryType::Retail) => PRICE_RETAIL,
        (Intent::Price, QueryType::Unknown) => PRICE_GENERAL,
        (Intent::Availability, _) => AVAILABILITY,
        (Intent::Delivery, QueryType::Wholesale) => DELIVERY_WHOLESALE,
        (Intent::Delivery, QueryType::Retail) => DELIVERY_RETAIL,
        (Intent::Delivery, QueryType::Unknown) => DELIVERY_GENERAL,
        (Intent::Payment, _) => PAYMENT,
        (Intent::Product, _) => PRODUCT,
        (Intent::Quality, _) => QUALITY,
        (Intent::Contact, _) => CONTACT,
        (Intent::Question, _) => GENERIC_QUESTION,
        (Intent::Greeting, _) => WELCOME,
        (Intent::Unknown, _) => GENERIC,
    }
}
