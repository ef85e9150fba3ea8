//! # Discord
//!
//! Implementación de [`DisplaySurface`] sobre la API REST v10 y traducción
//! de los webhooks de interacción.
//!
//! Cada tarjeta es un embed; el marcador de identidad va en el pie
//! (`ref:reserva:12`) y se vuelve a leer al listar el canal.
//!
//! Las interacciones llegan firmadas con Ed25519 sobre
//! `timestamp + cuerpo`; [`verify_signature`] las valida con la clave
//! pública de la aplicación.

use async_trait::async_trait;
use reqwest::StatusCode;
use ring::signature;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::interactions::{InteractionEvent, InteractionReply};
use super::surface::{ActionStyle, Card, CardMarker, DisplaySurface, VisibleMessage};
use crate::api::{AppError, AppResult};

const API_BASE: &str = "https://discord.com/api/v10";
const PAGE_SIZE: usize = 100;
/// Páginas de historial leídas como máximo por canal
const MAX_PAGES: usize = 10;
const RATE_LIMIT_RETRIES: usize = 3;
const BUTTONS_PER_ROW: usize = 5;
/// Flag de mensaje visible solo para quien interactúa
const EPHEMERAL: u64 = 1 << 6;

pub struct DiscordSurface {
    http: reqwest::Client,
    base: String,
    bot_token: String,
}

impl DiscordSurface {
    pub fn new(bot_token: String, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::transport("discord", format!("cliente HTTP: {e}")))?;
        Ok(Self {
            http,
            base: API_BASE.to_string(),
            bot_token,
        })
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    /// Envía la petición; ante 429 espera lo indicado y reintenta
    async fn send(&self, build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder) -> AppResult<reqwest::Response> {
        for _ in 0..=RATE_LIMIT_RETRIES {
            let response = build(&self.http)
                .header("Authorization", format!("Bot {}", self.bot_token))
                .send()
                .await
                .map_err(|e| AppError::transport("discord", e.to_string()))?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return check(response).await;
            }

            let wait = response
                .json::<RateLimited>()
                .await
                .map(|r| r.retry_after)
                .unwrap_or(1.0);
            tracing::warn!(retry_after = wait, "Discord rate limit hit");
            tokio::time::sleep(Duration::from_secs_f64(wait.clamp(0.0, 30.0))).await;
        }
        Err(AppError::transport("discord", "límite de peticiones persistente"))
    }
}

#[derive(Debug, Deserialize)]
struct RateLimited {
    retry_after: f64,
}

#[derive(Debug, Deserialize)]
struct Message {
    id: String,
    #[serde(default)]
    embeds: Vec<Embed>,
}

#[derive(Debug, Deserialize)]
struct Embed {
    footer: Option<Footer>,
}

#[derive(Debug, Deserialize)]
struct Footer {
    text: String,
}

impl Message {
    fn marker(&self) -> Option<CardMarker> {
        self.embeds
            .first()
            .and_then(|e| e.footer.as_ref())
            .and_then(|f| CardMarker::parse(&f.text))
    }
}

async fn check(response: reqwest::Response) -> AppResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_FOUND {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::transport("discord", format!("HTTP {status}: {body}")))
}

#[async_trait]
impl DisplaySurface for DiscordSurface {
    async fn post(&self, channel: &str, card: &Card) -> AppResult<String> {
        let url = format!("{}/channels/{}/messages", self.base, channel);
        let body = card_payload(card);
        let response = self.send(|http| http.post(&url).json(&body)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::transport("discord", format!("canal {channel} no encontrado")));
        }
        let message: Message = response
            .json()
            .await
            .map_err(|e| AppError::transport("discord", format!("respuesta ilegible: {e}")))?;
        Ok(message.id)
    }

    async fn delete(&self, channel: &str, message_id: &str) -> AppResult<()> {
        let url = format!("{}/channels/{}/messages/{}", self.base, channel, message_id);
        // 404: ya no existe, que es lo que se pedía
        self.send(|http| http.delete(&url)).await?;
        Ok(())
    }

    async fn list(&self, channel: &str) -> AppResult<Vec<VisibleMessage>> {
        let url = format!("{}/channels/{}/messages", self.base, channel);
        let mut newest_first = Vec::new();
        let mut before: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let limit = PAGE_SIZE.to_string();
            let cursor = before.clone();
            let response = self
                .send(|http| {
                    let mut req = http.get(&url).query(&[("limit", limit.as_str())]);
                    if let Some(id) = &cursor {
                        req = req.query(&[("before", id.as_str())]);
                    }
                    req
                })
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(AppError::transport("discord", format!("canal {channel} no encontrado")));
            }

            let page: Vec<Message> = response
                .json()
                .await
                .map_err(|e| AppError::transport("discord", format!("historial ilegible: {e}")))?;
            let done = page.len() < PAGE_SIZE;
            before = page.last().map(|m| m.id.clone());
            newest_first.extend(page);
            if done || before.is_none() {
                break;
            }
        }

        Ok(newest_first
            .into_iter()
            .rev()
            .map(|m| VisibleMessage {
                marker: m.marker(),
                message_id: m.id,
            })
            .collect())
    }
}

fn style_code(style: ActionStyle) -> u8 {
    match style {
        ActionStyle::Primary => 1,
        ActionStyle::Secondary => 2,
        ActionStyle::Success => 3,
        ActionStyle::Danger => 4,
    }
}

/// Cuerpo de `POST /channels/{id}/messages`
pub fn card_payload(card: &Card) -> Value {
    let mut embed = json!({
        "title": card.title,
        "color": card.color,
        "fields": card.fields.iter().map(|f| json!({
            "name": f.name,
            "value": f.value,
            "inline": f.inline,
        })).collect::<Vec<_>>(),
    });
    if let Some(description) = &card.description {
        embed["description"] = json!(description);
    }
    if let Some(marker) = card.marker {
        embed["footer"] = json!({ "text": marker.to_string() });
    }

    let rows: Vec<Value> = card
        .actions
        .chunks(BUTTONS_PER_ROW)
        .map(|row| {
            json!({
                "type": 1,
                "components": row.iter().map(|a| json!({
                    "type": 2,
                    "style": style_code(a.style),
                    "label": a.label,
                    "custom_id": a.custom_id,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({ "embeds": [embed], "components": rows })
}

/// Verifica la firma Ed25519 de una interacción
///
/// # Errores
///
/// `Unauthorized` si la clave, la firma o el contenido no cuadran.
pub fn verify_signature(public_key_hex: &str, signature_hex: &str, timestamp: &str, body: &[u8]) -> AppResult<()> {
    let key = hex::decode(public_key_hex.trim())
        .map_err(|_| AppError::Internal("DISCORD_PUBLIC_KEY no es hexadecimal".to_string()))?;
    let sig = hex::decode(signature_hex.trim()).map_err(|_| AppError::Unauthorized("Firma mal formada".to_string()))?;

    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);

    signature::UnparsedPublicKey::new(&signature::ED25519, key)
        .verify(&message, &sig)
        .map_err(|_| AppError::Unauthorized("Firma de interacción inválida".to_string()))
}

#[derive(Debug, Deserialize)]
struct RawInteraction {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    data: Option<RawData>,
    member: Option<RawMember>,
    user: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawData {
    name: Option<String>,
    custom_id: Option<String>,
    #[serde(default)]
    components: Vec<RawRow>,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    components: Vec<RawInput>,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    value: Option<String>,
}

/// Traduce el JSON de una interacción a [`InteractionEvent`]
pub fn parse_interaction(body: &[u8]) -> AppResult<InteractionEvent> {
    let raw: RawInteraction =
        serde_json::from_slice(body).map_err(|e| AppError::Validation(format!("Interacción ilegible: {e}")))?;

    let user = raw
        .member
        .map(|m| m.user.username)
        .or(raw.user.map(|u| u.username))
        .unwrap_or_else(|| "discord".to_string());
    let data = raw.data.unwrap_or_default();
    let missing = |what: &str| AppError::Validation(format!("Interacción sin {what}"));

    match raw.kind {
        1 => Ok(InteractionEvent::Ping),
        2 => Ok(InteractionEvent::Command {
            name: data.name.ok_or_else(|| missing("nombre de comando"))?,
            user,
        }),
        3 => Ok(InteractionEvent::Button {
            custom_id: data.custom_id.ok_or_else(|| missing("custom_id"))?,
            user,
        }),
        5 => {
            let reason = data
                .components
                .iter()
                .flat_map(|row| row.components.iter())
                .find_map(|input| input.value.clone())
                .filter(|v| !v.trim().is_empty());
            Ok(InteractionEvent::FormSubmit {
                custom_id: data.custom_id.ok_or_else(|| missing("custom_id"))?,
                user,
                reason,
            })
        }
        other => Err(AppError::Validation(format!("Tipo de interacción no soportado: {other}"))),
    }
}

/// Respuesta JSON de Discord para una [`InteractionReply`]
pub fn reply_payload(reply: &InteractionReply) -> Value {
    match reply {
        InteractionReply::Pong => json!({ "type": 1 }),
        InteractionReply::Message { content, ephemeral } => {
            let flags = if *ephemeral { EPHEMERAL } else { 0 };
            json!({ "type": 4, "data": { "content": content, "flags": flags } })
        }
        InteractionReply::ReasonPrompt { custom_id, title, label } => json!({
            "type": 9,
            "data": {
                "custom_id": custom_id,
                "title": title,
                "components": [{
                    "type": 1,
                    "components": [{
                        "type": 4,
                        "custom_id": "reason",
                        "style": 2,
                        "label": label,
                        "required": false,
                        "max_length": 200,
                    }],
                }],
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;
    use ring::signature::{Ed25519KeyPair, KeyPair};

    #[test]
    fn marker_travels_in_the_footer() {
        let card = Card::new("📅 Viernes, 16 de Octubre", 1).marked(CardMarker::Reservation(9));
        let payload = card_payload(&card);
        assert_eq!(payload["embeds"][0]["footer"]["text"], "ref:reserva:9");

        let message: Message = serde_json::from_value(json!({
            "id": "111",
            "embeds": [payload["embeds"][0].clone()],
        }))
        .unwrap();
        assert_eq!(message.marker(), Some(CardMarker::Reservation(9)));
    }

    #[test]
    fn buttons_are_grouped_in_rows() {
        let mut card = Card::new("x", 0);
        for i in 0..7 {
            card = card.action(format!("phone:{i}"), "📞", ActionStyle::Secondary);
        }
        let payload = card_payload(&card);
        assert_eq!(payload["components"].as_array().unwrap().len(), 2);
        assert_eq!(payload["components"][0]["components"][0]["style"], 2);
    }

    #[test]
    fn signatures_are_checked_over_timestamp_and_body() {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let public = hex::encode(pair.public_key().as_ref());

        let body = br#"{"type":1}"#;
        let sig = hex::encode(pair.sign(&[b"1700000000".as_slice(), body].concat()).as_ref());

        assert!(verify_signature(&public, &sig, "1700000000", body).is_ok());
        assert!(verify_signature(&public, &sig, "1700000001", body).is_err());
        assert!(verify_signature(&public, "zz", "1700000000", body).is_err());
    }

    #[test]
    fn interactions_are_translated() {
        let button = json!({
            "type": 3,
            "data": { "custom_id": "approve:4" },
            "member": { "user": { "username": "maria" } },
        });
        assert_eq!(
            parse_interaction(button.to_string().as_bytes()).unwrap(),
            InteractionEvent::Button {
                custom_id: "approve:4".into(),
                user: "maria".into(),
            }
        );

        let modal = json!({
            "type": 5,
            "data": {
                "custom_id": "cancel_reason:4",
                "components": [{ "type": 1, "components": [{ "type": 4, "custom_id": "reason", "value": "Cierre" }] }],
            },
            "user": { "username": "pepe" },
        });
        assert_eq!(
            parse_interaction(modal.to_string().as_bytes()).unwrap(),
            InteractionEvent::FormSubmit {
                custom_id: "cancel_reason:4".into(),
                user: "pepe".into(),
                reason: Some("Cierre".into()),
            }
        );

        assert_eq!(parse_interaction(br#"{"type":1}"#).unwrap(), InteractionEvent::Ping);
        assert!(parse_interaction(br#"{"type":3}"#).is_err());
    }

    #[test]
    fn replies_use_discord_callback_types() {
        assert_eq!(reply_payload(&InteractionReply::Pong)["type"], 1);
        let msg = reply_payload(&InteractionReply::Message {
            content: "ok".into(),
            ephemeral: true,
        });
        assert_eq!(msg["data"]["flags"], 64);
        let prompt = reply_payload(&InteractionReply::ReasonPrompt {
            custom_id: "cancel_reason:1".into(),
            title: "Confirmar Cancelación".into(),
            label: "Motivo (opcional)".into(),
        });
        assert_eq!(prompt["type"], 9);
    }
}
