//! Webhook de interacciones del panel (`POST /dashboard/interactions`)
//!
//! Discord firma cada petición; sin `DISCORD_PUBLIC_KEY` el endpoint
//! rechaza todo.

use actix_web::{post, web, HttpRequest, HttpResponse};

use super::{AppError, AppResult};
use crate::dashboard::discord::{parse_interaction, reply_payload, verify_signature};
use crate::AppState;

const SIGNATURE_HEADER: &str = "X-Signature-Ed25519";
const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";

fn header<'a>(req: &'a HttpRequest, name: &str) -> AppResult<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("Falta header {name}")))
}

#[post("/dashboard/interactions")]
async fn interactions(state: web::Data<AppState>, req: HttpRequest, body: web::Bytes) -> AppResult<HttpResponse> {
    let public_key = state
        .config
        .discord
        .public_key
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("Interacciones deshabilitadas".to_string()))?;
    verify_signature(
        public_key,
        header(&req, SIGNATURE_HEADER)?,
        header(&req, TIMESTAMP_HEADER)?,
        &body,
    )?;

    let event = parse_interaction(&body)?;
    tracing::debug!(event = ?event, "Dashboard interaction received");
    let reply = state.interactions.handle(event).await;

    Ok(HttpResponse::Ok().json(reply_payload(&reply)))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(interactions);
}
