//! # API pública de reservas
//!
//! Rutas sin autenticación; el token del SMS es la única credencial.
//!
//! - `POST /reservar` - Alta desde el formulario web (JSON o urlencoded)
//! - `GET /api/available-hours?fecha=` - Horas libres de una fecha
//! - `GET|POST /confirm/{token}` - Página y acción de confirmación
//! - `GET /cancel/{token}` - Cancelación con un solo clic

use actix_web::{get, post, web, Either, HttpResponse, Responder};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

use super::middleware::ErrorLogExt;
use super::pages;
use super::{AppError, AppResult};
use crate::domain::{parse_fecha, Rejection, ReservationId, ReservationRequest};
use crate::services::TokenView;
use crate::AppState;

const SAVED: &str = "Reserva registrada. Revisa tu móvil para confirmar.";

/// Campos tal y como los envía el formulario; se validan en el servicio
#[derive(Debug, Default, Deserialize)]
pub struct ReservationForm {
    nombre: Option<String>,
    telefono: Option<String>,
    #[serde(default, deserialize_with = "text_or_number")]
    personas: Option<String>,
    fecha: Option<String>,
    hora: Option<String>,
    #[serde(alias = "notes")]
    notas: Option<String>,
}

/// `personas` llega como número en JSON y como texto en el formulario
fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }
    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}

#[derive(Debug, Serialize)]
struct CreatedResponse {
    success: bool,
    reservation_id: ReservationId,
    large_group: bool,
    sms_sent: bool,
    message: String,
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    fecha: Option<String>,
}

/// Crea una reserva
///
/// La respuesta espera al SMS del cliente como mucho el timeout del
/// gateway. Si no llega a salir la reserva sigue guardada y
/// `sms_sent` vale `false`.
///
/// ```json
/// {
///   "success": true,
///   "reservation_id": 12,
///   "large_group": false,
///   "sms_sent": true,
///   "message": "Reserva registrada. Revisa tu móvil para confirmar."
/// }
/// ```
///
/// # Errores
/// - `400 Bad Request`: campo ausente, ventana de servicio, hora no
///   disponible o reserva activa duplicada
/// - `409 Conflict`: no se pudo generar un token único
#[post("/reservar")]
async fn create_reservation(
    state: web::Data<AppState>,
    body: Either<web::Json<ReservationForm>, web::Form<ReservationForm>>,
) -> AppResult<impl Responder> {
    let form = match body {
        Either::Left(json) => json.into_inner(),
        Either::Right(form) => form.into_inner(),
    };

    let request = ReservationRequest::parse(
        form.nombre.as_deref(),
        form.telefono.as_deref(),
        form.personas.as_deref(),
        form.fecha.as_deref(),
        form.hora.as_deref(),
        form.notas.as_deref(),
    )?;

    let created = state
        .reservations
        .create(request)
        .await
        .log_error_level(tracing::Level::INFO, "create reservation")?;

    let sms_sent = match created.delivery {
        Some(handle) => handle.wait(sms_wait(&state)).await,
        None => false,
    };
    if !sms_sent {
        tracing::warn!(reservation_id = created.reserva.id, "Customer SMS not delivered");
    }

    let message = if sms_sent {
        SAVED.to_string()
    } else {
        format!(
            "Reserva registrada, pero no pudimos enviarte el SMS. Llámanos al {} para confirmarla.",
            state.config.restaurant_phone
        )
    };

    Ok(HttpResponse::Ok().json(CreatedResponse {
        success: true,
        reservation_id: created.reserva.id,
        large_group: created.large_group,
        sms_sent,
        message,
    }))
}

/// Margen sobre el timeout del gateway para que la cola responda
fn sms_wait(state: &AppState) -> Duration {
    state.config.sms.timeout + Duration::from_secs(1)
}

/// Horas reservables de una fecha, ya sin las pasadas si es hoy
#[get("/api/available-hours")]
async fn available_hours(
    state: web::Data<AppState>,
    query: web::Query<AvailabilityQuery>,
) -> AppResult<impl Responder> {
    let raw = query
        .fecha
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Fecha requerida".to_string()))?;
    let fecha = parse_fecha(raw)?;

    let availability = state
        .schedule
        .availability(fecha)
        .await
        .log_error_context("available hours")?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "hours": availability.hours,
        "all_blocked": availability.all_blocked,
    })))
}

#[get("/confirm/{token}")]
async fn confirm_page(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let token = path.into_inner();
    let restaurant = &state.config.restaurant_name;

    Ok(match state.reservations.token_view(&token).await? {
        TokenView::AwaitingConfirmation(r) => pages::confirm_prompt(restaurant, &r),
        TokenView::Confirmed(r) => pages::confirmed(restaurant, &r, &state.config.cancel_link(&token)),
        TokenView::Invalid => {
            tracing::info!("Confirmation page requested for an invalid link");
            pages::invalid_link(restaurant, "Esta reserva no existe, ya fue cancelada, o ya pasó la fecha.")
        }
    })
}

/// Confirmación del cliente; repetirla muestra el mismo resumen
#[post("/confirm/{token}")]
async fn confirm(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let token = path.into_inner();
    let restaurant = &state.config.restaurant_name;
    let cancel_link = state.config.cancel_link(&token);

    match state.reservations.confirm_by_token(&token).await {
        Ok(outcome) => Ok(pages::confirmed(restaurant, &outcome.reserva, &cancel_link)),
        Err(AppError::Rejected(Rejection::AlreadyConfirmed)) => match state.reservations.token_view(&token).await? {
            TokenView::Confirmed(r) => Ok(pages::confirmed(restaurant, &r, &cancel_link)),
            _ => Ok(invalid_confirm(restaurant)),
        },
        Err(AppError::Rejected(_) | AppError::NotFound(_)) => Ok(invalid_confirm(restaurant)),
        Err(e) => Err(e),
    }
}

fn invalid_confirm(restaurant: &str) -> HttpResponse {
    pages::invalid_link(restaurant, "Esta reserva ya fue confirmada, cancelada, o ya pasó la fecha.")
}

#[get("/cancel/{token}")]
async fn cancel(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let token = path.into_inner();
    let restaurant = &state.config.restaurant_name;

    match state.reservations.cancel_by_token(&token).await {
        Ok(outcome) => Ok(pages::cancelled(restaurant, &outcome.reserva)),
        Err(AppError::Rejected(_) | AppError::NotFound(_)) => Ok(pages::invalid_link(
            restaurant,
            "Esta reserva ya fue cancelada o el enlace no es válido.",
        )),
        Err(e) => Err(e),
    }
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(create_reservation)
        .service(available_hours)
        .service(confirm_page)
        .service(confirm)
        .service(cancel);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn party_size_accepts_text_and_numbers() {
        let json: ReservationForm = serde_json::from_str(r#"{"personas": 4, "notes": "terraza"}"#).unwrap();
        assert_eq!(json.personas.as_deref(), Some("4"));
        assert_eq!(json.notas.as_deref(), Some("terraza"));

        let text: ReservationForm = serde_json::from_str(r#"{"personas": "6"}"#).unwrap();
        assert_eq!(text.personas.as_deref(), Some("6"));

        let missing: ReservationForm = serde_json::from_str("{}").unwrap();
        assert!(missing.personas.is_none());
    }
}
