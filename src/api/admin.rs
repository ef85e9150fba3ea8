//! # API de administración
//!
//! Todas las rutas exigen `Authorization: Bearer <ADMIN_TOKEN>`. Sin
//! `ADMIN_TOKEN` configurado la API queda cerrada.
//!
//! ## Rutas
//!
//! - `GET /api/admin/reservations` - Listado filtrado y ordenado
//! - `GET /api/admin/reservations/{id}/audit` - Historial de una reserva
//! - `DELETE /api/admin/reservations/{id}` - Borrado en cascada
//! - `POST /api/admin/cancel/{id}` / `POST /api/admin/approve/{id}`
//! - `GET|POST /api/admin/default-hours`
//! - `GET /api/admin/blocked-hours/{fecha}` y sus variantes de bloqueo
//! - `GET /api/admin/calendar`, `GET /api/admin/stats`
//! - `GET /api/admin/audit` - Registro de acciones
//! - `POST /api/admin/resync` - Reconstrucción forzada del panel

use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::middleware::ErrorLogExt;
use super::{AppError, AppResult};
use crate::config::format_hours;
use crate::dashboard::{Outcome, RunMode};
use crate::db::{ReservationFilter, SortKey, StatusFilter};
use crate::domain::{parse_fecha, parse_hora, Actor, Reserva, ReservationId, ReservationStatus, DATE_FORMAT, TIME_FORMAT};
use crate::AppState;

/// Filas de auditoría devueltas por defecto y como máximo
const AUDIT_DEFAULT_LIMIT: usize = 100;
const AUDIT_MAX_LIMIT: usize = 500;

/// Extrae el token Bearer del header Authorization
fn extract_token(req: &HttpRequest) -> AppResult<&str> {
    let auth_header = req
        .headers()
        .get("authorization")
        .ok_or(AppError::Unauthorized("Falta header Authorization".to_string()))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AppError::Unauthorized("Header Authorization inválido".to_string()))?;

    auth_str
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized("Formato de token inválido".to_string()))
}

/// Comprueba el token de administración en tiempo constante
fn require_admin(state: &AppState, req: &HttpRequest) -> AppResult<()> {
    let expected = state
        .config
        .admin_token
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized("API de administración deshabilitada".to_string()))?;
    let given = extract_token(req)?;

    let same_len = given.len() == expected.len();
    let diff = given
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if !same_len || diff != 0 {
        return Err(AppError::Unauthorized("Token inválido".to_string()));
    }
    Ok(())
}

/// Reserva tal y como la ve el panel web de administración
#[derive(Debug, Serialize)]
pub struct AdminReservation {
    id: ReservationId,
    nombre: String,
    telefono: String,
    personas: u32,
    fecha: String,
    hora: String,
    notas: Option<String>,
    user_confirmed: bool,
    restaurant_confirmed: bool,
    cancelled: bool,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_by: Option<String>,
    created_at: DateTime<Utc>,
    status: ReservationStatus,
}

impl From<Reserva> for AdminReservation {
    fn from(r: Reserva) -> Self {
        Self {
            status: r.status(),
            fecha: r.fecha.format(DATE_FORMAT).to_string(),
            hora: r.hora.format(TIME_FORMAT).to_string(),
            id: r.id,
            nombre: r.nombre,
            telefono: r.telefono,
            personas: r.personas,
            notas: r.notas,
            user_confirmed: r.user_confirmed,
            restaurant_confirmed: r.restaurant_confirmed,
            cancelled: r.cancelled,
            cancelled_at: r.cancelled_at,
            cancelled_by: r.cancelled_by,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    fecha: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    sort: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> AppResult<ReservationFilter> {
        let status = match self.status.as_deref() {
            None | Some("") => StatusFilter::All,
            Some(raw) => raw.parse().map_err(|e: String| AppError::validation_field("status", &e))?,
        };
        let date = |raw: Option<String>| raw.filter(|s| !s.is_empty()).map(|s| parse_fecha(&s)).transpose();

        Ok(ReservationFilter {
            status,
            fecha: date(self.fecha)?,
            date_from: date(self.date_from)?,
            date_to: date(self.date_to)?,
            sort: SortKey::parse_or_default(self.sort.as_deref()),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct CancelBody {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DefaultHoursBody {
    hours: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarQuery {
    month: Option<u32>,
    year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    after: Option<i64>,
    limit: Option<usize>,
}

#[get("/api/admin/reservations")]
async fn list_reservations(
    state: web::Data<AppState>,
    query: web::Query<ListQuery>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let filter = query.into_inner().into_filter()?;

    let rows = state
        .reservations
        .list(&filter)
        .await
        .log_error_context("admin list reservations")?;
    let reservations: Vec<AdminReservation> = rows.into_iter().map(AdminReservation::from).collect();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "reservations": reservations,
    })))
}

#[get("/api/admin/reservations/{id}/audit")]
async fn reservation_audit(
    state: web::Data<AppState>,
    path: web::Path<ReservationId>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let id = path.into_inner();
    let entries = state.reservations.audit_for(id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true, "entries": entries })))
}

/// Borrado administrativo; arrastra auditoría y tarjetas del panel
#[delete("/api/admin/reservations/{id}")]
async fn delete_reservation(
    state: web::Data<AppState>,
    path: web::Path<ReservationId>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let id = path.into_inner();
    state.reservations.delete(id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Reserva eliminada",
    })))
}

#[post("/api/admin/cancel/{id}")]
async fn cancel_reservation(
    state: web::Data<AppState>,
    path: web::Path<ReservationId>,
    body: Option<web::Json<CancelBody>>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let id = path.into_inner();
    let reason = body
        .and_then(|b| b.into_inner().reason)
        .filter(|r| !r.trim().is_empty());

    state
        .reservations
        .cancel(id, &Actor::Admin, reason)
        .await
        .log_error_level(tracing::Level::WARN, "admin cancel")?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Reserva cancelada exitosamente",
    })))
}

#[post("/api/admin/approve/{id}")]
async fn approve_reservation(
    state: web::Data<AppState>,
    path: web::Path<ReservationId>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let id = path.into_inner();

    state
        .reservations
        .approve(id, &Actor::Admin)
        .await
        .log_error_level(tracing::Level::WARN, "admin approve")?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Reserva aprobada exitosamente",
    })))
}

#[get("/api/admin/default-hours")]
async fn get_default_hours(state: web::Data<AppState>, req: HttpRequest) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "hours": format_hours(&state.schedule.default_hours()),
    })))
}

#[post("/api/admin/default-hours")]
async fn set_default_hours(
    state: web::Data<AppState>,
    body: web::Json<DefaultHoursBody>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let raw = body.into_inner().hours;
    if raw.is_empty() {
        return Err(AppError::Validation("Debes seleccionar al menos un horario".to_string()));
    }
    let mut hours = Vec::with_capacity(raw.len());
    for hora in &raw {
        hours.push(parse_hora(hora).map_err(|_| AppError::Validation(format!("Formato de hora inválido: {hora}")))?);
    }

    let stored = state
        .schedule
        .set_default_hours(hours)
        .log_error_context("default hours update")?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": format!("Horarios actualizados: {} horarios configurados", stored.len()),
        "hours": format_hours(&stored),
    })))
}

#[get("/api/admin/blocked-hours/{fecha}")]
async fn hours_overview(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let fecha = parse_fecha(&path.into_inner())?;
    let overview = state.schedule.overview(fecha).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "fecha": overview.fecha,
        "default_hours": overview.default_hours,
        "blocked": overview.blocked,
        "available": overview.available,
        "reservation_counts": overview.reservation_counts,
    })))
}

#[post("/api/admin/blocked-hours/{fecha}/block-all")]
async fn block_all(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let fecha = parse_fecha(&path.into_inner())?;
    let count = state.schedule.block_all(fecha).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": format!("{count} horarios bloqueados"),
    })))
}

#[post("/api/admin/blocked-hours/{fecha}/unblock-all")]
async fn unblock_all(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let fecha = parse_fecha(&path.into_inner())?;
    state.schedule.unblock_all(fecha).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Todos los horarios desbloqueados",
    })))
}

#[post("/api/admin/blocked-hours/{fecha}/{hora}")]
async fn block_hour(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let (fecha, hora) = path.into_inner();
    let (fecha, hora) = (parse_fecha(&fecha)?, parse_hora(&hora)?);
    state.schedule.block(fecha, hora).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": format!("Hora {} bloqueada", hora.format(TIME_FORMAT)),
    })))
}

#[delete("/api/admin/blocked-hours/{fecha}/{hora}")]
async fn unblock_hour(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let (fecha, hora) = path.into_inner();
    let (fecha, hora) = (parse_fecha(&fecha)?, parse_hora(&hora)?);
    state.schedule.unblock(fecha, hora).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": format!("Hora {} desbloqueada", hora.format(TIME_FORMAT)),
    })))
}

/// Rejilla mensual; sin parámetros, el mes en curso
#[get("/api/admin/calendar")]
async fn calendar(
    state: web::Data<AppState>,
    query: web::Query<CalendarQuery>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let today = state.clock.today();
    let month = state
        .reservations
        .calendar(query.year.unwrap_or(today.year()), query.month.unwrap_or(today.month()))
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "year": month.year,
        "month": month.month,
        "days": month.days,
    })))
}

#[get("/api/admin/stats")]
async fn stats(state: web::Data<AppState>, req: HttpRequest) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let stats = state.reservations.stats().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true, "stats": stats })))
}

#[get("/api/admin/audit")]
async fn audit(
    state: web::Data<AppState>,
    query: web::Query<AuditQuery>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    let limit = query.limit.unwrap_or(AUDIT_DEFAULT_LIMIT).clamp(1, AUDIT_MAX_LIMIT);
    let entries = state
        .reservations
        .audit_after(query.after.unwrap_or(0), limit)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true, "entries": entries })))
}

fn outcome_json(outcome: Outcome) -> serde_json::Value {
    match outcome {
        Outcome::InSync => serde_json::json!({ "result": "in_sync" }),
        Outcome::Adopted => serde_json::json!({ "result": "adopted" }),
        Outcome::Rebuilt { deleted, posted } => {
            serde_json::json!({ "result": "rebuilt", "deleted": deleted, "posted": posted })
        }
        Outcome::Skipped => serde_json::json!({ "result": "skipped" }),
        Outcome::Disabled => serde_json::json!({ "result": "disabled" }),
    }
}

/// Reconstruye todos los canales aunque parezcan sincronizados
#[post("/api/admin/resync")]
async fn resync(state: web::Data<AppState>, req: HttpRequest) -> AppResult<impl Responder> {
    require_admin(&state, &req)?;
    tracing::info!("Forced dashboard resync requested from admin API");

    let channels: serde_json::Map<String, serde_json::Value> = state
        .reconciler
        .reconcile_all(RunMode::Forced)
        .await
        .into_iter()
        .map(|(kind, outcome)| (kind.to_string(), outcome_json(outcome)))
        .collect();

    Ok(HttpResponse::Ok().json(serde_json::json!({ "success": true, "channels": channels })))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    // block-all/unblock-all antes que {hora} para que no se interpreten como hora
    cfg.service(list_reservations)
        .service(reservation_audit)
        .service(delete_reservation)
        .service(cancel_reservation)
        .service(approve_reservation)
        .service(get_default_hours)
        .service(set_default_hours)
        .service(hours_overview)
        .service(block_all)
        .service(unblock_all)
        .service(block_hour)
        .service(unblock_hour)
        .service(calendar)
        .service(stats)
        .service(audit)
        .service(resync);
}
