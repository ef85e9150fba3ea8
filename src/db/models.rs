//! Documentos de MongoDB
//!
//! Fechas y horas se guardan como texto (`YYYY-MM-DD`, `HH:MM`) para que los
//! rangos funcionen con comparación lexicográfica; los instantes como
//! timestamp unix en segundos.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::RenderedCard;
use crate::api::{AppError, AppResult};
use crate::dashboard::CardMarker;
use crate::domain::{ActionLogEntry, ActionType, Reserva, DATE_FORMAT, TIME_FORMAT};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReservaDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub nombre: String,
    pub telefono: String,
    pub personas: i64,
    pub fecha: String,
    pub hora: String,
    pub notas: Option<String>,
    pub user_confirmed: bool,
    pub restaurant_confirmed: bool,
    pub cancelled: bool,
    pub cancelled_at: Option<i64>, // timestamp unix
    pub cancelled_by: Option<String>,
    pub confirmation_token: String,
    pub created_at: i64, // timestamp unix
    pub version: i64,
}

impl From<&Reserva> for ReservaDoc {
    fn from(r: &Reserva) -> Self {
        Self {
            id: r.id,
            nombre: r.nombre.clone(),
            telefono: r.telefono.clone(),
            personas: i64::from(r.personas),
            fecha: fecha_key(r.fecha),
            hora: hora_key(r.hora),
            notas: r.notas.clone(),
            user_confirmed: r.user_confirmed,
            restaurant_confirmed: r.restaurant_confirmed,
            cancelled: r.cancelled,
            cancelled_at: r.cancelled_at.map(|t| t.timestamp()),
            cancelled_by: r.cancelled_by.clone(),
            confirmation_token: r.confirmation_token.clone(),
            created_at: r.created_at.timestamp(),
            version: r.version,
        }
    }
}

impl TryFrom<ReservaDoc> for Reserva {
    type Error = AppError;

    /// Valida el documento en la frontera del almacenamiento
    fn try_from(doc: ReservaDoc) -> AppResult<Self> {
        let corrupt = |field: &str| AppError::Internal(format!("Reserva {} con campo '{}' inválido", doc.id, field));

        Ok(Reserva {
            id: doc.id,
            personas: u32::try_from(doc.personas).map_err(|_| corrupt("personas"))?,
            fecha: NaiveDate::parse_from_str(&doc.fecha, DATE_FORMAT).map_err(|_| corrupt("fecha"))?,
            hora: NaiveTime::parse_from_str(&doc.hora, TIME_FORMAT).map_err(|_| corrupt("hora"))?,
            cancelled_at: doc.cancelled_at.map(timestamp).transpose().map_err(|_| corrupt("cancelled_at"))?,
            created_at: timestamp(doc.created_at).map_err(|_| corrupt("created_at"))?,
            nombre: doc.nombre,
            telefono: doc.telefono,
            notas: doc.notas,
            user_confirmed: doc.user_confirmed,
            restaurant_confirmed: doc.restaurant_confirmed,
            cancelled: doc.cancelled,
            cancelled_by: doc.cancelled_by,
            confirmation_token: doc.confirmation_token,
            version: doc.version,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActionLogDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub reservation_id: i64,
    pub action_type: String,
    pub performed_by: String,
    pub details: Option<String>,
    pub timestamp: i64, // timestamp unix
}

impl From<&ActionLogEntry> for ActionLogDoc {
    fn from(e: &ActionLogEntry) -> Self {
        Self {
            id: e.id,
            reservation_id: e.reservation_id,
            action_type: e.action_type.as_str().to_string(),
            performed_by: e.performed_by.clone(),
            details: e.details.clone(),
            timestamp: e.timestamp.timestamp(),
        }
    }
}

impl TryFrom<ActionLogDoc> for ActionLogEntry {
    type Error = AppError;

    fn try_from(doc: ActionLogDoc) -> AppResult<Self> {
        let action_type = ActionType::parse(&doc.action_type)
            .ok_or_else(|| AppError::Internal(format!("Acción desconocida '{}' en auditoría", doc.action_type)))?;
        Ok(ActionLogEntry {
            id: doc.id,
            reservation_id: doc.reservation_id,
            action_type,
            performed_by: doc.performed_by,
            details: doc.details,
            timestamp: timestamp(doc.timestamp)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BlockedHourDoc {
    pub fecha: String,
    pub hora: String,
}

/// Tarjeta publicada; `reservation_id` permite borrar en cascada
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CardDoc {
    pub channel: String,
    pub message_id: String,
    pub marker: String,
    pub position: i64,
    pub reservation_id: Option<i64>,
}

impl From<&RenderedCard> for CardDoc {
    fn from(card: &RenderedCard) -> Self {
        Self {
            channel: card.channel.clone(),
            message_id: card.message_id.clone(),
            marker: card.marker.to_string(),
            position: i64::from(card.position),
            reservation_id: card.marker.reservation_id(),
        }
    }
}

impl TryFrom<CardDoc> for RenderedCard {
    type Error = AppError;

    fn try_from(doc: CardDoc) -> AppResult<Self> {
        let marker = CardMarker::parse(&doc.marker)
            .ok_or_else(|| AppError::Internal(format!("Marcador de tarjeta inválido '{}'", doc.marker)))?;
        Ok(RenderedCard {
            channel: doc.channel,
            message_id: doc.message_id,
            marker,
            position: u32::try_from(doc.position).unwrap_or_default(),
        })
    }
}

/// Contadores monótonos (`_id` = nombre de la secuencia)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CounterDoc {
    #[serde(rename = "_id")]
    pub name: String,
    pub seq: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CursorDoc {
    #[serde(rename = "_id")]
    pub name: String,
    pub value: i64,
}

pub fn fecha_key(fecha: NaiveDate) -> String {
    fecha.format(DATE_FORMAT).to_string()
}

pub fn hora_key(hora: NaiveTime) -> String {
    hora.format(TIME_FORMAT).to_string()
}

fn timestamp(secs: i64) -> AppResult<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| AppError::Internal(format!("Timestamp fuera de rango: {secs}")))
}
