//! # Registro de acciones
//!
//! Una fila por transición. Solo se añade; la limpieza por antigüedad es el
//! único borrado.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::machine::Actor;
use super::reservation::ReservationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Created,
    UserConfirmed,
    RestaurantConfirmed,
    Cancelled,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Created => "created",
            ActionType::UserConfirmed => "user_confirmed",
            ActionType::RestaurantConfirmed => "restaurant_confirmed",
            ActionType::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "user_confirmed" => Some(Self::UserConfirmed),
            "restaurant_confirmed" => Some(Self::RestaurantConfirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entrada persistida; `id` es monótono en orden de commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: i64,
    pub reservation_id: ReservationId,
    pub action_type: ActionType,
    pub performed_by: String,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Entrada pendiente de escribir junto con la mutación que la provoca
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    pub action_type: ActionType,
    pub performed_by: String,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditDraft {
    pub fn new(action_type: ActionType, actor: &Actor, details: Option<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            action_type,
            performed_by: actor.as_str().to_string(),
            details,
            timestamp,
        }
    }

    pub fn into_entry(self, id: i64, reservation_id: ReservationId) -> ActionLogEntry {
        ActionLogEntry {
            id,
            reservation_id,
            action_type: self.action_type,
            performed_by: self.performed_by,
            details: self.details,
            timestamp: self.timestamp,
        }
    }
}
