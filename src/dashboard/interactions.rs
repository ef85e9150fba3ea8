//! # Interacciones del panel
//!
//! Botones, formularios y comandos que llegan desde la plataforma de chat,
//! ya traducidos a [`InteractionEvent`]. Las acciones sobre reservas pasan
//! por [`ReservationService`], que avisa al bucle de sincronización tras
//! cada commit.
//!
//! ## Identificadores de botón
//!
//! | custom_id            | efecto                                 |
//! |----------------------|----------------------------------------|
//! | `approve:<id>`       | aprueba un grupo grande                |
//! | `cancel:<id>`        | abre el formulario de motivo           |
//! | `cancel_reason:<id>` | envío del formulario: cancela          |
//! | `phone:<id>`         | muestra el teléfono solo a quien pulsa |

use std::fmt;
use std::sync::Arc;

use super::reconcile::{Reconciler, RunMode};
use crate::api::AppError;
use crate::domain::{Actor, ReservationId};
use crate::services::ReservationService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomId {
    Approve(ReservationId),
    Cancel(ReservationId),
    CancelReason(ReservationId),
    Phone(ReservationId),
}

impl CustomId {
    pub fn parse(raw: &str) -> Option<Self> {
        let (kind, id) = raw.split_once(':')?;
        let id: ReservationId = id.parse().ok()?;
        match kind {
            "approve" => Some(Self::Approve(id)),
            "cancel" => Some(Self::Cancel(id)),
            "cancel_reason" => Some(Self::CancelReason(id)),
            "phone" => Some(Self::Phone(id)),
            _ => None,
        }
    }
}

impl fmt::Display for CustomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve(id) => write!(f, "approve:{id}"),
            Self::Cancel(id) => write!(f, "cancel:{id}"),
            Self::CancelReason(id) => write!(f, "cancel_reason:{id}"),
            Self::Phone(id) => write!(f, "phone:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionEvent {
    Ping,
    Button { custom_id: String, user: String },
    FormSubmit {
        custom_id: String,
        user: String,
        reason: Option<String>,
    },
    Command { name: String, user: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionReply {
    Pong,
    Message { content: String, ephemeral: bool },
    /// Formulario de texto libre; su envío vuelve con `custom_id`
    ReasonPrompt { custom_id: String, title: String, label: String },
}

impl InteractionReply {
    fn private(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            ephemeral: true,
        }
    }
}

pub struct InteractionHandler {
    reservations: Arc<ReservationService>,
    reconciler: Arc<Reconciler>,
}

impl InteractionHandler {
    pub fn new(reservations: Arc<ReservationService>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            reservations,
            reconciler,
        }
    }

    pub async fn handle(&self, event: InteractionEvent) -> InteractionReply {
        match event {
            InteractionEvent::Ping => InteractionReply::Pong,
            InteractionEvent::Button { custom_id, user } => self.button(&custom_id, user).await,
            InteractionEvent::FormSubmit {
                custom_id,
                user,
                reason,
            } => match CustomId::parse(&custom_id) {
                Some(CustomId::CancelReason(id)) => self.cancel(id, user, reason).await,
                _ => unknown(&custom_id),
            },
            InteractionEvent::Command { name, user } => self.command(&name, &user).await,
        }
    }

    async fn button(&self, custom_id: &str, user: String) -> InteractionReply {
        match CustomId::parse(custom_id) {
            Some(CustomId::Approve(id)) => match self.reservations.approve(id, &Actor::Staff(user.clone())).await {
                Ok(outcome) => InteractionReply::private(format!(
                    "✅ Reserva #{id} aprobada por {user} ({}, {} pers.)",
                    outcome.reserva.nombre, outcome.reserva.personas
                )),
                Err(e) => failure(id, e),
            },
            Some(CustomId::Cancel(id)) => InteractionReply::ReasonPrompt {
                custom_id: CustomId::CancelReason(id).to_string(),
                title: "Confirmar Cancelación".to_string(),
                label: "Motivo (opcional)".to_string(),
            },
            Some(CustomId::Phone(id)) => match self.reservations.get(id).await {
                Ok(r) => InteractionReply::private(format!("📞 {}: {}", r.nombre, r.telefono)),
                Err(e) => failure(id, e),
            },
            _ => unknown(custom_id),
        }
    }

    async fn cancel(&self, id: ReservationId, user: String, reason: Option<String>) -> InteractionReply {
        match self.reservations.cancel(id, &Actor::Staff(user.clone()), reason).await {
            Ok(outcome) => InteractionReply::private(format!(
                "❌ Reserva #{id} cancelada por {user}. Motivo: {}",
                outcome.audit.details.unwrap_or_default()
            )),
            Err(e) => failure(id, e),
        }
    }

    async fn command(&self, name: &str, user: &str) -> InteractionReply {
        match name {
            "sync" => {
                tracing::info!(requested_by = %user, "Forced dashboard resync");
                let reconciler = self.reconciler.clone();
                tokio::spawn(async move {
                    reconciler.reconcile_all(RunMode::Forced).await;
                });
                InteractionReply::private("🔄 Sincronizando canales...")
            }
            "stats" => match self.reservations.stats().await {
                Ok(s) => InteractionReply::private(format!(
                    "📊 Activas: {} · ✅ Confirmadas: {} · ⏳ Pendientes: {} · ❌ Canceladas: {}",
                    s.total_active, s.confirmed, s.pending, s.cancelled
                )),
                Err(e) => {
                    tracing::error!(error = %e, "Stats command failed");
                    InteractionReply::private(e.user_message())
                }
            },
            other => unknown(other),
        }
    }
}

fn failure(id: ReservationId, error: AppError) -> InteractionReply {
    match &error {
        AppError::Rejected(_) | AppError::NotFoundWithId { .. } => {
            tracing::info!(reservation_id = id, error = %error, "Dashboard action rejected");
        }
        _ => tracing::error!(reservation_id = id, error = %error, "Dashboard action failed"),
    }
    InteractionReply::private(format!("⚠️ Reserva #{id}: {}", error.user_message()))
}

fn unknown(what: &str) -> InteractionReply {
    tracing::warn!(interaction = %what, "Unknown dashboard interaction");
    InteractionReply::private("Acción desconocida")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_ids_round_trip() {
        for id in [CustomId::Approve(3), CustomId::Cancel(4), CustomId::CancelReason(5), CustomId::Phone(6)] {
            assert_eq!(CustomId::parse(&id.to_string()), Some(id));
        }
        assert_eq!(CustomId::parse("approve:x"), None);
        assert_eq!(CustomId::parse("delete:3"), None);
        assert_eq!(CustomId::parse("sync"), None);
    }
}
