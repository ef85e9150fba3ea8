//! # Servicio de reservas
//!
//! Orquesta cada operación del ciclo de vida:
//!
//! ```text
//! validar → máquina de estados → commit atómico (CAS + auditoría)
//!         → notificaciones (cola) → aviso al panel
//! ```
//!
//! Nada posterior al commit puede deshacerlo: un SMS fallido o un panel
//! caído solo se registran.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::notifications::{DeliveryHandle, MessageTemplates, NotificationEvent, Outbox};
use super::schedule::ScheduleService;
use crate::api::{AppError, AppResult};
use crate::clock::Clock;
use crate::dashboard::SyncTrigger;
use crate::db::{NewReservation, ReservationFilter, ReservationStore, StatusFilter};
use crate::domain::booking_window::check_booking_window;
use crate::domain::machine::transition;
use crate::domain::reservation::is_large_group;
use crate::domain::{
    generate_token, ActionLogEntry, ActionType, Actor, AuditDraft, Rejection, Reserva, ReservationId,
    ReservationRequest, ReservationState, ReservationStatus, Transition, DATE_FORMAT,
};

/// Intentos de alta ante colisión de token
const TOKEN_ATTEMPTS: usize = 3;

/// Relecturas ante escrituras concurrentes sobre la misma reserva
const CAS_ATTEMPTS: usize = 5;

pub const ADMIN_CANCEL_REASON: &str = "Cancelado desde panel admin";
pub const STAFF_CANCEL_REASON: &str = "Sin motivo especificado";

pub type TokenSource = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Debug)]
pub struct CreatedReservation {
    pub reserva: Reserva,
    pub large_group: bool,
    /// Entrega del SMS al cliente
    pub delivery: Option<DeliveryHandle>,
}

#[derive(Debug)]
pub struct TransitionOutcome {
    pub reserva: Reserva,
    pub audit: ActionLogEntry,
    pub delivery: Option<DeliveryHandle>,
}

/// Lo que la página del enlace debe mostrar para un token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenView {
    AwaitingConfirmation(Reserva),
    Confirmed(Reserva),
    /// Token desconocido, reserva cancelada o enlace caducado
    Invalid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_active: usize,
    pub confirmed: usize,
    pub pending: usize,
    pub awaiting_customer: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: String,
    pub day: u32,
    pub confirmed_count: usize,
    pub pending_count: usize,
    #[serde(rename = "otherMonth")]
    pub other_month: bool,
    #[serde(rename = "isToday")]
    pub is_today: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarMonth {
    pub year: i32,
    pub month: u32,
    pub days: Vec<CalendarDay>,
}

pub struct ReservationService {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    schedule: Arc<ScheduleService>,
    templates: MessageTemplates,
    outbox: Outbox,
    trigger: SyncTrigger,
    large_group_threshold: u32,
    confirm_grace: Duration,
    tokens: TokenSource,
}

impl ReservationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        schedule: Arc<ScheduleService>,
        templates: MessageTemplates,
        outbox: Outbox,
        trigger: SyncTrigger,
        large_group_threshold: u32,
        confirm_grace: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            schedule,
            templates,
            outbox,
            trigger,
            large_group_threshold,
            confirm_grace,
            tokens: Arc::new(generate_token),
        }
    }

    /// Sustituye el generador de tokens
    pub fn with_token_source(mut self, tokens: TokenSource) -> Self {
        self.tokens = tokens;
        self
    }

    /// Alta desde el formulario público
    ///
    /// Orden de comprobación: reserva duplicada, ventana de servicio y hora
    /// disponible. El primer fallo se devuelve como [`Rejection`].
    pub async fn create(&self, request: ReservationRequest) -> AppResult<CreatedReservation> {
        let local_now = self.clock.local_now();

        if let Some(existing) = self
            .store
            .find_active_confirmed_for_phone(&request.telefono, local_now.date())
            .await?
        {
            tracing::info!(
                metric = "duplicate_prevented",
                existing_id = existing.id,
                fecha = %request.fecha,
                "Duplicate active booking rejected"
            );
            return Err(Rejection::DuplicateActiveBooking {
                fecha: existing.fecha,
                hora: existing.hora_display(),
            }
            .into());
        }

        check_booking_window(local_now, request.fecha, request.hora)?;

        if !self.schedule.is_slot_available(request.fecha, request.hora).await? {
            return Err(Rejection::SlotUnavailable.into());
        }

        let large_group = is_large_group(request.personas, self.large_group_threshold);
        let reserva = self.insert_with_fresh_token(&request, large_group).await?;

        tracing::info!(
            metric = "reservation_created",
            reservation_id = reserva.id,
            personas = reserva.personas,
            fecha = %reserva.fecha,
            hora = %reserva.hora_display(),
            large_group,
            "Reservation created"
        );

        let messages = self.templates.compose(&NotificationEvent::Created, &reserva);
        let delivery = self.outbox.dispatch(reserva.id, messages);
        self.trigger.kick();

        Ok(CreatedReservation {
            reserva,
            large_group,
            delivery,
        })
    }

    async fn insert_with_fresh_token(&self, request: &ReservationRequest, large_group: bool) -> AppResult<Reserva> {
        let details = format!("Group size: {}, Auto-approved: {}", request.personas, !large_group);
        let initial = ReservationState::initial(large_group);

        for attempt in 1..=TOKEN_ATTEMPTS {
            let now = self.clock.now_utc();
            let new = NewReservation {
                nombre: request.nombre.clone(),
                telefono: request.telefono.clone(),
                personas: request.personas,
                fecha: request.fecha,
                hora: request.hora,
                notas: request.notas.clone(),
                restaurant_confirmed: matches!(initial, ReservationState::AwaitingCustomer { restaurant_approved: true }),
                confirmation_token: (self.tokens)(),
                created_at: now,
            };
            let audit = AuditDraft::new(ActionType::Created, &Actor::WebForm, Some(details.clone()), now);

            match self.store.insert_reservation(new, audit).await {
                Err(AppError::Integrity(message)) => {
                    tracing::warn!(attempt, message = %message, "Token collision on insert, retrying with a new token");
                }
                other => return other,
            }
        }

        Err(AppError::Integrity(format!(
            "No se pudo generar un token único tras {TOKEN_ATTEMPTS} intentos"
        )))
    }

    /// Confirmación del cliente desde el enlace del SMS
    pub async fn confirm_by_token(&self, token: &str) -> AppResult<TransitionOutcome> {
        let reserva = self.by_token(token).await?;
        let (reserva, audit) = self
            .apply(reserva, Transition::CustomerConfirm, &Actor::Customer, Some("Via SMS link".to_string()))
            .await?;

        tracing::info!(
            metric = "user_confirmed",
            reservation_id = reserva.id,
            personas = reserva.personas,
            status = ?reserva.status(),
            "Reservation confirmed by customer"
        );

        Ok(self.after_commit(NotificationEvent::CustomerConfirmed, reserva, audit))
    }

    /// Aprobación de un grupo grande por el restaurante
    pub async fn approve(&self, id: ReservationId, actor: &Actor) -> AppResult<TransitionOutcome> {
        let reserva = self.get(id).await?;
        let details = match actor {
            Actor::Staff(name) => format!("Confirmado por {name}"),
            _ => "Aprobado desde panel admin".to_string(),
        };
        let (reserva, audit) = self
            .apply(reserva, Transition::RestaurantApprove, actor, Some(details))
            .await?;

        tracing::info!(
            metric = "reservation_approved",
            reservation_id = reserva.id,
            personas = reserva.personas,
            approved_by = %actor,
            "Reservation approved by restaurant"
        );

        Ok(self.after_commit(NotificationEvent::RestaurantApproved, reserva, audit))
    }

    /// Cancelación desde administración o desde el panel de chat
    pub async fn cancel(&self, id: ReservationId, actor: &Actor, reason: Option<String>) -> AppResult<TransitionOutcome> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| match actor {
                Actor::Staff(_) => STAFF_CANCEL_REASON.to_string(),
                _ => ADMIN_CANCEL_REASON.to_string(),
            });

        let reserva = self.get(id).await?;
        let (reserva, audit) = self
            .apply(reserva, Transition::Cancel, actor, Some(reason.clone()))
            .await?;

        tracing::info!(
            metric = "reservation_cancelled",
            reservation_id = reserva.id,
            personas = reserva.personas,
            cancelled_by = %actor,
            reason = %reason,
            "Reservation cancelled by staff"
        );

        Ok(self.after_commit(NotificationEvent::CancelledByStaff { reason }, reserva, audit))
    }

    /// Cancelación del cliente desde su enlace; válida mientras no esté cancelada
    pub async fn cancel_by_token(&self, token: &str) -> AppResult<TransitionOutcome> {
        let reserva = self.by_token(token).await?;
        let (reserva, audit) = self
            .apply(
                reserva,
                Transition::Cancel,
                &Actor::Customer,
                Some("Via cancellation link".to_string()),
            )
            .await?;

        tracing::info!(
            metric = "reservation_cancelled",
            reservation_id = reserva.id,
            personas = reserva.personas,
            cancelled_by = "customer",
            "Reservation cancelled by customer"
        );

        Ok(self.after_commit(NotificationEvent::CancelledByCustomer, reserva, audit))
    }

    /// Estado del enlace para la página de confirmación
    pub async fn token_view(&self, token: &str) -> AppResult<TokenView> {
        let Some(reserva) = self.store.find_by_token(token).await? else {
            return Ok(TokenView::Invalid);
        };
        Ok(match reserva.status() {
            ReservationStatus::Cancelled => TokenView::Invalid,
            ReservationStatus::AwaitingRestaurant | ReservationStatus::FullyConfirmed => TokenView::Confirmed(reserva),
            ReservationStatus::AwaitingCustomer => {
                if reserva.confirmation_open(self.clock.local_now(), self.confirm_grace) {
                    TokenView::AwaitingConfirmation(reserva)
                } else {
                    TokenView::Invalid
                }
            }
        })
    }

    pub async fn get(&self, id: ReservationId) -> AppResult<Reserva> {
        self.store
            .get_reservation(id)
            .await?
            .ok_or_else(|| AppError::not_found_id("Reserva", id))
    }

    pub async fn list(&self, filter: &ReservationFilter) -> AppResult<Vec<Reserva>> {
        self.store.list_reservations(filter).await
    }

    /// Borrado administrativo con sus filas de auditoría y tarjetas
    pub async fn delete(&self, id: ReservationId) -> AppResult<()> {
        if !self.store.delete_reservation(id).await? {
            return Err(AppError::not_found_id("Reserva", id));
        }
        tracing::info!(metric = "reservation_deleted", reservation_id = id, "Reservation deleted");
        self.trigger.kick();
        Ok(())
    }

    pub async fn stats(&self) -> AppResult<Stats> {
        let rows = self.store.list_reservations(&ReservationFilter::default()).await?;
        let mut stats = Stats::default();
        for r in &rows {
            match r.status() {
                ReservationStatus::FullyConfirmed => stats.confirmed += 1,
                ReservationStatus::AwaitingRestaurant => stats.pending += 1,
                ReservationStatus::AwaitingCustomer => stats.awaiting_customer += 1,
                ReservationStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.total_active = rows.len() - stats.cancelled;
        Ok(stats)
    }

    /// Rejilla del mes empezando en lunes, con días de relleno
    pub async fn calendar(&self, year: i32, month: u32) -> AppResult<CalendarMonth> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| AppError::Validation(format!("Mes inválido: {month}/{year}")))?;
        let next_month = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(|| AppError::Validation(format!("Mes inválido: {month}/{year}")))?;

        let days_in_month = (next_month - first).num_days();
        let days_before = i64::from(first.weekday().num_days_from_monday());
        let days_after = (7 - (days_before + days_in_month) % 7) % 7;

        let start = first - Duration::days(days_before);
        let end = next_month + Duration::days(days_after - 1);

        let rows = self
            .store
            .list_reservations(&ReservationFilter::between(start, end).with_status(StatusFilter::Active))
            .await?;
        let mut counts: HashMap<NaiveDate, (usize, usize)> = HashMap::new();
        for r in &rows {
            let entry = counts.entry(r.fecha).or_default();
            match r.status() {
                ReservationStatus::FullyConfirmed => entry.0 += 1,
                ReservationStatus::AwaitingRestaurant => entry.1 += 1,
                _ => {}
            }
        }

        let today = self.clock.today();
        let days = start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|d| {
                let (confirmed_count, pending_count) = counts.get(&d).copied().unwrap_or_default();
                CalendarDay {
                    date: d.format(DATE_FORMAT).to_string(),
                    day: d.day(),
                    confirmed_count,
                    pending_count,
                    other_month: d.month() != month,
                    is_today: d == today,
                }
            })
            .collect();

        Ok(CalendarMonth { year, month, days })
    }

    pub async fn audit_after(&self, after: i64, limit: usize) -> AppResult<Vec<ActionLogEntry>> {
        self.store.audit_after(after, limit).await
    }

    pub async fn audit_for(&self, id: ReservationId) -> AppResult<Vec<ActionLogEntry>> {
        self.store.audit_for_reservation(id).await
    }

    async fn by_token(&self, token: &str) -> AppResult<Reserva> {
        self.store
            .find_by_token(token)
            .await?
            .ok_or_else(|| AppError::NotFound("Enlace no válido".to_string()))
    }

    /// Evalúa y confirma una transición con compare-and-swap
    ///
    /// Si otro escritor se adelanta se relee la reserva y se vuelve a
    /// evaluar, así que el segundo de dos confirmaciones simultáneas recibe
    /// `AlreadyConfirmed`.
    async fn apply(
        &self,
        mut current: Reserva,
        requested: Transition,
        actor: &Actor,
        details: Option<String>,
    ) -> AppResult<(Reserva, ActionLogEntry)> {
        for attempt in 1..=CAS_ATTEMPTS {
            let next = transition(current.state(), requested)?;
            if requested == Transition::CustomerConfirm
                && !current.confirmation_open(self.clock.local_now(), self.confirm_grace)
            {
                return Err(Rejection::LinkExpired.into());
            }

            let now = self.clock.now_utc();
            let mut updated = current.clone();
            updated.apply_state(next);
            if next == ReservationState::Cancelled {
                updated.cancelled_at = Some(now);
                updated.cancelled_by = Some(actor.as_str().to_string());
            }
            updated.version = current.version + 1;

            let audit = AuditDraft::new(action_for(requested), actor, details.clone(), now);
            match self.store.commit_transition(&updated, current.version, audit).await? {
                Some(entry) => return Ok((updated, entry)),
                None => {
                    tracing::debug!(
                        reservation_id = current.id,
                        transition = %requested,
                        attempt,
                        "Concurrent update detected, re-evaluating"
                    );
                    current = self.get(current.id).await?;
                }
            }
        }

        Err(AppError::Integrity(format!(
            "Reserva {}: demasiadas escrituras concurrentes",
            current.id
        )))
    }

    fn after_commit(&self, event: NotificationEvent, reserva: Reserva, audit: ActionLogEntry) -> TransitionOutcome {
        let messages = self.templates.compose(&event, &reserva);
        let delivery = self.outbox.dispatch(reserva.id, messages);
        self.trigger.kick();
        TransitionOutcome {
            reserva,
            audit,
            delivery,
        }
    }
}

fn action_for(requested: Transition) -> ActionType {
    match requested {
        Transition::CustomerConfirm => ActionType::UserConfirmed,
        Transition::RestaurantApprove => ActionType::RestaurantConfirmed,
        Transition::Cancel => ActionType::Cancelled,
    }
}
