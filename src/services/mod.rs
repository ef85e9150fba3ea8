//! # Servicios
//!
//! Capa de orquestación entre la API y el dominio:
//!
//! - [`reservations`] - Ciclo de vida completo de una reserva
//! - [`schedule`] - Plantilla de horas, bloqueos y disponibilidad
//! - [`notifications`] - Plantillas de SMS, cola y gateways
//! - [`retention`] - Limpieza diaria de registros antiguos

pub mod notifications;
pub mod reservations;
pub mod retention;
pub mod schedule;

pub use notifications::{
    gateway_from_config, DeliveryHandle, MessageTemplates, NotificationEvent, Outbox, OutboxWorker, SimulatedSms,
    SmsGateway,
};
pub use reservations::{CreatedReservation, ReservationService, TokenView, TransitionOutcome};
pub use retention::RetentionSweep;
pub use schedule::ScheduleService;
