//! # Dominio de reservas
//!
//! Tipos y reglas puras, sin E/S:
//!
//! - [`reservation`] - Entidad `Reserva`, normalización de teléfonos y tokens
//! - [`machine`] - Estados del ciclo de vida y sus transiciones legales
//! - [`availability`] - Cálculo de horas reservables para una fecha
//! - [`booking_window`] - Ventanas de servicio que permiten o no reservar hoy
//! - [`audit`] - Entradas del registro de acciones

pub mod audit;
pub mod availability;
pub mod booking_window;
pub mod machine;
pub mod reservation;

pub use audit::{ActionLogEntry, ActionType, AuditDraft};
pub use machine::{Actor, Rejection, ReservationState, ReservationStatus, Transition};
pub use reservation::{
    canonical_phone, generate_token, mask_phone, parse_fecha, parse_hora, Reserva, ReservationId, ReservationRequest,
};

/// Formato de fecha aceptado en la API y en el almacenamiento
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Formato de hora aceptado en la API y en el almacenamiento
pub const TIME_FORMAT: &str = "%H:%M";

/// Formato de fecha para mensajes al cliente (DD/MM/YYYY)
pub const DISPLAY_DATE_FORMAT: &str = "%d/%m/%Y";
