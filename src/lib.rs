//! # Monges Reservation
//!
//! Sistema de reservas de un único restaurante: formulario público, doble
//! confirmación (cliente por SMS, personal desde el panel de chat),
//! cancelación y control de horas disponibles.
//!
//! ## Capas
//!
//! ```text
//! api (Actix Web) ──▶ services ──▶ domain (reglas puras)
//!        │               │
//!        │               ├──▶ db (ReservationStore: MongoDB | memoria)
//!        │               └──▶ notificaciones (outbox SMS)
//!        └──▶ dashboard (reconciliación de canales de chat)
//! ```

pub mod api;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod domain;
pub mod services;
pub mod state;

pub use state::AppState;
