//! # Máquina de estados de la reserva
//!
//! Las dos banderas de confirmación y la de cancelación se leen como un
//! único estado enumerado. Toda mutación pasa por [`transition`], que
//! devuelve el estado siguiente o un [`Rejection`] tipado.
//!
//! ```text
//! AwaitingCustomer{aprobada?} ──CustomerConfirm──▶ AwaitingRestaurant | FullyConfirmed
//!         │    └──RestaurantApprove──▶ AwaitingCustomer{aprobada}
//! AwaitingRestaurant ──RestaurantApprove──▶ FullyConfirmed
//! (cualquiera no terminal) ──Cancel──▶ Cancelled
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Estado completo de una reserva
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservationState {
    /// El cliente aún no ha pulsado el enlace. `restaurant_approved` es
    /// verdadero para grupos pequeños (preaprobados) o tras aprobar.
    AwaitingCustomer { restaurant_approved: bool },
    /// El cliente confirmó; falta la aprobación del restaurante
    AwaitingRestaurant,
    FullyConfirmed,
    /// Terminal
    Cancelled,
}

/// Proyección del estado a la partición de cuatro clases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    AwaitingCustomer,
    AwaitingRestaurant,
    FullyConfirmed,
    Cancelled,
}

impl ReservationState {
    pub fn from_flags(user_confirmed: bool, restaurant_confirmed: bool, cancelled: bool) -> Self {
        match (cancelled, user_confirmed, restaurant_confirmed) {
            (true, _, _) => Self::Cancelled,
            (false, false, approved) => Self::AwaitingCustomer {
                restaurant_approved: approved,
            },
            (false, true, false) => Self::AwaitingRestaurant,
            (false, true, true) => Self::FullyConfirmed,
        }
    }

    pub fn status(self) -> ReservationStatus {
        match self {
            Self::AwaitingCustomer { .. } => ReservationStatus::AwaitingCustomer,
            Self::AwaitingRestaurant => ReservationStatus::AwaitingRestaurant,
            Self::FullyConfirmed => ReservationStatus::FullyConfirmed,
            Self::Cancelled => ReservationStatus::Cancelled,
        }
    }

    /// Estado inicial: los grupos grandes empiezan sin aprobar
    pub fn initial(large_group: bool) -> Self {
        Self::AwaitingCustomer {
            restaurant_approved: !large_group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CustomerConfirm,
    RestaurantApprove,
    Cancel,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transition::CustomerConfirm => "customer_confirm",
            Transition::RestaurantApprove => "restaurant_approve",
            Transition::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// Quién provoca una transición
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Formulario web público
    WebForm,
    /// El cliente a través de su enlace
    Customer,
    /// Panel de administración
    Admin,
    /// Un empleado identificado desde el panel de chat
    Staff(String),
}

impl Actor {
    pub fn as_str(&self) -> &str {
        match self {
            Actor::WebForm => "web_form",
            Actor::Customer => "customer",
            Actor::Admin => "admin",
            Actor::Staff(name) => name,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rechazo de política: la petición es válida pero no se puede cumplir
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Esta reserva ya está cancelada")]
    AlreadyCancelled,

    #[error("Esta reserva ya estaba confirmada")]
    AlreadyConfirmed,

    #[error("Esta reserva ya estaba aprobada")]
    AlreadyApproved,

    #[error("El enlace ha expirado: la reserva ya pasó")]
    LinkExpired,

    #[error("{0}")]
    OutsideBookingWindow(String),

    #[error("Esta hora no está disponible")]
    SlotUnavailable,

    #[error(
        "Ya tienes una reserva activa para el {} a las {hora}. Si necesitas cambiarla, usa el enlace de cancelación que te enviamos por SMS.",
        .fecha.format("%d/%m/%Y")
    )]
    DuplicateActiveBooking { fecha: NaiveDate, hora: String },
}

/// Calcula el estado siguiente de `current` ante `transition`
///
/// Reinvocar una confirmación o aprobación ya aplicada devuelve el rechazo
/// "ya hecho" correspondiente; nunca un éxito silencioso.
pub fn transition(current: ReservationState, requested: Transition) -> Result<ReservationState, Rejection> {
    use ReservationState::*;

    match (current, requested) {
        (Cancelled, _) => Err(Rejection::AlreadyCancelled),

        (AwaitingCustomer { restaurant_approved: true }, Transition::CustomerConfirm) => Ok(FullyConfirmed),
        (AwaitingCustomer { restaurant_approved: false }, Transition::CustomerConfirm) => Ok(AwaitingRestaurant),
        (AwaitingRestaurant | FullyConfirmed, Transition::CustomerConfirm) => Err(Rejection::AlreadyConfirmed),

        (AwaitingCustomer { restaurant_approved: false }, Transition::RestaurantApprove) => {
            Ok(AwaitingCustomer { restaurant_approved: true })
        }
        (AwaitingRestaurant, Transition::RestaurantApprove) => Ok(FullyConfirmed),
        (AwaitingCustomer { restaurant_approved: true } | FullyConfirmed, Transition::RestaurantApprove) => {
            Err(Rejection::AlreadyApproved)
        }

        (_, Transition::Cancel) => Ok(Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_FLAGS: [(bool, bool, bool); 8] = [
        (false, false, false),
        (false, false, true),
        (false, true, false),
        (false, true, true),
        (true, false, false),
        (true, false, true),
        (true, true, false),
        (true, true, true),
    ];

    /// Predicados tal y como se definen sobre las banderas
    fn predicates(user: bool, restaurant: bool, cancelled: bool) -> [bool; 4] {
        [
            !user && !cancelled,
            user && !restaurant && !cancelled,
            user && restaurant && !cancelled,
            cancelled,
        ]
    }

    #[test]
    fn every_flag_combination_falls_in_exactly_one_class() {
        for (user, restaurant, cancelled) in ALL_FLAGS {
            let holds = predicates(user, restaurant, cancelled);
            assert_eq!(holds.iter().filter(|p| **p).count(), 1);

            let expected = match holds.iter().position(|p| *p).unwrap() {
                0 => ReservationStatus::AwaitingCustomer,
                1 => ReservationStatus::AwaitingRestaurant,
                2 => ReservationStatus::FullyConfirmed,
                _ => ReservationStatus::Cancelled,
            };
            assert_eq!(ReservationState::from_flags(user, restaurant, cancelled).status(), expected);
        }
    }

    #[test]
    fn small_party_confirms_straight_to_fully_confirmed() {
        let state = ReservationState::initial(false);
        assert_eq!(transition(state, Transition::CustomerConfirm), Ok(ReservationState::FullyConfirmed));
    }

    #[test]
    fn large_party_needs_both_confirmations_in_any_order() {
        let state = ReservationState::initial(true);

        let customer_first = transition(state, Transition::CustomerConfirm).unwrap();
        assert_eq!(customer_first, ReservationState::AwaitingRestaurant);
        assert_eq!(
            transition(customer_first, Transition::RestaurantApprove),
            Ok(ReservationState::FullyConfirmed)
        );

        let restaurant_first = transition(state, Transition::RestaurantApprove).unwrap();
        assert_eq!(restaurant_first, ReservationState::AwaitingCustomer { restaurant_approved: true });
        assert_eq!(
            transition(restaurant_first, Transition::CustomerConfirm),
            Ok(ReservationState::FullyConfirmed)
        );
    }

    #[test]
    fn repeated_transitions_report_already_done() {
        assert_eq!(
            transition(ReservationState::FullyConfirmed, Transition::CustomerConfirm),
            Err(Rejection::AlreadyConfirmed)
        );
        assert_eq!(
            transition(ReservationState::FullyConfirmed, Transition::RestaurantApprove),
            Err(Rejection::AlreadyApproved)
        );
        assert_eq!(
            transition(ReservationState::initial(false), Transition::RestaurantApprove),
            Err(Rejection::AlreadyApproved)
        );
    }

    #[test]
    fn cancelled_is_terminal() {
        for t in [Transition::CustomerConfirm, Transition::RestaurantApprove, Transition::Cancel] {
            assert_eq!(transition(ReservationState::Cancelled, t), Err(Rejection::AlreadyCancelled));
        }
    }

    #[test]
    fn cancel_is_reachable_from_every_live_state() {
        for state in [
            ReservationState::initial(true),
            ReservationState::initial(false),
            ReservationState::AwaitingRestaurant,
            ReservationState::FullyConfirmed,
        ] {
            assert_eq!(transition(state, Transition::Cancel), Ok(ReservationState::Cancelled));
        }
    }

    #[test]
    fn duplicate_rejection_mentions_existing_booking() {
        let rejection = Rejection::DuplicateActiveBooking {
            fecha: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            hora: "20:30".to_string(),
        };
        assert!(rejection.to_string().contains("16/10/2026 a las 20:30"));
    }
}
