//! # Ventanas de servicio
//!
//! Decide si se puede crear una reserva en función del momento actual,
//! independientemente de los bloqueos de horas.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use super::availability::{EVENING_SERVICE_HOUR, MORNING_SERVICE_HOUR};
use super::machine::Rejection;
use super::reservation::{parse_fecha, parse_hora};
use crate::api::AppResult;

/// Ventana en la que se encuentra el reloj del restaurante
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceWindow {
    /// 00:00–11:59
    BeforeMorning,
    /// 12:00–18:59
    Morning,
    /// 19:00–23:59
    Evening,
}

impl ServiceWindow {
    pub fn at(now: NaiveTime) -> Self {
        match now.hour() {
            h if h < MORNING_SERVICE_HOUR => Self::BeforeMorning,
            h if h < EVENING_SERVICE_HOUR => Self::Morning,
            _ => Self::Evening,
        }
    }
}

/// Servicio al que pertenece la hora pedida
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedService {
    Lunch,
    Dinner,
}

impl RequestedService {
    pub fn of(hora: NaiveTime) -> Self {
        if hora.hour() < EVENING_SERVICE_HOUR {
            Self::Lunch
        } else {
            Self::Dinner
        }
    }
}

pub const PAST_DATE: &str = "No puedes reservar en una fecha pasada";
pub const SERVING_LUNCH: &str = "Ya estamos sirviendo el almuerzo. Puedes reservar para esta noche o mañana";
pub const SERVING_DINNER: &str = "Ya estamos sirviendo la cena. Puedes reservar a partir de mañana";

/// Aplica la tabla de ventanas a una petición ya interpretada
pub fn check_booking_window(local_now: NaiveDateTime, fecha: NaiveDate, hora: NaiveTime) -> Result<(), Rejection> {
    let today = local_now.date();

    if fecha < today {
        return Err(Rejection::OutsideBookingWindow(PAST_DATE.to_string()));
    }
    if fecha > today {
        return Ok(());
    }

    match (ServiceWindow::at(local_now.time()), RequestedService::of(hora)) {
        (ServiceWindow::BeforeMorning, _) => Ok(()),
        (ServiceWindow::Morning, RequestedService::Dinner) => Ok(()),
        (ServiceWindow::Morning, RequestedService::Lunch) => {
            Err(Rejection::OutsideBookingWindow(SERVING_LUNCH.to_string()))
        }
        (ServiceWindow::Evening, _) => Err(Rejection::OutsideBookingWindow(SERVING_DINNER.to_string())),
    }
}

/// Contrato textual: `(permitido, motivo)`
///
/// # Errores
///
/// Fecha u hora mal formadas devuelven `Validation` con el motivo del fallo;
/// nunca se asume un valor por defecto.
pub fn is_booking_allowed(local_now: NaiveDateTime, fecha: &str, hora: &str) -> AppResult<(bool, String)> {
    let fecha = parse_fecha(fecha)?;
    let hora = parse_hora(hora)?;

    Ok(match check_booking_window(local_now, fecha, hora) {
        Ok(()) => (true, String::new()),
        Err(rejection) => (false, rejection.to_string()),
    })
}
