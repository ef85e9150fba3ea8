//! # Entidad Reserva
//!
//! La reserva es el único agregado con estado del sistema. Sus banderas de
//! confirmación solo cambian a través de [`crate::domain::machine`].

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::machine::{ReservationState, ReservationStatus};
use super::{DATE_FORMAT, DISPLAY_DATE_FORMAT, TIME_FORMAT};
use crate::api::{AppError, AppResult};

pub type ReservationId = i64;

/// Reserva tal y como vive en el almacenamiento
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserva {
    /// Identificador monótono asignado al crear
    pub id: ReservationId,
    pub nombre: String,
    /// Teléfono canónico (`+` seguido de dígitos)
    pub telefono: String,
    pub personas: u32,
    pub fecha: NaiveDate,
    pub hora: NaiveTime,
    pub notas: Option<String>,
    /// El cliente pulsó el enlace del SMS
    pub user_confirmed: bool,
    /// El restaurante aprobó (automático para grupos pequeños)
    pub restaurant_confirmed: bool,
    pub cancelled: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// "customer", "admin" o la identidad del empleado
    pub cancelled_by: Option<String>,
    /// Credencial de los enlaces de confirmación y cancelación
    #[serde(skip_serializing)]
    pub confirmation_token: String,
    pub created_at: DateTime<Utc>,
    /// Contador para compare-and-swap; se incrementa en cada transición
    #[serde(skip_serializing)]
    pub version: i64,
}

impl Reserva {
    pub fn state(&self) -> ReservationState {
        ReservationState::from_flags(self.user_confirmed, self.restaurant_confirmed, self.cancelled)
    }

    pub fn status(&self) -> ReservationStatus {
        self.state().status()
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled
    }

    pub fn is_large_group(&self, threshold: u32) -> bool {
        is_large_group(self.personas, threshold)
    }

    /// Momento de la reserva en hora local del restaurante
    pub fn slot(&self) -> NaiveDateTime {
        self.fecha.and_time(self.hora)
    }

    /// Un enlace de confirmación sigue siendo útil hasta `slot + grace`
    pub fn confirmation_open(&self, local_now: NaiveDateTime, grace: Duration) -> bool {
        local_now <= self.slot() + grace
    }

    pub fn fecha_display(&self) -> String {
        self.fecha.format(DISPLAY_DATE_FORMAT).to_string()
    }

    pub fn hora_display(&self) -> String {
        self.hora.format(TIME_FORMAT).to_string()
    }

    /// Aplica un estado producido por la máquina de estados
    ///
    /// La cancelación conserva las banderas de confirmación previas, igual que
    /// el registro histórico; solo marca `cancelled`.
    pub fn apply_state(&mut self, next: ReservationState) {
        match next {
            ReservationState::AwaitingCustomer { restaurant_approved } => {
                self.user_confirmed = false;
                self.restaurant_confirmed = restaurant_approved;
            }
            ReservationState::AwaitingRestaurant => {
                self.user_confirmed = true;
                self.restaurant_confirmed = false;
            }
            ReservationState::FullyConfirmed => {
                self.user_confirmed = true;
                self.restaurant_confirmed = true;
            }
            ReservationState::Cancelled => {
                self.cancelled = true;
            }
        }
    }
}

/// Grupo grande: necesita aprobación explícita del restaurante
pub fn is_large_group(personas: u32, threshold: u32) -> bool {
    personas > threshold
}

/// Datos validados para crear una reserva
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub nombre: String,
    pub telefono: String,
    pub personas: u32,
    pub fecha: NaiveDate,
    pub hora: NaiveTime,
    pub notas: Option<String>,
}

impl ReservationRequest {
    /// Valida campos en bruto tal y como llegan del formulario público
    ///
    /// # Errores
    ///
    /// - `ValidationWithField` si falta un campo o está vacío
    /// - `Validation` si la fecha, la hora o el número de personas no se
    ///   pueden interpretar
    pub fn parse(
        nombre: Option<&str>,
        telefono: Option<&str>,
        personas: Option<&str>,
        fecha: Option<&str>,
        hora: Option<&str>,
        notas: Option<&str>,
    ) -> AppResult<Self> {
        let nombre = required("nombre", nombre)?;
        let telefono = required("telefono", telefono)?;
        let personas_raw = required("personas", personas)?;
        let fecha_raw = required("fecha", fecha)?;
        let hora_raw = required("hora", hora)?;

        let personas: u32 = personas_raw
            .parse()
            .map_err(|_| AppError::validation_field("personas", "debe ser un número entero"))?;
        if personas == 0 {
            return Err(AppError::validation_field("personas", "debe ser mayor que 0"));
        }

        let telefono = canonical_phone(telefono);
        if telefono.len() < 2 {
            return Err(AppError::validation_field("telefono", "no contiene dígitos"));
        }

        Ok(Self {
            nombre: nombre.to_string(),
            telefono,
            personas,
            fecha: parse_fecha(fecha_raw)?,
            hora: parse_hora(hora_raw)?,
            notas: notas.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
        })
    }
}

fn required<'a>(field: &str, value: Option<&'a str>) -> AppResult<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::ValidationWithField {
            field: field.to_string(),
            message: format!("Campo requerido: {field}"),
        }),
    }
}

/// Interpreta una fecha `YYYY-MM-DD`
pub fn parse_fecha(raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|e| {
        AppError::Validation(format!("Formato de fecha inválido '{raw}', use YYYY-MM-DD: {e}"))
    })
}

/// Interpreta una hora `HH:MM`
pub fn parse_hora(raw: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT).map_err(|e| {
        AppError::Validation(format!("Formato de hora inválido '{raw}', use HH:MM: {e}"))
    })
}

/// Normaliza un teléfono a la forma internacional `+<dígitos>`
///
/// Elimina espacios, guiones y paréntesis y antepone `+` si falta.
/// No intenta deducir el prefijo de país.
pub fn canonical_phone(raw: &str) -> String {
    let clean: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if clean.starts_with('+') {
        clean
    } else {
        format!("+{clean}")
    }
}

/// Token secreto de los enlaces del cliente (122 bits aleatorios)
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Oculta el teléfono salvo los tres últimos dígitos
pub fn mask_phone(telefono: &str) -> String {
    let visible: String = telefono
        .chars()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("••••••{visible}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn phone_is_canonicalized() {
        assert_eq!(canonical_phone("600 111 222"), "+600111222");
        assert_eq!(canonical_phone("+34 (600) 00-00-00"), "+34600000000");
        assert_eq!(canonical_phone("+34600000000"), "+34600000000");
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn request_requires_every_field() {
        let err = ReservationRequest::parse(
            Some("Ana"),
            Some("  "),
            Some("2"),
            Some("2026-10-16"),
            Some("20:30"),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("telefono"));
    }

    #[test]
    fn request_rejects_malformed_date_and_size() {
        assert_err!(ReservationRequest::parse(
            Some("Ana"),
            Some("600111222"),
            Some("2"),
            Some("16/10/2026"),
            Some("20:30"),
            None,
        ));
        assert_err!(ReservationRequest::parse(
            Some("Ana"),
            Some("600111222"),
            Some("0"),
            Some("2026-10-16"),
            Some("20:30"),
            None,
        ));
    }

    #[test]
    fn request_parses_valid_input() {
        let req = assert_ok!(ReservationRequest::parse(
            Some(" Ana "),
            Some("600 111 222"),
            Some("2"),
            Some("2026-10-16"),
            Some("20:30"),
            Some("   "),
        ));
        assert_eq!(req.nombre, "Ana");
        assert_eq!(req.telefono, "+600111222");
        assert_eq!(req.hora, NaiveTime::from_hms_opt(20, 30, 0).unwrap());
        assert_eq!(req.notas, None);
    }

    #[test]
    fn large_group_threshold_is_exclusive() {
        assert!(!is_large_group(4, 4));
        assert!(is_large_group(5, 4));
    }

    #[test]
    fn phone_mask_keeps_last_digits() {
        assert_eq!(mask_phone("+600111222"), "••••••222");
    }
}
