//! # Cálculo de disponibilidad
//!
//! `disponibles = plantilla − bloqueadas(fecha)`, ordenadas, y después la
//! poda del mismo día según la hora actual.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::collections::BTreeSet;

/// Hora a partir de la cual empieza el servicio de cena
pub const EVENING_SERVICE_HOUR: u32 = 19;

/// Hora a partir de la cual empieza el servicio de almuerzo
pub const MORNING_SERVICE_HOUR: u32 = 12;

/// Horas reservables para `fecha`
///
/// # Reglas
///
/// - Fecha pasada: ninguna hora.
/// - Hoy antes de las 19:00: solo horas de cena (>= 19:00).
/// - Hoy a partir de las 19:00: ninguna hora.
/// - Fecha futura: plantilla menos bloqueos.
pub fn available_slots(
    template: &[NaiveTime],
    blocked: &[NaiveTime],
    fecha: NaiveDate,
    local_now: NaiveDateTime,
) -> Vec<NaiveTime> {
    let today = local_now.date();
    if fecha < today {
        return Vec::new();
    }

    let blocked: BTreeSet<NaiveTime> = blocked.iter().copied().collect();
    let open = template.iter().copied().filter(|slot| !blocked.contains(slot));
    let mut slots: BTreeSet<NaiveTime> = open.collect();

    if fecha == today {
        if local_now.hour() < EVENING_SERVICE_HOUR {
            slots.retain(|slot| slot.hour() >= EVENING_SERVICE_HOUR);
        } else {
            slots.clear();
        }
    }

    slots.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn template() -> Vec<NaiveTime> {
        vec![t(22, 0), t(13, 0), t(13, 30), t(14, 0), t(14, 30), t(20, 30), t(21, 0), t(21, 30)]
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[test]
    fn future_date_is_template_minus_blocked_sorted() {
        let now = day(15).and_time(t(10, 0));
        let slots = available_slots(&template(), &[t(13, 30), t(21, 0)], day(16), now);
        assert_eq!(slots, vec![t(13, 0), t(14, 0), t(14, 30), t(20, 30), t(21, 30), t(22, 0)]);
    }

    #[test]
    fn past_date_has_no_slots() {
        let now = day(15).and_time(t(10, 0));
        assert!(available_slots(&template(), &[], day(14), now).is_empty());
    }

    #[test]
    fn same_day_before_dinner_keeps_only_evening_slots() {
        let now = day(15).and_time(t(8, 0));
        let slots = available_slots(&template(), &[t(21, 30)], day(15), now);
        assert_eq!(slots, vec![t(20, 30), t(21, 0), t(22, 0)]);
    }

    #[test]
    fn same_day_from_dinner_has_no_slots() {
        let now = day(15).and_time(t(19, 0));
        assert!(available_slots(&template(), &[], day(15), now).is_empty());
    }

    #[test]
    fn calculation_is_deterministic() {
        let now = day(15).and_time(t(12, 0));
        let blocked = [t(14, 0)];
        assert_eq!(
            available_slots(&template(), &blocked, day(20), now),
            available_slots(&template(), &blocked, day(20), now)
        );
    }
}
