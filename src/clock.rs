//! # Reloj del restaurante
//!
//! Todas las reglas temporales (ventanas de servicio, poda del mismo día,
//! caducidad de enlaces) se evalúan en la hora local del restaurante, no en
//! la del servidor. El reloj se inyecta para que los tests fijen "ahora".

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    /// Instante actual en UTC
    fn now_utc(&self) -> DateTime<Utc>;

    /// Zona horaria del restaurante
    fn timezone(&self) -> Tz;

    /// Fecha y hora de pared en la zona del restaurante
    fn local_now(&self) -> NaiveDateTime {
        self.now_utc().with_timezone(&self.timezone()).naive_local()
    }

    fn today(&self) -> NaiveDate {
        self.local_now().date()
    }
}

/// Reloj de sistema anclado a una zona horaria
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Reloj controlable para tests y simulaciones
///
/// Se construye a partir de una hora local del restaurante y puede
/// adelantarse con [`FixedClock::set_local`].
#[derive(Debug)]
pub struct FixedClock {
    tz: Tz,
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Crea un reloj parado en `local` (hora de pared en `tz`)
    ///
    /// Las horas ambiguas por cambio de horario se resuelven a la más temprana;
    /// las inexistentes se interpretan como UTC.
    pub fn at_local(tz: Tz, local: NaiveDateTime) -> Self {
        Self {
            tz,
            now: Mutex::new(Self::resolve(tz, local)),
        }
    }

    pub fn set_local(&self, local: NaiveDateTime) {
        let resolved = Self::resolve(self.tz, local);
        match self.now.lock() {
            Ok(mut guard) => *guard = resolved,
            Err(poisoned) => *poisoned.into_inner() = resolved,
        }
    }

    fn resolve(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
        local
            .and_local_timezone(tz)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| local.and_utc())
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn fixed_clock_reports_local_wall_time() {
        let local = NaiveDate::from_ymd_opt(2026, 7, 10)
            .unwrap()
            .and_hms_opt(13, 0, 0)
            .unwrap();
        let clock = FixedClock::at_local(chrono_tz::Europe::Madrid, local);

        assert_eq!(clock.local_now(), local);
        // Madrid en verano es UTC+2
        assert_eq!(clock.now_utc().hour(), 11);
    }

    #[test]
    fn fixed_clock_can_be_moved() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let clock = FixedClock::at_local(chrono_tz::Europe::Madrid, day.and_hms_opt(8, 0, 0).unwrap());
        clock.set_local(day.and_hms_opt(21, 15, 0).unwrap());

        assert_eq!(clock.local_now().hour(), 21);
        assert_eq!(clock.today(), day);
    }
}
