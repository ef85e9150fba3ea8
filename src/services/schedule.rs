//! Horario: plantilla de horas por defecto + bloqueos por fecha

use chrono::NaiveDate;
use chrono::NaiveTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::{AppError, AppResult};
use crate::clock::Clock;
use crate::config::{format_hours, DefaultHours};
use crate::dashboard::SyncTrigger;
use crate::db::{ReservationFilter, ReservationStore, StatusFilter};
use crate::domain::availability::available_slots;
use crate::domain::{DATE_FORMAT, TIME_FORMAT};

/// Respuesta de la consulta pública de disponibilidad
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub hours: Vec<String>,
    pub all_blocked: bool,
}

/// Vista de administración de una fecha
#[derive(Debug, Clone, Serialize)]
pub struct HoursOverview {
    pub fecha: String,
    pub default_hours: Vec<String>,
    pub blocked: Vec<String>,
    /// Plantilla menos bloqueos, sin la poda del mismo día
    pub available: Vec<String>,
    /// Reservas activas por hora
    pub reservation_counts: BTreeMap<String, usize>,
}

pub struct ScheduleService {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    default_hours: Arc<DefaultHours>,
    trigger: SyncTrigger,
}

impl ScheduleService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        default_hours: Arc<DefaultHours>,
        trigger: SyncTrigger,
    ) -> Self {
        Self {
            store,
            clock,
            default_hours,
            trigger,
        }
    }

    pub fn default_hours(&self) -> Vec<NaiveTime> {
        self.default_hours.current()
    }

    /// Sustituye la plantilla; devuelve la lista guardada (ordenada)
    pub fn set_default_hours(&self, hours: Vec<NaiveTime>) -> AppResult<Vec<NaiveTime>> {
        let stored = self.default_hours.replace(hours)?;
        self.trigger.kick();
        Ok(stored)
    }

    /// Horas reservables ahora mismo para `fecha`
    pub async fn available_slots(&self, fecha: NaiveDate) -> AppResult<Vec<NaiveTime>> {
        let blocked = self.store.blocked_hours(fecha).await?;
        Ok(available_slots(
            &self.default_hours.current(),
            &blocked,
            fecha,
            self.clock.local_now(),
        ))
    }

    pub async fn availability(&self, fecha: NaiveDate) -> AppResult<Availability> {
        let slots = self.available_slots(fecha).await?;
        Ok(Availability {
            all_blocked: slots.is_empty(),
            hours: format_hours(&slots),
        })
    }

    pub async fn is_slot_available(&self, fecha: NaiveDate, hora: NaiveTime) -> AppResult<bool> {
        Ok(self.available_slots(fecha).await?.contains(&hora))
    }

    pub async fn overview(&self, fecha: NaiveDate) -> AppResult<HoursOverview> {
        let template = self.default_hours.current();
        let blocked = self.store.blocked_hours(fecha).await?;
        let available: Vec<NaiveTime> = template.iter().copied().filter(|h| !blocked.contains(h)).collect();

        let active = self
            .store
            .list_reservations(&ReservationFilter::on(fecha).with_status(StatusFilter::Active))
            .await?;
        let mut reservation_counts = BTreeMap::new();
        for r in &active {
            *reservation_counts.entry(r.hora.format(TIME_FORMAT).to_string()).or_insert(0) += 1;
        }

        Ok(HoursOverview {
            fecha: fecha.format(DATE_FORMAT).to_string(),
            default_hours: format_hours(&template),
            blocked: format_hours(&blocked),
            available: format_hours(&available),
            reservation_counts,
        })
    }

    pub async fn block(&self, fecha: NaiveDate, hora: NaiveTime) -> AppResult<()> {
        if !self.store.block_hour(fecha, hora).await? {
            return Err(AppError::Validation("Ya está bloqueada".to_string()));
        }
        tracing::info!(%fecha, hora = %hora.format(TIME_FORMAT), "Hour blocked");
        self.trigger.kick();
        Ok(())
    }

    pub async fn unblock(&self, fecha: NaiveDate, hora: NaiveTime) -> AppResult<()> {
        if !self.store.unblock_hour(fecha, hora).await? {
            return Err(AppError::Validation("No estaba bloqueada".to_string()));
        }
        tracing::info!(%fecha, hora = %hora.format(TIME_FORMAT), "Hour unblocked");
        self.trigger.kick();
        Ok(())
    }

    /// Bloquea todas las horas de la plantilla para `fecha`
    pub async fn block_all(&self, fecha: NaiveDate) -> AppResult<usize> {
        let template = self.default_hours.current();
        self.store.replace_blocked_hours(fecha, &template).await?;
        tracing::info!(%fecha, hours = template.len(), "All hours blocked");
        self.trigger.kick();
        Ok(template.len())
    }

    pub async fn unblock_all(&self, fecha: NaiveDate) -> AppResult<()> {
        self.store.replace_blocked_hours(fecha, &[]).await?;
        tracing::info!(%fecha, "All hours unblocked");
        self.trigger.kick();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::BUILTIN_DEFAULT_HOURS;
    use crate::db::MemoryStore;
    use tokio_test::assert_err;

    fn service(hour: u32) -> ScheduleService {
        let local = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap().and_hms_opt(hour, 0, 0).unwrap();
        let template = BUILTIN_DEFAULT_HOURS
            .iter()
            .map(|h| NaiveTime::parse_from_str(h, TIME_FORMAT).unwrap())
            .collect();
        ScheduleService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FixedClock::at_local(chrono_tz::Europe::Madrid, local)),
            Arc::new(DefaultHours::in_memory(template, "unused.json")),
            SyncTrigger::new(),
        )
    }

    fn tomorrow() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    fn t(raw: &str) -> NaiveTime {
        NaiveTime::parse_from_str(raw, TIME_FORMAT).unwrap()
    }

    #[tokio::test]
    async fn block_then_unblock_restores_the_slot_set() {
        let schedule = service(10);
        let before = schedule.available_slots(tomorrow()).await.unwrap();

        schedule.block(tomorrow(), t("21:00")).await.unwrap();
        let blocked = schedule.available_slots(tomorrow()).await.unwrap();
        assert!(!blocked.contains(&t("21:00")));
        assert_eq!(blocked.len(), before.len() - 1);

        schedule.unblock(tomorrow(), t("21:00")).await.unwrap();
        assert_eq!(schedule.available_slots(tomorrow()).await.unwrap(), before);
    }

    #[tokio::test]
    async fn double_block_and_stray_unblock_are_rejected() {
        let schedule = service(10);
        schedule.block(tomorrow(), t("13:00")).await.unwrap();

        let err = assert_err!(schedule.block(tomorrow(), t("13:00")).await);
        assert_eq!(err.user_message(), "Ya está bloqueada");
        let err = assert_err!(schedule.unblock(tomorrow(), t("14:00")).await);
        assert_eq!(err.user_message(), "No estaba bloqueada");
    }

    #[tokio::test]
    async fn block_all_empties_availability() {
        let schedule = service(10);
        schedule.block(tomorrow(), t("13:00")).await.unwrap();
        assert_eq!(schedule.block_all(tomorrow()).await.unwrap(), 8);

        let availability = schedule.availability(tomorrow()).await.unwrap();
        assert!(availability.all_blocked);

        schedule.unblock_all(tomorrow()).await.unwrap();
        assert_eq!(schedule.availability(tomorrow()).await.unwrap().hours.len(), 8);
    }

    #[tokio::test]
    async fn same_day_keeps_only_dinner_slots() {
        let schedule = service(13);
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let availability = schedule.availability(today).await.unwrap();
        assert_eq!(availability.hours, vec!["20:30", "21:00", "21:30", "22:00"]);

        let overview = schedule.overview(today).await.unwrap();
        assert_eq!(overview.available.len(), 8);
    }

    #[tokio::test]
    async fn availability_is_stable_without_changes() {
        let schedule = service(10);
        let first = schedule.availability(tomorrow()).await.unwrap();
        let second = schedule.availability(tomorrow()).await.unwrap();
        assert_eq!(first, second);
    }
}
