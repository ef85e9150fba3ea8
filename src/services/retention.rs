//! Limpieza diaria de registros antiguos
//!
//! Borra reservas con fecha anterior a hoy (con su auditoría y sus
//! tarjetas), auditoría más antigua que `RETENTION_AUDIT_DAYS` y tarjetas
//! huérfanas.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use std::sync::Arc;

use crate::api::AppResult;
use crate::clock::Clock;
use crate::config::RetentionConfig;
use crate::dashboard::SyncTrigger;
use crate::db::{PurgeReport, ReservationStore};

pub struct RetentionSweep {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    trigger: SyncTrigger,
    audit_days: i64,
    run_at: NaiveTime,
}

impl RetentionSweep {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        trigger: SyncTrigger,
        config: &RetentionConfig,
    ) -> Self {
        Self {
            store,
            clock,
            trigger,
            audit_days: config.audit_days,
            run_at: NaiveTime::from_hms_opt(config.run_hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }

    pub async fn run_once(&self) -> AppResult<PurgeReport> {
        let today = self.clock.today();
        let audit_before = self.clock.now_utc() - Duration::days(self.audit_days);

        let report = self.store.purge(today, audit_before).await?;
        tracing::info!(
            metric = "retention_sweep",
            reservations = report.reservations,
            audit_rows = report.audit_rows,
            card_mappings = report.card_mappings,
            "Old records purged"
        );
        if report.reservations > 0 {
            self.trigger.kick();
        }
        Ok(report)
    }

    /// Tiempo hasta la próxima ejecución programada
    pub fn next_run_delay(&self) -> std::time::Duration {
        until_next(self.clock.local_now(), self.run_at)
    }

    /// Bucle diario; no termina nunca
    pub async fn run(self) {
        tracing::info!(run_at = %self.run_at, audit_days = self.audit_days, "Retention sweep scheduled");
        loop {
            tokio::time::sleep(self.next_run_delay()).await;
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "Retention sweep failed");
            }
        }
    }
}

fn until_next(now: NaiveDateTime, run_at: NaiveTime) -> std::time::Duration {
    let mut next = now.date().and_time(run_at);
    if next <= now {
        next += Duration::days(1);
    }
    (next - now).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{MemoryStore, NewReservation};
    use crate::domain::{ActionType, Actor, AuditDraft};
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn next_run_is_today_or_tomorrow() {
        let two = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        assert_eq!(until_next(at(15, 1, 30), two), std::time::Duration::from_secs(30 * 60));
        assert_eq!(until_next(at(15, 2, 0), two), std::time::Duration::from_secs(24 * 3600));
        assert_eq!(until_next(at(15, 23, 0), two), std::time::Duration::from_secs(3 * 3600));
    }

    #[tokio::test]
    async fn sweep_removes_past_reservations_with_their_audit() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::at_local(chrono_tz::Europe::Madrid, at(15, 2, 0)));

        for (day, token) in [(14, "old"), (15, "today")] {
            let new = NewReservation {
                nombre: "Ana".into(),
                telefono: "+34600000000".into(),
                personas: 2,
                fecha: NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
                hora: NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
                notas: None,
                restaurant_confirmed: true,
                confirmation_token: token.into(),
                created_at: clock.now_utc(),
            };
            let audit = AuditDraft::new(ActionType::Created, &Actor::WebForm, None, clock.now_utc());
            store.insert_reservation(new, audit).await.unwrap();
        }

        let sweep = RetentionSweep::new(
            store.clone(),
            clock,
            SyncTrigger::new(),
            &RetentionConfig {
                enabled: true,
                audit_days: 30,
                run_hour: 2,
            },
        );
        let report = sweep.run_once().await.unwrap();
        assert_eq!(report.reservations, 1);
        assert_eq!(report.audit_rows, 1);
        assert!(store.find_by_token("old").await.unwrap().is_none());
        assert!(store.find_by_token("today").await.unwrap().is_some());
    }
}
