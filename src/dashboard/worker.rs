//! Bucle de sincronización del panel
//!
//! Tres disparadores:
//!
//! - [`SyncTrigger::kick`] tras cada mutación: ejecución inmediata
//! - tick rápido: solo reconcilia si cambió la última fila de auditoría o
//!   la fecha local
//! - tick completo: reconcilia siempre, como red de seguridad
//!
//! El bucle es secuencial y los ticks perdidos se descartan, así que dos
//! ejecuciones automáticas nunca se solapan.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use super::reconcile::{Reconciler, RunMode};
use crate::api::AppResult;
use crate::clock::Clock;
use crate::db::ReservationStore;

/// Aviso de "algo cambió"; varios avisos seguidos se funden en uno
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kick(&self) {
        self.notify.notify_one();
    }

    pub async fn kicked(&self) {
        self.notify.notified().await;
    }
}

/// Sonda barata de cambios: id de la última auditoría y fecha local
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeProbe {
    pub latest_audit_id: i64,
    pub today: NaiveDate,
}

impl ChangeProbe {
    pub async fn read(store: &dyn ReservationStore, clock: &dyn Clock) -> AppResult<Self> {
        Ok(Self {
            latest_audit_id: store.latest_audit_id().await?,
            today: clock.today(),
        })
    }
}

pub struct SyncWorker {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    trigger: SyncTrigger,
    fast_interval: Duration,
    full_interval: Duration,
    last_seen: Option<ChangeProbe>,
}

impl SyncWorker {
    pub fn new(
        reconciler: Arc<Reconciler>,
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        trigger: SyncTrigger,
        fast_interval: Duration,
        full_interval: Duration,
    ) -> Self {
        Self {
            reconciler,
            store,
            clock,
            trigger,
            fast_interval,
            full_interval,
            last_seen: None,
        }
    }

    /// No termina nunca; se lanza con `tokio::spawn`
    pub async fn run(mut self) {
        tracing::info!(
            fast_secs = self.fast_interval.as_secs(),
            full_secs = self.full_interval.as_secs(),
            channels = ?self.reconciler.enabled_channels(),
            "Dashboard sync worker started"
        );

        let mut fast = tokio::time::interval(self.fast_interval);
        fast.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut full = tokio::time::interval(self.full_interval);
        full.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.trigger.kicked() => {
                    self.run_once(RunMode::Interactive).await;
                }
                _ = fast.tick() => {
                    if self.has_changed().await {
                        self.run_once(RunMode::Scheduled).await;
                    }
                }
                _ = full.tick() => {
                    self.run_once(RunMode::Scheduled).await;
                }
            }
        }
    }

    /// Compara la sonda con la última ejecución; ante error, reconcilia
    pub async fn has_changed(&self) -> bool {
        match ChangeProbe::read(self.store.as_ref(), self.clock.as_ref()).await {
            Ok(probe) => self.last_seen != Some(probe),
            Err(e) => {
                tracing::warn!(error = %e, "Change probe failed");
                true
            }
        }
    }

    pub async fn run_once(&mut self, mode: RunMode) {
        // la sonda se lee antes para no perder cambios que lleguen durante la ejecución
        let probe = ChangeProbe::read(self.store.as_ref(), self.clock.as_ref()).await.ok();
        let results = self.reconciler.reconcile_all(mode).await;
        tracing::debug!(?mode, ?results, "Dashboard sync pass finished");
        if probe.is_some() {
            self.last_seen = probe;
        }
    }
}
