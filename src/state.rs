//! Estado compartido por los handlers de Actix
//!
//! Se construye una sola vez en `main` (o en cada test) y se clona por
//! trabajador HTTP; todo lo que contiene vive detrás de `Arc`.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::config::{AppConfig, DefaultHours};
use crate::dashboard::{DisplaySurface, InteractionHandler, Reconciler, SyncTrigger, SyncWorker};
use crate::db::ReservationStore;
use crate::services::notifications::Envelope;
use crate::services::{MessageTemplates, Outbox, ReservationService, RetentionSweep, ScheduleService};

/// Capacidad de la cola de SMS
const OUTBOX_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn ReservationStore>,
    pub schedule: Arc<ScheduleService>,
    pub reservations: Arc<ReservationService>,
    pub reconciler: Arc<Reconciler>,
    pub interactions: Arc<InteractionHandler>,
    pub trigger: SyncTrigger,
}

impl AppState {
    /// Conecta servicios, panel y cola de SMS
    ///
    /// Devuelve el extremo receptor de la cola; quien llama decide qué
    /// [`crate::services::OutboxWorker`] lo consume.
    pub fn build(
        config: AppConfig,
        store: Arc<dyn ReservationStore>,
        surface: Arc<dyn DisplaySurface>,
        clock: Arc<dyn Clock>,
        default_hours: Arc<DefaultHours>,
    ) -> (Self, mpsc::Receiver<Envelope>) {
        let trigger = SyncTrigger::new();
        let (outbox, rx) = Outbox::channel(OUTBOX_CAPACITY);

        let schedule = Arc::new(ScheduleService::new(
            store.clone(),
            clock.clone(),
            default_hours,
            trigger.clone(),
        ));
        let reservations = Arc::new(ReservationService::new(
            store.clone(),
            clock.clone(),
            schedule.clone(),
            MessageTemplates::from_config(&config),
            outbox,
            trigger.clone(),
            config.large_group_threshold,
            config.confirm_grace(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            surface,
            clock.clone(),
            &config.discord.channels,
        ));
        let interactions = Arc::new(InteractionHandler::new(reservations.clone(), reconciler.clone()));

        let state = Self {
            config: Arc::new(config),
            clock,
            store,
            schedule,
            reservations,
            reconciler,
            interactions,
            trigger,
        };
        (state, rx)
    }

    /// Bucle de sincronización del panel con los intervalos configurados
    pub fn sync_worker(&self) -> SyncWorker {
        SyncWorker::new(
            self.reconciler.clone(),
            self.store.clone(),
            self.clock.clone(),
            self.trigger.clone(),
            self.config.sync.fast_interval,
            self.config.sync.full_interval,
        )
    }

    pub fn retention_sweep(&self) -> RetentionSweep {
        RetentionSweep::new(
            self.store.clone(),
            self.clock.clone(),
            self.trigger.clone(),
            &self.config.retention,
        )
    }
}
