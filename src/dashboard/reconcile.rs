//! # Reconciliación de canales
//!
//! Por canal:
//!
//! 1. **Observar** - el mapeo de tarjetas persistido es la fuente primaria,
//!    pero solo se cree si sus ids coinciden con los mensajes marcados que
//!    siguen visibles. Si no, se escanea el canal.
//! 2. **Derivar** - estado deseado desde el almacenamiento, nunca de una
//!    ejecución anterior.
//! 3. **Comparar** - conjuntos de cabeceras y de ids por cabecera.
//! 4. **Reconstruir** - si difieren: olvidar el mapeo, borrar todo lo
//!    visible, publicar en orden y persistir el mapeo nuevo.
//!
//! Una reconstrucción interrumpida deja el mapeo vacío y el canal a medias;
//! la siguiente ejecución lo detecta por escaneo y vuelve a empezar.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::cards;
use super::channels::{ChannelKind, DesiredState, ObservedState};
use super::surface::{CardMarker, DisplaySurface, VisibleMessage};
use crate::api::AppResult;
use crate::clock::Clock;
use crate::config::ChannelIds;
use crate::db::{RenderedCard, ReservationStore};

/// Cursor del canal de registro en `sync_cursors`
pub const LOG_CURSOR: &str = "log";

/// Máximo de filas de auditoría publicadas por pasada
const LOG_BATCH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Temporizador: si el canal está ocupado se salta
    Scheduled,
    /// Acción de un empleado: espera su turno
    Interactive,
    /// Resincronización manual: reconstruye aunque no haya diferencias
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    InSync,
    /// El escaneo coincidía; solo se rehízo el mapeo persistido
    Adopted,
    Rebuilt { deleted: usize, posted: usize },
    Skipped,
    Disabled,
}

struct ChannelSlot {
    id: String,
    lock: Mutex<()>,
}

pub struct Reconciler {
    store: Arc<dyn ReservationStore>,
    surface: Arc<dyn DisplaySurface>,
    clock: Arc<dyn Clock>,
    channels: HashMap<ChannelKind, ChannelSlot>,
    log: Option<ChannelSlot>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        surface: Arc<dyn DisplaySurface>,
        clock: Arc<dyn Clock>,
        ids: &ChannelIds,
    ) -> Self {
        let slot = |id: &Option<String>| {
            id.as_ref().map(|id| ChannelSlot {
                id: id.clone(),
                lock: Mutex::new(()),
            })
        };

        let mut channels = HashMap::new();
        for (kind, id) in [
            (ChannelKind::Today, &ids.today),
            (ChannelKind::Confirmed, &ids.confirmed),
            (ChannelKind::Pending, &ids.pending),
        ] {
            if let Some(slot) = slot(id) {
                channels.insert(kind, slot);
            }
        }

        Self {
            store,
            surface,
            clock,
            channels,
            log: slot(&ids.log),
        }
    }

    pub fn enabled_channels(&self) -> Vec<ChannelKind> {
        ChannelKind::ALL
            .into_iter()
            .filter(|k| self.channels.contains_key(k))
            .collect()
    }

    /// Estado deseado de un canal, calculado ahora
    pub async fn desired(&self, kind: ChannelKind) -> AppResult<DesiredState> {
        let today = self.clock.today();
        let rows = self.store.list_reservations(&kind.store_filter(today)).await?;
        Ok(kind.derive(&rows, today))
    }

    /// Reconcilia todos los canales y publica el registro pendiente
    ///
    /// Un fallo en un canal se registra y no impide los demás.
    pub async fn reconcile_all(&self, mode: RunMode) -> Vec<(ChannelKind, Outcome)> {
        let mut results = Vec::new();
        for kind in self.enabled_channels() {
            match self.reconcile(kind, mode).await {
                Ok(outcome) => results.push((kind, outcome)),
                Err(e) => tracing::warn!(channel = %kind, error = %e, "Channel reconciliation failed"),
            }
        }
        if let Err(e) = self.publish_audit().await {
            tracing::warn!(error = %e, "Audit feed publication failed");
        }
        results
    }

    pub async fn reconcile(&self, kind: ChannelKind, mode: RunMode) -> AppResult<Outcome> {
        let Some(slot) = self.channels.get(&kind) else {
            return Ok(Outcome::Disabled);
        };

        let _guard = match mode {
            RunMode::Scheduled => match slot.lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::debug!(channel = %kind, "Reconciliation already running, tick skipped");
                    return Ok(Outcome::Skipped);
                }
            },
            RunMode::Interactive | RunMode::Forced => slot.lock.lock().await,
        };

        let desired = self.desired(kind).await?;
        let visible = self.surface.list(&slot.id).await?;

        if mode != RunMode::Forced {
            let mapping = self.store.rendered_cards(&slot.id).await?;

            if mapping_is_current(&mapping, &visible) {
                let observed = ObservedState::from_markers(mapping.iter().map(|c| &c.marker));
                if observed.matches(&desired) {
                    return Ok(Outcome::InSync);
                }
            } else {
                let observed = ObservedState::from_markers(visible.iter().filter_map(|m| m.marker.as_ref()));
                if observed.matches(&desired) {
                    self.store
                        .replace_rendered_cards(&slot.id, mapping_from_visible(&slot.id, &visible))
                        .await?;
                    tracing::info!(channel = %kind, "Card mapping restored from channel scan");
                    return Ok(Outcome::Adopted);
                }
            }
        }

        let outcome = self.rebuild(kind, &slot.id, &desired, &visible).await?;
        tracing::info!(channel = %kind, ?mode, ?outcome, reservations = desired.reservation_count(), "Channel rebuilt");
        Ok(outcome)
    }

    async fn rebuild(
        &self,
        kind: ChannelKind,
        channel: &str,
        desired: &DesiredState,
        visible: &[VisibleMessage],
    ) -> AppResult<Outcome> {
        self.store.replace_rendered_cards(channel, Vec::new()).await?;

        let mut deleted = 0;
        for message in visible {
            self.surface.delete(channel, &message.message_id).await?;
            deleted += 1;
        }

        let mut cards = Vec::new();
        if desired.is_empty() {
            let card = cards::placeholder();
            let message_id = self.surface.post(channel, &card).await?;
            cards.push(rendered(channel, message_id, CardMarker::Placeholder, 0));
        }
        for (fecha, group) in &desired.groups {
            let message_id = self.surface.post(channel, &cards::header(*fecha)).await?;
            let position = cards.len() as u32;
            cards.push(rendered(channel, message_id, CardMarker::Header(*fecha), position));

            for reserva in group {
                let message_id = self.surface.post(channel, &cards::reservation(kind, reserva)).await?;
                let position = cards.len() as u32;
                cards.push(rendered(channel, message_id, CardMarker::Reservation(reserva.id), position));
            }
        }

        let posted = cards.len();
        self.store.replace_rendered_cards(channel, cards).await?;
        Ok(Outcome::Rebuilt { deleted, posted })
    }

    /// Publica en el canal de registro las filas de auditoría nuevas
    ///
    /// El cursor avanza tras cada publicación, así que un fallo reanuda
    /// donde se quedó.
    pub async fn publish_audit(&self) -> AppResult<usize> {
        let Some(slot) = &self.log else {
            return Ok(0);
        };
        let _guard = slot.lock.lock().await;

        let cursor = self.store.sync_cursor(LOG_CURSOR).await?;
        let entries = self.store.audit_after(cursor, LOG_BATCH).await?;

        let mut posted = 0;
        for entry in &entries {
            let reserva = self.store.get_reservation(entry.reservation_id).await?;
            self.surface
                .post(&slot.id, &cards::audit_entry(entry, reserva.as_ref()))
                .await?;
            self.store.set_sync_cursor(LOG_CURSOR, entry.id).await?;
            posted += 1;
        }

        if posted > 0 {
            tracing::debug!(posted, "Audit entries published");
        }
        Ok(posted)
    }
}

/// El mapeo vale si cubre exactamente los mensajes marcados visibles
fn mapping_is_current(mapping: &[RenderedCard], visible: &[VisibleMessage]) -> bool {
    if mapping.is_empty() {
        return false;
    }
    let remembered: BTreeSet<&str> = mapping.iter().map(|c| c.message_id.as_str()).collect();
    let marked: BTreeSet<&str> = visible
        .iter()
        .filter(|m| m.marker.is_some())
        .map(|m| m.message_id.as_str())
        .collect();
    remembered == marked
}

fn mapping_from_visible(channel: &str, visible: &[VisibleMessage]) -> Vec<RenderedCard> {
    visible
        .iter()
        .filter_map(|m| m.marker.map(|marker| (m.message_id.clone(), marker)))
        .enumerate()
        .map(|(position, (message_id, marker))| rendered(channel, message_id, marker, position as u32))
        .collect()
}

fn rendered(channel: &str, message_id: String, marker: CardMarker, position: u32) -> RenderedCard {
    RenderedCard {
        channel: channel.to_string(),
        message_id,
        marker,
        position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::dashboard::MemorySurface;
    use crate::db::{MemoryStore, NewReservation};
    use crate::domain::{ActionType, Actor, AuditDraft, Reserva};
    use chrono::{NaiveDate, NaiveTime, Utc};

    struct Fixture {
        store: Arc<MemoryStore>,
        surface: Arc<MemorySurface>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let surface = Arc::new(MemorySurface::new());
        let local = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::at_local(chrono_tz::Europe::Madrid, local));
        let ids = ChannelIds {
            today: Some("c-today".into()),
            confirmed: Some("c-confirmed".into()),
            pending: Some("c-pending".into()),
            log: Some("c-log".into()),
        };
        let reconciler = Reconciler::new(store.clone(), surface.clone(), clock, &ids);
        Fixture {
            store,
            surface,
            reconciler,
        }
    }

    async fn add(store: &MemoryStore, day: u32, hour: u32, personas: u32, user_confirmed: bool) -> Reserva {
        let new = NewReservation {
            nombre: "Ana".into(),
            telefono: format!("+3460000{day}{hour}"),
            personas,
            fecha: NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
            hora: NaiveTime::from_hms_opt(hour, 30, 0).unwrap(),
            notas: None,
            restaurant_confirmed: personas <= 4,
            confirmation_token: format!("tok-{day}-{hour}"),
            created_at: Utc::now(),
        };
        let audit = AuditDraft::new(ActionType::Created, &Actor::WebForm, None, Utc::now());
        let mut r = store.insert_reservation(new, audit).await.unwrap();
        if user_confirmed {
            let mut updated = r.clone();
            updated.user_confirmed = true;
            updated.version += 1;
            let audit = AuditDraft::new(ActionType::UserConfirmed, &Actor::Customer, None, Utc::now());
            store.commit_transition(&updated, r.version, audit).await.unwrap().unwrap();
            r = updated;
        }
        r
    }

    #[tokio::test]
    async fn second_run_without_changes_writes_nothing() {
        let f = fixture();
        add(&f.store, 15, 20, 2, true).await;
        add(&f.store, 16, 21, 2, true).await;

        let first = f.reconciler.reconcile(ChannelKind::Confirmed, RunMode::Scheduled).await.unwrap();
        assert_eq!(first, Outcome::Rebuilt { deleted: 0, posted: 4 });
        let writes = f.surface.writes();

        let second = f.reconciler.reconcile(ChannelKind::Confirmed, RunMode::Scheduled).await.unwrap();
        assert_eq!(second, Outcome::InSync);
        assert_eq!(f.surface.writes(), writes);
    }

    #[tokio::test]
    async fn empty_channel_gets_a_single_placeholder() {
        let f = fixture();
        f.reconciler.reconcile(ChannelKind::Pending, RunMode::Scheduled).await.unwrap();
        assert_eq!(f.surface.markers("c-pending"), vec![CardMarker::Placeholder]);
    }

    #[tokio::test]
    async fn large_party_moves_from_pending_to_confirmed() {
        let f = fixture();
        let r = add(&f.store, 16, 21, 8, true).await;

        f.reconciler.reconcile_all(RunMode::Scheduled).await;
        assert!(f.surface.markers("c-pending").contains(&CardMarker::Reservation(r.id)));
        assert!(!f.surface.markers("c-confirmed").contains(&CardMarker::Reservation(r.id)));

        let mut approved = f.store.get_reservation(r.id).await.unwrap().unwrap();
        let expected = approved.version;
        approved.restaurant_confirmed = true;
        approved.version += 1;
        let audit = AuditDraft::new(ActionType::RestaurantConfirmed, &Actor::Admin, None, Utc::now());
        f.store.commit_transition(&approved, expected, audit).await.unwrap().unwrap();

        f.reconciler.reconcile_all(RunMode::Interactive).await;
        assert_eq!(f.surface.markers("c-pending"), vec![CardMarker::Placeholder]);
        assert!(f.surface.markers("c-confirmed").contains(&CardMarker::Reservation(r.id)));
    }

    #[tokio::test]
    async fn interrupted_rebuild_is_repaired_on_next_run() {
        let f = fixture();
        add(&f.store, 16, 20, 2, true).await;
        add(&f.store, 17, 21, 2, true).await;

        f.surface.fail_after(2);
        assert!(f.reconciler.reconcile(ChannelKind::Confirmed, RunMode::Scheduled).await.is_err());
        assert!(f.store.rendered_cards("c-confirmed").await.unwrap().is_empty());

        f.surface.recover();
        let outcome = f.reconciler.reconcile(ChannelKind::Confirmed, RunMode::Scheduled).await.unwrap();
        assert_eq!(outcome, Outcome::Rebuilt { deleted: 2, posted: 4 });
        assert_eq!(f.surface.markers("c-confirmed").len(), 4);
    }

    #[tokio::test]
    async fn lost_mapping_is_adopted_from_the_channel_scan() {
        let f = fixture();
        add(&f.store, 16, 20, 2, true).await;
        f.reconciler.reconcile(ChannelKind::Confirmed, RunMode::Scheduled).await.unwrap();
        let writes = f.surface.writes();

        f.store.replace_rendered_cards("c-confirmed", Vec::new()).await.unwrap();
        let outcome = f.reconciler.reconcile(ChannelKind::Confirmed, RunMode::Scheduled).await.unwrap();
        assert_eq!(outcome, Outcome::Adopted);
        assert_eq!(f.surface.writes(), writes);
        assert_eq!(f.store.rendered_cards("c-confirmed").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn card_removed_by_hand_triggers_rebuild() {
        let f = fixture();
        add(&f.store, 16, 20, 2, true).await;
        f.reconciler.reconcile(ChannelKind::Confirmed, RunMode::Scheduled).await.unwrap();

        f.surface.remove_externally("c-confirmed", 1);
        let outcome = f.reconciler.reconcile(ChannelKind::Confirmed, RunMode::Scheduled).await.unwrap();
        assert_eq!(outcome, Outcome::Rebuilt { deleted: 1, posted: 2 });
    }

    #[tokio::test]
    async fn forced_run_rebuilds_even_in_sync() {
        let f = fixture();
        add(&f.store, 16, 20, 2, true).await;
        f.reconciler.reconcile(ChannelKind::Confirmed, RunMode::Scheduled).await.unwrap();

        let outcome = f.reconciler.reconcile(ChannelKind::Confirmed, RunMode::Forced).await.unwrap();
        assert_eq!(outcome, Outcome::Rebuilt { deleted: 2, posted: 2 });
    }

    #[tokio::test]
    async fn scheduled_run_skips_a_busy_channel() {
        let f = fixture();
        let slot = f.reconciler.channels.get(&ChannelKind::Today).unwrap();
        let _held = slot.lock.lock().await;

        let outcome = f.reconciler.reconcile(ChannelKind::Today, RunMode::Scheduled).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped);
    }

    #[tokio::test]
    async fn audit_feed_posts_each_row_once() {
        let f = fixture();
        add(&f.store, 16, 20, 2, true).await;

        assert_eq!(f.reconciler.publish_audit().await.unwrap(), 2);
        assert_eq!(f.reconciler.publish_audit().await.unwrap(), 0);
        assert_eq!(f.surface.cards("c-log").len(), 2);
        assert_eq!(f.surface.cards("c-log")[1].title, "📝 USER_CONFIRMED");
    }

    #[tokio::test]
    async fn unconfigured_channel_is_disabled() {
        let store = Arc::new(MemoryStore::new());
        let surface = Arc::new(MemorySurface::new());
        let clock = Arc::new(crate::clock::SystemClock::new(chrono_tz::Europe::Madrid));
        let reconciler = Reconciler::new(store, surface, clock, &ChannelIds::default());

        assert!(reconciler.enabled_channels().is_empty());
        assert_eq!(
            reconciler.reconcile(ChannelKind::Today, RunMode::Forced).await.unwrap(),
            Outcome::Disabled
        );
        assert_eq!(reconciler.publish_audit().await.unwrap(), 0);
    }
}
