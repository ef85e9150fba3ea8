//! Almacenamiento en memoria
//!
//! Un único `tokio::sync::Mutex` protege todo el estado, así que cada método
//! es atómico respecto a los demás.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::Mutex;

use super::{NewReservation, PurgeReport, RenderedCard, ReservationFilter, ReservationStore};
use crate::api::{AppError, AppResult};
use crate::dashboard::CardMarker;
use crate::domain::{ActionLogEntry, AuditDraft, Reserva, ReservationId};

#[derive(Debug, Default)]
struct Inner {
    reservations: BTreeMap<ReservationId, Reserva>,
    audit: Vec<ActionLogEntry>,
    blocked: BTreeSet<(NaiveDate, NaiveTime)>,
    cards: HashMap<String, Vec<RenderedCard>>,
    cursors: HashMap<String, i64>,
    next_reservation_id: ReservationId,
    next_audit_id: i64,
}

impl Inner {
    fn push_audit(&mut self, reservation_id: ReservationId, draft: AuditDraft) -> ActionLogEntry {
        self.next_audit_id += 1;
        let entry = draft.into_entry(self.next_audit_id, reservation_id);
        self.audit.push(entry.clone());
        entry
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn insert_reservation(&self, new: NewReservation, audit: AuditDraft) -> AppResult<Reserva> {
        let mut inner = self.inner.lock().await;

        if inner
            .reservations
            .values()
            .any(|r| r.confirmation_token == new.confirmation_token)
        {
            return Err(AppError::Integrity("confirmation_token duplicado".to_string()));
        }

        inner.next_reservation_id += 1;
        let reserva = new.into_reserva(inner.next_reservation_id);
        inner.reservations.insert(reserva.id, reserva.clone());
        inner.push_audit(reserva.id, audit);

        Ok(reserva)
    }

    async fn get_reservation(&self, id: ReservationId) -> AppResult<Option<Reserva>> {
        Ok(self.inner.lock().await.reservations.get(&id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> AppResult<Option<Reserva>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .reservations
            .values()
            .find(|r| r.confirmation_token == token)
            .cloned())
    }

    async fn find_active_confirmed_for_phone(&self, telefono: &str, from: NaiveDate) -> AppResult<Option<Reserva>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .reservations
            .values()
            .filter(|r| r.telefono == telefono && r.user_confirmed && !r.cancelled && r.fecha >= from)
            .min_by_key(|r| (r.fecha, r.hora))
            .cloned())
    }

    async fn list_reservations(&self, filter: &ReservationFilter) -> AppResult<Vec<Reserva>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<Reserva> = inner
            .reservations
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        filter.sort(&mut rows);
        Ok(rows)
    }

    async fn commit_transition(
        &self,
        updated: &Reserva,
        expected_version: i64,
        audit: AuditDraft,
    ) -> AppResult<Option<ActionLogEntry>> {
        let mut inner = self.inner.lock().await;

        match inner.reservations.get(&updated.id) {
            Some(current) if current.version == expected_version => {}
            Some(_) => return Ok(None),
            None => return Err(AppError::not_found_id("Reserva", updated.id)),
        }

        inner.reservations.insert(updated.id, updated.clone());
        Ok(Some(inner.push_audit(updated.id, audit)))
    }

    async fn delete_reservation(&self, id: ReservationId) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.reservations.remove(&id).is_none() {
            return Ok(false);
        }
        inner.audit.retain(|e| e.reservation_id != id);
        for cards in inner.cards.values_mut() {
            cards.retain(|c| c.marker != CardMarker::Reservation(id));
        }
        Ok(true)
    }

    async fn blocked_hours(&self, fecha: NaiveDate) -> AppResult<Vec<NaiveTime>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .blocked
            .range((fecha, NaiveTime::MIN)..)
            .take_while(|(f, _)| *f == fecha)
            .map(|(_, h)| *h)
            .collect())
    }

    async fn block_hour(&self, fecha: NaiveDate, hora: NaiveTime) -> AppResult<bool> {
        Ok(self.inner.lock().await.blocked.insert((fecha, hora)))
    }

    async fn unblock_hour(&self, fecha: NaiveDate, hora: NaiveTime) -> AppResult<bool> {
        Ok(self.inner.lock().await.blocked.remove(&(fecha, hora)))
    }

    async fn replace_blocked_hours(&self, fecha: NaiveDate, horas: &[NaiveTime]) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner.blocked.retain(|(f, _)| *f != fecha);
        inner.blocked.extend(horas.iter().map(|h| (fecha, *h)));
        Ok(())
    }

    async fn audit_after(&self, after_id: i64, limit: usize) -> AppResult<Vec<ActionLogEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .audit
            .iter()
            .filter(|e| e.id > after_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn audit_for_reservation(&self, id: ReservationId) -> AppResult<Vec<ActionLogEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .audit
            .iter()
            .filter(|e| e.reservation_id == id)
            .cloned()
            .collect())
    }

    async fn latest_audit_id(&self) -> AppResult<i64> {
        Ok(self.inner.lock().await.audit.last().map_or(0, |e| e.id))
    }

    async fn rendered_cards(&self, channel: &str) -> AppResult<Vec<RenderedCard>> {
        let inner = self.inner.lock().await;
        let mut cards = inner.cards.get(channel).cloned().unwrap_or_default();
        cards.sort_by_key(|c| c.position);
        Ok(cards)
    }

    async fn replace_rendered_cards(&self, channel: &str, cards: Vec<RenderedCard>) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if cards.is_empty() {
            inner.cards.remove(channel);
        } else {
            inner.cards.insert(channel.to_string(), cards);
        }
        Ok(())
    }

    async fn sync_cursor(&self, name: &str) -> AppResult<i64> {
        Ok(self.inner.lock().await.cursors.get(name).copied().unwrap_or(0))
    }

    async fn set_sync_cursor(&self, name: &str, value: i64) -> AppResult<()> {
        self.inner.lock().await.cursors.insert(name.to_string(), value);
        Ok(())
    }

    async fn purge(&self, before: NaiveDate, audit_before: DateTime<Utc>) -> AppResult<PurgeReport> {
        let mut inner = self.inner.lock().await;
        let mut report = PurgeReport::default();

        let old: Vec<ReservationId> = inner
            .reservations
            .values()
            .filter(|r| r.fecha < before)
            .map(|r| r.id)
            .collect();
        for id in &old {
            inner.reservations.remove(id);
        }
        report.reservations = old.len() as u64;

        let audit_len = inner.audit.len();
        inner
            .audit
            .retain(|e| e.timestamp >= audit_before && !old.contains(&e.reservation_id));
        report.audit_rows = (audit_len - inner.audit.len()) as u64;

        let Inner {
            reservations, cards, ..
        } = &mut *inner;
        for channel_cards in cards.values_mut() {
            let len = channel_cards.len();
            channel_cards.retain(|c| match c.marker {
                CardMarker::Reservation(id) => reservations.contains_key(&id),
                _ => true,
            });
            report.card_mappings += (len - channel_cards.len()) as u64;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionType, Actor, ReservationState};
    use chrono::TimeZone;
    use tokio_test::{assert_err, assert_ok};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 10, 0, 0).unwrap()
    }

    fn draft(action: ActionType) -> AuditDraft {
        AuditDraft::new(action, &Actor::WebForm, None, at())
    }

    fn new_reservation(token: &str, telefono: &str, day: u32) -> NewReservation {
        NewReservation {
            nombre: "Ana".to_string(),
            telefono: telefono.to_string(),
            personas: 2,
            fecha: NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
            hora: NaiveTime::from_hms_opt(20, 30, 0).unwrap(),
            notas: None,
            restaurant_confirmed: true,
            confirmation_token: token.to_string(),
            created_at: at(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_audits() {
        let store = MemoryStore::new();
        let a = assert_ok!(store.insert_reservation(new_reservation("t1", "+1", 16), draft(ActionType::Created)).await);
        let b = assert_ok!(store.insert_reservation(new_reservation("t2", "+2", 16), draft(ActionType::Created)).await);

        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(a.version, 1);
        assert_eq!(store.latest_audit_id().await.unwrap(), 2);
        assert_eq!(store.audit_for_reservation(a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_token_is_an_integrity_error() {
        let store = MemoryStore::new();
        store.insert_reservation(new_reservation("t1", "+1", 16), draft(ActionType::Created)).await.unwrap();
        let err = assert_err!(store.insert_reservation(new_reservation("t1", "+2", 16), draft(ActionType::Created)).await);
        assert!(matches!(err, AppError::Integrity(_)));
        assert_eq!(store.latest_audit_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_not_written() {
        let store = MemoryStore::new();
        let reserva = store.insert_reservation(new_reservation("t1", "+1", 16), draft(ActionType::Created)).await.unwrap();

        let mut first = reserva.clone();
        first.apply_state(ReservationState::FullyConfirmed);
        first.version += 1;
        assert!(store.commit_transition(&first, 1, draft(ActionType::UserConfirmed)).await.unwrap().is_some());

        let mut second = reserva.clone();
        second.apply_state(ReservationState::Cancelled);
        second.version += 1;
        assert!(store.commit_transition(&second, 1, draft(ActionType::Cancelled)).await.unwrap().is_none());

        let stored = store.get_reservation(reserva.id).await.unwrap().unwrap();
        assert!(stored.user_confirmed && !stored.cancelled);
        assert_eq!(store.audit_for_reservation(reserva.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_cascades_audit_and_cards() {
        let store = MemoryStore::new();
        let reserva = store.insert_reservation(new_reservation("t1", "+1", 16), draft(ActionType::Created)).await.unwrap();
        store
            .replace_rendered_cards(
                "confirmed",
                vec![RenderedCard {
                    channel: "confirmed".to_string(),
                    message_id: "m1".to_string(),
                    marker: CardMarker::Reservation(reserva.id),
                    position: 0,
                }],
            )
            .await
            .unwrap();

        assert!(store.delete_reservation(reserva.id).await.unwrap());
        assert!(store.audit_for_reservation(reserva.id).await.unwrap().is_empty());
        assert!(store.rendered_cards("confirmed").await.unwrap().is_empty());
        assert!(!store.delete_reservation(reserva.id).await.unwrap());
    }

    #[tokio::test]
    async fn blocked_hours_are_scoped_by_date() {
        let store = MemoryStore::new();
        let d16 = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let d17 = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let h = NaiveTime::from_hms_opt(21, 0, 0).unwrap();

        assert!(store.block_hour(d16, h).await.unwrap());
        assert!(!store.block_hour(d16, h).await.unwrap());
        store.replace_blocked_hours(d17, &[h]).await.unwrap();

        assert_eq!(store.blocked_hours(d16).await.unwrap(), vec![h]);
        store.replace_blocked_hours(d16, &[]).await.unwrap();
        assert!(store.blocked_hours(d16).await.unwrap().is_empty());
        assert_eq!(store.blocked_hours(d17).await.unwrap(), vec![h]);
        assert!(!store.unblock_hour(d16, h).await.unwrap());
    }

    #[tokio::test]
    async fn purge_removes_past_reservations_and_orphans() {
        let store = MemoryStore::new();
        let past = store.insert_reservation(new_reservation("t1", "+1", 10), draft(ActionType::Created)).await.unwrap();
        let future = store.insert_reservation(new_reservation("t2", "+2", 20), draft(ActionType::Created)).await.unwrap();
        store
            .replace_rendered_cards(
                "pending",
                vec![
                    RenderedCard {
                        channel: "pending".to_string(),
                        message_id: "m1".to_string(),
                        marker: CardMarker::Reservation(past.id),
                        position: 0,
                    },
                    RenderedCard {
                        channel: "pending".to_string(),
                        message_id: "m2".to_string(),
                        marker: CardMarker::Reservation(future.id),
                        position: 1,
                    },
                ],
            )
            .await
            .unwrap();

        let report = store
            .purge(NaiveDate::from_ymd_opt(2026, 10, 15).unwrap(), at() - chrono::Duration::days(30))
            .await
            .unwrap();

        assert_eq!(report.reservations, 1);
        assert_eq!(report.audit_rows, 1);
        assert_eq!(report.card_mappings, 1);
        assert!(store.get_reservation(future.id).await.unwrap().is_some());
        assert_eq!(store.rendered_cards("pending").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_lookup_ignores_unconfirmed_and_cancelled() {
        let store = MemoryStore::new();
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let reserva = store.insert_reservation(new_reservation("t1", "+34600000000", 16), draft(ActionType::Created)).await.unwrap();
        assert!(store.find_active_confirmed_for_phone("+34600000000", today).await.unwrap().is_none());

        let mut confirmed = reserva.clone();
        confirmed.apply_state(ReservationState::FullyConfirmed);
        confirmed.version = 2;
        store.commit_transition(&confirmed, 1, draft(ActionType::UserConfirmed)).await.unwrap();
        assert!(store.find_active_confirmed_for_phone("+34600000000", today).await.unwrap().is_some());
        assert!(store
            .find_active_confirmed_for_phone("+34600000000", today + chrono::Duration::days(2))
            .await
            .unwrap()
            .is_none());
    }
}
