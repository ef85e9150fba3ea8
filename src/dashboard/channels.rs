//! # Canales del panel
//!
//! Cada canal reconciliado tiene un estado deseado que se deriva siempre de
//! las reservas almacenadas:
//!
//! | canal       | reservas                                        |
//! |-------------|-------------------------------------------------|
//! | `today`     | totalmente confirmadas con fecha = hoy          |
//! | `confirmed` | totalmente confirmadas con fecha >= hoy         |
//! | `pending`   | pendientes del restaurante con fecha >= hoy     |
//!
//! Se agrupan por fecha (ascendente) y dentro de cada fecha por hora.
//! El estado observado se reconstruye a partir de los marcadores de las
//! tarjetas y se compara por conjuntos: el orden dentro de un grupo no
//! cuenta.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::surface::CardMarker;
use crate::db::{ReservationFilter, StatusFilter};
use crate::domain::{Reserva, ReservationId, ReservationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKind {
    Today,
    Confirmed,
    Pending,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Today, ChannelKind::Confirmed, ChannelKind::Pending];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Confirmed => "confirmed",
            Self::Pending => "pending",
        }
    }

    /// Consulta al almacenamiento que cubre el canal
    pub fn store_filter(self, today: NaiveDate) -> ReservationFilter {
        let status = match self {
            Self::Today | Self::Confirmed => StatusFilter::Confirmed,
            Self::Pending => StatusFilter::Pending,
        };
        let filter = match self {
            Self::Today => ReservationFilter::on(today),
            Self::Confirmed | Self::Pending => ReservationFilter {
                date_from: Some(today),
                ..ReservationFilter::default()
            },
        };
        filter.with_status(status)
    }

    pub fn includes(self, reserva: &Reserva, today: NaiveDate) -> bool {
        let status = reserva.status();
        match self {
            Self::Today => status == ReservationStatus::FullyConfirmed && reserva.fecha == today,
            Self::Confirmed => status == ReservationStatus::FullyConfirmed && reserva.fecha >= today,
            Self::Pending => status == ReservationStatus::AwaitingRestaurant && reserva.fecha >= today,
        }
    }

    /// Estado deseado a partir de cualquier conjunto de reservas
    pub fn derive(self, reservations: &[Reserva], today: NaiveDate) -> DesiredState {
        let mut groups: BTreeMap<NaiveDate, Vec<Reserva>> = BTreeMap::new();
        for r in reservations.iter().filter(|r| self.includes(r, today)) {
            groups.entry(r.fecha).or_default().push(r.clone());
        }
        for group in groups.values_mut() {
            group.sort_by_key(|r| (r.hora, r.id));
        }
        DesiredState { groups }
    }

    /// Acciones que ofrece cada tarjeta del canal
    pub fn offers_approve(self) -> bool {
        self == Self::Pending
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "today" => Ok(Self::Today),
            "confirmed" => Ok(Self::Confirmed),
            "pending" => Ok(Self::Pending),
            other => Err(format!("canal desconocido '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    pub groups: BTreeMap<NaiveDate, Vec<Reserva>>,
}

impl DesiredState {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn reservation_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Marcadores en el orden exacto de publicación
    pub fn markers(&self) -> Vec<CardMarker> {
        if self.is_empty() {
            return vec![CardMarker::Placeholder];
        }
        let mut out = Vec::with_capacity(self.groups.len() + self.reservation_count());
        for (fecha, group) in &self.groups {
            out.push(CardMarker::Header(*fecha));
            out.extend(group.iter().map(|r| CardMarker::Reservation(r.id)));
        }
        out
    }
}

/// Estado del canal reconstruido a partir de sus marcadores
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedState {
    pub groups: BTreeMap<NaiveDate, BTreeSet<ReservationId>>,
    pub placeholders: usize,
    /// Cabeceras repetidas, tarjetas sin cabecera o ids duplicados
    pub malformed: bool,
}

impl ObservedState {
    pub fn from_markers<'a>(markers: impl IntoIterator<Item = &'a CardMarker>) -> Self {
        let mut observed = Self::default();
        let mut current: Option<NaiveDate> = None;
        let mut seen = BTreeSet::new();

        for marker in markers {
            match marker {
                CardMarker::Header(fecha) => {
                    if observed.groups.insert(*fecha, BTreeSet::new()).is_some() {
                        observed.malformed = true;
                    }
                    current = Some(*fecha);
                }
                CardMarker::Reservation(id) => match current {
                    Some(fecha) if seen.insert(*id) => {
                        observed.groups.entry(fecha).or_default().insert(*id);
                    }
                    _ => observed.malformed = true,
                },
                CardMarker::Placeholder => observed.placeholders += 1,
            }
        }
        observed
    }

    /// Mismas cabeceras, mismos ids por cabecera y marcador de vacío
    /// presente exactamente cuando no hay reservas
    pub fn matches(&self, desired: &DesiredState) -> bool {
        if self.malformed {
            return false;
        }
        let expected_placeholders = usize::from(desired.is_empty());
        if self.placeholders != expected_placeholders {
            return false;
        }
        if !self.groups.keys().eq(desired.groups.keys()) {
            return false;
        }
        desired.groups.iter().all(|(fecha, group)| {
            let ids: BTreeSet<ReservationId> = group.iter().map(|r| r.id).collect();
            self.groups.get(fecha) == Some(&ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone, Utc};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn reserva(id: i64, fecha: NaiveDate, h: u32, user: bool, restaurant: bool) -> Reserva {
        Reserva {
            id,
            nombre: format!("Cliente {id}"),
            telefono: "+34600000000".into(),
            personas: 2,
            fecha,
            hora: NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
            notas: None,
            user_confirmed: user,
            restaurant_confirmed: restaurant,
            cancelled: false,
            cancelled_at: None,
            cancelled_by: None,
            confirmation_token: format!("t{id}"),
            created_at: Utc.with_ymd_and_hms(2026, 10, 1, 10, 0, 0).unwrap(),
            version: 1,
        }
    }

    fn sample() -> Vec<Reserva> {
        let mut cancelled = reserva(5, day(16), 21, true, true);
        cancelled.cancelled = true;
        vec![
            reserva(1, day(16), 22, true, true),
            reserva(2, day(15), 21, true, true),
            reserva(3, day(16), 20, true, false),
            reserva(4, day(17), 20, false, true),
            cancelled,
            reserva(6, day(14), 20, true, true),
            reserva(7, day(16), 13, true, true),
        ]
    }

    #[test]
    fn channels_select_their_reservations() {
        let today = day(15);
        let confirmed = ChannelKind::Confirmed.derive(&sample(), today);
        assert_eq!(
            confirmed.markers(),
            vec![
                CardMarker::Header(day(15)),
                CardMarker::Reservation(2),
                CardMarker::Header(day(16)),
                CardMarker::Reservation(7),
                CardMarker::Reservation(1),
            ]
        );

        let today_view = ChannelKind::Today.derive(&sample(), today);
        assert_eq!(today_view.markers(), vec![CardMarker::Header(day(15)), CardMarker::Reservation(2)]);

        let pending = ChannelKind::Pending.derive(&sample(), today);
        assert_eq!(pending.markers(), vec![CardMarker::Header(day(16)), CardMarker::Reservation(3)]);
    }

    #[test]
    fn empty_state_renders_a_placeholder() {
        let desired = ChannelKind::Pending.derive(&[], day(15));
        assert_eq!(desired.markers(), vec![CardMarker::Placeholder]);
        assert!(ObservedState::from_markers(&desired.markers()).matches(&desired));
        assert!(!ObservedState::default().matches(&desired));
    }

    #[test]
    fn order_within_a_group_is_not_compared() {
        let desired = ChannelKind::Confirmed.derive(&sample(), day(15));
        let shuffled = [
            CardMarker::Header(day(16)),
            CardMarker::Reservation(1),
            CardMarker::Reservation(7),
            CardMarker::Header(day(15)),
            CardMarker::Reservation(2),
        ];
        assert!(ObservedState::from_markers(&shuffled).matches(&desired));
    }

    #[test]
    fn drift_is_detected() {
        let desired = ChannelKind::Confirmed.derive(&sample(), day(15));
        let mut markers = desired.markers();

        let missing_card: Vec<_> = markers[..markers.len() - 1].to_vec();
        assert!(!ObservedState::from_markers(&missing_card).matches(&desired));

        markers.push(CardMarker::Placeholder);
        assert!(!ObservedState::from_markers(&markers).matches(&desired));

        let orphan = [CardMarker::Reservation(2), CardMarker::Header(day(15))];
        assert!(ObservedState::from_markers(&orphan).malformed);

        let duplicated = [
            CardMarker::Header(day(15)),
            CardMarker::Reservation(2),
            CardMarker::Header(day(15)),
            CardMarker::Reservation(2),
        ];
        assert!(ObservedState::from_markers(&duplicated).malformed);
    }

    #[test]
    fn store_filter_agrees_with_includes() {
        let today = day(15);
        for kind in ChannelKind::ALL {
            let filter = kind.store_filter(today);
            for r in sample() {
                assert_eq!(filter.matches(&r), kind.includes(&r, today), "{kind} / {}", r.id);
            }
        }
    }
}
