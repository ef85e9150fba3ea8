//! # Persistencia
//!
//! [`ReservationStore`] es la única puerta al almacenamiento. Hay dos
//! implementaciones con la misma semántica:
//!
//! - [`MongoRepo`] - producción, MongoDB con transacciones de sesión
//! - [`MemoryStore`] - tests y desarrollo local (`STORE_BACKEND=memory`)
//!
//! ## Atomicidad
//!
//! Cada transición del ciclo de vida se confirma con
//! [`ReservationStore::commit_transition`]: compare-and-swap sobre
//! `(id, version)` y alta de la fila de auditoría en la misma unidad. Si la
//! versión no coincide no se escribe nada y el llamante relee la reserva.

pub mod memory;
pub mod models;
pub mod mongodb;

pub use self::memory::MemoryStore;
pub use self::mongodb::MongoRepo;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::cmp::Reverse;
use std::str::FromStr;

use crate::api::AppResult;
use crate::dashboard::CardMarker;
use crate::domain::{ActionLogEntry, AuditDraft, Reserva, ReservationId, ReservationStatus};

/// Datos de una reserva nueva; el almacenamiento asigna `id` y `version`
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub nombre: String,
    pub telefono: String,
    pub personas: u32,
    pub fecha: NaiveDate,
    pub hora: NaiveTime,
    pub notas: Option<String>,
    pub restaurant_confirmed: bool,
    pub confirmation_token: String,
    pub created_at: DateTime<Utc>,
}

impl NewReservation {
    pub fn into_reserva(self, id: ReservationId) -> Reserva {
        Reserva {
            id,
            nombre: self.nombre,
            telefono: self.telefono,
            personas: self.personas,
            fecha: self.fecha,
            hora: self.hora,
            notas: self.notas,
            user_confirmed: false,
            restaurant_confirmed: self.restaurant_confirmed,
            cancelled: false,
            cancelled_at: None,
            cancelled_by: None,
            confirmation_token: self.confirmation_token,
            created_at: self.created_at,
            version: 1,
        }
    }
}

/// Filtro por estado del listado de administración
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Confirmed,
    Pending,
    AwaitingCustomer,
    Cancelled,
}

impl StatusFilter {
    pub fn matches(self, reserva: &Reserva) -> bool {
        let status = reserva.status();
        match self {
            Self::All => true,
            Self::Active => reserva.is_active(),
            Self::Confirmed => status == ReservationStatus::FullyConfirmed,
            Self::Pending => status == ReservationStatus::AwaitingRestaurant,
            Self::AwaitingCustomer => status == ReservationStatus::AwaitingCustomer,
            Self::Cancelled => status == ReservationStatus::Cancelled,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "confirmed" => Ok(Self::Confirmed),
            "pending" => Ok(Self::Pending),
            "awaiting_customer" => Ok(Self::AwaitingCustomer),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("estado desconocido '{other}'")),
        }
    }
}

/// Orden del listado: descendente por la clave y después por hora ascendente
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Fecha,
    CreatedAt,
    CancelledAt,
    Personas,
    Hora,
}

impl SortKey {
    /// Clave desconocida: se ordena por fecha
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw {
            Some("created_at") => Self::CreatedAt,
            Some("cancelled_at") => Self::CancelledAt,
            Some("personas") => Self::Personas,
            Some("hora") => Self::Hora,
            _ => Self::Fecha,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub status: StatusFilter,
    /// Fecha exacta; si está presente se ignora el rango
    pub fecha: Option<NaiveDate>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub sort: SortKey,
}

impl ReservationFilter {
    pub fn on(fecha: NaiveDate) -> Self {
        Self {
            fecha: Some(fecha),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            date_from: Some(from),
            date_to: Some(to),
            ..Self::default()
        }
    }

    pub fn matches(&self, reserva: &Reserva) -> bool {
        if !self.status.matches(reserva) {
            return false;
        }
        if let Some(fecha) = self.fecha {
            return reserva.fecha == fecha;
        }
        self.date_from.map_or(true, |from| reserva.fecha >= from) && self.date_to.map_or(true, |to| reserva.fecha <= to)
    }

    /// Aplica el orden pedido; ambas implementaciones lo comparten
    pub fn sort(&self, rows: &mut [Reserva]) {
        match self.sort {
            SortKey::Fecha => rows.sort_by_key(|r| (Reverse(r.fecha), r.hora)),
            SortKey::CreatedAt => rows.sort_by_key(|r| (Reverse(r.created_at), r.hora)),
            SortKey::CancelledAt => rows.sort_by_key(|r| (Reverse(r.cancelled_at), r.hora)),
            SortKey::Personas => rows.sort_by_key(|r| (Reverse(r.personas), r.hora)),
            SortKey::Hora => rows.sort_by_key(|r| r.hora),
        }
    }
}

/// Tarjeta publicada en un canal del panel, tal y como se recuerda
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCard {
    pub channel: String,
    /// Identificador del mensaje en la plataforma de chat
    pub message_id: String,
    pub marker: CardMarker,
    /// Orden de publicación dentro del canal
    pub position: u32,
}

/// Resultado de la limpieza por antigüedad
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PurgeReport {
    pub reservations: u64,
    pub audit_rows: u64,
    pub card_mappings: u64,
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Inserta la reserva y su fila `created` en una sola unidad
    ///
    /// # Errores
    ///
    /// `Integrity` si el token ya existe; el llamante reintenta con otro.
    async fn insert_reservation(&self, new: NewReservation, audit: AuditDraft) -> AppResult<Reserva>;

    async fn get_reservation(&self, id: ReservationId) -> AppResult<Option<Reserva>>;

    async fn find_by_token(&self, token: &str) -> AppResult<Option<Reserva>>;

    /// Primera reserva activa y confirmada por el cliente para `telefono`
    /// con fecha `>= from`, por fecha y hora
    async fn find_active_confirmed_for_phone(&self, telefono: &str, from: NaiveDate) -> AppResult<Option<Reserva>>;

    async fn list_reservations(&self, filter: &ReservationFilter) -> AppResult<Vec<Reserva>>;

    /// Guarda `updated` solo si la versión almacenada es `expected_version`
    ///
    /// Devuelve la fila de auditoría escrita, o `None` si otro escritor se
    /// adelantó. `updated.version` debe ser `expected_version + 1`.
    async fn commit_transition(
        &self,
        updated: &Reserva,
        expected_version: i64,
        audit: AuditDraft,
    ) -> AppResult<Option<ActionLogEntry>>;

    /// Borra la reserva con sus filas de auditoría y sus tarjetas
    async fn delete_reservation(&self, id: ReservationId) -> AppResult<bool>;

    async fn blocked_hours(&self, fecha: NaiveDate) -> AppResult<Vec<NaiveTime>>;

    /// `false` si ya estaba bloqueada
    async fn block_hour(&self, fecha: NaiveDate, hora: NaiveTime) -> AppResult<bool>;

    /// `false` si no estaba bloqueada
    async fn unblock_hour(&self, fecha: NaiveDate, hora: NaiveTime) -> AppResult<bool>;

    /// Sustituye todos los bloqueos de `fecha` por `horas`
    async fn replace_blocked_hours(&self, fecha: NaiveDate, horas: &[NaiveTime]) -> AppResult<()>;

    /// Filas con id mayor que `after_id`, en orden de id
    async fn audit_after(&self, after_id: i64, limit: usize) -> AppResult<Vec<ActionLogEntry>>;

    async fn audit_for_reservation(&self, id: ReservationId) -> AppResult<Vec<ActionLogEntry>>;

    /// Id de la última fila de auditoría, 0 si no hay ninguna
    async fn latest_audit_id(&self) -> AppResult<i64>;

    /// Tarjetas recordadas de un canal, por posición
    async fn rendered_cards(&self, channel: &str) -> AppResult<Vec<RenderedCard>>;

    async fn replace_rendered_cards(&self, channel: &str, cards: Vec<RenderedCard>) -> AppResult<()>;

    async fn sync_cursor(&self, name: &str) -> AppResult<i64>;

    async fn set_sync_cursor(&self, name: &str, value: i64) -> AppResult<()>;

    /// Limpieza: reservas anteriores a `before` (en cascada), auditoría
    /// anterior a `audit_before` y tarjetas huérfanas
    async fn purge(&self, before: NaiveDate, audit_before: DateTime<Utc>) -> AppResult<PurgeReport>;
}
