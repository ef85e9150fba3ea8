//! Superficie de visualización: lo mínimo que el motor necesita de la
//! plataforma de chat (publicar, borrar, listar).

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::api::{AppError, AppResult};
use crate::domain::{ReservationId, DATE_FORMAT};

const MARKER_PREFIX: &str = "ref:";

/// Identidad incrustada en cada tarjeta para poder leerla de vuelta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CardMarker {
    /// Cabecera de un grupo de fecha
    Header(NaiveDate),
    Reservation(ReservationId),
    /// "No hay reservas"
    Placeholder,
}

impl CardMarker {
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.trim().strip_prefix(MARKER_PREFIX)?;
        if rest == "vacio" {
            return Some(Self::Placeholder);
        }
        if let Some(fecha) = rest.strip_prefix("fecha:") {
            return NaiveDate::parse_from_str(fecha, DATE_FORMAT).ok().map(Self::Header);
        }
        rest.strip_prefix("reserva:")?.parse().ok().map(Self::Reservation)
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        match self {
            Self::Reservation(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for CardMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header(fecha) => write!(f, "{MARKER_PREFIX}fecha:{}", fecha.format(DATE_FORMAT)),
            Self::Reservation(id) => write!(f, "{MARKER_PREFIX}reserva:{id}"),
            Self::Placeholder => write!(f, "{MARKER_PREFIX}vacio"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

/// Botón de una tarjeta; `custom_id` vuelve en la interacción
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardAction {
    pub custom_id: String,
    pub label: String,
    pub style: ActionStyle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Contenido de un mensaje del panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    /// Sin marcador para las entradas del canal de registro
    pub marker: Option<CardMarker>,
    pub title: String,
    pub description: Option<String>,
    pub color: u32,
    pub fields: Vec<CardField>,
    pub actions: Vec<CardAction>,
}

impl Card {
    pub fn new(title: impl Into<String>, color: u32) -> Self {
        Self {
            marker: None,
            title: title.into(),
            description: None,
            color,
            fields: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn marked(mut self, marker: CardMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn field(mut self, name: &str, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(CardField {
            name: name.to_string(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn action(mut self, custom_id: String, label: &str, style: ActionStyle) -> Self {
        self.actions.push(CardAction {
            custom_id,
            label: label.to_string(),
            style,
        });
        self
    }
}

/// Mensaje visible en un canal, tal y como se lee de vuelta
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleMessage {
    pub message_id: String,
    /// `None` para mensajes que no publicó el panel o no llevan marcador
    pub marker: Option<CardMarker>,
}

#[async_trait]
pub trait DisplaySurface: Send + Sync {
    /// Publica una tarjeta y devuelve el id del mensaje
    async fn post(&self, channel: &str, card: &Card) -> AppResult<String>;

    async fn delete(&self, channel: &str, message_id: &str) -> AppResult<()>;

    /// Mensajes visibles, del más antiguo al más reciente
    async fn list(&self, channel: &str) -> AppResult<Vec<VisibleMessage>>;
}

/// Superficie en memoria; cuenta las escrituras para los tests de
/// idempotencia y puede simular una caída a mitad de reconstrucción
#[derive(Debug, Default)]
pub struct MemorySurface {
    inner: Mutex<SurfaceState>,
}

#[derive(Debug, Default)]
struct SurfaceState {
    channels: HashMap<String, Vec<(String, Card)>>,
    next_id: u64,
    writes: u64,
    /// Publicaciones restantes antes de fallar
    fail_after: Option<u64>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publicaciones y borrados realizados desde el inicio
    pub fn writes(&self) -> u64 {
        self.state().writes
    }

    pub fn cards(&self, channel: &str) -> Vec<Card> {
        self.state()
            .channels
            .get(channel)
            .map(|msgs| msgs.iter().map(|(_, card)| card.clone()).collect())
            .unwrap_or_default()
    }

    pub fn markers(&self, channel: &str) -> Vec<CardMarker> {
        self.cards(channel).into_iter().filter_map(|c| c.marker).collect()
    }

    /// Falla a partir de la publicación número `posts + 1`
    pub fn fail_after(&self, posts: u64) {
        self.state().fail_after = Some(posts);
    }

    pub fn recover(&self) {
        self.state().fail_after = None;
    }

    /// Borra un mensaje sin pasar por el motor (un humano en el canal)
    pub fn remove_externally(&self, channel: &str, index: usize) -> Option<Card> {
        let mut state = self.state();
        let msgs = state.channels.get_mut(channel)?;
        (index < msgs.len()).then(|| msgs.remove(index).1)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SurfaceState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl DisplaySurface for MemorySurface {
    async fn post(&self, channel: &str, card: &Card) -> AppResult<String> {
        let mut state = self.state();
        if let Some(left) = state.fail_after.as_mut() {
            if *left == 0 {
                return Err(AppError::transport("memory", "fallo simulado"));
            }
            *left -= 1;
        }
        state.next_id += 1;
        state.writes += 1;
        let id = state.next_id.to_string();
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .push((id.clone(), card.clone()));
        Ok(id)
    }

    async fn delete(&self, channel: &str, message_id: &str) -> AppResult<()> {
        let mut state = self.state();
        state.writes += 1;
        if let Some(msgs) = state.channels.get_mut(channel) {
            msgs.retain(|(id, _)| id != message_id);
        }
        Ok(())
    }

    async fn list(&self, channel: &str) -> AppResult<Vec<VisibleMessage>> {
        Ok(self
            .state()
            .channels
            .get(channel)
            .map(|msgs| {
                msgs.iter()
                    .map(|(id, card)| VisibleMessage {
                        message_id: id.clone(),
                        marker: card.marker,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_read_back_what_they_write() {
        let fecha = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        for marker in [CardMarker::Header(fecha), CardMarker::Reservation(42), CardMarker::Placeholder] {
            assert_eq!(CardMarker::parse(&marker.to_string()), Some(marker));
        }
        assert_eq!(CardMarker::Header(fecha).to_string(), "ref:fecha:2026-10-16");
    }

    #[test]
    fn foreign_text_is_not_a_marker() {
        assert_eq!(CardMarker::parse("Reserva #42"), None);
        assert_eq!(CardMarker::parse("ref:reserva:abc"), None);
        assert_eq!(CardMarker::parse("ref:fecha:16/10/2026"), None);
    }

    #[tokio::test]
    async fn memory_surface_counts_writes_and_can_fail() {
        let surface = MemorySurface::new();
        let card = Card::new("hola", 0).marked(CardMarker::Placeholder);

        let id = surface.post("c", &card).await.unwrap();
        surface.delete("c", &id).await.unwrap();
        assert_eq!(surface.writes(), 2);
        assert!(surface.list("c").await.unwrap().is_empty());

        surface.fail_after(1);
        assert!(surface.post("c", &card).await.is_ok());
        assert!(surface.post("c", &card).await.is_err());
        surface.recover();
        assert!(surface.post("c", &card).await.is_ok());
    }
}
