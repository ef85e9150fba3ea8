//! # Panel de personal
//!
//! Proyección de las reservas en canales de chat. El almacenamiento es la
//! única fuente de verdad; los canales se reconcilian contra él.
//!
//! - [`surface`] - Contrato mínimo con la plataforma y doble en memoria
//! - [`channels`] - Qué reservas pertenecen a cada canal
//! - [`cards`] - Presentación de tarjetas
//! - [`reconcile`] - Motor de reconciliación
//! - [`worker`] - Bucle de sincronización y disparador
//! - [`interactions`] - Botones, formularios y comandos
//! - [`discord`] - Transporte Discord (REST v10 y webhooks firmados)

pub mod cards;
pub mod channels;
pub mod discord;
pub mod interactions;
pub mod reconcile;
pub mod surface;
pub mod worker;

pub use channels::ChannelKind;
pub use discord::DiscordSurface;
pub use interactions::{CustomId, InteractionEvent, InteractionHandler, InteractionReply};
pub use reconcile::{Outcome, Reconciler, RunMode};
pub use surface::{Card, CardMarker, DisplaySurface, MemorySurface, VisibleMessage};
pub use worker::{SyncTrigger, SyncWorker};
