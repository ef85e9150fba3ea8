//! Montaje compartido por los tests de integración: almacenamiento y panel
//! en memoria, reloj fijo y un gateway de SMS que graba lo enviado.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use monges_reservation::api::{AppError, AppResult};
use monges_reservation::clock::FixedClock;
use monges_reservation::config::{AppConfig, ChannelIds, DefaultHours, BUILTIN_DEFAULT_HOURS};
use monges_reservation::dashboard::MemorySurface;
use monges_reservation::db::{MemoryStore, ReservationFilter, ReservationStore};
use monges_reservation::domain::{parse_hora, Reserva};
use monges_reservation::services::{OutboxWorker, SmsGateway};
use monges_reservation::AppState;

pub const ADMIN_TOKEN: &str = "secreto-admin";
pub const TODAY_CHANNEL: &str = "c-today";
pub const CONFIRMED_CHANNEL: &str = "c-confirmed";
pub const PENDING_CHANNEL: &str = "c-pending";
pub const LOG_CHANNEL: &str = "c-log";

/// Graba cada SMS; con `failing` todos los envíos fallan
#[derive(Default)]
pub struct RecordingSms {
    pub sent: Mutex<Vec<(String, String)>>,
    pub failing: bool,
}

#[async_trait]
impl SmsGateway for RecordingSms {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, phone: &str, body: &str) -> AppResult<()> {
        if self.failing {
            return Err(AppError::transport("recording", "gateway caído"));
        }
        self.sent.lock().unwrap().push((phone.to_string(), body.to_string()));
        Ok(())
    }
}

impl RecordingSms {
    pub fn bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub surface: Arc<MemorySurface>,
    pub clock: Arc<FixedClock>,
    pub sms: Arc<RecordingSms>,
    _dir: TempDir,
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
}

pub fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.admin_token = Some(ADMIN_TOKEN.to_string());
    config.domain = "https://reservas.test".to_string();
    config.manager_phones = vec!["+34611000000".to_string()];
    config.sms.timeout = std::time::Duration::from_secs(2);
    config.discord.channels = ChannelIds {
        today: Some(TODAY_CHANNEL.to_string()),
        confirmed: Some(CONFIRMED_CHANNEL.to_string()),
        pending: Some(PENDING_CHANNEL.to_string()),
        log: Some(LOG_CHANNEL.to_string()),
    };
    config
}

/// Reloj parado el jueves 15/10/2026 a las 10:00 en Madrid
pub fn harness() -> Harness {
    harness_with(config(), RecordingSms::default())
}

pub fn harness_with(config: AppConfig, sms: RecordingSms) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let hours = BUILTIN_DEFAULT_HOURS.iter().map(|h| parse_hora(h).unwrap()).collect();
    let default_hours = Arc::new(DefaultHours::in_memory(hours, dir.path().join("default_hours.json")));

    let store = Arc::new(MemoryStore::new());
    let surface = Arc::new(MemorySurface::new());
    let clock = Arc::new(FixedClock::at_local(config.timezone, at(2026, 10, 15, 10, 0)));
    let sms = Arc::new(sms);

    let (state, rx) = AppState::build(config, store.clone(), surface.clone(), clock.clone(), default_hours);
    tokio::spawn(OutboxWorker::new(sms.clone()).run(rx));

    Harness {
        state,
        store,
        surface,
        clock,
        sms,
        _dir: dir,
    }
}

impl Harness {
    pub async fn reservations(&self) -> Vec<Reserva> {
        self.store.list_reservations(&ReservationFilter::default()).await.unwrap()
    }

    /// Token de la reserva más reciente
    pub async fn latest_token(&self) -> String {
        self.reservations()
            .await
            .into_iter()
            .max_by_key(|r| r.id)
            .map(|r| r.confirmation_token)
            .unwrap()
    }
}

/// Espera a que la cola haya entregado `n` mensajes
pub async fn wait_for_sms(sms: &RecordingSms, n: usize) {
    for _ in 0..100 {
        if sms.sent.lock().unwrap().len() >= n {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("solo se enviaron {} SMS de {n}", sms.sent.lock().unwrap().len());
}
