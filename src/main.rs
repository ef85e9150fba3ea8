//! # Monges Reservation Server
//!
//! Servidor de reservas de un restaurante construido con Rust, Actix Web y
//! MongoDB.
//!
//! ## Configuración
//!
//! Variables de entorno (archivo `.env`); las más habituales:
//!
//! ```env
//! BIND_ADDRESS=0.0.0.0:8080
//! STORE_BACKEND=mongodb            # o "memory" para desarrollo local
//! MONGODB_URI=mongodb://localhost:27017/?replicaSet=rs0
//! MONGODB_DATABASE=monges_reservation
//! DOMAIN=https://reservas.example.com
//! ADMIN_TOKEN=...
//! SMS_ENABLED=false
//! DISCORD_BOT_TOKEN=...
//! RUST_LOG=monges_reservation=debug,mongodb=info
//! ```
//!
//! La lista completa está en [`monges_reservation::config::AppConfig`].
//!
//! ## Tareas en segundo plano
//!
//! - Cola de SMS (siempre)
//! - Bucle de sincronización del panel (con `DISCORD_BOT_TOKEN`)
//! - Limpieza diaria (con `RETENTION_ENABLED=true`)

use actix_files::Files;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use monges_reservation::api::{self, AppError};
use monges_reservation::clock::{Clock, SystemClock};
use monges_reservation::config::{AppConfig, ChannelIds, DefaultHours, StoreBackend};
use monges_reservation::dashboard::{DiscordSurface, DisplaySurface, MemorySurface, RunMode};
use monges_reservation::db::{MemoryStore, MongoRepo, ReservationStore};
use monges_reservation::services::{gateway_from_config, OutboxWorker};
use monges_reservation::AppState;

const DISCORD_TIMEOUT: Duration = Duration::from_secs(10);

fn startup_error(stage: &str, error: AppError) -> io::Error {
    monges_reservation::api::middleware::log_error_chain(&error, stage);
    io::Error::new(io::ErrorKind::Other, format!("{stage}: {error}"))
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn ReservationStore>, AppError> {
    match config.store_backend {
        StoreBackend::MongoDb => {
            let repo = MongoRepo::init(&config.mongodb_uri, &config.mongodb_database).await?;
            if let Err(e) = repo.create_indexes().await {
                // No es fatal: el servidor funciona sin índices, más lento
                tracing::warn!(error = %e, "Could not create MongoDB indexes");
            }
            Ok(Arc::new(repo))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store: data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn open_surface(config: &mut AppConfig) -> Result<Arc<dyn DisplaySurface>, AppError> {
    match &config.discord.bot_token {
        Some(token) => Ok(Arc::new(DiscordSurface::new(token.clone(), DISCORD_TIMEOUT)?)),
        None => {
            tracing::info!("DISCORD_BOT_TOKEN not set, dashboard disabled");
            config.discord.channels = ChannelIds::default();
            Ok(Arc::new(MemorySurface::new()))
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("monges_reservation=debug,mongodb=info")),
        )
        .init();

    let mut config = AppConfig::from_env().map_err(|e| startup_error("config", e))?;
    tracing::info!(
        restaurant = %config.restaurant_name,
        timezone = %config.timezone,
        backend = ?config.store_backend,
        "Starting Monges Reservation Server"
    );

    let store = open_store(&config).await.map_err(|e| startup_error("store", e))?;
    let surface = open_surface(&mut config).map_err(|e| startup_error("dashboard", e))?;
    let gateway = gateway_from_config(&config).map_err(|e| startup_error("sms", e))?;
    let default_hours = Arc::new(DefaultHours::load(&config.default_hours_path).map_err(|e| startup_error("default hours", e))?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.timezone));
    let dashboard_enabled = config.discord.enabled();
    let retention_enabled = config.retention.enabled;
    let bind_address = config.bind_address.clone();

    let (state, outbox_rx) = AppState::build(config, store, surface, clock, default_hours);

    tracing::info!(gateway = gateway.name(), "SMS outbox worker started");
    tokio::spawn(OutboxWorker::new(gateway).run(outbox_rx));

    if dashboard_enabled {
        let reconciler = state.reconciler.clone();
        let worker = state.sync_worker();
        tokio::spawn(async move {
            // Arranque: reconstrucción completa antes del bucle normal
            reconciler.reconcile_all(RunMode::Forced).await;
            worker.run().await;
        });
    }
    if retention_enabled {
        tokio::spawn(state.retention_sweep().run());
    }

    tracing::info!(address = %bind_address, "HTTP server listening");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .configure(api::init_routes)
            .service(Files::new("/static", "./static").index_file("index.html"))
            .route(
                "/",
                web::get().to(|| async {
                    actix_web::HttpResponse::PermanentRedirect()
                        .append_header(("Location", "/static/index.html"))
                        .finish()
                }),
            )
    })
    .bind(&bind_address)?
    .run()
    .await
}
