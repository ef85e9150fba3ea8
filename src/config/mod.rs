//! # Configuración
//!
//! Toda la configuración llega por variables de entorno (con `.env` cargado
//! por `dotenvy` en el arranque). Un valor presente pero mal formado detiene
//! el arranque con un error que nombra la variable.
//!
//! | Variable | Por defecto |
//! |----------|-------------|
//! | `BIND_ADDRESS` | `0.0.0.0:8080` |
//! | `STORE_BACKEND` | `mongodb` (`memory` para desarrollo) |
//! | `MONGODB_URI` | `mongodb://localhost:27017` |
//! | `MONGODB_DATABASE` | `monges_reservation` |
//! | `TIMEZONE` | `Europe/Madrid` |
//! | `LARGE_GROUP_THRESHOLD` | `4` |
//! | `DOMAIN` | `http://localhost:8080` |
//! | `MANAGER_PHONES` | lista separada por comas |
//! | `ADMIN_TOKEN` | sin valor: la API de administración queda cerrada |
//! | `CONFIRM_GRACE_MINUTES` | `30` |
//! | `SMS_ENABLED` | `false` (simulación en el log) |
//! | `SYNC_FAST_INTERVAL_SECS` / `SYNC_FULL_INTERVAL_SECS` | `5` / `600` |
//! | `DEFAULT_HOURS_PATH` | `default_hours.json` |
//! | `RETENTION_ENABLED` | `false` |

mod default_hours;

pub use default_hours::{format_hours, parse_hours, DefaultHours, BUILTIN_DEFAULT_HOURS};

use chrono_tz::Tz;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::{AppError, AppResult};

/// Backend de almacenamiento seleccionado con `STORE_BACKEND`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    MongoDb,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongodb" | "mongo" => Ok(Self::MongoDb),
            "memory" => Ok(Self::Memory),
            other => Err(format!("backend desconocido '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    /// Con `false` los mensajes solo se escriben en el log
    pub enabled: bool,
    pub api_user: Option<String>,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

/// Identificadores de los canales del panel; `None` desactiva el canal
#[derive(Debug, Clone, Default)]
pub struct ChannelIds {
    pub today: Option<String>,
    pub confirmed: Option<String>,
    pub pending: Option<String>,
    pub log: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DiscordConfig {
    pub bot_token: Option<String>,
    /// Clave pública Ed25519 de la aplicación, en hexadecimal
    pub public_key: Option<String>,
    pub channels: ChannelIds,
}

impl DiscordConfig {
    pub fn enabled(&self) -> bool {
        self.bot_token.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub fast_interval: Duration,
    pub full_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub audit_days: i64,
    /// Hora local a la que se ejecuta la limpieza diaria
    pub run_hour: u32,
}

/// Configuración completa del servidor
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub store_backend: StoreBackend,
    pub mongodb_uri: String,
    pub mongodb_database: String,
    /// Zona horaria del restaurante; todas las reglas de horario la usan
    pub timezone: Tz,
    /// Grupos con más personas que este valor necesitan aprobación
    pub large_group_threshold: u32,
    /// URL pública base para los enlaces del SMS
    pub domain: String,
    pub restaurant_name: String,
    pub restaurant_phone: String,
    pub manager_phones: Vec<String>,
    pub admin_token: Option<String>,
    /// Margen tras la hora de la reserva durante el que aún se acepta confirmar
    pub confirm_grace_minutes: i64,
    pub sms: SmsConfig,
    pub discord: DiscordConfig,
    pub sync: SyncConfig,
    pub default_hours_path: PathBuf,
    pub retention: RetentionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            store_backend: StoreBackend::MongoDb,
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            mongodb_database: "monges_reservation".to_string(),
            timezone: chrono_tz::Europe::Madrid,
            large_group_threshold: 4,
            domain: "http://localhost:8080".to_string(),
            restaurant_name: "Les Monges".to_string(),
            restaurant_phone: "965 78 57 31".to_string(),
            manager_phones: Vec::new(),
            admin_token: None,
            confirm_grace_minutes: 30,
            sms: SmsConfig {
                enabled: false,
                api_user: None,
                api_token: None,
                timeout: Duration::from_secs(10),
            },
            discord: DiscordConfig::default(),
            sync: SyncConfig {
                fast_interval: Duration::from_secs(5),
                full_interval: Duration::from_secs(600),
            },
            default_hours_path: PathBuf::from("default_hours.json"),
            retention: RetentionConfig {
                enabled: false,
                audit_days: 30,
                run_hour: 2,
            },
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde las variables de entorno del proceso
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Carga la configuración a partir de una función de consulta
    ///
    /// Permite construir configuraciones en tests sin tocar el entorno
    /// global del proceso.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let base = Self::default();

        let config = Self {
            bind_address: env.string("BIND_ADDRESS").unwrap_or(base.bind_address),
            store_backend: env.parsed("STORE_BACKEND")?.unwrap_or(base.store_backend),
            mongodb_uri: env.string("MONGODB_URI").unwrap_or(base.mongodb_uri),
            mongodb_database: env.string("MONGODB_DATABASE").unwrap_or(base.mongodb_database),
            timezone: env.parsed("TIMEZONE")?.unwrap_or(base.timezone),
            large_group_threshold: env.parsed("LARGE_GROUP_THRESHOLD")?.unwrap_or(base.large_group_threshold),
            domain: env.string("DOMAIN").unwrap_or(base.domain),
            restaurant_name: env.string("RESTAURANT_NAME").unwrap_or(base.restaurant_name),
            restaurant_phone: env.string("RESTAURANT_PHONE").unwrap_or(base.restaurant_phone),
            manager_phones: env
                .string("MANAGER_PHONES")
                .map(|raw| split_list(&raw))
                .unwrap_or(base.manager_phones),
            admin_token: env.string("ADMIN_TOKEN"),
            confirm_grace_minutes: env.parsed("CONFIRM_GRACE_MINUTES")?.unwrap_or(base.confirm_grace_minutes),
            sms: SmsConfig {
                enabled: env.flag("SMS_ENABLED")?.unwrap_or(base.sms.enabled),
                api_user: env.string("MENSATEK_API_USER"),
                api_token: env.string("MENSATEK_API_TOKEN"),
                timeout: env.seconds("SMS_TIMEOUT_SECS")?.unwrap_or(base.sms.timeout),
            },
            discord: DiscordConfig {
                bot_token: env.string("DISCORD_BOT_TOKEN"),
                public_key: env.string("DISCORD_PUBLIC_KEY"),
                channels: ChannelIds {
                    today: env.string("DISCORD_TODAY_CHANNEL_ID"),
                    confirmed: env.string("DISCORD_CONFIRMED_CHANNEL_ID"),
                    pending: env.string("DISCORD_PENDING_CHANNEL_ID"),
                    log: env.string("DISCORD_LOG_CHANNEL_ID"),
                },
            },
            sync: SyncConfig {
                fast_interval: env.seconds("SYNC_FAST_INTERVAL_SECS")?.unwrap_or(base.sync.fast_interval),
                full_interval: env.seconds("SYNC_FULL_INTERVAL_SECS")?.unwrap_or(base.sync.full_interval),
            },
            default_hours_path: env
                .string("DEFAULT_HOURS_PATH")
                .map(PathBuf::from)
                .unwrap_or(base.default_hours_path),
            retention: RetentionConfig {
                enabled: env.flag("RETENTION_ENABLED")?.unwrap_or(base.retention.enabled),
                audit_days: env.parsed("RETENTION_AUDIT_DAYS")?.unwrap_or(base.retention.audit_days),
                run_hour: env.parsed("RETENTION_RUN_HOUR")?.unwrap_or(base.retention.run_hour),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.retention.run_hour > 23 {
            return Err(AppError::validation_field("RETENTION_RUN_HOUR", "debe estar entre 0 y 23"));
        }
        if self.confirm_grace_minutes < 0 {
            return Err(AppError::validation_field("CONFIRM_GRACE_MINUTES", "no puede ser negativo"));
        }
        if self.sync.fast_interval.is_zero() || self.sync.full_interval.is_zero() {
            return Err(AppError::validation_field("SYNC_FAST_INTERVAL_SECS", "los intervalos deben ser mayores que 0"));
        }
        if self.sms.enabled && (self.sms.api_user.is_none() || self.sms.api_token.is_none()) {
            return Err(AppError::validation_field(
                "MENSATEK_API_USER",
                "SMS_ENABLED requiere MENSATEK_API_USER y MENSATEK_API_TOKEN",
            ));
        }
        Ok(())
    }

    pub fn confirm_grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.confirm_grace_minutes)
    }

    /// Enlace público de confirmación
    pub fn confirm_link(&self, token: &str) -> String {
        format!("{}/confirm/{}", self.domain.trim_end_matches('/'), token)
    }

    /// Enlace público de cancelación
    pub fn cancel_link(&self, token: &str) -> String {
        format!("{}/cancel/{}", self.domain.trim_end_matches('/'), token)
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Valor no vacío de la variable
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, key: &str) -> AppResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| AppError::validation_field(key, &format!("valor inválido '{raw}': {e}")))
            })
            .transpose()
    }

    fn flag(&self, key: &str) -> AppResult<Option<bool>> {
        self.string(key)
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(AppError::validation_field(key, &format!("se esperaba true/false, no '{raw}'"))),
            })
            .transpose()
    }

    fn seconds(&self, key: &str) -> AppResult<Option<Duration>> {
        Ok(self.parsed::<u64>(key)?.map(Duration::from_secs))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(crate::domain::canonical_phone)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::assert_err;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.timezone, chrono_tz::Europe::Madrid);
        assert_eq!(config.large_group_threshold, 4);
        assert_eq!(config.confirm_grace_minutes, 30);
        assert!(!config.sms.enabled);
        assert!(config.admin_token.is_none());
        assert!(!config.discord.enabled());
    }

    #[test]
    fn variables_override_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            ("STORE_BACKEND", "memory"),
            ("TIMEZONE", "Europe/London"),
            ("LARGE_GROUP_THRESHOLD", "6"),
            ("MANAGER_PHONES", "600 111 222, +34 600 333 444,"),
            ("DOMAIN", "https://lesmonges.example/"),
        ]))
        .unwrap();

        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.timezone, chrono_tz::Europe::London);
        assert_eq!(config.large_group_threshold, 6);
        assert_eq!(config.manager_phones, vec!["+600111222", "+34600333444"]);
        assert_eq!(config.confirm_link("abc"), "https://lesmonges.example/confirm/abc");
        assert_eq!(config.cancel_link("abc"), "https://lesmonges.example/cancel/abc");
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = AppConfig::from_lookup(lookup(&[("LARGE_GROUP_THRESHOLD", "muchos")])).unwrap_err();
        assert!(err.to_string().contains("LARGE_GROUP_THRESHOLD"));

        assert_err!(AppConfig::from_lookup(lookup(&[("TIMEZONE", "Mars/Olympus")])));
        assert_err!(AppConfig::from_lookup(lookup(&[("SMS_ENABLED", "quizas")])));
        assert_err!(AppConfig::from_lookup(lookup(&[("RETENTION_RUN_HOUR", "25")])));
    }

    #[test]
    fn real_sms_needs_credentials() {
        assert_err!(AppConfig::from_lookup(lookup(&[("SMS_ENABLED", "true")])));
        let config = AppConfig::from_lookup(lookup(&[
            ("SMS_ENABLED", "true"),
            ("MENSATEK_API_USER", "user"),
            ("MENSATEK_API_TOKEN", "secret"),
        ]))
        .unwrap();
        assert!(config.sms.enabled);
    }
}
