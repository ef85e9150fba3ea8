//! # Plantilla de horas por defecto
//!
//! Valor versionado respaldado por un fichero JSON (`["13:00", "13:30", ...]`).
//! Cada lectura compara la fecha de modificación del fichero con la última
//! cargada y recarga si ha cambiado, así que se puede editar el fichero sin
//! reiniciar el proceso. Las escrituras actualizan fichero y memoria bajo el
//! mismo cerrojo de escritura.

use chrono::NaiveTime;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use crate::api::{AppError, AppResult, ResultExt};
use crate::domain::{reservation::parse_hora, TIME_FORMAT};

pub const BUILTIN_DEFAULT_HOURS: [&str; 8] = ["13:00", "13:30", "14:00", "14:30", "20:30", "21:00", "21:30", "22:00"];

#[derive(Debug)]
struct Snapshot {
    hours: Vec<NaiveTime>,
    version: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug)]
pub struct DefaultHours {
    path: PathBuf,
    inner: RwLock<Snapshot>,
}

impl DefaultHours {
    /// Carga la plantilla desde `path`
    ///
    /// Si el fichero no existe se usa la plantilla integrada; se creará en la
    /// primera escritura. Un fichero existente pero ilegible es un error.
    pub fn load(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let snapshot = match read_file(&path)? {
            Some((hours, modified)) => {
                tracing::info!(path = %path.display(), count = hours.len(), "Default hours loaded from file");
                Snapshot {
                    hours,
                    version: 1,
                    modified,
                }
            }
            None => {
                tracing::info!(path = %path.display(), "Default hours file not found, using built-in template");
                Snapshot {
                    hours: builtin(),
                    version: 1,
                    modified: None,
                }
            }
        };

        Ok(Self {
            path,
            inner: RwLock::new(snapshot),
        })
    }

    /// Plantilla en memoria sin fichero de respaldo en disco
    pub fn in_memory(hours: Vec<NaiveTime>, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: RwLock::new(Snapshot {
                hours: normalize(hours),
                version: 1,
                modified: None,
            }),
        }
    }

    /// Plantilla vigente, recargada si el fichero cambió
    pub fn current(&self) -> Vec<NaiveTime> {
        self.refresh();
        self.read().hours.clone()
    }

    /// Contador que avanza con cada recarga o escritura
    pub fn version(&self) -> u64 {
        self.refresh();
        self.read().version
    }

    /// Sustituye la plantilla
    ///
    /// # Errores
    ///
    /// - `Validation` si la lista queda vacía
    /// - `Internal` si no se puede escribir el fichero; en ese caso la
    ///   plantilla en memoria no cambia
    pub fn replace(&self, hours: Vec<NaiveTime>) -> AppResult<Vec<NaiveTime>> {
        let hours = normalize(hours);
        if hours.is_empty() {
            return Err(AppError::validation_field("hours", "La lista de horas no puede estar vacía"));
        }

        let mut guard = self.write();
        let modified = write_file(&self.path, &hours)?;
        guard.hours = hours.clone();
        guard.version += 1;
        guard.modified = modified;

        tracing::info!(version = guard.version, hours = ?format_hours(&hours), "Default hours updated");
        Ok(hours)
    }

    fn refresh(&self) {
        let on_disk = file_modified(&self.path);
        if on_disk.is_none() || on_disk == self.read().modified {
            return;
        }

        let mut guard = self.write();
        if on_disk == guard.modified {
            return;
        }
        match read_file(&self.path) {
            Ok(Some((hours, modified))) if !hours.is_empty() => {
                guard.hours = hours;
                guard.modified = modified;
                guard.version += 1;
                tracing::info!(version = guard.version, "Default hours reloaded after file change");
            }
            Ok(_) => {
                guard.modified = on_disk;
                tracing::warn!(path = %self.path.display(), "Default hours file is empty, keeping current template");
            }
            Err(e) => {
                guard.modified = on_disk;
                tracing::warn!(path = %self.path.display(), error = %e, "Default hours file unreadable, keeping current template");
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Valida una lista de horas `HH:MM`
pub fn parse_hours(raw: &[String]) -> AppResult<Vec<NaiveTime>> {
    raw.iter().map(|h| parse_hora(h)).collect()
}

pub fn format_hours(hours: &[NaiveTime]) -> Vec<String> {
    hours.iter().map(|h| h.format(TIME_FORMAT).to_string()).collect()
}

fn builtin() -> Vec<NaiveTime> {
    BUILTIN_DEFAULT_HOURS
        .iter()
        .filter_map(|h| NaiveTime::parse_from_str(h, TIME_FORMAT).ok())
        .collect()
}

fn normalize(mut hours: Vec<NaiveTime>) -> Vec<NaiveTime> {
    hours.sort();
    hours.dedup();
    hours
}

fn file_modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_file(path: &Path) -> AppResult<Option<(Vec<NaiveTime>, Option<SystemTime>)>> {
    if !path.exists() {
        return Ok(None);
    }
    let modified = file_modified(path);
    let raw = fs::read_to_string(path).map_err_internal("Error leyendo horas por defecto")?;
    let list: Vec<String> = serde_json::from_str(&raw).map_err_validation("Fichero de horas por defecto inválido")?;
    Ok(Some((normalize(parse_hours(&list)?), modified)))
}

/// Escritura atómica: fichero temporal en el mismo directorio y `rename`
fn write_file(path: &Path, hours: &[NaiveTime]) -> AppResult<Option<SystemTime>> {
    let body = serde_json::to_string_pretty(&format_hours(hours)).map_err_internal("Error serializando horas")?;
    let tmp = path.with_extension("json.tmp");

    let mut file = fs::File::create(&tmp).map_err_internal("Error creando fichero temporal de horas")?;
    file.write_all(body.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err_internal("Error escribiendo horas por defecto")?;
    fs::rename(&tmp, path).map_err_internal("Error reemplazando fichero de horas")?;

    Ok(file_modified(path))
}
