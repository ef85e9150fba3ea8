//! # Registro de cadenas de error
//!
//! Los handlers registran aquí los fallos internos antes de convertirlos
//! en respuesta HTTP, con la cadena completa de `source()` que `thiserror`
//! conserva (por ejemplo `Database` → `mongodb::error::Error`).

use std::error::Error as StdError;

/// Recorre `source()` desde el error más externo
pub fn error_chain(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        chain.push(err.to_string());
        current = err.source();
    }
    chain
}

/// Registra la cadena completa a nivel `error`
pub fn log_error_chain<E>(error: &E, context: &str)
where
    E: StdError + 'static,
{
    let chain = error_chain(error);
    tracing::error!(context = %context, depth = chain.len(), error_chain = ?chain, "Request failed");
}

/// Registro automático de la cadena de errores sobre un `Result`
///
/// ```ignore
/// let reserva = state
///     .reservations
///     .approve(id, &Actor::Admin)
///     .await
///     .log_error_context("admin approve")?;
/// ```
pub trait ErrorLogExt<T, E> {
    /// Registra a nivel `error` con el contexto dado
    fn log_error_context(self, context: &str) -> Result<T, E>;

    /// Registra con un nivel concreto; por debajo de `WARN` solo el mensaje
    fn log_error_level(self, level: tracing::Level, context: &str) -> Result<T, E>;
}

impl<T, E> ErrorLogExt<T, E> for Result<T, E>
where
    E: StdError + 'static,
{
    fn log_error_context(self, context: &str) -> Result<T, E> {
        if let Err(ref error) = self {
            log_error_chain(error, context);
        }
        self
    }

    fn log_error_level(self, level: tracing::Level, context: &str) -> Result<T, E> {
        if let Err(ref error) = self {
            match level {
                tracing::Level::ERROR => log_error_chain(error, context),
                tracing::Level::WARN => {
                    let chain = error_chain(error);
                    tracing::warn!(context = %context, error_chain = ?chain, "Request rejected");
                }
                _ => tracing::info!(context = %context, error = %error, "Request rejected"),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AppError;
    use crate::domain::Rejection;

    #[derive(Debug, thiserror::Error)]
    #[error("fallo de red")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn chain_follows_sources() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"));
        assert_eq!(error_chain(&err), vec!["fallo de red".to_string(), "timeout".to_string()]);
    }

    #[test]
    fn results_pass_through_untouched() {
        let ok: Result<u8, AppError> = Ok(3);
        assert_eq!(ok.log_error_context("ctx").ok(), Some(3));

        let err: Result<u8, AppError> = Err(Rejection::SlotUnavailable.into());
        let back = err.log_error_level(tracing::Level::INFO, "ctx");
        assert!(matches!(back, Err(AppError::Rejected(Rejection::SlotUnavailable))));
    }
}
