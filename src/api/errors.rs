//! # Manejo de errores
//!
//! Taxonomía única de la aplicación construida con thiserror. Las variantes
//! distinguen lo que se devuelve tal cual al usuario (validación, rechazos de
//! política, no encontrado) de los fallos de infraestructura.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::error::Error;
use thiserror::Error;

use crate::domain::Rejection;

/// Tipos de error de la aplicación con contexto
#[derive(Error, Debug)]
pub enum AppError {
    /// Error de base de datos con la operación que lo produjo
    ///
    /// Conserva la cadena de errores del driver de MongoDB.
    #[error("Error de base de datos en operación '{operation}': {source}")]
    Database {
        operation: String,
        #[source]
        source: mongodb::error::Error,
    },

    /// Error de validación con campo específico
    #[error("Error de validación en campo '{field}': {message}")]
    ValidationWithField { field: String, message: String },

    /// Error de validación general
    #[error("Error de validación: {0}")]
    Validation(String),

    /// La petición es válida pero una regla de negocio la rechaza
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("No autorizado: {0}")]
    Unauthorized(String),

    /// Error de recurso no encontrado
    #[error("No encontrado: {resource_type} con ID '{id}'")]
    NotFoundWithId { resource_type: String, id: String },

    #[error("No encontrado: {0}")]
    NotFound(String),

    /// Restricción de almacenamiento violada (p. ej. token duplicado)
    #[error("Violación de integridad: {0}")]
    Integrity(String),

    /// Fallo de un transporte externo (SMS, panel de chat)
    #[error("Fallo de transporte '{transport}': {message}")]
    Transport { transport: String, message: String },

    /// Error interno con código de rastreo
    #[error("Error interno (trace: {trace_id}): {message}")]
    InternalWithTrace { trace_id: String, message: String },

    #[error("Error interno: {0}")]
    Internal(String),
}

impl AppError {
    /// Crea un error de base de datos con contexto de operación
    pub fn database(operation: &str, source: mongodb::error::Error) -> Self {
        Self::Database {
            operation: operation.to_string(),
            source,
        }
    }

    pub fn validation_field(field: &str, message: &str) -> Self {
        Self::ValidationWithField {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    /// Crea un error de no encontrado con ID
    pub fn not_found_id(resource_type: &str, id: impl ToString) -> Self {
        Self::NotFoundWithId {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    pub fn transport(transport: &str, message: impl Into<String>) -> Self {
        Self::Transport {
            transport: transport.to_string(),
            message: message.into(),
        }
    }

    /// Crea un error interno con trace ID
    pub fn internal_trace(message: &str, trace_id: Option<String>) -> Self {
        Self::InternalWithTrace {
            trace_id: trace_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            message: message.to_string(),
        }
    }

    /// Mensaje apto para mostrar al usuario final
    pub fn user_message(&self) -> String {
        match self {
            Self::ValidationWithField { message, .. } => message.clone(),
            Self::Validation(message) => message.clone(),
            Self::Rejected(rejection) => rejection.to_string(),
            Self::NotFoundWithId { resource_type, .. } => format!("{resource_type} no encontrada"),
            Self::NotFound(message) => message.clone(),
            Self::Unauthorized(message) => message.clone(),
            _ => "Error procesando la solicitud. Por favor, intenta de nuevo.".to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationWithField { .. } | Self::Validation(_) | Self::Rejected(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFoundWithId { .. } | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Integrity(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Log detallado del error antes de responder
        let (error, message) = match self {
            Self::Database { operation, source } => {
                tracing::error!(
                    operation = %operation,
                    error = %source,
                    error_chain = ?source.source(),
                    "Database error occurred"
                );
                ("Error de base de datos", "Error interno del servidor".to_string())
            }
            Self::ValidationWithField { field, message } => {
                tracing::warn!(field = %field, message = %message, "Validation error");
                ("Error de validación", message.clone())
            }
            Self::Validation(message) => {
                tracing::warn!(message = %message, "Validation error");
                ("Error de validación", message.clone())
            }
            Self::Rejected(rejection) => {
                tracing::info!(rejection = ?rejection, "Request rejected by policy");
                ("Solicitud rechazada", rejection.to_string())
            }
            Self::Unauthorized(reason) => {
                tracing::warn!(reason = %reason, "Unauthorized access attempt");
                ("No autorizado", reason.clone())
            }
            Self::NotFoundWithId { resource_type, id } => {
                tracing::info!(resource_type = %resource_type, id = %id, "Resource not found");
                ("No encontrado", format!("{} con ID '{}' no encontrada", resource_type, id))
            }
            Self::NotFound(message) => ("No encontrado", message.clone()),
            Self::Integrity(message) => {
                tracing::error!(message = %message, "Integrity violation");
                ("Conflicto de integridad", "La operación no se completó, inténtalo de nuevo".to_string())
            }
            Self::InternalWithTrace { trace_id, message } => {
                tracing::error!(trace_id = %trace_id, message = %message, "Internal error with trace");
                ("Error interno", format!("Error interno (trace: {})", trace_id))
            }
            // Fallback para otros errores
            error => {
                tracing::error!(error = %error, error_chain = ?error.source(), "General error");
                ("Error", self.user_message())
            }
        };

        HttpResponse::build(self.status_code()).json(ErrorResponse {
            success: false,
            error: error.to_string(),
            message,
        })
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
}

pub type AppResult<T> = Result<T, AppError>;

impl From<mongodb::error::Error> for AppError {
    fn from(error: mongodb::error::Error) -> Self {
        Self::Database {
            operation: "database_operation".to_string(),
            source: error,
        }
    }
}

pub trait ResultExt<T> {
    fn map_err_validation(self, message: &str) -> AppResult<T>;
    fn map_err_internal(self, message: &str) -> AppResult<T>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + 'static,
{
    fn map_err_validation(self, message: &str) -> AppResult<T> {
        self.map_err(|e| AppError::Validation(format!("{}: {}", message, e)))
    }

    fn map_err_internal(self, message: &str) -> AppResult<T> {
        self.map_err(|e| AppError::internal_trace(&format!("{}: {}", message, e), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_rejections_are_client_errors() {
        let err: AppError = Rejection::SlotUnavailable.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.user_message(), "Esta hora no está disponible");
    }

    #[test]
    fn integrity_and_transport_are_not_hidden() {
        assert_eq!(AppError::Integrity("token".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::transport("sms", "timeout").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn missing_resource_is_404() {
        assert_eq!(AppError::not_found_id("Reserva", 7).status_code(), StatusCode::NOT_FOUND);
    }
}
