//! # Módulo API
//!
//! Rutas y controladores HTTP.
//!
//! ## Módulos principales
//!
//! - [`reservation`] - Formulario público y enlaces del SMS
//! - [`admin`] - Gestión para el personal (token Bearer)
//! - [`dashboard`] - Webhook de interacciones del panel de chat
//! - [`pages`] - Páginas HTML de confirmación y cancelación
//! - [`errors`] - Manejo de errores de la aplicación

pub mod admin;
pub mod dashboard;
pub mod errors;
pub mod middleware;
pub mod pages;
pub mod reservation;

pub use errors::{AppError, AppResult, ErrorResponse, ResultExt};

use actix_web::web;

/// Configura todas las rutas de la API
///
/// ```no_run
/// use actix_web::{web, App};
/// use monges_reservation::{api, AppState};
///
/// fn app(state: AppState) {
///     let _ = App::new()
///         .app_data(web::Data::new(state))
///         .configure(api::init_routes);
/// }
/// ```
pub fn init_routes(cfg: &mut web::ServiceConfig) {
    reservation::routes(cfg);
    admin::routes(cfg);
    dashboard::routes(cfg);
}
