//! Páginas HTML de los enlaces del SMS
//!
//! Todo texto que procede del cliente pasa por [`escape`].

use actix_web::http::StatusCode;
use actix_web::HttpResponse;

use crate::domain::Reserva;

const STYLE: &str = r#"
body { font-family: Georgia, serif; display: flex; justify-content: center; align-items: center;
       min-height: 100vh; margin: 0; background: linear-gradient(135deg, #faf8f3 0%, #fff 100%); }
.container { text-align: center; padding: 40px; background: white; border-radius: 10px;
             box-shadow: 0 10px 30px rgba(0,0,0,0.1); max-width: 500px; }
h1 { color: #2a2523; margin: 20px 0; }
h1.error { color: #dc3545; }
p { color: #666; line-height: 1.6; margin: 15px 0; }
.details { background: #f9f9f9; padding: 20px; border-radius: 8px; margin: 20px 0; }
.detail-row { display: flex; justify-content: space-between; margin: 10px 0; }
.detail-label { font-weight: bold; color: #333; }
.pending-approval { background: #fff3cd; border: 2px solid #ffc107; padding: 15px; border-radius: 8px; }
.confirm-btn { padding: 15px 40px; background: #32cd32; color: white; border: none; border-radius: 8px;
               font-size: 1.1rem; font-weight: bold; cursor: pointer; }
a { display: inline-block; margin-top: 20px; padding: 12px 30px; color: #666; text-decoration: none;
    border: 2px solid #ddd; border-radius: 5px; }
a.cancel-btn { background: #dc3545; color: white; border-color: #dc3545; font-weight: bold; }
"#;

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(status: StatusCode, title: &str, restaurant: &str, body: String) -> HttpResponse {
    let html = format!(
        "<!DOCTYPE html>\n<html lang=\"es\">\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>{} - {}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n<div class=\"container\">\n{body}\n</div>\n</body>\n</html>\n",
        escape(title),
        escape(restaurant),
    );
    HttpResponse::build(status)
        .content_type("text/html; charset=utf-8")
        .body(html)
}

fn details(r: &Reserva) -> String {
    let row = |label: &str, value: &str| {
        format!(
            "<div class=\"detail-row\"><span class=\"detail-label\">{label}:</span><span>{}</span></div>",
            escape(value)
        )
    };
    format!(
        "<div class=\"details\">{}{}{}{}</div>",
        row("Nombre", &r.nombre),
        row("Fecha", &r.fecha_display()),
        row("Hora", &r.hora_display()),
        row("Personas", &r.personas.to_string()),
    )
}

/// Enlace desconocido, cancelado o caducado
pub fn invalid_link(restaurant: &str, message: &str) -> HttpResponse {
    let body = format!(
        "<h1 class=\"error\">⚠️ Enlace inválido o expirado</h1>\n<p>{}</p>\n<a href=\"/\">Volver al inicio</a>",
        escape(message)
    );
    page(StatusCode::NOT_FOUND, "Error", restaurant, body)
}

/// Reserva pendiente de que el cliente pulse confirmar
pub fn confirm_prompt(restaurant: &str, r: &Reserva) -> HttpResponse {
    let body = format!(
        "<h1>📋 Confirma tu Reserva</h1>\n{}\n<form method=\"POST\">\
         <button type=\"submit\" class=\"confirm-btn\">✓ Confirmar Reserva</button></form>",
        details(r)
    );
    page(StatusCode::OK, "Confirmar Reserva", restaurant, body)
}

/// Resumen tras confirmar, o al volver a abrir un enlace ya confirmado
pub fn confirmed(restaurant: &str, r: &Reserva, cancel_link: &str) -> HttpResponse {
    let (title, message) = if r.restaurant_confirmed {
        ("¡Reserva Confirmada!", "Tu reserva está confirmada y te esperamos ese día")
    } else {
        ("¡Solicitud Recibida!", "Tu solicitud está pendiente de aprobación del restaurante")
    };
    let pending = if r.restaurant_confirmed {
        String::new()
    } else {
        "<div class=\"pending-approval\">Te avisaremos por SMS cuando el restaurante la apruebe</div>".to_string()
    };
    let body = format!(
        "<h1>{title}</h1>\n<p>{message}</p>\n{}\n{pending}\n\
         <p><small>¿Necesitas cancelar tu reserva?</small></p>\n\
         <a class=\"cancel-btn\" href=\"{}\">Cancelar Reserva</a>",
        details(r),
        escape(cancel_link),
    );
    page(StatusCode::OK, "Tu Reserva", restaurant, body)
}

pub fn cancelled(restaurant: &str, r: &Reserva) -> HttpResponse {
    let body = format!(
        "<h1>Reserva Cancelada</h1>\n<p>Tu reserva ha sido cancelada exitosamente.</p>\n{}\n\
         <p>¡Esperamos verte pronto en {}!</p>\n<a href=\"/\">Volver al inicio</a>",
        details(r),
        escape(restaurant),
    );
    page(StatusCode::OK, "Reserva Cancelada", restaurant, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_is_escaped() {
        assert_eq!(escape("<b>\"Ana\" & 'Luis'</b>"), "&lt;b&gt;&quot;Ana&quot; &amp; &#x27;Luis&#x27;&lt;/b&gt;");
        assert_eq!(escape("José"), "José");
    }
}
