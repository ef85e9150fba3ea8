//! Contenido de las tarjetas del panel

use chrono::{Datelike, NaiveDate, Weekday};

use super::channels::ChannelKind;
use super::interactions::CustomId;
use super::surface::{ActionStyle, Card, CardMarker};
use crate::domain::reservation::mask_phone;
use crate::domain::{ActionLogEntry, ActionType, Reserva, ReservationStatus};

const GREEN: u32 = 0x2ecc71;
const ORANGE: u32 = 0xe67e22;
const RED: u32 = 0xe74c3c;
const BLUE: u32 = 0x3498db;
const GREY: u32 = 0x95a5a6;

const MONTHS: [&str; 12] = [
    "Enero", "Febrero", "Marzo", "Abril", "Mayo", "Junio", "Julio", "Agosto", "Septiembre", "Octubre", "Noviembre",
    "Diciembre",
];

pub fn month_name(month: u32) -> &'static str {
    MONTHS.get(month.saturating_sub(1) as usize).copied().unwrap_or("")
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Lunes",
        Weekday::Tue => "Martes",
        Weekday::Wed => "Miércoles",
        Weekday::Thu => "Jueves",
        Weekday::Fri => "Viernes",
        Weekday::Sat => "Sábado",
        Weekday::Sun => "Domingo",
    }
}

/// "Viernes, 16 de Octubre"
pub fn spanish_date(fecha: NaiveDate) -> String {
    format!("{}, {} de {}", weekday_name(fecha.weekday()), fecha.day(), month_name(fecha.month()))
}

pub fn header(fecha: NaiveDate) -> Card {
    Card::new(format!("📅 {}", spanish_date(fecha)), BLUE).marked(CardMarker::Header(fecha))
}

pub fn placeholder() -> Card {
    Card::new("📭 No hay reservas en este momento", GREY).marked(CardMarker::Placeholder)
}

pub fn reservation(kind: ChannelKind, r: &Reserva) -> Card {
    let (title, color) = match r.status() {
        ReservationStatus::FullyConfirmed => ("✅ Reserva Confirmada", GREEN),
        ReservationStatus::Cancelled => ("❌ Reserva Cancelada", RED),
        _ => ("⏳ Pendiente de Aprobación", ORANGE),
    };
    let check = |ok: bool| if ok { "✅" } else { "❌" };

    let mut card = Card::new(format!("{title} - ID #{}", r.id), color)
        .marked(CardMarker::Reservation(r.id))
        .field("👤 Nombre", r.nombre.clone(), true)
        .field("📞 Teléfono", mask_phone(&r.telefono), true)
        .field("👥 Personas", r.personas.to_string(), true)
        .field("📅 Fecha", r.fecha_display(), true)
        .field("🕐 Hora", r.hora_display(), true)
        .field("⏰ Creada", r.created_at.format("%d/%m/%Y %H:%M").to_string(), true)
        .field(
            "Estado",
            format!(
                "Cliente {} · Restaurante {}",
                check(r.user_confirmed),
                check(r.restaurant_confirmed)
            ),
            false,
        );
    if let Some(notas) = &r.notas {
        card = card.field("📝 Notas", notas.clone(), false);
    }

    if kind.offers_approve() {
        card = card.action(CustomId::Approve(r.id).to_string(), "✅ Aceptar Reserva", ActionStyle::Success);
    }
    card.action(CustomId::Cancel(r.id).to_string(), "❌ Cancelar", ActionStyle::Danger)
        .action(CustomId::Phone(r.id).to_string(), "📞 Ver teléfono", ActionStyle::Secondary)
}

/// Entrada del canal de registro; `reserva` falta si ya se borró
pub fn audit_entry(entry: &ActionLogEntry, reserva: Option<&Reserva>) -> Card {
    let color = match entry.action_type {
        ActionType::Cancelled => RED,
        ActionType::Created => GREY,
        _ => BLUE,
    };
    let mut card = Card::new(format!("📝 {}", entry.action_type.as_str().to_uppercase()), color)
        .field("ID", entry.reservation_id.to_string(), true);

    if let Some(r) = reserva {
        card = card
            .field("Nombre", r.nombre.clone(), true)
            .field("Personas", r.personas.to_string(), true)
            .field("Fecha/Hora", format!("{} {}", r.fecha_display(), r.hora_display()), false);
    }
    card = card.field("Realizado por", entry.performed_by.clone(), false);
    if let Some(details) = &entry.details {
        card = card.field("Detalles", details.clone(), false);
    }
    card
}
