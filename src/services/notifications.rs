//! # Notificaciones
//!
//! Dos piezas separadas:
//!
//! - [`MessageTemplates::compose`] es una función pura: evento + reserva →
//!   lista de (destinatario, texto). No tiene E/S ni reglas de negocio.
//! - [`Outbox`] es una cola en proceso (`tokio::mpsc`) que vacía un
//!   [`OutboxWorker`] con un [`SmsGateway`]. Encolar nunca bloquea ni falla
//!   hacia el llamante; un envío fallido se registra y la transición ya
//!   confirmada no se toca.
//!
//! Un único intento por mensaje, sin reintentos.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::api::{AppError, AppResult};
use crate::config::AppConfig;
use crate::domain::reservation::mask_phone;
use crate::domain::{Reserva, ReservationId};

/// Suceso que provoca mensajes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Created,
    CustomerConfirmed,
    RestaurantApproved,
    CancelledByCustomer,
    /// Cancelación desde administración o panel, con su motivo
    CancelledByStaff { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Customer,
    Manager,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub recipient: Recipient,
    pub phone: String,
    pub body: String,
}

/// Textos de los SMS
#[derive(Debug, Clone)]
pub struct MessageTemplates {
    restaurant_name: String,
    restaurant_phone: String,
    manager_phones: Vec<String>,
    large_group_threshold: u32,
    domain: String,
}

impl MessageTemplates {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            restaurant_name: config.restaurant_name.clone(),
            restaurant_phone: config.restaurant_phone.clone(),
            manager_phones: config.manager_phones.clone(),
            large_group_threshold: config.large_group_threshold,
            domain: config.domain.trim_end_matches('/').to_string(),
        }
    }

    pub fn compose(&self, event: &NotificationEvent, r: &Reserva) -> Vec<OutgoingMessage> {
        let large = r.is_large_group(self.large_group_threshold);
        let when = format!("{} {}", r.fecha_display(), r.hora_display());
        let mut out = Vec::new();

        match event {
            NotificationEvent::Created => {
                let link = format!("{}/confirm/{}", self.domain, r.confirmation_token);
                let body = if large {
                    format!(
                        "{}, CONFIRMA AQUÍ (confirm here):\n{}\n{} - {} pers.\nRevisaremos disponibilidad.\n{}",
                        r.nombre, link, when, r.personas, self.restaurant_name
                    )
                } else {
                    format!(
                        "{}, confirma tu reserva (confirm):\n{}\n{} - {} pers.\n{}",
                        r.nombre, link, when, r.personas, self.restaurant_name
                    )
                };
                out.push(self.customer(r, body));
            }
            NotificationEvent::CustomerConfirmed => {
                let body = if large {
                    format!(
                        "Gracias {}!\nSolicitud para {} pers. recibida.\nTe confirmaremos pronto.\nCancelar: mismo enlace (cancel: same link)",
                        r.nombre, r.personas
                    )
                } else {
                    format!(
                        "¡Confirmado {}!\n{}, {} pers.\n¡Te esperamos!\nCancelar: mismo enlace (cancel: same link)",
                        r.nombre, when, r.personas
                    )
                };
                out.push(self.customer(r, body));

                let pending = if r.restaurant_confirmed { "CONFIRMADA" } else { "PENDIENTE" };
                self.managers(
                    &mut out,
                    format!(
                        "Nueva reserva {}: {}. {} personas, {}. Tel: {}",
                        pending, when, r.personas, r.nombre, r.telefono
                    ),
                );
            }
            NotificationEvent::RestaurantApproved => {
                out.push(self.customer(
                    r,
                    format!(
                        "{}, RESERVA APROBADA (approved by restaurant)\n{}, {} pers.\n¡Te esperamos! See you then!\nCancelar: mismo enlace (cancel: same link)",
                        r.nombre, when, r.personas
                    ),
                ));
            }
            NotificationEvent::CancelledByCustomer => {
                out.push(self.customer(
                    r,
                    format!(
                        "{}, reserva cancelada (reservation cancelled)\n{}, {} pers.\n¡Esperamos verte pronto! Hope to see you soon!",
                        r.nombre, when, r.personas
                    ),
                ));
                self.managers(
                    &mut out,
                    format!(
                        "Cancelación: {}, {} personas, {}. Tel: {}",
                        r.nombre, r.personas, when, r.telefono
                    ),
                );
            }
            NotificationEvent::CancelledByStaff { reason } => {
                out.push(self.customer(
                    r,
                    format!(
                        "Lamentamos cancelar tu reserva (sorry, reservation cancelled), {}.\n{}, {} pers.\nMotivo: {}\nLlámanos (call us): {}",
                        r.nombre, when, r.personas, reason, self.restaurant_phone
                    ),
                ));
            }
        }

        out
    }

    fn customer(&self, r: &Reserva, body: String) -> OutgoingMessage {
        OutgoingMessage {
            recipient: Recipient::Customer,
            phone: r.telefono.clone(),
            body,
        }
    }

    fn managers(&self, out: &mut Vec<OutgoingMessage>, body: String) {
        out.extend(self.manager_phones.iter().map(|phone| OutgoingMessage {
            recipient: Recipient::Manager,
            phone: phone.clone(),
            body: body.clone(),
        }));
    }
}

/// Capacidad de enviar un SMS
#[async_trait]
pub trait SmsGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Un único intento acotado en tiempo
    ///
    /// # Errores
    ///
    /// `Transport` si el proveedor rechaza o no responde a tiempo.
    async fn send(&self, phone: &str, body: &str) -> AppResult<()>;
}

/// Gateway de simulación: solo escribe en el log
#[derive(Debug, Default, Clone)]
pub struct SimulatedSms;

#[async_trait]
impl SmsGateway for SimulatedSms {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn send(&self, phone: &str, body: &str) -> AppResult<()> {
        tracing::info!(phone = %mask_phone(phone), message = %body, "SMS simulation");
        Ok(())
    }
}

const MENSATEK_URL: &str = "https://api.mensatek.com/v7/EnviarSMS";

/// Cliente de la API v7 de Mensatek
#[derive(Debug, Clone)]
pub struct MensatekSms {
    http: reqwest::Client,
    url: String,
    user: String,
    token: String,
    sender: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MensatekReply {
    Many(Vec<MensatekResult>),
    One(MensatekResult),
}

#[derive(Debug, Deserialize)]
struct MensatekResult {
    #[serde(rename = "Res")]
    res: Option<i64>,
}

impl MensatekSms {
    pub fn new(user: String, token: String, sender: String, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::transport("mensatek", format!("cliente HTTP: {e}")))?;
        Ok(Self {
            http,
            url: MENSATEK_URL.to_string(),
            user,
            token,
            sender,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl SmsGateway for MensatekSms {
    fn name(&self) -> &'static str {
        "mensatek"
    }

    async fn send(&self, phone: &str, body: &str) -> AppResult<()> {
        let destinatarios = serde_json::json!([{ "Movil": phone }]).to_string();
        let form = [
            ("Remitente", self.sender.as_str()),
            ("Destinatarios", destinatarios.as_str()),
            ("Mensaje", body),
            ("Resp", "JSON"),
        ];

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.token))
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::transport("mensatek", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::transport("mensatek", format!("HTTP {status}")));
        }

        let reply: MensatekReply = response
            .json()
            .await
            .map_err(|e| AppError::transport("mensatek", format!("respuesta ilegible: {e}")))?;
        let res = match reply {
            MensatekReply::Many(results) => results.first().and_then(|r| r.res),
            MensatekReply::One(result) => result.res,
        };

        match res {
            Some(1) => Ok(()),
            other => Err(AppError::transport("mensatek", format!("Res = {other:?}"))),
        }
    }
}

/// Mensaje encolado
#[derive(Debug)]
pub struct Envelope {
    pub reservation_id: ReservationId,
    pub message: OutgoingMessage,
    delivered: Option<oneshot::Sender<bool>>,
}

impl Envelope {
    /// Informa del resultado a quien espera el [`DeliveryHandle`]
    pub fn report(&mut self, ok: bool) {
        if let Some(tx) = self.delivered.take() {
            let _ = tx.send(ok);
        }
    }
}

/// Resultado futuro de un envío concreto
#[derive(Debug)]
pub struct DeliveryHandle(oneshot::Receiver<bool>);

impl DeliveryHandle {
    fn resolved(ok: bool) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(ok);
        Self(rx)
    }

    /// `true` solo si el envío terminó bien antes de `timeout`
    pub async fn wait(self, timeout: Duration) -> bool {
        matches!(tokio::time::timeout(timeout, self.0).await, Ok(Ok(true)))
    }
}

#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Envelope>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Encola sin esperar; con la cola llena el mensaje se descarta y el
    /// handle se resuelve como fallido
    pub fn enqueue(&self, reservation_id: ReservationId, message: OutgoingMessage) -> DeliveryHandle {
        let (done_tx, done_rx) = oneshot::channel();
        let envelope = Envelope {
            reservation_id,
            message,
            delivered: Some(done_tx),
        };

        match self.tx.try_send(envelope) {
            Ok(()) => DeliveryHandle(done_rx),
            Err(e) => {
                tracing::warn!(reservation_id, error = %e, "Notification outbox unavailable, message dropped");
                DeliveryHandle::resolved(false)
            }
        }
    }

    /// Encola todos los mensajes; devuelve el handle del mensaje al cliente
    pub fn dispatch(&self, reservation_id: ReservationId, messages: Vec<OutgoingMessage>) -> Option<DeliveryHandle> {
        let mut customer = None;
        for message in messages {
            let is_customer = message.recipient == Recipient::Customer;
            let handle = self.enqueue(reservation_id, message);
            if is_customer && customer.is_none() {
                customer = Some(handle);
            }
        }
        customer
    }
}

/// Consume la cola y entrega por el gateway configurado
pub struct OutboxWorker {
    gateway: Arc<dyn SmsGateway>,
}

impl OutboxWorker {
    pub fn new(gateway: Arc<dyn SmsGateway>) -> Self {
        Self { gateway }
    }

    /// Bloquea hasta que se cierra la cola
    pub async fn run(self, mut rx: mpsc::Receiver<Envelope>) {
        tracing::info!(gateway = self.gateway.name(), "Notification outbox worker started");

        while let Some(mut envelope) = rx.recv().await {
            let ok = self.deliver(&envelope).await;
            envelope.report(ok);
        }

        tracing::info!("Notification outbox closed, worker stopping");
    }

    async fn deliver(&self, envelope: &Envelope) -> bool {
        let message = &envelope.message;
        match self.gateway.send(&message.phone, &message.body).await {
            Ok(()) => {
                tracing::info!(
                    reservation_id = envelope.reservation_id,
                    recipient = ?message.recipient,
                    phone = %mask_phone(&message.phone),
                    "SMS sent"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    reservation_id = envelope.reservation_id,
                    recipient = ?message.recipient,
                    phone = %mask_phone(&message.phone),
                    error = %e,
                    "SMS delivery failed"
                );
                false
            }
        }
    }
}

/// Gateway según la configuración: Mensatek si `SMS_ENABLED`, simulación si no
pub fn gateway_from_config(config: &AppConfig) -> AppResult<Arc<dyn SmsGateway>> {
    if !config.sms.enabled {
        return Ok(Arc::new(SimulatedSms));
    }
    match (&config.sms.api_user, &config.sms.api_token) {
        (Some(user), Some(token)) => Ok(Arc::new(MensatekSms::new(
            user.clone(),
            token.clone(),
            config.restaurant_name.clone(),
            config.sms.timeout,
        )?)),
        _ => Err(AppError::validation_field("MENSATEK_API_USER", "credenciales SMS no configuradas")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use std::sync::Mutex;

    fn reserva(personas: u32) -> Reserva {
        Reserva {
            id: 1,
            nombre: "Ana".into(),
            telefono: "+600111222".into(),
            personas,
            fecha: NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
            hora: NaiveTime::from_hms_opt(20, 30, 0).unwrap(),
            notas: None,
            user_confirmed: false,
            restaurant_confirmed: personas <= 4,
            cancelled: false,
            cancelled_at: None,
            cancelled_by: None,
            confirmation_token: "tok123".into(),
            created_at: Utc.with_ymd_and_hms(2026, 10, 15, 8, 0, 0).unwrap(),
            version: 1,
        }
    }

    fn templates() -> MessageTemplates {
        let config = AppConfig {
            manager_phones: vec!["+34611000000".into(), "+34622000000".into()],
            domain: "https://lesmonges.example/".into(),
            ..AppConfig::default()
        };
        MessageTemplates::from_config(&config)
    }

    #[test]
    fn created_message_carries_the_confirmation_link() {
        let out = templates().compose(&NotificationEvent::Created, &reserva(2));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient, Recipient::Customer);
        assert!(out[0].body.contains("https://lesmonges.example/confirm/tok123"));
        assert!(out[0].body.contains("16/10/2026 20:30 - 2 pers."));
        assert!(!out[0].body.contains("Revisaremos"));

        let large = templates().compose(&NotificationEvent::Created, &reserva(6));
        assert!(large[0].body.contains("Revisaremos disponibilidad"));
    }

    #[test]
    fn confirmation_notifies_customer_and_every_manager() {
        let mut r = reserva(6);
        r.user_confirmed = true;
        let out = templates().compose(&NotificationEvent::CustomerConfirmed, &r);
        assert_eq!(out.len(), 3);
        assert!(out[0].body.starts_with("Gracias Ana!"));
        assert!(out[1].body.starts_with("Nueva reserva PENDIENTE"));
        assert_eq!(out.iter().filter(|m| m.recipient == Recipient::Manager).count(), 2);
    }

    #[test]
    fn staff_cancellation_includes_reason_and_phone() {
        let out = templates().compose(
            &NotificationEvent::CancelledByStaff {
                reason: "Cierre por evento".into(),
            },
            &reserva(2),
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].body.contains("Motivo: Cierre por evento"));
        assert!(out[0].body.contains("965 78 57 31"));
    }

    #[test]
    fn approval_goes_only_to_customer() {
        let out = templates().compose(&NotificationEvent::RestaurantApproved, &reserva(6));
        assert_eq!(out.len(), 1);
        assert!(out[0].body.contains("RESERVA APROBADA"));
    }

    struct Recording {
        fail: bool,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SmsGateway for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, phone: &str, _body: &str) -> AppResult<()> {
            self.sent.lock().unwrap().push(phone.to_string());
            if self.fail {
                Err(AppError::transport("recording", "down"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn worker_reports_delivery_result() {
        for fail in [false, true] {
            let gateway = Arc::new(Recording {
                fail,
                sent: Mutex::new(Vec::new()),
            });
            let (outbox, rx) = Outbox::channel(8);
            let worker = tokio::spawn(OutboxWorker::new(gateway.clone()).run(rx));

            let messages = templates().compose(&NotificationEvent::CancelledByCustomer, &reserva(2));
            let handle = outbox.dispatch(1, messages).unwrap();
            assert_eq!(handle.wait(Duration::from_secs(1)).await, !fail);

            drop(outbox);
            worker.await.unwrap();
            assert_eq!(gateway.sent.lock().unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (outbox, mut rx) = Outbox::channel(1);
        let msg = templates().compose(&NotificationEvent::Created, &reserva(2)).remove(0);

        let _first = outbox.enqueue(1, msg.clone());
        let second = outbox.enqueue(1, msg);
        assert!(!second.wait(Duration::from_millis(10)).await);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn undelivered_handle_times_out_as_failure() {
        let (outbox, _rx) = Outbox::channel(4);
        let msg = templates().compose(&NotificationEvent::Created, &reserva(2)).remove(0);
        assert!(!outbox.enqueue(1, msg).wait(Duration::from_millis(10)).await);
    }
}
