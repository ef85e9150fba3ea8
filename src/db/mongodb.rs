use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR};
use mongodb::options::ReturnDocument;
use mongodb::{Client, ClientSession, Collection, Database};

use super::models::{fecha_key, hora_key, ActionLogDoc, BlockedHourDoc, CardDoc, CounterDoc, CursorDoc, ReservaDoc};
use super::{NewReservation, PurgeReport, RenderedCard, ReservationFilter, ReservationStore, StatusFilter};
use crate::api::{AppError, AppResult};
use crate::domain::{ActionLogEntry, AuditDraft, Reserva, ReservationId};

pub type Result<T> = AppResult<T>;

/// Intentos ante errores transitorios de transacción (conflictos de escritura)
const TRANSACTION_ATTEMPTS: usize = 5;

const RESERVATION_SEQUENCE: &str = "reservations";
const AUDIT_SEQUENCE: &str = "action_log";

/// Repositorio MongoDB
///
/// Las transiciones usan transacciones de sesión, por lo que el servidor
/// debe ser un replica set (basta uno de un solo nodo).
#[derive(Debug, Clone)]
pub struct MongoRepo {
    pub client: Client,
    pub database: Database,
}

impl MongoRepo {
    pub async fn init(mongo_uri: &str, database_name: &str) -> Result<MongoRepo> {
        let client = Client::with_uri_str(mongo_uri)
            .await
            .map_err(|e| AppError::database("connect", e))?;

        let database = client.database(database_name);

        // Test connection
        database
            .run_command(doc! {"ping": 1})
            .await
            .map_err(|e| AppError::database("ping", e))?;

        tracing::info!(database = %database_name, "Conexión a MongoDB establecida exitosamente");

        Ok(MongoRepo { client, database })
    }

    pub fn reservas(&self) -> Collection<ReservaDoc> {
        self.database.collection("reservations")
    }

    pub fn action_log(&self) -> Collection<ActionLogDoc> {
        self.database.collection("action_log")
    }

    pub fn blocked_hours_collection(&self) -> Collection<BlockedHourDoc> {
        self.database.collection("blocked_hours")
    }

    pub fn dashboard_cards(&self) -> Collection<CardDoc> {
        self.database.collection("dashboard_cards")
    }

    fn counters(&self) -> Collection<CounterDoc> {
        self.database.collection("counters")
    }

    fn sync_cursors(&self) -> Collection<CursorDoc> {
        self.database.collection("sync_cursors")
    }

    pub async fn create_indexes(&self) -> Result<()> {
        use mongodb::{options::IndexOptions, IndexModel};

        let reservation_indexes = vec![
            IndexModel::builder()
                .keys(doc! { "confirmation_token": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            IndexModel::builder().keys(doc! { "fecha": 1, "hora": 1 }).build(),
            IndexModel::builder()
                .keys(doc! { "telefono": 1, "fecha": 1 })
                .build(),
        ];
        self.reservas()
            .create_indexes(reservation_indexes)
            .await
            .map_err(|e| AppError::database("create_indexes reservations", e))?;

        let audit_indexes = vec![
            IndexModel::builder().keys(doc! { "reservation_id": 1 }).build(),
            IndexModel::builder().keys(doc! { "timestamp": 1 }).build(),
        ];
        self.action_log()
            .create_indexes(audit_indexes)
            .await
            .map_err(|e| AppError::database("create_indexes action_log", e))?;

        self.blocked_hours_collection()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "fecha": 1, "hora": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .map_err(|e| AppError::database("create_indexes blocked_hours", e))?;

        let card_indexes = vec![
            IndexModel::builder().keys(doc! { "channel": 1, "position": 1 }).build(),
            IndexModel::builder().keys(doc! { "reservation_id": 1 }).build(),
        ];
        self.dashboard_cards()
            .create_indexes(card_indexes)
            .await
            .map_err(|e| AppError::database("create_indexes dashboard_cards", e))?;

        tracing::info!("Índices MongoDB creados exitosamente");
        Ok(())
    }

    async fn next_id(&self, session: &mut ClientSession, sequence: &str) -> mongodb::error::Result<i64> {
        let counter = self
            .counters()
            .find_one_and_update(doc! { "_id": sequence }, doc! { "$inc": { "seq": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await?;
        Ok(counter.map_or(1, |c| c.seq))
    }

    async fn insert_audit(
        &self,
        session: &mut ClientSession,
        reservation_id: ReservationId,
        draft: AuditDraft,
    ) -> mongodb::error::Result<ActionLogEntry> {
        let id = self.next_id(session, AUDIT_SEQUENCE).await?;
        let entry = draft.into_entry(id, reservation_id);
        self.action_log()
            .insert_one(ActionLogDoc::from(&entry))
            .session(&mut *session)
            .await?;
        Ok(entry)
    }

    async fn collect<T, U>(&self, mut cursor: mongodb::Cursor<T>, operation: &str) -> Result<Vec<U>>
    where
        T: serde::de::DeserializeOwned,
        U: TryFrom<T, Error = AppError>,
    {
        let mut results = Vec::new();
        while cursor.advance().await.map_err(|e| AppError::database(operation, e))? {
            let row = cursor
                .deserialize_current()
                .map_err(|e| AppError::database(operation, e))?;
            results.push(U::try_from(row)?);
        }
        Ok(results)
    }

    fn filter_document(filter: &ReservationFilter) -> Document {
        let mut query = match filter.status {
            StatusFilter::All => doc! {},
            StatusFilter::Active => doc! { "cancelled": false },
            StatusFilter::Confirmed => doc! { "user_confirmed": true, "restaurant_confirmed": true, "cancelled": false },
            StatusFilter::Pending => doc! { "user_confirmed": true, "restaurant_confirmed": false, "cancelled": false },
            StatusFilter::AwaitingCustomer => doc! { "user_confirmed": false, "cancelled": false },
            StatusFilter::Cancelled => doc! { "cancelled": true },
        };

        if let Some(fecha) = filter.fecha {
            query.insert("fecha", fecha_key(fecha));
        } else {
            let mut range = Document::new();
            if let Some(from) = filter.date_from {
                range.insert("$gte", fecha_key(from));
            }
            if let Some(to) = filter.date_to {
                range.insert("$lte", fecha_key(to));
            }
            if !range.is_empty() {
                query.insert("fecha", range);
            }
        }
        query
    }
}

/// Ejecuta `body` dentro de una transacción, reintentando si el servidor
/// marca el fallo como transitorio
macro_rules! in_transaction {
    ($repo:expr, $operation:expr, |$session:ident| $body:block) => {{
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut $session = $repo
                .client
                .start_session()
                .await
                .map_err(|e| AppError::database($operation, e))?;
            $session
                .start_transaction()
                .await
                .map_err(|e| AppError::database($operation, e))?;

            let outcome: mongodb::error::Result<_> = async { $body }.await;
            let outcome = match outcome {
                Ok(value) => $session.commit_transaction().await.map(|_| value),
                Err(e) => {
                    let _ = $session.abort_transaction().await;
                    Err(e)
                }
            };

            match outcome {
                Ok(value) => break Ok(value),
                Err(e) if e.contains_label(TRANSIENT_TRANSACTION_ERROR) && attempt < TRANSACTION_ATTEMPTS => {
                    tracing::debug!(operation = $operation, attempt, "Transient transaction error, retrying");
                }
                Err(e) => break Err(e),
            }
        }
    }};
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == 11000,
        ErrorKind::Command(e) => e.code == 11000,
        _ => false,
    }
}

#[async_trait]
impl ReservationStore for MongoRepo {
    async fn insert_reservation(&self, new: NewReservation, audit: AuditDraft) -> Result<Reserva> {
        let result: mongodb::error::Result<Reserva> = in_transaction!(self, "insert_reservation", |session| {
            let id = self.next_id(&mut session, RESERVATION_SEQUENCE).await?;
            let reserva = new.clone().into_reserva(id);
            self.reservas()
                .insert_one(ReservaDoc::from(&reserva))
                .session(&mut session)
                .await?;
            self.insert_audit(&mut session, id, audit.clone()).await?;
            Ok(reserva)
        });

        result.map_err(|e| {
            if is_duplicate_key(&e) {
                AppError::Integrity("confirmation_token duplicado".to_string())
            } else {
                AppError::database("insert_reservation", e)
            }
        })
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reserva>> {
        self.reservas()
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| AppError::database("get_reservation", e))?
            .map(Reserva::try_from)
            .transpose()
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Reserva>> {
        self.reservas()
            .find_one(doc! { "confirmation_token": token })
            .await
            .map_err(|e| AppError::database("find_by_token", e))?
            .map(Reserva::try_from)
            .transpose()
    }

    async fn find_active_confirmed_for_phone(&self, telefono: &str, from: NaiveDate) -> Result<Option<Reserva>> {
        self.reservas()
            .find_one(doc! {
                "telefono": telefono,
                "user_confirmed": true,
                "cancelled": false,
                "fecha": { "$gte": fecha_key(from) },
            })
            .sort(doc! { "fecha": 1, "hora": 1 })
            .await
            .map_err(|e| AppError::database("find_active_confirmed_for_phone", e))?
            .map(Reserva::try_from)
            .transpose()
    }

    async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<Reserva>> {
        let cursor = self
            .reservas()
            .find(Self::filter_document(filter))
            .await
            .map_err(|e| AppError::database("list_reservations", e))?;
        let mut rows: Vec<Reserva> = self.collect(cursor, "list_reservations").await?;
        filter.sort(&mut rows);
        Ok(rows)
    }

    async fn commit_transition(
        &self,
        updated: &Reserva,
        expected_version: i64,
        audit: AuditDraft,
    ) -> Result<Option<ActionLogEntry>> {
        let replacement = ReservaDoc::from(updated);
        let result: mongodb::error::Result<Option<ActionLogEntry>> =
            in_transaction!(self, "commit_transition", |session| {
                let swapped = self
                    .reservas()
                    .replace_one(doc! { "_id": updated.id, "version": expected_version }, &replacement)
                    .session(&mut session)
                    .await?;
                if swapped.matched_count == 0 {
                    return Ok(None);
                }
                let entry = self.insert_audit(&mut session, updated.id, audit.clone()).await?;
                Ok(Some(entry))
            });

        result.map_err(|e| AppError::database("commit_transition", e))
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<bool> {
        let result: mongodb::error::Result<bool> = in_transaction!(self, "delete_reservation", |session| {
            let deleted = self
                .reservas()
                .delete_one(doc! { "_id": id })
                .session(&mut session)
                .await?;
            if deleted.deleted_count == 0 {
                return Ok(false);
            }
            self.action_log()
                .delete_many(doc! { "reservation_id": id })
                .session(&mut session)
                .await?;
            self.dashboard_cards()
                .delete_many(doc! { "reservation_id": id })
                .session(&mut session)
                .await?;
            Ok(true)
        });

        result.map_err(|e| AppError::database("delete_reservation", e))
    }

    async fn blocked_hours(&self, fecha: NaiveDate) -> Result<Vec<NaiveTime>> {
        let cursor = self
            .blocked_hours_collection()
            .find(doc! { "fecha": fecha_key(fecha) })
            .sort(doc! { "hora": 1 })
            .await
            .map_err(|e| AppError::database("blocked_hours", e))?;
        let docs: Vec<BlockedHour> = self.collect(cursor, "blocked_hours").await?;
        Ok(docs.into_iter().map(|b| b.0).collect())
    }

    async fn block_hour(&self, fecha: NaiveDate, hora: NaiveTime) -> Result<bool> {
        let doc = BlockedHourDoc {
            fecha: fecha_key(fecha),
            hora: hora_key(hora),
        };
        match self.blocked_hours_collection().insert_one(doc).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(AppError::database("block_hour", e)),
        }
    }

    async fn unblock_hour(&self, fecha: NaiveDate, hora: NaiveTime) -> Result<bool> {
        let deleted = self
            .blocked_hours_collection()
            .delete_one(doc! { "fecha": fecha_key(fecha), "hora": hora_key(hora) })
            .await
            .map_err(|e| AppError::database("unblock_hour", e))?;
        Ok(deleted.deleted_count > 0)
    }

    async fn replace_blocked_hours(&self, fecha: NaiveDate, horas: &[NaiveTime]) -> Result<()> {
        let docs: Vec<BlockedHourDoc> = horas
            .iter()
            .map(|h| BlockedHourDoc {
                fecha: fecha_key(fecha),
                hora: hora_key(*h),
            })
            .collect();

        let result: mongodb::error::Result<()> = in_transaction!(self, "replace_blocked_hours", |session| {
            self.blocked_hours_collection()
                .delete_many(doc! { "fecha": fecha_key(fecha) })
                .session(&mut session)
                .await?;
            if !docs.is_empty() {
                self.blocked_hours_collection()
                    .insert_many(docs.clone())
                    .session(&mut session)
                    .await?;
            }
            Ok(())
        });

        result.map_err(|e| AppError::database("replace_blocked_hours", e))
    }

    async fn audit_after(&self, after_id: i64, limit: usize) -> Result<Vec<ActionLogEntry>> {
        let cursor = self
            .action_log()
            .find(doc! { "_id": { "$gt": after_id } })
            .sort(doc! { "_id": 1 })
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await
            .map_err(|e| AppError::database("audit_after", e))?;
        self.collect(cursor, "audit_after").await
    }

    async fn audit_for_reservation(&self, id: ReservationId) -> Result<Vec<ActionLogEntry>> {
        let cursor = self
            .action_log()
            .find(doc! { "reservation_id": id })
            .sort(doc! { "_id": 1 })
            .await
            .map_err(|e| AppError::database("audit_for_reservation", e))?;
        self.collect(cursor, "audit_for_reservation").await
    }

    async fn latest_audit_id(&self) -> Result<i64> {
        let latest = self
            .action_log()
            .find_one(doc! {})
            .sort(doc! { "_id": -1 })
            .await
            .map_err(|e| AppError::database("latest_audit_id", e))?;
        Ok(latest.map_or(0, |e| e.id))
    }

    async fn rendered_cards(&self, channel: &str) -> Result<Vec<RenderedCard>> {
        let cursor = self
            .dashboard_cards()
            .find(doc! { "channel": channel })
            .sort(doc! { "position": 1 })
            .await
            .map_err(|e| AppError::database("rendered_cards", e))?;
        self.collect(cursor, "rendered_cards").await
    }

    async fn replace_rendered_cards(&self, channel: &str, cards: Vec<RenderedCard>) -> Result<()> {
        let docs: Vec<CardDoc> = cards.iter().map(CardDoc::from).collect();

        let result: mongodb::error::Result<()> = in_transaction!(self, "replace_rendered_cards", |session| {
            self.dashboard_cards()
                .delete_many(doc! { "channel": channel })
                .session(&mut session)
                .await?;
            if !docs.is_empty() {
                self.dashboard_cards()
                    .insert_many(docs.clone())
                    .session(&mut session)
                    .await?;
            }
            Ok(())
        });

        result.map_err(|e| AppError::database("replace_rendered_cards", e))
    }

    async fn sync_cursor(&self, name: &str) -> Result<i64> {
        let cursor = self
            .sync_cursors()
            .find_one(doc! { "_id": name })
            .await
            .map_err(|e| AppError::database("sync_cursor", e))?;
        Ok(cursor.map_or(0, |c| c.value))
    }

    async fn set_sync_cursor(&self, name: &str, value: i64) -> Result<()> {
        self.sync_cursors()
            .update_one(doc! { "_id": name }, doc! { "$set": { "value": value } })
            .upsert(true)
            .await
            .map_err(|e| AppError::database("set_sync_cursor", e))?;
        Ok(())
    }

    async fn purge(&self, before: NaiveDate, audit_before: DateTime<Utc>) -> Result<PurgeReport> {
        let old_filter = doc! { "fecha": { "$lt": fecha_key(before) } };
        let old_ids: Vec<Bson> = self
            .reservas()
            .distinct("_id", old_filter.clone())
            .await
            .map_err(|e| AppError::database("purge", e))?;

        let result: mongodb::error::Result<PurgeReport> = in_transaction!(self, "purge", |session| {
            let reservations = self
                .reservas()
                .delete_many(old_filter.clone())
                .session(&mut session)
                .await?;
            let audit_rows = self
                .action_log()
                .delete_many(doc! { "$or": [
                    { "reservation_id": { "$in": old_ids.clone() } },
                    { "timestamp": { "$lt": audit_before.timestamp() } },
                ] })
                .session(&mut session)
                .await?;
            Ok(PurgeReport {
                reservations: reservations.deleted_count,
                audit_rows: audit_rows.deleted_count,
                card_mappings: 0,
            })
        });
        let mut report = result.map_err(|e| AppError::database("purge", e))?;

        // Tarjetas de reservas que ya no existen
        let live_ids: Vec<Bson> = self
            .reservas()
            .distinct("_id", doc! {})
            .await
            .map_err(|e| AppError::database("purge", e))?;
        let orphans = self
            .dashboard_cards()
            .delete_many(doc! { "reservation_id": { "$ne": Bson::Null, "$nin": live_ids } })
            .await
            .map_err(|e| AppError::database("purge", e))?;
        report.card_mappings = orphans.deleted_count;

        Ok(report)
    }
}

/// Hora bloqueada ya validada
struct BlockedHour(NaiveTime);

impl TryFrom<BlockedHourDoc> for BlockedHour {
    type Error = AppError;

    fn try_from(doc: BlockedHourDoc) -> AppResult<Self> {
        crate::domain::reservation::parse_hora(&doc.hora).map(BlockedHour)
    }
}
