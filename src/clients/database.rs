use std::{collections::HashMap, sync::Arc};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, Row, types::ToSql};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    clients::{directory::RecipientDirectory, store::RecordStore},
    models::{
        directory::RecipientProfile,
        error::StoreError,
        record::{NewNotification, NotificationRecord, RecordFilter, RecordUpdate},
        status::NotificationStatus,
    },
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id              UUID PRIMARY KEY,
    recipient_token TEXT,
    title           TEXT NOT NULL,
    body            TEXT NOT NULL,
    payload         JSONB NOT NULL DEFAULT '{}'::jsonb,
    correlation_key TEXT,
    status          TEXT NOT NULL DEFAULT 'pending',
    retry_count     INTEGER NOT NULL DEFAULT 0,
    last_error      TEXT,
    delivery_id     TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    processed_at    TIMESTAMPTZ,
    retry_at        TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS notifications_correlation_status_idx
    ON notifications (correlation_key, status);

CREATE INDEX IF NOT EXISTS notifications_status_created_idx
    ON notifications (status, created_at);

CREATE TABLE IF NOT EXISTS recipient_profiles (
    recipient_id          TEXT PRIMARY KEY,
    push_token            TEXT,
    notifications_enabled BOOLEAN NOT NULL DEFAULT TRUE
);
"#;

const COLUMNS: &str = "id, recipient_token, title, body, payload, correlation_key, status, \
                       retry_count, last_error, delivery_id, created_at, processed_at, retry_at";

/// Opens a connection and drives it on a background task.
pub async fn connect(database_url: &str) -> Result<Arc<Client>, Error> {
    info!("Connecting to PostgreSQL database");

    let (client, connection) = tokio_postgres::connect(database_url, NoTls)
        .await
        .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "PostgreSQL connection closed with error");
        }
    });

    info!("PostgreSQL connection established");

    Ok(Arc::new(client))
}

/// Positional parameters for statements assembled at runtime.
#[derive(Default)]
struct Params {
    values: Vec<Box<dyn ToSql + Sync + Send>>,
}

impl Params {
    fn bind<T: ToSql + Sync + Send + 'static>(&mut self, value: T) -> String {
        self.values.push(Box::new(value));
        format!("${}", self.values.len())
    }

    fn conditions(&mut self, filters: &[RecordFilter]) -> Vec<String> {
        filters
            .iter()
            .map(|filter| match filter {
                RecordFilter::CorrelationKey(key) => {
                    format!("correlation_key = {}", self.bind(key.clone()))
                }
                RecordFilter::Status(status) => {
                    format!("status = {}", self.bind(status.as_str().to_string()))
                }
                RecordFilter::StatusIn(statuses) => {
                    let statuses: Vec<String> =
                        statuses.iter().map(|s| s.as_str().to_string()).collect();
                    format!("status = ANY({})", self.bind(statuses))
                }
                RecordFilter::CreatedBefore(instant) => {
                    format!("created_at < {}", self.bind(*instant))
                }
            })
            .collect()
    }

    fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values
            .iter()
            .map(|value| value.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

pub struct PgRecordStore {
    client: Arc<Client>,
}

impl PgRecordStore {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    pub async fn ensure_schema(&self) -> Result<(), Error> {
        self.client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to create notification schema: {}", e))?;

        debug!("Notification schema ensured");
        Ok(())
    }

    fn row_to_record(row: &Row) -> Result<NotificationRecord, StoreError> {
        let id: Uuid = row.try_get("id")?;
        let corrupt = |reason: String| StoreError::Corrupt {
            id: id.to_string(),
            reason,
        };

        let payload = match row.try_get::<_, serde_json::Value>("payload")? {
            serde_json::Value::Object(map) => map.into_iter().collect::<HashMap<_, _>>(),
            serde_json::Value::Null => HashMap::new(),
            other => return Err(corrupt(format!("payload is not an object: {}", other))),
        };

        let status = row
            .try_get::<_, String>("status")?
            .parse::<NotificationStatus>()
            .map_err(corrupt)?;

        let retry_count = u32::try_from(row.try_get::<_, i32>("retry_count")?)
            .map_err(|e| corrupt(format!("negative retry_count: {}", e)))?;

        Ok(NotificationRecord {
            id,
            recipient_token: row.try_get("recipient_token")?,
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            payload,
            correlation_key: row.try_get("correlation_key")?,
            status,
            retry_count,
            last_error: row.try_get("last_error")?,
            delivery_id: row.try_get("delivery_id")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            retry_at: row.try_get("retry_at")?,
        })
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create(&self, notification: NewNotification) -> Result<NotificationRecord, StoreError> {
        let id = Uuid::new_v4();
        let payload = serde_json::Value::Object(notification.payload.into_iter().collect());
        let status = NotificationStatus::Pending.as_str();

        let sql = format!(
            "INSERT INTO notifications (id, recipient_token, title, body, payload, correlation_key, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            COLUMNS
        );

        let row = self
            .client
            .query_one(
                &sql,
                &[
                    &id,
                    &notification.recipient_token,
                    &notification.title,
                    &notification.body,
                    &payload,
                    &notification.correlation_key,
                    &status,
                ],
            )
            .await?;

        Self::row_to_record(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRecord>, StoreError> {
        let sql = format!("SELECT {} FROM notifications WHERE id = $1", COLUMNS);

        self.client
            .query_opt(&sql, &[&id])
            .await?
            .as_ref()
            .map(Self::row_to_record)
            .transpose()
    }

    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<bool, StoreError> {
        let mut params = Params::default();
        let mut sets = Vec::new();

        if let Some(status) = update.status {
            sets.push(format!("status = {}", params.bind(status.as_str().to_string())));
        }
        if let Some(retry_count) = update.retry_count {
            let retry_count = i32::try_from(retry_count).unwrap_or(i32::MAX);
            sets.push(format!("retry_count = {}", params.bind(retry_count)));
        }
        if let Some(last_error) = update.last_error {
            sets.push(format!("last_error = {}", params.bind(last_error)));
        }
        if let Some(delivery_id) = update.delivery_id {
            sets.push(format!("delivery_id = {}", params.bind(delivery_id)));
        }
        if let Some(processed_at) = update.processed_at {
            sets.push(format!("processed_at = {}", params.bind(processed_at)));
        }
        if let Some(retry_at) = update.retry_at {
            sets.push(format!("retry_at = {}", params.bind(retry_at)));
        }

        if sets.is_empty() {
            return Ok(self.get(id).await?.is_some());
        }

        let mut sql = format!(
            "UPDATE notifications SET {} WHERE id = {}",
            sets.join(", "),
            params.bind(id)
        );
        if let Some(expected) = update.expected_status {
            sql.push_str(&format!(
                " AND status = {}",
                params.bind(expected.as_str().to_string())
            ));
        }

        let updated = self.client.execute(&sql, &params.as_refs()).await?;
        Ok(updated == 1)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let deleted = self
            .client
            .execute("DELETE FROM notifications WHERE id = $1", &[&id])
            .await?;

        Ok(deleted == 1)
    }

    async fn delete_many(&self, ids: &[Uuid], filters: &[RecordFilter]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut params = Params::default();
        let mut conditions = vec![format!("id = ANY({})", params.bind(ids.to_vec()))];
        conditions.extend(params.conditions(filters));

        let sql = format!("DELETE FROM notifications WHERE {}", conditions.join(" AND "));
        let deleted = self.client.execute(&sql, &params.as_refs()).await?;

        Ok(deleted)
    }

    async fn query(
        &self,
        filters: &[RecordFilter],
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let mut params = Params::default();
        let conditions = params.conditions(filters);

        let mut sql = format!("SELECT {} FROM notifications", COLUMNS);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        sql.push_str(&format!(" ORDER BY created_at ASC LIMIT {}", params.bind(limit)));

        let rows = self.client.query(&sql, &params.as_refs()).await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

pub struct PgRecipientDirectory {
    client: Arc<Client>,
}

impl PgRecipientDirectory {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn find(&self, recipient_id: &str) -> Result<Option<RecipientProfile>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT recipient_id, push_token, notifications_enabled \
                 FROM recipient_profiles WHERE recipient_id = $1",
                &[&recipient_id],
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(RecipientProfile {
            recipient_id: row.try_get("recipient_id")?,
            push_token: row.try_get("push_token")?,
            notifications_enabled: row.try_get("notifications_enabled")?,
        }))
    }
}
