//! PostgreSQL backend over a JSONB data column.
//!
//! One row per record; the identifier mode decides the primary key shape.
//! Writes read the existing packed document, merge, and upsert — all inside
//! one transaction per driver call, so multi-key writes succeed or fail
//! together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, GenericClient};
use tracing::debug;

use crate::driver::{system_key_for, system_values, Driver};
use crate::error::{Error, Result};
use crate::key::{Identifier, IdentifierMode, Key};
use crate::merge::{merge_packed, MergeOp};
use crate::packer::{pack, unpack};
use crate::ValueMap;

/// Driver for PostgreSQL JSONB storage.
///
/// The client is serialized behind a mutex so every driver call gets a
/// dedicated transaction on the single connection.
pub struct PostgresDriver {
    client: Mutex<Client>,
    table: String,
    separator: String,
    mode: IdentifierMode,
    system_tracking: bool,
}

impl PostgresDriver {
    /// Wraps a connected client. An empty table name selects
    /// `tidemark_stats`.
    #[must_use]
    pub fn new(client: Client, table: impl Into<String>, mode: IdentifierMode) -> Self {
        let table = table.into();
        Self {
            client: Mutex::new(client),
            table: if table.is_empty() {
                "tidemark_stats".to_string()
            } else {
                table
            },
            separator: "::".to_string(),
            mode,
            system_tracking: true,
        }
    }

    /// Disables the system-tracking side writes.
    #[must_use]
    pub fn without_system_tracking(mut self) -> Self {
        self.system_tracking = false;
        self
    }

    /// Creates the table for the configured identifier mode.
    ///
    /// # Errors
    ///
    /// Surfaces the backend error verbatim.
    pub async fn setup(&self) -> Result<()> {
        let schema = match self.mode {
            IdentifierMode::Full => format!(
                "CREATE TABLE IF NOT EXISTS {} (key VARCHAR(255) PRIMARY KEY, \
                 data JSONB NOT NULL DEFAULT '{{}}'::jsonb)",
                self.table
            ),
            IdentifierMode::Partial => format!(
                "CREATE TABLE IF NOT EXISTS {} (key VARCHAR(255) NOT NULL, \
                 at TIMESTAMPTZ NOT NULL, data JSONB NOT NULL DEFAULT '{{}}'::jsonb, \
                 PRIMARY KEY (key, at))",
                self.table
            ),
            IdentifierMode::Separated => format!(
                "CREATE TABLE IF NOT EXISTS {} (key VARCHAR(255) NOT NULL, \
                 granularity VARCHAR(255) NOT NULL, at TIMESTAMPTZ NOT NULL, \
                 data JSONB NOT NULL DEFAULT '{{}}'::jsonb, \
                 PRIMARY KEY (key, granularity, at))",
                self.table
            ),
        };

        let client = self.client.lock().await;
        client.batch_execute(&schema).await?;
        debug!(table = %self.table, mode = %self.mode, "postgres schema ready");
        Ok(())
    }

    async fn write(
        &self,
        keys: &[Key],
        values: &ValueMap,
        op: MergeOp,
        count: i64,
    ) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let packed = pack(values);
        if packed.is_empty() {
            return Ok(());
        }
        let count = count.max(1);

        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        for key in keys {
            let identity = self.identity(key)?;
            let existing = read_packed(&tx, &self.table, &identity).await?;
            let merged = merge_packed(&existing, &packed, op)?;
            upsert_packed(&tx, &self.table, &identity, merged).await?;

            if self.system_tracking {
                let system_identity = self.identity(&system_key_for(key))?;
                let existing = read_packed(&tx, &self.table, &system_identity).await?;
                let merged = merge_packed(
                    &existing,
                    &system_values(key.system_tracking_key(), count),
                    MergeOp::Inc,
                )?;
                upsert_packed(&tx, &self.table, &system_identity, merged).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    fn identity(&self, key: &Key) -> Result<RowIdentity> {
        Ok(RowIdentity::from_identifier(
            &key.identifier(&self.separator, self.mode)?,
        ))
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn inc(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
        self.write(keys, values, MergeOp::Inc, 1).await
    }

    async fn set(&self, keys: &[Key], values: &ValueMap) -> Result<()> {
        self.write(keys, values, MergeOp::Set, 1).await
    }

    async fn inc_count(&self, keys: &[Key], values: &ValueMap, count: i64) -> Result<()> {
        self.write(keys, values, MergeOp::Inc, count).await
    }

    async fn set_count(&self, keys: &[Key], values: &ValueMap, count: i64) -> Result<()> {
        self.write(keys, values, MergeOp::Set, count).await
    }

    async fn get(&self, keys: &[Key]) -> Result<Vec<ValueMap>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.client.lock().await;
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            let identity = self.identity(key)?;
            let packed = read_packed(&*client, &self.table, &identity).await?;
            rows.push(unpack(&packed));
        }
        Ok(rows)
    }

    fn supports_count(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        format!("postgres({})", self.mode.tag())
    }
}

/// An identifier lowered to SQL columns and owned parameter values.
struct RowIdentity {
    columns: &'static [&'static str],
    key: String,
    granularity: Option<String>,
    at: Option<DateTime<Utc>>,
}

impl RowIdentity {
    fn from_identifier(identifier: &Identifier) -> Self {
        match identifier {
            Identifier::Full { key } => Self {
                columns: &["key"],
                key: key.clone(),
                granularity: None,
                at: None,
            },
            Identifier::Partial { key, at } => Self {
                columns: &["key", "at"],
                key: key.clone(),
                granularity: None,
                at: Some(at.with_timezone(&Utc)),
            },
            Identifier::Separated {
                key,
                granularity,
                at,
            } => Self {
                columns: &["key", "granularity", "at"],
                key: key.clone(),
                granularity: Some(granularity.clone()),
                at: Some(at.with_timezone(&Utc)),
            },
        }
    }

    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&self.key];
        if let Some(granularity) = &self.granularity {
            params.push(granularity);
        }
        if let Some(at) = &self.at {
            params.push(at);
        }
        params
    }

    fn where_clause(&self) -> String {
        self.columns
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{column} = ${}", index + 1))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

async fn read_packed<C: GenericClient>(
    client: &C,
    table: &str,
    identity: &RowIdentity,
) -> Result<ValueMap> {
    let query = format!(
        "SELECT data FROM {table} WHERE {} LIMIT 1",
        identity.where_clause()
    );
    let row = client.query_opt(&query, &identity.params()).await?;

    let Some(row) = row else {
        return Ok(ValueMap::new());
    };
    let data: Value = row.try_get(0)?;
    match data {
        Value::Object(map) => Ok(map),
        _ => Ok(ValueMap::new()),
    }
}

async fn upsert_packed<C: GenericClient>(
    client: &C,
    table: &str,
    identity: &RowIdentity,
    packed: ValueMap,
) -> Result<()> {
    let mut columns: Vec<&str> = identity.columns.to_vec();
    columns.push("data");
    let placeholders: Vec<String> = (1..=columns.len()).map(|index| format!("${index}")).collect();

    let query = format!(
        "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET data = EXCLUDED.data",
        columns.join(", "),
        placeholders.join(", "),
        identity.columns.join(", "),
    );

    let data = Value::Object(packed);
    let mut params = identity.params();
    params.push(&data);
    client
        .execute(&query, &params)
        .await
        .map_err(Error::from)?;
    Ok(())
}
