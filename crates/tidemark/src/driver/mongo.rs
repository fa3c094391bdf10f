//! MongoDB backend over one document per record.
//!
//! The payload lives in a `data` subdocument. Packed dotted paths map
//! straight onto Mongo's update operators (`$inc`/`$set` on
//! `data.<path>`), which both merge atomically per document and nest the
//! paths natively — reads return the nested tree without an unpack step.

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{IndexOptions, UpdateOptions};
use mongodb::{Collection, IndexModel};
use serde_json::Value;

use crate::driver::{system_key_for, system_values, Driver};
use crate::error::{Error, Result};
use crate::key::{Identifier, IdentifierMode, Key};
use crate::merge::MergeOp;
use crate::numeric::to_float;
use crate::packer::pack;
use crate::ValueMap;

/// Driver for MongoDB document storage.
pub struct MongoDriver {
    collection: Collection<Document>,
    separator: String,
    mode: IdentifierMode,
    system_tracking: bool,
}

impl MongoDriver {
    /// Wraps a collection.
    #[must_use]
    pub fn new(collection: Collection<Document>, mode: IdentifierMode) -> Self {
        Self {
            collection,
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

    /// Creates the unique index for the configured identifier mode.
    ///
    /// # Errors
    ///
    /// Surfaces the backend error verbatim.
    pub async fn setup(&self) -> Result<()> {
        let keys = match self.mode {
            IdentifierMode::Full => doc! {"key": 1},
            IdentifierMode::Partial => doc! {"key": 1, "at": -1},
            IdentifierMode::Separated => doc! {"key": 1, "granularity": 1, "at": -1},
        };
        let index = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection.create_index(index, None).await?;
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

        let upsert = UpdateOptions::builder().upsert(true).build();
        for key in keys {
            let filter = self.filter(key)?;
            let update = update_document(op, &packed)?;
            self.collection
                .update_one(filter, update, upsert.clone())
                .await?;

            if self.system_tracking {
                let system_filter = self.filter(&system_key_for(key))?;
                let system_update = update_document(
                    MergeOp::Inc,
                    &system_values(key.system_tracking_key(), count),
                )?;
                self.collection
                    .update_one(system_filter, system_update, upsert.clone())
                    .await?;
            }
        }
        Ok(())
    }

    fn filter(&self, key: &Key) -> Result<Document> {
        Ok(match key.identifier(&self.separator, self.mode)? {
            Identifier::Full { key } => doc! {"key": key},
            Identifier::Partial { key, at } => doc! {
                "key": key,
                "at": BsonDateTime::from_millis(at.timestamp_millis()),
            },
            Identifier::Separated {
                key,
                granularity,
                at,
            } => doc! {
                "key": key,
                "granularity": granularity,
                "at": BsonDateTime::from_millis(at.timestamp_millis()),
            },
        })
    }
}

#[async_trait]
impl Driver for MongoDriver {
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

        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            let filter = self.filter(key)?;
            let document = self.collection.find_one(filter, None).await?;

            let data = document
                .as_ref()
                .and_then(|doc| doc.get("data"))
                .and_then(Bson::as_document)
                .map(document_to_map)
                .transpose()?
                .unwrap_or_default();
            rows.push(data);
        }
        Ok(rows)
    }

    fn supports_count(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        format!("mongo({})", self.mode.tag())
    }
}

fn update_document(op: MergeOp, packed: &ValueMap) -> Result<Document> {
    let mut fields = Document::new();
    match op {
        MergeOp::Inc => {
            for (path, value) in packed {
                let delta = to_float(value).ok_or_else(|| {
                    Error::validation(format!(
                        "increment requires a numeric value for {path:?}"
                    ))
                })?;
                fields.insert(format!("data.{path}"), delta);
            }
            Ok(doc! {"$inc": fields})
        }
        MergeOp::Set => {
            for (path, value) in packed {
                fields.insert(
                    format!("data.{path}"),
                    mongodb::bson::to_bson(value).map_err(Error::backend)?,
                );
            }
            Ok(doc! {"$set": fields})
        }
    }
}

fn document_to_map(document: &Document) -> Result<ValueMap> {
    match serde_json::to_value(document).map_err(Error::backend)? {
        Value::Object(map) => Ok(map),
        _ => Ok(ValueMap::new()),
    }
}
