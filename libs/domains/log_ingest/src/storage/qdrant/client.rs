use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    self, CreateCollectionBuilder, Distance, ListValue, PointId, PointStruct, Struct,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder, value::Kind,
};
use tracing::{debug, info, warn};

use super::QdrantConfig;
use crate::error::{IngestError, IngestResult};
use crate::models::{Batch, EmbeddedRecord, LogRecord};
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::storage::VectorStore;

/// Qdrant-backed [`VectorStore`] writing one point per log record
pub struct QdrantStore {
    client: Qdrant,
    config: QdrantConfig,
    closed: AtomicBool,
}

impl QdrantStore {
    pub fn new(config: QdrantConfig) -> IngestResult<Self> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(api_key) = &config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        builder = builder.timeout(Duration::from_secs(config.timeout_secs));

        let client = builder.build().map_err(|e| {
            IngestError::StorageUnreachable(format!("Failed to build client: {}", e))
        })?;

        Ok(Self {
            client,
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Build the client and wait for the server to answer health checks.
    ///
    /// Retries with backoff until `startup_timeout` elapses.
    pub async fn connect(config: QdrantConfig, startup_timeout: Duration) -> IngestResult<Self> {
        let store = Self::new(config)?;
        let retry = RetryConfig::new()
            .with_max_retries(u32::MAX)
            .with_initial_delay(200)
            .with_max_delay(5_000);

        let probe = retry_with_backoff(
            || async {
                let result = store.health_check().await;
                if let Err(e) = &result {
                    debug!(url = %store.config.url, error = %e, "Qdrant not ready yet");
                }
                result
            },
            &retry,
        );

        match tokio::time::timeout(startup_timeout, probe).await {
            Ok(Ok(())) => {
                info!(url = %store.config.url, "Connected to Qdrant");
                Ok(store)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(IngestError::StorageUnreachable(format!(
                "{} did not become healthy within {}s",
                store.config.url,
                startup_timeout.as_secs()
            ))),
        }
    }

    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    async fn verify_dimension(&self) -> IngestResult<()> {
        let info = self
            .client
            .collection_info(&self.config.collection)
            .await
            .map_err(|e| IngestError::StorageUnreachable(e.to_string()))?;

        let actual = info
            .result
            .as_ref()
            .and_then(|r| vector_size(&r.config))
            .unwrap_or(0) as usize;

        if actual != self.config.dimension {
            return Err(IngestError::CollectionSchemaMismatch {
                collection: self.config.collection.clone(),
                expected: self.config.dimension,
                actual,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self) -> IngestResult<()> {
        let name = &self.config.collection;
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| IngestError::StorageUnreachable(e.to_string()))?;

        if exists {
            return self.verify_dimension().await;
        }

        let builder = CreateCollectionBuilder::new(name).vectors_config(VectorParamsBuilder::new(
            self.config.dimension as u64,
            Distance::Cosine,
        ));

        match self.client.create_collection(builder).await {
            Ok(_) => {
                info!(collection = %name, dimension = self.config.dimension, "Created collection");
                Ok(())
            }
            Err(e) => {
                // Another instance may have created it between the check and the create.
                warn!(collection = %name, error = %e, "Create collection failed, re-checking");
                let exists = self
                    .client
                    .collection_exists(name)
                    .await
                    .map_err(|e| IngestError::StorageUnreachable(e.to_string()))?;
                if exists {
                    self.verify_dimension().await
                } else {
                    Err(IngestError::StorageUnreachable(e.to_string()))
                }
            }
        }
    }

    async fn insert_batch(&self, batch: &Batch) -> IngestResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IngestError::StorageWrite("client is closed".to_string()));
        }
        if batch.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct> = batch.iter().map(to_point).collect();
        let builder = UpsertPointsBuilder::new(&self.config.collection, points).wait(true);

        self.client
            .upsert_points(builder)
            .await
            .map_err(|e| IngestError::StorageWrite(e.to_string()))?;

        Ok(())
    }

    async fn health_check(&self) -> IngestResult<()> {
        self.client
            .health_check()
            .await
            .map(|_| ())
            .map_err(|e| IngestError::StorageUnreachable(e.to_string()))
    }

    async fn close(&self) -> IngestResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(collection = %self.config.collection, "Qdrant store closed");
        }
        Ok(())
    }
}

fn to_point(embedded: &EmbeddedRecord) -> PointStruct {
    PointStruct::new(
        PointId::from(embedded.id.to_string()),
        embedded.vector.clone(),
        record_payload(&embedded.record),
    )
}

fn record_payload(record: &LogRecord) -> HashMap<String, QdrantValue> {
    let timestamp = record.timestamp();
    let metadata = record
        .metadata()
        .iter()
        .map(|(k, v)| (k.clone(), json_to_qdrant_value(v)))
        .collect();

    HashMap::from([
        (
            "timestamp".to_string(),
            QdrantValue::from(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        ),
        (
            "timestamp_ms".to_string(),
            QdrantValue::from(timestamp.timestamp_millis()),
        ),
        (
            "message".to_string(),
            QdrantValue::from(record.message().to_string()),
        ),
        (
            "source".to_string(),
            QdrantValue::from(record.source().to_string()),
        ),
        (
            "metadata".to_string(),
            QdrantValue {
                kind: Some(Kind::StructValue(Struct { fields: metadata })),
            },
        ),
    ])
}

/// Convert nested JSON into Qdrant payload values, keeping objects and arrays structured.
fn json_to_qdrant_value(val: &serde_json::Value) -> QdrantValue {
    let kind = match val {
        serde_json::Value::Null => Kind::NullValue(qdrant::NullValue::NullValue.into()),
        serde_json::Value::Bool(b) => Kind::BoolValue(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Kind::IntegerValue(i),
            None => Kind::DoubleValue(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Kind::StringValue(s.clone()),
        serde_json::Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_to_qdrant_value).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(Struct {
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), json_to_qdrant_value(v)))
                .collect(),
        }),
    };

    QdrantValue { kind: Some(kind) }
}

/// Vector size of a single-vector collection, or of the first named vector.
fn vector_size(config: &Option<qdrant::CollectionConfig>) -> Option<u64> {
    let vectors = config.as_ref()?.params.as_ref()?.vectors_config.as_ref()?;

    match vectors.config.as_ref()? {
        qdrant::vectors_config::Config::Params(p) => Some(p.size),
        qdrant::vectors_config::Config::ParamsMap(map) => map.map.values().next().map(|p| p.size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn sample_record() -> LogRecord {
        let metadata = json!({
            "pod": "api-0",
            "restarts": 2,
            "ratio": 0.5,
            "labels": {"app": "api", "tier": "web"},
            "ports": [80, 443],
            "node": null
        });
        let serde_json::Value::Object(map) = metadata else {
            unreachable!()
        };

        LogRecord::new(
            Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            "connection refused",
            "api",
        )
        .with_metadata(map)
    }

    #[test]
    fn test_record_payload_fields() {
        let payload = record_payload(&sample_record());

        assert_eq!(
            payload["timestamp"].kind,
            Some(Kind::StringValue("2023-11-14T22:13:20.123Z".into()))
        );
        assert_eq!(
            payload["timestamp_ms"].kind,
            Some(Kind::IntegerValue(1_700_000_000_123))
        );
        assert_eq!(
            payload["message"].kind,
            Some(Kind::StringValue("connection refused".into()))
        );
        assert_eq!(payload["source"].kind, Some(Kind::StringValue("api".into())));
    }

    #[test]
    fn test_nested_metadata_stays_structured() {
        let payload = record_payload(&sample_record());

        let Some(Kind::StructValue(metadata)) = &payload["metadata"].kind else {
            panic!("metadata should be a struct");
        };

        assert_eq!(metadata.fields["restarts"].kind, Some(Kind::IntegerValue(2)));
        assert_eq!(metadata.fields["ratio"].kind, Some(Kind::DoubleValue(0.5)));
        assert!(matches!(metadata.fields["node"].kind, Some(Kind::NullValue(_))));

        let Some(Kind::StructValue(labels)) = &metadata.fields["labels"].kind else {
            panic!("labels should be a struct");
        };
        assert_eq!(labels.fields["tier"].kind, Some(Kind::StringValue("web".into())));

        let Some(Kind::ListValue(ports)) = &metadata.fields["ports"].kind else {
            panic!("ports should be a list");
        };
        assert_eq!(ports.values.len(), 2);
        assert_eq!(ports.values[1].kind, Some(Kind::IntegerValue(443)));
    }

    #[test]
    fn test_point_uses_record_id() {
        let embedded = EmbeddedRecord::new(sample_record(), vec![0.1, 0.2]);
        let point = to_point(&embedded);
        assert_eq!(point.id, Some(PointId::from(embedded.id.to_string())));
    }

    #[test]
    fn test_vector_size_missing_config() {
        assert_eq!(vector_size(&None), None);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_inserts() {
        let store = QdrantStore::new(QdrantConfig::default()).unwrap();
        store.close().await.unwrap();

        let batch = Batch::new(vec![EmbeddedRecord::new(sample_record(), vec![1.0])]);
        let err = store.insert_batch(&batch).await.unwrap_err();
        assert!(matches!(err, IngestError::StorageWrite(_)));
    }
}
