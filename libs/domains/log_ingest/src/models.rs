use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One ingested log entry.
///
/// Immutable once constructed: fields are only reachable through accessors.
/// The timestamp is held at millisecond precision so that every supported
/// source encoding of the same instant compares equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    timestamp: DateTime<Utc>,
    message: String,
    source: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl LogRecord {
    pub fn new(timestamp: DateTime<Utc>, message: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            timestamp: truncate_to_millis(timestamp),
            message: message.into(),
            source: source.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Origin identifier; also the deduplication stream key.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts.timestamp_millis())
        .single()
        .unwrap_or(ts)
}

/// A record paired with its embedding and the point id it will be stored under.
///
/// The id is fixed at embedding time so a retried batch upserts the same points.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRecord {
    pub id: Uuid,
    pub record: LogRecord,
    pub vector: Vec<f32>,
}

impl EmbeddedRecord {
    pub fn new(record: LogRecord, vector: Vec<f32>) -> Self {
        Self {
            id: Uuid::now_v7(),
            record,
            vector,
        }
    }
}

/// An ordered group of records written to storage in one call.
///
/// A batch has no mutating methods; whoever holds it after handoff can only read it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    records: Vec<EmbeddedRecord>,
}

impl Batch {
    pub fn new(records: Vec<EmbeddedRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EmbeddedRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmbeddedRecord> {
        self.records.iter()
    }
}
