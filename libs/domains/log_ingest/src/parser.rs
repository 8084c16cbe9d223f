//! Newline-delimited JSON record parsing.
//!
//! Two input shapes are accepted per line:
//!
//! ```text
//! direct:   {"timestamp": .., "message": "..", "source": "..", "metadata": {..}}
//! shipper:  {"date": .., "log": "..\n", "kubernetes": {"pod_name": .., ..}, "stream": ".."}
//! ```
//!
//! Timestamps may be epoch milliseconds (JSON integer), epoch seconds
//! (JSON float) or an RFC3339 / ISO-8601 string.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::{IngestError, IngestResult};
use crate::models::LogRecord;

/// Timestamp keys tried, in order, on shipper-native lines.
const SHIPPER_TIMESTAMP_KEYS: [&str; 3] = ["date", "@timestamp", "time"];

/// Source keys tried, in order, on shipper-native lines.
const SHIPPER_SOURCE_KEYS: [&str; 3] = ["source", "file", "path"];

/// Kubernetes filter fields and the metadata keys they are normalized to.
const KUBERNETES_FIELDS: [(&str, &str); 6] = [
    ("pod_name", "pod"),
    ("namespace_name", "namespace"),
    ("host", "node"),
    ("container_name", "container"),
    ("container_image", "image"),
    ("labels", "labels"),
];

/// Valid records and per-line errors from one request body.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Parsed records with their 1-based line numbers, in request order.
    pub records: Vec<(usize, LogRecord)>,
    pub errors: Vec<IngestError>,
}

impl ParseOutcome {
    /// Number of non-blank lines seen.
    pub fn total(&self) -> usize {
        self.records.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Parse every non-blank line of `body`. A bad line never stops the lines after it.
pub fn parse_lines(body: &[u8]) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();

    for (idx, raw) in body.split(|b| *b == b'\n').enumerate() {
        let raw = raw.trim_ascii();
        if raw.is_empty() {
            continue;
        }

        let line = idx + 1;
        match parse_line(line, raw) {
            Ok(record) => outcome.records.push((line, record)),
            Err(e) => outcome.errors.push(e),
        }
    }

    outcome
}

/// Parse a single JSON line into a record.
pub fn parse_line(line: usize, raw: &[u8]) -> IngestResult<LogRecord> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| IngestError::parse(line, e.to_string()))?;

    let Value::Object(object) = value else {
        return Err(IngestError::parse(line, "expected a JSON object"));
    };

    if object.contains_key("message") {
        parse_direct(line, object)
    } else if object.contains_key("log") {
        parse_shipper(line, object)
    } else {
        Err(IngestError::validation(line, "missing field `message`"))
    }
}

fn parse_direct(line: usize, mut object: Map<String, Value>) -> IngestResult<LogRecord> {
    let timestamp = match object.get("timestamp") {
        Some(value) => parse_timestamp(line, "timestamp", value)?,
        None => return Err(IngestError::validation(line, "missing field `timestamp`")),
    };
    let message = required_text(line, "message", object.get("message"))?;
    let source = required_text(line, "source", object.get("source"))?;

    let metadata = match object.remove("metadata") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(IngestError::validation(
                line,
                "field `metadata` must be an object",
            ));
        }
    };

    Ok(LogRecord::new(timestamp, message, source).with_metadata(metadata))
}

fn parse_shipper(line: usize, object: Map<String, Value>) -> IngestResult<LogRecord> {
    let timestamp = SHIPPER_TIMESTAMP_KEYS
        .iter()
        .find_map(|key| object.get(*key).map(|value| (*key, value)))
        .ok_or_else(|| IngestError::validation(line, "missing field `date`"))
        .and_then(|(key, value)| parse_timestamp(line, key, value))?;

    let message = required_text(line, "log", object.get("log"))?;

    let kubernetes = match object.get("kubernetes") {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    };

    let mut metadata = Map::new();
    if let Some(k8s) = kubernetes {
        for (from, to) in KUBERNETES_FIELDS {
            if let Some(value) = k8s.get(from).filter(|v| !v.is_null()) {
                metadata.insert(to.to_string(), value.clone());
            }
        }
    }
    if let Some(stream) = object.get("stream").filter(|v| !v.is_null()) {
        metadata.insert("stream".to_string(), stream.clone());
    }

    let source = SHIPPER_SOURCE_KEYS
        .iter()
        .find_map(|key| non_empty_str(object.get(*key)))
        .map(str::to_string)
        .or_else(|| kubernetes.and_then(kubernetes_source))
        .ok_or_else(|| IngestError::validation(line, "missing field `source`"))?;

    Ok(LogRecord::new(timestamp, message, source).with_metadata(metadata))
}

/// `namespace/pod[/container]` from the kubernetes filter block.
fn kubernetes_source(k8s: &Map<String, Value>) -> Option<String> {
    let namespace = non_empty_str(k8s.get("namespace_name"))?;
    let pod = non_empty_str(k8s.get("pod_name"))?;

    Some(match non_empty_str(k8s.get("container_name")) {
        Some(container) => format!("{}/{}/{}", namespace, pod, container),
        None => format!("{}/{}", namespace, pod),
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn required_text(line: usize, field: &str, value: Option<&Value>) -> IngestResult<String> {
    match value {
        None | Some(Value::Null) => Err(IngestError::validation(
            line,
            format!("missing field `{}`", field),
        )),
        Some(Value::String(s)) => {
            let normalized = s.trim_end_matches(['\n', '\r']);
            if normalized.trim().is_empty() {
                Err(IngestError::validation(
                    line,
                    format!("field `{}` must not be empty", field),
                ))
            } else {
                Ok(normalized.to_string())
            }
        }
        Some(_) => Err(IngestError::validation(
            line,
            format!("field `{}` must be a string", field),
        )),
    }
}

/// Interpret a timestamp under each supported encoding.
pub fn parse_timestamp(line: usize, field: &str, value: &Value) -> IngestResult<DateTime<Utc>> {
    let invalid = |detail: &str| {
        IngestError::validation(line, format!("field `{}` {}", field, detail))
    };

    match value {
        Value::Number(n) => {
            if let Some(millis) = n.as_i64() {
                Utc.timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| invalid("is out of range"))
            } else if n.is_u64() {
                Err(invalid("is out of range"))
            } else {
                let secs = n.as_f64().ok_or_else(|| invalid("is not a number"))?;
                from_epoch_seconds(secs).ok_or_else(|| invalid("is out of range"))
            }
        }
        Value::String(s) => parse_timestamp_str(s.trim())
            .ok_or_else(|| invalid("is not an RFC3339 / ISO-8601 timestamp")),
        _ => Err(invalid(
            "must be epoch millis, epoch seconds or an RFC3339 string",
        )),
    }
}

fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let millis = (secs * 1000.0).round();
    if millis.abs() >= i64::MAX as f64 {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // ISO-8601 without an offset is taken as UTC.
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}
