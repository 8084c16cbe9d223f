use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::IngestState;
use crate::error::IngestError;
use crate::metrics::RequestOutcome;
use crate::parser::parse_lines;

/// Per-line errors echoed back to the client; the `rejected` count is never capped.
const MAX_REPORTED_ERRORS: usize = 100;

/// Seconds a client should wait after a backpressure response.
const RETRY_AFTER_SECS: &str = "1";

/// Outcome of one ingestion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub accepted: usize,
    pub rejected: usize,
    pub errors: Vec<RejectedLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedLine {
    /// 1-based request line, absent for request-level errors
    pub line: Option<usize>,
    pub kind: String,
    pub reason: String,
}

#[derive(Default)]
struct Tally {
    accepted: usize,
    rejected: usize,
    queue_full: bool,
    shutting_down: bool,
    errors: Vec<RejectedLine>,
}

impl Tally {
    fn reject(&mut self, state: &IngestState, line: Option<usize>, err: &IngestError) {
        self.rejected += 1;
        state.metrics.record_rejected(err.kind());
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(RejectedLine {
                line,
                kind: err.kind().to_string(),
                reason: err.to_string(),
            });
        }
    }

    fn outcome(&self) -> RequestOutcome {
        if self.accepted > 0 {
            if self.rejected == 0 {
                RequestOutcome::Accepted
            } else {
                RequestOutcome::Partial
            }
        } else if self.shutting_down {
            RequestOutcome::ShuttingDown
        } else if self.queue_full {
            RequestOutcome::Backpressure
        } else {
            RequestOutcome::Malformed
        }
    }
}

/// Accept newline-delimited JSON log records.
///
/// Valid records are queued in request order. Once the queue reports
/// backpressure or shutdown, the remaining records are rejected without
/// waiting so that a single request never blocks for more than one enqueue
/// timeout.
pub async fn ingest_handler(State(state): State<IngestState>, body: Bytes) -> Response {
    let parsed = parse_lines(&body);
    let mut tally = Tally::default();

    for err in &parsed.errors {
        tally.reject(&state, err.line(), err);
    }

    for (line, record) in parsed.records {
        if tally.shutting_down {
            tally.reject(&state, Some(line), &IngestError::ShuttingDown);
            continue;
        }
        if tally.queue_full {
            tally.reject(&state, Some(line), &IngestError::QueueFull);
            continue;
        }

        match state.pipeline.enqueue(record).await {
            Ok(()) => tally.accepted += 1,
            Err(e) => {
                match e {
                    IngestError::ShuttingDown => tally.shutting_down = true,
                    _ => tally.queue_full = true,
                }
                tally.reject(&state, Some(line), &e);
            }
        }
    }

    if tally.accepted == 0 && tally.rejected == 0 {
        tally.errors.push(RejectedLine {
            line: None,
            kind: "empty_body".to_string(),
            reason: "request body contains no records".to_string(),
        });
    }

    tally.errors.sort_by_key(|e| e.line);

    let outcome = tally.outcome();
    state.metrics.request(outcome);
    state.metrics.records_accepted(tally.accepted);

    let status = match outcome {
        RequestOutcome::Accepted => StatusCode::ACCEPTED,
        RequestOutcome::Partial => StatusCode::MULTI_STATUS,
        RequestOutcome::Backpressure | RequestOutcome::ShuttingDown => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RequestOutcome::Malformed => StatusCode::BAD_REQUEST,
    };

    match outcome {
        RequestOutcome::Accepted | RequestOutcome::Partial => debug!(
            accepted = tally.accepted,
            rejected = tally.rejected,
            "Ingest request processed"
        ),
        _ => warn!(
            outcome = outcome.as_str(),
            rejected = tally.rejected,
            "Ingest request refused"
        ),
    }

    let body = IngestResponse {
        status: outcome.as_str().to_string(),
        accepted: tally.accepted,
        rejected: tally.rejected,
        errors: tally.errors,
    };

    let mut response = (status, Json(body)).into_response();
    if outcome == RequestOutcome::Backpressure {
        response.headers_mut().insert(
            header::RETRY_AFTER,
            HeaderValue::from_static(RETRY_AFTER_SECS),
        );
    }
    response
}
