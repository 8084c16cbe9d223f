use std::time::Duration;

use tokio::time::Instant;

use crate::models::{Batch, EmbeddedRecord};

/// Collects accepted records until the batch is full or old enough to flush.
#[derive(Debug)]
pub struct BatchAccumulator {
    records: Vec<EmbeddedRecord>,
    max_size: usize,
    max_age: Duration,
    opened_at: Option<Instant>,
}

impl BatchAccumulator {
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            records: Vec::with_capacity(max_size),
            max_size,
            max_age,
            opened_at: None,
        }
    }

    /// Append a record, returning `true` once the batch is full.
    ///
    /// The first record into an empty accumulator arms the flush deadline.
    pub fn push(&mut self, record: EmbeddedRecord) -> bool {
        if self.records.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.records.push(record);
        self.records.len() >= self.max_size
    }

    /// When the pending batch must be flushed; `None` while empty.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|opened| opened + self.max_age)
    }

    /// Hand off the pending records and disarm the deadline.
    pub fn take(&mut self) -> Option<Batch> {
        self.opened_at = None;
        if self.records.is_empty() {
            return None;
        }
        let records = std::mem::replace(&mut self.records, Vec::with_capacity(self.max_size));
        Some(Batch::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogRecord;
    use chrono::Utc;

    fn record(i: usize) -> EmbeddedRecord {
        EmbeddedRecord::new(
            LogRecord::new(Utc::now(), format!("line {}", i), "svc"),
            vec![i as f32],
        )
    }

    #[tokio::test]
    async fn test_push_reports_full_at_max_size() {
        let mut acc = BatchAccumulator::new(3, Duration::from_secs(5));
        assert!(!acc.push(record(0)));
        assert!(!acc.push(record(1)));
        assert!(acc.push(record(2)));

        let batch = acc.take().unwrap();
        assert_eq!(batch.len(), 3);
        assert!(acc.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_armed_only_while_non_empty() {
        let mut acc = BatchAccumulator::new(10, Duration::from_secs(5));
        assert!(acc.deadline().is_none());

        let before = Instant::now();
        acc.push(record(0));
        let deadline = acc.deadline().unwrap();
        assert!(deadline >= before + Duration::from_secs(5));

        // Later records do not push the deadline out.
        acc.push(record(1));
        assert_eq!(acc.deadline(), Some(deadline));

        acc.take();
        assert!(acc.deadline().is_none());
    }

    #[tokio::test]
    async fn test_take_never_yields_empty_batch() {
        let mut acc = BatchAccumulator::new(10, Duration::from_secs(5));
        assert!(acc.take().is_none());

        acc.push(record(0));
        assert_eq!(acc.take().map(|b| b.len()), Some(1));
        assert!(acc.take().is_none());
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let mut acc = BatchAccumulator::new(10, Duration::from_secs(5));
        for i in 0..4 {
            acc.push(record(i));
        }
        let batch = acc.take().unwrap();
        let messages: Vec<&str> = batch.iter().map(|r| r.record.message()).collect();
        assert_eq!(messages, vec!["line 0", "line 1", "line 2", "line 3"]);
    }
}
