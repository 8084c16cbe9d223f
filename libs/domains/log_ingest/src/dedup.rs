//! Near-duplicate suppression over per-stream windows of recent embeddings.
//!
//! Every vector a stream produces joins that stream's window, whether it was
//! stored or suppressed. A vector is suppressed once at least `min_examples`
//! window vectors are at or above the similarity threshold. The window is
//! bounded by age since insertion and by entry count (oldest first), so its
//! contents never depend on the threshold or `min_examples`.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Cosine similarity at or above which two vectors are the same pattern, in (0, 1]
    pub threshold: f32,
    /// Similar window vectors needed before a vector is suppressed
    pub min_examples: u32,
    /// Entries kept per stream
    pub max_entries: usize,
    /// Entries older than this are pruned
    pub max_age: Duration,
    /// Streams tracked per worker; the least recently seen is forgotten first
    pub max_streams: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            min_examples: 3,
            max_entries: 1000,
            max_age: Duration::from_secs(3600),
            max_streams: 1000,
        }
    }
}

impl DedupConfig {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_examples(mut self, min_examples: u32) -> Self {
        self.min_examples = min_examples;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_max_streams(mut self, max_streams: usize) -> Self {
        self.max_streams = max_streams;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Suppress,
}

#[derive(Debug)]
struct WindowEntry {
    vector: Vec<f32>,
    inserted: Instant,
}

/// Bounded FIFO of recently seen vectors for one stream.
#[derive(Debug)]
pub struct RecentVectorWindow {
    entries: VecDeque<WindowEntry>,
    last_seen: Instant,
}

impl RecentVectorWindow {
    fn new(now: Instant) -> Self {
        Self {
            entries: VecDeque::new(),
            last_seen: now,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self, now: Instant, max_age: Duration) {
        self.entries
            .retain(|e| now.saturating_duration_since(e.inserted) <= max_age);
    }

    /// Number of entries at or above `threshold` similarity to `vector`.
    fn matches(&self, vector: &[f32], threshold: f32) -> usize {
        self.entries
            .iter()
            .filter_map(|e| cosine_similarity(&e.vector, vector))
            .filter(|s| *s >= threshold)
            .count()
    }

    fn push(&mut self, vector: &[f32], now: Instant, max_entries: usize) {
        self.entries.push_back(WindowEntry {
            vector: vector.to_vec(),
            inserted: now,
        });
        while self.entries.len() > max_entries.max(1) {
            self.entries.pop_front();
        }
        self.last_seen = now;
    }
}

/// Per-worker deduplicator; one window per stream key.
#[derive(Debug)]
pub struct SimilarityDeduplicator {
    config: DedupConfig,
    windows: HashMap<String, RecentVectorWindow>,
}

impl SimilarityDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    pub fn consider(&mut self, stream_key: &str, vector: &[f32]) -> Decision {
        self.consider_at(stream_key, vector, Instant::now())
    }

    pub fn consider_at(&mut self, stream_key: &str, vector: &[f32], now: Instant) -> Decision {
        if !self.windows.contains_key(stream_key) {
            self.make_room();
        }
        let window = self
            .windows
            .entry(stream_key.to_string())
            .or_insert_with(|| RecentVectorWindow::new(now));
        window.prune(now, self.config.max_age);

        let similar = window.matches(vector, self.config.threshold);
        window.push(vector, now, self.config.max_entries);

        if similar >= self.config.min_examples as usize {
            Decision::Suppress
        } else {
            Decision::Accept
        }
    }

    /// Forget least recently seen streams until a new one fits.
    fn make_room(&mut self) {
        let cap = self.config.max_streams.max(1);
        while self.windows.len() >= cap {
            let idle = self
                .windows
                .iter()
                .min_by_key(|(_, w)| w.last_seen)
                .map(|(key, _)| key.clone());
            match idle {
                Some(key) => {
                    self.windows.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Age out entries in every window and forget streams left empty.
    pub fn prune(&mut self, now: Instant) {
        let max_age = self.config.max_age;
        self.windows.retain(|_, window| {
            window.prune(now, max_age);
            !window.is_empty()
        });
    }

    pub fn stream_count(&self) -> usize {
        self.windows.len()
    }

    pub fn window(&self, stream_key: &str) -> Option<&RecentVectorWindow> {
        self.windows.get(stream_key)
    }
}

/// Cosine similarity, or `None` for mismatched lengths and zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some((dot / denom) as f32)
}
