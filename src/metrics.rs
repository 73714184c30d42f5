//! Stage timings for the translation pipeline.
//! Histograms keep the last 1024 samples per stage and report p50/p95/p99.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// A span measuring elapsed time from creation to explicit end.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    pub fn new(name: &'static str, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            name,
            start: Instant::now(),
            registry,
        }
    }

    /// End the span, recording elapsed duration in milliseconds.
    pub fn finish(self) -> f64 {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.registry.record(self.name, elapsed_ms);
        elapsed_ms
    }
}

/// Fixed-capacity ring buffer for histogram samples.
struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
        }
    }

    fn push(&mut self, value: f64) {
        let capacity = self.samples.len();
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % capacity;
        if self.count < capacity {
            self.count += 1;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, SampleRing>>,
    counters: Mutex<HashMap<&'static str, u64>>,
    ring_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            ring_capacity: 1024,
        }
    }

    /// Record a sample (in milliseconds) for the named stage.
    pub fn record(&self, name: &'static str, value_ms: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value_ms);
        tracing::debug!(metric = name, value_ms, "metric_recorded");
    }

    pub fn increment(&self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &'static str, n: u64) {
        *self.counters.lock().entry(name).or_insert(0) += n;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Start a timing span that records on finish.
    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan::new(name, Arc::clone(self))
    }

    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.histograms
            .lock()
            .get(name)
            .map(|ring| ring.percentile(p))
            .unwrap_or(0.0)
    }

    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        hists
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50_ms: ring.percentile(50.0),
                        p95_ms: ring.percentile(95.0),
                        p99_ms: ring.percentile(99.0),
                        count: ring.count,
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricSummary {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub count: usize,
}

pub mod metric_names {
    pub const CONTEXT_ASSEMBLY: &str = "t_context_assembly";
    pub const TRANSLATE_CALL: &str = "t_translate_call";
    pub const NAME_DETECTION: &str = "t_name_detection";
    pub const DICTIONARY_APPLY: &str = "t_dictionary_apply";
    pub const SUMMARIZE_CALL: &str = "t_summarize_call";
    pub const CHAPTER_TOTAL: &str = "t_chapter_total";

    pub const TRANSLATIONS_FAILED: &str = "translations_failed";
    pub const SUMMARIES_FAILED: &str = "summaries_failed";
    pub const NAMES_DETECTED: &str = "names_detected";
}
