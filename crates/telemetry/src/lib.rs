//! Logging and check-in funnel metrics for carevisit
//!
//! - Structured logging with tracing (compact text or JSON lines, on stderr)
//! - A process-wide session id for correlating log lines
//! - Funnel counters and latency/distance summaries, exportable as JSON

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

static METRICS: Lazy<MetricsRegistry> = Lazy::new(MetricsRegistry::new);

static SESSION_ID: Lazy<String> = Lazy::new(|| Uuid::new_v4().to_string());

/// Metric names recorded by the check-in controller
pub mod names {
    /// Check-in taps that reached the precise fix request
    pub const ATTEMPTS: &str = "checkin.attempts";
    pub const SUCCESS: &str = "checkin.success";
    pub const OUT_OF_RANGE: &str = "checkin.out_of_range";
    pub const PRECISE_FAILED: &str = "checkin.precise_failed";
    pub const WRITE_FAILED: &str = "checkin.write_failed";
    pub const LOAD_FAILED: &str = "checkin.load_failed";
    pub const STREAM_ERRORS: &str = "checkin.stream_errors";
    pub const FALLBACK: &str = "checkin.fallback";
    /// Distance of each precise fix from the visit target, in meters
    pub const PRECISE_DISTANCE_M: &str = "checkin.precise_distance_m";
    pub const PRECISE_FIX_MS: &str = "checkin.precise_fix_ms";
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON lines instead of compact text
    pub json: bool,
    pub show_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            show_target: false,
        }
    }
}

/// Initialize logging with defaults
pub fn init() -> anyhow::Result<()> {
    init_with_config(TelemetryConfig::default())
}

/// Initialize logging
///
/// `RUST_LOG` wins over `config.log_level` when set. Logs go to stderr so
/// command output on stdout stays machine-readable.
pub fn init_with_config(config: TelemetryConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", config.log_level, e))?;

    let json = config.json.then(|| {
        fmt::layer()
            .json()
            .with_target(config.show_target)
            .with_writer(std::io::stderr)
    });
    let text = (!config.json).then(|| {
        fmt::layer()
            .compact()
            .with_target(config.show_target)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    tracing::debug!(
        session_id = %session_id(),
        version = env!("CARGO_PKG_VERSION"),
        "Telemetry initialized"
    );
    Ok(())
}

/// Id shared by every log line and metrics export of this process
pub fn session_id() -> &'static str {
    &SESSION_ID
}

/// The process-wide registry
pub fn metrics() -> &'static MetricsRegistry {
    &METRICS
}

/// Counters and sample summaries keyed by metric name
pub struct MetricsRegistry {
    inner: Mutex<Recorded>,
    started: Instant,
}

#[derive(Default)]
struct Recorded {
    counters: BTreeMap<&'static str, u64>,
    samples: BTreeMap<&'static str, Vec<f64>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Recorded::default()),
            started: Instant::now(),
        }
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment(&self, name: &'static str) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&self, name: &'static str, value: u64) {
        *self.recorded().counters.entry(name).or_insert(0) += value;
    }

    /// Current value of a counter (zero if never incremented)
    pub fn counter(&self, name: &str) -> u64 {
        self.recorded().counters.get(name).copied().unwrap_or(0)
    }

    /// Record a sample; non-finite values are dropped
    pub fn histogram(&self, name: &'static str, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.recorded().samples.entry(name).or_default().push(value);
    }

    /// Summary of the samples recorded under `name`
    pub fn summary(&self, name: &str) -> Option<Summary> {
        self.recorded().samples.get(name).and_then(|v| Summary::of(v))
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Export as `{session_id, uptime_secs, counters, histograms}`
    pub fn export_json(&self) -> serde_json::Value {
        let recorded = self.recorded();
        let histograms: BTreeMap<&str, Summary> = recorded
            .samples
            .iter()
            .filter_map(|(name, values)| Summary::of(values).map(|s| (*name, s)))
            .collect();

        serde_json::json!({
            "session_id": session_id(),
            "uptime_secs": self.uptime().as_secs(),
            "counters": recorded.counters,
            "histograms": histograms,
        })
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary statistics over recorded samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
}

impl Summary {
    /// `None` for an empty slice
    fn of(values: &[f64]) -> Option<Self> {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let (&min, &max) = (sorted.first()?, sorted.last()?);

        let rank = |p: f64| {
            let idx = (p * (sorted.len() - 1) as f64).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };

        Some(Self {
            count: sorted.len(),
            min,
            max,
            mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
            p50: rank(0.50),
            p95: rank(0.95),
        })
    }
}

/// Records elapsed milliseconds into the global registry when stopped
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        metrics().histogram(self.name, elapsed.as_secs_f64() * 1000.0);
        tracing::debug!(metric = self.name, elapsed_ms = elapsed.as_millis() as u64, "Timer stopped");
        elapsed
    }
}
