//! Worker configuration loaded from environment variables.

use std::time::Duration;

use crate::error::{Result, WorkerError};

/// Default queue list with priority weights.
pub const DEFAULT_QUEUES: &str = "order_processing_chain:6,critical:6,default:3,payments:3,inventory_check:3,notifications:3,low:1";

/// A queue the worker pulls from, with its priority weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueWeight {
    pub name: String,
    pub weight: u32,
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Which idempotency ledger the chain orchestrator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    /// Every delivery of a chain step runs its handler.
    None,
    /// Completed steps are recorded in the key-value store and skipped on
    /// redelivery.
    Kv,
}

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `REDIS_URL`: key-value store holding inventory counters
/// - `REDIS_QUEUE_URL`: job queue backend
/// - `DATABASE_URL`: PostgreSQL catalog; unset runs on an in-memory catalog
/// - `QUEUE_CONCURRENCY`: number of worker tasks (default: `10`)
/// - `QUEUES`: `name:weight` list; higher weights are polled first
/// - `QUEUE_RETRY_BASE_DELAY_SECS`: base of the retry backoff (default: `15`)
/// - `QUEUE_POLL_INTERVAL_MS`: wait on an empty queue (default: `200`)
/// - `CHAIN_STEP_DELAY_MS`: delay between chain steps (default: `1000`)
/// - `CHAIN_LEDGER`: `none` or `kv` (default: `none`)
/// - `INVENTORY_SYNC_INTERVAL_SECS`: reconciliation period, `0` disables
///   (default: `300`)
/// - `METRICS_ADDR`: Prometheus listener (default: `"0.0.0.0:9000"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub redis_queue_url: String,
    pub database_url: Option<String>,
    pub concurrency: usize,
    pub queues: Vec<QueueWeight>,
    pub retry_base_delay: Duration,
    pub poll_interval: Duration,
    pub step_delay: Duration,
    pub ledger: LedgerMode,
    pub inventory_sync_interval: Option<Duration>,
    pub metrics_addr: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from environment variables, falling back to
    /// defaults for unset or unparsable numbers.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup` instead of the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let queues = match lookup("QUEUES") {
            Some(raw) => parse_queues(&raw)?,
            None => defaults.queues,
        };
        let ledger = match lookup("CHAIN_LEDGER").as_deref() {
            None | Some("none") => LedgerMode::None,
            Some("kv") => LedgerMode::Kv,
            Some(other) => {
                return Err(WorkerError::Config(format!(
                    "CHAIN_LEDGER must be 'none' or 'kv', got '{other}'"
                )));
            }
        };
        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(WorkerError::Config(format!(
                    "LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )));
            }
        };
        let sync_secs = number("INVENTORY_SYNC_INTERVAL_SECS", 300);

        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            redis_queue_url: lookup("REDIS_QUEUE_URL").unwrap_or(defaults.redis_queue_url),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            concurrency: (number("QUEUE_CONCURRENCY", 10) as usize).max(1),
            queues,
            retry_base_delay: Duration::from_secs(number("QUEUE_RETRY_BASE_DELAY_SECS", 15)),
            poll_interval: Duration::from_millis(number("QUEUE_POLL_INTERVAL_MS", 200)),
            step_delay: Duration::from_millis(number("CHAIN_STEP_DELAY_MS", 1000)),
            ledger,
            inventory_sync_interval: (sync_secs > 0).then(|| Duration::from_secs(sync_secs)),
            metrics_addr: lookup("METRICS_ADDR").unwrap_or(defaults.metrics_addr),
            log_format,
        })
    }

    /// Queue names in polling order: highest weight first, ties in
    /// declaration order.
    pub fn queue_names(&self) -> Vec<String> {
        let mut queues = self.queues.clone();
        queues.sort_by(|a, b| b.weight.cmp(&a.weight));
        queues.into_iter().map(|q| q.name).collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/10".to_string(),
            redis_queue_url: "redis://127.0.0.1:6379/9".to_string(),
            database_url: None,
            concurrency: 10,
            queues: parse_queues(DEFAULT_QUEUES).unwrap_or_default(),
            retry_base_delay: Duration::from_secs(15),
            poll_interval: Duration::from_millis(200),
            step_delay: Duration::from_secs(1),
            ledger: LedgerMode::None,
            inventory_sync_interval: Some(Duration::from_secs(300)),
            metrics_addr: "0.0.0.0:9000".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

/// Parses a `name:weight,name:weight` list. A missing weight means `1`.
pub fn parse_queues(raw: &str) -> Result<Vec<QueueWeight>> {
    let mut queues = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, weight) = match entry.split_once(':') {
            Some((name, weight)) => {
                let weight = weight.trim().parse::<u32>().map_err(|_| {
                    WorkerError::Config(format!("invalid weight in queue entry '{entry}'"))
                })?;
                (name.trim(), weight)
            }
            None => (entry, 1),
        };
        if name.is_empty() || weight == 0 {
            return Err(WorkerError::Config(format!("invalid queue entry '{entry}'")));
        }
        if queues.iter().any(|q: &QueueWeight| q.name == name) {
            return Err(WorkerError::Config(format!("queue '{name}' listed twice")));
        }
        queues.push(QueueWeight {
            name: name.to_string(),
            weight,
        });
    }
    if queues.is_empty() {
        return Err(WorkerError::Config("QUEUES is empty".to_string()));
    }
    Ok(queues)
}
