use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub aws: AwsConfig,
    pub queue: QueueConfig,
    pub stream: StreamConfig,
    pub collector: CollectorConfig,
    pub consumer: ConsumerConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `ARCHIVIST_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("ARCHIVIST_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            storage: StorageConfig::from_env_profiled(p),
            aws: AwsConfig::from_env_profiled(p),
            queue: QueueConfig::from_env_profiled(p),
            stream: StreamConfig::from_env_profiled(p),
            collector: CollectorConfig::from_env_profiled(p),
            consumer: ConsumerConfig::from_env_profiled(p),
            notify: NotifyConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  storage:    data_dir={}", self.storage.data_dir.display());
        tracing::info!("  aws:        region={}, static_credentials={}", self.aws.region, self.aws.has_static_credentials());
        tracing::info!("  queue:      prefix={}", self.queue.queue_url_prefix.as_deref().unwrap_or("(none)"));
        tracing::info!("  stream:     endpoint={}", self.stream.endpoint);
        tracing::info!(
            "  collector:  loop={:?}, chill={:?}, listener_wait={:?}",
            self.collector.loop_interval, self.collector.chill_time, self.collector.listener_wait
        );
        tracing::info!(
            "  consumer:   distillation_window={:?}, error_backoff={:?}",
            self.consumer.distillation_window, self.consumer.error_backoff
        );
        tracing::info!("  notify:     webhook={}", self.notify.webhook_url.is_some());
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
        }
    }

    /// Directory holding per-archive record logs.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Directory holding generated artifacts (raw dumps, geo maps).
    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }
}

// ── AWS ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "ap-southeast-1"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            endpoint_url: profiled_env_opt(p, "QUEUE_AWS_ENDPOINT_URL"),
        }
    }

    pub fn has_static_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

// ── Queue ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue URL prefix; the per-archive queue name is appended.
    pub queue_url_prefix: Option<String>,
    pub visibility_timeout_secs: u64,
    pub wait_time_secs: u64,
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            queue_url_prefix: profiled_env_opt(p, "QUEUE_URL_PREFIX"),
            visibility_timeout_secs: profiled_env_u64(p, "QUEUE_VISIBILITY_TIMEOUT_SECS", 120),
            wait_time_secs: profiled_env_u64(p, "QUEUE_WAIT_TIME_SECS", 20),
        }
    }

    /// Full queue URL for a queue name, if a prefix is configured.
    pub fn queue_url(&self, queue_name: &str) -> Option<String> {
        self.queue_url_prefix
            .as_deref()
            .map(|prefix| format!("{}/{}", prefix.trim_end_matches('/'), queue_name))
    }
}

// ── Upstream stream ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub endpoint: String,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
}

impl StreamConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            endpoint: profiled_env_or(
                p,
                "STREAM_ENDPOINT",
                "https://stream.twitter.com/1.1/statuses/filter.json",
            ),
            consumer_key: profiled_env_opt(p, "STREAM_CONSUMER_KEY"),
            consumer_secret: profiled_env_opt(p, "STREAM_CONSUMER_SECRET"),
        }
    }
}

// ── Collector (stream supervisor) ─────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Delay between reconciliation ticks.
    pub loop_interval: Duration,
    /// Cooldown before restarting channels that dropped.
    pub chill_time: Duration,
    /// Delay between opening consecutive upstream connections.
    pub listener_wait: Duration,
    pub admin_addr: String,
}

impl CollectorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            loop_interval: Duration::from_millis(profiled_env_u64(p, "COLLECTOR_LOOP_MS", 1_000)),
            chill_time: Duration::from_secs(profiled_env_u64(p, "COLLECTOR_CHILL_SECS", 30)),
            listener_wait: Duration::from_secs(profiled_env_u64(p, "COLLECTOR_LISTENER_WAIT_SECS", 5)),
            admin_addr: profiled_env_or(p, "COLLECTOR_ADMIN_ADDR", "127.0.0.1:3090"),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            loop_interval: Duration::from_secs(1),
            chill_time: Duration::from_secs(30),
            listener_wait: Duration::from_secs(5),
            admin_addr: "127.0.0.1:3090".to_string(),
        }
    }
}

// ── Consumer (distillation workers) ───────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Minimum time between distillation flushes.
    pub distillation_window: Duration,
    /// Pause after a processing failure before the worker stops itself.
    pub error_backoff: Duration,
    /// How often the consumer manager re-reads the archive store.
    pub manager_interval: Duration,
}

impl ConsumerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            distillation_window: Duration::from_secs(profiled_env_u64(
                p,
                "CONSUMER_DISTILLATION_WINDOW_SECS",
                300,
            )),
            error_backoff: Duration::from_millis(profiled_env_u64(p, "CONSUMER_ERROR_BACKOFF_MS", 1_000)),
            manager_interval: Duration::from_secs(profiled_env_u64(p, "CONSUMER_MANAGER_INTERVAL_SECS", 5)),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            distillation_window: Duration::from_secs(300),
            error_backoff: Duration::from_secs(1),
            manager_interval: Duration::from_secs(5),
        }
    }
}

// ── Alerting ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
}

impl NotifyConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            webhook_url: profiled_env_opt(p, "ALERT_WEBHOOK_URL"),
        }
    }
}
