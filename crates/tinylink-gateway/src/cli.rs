use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use tinylink_generator::{Alphabet, DEFAULT_CODE_LENGTH};
use tinylink_redirector::BatcherSettings;
use tinylink_shortener::{AllocatorSettings, ReplenisherSettings};
use tinylink_telemetry::{LogFormat, TelemetryConfig};

const TINYLINK_LISTEN_ADDR: &str = "TINYLINK_LISTEN_ADDR";
const TINYLINK_BASE_URL: &str = "TINYLINK_BASE_URL";
const TINYLINK_STORAGE: &str = "TINYLINK_STORAGE";
const TINYLINK_POOL_DSN: &str = "TINYLINK_POOL_DSN";
const TINYLINK_MAPPING_DSN: &str = "TINYLINK_MAPPING_DSN";
const TINYLINK_DB_MAX_CONNECTIONS: &str = "TINYLINK_DB_MAX_CONNECTIONS";
const TINYLINK_CODE_LENGTH: &str = "TINYLINK_CODE_LENGTH";
const TINYLINK_ALPHABET: &str = "TINYLINK_ALPHABET";
const TINYLINK_POOL_TARGET_SIZE: &str = "TINYLINK_POOL_TARGET_SIZE";
const TINYLINK_INSERT_BATCH_SIZE: &str = "TINYLINK_INSERT_BATCH_SIZE";
const TINYLINK_LOW_WATERMARK: &str = "TINYLINK_LOW_WATERMARK";
const TINYLINK_REPLENISH_INTERVAL_SECS: &str = "TINYLINK_REPLENISH_INTERVAL_SECS";
const TINYLINK_BATCH_SIZE: &str = "TINYLINK_BATCH_SIZE";
const TINYLINK_MAX_WAIT_MS: &str = "TINYLINK_MAX_WAIT_MS";
const TINYLINK_MAX_QUEUE_SIZE: &str = "TINYLINK_MAX_QUEUE_SIZE";
const TINYLINK_RECORD_CLICKS: &str = "TINYLINK_RECORD_CLICKS";
const TINYLINK_LOG_FORMAT: &str = "TINYLINK_LOG_FORMAT";
const TINYLINK_OTLP_ENDPOINT: &str = "TINYLINK_OTLP_ENDPOINT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    InMemory,
    Mysql,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "tinylink-gateway", version, about = "tinylink HTTP gateway")]
pub struct Cli {
    #[arg(long, env = TINYLINK_LISTEN_ADDR, default_value = "127.0.0.1:8080")]
    pub listen_addr: SocketAddr,

    /// Prefix of every returned short URL.
    #[arg(long, env = TINYLINK_BASE_URL, default_value = "http://localhost:8080")]
    pub base_url: String,

    #[arg(long, env = TINYLINK_STORAGE, value_enum, default_value_t = StorageBackend::InMemory)]
    pub storage: StorageBackend,

    /// Database holding the code pool.
    #[arg(long, env = TINYLINK_POOL_DSN, required_if_eq_any([("storage", "mysql"), ("storage", "postgres")]))]
    pub pool_dsn: Option<String>,

    /// Database holding the code to URL mappings.
    #[arg(long, env = TINYLINK_MAPPING_DSN, required_if_eq_any([("storage", "mysql"), ("storage", "postgres")]))]
    pub mapping_dsn: Option<String>,

    #[arg(long, env = TINYLINK_DB_MAX_CONNECTIONS, default_value_t = 25)]
    pub db_max_connections: u32,

    #[arg(long, env = TINYLINK_CODE_LENGTH, default_value_t = DEFAULT_CODE_LENGTH)]
    pub code_length: usize,

    #[arg(long, env = TINYLINK_ALPHABET, default_value_t = Alphabet::base62())]
    pub alphabet: Alphabet,

    #[arg(long, env = TINYLINK_POOL_TARGET_SIZE, default_value_t = 10_000)]
    pub pool_target_size: u64,

    #[arg(long, env = TINYLINK_INSERT_BATCH_SIZE, default_value_t = 1_000)]
    pub insert_batch_size: usize,

    /// Defaults to a tenth of the pool target size.
    #[arg(long, env = TINYLINK_LOW_WATERMARK)]
    pub low_watermark: Option<u64>,

    #[arg(long, env = TINYLINK_REPLENISH_INTERVAL_SECS, default_value_t = 30)]
    pub replenish_interval_secs: u64,

    #[arg(long, env = TINYLINK_BATCH_SIZE, default_value_t = 10)]
    pub batch_size: usize,

    #[arg(long, env = TINYLINK_MAX_WAIT_MS, default_value_t = 2_000)]
    pub max_wait_ms: u64,

    #[arg(long, env = TINYLINK_MAX_QUEUE_SIZE, default_value_t = 5_000)]
    pub max_queue_size: usize,

    #[arg(long, env = TINYLINK_RECORD_CLICKS, default_value_t = true, action = clap::ArgAction::Set)]
    pub record_clicks: bool,

    #[arg(long, env = TINYLINK_LOG_FORMAT, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[arg(long, env = TINYLINK_OTLP_ENDPOINT)]
    pub otlp_endpoint: Option<String>,
}

impl Cli {
    pub fn allocator_settings(&self) -> AllocatorSettings {
        let low_watermark = self
            .low_watermark
            .unwrap_or(self.pool_target_size / 10);

        AllocatorSettings::builder()
            .pool_target_size(self.pool_target_size)
            .insert_batch_size(self.insert_batch_size)
            .low_watermark(low_watermark)
            .build()
    }

    pub fn replenisher_settings(&self) -> ReplenisherSettings {
        ReplenisherSettings::builder()
            .interval(Duration::from_secs(self.replenish_interval_secs))
            .build()
    }

    pub fn batcher_settings(&self) -> BatcherSettings {
        BatcherSettings::builder()
            .batch_size(self.batch_size)
            .max_wait(Duration::from_millis(self.max_wait_ms))
            .max_queue_size(self.max_queue_size)
            .record_clicks(self.record_clicks)
            .build()
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        match &self.otlp_endpoint {
            Some(endpoint) => TelemetryConfig::builder()
                .service_name("tinylink-gateway")
                .log_format(self.log_format)
                .otlp_endpoint(endpoint.clone())
                .build(),
            None => TelemetryConfig::builder()
                .service_name("tinylink-gateway")
                .log_format(self.log_format)
                .build(),
        }
    }
}
