// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Top-level configuration for the realtime core server.
#[derive(Debug, Clone, clap::Args)]
pub struct CoreConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "RTC_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 7400, env = "RTC_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub codec: CodecConfig,

    #[command(flatten)]
    pub heartbeat: HeartbeatConfig,

    #[command(flatten)]
    pub channel: ChannelConfig,

    #[command(flatten)]
    pub admission: AdmissionConfig,

    #[command(flatten)]
    pub rate_limiter: RateLimiterConfig,
}

impl CoreConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Codec framing options.
#[derive(Debug, Clone, Copy, clap::Args)]
pub struct CodecConfig {
    /// `none`, `gzip`, `deflate`, or `br`.
    #[arg(long, default_value = "none", env = "RTC_CODEC_COMPRESSION")]
    pub compression: CompressionKind,

    /// `none`, `aes128`, or `aes256`.
    #[arg(long, default_value = "none", env = "RTC_CODEC_ENCRYPTION")]
    pub encryption: EncryptionKind,

    /// Whether to compute and verify the frame checksum.
    #[arg(long, default_value_t = true, env = "RTC_CODEC_CHECKSUM")]
    pub checksum: bool,

    /// Maximum accepted frame size in bytes; larger frames fail with
    /// `MESSAGE_TOO_LARGE`.
    #[arg(long, default_value_t = 16 * 1024 * 1024, env = "RTC_CODEC_MAX_FRAME_BYTES")]
    pub max_frame_bytes: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression: CompressionKind::None,
            encryption: EncryptionKind::None,
            checksum: true,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CompressionKind {
    None,
    Gzip,
    Deflate,
    Br,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EncryptionKind {
    None,
    Aes128,
    Aes256,
}

/// Heartbeat liveness tuning.
#[derive(Debug, Clone, Copy, clap::Args)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "RTC_HEARTBEAT_INTERVAL_MS")]
    pub interval_ms: u64,

    /// Per-ping timeout in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "RTC_HEARTBEAT_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Missed pongs before eviction.
    #[arg(long, default_value_t = 3, env = "RTC_HEARTBEAT_MAX_MISSED")]
    pub max_missed: u32,

    /// Maximum jitter (ms) applied to the next scheduled interval.
    #[arg(long, default_value_t = 1_000, env = "RTC_HEARTBEAT_JITTER_MS")]
    pub jitter_ms: u64,

    /// Global sweeper cadence in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "RTC_HEARTBEAT_SWEEP_MS")]
    pub sweep_interval_ms: u64,

    /// Sweeper staleness threshold in milliseconds.
    #[arg(long, default_value_t = 300_000, env = "RTC_HEARTBEAT_STALE_MS")]
    pub stale_threshold_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 5_000,
            max_missed: 3,
            jitter_ms: 1_000,
            sweep_interval_ms: 60_000,
            stale_threshold_ms: 300_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }
}

/// Channel fan-out tuning.
#[derive(Debug, Clone, Copy, clap::Args)]
pub struct ChannelConfig {
    /// History ring capacity per channel.
    #[arg(long, default_value_t = 1000, env = "RTC_CHANNEL_HISTORY_SIZE")]
    pub max_history_size: usize,

    /// Bounded outbound queue depth per subscriber.
    #[arg(long, default_value_t = 256, env = "RTC_CHANNEL_QUEUE_DEPTH")]
    pub subscriber_queue_depth: usize,

    /// Backpressure policy applied when a subscriber's queue is full.
    #[arg(long, default_value = "drop-oldest", env = "RTC_CHANNEL_BACKPRESSURE")]
    pub backpressure: BackpressureKind,

    /// Timeout used by the `SlowConsumerTimeout` policy, in milliseconds.
    #[arg(long, default_value_t = 2_000, env = "RTC_CHANNEL_SLOW_CONSUMER_MS")]
    pub slow_consumer_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_history_size: 1000,
            subscriber_queue_depth: 256,
            backpressure: BackpressureKind::DropOldest,
            slow_consumer_timeout_ms: 2_000,
        }
    }
}

impl ChannelConfig {
    pub fn slow_consumer_timeout(&self) -> Duration {
        Duration::from_millis(self.slow_consumer_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackpressureKind {
    DropOldest,
    SlowConsumer,
}

/// Tenant admission tuning.
#[derive(Debug, Clone, clap::Args)]
pub struct AdmissionConfig {
    /// Header name examined by the `header` resolution strategy.
    #[arg(long, default_value = "X-Tenant-ID", env = "RTC_TENANT_HEADER")]
    pub tenant_header: String,

    /// Query parameter name examined by the `query` resolution strategy.
    #[arg(long, default_value = "tenant", env = "RTC_TENANT_QUERY_PARAM")]
    pub tenant_query_param: String,

    /// JWT claim name examined by the `jwt` resolution strategy.
    #[arg(long, default_value = "tenantId", env = "RTC_TENANT_JWT_CLAIM")]
    pub tenant_jwt_claim: String,

    /// Resolved-tenant cache TTL in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "RTC_TENANT_CACHE_TTL_MS")]
    pub cache_ttl_ms: u64,

    /// Maximum entries retained in the tenant resolution cache.
    #[arg(long, default_value_t = 10_000, env = "RTC_TENANT_CACHE_MAX_ENTRIES")]
    pub cache_max_entries: usize,

    /// Grace period before a suspended tenant's connections are force-closed.
    #[arg(long, default_value_t = 5_000, env = "RTC_TENANT_SUSPEND_GRACE_MS")]
    pub suspend_grace_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            tenant_header: "X-Tenant-ID".to_owned(),
            tenant_query_param: "tenant".to_owned(),
            tenant_jwt_claim: "tenantId".to_owned(),
            cache_ttl_ms: 60_000,
            cache_max_entries: 10_000,
            suspend_grace_ms: 5_000,
        }
    }
}

impl AdmissionConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
    pub fn suspend_grace(&self) -> Duration {
        Duration::from_millis(self.suspend_grace_ms)
    }
}

/// Rate limiter tuning.
#[derive(Debug, Clone, Copy, clap::Args)]
pub struct RateLimiterConfig {
    /// Fallback limit when a tenant's plan has no configured override.
    #[arg(long, default_value_t = 60, env = "RTC_RATE_DEFAULT_LIMIT")]
    pub default_limit: i64,

    /// Tumbling window width in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "RTC_RATE_WINDOW_MS")]
    pub window_ms: u64,

    /// Maximum distinct rate-window keys retained (LRU eviction beyond this).
    #[arg(long, default_value_t = 50_000, env = "RTC_RATE_MAX_ENTRIES")]
    pub max_entries: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { default_limit: 60, window_ms: 60_000, max_entries: 50_000 }
    }
}

impl RateLimiterConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}
