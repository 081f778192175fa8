//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: EDGEFN_)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/edgefn-service/{service_name}/config.toml
//! 4. System directory: /etc/edgefn-service/{service_name}/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// JWT configuration (used by the `bearer_jwt` auth method, `fixed_secret` mode)
    pub jwt: JwtConfig,

    /// Middleware configuration
    #[serde(default)]
    pub middleware: MiddlewareConfig,

    /// Sandbox worker configuration
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Package cache configuration
    #[serde(default)]
    pub package_cache: PackageCacheConfig,

    /// Network policy engine configuration
    #[serde(default)]
    pub network_policy: NetworkPolicyConfig,

    /// Gateway runtime configuration
    #[serde(default)]
    pub gateway: GatewayRuntimeConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Execution logger configuration
    #[serde(default)]
    pub execution_log: ExecutionLogConfig,

    /// Object store configuration (MinIO, S3-compatible package storage)
    #[serde(default)]
    pub object_store: Option<ObjectStoreConfig>,

    /// Database configuration (optional)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Redis configuration (optional)
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// NATS configuration (optional)
    #[serde(default)]
    pub nats: Option<NatsConfig>,

    /// OpenTelemetry configuration (optional)
    #[serde(default)]
    pub otlp: Option<OtlpConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Path to public key for JWT verification (fixed-secret mode, asymmetric algorithms)
    #[serde(default)]
    pub public_key_path: Option<PathBuf>,

    /// Shared secret for fixed-secret HMAC algorithms; mutually exclusive with `public_key_path`
    #[serde(default)]
    pub shared_secret: Option<String>,

    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub audience: Option<String>,
}

/// Sandbox worker resource defaults and pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Default wall-clock execution budget
    #[serde(default = "default_sandbox_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Heap ceiling per isolate, in bytes
    #[serde(default = "default_sandbox_heap_bytes")]
    pub heap_limit_bytes: usize,

    /// Open file-descriptor/socket ceiling per invocation
    #[serde(default = "default_sandbox_fd_limit")]
    pub fd_limit: usize,

    /// Captured stdout/stderr ceiling per invocation, in bytes
    #[serde(default = "default_sandbox_stdout_cap_bytes")]
    pub stdout_cap_bytes: usize,

    /// Maximum pooled isolates per (function, version)
    #[serde(default = "default_sandbox_pool_size")]
    pub pool_size_per_version: usize,

    /// Scratch directory root for extracted packages and isolate temp files
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_sandbox_timeout_ms(),
            heap_limit_bytes: default_sandbox_heap_bytes(),
            fd_limit: default_sandbox_fd_limit(),
            stdout_cap_bytes: default_sandbox_stdout_cap_bytes(),
            pool_size_per_version: default_sandbox_pool_size(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

impl SandboxConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Package cache sizing and negative-cache behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageCacheConfig {
    /// Total on-disk byte capacity before LRU eviction kicks in
    #[serde(default = "default_package_cache_capacity_bytes")]
    pub capacity_bytes: u64,

    /// How long a failed fetch is remembered before being retried
    #[serde(default = "default_negative_cache_ttl_secs")]
    pub negative_cache_ttl_secs: u64,
}

impl Default for PackageCacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: default_package_cache_capacity_bytes(),
            negative_cache_ttl_secs: default_negative_cache_ttl_secs(),
        }
    }
}

impl PackageCacheConfig {
    pub fn negative_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_cache_ttl_secs)
    }
}

/// Network policy engine cache behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkPolicyConfig {
    #[serde(default = "default_policy_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for NetworkPolicyConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_policy_cache_ttl_secs(),
        }
    }
}

impl NetworkPolicyConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Gateway runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRuntimeConfig {
    /// Default per-project inflight request cap when a project doesn't override it
    #[serde(default = "default_gateway_inflight_cap")]
    pub default_inflight_cap: usize,

    /// Default domain suffix new gateways are reachable under
    #[serde(default = "default_gateway_domain")]
    pub default_domain: String,

    /// How long a project's compiled route table is cached before a stale
    /// read is possible absent an invalidation event
    #[serde(default = "default_gateway_cache_ttl_secs")]
    pub route_cache_ttl_secs: u64,
}

impl Default for GatewayRuntimeConfig {
    fn default() -> Self {
        Self {
            default_inflight_cap: default_gateway_inflight_cap(),
            default_domain: default_gateway_domain(),
            route_cache_ttl_secs: default_gateway_cache_ttl_secs(),
        }
    }
}

impl GatewayRuntimeConfig {
    pub fn route_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.route_cache_ttl_secs)
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the scheduler polls for due tasks
    #[serde(default = "default_scheduler_tick_ms")]
    pub tick_interval_ms: u64,

    /// Evaluate cron expressions in UTC instead of server-local time
    #[serde(default = "default_false")]
    pub utc: bool,

    /// Grace window for catching up a missed tick after downtime
    #[serde(default = "default_scheduler_catchup_secs")]
    pub catch_up_window_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_scheduler_tick_ms(),
            utc: false,
            catch_up_window_secs: default_scheduler_catchup_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Execution logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogConfig {
    /// Bounded channel capacity; `try_send` drops the log entry when full
    #[serde(default = "default_exec_log_queue_capacity")]
    pub queue_capacity: usize,

    /// Rows per batch insert
    #[serde(default = "default_exec_log_batch_size")]
    pub batch_size: usize,

    /// Maximum delay before a partial batch is flushed
    #[serde(default = "default_exec_log_flush_ms")]
    pub flush_interval_ms: u64,

    /// Captured request/response body ceiling per log entry, in bytes
    #[serde(default = "default_exec_log_body_cap_bytes")]
    pub body_capture_cap_bytes: usize,

    /// Default retention in days when a function sets no explicit policy
    #[serde(default = "default_exec_log_retention_days")]
    pub default_retention_days: u32,

    /// How often the retention sweeper runs
    #[serde(default = "default_exec_log_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ExecutionLogConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_exec_log_queue_capacity(),
            batch_size: default_exec_log_batch_size(),
            flush_interval_ms: default_exec_log_flush_ms(),
            body_capture_cap_bytes: default_exec_log_body_cap_bytes(),
            default_retention_days: default_exec_log_retention_days(),
            sweep_interval_secs: default_exec_log_sweep_interval_secs(),
        }
    }
}

impl ExecutionLogConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Object store configuration (MinIO / S3-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_false")]
    pub optional: bool,
    #[serde(default = "default_lazy_init")]
    pub lazy_init: bool,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_false")]
    pub optional: bool,
    #[serde(default = "default_lazy_init")]
    pub lazy_init: bool,
}

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_false")]
    pub optional: bool,
    #[serde(default = "default_lazy_init")]
    pub lazy_init: bool,
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpConfig {
    pub endpoint: String,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Middleware configuration (all optional, feature-gated)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(default)]
    pub request_tracking: RequestTrackingConfig,
    #[serde(default)]
    pub resilience: Option<ResilienceConfig>,
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub governor: Option<LocalRateLimitConfig>,
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,
    #[serde(default = "default_true")]
    pub catch_panic: bool,
    #[serde(default = "default_true")]
    pub compression: bool,
    #[serde(default = "default_cors_mode")]
    pub cors_mode: String,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            request_tracking: RequestTrackingConfig::default(),
            resilience: None,
            metrics: None,
            governor: None,
            body_limit_mb: default_body_limit_mb(),
            catch_panic: true,
            compression: true,
            cors_mode: default_cors_mode(),
        }
    }
}

/// Request tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTrackingConfig {
    #[serde(default = "default_true")]
    pub request_id_enabled: bool,
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,
    #[serde(default = "default_true")]
    pub propagate_headers: bool,
    #[serde(default = "default_true")]
    pub mask_sensitive_headers: bool,
}

impl Default for RequestTrackingConfig {
    fn default() -> Self {
        Self {
            request_id_enabled: true,
            request_id_header: default_request_id_header(),
            propagate_headers: true,
            mask_sensitive_headers: true,
        }
    }
}

/// Resilience configuration (bulkhead for the sandbox worker pool)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_true")]
    pub bulkhead_enabled: bool,
    #[serde(default = "default_bulkhead_max_concurrent")]
    pub bulkhead_max_concurrent: usize,
    #[serde(default = "default_bulkhead_max_queued")]
    pub bulkhead_max_queued: usize,
}

/// HTTP metrics configuration (OpenTelemetry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub include_path: bool,
    #[serde(default = "default_true")]
    pub include_method: bool,
    #[serde(default = "default_true")]
    pub include_status: bool,
    #[serde(default = "default_latency_buckets")]
    pub latency_buckets_ms: Vec<f64>,
}

/// Local rate limiting configuration (governor-based)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalRateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_governor_requests")]
    pub requests_per_period: u32,
    #[serde(default = "default_governor_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_governor_burst")]
    pub burst_size: u32,
}

impl LocalRateLimitConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

/// Distributed (Redis-backed) rate limiting configuration: per-user and
/// per-client RPM ceilings, plus per-route overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_user_rpm")]
    pub per_user_rpm: u32,
    #[serde(default = "default_per_client_rpm")]
    pub per_client_rpm: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
    #[serde(default)]
    pub routes: std::collections::HashMap<String, RouteRateLimitConfig>,
}

/// Per-route override for the in-process governor limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
    #[serde(default = "default_true")]
    pub per_user: bool,
}

fn default_per_user_rpm() -> u32 {
    200
}
fn default_per_client_rpm() -> u32 {
    1000
}
fn default_rate_limit_window_secs() -> u64 {
    60
}

// Default value functions
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_environment() -> String {
    "dev".to_string()
}
fn default_jwt_algorithm() -> String {
    "RS256".to_string()
}
fn default_max_connections() -> u32 {
    50
}
fn default_min_connections() -> u32 {
    5
}
fn default_connection_timeout() -> u64 {
    10
}
fn default_redis_max_connections() -> usize {
    20
}
fn default_max_reconnects() -> usize {
    10
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_delay() -> u64 {
    2
}
fn default_lazy_init() -> bool {
    true
}
fn default_body_limit_mb() -> usize {
    10
}
fn default_cors_mode() -> String {
    "permissive".to_string()
}
fn default_request_id_header() -> String {
    "x-request-id".to_string()
}
fn default_bulkhead_max_concurrent() -> usize {
    100
}
fn default_bulkhead_max_queued() -> usize {
    200
}
fn default_latency_buckets() -> Vec<f64> {
    vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
}
fn default_governor_requests() -> u32 {
    100
}
fn default_governor_period_secs() -> u64 {
    60
}
fn default_governor_burst() -> u32 {
    10
}
fn default_sandbox_timeout_ms() -> u64 {
    5_000
}
fn default_sandbox_heap_bytes() -> usize {
    128 * 1024 * 1024
}
fn default_sandbox_fd_limit() -> usize {
    32
}
fn default_sandbox_stdout_cap_bytes() -> usize {
    1024 * 1024
}
fn default_sandbox_pool_size() -> usize {
    8
}
fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("edgefn")
}
fn default_package_cache_capacity_bytes() -> u64 {
    5 * 1024 * 1024 * 1024
}
fn default_negative_cache_ttl_secs() -> u64 {
    30
}
fn default_policy_cache_ttl_secs() -> u64 {
    60
}
fn default_gateway_inflight_cap() -> usize {
    256
}
fn default_gateway_domain() -> String {
    "functions.local".to_string()
}
fn default_gateway_cache_ttl_secs() -> u64 {
    60
}
fn default_scheduler_tick_ms() -> u64 {
    1_000
}
fn default_scheduler_catchup_secs() -> u64 {
    60
}
fn default_exec_log_queue_capacity() -> usize {
    10_000
}
fn default_exec_log_batch_size() -> usize {
    200
}
fn default_exec_log_flush_ms() -> u64 {
    500
}
fn default_exec_log_body_cap_bytes() -> usize {
    16 * 1024
}
fn default_exec_log_retention_days() -> u32 {
    30
}
fn default_exec_log_sweep_interval_secs() -> u64 {
    3600
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found is used):
    /// 1. Current working directory: ./config.toml
    /// 2. XDG config directory: ~/.config/edgefn-service/{service_name}/config.toml
    /// 3. System directory: /etc/edgefn-service/{service_name}/config.toml
    ///
    /// Environment variables (EDGEFN_ prefix) override all file-based configs.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "edgefn-service".to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("EDGEFN_").split("_"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file, bypassing XDG directories
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("EDGEFN_").split("_"))
            .extract()?;

        Ok(config)
    }

    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();

        paths.push(PathBuf::from("config.toml"));

        let xdg_dirs = xdg::BaseDirectories::with_prefix("edgefn-service");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Ok(path) = xdg_dirs.place_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc/edgefn-service")
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }

    pub fn recommended_path(service_name: &str) -> PathBuf {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("edgefn-service");
        let config_file_path = Path::new(service_name).join("config.toml");

        xdg_dirs.place_config_file(&config_file_path).unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| String::from("~")))
                .join(".config/edgefn-service")
                .join(service_name)
                .join("config.toml")
        })
    }

    pub fn create_config_dir(service_name: &str) -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("edgefn-service");
        let config_file_path = Path::new(service_name).join("config.toml");

        let config_path = xdg_dirs
            .place_config_file(&config_file_path)
            .map_err(|e| crate::error::Error::Internal(format!("Failed to create config directory: {}", e)))?;

        Ok(config_path
            .parent()
            .ok_or_else(|| crate::error::Error::Internal("Invalid config path".to_string()))?
            .to_path_buf())
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database.as_ref().map(|db| db.url.as_str())
    }

    pub fn redis_url(&self) -> Option<&str> {
        self.redis.as_ref().map(|r| r.url.as_str())
    }

    pub fn nats_url(&self) -> Option<&str> {
        self.nats.as_ref().map(|n| n.url.as_str())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "edgefn-service".to_string(),
                port: default_port(),
                log_level: default_log_level(),
                timeout_secs: default_timeout(),
                environment: default_environment(),
            },
            jwt: JwtConfig {
                public_key_path: None,
                shared_secret: None,
                algorithm: default_jwt_algorithm(),
                issuer: None,
                audience: None,
            },
            middleware: MiddlewareConfig::default(),
            sandbox: SandboxConfig::default(),
            package_cache: PackageCacheConfig::default(),
            network_policy: NetworkPolicyConfig::default(),
            gateway: GatewayRuntimeConfig::default(),
            scheduler: SchedulerConfig::default(),
            execution_log: ExecutionLogConfig::default(),
            object_store: None,
            database: None,
            redis: None,
            nats: None,
            otlp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.port, 8080);
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.sandbox.default_timeout_ms, 5_000);
        assert_eq!(config.package_cache.capacity_bytes, 5 * 1024 * 1024 * 1024);
        assert!(!config.scheduler.utc);
    }

    #[test]
    fn test_sandbox_timeout_duration() {
        let config = SandboxConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_millis(5_000));
    }
}
