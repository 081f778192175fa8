//! Domain model types for the FaaS data model.
//!
//! These map 1:1 onto the tables the metadata store (external, relational)
//! owns. The service never derives these shapes from the database schema at
//! runtime; they're the typed contract the rest of the crate programs
//! against, with `sqlx::FromRow` derives for the read path when the
//! `database` feature is enabled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[cfg(feature = "database")]
use sqlx::FromRow;

/// Either a time-based or count-based log retention policy, or none (fall
/// back to the execution logger's global default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetentionPolicy {
    Days(u32),
    Count(u32),
    None,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::None
    }
}

/// One immutable, content-addressed package version of a function.
/// Versions are never mutated after creation; only `active_version` on the
/// owning `Function` moves between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(FromRow))]
pub struct FunctionVersion {
    pub id: Uuid,
    pub function_id: Uuid,
    pub version_number: i32,
    /// Deterministic object-store path for this package's archive.
    pub object_store_path: String,
    /// SHA-256 hash of the compressed archive, hex-encoded.
    pub content_hash: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// A deployed handler: identity, versions, execution attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(FromRow))]
pub struct Function {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,

    /// `None` until at least one version has been promoted active.
    pub active_version: Option<i32>,

    pub requires_api_key: bool,
    /// Present only when `requires_api_key` is set.
    pub api_key: Option<String>,

    pub schedule_enabled: bool,
    pub schedule_cron: Option<String>,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_scheduled_execution: Option<DateTime<Utc>>,

    #[cfg_attr(feature = "database", sqlx(json))]
    pub retention: RetentionPolicy,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Function {
    /// `schedule_cron` is required iff `schedule_enabled`; exactly the
    /// invariant spec.md §3 names for the Function aggregate.
    pub fn validate(&self) -> Result<(), String> {
        if self.schedule_enabled && self.schedule_cron.is_none() {
            return Err("schedule_cron is required when schedule_enabled is true".into());
        }
        if !self.schedule_enabled && self.schedule_cron.is_some() {
            return Err("schedule_cron must be empty when schedule_enabled is false".into());
        }
        if self.requires_api_key && self.api_key.is_none() {
            return Err("api_key is required when requires_api_key is true".into());
        }
        Ok(())
    }
}

/// Project membership role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipRole {
    Owner,
    Viewer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(FromRow))]
pub struct ProjectMembership {
    pub project_id: Uuid,
    pub user_id: Uuid,
    #[cfg_attr(feature = "database", sqlx(rename = "role"))]
    pub role: String,
}

/// Owner/viewer group owning functions, gateway, policies, and a KV
/// namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(FromRow))]
pub struct Project {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub kv_storage_limit_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `action` arm of a `NetworkPolicyRule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allow,
    Deny,
}

/// What a rule's `target_value` is interpreted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTargetType {
    Ip,
    Cidr,
    Domain,
}

/// One ordered allow/deny rule, scoped to a project or global.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(FromRow))]
pub struct NetworkPolicyRule {
    pub id: Uuid,
    /// `None` for a global rule.
    pub project_id: Option<Uuid>,
    pub priority: i32,
    #[cfg_attr(feature = "database", sqlx(rename = "action"))]
    pub action: String,
    #[cfg_attr(feature = "database", sqlx(rename = "target_type"))]
    pub target_type: String,
    pub target_value: String,
    pub description: Option<String>,
}

impl NetworkPolicyRule {
    pub fn action(&self) -> PolicyAction {
        match self.action.as_str() {
            "allow" => PolicyAction::Allow,
            _ => PolicyAction::Deny,
        }
    }

    pub fn target_type(&self) -> PolicyTargetType {
        match self.target_type.as_str() {
            "ip" => PolicyTargetType::Ip,
            "cidr" => PolicyTargetType::Cidr,
            _ => PolicyTargetType::Domain,
        }
    }
}

/// Per-project gateway: enablement, custom domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(FromRow))]
pub struct GatewayConfig {
    pub id: Uuid,
    pub project_id: Uuid,
    pub enabled: bool,
    /// Globally unique when set.
    pub custom_domain: Option<String>,
}

/// `auth_logic` composition for a route's auth-method chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLogic {
    Or,
    And,
}

/// CORS settings attached to one route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsSettings {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age_secs: u64,
    pub allow_credentials: bool,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Vec::new(),
            allowed_methods: Vec::new(),
            allowed_headers: Vec::new(),
            expose_headers: Vec::new(),
            max_age_secs: 600,
            allow_credentials: false,
        }
    }
}

/// A `(gateway_id, route_path)` pair: methods, CORS, auth chain, function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub gateway_id: Uuid,
    pub route_path: String,
    pub function_id: Uuid,
    pub allowed_methods: Vec<String>,
    pub cors: CorsSettings,
    /// Ordered by `sort_order` ascending; evaluation order, see `auth_chain`.
    pub auth_method_ids: Vec<Uuid>,
    pub auth_logic: AuthLogic,
    pub sort_order: i32,
}

/// Auth method kind, per spec.md §3 `AuthMethod`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethodConfig {
    BasicAuth {
        credentials: Vec<BasicCredential>,
    },
    BearerJwt {
        mode: JwtMode,
    },
    ApiKey {
        header_name: String,
        keys: Vec<String>,
    },
    Middleware {
        function_id: Uuid,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicCredential {
    pub username: String,
    /// Argon2id PHC hash, never the plaintext password.
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum JwtMode {
    FixedSecret { secret: String },
    Jwks { jwks_url: String },
}

/// A reusable, named, per-gateway credential predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthMethod {
    pub id: Uuid,
    pub gateway_id: Uuid,
    pub name: String,
    pub config: AuthMethodConfig,
}

/// Per-project string-keyed JSON store entry, with optional TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(FromRow))]
pub struct KvEntry {
    pub project_id: Uuid,
    pub key: String,
    #[cfg_attr(feature = "database", sqlx(json))]
    pub value: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub size_bytes: i64,
    pub updated_at: DateTime<Utc>,
}

impl KvEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// `(function_id, name)` unique; name matches `[A-Z_][A-Z0-9_]*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(FromRow))]
pub struct EnvironmentVariable {
    pub function_id: Uuid,
    pub name: String,
    pub value: String,
}

static ENV_NAME_PATTERN: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"^[A-Z_][A-Z0-9_]*$").unwrap());

impl EnvironmentVariable {
    pub fn validate_name(name: &str) -> Result<(), String> {
        if ENV_NAME_PATTERN.is_match(name) {
            Ok(())
        } else {
            Err(format!(
                "invalid environment variable name `{name}`: must match [A-Z_][A-Z0-9_]*"
            ))
        }
    }
}

/// One captured console line from a sandbox invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub level: String,
    pub message: String,
    pub ts: DateTime<Utc>,
}

/// Immutable per-invocation record, per spec.md §3 `ExecutionLog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "database", derive(FromRow))]
pub struct ExecutionLog {
    pub id: Uuid,
    pub function_id: Uuid,
    pub status_code: i32,
    pub duration_ms: i64,
    pub request_bytes: i64,
    pub response_bytes: i64,
    #[cfg_attr(feature = "database", sqlx(json))]
    pub request_headers: HashMap<String, String>,
    #[cfg_attr(feature = "database", sqlx(json))]
    pub response_headers: HashMap<String, String>,
    /// Capped per `ExecutionLogConfig::body_capture_cap_bytes`; truncated
    /// entries carry a `...[truncated]` marker appended by the logger.
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    #[cfg_attr(feature = "database", sqlx(json))]
    pub console_output: Vec<ConsoleLine>,
    pub error_message: Option<String>,
    pub error_kind: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub api_key_used: bool,
    pub executed_at: DateTime<Utc>,
}
