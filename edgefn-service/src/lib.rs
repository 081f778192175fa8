//! # edgefn-service
//!
//! Core library for a self-hosted serverless Function-as-a-Service platform:
//! request-triggered gateway, sandboxed execution, metadata store, package
//! cache, network policy enforcement, scheduling, invalidation bus, and
//! execution logging.
//!
//! ## Ambient stack
//!
//! - **HTTP**: axum, with JWT auth, rate limiting, request tracking, panic
//!   recovery, body size limits
//! - **Resilience**: bulkhead (concurrency limiting) around the sandbox
//!   worker pool
//! - **Observability**: OpenTelemetry tracing, HTTP metrics, request ID
//!   propagation
//! - **Connection pooling**: Postgres (metadata store), Redis (caches,
//!   distributed rate limiting), NATS (invalidation bus)
//! - **Health checks**: liveness and readiness probes
//! - **Graceful shutdown**: signal handling (SIGTERM, SIGINT), agent runtime
//!   teardown
//!
//! ## Example
//!
//! ```rust,no_run
//! use edgefn_service::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let state = AppState::builder()
//!         .config(config.clone())
//!         .build()
//!         .await?;
//!
//!     let app = Router::new()
//!         .route("/health", get(health))
//!         .route("/ready", get(readiness))
//!         .with_state(state);
//!
//!     Server::new(config).serve(app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ids;
pub mod middleware;
pub mod health;
pub mod pool_health;
pub mod responses;
pub mod server;
pub mod service_builder;
pub mod state;

pub mod domain;
pub mod metadata_store;
pub mod object_store;
pub mod network_policy;
pub mod package_cache;
pub mod sandbox;
pub mod kv;
pub mod gateway;
pub mod auth_chain;
pub mod scheduler;
pub mod invalidation_bus;
pub mod execution_log;

#[cfg(feature = "database")]
pub mod database;

#[cfg(feature = "cache")]
pub mod cache;

#[cfg(feature = "events")]
pub mod events;

pub mod observability;

// Password hashing backs the gateway's basic_auth chain method; no longer
// an optional add-on once the auth chain is part of the core dispatch path.
pub mod auth;

#[cfg(feature = "repository")]
pub mod repository;

#[cfg(feature = "handlers")]
pub mod handlers;

/// Internal agent-based components.
///
/// Connection pool management is handled internally by agents. Most callers
/// don't interact with this module directly — use [`service_builder::ServiceBuilder::build`]
/// and access pools via `state.db()`, `state.redis()`, etc.
///
/// The user-facing types are [`agents::BackgroundWorker`] (managed background
/// tasks), [`agents::TaskStatus`], and [`agents::HealthStatus`].
pub mod agents;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{Config, RateLimitConfig, RouteRateLimitConfig};

    pub use crate::error::{Error, Result};
    pub use crate::health::{health, readiness, pool_metrics};
    pub use crate::ids::{MakeTypedRequestId, RequestId, RequestIdError};
    pub use crate::pool_health::PoolHealthSummary;

    #[cfg(feature = "database")]
    pub use crate::pool_health::DatabasePoolHealth;

    #[cfg(feature = "database")]
    pub use crate::database::create_pool;

    #[cfg(feature = "events")]
    pub use crate::events::create_client as create_nats_client;

    #[cfg(feature = "cache")]
    pub use crate::pool_health::RedisPoolHealth;

    #[cfg(feature = "events")]
    pub use crate::pool_health::NatsClientHealth;

    pub use crate::middleware::{
        CompiledRoutePatterns, RateLimit, RequestTrackingConfig,
        PROPAGATE_HEADERS, SENSITIVE_HEADERS, normalize_path,
        request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
    };

    #[cfg(feature = "jwt")]
    pub use crate::middleware::{Claims, JwtAuth};

    pub use crate::server::Server;
    pub use crate::service_builder::{EdgefnService, ServiceBuilder, VersionedRoutes};
    pub use crate::state::{AppState, AppStateBuilder};

    pub use crate::domain::{
        AuthLogic, AuthMethod, AuthMethodConfig, BasicCredential, ConsoleLine, CorsSettings,
        EnvironmentVariable, ExecutionLog, Function, FunctionVersion, GatewayConfig, JwtMode,
        KvEntry, MembershipRole, NetworkPolicyRule, PolicyAction, PolicyTargetType, Project,
        ProjectMembership, RetentionPolicy, Route,
    };
    pub use crate::metadata_store::MetadataStore;
    #[cfg(feature = "database")]
    pub use crate::metadata_store::PostgresMetadataStore;
    pub use crate::object_store::{MinioObjectStore, ObjectStore, PutResult};
    pub use crate::network_policy::{NetworkPolicyEngine, PolicyDecision};
    pub use crate::package_cache::{PackageCache, PackageHandle};
    pub use crate::sandbox::{InvocationOutcome, InvocationRequest, InvocationResponse, KvBridge, SandboxWorkerPool};
    pub use crate::kv::ProjectKvHandle;
    pub use crate::gateway::{GatewayRequest, GatewayResponse, GatewayRouter, RouteTable};
    pub use crate::auth_chain::AuthChain;
    pub use crate::scheduler::{next_occurrence, SchedulerAgent};
    pub use crate::invalidation_bus::{InvalidationBusAgent, InvalidationTargets};
    pub use crate::execution_log::{ExecutionLogAgent, ExecutionLogHandle};
    pub use crate::responses::{
        Accepted, Conflict, Created, FieldError, NoContent, Success, ValidationError,
    };

    #[cfg(feature = "resilience")]
    pub use crate::middleware::ResilienceConfig;

    #[cfg(feature = "otel-metrics")]
    pub use crate::middleware::{MetricsConfig, metric_labels, metric_names};

    #[cfg(feature = "governor")]
    pub use crate::middleware::{GovernorConfig, GovernorRateLimit, RateLimitExceeded};

    #[cfg(feature = "observability")]
    pub use crate::observability::init_tracing;

    // Auth module exports
    #[cfg(feature = "auth")]
    pub use crate::auth::{AuthConfig, PasswordConfig, PasswordHasher, TokenGenerationConfig, TokenGenerator, TokenPair};

    #[cfg(all(feature = "auth", feature = "jwt"))]
    pub use crate::auth::JwtGenerator;

    #[cfg(feature = "repository")]
    pub use crate::repository::{
        FilterCondition, FilterOperator, FilterValue, OrderDirection, Pagination,
        RelationLoader, Repository, RepositoryError, RepositoryResult, SoftDeleteRepository,
    };

    #[cfg(feature = "handlers")]
    pub use crate::handlers::{ListQuery, SortOrder};

    // Background task management (user-facing)
    pub use crate::agents::{BackgroundWorker, TaskStatus};

    // Health status types (for checking aggregated health)
    pub use crate::agents::{AggregatedHealthResponse, HealthStatus};

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};

    // Re-export tracing macros and types
    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};

    // Re-export tokio for async runtime
    pub use tokio;

    // Re-export async-trait for async trait definitions
    pub use async_trait::async_trait;

    // Re-export error handling utilities
    pub use thiserror::Error;
    pub use anyhow::{self, Context as AnyhowContext};

    // Re-export time utilities
    pub use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};

    // Re-export UUID
    pub use uuid::Uuid;

    // Re-export futures utilities
    pub use futures::{future, stream, Future, Stream, StreamExt, TryFutureExt, TryStreamExt};

    // Re-export HTTP types
    pub use http::{Method, Uri};

    // Re-export acton-reactive prelude for actor system
    pub use acton_reactive::prelude::*;
}
