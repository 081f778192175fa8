//! Typed domain model for the FaaS data model (spec §3).
//!
//! These types are owned by the core; the tables backing them live in the
//! external metadata store (see [`crate::metadata_store`]).

pub mod models;

pub use models::{
    AuthLogic, AuthMethod, AuthMethodConfig, BasicCredential, ConsoleLine, CorsSettings,
    EnvironmentVariable, ExecutionLog, Function, FunctionVersion, GatewayConfig, JwtMode,
    KvEntry, MembershipRole, NetworkPolicyRule, PolicyAction, PolicyTargetType, Project,
    ProjectMembership, RetentionPolicy, Route,
};
