//! Agent-based components for edgefn-service
//!
//! Reactive, actor-based alternatives to lock-guarded connection pool state.
//! Built on [`acton_reactive`]:
//!
//! - No `Arc<RwLock<Option<T>>>` contention on the hot path
//! - Built-in reconnection with state tracking
//! - Health monitoring via message passing
//! - Coordinated shutdown via agent lifecycle hooks
//! - Event broadcasting to other agents via the broker
//!
//! The domain agents (`SchedulerAgent`, `InvalidationBusAgent`,
//! `ExecutionLogAgent`) live in their own modules (`scheduler`,
//! `invalidation_bus`, `execution_log`) and share this same pattern.

mod background_worker;
mod health;
mod messages;
mod pool;

pub mod prelude {
    //! Convenient re-exports for agent-based components

    pub use acton_reactive::prelude::*;

    pub use super::messages::{
        AggregatedHealthResponse, ComponentHealth, GetAggregatedHealth, GetPool, HealthStatus,
        PoolHealthCheck, PoolHealthResponse, PoolHealthUpdate, PoolReady, PoolReconnect,
        PoolResponse,
    };

    pub use super::health::{HealthMonitorAgent, HealthMonitorState};

    #[cfg(feature = "database")]
    pub use super::pool::{DatabasePoolAgent, DatabasePoolState};

    #[cfg(feature = "cache")]
    pub use super::pool::{RedisPoolAgent, RedisPoolState};

    #[cfg(feature = "events")]
    pub use super::pool::{NatsPoolAgent, NatsPoolState};

    pub use super::background_worker::{BackgroundWorker, TaskStatus};
}

pub use messages::*;
pub use health::{HealthMonitorAgent, HealthMonitorState};

#[cfg(feature = "database")]
pub use pool::{DatabasePoolAgent, DatabasePoolState};

#[cfg(feature = "cache")]
pub use pool::{RedisPoolAgent, RedisPoolState};

#[cfg(feature = "events")]
pub use pool::{NatsPoolAgent, NatsPoolState};

pub use background_worker::{BackgroundWorker, TaskStatus};
