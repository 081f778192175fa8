//! Wires the object graph a running gateway needs from a loaded [`Config`]:
//! metadata store, object store, package cache, network policy engine,
//! sandbox pool, auth chain, and the gateway router itself. Grounded on the
//! constructor shapes each module already exposes (`PackageCache::new`,
//! `NetworkPolicyEngine::new`, ...); this module's only job is calling them
//! in the right order and handing the result to `function:test`/`serve`.

use std::path::PathBuf;
use std::sync::Arc;

use edgefn_service::prelude::*;

/// The store-only half of the graph, enough for every `function:*` command
/// except `function:test` (which needs a live sandbox to actually run the
/// handler).
pub async fn connect_store(config: &Config) -> Result<Arc<dyn MetadataStore>> {
    let db_config = config
        .database
        .as_ref()
        .ok_or_else(|| Error::Config(Box::new(figment::Error::from(
            "no [database] section in config".to_string(),
        ))))?;
    let pool = create_pool(db_config).await?;
    Ok(Arc::new(PostgresMetadataStore::new(pool)))
}

/// Everything `serve` and `function:test` need to actually invoke a
/// function: the full dispatch pipeline minus the HTTP framing. Holds the
/// [`ExecutionLogAgent`] so its flush/sweep loops stay alive for as long as
/// the runtime does, even though nothing reads the handle directly after
/// construction.
pub struct Runtime {
    pub store: Arc<dyn MetadataStore>,
    pub gateway: Arc<GatewayRouter>,
    pub policy: Arc<NetworkPolicyEngine>,
    pub package_cache: Arc<PackageCache>,
    pub execution_log: ExecutionLogAgent,
}

pub async fn build_runtime(config: &Config) -> Result<Runtime> {
    let store = connect_store(config).await?;

    let object_store_config = config.object_store.as_ref().ok_or_else(|| {
        Error::Config(Box::new(figment::Error::from(
            "no [object_store] section in config".to_string(),
        )))
    })?;
    let object_store: Arc<dyn ObjectStore> = Arc::new(MinioObjectStore::new(object_store_config));

    let scratch_root: PathBuf = config.sandbox.scratch_dir.join("packages");
    let package_cache = Arc::new(PackageCache::new(
        scratch_root,
        config.package_cache.capacity_bytes,
        config.package_cache.negative_cache_ttl(),
        object_store,
        store.clone(),
    ));

    let policy = Arc::new(NetworkPolicyEngine::new(
        store.clone(),
        config.network_policy.cache_ttl(),
    )?);

    let sandbox = Arc::new(SandboxWorkerPool::new(config.sandbox.clone()));

    let http_client = reqwest::Client::new();

    let auth_chain = Arc::new(AuthChain::new(
        store.clone(),
        package_cache.clone(),
        sandbox.clone(),
        policy.clone(),
        http_client.clone(),
    ));

    let table = RouteTable::new(store.clone(), config.gateway.route_cache_ttl());

    let execution_log = ExecutionLogAgent::spawn(store.clone(), config.execution_log.clone());

    let gateway = Arc::new(GatewayRouter::new(
        store.clone(),
        table,
        auth_chain,
        package_cache.clone(),
        sandbox,
        policy.clone(),
        http_client,
        config.gateway.default_inflight_cap,
        config.gateway.default_domain.clone(),
        execution_log.handle(),
        config.execution_log.body_capture_cap_bytes,
    ));

    Ok(Runtime { store, gateway, policy, package_cache, execution_log })
}

/// Connects the invalidation bus if `[nats]` is configured; a deployment
/// without NATS still works, just relying on each cache's TTL instead of
/// sub-second cross-instance invalidation (spec §4.6 names NATS as the
/// transport, not a hard dependency of every module it invalidates).
pub async fn spawn_invalidation_bus(
    config: &Config,
    runtime: &Runtime,
) -> Result<Option<InvalidationBusAgent>> {
    let Some(nats_config) = config.nats.as_ref() else {
        tracing::warn!("no [nats] section configured; cache invalidation relies on TTL only");
        return Ok(None);
    };

    let client = create_nats_client(nats_config).await?;
    let targets = InvalidationTargets {
        gateway: runtime.gateway.clone(),
        policy: runtime.policy.clone(),
        package_cache: runtime.package_cache.clone(),
    };

    Ok(Some(InvalidationBusAgent::spawn(client, targets)))
}

pub fn spawn_scheduler(config: &Config, runtime: &Runtime) -> SchedulerAgent {
    SchedulerAgent::spawn(
        runtime.store.clone(),
        runtime.gateway.clone(),
        config.scheduler.tick_interval(),
        ChronoDuration::seconds(config.scheduler.catch_up_window_secs as i64),
        config.scheduler.utc,
    )
}
