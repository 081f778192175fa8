//! Sandbox worker (spec §4.1): executes one handler invocation end-to-end,
//! isolated from the host process and other invocations.
//!
//! Grounded on `examples/other_examples`'s `deno_core`-based function-runner
//! crates (`get-convex-convex-backend`/`AKJUS-convex-backend`): one
//! `JsRuntime` per invocation, a static `Extension` of `#[op2]` capability
//! ops, and an embedded bootstrap module — the teacher carries no JS
//! sandbox of its own. Worker *pooling* is generalized from the teacher's
//! `agents/pool.rs` "one pooled resource per external system" pattern to
//! "bounded concurrency per (function_id, version)"; see [`SandboxWorkerPool`]
//! for why persistent isolate reuse was simplified away.

mod bootstrap;
mod isolate;
mod loader;
mod ops;

pub use isolate::{InvocationOutcome, InvocationRequest, InvocationResponse};
pub use ops::KvBridge;

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::network_policy::NetworkPolicyEngine;
use crate::package_cache::CachedPackage;

/// Bounds concurrent invocations per `(function_id, version)` and runs each
/// one on a dedicated OS thread with a fresh `JsRuntime` (V8 isolates are
/// not `Send`, and are not safe to migrate across threads).
///
/// Spec §4.1 allows pooling "when safe" and requires a worker be discarded
/// if its reset is not verifiable. Verifying that an arbitrary V8 isolate's
/// capability state (open handles, pending timers, injected globals) was
/// fully reset is itself a hard problem; this implementation sidesteps it
/// by never reusing an isolate across invocations — every invocation gets a
/// pristine isolate, which trivially satisfies the reset requirement. The
/// pool's value is therefore purely concurrency control (the
/// `pool_size_per_version` ceiling), not isolate warm-up.
pub struct SandboxWorkerPool {
    config: SandboxConfig,
    semaphores: DashMap<(Uuid, i32), Arc<Semaphore>>,
}

impl SandboxWorkerPool {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config, semaphores: DashMap::new() }
    }

    fn semaphore_for(&self, key: (Uuid, i32)) -> Arc<Semaphore> {
        self.semaphores
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.pool_size_per_version)))
            .clone()
    }

    /// Run one invocation against `package`, bounded by this function's
    /// version concurrency ceiling and the configured wall-clock timeout.
    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        package: &CachedPackage,
        request: InvocationRequest,
        env: HashMap<String, String>,
        project_id: Option<Uuid>,
        kv: Arc<dyn KvBridge>,
        policy: Arc<NetworkPolicyEngine>,
        http_client: reqwest::Client,
    ) -> Result<InvocationOutcome> {
        let semaphore = self.semaphore_for((package.function_id, package.version));
        let _permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| Error::Infrastructure("sandbox concurrency semaphore closed".to_string()))?;

        let entry_module = package.entry_module.clone();
        let package_root = package.extracted_path.clone();
        let heap_limit_bytes = self.config.heap_limit_bytes;
        let fd_limit = self.config.fd_limit as u64;
        let stdout_cap_bytes = self.config.stdout_cap_bytes as u64;
        let timeout = self.config.default_timeout();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let thread_name = format!("sandbox-{}-{}", package.function_id, package.version);
        std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let result = isolate::run_isolate_blocking(
                    entry_module,
                    package_root,
                    request,
                    env,
                    project_id,
                    kv,
                    policy,
                    http_client,
                    heap_limit_bytes,
                    fd_limit,
                    stdout_cap_bytes,
                    timeout,
                );
                let _ = tx.send(result);
            })
            .map_err(|e| Error::Infrastructure(format!("failed to spawn sandbox thread: {e}")))?;

        rx.await
            .map_err(|_| Error::Infrastructure("sandbox worker thread terminated without a result".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semaphore_reused_per_version_key() {
        let pool = SandboxWorkerPool::new(SandboxConfig::default());
        let fid = Uuid::new_v4();
        let a = pool.semaphore_for((fid, 1));
        let b = pool.semaphore_for((fid, 1));
        assert!(Arc::ptr_eq(&a, &b));
        let c = pool.semaphore_for((fid, 2));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
