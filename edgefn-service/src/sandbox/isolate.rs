//! One V8 isolate, one invocation. Runs on a dedicated OS thread (V8
//! isolates are not `Send`); the caller communicates through a oneshot
//! channel. See [`super::SandboxWorkerPool`] for the pooling/concurrency
//! policy around this function.

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use deno_core::{JsRuntime, RuntimeOptions};
use parking_lot::Mutex;
use uuid::Uuid;

use super::loader::PackageModuleLoader;
use super::ops::{edgefn_bridge, InvocationState, KvBridge};
use crate::domain::ConsoleLine;
use crate::error::{Error, Result};
use crate::network_policy::NetworkPolicyEngine;

pub struct InvocationRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InvocationResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

pub struct InvocationOutcome {
    pub response: Option<InvocationResponse>,
    pub console: Vec<ConsoleLine>,
}

#[allow(clippy::too_many_arguments)]
pub fn run_isolate_blocking(
    entry_module: PathBuf,
    package_root: PathBuf,
    request: InvocationRequest,
    env: HashMap<String, String>,
    project_id: Option<Uuid>,
    kv: Arc<dyn KvBridge>,
    policy: Arc<NetworkPolicyEngine>,
    http_client: reqwest::Client,
    heap_limit_bytes: usize,
    fd_limit: u64,
    stdout_cap_bytes: u64,
    timeout: Duration,
) -> Result<InvocationOutcome> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Infrastructure(format!("failed to build sandbox thread runtime: {e}")))?;

    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async move {
        let invocation = Arc::new(InvocationState {
            project_id,
            kv,
            policy,
            http_client,
            console: Mutex::new(Vec::new()),
            stdout_used: AtomicU64::new(0),
            stdout_cap: stdout_cap_bytes,
            open_sockets: AtomicU64::new(0),
            fd_limit,
            response: Mutex::new(None),
            invocation_error: Mutex::new(None),
        });

        let loader = Rc::new(PackageModuleLoader::new(package_root));

        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![edgefn_bridge::init_ops()],
            module_loader: Some(loader),
            create_params: Some(
                deno_core::v8::CreateParams::default().heap_limits(0, heap_limit_bytes),
            ),
            ..Default::default()
        });
        runtime.op_state().borrow_mut().put(invocation.clone());

        let exec = async {
            runtime
                .execute_script("ext:edgefn/bootstrap.js", super::bootstrap::BOOTSTRAP_JS)
                .map_err(|e| Error::Infrastructure(format!("bootstrap script failed: {e}")))?;

            let module_specifier =
                deno_core::ModuleSpecifier::from_file_path(&entry_module).map_err(|_| {
                    Error::Infrastructure(format!(
                        "entry module path is not a valid file path: {}",
                        entry_module.display()
                    ))
                })?;
            let module_id = runtime
                .load_main_es_module(&module_specifier)
                .await
                .map_err(|e| Error::UserError(format!("failed to load entry module: {e}")))?;
            let eval = runtime.mod_evaluate(module_id);
            runtime
                .run_event_loop(Default::default())
                .await
                .map_err(|e| Error::UserError(format!("module evaluation failed: {e}")))?;
            eval.await
                .map_err(|e| Error::UserError(format!("module evaluation failed: {e}")))?;

            let ns = runtime
                .get_module_namespace(module_id)
                .map_err(|e| Error::UserError(format!("failed to read module exports: {e}")))?;

            let descriptor_json = serde_json::to_string(&RequestDescriptor::from(&request))
                .map_err(|e| Error::Infrastructure(format!("request marshaling failed: {e}")))?;
            let env_json = serde_json::to_string(&env)
                .map_err(|e| Error::Infrastructure(format!("env marshaling failed: {e}")))?;

            // Hand the module namespace, request descriptor and env snapshot
            // to the guest by assigning globals directly (no string
            // interpolation of request-derived data into executed source),
            // then invoke the bootstrap's dispatcher by name.
            {
                let scope = &mut runtime.handle_scope();
                let global = scope.get_current_context().global(scope);
                let ns_local = deno_core::v8::Local::new(scope, ns);

                let module_key = deno_core::v8::String::new(scope, "__edgefn_module").unwrap();
                global.set(scope, module_key.into(), ns_local.into());

                let descriptor_value = deno_core::v8::String::new(scope, &descriptor_json)
                    .ok_or_else(|| Error::Infrastructure("failed to allocate descriptor string".to_string()))?;
                let descriptor_key = deno_core::v8::String::new(scope, "__edgefn_descriptor").unwrap();
                global.set(scope, descriptor_key.into(), descriptor_value.into());

                let env_value = deno_core::v8::String::new(scope, &env_json)
                    .ok_or_else(|| Error::Infrastructure("failed to allocate env string".to_string()))?;
                let env_key = deno_core::v8::String::new(scope, "__edgefn_env").unwrap();
                global.set(scope, env_key.into(), env_value.into());
            }

            runtime
                .execute_script(
                    "ext:edgefn/env.js",
                    "globalThis.process = Object.freeze({ env: Object.freeze(JSON.parse(globalThis.__edgefn_env)) });",
                )
                .map_err(|e| Error::Infrastructure(format!("env binding failed: {e}")))?;

            let dispatch = runtime
                .execute_script(
                    "ext:edgefn/dispatch.js",
                    "globalThis.__edgefn_invoke(globalThis.__edgefn_descriptor, globalThis.__edgefn_module.default)",
                )
                .map_err(|e| Error::UserError(format!("failed to dispatch request: {e}")))?;

            runtime
                .with_event_loop_promise(dispatch, Default::default())
                .await
                .map_err(|e| Error::UserError(format!("handler invocation failed: {e}")))?;

            Ok::<(), Error>(())
        };

        let outcome = tokio::time::timeout(timeout, exec).await;

        let console = invocation.console.lock().clone();
        let response = invocation
            .response
            .lock()
            .take()
            .map(|r| InvocationResponse { status: r.status, headers: r.headers, body: r.body.into_bytes() });

        match outcome {
            Err(_) => Err(Error::Timeout(format!(
                "invocation exceeded {}ms wall-clock budget",
                timeout.as_millis()
            ))),
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => {
                if let Some(msg) = invocation.invocation_error.lock().take() {
                    if response.is_none() {
                        return Err(Error::UserError(msg));
                    }
                }
                Ok(InvocationOutcome { response, console })
            }
        }
    })
}

#[derive(serde::Serialize)]
struct RequestDescriptor {
    method: String,
    path: String,
    query: String,
    headers: HashMap<String, String>,
    body: Option<Vec<u8>>,
    #[serde(rename = "clientIp")]
    client_ip: Option<String>,
}

impl From<&InvocationRequest> for RequestDescriptor {
    fn from(req: &InvocationRequest) -> Self {
        Self {
            method: req.method.clone(),
            path: req.path.clone(),
            query: req.query.clone(),
            headers: req.headers.clone(),
            body: req.body.clone(),
            client_ip: req.client_ip.clone(),
        }
    }
}
