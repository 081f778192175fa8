//! Gateway router (spec §4.4): resolves a request to a project and route,
//! evaluates CORS and the route's auth chain, and hands off to the package
//! cache + sandbox worker pool.
//!
//! Grounded on [`crate::network_policy::NetworkPolicyEngine`]'s
//! resolve-then-cache-with-TTL shape: the metadata store exposes no
//! "list all gateways" query, so there is no full route-table snapshot to
//! rebuild — instead each project's compiled gateway (routes + auth
//! methods) is resolved lazily and cached per `project_id`, flushed by the
//! invalidation bus on `gateway.invalidated`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use moka::sync::Cache;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::auth_chain::{AuthChain, AuthOutcome};
use crate::domain::{AuthMethod, CorsSettings, GatewayConfig, Route};
use crate::error::{Error, Result};
use crate::execution_log::{self, ExecutionLogHandle};
use crate::kv::ProjectKvHandle;
use crate::metadata_store::MetadataStore;
use crate::network_policy::NetworkPolicyEngine;
use crate::package_cache::PackageCache;
use crate::sandbox::{InvocationRequest, InvocationResponse, SandboxWorkerPool};

/// One project's gateway, its routes, and its auth methods keyed by id —
/// everything [`GatewayRouter::dispatch`] needs without a further store
/// round-trip once resolved.
pub struct CompiledGateway {
    pub project_id: Uuid,
    pub gateway: GatewayConfig,
    pub routes: Vec<Route>,
    pub auth_methods: HashMap<Uuid, AuthMethod>,
}

impl CompiledGateway {
    /// Exact literal match only (spec §4.4: "no wildcard route support
    /// unless the stored path is literal"). Method gating happens in the
    /// caller so a method mismatch can be reported as 405 rather than 404.
    fn find_route(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.route_path == path)
    }
}

/// Splits `/<slug>/<rest>` into the project slug and the remainder to match
/// routes against, re-prefixed with `/` (spec §4.4: routes are matched on
/// "the remaining path after stripping the project slug"). `None` if the
/// path has no slug segment at all.
fn split_slug_prefix(path: &str) -> Option<(&str, String)> {
    let trimmed = path.trim_start_matches('/');
    let (slug, rest) = match trimmed.split_once('/') {
        Some((slug, rest)) => (slug, rest),
        None => (trimmed, ""),
    };
    if slug.is_empty() {
        return None;
    }
    Some((slug, format!("/{rest}")))
}

/// Per-project compiled-gateway cache. Analogous to
/// [`crate::network_policy::NetworkPolicyEngine`]'s `compiled_policy`.
pub struct RouteTable {
    store: Arc<dyn MetadataStore>,
    cache: Cache<Uuid, Arc<CompiledGateway>>,
}

impl RouteTable {
    pub fn new(store: Arc<dyn MetadataStore>, cache_ttl: Duration) -> Self {
        Self { store, cache: Cache::builder().time_to_live(cache_ttl).build() }
    }

    pub async fn compiled(&self, project_id: Uuid) -> Result<Option<Arc<CompiledGateway>>> {
        if let Some(cached) = self.cache.get(&project_id) {
            return Ok(Some(cached));
        }

        let Some(gateway) = self.store.get_gateway_config(project_id).await? else {
            return Ok(None);
        };
        if !gateway.enabled {
            return Ok(None);
        }
        let routes = self.store.get_routes(gateway.id).await?;
        let auth_methods = self
            .store
            .get_auth_methods(gateway.id)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let compiled = Arc::new(CompiledGateway { project_id, gateway, routes, auth_methods });
        self.cache.insert(project_id, compiled.clone());
        Ok(Some(compiled))
    }

    pub fn invalidate(&self, project_id: Uuid) {
        self.cache.invalidate(&project_id);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

/// Everything needed to resolve, authorize, and execute one inbound HTTP
/// request against a project's deployed functions.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub host: String,
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    fn status(status: u16) -> Self {
        Self { status, headers: HashMap::new(), body: Vec::new() }
    }

    fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }
}

/// The gateway's dispatch pipeline: host/path resolution, route matching,
/// CORS, auth chain, per-project inflight cap, and handoff to the sandbox.
pub struct GatewayRouter {
    store: Arc<dyn MetadataStore>,
    table: RouteTable,
    auth_chain: Arc<AuthChain>,
    package_cache: Arc<PackageCache>,
    sandbox: Arc<SandboxWorkerPool>,
    policy: Arc<NetworkPolicyEngine>,
    http_client: reqwest::Client,
    inflight: DashMap<Uuid, Arc<Semaphore>>,
    default_inflight_cap: usize,
    default_domain: String,
    execution_log: ExecutionLogHandle,
    body_capture_cap_bytes: usize,
}

impl GatewayRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn MetadataStore>,
        table: RouteTable,
        auth_chain: Arc<AuthChain>,
        package_cache: Arc<PackageCache>,
        sandbox: Arc<SandboxWorkerPool>,
        policy: Arc<NetworkPolicyEngine>,
        http_client: reqwest::Client,
        default_inflight_cap: usize,
        default_domain: String,
        execution_log: ExecutionLogHandle,
        body_capture_cap_bytes: usize,
    ) -> Self {
        Self {
            store,
            table,
            auth_chain,
            package_cache,
            sandbox,
            policy,
            http_client,
            inflight: DashMap::new(),
            default_inflight_cap,
            default_domain,
            execution_log,
            body_capture_cap_bytes,
        }
    }

    pub fn invalidate_project(&self, project_id: Uuid) {
        self.table.invalidate(project_id);
    }

    pub fn invalidate_all(&self) {
        self.table.invalidate_all();
    }

    /// Resolve `(host, path)` to an owning project and the route path to
    /// match against: a custom domain match wins outright and the path is
    /// used unchanged; otherwise `host` must be the default domain and the
    /// project is addressed by `<project_slug>/<route_path>` (spec §6:
    /// `https://<custom_domain>/<route_path>` OR
    /// `https://<default_domain>/<project_slug>/<route_path>`). Spec §4.4
    /// requires routes be matched on "the remaining path after stripping
    /// the project slug", so the slug is taken from the first path
    /// segment, not from the host.
    async fn resolve_project(&self, host: &str, path: &str) -> Result<(Uuid, String)> {
        let host_only = host.split(':').next().unwrap_or(host);

        if let Some(project) = self.store.get_project_by_custom_domain(host_only).await? {
            return Ok((project.id, path.to_string()));
        }

        if !host_only.eq_ignore_ascii_case(&self.default_domain) {
            return Err(Error::NotFound(format!("no project resolves host `{host_only}`")));
        }

        let (slug, route_path) = split_slug_prefix(path)
            .ok_or_else(|| Error::NotFound(format!("no project slug in path `{path}`")))?;

        let project = self
            .store
            .get_project_by_slug(slug)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no project with slug `{slug}`")))?;
        Ok((project.id, route_path))
    }

    fn inflight_semaphore(&self, project_id: Uuid) -> Arc<Semaphore> {
        self.inflight
            .entry(project_id)
            .or_insert_with(|| Arc::new(Semaphore::new(self.default_inflight_cap)))
            .clone()
    }

    /// Run the full dispatch pipeline for one request. Never returns an
    /// `Err` for ordinary request-level failures (no route, auth denial,
    /// method not allowed) — those are mapped to a [`GatewayResponse`];
    /// `Err` is reserved for store/infrastructure failures the caller
    /// should log as 500s.
    pub async fn dispatch(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        let (project_id, route_path) = match self.resolve_project(&request.host, &request.path).await {
            Ok(v) => v,
            Err(Error::NotFound(msg)) => return Ok(GatewayResponse::status(404).with_header("X-Edgefn-Error", msg)),
            Err(e) => return Err(e),
        };

        let Some(gateway) = self.table.compiled(project_id).await? else {
            return Ok(GatewayResponse::status(404));
        };

        let Some(route) = gateway.find_route(&route_path) else {
            return Ok(GatewayResponse::status(404));
        };

        let is_preflight = request.method.eq_ignore_ascii_case("OPTIONS")
            && request.headers.contains_key("access-control-request-method");

        if is_preflight && route.cors.enabled {
            return Ok(self.preflight_response(&route.cors, &request));
        }

        if !route
            .allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&request.method))
        {
            let allow = route.allowed_methods.join(", ");
            return Ok(GatewayResponse::status(405).with_header("Allow", allow));
        }

        let api_key_used = match self
            .auth_chain
            .evaluate(project_id, route, &gateway.auth_methods, &request)
            .await
        {
            Ok(AuthOutcome::Granted(api_key_used)) => api_key_used,
            Ok(AuthOutcome::Unauthenticated(reason)) => {
                return Ok(GatewayResponse::status(401).with_header("X-Edgefn-Auth-Error", reason));
            }
            Ok(AuthOutcome::Forbidden(reason)) => {
                return Ok(GatewayResponse::status(403).with_header("X-Edgefn-Auth-Error", reason));
            }
            Err(e) => return Err(e),
        };

        let semaphore = self.inflight_semaphore(project_id);
        let Ok(_permit) = semaphore.clone().try_acquire_owned() else {
            return Ok(GatewayResponse::status(503).with_header("Retry-After", "1"));
        };

        let mut response = self
            .execute(project_id, route.function_id, &request, api_key_used)
            .await?;

        if route.cors.enabled {
            self.apply_cors_headers(&route.cors, &request, &mut response);
        }

        Ok(response)
    }

    /// Invoke `function_id` directly, bypassing route resolution, CORS,
    /// auth, and the inflight cap, and return its response. Used by the
    /// scheduler (wrapped by [`Self::invoke_scheduled`]) and by an
    /// operator's direct test invocation.
    pub async fn invoke_direct(&self, function_id: Uuid, request: GatewayRequest) -> Result<GatewayResponse> {
        let function = self
            .store
            .get_function(function_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("function {function_id} not found")))?;

        self.execute(function.project_id, function_id, &request, false).await
    }

    /// Fire a virtual request against `function_id` on the scheduler's
    /// behalf (spec §4.5: "scheduler fires a virtual request ... skipping
    /// the gateway"). The response body is discarded; only success/failure
    /// and the execution-log record matter to a scheduled tick.
    pub async fn invoke_scheduled(&self, function_id: Uuid, request: GatewayRequest) -> Result<()> {
        self.invoke_direct(function_id, request).await?;
        Ok(())
    }

    /// Resolves the active version, fetches its package, invokes the
    /// sandbox, and submits exactly one [`crate::domain::ExecutionLog`]
    /// record per completed invocation (spec §8 invariant 1). Pre-invocation
    /// failures (no active version, package unavailable) are surfaced as
    /// ordinary [`GatewayResponse`]s without a log record, since no
    /// invocation actually ran.
    async fn execute(
        &self,
        project_id: Uuid,
        function_id: Uuid,
        request: &GatewayRequest,
        api_key_used: bool,
    ) -> Result<GatewayResponse> {
        let Some(version) = self.store.get_active_version(function_id).await? else {
            return Ok(GatewayResponse::status(404).with_header("X-Edgefn-Error", "no active version"));
        };

        let package = match self.package_cache.get(function_id, version.version_number).await {
            Ok(handle) => handle,
            Err(Error::NotFound(_)) => return Ok(GatewayResponse::status(404)),
            Err(Error::Integrity(msg)) => return Ok(GatewayResponse::status(502).with_header("X-Edgefn-Error", msg)),
            Err(e) => return Err(e),
        };

        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("project {project_id} disappeared mid-request")))?;
        let env = self
            .store
            .get_env_vars(function_id)
            .await?
            .into_iter()
            .map(|v| (v.name, v.value))
            .collect::<HashMap<_, _>>();

        let kv = Arc::new(ProjectKvHandle::new(self.store.clone(), project_id, project.kv_storage_limit_bytes));
        let policy = self.policy.clone();
        let http_client = self.http_client.clone();

        let invocation_request = InvocationRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            client_ip: request.client_ip.clone(),
        };

        let request_bytes = request.body.as_ref().map(|b| b.len()).unwrap_or(0) as i64;
        let started = Instant::now();

        let outcome = self
            .sandbox
            .invoke(&package, invocation_request, env, Some(project_id), kv, policy, http_client)
            .await;

        let duration_ms = started.elapsed().as_millis() as i64;
        let body_as_text = |body: &Option<Vec<u8>>| body.as_ref().map(|b| String::from_utf8_lossy(b).into_owned());

        let (response, console, error_message, error_kind) = match outcome {
            Ok(outcome) => match outcome.response {
                Some(InvocationResponse { status, headers, body }) => {
                    (GatewayResponse { status, headers, body }, outcome.console, None, None)
                }
                None => (
                    GatewayResponse::status(500).with_header(
                        "X-Edgefn-Error",
                        "handler completed without calling a terminal response method",
                    ),
                    outcome.console,
                    Some("handler completed without calling a terminal response method".to_string()),
                    Some("no_response".to_string()),
                ),
            },
            Err(Error::Timeout(msg)) => (
                GatewayResponse::status(504).with_header("X-Edgefn-Error", msg.clone()),
                Vec::new(),
                Some(msg),
                Some("timeout".to_string()),
            ),
            Err(Error::UserError(msg)) => (
                GatewayResponse::status(502).with_header("X-Edgefn-Error", msg.clone()),
                Vec::new(),
                Some(msg),
                Some("user_error".to_string()),
            ),
            Err(Error::ResourceLimit(msg)) => (
                GatewayResponse::status(413).with_header("X-Edgefn-Error", msg.clone()),
                Vec::new(),
                Some(msg),
                Some("resource_limit".to_string()),
            ),
            Err(Error::PolicyDenied(msg)) => (
                GatewayResponse::status(502).with_header("X-Edgefn-Error", msg.clone()),
                Vec::new(),
                Some(msg),
                Some("policy_denied".to_string()),
            ),
            Err(e) => return Err(e),
        };

        let log = execution_log::build_log(
            function_id,
            response.status as i32,
            duration_ms,
            request_bytes,
            response.body.len() as i64,
            request.headers.clone(),
            response.headers.clone(),
            body_as_text(&request.body),
            body_as_text(&Some(response.body.clone())),
            console,
            error_message,
            error_kind,
            request.client_ip.clone(),
            request.headers.get("user-agent").cloned(),
            api_key_used,
            self.body_capture_cap_bytes,
        );
        self.execution_log.submit(log);

        Ok(response)
    }

    fn preflight_response(&self, cors: &CorsSettings, request: &GatewayRequest) -> GatewayResponse {
        let mut resp = GatewayResponse::status(204);
        self.apply_cors_headers(cors, request, &mut resp);
        resp = resp
            .with_header("Access-Control-Allow-Methods", cors.allowed_methods.join(", "))
            .with_header("Access-Control-Allow-Headers", cors.allowed_headers.join(", "))
            .with_header("Access-Control-Max-Age", cors.max_age_secs.to_string());
        resp
    }

    fn apply_cors_headers(&self, cors: &CorsSettings, request: &GatewayRequest, response: &mut GatewayResponse) {
        let origin = request.headers.get("origin").cloned();
        let allowed_origin = match origin {
            Some(ref origin) if cors.allowed_origins.iter().any(|o| o == "*" || o == origin) => {
                if cors.allowed_origins.iter().any(|o| o == "*") && !cors.allow_credentials {
                    "*".to_string()
                } else {
                    origin.clone()
                }
            }
            _ => return,
        };
        response.headers.insert("Access-Control-Allow-Origin".to_string(), allowed_origin);
        if !cors.expose_headers.is_empty() {
            response
                .headers
                .insert("Access-Control-Expose-Headers".to_string(), cors.expose_headers.join(", "));
        }
        if cors.allow_credentials {
            response
                .headers
                .insert("Access-Control-Allow-Credentials".to_string(), "true".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuthLogic;

    fn route(path: &str, methods: &[&str]) -> Route {
        Route {
            id: Uuid::new_v4(),
            gateway_id: Uuid::new_v4(),
            route_path: path.to_string(),
            function_id: Uuid::new_v4(),
            allowed_methods: methods.iter().map(|m| m.to_string()).collect(),
            cors: CorsSettings::default(),
            auth_method_ids: Vec::new(),
            auth_logic: AuthLogic::Or,
            sort_order: 0,
        }
    }

    #[test]
    fn test_find_route_exact_literal_match() {
        let gateway = CompiledGateway {
            project_id: Uuid::new_v4(),
            gateway: GatewayConfig { id: Uuid::new_v4(), project_id: Uuid::new_v4(), enabled: true, custom_domain: None },
            routes: vec![route("/hello", &["GET"]), route("/hello/world", &["POST"])],
            auth_methods: HashMap::new(),
        };
        assert!(gateway.find_route("/hello").is_some());
        assert!(gateway.find_route("/hello/world").is_some());
        assert!(gateway.find_route("/nope").is_none());
        // No wildcard/prefix matching: "/hello/world" must not match "/hello".
        assert_eq!(gateway.find_route("/hello/world").unwrap().route_path, "/hello/world");
    }

    #[test]
    fn test_split_slug_prefix_strips_project_slug() {
        // Seed scenario S1: slug `alpha`, route `/ping`.
        assert_eq!(
            split_slug_prefix("/alpha/ping"),
            Some(("alpha", "/ping".to_string()))
        );
        assert_eq!(split_slug_prefix("/alpha"), Some(("alpha", "/".to_string())));
        assert_eq!(split_slug_prefix("/alpha/"), Some(("alpha", "/".to_string())));
        assert_eq!(
            split_slug_prefix("/alpha/nested/path"),
            Some(("alpha", "/nested/path".to_string()))
        );
        assert_eq!(split_slug_prefix("/"), None);
        assert_eq!(split_slug_prefix(""), None);
    }
}
