//! Per-project KV store (spec §4.8): a thin, ergonomic handle over
//! [`MetadataStore::kv_*`] that the sandbox's `kv` capability bridges to.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::metadata_store::MetadataStore;
use crate::sandbox::KvBridge;

/// `get/set/has/delete/clear`, scoped to one project, with TTL expressed as
/// milliseconds-from-now and quota enforced against the owning project's
/// `kv_storage_limit_bytes` (spec §4.8/§5).
pub struct ProjectKvHandle {
    store: Arc<dyn MetadataStore>,
    project_id: Uuid,
    quota_bytes: i64,
}

impl ProjectKvHandle {
    pub fn new(store: Arc<dyn MetadataStore>, project_id: Uuid, quota_bytes: i64) -> Self {
        Self { store, project_id, quota_bytes }
    }

    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.store.kv_get(self.project_id, key).await
    }

    pub async fn set(&self, key: &str, value: serde_json::Value, ttl_ms: Option<i64>) -> Result<()> {
        self.store.kv_set(self.project_id, key, value, ttl_ms, self.quota_bytes).await
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        self.store.kv_has(self.project_id, key).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.store.kv_delete(self.project_id, key).await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.store.kv_clear(self.project_id).await
    }

    pub async fn usage_bytes(&self) -> Result<i64> {
        self.store.kv_project_usage_bytes(self.project_id).await
    }
}

#[async_trait]
impl KvBridge for ProjectKvHandle {
    async fn get(&self, key: &str) -> std::result::Result<Option<serde_json::Value>, String> {
        ProjectKvHandle::get(self, key).await.map_err(|e| e.to_string())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> std::result::Result<(), String> {
        // The sandbox capability surface does not expose a per-call TTL
        // (spec §4.1's `kv.get/set/has/delete/clear` take no TTL argument);
        // TTL-bearing writes go through [`ProjectKvHandle::set`] directly
        // from host-side code (e.g. the execution logger's own bookkeeping).
        ProjectKvHandle::set(self, key, value, None).await.map_err(|e| e.to_string())
    }

    async fn has(&self, key: &str) -> std::result::Result<bool, String> {
        ProjectKvHandle::has(self, key).await.map_err(|e| e.to_string())
    }

    async fn delete(&self, key: &str) -> std::result::Result<bool, String> {
        ProjectKvHandle::delete(self, key).await.map_err(|e| e.to_string())
    }

    async fn clear(&self) -> std::result::Result<(), String> {
        ProjectKvHandle::clear(self).await.map(|_| ()).map_err(|e| e.to_string())
    }
}
