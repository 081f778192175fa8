//! Metadata store interface (external, relational) — spec.md §6.
//!
//! The admin UI, package upload, and relational persistence of metadata are
//! explicitly out of scope; this module is the read/write surface the core
//! depends on to reach that store. [`MetadataStore`] is the trait boundary;
//! [`PostgresMetadataStore`] is the only implementation, grounded on the
//! teacher's `sqlx`-based `database.rs` pool and the runtime-checked query
//! style used throughout `repository/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AuthMethod, EnvironmentVariable, Function, FunctionVersion, GatewayConfig, NetworkPolicyRule,
    Project, RetentionPolicy, Route,
};
use crate::error::{Error, Result};

/// Everything the core reads from or writes to the relational metadata
/// store. Implementations are free to add caching in front of this, but the
/// trait itself always hits the store of record.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_function(&self, function_id: Uuid) -> Result<Option<Function>>;
    async fn get_function_by_name(&self, project_id: Uuid, name: &str) -> Result<Option<Function>>;
    async fn get_function_version(
        &self,
        function_id: Uuid,
        version: i32,
    ) -> Result<Option<FunctionVersion>>;
    async fn get_active_version(&self, function_id: Uuid) -> Result<Option<FunctionVersion>>;

    async fn get_env_vars(&self, function_id: Uuid) -> Result<Vec<EnvironmentVariable>>;
    async fn set_env_var(&self, function_id: Uuid, name: &str, value: &str) -> Result<()>;
    async fn delete_env_var(&self, function_id: Uuid, name: &str) -> Result<bool>;

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>>;
    async fn get_project_by_slug(&self, slug: &str) -> Result<Option<Project>>;
    async fn get_project_by_custom_domain(&self, domain: &str) -> Result<Option<Project>>;

    async fn get_network_policies(&self, project_id: Uuid) -> Result<Vec<NetworkPolicyRule>>;
    async fn get_global_network_policies(&self) -> Result<Vec<NetworkPolicyRule>>;

    async fn get_gateway_config(&self, project_id: Uuid) -> Result<Option<GatewayConfig>>;
    async fn get_routes(&self, gateway_id: Uuid) -> Result<Vec<Route>>;
    async fn get_auth_methods(&self, gateway_id: Uuid) -> Result<Vec<AuthMethod>>;

    /// Functions whose `next_execution` is due (`<= now + epsilon`), for the
    /// scheduler's per-tick due-set query.
    async fn due_functions(&self, now: DateTime<Utc>) -> Result<Vec<Function>>;

    /// `UPDATE functions SET next_execution = $next WHERE id = $id AND
    /// next_execution = $expected`. Returns whether this call's row was the
    /// one that matched — the single authority for scheduler leadership
    /// (spec §4.5/§9: no instance-local "did I fire" flag is consulted).
    async fn cas_next_execution(
        &self,
        function_id: Uuid,
        expected: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<bool>;

    async fn update_last_scheduled_execution(&self, function_id: Uuid, at: DateTime<Utc>)
        -> Result<()>;

    async fn disable_schedule(&self, function_id: Uuid) -> Result<()>;
    async fn set_schedule(&self, function_id: Uuid, cron: &str, next_execution: DateTime<Utc>)
        -> Result<()>;
    async fn set_retention(&self, function_id: Uuid, policy: RetentionPolicy) -> Result<()>;

    // -- KV store (spec §4.8) -------------------------------------------
    async fn kv_get(&self, project_id: Uuid, key: &str) -> Result<Option<serde_json::Value>>;
    async fn kv_has(&self, project_id: Uuid, key: &str) -> Result<bool>;
    async fn kv_set(
        &self,
        project_id: Uuid,
        key: &str,
        value: serde_json::Value,
        ttl_ms: Option<i64>,
        quota_bytes: i64,
    ) -> Result<()>;
    async fn kv_delete(&self, project_id: Uuid, key: &str) -> Result<bool>;
    async fn kv_clear(&self, project_id: Uuid) -> Result<u64>;
    async fn kv_project_usage_bytes(&self, project_id: Uuid) -> Result<i64>;

    // -- Execution log (spec §4.7) ---------------------------------------
    async fn insert_execution_logs(&self, logs: &[crate::domain::ExecutionLog]) -> Result<()>;
    async fn sweep_retention_for_function(
        &self,
        function_id: Uuid,
        policy: RetentionPolicy,
    ) -> Result<u64>;
    async fn functions_with_retention(&self) -> Result<Vec<(Uuid, RetentionPolicy)>>;
    async fn list_execution_logs(
        &self,
        function_id: Uuid,
        status_filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<crate::domain::ExecutionLog>>;
}

#[cfg(feature = "database")]
pub struct PostgresMetadataStore {
    pool: sqlx::PgPool,
}

#[cfg(feature = "database")]
impl PostgresMetadataStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn get_function(&self, function_id: Uuid) -> Result<Option<Function>> {
        let row = sqlx::query_as::<_, Function>("SELECT * FROM functions WHERE id = $1")
            .bind(function_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_function_by_name(&self, project_id: Uuid, name: &str) -> Result<Option<Function>> {
        let row = sqlx::query_as::<_, Function>(
            "SELECT * FROM functions WHERE project_id = $1 AND name = $2",
        )
        .bind(project_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_function_version(
        &self,
        function_id: Uuid,
        version: i32,
    ) -> Result<Option<FunctionVersion>> {
        let row = sqlx::query_as::<_, FunctionVersion>(
            "SELECT * FROM function_versions WHERE function_id = $1 AND version_number = $2",
        )
        .bind(function_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_active_version(&self, function_id: Uuid) -> Result<Option<FunctionVersion>> {
        let Some(function) = self.get_function(function_id).await? else {
            return Ok(None);
        };
        let Some(active) = function.active_version else {
            return Ok(None);
        };
        self.get_function_version(function_id, active).await
    }

    async fn get_env_vars(&self, function_id: Uuid) -> Result<Vec<EnvironmentVariable>> {
        let rows = sqlx::query_as::<_, EnvironmentVariable>(
            "SELECT * FROM function_environment_variables WHERE function_id = $1",
        )
        .bind(function_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_env_var(&self, function_id: Uuid, name: &str, value: &str) -> Result<()> {
        EnvironmentVariable::validate_name(name).map_err(Error::Validation)?;
        sqlx::query(
            "INSERT INTO function_environment_variables (function_id, name, value) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (function_id, name) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(function_id)
        .bind(name)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_env_var(&self, function_id: Uuid, name: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM function_environment_variables WHERE function_id = $1 AND name = $2",
        )
        .bind(function_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_project(&self, project_id: Uuid) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_project_by_slug(&self, slug: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_project_by_custom_domain(&self, domain: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, Project>(
            "SELECT p.* FROM projects p \
             JOIN gateway_configs g ON g.project_id = p.id \
             WHERE g.custom_domain = $1",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_network_policies(&self, project_id: Uuid) -> Result<Vec<NetworkPolicyRule>> {
        let rows = sqlx::query_as::<_, NetworkPolicyRule>(
            "SELECT * FROM network_policies WHERE project_id = $1 ORDER BY priority ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_global_network_policies(&self) -> Result<Vec<NetworkPolicyRule>> {
        let rows = sqlx::query_as::<_, NetworkPolicyRule>(
            "SELECT * FROM network_policies WHERE project_id IS NULL ORDER BY priority ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_gateway_config(&self, project_id: Uuid) -> Result<Option<GatewayConfig>> {
        let row = sqlx::query_as::<_, GatewayConfig>(
            "SELECT * FROM gateway_configs WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_routes(&self, gateway_id: Uuid) -> Result<Vec<Route>> {
        // Routes, their method list, CORS settings, and ordered auth method
        // ids are denormalized into one JSON-aggregated row per route so a
        // single query rebuilds the full `Route` struct.
        let rows: Vec<(
            Uuid,
            Uuid,
            String,
            Uuid,
            Vec<String>,
            serde_json::Value,
            Vec<Uuid>,
            String,
            i32,
        )> = sqlx::query_as(
            "SELECT r.id, r.gateway_id, r.route_path, r.function_id, r.allowed_methods, \
                    r.cors_settings, r.auth_method_ids, r.auth_logic, r.sort_order \
             FROM routes r WHERE r.gateway_id = $1 ORDER BY r.sort_order ASC",
        )
        .bind(gateway_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(id, gateway_id, route_path, function_id, allowed_methods, cors, auth_ids, logic, sort_order)| {
                    let cors = serde_json::from_value(cors)
                        .map_err(|e| Error::Internal(format!("malformed cors_settings: {e}")))?;
                    let auth_logic = match logic.as_str() {
                        "and" => crate::domain::AuthLogic::And,
                        _ => crate::domain::AuthLogic::Or,
                    };
                    Ok(Route {
                        id,
                        gateway_id,
                        route_path,
                        function_id,
                        allowed_methods,
                        cors,
                        auth_method_ids: auth_ids,
                        auth_logic,
                        sort_order,
                    })
                },
            )
            .collect()
    }

    async fn get_auth_methods(&self, gateway_id: Uuid) -> Result<Vec<AuthMethod>> {
        let rows: Vec<(Uuid, Uuid, String, serde_json::Value)> = sqlx::query_as(
            "SELECT id, gateway_id, name, config FROM auth_methods WHERE gateway_id = $1",
        )
        .bind(gateway_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, gateway_id, name, config)| {
                let config = serde_json::from_value(config)
                    .map_err(|e| Error::Internal(format!("malformed auth method config: {e}")))?;
                Ok(AuthMethod { id, gateway_id, name, config })
            })
            .collect()
    }

    async fn due_functions(&self, now: DateTime<Utc>) -> Result<Vec<Function>> {
        let rows = sqlx::query_as::<_, Function>(
            "SELECT * FROM functions \
             WHERE schedule_enabled = true AND next_execution IS NOT NULL \
               AND next_execution <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn cas_next_execution(
        &self,
        function_id: Uuid,
        expected: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE functions SET next_execution = $1 \
             WHERE id = $2 AND next_execution = $3",
        )
        .bind(next)
        .bind(function_id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_last_scheduled_execution(
        &self,
        function_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE functions SET last_scheduled_execution = $1 WHERE id = $2")
            .bind(at)
            .bind(function_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn disable_schedule(&self, function_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE functions SET schedule_enabled = false, schedule_cron = NULL, \
             next_execution = NULL WHERE id = $1",
        )
        .bind(function_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_schedule(
        &self,
        function_id: Uuid,
        cron: &str,
        next_execution: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE functions SET schedule_enabled = true, schedule_cron = $1, \
             next_execution = $2 WHERE id = $3",
        )
        .bind(cron)
        .bind(next_execution)
        .bind(function_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_retention(&self, function_id: Uuid, policy: RetentionPolicy) -> Result<()> {
        let json = serde_json::to_value(policy)
            .map_err(|e| Error::Internal(format!("failed to serialize retention policy: {e}")))?;
        sqlx::query("UPDATE functions SET retention = $1 WHERE id = $2")
            .bind(json)
            .bind(function_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn kv_get(&self, project_id: Uuid, key: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT value, expires_at FROM kv_entries WHERE project_id = $1 AND key = $2",
        )
        .bind(project_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((value, Some(expires_at))) if expires_at <= Utc::now() => {
                // Lazily reap on read; the entry is logically gone regardless.
                let _ = self.kv_delete(project_id, key).await;
                let _ = value;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn kv_has(&self, project_id: Uuid, key: &str) -> Result<bool> {
        Ok(self.kv_get(project_id, key).await?.is_some())
    }

    async fn kv_set(
        &self,
        project_id: Uuid,
        key: &str,
        value: serde_json::Value,
        ttl_ms: Option<i64>,
        quota_bytes: i64,
    ) -> Result<()> {
        let size_bytes = serde_json::to_vec(&value).map(|b| b.len() as i64).unwrap_or(0)
            + key.len() as i64;
        let expires_at = ttl_ms.map(|ms| Utc::now() + chrono::Duration::milliseconds(ms));

        let mut tx = self.pool.begin().await.map_err(Error::from)?;

        let existing_size: i64 = sqlx::query_scalar(
            "SELECT COALESCE(size_bytes, 0) FROM kv_entries WHERE project_id = $1 AND key = $2",
        )
        .bind(project_id)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(0);

        let current_total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(size_bytes), 0) FROM kv_entries WHERE project_id = $1")
                .bind(project_id)
                .fetch_one(&mut *tx)
                .await?;

        let projected_total = current_total - existing_size + size_bytes;
        if projected_total > quota_bytes {
            return Err(Error::QuotaExceeded(format!(
                "KV write would use {projected_total} bytes, exceeding project quota of {quota_bytes} bytes"
            )));
        }

        sqlx::query(
            "INSERT INTO kv_entries (project_id, key, value, expires_at, size_bytes, updated_at) \
             VALUES ($1, $2, $3, $4, $5, now()) \
             ON CONFLICT (project_id, key) DO UPDATE SET \
               value = EXCLUDED.value, expires_at = EXCLUDED.expires_at, \
               size_bytes = EXCLUDED.size_bytes, updated_at = now()",
        )
        .bind(project_id)
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .bind(size_bytes)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(Error::from)?;
        Ok(())
    }

    async fn kv_delete(&self, project_id: Uuid, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE project_id = $1 AND key = $2")
            .bind(project_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn kv_clear(&self, project_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE project_id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn kv_project_usage_bytes(&self, project_id: Uuid) -> Result<i64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(size_bytes), 0) FROM kv_entries WHERE project_id = $1")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(total)
    }

    async fn insert_execution_logs(&self, logs: &[crate::domain::ExecutionLog]) -> Result<()> {
        if logs.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(Error::from)?;
        for log in logs {
            sqlx::query(
                "INSERT INTO execution_logs \
                 (id, function_id, status_code, duration_ms, request_bytes, response_bytes, \
                  request_headers, response_headers, request_body, response_body, \
                  console_output, error_message, error_kind, client_ip, user_agent, \
                  api_key_used, executed_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)",
            )
            .bind(log.id)
            .bind(log.function_id)
            .bind(log.status_code)
            .bind(log.duration_ms)
            .bind(log.request_bytes)
            .bind(log.response_bytes)
            .bind(serde_json::to_value(&log.request_headers).unwrap_or_default())
            .bind(serde_json::to_value(&log.response_headers).unwrap_or_default())
            .bind(&log.request_body)
            .bind(&log.response_body)
            .bind(serde_json::to_value(&log.console_output).unwrap_or_default())
            .bind(&log.error_message)
            .bind(&log.error_kind)
            .bind(&log.client_ip)
            .bind(&log.user_agent)
            .bind(log.api_key_used)
            .bind(log.executed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await.map_err(Error::from)?;
        Ok(())
    }

    async fn sweep_retention_for_function(
        &self,
        function_id: Uuid,
        policy: RetentionPolicy,
    ) -> Result<u64> {
        let deleted = match policy {
            RetentionPolicy::None => 0,
            RetentionPolicy::Days(days) => {
                let cutoff = Utc::now() - chrono::Duration::days(days as i64);
                sqlx::query(
                    "DELETE FROM execution_logs WHERE function_id = $1 AND executed_at < $2",
                )
                .bind(function_id)
                .bind(cutoff)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
            RetentionPolicy::Count(keep) => {
                sqlx::query(
                    "DELETE FROM execution_logs WHERE function_id = $1 AND id NOT IN ( \
                       SELECT id FROM execution_logs WHERE function_id = $1 \
                       ORDER BY executed_at DESC LIMIT $2 \
                     )",
                )
                .bind(function_id)
                .bind(keep as i64)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
        };
        Ok(deleted)
    }

    async fn functions_with_retention(&self) -> Result<Vec<(Uuid, RetentionPolicy)>> {
        let rows: Vec<(Uuid, serde_json::Value)> =
            sqlx::query_as("SELECT id, retention FROM functions")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, policy)| {
                let policy = serde_json::from_value(policy).unwrap_or(RetentionPolicy::None);
                (id, policy)
            })
            .collect())
    }

    async fn list_execution_logs(
        &self,
        function_id: Uuid,
        status_filter: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<crate::domain::ExecutionLog>> {
        let rows = match status_filter {
            Some("success") => {
                sqlx::query_as::<_, crate::domain::ExecutionLog>(
                    "SELECT * FROM execution_logs WHERE function_id = $1 AND status_code < 400 \
                     ORDER BY executed_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(function_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            Some("error") => {
                sqlx::query_as::<_, crate::domain::ExecutionLog>(
                    "SELECT * FROM execution_logs WHERE function_id = $1 AND status_code >= 400 \
                     ORDER BY executed_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(function_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            _ => {
                sqlx::query_as::<_, crate::domain::ExecutionLog>(
                    "SELECT * FROM execution_logs WHERE function_id = $1 \
                     ORDER BY executed_at DESC LIMIT $2 OFFSET $3",
                )
                .bind(function_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }
}
