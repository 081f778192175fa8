//! Execution logger (spec §4.7): buffers one structured record per
//! invocation, batches inserts to the metadata store, truncates oversized
//! bodies, enforces per-function retention, and back-pressures by dropping
//! the oldest buffered record rather than blocking the invocation path.
//!
//! Grounded on the teacher's [`crate::agents::BackgroundWorker`] task-spawn
//! shape (tracked `tokio::spawn` loops torn down via [`CancellationToken`])
//! rather than a channel-only pipeline: spec §4.7's "drop oldest on
//! overflow" requirement needs random-access eviction from the front of the
//! queue, which a plain bounded `mpsc` channel cannot express, so the queue
//! itself is a `parking_lot`-guarded `VecDeque` (the same lock primitive the
//! teacher already depends on for `package_cache`/`gateway`).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ExecutionLogConfig;
use crate::domain::{ExecutionLog, RetentionPolicy};
use crate::metadata_store::MetadataStore;

/// Bounded in-memory queue shared between invocation callers (producers)
/// and the batching flush loop (the sole consumer).
struct Queue {
    buf: Mutex<VecDeque<ExecutionLog>>,
    capacity: usize,
    dropped: AtomicU64,
    notify: Notify,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        Self { buf: Mutex::new(VecDeque::with_capacity(capacity)), capacity, dropped: AtomicU64::new(0), notify: Notify::new() }
    }

    /// Push a record; if the queue is already at capacity, evict the oldest
    /// entry first (spec §4.7: "dropping the oldest records ... rather than
    /// blocking the invocation") and count the drop.
    fn push(&self, log: ExecutionLog) {
        let mut buf = self.buf.lock();
        if buf.len() >= self.capacity {
            buf.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buf.push_back(log);
        drop(buf);
        self.notify.notify_one();
    }

    fn drain_batch(&self, max: usize) -> Vec<ExecutionLog> {
        let mut buf = self.buf.lock();
        let n = max.min(buf.len());
        buf.drain(..n).collect()
    }

    fn len(&self) -> usize {
        self.buf.lock().len()
    }
}

/// Handle producers use to submit a finished invocation's log record. Cheap
/// to clone; cloning does not touch the underlying queue lock.
#[derive(Clone)]
pub struct ExecutionLogHandle {
    queue: Arc<Queue>,
}

impl ExecutionLogHandle {
    /// Never blocks and never fails: an invocation that cannot be logged
    /// still completed and its response still goes to the caller (spec §8
    /// invariant 1 is best-effort under overload, not a hard guarantee the
    /// logger can enforce without blocking the request path).
    pub fn submit(&self, log: ExecutionLog) {
        self.queue.push(log);
    }

    /// Count of records dropped for overflow since startup.
    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

/// Owns the flush loop and the retention sweeper. Dropping it (or calling
/// [`ExecutionLogAgent::stop`]) cancels both background tasks; records
/// still buffered at that point are not flushed (matching the teacher's
/// background worker's "best effort, not durable" framing for non-critical
/// tasks).
pub struct ExecutionLogAgent {
    handle: ExecutionLogHandle,
    cancel: CancellationToken,
    flush_task: Option<JoinHandle<()>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl ExecutionLogAgent {
    pub fn spawn(store: Arc<dyn MetadataStore>, config: ExecutionLogConfig) -> Self {
        let queue = Arc::new(Queue::new(config.queue_capacity));
        let cancel = CancellationToken::new();

        let flush_task = tokio::spawn(flush_loop(
            queue.clone(),
            store.clone(),
            config.batch_size,
            config.flush_interval(),
            cancel.clone(),
        ));

        let sweep_task = tokio::spawn(retention_sweep_loop(
            store,
            config.default_retention_days,
            config.sweep_interval(),
            cancel.clone(),
        ));

        Self {
            handle: ExecutionLogHandle { queue },
            cancel,
            flush_task: Some(flush_task),
            sweep_task: Some(sweep_task),
        }
    }

    pub fn handle(&self) -> ExecutionLogHandle {
        self.handle.clone()
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.flush_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.sweep_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ExecutionLogAgent {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Truncates a captured request/response body to `cap_bytes`, appending a
/// marker so callers can tell truncation happened (spec §4.7).
pub fn cap_body(body: Option<String>, cap_bytes: usize) -> Option<String> {
    let body = body?;
    if body.len() <= cap_bytes {
        return Some(body);
    }
    let mut truncated = body.as_bytes()[..cap_bytes].to_vec();
    // Avoid splitting a multi-byte UTF-8 sequence at the boundary.
    while !truncated.is_empty() && std::str::from_utf8(&truncated).is_err() {
        truncated.pop();
    }
    let mut s = String::from_utf8(truncated).unwrap_or_default();
    s.push_str("...[truncated]");
    Some(s)
}

async fn flush_loop(
    queue: Arc<Queue>,
    store: Arc<dyn MetadataStore>,
    batch_size: usize,
    flush_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                // Flush whatever remains before the agent stops entirely.
                flush_once(&queue, &store, batch_size).await;
                tracing::info!("execution logger flush loop stopping");
                return;
            }
            () = queue.notify.notified() => {
                flush_once(&queue, &store, batch_size).await;
            }
            _ = ticker.tick() => {
                flush_once(&queue, &store, batch_size).await;
            }
        }
    }
}

async fn flush_once(queue: &Arc<Queue>, store: &Arc<dyn MetadataStore>, batch_size: usize) {
    loop {
        let batch = queue.drain_batch(batch_size);
        if batch.is_empty() {
            return;
        }
        let batch_len = batch.len();
        if let Err(e) = store.insert_execution_logs(&batch).await {
            tracing::error!(error = %e, count = batch_len, "failed to persist execution log batch");
        }
        if batch_len < batch_size {
            return;
        }
    }
}

async fn retention_sweep_loop(
    store: Arc<dyn MetadataStore>,
    default_retention_days: u32,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!("execution logger retention sweeper stopping");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = sweep_once(&store, default_retention_days).await {
                    tracing::error!(error = %e, "retention sweep failed");
                }
            }
        }
    }
}

async fn sweep_once(store: &Arc<dyn MetadataStore>, default_retention_days: u32) -> crate::error::Result<()> {
    let functions = store.functions_with_retention().await?;
    for (function_id, policy) in functions {
        let effective = match policy {
            RetentionPolicy::None => RetentionPolicy::Days(default_retention_days),
            explicit => explicit,
        };
        match store.sweep_retention_for_function(function_id, effective).await {
            Ok(deleted) if deleted > 0 => {
                tracing::debug!(function_id = %function_id, deleted, "retention sweep deleted rows");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(function_id = %function_id, error = %e, "retention sweep failed for function");
            }
        }
    }
    Ok(())
}

/// Builds an [`ExecutionLog`] from invocation outcome data, capping bodies
/// per config. Called from [`crate::gateway::GatewayRouter`] once an
/// invocation (user-driven or scheduled) has finished.
#[allow(clippy::too_many_arguments)]
pub fn build_log(
    function_id: Uuid,
    status_code: i32,
    duration_ms: i64,
    request_bytes: i64,
    response_bytes: i64,
    request_headers: std::collections::HashMap<String, String>,
    response_headers: std::collections::HashMap<String, String>,
    request_body: Option<String>,
    response_body: Option<String>,
    console_output: Vec<crate::domain::ConsoleLine>,
    error_message: Option<String>,
    error_kind: Option<String>,
    client_ip: Option<String>,
    user_agent: Option<String>,
    api_key_used: bool,
    body_cap_bytes: usize,
) -> ExecutionLog {
    ExecutionLog {
        id: Uuid::new_v4(),
        function_id,
        status_code,
        duration_ms,
        request_bytes,
        response_bytes,
        request_headers,
        response_headers,
        request_body: cap_body(request_body, body_cap_bytes),
        response_body: cap_body(response_body, body_cap_bytes),
        console_output,
        error_message,
        error_kind,
        client_ip,
        user_agent,
        api_key_used,
        executed_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_body_under_limit_unchanged() {
        let body = Some("short".to_string());
        assert_eq!(cap_body(body.clone(), 100), body);
    }

    #[test]
    fn test_cap_body_over_limit_truncated_with_marker() {
        let body = Some("a".repeat(50));
        let capped = cap_body(body, 10).unwrap();
        assert!(capped.ends_with("...[truncated]"));
        assert!(capped.len() < 50);
    }

    #[test]
    fn test_cap_body_none_passthrough() {
        assert_eq!(cap_body(None, 10), None);
    }

    #[test]
    fn test_queue_drops_oldest_on_overflow() {
        let queue = Queue::new(2);
        let mk = |n: u8| ExecutionLog {
            id: Uuid::new_v4(),
            function_id: Uuid::new_v4(),
            status_code: 200,
            duration_ms: n as i64,
            request_bytes: 0,
            response_bytes: 0,
            request_headers: Default::default(),
            response_headers: Default::default(),
            request_body: None,
            response_body: None,
            console_output: vec![],
            error_message: None,
            error_kind: None,
            client_ip: None,
            user_agent: None,
            api_key_used: false,
            executed_at: chrono::Utc::now(),
        };

        queue.push(mk(1));
        queue.push(mk(2));
        queue.push(mk(3));

        assert_eq!(queue.dropped.load(Ordering::Relaxed), 1);
        let batch = queue.drain_batch(10);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].duration_ms, 2);
        assert_eq!(batch[1].duration_ms, 3);
    }
}
