//! Scheduler (spec §4.5): fires invocations for every `schedule_enabled`
//! function whose cron is due.
//!
//! Grounded on the teacher's [`crate::agents::BackgroundWorker`] task-spawn
//! shape (a `tokio::spawn` loop driven by a [`CancellationToken`], torn
//! down on `stop`) rather than the full `acton_reactive` actor pattern —
//! there is no caller that needs to query this agent by message, only
//! start and stop it. Cron-next-occurrence math follows the
//! `cron::Schedule::from_str(..).after(&now).next()` idiom used throughout
//! the example pack's own cron schedulers.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::Function;
use crate::error::{Error, Result};
use crate::gateway::{GatewayRequest, GatewayRouter};
use crate::metadata_store::MetadataStore;

/// Parses spec §4.5's minute-precision five-field expression (`m h dom mon
/// dow`) by prepending a zero seconds field, since the `cron` crate's
/// `Schedule` parser is seconds-first.
fn parse_five_field(expr: &str) -> Result<Schedule> {
    let with_seconds = format!("0 {expr}");
    Schedule::from_str(&with_seconds)
        .map_err(|e| Error::Validation(format!("invalid cron expression `{expr}`: {e}")))
}

/// Next occurrence of `expr` strictly after `after`, returned as UTC (the
/// wire/storage representation of `next_execution` either way). Spec §4.5:
/// "timezone is server local unless the system setting configures UTC" —
/// when `utc` is `false` (the default), the cron fields are evaluated
/// against the server's local wall-clock time, not against `after`'s UTC
/// clock directly, so `0 9 * * *` means 9 AM local rather than 9 AM UTC.
/// Exposed so `edgefn-cli`'s `function:schedule:set` can compute the
/// `next_execution` value `MetadataStore::set_schedule` expects without
/// duplicating the cron-parsing idiom.
pub fn next_occurrence(expr: &str, after: DateTime<Utc>, utc: bool) -> Result<DateTime<Utc>> {
    let schedule = parse_five_field(expr)?;
    let no_occurrence = || Error::Validation(format!("cron expression `{expr}` has no future occurrence"));

    if utc {
        schedule.after(&after).next().ok_or_else(no_occurrence)
    } else {
        let after_local = after.with_timezone(&Local);
        let next_local = schedule.after(&after_local).next().ok_or_else(no_occurrence)?;
        Ok(next_local.with_timezone(&Utc))
    }
}

/// Drives the single-ticker coroutine described in spec §4.5. One instance
/// runs per process; leadership for any individual firing is decided per
/// tick by [`MetadataStore::cas_next_execution`], not by this agent.
pub struct SchedulerAgent {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerAgent {
    /// Start the tick loop. `catch_up_window` bounds how far in the past
    /// `next_execution` may be before the catch-up fires at most once
    /// rather than cumulatively (spec §4.5's "missed ticks" rule).
    pub fn spawn(
        store: Arc<dyn MetadataStore>,
        gateway: Arc<GatewayRouter>,
        tick_interval: std::time::Duration,
        catch_up_window: chrono::Duration,
        utc: bool,
    ) -> Self {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            loop {
                tokio::select! {
                    biased;
                    () = loop_cancel.cancelled() => {
                        tracing::info!("scheduler agent stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = run_tick(&store, &gateway, catch_up_window, utc).await {
                            tracing::error!(error = %e, "scheduler tick failed");
                        }
                    }
                }
            }
        });

        Self { cancel, handle: Some(handle) }
    }

    /// Request shutdown; in-flight fires are not cancelled (spec §4.5).
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SchedulerAgent {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_tick(
    store: &Arc<dyn MetadataStore>,
    gateway: &Arc<GatewayRouter>,
    catch_up_window: chrono::Duration,
    utc: bool,
) -> Result<()> {
    let now = Utc::now();
    let due = store.due_functions(now).await?;

    for function in due {
        let store = store.clone();
        let gateway = gateway.clone();
        tokio::spawn(async move {
            if let Err(e) = fire_one(&store, &gateway, &function, now, catch_up_window, utc).await {
                tracing::error!(function_id = %function.id, error = %e, "scheduled invocation failed");
            }
        });
    }

    Ok(())
}

async fn fire_one(
    store: &Arc<dyn MetadataStore>,
    gateway: &Arc<GatewayRouter>,
    function: &Function,
    now: DateTime<Utc>,
    catch_up_window: chrono::Duration,
    utc: bool,
) -> Result<()> {
    let Some(cron_expr) = function.schedule_cron.as_deref() else {
        return Ok(());
    };
    let Some(expected) = function.next_execution else {
        return Ok(());
    };

    // A missed tick (the instance was offline past one full period) fires
    // at most once: treat "now" as the reference point for the next
    // occurrence instead of chaining forward from the stale `expected`.
    let reference = if now - expected > catch_up_window { now } else { expected };
    let next = next_occurrence(cron_expr, reference, utc)?;

    let won_leadership = store.cas_next_execution(function.id, expected, next).await?;
    if !won_leadership {
        return Ok(());
    }

    let request = GatewayRequest {
        host: String::new(),
        method: "GET".to_string(),
        path: format!("/__scheduled/{}", function.id),
        query: String::new(),
        headers: std::collections::HashMap::new(),
        body: None,
        client_ip: None,
    };

    let result = invoke_scheduled(gateway, function.id, request).await;
    let fired_at = Utc::now();
    store.update_last_scheduled_execution(function.id, fired_at).await?;

    if let Err(e) = result {
        tracing::warn!(function_id = %function.id, error = %e, "scheduled function invocation errored");
    }

    Ok(())
}

/// Scheduled fires bypass host/route resolution (there is no inbound HTTP
/// request) and invoke the function's active version directly.
async fn invoke_scheduled(gateway: &Arc<GatewayRouter>, function_id: Uuid, request: GatewayRequest) -> Result<()> {
    gateway.invoke_scheduled(function_id, request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_five_field_every_minute() {
        let schedule = parse_five_field("* * * * *").unwrap();
        let now = Utc::now();
        let next = schedule.after(&now).next().unwrap();
        assert!(next > now);
    }

    #[test]
    fn test_parse_five_field_rejects_garbage() {
        assert!(parse_five_field("not a cron").is_err());
    }

    #[test]
    fn test_next_occurrence_is_strictly_after_reference() {
        let now = Utc::now();
        let next = next_occurrence("0 0 * * *", now, true).unwrap();
        assert!(next > now);
    }

    #[test]
    fn test_next_occurrence_local_vs_utc_can_differ() {
        // Only a meaningful check off UTC; skip near the boundary where
        // local and UTC happen to agree.
        let now = Utc::now();
        let local_offset_hours = Local::now().offset().local_minus_utc() / 3600;
        if local_offset_hours == 0 {
            return;
        }
        let next_utc = next_occurrence("0 0 * * *", now, true).unwrap();
        let next_local = next_occurrence("0 0 * * *", now, false).unwrap();
        assert_ne!(next_utc, next_local);
    }
}
