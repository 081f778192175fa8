//! `function:*` verbs (spec §6): operate against the metadata store and
//! execution-log tables directly, the way an operator inspecting a
//! deployment would, rather than going through the gateway's own HTTP
//! surface.

use std::sync::Arc;

use clap::{Args, ValueEnum};
use colored::Colorize;
use edgefn_service::prelude::*;

use crate::bootstrap;

#[derive(Args)]
pub struct FunctionRef {
    /// Function name
    pub name: String,
    /// Slug of the project the function belongs to
    #[arg(long)]
    pub project: String,
}

#[derive(Copy, Clone, ValueEnum)]
pub enum StatusFilter {
    Success,
    Error,
    All,
}

impl StatusFilter {
    fn as_store_filter(self) -> Option<&'static str> {
        match self {
            StatusFilter::Success => Some("success"),
            StatusFilter::Error => Some("error"),
            StatusFilter::All => None,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Args)]
pub struct LogsArgs {
    pub name: String,
    #[arg(long)]
    pub project: String,
    #[arg(long, value_enum, default_value = "all")]
    pub status: StatusFilter,
    #[arg(long, default_value_t = 20)]
    pub limit: i64,
    #[arg(long, default_value_t = 1)]
    pub page: i64,
    #[arg(long, value_enum, default_value = "table")]
    pub output: OutputFormat,
}

#[derive(Args)]
pub struct RetentionSetArgs {
    pub name: String,
    #[arg(long)]
    pub project: String,
    #[arg(long, conflicts_with_all = ["count", "none"])]
    pub days: Option<u32>,
    #[arg(long, conflicts_with_all = ["days", "none"])]
    pub count: Option<u32>,
    #[arg(long, conflicts_with_all = ["days", "count"])]
    pub none: bool,
}

#[derive(Args)]
pub struct ScheduleDisableArgs {
    pub name: String,
    #[arg(long)]
    pub project: String,
    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct ScheduleSetArgs {
    pub name: String,
    #[arg(long)]
    pub project: String,
    /// Five-field cron expression (`m h dom mon dow`)
    #[arg(long)]
    pub cron: String,
}

#[derive(Args)]
pub struct TestArgs {
    pub name: String,
    #[arg(long)]
    pub project: String,
    #[arg(long, default_value = "GET")]
    pub method: String,
    #[arg(long, default_value = "/")]
    pub path: String,
    #[arg(long)]
    pub body: Option<String>,
    /// Repeatable `Key: Value` request header
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    let (k, v) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Key: Value`, got `{raw}`"))?;
    Ok((k.trim().to_string(), v.trim().to_string()))
}

async fn resolve_function(store: &Arc<dyn MetadataStore>, project_slug: &str, name: &str) -> Result<Function> {
    let project = store
        .get_project_by_slug(project_slug)
        .await?
        .ok_or_else(|| Error::NotFound(format!("project `{project_slug}` not found")))?;

    store
        .get_function_by_name(project.id, name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("function `{name}` not found in project `{project_slug}`")))
}

pub async fn get(config: &Config, args: &FunctionRef) -> Result<()> {
    let store = bootstrap::connect_store(config).await?;
    let function = resolve_function(&store, &args.project, &args.name).await?;

    println!("{}  {}", "name".bold(), function.name);
    println!("{}  {}", "id".bold(), function.id);
    println!(
        "{}  {}",
        "active_version".bold(),
        function
            .active_version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "none".dimmed().to_string())
    );
    println!("{}  {}", "requires_api_key".bold(), function.requires_api_key);
    println!(
        "{}  {}",
        "schedule".bold(),
        if function.schedule_enabled {
            format!(
                "enabled, cron=`{}`, next={}",
                function.schedule_cron.as_deref().unwrap_or("?"),
                function
                    .next_execution
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "?".to_string())
            )
        } else {
            "disabled".dimmed().to_string()
        }
    );
    println!("{}  {:?}", "retention".bold(), function.retention);

    Ok(())
}

pub async fn logs(config: &Config, args: &LogsArgs) -> Result<()> {
    let store = bootstrap::connect_store(config).await?;
    let function = resolve_function(&store, &args.project, &args.name).await?;

    let offset = (args.page.max(1) - 1) * args.limit;
    let rows = store
        .list_execution_logs(function.id, args.status.as_store_filter(), args.limit, offset)
        .await?;

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows).map_err(|e| Error::Internal(e.to_string()))?);
        }
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "no execution logs for this page".dimmed());
                return Ok(());
            }
            println!(
                "{:<36}  {:<8}  {:<10}  {:<24}  {}",
                "id".bold(),
                "status".bold(),
                "duration_ms".bold(),
                "executed_at".bold(),
                "error".bold()
            );
            for log in &rows {
                let status = if log.status_code >= 400 {
                    log.status_code.to_string().red()
                } else {
                    log.status_code.to_string().green()
                };
                println!(
                    "{:<36}  {:<8}  {:<10}  {:<24}  {}",
                    log.id,
                    status,
                    log.duration_ms,
                    log.executed_at.to_rfc3339(),
                    log.error_kind.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}

pub async fn retention_set(config: &Config, args: &RetentionSetArgs) -> Result<()> {
    let store = bootstrap::connect_store(config).await?;
    let function = resolve_function(&store, &args.project, &args.name).await?;

    let policy = match (args.days, args.count, args.none) {
        (Some(d), None, false) => RetentionPolicy::Days(d),
        (None, Some(c), false) => RetentionPolicy::Count(c),
        (None, None, true) => RetentionPolicy::None,
        _ => {
            return Err(Error::Validation(
                "exactly one of --days, --count, --none is required".to_string(),
            ));
        }
    };

    store.set_retention(function.id, policy).await?;
    println!("{} retention policy for `{}` set to {:?}", "✓".green(), function.name, policy);
    Ok(())
}

pub async fn schedule_set(config: &Config, args: &ScheduleSetArgs) -> Result<()> {
    let store = bootstrap::connect_store(config).await?;
    let function = resolve_function(&store, &args.project, &args.name).await?;

    let next = next_occurrence(&args.cron, Utc::now(), config.scheduler.utc)?;
    store.set_schedule(function.id, &args.cron, next).await?;

    println!(
        "{} schedule for `{}` set to `{}`, next run {}",
        "✓".green(),
        function.name,
        args.cron,
        next.to_rfc3339()
    );
    Ok(())
}

pub async fn schedule_disable(config: &Config, args: &ScheduleDisableArgs) -> Result<()> {
    let store = bootstrap::connect_store(config).await?;
    let function = resolve_function(&store, &args.project, &args.name).await?;

    if !args.yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("disable the schedule for `{}`?", function.name))
            .default(false)
            .interact()
            .map_err(|e| Error::Internal(e.to_string()))?;
        if !confirmed {
            println!("{}", "aborted".dimmed());
            return Ok(());
        }
    }

    store.disable_schedule(function.id).await?;
    println!("{} schedule disabled for `{}`", "✓".green(), function.name);
    Ok(())
}

pub async fn test(config: &Config, args: &TestArgs) -> Result<()> {
    let runtime = bootstrap::build_runtime(config).await?;
    let function = resolve_function(&runtime.store, &args.project, &args.name).await?;

    let mut headers = std::collections::HashMap::new();
    for (k, v) in &args.headers {
        headers.insert(k.to_lowercase(), v.clone());
    }

    let request = GatewayRequest {
        host: String::new(),
        method: args.method.clone(),
        path: args.path.clone(),
        query: String::new(),
        headers,
        body: args.body.clone().map(|b| b.into_bytes()),
        client_ip: None,
    };

    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.set_message(format!("invoking `{}`...", function.name));
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = runtime.gateway.invoke_direct(function.id, request).await;
    spinner.finish_and_clear();
    let response = result?;

    let status = if response.status >= 400 {
        response.status.to_string().red()
    } else {
        response.status.to_string().green()
    };
    println!("{}  {}", "status".bold(), status);
    for (k, v) in &response.headers {
        println!("{}: {}", k, v);
    }
    println!();
    println!("{}", String::from_utf8_lossy(&response.body));

    Ok(())
}
