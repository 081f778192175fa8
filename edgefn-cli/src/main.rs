use clap::{Parser, Subcommand};
use colored::Colorize;
use edgefn_service::prelude::{Config, Error};

mod bootstrap;
mod commands;

use commands::function::{FunctionRef, LogsArgs, RetentionSetArgs, ScheduleDisableArgs, ScheduleSetArgs, TestArgs};
use commands::serve::ServeArgs;

/// Operator CLI for an edgefn-service deployment
#[derive(Parser)]
#[command(name = "edgefn")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a function's current configuration and schedule state
    #[command(name = "function:get")]
    FunctionGet(FunctionRef),

    /// List a function's execution-log records
    #[command(name = "function:logs")]
    FunctionLogs(LogsArgs),

    /// Set a function's log retention policy
    #[command(name = "function:retention:set")]
    FunctionRetentionSet(RetentionSetArgs),

    /// Set a function's cron schedule
    #[command(name = "function:schedule:set")]
    FunctionScheduleSet(ScheduleSetArgs),

    /// Disable a function's cron schedule
    #[command(name = "function:schedule:disable")]
    FunctionScheduleDisable(ScheduleDisableArgs),

    /// Invoke a function directly and print its response
    #[command(name = "function:test")]
    FunctionTest(TestArgs),

    /// Run the gateway: HTTP dispatch, scheduler, and invalidation bus
    Serve(ServeArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} failed to load configuration: {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::FunctionGet(args) => commands::function::get(&config, &args).await,
        Commands::FunctionLogs(args) => commands::function::logs(&config, &args).await,
        Commands::FunctionRetentionSet(args) => commands::function::retention_set(&config, &args).await,
        Commands::FunctionScheduleSet(args) => commands::function::schedule_set(&config, &args).await,
        Commands::FunctionScheduleDisable(args) => commands::function::schedule_disable(&config, &args).await,
        Commands::FunctionTest(args) => commands::function::test(&config, &args).await,
        Commands::Serve(args) => commands::serve::run(config, &args).await,
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(exit_code_for(&e));
        }
    }
}

/// Spec §6 exit-code taxonomy: 0 success, 1 generic error, 2 auth failure,
/// 3 not found, 4 rate limited.
fn exit_code_for(e: &Error) -> i32 {
    match e {
        Error::Unauthenticated(_) | Error::Unauthorized(_) => 2,
        Error::NotFound(_) => 3,
        Error::QuotaExceeded(_) => 4,
        _ => 1,
    }
}
