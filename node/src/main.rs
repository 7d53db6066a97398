//! s3-evac entry point.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use s3_evac_node::cli::{Args, Command};
use s3_evac_node::config::Config;
use s3_evac_node::confirm::StdinConfirm;
use s3_evac_node::errors::MigrationError;
use s3_evac_node::glacier::RestorePolicy;
use s3_evac_node::orchestrator::{Migrator, RunOutcome};
use s3_evac_node::reseed::reseed_state_db_from_local_drive;
use s3_evac_node::reset::reset_migration_state;
use s3_evac_node::smoke::run_smoke_test;
use s3_evac_node::status::show_migration_status;
use sev_cloud::S3Cloud;
use sev_duplicate_tree::{
    run_duplicate_analysis, DuplicateAnalysisContext, MIN_REPORT_BYTES, MIN_REPORT_FILES,
};
use sev_state_store::MigrationStateStore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run().await {
        Ok(code) => code,
        Err(error) => {
            error!("{:#}", error);
            eprintln!();
            eprintln!("Fatal: {:#}", error);
            eprintln!("State has been saved. Fix the issue and re-run to resume,");
            eprintln!("or run 's3-evac reset' to start over.");
            ExitCode::from(1)
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(base_path) = &args.base_path {
        config.local_base_path = base_path.clone();
    }
    if let Some(state_db) = &args.state_db {
        config.state_db_path = state_db.clone();
    }
    Ok(config)
}

async fn run() -> Result<ExitCode> {
    let args = Args::parse();
    let config = load_config(&args)?;

    if args.test {
        run_smoke_test().await?;
        return Ok(ExitCode::SUCCESS);
    }

    match args.command {
        Some(Command::Status) => {
            let state = MigrationStateStore::open(&config.state_db_path)?;
            show_migration_status(&state)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Reset) => {
            reset_migration_state(&config.state_db_path, &StdinConfirm)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Reseed) => {
            let _ = reseed_state_db_from_local_drive(
                &config.local_base_path,
                &config.state_db_path,
                &StdinConfirm,
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::Duplicates {
            min_files,
            min_bytes,
            no_cache,
        }) => {
            let state = MigrationStateStore::open(&config.state_db_path)?;
            let context = DuplicateAnalysisContext {
                base_path: config.local_base_path.clone(),
                min_files: min_files.unwrap_or(MIN_REPORT_FILES),
                min_bytes: min_bytes.unwrap_or(MIN_REPORT_BYTES),
                use_cache: !no_cache,
            };
            let (_, report) = run_duplicate_analysis(&state, &context)?;
            print!("{}", report);
            Ok(ExitCode::SUCCESS)
        }
        None => run_migration(&config).await,
    }
}

async fn run_migration(config: &Config) -> Result<ExitCode> {
    println!();
    println!("{}", "=".repeat(70));
    println!("S3-EVAC BUCKET MIGRATION");
    println!("{}", "=".repeat(70));
    println!("Destination: {}", config.local_base_path.display());
    println!("State DB: {}", config.state_db_path.display());
    println!();

    let restore_policy = RestorePolicy {
        days: config.glacier_restore_days,
        default_tier: config.restore_tier()?,
        poll_interval: Duration::from_secs(config.glacier_poll_interval_secs),
    };

    let state = MigrationStateStore::open(&config.state_db_path)
        .context("opening the migration state store")?;
    let cloud = Arc::new(S3Cloud::connect().await);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!();
            println!("{}", "=".repeat(70));
            println!("MIGRATION INTERRUPTED");
            println!("{}", "=".repeat(70));
            println!("State has been saved.");
            println!("Re-run to resume from where you left off.");
            println!("{}", "=".repeat(70));
            signal_token.cancel();
        }
    });

    let migrator = Migrator::new(
        cloud,
        state,
        config.local_base_path.clone(),
        config.excluded_buckets.clone(),
        restore_policy,
        Arc::new(StdinConfirm),
        cancel,
    );

    match migrator.run().await {
        Ok(RunOutcome::Complete) => Ok(ExitCode::SUCCESS),
        Ok(RunOutcome::Interrupted) => {
            info!("Run interrupted; state preserved");
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunOutcome::Paused) => {
            info!("Run paused; buckets remain");
            Ok(ExitCode::SUCCESS)
        }
        Err(error @ MigrationError::DriveNotAvailable { .. })
        | Err(error @ MigrationError::PermissionDenied { .. }) => {
            eprintln!();
            eprintln!("{}", "=".repeat(70));
            eprintln!("MIGRATION INTERRUPTED - DRIVE ERROR");
            eprintln!("{}", "=".repeat(70));
            eprintln!("{}", error);
            eprintln!();
            eprintln!("State has been saved. Reconnect the drive and re-run to resume.");
            eprintln!("{}", "=".repeat(70));
            Ok(ExitCode::from(1))
        }
        Err(error) => Err(error.into()),
    }
}
