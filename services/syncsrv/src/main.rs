//! Syncsrv main program
//!
//! Runs single or bulk synchronizations from the command line, or serves
//! periodic bulk syncs until a shutdown signal arrives.

use clap::{Parser, Subcommand};
use common::service_bootstrap::{self, ServiceInfo};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use syncsrv::bootstrap;
use syncsrv::config::{SyncsrvConfig, SERVICE_NAME};
use syncsrv::engine::SyncEngine;
use syncsrv::model::{BatchReport, HealthStatus, SyncOutcome};
use syncsrv::scheduler::Scheduler;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Syncsrv - Odoo/Magento synchronization service")]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run scheduled bulk syncs until shutdown (default)
    Serve,
    /// Sync one product from Odoo to Magento
    Product {
        /// Product SKU
        sku: String,
    },
    /// Sync every Odoo product to Magento
    Products,
    /// Import one Magento order into Odoo
    Order {
        /// Magento order entity id
        order_id: String,
    },
    /// Import every new Magento order into Odoo
    Orders,
    /// Probe Odoo and Magento reachability
    Health,
    /// Validate and print the effective configuration, secrets masked
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    service_bootstrap::load_development_env();
    let args = Args::parse();

    let config = SyncsrvConfig::load(args.config.as_deref())?;
    config.validate()?;

    let command = args.command.unwrap_or(Commands::Serve);
    if let Commands::Check = command {
        print_json(&config.redacted())?;
        return Ok(ExitCode::SUCCESS);
    }

    let service_info = ServiceInfo::new(
        SERVICE_NAME,
        env!("CARGO_PKG_VERSION"),
        "Odoo/Magento product and order synchronization",
    );
    service_bootstrap::init_logging(&service_info, &config.logging)?;

    let engine = bootstrap::build_engine(&config)?;
    match command {
        Commands::Serve => {
            service_bootstrap::print_startup_banner(&service_info);
            serve(engine, &config).await?;
            Ok(ExitCode::SUCCESS)
        },
        Commands::Product { sku } => report_outcome(engine.sync_product(&sku).await),
        Commands::Order { order_id } => report_outcome(engine.sync_order(&order_id).await),
        Commands::Products => {
            let shutdown = common::shutdown::shutdown_token();
            report_batch(engine.sync_all_products(&shutdown).await)
        },
        Commands::Orders => {
            let shutdown = common::shutdown::shutdown_token();
            report_batch(engine.sync_all_new_orders(&shutdown).await)
        },
        Commands::Health => {
            let report = engine.health().await;
            print_json(&report)?;
            Ok(exit_code(report.status == HealthStatus::Healthy))
        },
        Commands::Check => Ok(ExitCode::SUCCESS),
    }
}

async fn serve(engine: Arc<SyncEngine>, config: &SyncsrvConfig) -> anyhow::Result<()> {
    let jobs = bootstrap::build_job_manager(engine, config);
    let scheduler = Scheduler::new(Arc::clone(&jobs), config.sync.schedule.clone());
    let shutdown = common::shutdown::shutdown_token();

    scheduler.run(shutdown).await;
    for (ticket, state) in jobs.list() {
        info!("Job {} ({}) left in state {:?}", ticket.id, ticket.kind, state);
    }
    info!("Syncsrv stopped");
    Ok(())
}

fn report_outcome(outcome: SyncOutcome) -> anyhow::Result<ExitCode> {
    print_json(&outcome)?;
    Ok(exit_code(!outcome.is_terminal_failure()))
}

fn report_batch(result: syncsrv::Result<BatchReport>) -> anyhow::Result<ExitCode> {
    match result {
        Ok(report) => {
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        },
        Err(e) => {
            error!("Bulk sync aborted: {}", e);
            print_json(&serde_json::json!({ "error": e.kind(), "detail": e.detail() }))?;
            Ok(ExitCode::FAILURE)
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
