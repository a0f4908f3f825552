//! Lily command-line entry point.
//!
//! The scheduler subcommand is the cron-driven separate process; the rest
//! are maintenance commands over the shared store.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use lily::config::load_config;
use lily::db::Database;
use lily::executor::LlmExecutor;
use lily::memory::MemoryEngine;
use lily::pipeline::PipelineEngine;
use lily::scheduler::Scheduler;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lily", about = "Persistent memory & workflow companion", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open the store and apply pending migrations.
    Init,
    /// Run one scheduler tick (intended to be invoked by cron every minute).
    Tick,
    /// Run a consolidation pass over the memory store.
    Consolidate,
    /// Embed decisions that are still missing vectors.
    Backfill,
    /// Show non-terminal pipelines.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LILY_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config()?;
    let db = Arc::new(Database::open(&config.db_path).await?);
    db.migrate().await?;

    match cli.command {
        Command::Init => {
            println!("store ready at {}", config.db_path);
        }
        Command::Tick => {
            let executor = Arc::new(LlmExecutor::new(&config.ollama_url, "qwen2.5"));
            let scheduler = Scheduler::new(PipelineEngine::new(db.clone()), executor);
            let report = scheduler.tick(Utc::now()).await?;
            println!(
                "fired={} dispatched={} skipped={} completed={} stuck={}",
                report.fired, report.dispatched, report.skipped, report.completed, report.stuck
            );
        }
        Command::Consolidate => {
            let engine = MemoryEngine::new(db.clone(), config);
            engine.init().await?;
            let report = engine.consolidate().await?;
            println!(
                "groups={} removed={} expired={} orphan_vectors={}",
                report.groups, report.removed, report.expired, report.orphan_vectors
            );
        }
        Command::Backfill => {
            let engine = MemoryEngine::new(db.clone(), config);
            engine.init().await?;
            match engine.embeddings() {
                Some(embeddings) => {
                    let stored = embeddings.backfill().await?;
                    println!("embedded {} decisions", stored);
                }
                None => println!("vector search is disabled"),
            }
        }
        Command::Status => {
            let engine = PipelineEngine::new(db.clone());
            let aggregates = engine.overview().await?;
            if aggregates.is_empty() {
                println!("no active pipelines");
            }
            for a in aggregates {
                println!(
                    "{} [{}] {}/{} steps complete",
                    a.pipeline.name, a.pipeline.status, a.complete_steps, a.total_steps
                );
            }
        }
    }

    Database::close_all().await;
    Ok(())
}
