//! Amp Layer Engine - CLI entry point.
//!
//! Runs allocation, correlation, and rebalancing against a SQLite-backed
//! layer store. Rebalancing is two-phase at the CLI surface too: plans are
//! printed and only written back with an explicit `--commit`.

use amp_layer_engine::config::EngineConfig;
use amp_layer_engine::engine::LayerEngine;
use amp_layer_engine::store::SqliteStore;
use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Amp Layer Engine CLI
#[derive(Parser)]
#[command(name = "amp-layer-engine")]
#[command(version, about = "Capital allocation and correlation for amp layers")]
struct Cli {
    /// Path to the SQLite layer database
    #[arg(long, default_value = "layers.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the target allocation for a layer
    Allocate {
        /// Layer id
        #[arg(short, long)]
        layer: String,

        /// Total capital to allocate
        #[arg(short, long)]
        capital: Decimal,

        /// Performance lookback window in days
        #[arg(short, long, default_value_t = 30)]
        window: u32,
    },

    /// Analyze signal correlation across a layer's strategies
    Correlation {
        /// Layer id
        #[arg(short, long)]
        layer: String,

        /// Signal history lookback in days
        #[arg(long, default_value_t = 30)]
        lookback: u32,
    },

    /// Plan (and optionally commit) a rebalance
    Rebalance {
        /// Layer id
        #[arg(short, long)]
        layer: String,

        /// Total capital to allocate
        #[arg(short, long)]
        capital: Decimal,

        /// Performance lookback window in days
        #[arg(short, long, default_value_t = 30)]
        window: u32,

        /// Apply the plan instead of only printing it
        #[arg(long)]
        commit: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = EngineConfig::load().unwrap_or_else(|e| {
        warn!("Falling back to default config: {e:#}");
        EngineConfig::default()
    });
    config.validate()?;

    let store = Arc::new(SqliteStore::new(&cli.db)?);
    let engine = LayerEngine::new(config, store.clone(), store.clone(), store);

    match cli.command {
        Commands::Allocate {
            layer,
            capital,
            window,
        } => {
            let allocations = engine.allocate(&layer, capital, window).await?;
            if allocations.is_empty() {
                info!(layer_id = %layer, "No enabled members, nothing to allocate");
            }
            println!("{}", serde_json::to_string_pretty(&allocations)?);
        }

        Commands::Correlation { layer, lookback } => {
            let report = engine.analyze_correlation(&layer, lookback).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            info!(
                layer_id = %layer,
                score = report.diversification_score,
                "Diversification score"
            );
        }

        Commands::Rebalance {
            layer,
            capital,
            window,
            commit,
        } => {
            let plan = engine.plan_rebalance(&layer, capital, window).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);

            if !plan.should_rebalance {
                info!(
                    layer_id = %layer,
                    max_change_pct = %plan.max_change_pct,
                    "Largest change is below the rebalance threshold"
                );
            }

            if commit {
                let version = engine.commit_rebalance(&plan).await?;
                info!(layer_id = %layer, version, "Rebalance committed");
            } else {
                info!("Dry run only; pass --commit to apply");
            }
        }
    }

    Ok(())
}
