//! Meridian CLI
//!
//! Demo runner for the inference engine: generates seeded synthetic health
//! streams, runs the full analysis pipeline, and prints the report.

use clap::Parser;
use meridian::config::Config;
use meridian::pipeline::SessionContext;
use meridian::synthetic::SyntheticGenerator;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "meridian", version, about = "Personal Health Inference Engine")]
struct Args {
    /// Config file (TOML); defaults to the standard locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Days of synthetic history to generate
    #[arg(long, default_value_t = 90)]
    days: usize,

    /// Seed for data generation and all randomized procedures
    #[arg(long)]
    seed: Option<u64>,

    /// Print the full report as JSON instead of the card summary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(seed) = args.seed {
        config.analysis.seed = seed;
    }

    init_logging(&config);
    tracing::info!("Meridian v{}", env!("CARGO_PKG_VERSION"));

    let streams = SyntheticGenerator::new(args.days, config.analysis.seed).generate()?;
    tracing::info!(days = args.days, streams = streams.len(), "Synthetic streams generated");

    let session = SessionContext::new(config.analysis, &streams)?;
    let report = session.run().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Session {} over {} days", report.session_id, report.days);
    if let Some(health) = report.health.as_ready() {
        println!(
            "Health score: {:.0}/100 ({}), trend {:?}",
            health.composite, health.grade, health.trend
        );
    }
    println!();
    for card in &report.insights {
        println!("#{} [{:?}] {}", card.rank, card.confidence, card.title);
        println!("   {}", card.narrative);
        if let Some(action) = &card.recommended_action {
            println!("   -> {}", action);
        }
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("meridian={}", config.logging.level)),
    );
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
