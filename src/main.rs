use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use goal_getter::config::{self, Backend, Config};
use goal_getter::pipeline::{Pipeline, PipelineEvent};
use goal_getter::projection::HttpProjector;
use goal_getter::store::{HttpMetricsStore, MetricsStore, SqliteMetricsStore};
use goal_getter::{MetricField, MetricInput, RosterDocument};

#[derive(Debug, Parser)]
#[command(author, version, about = "Save seller metrics and calculate their incentives")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Roster file (defaults to app.roster_path from the config)
    #[arg(long)]
    roster: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Save every seller, then calculate all incentives and print them as JSON
    Calculate,
    /// Save the metrics of a single seller
    Save { seller_id: String },
    /// Add a seller to the roster file
    AddSeller {
        name: String,
        /// Defaults to the lowercase name
        #[arg(long, default_value = "")]
        password: String,
    },
    /// Remove a seller from the roster file
    RemoveSeller { seller_id: String },
    /// Set one metric (vendas, pa, ticketMedio, corridinhaDiaria) in the roster file
    SetMetric {
        seller_id: String,
        field: String,
        value: String,
    },
    /// Print an example configuration file
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let roster_path = args
        .roster
        .clone()
        .unwrap_or_else(|| PathBuf::from(&cfg.app.roster_path));
    let mut doc = RosterDocument::load(&roster_path)
        .with_context(|| format!("failed to load roster {}", roster_path.display()))?;

    match args.command {
        Command::Calculate => {
            let pipeline = build_pipeline(&cfg).await?;
            let progress = tokio::spawn(log_progress(pipeline.subscribe()));
            let result = pipeline
                .run_batch(&doc.sellers, &doc.store_id, &doc.goals)
                .await;
            drop(pipeline);
            if let Err(err) = progress.await {
                warn!(?err, "progress logger task failed");
            }

            let aggregate = result?;
            println!("{}", serde_json::to_string_pretty(&aggregate)?);
        }
        Command::Save { seller_id } => {
            let pipeline = build_pipeline(&cfg).await?;
            pipeline
                .save_one(&doc.sellers, &doc.store_id, &seller_id)
                .await?;
            info!(seller_id = %seller_id, "seller saved");
        }
        Command::AddSeller { name, password } => {
            let id = doc.sellers.add_seller(&name, &password)?;
            doc.save(&roster_path)?;
            println!("{id}");
        }
        Command::RemoveSeller { seller_id } => {
            let removed = doc.sellers.remove_seller(&seller_id)?;
            doc.save(&roster_path)?;
            info!(seller_id = %seller_id, name = %removed.name, "seller removed from roster");
        }
        Command::SetMetric {
            seller_id,
            field,
            value,
        } => {
            let field = MetricField::parse_field(&field)
                .ok_or_else(|| anyhow!("unknown metric field '{field}'"))?;
            let input = match value.trim().parse::<f64>() {
                Ok(n) => MetricInput::Number(n),
                Err(_) => MetricInput::Text(value),
            };
            doc.sellers.set_metric(&seller_id, field, Some(input))?;
            doc.save(&roster_path)?;
        }
        Command::ExampleConfig => unreachable!("handled before loading config"),
    }

    Ok(())
}

async fn build_pipeline(cfg: &Config) -> Result<Pipeline> {
    let store: Arc<dyn MetricsStore> = match &cfg.backend {
        Backend::Http {
            base_url,
            timeout_seconds,
        } => Arc::new(HttpMetricsStore::from_str_url(
            base_url,
            Duration::from_secs(*timeout_seconds),
        )?),
        Backend::Sqlite { .. } => {
            let url = cfg
                .backend
                .resolved_database_url()
                .ok_or_else(|| anyhow!("sqlite backend without database URL"))?;
            Arc::new(SqliteMetricsStore::connect(&url).await?)
        }
    };
    let projector = HttpProjector::new(
        &cfg.projection.base_url,
        &cfg.projection.flow,
        Duration::from_secs(cfg.projection.timeout_seconds),
    )?;
    Ok(Pipeline::new(store, Arc::new(projector)))
}

async fn log_progress(mut events: tokio::sync::broadcast::Receiver<PipelineEvent>) {
    loop {
        match events.recv().await {
            Ok(PipelineEvent::SaveFailed {
                seller_id, reason, ..
            }) => error!(seller_id = %seller_id, reason = %reason, "save failed"),
            Ok(PipelineEvent::BatchFailed { reason, .. }) => {
                error!(reason = %reason, "calculation failed")
            }
            Ok(event) => info!(event = event.as_str(), seller_id = event.seller_id(), "progress"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress events dropped"),
            Err(RecvError::Closed) => break,
        }
    }
}
