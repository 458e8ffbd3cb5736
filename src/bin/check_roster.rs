use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use goal_getter::validate::validate;
use goal_getter::RosterDocument;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Validate every seller of a roster file without contacting any service"
)]
struct Args {
    /// Path to the roster YAML file
    #[arg(long, default_value = "roster.yaml")]
    roster: PathBuf,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let doc = RosterDocument::load(&args.roster)
        .with_context(|| format!("failed to load roster {}", args.roster.display()))?;

    println!("store {} ({} sellers)", doc.store_id, doc.sellers.len());
    let mut invalid = 0usize;
    for seller in &doc.sellers {
        match validate(seller) {
            Ok(metrics) => println!(
                "  ok   {:<24} vendas={} pa={} ticketMedio={} corridinhaDiaria={}",
                seller.name, metrics.vendas, metrics.pa, metrics.ticket_medio, metrics.corridinha_diaria
            ),
            Err(errors) => {
                invalid += 1;
                println!("  FAIL {:<24} ({})", seller.name, seller.id);
                for (field, message) in errors.iter() {
                    println!("       {}: {}", field, message);
                }
            }
        }
    }

    if invalid > 0 {
        println!("{} of {} sellers have invalid metrics", invalid, doc.sellers.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
