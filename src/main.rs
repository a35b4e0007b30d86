use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use vault_reconcile::catalog;
use vault_reconcile::ledger::DecisionLedger;
use vault_reconcile::progress::{format_duration, set_log_only};
use vault_reconcile::reconcile::generate_mappings;
use vault_reconcile::scoring::MatchConfig;

#[derive(Parser)]
#[command(name = "vault-reconcile")]
#[command(about = "Fuzzy-match play history against the local catalog")]
struct Args {
    /// Catalog database holding play history, catalog rows, and mappings
    database: PathBuf,

    /// Decision ledger (missing file is treated as empty)
    #[arg(long, default_value = "cleanup_decisions.json")]
    decisions: PathBuf,

    /// Acceptance threshold for fuzzy matches
    #[arg(long, default_value = "0.9")]
    threshold: f64,

    /// Hide progress bars for tail-friendly output
    #[arg(long)]
    log_only: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    let mut conn = catalog::open(&args.database)?;
    catalog::ensure_schema(&conn)?;
    let ledger = DecisionLedger::load(&args.decisions)?;

    let config = MatchConfig {
        accept_threshold: args.threshold,
    };
    let stats = generate_mappings(&mut conn, &ledger, config)?;
    stats.log_phase("match");
    println!(
        "Matched {}/{} triples ({:.1}%) in {}, {} fast, {} deep, {} deep scans",
        stats.accepted,
        stats.total_triples,
        stats.match_rate(),
        format_duration(std::time::Duration::from_secs_f64(stats.elapsed_seconds)),
        stats.fast_hits,
        stats.deep_hits,
        stats.deep_scans
    );
    Ok(())
}
