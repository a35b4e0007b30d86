//! Deterministic rebuild of the mapping table from exact normalized lookups
//! and ledger decisions. Safe to re-run at any time.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use vault_reconcile::catalog;
use vault_reconcile::ledger::DecisionLedger;
use vault_reconcile::progress::set_log_only;
use vault_reconcile::reconcile::regenerate_index;

#[derive(Parser)]
#[command(name = "regenerate-index")]
#[command(about = "Rebuild the mapping table deterministically")]
struct Args {
    database: PathBuf,

    #[arg(long, default_value = "cleanup_decisions.json")]
    decisions: PathBuf,

    #[arg(long)]
    log_only: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    let mut conn = catalog::open(&args.database)?;
    catalog::ensure_schema(&conn)?;
    let ledger = DecisionLedger::load(&args.decisions)?;

    let stats = regenerate_index(&mut conn, &ledger)?;
    stats.print_summary("Library index regenerated");
    Ok(())
}
