//! End-to-end harvest run: register manually linked artists, pull their
//! album listings, fill empty albums with tracks, then rescue remaining
//! incomplete mappings through catalog search. The ledger is saved after
//! every stage so an interrupted run resumes where it stopped.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use vault_reconcile::catalog;
use vault_reconcile::client::{RetryPolicy, TidalClient, TidalCredentials};
use vault_reconcile::ledger::DecisionLedger;
use vault_reconcile::progress::set_log_only;
use vault_reconcile::reconcile::{
    harvest_album_tracks, harvest_missing_albums, harvest_registered_albums,
    register_pending_artists, rescue_tracks, HarvestOptions, HarvestStats,
};

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Harvest missing albums and tracks from the external catalog")]
struct Args {
    database: PathBuf,

    #[arg(long, default_value = "cleanup_decisions.json")]
    decisions: PathBuf,

    /// Skip the search-based rescue stage
    #[arg(long)]
    no_rescue: bool,

    #[arg(long)]
    log_only: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    let conn = catalog::open(&args.database)?;
    catalog::ensure_schema(&conn)?;
    let mut ledger = DecisionLedger::load(&args.decisions)?;
    let mut client = TidalClient::new(TidalCredentials::from_env()?);
    let retry = RetryPolicy::default();
    let options = HarvestOptions::default();

    let registered = register_pending_artists(&conn, &mut ledger)?;
    ledger.save(&args.decisions)?;
    println!("Registered {} new artists", registered);

    let mut stats = HarvestStats::default();
    stats.merge(harvest_registered_albums(&conn, &mut ledger, &mut client, retry, options)?);
    ledger.save(&args.decisions)?;

    stats.merge(harvest_missing_albums(&conn, &mut client, retry, options)?);
    stats.merge(harvest_album_tracks(&conn, &mut client, retry, options)?);

    if !args.no_rescue {
        stats.merge(rescue_tracks(&conn, &mut client, retry, options)?);
    }

    println!(
        "Harvest done: {} albums, {} tracks, {} bound, {} rescued, {} failed units{}",
        stats.albums_added,
        stats.tracks_added,
        stats.bound,
        stats.rescued,
        stats.failed_units,
        if stats.tripped { " (stopped early on consecutive misses)" } else { "" }
    );
    Ok(())
}
