//! Apply a prepared approval file to the still-unclassified artists in the
//! history, recording the outcomes in the decision ledger. Also collapses
//! duplicate artist rows before classification so reviews never target a
//! doppelganger. With `--suggest`, queries the external catalog for likely
//! matches instead, as raw material for the approval file.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use vault_reconcile::catalog;
use vault_reconcile::client::{RetryPolicy, TidalClient, TidalCredentials};
use vault_reconcile::ledger::{ApprovalFile, DecisionLedger};
use vault_reconcile::progress::set_log_only;
use vault_reconcile::reconcile::{classify_artists, discard_doppelgangers, suggest_artist_links};

#[derive(Parser)]
#[command(name = "classify-artists")]
#[command(about = "Record artist decisions from an approval file")]
struct Args {
    database: PathBuf,

    /// JSON array of {artist_name, action, catalog_artist_id?} entries
    approvals: Option<PathBuf>,

    /// Print catalog suggestions for unclassified artists and exit
    #[arg(long)]
    suggest: bool,

    #[arg(long, default_value = "cleanup_decisions.json")]
    decisions: PathBuf,

    /// Plays shown per artist review
    #[arg(long, default_value = "3")]
    samples: usize,

    #[arg(long)]
    log_only: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    let mut conn = catalog::open(&args.database)?;
    catalog::ensure_schema(&conn)?;
    let mut ledger = DecisionLedger::load(&args.decisions)?;

    if args.suggest {
        let mut client = TidalClient::new(TidalCredentials::from_env()?);
        let suggestions =
            suggest_artist_links(&conn, &ledger, &mut client, RetryPolicy::default(), 3)?;
        for (review, hits) in &suggestions {
            println!("{} ({} plays)", review.artist_name, review.play_count);
            if hits.is_empty() {
                println!("  no catalog candidates");
            }
            for hit in hits {
                println!("  {}  {}", hit.catalog_id, hit.name);
            }
        }
        return Ok(());
    }

    let approvals = match &args.approvals {
        Some(path) => path,
        None => bail!("an approval file is required unless --suggest is given"),
    };

    let removed = discard_doppelgangers(&mut conn, &mut ledger)?;
    if removed > 0 {
        println!("Removed {} duplicate artist rows", removed);
    }

    let mut source = ApprovalFile::load(approvals)?;
    let decided = classify_artists(&conn, &mut ledger, &mut source, args.samples)?;
    ledger.save(&args.decisions)?;
    println!("Recorded {} artist decisions", decided);
    Ok(())
}
