//! Read-only view of reconciliation state: overall tallies plus one page of
//! incomplete mappings for manual follow-up.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use vault_reconcile::catalog;
use vault_reconcile::models::ReconcileStats;
use vault_reconcile::store;

const PAGE_SIZE: usize = 25;

#[derive(Parser)]
#[command(name = "report")]
#[command(about = "Show reconciliation state and pending work")]
struct Args {
    database: PathBuf,

    /// Page of incomplete mappings to list (1-based)
    #[arg(default_value = "1")]
    page: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let conn = catalog::open(&args.database)?;
    catalog::ensure_schema(&conn)?;

    let counts = store::counts(&conn)?;
    let stats = ReconcileStats {
        total: counts.total,
        mapped: counts.mapped,
        incomplete: counts.incomplete,
        discarded: counts.discarded,
    };
    stats.print_summary("Reconciliation state");

    let incomplete = store::load_incomplete(&conn)?;
    let (page, pages, start) = page_window(incomplete.len(), args.page);

    println!("\nIncomplete mappings (page {}/{}):", page, pages);
    for mapping in incomplete.iter().skip(start).take(PAGE_SIZE) {
        println!(
            "  {:40} | {:30} | {}",
            truncate(&mapping.triple.track_name, 40),
            truncate(&mapping.triple.artist_name, 30),
            mapping.triple.album_name.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

/// Clamp a requested 1-based page into range and return (page, pages, start).
fn page_window(total: usize, requested: usize) -> (usize, usize, usize) {
    let pages = total.div_ceil(PAGE_SIZE).max(1);
    let page = requested.clamp(1, pages);
    (page, pages, (page - 1) * PAGE_SIZE)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_clamps_and_counts() {
        assert_eq!(page_window(0, 1), (1, 1, 0));
        assert_eq!(page_window(0, 9), (1, 1, 0));
        assert_eq!(page_window(PAGE_SIZE, 1), (1, 1, 0));
        assert_eq!(page_window(PAGE_SIZE + 1, 2), (2, 2, PAGE_SIZE));
        assert_eq!(page_window(PAGE_SIZE * 3, 99), (3, 3, PAGE_SIZE * 2));
        assert_eq!(page_window(10, 0), (1, 1, 0));
    }

    #[test]
    fn truncate_keeps_short_and_marks_long() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }
}
