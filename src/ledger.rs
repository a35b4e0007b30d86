//! Persisted override decisions that supersede automatic matching.
//!
//! The ledger is a flat JSON document with single-writer, atomic
//! read-modify-write semantics: load the snapshot, mutate in memory, write
//! the whole document to a temp file and rename over the original. Entries
//! are never silently removed; a manual link's status only advances.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::models::HistoryTriple;
use crate::normalize::normalize;

/// Human-confirmed "this artist is not on the catalog" decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NonExistentDecision {
    pub artist_name: String,
    pub date: String,
}

/// Lifecycle of a manual artist binding: recorded, then registered in the
/// local catalog, then its albums fully harvested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualLinkStatus {
    PendingDownload,
    Registered,
    AlbumsHarvested,
}

/// Human-confirmed binding of an artist name to a specific catalog id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManualLink {
    pub artist_name: String,
    pub catalog_artist_id: String,
    pub status: ManualLinkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DecisionLedger {
    #[serde(default)]
    pub non_existent_on_catalog: Vec<NonExistentDecision>,
    #[serde(default)]
    pub manual_links: Vec<ManualLink>,
    #[serde(default)]
    pub discarded_catalog_ids: Vec<String>,
}

impl DecisionLedger {
    /// Load the ledger; a missing file is an empty ledger, not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read ledger {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("malformed ledger {}", path.display()))
    }

    /// Atomic whole-document save: temp file in the same directory, rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    /// Normalized names of all catalog-absent artists.
    pub fn non_existent_set(&self) -> FxHashSet<String> {
        self.non_existent_on_catalog
            .iter()
            .map(|d| normalize(&d.artist_name))
            .collect()
    }

    pub fn is_non_existent(&self, artist_name: &str) -> bool {
        let key = normalize(artist_name);
        self.non_existent_on_catalog
            .iter()
            .any(|d| normalize(&d.artist_name) == key)
    }

    pub fn mark_non_existent(&mut self, artist_name: &str) {
        if !self.is_non_existent(artist_name) {
            self.non_existent_on_catalog.push(NonExistentDecision {
                artist_name: artist_name.to_string(),
                date: now_stamp(),
            });
        }
    }

    pub fn manual_link(&self, artist_name: &str) -> Option<&ManualLink> {
        let key = normalize(artist_name);
        self.manual_links.iter().find(|m| normalize(&m.artist_name) == key)
    }

    pub fn add_manual_link(&mut self, artist_name: &str, catalog_artist_id: &str, notes: Option<String>) {
        if self.manual_link(artist_name).is_none() {
            self.manual_links.push(ManualLink {
                artist_name: artist_name.to_string(),
                catalog_artist_id: catalog_artist_id.to_string(),
                status: ManualLinkStatus::PendingDownload,
                notes,
            });
        }
    }

    pub fn links_with_status(&self, status: ManualLinkStatus) -> Vec<ManualLink> {
        self.manual_links.iter().filter(|m| m.status == status).cloned().collect()
    }

    /// Advance a manual link's status. Statuses never regress.
    pub fn set_link_status(&mut self, artist_name: &str, status: ManualLinkStatus) {
        let key = normalize(artist_name);
        for link in &mut self.manual_links {
            if normalize(&link.artist_name) == key {
                let advance = matches!(
                    (link.status, status),
                    (ManualLinkStatus::PendingDownload, ManualLinkStatus::Registered)
                        | (ManualLinkStatus::PendingDownload, ManualLinkStatus::AlbumsHarvested)
                        | (ManualLinkStatus::Registered, ManualLinkStatus::AlbumsHarvested)
                );
                if advance {
                    link.status = status;
                }
            }
        }
    }

    pub fn add_discarded(&mut self, catalog_id: &str) {
        if !self.is_discarded(catalog_id) {
            self.discarded_catalog_ids.push(catalog_id.to_string());
        }
    }

    pub fn is_discarded(&self, catalog_id: &str) -> bool {
        self.discarded_catalog_ids.iter().any(|d| d == catalog_id)
    }
}

fn now_stamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_default()
}

// ============================================================================
// Decision sources
// ============================================================================

/// Everything a reviewer needs to classify one unknown artist: the name,
/// how often it appears in history, and a few example plays.
#[derive(Clone, Debug)]
pub struct ArtistReview {
    pub artist_name: String,
    pub play_count: usize,
    pub samples: Vec<HistoryTriple>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    NonExistent,
    Link { catalog_artist_id: String },
    Skip,
}

/// Where classification decisions come from. The pipeline never assumes an
/// interactive terminal; any source that can answer reviews works.
pub trait DecisionSource {
    fn decide(&mut self, review: &ArtistReview) -> Option<Decision>;
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ApprovalAction {
    NonExistent,
    Link,
    Skip,
}

#[derive(Clone, Debug, Deserialize)]
struct ApprovalEntry {
    artist_name: String,
    action: ApprovalAction,
    #[serde(default)]
    catalog_artist_id: Option<String>,
}

/// Batch decision source: a JSON array of approval entries prepared offline.
pub struct ApprovalFile {
    by_artist: FxHashMap<String, ApprovalEntry>,
}

impl ApprovalFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read approval file {}", path.display()))?;
        let entries: Vec<ApprovalEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("malformed approval file {}", path.display()))?;
        let mut by_artist = FxHashMap::default();
        for e in entries {
            by_artist.insert(normalize(&e.artist_name), e);
        }
        Ok(Self { by_artist })
    }
}

impl DecisionSource for ApprovalFile {
    fn decide(&mut self, review: &ArtistReview) -> Option<Decision> {
        let entry = self.by_artist.get(&normalize(&review.artist_name))?;
        match entry.action {
            ApprovalAction::NonExistent => Some(Decision::NonExistent),
            ApprovalAction::Skip => Some(Decision::Skip),
            ApprovalAction::Link => entry
                .catalog_artist_id
                .clone()
                .map(|id| Decision::Link { catalog_artist_id: id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("ledger-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("decisions.json");

        let mut ledger = DecisionLedger::default();
        ledger.mark_non_existent("Ghost Band");
        ledger.add_manual_link("The Weeknd", "cat-123", None);
        ledger.add_discarded("cat-999");
        ledger.save(&path).unwrap();

        assert!(!path.with_extension("json.tmp").exists());

        let loaded = DecisionLedger::load(&path).unwrap();
        assert!(loaded.is_non_existent("ghost band"));
        assert_eq!(loaded.manual_link("the weeknd").unwrap().catalog_artist_id, "cat-123");
        assert!(loaded.is_discarded("cat-999"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_empty_ledger() {
        let ledger = DecisionLedger::load(Path::new("/nonexistent/decisions.json")).unwrap();
        assert!(ledger.manual_links.is_empty());
    }

    #[test]
    fn duplicate_decisions_are_ignored() {
        let mut ledger = DecisionLedger::default();
        ledger.mark_non_existent("Ghost Band");
        ledger.mark_non_existent("ghost band");
        assert_eq!(ledger.non_existent_on_catalog.len(), 1);

        ledger.add_discarded("x");
        ledger.add_discarded("x");
        assert_eq!(ledger.discarded_catalog_ids.len(), 1);
    }

    #[test]
    fn link_status_only_advances() {
        let mut ledger = DecisionLedger::default();
        ledger.add_manual_link("Band", "cat-1", None);
        ledger.set_link_status("Band", ManualLinkStatus::Registered);
        assert_eq!(ledger.manual_link("Band").unwrap().status, ManualLinkStatus::Registered);
        // No regression back to pending.
        ledger.set_link_status("Band", ManualLinkStatus::PendingDownload);
        assert_eq!(ledger.manual_link("Band").unwrap().status, ManualLinkStatus::Registered);
        ledger.set_link_status("Band", ManualLinkStatus::AlbumsHarvested);
        assert_eq!(ledger.manual_link("Band").unwrap().status, ManualLinkStatus::AlbumsHarvested);
    }

    #[test]
    fn approval_file_decisions() {
        let dir = std::env::temp_dir().join(format!("approval-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("approvals.json");
        std::fs::write(
            &path,
            r#"[
                {"artist_name": "Ghost Band", "action": "non_existent"},
                {"artist_name": "Real Band", "action": "link", "catalog_artist_id": "cat-7"},
                {"artist_name": "Later Band", "action": "skip"},
                {"artist_name": "Broken", "action": "link"}
            ]"#,
        )
        .unwrap();

        let mut source = ApprovalFile::load(&path).unwrap();
        let review = |name: &str| ArtistReview {
            artist_name: name.to_string(),
            play_count: 1,
            samples: Vec::new(),
        };

        assert_eq!(source.decide(&review("ghost band")), Some(Decision::NonExistent));
        assert_eq!(
            source.decide(&review("Real Band")),
            Some(Decision::Link { catalog_artist_id: "cat-7".into() })
        );
        assert_eq!(source.decide(&review("Later Band")), Some(Decision::Skip));
        assert_eq!(source.decide(&review("Broken")), None);
        assert_eq!(source.decide(&review("Unknown")), None);

        std::fs::remove_dir_all(&dir).ok();
    }
}
