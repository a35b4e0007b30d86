//! Reconciliation passes: fuzzy match generation, deterministic index
//! regeneration, artist classification, and the harvest/rescue drivers that
//! pull missing catalog rows from the external API.
//!
//! All passes are single-threaded. Network-bound loops work in small units,
//! checkpoint after each one, and isolate per-unit failures so one bad
//! artist or album never aborts a long run.

use std::time::{Duration, Instant};

use anyhow::Result;
use rusqlite::Connection;
use rustc_hash::FxHashMap;

use crate::catalog;
use crate::client::{CatalogClient, ClientError, RemoteArtist, RemoteTrack, RetryPolicy};
use crate::ledger::{ArtistReview, Decision, DecisionLedger, DecisionSource, ManualLinkStatus};
use crate::matcher::{CatalogIndex, Matcher};
use crate::models::{
    CatalogAlbum, Link, Mapping, MappingStatus, MatchStats, ReconcileStats, SearchPhase,
};
use crate::normalize::{normalize, normalize_album_key, normalize_compact};
use crate::progress::{create_progress_bar, create_spinner, log_progress};
use crate::scoring::{flexible_match, EditTolerance, MatchConfig};
use crate::store;

/// Stop a harvest loop after this many consecutive units that yield nothing.
pub const MAX_CONSECUTIVE_MISSES: usize = 10;

/// How many rescue lookups run between inter-batch pauses.
pub const RESCUE_BATCH_SIZE: usize = 3;

const SEARCH_LIMIT: usize = 10;

/// Pacing knobs for network-bound passes.
#[derive(Clone, Copy, Debug)]
pub struct HarvestOptions {
    pub page_delay: Duration,
    pub batch_delay: Duration,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            page_delay: Duration::from_millis(500),
            batch_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct HarvestStats {
    pub albums_added: usize,
    pub tracks_added: usize,
    /// Mappings bound to a freshly harvested album track.
    pub bound: usize,
    /// Mappings bound through search rescue.
    pub rescued: usize,
    pub failed_units: usize,
    /// True when a loop stopped early on consecutive misses.
    pub tripped: bool,
}

impl HarvestStats {
    pub fn merge(&mut self, other: HarvestStats) {
        self.albums_added += other.albums_added;
        self.tracks_added += other.tracks_added;
        self.bound += other.bound;
        self.rescued += other.rescued;
        self.failed_units += other.failed_units;
        self.tripped |= other.tripped;
    }
}

// ============================================================================
// Match pass
// ============================================================================

/// Fuzzy-match every distinct history triple against the local catalog and
/// rewrite the mapping table. Ledger-discarded artists bypass matching.
pub fn generate_mappings(
    conn: &mut Connection,
    ledger: &DecisionLedger,
    config: MatchConfig,
) -> Result<MatchStats> {
    let start = Instant::now();
    let index = CatalogIndex::build(catalog::load_candidates(conn)?);
    let triples = catalog::unique_history_triples(conn)?;
    let ghosts = ledger.non_existent_set();

    let mut matcher = Matcher::new(&index, config);
    let mut stats = MatchStats {
        total_triples: triples.len(),
        ..Default::default()
    };
    let mut mappings = Vec::with_capacity(triples.len());

    let pb = create_progress_bar(triples.len() as u64, "Matching history");
    for (i, (triple, _plays)) in triples.iter().enumerate() {
        let mut mapping = Mapping::unresolved(triple.clone());
        if ghosts.contains(&normalize(&triple.artist_name)) {
            mapping.artist = Link::Absent;
            mapping.album = Link::Absent;
            mapping.track = Link::Absent;
            mapping.status = MappingStatus::Discarded;
        } else {
            let outcome = matcher.best_match(&triple.artist_name, &triple.track_name);
            match outcome.candidate {
                Some(idx) => {
                    let c = index.candidate(idx);
                    mapping.artist = Link::Id(c.artist_id.clone());
                    mapping.album = Link::Id(c.album_id.clone());
                    mapping.track = Link::Id(c.track_id.clone());
                    mapping.confidence = outcome.score;
                    mapping.phase = outcome.phase;
                    mapping.derive_status();
                    stats.accepted += 1;
                    match outcome.phase {
                        SearchPhase::Fast => stats.fast_hits += 1,
                        SearchPhase::Deep => stats.deep_hits += 1,
                        SearchPhase::None => {}
                    }
                }
                None => stats.unmatched += 1,
            }
        }
        mappings.push(mapping);
        pb.inc(1);
        log_progress("match", (i + 1) as u64, triples.len() as u64, 1000);
    }
    pb.finish_and_clear();

    store::rewrite_all(conn, &mappings)?;
    stats.deep_scans = matcher.counters.deep_scans;
    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    Ok(stats)
}

// ============================================================================
// Deterministic regeneration
// ============================================================================

/// Rebuild the mapping table from exact normalized lookups and ledger
/// decisions. Links already resolved in the previous table are kept and
/// only the null ones are filled, so manual and rescued bindings survive.
/// No fuzzy scoring, so two runs over the same inputs produce identical
/// tables.
pub fn regenerate_index(conn: &mut Connection, ledger: &DecisionLedger) -> Result<ReconcileStats> {
    let triples = catalog::unique_history_triples(conn)?;
    let ghosts = ledger.non_existent_set();
    let prior: FxHashMap<_, _> = store::load_all(conn)?
        .into_iter()
        .map(|m| (m.triple.clone(), m))
        .collect();
    let mut mappings = Vec::with_capacity(triples.len());

    let pb = create_progress_bar(triples.len() as u64, "Regenerating index");
    for (triple, _plays) in &triples {
        let mut mapping = prior
            .get(triple)
            .cloned()
            .unwrap_or_else(|| Mapping::unresolved(triple.clone()));
        if ghosts.contains(&normalize(&triple.artist_name)) {
            mapping.artist = Link::Absent;
            mapping.album = Link::Absent;
            mapping.track = Link::Absent;
            mapping.status = MappingStatus::Discarded;
        } else {
            // The ledger entry behind an old discard may be gone; start over.
            if mapping.status == MappingStatus::Discarded {
                mapping = Mapping::unresolved(triple.clone());
            }
            // A kept link may point at a row a cleanup pass has deleted.
            if let Some(track_id) = mapping.track.id() {
                if !catalog::track_exists(conn, track_id)? {
                    let triple = mapping.triple.clone();
                    mapping = Mapping::unresolved(triple);
                }
            }
            resolve_exact(conn, ledger, &mut mapping)?;
            mapping.derive_status();
        }
        mappings.push(mapping);
        pb.inc(1);
    }
    pb.finish_and_clear();

    store::rewrite_all(conn, &mappings)?;
    let counts = store::counts(conn)?;
    Ok(ReconcileStats {
        total: counts.total,
        mapped: counts.mapped,
        incomplete: counts.incomplete,
        discarded: counts.discarded,
    })
}

/// Fill a mapping's unresolved links from exact normalized keys: artist by
/// clean name (or the ledger's manual binding), album by aggressive title
/// key, track by compact title within the artist's albums. Links already
/// set are never overwritten.
fn resolve_exact(conn: &Connection, ledger: &DecisionLedger, mapping: &mut Mapping) -> Result<()> {
    if mapping.track.id().is_some() {
        return Ok(());
    }
    let triple = &mapping.triple;

    let artist_id = match mapping.artist.id() {
        Some(id) => id.to_string(),
        None => {
            let mut artist = catalog::artist_by_clean_name(conn, &triple.artist_name)?;
            if artist.is_none() {
                if let Some(link) = ledger.manual_link(&triple.artist_name) {
                    artist = catalog::artist_by_catalog_id(conn, &link.catalog_artist_id)?;
                }
            }
            match artist {
                Some(a) => a.id,
                None => return Ok(()),
            }
        }
    };
    mapping.artist = Link::Id(artist_id.clone());

    let named_album = match mapping.album.id() {
        Some(id) => catalog::album_by_id(conn, id)?,
        None => {
            let album_keys = catalog::album_keys_for_artist(conn, &artist_id)?;
            triple
                .album_name
                .as_deref()
                .and_then(|name| album_keys.get(&normalize_album_key(name)).cloned())
        }
    };

    let track_key = normalize_compact(&triple.track_name);
    // Prefer the named album; fall back to scanning the artist's catalog.
    let mut hit: Option<(String, String)> = None;
    if let Some(album) = &named_album {
        if let Some(track) = catalog::track_keys_for_album(conn, &album.id)?.get(&track_key) {
            hit = Some((album.id.clone(), track.id.clone()));
        }
    }
    if hit.is_none() {
        for album in catalog::albums_for_artist(conn, &artist_id)? {
            if let Some(track) = catalog::track_keys_for_album(conn, &album.id)?.get(&track_key) {
                hit = Some((album.id, track.id.clone()));
                break;
            }
        }
    }

    match hit {
        Some((album_id, track_id)) => {
            mapping.album = Link::Id(album_id);
            mapping.track = Link::Id(track_id);
            mapping.confidence = 1.0;
        }
        None => {
            if let Some(album) = named_album {
                mapping.album = Link::Id(album.id);
            }
        }
    }
    Ok(())
}

// ============================================================================
// Artist classification
// ============================================================================

/// Unclassified artists from the incomplete mappings, most-played first,
/// each with a few sample plays. Already-decided artists are excluded.
pub fn collect_unclassified(
    conn: &Connection,
    ledger: &DecisionLedger,
    sample_size: usize,
) -> Result<Vec<ArtistReview>> {
    let unresolved: Vec<Mapping> = store::load_incomplete(conn)?
        .into_iter()
        .filter(|m| m.artist.is_unresolved())
        .collect();

    let mut plays_by_artist: FxHashMap<String, usize> = FxHashMap::default();
    for (triple, plays) in catalog::unique_history_triples(conn)? {
        *plays_by_artist.entry(normalize(&triple.artist_name)).or_default() += plays;
    }

    // Group by normalized artist, keeping the first display spelling seen.
    let mut reviews: Vec<ArtistReview> = Vec::new();
    let mut seen: FxHashMap<String, usize> = FxHashMap::default();
    for mapping in &unresolved {
        let key = normalize(&mapping.triple.artist_name);
        if ledger.is_non_existent(&mapping.triple.artist_name)
            || ledger.manual_link(&mapping.triple.artist_name).is_some()
        {
            continue;
        }
        match seen.get(&key) {
            Some(&idx) => {
                let review = &mut reviews[idx];
                if review.samples.len() < sample_size {
                    review.samples.push(mapping.triple.clone());
                }
            }
            None => {
                seen.insert(key.clone(), reviews.len());
                reviews.push(ArtistReview {
                    artist_name: mapping.triple.artist_name.clone(),
                    play_count: plays_by_artist.get(&key).copied().unwrap_or(0),
                    samples: vec![mapping.triple.clone()],
                });
            }
        }
    }
    reviews.sort_by(|a, b| {
        b.play_count
            .cmp(&a.play_count)
            .then_with(|| a.artist_name.cmp(&b.artist_name))
    });
    Ok(reviews)
}

/// Feed every still-unresolved artist through a decision source, most-played
/// first. Decisions land in the ledger; the caller persists it.
pub fn classify_artists(
    conn: &Connection,
    ledger: &mut DecisionLedger,
    source: &mut dyn DecisionSource,
    sample_size: usize,
) -> Result<usize> {
    let reviews = collect_unclassified(conn, ledger, sample_size)?;
    let mut decided = 0;
    for review in &reviews {
        match source.decide(review) {
            Some(Decision::NonExistent) => {
                ledger.mark_non_existent(&review.artist_name);
                decided += 1;
            }
            Some(Decision::Link { catalog_artist_id }) => {
                ledger.add_manual_link(&review.artist_name, &catalog_artist_id, None);
                decided += 1;
            }
            Some(Decision::Skip) | None => {}
        }
    }
    Ok(decided)
}

/// Candidate catalog artists for each unclassified name, for building an
/// approval file. Read-only: nothing is written to the ledger.
pub fn suggest_artist_links<C: CatalogClient>(
    conn: &Connection,
    ledger: &DecisionLedger,
    client: &mut C,
    retry: RetryPolicy,
    per_artist: usize,
) -> Result<Vec<(ArtistReview, Vec<RemoteArtist>)>> {
    let mut suggestions = Vec::new();
    let spinner = create_spinner("Searching catalog");
    for review in collect_unclassified(conn, ledger, 1)? {
        spinner.set_message(format!("Searching catalog: {}", review.artist_name));
        let hits = match retry.run(|| client.search_artists(&review.artist_name, per_artist)) {
            Ok(hits) => hits,
            Err(err @ ClientError::Auth(_)) => return Err(err.into()),
            Err(err) => {
                eprintln!("[suggest] search for '{}' failed: {}", review.artist_name, err);
                Vec::new()
            }
        };
        suggestions.push((review, hits));
    }
    spinner.finish_and_clear();
    Ok(suggestions)
}

// ============================================================================
// Harvest drivers
// ============================================================================

/// Create local artist rows for manual links still pending, skipping ids the
/// ledger has discarded and names the catalog already holds.
pub fn register_pending_artists(
    conn: &Connection,
    ledger: &mut DecisionLedger,
) -> Result<usize> {
    let mut registered = 0;
    for link in ledger.links_with_status(ManualLinkStatus::PendingDownload) {
        if ledger.is_discarded(&link.catalog_artist_id) {
            continue;
        }
        let exists = catalog::artist_by_catalog_id(conn, &link.catalog_artist_id)?.is_some()
            || catalog::artist_by_clean_name(conn, &link.artist_name)?.is_some();
        if !exists {
            catalog::insert_artist(conn, &link.artist_name, Some(&link.catalog_artist_id))?;
            registered += 1;
        }
        ledger.set_link_status(&link.artist_name, ManualLinkStatus::Registered);
    }
    Ok(registered)
}

/// Walk every registered artist's album listing and insert the albums the
/// catalog is missing. Each artist is one failure-isolated unit.
pub fn harvest_registered_albums<C: CatalogClient>(
    conn: &Connection,
    ledger: &mut DecisionLedger,
    client: &mut C,
    retry: RetryPolicy,
    options: HarvestOptions,
) -> Result<HarvestStats> {
    let mut stats = HarvestStats::default();
    for link in ledger.links_with_status(ManualLinkStatus::Registered) {
        let artist = match catalog::artist_by_catalog_id(conn, &link.catalog_artist_id)? {
            Some(a) => a,
            None => continue,
        };
        match harvest_artist_albums(conn, client, retry, options, &artist.id, &link.catalog_artist_id)
        {
            Ok(added) => {
                stats.albums_added += added;
                ledger.set_link_status(&link.artist_name, ManualLinkStatus::AlbumsHarvested);
            }
            Err(err @ ClientError::Auth(_)) => return Err(err.into()),
            Err(err) => {
                eprintln!("[harvest] albums for '{}' failed: {}", link.artist_name, err);
                stats.failed_units += 1;
            }
        }
    }
    Ok(stats)
}

fn harvest_artist_albums<C: CatalogClient>(
    conn: &Connection,
    client: &mut C,
    retry: RetryPolicy,
    options: HarvestOptions,
    artist_id: &str,
    artist_catalog_id: &str,
) -> Result<usize, ClientError> {
    let mut added = 0;
    let mut cursor: Option<String> = None;
    loop {
        let page = retry.run(|| client.artist_albums(artist_catalog_id, cursor.as_deref()))?;
        for album in &page.items {
            let inserted = catalog::insert_album_if_new(conn, artist_id, &album.title, &album.catalog_id)
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            if inserted.is_some() {
                added += 1;
            }
        }
        match page.next_cursor {
            Some(next) => {
                cursor = Some(next);
                std::thread::sleep(options.page_delay);
            }
            None => return Ok(added),
        }
    }
}

/// Scoped album harvest: for incomplete mappings whose artist is resolved
/// but whose named album is not, walk that artist's catalog listing and
/// insert only albums that flex-match a wanted title. Same breaker as the
/// other loops.
pub fn harvest_missing_albums<C: CatalogClient>(
    conn: &Connection,
    client: &mut C,
    retry: RetryPolicy,
    options: HarvestOptions,
) -> Result<HarvestStats> {
    // Wanted album titles grouped per resolved artist.
    let mut wanted: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for mapping in store::load_incomplete(conn)? {
        if !mapping.album.is_unresolved() {
            continue;
        }
        if let (Some(artist_id), Some(album_name)) =
            (mapping.artist.id(), mapping.triple.album_name.as_deref())
        {
            wanted
                .entry(artist_id.to_string())
                .or_default()
                .push(album_name.to_string());
        }
    }
    let mut artist_ids: Vec<String> = wanted.keys().cloned().collect();
    artist_ids.sort();

    let mut stats = HarvestStats::default();
    let mut consecutive_misses = 0;
    for artist_id in artist_ids {
        let artist = match catalog::artist_by_id(conn, &artist_id)? {
            Some(a) => a,
            None => continue,
        };
        let catalog_id = match &artist.catalog_id {
            Some(id) => id.clone(),
            None => continue,
        };
        let titles = &wanted[&artist_id];
        let unit = harvest_wanted_albums(conn, client, retry, options, &artist_id, &catalog_id, titles);
        match unit {
            Ok(added) if added > 0 => {
                stats.albums_added += added;
                consecutive_misses = 0;
            }
            Ok(_) => consecutive_misses += 1,
            Err(err @ ClientError::Auth(_)) => return Err(err.into()),
            Err(err) => {
                eprintln!("[harvest] missing albums for '{}' failed: {}", artist.name, err);
                stats.failed_units += 1;
                consecutive_misses += 1;
            }
        }
        if consecutive_misses >= MAX_CONSECUTIVE_MISSES {
            stats.tripped = true;
            break;
        }
    }
    Ok(stats)
}

fn harvest_wanted_albums<C: CatalogClient>(
    conn: &Connection,
    client: &mut C,
    retry: RetryPolicy,
    options: HarvestOptions,
    artist_id: &str,
    artist_catalog_id: &str,
    wanted_titles: &[String],
) -> Result<usize, ClientError> {
    let mut added = 0;
    let mut cursor: Option<String> = None;
    loop {
        let page = retry.run(|| client.artist_albums(artist_catalog_id, cursor.as_deref()))?;
        for album in &page.items {
            let is_wanted = wanted_titles
                .iter()
                .any(|w| flexible_match(w, &album.title, EditTolerance::Strict));
            if !is_wanted {
                continue;
            }
            let inserted =
                catalog::insert_album_if_new(conn, artist_id, &album.title, &album.catalog_id)
                    .map_err(|e| ClientError::Decode(e.to_string()))?;
            if inserted.is_some() {
                added += 1;
            }
        }
        match page.next_cursor {
            Some(next) => {
                cursor = Some(next);
                std::thread::sleep(options.page_delay);
            }
            None => return Ok(added),
        }
    }
}

/// Fill track listings for albums that incomplete mappings point at, then
/// bind those mappings to the freshly inserted tracks. Each album is one
/// failure-isolated unit and a checkpoint; the loop stops early after
/// `MAX_CONSECUTIVE_MISSES` albums in a row yield nothing.
pub fn harvest_album_tracks<C: CatalogClient>(
    conn: &Connection,
    client: &mut C,
    retry: RetryPolicy,
    options: HarvestOptions,
) -> Result<HarvestStats> {
    let pending = store::load_incomplete(conn)?;
    let mut album_ids: Vec<String> = pending
        .iter()
        .filter(|m| m.track.is_unresolved())
        .filter_map(|m| m.album.id().map(str::to_string))
        .collect();
    album_ids.sort();
    album_ids.dedup();

    let mut stats = HarvestStats::default();
    let mut consecutive_misses = 0;
    for album_id in album_ids {
        let album = match catalog::album_by_id(conn, &album_id)? {
            Some(a) => a,
            None => continue,
        };
        let catalog_id = match &album.catalog_id {
            Some(id) => id.clone(),
            None => continue,
        };
        let unit = harvest_one_album(conn, client, retry, options, &album.id, &catalog_id);
        let mut progressed = false;
        match unit {
            Ok(added) => {
                stats.tracks_added += added;
                progressed = added > 0;
            }
            Err(err @ ClientError::Auth(_)) => return Err(err.into()),
            Err(err) => {
                eprintln!("[harvest] tracks for '{}' failed: {}", album.title, err);
                stats.failed_units += 1;
            }
        }

        let bound = bind_pending_for_album(conn, &pending, &album)?;
        stats.bound += bound;
        progressed |= bound > 0;

        if progressed {
            consecutive_misses = 0;
        } else {
            consecutive_misses += 1;
        }
        if consecutive_misses >= MAX_CONSECUTIVE_MISSES {
            stats.tripped = true;
            break;
        }
    }
    Ok(stats)
}

/// Bind every pending mapping pointing at `album` whose track title now
/// resolves against the album's listing. Compact-key equality first, then a
/// flexible scan for decorated titles.
fn bind_pending_for_album(
    conn: &Connection,
    pending: &[Mapping],
    album: &CatalogAlbum,
) -> Result<usize> {
    let tracks = catalog::tracks_for_album(conn, &album.id)?;
    let keys = catalog::track_keys_for_album(conn, &album.id)?;
    let mut bound = 0;
    for mapping in pending {
        if mapping.album.id() != Some(album.id.as_str()) || !mapping.track.is_unresolved() {
            continue;
        }
        let compact = normalize_compact(&mapping.triple.track_name);
        let track = keys.get(&compact).or_else(|| {
            tracks
                .iter()
                .find(|t| flexible_match(&mapping.triple.track_name, &t.title, EditTolerance::Strict))
        });
        if let Some(track) = track {
            store::bind_track(conn, &mapping.triple, &album.artist_id, &album.id, &track.id, 1.0)?;
            bound += 1;
        }
    }
    Ok(bound)
}

fn harvest_one_album<C: CatalogClient>(
    conn: &Connection,
    client: &mut C,
    retry: RetryPolicy,
    options: HarvestOptions,
    album_id: &str,
    album_catalog_id: &str,
) -> Result<usize, ClientError> {
    let mut added = 0;
    let mut cursor: Option<String> = None;
    loop {
        let page = retry.run(|| client.album_tracks(album_catalog_id, cursor.as_deref()))?;
        for track in &page.items {
            if insert_remote_track(conn, album_id, track)
                .map_err(|e| ClientError::Decode(e.to_string()))?
            {
                added += 1;
            }
        }
        match page.next_cursor {
            Some(next) => {
                cursor = Some(next);
                std::thread::sleep(options.page_delay);
            }
            None => return Ok(added),
        }
    }
}

fn insert_remote_track(conn: &Connection, album_id: &str, track: &RemoteTrack) -> Result<bool> {
    let inserted = catalog::insert_track_if_new(
        conn,
        album_id,
        &catalog::NewTrack {
            title: &track.title,
            catalog_id: &track.catalog_id,
            isrc: track.isrc.as_deref(),
            track_number: track.track_number,
            volume_number: track.volume_number,
        },
    )?;
    Ok(inserted.is_some())
}

/// Search-based rescue for incomplete mappings whose artist is already
/// resolved. Runs in small batches with a pause between them, binding each
/// rescued track immediately so progress survives interruption.
pub fn rescue_tracks<C: CatalogClient>(
    conn: &Connection,
    client: &mut C,
    retry: RetryPolicy,
    options: HarvestOptions,
) -> Result<HarvestStats> {
    let mut stats = HarvestStats::default();
    let mut consecutive_misses = 0;
    let pending: Vec<Mapping> = store::load_incomplete(conn)?
        .into_iter()
        .filter(|m| m.artist.id().is_some())
        .collect();

    'outer: for batch in pending.chunks(RESCUE_BATCH_SIZE) {
        for mapping in batch {
            match rescue_one(conn, client, retry, mapping) {
                Ok(true) => {
                    stats.rescued += 1;
                    consecutive_misses = 0;
                }
                Ok(false) => consecutive_misses += 1,
                Err(err @ ClientError::Auth(_)) => return Err(err.into()),
                Err(err) => {
                    eprintln!(
                        "[rescue] '{}' by '{}' failed: {}",
                        mapping.triple.track_name, mapping.triple.artist_name, err
                    );
                    stats.failed_units += 1;
                    consecutive_misses += 1;
                }
            }
            if consecutive_misses >= MAX_CONSECUTIVE_MISSES {
                stats.tripped = true;
                break 'outer;
            }
        }
        std::thread::sleep(options.batch_delay);
    }
    Ok(stats)
}

fn rescue_one<C: CatalogClient>(
    conn: &Connection,
    client: &mut C,
    retry: RetryPolicy,
    mapping: &Mapping,
) -> Result<bool, ClientError> {
    let triple = &mapping.triple;
    let artist_id = match mapping.artist.id() {
        Some(id) => id,
        None => return Ok(false),
    };
    let query = format!("{} {}", triple.track_name, triple.artist_name);
    let results = retry.run(|| client.search_tracks(&query, SEARCH_LIMIT))?;

    for candidate in results {
        if !flexible_match(&triple.track_name, &candidate.title, EditTolerance::Strict) {
            continue;
        }
        // Hydrate when search results omit the performing artist.
        let hydrated;
        let full = if candidate.artist_name.is_some() {
            &candidate
        } else {
            hydrated = retry.run(|| client.track_details(&candidate.catalog_id))?;
            &hydrated
        };
        let artist_ok = full
            .artist_name
            .as_deref()
            .map(|name| flexible_match(&triple.artist_name, name, EditTolerance::Lenient))
            .unwrap_or(false);
        if !artist_ok {
            continue;
        }
        let album_catalog_id = match &full.album_catalog_id {
            Some(id) => id.clone(),
            None => continue,
        };
        // Only bind into albums this catalog already knows.
        let album = match catalog::album_by_catalog_id(conn, &album_catalog_id)
            .map_err(|e| ClientError::Decode(e.to_string()))?
        {
            Some(a) if a.artist_id == artist_id => a,
            _ => continue,
        };
        insert_remote_track(conn, &album.id, full).map_err(|e| ClientError::Decode(e.to_string()))?;
        let track = catalog::track_by_catalog_id(conn, &full.catalog_id)
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let track = match track {
            Some(t) => t,
            // Duplicate compact title under another row; reuse it.
            None => match catalog::track_keys_for_album(conn, &album.id)
                .map_err(|e| ClientError::Decode(e.to_string()))?
                .get(&normalize_compact(&full.title))
            {
                Some(t) => t.clone(),
                None => continue,
            },
        };
        store::bind_track(conn, triple, artist_id, &album.id, &track.id, 1.0)
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        return Ok(true);
    }
    Ok(false)
}

// ============================================================================
// Doppelganger cleanup
// ============================================================================

/// Collapse artists that normalize to the same name. The survivor is the
/// one the ledger manually links, else the one with an external id (lowest
/// row id breaks ties); the rest are deleted with their albums and tracks,
/// and their external ids are discarded in the ledger so later harvests
/// never resurrect them.
pub fn discard_doppelgangers(
    conn: &mut Connection,
    ledger: &mut DecisionLedger,
) -> Result<usize> {
    let mut removed = 0;
    for mut group in catalog::duplicate_artist_groups(conn)? {
        let linked = ledger
            .manual_link(&group[0].name)
            .map(|l| l.catalog_artist_id.clone());
        group.sort_by(|a, b| {
            let a_linked = a.catalog_id.as_deref() == linked.as_deref() && linked.is_some();
            let b_linked = b.catalog_id.as_deref() == linked.as_deref() && linked.is_some();
            b_linked
                .cmp(&a_linked)
                .then_with(|| b.catalog_id.is_some().cmp(&a.catalog_id.is_some()))
                .then_with(|| a.id.cmp(&b.id))
        });
        for loser in &group[1..] {
            if let Some(catalog_id) = &loser.catalog_id {
                ledger.add_discarded(catalog_id);
            }
            catalog::delete_artist_cascade(conn, &loser.id)?;
            removed += 1;
        }
    }
    Ok(removed)
}
