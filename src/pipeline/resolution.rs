//! Catalog resolution
//!
//! Walks staged candidates in generation order, looks each one up in the
//! catalog and greedily accepts tracks until the running duration reaches
//! the workout's. Candidates resolved on a previous run (or known to be
//! missing from the catalog) are not searched again.

use std::collections::HashSet;
use tracing::debug;

use super::services::MusicSession;
use crate::error::PipelineResult;
use crate::store::{Lookup, Track};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedTrack {
    pub track_id: i64,
    pub uri: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// In playlist order
    pub accepted: Vec<AcceptedTrack>,
    pub total_ms: i64,
    pub target_met: bool,
    /// Every candidate was considered without reaching the target
    pub exhausted: bool,
}

impl Resolution {
    pub fn accepted_ids(&self) -> Vec<i64> {
        self.accepted.iter().map(|track| track.track_id).collect()
    }

    /// Whether another round of candidates is worth asking for
    pub fn needs_extension(&self, rounds_used: u32, max_rounds: u32) -> bool {
        !self.target_met && self.exhausted && rounds_used < max_rounds
    }
}

/// Catalog match for a candidate, searching only when nothing is cached
async fn lookup(
    candidate: &Track,
    catalog: &dyn MusicSession,
    lookups: &mut Vec<Lookup>,
) -> PipelineResult<Option<(String, i64)>> {
    if let (Some(uri), Some(duration_ms)) = (&candidate.provider_uri, candidate.duration_ms) {
        return Ok(Some((uri.clone(), duration_ms)));
    }
    if candidate.catalog_miss {
        return Ok(None);
    }

    match catalog.search_track(&candidate.title, &candidate.artist).await? {
        Some(found) => {
            lookups.push(Lookup::Found {
                track_id: candidate.id,
                uri: found.uri.clone(),
                duration_ms: found.duration_ms,
            });
            Ok(Some((found.uri, found.duration_ms)))
        }
        None => {
            debug!("No catalog match for {} - {}", candidate.artist, candidate.title);
            lookups.push(Lookup::Miss { track_id: candidate.id });
            Ok(None)
        }
    }
}

/// Accept candidates until `target_ms` is reached or they run out
///
/// Lookups performed along the way are pushed onto `lookups` even when the
/// run fails part-way, so the caller can persist them before retrying.
pub async fn resolve(
    candidates: &[Track],
    target_ms: i64,
    excluded: &HashSet<String>,
    catalog: &dyn MusicSession,
    lookups: &mut Vec<Lookup>,
) -> PipelineResult<Resolution> {
    let mut resolution = Resolution::default();
    let mut selected: HashSet<String> = HashSet::new();

    for candidate in candidates {
        let Some((uri, duration_ms)) = lookup(candidate, catalog, lookups).await? else {
            continue;
        };

        if excluded.contains(&uri) {
            debug!("Skipping recently used {}", uri);
            continue;
        }
        if !selected.insert(uri.clone()) {
            debug!("Skipping duplicate {}", uri);
            continue;
        }

        resolution.total_ms += duration_ms;
        resolution.accepted.push(AcceptedTrack {
            track_id: candidate.id,
            uri,
            duration_ms,
        });

        if resolution.total_ms >= target_ms {
            resolution.target_met = true;
            return Ok(resolution);
        }
    }

    resolution.exhausted = true;
    Ok(resolution)
}
