//! Provenance-aware score adjustment, filtering, and deduplication.
//!
//! # Scoring
//!
//! For every hit the [`Ranker`] looks up the chunk's provenance:
//!
//! | Provenance | Boost |
//! |------------|-------|
//! | flagged latest | `+latest_version_boost` |
//! | known, not latest | `-recency_decay_factor` |
//! | unknown | `0` |
//!
//! `adjusted = clamp(original + boost, 0, 1)`. Results are then sorted by
//! adjusted score (descending) and, when `min_score > 0`, thresholded.
//!
//! # Deduplication
//!
//! Hits are grouped by base chunk key (the key without its `@{commit}`
//! suffix). Each group keeps its flagged-latest member, or its highest
//! adjusted score when none is flagged. Hits without provenance, or whose
//! provenance has an empty chunk key, belong to no region and pass
//! through unchanged.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{base_chunk_key, ChunkProvenance, RankedResult, SearchResult};
use crate::provenance::ProvenanceGraph;

/// Score adjustment parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Added to the score of a chunk flagged latest.
    pub latest_version_boost: f64,
    /// Subtracted from the score of a chunk known to be stale.
    pub recency_decay_factor: f64,
    /// Results below this adjusted score are dropped when it is `> 0`.
    pub min_score: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            latest_version_boost: 0.15,
            recency_decay_factor: 0.10,
            min_score: 0.0,
        }
    }
}

/// Post-adjustment steps applied by [`Ranker::rank`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankOptions {
    /// Drop results whose provenance is known and not latest.
    pub latest_only: bool,
    /// Collapse versions of the same logical region.
    pub deduplicate: bool,
}

/// Adjusts similarity scores using the version history in a [`ProvenanceGraph`].
#[derive(Clone)]
pub struct Ranker {
    graph: Arc<ProvenanceGraph>,
    config: RankingConfig,
}

fn by_adjusted_desc(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.adjusted_score
        .partial_cmp(&a.adjusted_score)
        .unwrap_or(Ordering::Equal)
}

impl Ranker {
    pub fn new(graph: Arc<ProvenanceGraph>, config: RankingConfig) -> Self {
        Self { graph, config }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Apply the latest/stale boost, sort, and threshold.
    pub fn adjust_ranking(&self, results: Vec<SearchResult>) -> Vec<RankedResult> {
        let mut ranked: Vec<RankedResult> = results
            .into_iter()
            .map(|result| {
                let original = result.score;
                let (is_latest, boost) = match self.graph.get(&result.chunk_id) {
                    Ok(p) if p.is_latest => (true, self.config.latest_version_boost),
                    Ok(_) => (false, -self.config.recency_decay_factor),
                    Err(_) => (false, 0.0),
                };
                RankedResult {
                    result,
                    original_score: original,
                    adjusted_score: (original + boost).clamp(0.0, 1.0),
                    is_latest,
                    boost_applied: boost,
                }
            })
            .collect();

        ranked.sort_by(by_adjusted_desc);

        if self.config.min_score > 0.0 {
            let min = self.config.min_score;
            ranked.retain(|r| r.adjusted_score >= min);
        }

        tracing::debug!(
            results = ranked.len(),
            boost = self.config.latest_version_boost,
            decay = self.config.recency_decay_factor,
            "Adjusted ranking."
        );
        ranked
    }

    /// Keep one result per logical region.
    pub fn deduplicate_by_latest(&self, ranked: Vec<RankedResult>) -> Vec<RankedResult> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<(RankedResult, bool)>> = HashMap::new();
        let mut unknown: Vec<RankedResult> = Vec::new();

        for r in ranked {
            match self.graph.get(&r.result.chunk_id) {
                Ok(p) if !p.chunk_key.is_empty() => {
                    let base = base_chunk_key(&p.chunk_key).to_string();
                    if !groups.contains_key(&base) {
                        order.push(base.clone());
                    }
                    groups.entry(base).or_default().push((r, p.is_latest));
                }
                _ => {
                    tracing::debug!(
                        chunk_id = %r.result.chunk_id,
                        "No region key; keeping result out of dedup groups."
                    );
                    unknown.push(r);
                }
            }
        }

        let mut kept: Vec<RankedResult> = order
            .into_iter()
            .filter_map(|base| groups.remove(&base))
            .filter_map(pick_group_winner)
            .collect();
        kept.extend(unknown);
        kept.sort_by(by_adjusted_desc);
        kept
    }

    /// Drop results known to be stale. Results without provenance are kept.
    pub fn filter_by_latest_only(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        results
            .into_iter()
            .filter(|r| self.graph.is_latest(&r.chunk_id).unwrap_or(true))
            .collect()
    }

    /// Adjust, optionally filter to latest, then optionally deduplicate.
    ///
    /// The order of the three stages is fixed so the same input always
    /// yields the same output.
    pub fn rank(&self, results: Vec<SearchResult>, options: RankOptions) -> Vec<RankedResult> {
        let mut ranked = self.adjust_ranking(results);
        if options.latest_only {
            ranked.retain(|r| self.graph.is_latest(&r.result.chunk_id).unwrap_or(true));
        }
        if options.deduplicate {
            ranked = self.deduplicate_by_latest(ranked);
        }
        ranked
    }

    pub fn provenance_info(&self, chunk_id: &str) -> Result<ChunkProvenance> {
        self.graph.get(chunk_id)
    }
}

fn pick_group_winner(mut members: Vec<(RankedResult, bool)>) -> Option<RankedResult> {
    if members.len() <= 1 {
        return members.pop().map(|(r, _)| r);
    }
    if let Some(pos) = members.iter().position(|(_, latest)| *latest) {
        return Some(members.swap_remove(pos).0);
    }
    members
        .into_iter()
        .max_by(|(a, _), (b, _)| {
            a.adjusted_score
                .partial_cmp(&b.adjusted_score)
                .unwrap_or(Ordering::Equal)
        })
        .map(|(r, _)| r)
}
