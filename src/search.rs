//! Hybrid retrieval.
//!
//! A query runs down two paths:
//! - **vector**: the `limit × fetch_multiplier` nearest chunks by L2
//!   distance, scored `1 − d / max_d`;
//! - **lexical**: an FTS5 `MATCH` over quoted terms joined with `OR`,
//!   scored by min-max normalizing the rank (lower rank is better).
//!
//! The union of both candidate sets is fused as
//! `vector_weight × v + fts_weight × f`, thresholded, sorted descending and
//! filtered by namespace/agent until `limit` results are collected. If the
//! index is stale a sync pass runs first.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::config::{RetrievalConfig, Workspace};
use crate::embedding::{blob_to_vec, Embedder};
use crate::models::{Namespace, SearchResult};
use crate::progress::NoProgress;
use crate::store::{KeywordHit, MemoryStore, VectorHit};
use crate::sync;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// `None` searches every namespace.
    pub namespace: Option<Namespace>,
    pub agent: Option<String>,
    pub limit: usize,
    pub threshold: f64,
}

impl SearchRequest {
    /// A request with the configured default limit and threshold.
    pub fn new(query: impl Into<String>, retrieval: &RetrievalConfig) -> Self {
        Self {
            query: query.into(),
            namespace: None,
            agent: None,
            limit: retrieval.default_limit,
            threshold: retrieval.default_threshold,
        }
    }
}

pub async fn run_search(
    ws: &Workspace,
    store: &MemoryStore,
    embedder: &dyn Embedder,
    request: &SearchRequest,
) -> Result<Vec<SearchResult>> {
    let query = request.query.trim();
    if query.is_empty() || request.limit == 0 {
        return Ok(Vec::new());
    }

    if sync::needs_sync(ws, store).await? {
        tracing::info!("index is stale; syncing before search");
        sync::run_sync(ws, store, embedder, false, &NoProgress).await?;
    }

    let retrieval = &ws.config.retrieval;
    let fetch_limit = request.limit.saturating_mul(retrieval.fetch_multiplier);

    let query_vec = blob_to_vec(&embedder.embed_one(query).await?);
    let vector_hits = store.vector_search(&query_vec, fetch_limit).await?;

    let keyword_hits = match store.keyword_search(&fts_query(query), fetch_limit).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::debug!(error = %e, "keyword search failed; using vector results only");
            Vec::new()
        }
    };

    let fused = fuse(
        &normalize_distances(&vector_hits),
        &normalize_ranks(&keyword_hits),
        retrieval.vector_weight,
        retrieval.fts_weight,
        request.threshold,
    );

    let mut results = Vec::new();
    for (chunk_id, score) in fused {
        if results.len() >= request.limit {
            break;
        }
        let Some(row) = store.chunk_with_file(chunk_id).await? else {
            continue;
        };
        if request.namespace.is_some_and(|ns| ns != row.namespace) {
            continue;
        }
        if let Some(agent) = &request.agent {
            if row.agent.as_deref() != Some(agent.as_str()) {
                continue;
            }
        }
        results.push(SearchResult {
            text: row.text,
            file: row.path,
            namespace: row.namespace,
            heading: row.heading,
            start_line: row.start_line,
            end_line: row.end_line,
            score,
        });
    }

    Ok(results)
}

/// Build an FTS5 query: every whitespace-separated term double-quoted
/// (embedded quotes doubled), joined with ` OR `.
pub fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// `1 − d / max_d` per hit; all 1.0 when `max_d` is 0.
pub fn normalize_distances(hits: &[VectorHit]) -> BTreeMap<i64, f64> {
    let max_d = hits.iter().map(|h| h.distance).fold(0.0, f64::max);
    hits.iter()
        .map(|h| {
            let score = if max_d > 0.0 {
                1.0 - h.distance / max_d
            } else {
                1.0
            };
            (h.chunk_id, score)
        })
        .collect()
}

/// `(worst − rank) / (worst − best)` per hit; all 1.0 when every rank is equal.
pub fn normalize_ranks(hits: &[KeywordHit]) -> BTreeMap<i64, f64> {
    let best = hits.iter().map(|h| h.rank).fold(f64::INFINITY, f64::min);
    let worst = hits.iter().map(|h| h.rank).fold(f64::NEG_INFINITY, f64::max);
    let span = worst - best;
    hits.iter()
        .map(|h| {
            let score = if span.abs() < f64::EPSILON {
                1.0
            } else {
                (worst - h.rank) / span
            };
            (h.chunk_id, score)
        })
        .collect()
}

/// Weighted sum over the union of both score maps, rounded to 4 decimals,
/// keeping `score ≥ threshold`, sorted by score descending. The threshold is
/// applied to the rounded score, so no returned score falls below it.
///
/// Candidates are visited in chunk-id order and the sort is stable, so the
/// result is deterministic for a given index.
pub fn fuse(
    vector: &BTreeMap<i64, f64>,
    keyword: &BTreeMap<i64, f64>,
    vector_weight: f64,
    fts_weight: f64,
    threshold: f64,
) -> Vec<(i64, f64)> {
    let mut ids: Vec<i64> = vector.keys().chain(keyword.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut scored: Vec<(i64, f64)> = ids
        .into_iter()
        .map(|id| {
            let v = vector.get(&id).copied().unwrap_or(0.0);
            let k = keyword.get(&id).copied().unwrap_or(0.0);
            (id, round4(vector_weight * v + fts_weight * k))
        })
        .filter(|(_, score)| *score >= threshold)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

fn round4(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vhit(chunk_id: i64, distance: f64) -> VectorHit {
        VectorHit { chunk_id, distance }
    }

    fn khit(chunk_id: i64, rank: f64) -> KeywordHit {
        KeywordHit { chunk_id, rank }
    }

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(fts_query("database  migration"), "\"database\" OR \"migration\"");
        assert_eq!(fts_query("say \"hi\""), "\"say\" OR \"\"\"hi\"\"\"");
        assert_eq!(fts_query("AND OR NOT"), "\"AND\" OR \"OR\" OR \"NOT\"");
    }

    #[test]
    fn test_normalize_distances() {
        let scores = normalize_distances(&[vhit(1, 0.0), vhit(2, 1.0), vhit(3, 2.0)]);
        assert!((scores[&1] - 1.0).abs() < 1e-9);
        assert!((scores[&2] - 0.5).abs() < 1e-9);
        assert!((scores[&3] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_distances_all_zero() {
        let scores = normalize_distances(&[vhit(1, 0.0), vhit(2, 0.0)]);
        assert!(scores.values().all(|s| (*s - 1.0).abs() < 1e-9));
        assert!(normalize_distances(&[]).is_empty());
    }

    #[test]
    fn test_normalize_ranks() {
        // FTS5 ranks are negative; more negative is better.
        let scores = normalize_ranks(&[khit(1, -10.0), khit(2, -5.0), khit(3, 0.0)]);
        assert!((scores[&1] - 1.0).abs() < 1e-9);
        assert!((scores[&2] - 0.5).abs() < 1e-9);
        assert!((scores[&3] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_ranks_all_equal() {
        let scores = normalize_ranks(&[khit(1, -3.0), khit(2, -3.0)]);
        assert!(scores.values().all(|s| (*s - 1.0).abs() < 1e-9));
        let single = normalize_ranks(&[khit(7, -1.2)]);
        assert!((single[&7] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fuse_weights_and_union() {
        let vector = BTreeMap::from([(1, 1.0), (2, 0.5)]);
        let keyword = BTreeMap::from([(2, 1.0), (3, 1.0)]);
        let fused = fuse(&vector, &keyword, 0.7, 0.3, 0.0);
        let map: BTreeMap<i64, f64> = fused.iter().copied().collect();
        assert!((map[&1] - 0.7).abs() < 1e-9);
        assert!((map[&2] - 0.65).abs() < 1e-9);
        assert!((map[&3] - 0.3).abs() < 1e-9);
        assert_eq!(fused[0].0, 1);
        assert_eq!(fused[2].0, 3);
    }

    #[test]
    fn test_fuse_threshold() {
        let vector = BTreeMap::from([(1, 1.0), (2, 0.2)]);
        let keyword = BTreeMap::new();
        let fused = fuse(&vector, &keyword, 0.7, 0.3, 0.3);
        assert_eq!(fused, vec![(1, 0.7)]);
        assert!(fuse(&vector, &keyword, 0.7, 0.3, 0.9).is_empty());
    }

    #[test]
    fn test_fusion_is_monotonic() {
        // (vector A, keyword A, vector B, keyword B): A dominates B on both
        // paths, strictly on at least one. A missing keyword score counts as 0.
        let pairs: [(f64, Option<f64>, f64, Option<f64>); 5] = [
            (0.9, Some(0.5), 0.8, Some(0.5)),
            (0.4, Some(1.0), 0.4, Some(0.2)),
            (1.0, Some(1.0), 0.0, None),
            (0.3, Some(0.3), 0.3, None),
            (0.50001, Some(0.0), 0.5, Some(0.0)),
        ];
        for (weights_v, weights_k) in [(0.7, 0.3), (0.5, 0.5), (1.0, 0.0), (0.0, 1.0)] {
            for (va, ka, vb, kb) in pairs {
                let vector = BTreeMap::from([(1, va), (2, vb)]);
                let mut keyword = BTreeMap::new();
                if let Some(k) = ka {
                    keyword.insert(1, k);
                }
                if let Some(k) = kb {
                    keyword.insert(2, k);
                }
                let fused: BTreeMap<i64, f64> = fuse(&vector, &keyword, weights_v, weights_k, 0.0)
                    .into_iter()
                    .collect();
                assert!(
                    fused[&1] >= fused[&2],
                    "A ({}, {:?}) dominates B ({}, {:?}) but fused {} < {}",
                    va,
                    ka,
                    vb,
                    kb,
                    fused[&1],
                    fused[&2]
                );
            }
        }
    }

    #[test]
    fn test_fuse_threshold_applies_to_rounded_score() {
        // Raw 0.123449 rounds to 0.1234, below a 0.123449 threshold.
        let vector = BTreeMap::from([(1, 0.123_449 / 0.7)]);
        let keyword = BTreeMap::new();
        assert!(fuse(&vector, &keyword, 0.7, 0.3, 0.123_449).is_empty());

        // Raw 0.12346 rounds up to the 0.1235 threshold and is kept at it.
        let vector = BTreeMap::from([(1, 0.123_46 / 0.7)]);
        let fused = fuse(&vector, &keyword, 0.7, 0.3, 0.1235);
        assert_eq!(fused, vec![(1, 0.1235)]);
        for (_, score) in &fused {
            assert!(*score >= 0.1235);
        }
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123_456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
    }
}
