//! Rank Fusion
//!
//! Combines k ranked lists into one: Reciprocal Rank Fusion, Borda count,
//! weighted score/position blending, and learning-to-rank scoring with an
//! RRF fallback. Post-fusion passes apply a category diversity penalty,
//! query-term boosts, and strategy-specific reordering of near-ties.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::FusionAlgorithm;
use crate::error::{EngineError, Result};
use crate::model::{QueryContext, SearchResultItem};

/// RRF dampening constant
pub const RRF_K: f64 = 60.0;

/// Weighted fusion blend between normalized score and position
const WEIGHTED_ALPHA: f64 = 0.5;

/// Width of the score band within which results count as near-ties
const NEAR_TIE_GAP: f64 = 0.1;

// ============================================================================
// RANKING MODEL
// ============================================================================

/// A linear learning-to-rank model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    /// Names of the features the weights correspond to
    pub features: Vec<String>,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

// ============================================================================
// CANDIDATE TABLE
// ============================================================================

/// Per-candidate view across all input lists
struct Candidate {
    item: SearchResultItem,
    /// (list index, 0-based rank, raw score); one per list the id appears in
    appearances: Vec<(usize, usize, f64)>,
}

fn collect(lists: &[Vec<SearchResultItem>]) -> (Vec<String>, HashMap<String, Candidate>) {
    let mut order: Vec<String> = Vec::new();
    let mut table: HashMap<String, Candidate> = HashMap::new();
    for (list_idx, list) in lists.iter().enumerate() {
        for (rank, item) in list.iter().enumerate() {
            let id = item.entry.id.clone();
            match table.get_mut(&id) {
                Some(candidate) => candidate.appearances.push((list_idx, rank, item.score)),
                None => {
                    order.push(id.clone());
                    table.insert(
                        id,
                        Candidate {
                            item: item.clone(),
                            appearances: vec![(list_idx, rank, item.score)],
                        },
                    );
                }
            }
        }
    }
    (order, table)
}

fn finalize(order: Vec<String>, mut table: HashMap<String, Candidate>, scores: HashMap<String, f64>) -> Vec<SearchResultItem> {
    let mut items: Vec<SearchResultItem> = order
        .into_iter()
        .filter_map(|id| {
            let candidate = table.remove(&id)?;
            let mut item = candidate.item;
            item.score = *scores.get(&id).unwrap_or(&0.0);
            Some(item)
        })
        .collect();
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    for (i, item) in items.iter_mut().enumerate() {
        item.rank = i + 1;
    }
    items
}

// ============================================================================
// FUSION ALGORITHMS
// ============================================================================

/// Reciprocal Rank Fusion: `score(e) = Σ 1/(k + rank_i(e))`
pub fn reciprocal_rank_fusion(lists: &[Vec<SearchResultItem>], k: f64) -> Vec<SearchResultItem> {
    let (order, table) = collect(lists);
    let scores: HashMap<String, f64> = table
        .iter()
        .map(|(id, c)| {
            let s: f64 = c
                .appearances
                .iter()
                .map(|(_, rank, _)| 1.0 / (k + (*rank + 1) as f64))
                .sum();
            (id.clone(), s)
        })
        .collect();
    finalize(order, table, scores)
}

/// Borda count: `Σ (N_i − rank_i + 1)`, normalized to [0,1] and weighted by
/// how many lists the candidate appears in
pub fn borda_fusion(lists: &[Vec<SearchResultItem>]) -> Vec<SearchResultItem> {
    let (order, table) = collect(lists);
    let max_points: f64 = lists.iter().map(|l| l.len() as f64).sum();
    let list_count = lists.len().max(1) as f64;

    let scores: HashMap<String, f64> = table
        .iter()
        .map(|(id, c)| {
            let points: f64 = c
                .appearances
                .iter()
                .map(|(list_idx, rank, _)| (lists[*list_idx].len() - rank) as f64)
                .sum();
            let normalized = if max_points > 0.0 { points / max_points } else { 0.0 };
            let appearance_weight = c.appearances.len() as f64 / list_count;
            (id.clone(), normalized * appearance_weight)
        })
        .collect();
    finalize(order, table, scores)
}

/// Weighted fusion: per list, `w_i · (α·normalized_score + (1−α)·position)`.
/// Weights are normalized to sum 1; a weight per input list is required.
pub fn weighted_fusion(
    lists: &[Vec<SearchResultItem>],
    weights: &[f64],
) -> Result<Vec<SearchResultItem>> {
    if weights.len() != lists.len() {
        return Err(EngineError::InvalidArgument(format!(
            "{} fusion weights for {} lists",
            weights.len(),
            lists.len()
        )));
    }
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 {
        return Err(EngineError::InvalidArgument(
            "fusion weights must sum to a positive value".into(),
        ));
    }
    let normalized: Vec<f64> = weights.iter().map(|w| w / weight_sum).collect();

    // Per-list max score for normalization
    let max_scores: Vec<f64> = lists
        .iter()
        .map(|l| {
            l.iter()
                .map(|i| i.score)
                .fold(0.0_f64, f64::max)
                .max(f64::EPSILON)
        })
        .collect();

    let (order, table) = collect(lists);
    let scores: HashMap<String, f64> = table
        .iter()
        .map(|(id, c)| {
            let s: f64 = c
                .appearances
                .iter()
                .map(|(list_idx, rank, raw)| {
                    let n = lists[*list_idx].len().max(1) as f64;
                    let norm_score = raw / max_scores[*list_idx];
                    let position = 1.0 - *rank as f64 / n;
                    normalized[*list_idx] * (WEIGHTED_ALPHA * norm_score + (1.0 - WEIGHTED_ALPHA) * position)
                })
                .sum();
            (id.clone(), s)
        })
        .collect();
    Ok(finalize(order, table, scores))
}

/// Learning-to-rank fusion: per candidate, assemble a feature row from its
/// per-list normalized scores, positions and appearance fraction, then score
/// with `sigmoid(w·x + b)`. A missing or empty model falls back to RRF.
pub fn ltr_fusion(
    lists: &[Vec<SearchResultItem>],
    model: Option<&RankingModel>,
) -> Vec<SearchResultItem> {
    let model = match model {
        Some(m) if !m.weights.is_empty() => m,
        _ => return reciprocal_rank_fusion(lists, RRF_K),
    };

    let max_scores: Vec<f64> = lists
        .iter()
        .map(|l| {
            l.iter()
                .map(|i| i.score)
                .fold(0.0_f64, f64::max)
                .max(f64::EPSILON)
        })
        .collect();

    let (order, table) = collect(lists);
    let list_count = lists.len().max(1);
    let scores: HashMap<String, f64> = table
        .iter()
        .map(|(id, c)| {
            // Row: [norm_score_i..., position_i..., appearance_fraction]
            let mut row = vec![0.0; 2 * list_count + 1];
            for (list_idx, rank, raw) in &c.appearances {
                let n = lists[*list_idx].len().max(1) as f64;
                row[*list_idx] = raw / max_scores[*list_idx];
                row[list_count + *list_idx] = 1.0 - *rank as f64 / n;
            }
            row[2 * list_count] = c.appearances.len() as f64 / list_count as f64;

            // Shorter of (weights, row) decides the dot length
            let dot: f64 = model
                .weights
                .iter()
                .zip(row.iter())
                .map(|(w, x)| w * x)
                .sum();
            (id.clone(), sigmoid(dot + model.bias))
        })
        .collect();
    finalize(order, table, scores)
}

/// Dispatch on the configured algorithm. `weights` feeds weighted fusion,
/// `model` feeds LTR.
pub fn fuse(
    lists: &[Vec<SearchResultItem>],
    algorithm: FusionAlgorithm,
    weights: Option<&[f64]>,
    model: Option<&RankingModel>,
) -> Result<Vec<SearchResultItem>> {
    match algorithm {
        FusionAlgorithm::Rrf => Ok(reciprocal_rank_fusion(lists, RRF_K)),
        FusionAlgorithm::Borda => Ok(borda_fusion(lists)),
        FusionAlgorithm::Weighted => match weights {
            Some(w) => weighted_fusion(lists, w),
            None => {
                let even = vec![1.0; lists.len()];
                weighted_fusion(lists, &even)
            }
        },
        FusionAlgorithm::Ltr => Ok(ltr_fusion(lists, model)),
    }
}

// ============================================================================
// POST-FUSION PASSES
// ============================================================================

/// Within the top 10, each additional entry sharing an earlier entry's
/// category is penalized 1% per repeat
pub fn apply_diversity_penalty(items: &mut [SearchResultItem]) {
    let top = items.len().min(10);
    let mut seen: HashMap<String, usize> = HashMap::new();
    for item in items.iter_mut().take(top) {
        if let Some(category) = &item.entry.category {
            let repeats = seen.entry(category.clone()).or_insert(0);
            if *repeats > 0 {
                item.score *= 1.0 - 0.01 * *repeats as f64;
            }
            *repeats += 1;
        }
    }
}

/// Query-term and project boosts: urgency terms multiply matching-tag
/// entries by 1.1; a project match adds a flat 0.05
pub fn apply_query_boosts(items: &mut [SearchResultItem], query: &str, context: &QueryContext) {
    const URGENCY_TERMS: &[&str] = &["urgent", "critical", "fix"];
    let query_lower = query.to_lowercase();
    let has_urgency = URGENCY_TERMS.iter().any(|t| query_lower.contains(t));

    for item in items.iter_mut() {
        if has_urgency
            && item
                .entry
                .metadata
                .tags
                .iter()
                .any(|tag| URGENCY_TERMS.iter().any(|t| tag.eq_ignore_ascii_case(t)))
        {
            item.score *= 1.1;
        }
        if context.project_id.is_some()
            && context.project_id == item.entry.metadata.project_id
        {
            item.score += 0.05;
        }
    }
}

/// Strategy-specific preference applied to near-ties (score gap ≤ 0.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// Prefer newer `last_modified`
    Recency,
    /// Prefer higher `effectiveness`
    Effectiveness,
    /// Prefer higher `usage_count`
    Popularity,
    /// Leave near-ties alone
    None,
}

/// Final ordering pass: sort by score descending and rewrite ranks. Scores
/// are quantized into near-tie bands so the comparator stays a total order;
/// within a band the strategy preference decides, then exact score, then id.
/// `TieBreak::None` reduces to a plain score-descending sort.
pub fn apply_tie_break(items: &mut [SearchResultItem], tie_break: TieBreak) {
    let band = |score: f64| (score / NEAR_TIE_GAP).floor() as i64;
    items.sort_by(|a, b| {
        band(b.score)
            .cmp(&band(a.score))
            .then_with(|| match tie_break {
                TieBreak::Recency => b.entry.last_modified.cmp(&a.entry.last_modified),
                TieBreak::Effectiveness => b
                    .entry
                    .metadata
                    .effectiveness
                    .unwrap_or(0.0)
                    .partial_cmp(&a.entry.metadata.effectiveness.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal),
                TieBreak::Popularity => {
                    b.entry.metadata.usage_count.cmp(&a.entry.metadata.usage_count)
                }
                TieBreak::None => std::cmp::Ordering::Equal,
            })
            .then_with(|| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.entry.id.cmp(&b.entry.id))
    });
    for (i, item) in items.iter_mut().enumerate() {
        item.rank = i + 1;
    }
}

// ============================================================================
// CONFIDENCE
// ============================================================================

/// Confidence of the fused result set: the top score normalized, scaled by a
/// marker-count bonus (title markers count more) and a top-1 bonus
pub fn confidence_score(items: &[SearchResultItem]) -> f64 {
    let Some(top) = items.first() else {
        return 0.0;
    };
    let max = items
        .iter()
        .map(|i| i.score)
        .fold(0.0_f64, f64::max)
        .max(f64::EPSILON);
    let normalized = top.score / max;

    let title_markers = top
        .title_snippet
        .as_deref()
        .map_or(0, |s| s.matches("<mark>").count());
    let content_markers: usize = top
        .content_snippets
        .iter()
        .map(|s| s.highlighted.matches("<mark>").count())
        .sum();

    let marker_bonus =
        1.0 + 0.05 * title_markers.min(4) as f64 + 0.01 * content_markers.min(10) as f64;
    let rank_bonus = 1.1; // top-1

    (normalized * marker_bonus * rank_bonus / 1.43).clamp(0.0, 1.0)
}
