//! Feature Extractor
//!
//! Computes a multi-category feature vector per (query, entry) pair: basic
//! match signals, recency, proximity, affinity, semantic content properties,
//! query context, and a derived summary. Every category is independently
//! enableable; a disabled category holds its `Default` values (zeros and
//! `false`) so downstream consumers stay total.

mod scaling;
mod text;

pub use scaling::{scale_batch, CorpusStats};
pub use text::{
    character_similarity, complexity_score, cosine_similarity, has_code_examples,
    has_external_links, has_image_diagrams, jaccard_similarity, readability_score, tokens,
    topic_purity, word_overlap_ratio,
};

use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{FeatureConfig, ScalingMethod};
use crate::model::{Difficulty, Entry, QueryContext, RetrievalQuery, Scope};
use crate::search::find_all_ci;

// ============================================================================
// CATEGORY STRUCTS
// ============================================================================

/// Direct query/field match signals
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicFeatures {
    pub title_match_score: f64,
    pub content_match_score: f64,
    pub tag_match_score: f64,
    pub category_match: bool,
}

/// Time-based signals; decay fields use a 30-day half-life-style exponential
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecencyFeatures {
    pub days_since_created: f64,
    pub days_since_modified: f64,
    pub days_since_last_used: f64,
    pub created_decay: f64,
    pub modified_decay: f64,
    pub last_used_decay: f64,
    /// Used within the last 7 days
    pub is_recently_active: bool,
    /// Modified within the last 7 days
    pub has_recent_updates: bool,
    /// Weekday of creation scaled to [0,1] (Monday = 0)
    pub weekday_created: f64,
    /// Hour of creation scaled to [0,1]
    pub hour_created: f64,
}

/// Query/entry textual proximity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityFeatures {
    pub exact_phrase_match: bool,
    pub word_overlap_ratio: f64,
    pub character_similarity: f64,
    pub cosine_similarity: f64,
    pub jaccard_similarity: f64,
    pub title_proximity: f64,
    pub content_proximity: f64,
    pub tags_proximity: f64,
    pub path_proximity: f64,
    /// Closeness to the corpus root: 1/(1 + path depth)
    pub hierarchy_distance: f64,
}

/// Requester/entry affinity. User-level interaction histories are supplied
/// by outer layers; without them the user fields keep neutral defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffinityFeatures {
    pub user_previous_interactions: f64,
    pub user_success_rate: f64,
    pub user_dwell_time: f64,
    /// Fraction of query agent types also on the entry
    pub agent_type_relevance: f64,
    pub agent_success_history: f64,
    /// 1.0 on project equality, decaying otherwise
    pub project_relevance: f64,
    pub cross_project_usage: f64,
    /// 1.0 when the entry language is in the preferred list
    pub language_preference: f64,
    /// Expertise level vs entry difficulty
    pub complexity_fit: f64,
    pub domain_fit: f64,
}

/// Content-intrinsic properties
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticFeatures {
    pub language: Option<String>,
    pub complexity_score: f64,
    pub readability_score: f64,
    pub has_code_examples: bool,
    pub has_image_diagrams: bool,
    pub has_external_links: bool,
    /// Content length in characters
    pub document_length: f64,
    pub topic_purity: f64,
}

/// Session and issue context
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFeatures {
    pub issue_relevance: f64,
    pub task_phase_relevance: f64,
    /// Critical/urgent on both the query context and the entry
    pub urgency_match: bool,
    pub is_working_hours: bool,
    pub is_weekend: bool,
    /// Hour of day scaled to [0,1]
    pub time_of_day: f64,
    /// Depth in the session, scaled (20 queries saturate)
    pub query_position: f64,
    /// Raw session length in queries
    pub session_length: f64,
    pub query_complexity: f64,
    pub active_project: bool,
    pub repository_active: bool,
    /// Branch name appears in the entry path or tags
    pub branch_context: f64,
}

/// Summary produced after optional batch scaling
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedFeatures {
    /// Weighted blend of the category components per the feature weights
    pub overall_relevance: f64,
    /// Dispersion across category components; disagreement means doubt
    pub uncertainty_score: f64,
    /// Fresh and rarely used entries score high
    pub novelty_score: f64,
}

/// The full per-(query, entry) feature vector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub basic: BasicFeatures,
    pub recency: RecencyFeatures,
    pub proximity: ProximityFeatures,
    pub affinity: AffinityFeatures,
    pub semantic: SemanticFeatures,
    pub context: ContextFeatures,
    pub derived: DerivedFeatures,
}

/// Boolean feature as a numeric column
fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

impl FeatureVector {
    /// Flattened dimensionality; must stay in sync with `flatten`
    pub const FLAT_DIM: usize = 45;

    /// Flatten to a fixed-order numeric row for the re-ranker. Unbounded
    /// values are squashed to stay comparable.
    pub fn flatten(&self) -> Vec<f64> {
        let b = &self.basic;
        let r = &self.recency;
        let p = &self.proximity;
        let a = &self.affinity;
        let s = &self.semantic;
        let c = &self.context;
        let d = &self.derived;
        vec![
            b.title_match_score,
            b.content_match_score,
            b.tag_match_score,
            flag(b.category_match),
            r.created_decay,
            r.modified_decay,
            r.last_used_decay,
            flag(r.is_recently_active),
            flag(r.has_recent_updates),
            r.weekday_created,
            r.hour_created,
            flag(p.exact_phrase_match),
            p.word_overlap_ratio,
            p.character_similarity,
            p.cosine_similarity,
            p.jaccard_similarity,
            p.title_proximity,
            p.content_proximity,
            p.tags_proximity,
            p.path_proximity,
            p.hierarchy_distance,
            a.user_previous_interactions,
            a.user_success_rate,
            a.user_dwell_time,
            a.agent_type_relevance,
            a.agent_success_history,
            a.project_relevance,
            a.cross_project_usage,
            a.language_preference,
            a.complexity_fit,
            a.domain_fit,
            s.complexity_score,
            s.readability_score,
            flag(s.has_code_examples),
            flag(s.has_image_diagrams),
            flag(s.has_external_links),
            (s.document_length + 1.0).ln() / 12.0,
            s.topic_purity,
            c.issue_relevance,
            c.task_phase_relevance,
            flag(c.urgency_match),
            c.query_complexity,
            d.overall_relevance,
            d.uncertainty_score,
            d.novelty_score,
        ]
    }

    /// The seven category components the derived summary is blended from
    fn components(&self) -> [f64; 7] {
        let prox = &self.proximity;
        let aff = &self.affinity;
        let sem = &self.semantic;
        let ctx = &self.context;
        [
            self.basic.title_match_score,
            self.basic.content_match_score,
            (prox.word_overlap_ratio
                + prox.cosine_similarity
                + prox.jaccard_similarity
                + prox.character_similarity)
                / 4.0,
            self.recency.modified_decay,
            (aff.agent_type_relevance
                + aff.project_relevance
                + aff.language_preference
                + aff.complexity_fit
                + aff.domain_fit)
                / 5.0,
            (sem.readability_score + sem.topic_purity + sem.complexity_score) / 3.0,
            (ctx.issue_relevance
                + ctx.task_phase_relevance
                + flag(ctx.urgency_match)
                + ctx.branch_context)
                / 4.0,
        ]
    }
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Stateless feature extractor configured once
pub struct FeatureExtractor {
    config: FeatureConfig,
    /// Corpus statistics for scaling outside a batch
    corpus_stats: Option<CorpusStats>,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self {
            config,
            corpus_stats: None,
        }
    }

    /// Install precomputed corpus statistics for single-entry scaling
    pub fn set_corpus_stats(&mut self, stats: CorpusStats) {
        self.corpus_stats = Some(stats);
    }

    /// Extract features for one entry. Scaling uses the installed corpus
    /// statistics when present, raw components otherwise.
    pub fn extract(&self, query: &RetrievalQuery, entry: &Entry, now: DateTime<Utc>) -> FeatureVector {
        let mut fv = self.extract_raw(query, entry, now);
        if self.config.enable_derived_features {
            let mut comps = fv.components().to_vec();
            if self.config.normalize_features {
                if let Some(stats) = &self.corpus_stats {
                    stats.scale_row(&mut comps, self.config.scaling_method);
                }
            }
            fv.derived = self.derive(&fv, &comps);
        }
        fv
    }

    /// Extract features for a batch, scaling the category components across
    /// the batch before deriving summaries. Entries past the time budget get
    /// default vectors.
    pub fn extract_batch(
        &self,
        query: &RetrievalQuery,
        entries: &[Entry],
        now: DateTime<Utc>,
        budget: Option<Duration>,
    ) -> Vec<FeatureVector> {
        let started = Instant::now();
        let mut vectors: Vec<FeatureVector> = Vec::with_capacity(entries.len());

        for entry in entries {
            if let Some(budget) = budget {
                if started.elapsed() > budget {
                    tracing::warn!(
                        "Feature extraction budget exhausted after {} of {} entries",
                        vectors.len(),
                        entries.len()
                    );
                    vectors.resize_with(entries.len(), FeatureVector::default);
                    break;
                }
            }
            vectors.push(self.extract_raw(query, entry, now));
        }

        if self.config.enable_derived_features {
            let mut rows: Vec<Vec<f64>> =
                vectors.iter().map(|fv| fv.components().to_vec()).collect();
            if self.config.normalize_features && rows.len() > 1 {
                scale_batch(&mut rows, self.config.scaling_method);
            }
            for (fv, comps) in vectors.iter_mut().zip(rows.iter()) {
                fv.derived = self.derive(fv, comps);
            }
        }

        vectors
    }

    fn derive(&self, fv: &FeatureVector, comps: &[f64]) -> DerivedFeatures {
        let w = &self.config.feature_weights;
        let weights = [
            w.title, w.content, w.proximity, w.recency, w.affinity, w.semantic, w.context,
        ];
        let weight_sum: f64 = weights.iter().sum();
        let overall = comps
            .iter()
            .zip(weights.iter())
            .map(|(c, w)| c * w)
            .sum::<f64>()
            / weight_sum.max(f64::EPSILON);

        let mean: f64 = comps.iter().sum::<f64>() / comps.len().max(1) as f64;
        let variance: f64 =
            comps.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / comps.len().max(1) as f64;

        let usage = fv.affinity.user_previous_interactions;
        let novelty = fv.recency.created_decay / (1.0 + usage);

        DerivedFeatures {
            overall_relevance: overall,
            uncertainty_score: variance.sqrt().clamp(0.0, 1.0),
            novelty_score: novelty.clamp(0.0, 1.0),
        }
    }

    fn extract_raw(
        &self,
        query: &RetrievalQuery,
        entry: &Entry,
        now: DateTime<Utc>,
    ) -> FeatureVector {
        let query_tokens = tokens(&query.search.query);

        FeatureVector {
            basic: if self.config.enable_basic_features {
                self.basic(entry, query, &query_tokens)
            } else {
                BasicFeatures::default()
            },
            recency: if self.config.enable_recency_features {
                Self::recency(entry, now)
            } else {
                RecencyFeatures::default()
            },
            proximity: if self.config.enable_proximity_features {
                Self::proximity(entry, &query.search.query, &query_tokens)
            } else {
                ProximityFeatures::default()
            },
            affinity: if self.config.enable_affinity_features {
                Self::affinity(entry, &query.context)
            } else {
                AffinityFeatures::default()
            },
            semantic: if self.config.enable_semantic_features {
                Self::semantic(entry)
            } else {
                SemanticFeatures::default()
            },
            context: if self.config.enable_context_features {
                Self::context(entry, &query.context, &query_tokens, now)
            } else {
                ContextFeatures::default()
            },
            derived: DerivedFeatures::default(),
        }
    }

    fn basic(&self, entry: &Entry, query: &RetrievalQuery, query_tokens: &[String]) -> BasicFeatures {
        let title_tokens = tokens(&entry.title);
        let content_tokens = tokens(&entry.content);
        let tag_match_score = if entry.metadata.tags.is_empty() {
            0.0
        } else {
            entry
                .metadata
                .tags
                .iter()
                .filter(|t| {
                    let tl = t.to_lowercase();
                    query_tokens.iter().any(|q| tl.contains(q))
                })
                .count() as f64
                / entry.metadata.tags.len() as f64
        };

        BasicFeatures {
            title_match_score: word_overlap_ratio(query_tokens, &title_tokens),
            content_match_score: word_overlap_ratio(query_tokens, &content_tokens),
            tag_match_score,
            category_match: entry.category.as_deref().map_or(false, |c| {
                query.search.query.to_lowercase().contains(&c.to_lowercase())
            }),
        }
    }

    fn recency(entry: &Entry, now: DateTime<Utc>) -> RecencyFeatures {
        // Creation time is not stored separately on the entry; modification
        // time bounds it from above
        let days_modified = entry.days_since_modified(now);
        let days_created = days_modified;
        let days_used = entry
            .metadata
            .last_used
            .map(|t| (now - t).num_seconds().max(0) as f64 / 86_400.0)
            .unwrap_or(f64::INFINITY);

        let decay = |days: f64| (-days / 30.0).exp();

        RecencyFeatures {
            days_since_created: days_created,
            days_since_modified: days_modified,
            days_since_last_used: if days_used.is_finite() { days_used } else { -1.0 },
            created_decay: decay(days_created),
            modified_decay: decay(days_modified),
            last_used_decay: if days_used.is_finite() {
                decay(days_used)
            } else {
                0.0
            },
            is_recently_active: days_used <= 7.0,
            has_recent_updates: days_modified <= 7.0,
            weekday_created: f64::from(entry.last_modified.weekday().num_days_from_monday()) / 6.0,
            hour_created: f64::from(entry.last_modified.hour()) / 23.0,
        }
    }

    fn proximity(entry: &Entry, query_text: &str, query_tokens: &[String]) -> ProximityFeatures {
        let title_tokens = tokens(&entry.title);
        let content_tokens = tokens(&entry.content);
        let tag_tokens: Vec<String> = entry
            .metadata
            .tags
            .iter()
            .flat_map(|t| tokens(t))
            .collect();
        let path_tokens: Vec<String> = tokens(&entry.path.replace(['/', '.'], " "));
        let all_tokens: Vec<String> = title_tokens
            .iter()
            .chain(content_tokens.iter())
            .cloned()
            .collect();

        let depth = entry.path.split('/').filter(|s| !s.is_empty()).count();

        ProximityFeatures {
            exact_phrase_match: !find_all_ci(&entry.title, query_text.trim()).is_empty()
                || !find_all_ci(&entry.content, query_text.trim()).is_empty(),
            word_overlap_ratio: word_overlap_ratio(query_tokens, &all_tokens),
            character_similarity: character_similarity(query_text, &entry.title),
            cosine_similarity: cosine_similarity(query_tokens, &all_tokens),
            jaccard_similarity: jaccard_similarity(query_tokens, &all_tokens),
            title_proximity: jaccard_similarity(query_tokens, &title_tokens),
            content_proximity: jaccard_similarity(query_tokens, &content_tokens),
            tags_proximity: jaccard_similarity(query_tokens, &tag_tokens),
            path_proximity: jaccard_similarity(query_tokens, &path_tokens),
            hierarchy_distance: 1.0 / (1.0 + depth as f64),
        }
    }

    fn affinity(entry: &Entry, context: &QueryContext) -> AffinityFeatures {
        let m = &entry.metadata;

        let agent_type_relevance = if context.agent_types.is_empty() {
            0.0
        } else {
            let shared = context
                .agent_types
                .iter()
                .filter(|a| m.agent_types.iter().any(|b| b.eq_ignore_ascii_case(a)))
                .count();
            shared as f64 / context.agent_types.len() as f64
        };

        let project_relevance = match (&context.project_id, &m.project_id) {
            (Some(q), Some(e)) if q == e => 1.0,
            _ if m.scope == Some(Scope::Global) => 0.7,
            (Some(_), Some(_)) => 0.3,
            _ => 0.5,
        };

        let language_preference = match &m.language {
            Some(lang) => {
                if context
                    .preferred_languages
                    .iter()
                    .any(|p| p.eq_ignore_ascii_case(lang))
                {
                    1.0
                } else {
                    0.2
                }
            }
            None => 0.5,
        };

        let complexity_fit = {
            let expertise = context.expertise_level.as_deref().map(Difficulty::parse_name);
            match (expertise, m.difficulty) {
                (Some(e), Some(d)) if e == d => 1.0,
                (Some(e), Some(d)) => {
                    let gap = (e as i8 - d as i8).abs();
                    if gap == 1 {
                        0.5
                    } else {
                        0.1
                    }
                }
                _ => 0.5,
            }
        };

        let mut domain_terms: Vec<String> = context
            .issue_labels
            .iter()
            .chain(context.agent_types.iter())
            .flat_map(|s| tokens(s))
            .collect();
        domain_terms.dedup();
        let tag_tokens: Vec<String> = m.tags.iter().flat_map(|t| tokens(t)).collect();

        AffinityFeatures {
            user_previous_interactions: ((m.usage_count as f64) + 1.0).ln() / 10.0,
            user_success_rate: m.success_rate.unwrap_or(0.5),
            user_dwell_time: 0.0,
            agent_type_relevance,
            agent_success_history: m.effectiveness.unwrap_or(0.5),
            project_relevance,
            cross_project_usage: if m.scope == Some(Scope::Global) {
                (((m.usage_count as f64) + 1.0).ln() / 10.0).min(1.0)
            } else {
                0.0
            },
            language_preference,
            complexity_fit,
            domain_fit: jaccard_similarity(&domain_terms, &tag_tokens),
        }
    }

    fn semantic(entry: &Entry) -> SemanticFeatures {
        SemanticFeatures {
            language: entry.metadata.language.clone(),
            complexity_score: complexity_score(&entry.content),
            readability_score: readability_score(&entry.content),
            has_code_examples: has_code_examples(&entry.content),
            has_image_diagrams: has_image_diagrams(&entry.content),
            has_external_links: has_external_links(&entry.content),
            document_length: entry.content.chars().count() as f64,
            topic_purity: topic_purity(&entry.content),
        }
    }

    fn context(
        entry: &Entry,
        context: &QueryContext,
        query_tokens: &[String],
        now: DateTime<Utc>,
    ) -> ContextFeatures {
        let entry_tokens: Vec<String> = tokens(&entry.title)
            .into_iter()
            .chain(entry.metadata.tags.iter().flat_map(|t| tokens(t)))
            .collect();

        let issue_tokens: Vec<String> = context
            .issue_labels
            .iter()
            .chain(context.issue_title.iter())
            .flat_map(|s| tokens(s))
            .collect();

        let urgency_query = context
            .urgency
            .as_deref()
            .map_or(false, |u| u.eq_ignore_ascii_case("critical") || u.eq_ignore_ascii_case("urgent"));
        let urgency_entry = entry
            .metadata
            .severity
            .as_deref()
            .map_or(false, |s| s.eq_ignore_ascii_case("critical") || s.eq_ignore_ascii_case("urgent"))
            || entry
                .metadata
                .tags
                .iter()
                .any(|t| t.eq_ignore_ascii_case("critical") || t.eq_ignore_ascii_case("urgent"));

        let phase_relevance = context.task_phase.as_deref().map_or(0.0, |phase| {
            let phase_tokens = tokens(phase);
            word_overlap_ratio(&phase_tokens, &entry_tokens)
        });

        let branch_context = context.branch.as_deref().map_or(0.0, |branch| {
            let b = branch.to_lowercase();
            let in_path = entry.path.to_lowercase().contains(&b);
            let in_tags = entry.metadata.tags.iter().any(|t| t.to_lowercase().contains(&b));
            if in_path || in_tags {
                1.0
            } else {
                0.0
            }
        });

        let hour = now.hour();
        let weekday = now.weekday().num_days_from_monday();

        ContextFeatures {
            issue_relevance: word_overlap_ratio(&issue_tokens, &entry_tokens),
            task_phase_relevance: phase_relevance,
            urgency_match: urgency_query && urgency_entry,
            is_working_hours: (9..18).contains(&hour),
            is_weekend: weekday >= 5,
            time_of_day: f64::from(hour) / 23.0,
            query_position: (context.session_history.len() as f64 / 20.0).min(1.0),
            session_length: context.session_history.len() as f64,
            query_complexity: (query_tokens.len() as f64 / 10.0).min(1.0),
            active_project: context.project_id.is_some()
                && context.project_id == entry.metadata.project_id,
            repository_active: context.repository_active,
            branch_context,
        }
    }
}
