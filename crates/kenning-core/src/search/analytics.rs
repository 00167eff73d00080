//! Query Analytics
//!
//! Per-query counters, a bounded slow-query ring, and aggregate reporting.
//! Counters are eventually consistent: they may lag reads but never decrease.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AnalyticsConfig;
use crate::error::Result;

use super::cache::CacheMetrics;

/// Slow-query ring capacity
const SLOW_QUERY_CAPACITY: usize = 100;

/// Snapshot document schema version
const SNAPSHOT_MODEL_VERSION: u32 = 1;

// ============================================================================
// RECORDS
// ============================================================================

/// Aggregated statistics for one distinct query string
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStat {
    pub count: u64,
    pub total_response_ms: u64,
    pub total_results: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

/// One entry in the slow-query ring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowQuery {
    pub query: String,
    pub response_ms: u64,
    pub result_count: usize,
    pub at: DateTime<Utc>,
}

/// Aggregate analytics surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAnalytics {
    pub total_queries: u64,
    pub unique_queries: usize,
    pub average_query_length: f64,
    /// (query, count), most frequent first
    pub top_queries: Vec<(String, u64)>,
    pub average_response_time_ms: f64,
    pub slow_queries: Vec<SlowQuery>,
    pub cache_metrics: CacheMetrics,
    pub average_results: f64,
    pub zero_result_queries: u64,
    /// Observed clicks / queries; calibration pending
    pub click_through_rate: f64,
}

// ============================================================================
// TRACKER
// ============================================================================

/// In-memory analytics tracker
pub struct QueryAnalytics {
    config: AnalyticsConfig,
    stats: Mutex<HashMap<String, QueryStat>>,
    slow: Mutex<VecDeque<SlowQuery>>,
    total_queries: AtomicU64,
    zero_result_queries: AtomicU64,
    clicks: AtomicU64,
}

impl QueryAnalytics {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(HashMap::new()),
            slow: Mutex::new(VecDeque::with_capacity(SLOW_QUERY_CAPACITY)),
            total_queries: AtomicU64::new(0),
            zero_result_queries: AtomicU64::new(0),
            clicks: AtomicU64::new(0),
        }
    }

    /// Record one executed query
    pub fn record_query(&self, query: &str, result_count: usize, response_ms: u64, cache_hit: bool) {
        if !self.config.tracking_enabled {
            return;
        }
        let now = Utc::now();
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        if result_count == 0 {
            self.zero_result_queries.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut stats) = self.stats.lock() {
            let stat = stats.entry(query.to_lowercase()).or_default();
            stat.count += 1;
            stat.total_response_ms += response_ms;
            stat.total_results += result_count as u64;
            if cache_hit {
                stat.cache_hits += 1;
            }
            stat.last_seen = Some(now);
        }

        if response_ms > self.config.slow_query_threshold_ms {
            if let Ok(mut slow) = self.slow.lock() {
                if slow.len() >= SLOW_QUERY_CAPACITY {
                    slow.pop_front();
                }
                slow.push_back(SlowQuery {
                    query: query.to_string(),
                    response_ms,
                    result_count,
                    at: now,
                });
            }
        }
    }

    /// Record one failed query
    pub fn record_failure(&self, query: &str) {
        if !self.config.tracking_enabled {
            return;
        }
        if let Ok(mut stats) = self.stats.lock() {
            let stat = stats.entry(query.to_lowercase()).or_default();
            stat.failures += 1;
            stat.last_seen = Some(Utc::now());
        }
    }

    /// Record a click on a returned result
    pub fn record_click(&self) {
        self.clicks.fetch_add(1, Ordering::Relaxed);
    }

    /// Most frequent queries, most frequent first
    pub fn popular_queries(&self, limit: usize) -> Vec<String> {
        let stats = match self.stats.lock() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let mut ranked: Vec<(String, u64)> = stats
            .iter()
            .map(|(q, s)| (q.clone(), s.count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().take(limit).map(|(q, _)| q).collect()
    }

    /// Drop records older than the retention window
    pub fn prune(&self) {
        let cutoff = Utc::now() - Duration::days(i64::from(self.config.retention_days));
        if let Ok(mut stats) = self.stats.lock() {
            stats.retain(|_, s| s.last_seen.map_or(false, |t| t >= cutoff));
        }
    }

    /// Aggregate analytics over an optional observation window
    pub fn analytics(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        cache_metrics: CacheMetrics,
    ) -> SearchAnalytics {
        let stats = match self.stats.lock() {
            Ok(s) => s,
            Err(_) => return SearchAnalytics::default(),
        };

        let in_window = |t: Option<DateTime<Utc>>| -> bool {
            match t {
                Some(t) => from.map_or(true, |f| t >= f) && to.map_or(true, |u| t <= u),
                None => false,
            }
        };

        let mut total_queries = 0u64;
        let mut total_ms = 0u64;
        let mut total_results = 0u64;
        let mut query_len_sum = 0usize;
        let mut top: Vec<(String, u64)> = Vec::new();
        let mut unique = 0usize;

        for (query, stat) in stats.iter() {
            if !in_window(stat.last_seen) {
                continue;
            }
            unique += 1;
            total_queries += stat.count;
            total_ms += stat.total_response_ms;
            total_results += stat.total_results;
            query_len_sum += query.len();
            top.push((query.clone(), stat.count));
        }
        top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top.truncate(10);

        let slow = self
            .slow
            .lock()
            .map(|s| {
                s.iter()
                    .filter(|q| in_window(Some(q.at)))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let global_total = self.total_queries.load(Ordering::Relaxed);
        SearchAnalytics {
            total_queries,
            unique_queries: unique,
            average_query_length: if unique == 0 {
                0.0
            } else {
                query_len_sum as f64 / unique as f64
            },
            top_queries: top,
            average_response_time_ms: if total_queries == 0 {
                0.0
            } else {
                total_ms as f64 / total_queries as f64
            },
            slow_queries: slow,
            cache_metrics,
            average_results: if total_queries == 0 {
                0.0
            } else {
                total_results as f64 / total_queries as f64
            },
            zero_result_queries: self.zero_result_queries.load(Ordering::Relaxed),
            click_through_rate: if global_total == 0 {
                0.0
            } else {
                self.clicks.load(Ordering::Relaxed) as f64 / global_total as f64
            },
        }
    }

    /// Write an analytics snapshot JSON document to the sidecar directory
    pub fn snapshot(&self, dir: &Path, cache_metrics: CacheMetrics) -> Result<std::path::PathBuf> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Snapshot {
            model_version: u32,
            taken_at: DateTime<Utc>,
            analytics: SearchAnalytics,
        }

        let snapshot = Snapshot {
            model_version: SNAPSHOT_MODEL_VERSION,
            taken_at: Utc::now(),
            analytics: self.analytics(None, None, cache_metrics),
        };
        let path = dir.join(format!(
            "analytics-{}.json",
            snapshot.taken_at.format("%Y%m%dT%H%M%S")
        ));
        std::fs::write(&path, serde_json::to_vec_pretty(&snapshot).unwrap_or_default())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analytics() -> QueryAnalytics {
        QueryAnalytics::new(AnalyticsConfig::default())
    }

    #[test]
    fn test_record_and_aggregate() {
        let a = analytics();
        a.record_query("auth errors", 5, 20, false);
        a.record_query("auth errors", 3, 40, true);
        a.record_query("rare query", 0, 10, false);

        let report = a.analytics(None, None, CacheMetrics::default());
        assert_eq!(report.total_queries, 3);
        assert_eq!(report.unique_queries, 2);
        assert_eq!(report.zero_result_queries, 1);
        assert_eq!(report.top_queries[0].0, "auth errors");
        assert!((report.average_results - 8.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_slow_query_ring_is_bounded() {
        let a = QueryAnalytics::new(AnalyticsConfig {
            slow_query_threshold_ms: 0,
            ..Default::default()
        });
        for i in 0..150 {
            a.record_query(&format!("q{i}"), 1, 5, false);
        }
        let slow = a.slow.lock().unwrap();
        assert_eq!(slow.len(), SLOW_QUERY_CAPACITY);
        // Oldest entries were dropped
        assert_eq!(slow.front().unwrap().query, "q50");
    }

    #[test]
    fn test_popular_queries_ranked() {
        let a = analytics();
        for _ in 0..3 {
            a.record_query("auth login", 1, 5, false);
        }
        a.record_query("database", 1, 5, false);
        let popular = a.popular_queries(5);
        assert_eq!(popular[0], "auth login");
    }

    #[test]
    fn test_click_through_rate() {
        let a = analytics();
        a.record_query("q", 1, 5, false);
        a.record_query("q", 1, 5, false);
        a.record_click();
        let report = a.analytics(None, None, CacheMetrics::default());
        assert!((report.click_through_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_tracking_disabled_is_silent() {
        let a = QueryAnalytics::new(AnalyticsConfig {
            tracking_enabled: false,
            ..Default::default()
        });
        a.record_query("q", 1, 5, false);
        let report = a.analytics(None, None, CacheMetrics::default());
        assert_eq!(report.total_queries, 0);
    }

    #[test]
    fn test_snapshot_writes_model_version() {
        let a = analytics();
        a.record_query("q", 1, 5, false);
        let dir = tempfile::tempdir().unwrap();
        let path = a.snapshot(dir.path(), CacheMetrics::default()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"modelVersion\": 1"));
    }
}
