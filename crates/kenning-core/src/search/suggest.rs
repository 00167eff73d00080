//! Query Suggestions
//!
//! Popular prior queries matching the input prefix, plus a small curated
//! list of domain stems. Deduplicated, capped at 10.

/// Maximum suggestions returned
pub const MAX_SUGGESTIONS: usize = 10;

/// Curated domain stems: query word → expansions
const DOMAIN_STEMS: &[(&str, &[&str])] = &[
    ("error", &["error handling", "debugging", "troubleshooting"]),
    ("auth", &["authentication", "authorization", "login flow"]),
    ("test", &["testing strategy", "unit tests", "integration tests"]),
    ("deploy", &["deployment", "rollback", "release checklist"]),
    ("performance", &["performance tuning", "profiling", "caching"]),
    ("database", &["database migrations", "query optimization", "connection pooling"]),
    ("config", &["configuration", "environment variables", "feature flags"]),
];

/// Build suggestions for a query prefix.
///
/// `popular` is the analytics-ranked list of prior queries, most frequent
/// first; entries equal to the input are skipped.
pub fn build_suggestions(input: &str, popular: &[String], limit: usize) -> Vec<String> {
    let limit = limit.min(MAX_SUGGESTIONS);
    let input_lower = input.trim().to_lowercase();
    let mut out: Vec<String> = Vec::new();

    // Popular prior queries beginning with the prefix
    for q in popular {
        if out.len() >= limit {
            break;
        }
        let q_lower = q.to_lowercase();
        if q_lower != input_lower
            && q_lower.starts_with(&input_lower)
            && !out.iter().any(|s| s.eq_ignore_ascii_case(q))
        {
            out.push(q.clone());
        }
    }

    // Curated stems triggered by any query word
    for word in input_lower.split_whitespace() {
        for (stem, expansions) in DOMAIN_STEMS {
            if word.starts_with(stem) {
                for expansion in *expansions {
                    if out.len() >= limit {
                        return out;
                    }
                    if !out.iter().any(|s| s.eq_ignore_ascii_case(expansion))
                        && !expansion.eq_ignore_ascii_case(&input_lower)
                    {
                        out.push((*expansion).to_string());
                    }
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_matches_from_popular() {
        let popular = vec![
            "auth token refresh".to_string(),
            "auth login".to_string(),
            "database pooling".to_string(),
        ];
        let out = build_suggestions("auth", &popular, 10);
        assert!(out.contains(&"auth token refresh".to_string()));
        assert!(out.contains(&"auth login".to_string()));
        assert!(!out.contains(&"database pooling".to_string()));
    }

    #[test]
    fn test_curated_stems() {
        let out = build_suggestions("error", &[], 10);
        assert!(out.contains(&"error handling".to_string()));
        assert!(out.contains(&"debugging".to_string()));
    }

    #[test]
    fn test_dedup_and_cap() {
        let popular: Vec<String> = (0..20).map(|i| format!("error case {i}")).collect();
        let out = build_suggestions("error", &popular, 10);
        assert!(out.len() <= MAX_SUGGESTIONS);
        let mut unique = out.clone();
        unique.dedup();
        assert_eq!(unique.len(), out.len());
    }

    #[test]
    fn test_input_itself_excluded() {
        let popular = vec!["error handling".to_string()];
        let out = build_suggestions("error handling", &popular, 10);
        assert!(!out.iter().any(|s| s == "error handling"));
    }
}
