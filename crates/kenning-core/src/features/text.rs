//! Text Similarity Primitives
//!
//! Token-level and character-level similarity measures shared by the
//! proximity and semantic feature categories. All scores land in [0,1].

use std::collections::{HashMap, HashSet};

use crate::index::{levenshtein, query_terms};

/// Character-similarity inputs are capped at this many chars; edit distance
/// is quadratic
const CHAR_SIM_CAP: usize = 200;

/// Tokenize free text the same way queries are tokenized
pub fn tokens(text: &str) -> Vec<String> {
    query_terms(text)
}

/// Term-frequency map
fn tf(tokens: &[String]) -> HashMap<&str, f64> {
    let mut map: HashMap<&str, f64> = HashMap::new();
    for t in tokens {
        *map.entry(t.as_str()).or_default() += 1.0;
    }
    map
}

/// Cosine similarity over term-frequency vectors
pub fn cosine_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let ta = tf(a);
    let tb = tf(b);
    let dot: f64 = ta
        .iter()
        .filter_map(|(term, fa)| tb.get(term).map(|fb| fa * fb))
        .sum();
    let norm_a: f64 = ta.values().map(|f| f * f).sum::<f64>().sqrt();
    let norm_b: f64 = tb.values().map(|f| f * f).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Jaccard similarity over token sets
pub fn jaccard_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let sa: HashSet<&str> = a.iter().map(String::as_str).collect();
    let sb: HashSet<&str> = b.iter().map(String::as_str).collect();
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Fraction of query tokens present in the document tokens
pub fn word_overlap_ratio(query: &[String], doc: &[String]) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let doc_set: HashSet<&str> = doc.iter().map(String::as_str).collect();
    let overlap = query.iter().filter(|t| doc_set.contains(t.as_str())).count();
    overlap as f64 / query.len() as f64
}

/// Normalized Levenshtein similarity over the first `CHAR_SIM_CAP` chars
pub fn character_similarity(a: &str, b: &str) -> f64 {
    let a: String = a.chars().take(CHAR_SIM_CAP).collect::<String>().to_lowercase();
    let b: String = b.chars().take(CHAR_SIM_CAP).collect::<String>().to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// Sentence-length and word-length inverse: long sentences of long words
/// read worse
pub fn readability_score(text: &str) -> f64 {
    let sentences: Vec<&str> = text
        .split(|c| c == '.' || c == '!' || c == '?')
        .filter(|s| !s.trim().is_empty())
        .collect();
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let avg_sentence_words = words.len() as f64 / sentences.len().max(1) as f64;
    let avg_word_chars =
        words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64;
    1.0 / (1.0 + avg_sentence_words / 25.0 + avg_word_chars / 10.0)
}

/// Presence density of advanced technical constructs
pub fn complexity_score(text: &str) -> f64 {
    const MARKERS: &[&str] = &[
        "async", "concurren", "distributed", "algorithm", "recursion", "polymorph", "generic",
        "transaction", "consensus", "serializ", "invariant", "amortized",
    ];
    let lower = text.to_lowercase();
    let present = MARKERS.iter().filter(|m| lower.contains(**m)).count();
    (present as f64 / 4.0).min(1.0)
}

/// Fenced code blocks
pub fn has_code_examples(text: &str) -> bool {
    text.contains("```") || text.contains("<code>")
}

/// Image markup
pub fn has_image_diagrams(text: &str) -> bool {
    text.contains("![") || text.contains("<img")
}

/// URLs
pub fn has_external_links(text: &str) -> bool {
    text.contains("http://") || text.contains("https://")
}

/// Shannon entropy of the top-term distribution, inverted and normalized:
/// 1.0 means the document concentrates on one topic
pub fn topic_purity(text: &str) -> f64 {
    let toks = tokens(text);
    if toks.is_empty() {
        return 0.0;
    }
    let mut freq = tf(&toks);
    let mut counts: Vec<f64> = freq.drain().map(|(_, c)| c).collect();
    counts.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    counts.truncate(10);

    let n = counts.len();
    if n <= 1 {
        return 1.0;
    }
    let total: f64 = counts.iter().sum();
    let entropy: f64 = counts
        .iter()
        .map(|c| {
            let p = c / total;
            -p * p.ln()
        })
        .sum();
    let max_entropy = (n as f64).ln();
    (1.0 - entropy / max_entropy).clamp(0.0, 1.0)
}
