//! Snippet Extraction & Highlighting
//!
//! Extracts windows of content centred on query-term hits, wraps hits in
//! `<mark>…</mark>`, and records byte offsets plus surrounding context.
//! Overlapping windows are deduplicated.

use crate::model::Snippet;

/// Characters of context captured on each side of a snippet window
const CONTEXT_CHARS: usize = 50;

// ============================================================================
// CASE-INSENSITIVE MATCHING
// ============================================================================

/// All case-insensitive occurrences of `needle` in `haystack`, as byte ranges
pub fn find_all_ci(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    let needle_lower: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();
    if needle_lower.is_empty() {
        return Vec::new();
    }
    let hay: Vec<(usize, char)> = haystack.char_indices().collect();
    let mut out = Vec::new();

    'outer: for i in 0..hay.len() {
        let mut j = 0;
        let mut k = i;
        while j < needle_lower.len() {
            if k >= hay.len() {
                continue 'outer;
            }
            for c in hay[k].1.to_lowercase() {
                if j >= needle_lower.len() || c != needle_lower[j] {
                    continue 'outer;
                }
                j += 1;
            }
            k += 1;
        }
        let start = hay[i].0;
        let end = if k < hay.len() { hay[k].0 } else { haystack.len() };
        out.push((start, end));
    }
    out
}

/// Occurrences of any term, sorted by position
fn find_term_hits(text: &str, terms: &[String]) -> Vec<(usize, usize)> {
    let mut hits: Vec<(usize, usize)> = terms
        .iter()
        .flat_map(|t| find_all_ci(text, t))
        .collect();
    hits.sort_unstable();
    hits
}

/// Count of all term occurrences in `text`
pub fn count_matches(text: &str, terms: &[String]) -> usize {
    terms.iter().map(|t| find_all_ci(text, t).len()).sum()
}

// ============================================================================
// WINDOWING
// ============================================================================

/// Expand a byte range outward by `chars` characters on each side, staying on
/// char boundaries
fn expand_window(text: &str, start: usize, end: usize, chars: usize) -> (usize, usize) {
    let mut s = start;
    for _ in 0..chars {
        match text[..s].char_indices().next_back() {
            Some((idx, _)) => s = idx,
            None => break,
        }
    }
    let mut e = end;
    for _ in 0..chars {
        match text[e..].chars().next() {
            Some(c) => e += c.len_utf8(),
            None => break,
        }
    }
    (s, e)
}

/// Wrap every term occurrence inside `window` in `<mark>…</mark>`.
/// Overlapping term hits are merged before marking.
pub fn highlight(window: &str, terms: &[String]) -> String {
    let mut hits = find_term_hits(window, terms);
    if hits.is_empty() {
        return window.to_string();
    }

    // Merge overlapping ranges
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (s, e) in hits.drain(..) {
        match merged.last_mut() {
            Some((_, last_end)) if s <= *last_end => *last_end = (*last_end).max(e),
            _ => merged.push((s, e)),
        }
    }

    let mut out = String::with_capacity(window.len() + merged.len() * 13);
    let mut cursor = 0;
    for (s, e) in merged {
        out.push_str(&window[cursor..s]);
        out.push_str("<mark>");
        out.push_str(&window[s..e]);
        out.push_str("</mark>");
        cursor = e;
    }
    out.push_str(&window[cursor..]);
    out
}

// ============================================================================
// SNIPPET GENERATION
// ============================================================================

/// Extract up to `max_snippets` snippets of ~`snippet_length` characters,
/// each centred on a term hit. Hits falling inside an already-emitted window
/// are skipped.
pub fn extract_snippets(
    text: &str,
    terms: &[String],
    snippet_length: usize,
    max_snippets: usize,
) -> Vec<Snippet> {
    let hits = find_term_hits(text, terms);
    let mut snippets = Vec::new();
    let mut last_window_end = 0usize;

    for (hit_start, hit_end) in hits {
        if snippets.len() >= max_snippets {
            break;
        }
        // Deduplicate: skip hits inside the previous window
        if !snippets.is_empty() && hit_start < last_window_end {
            continue;
        }

        let hit_chars = text[hit_start..hit_end].chars().count();
        let pad = snippet_length.saturating_sub(hit_chars) / 2;
        let (win_start, win_end) = expand_window(text, hit_start, hit_end, pad);
        let window = &text[win_start..win_end];

        let (ctx_start, ctx_end) = expand_window(text, win_start, win_end, CONTEXT_CHARS);

        snippets.push(Snippet {
            text: window.to_string(),
            highlighted: highlight(window, terms),
            start: win_start,
            end: win_end,
            context: text[ctx_start..ctx_end].to_string(),
        });
        last_window_end = win_end;
    }

    snippets
}

/// Highlighted title when it contains any term, else `None`
pub fn title_snippet(title: &str, terms: &[String]) -> Option<String> {
    if count_matches(title, terms) == 0 {
        return None;
    }
    Some(highlight(title, terms))
}
