//! Query Compilation
//!
//! Turns the four query languages (simple, phrase, boolean, fuzzy) into FTS5
//! MATCH expressions. All user terms are emitted as quoted strings so FTS5
//! operators cannot be injected through query text.

use std::collections::BTreeSet;

use crate::error::{EngineError, Result};
use crate::model::QueryType;

// ============================================================================
// TERM SANITIZATION
// ============================================================================

/// Quote a bare term for FTS5. Internal double quotes are doubled; terms that
/// tokenize to nothing are dropped by the callers.
fn quote_term(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

/// Split query text into bare terms, stripping characters FTS5 treats as
/// syntax. Keeps alphanumerics plus `_` and `-`.
pub fn query_terms(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

// ============================================================================
// COMPILATION
// ============================================================================

/// Compile a query string into an FTS5 MATCH expression.
///
/// Fuzzy queries need the index vocabulary; `lookup` resolves a term to its
/// dictionary neighbours within the edit-distance budget.
pub fn compile(
    text: &str,
    query_type: QueryType,
    lookup: impl Fn(&str, usize) -> Vec<String>,
) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidQuery("empty query".into()));
    }

    match query_type {
        QueryType::Simple => compile_simple(trimmed),
        QueryType::Phrase => compile_phrase(trimmed),
        QueryType::Boolean => compile_boolean(trimmed),
        QueryType::Fuzzy => compile_fuzzy(trimmed, lookup),
    }
}

/// Simple: every term contributes relevance but none is a hard requirement.
/// BM25 sums per-term scores, so documents matching more terms rank first.
fn compile_simple(text: &str) -> Result<String> {
    let terms = query_terms(text);
    if terms.is_empty() {
        return Err(EngineError::InvalidQuery(
            "query contains no searchable terms".into(),
        ));
    }
    Ok(terms
        .iter()
        .map(|t| quote_term(t))
        .collect::<Vec<_>>()
        .join(" OR "))
}

/// Phrase: one exact adjacent sequence
fn compile_phrase(text: &str) -> Result<String> {
    let inner = text.trim_matches('"');
    let terms = query_terms(inner);
    if terms.is_empty() {
        return Err(EngineError::InvalidQuery(
            "phrase contains no searchable terms".into(),
        ));
    }
    Ok(quote_term(&terms.join(" ")))
}

/// Fuzzy: each term becomes an OR-group of itself plus dictionary neighbours
/// within edit distance ⌈len/4⌉ (min 1)
fn compile_fuzzy(
    text: &str,
    lookup: impl Fn(&str, usize) -> Vec<String>,
) -> Result<String> {
    let terms = query_terms(text);
    if terms.is_empty() {
        return Err(EngineError::InvalidQuery(
            "query contains no searchable terms".into(),
        ));
    }

    let groups: Vec<String> = terms
        .iter()
        .map(|term| {
            let budget = max_edit_distance(term.chars().count());
            // BTreeSet: deterministic ordering, dedups the term itself
            let mut variants: BTreeSet<String> = BTreeSet::new();
            variants.insert(term.clone());
            for neighbour in lookup(term, budget) {
                variants.insert(neighbour);
            }
            let quoted: Vec<String> = variants.iter().map(|v| quote_term(v)).collect();
            if quoted.len() == 1 {
                quoted.into_iter().next().unwrap()
            } else {
                format!("({})", quoted.join(" OR "))
            }
        })
        .collect();

    Ok(groups.join(" AND "))
}

/// Edit-distance budget for a fuzzy term: ⌈len/4⌉, minimum 1
pub fn max_edit_distance(term_len: usize) -> usize {
    ((term_len + 3) / 4).max(1)
}

// ============================================================================
// BOOLEAN PARSER
// ============================================================================

/// Boolean query AST. Precedence NOT > AND > OR.
#[derive(Debug, Clone, PartialEq)]
enum BoolExpr {
    Term(String),
    Phrase(String),
    Not(Box<BoolExpr>),
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Phrase(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize_boolean(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                let mut phrase = String::new();
                let mut closed = false;
                for ch in chars.by_ref() {
                    if ch == '"' {
                        closed = true;
                        break;
                    }
                    phrase.push(ch);
                }
                if !closed {
                    return Err(EngineError::InvalidQuery("unterminated phrase".into()));
                }
                tokens.push(Token::Phrase(phrase));
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || ch == '(' || ch == ')' || ch == '"' {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                match word.to_uppercase().as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "NOT" => tokens.push(Token::Not),
                    _ => tokens.push(Token::Word(word)),
                }
            }
        }
    }

    Ok(tokens)
}

struct BoolParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl BoolParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    /// or := and (OR and)*
    fn parse_or(&mut self) -> Result<BoolExpr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            let right = self.parse_and()?;
            left = BoolExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// and := unary ((AND | implicit) unary)*
    fn parse_and(&mut self) -> Result<BoolExpr> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.next();
                    let right = self.parse_unary()?;
                    left = BoolExpr::And(Box::new(left), Box::new(right));
                }
                // Adjacent operands without an operator are an implicit AND
                Some(Token::Word(_)) | Some(Token::Phrase(_)) | Some(Token::Not)
                | Some(Token::LParen) => {
                    let right = self.parse_unary()?;
                    left = BoolExpr::And(Box::new(left), Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    /// unary := NOT unary | atom
    fn parse_unary(&mut self) -> Result<BoolExpr> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(BoolExpr::Not(Box::new(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<BoolExpr> {
        match self.next() {
            Some(Token::Word(w)) => {
                let terms = query_terms(&w);
                if terms.is_empty() {
                    return Err(EngineError::InvalidQuery(format!(
                        "unusable term: {w:?}"
                    )));
                }
                Ok(BoolExpr::Term(terms.join(" ")))
            }
            Some(Token::Phrase(p)) => {
                let terms = query_terms(&p);
                if terms.is_empty() {
                    return Err(EngineError::InvalidQuery("empty phrase".into()));
                }
                Ok(BoolExpr::Phrase(terms.join(" ")))
            }
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err(EngineError::InvalidQuery("unbalanced parentheses".into())),
                }
            }
            other => Err(EngineError::InvalidQuery(format!(
                "unexpected token: {other:?}"
            ))),
        }
    }
}

/// Compile a boolean query. Malformed syntax → `InvalidQuery`.
fn compile_boolean(text: &str) -> Result<String> {
    let tokens = tokenize_boolean(text)?;
    if tokens.is_empty() {
        return Err(EngineError::InvalidQuery("empty boolean query".into()));
    }
    let mut parser = BoolParser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(EngineError::InvalidQuery(
            "trailing tokens after boolean expression".into(),
        ));
    }
    emit_fts5(&expr)
}

/// Emit FTS5 syntax. FTS5's NOT is binary set-difference, so unary NOT is
/// only expressible on the right side of an AND; anything else is rejected.
fn emit_fts5(expr: &BoolExpr) -> Result<String> {
    match expr {
        BoolExpr::Term(t) | BoolExpr::Phrase(t) => Ok(quote_term(t)),
        BoolExpr::And(a, b) => match (a.as_ref(), b.as_ref()) {
            (BoolExpr::Not(_), BoolExpr::Not(_)) => Err(EngineError::InvalidQuery(
                "NOT must be combined with a positive term".into(),
            )),
            (BoolExpr::Not(n), other) | (other, BoolExpr::Not(n)) => Ok(format!(
                "({} NOT {})",
                emit_fts5(other)?,
                emit_fts5(n)?
            )),
            _ => Ok(format!("({} AND {})", emit_fts5(a)?, emit_fts5(b)?)),
        },
        BoolExpr::Or(a, b) => {
            if matches!(a.as_ref(), BoolExpr::Not(_)) || matches!(b.as_ref(), BoolExpr::Not(_)) {
                return Err(EngineError::InvalidQuery(
                    "NOT cannot be a direct operand of OR".into(),
                ));
            }
            Ok(format!("({} OR {})", emit_fts5(a)?, emit_fts5(b)?))
        }
        BoolExpr::Not(_) => Err(EngineError::InvalidQuery(
            "a query cannot be a pure negation".into(),
        )),
    }
}

// ============================================================================
// EDIT DISTANCE
// ============================================================================

/// Levenshtein distance with the classic two-row dynamic program
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
