//! Free-text operation search for planner consumption.
//!
//! Ranking is plain token overlap over the operation's qualified name,
//! summary, and field names, with bonuses for exact and prefix hits on the
//! qualified name. Deterministic tie-break on the qualified name keeps
//! prompt assembly stable across runs.

use skein_types::Operation;
use skein_util::{overlap_score, tokenize};

use crate::OperationRegistry;

const EXACT_QUALIFIED_MATCH_BONUS: i64 = 50;
const PREFIX_QUALIFIED_MATCH_BONUS: i64 = 25;

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Qualified name of the matched operation.
    pub qualified_name: String,
    /// Match score; higher ranks first.
    pub score: i64,
}

impl OperationRegistry {
    /// Ranks registered operations against a free-text query.
    ///
    /// Returns at most `limit` hits, best first. An empty or non-matching
    /// query yields no hits.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let query_lower = query.trim().to_ascii_lowercase();
        let query_tokens = tokenize(&query_lower);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = self
            .operations()
            .filter_map(|operation| {
                score_operation(operation, &query_lower, &query_tokens).map(|score| SearchHit {
                    qualified_name: operation.qualified_name.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|left, right| {
            right
                .score
                .cmp(&left.score)
                .then_with(|| left.qualified_name.cmp(&right.qualified_name))
        });
        hits.truncate(limit);
        hits
    }
}

fn score_operation(operation: &Operation, query_lower: &str, query_tokens: &[String]) -> Option<i64> {
    let haystack = build_haystack(operation);
    let base_score = overlap_score(&haystack, query_tokens)?;

    let qualified_lower = operation.qualified_name.to_ascii_lowercase();
    let exact_bonus = if qualified_lower.contains(query_lower) {
        EXACT_QUALIFIED_MATCH_BONUS
    } else {
        0
    };
    let prefix_bonus = if query_tokens
        .first()
        .map(|token| qualified_lower.starts_with(token.as_str()))
        .unwrap_or(false)
    {
        PREFIX_QUALIFIED_MATCH_BONUS
    } else {
        0
    };

    Some(base_score + exact_bonus + prefix_bonus)
}

fn build_haystack(operation: &Operation) -> String {
    let mut haystack = String::new();
    push_term(&mut haystack, &operation.qualified_name);
    push_term(&mut haystack, &operation.qualified_name.replace('_', " "));
    push_term(&mut haystack, &operation.summary);
    for field_name in operation.input_schema.fields.keys() {
        push_term(&mut haystack, field_name);
    }
    for field_name in operation.output_schema.fields.keys() {
        push_term(&mut haystack, field_name);
    }
    haystack
}

fn push_term(buffer: &mut String, term: &str) {
    let trimmed = term.trim();
    if trimmed.is_empty() {
        return;
    }
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(trimmed);
}
