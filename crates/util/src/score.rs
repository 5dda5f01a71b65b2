//! Token-overlap scoring used by registry search.
//!
//! Deterministic and cheap: queries are tokenized on non-alphanumeric
//! boundaries and scored by how many tokens the haystack contains, with a
//! small bonus for substring hits of the full query. No semantic ranking.

const TOKEN_HIT_SCORE: i64 = 10;
const FULL_QUERY_SUBSTRING_BONUS: i64 = 15;

/// Splits text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|character: char| !character.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
        .collect()
}

/// Scores a haystack against pre-tokenized query terms.
///
/// Returns `None` when no token matches, so callers can filter
/// non-matching entries before ranking.
pub fn overlap_score(haystack: &str, query_tokens: &[String]) -> Option<i64> {
    if query_tokens.is_empty() {
        return None;
    }

    let haystack_lower = haystack.to_ascii_lowercase();
    let hit_count = query_tokens.iter().filter(|token| haystack_lower.contains(token.as_str())).count();
    if hit_count == 0 {
        return None;
    }

    let mut score = hit_count as i64 * TOKEN_HIT_SCORE;
    let joined_query = query_tokens.join(" ");
    if haystack_lower.contains(&joined_query) {
        score += FULL_QUERY_SUBSTRING_BONUS;
    }
    Some(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_punctuation_and_lowercases() {
        assert_eq!(tokenize("Create-Card_v2 now!"), vec!["create", "card", "v2", "now"]);
        assert!(tokenize("---").is_empty());
    }

    #[test]
    fn overlap_score_counts_token_hits() {
        let query = tokenize("create card");
        let partial = overlap_score("tracker create issue", &query).expect("one token matches");
        let full = overlap_score("boards create card", &query).expect("both tokens match");
        assert!(full > partial, "more overlapping tokens must outrank fewer");
    }

    #[test]
    fn no_match_returns_none() {
        let query = tokenize("deploy");
        assert!(overlap_score("boards create card", &query).is_none());
        assert!(overlap_score("anything", &[]).is_none());
    }
}
