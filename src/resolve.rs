//! Fuzzy resolution of user-typed names
//!
//! A deterministic precedence ladder: exact, case-insensitive exact, unique
//! case-insensitive prefix, unique case-insensitive substring. Ambiguity at
//! any stage is an error that enumerates the contenders rather than picking
//! one; a total miss suggests the closest candidates by edit distance.
//! Candidate iteration order never affects the outcome.

use itertools::Itertools;

use crate::error::ServiceError;

/// Cap on "did you mean" suggestions
const MAX_SUGGESTIONS: usize = 5;

/// Resolve `query` against a set of candidate names
pub fn resolve<'a>(
    query: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Result<String, ServiceError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ServiceError::validation("Nothing to look for."));
    }

    // Sort up front so every later stage is order-independent
    let candidates = candidates.into_iter().sorted_unstable().collect_vec();
    let query_lower = query.to_lowercase();

    // 1. Exact match wins outright
    if let Some(found) = candidates.iter().find(|&&c| c == query) {
        return Ok((*found).to_string());
    }

    // 2. Case-insensitive exact
    let ci_matches = candidates
        .iter()
        .filter(|c| c.to_lowercase() == query_lower)
        .collect_vec();
    match ci_matches.len() {
        1 => return Ok(ci_matches[0].to_string()),
        n if n > 1 => return Err(ambiguity(query, &ci_matches)),
        _ => {}
    }

    // 3. Unique case-insensitive prefix
    let prefix_matches = candidates
        .iter()
        .filter(|c| c.to_lowercase().starts_with(&query_lower))
        .collect_vec();
    match prefix_matches.len() {
        1 => return Ok(prefix_matches[0].to_string()),
        n if n > 1 => return Err(ambiguity(query, &prefix_matches)),
        _ => {}
    }

    // 4. Unique case-insensitive substring
    let substring_matches = candidates
        .iter()
        .filter(|c| c.to_lowercase().contains(&query_lower))
        .collect_vec();
    match substring_matches.len() {
        1 => return Ok(substring_matches[0].to_string()),
        n if n > 1 => return Err(ambiguity(query, &substring_matches)),
        _ => {}
    }

    // 5. Nothing matched, suggest the nearest few by edit distance
    let suggestions = candidates
        .iter()
        .map(|c| (strsim::levenshtein(&c.to_lowercase(), &query_lower), *c))
        .sorted_unstable()
        .take(MAX_SUGGESTIONS)
        .map(|(_, c)| c)
        .collect_vec();

    if suggestions.is_empty() {
        Err(ServiceError::not_found(format!(
            "There's no '{query}' here."
        )))
    } else {
        Err(ServiceError::not_found(format!(
            "There's no '{query}' here. Did you mean: {}?",
            suggestions.join(", ")
        )))
    }
}

/// Resolve a room argument, where the literal `here` means the actor's
/// current room
pub fn resolve_room<'a>(
    query: &str,
    current_room_id: &str,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Result<String, ServiceError> {
    if query.trim() == "here" {
        return Ok(current_room_id.to_string());
    }
    resolve(query, candidates)
}

fn ambiguity(query: &str, matches: &[&&str]) -> ServiceError {
    ServiceError::validation(format!(
        "'{query}' could be any of: {}. Be more specific.",
        matches.iter().join(", ")
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn names() -> Vec<&'static str> {
        vec!["oak door", "Oak Table", "iron gate", "apple", "Apple Pie"]
    }

    #[test]
    fn test_exact_beats_everything() {
        assert_eq!(resolve("oak door", names()).unwrap(), "oak door");
    }

    #[test]
    fn test_ci_exact() {
        assert_eq!(resolve("IRON GATE", names()).unwrap(), "iron gate");
    }

    #[test]
    fn test_ci_exact_ambiguous() {
        // "apple" is exact for "apple" so go one step further
        let err = resolve("oak", names()).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        let msg = err.to_string();
        assert!(msg.contains("oak door") && msg.contains("Oak Table"));
    }

    #[test]
    fn test_unique_prefix() {
        assert_eq!(resolve("iro", names()).unwrap(), "iron gate");
    }

    #[test]
    fn test_unique_substring() {
        assert_eq!(resolve("gate", names()).unwrap(), "iron gate");
    }

    #[test]
    fn test_exact_wins_over_prefix_of_other() {
        // "apple" is an exact match even though it prefixes "Apple Pie"
        assert_eq!(resolve("apple", names()).unwrap(), "apple");
    }

    #[test]
    fn test_suggestions_on_miss() {
        let err = resolve("aple", names()).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(err.to_string().contains("apple"));
    }

    #[test]
    fn test_here_resolves_to_current_room() {
        assert_eq!(
            resolve_room("here", "tavern", vec!["start"]).unwrap(),
            "tavern"
        );
    }

    #[test]
    fn test_empty_candidates() {
        let err = resolve("anything", vec![]).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    proptest! {
        // The ladder is insensitive to candidate ordering
        #[test]
        fn prop_resolution_is_order_independent(
            query in "[a-zA-Z ]{1,12}",
            mut candidates in proptest::collection::vec("[a-zA-Z ]{1,12}", 0..8),
        ) {
            let forward = resolve(&query, candidates.iter().map(String::as_str));
            candidates.reverse();
            let backward = resolve(&query, candidates.iter().map(String::as_str));
            prop_assert_eq!(forward, backward);
        }

        // Resolution is a function of its inputs
        #[test]
        fn prop_resolution_is_deterministic(
            query in "[a-z ]{1,10}",
            candidates in proptest::collection::vec("[a-z ]{1,10}", 0..6),
        ) {
            let once = resolve(&query, candidates.iter().map(String::as_str));
            let twice = resolve(&query, candidates.iter().map(String::as_str));
            prop_assert_eq!(once, twice);
        }
    }
}
