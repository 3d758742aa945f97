//! Conversation-list filtering: each filter character matches anywhere
//! after the previous one (an interleaved-wildcard pattern), checked
//! case-insensitively against every whitespace token of a display name.

/// True when `filter` matches `display_name`. An empty filter matches all.
pub fn matches(filter: &str, display_name: &str) -> bool {
    if filter.is_empty() {
        return true;
    }
    let filter: Vec<char> = filter.to_lowercase().chars().collect();
    display_name
        .split_whitespace()
        .any(|token| token_matches(&filter, token))
}

fn token_matches(filter: &[char], token: &str) -> bool {
    let mut pending = filter.iter();
    let mut next = pending.next();
    for ch in token.to_lowercase().chars() {
        match next {
            Some(&want) if want == ch => next = pending.next(),
            Some(_) => {}
            None => return true,
        }
    }
    next.is_none()
}

/// Of the matching row indices, the one nearest to the cursor row: smaller
/// index distance wins, and on equal distance the row above is preferred.
pub fn nearest(matches: &[usize], cursor: usize) -> Option<usize> {
    matches
        .iter()
        .copied()
        .min_by_key(|&idx| {
            let distance = idx.abs_diff(cursor);
            // Below-cursor rows lose ties to above-cursor rows.
            (distance, idx > cursor)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn characters_match_interleaved() {
        assert!(matches("bb", "bob@example.com"));
        assert!(matches("BOB", "bob@example.com"));
        assert!(matches("bec", "bob@example.com"));
        assert!(!matches("xyz", "bob@example.com"));
        assert!(!matches("bobq", "bob"));
    }

    #[test]
    fn any_token_of_the_name_may_match() {
        assert!(matches("smith", "Bob Smith"));
        assert!(matches("bs", "Bob Smith"));
        assert!(!matches("bob smith", "Bob Smith"));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches("", "anything"));
    }

    #[test]
    fn nearest_prefers_smaller_distance_then_above() {
        assert_eq!(nearest(&[0, 4], 3), Some(4));
        assert_eq!(nearest(&[1, 5], 3), Some(1));
        assert_eq!(nearest(&[3], 3), Some(3));
        assert_eq!(nearest(&[], 3), None);
        // Equal distance: the row above wins.
        assert_eq!(nearest(&[2, 4], 3), Some(2));
    }
}
