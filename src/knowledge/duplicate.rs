use std::collections::HashSet;

use super::store::IndexEntry;

/// Find an existing card that a proposed card would duplicate.
///
/// A card matches when its name equals `proposed_name` case-insensitively, or
/// when `|proposed ∩ existing| / |proposed| >= threshold` over lowercased
/// keywords. The denominator is the proposed keyword count, so a narrow
/// proposal fully covered by a broad existing card is a duplicate. The first
/// matching entry in store order wins.
pub fn find_duplicate<'a>(
    entries: &'a [IndexEntry],
    proposed_keywords: &[String],
    proposed_name: &str,
    threshold: f64,
) -> Option<&'a IndexEntry> {
    let proposed_name = proposed_name.trim().to_lowercase();
    let proposed: HashSet<String> = proposed_keywords.iter().map(|k| k.to_lowercase()).collect();

    for entry in entries {
        if !proposed_name.is_empty() && entry.name.to_lowercase() == proposed_name {
            return Some(entry);
        }

        if proposed.is_empty() {
            continue;
        }
        let existing: HashSet<String> = entry.keywords.iter().map(|k| k.to_lowercase()).collect();
        if existing.is_empty() {
            continue;
        }

        let shared = proposed.intersection(&existing).count();
        let overlap = shared as f64 / proposed.len() as f64;
        if overlap >= threshold {
            return Some(entry);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Card;

    const THRESHOLD: f64 = 0.60;

    fn entry(name: &str, keywords: &[&str]) -> IndexEntry {
        let mut card = Card::new(name, "tools");
        card.triggers.keywords = keywords.iter().map(|k| k.to_string()).collect();
        card.to_index_entry()
    }

    fn kws(items: &[&str]) -> Vec<String> {
        items.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn name_match_ignores_case_and_keywords() {
        let entries = vec![entry("Uv-Scripts", &["uv"])];
        let dup = find_duplicate(&entries, &[], "uv-scripts", THRESHOLD).unwrap();
        assert_eq!(dup.name, "Uv-Scripts");
    }

    #[test]
    fn overlap_denominator_is_proposed_count() {
        let entries = vec![entry("existing", &["a", "b", "c"])];
        // 3 of 5 proposed keywords shared → 0.6
        let dup = find_duplicate(&entries, &kws(&["a", "b", "c", "d", "e"]), "new", THRESHOLD);
        assert!(dup.is_some());
        // 2 of 5 → 0.4
        let dup = find_duplicate(&entries, &kws(&["a", "b", "x", "y", "z"]), "new", THRESHOLD);
        assert!(dup.is_none());
    }

    #[test]
    fn narrow_proposal_covered_by_broad_card() {
        let entries = vec![entry("broad", &["a", "b", "c", "d", "e"])];
        let dup = find_duplicate(&entries, &kws(&["A", "b"]), "narrow", THRESHOLD);
        assert_eq!(dup.map(|e| e.name.as_str()), Some("broad"));
    }

    #[test]
    fn first_sufficient_match_wins() {
        let entries = vec![
            entry("first", &["a", "b", "x"]),
            entry("better", &["a", "b", "c"]),
        ];
        let dup = find_duplicate(&entries, &kws(&["a", "b", "c"]), "new", THRESHOLD).unwrap();
        assert_eq!(dup.name, "first");
    }

    #[test]
    fn cards_without_keywords_only_match_by_name() {
        let entries = vec![entry("bare", &[])];
        assert!(find_duplicate(&entries, &kws(&["a"]), "other", THRESHOLD).is_none());
        assert!(find_duplicate(&entries, &kws(&["a"]), "BARE", THRESHOLD).is_some());
    }

    #[test]
    fn no_entries_no_duplicate() {
        assert!(find_duplicate(&[], &kws(&["a"]), "x", THRESHOLD).is_none());
    }
}
