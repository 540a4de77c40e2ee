//! Near-duplicate detection for string columns.
//!
//! Clusters distinct values whose pairwise Levenshtein distance stays
//! within a threshold, ranks each value's candidate replacements, and
//! applies a user-confirmed replacement map with optional transitive
//! chaining.

use std::collections::{BTreeMap, BTreeSet};

use crate::data::Value;
use crate::frame::FrameColumn;

/// Levenshtein edit distance over Unicode scalar values, two-row DP.
pub fn edit_distance(a: &str, b: &str) -> usize {
    if a == b {
        return 0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Clusters `values` by edit distance and ranks each anchor's neighbors.
///
/// Only first-seen representatives are pairwise compared; later repeats of
/// a value just raise its occurrence count. A value appears in the result
/// only when it has at least one neighbor, and its neighbor list contains
/// the value itself. Neighbors are ordered descending by
/// `(occurrences * cluster size, -cumulative distance, value)`: frequent,
/// richly connected candidates first, closer clusters on ties, then
/// lexicographic for determinism.
pub fn find_duplicates<'a, I>(values: I, max_edit_distance: usize) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let values: Vec<&str> = values.into_iter().collect();
    let mut occurrences: BTreeMap<&str, usize> = BTreeMap::new();
    let mut clusters: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut distance_sums: BTreeMap<&str, usize> = BTreeMap::new();

    for (i, &anchor) in values.iter().enumerate() {
        if occurrences.contains_key(anchor) {
            continue;
        }
        occurrences.insert(anchor, 1);

        for &other in &values[i + 1..] {
            if other == anchor {
                if let Some(count) = occurrences.get_mut(anchor) {
                    *count += 1;
                }
                continue;
            }
            if occurrences.contains_key(other) {
                continue;
            }
            let distance = edit_distance(anchor, other);
            if distance <= max_edit_distance {
                clusters
                    .entry(anchor)
                    .or_insert_with(|| BTreeSet::from([anchor]))
                    .insert(other);
                clusters
                    .entry(other)
                    .or_insert_with(|| BTreeSet::from([other]))
                    .insert(anchor);
                *distance_sums.entry(anchor).or_insert(0) += distance;
                *distance_sums.entry(other).or_insert(0) += distance;
            }
        }
    }

    let weight = |value: &str| {
        let cluster_size = clusters.get(value).map(BTreeSet::len).unwrap_or(0);
        let occurrence = occurrences.get(value).copied().unwrap_or(0);
        (occurrence * cluster_size, -(distance_sums.get(value).copied().unwrap_or(0) as i64))
    };

    clusters
        .iter()
        .map(|(&anchor, neighbors)| {
            let mut ranked: Vec<&str> = neighbors.iter().copied().collect();
            ranked.sort_by(|a, b| {
                let (score_b, dist_b) = weight(b);
                let (score_a, dist_a) = weight(a);
                (score_b, dist_b, *b).cmp(&(score_a, dist_a, *a))
            });
            (
                anchor.to_string(),
                ranked.into_iter().map(str::to_string).collect(),
            )
        })
        .collect()
}

/// Column wrapper: non-string columns have no duplicate clusters.
pub fn find_duplicates_in_column(
    column: &FrameColumn,
    max_edit_distance: usize,
) -> BTreeMap<String, Vec<String>> {
    if column.kind != crate::data::ColumnKind::String {
        return BTreeMap::new();
    }
    let values = column.cells.iter().filter_map(|cell| match cell {
        Some(Value::String(s)) => Some(s.as_str()),
        _ => None,
    });
    find_duplicates(values, max_edit_distance)
}

/// Transitively collapses a replacement map: every key points at the end
/// of its replacement chain. A key whose chain runs into a cycle is
/// removed from the map entirely and stays unresolved.
pub fn flatten_replacements(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut flattened = BTreeMap::new();
    'keys: for (key, first) in map {
        let mut seen = BTreeSet::from([key.as_str()]);
        let mut target = first.as_str();
        while let Some(next) = map.get(target) {
            if !seen.insert(target) || next == key {
                continue 'keys;
            }
            target = next.as_str();
        }
        flattened.insert(key.clone(), target.to_string());
    }
    flattened
}

/// Applies a `{original: replacement}` map to every value. With `chain`
/// the map is first flattened so `A→B, B→C` sends `A` straight to `C`.
pub fn resolve_duplicates<'a, I>(
    values: I,
    replacements: &BTreeMap<String, String>,
    chain: bool,
) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let flattened;
    let map = if chain {
        flattened = flatten_replacements(replacements);
        &flattened
    } else {
        replacements
    };
    values
        .into_iter()
        .map(|value| map.get(value).cloned().unwrap_or_else(|| value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ColumnKind;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn edit_distance_counts_minimal_edits() {
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("ABC", "ABD"), 1);
        assert_eq!(edit_distance("same", "same"), 0);
        // ü→u, ß→s, plus one inserted s.
        assert_eq!(edit_distance("grüße", "grusse"), 3);
    }

    #[test]
    fn close_values_cluster_and_distant_values_do_not() {
        let clusters = find_duplicates(["ABC", "ABD", "ABC", "XYZ"], 1);
        assert_eq!(clusters["ABC"], vec!["ABC", "ABD"]);
        assert_eq!(clusters["ABD"], vec!["ABC", "ABD"]);
        assert!(!clusters.contains_key("XYZ"));
    }

    #[test]
    fn repeats_raise_occurrence_rank() {
        // "ABC" occurs twice so it outranks "ABD" in both lists.
        let clusters = find_duplicates(["ABC", "ABD", "ABC"], 1);
        assert_eq!(clusters["ABD"][0], "ABC");
    }

    #[test]
    fn richly_connected_values_rank_first() {
        // "ABD" neighbors both others; "ABC" and "AXD" only neighbor "ABD".
        let clusters = find_duplicates(["ABC", "ABD", "AXD"], 1);
        assert_eq!(clusters["ABC"][0], "ABD");
        assert_eq!(clusters["AXD"][0], "ABD");
        assert_eq!(clusters["ABD"].len(), 3);
    }

    #[test]
    fn non_string_columns_have_no_clusters() {
        let mut column = FrameColumn::new("n", ColumnKind::Integer);
        column.cells = vec![Some(Value::Integer(1)), Some(Value::Integer(2))];
        assert!(find_duplicates_in_column(&column, 2).is_empty());
    }

    #[test]
    fn chained_replacements_collapse_transitively() {
        let replacements = map(&[("A", "B"), ("B", "C")]);
        let out = resolve_duplicates(["A", "B", "Z"], &replacements, true);
        assert_eq!(out, vec!["C", "C", "Z"]);
    }

    #[test]
    fn unchained_replacements_apply_one_step() {
        let replacements = map(&[("A", "B"), ("B", "C")]);
        let out = resolve_duplicates(["A", "B"], &replacements, false);
        assert_eq!(out, vec!["B", "C"]);
    }

    #[test]
    fn cycles_leave_their_members_unresolved() {
        let replacements = map(&[("A", "B"), ("B", "A"), ("X", "Y")]);
        let out = resolve_duplicates(["A", "B", "X"], &replacements, true);
        assert_eq!(out, vec!["A", "B", "Y"]);
    }

    #[test]
    fn chains_into_foreign_cycles_are_dropped_not_looped() {
        let replacements = map(&[("A", "B"), ("B", "C"), ("C", "B")]);
        let out = resolve_duplicates(["A"], &replacements, true);
        assert_eq!(out, vec!["A"]);
    }
}
