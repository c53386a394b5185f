//! Device-name → model-name resolution.
//!
//! Operator-entered product names and on-disk model folder names differ in
//! spacing, case, and punctuation, so resolution is an explicit table lookup
//! first and a fuzzy longest-common-subsequence match second.

use std::collections::HashMap;

/// Lowercase and collapse separators to underscores before comparing.
fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' || c == '.' { '_' } else { c })
        .collect()
}

fn lcs_len(a: &[u8], b: &[u8]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized LCS similarity in [0, 1]: `2·LCS(a,b) / (|a| + |b|)` over the
/// normalized names.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let lcs = lcs_len(a.as_bytes(), b.as_bytes());
    2.0 * lcs as f64 / (a.len() + b.len()) as f64
}

/// First candidate (in the given deterministic order) whose similarity to
/// `device_name` reaches `threshold`.
pub fn find_best_match<'a, I>(device_name: &str, candidates: I, threshold: f64) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .find(|candidate| similarity(device_name, candidate) >= threshold)
        .map(|c| c.to_string())
}

/// Resolve a product name to a model folder name: explicit table first, then
/// the fuzzy matcher over `folders` (already sorted).
pub fn resolve_model(
    table: &HashMap<String, String>,
    folders: &[String],
    product_name: &str,
    threshold: f64,
) -> Option<String> {
    if let Some(mapped) = table.get(product_name) {
        return Some(mapped.clone());
    }
    find_best_match(
        product_name,
        folders.iter().map(String::as_str),
        threshold,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_identical_and_disjoint() {
        assert_eq!(similarity("amazon-plug", "amazon-plug"), 1.0);
        assert_eq!(similarity("Amazon Plug", "amazon_plug"), 1.0);
        assert!(similarity("wxyz", "abc") < 0.2);
    }

    #[test]
    fn test_similarity_tolerates_punctuation() {
        let s = similarity("Amazon Plug", "amazon-plug");
        assert!(s >= 0.99, "separator differences should not matter, got {s}");
        let s = similarity("Ring Camera", "ring-camera");
        assert!(s >= 0.99);
    }

    #[test]
    fn test_find_best_match_threshold() {
        let folders = ["amazon-plug", "echodot4b", "ring-camera"];
        assert_eq!(
            find_best_match("Amazon Plug", folders, 0.8).as_deref(),
            Some("amazon-plug")
        );
        assert_eq!(
            find_best_match("Ring Camera", folders, 0.8).as_deref(),
            Some("ring-camera")
        );
        assert!(find_best_match("Philips Hue Bridge", folders, 0.8).is_none());
    }

    #[test]
    fn test_find_best_match_first_in_order_wins() {
        let folders = ["plug-a", "plug-b"];
        // Both clear the low threshold; deterministic order picks the first.
        assert_eq!(
            find_best_match("plug", folders, 0.5).as_deref(),
            Some("plug-a")
        );
    }

    #[test]
    fn test_resolve_model_prefers_table() {
        let mut table = HashMap::new();
        table.insert("Amazon Echo".to_string(), "echodot4b".to_string());
        let folders = vec!["amazon-echo-show".to_string(), "echodot4b".to_string()];

        assert_eq!(
            resolve_model(&table, &folders, "Amazon Echo", 0.8).as_deref(),
            Some("echodot4b")
        );
        // Not in the table → fuzzy fallback.
        assert_eq!(
            resolve_model(&table, &folders, "amazon echo show", 0.8).as_deref(),
            Some("amazon-echo-show")
        );
        assert!(resolve_model(&table, &folders, "Unrelated Device", 0.8).is_none());
    }
}
