//! Ratcliff/Obershelp string similarity.
//!
//! The ratio is `2 * M / T`, where `T` is the total number of characters in
//! both strings and `M` the number of characters covered by the matching
//! blocks found by repeatedly taking the longest common substring and
//! recursing on the unmatched pieces to its left and right.
//!
//! Matches are seeded from an index of `b`. Once `b` has at least
//! [`AUTOJUNK_MIN_LEN`] elements, elements occurring more than
//! `len / 100 + 1` times are dropped from the index: they can still extend a
//! match but never start one.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Length of `b` from which popular elements are left out of the index.
pub const AUTOJUNK_MIN_LEN: usize = 200;

/// Similarity of `a` and `b` in `[0, 1]`. Two empty strings are identical.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_characters(&a, &b) as f64 / total as f64
}

/// Total length of all matching blocks between `a` and `b`.
pub fn matching_characters<T: Eq + Hash>(a: &[T], b: &[T]) -> usize {
    let index = MatchIndex::new(b);
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = index.longest_match(a, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Positions of every non-popular element of `b`, ascending.
struct MatchIndex<'b, T> {
    b: &'b [T],
    positions: HashMap<&'b T, Vec<usize>>,
}

impl<'b, T: Eq + Hash> MatchIndex<'b, T> {
    fn new(b: &'b [T]) -> Self {
        let mut positions: HashMap<&T, Vec<usize>> = HashMap::new();
        for (j, elt) in b.iter().enumerate() {
            positions.entry(elt).or_default().push(j);
        }
        if b.len() >= AUTOJUNK_MIN_LEN {
            let limit = b.len() / 100 + 1;
            let popular: HashSet<&T> = positions
                .iter()
                .filter(|(_, js)| js.len() > limit)
                .map(|(&elt, _)| elt)
                .collect();
            positions.retain(|elt, _| !popular.contains(elt));
        }
        Self { b, positions }
    }

    /// Longest common substring of `a[alo..ahi]` and `b[blo..bhi]`, returned
    /// as `(start_in_a, start_in_b, length)`. Ties go to the earliest start in
    /// `a`, then the earliest start in `b`.
    fn longest_match(
        &self,
        a: &[T],
        alo: usize,
        ahi: usize,
        blo: usize,
        bhi: usize,
    ) -> (usize, usize, usize) {
        let b = self.b;
        let (mut besti, mut bestj, mut best) = (alo, blo, 0);
        // Length of the match ending at each `j` for the previous `i`.
        let mut run_at: HashMap<usize, usize> = HashMap::new();

        for i in alo..ahi {
            let mut next_run_at = HashMap::new();
            if let Some(js) = self.positions.get(&a[i]) {
                for &j in js {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let prev = j.checked_sub(1).and_then(|p| run_at.get(&p)).copied();
                    let k = prev.unwrap_or(0) + 1;
                    next_run_at.insert(j, k);
                    if k > best {
                        (besti, bestj, best) = (i + 1 - k, j + 1 - k, k);
                    }
                }
            }
            run_at = next_run_at;
        }

        while besti > alo && bestj > blo && a[besti - 1] == b[bestj - 1] {
            besti -= 1;
            bestj -= 1;
            best += 1;
        }
        while besti + best < ahi && bestj + best < bhi && a[besti + best] == b[bestj + best] {
            best += 1;
        }
        (besti, bestj, best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn identical_and_empty_strings() {
        assert!(approx(similarity_ratio("Hello", "Hello"), 1.0));
        assert!(approx(similarity_ratio("", ""), 1.0));
        assert!(approx(similarity_ratio("abc", ""), 0.0));
        assert!(approx(similarity_ratio("", "abc"), 0.0));
    }

    #[test]
    fn disjoint_strings_have_zero_ratio() {
        assert!(approx(similarity_ratio("Hello", "xyz"), 0.0));
    }

    #[test]
    fn partial_overlap_matches_reference_values() {
        // "bcd" is the only matching block.
        assert!(approx(similarity_ratio("abcd", "bcde"), 0.75));
        // "Hello" against "Hxllo": blocks "H" and "llo".
        assert!(approx(similarity_ratio("Hello", "Hxllo"), 0.8));
        // Blocks "a" and "b" around the longest match.
        assert_eq!(matching_characters(b"qabxcd", b"abycdf"), 4);
    }

    #[test]
    fn ratio_is_symmetric_for_simple_inputs() {
        let pairs = [("kitten", "sitting"), ("Hello", "Hello, world"), ("abc", "cba")];
        for (a, b) in pairs {
            assert!(approx(similarity_ratio(a, b), similarity_ratio(b, a)), "{a} / {b}");
        }
    }

    #[test]
    fn multibyte_characters_count_once() {
        assert!(approx(similarity_ratio("héllo", "hello"), 0.8));
    }

    #[test]
    fn repeated_banner_with_few_substitutions_stays_similar() {
        let banner = "Welcome to the secure echo service. Please enter your name and we will greet you politely. "
            .repeat(4);
        let banner = banner.trim();
        assert_eq!(banner.chars().count(), 363);
        let changed: String = banner
            .chars()
            .enumerate()
            .map(|(i, c)| if [10, 100, 200, 300].contains(&i) { 'X' } else { c })
            .collect();

        // 359 of the 363 characters match: 2 * 359 / 726.
        assert!(approx(similarity_ratio(banner, &changed), 718.0 / 726.0));
    }

    #[test]
    fn popular_elements_never_seed_a_match() {
        // Every character of b occurs more than 3 times in 200, so nothing is
        // indexed and only a match at the very start can grow by extension.
        let a = "ab".repeat(100);
        let b = "ba".repeat(100);
        assert_eq!(matching_characters(a.as_bytes(), b.as_bytes()), 0);
        let c = format!("a{}", "ba".repeat(100));
        assert_eq!(matching_characters(c.as_bytes(), b.as_bytes()), 0);
        assert_eq!(matching_characters(b.as_bytes(), b.as_bytes()), 200);
    }

    #[test]
    fn long_outputs_with_scattered_changes() {
        let mut state: u64 = 1;
        let text: String = (0..8000)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                char::from_u32(0x100 + ((state >> 33) % 768) as u32).unwrap()
            })
            .collect();
        let changed: String = text
            .chars()
            .enumerate()
            .map(|(i, c)| if i % 40 == 0 { '#' } else { c })
            .collect();
        assert!(approx(similarity_ratio(&text, &changed), 0.975));
    }
}
