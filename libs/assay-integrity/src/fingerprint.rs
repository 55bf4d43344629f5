/// Fingerprint Engine - Locality-Sensitive Code Sketches
///
/// **Core Responsibility:**
/// Turn source text into a fixed-length MinHash sketch so submissions can be
/// compared across candidates without keeping the text around.
///
/// **Algorithm:**
/// 1. Normalize (strip comments outside string literals, collapse whitespace, lowercase)
/// 2. Split on whitespace, build overlapping 5-token shingles
/// 3. Hash every shingle (FNV-1a, 64 bit)
/// 4. For each of 128 fixed permutations `(a*h + b) mod (2^61 - 1)` keep the minimum
///
/// The permutation table is a compile-time constant, so sketches computed by the
/// API, the worker and the CLI are always comparable.
///
/// **Degenerate input:**
/// Fewer than five tokens produce an empty shingle set. The resulting sketch has
/// every slot set to `u64::MAX` and compares as 0.0 against everything, itself included.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const SHINGLE_SIZE: usize = 5;
pub const NUM_PERMUTATIONS: usize = 128;

const MERSENNE_61: u64 = (1 << 61) - 1;
const EMPTY_SLOT: u64 = u64::MAX;
const PERMUTATION_SEED: u64 = 0x5EED_A55A_1CE5_0001;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Edit ratio inputs are cut to this many chars first.
pub const MAX_EDIT_RATIO_CHARS: usize = 20_000;

const fn splitmix64(state: u64) -> (u64, u64) {
    let next = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = next;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    (next, z ^ (z >> 31))
}

const fn build_permutations() -> [(u64, u64); NUM_PERMUTATIONS] {
    let mut table = [(0u64, 0u64); NUM_PERMUTATIONS];
    let mut state = PERMUTATION_SEED;
    let mut i = 0;
    while i < NUM_PERMUTATIONS {
        let (after_a, a) = splitmix64(state);
        let (after_b, b) = splitmix64(after_a);
        state = after_b;
        // a must be non-zero for the map to be a permutation
        table[i] = (a % (MERSENNE_61 - 1) + 1, b % MERSENNE_61);
        i += 1;
    }
    table
}

const PERMUTATIONS: [(u64, u64); NUM_PERMUTATIONS] = build_permutations();

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

fn skip_line<I: Iterator<Item = char>>(chars: &mut std::iter::Peekable<I>) {
    while chars.next_if(|&c| c != '\n').is_some() {}
}

fn skip_block<I: Iterator<Item = char>>(chars: &mut std::iter::Peekable<I>) {
    while let Some(c) = chars.next() {
        if c == '*' && chars.next_if_eq(&'/').is_some() {
            return;
        }
    }
}

/// Drop `//`, `#` and `/* */` comments that start outside a quoted literal.
///
/// Quotes are `"` and `'`, with backslash escapes. A literal also ends at the
/// end of its line, so a stray apostrophe cannot swallow the rest of the file.
/// The scan is language-agnostic: `//` always opens a comment, which cuts
/// Python floor division short.
fn strip_comments(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next_if(|&n| n != '\n') {
                    out.push(escaped);
                }
            } else if c == open || c == '\n' {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
            }
            '#' => skip_line(&mut chars),
            '/' if chars.next_if_eq(&'/').is_some() => skip_line(&mut chars),
            '/' if chars.next_if_eq(&'*').is_some() => {
                skip_block(&mut chars);
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Normalize code for similarity comparison.
///
/// Removes comments (see `strip_comments`), collapses whitespace runs to a
/// single space and lowercases the result.
pub fn normalize_code(code: &str) -> String {
    let code = strip_comments(code);
    let code = WHITESPACE.replace_all(&code, " ");
    code.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinHashSketch {
    pub slots: Vec<u64>,
}

impl MinHashSketch {
    fn empty() -> Self {
        Self {
            slots: vec![EMPTY_SLOT; NUM_PERMUTATIONS],
        }
    }

    fn from_shingles(shingles: &HashSet<u64>) -> Self {
        let mut sketch = Self::empty();
        for &shingle in shingles {
            for (slot, &params) in sketch.slots.iter_mut().zip(PERMUTATIONS.iter()) {
                let value = permute(shingle, params);
                if value < *slot {
                    *slot = value;
                }
            }
        }
        sketch
    }

    /// True when the source had no shingles at all
    pub fn is_degenerate(&self) -> bool {
        self.slots.iter().all(|&slot| slot == EMPTY_SLOT)
    }

    /// Estimated Jaccard similarity: the fraction of slots where both minima agree.
    pub fn similarity(&self, other: &MinHashSketch) -> f64 {
        if self.slots.len() != other.slots.len() || self.slots.is_empty() {
            return 0.0;
        }
        if self.is_degenerate() || other.is_degenerate() {
            return 0.0;
        }
        let matching = self
            .slots
            .iter()
            .zip(other.slots.iter())
            .filter(|(a, b)| a == b)
            .count();
        matching as f64 / self.slots.len() as f64
    }
}

fn fnv_step(hash: u64, byte: u8) -> u64 {
    (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
}

fn shingle_hash(tokens: &[&str]) -> u64 {
    let mut hash = FNV_OFFSET;
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            hash = fnv_step(hash, b' ');
        }
        for &byte in token.as_bytes() {
            hash = fnv_step(hash, byte);
        }
    }
    hash
}

fn permute(hash: u64, (a, b): (u64, u64)) -> u64 {
    let x = (hash % MERSENNE_61) as u128;
    ((a as u128 * x + b as u128) % MERSENNE_61 as u128) as u64
}

/// Compute the MinHash sketch of a piece of source code.
pub fn sketch(code: &str) -> MinHashSketch {
    let normalized = normalize_code(code);
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let shingles: HashSet<u64> = tokens.windows(SHINGLE_SIZE).map(shingle_hash).collect();
    MinHashSketch::from_shingles(&shingles)
}

/// Length of the longest common subsequence, bit-parallel over `a`.
///
/// One bit per char of `a`, packed into u64 words; each char of `b` updates the
/// whole row with `V' = (V + U) | (V - U)` where `U = V & match(c)`. Zero bits
/// of the final row count the LCS. Runs in O(|a| * |b| / 64).
fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let words = a.len().div_ceil(64);

    let mut matches: HashMap<char, Vec<u64>> = HashMap::new();
    for (i, &c) in a.iter().enumerate() {
        matches.entry(c).or_insert_with(|| vec![0; words])[i / 64] |= 1u64 << (i % 64);
    }

    let mut row = vec![u64::MAX; words];
    for c in b {
        let Some(mask) = matches.get(c) else {
            continue;
        };
        let mut carry = false;
        for (v, &m) in row.iter_mut().zip(mask.iter()) {
            let u = *v & m;
            let (sum, c1) = v.overflowing_add(u);
            let (sum, c2) = sum.overflowing_add(carry as u64);
            carry = c1 || c2;
            // U is a subset of V, so V - U never borrows
            *v = sum | (*v & !u);
        }
    }

    let tail = a.len() % 64;
    row.iter()
        .enumerate()
        .map(|(w, &v)| {
            let live = if w + 1 == words && tail != 0 { (1u64 << tail) - 1 } else { u64::MAX };
            (!v & live).count_ones() as usize
        })
        .sum()
}

/// Normalized indel similarity `2 * LCS / (|a| + |b|)`, in [0, 1].
///
/// Exact for a single pair, which makes it the confirmation metric when
/// MinHash says two submissions look alike. Two empty strings compare as 1.0.
pub fn edit_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().take(MAX_EDIT_RATIO_CHARS).collect();
    let b: Vec<char> = b.chars().take(MAX_EDIT_RATIO_CHARS).collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * lcs_len(&a, &b) as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUBBLE_SORT: &str = r#"
def bubble_sort(items):
    # classic exchange sort
    n = len(items)
    for i in range(n):
        for j in range(0, n - i - 1):
            if items[j] > items[j + 1]:
                items[j], items[j + 1] = items[j + 1], items[j]
    return items
"#;

    const WORD_COUNT: &str = r#"
import sys
counts = {}
for line in sys.stdin:
    for word in line.split():
        counts[word] = counts.get(word, 0) + 1
print(max(counts, key=counts.get))
"#;

    #[test]
    fn test_sketch_has_fixed_length() {
        assert_eq!(sketch(BUBBLE_SORT).slots.len(), NUM_PERMUTATIONS);
        assert_eq!(sketch("").slots.len(), NUM_PERMUTATIONS);
    }

    #[test]
    fn test_sketch_is_deterministic() {
        assert_eq!(sketch(BUBBLE_SORT), sketch(BUBBLE_SORT));
    }

    #[test]
    fn test_self_similarity_is_one() {
        let s = sketch(BUBBLE_SORT);
        assert_eq!(s.similarity(&s), 1.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = sketch(BUBBLE_SORT);
        let b = sketch(WORD_COUNT);
        assert_eq!(a.similarity(&b), b.similarity(&a));
        assert!(a.similarity(&b) < 0.2);
    }

    #[test]
    fn test_comments_and_layout_do_not_matter() {
        let reformatted = BUBBLE_SORT.replace("    ", "\t").replace("# classic exchange sort", "# renamed");
        assert_eq!(sketch(BUBBLE_SORT).similarity(&sketch(&reformatted)), 1.0);
    }

    #[test]
    fn test_short_input_is_degenerate() {
        let s = sketch("print(1)");
        assert!(s.is_degenerate());
        assert_eq!(s.similarity(&s), 0.0);
        assert_eq!(s.similarity(&sketch(BUBBLE_SORT)), 0.0);
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("int x = 1; // set\n/* block\n */ RETURN x;"), "int x = 1; return x;");
        assert_eq!(normalize_code("   \n\t "), "");
    }

    #[test]
    fn test_comment_markers_inside_literals_survive() {
        assert_eq!(normalize_code("print(\"#1\")  # rank"), "print(\"#1\")");
        assert_eq!(normalize_code("url = 'http://example.com' // home"), "url = 'http://example.com'");
        assert_eq!(normalize_code("s = \"a \\\" # b\" # note"), "s = \"a \\\" # b\"");
        assert_eq!(normalize_code("x = 'it\ny = 1 # tail"), "x = 'it y = 1");
        assert_eq!(normalize_code("a/* gone */b /* open"), "a b");
    }

    #[test]
    fn test_literal_contents_separate_submissions() {
        let left = "for i in range(10):\n    print(\"# row #\", i, \"// done //\", sep=' # ')\n";
        let right = "for i in range(10):\n    print(\"# col #\", i, \"// skip //\", sep=' # ')\n";
        assert_ne!(normalize_code(left), normalize_code(right));
    }

    /// Textbook quadratic DP, kept as the reference for the bit-parallel version
    fn lcs_reference(a: &[char], b: &[char]) -> usize {
        let mut prev = vec![0usize; b.len() + 1];
        let mut curr = vec![0usize; b.len() + 1];
        for &ca in a {
            for (j, &cb) in b.iter().enumerate() {
                curr[j + 1] = if ca == cb { prev[j] + 1 } else { curr[j].max(prev[j + 1]) };
            }
            std::mem::swap(&mut prev, &mut curr);
        }
        prev[b.len()]
    }

    #[test]
    fn test_lcs_matches_reference_across_word_boundaries() {
        let mut state = 7u64;
        let mut text = |len: usize| -> Vec<char> {
            (0..len)
                .map(|_| {
                    let (next, z) = splitmix64(state);
                    state = next;
                    (b'a' + (z % 4) as u8) as char
                })
                .collect()
        };
        for &(n, m) in &[(1, 1), (63, 64), (64, 65), (65, 63), (130, 200), (257, 129)] {
            let a = text(n);
            let b = text(m);
            assert_eq!(lcs_len(&a, &b), lcs_reference(&a, &b), "lengths {} x {}", n, m);
            assert_eq!(lcs_len(&b, &a), lcs_reference(&b, &a), "lengths {} x {}", m, n);
        }
    }

    #[test]
    fn test_edit_ratio_handles_capped_inputs() {
        let a = "abc".repeat(MAX_EDIT_RATIO_CHARS);
        let b = "abd".repeat(MAX_EDIT_RATIO_CHARS);
        let ratio = edit_ratio(&a, &b);
        assert!(ratio > 0.6 && ratio < 0.7, "ratio {}", ratio);
        assert_eq!(edit_ratio(&a, &a), 1.0);
    }

    #[test]
    fn test_edit_ratio() {
        assert_eq!(edit_ratio("abcd", "abcd"), 1.0);
        assert_eq!(edit_ratio("abcd", "abce"), 0.75);
        assert_eq!(edit_ratio("abc", "xyz"), 0.0);
        assert_eq!(edit_ratio("", ""), 1.0);
        assert_eq!(edit_ratio("kitten", "sitting"), edit_ratio("sitting", "kitten"));
    }

    #[test]
    fn test_permutation_table_is_valid() {
        for &(a, b) in PERMUTATIONS.iter() {
            assert!(a >= 1 && a < MERSENNE_61);
            assert!(b < MERSENNE_61);
        }
    }
}
