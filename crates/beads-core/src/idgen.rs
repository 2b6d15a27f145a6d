//! SHA-256 + base36 ID generation and parsing.
//!
//! IDs have the form `<prefix>-<base36>`. The suffix is derived from issue
//! content only, so two clones creating the same logical issue offline
//! converge on the same ID. Local collisions are resolved by retrying with
//! an increasing nonce.

use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};

/// Base36 alphabet (0-9, a-z).
const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Shortest hash suffix ever emitted.
pub const MIN_HASH_LENGTH: usize = 5;

/// Longest hash suffix ever emitted.
pub const MAX_HASH_LENGTH: usize = 8;

/// Converts a byte slice to a base36 string of the specified length.
pub fn encode_base36(data: &[u8], length: usize) -> String {
    let mut num = BigUint::from_bytes_be(data);
    let base = BigUint::from(36u32);
    let zero = BigUint::zero();

    // Build the string in reverse.
    let mut chars: Vec<u8> = Vec::with_capacity(length);
    while num > zero {
        let rem = &num % &base;
        num /= &base;
        let digits = rem.to_u32_digits();
        let i = if digits.is_empty() { 0 } else { digits[0] as usize };
        chars.push(BASE36_ALPHABET[i]);
    }
    chars.reverse();

    let mut s = String::from_utf8(chars).expect("base36 chars are valid UTF-8");

    // Pad with zeros if needed.
    if s.len() < length {
        let padding = "0".repeat(length - s.len());
        s = padding + &s;
    }

    // Truncate to exact length (keep least significant digits).
    if s.len() > length {
        s = s[s.len() - length..].to_owned();
    }

    s
}

/// Creates a hash-based ID for an issue.
///
/// The suffix is a function of canonical content plus `nonce`: with nonce 0,
/// identical content yields identical IDs on independent clones (enables
/// deduplication on merge). Callers bump the nonce only to resolve a local
/// collision.
pub fn generate_hash_id(
    prefix: &str,
    title: &str,
    description: &str,
    creator: &str,
    length: usize,
    nonce: u32,
) -> String {
    let content = format!("{}|{}|{}|{}", title, description, creator, nonce);
    let hash = Sha256::digest(content.as_bytes());

    // Bytes of entropy needed for the desired base36 width.
    let num_bytes = match length {
        5 => 4, // 32 bits ~ 6.18 base36 chars
        6 => 4,
        7 => 5, // 40 bits ~ 7.73 base36 chars
        8 => 6,
        _ => 4, // out-of-range lengths fall back to the minimum width
    };
    let length = length.clamp(MIN_HASH_LENGTH, MAX_HASH_LENGTH);

    let short_hash = encode_base36(&hash[..num_bytes], length);
    format!("{}-{}", prefix, short_hash)
}

/// Builds the dotted ID for the nth child of an issue.
pub fn child_id(parent_id: &str, n: u32) -> String {
    format!("{parent_id}.{n}")
}

/// Returns the nesting depth of a dotted ID (0 for a plain issue).
pub fn child_depth(id: &str) -> usize {
    base_and_suffix(id).1.matches('.').count()
}

/// Splits an ID into `(prefix, hash)`.
///
/// The prefix is everything before the last hyphen whose remainder parses as
/// a hash suffix; multi-segment prefixes like `my-project-a3f8z` therefore
/// resolve correctly. Falls back to the first hyphen when no suffix parses.
/// Dotted child segments are ignored for the purpose of finding the hash.
pub fn split_id(id: &str) -> Option<(&str, &str)> {
    let (base, _) = base_and_suffix(id);

    // Scan hyphens right-to-left for a valid hash suffix.
    for (idx, _) in base.match_indices('-').collect::<Vec<_>>().into_iter().rev() {
        let candidate = &base[idx + 1..];
        if is_hash_suffix(candidate) {
            return Some((&base[..idx], candidate));
        }
    }

    // Fall back to the first hyphen.
    let idx = base.find('-')?;
    Some((&base[..idx], &base[idx + 1..]))
}

/// Extracts the workspace prefix from an ID.
pub fn extract_prefix(id: &str) -> Option<&str> {
    split_id(id).map(|(prefix, _)| prefix)
}

/// Splits a dotted child ID into its base ID and the dotted remainder.
fn base_and_suffix(id: &str) -> (&str, &str) {
    match id.find('.') {
        Some(idx) => (&id[..idx], &id[idx..]),
        None => (id, ""),
    }
}

/// A hash suffix is 3+ base36 characters containing at least one digit or
/// being at least MIN_HASH_LENGTH long. The digit requirement keeps short
/// dictionary words in multi-segment prefixes from being misread as hashes.
fn is_hash_suffix(s: &str) -> bool {
    if s.len() < 3 || !s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
        return false;
    }
    s.len() >= MIN_HASH_LENGTH || s.bytes().any(|b| b.is_ascii_digit())
}

/// Computes the collision probability using the birthday paradox
/// approximation: P ~ 1 - e^(-n^2 / 2N).
fn collision_probability(num_issues: usize, id_length: usize) -> f64 {
    let total: f64 = 36.0_f64.powi(id_length as i32);
    let exponent = -(num_issues as f64).powi(2) / (2.0 * total);
    1.0 - exponent.exp()
}

/// Determines the optimal ID length for the current database size.
///
/// Tries lengths from [`MIN_HASH_LENGTH`] to [`MAX_HASH_LENGTH`], returning
/// the first that keeps the collision probability at or below
/// `max_collision_prob`.
pub fn compute_adaptive_length(num_issues: usize, max_collision_prob: f64) -> usize {
    for length in MIN_HASH_LENGTH..=MAX_HASH_LENGTH {
        if collision_probability(num_issues, length) <= max_collision_prob {
            return length;
        }
    }
    MAX_HASH_LENGTH
}

/// Default collision probability threshold.
pub const MAX_COLLISION_PROB: f64 = 0.25;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_base36_basic() {
        let result = encode_base36(&[], 5);
        assert_eq!(result, "00000");
    }

    #[test]
    fn encode_base36_length() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(encode_base36(&data, 6).len(), 6);
        assert_eq!(encode_base36(&data, 5).len(), 5);
    }

    #[test]
    fn generate_hash_id_format() {
        let id = generate_hash_id("bd", "Test Title", "desc", "alice", 5, 0);
        assert!(id.starts_with("bd-"));
        assert_eq!(id.len(), 8); // "bd-" + 5
    }

    #[test]
    fn generate_hash_id_deterministic_across_clones() {
        let id1 = generate_hash_id("bd", "Fix login", "Desc", "alice", 5, 0);
        let id2 = generate_hash_id("bd", "Fix login", "Desc", "alice", 5, 0);
        assert_eq!(id1, id2);
    }

    #[test]
    fn generate_hash_id_nonce_changes_output() {
        let id1 = generate_hash_id("bd", "Title", "Desc", "alice", 5, 0);
        let id2 = generate_hash_id("bd", "Title", "Desc", "alice", 5, 1);
        assert_ne!(id1, id2);
    }

    #[test]
    fn split_id_simple() {
        assert_eq!(split_id("bd-a3f8z"), Some(("bd", "a3f8z")));
    }

    #[test]
    fn split_id_multi_segment_prefix() {
        assert_eq!(split_id("my-project-a3f8z"), Some(("my-project", "a3f8z")));
    }

    #[test]
    fn split_id_falls_back_to_first_hyphen() {
        // No segment parses as a hash: the first hyphen splits.
        assert_eq!(split_id("my-PROJECT"), Some(("my", "PROJECT")));
    }

    #[test]
    fn split_id_ignores_child_suffix() {
        assert_eq!(split_id("bd-a3f8z.1.2"), Some(("bd", "a3f8z")));
    }

    #[test]
    fn split_id_no_hyphen() {
        assert_eq!(split_id("nohyphen"), None);
    }

    #[test]
    fn child_ids_and_depth() {
        let parent = "bd-a3f8z";
        let c1 = child_id(parent, 1);
        assert_eq!(c1, "bd-a3f8z.1");
        let c2 = child_id(&c1, 3);
        assert_eq!(c2, "bd-a3f8z.1.3");
        assert_eq!(child_depth(parent), 0);
        assert_eq!(child_depth(&c1), 1);
        assert_eq!(child_depth(&c2), 2);
    }

    #[test]
    fn adaptive_length_small_repo() {
        assert_eq!(compute_adaptive_length(10, MAX_COLLISION_PROB), 5);
    }

    #[test]
    fn adaptive_length_large_repo() {
        assert!(compute_adaptive_length(1_000_000, MAX_COLLISION_PROB) >= 7);
    }

    #[test]
    fn adaptive_length_capped_at_max() {
        assert_eq!(compute_adaptive_length(100_000_000, 0.01), MAX_HASH_LENGTH);
    }
}
