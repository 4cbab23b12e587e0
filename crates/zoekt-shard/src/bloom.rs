//! Blocked Bloom filter over case-insensitive word fragments.
//!
//! Words are runs of `[a-z0-9_]` after Unicode lowercasing, at least four
//! runes long. Every fragment of 4 to 7 bytes that does not start with a digit
//! is hashed with CRC-32C into three probes inside a 512-bit block chosen by
//! the fragment's 4-byte prefix.
//!
//! The hasher output is persisted: the encoded filter names its hasher by id
//! and a hasher must never change behavior once shipped. New hashing schemes
//! get a new id.

use crc::{Crc, CRC_32_ISCSI};

use crate::error::{Result, ShardError};
use crate::ngram::{decode_rune, to_lower_rune};

/// Least common multiple of 1..=18, so shrinking can divide by most factors.
pub const BLOOM_SIZE_BASE: usize = 12_252_240;
/// Smaller base size used by tests. LCM(1..=10).
pub const BLOOM_SIZE_TEST: usize = 2520;
/// Target load that gives roughly 1% false positives.
pub const BLOOM_DEFAULT_LOAD: f64 = 0.42;

const BLOOM_ENCODING_VERSION: u8 = 1;
const MIN_WORD_LENGTH: usize = 4;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

type BloomHasher = fn(&[u8]) -> Vec<u32>;

/// Hashers by persisted id; id `n` lives at index `n - 1`.
const BLOOM_HASHERS: &[BloomHasher] = &[hasher_crc_blocked_64b_8k3];
const DEFAULT_HASHER_ID: u8 = 1;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BloomFilter {
    /// Zero means no hasher: the filter accepts everything.
    hasher_id: u8,
    bits: Vec<u8>,
}

impl BloomFilter {
    /// A production-sized empty filter.
    pub fn new() -> Self {
        Self::with_len(BLOOM_SIZE_BASE)
    }

    /// An empty filter of `len_bytes` bytes with the default hasher.
    pub fn with_len(len_bytes: usize) -> Self {
        BloomFilter {
            hasher_id: DEFAULT_HASHER_ID,
            bits: vec![0u8; len_bytes],
        }
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.bits.len() * 8
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    fn hash(&self, data: &[u8]) -> Option<Vec<u32>> {
        let id = self.hasher_id as usize;
        if id == 0 || id > BLOOM_HASHERS.len() {
            return None;
        }
        Some(BLOOM_HASHERS[id - 1](data))
    }

    pub fn add(&mut self, hashes: &[u32]) {
        if self.bits.is_empty() {
            return;
        }
        let n = self.bits.len();
        for &x in hashes {
            self.bits[(x / 8) as usize % n] |= 1 << (x % 8);
        }
    }

    /// Split `data` into word fragments and add all of them.
    pub fn add_bytes(&mut self, data: &[u8]) {
        if let Some(hashes) = self.hash(data) {
            self.add(&hashes);
        }
    }

    /// False only when some hash is definitely absent.
    pub fn maybe_has(&self, hashes: &[u32]) -> bool {
        if self.bits.is_empty() {
            return true;
        }
        let n = self.bits.len();
        hashes
            .iter()
            .all(|&x| self.bits[(x / 8) as usize % n] & (1 << (x % 8)) != 0)
    }

    pub fn maybe_has_bytes(&self, data: &[u8]) -> bool {
        match self.hash(data) {
            Some(hashes) => self.maybe_has(&hashes),
            None => true,
        }
    }

    /// Fraction of set bits.
    pub fn load(&self) -> f64 {
        if self.bits.is_empty() {
            return 0.0;
        }
        let total: u32 = self.bits.iter().map(|b| b.count_ones()).sum();
        total as f64 / (self.bits.len() * 8) as f64
    }

    /// Fold the filter down to a size whose load approaches `target`.
    ///
    /// A probe `x` tests bit `x % len`. When the new length divides the old
    /// one, `x % new == (x % len) % new`, so OR-ing the old bits together
    /// `len / new` times keeps every previously set probe set.
    pub fn shrink_to_size(&self, target: f64) -> BloomFilter {
        if target <= 0.0 || target >= 1.0 || self.bits.is_empty() {
            return self.clone();
        }

        // Each output bit ORs `factor` inputs set with probability x; solve
        // 1-(1-x)^k = target for k.
        let mut factor = self.bits.len();
        let divisor = (1.0 - self.load()).ln();
        if divisor != 0.0 {
            factor = ((1.0 - target).ln() / divisor) as usize;
        }
        while factor > 0 && self.bits.len() % factor != 0 {
            factor -= 1;
        }
        if factor <= 1 {
            return self.clone();
        }

        let mut out = vec![0u8; self.bits.len() / factor];
        let mut j = 0;
        for &b in &self.bits {
            out[j] |= b;
            j += 1;
            if j >= out.len() {
                j = 0;
            }
        }
        BloomFilter {
            hasher_id: self.hasher_id,
            bits: out,
        }
    }

    /// Serialize as `[version, hasher id, bits...]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bits.len() + 2);
        out.push(BLOOM_ENCODING_VERSION);
        out.push(self.hasher_id);
        out.extend_from_slice(&self.bits);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<BloomFilter> {
        if buf.len() < 2 || buf[0] != BLOOM_ENCODING_VERSION {
            return Err(ShardError::encoding(
                "bloom",
                "invalid bloom filter encoding (wrong size/version)",
            ));
        }
        if buf[1] == 0 || buf[1] as usize > BLOOM_HASHERS.len() {
            return Err(ShardError::encoding(
                "bloom",
                "invalid bloom filter encoding (unknown hasher type)",
            ));
        }
        Ok(BloomFilter {
            hasher_id: buf[1],
            bits: buf[2..].to_vec(),
        })
    }
}

fn is_word_char(c: char) -> bool {
    c == '_' || c.is_ascii_lowercase() || c.is_ascii_uppercase() || c.is_ascii_digit()
}

/// Find the next word of at least four runes starting the scan at `i`.
/// Returns the scan position after the word and the lowercased word.
pub(crate) fn find_next_word(mut i: usize, input: &[u8]) -> (usize, Option<Vec<u8>>) {
    while i < input.len() {
        while i < input.len() {
            let (c, sz) = decode_rune(&input[i..]);
            if is_word_char(to_lower_rune(c)) {
                break;
            }
            i += sz;
        }
        let start = i;
        let mut rune_len = 0;
        let mut word = Vec::new();
        while i < input.len() {
            let (c, sz) = decode_rune(&input[i..]);
            let lc = to_lower_rune(c);
            if !is_word_char(lc) {
                break;
            }
            rune_len += 1;
            word.push(lc as u8);
            i += sz;
        }
        if rune_len < MIN_WORD_LENGTH {
            continue;
        }
        debug_assert!(start < i);
        return (i, Some(word));
    }
    (i, None)
}

/// Hasher id 1. Must not change.
fn hasher_crc_blocked_64b_8k3(input: &[u8]) -> Vec<u32> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < input.len() {
        let (next, word) = find_next_word(i, input);
        i = next;
        let Some(s) = word else { continue };
        for k in 0..=(s.len() - MIN_WORD_LENGTH) {
            if s[k].is_ascii_digit() {
                continue;
            }
            let base = CASTAGNOLI.checksum(&s[k..k + 4]).wrapping_mul(512);
            let mut j = k + 4;
            while j < k + 8 && j <= s.len() {
                let h = CASTAGNOLI.checksum(&s[k..j]);
                out.push(base | h % 512);
                out.push(base | (h >> 9) % 512);
                out.push(base | (h >> 18) % 512);
                j += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(input: &str) -> Vec<String> {
        let data = input.as_bytes();
        let mut out = vec![];
        let mut i = 0;
        while i < data.len() {
            let (next, w) = find_next_word(i, data);
            i = next;
            if let Some(w) = w {
                out.push(String::from_utf8(w).unwrap());
            }
        }
        out
    }

    #[test]
    fn next_word_splitting() {
        assert_eq!(words("aeiou and SOMETIMES y"), vec!["aeiou", "sometimes"]);
        assert_eq!(words("\n//_azAZ09[~]3456"), vec!["_azaz09", "3456"]);
        assert_eq!(words("nee\u{212A} aa\u{212A}"), vec!["neek"]);
    }

    #[test]
    fn hasher_probe_counts() {
        // 4 starting points; lengths 4..=7 give 4, 3, 2, 1 fragments.
        assert_eq!(hasher_crc_blocked_64b_8k3(b"testing").len(), 3 * 10);
    }

    #[test]
    fn hasher_ignores_case_and_separators() {
        let a = hasher_crc_blocked_64b_8k3(b"some INPUTS ... a b cd");
        let b = hasher_crc_blocked_64b_8k3(b"SOME inputs ... a b cd");
        assert_eq!(a, b);
    }

    #[test]
    fn hasher_is_stable() {
        let got = hasher_crc_blocked_64b_8k3("nee\u{212A}  STAbilizAtion??".as_bytes());
        let want: Vec<u32> = vec![
            0x41b0c462, 0x41b0c46c, 0x41b0c5a8, 0x79882c16, 0x79882c62, 0x79882d0f,
            0x79882dbc, 0x79882d03, 0x79882d64, 0x79882cfd, 0x79882d90, 0x79882c74,
            0x79882d79, 0x79882d75, 0x79882df3, 0xde692090, 0xde69219a, 0xde6920db,
            0xde6920c0, 0xde6921ce, 0xde692132, 0xde6920a7, 0xde69207b, 0xde69201a,
            0xde6920df, 0xde69214b, 0xde692183, 0x814351a8, 0x81435050, 0x81435090,
            0x81435037, 0x814350db, 0x814350ce, 0x81435188, 0x8143509d, 0x81435113,
            0x814351bc, 0x814351b6, 0x81435054, 0x88772190, 0x8877201d, 0x887720b1,
            0x88772148, 0x8877208b, 0x887720b5, 0x88772154, 0x88772069, 0x887720aa,
            0x8877215c, 0x8877213a, 0x887720b2, 0x3654361b, 0x36543795, 0x365436c6,
            0x3654364e, 0x3654361a, 0x36543623, 0x365436ec, 0x3654365f, 0x3654364d,
            0x3654368b, 0x365437a4, 0x3654375c, 0x2d64f078, 0x2d64f159, 0x2d64f105,
            0x2d64f033, 0x2d64f145, 0x2d64f1ea, 0x2d64f130, 0x2d64f085, 0x2d64f029,
            0x2d64f0ad, 0x2d64f188, 0x2d64f148, 0xc9ba3319, 0xc9ba326e, 0xc9ba32d9,
            0xc9ba3381, 0xc9ba3331, 0xc9ba32ff, 0xc9ba320f, 0xc9ba335d, 0xc9ba3345,
            0xc9ba338a, 0xc9ba32aa, 0xc9ba3273, 0xc9cb6fb7, 0xc9cb6e72, 0xc9cb6fd9,
            0xc9cb6ed0, 0xc9cb6e47, 0xc9cb6ee2, 0xc9cb6e31, 0xc9cb6f8b, 0xc9cb6f06,
            0x07b383c1, 0x07b383ec, 0x07b38200, 0x07b3830a, 0x07b382ec, 0x07b3838d,
            0x90a95aad, 0x90a95a2a, 0x90a95bf2,
        ];
        assert_eq!(got, want);
    }

    #[test]
    fn zero_value_filter_accepts_everything() {
        let b = BloomFilter::default();
        assert!(b.maybe_has_bytes(b"anything at all"));
        assert!(b.maybe_has(&[1, 2, 3]));
    }

    #[test]
    fn no_false_negatives_across_shrinks() {
        let inputs: [&[u8]; 4] = [
            b"some words here",
            b"func NewStreamingSearch(ctx context.Context)",
            b"fixtures/testdata/alpha_beta_gamma",
            b"UPPERCASE lowercase MiXeDcAsE",
        ];
        let mut b = BloomFilter::with_len(BLOOM_SIZE_TEST);
        for input in inputs {
            b.add_bytes(input);
        }
        for target in [0.01, 0.2, 0.5, 0.9, 0.9999] {
            let shrunk = b.shrink_to_size(target);
            for input in inputs {
                assert!(b.maybe_has_bytes(input));
                assert!(shrunk.maybe_has_bytes(input), "target {}", target);
            }
        }
        assert!(!b.maybe_has_bytes(b"zzzzqqqq"));
    }

    #[test]
    fn shrinking_empty_filter_collapses_to_one_byte() {
        let b = BloomFilter::with_len(BLOOM_SIZE_TEST);
        assert_eq!(b.shrink_to_size(0.9999).len(), 8);
    }

    #[test]
    fn encode_decode_keeps_hasher() {
        let mut b = BloomFilter::with_len(16);
        b.add_bytes(b"hello world");
        let enc = b.encode();
        assert_eq!(&enc[..2], &[1, 1]);
        let back = BloomFilter::decode(&enc).unwrap();
        assert_eq!(back, b);
        assert!(BloomFilter::decode(&[2, 1, 0]).is_err());
        assert!(BloomFilter::decode(&[1, 9, 0]).is_err());
    }

    #[test]
    fn false_positive_rate_is_bounded() {
        // deterministic xorshift so the test is reproducible
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };
        let mut word = |len: usize| -> Vec<u8> {
            (0..len).map(|_| b'a' + (next() % 26) as u8).collect()
        };

        let mut b = BloomFilter::with_len(BLOOM_SIZE_TEST * 100);
        let mut present = Vec::new();
        for _ in 0..2000 {
            let w = word(8);
            b.add_bytes(&w);
            present.push(w);
        }
        let b = b.shrink_to_size(BLOOM_DEFAULT_LOAD);
        for w in &present {
            assert!(b.maybe_has_bytes(w));
        }

        let mut fp = 0;
        let trials = 5000;
        for _ in 0..trials {
            if b.maybe_has_bytes(&word(8)) {
                fp += 1;
            }
        }
        let rate = fp as f64 / trials as f64;
        assert!(rate <= 0.1, "false positive rate {}", rate);
    }
}
