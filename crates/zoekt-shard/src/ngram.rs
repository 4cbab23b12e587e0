// Copyright 2025 HyperZoekt Project
// Derived from sourcegraph/zoekt (https://github.com/sourcegraph/zoekt)
// Copyright 2016 Google Inc. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Trigram ("ngram") extraction and Unicode helpers shared by the builder,
//! the query planner and the verifier.
//!
//! An ngram is three runes packed into a `u64`, 21 bits each, so the
//! big-endian encoding sorts the same way as the rune triple.

use std::fmt;

pub const NGRAM_SIZE: usize = 3;
/// Bytes per ngram in the ngram text sections.
pub const NGRAM_ENCODING: usize = 8;

const RUNE_MASK: u64 = (1 << 21) - 1;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Ngram(pub u64);

impl Ngram {
    pub fn from_runes(r: [char; 3]) -> Self {
        Ngram((r[0] as u64) << 42 | (r[1] as u64) << 21 | (r[2] as u64))
    }

    pub fn runes(self) -> [char; 3] {
        let r = |v: u64| char::from_u32((v & RUNE_MASK) as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
        [r(self.0 >> 42), r(self.0 >> 21), r(self.0)]
    }

    pub fn from_be_bytes(b: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&b[..NGRAM_ENCODING]);
        Ngram(u64::from_be_bytes(buf))
    }

    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl From<&str> for Ngram {
    /// Pads with NUL when fewer than three runes are given.
    fn from(s: &str) -> Self {
        let mut r = ['\0'; 3];
        for (slot, c) in r.iter_mut().zip(s.chars()) {
            *slot = c;
        }
        Ngram::from_runes(r)
    }
}

impl fmt::Display for Ngram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.runes();
        write!(f, "{}{}{}", a, b, c)
    }
}

impl fmt::Debug for Ngram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ngram({:?})", self.to_string())
    }
}

/// Decode the rune at the start of `b`. Invalid or truncated sequences decode
/// as U+FFFD with width 1, so every byte string has a rune count.
pub fn decode_rune(b: &[u8]) -> (char, usize) {
    let Some(&first) = b.first() else {
        return (char::REPLACEMENT_CHARACTER, 0);
    };
    let width = match first {
        0x00..=0x7F => return (first as char, 1),
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return (char::REPLACEMENT_CHARACTER, 1),
    };
    if b.len() < width {
        return (char::REPLACEMENT_CHARACTER, 1);
    }
    match std::str::from_utf8(&b[..width]) {
        Ok(s) => match s.chars().next() {
            Some(c) => (c, width),
            None => (char::REPLACEMENT_CHARACTER, 1),
        },
        Err(_) => (char::REPLACEMENT_CHARACTER, 1),
    }
}

/// Iterator over `(byte offset, rune, width)` using [`decode_rune`].
pub struct Runes<'a> {
    data: &'a [u8],
    off: usize,
}

pub fn runes(data: &[u8]) -> Runes<'_> {
    Runes { data, off: 0 }
}

impl Iterator for Runes<'_> {
    type Item = (usize, char, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.off >= self.data.len() {
            return None;
        }
        let (c, sz) = decode_rune(&self.data[self.off..]);
        let at = self.off;
        self.off += sz;
        Some((at, c, sz))
    }
}

pub fn rune_count(data: &[u8]) -> usize {
    runes(data).count()
}

/// Single-rune lowercase mapping.
pub fn to_lower_rune(c: char) -> char {
    if c.is_ascii() {
        return c.to_ascii_lowercase();
    }
    c.to_lowercase().next().unwrap_or(c)
}

fn single_upper(c: char) -> Option<char> {
    let mut up = c.to_uppercase();
    match (up.next(), up.next()) {
        (Some(u), None) => Some(u),
        _ => None,
    }
}

fn single_lower(c: char) -> Option<char> {
    let mut lo = c.to_lowercase();
    match (lo.next(), lo.next()) {
        (Some(l), None) => Some(l),
        _ => None,
    }
}

pub fn to_lower_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut buf = [0u8; 4];
    for (at, c, sz) in runes(data) {
        if c == char::REPLACEMENT_CHARACTER && sz == 1 {
            out.push(data[at]);
            continue;
        }
        out.extend_from_slice(to_lower_rune(c).encode_utf8(&mut buf).as_bytes());
    }
    out
}

/// Compare `mixed` against an already lowered pattern rune by rune. Returns
/// the number of bytes of `mixed` consumed when the whole pattern matched.
pub fn case_folding_equals(lower: &[u8], mixed: &[u8]) -> Option<usize> {
    let (mut li, mut mi) = (0usize, 0usize);
    while li < lower.len() && mi < mixed.len() {
        let (lr, lsz) = decode_rune(&lower[li..]);
        let (mr, msz) = decode_rune(&mixed[mi..]);
        li += lsz;
        mi += msz;
        if lr != to_lower_rune(mr) {
            return None;
        }
    }
    (li == lower.len()).then_some(mi)
}

/// Runes whose case orbit is wider than a lower/upper pair. Each group is
/// closed: a member folds to every other member.
const FOLD_GROUPS: &[&[char]] = &[
    &['k', 'K', '\u{212A}'],
    &['s', 'S', '\u{17F}'],
    &['å', 'Å', '\u{212B}'],
    &['ω', 'Ω', '\u{2126}'],
    &['i', 'I', '\u{130}'],
    &['µ', 'μ', 'Μ'],
    &['σ', 'ς', 'Σ'],
    &['β', 'ϐ', 'Β'],
    &['ε', 'ϵ', 'Ε'],
    &['θ', 'ϑ', 'Θ', 'ϴ'],
    &['ι', '\u{345}', 'Ι', '\u{1FBE}'],
    &['κ', 'ϰ', 'Κ'],
    &['π', 'ϖ', 'Π'],
    &['ρ', 'ϱ', 'Ρ'],
    &['φ', 'ϕ', 'Φ'],
    &['ß', 'ẞ'],
];

/// All spellings of `c` that compare equal to it under case folding,
/// including `c` itself.
pub fn case_orbit(c: char) -> Vec<char> {
    let mut out = vec![c];
    let mut i = 0;
    while i < out.len() {
        let cur = out[i];
        let mut push = |x: char| {
            if !out.contains(&x) {
                out.push(x);
            }
        };
        if let Some(l) = single_lower(cur) {
            push(l);
        }
        if let Some(u) = single_upper(cur) {
            push(u);
        }
        for group in FOLD_GROUPS {
            if group.contains(&cur) {
                for &g in group.iter() {
                    push(g);
                }
            }
        }
        i += 1;
    }
    out
}

/// Every case variant of `ng`, folding each rune independently. The result
/// is deduplicated and always contains `ng`.
pub fn generate_case_ngrams(ng: Ngram) -> Vec<Ngram> {
    let [a, b, c] = ng.runes();
    let (oa, ob, oc) = (case_orbit(a), case_orbit(b), case_orbit(c));
    let mut out = Vec::with_capacity(oa.len() * ob.len() * oc.len());
    for &x in &oa {
        for &y in &ob {
            for &z in &oc {
                let v = Ngram::from_runes([x, y, z]);
                if !out.contains(&v) {
                    out.push(v);
                }
            }
        }
    }
    out
}

/// An ngram of a pattern with its rune index and byte position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NgramOff {
    pub ngram: Ngram,
    pub rune_index: u32,
    pub byte_off: u32,
    pub byte_size: u32,
}

/// Split into overlapping trigrams in pattern order.
pub fn split_ngrams(data: &[u8]) -> Vec<NgramOff> {
    let mut out = Vec::with_capacity(data.len());
    let mut gram = ['\0'; 3];
    let mut offs = [0u32; 3];
    for (count, (at, c, sz)) in runes(data).enumerate() {
        gram = [gram[1], gram[2], c];
        offs = [offs[1], offs[2], at as u32];
        if count + 1 < NGRAM_SIZE {
            continue;
        }
        out.push(NgramOff {
            ngram: Ngram::from_runes(gram),
            rune_index: (count + 1 - NGRAM_SIZE) as u32,
            byte_off: offs[0],
            byte_size: (at + sz) as u32 - offs[0],
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack() {
        let ng = Ngram::from("aé€");
        assert_eq!(ng.runes(), ['a', 'é', '€']);
        assert_eq!(ng.to_string(), "aé€");
        assert_eq!(Ngram::from_be_bytes(&ng.to_be_bytes()), ng);
        assert!(Ngram::from("abc") < Ngram::from("abd"));
        assert!(Ngram::from("abz") < Ngram::from("aca"));
    }

    #[test]
    fn case_ngrams_only_fold_letters() {
        let mut got: Vec<String> = generate_case_ngrams(Ngram::from("aB1"))
            .into_iter()
            .map(|n| n.to_string())
            .collect();
        got.sort();
        assert_eq!(got, vec!["AB1", "Ab1", "aB1", "ab1"]);
    }

    #[test]
    fn kelvin_sign_is_in_the_k_orbit() {
        let variants = generate_case_ngrams(Ngram::from("kk1"));
        assert_eq!(variants.len(), 9);
        assert!(variants.contains(&Ngram::from("\u{212A}K1")));
        assert_eq!(to_lower_rune('\u{212A}'), 'k');
    }

    #[test]
    fn split_reports_rune_and_byte_positions() {
        let got = split_ngrams("aé€bc".as_bytes());
        let names: Vec<String> = got.iter().map(|o| o.ngram.to_string()).collect();
        assert_eq!(names, vec!["aé€", "é€b", "€bc"]);
        assert_eq!(got[1].rune_index, 1);
        assert_eq!(got[1].byte_off, 1);
        assert_eq!(got[1].byte_size, 6);
        assert_eq!(got[2].rune_index, 2);
        assert!(split_ngrams(b"ab").is_empty());
    }

    #[test]
    fn decode_rune_handles_invalid_input() {
        assert_eq!(decode_rune(&[0xff, b'a']), (char::REPLACEMENT_CHARACTER, 1));
        assert_eq!(decode_rune(&[0xe2, 0x82]), (char::REPLACEMENT_CHARACTER, 1));
        assert_eq!(decode_rune("€".as_bytes()), ('€', 3));
        assert_eq!(rune_count(&[b'a', 0xff, b'b']), 3);
    }

    #[test]
    fn folding_compare_consumes_mixed_width() {
        let lower = to_lower_bytes("neek".as_bytes());
        let mixed = "NEE\u{212A} rest".as_bytes();
        assert_eq!(case_folding_equals(&lower, mixed), Some(6));
        assert_eq!(case_folding_equals(b"nope", mixed), None);
        assert_eq!(case_folding_equals(b"neekz", "NEEK".as_bytes()), None);
    }
}
