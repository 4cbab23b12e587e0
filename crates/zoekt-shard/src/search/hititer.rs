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

//! Iterators over trigram hits. A hit is a corpus-global rune offset;
//! `u32::MAX` marks exhaustion.

use std::fmt;

use crate::api::Stats;
use crate::error::Result;
use crate::indexfile::IndexFile;
use crate::ngram::{generate_case_ngrams, Ngram};
use crate::posting::{read_postings, NgramIndex};

pub(crate) const EXHAUSTED: u32 = u32::MAX;

pub(crate) trait HitIterator: fmt::Debug + Send {
    /// Current hit, or `EXHAUSTED`.
    fn first(&self) -> u32;

    /// Skip forward until `first() > limit`.
    fn next(&mut self, limit: u32);
}

/// Walks one decoded posting list.
#[derive(Debug)]
pub(crate) struct PostingIter {
    hits: Vec<u32>,
    at: usize,
}

impl PostingIter {
    pub(crate) fn new(hits: Vec<u32>) -> Self {
        PostingIter { hits, at: 0 }
    }
}

impl HitIterator for PostingIter {
    fn first(&self) -> u32 {
        self.hits.get(self.at).copied().unwrap_or(EXHAUSTED)
    }

    fn next(&mut self, limit: u32) {
        if limit == EXHAUSTED {
            self.at = self.hits.len();
            return;
        }
        let rest = &self.hits[self.at.min(self.hits.len())..];
        self.at += rest.partition_point(|&h| h <= limit);
    }
}

/// Union of several iterators, e.g. the case variants of one trigram.
#[derive(Debug)]
pub(crate) struct MergingIter {
    iters: Vec<Box<dyn HitIterator>>,
}

impl HitIterator for MergingIter {
    fn first(&self) -> u32 {
        self.iters.iter().map(|i| i.first()).min().unwrap_or(EXHAUSTED)
    }

    fn next(&mut self, limit: u32) {
        for i in &mut self.iters {
            i.next(limit);
        }
    }
}

/// Hits of `first` that are followed by a hit of `last` exactly
/// `distance` runes later.
#[derive(Debug)]
pub(crate) struct DistanceIter {
    distance: u32,
    first: Box<dyn HitIterator>,
    last: Box<dyn HitIterator>,
}

impl DistanceIter {
    pub(crate) fn new(first: Box<dyn HitIterator>, last: Box<dyn HitIterator>, distance: u32) -> Self {
        let mut it = DistanceIter { distance, first, last };
        it.find_next();
        it
    }

    fn find_next(&mut self) {
        loop {
            let p1 = self.first.first();
            let p2 = self.last.first();
            if p1 == EXHAUSTED || p2 == EXHAUSTED {
                self.first.next(EXHAUSTED);
                return;
            }
            let want = p1.saturating_add(self.distance);
            if want < p2 {
                self.first.next(p2 - self.distance - 1);
            } else if want > p2 {
                self.last.next(want - 1);
            } else {
                return;
            }
        }
    }
}

impl HitIterator for DistanceIter {
    fn first(&self) -> u32 {
        self.first.first()
    }

    fn next(&mut self, limit: u32) {
        self.first.next(limit);
        self.last.next(limit.saturating_add(self.distance));
        self.find_next();
    }
}

/// Iterator over every spelling of `ng` (one spelling when case sensitive).
pub(crate) fn trigram_hits(
    file: &dyn IndexFile,
    index: &dyn NgramIndex,
    ng: Ngram,
    case_sensitive: bool,
    stats: &mut Stats,
) -> Result<Box<dyn HitIterator>> {
    let variants = if case_sensitive { vec![ng] } else { generate_case_ngrams(ng) };
    let mut iters: Vec<Box<dyn HitIterator>> = Vec::with_capacity(variants.len());
    for v in variants {
        stats.ngram_lookups += 1;
        let Some(sec) = index.get(v)? else {
            continue;
        };
        stats.index_bytes_loaded += sec.sz as i64;
        let hits = read_postings(file, sec)?;
        stats.ngram_matches += hits.len();
        iters.push(Box::new(PostingIter::new(hits)));
    }
    if iters.len() == 1 {
        if let Some(only) = iters.pop() {
            return Ok(only);
        }
    }
    Ok(Box::new(MergingIter { iters }))
}

/// Turns hits of an anchor trigram into per-document candidate offsets.
///
/// `left_pad` is the anchor's rune index in the pattern and `right_pad` the
/// number of pattern runes from the anchor to the end, so a hit `h` is a
/// candidate for a pattern spanning `[h - left_pad, h + right_pad)`.
#[derive(Debug)]
pub(crate) struct NgramDocIter<'a> {
    pub(crate) left_pad: u32,
    pub(crate) right_pad: u32,
    pub(crate) iter: Box<dyn HitIterator>,
    /// Per-document end rune offsets of the searched corpus.
    pub(crate) ends: &'a [u32],
    doc: u32,
}

impl<'a> NgramDocIter<'a> {
    pub(crate) fn new(left_pad: u32, right_pad: u32, iter: Box<dyn HitIterator>, ends: &'a [u32]) -> Self {
        NgramDocIter {
            left_pad,
            right_pad,
            iter,
            ends,
            doc: 0,
        }
    }

    fn doc_containing(&self, offset: u32, mut doc: u32) -> u32 {
        let ends = self.ends;
        let n = ends.len() as u32;
        while doc < n && offset >= ends[doc as usize] {
            if doc + 128 < n && ends[(doc + 128) as usize] <= offset {
                doc += 128;
            } else {
                doc += 1;
            }
        }
        doc
    }

    pub(crate) fn next_doc(&mut self) -> u32 {
        let first = self.iter.first();
        if first == EXHAUSTED {
            return EXHAUSTED;
        }
        self.doc = self.doc_containing(first, self.doc);
        if self.doc as usize >= self.ends.len() {
            return EXHAUSTED;
        }
        self.doc
    }

    pub(crate) fn prepare(&mut self, doc: u32) {
        let start = if doc > 0 { self.ends[doc as usize - 1] } else { 0 };
        if start > 0 {
            self.iter.next((start + self.left_pad).saturating_sub(1));
        }
        self.doc = doc;
    }

    /// Doc-relative rune offsets of every candidate in the prepared document.
    pub(crate) fn candidates(&mut self) -> Vec<u32> {
        let Some(&end) = self.ends.get(self.doc as usize) else {
            return Vec::new();
        };
        let start = if self.doc > 0 { self.ends[self.doc as usize - 1] } else { 0 };
        let mut out = Vec::new();
        loop {
            let hit = self.iter.first();
            if hit == EXHAUSTED || hit >= end {
                break;
            }
            self.iter.next(hit);
            if hit < start + self.left_pad || hit + self.right_pad > end {
                continue;
            }
            out.push(hit - start - self.left_pad);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(hits: &[u32]) -> Box<dyn HitIterator> {
        Box::new(PostingIter::new(hits.to_vec()))
    }

    fn drain(mut it: impl HitIterator) -> Vec<u32> {
        let mut out = Vec::new();
        while it.first() != EXHAUSTED {
            let h = it.first();
            out.push(h);
            it.next(h);
        }
        out
    }

    #[test]
    fn posting_iter_skips_to_limit() {
        let mut it = PostingIter::new(vec![1, 5, 9, 20]);
        assert_eq!(it.first(), 1);
        it.next(5);
        assert_eq!(it.first(), 9);
        it.next(100);
        assert_eq!(it.first(), EXHAUSTED);
    }

    #[test]
    fn merging_iter_is_sorted_union() {
        let it = MergingIter {
            iters: vec![posting(&[1, 7, 10]), posting(&[2, 7, 30])],
        };
        assert_eq!(drain(it), vec![1, 2, 7, 10, 30]);
    }

    #[test]
    fn distance_iter_requires_exact_gap() {
        // "abcd" at 0 and 10: "abc" hits, "bcd" hits one rune later
        let it = DistanceIter::new(posting(&[0, 4, 10]), posting(&[1, 6, 11]), 1);
        assert_eq!(drain(it), vec![0, 10]);

        let none = DistanceIter::new(posting(&[0]), posting(&[5]), 2);
        assert_eq!(none.first(), EXHAUSTED);
    }

    #[test]
    fn doc_iter_respects_document_ends() {
        // docs end at runes 10, 20, 300
        let ends = [10, 20, 300];
        let mut it = NgramDocIter::new(1, 3, posting(&[3, 9, 12, 250]), &ends);
        assert_eq!(it.next_doc(), 0);
        it.prepare(0);
        // 9 - 1 + 4 runes would cross the end of doc 0
        assert_eq!(it.candidates(), vec![2]);
        assert_eq!(it.next_doc(), 1);
        it.prepare(1);
        assert_eq!(it.candidates(), vec![1]);
        assert_eq!(it.next_doc(), 2);
        it.prepare(2);
        assert_eq!(it.candidates(), vec![229]);
        assert_eq!(it.next_doc(), EXHAUSTED);
    }
}
