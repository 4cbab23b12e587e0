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

//! Ngram → posting list lookup.
//!
//! Two stores exist side by side: a fully decoded hash map (v15 shards) and a
//! paged btree that keeps only bucket keys resident and reads ngram buckets
//! from the backing store on demand (v16). Both resolve an ngram to its rank
//! in the sorted ngram table; the rank indexes the posting offset table.

mod btree;
mod map;

use std::sync::Arc;

use crate::codec::from_deltas;
use crate::error::{Result, ShardError};
use crate::indexfile::IndexFile;
use crate::ngram::{Ngram, NGRAM_ENCODING};
use crate::toc::{CompoundSection, SimpleSection};

pub use btree::{BtreeNgramIndex, BTREE_BUCKET_SIZE};
pub use map::MapNgramIndex;

pub trait NgramIndex: Send + Sync {
    /// Rank of `ng` in the sorted ngram table, if present.
    fn rank(&self, ng: Ngram) -> Result<Option<usize>>;

    /// Posting list location for the ngram at `index`.
    fn posting_list(&self, index: usize) -> SimpleSection;

    /// Ranks for a batch of sorted ngrams, plus the number of probes paid.
    /// Stops at the first absent ngram, so a short result means "no match".
    fn ngram_indexes(&self, ngrams: &[Ngram]) -> Result<(Vec<usize>, usize)>;

    fn len(&self) -> usize;

    fn size_bytes(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, ng: Ngram) -> Result<Option<SimpleSection>> {
        Ok(self.rank(ng)?.map(|i| self.posting_list(i)))
    }

    /// Encoded size of the posting list, a cheap proxy for occurrence count.
    fn frequency(&self, ng: Ngram) -> Result<u32> {
        Ok(self.get(ng)?.map_or(0, |s| s.sz))
    }
}

/// Posting offsets with the sentinel from the compound index, shared by
/// both stores.
#[derive(Clone, Debug, Default)]
pub(crate) struct PostingOffsets(Vec<u32>);

impl PostingOffsets {
    pub(crate) fn section(&self, index: usize) -> SimpleSection {
        match (self.0.get(index), self.0.get(index + 1)) {
            (Some(&off), Some(&end)) => SimpleSection { off, sz: end - off },
            _ => SimpleSection::default(),
        }
    }

    pub(crate) fn size_bytes(&self) -> usize {
        4 * self.0.len()
    }
}

/// Open the ngram store for one corpus; `btree` selects the paged store.
pub fn open_ngram_index(
    file: Arc<dyn IndexFile>,
    text: SimpleSection,
    postings: &CompoundSection,
    btree: bool,
) -> Result<Box<dyn NgramIndex>> {
    if text.sz as usize % NGRAM_ENCODING != 0 {
        return Err(ShardError::encoding(
            "ngram text",
            format!("section size % {} != 0: sz {}", NGRAM_ENCODING, text.sz),
        ));
    }
    let count = text.sz as usize / NGRAM_ENCODING;
    let offsets = postings.absolute_index(file.as_ref())?;
    if offsets.len() != count + 1 {
        return Err(ShardError::format(
            "postings",
            format!(
                "got {} posting lists, want {}",
                offsets.len().saturating_sub(1),
                count
            ),
        ));
    }
    let offsets = PostingOffsets(offsets);
    if btree {
        Ok(Box::new(BtreeNgramIndex::open(file, text, count, offsets)?))
    } else {
        Ok(Box::new(MapNgramIndex::open(file.as_ref(), text, offsets)?))
    }
}

/// Decode one posting list into corpus-global rune offsets.
pub fn read_postings(file: &dyn IndexFile, sec: SimpleSection) -> Result<Vec<u32>> {
    if sec.sz == 0 {
        return Ok(Vec::new());
    }
    from_deltas(file.read(sec.off, sec.sz)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::{to_deltas, to_sized_deltas};
    use crate::indexfile::MemIndexFile;

    /// Lay out ngram text and postings for `entries` the way the builder does.
    pub(crate) fn layout(entries: &[(Ngram, Vec<u32>)]) -> (Arc<dyn IndexFile>, SimpleSection, CompoundSection) {
        let mut data = vec![0xAAu8; 3];
        let text = SimpleSection {
            off: data.len() as u32,
            sz: (entries.len() * NGRAM_ENCODING) as u32,
        };
        for (ng, _) in entries {
            data.extend_from_slice(&ng.to_be_bytes());
        }
        let data_off = data.len() as u32;
        let mut starts = Vec::new();
        for (_, posts) in entries {
            starts.push(data.len() as u32 - data_off);
            data.extend_from_slice(&to_deltas(posts));
        }
        let data_sec = SimpleSection {
            off: data_off,
            sz: data.len() as u32 - data_off,
        };
        let index = to_sized_deltas(&starts);
        let index_sec = SimpleSection {
            off: data.len() as u32,
            sz: index.len() as u32,
        };
        data.extend_from_slice(&index);
        let file: Arc<dyn IndexFile> = Arc::new(MemIndexFile::new("postings", data));
        (
            file,
            text,
            CompoundSection {
                data: data_sec,
                index: index_sec,
            },
        )
    }

    pub(crate) fn sample() -> Vec<(Ngram, Vec<u32>)> {
        let mut v: Vec<(Ngram, Vec<u32>)> = ["abc", "bcd", "cde", "hel", "ell", "llo", "xyz"]
            .iter()
            .enumerate()
            .map(|(i, s)| (Ngram::from(*s), (0..=i as u32).map(|j| j * 10 + i as u32).collect()))
            .collect();
        v.sort_by_key(|(ng, _)| *ng);
        v
    }

    fn check_store(store: &dyn NgramIndex, file: &dyn IndexFile, entries: &[(Ngram, Vec<u32>)]) {
        assert_eq!(store.len(), entries.len());
        for (i, (ng, posts)) in entries.iter().enumerate() {
            assert_eq!(store.rank(*ng).unwrap(), Some(i), "{}", ng);
            let sec = store.get(*ng).unwrap().unwrap();
            assert_eq!(&read_postings(file, sec).unwrap(), posts);
            assert_eq!(store.frequency(*ng).unwrap(), sec.sz);
        }
        assert_eq!(store.get(Ngram::from("zzz")).unwrap(), None);
        assert_eq!(store.get(Ngram::from("aaa")).unwrap(), None);
        assert_eq!(store.frequency(Ngram::from("qqq")).unwrap(), 0);
    }

    #[test]
    fn both_stores_agree() {
        let entries = sample();
        for btree in [false, true] {
            let (file, text, postings) = layout(&entries);
            let store = open_ngram_index(file.clone(), text, &postings, btree).unwrap();
            check_store(store.as_ref(), file.as_ref(), &entries);
        }
    }

    #[test]
    fn ngram_indexes_stops_at_first_absent() {
        let entries = sample();
        let (file, text, postings) = layout(&entries);
        for btree in [false, true] {
            let store = open_ngram_index(file.clone(), text, &postings, btree).unwrap();
            let mut q = vec![Ngram::from("abc"), Ngram::from("hel"), Ngram::from("xyz")];
            q.sort();
            let (idx, probes) = store.ngram_indexes(&q).unwrap();
            assert_eq!(idx.len(), 3);
            assert!(probes >= 1);

            let mut q = vec![Ngram::from("abc"), Ngram::from("ghi"), Ngram::from("xyz")];
            q.sort();
            let (idx, _) = store.ngram_indexes(&q).unwrap();
            assert_eq!(idx.len(), 1);
        }
    }

    #[test]
    fn mismatched_posting_count_is_rejected() {
        let entries = sample();
        let (file, mut text, postings) = layout(&entries);
        text.sz -= NGRAM_ENCODING as u32;
        assert!(open_ngram_index(file.clone(), text, &postings, true).is_err());
        text.sz += 1;
        assert!(open_ngram_index(file, text, &postings, false).is_err());
    }

    #[test]
    fn empty_corpus() {
        let (file, text, postings) = layout(&[]);
        for btree in [false, true] {
            let store = open_ngram_index(file.clone(), text, &postings, btree).unwrap();
            assert!(store.is_empty());
            assert_eq!(store.get(Ngram::from("abc")).unwrap(), None);
            assert_eq!(store.ngram_indexes(&[Ngram::from("abc")]).unwrap().0.len(), 0);
        }
    }
}
