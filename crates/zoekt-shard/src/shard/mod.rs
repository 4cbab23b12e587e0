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

//! Shard module: the loaded, read-only view of one shard file (`IndexData`),
//! the loader that builds it, per-repository statistics, sidecar metadata
//! and the `ShardBuilder` that produces shard files.
//!
//! Everything in `IndexData` is immutable after `load` returns, so any
//! number of searches may run against one instance concurrently.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::api::{DocumentSection, IndexMetadata, RepoListEntry, RepoStats, Repository, Symbol};
use crate::codec::{from_sized_deltas, unmarshal_doc_sections};
use crate::error::Result;
use crate::indexfile::IndexFile;
use crate::posting::NgramIndex;
use crate::runeoffset::RuneOffsetMap;
use crate::toc::SimpleSection;

mod builder;
mod meta;
mod reader;
mod stats;

pub use builder::ShardBuilder;
pub use meta::{load_tombstones, read_sidecar, set_tombstone, update_sidecar};
pub use reader::read_metadata;

/// Width of a per-document content checksum (crc64).
pub const CHECKSUM_SIZE: usize = 8;

/// Interned symbol strings and per-symbol metadata.
///
/// `sym_meta_data` holds four `u32`s per symbol: an unused slot, the kind id,
/// the parent id and the parent kind id. Ids index the two string pools.
#[derive(Clone, Debug, Default)]
pub(crate) struct SymbolData {
    pub(crate) sym_content: Vec<u8>,
    pub(crate) sym_index: Vec<u32>,
    pub(crate) sym_kind_content: Vec<u8>,
    pub(crate) sym_kind_index: Vec<u32>,
    pub(crate) sym_meta_data: Vec<u32>,
}

fn pool_entry<'a>(content: &'a [u8], index: &[u32], i: u32) -> Option<&'a [u8]> {
    let i = i as usize;
    let start = *index.get(i)? as usize;
    let end = *index.get(i + 1)? as usize;
    content.get(start..end)
}

impl SymbolData {
    pub(crate) fn parent(&self, i: u32) -> Option<&[u8]> {
        pool_entry(&self.sym_content, &self.sym_index, i)
    }

    pub(crate) fn kind(&self, i: u32) -> Option<&[u8]> {
        pool_entry(&self.sym_kind_content, &self.sym_kind_index, i)
    }

    /// Metadata of symbol `i`, or `None` when `i` is past the table. The
    /// caller fills in `sym` from the document content.
    pub(crate) fn data(&self, i: u32) -> Option<Symbol> {
        let at = i as usize * 4;
        let meta = self.sym_meta_data.get(at..at + 4)?;
        let text = |b: Option<&[u8]>| b.map(|b| String::from_utf8_lossy(b).into_owned());
        Some(Symbol {
            sym: String::new(),
            kind: text(self.kind(meta[1]))?,
            parent: text(self.parent(meta[2]))?,
            parent_kind: text(self.kind(meta[3]))?,
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sym_meta_data.is_empty()
    }
}

/// The pattern-independent data needed in memory to search one shard.
/// Posting lists and document contents stay in the backing store.
pub struct IndexData {
    pub(crate) file: Arc<dyn IndexFile>,

    pub(crate) meta_data: IndexMetadata,
    pub(crate) repo_meta_data: Vec<Repository>,

    pub(crate) ngrams: Box<dyn NgramIndex>,
    pub(crate) file_name_ngrams: Box<dyn NgramIndex>,

    pub(crate) newlines_start: u32,
    pub(crate) newlines_index: Vec<u32>,

    pub(crate) doc_sections_start: u32,
    pub(crate) doc_sections_index: Vec<u32>,

    /// Symbol sections in corpus-global rune offsets.
    pub(crate) rune_doc_sections: Vec<DocumentSection>,

    pub(crate) rune_offsets: RuneOffsetMap,
    /// Content offsets, relative to `boundaries_start`; includes the end of
    /// the last document.
    pub(crate) boundaries_start: u32,
    pub(crate) boundaries: Vec<u32>,
    pub(crate) file_end_runes: Vec<u32>,

    pub(crate) file_name_content: Vec<u8>,
    pub(crate) file_name_index: Vec<u32>,
    pub(crate) file_name_rune_offsets: RuneOffsetMap,
    pub(crate) file_name_end_runes: Vec<u32>,

    /// `file_end_symbol[i]` is the index of the first symbol of document i.
    pub(crate) file_end_symbol: Vec<u32>,
    pub(crate) symbols: SymbolData,

    pub(crate) file_branch_masks: Vec<u64>,
    /// Per repository: single-bit mask → branch name.
    pub(crate) branch_names: Vec<BTreeMap<u64, String>>,
    /// Per repository: branch name → single-bit mask.
    pub(crate) branch_ids: Vec<HashMap<String, u64>>,

    pub(crate) sub_repos: Vec<u32>,
    pub(crate) sub_repo_paths: Vec<Vec<String>>,

    pub(crate) checksums: Vec<u8>,
    pub(crate) languages: Vec<u8>,
    pub(crate) language_map: HashMap<u16, String>,

    /// Repository index of every document.
    pub(crate) repos: Vec<u16>,
    pub(crate) repo_list_entries: Vec<RepoListEntry>,
}

impl fmt::Debug for IndexData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexData")
            .field("file", &self.file.name())
            .field("docs", &self.num_docs())
            .field("repos", &self.repo_meta_data.len())
            .field("version", &self.meta_data.index_format_version)
            .finish()
    }
}

impl fmt::Display for IndexData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard({})", self.file.name())
    }
}

impl IndexData {
    pub fn name(&self) -> &str {
        self.file.name()
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.meta_data
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repo_meta_data
    }

    pub fn num_docs(&self) -> u32 {
        self.file_branch_masks.len() as u32
    }

    /// Repositories that are not tombstoned, each with its statistics.
    pub fn list(&self) -> Vec<RepoListEntry> {
        self.repo_list_entries
            .iter()
            .zip(&self.repo_meta_data)
            .filter(|(_, md)| !md.tombstone)
            .map(|(e, _)| e.clone())
            .collect()
    }

    /// Sum of the statistics of every listed repository.
    pub fn stats(&self) -> RepoStats {
        let mut total = RepoStats::default();
        for e in self.list() {
            total.add(&e.stats);
        }
        total
    }

    /// Release the backing store. Searches must have finished.
    pub fn close(self) {
        tracing::debug!(shard = %self.file.name(), "closing shard");
    }

    pub(crate) fn file_name(&self, doc: u32) -> &[u8] {
        let i = doc as usize;
        match (self.file_name_index.get(i), self.file_name_index.get(i + 1)) {
            (Some(&s), Some(&e)) => self.file_name_content.get(s as usize..e as usize).unwrap_or(&[]),
            _ => &[],
        }
    }

    /// Index of the document named `name`, scanning from the start.
    pub fn find_document(&self, name: &str) -> Option<u32> {
        (0..self.num_docs()).find(|&i| self.file_name(i) == name.as_bytes())
    }

    pub(crate) fn read_contents(&self, doc: u32) -> Result<&[u8]> {
        let i = doc as usize;
        let (start, end) = (self.boundaries[i], self.boundaries[i + 1]);
        self.file.read(self.boundaries_start + start, end - start)
    }

    /// Read `sz` bytes at content-relative `off`, capped at the end of the
    /// content corpus.
    pub(crate) fn read_content_slice(&self, off: u32, sz: u32) -> Result<&[u8]> {
        let total = self.boundaries.last().copied().unwrap_or(0);
        let sz = sz.min(total.saturating_sub(off));
        self.file.read(self.boundaries_start + off, sz)
    }

    fn doc_section(start: u32, index: &[u32], doc: u32) -> SimpleSection {
        let i = doc as usize;
        SimpleSection {
            off: start + index[i],
            sz: index[i + 1] - index[i],
        }
    }

    /// Newline byte offsets of `doc`, plus the encoded size that was read.
    pub(crate) fn read_newlines(&self, doc: u32) -> Result<(Vec<u32>, u32)> {
        let sec = Self::doc_section(self.newlines_start, &self.newlines_index, doc);
        let blob = self.file.read(sec.off, sec.sz)?;
        Ok((from_sized_deltas(blob)?, sec.sz))
    }

    pub(crate) fn read_doc_sections(&self, doc: u32) -> Result<(Vec<DocumentSection>, u32)> {
        let sec = Self::doc_section(self.doc_sections_start, &self.doc_sections_index, doc);
        let blob = self.file.read(sec.off, sec.sz)?;
        Ok((unmarshal_doc_sections(blob)?, sec.sz))
    }

    pub(crate) fn checksum(&self, doc: u32) -> &[u8] {
        let start = doc as usize * CHECKSUM_SIZE;
        self.checksums.get(start..start + CHECKSUM_SIZE).unwrap_or(&[])
    }

    /// Language code of `doc`: two little-endian bytes from v16 on, one
    /// byte before.
    pub(crate) fn language_code(&self, doc: u32) -> u16 {
        let i = doc as usize;
        if self.meta_data.index_format_version >= 16 {
            match self.languages.get(2 * i..2 * i + 2) {
                Some(b) => u16::from_le_bytes([b[0], b[1]]),
                None => 0,
            }
        } else {
            self.languages.get(i).copied().map_or(0, u16::from)
        }
    }

    pub(crate) fn language(&self, doc: u32) -> &str {
        self.language_map
            .get(&self.language_code(doc))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Index of the lowest branch containing `doc`.
    pub(crate) fn branch_index(&self, doc: u32) -> Option<usize> {
        let mask = self.file_branch_masks[doc as usize];
        (mask != 0).then(|| mask.trailing_zeros() as usize)
    }

    /// Branch names for every bit set in `doc`'s mask.
    pub(crate) fn branch_names_for(&self, doc: u32) -> Vec<String> {
        let repo = self.repos.get(doc as usize).copied().unwrap_or(0) as usize;
        let Some(names) = self.branch_names.get(repo) else {
            return Vec::new();
        };
        let mut mask = self.file_branch_masks[doc as usize];
        let mut out = Vec::new();
        while mask != 0 {
            let bit = mask & mask.wrapping_neg();
            if let Some(n) = names.get(&bit) {
                out.push(n.clone());
            }
            mask &= !bit;
        }
        out
    }

    /// Byte doc sections of `doc` with each symbol's metadata attached.
    pub fn symbols(&self, doc: u32) -> Result<Vec<(DocumentSection, Option<Symbol>)>> {
        let (secs, _) = self.read_doc_sections(doc)?;
        let first = self.file_end_symbol.get(doc as usize).copied().unwrap_or(0);
        let content = self.read_contents(doc)?;
        Ok(secs
            .into_iter()
            .enumerate()
            .map(|(j, sec)| {
                let sym = self.symbols.data(first + j as u32).map(|mut s| {
                    s.sym = content
                        .get(sec.start as usize..sec.end as usize)
                        .map(|b| String::from_utf8_lossy(b).into_owned())
                        .unwrap_or_default();
                    s
                });
                (sec, sym)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> SymbolData {
        SymbolData {
            sym_content: b"Outerother".to_vec(),
            sym_index: vec![0, 0, 5, 10],
            sym_kind_content: b"functionclass".to_vec(),
            sym_kind_index: vec![0, 0, 8, 13],
            sym_meta_data: vec![0, 1, 1, 2, 0, 2, 0, 0],
        }
    }

    #[test]
    fn symbol_data_resolves_pools() {
        let s = pools();
        let sym = s.data(0).unwrap();
        assert_eq!(sym.kind, "function");
        assert_eq!(sym.parent, "Outer");
        assert_eq!(sym.parent_kind, "class");
        let top = s.data(1).unwrap();
        assert_eq!(top.kind, "class");
        assert_eq!(top.parent, "");
    }

    #[test]
    fn symbol_out_of_range_is_none() {
        let s = pools();
        assert!(s.data(2).is_none());
        assert!(s.data(u32::MAX / 8).is_none());
        let mut broken = pools();
        broken.sym_meta_data[1] = 99;
        assert!(broken.data(0).is_none());
    }
}
