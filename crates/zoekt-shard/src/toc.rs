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

//! Table of contents: the byte layout of every section in a shard.
//!
//! The last 8 bytes of a shard hold the TOC's own `(offset, size)`. The TOC
//! body is a `u32` section count followed by the sections in a fixed,
//! version-pinned order. Reordering the list below breaks every shard on
//! disk.

use crate::codec::{be_u32, from_sized_deltas};
use crate::error::{Result, ShardError};
use crate::indexfile::IndexFile;

/// Format written by default.
pub const INDEX_FORMAT_VERSION: u32 = 16;
/// Prior format still accepted by the loader.
pub const PRIOR_INDEX_FORMAT_VERSION: u32 = 15;
pub const SUPPORTED_FORMAT_VERSIONS: [u32; 2] = [PRIOR_INDEX_FORMAT_VERSION, INDEX_FORMAT_VERSION];
pub const FEATURE_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SimpleSection {
    pub off: u32,
    pub sz: u32,
}

impl SimpleSection {
    fn decode(b: &[u8]) -> SimpleSection {
        SimpleSection {
            off: be_u32(b, 0),
            sz: be_u32(b, 4),
        }
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.off.to_be_bytes());
        out.extend_from_slice(&self.sz.to_be_bytes());
    }
}

/// A data section plus a parallel index of per-item start offsets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompoundSection {
    pub data: SimpleSection,
    pub index: SimpleSection,
}

impl CompoundSection {
    /// Item start offsets relative to `data.off`, plus a trailing `data.sz`
    /// sentinel so item `i` spans `[idx[i], idx[i+1])`.
    pub fn relative_index(&self, file: &dyn IndexFile) -> Result<Vec<u32>> {
        if self.data.off.checked_add(self.data.sz).is_none() {
            return Err(ShardError::format(
                "compound section",
                format!("data section {}+{} overflows", self.data.off, self.data.sz),
            ));
        }
        let blob = file.read(self.index.off, self.index.sz)?;
        let mut idx = from_sized_deltas(blob)?;
        if idx.last().is_some_and(|&last| last > self.data.sz) {
            return Err(ShardError::format(
                "compound section",
                format!("index entry beyond data size {}", self.data.sz),
            ));
        }
        idx.push(self.data.sz);
        if let Some(w) = idx.windows(2).find(|w| w[0] > w[1]) {
            return Err(ShardError::format(
                "compound section",
                format!("index not sorted: {} before {}", w[0], w[1]),
            ));
        }
        Ok(idx)
    }

    /// Like [`relative_index`](Self::relative_index) but with `data.off` added.
    pub fn absolute_index(&self, file: &dyn IndexFile) -> Result<Vec<u32>> {
        let mut idx = self.relative_index(file)?;
        for v in idx.iter_mut() {
            *v += self.data.off;
        }
        Ok(idx)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SectionId {
    MetaData,
    RepoMetaData,
    FileContents,
    FileNames,
    FileSections,
    FileEndSymbol,
    SymbolMap,
    SymbolKindMap,
    SymbolMetaData,
    Newlines,
    NgramText,
    Postings,
    NameNgramText,
    NamePostings,
    BranchMasks,
    SubRepos,
    RuneOffsets,
    NameRuneOffsets,
    FileEndRunes,
    NameEndRunes,
    ContentChecksums,
    Languages,
    RuneDocSections,
    Repos,
}

impl SectionId {
    pub fn is_compound(self) -> bool {
        matches!(
            self,
            SectionId::FileContents
                | SectionId::FileNames
                | SectionId::FileSections
                | SectionId::SymbolMap
                | SectionId::SymbolKindMap
                | SectionId::Newlines
                | SectionId::Postings
                | SectionId::NamePostings
        )
    }
}

use SectionId::*;

/// Metadata must stay first so it can be read across all versions.
const LAYOUT_V16: &[SectionId] = &[
    MetaData,
    RepoMetaData,
    FileContents,
    FileNames,
    FileSections,
    FileEndSymbol,
    SymbolMap,
    SymbolKindMap,
    SymbolMetaData,
    Newlines,
    NgramText,
    Postings,
    NameNgramText,
    NamePostings,
    BranchMasks,
    SubRepos,
    RuneOffsets,
    NameRuneOffsets,
    FileEndRunes,
    NameEndRunes,
    ContentChecksums,
    Languages,
    RuneDocSections,
    Repos,
];

/// v15 predates symbol kinds and metadata.
const LAYOUT_V15: &[SectionId] = &[
    MetaData,
    RepoMetaData,
    FileContents,
    FileNames,
    FileSections,
    FileEndSymbol,
    SymbolMap,
    Newlines,
    NgramText,
    Postings,
    NameNgramText,
    NamePostings,
    BranchMasks,
    SubRepos,
    RuneOffsets,
    NameRuneOffsets,
    FileEndRunes,
    NameEndRunes,
    ContentChecksums,
    Languages,
    RuneDocSections,
    Repos,
];

/// Section order for a format version.
pub fn layout_for_version(version: u32) -> Option<&'static [SectionId]> {
    match version {
        16 => Some(LAYOUT_V16),
        15 => Some(LAYOUT_V15),
        _ => None,
    }
}

fn layout_for_count(count: u32) -> Option<(u32, &'static [SectionId])> {
    [16u32, 15]
        .into_iter()
        .filter_map(|v| layout_for_version(v).map(|l| (v, l)))
        .find(|(_, l)| l.len() as u32 == count)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexToc {
    /// Format version implied by the section count.
    pub layout_version: u32,

    pub meta_data: SimpleSection,
    pub repo_meta_data: SimpleSection,
    pub file_contents: CompoundSection,
    pub file_names: CompoundSection,
    pub file_sections: CompoundSection,
    pub file_end_symbol: SimpleSection,
    pub symbol_map: CompoundSection,
    pub symbol_kind_map: CompoundSection,
    pub symbol_meta_data: SimpleSection,
    pub newlines: CompoundSection,
    pub ngram_text: SimpleSection,
    pub postings: CompoundSection,
    pub name_ngram_text: SimpleSection,
    pub name_postings: CompoundSection,
    pub branch_masks: SimpleSection,
    pub sub_repos: SimpleSection,
    pub rune_offsets: SimpleSection,
    pub name_rune_offsets: SimpleSection,
    pub file_end_runes: SimpleSection,
    pub name_end_runes: SimpleSection,
    pub content_checksums: SimpleSection,
    pub languages: SimpleSection,
    pub rune_doc_sections: SimpleSection,
    pub repos: SimpleSection,
}

impl IndexToc {
    fn simple_mut(&mut self, id: SectionId) -> Option<&mut SimpleSection> {
        Some(match id {
            MetaData => &mut self.meta_data,
            RepoMetaData => &mut self.repo_meta_data,
            FileEndSymbol => &mut self.file_end_symbol,
            SymbolMetaData => &mut self.symbol_meta_data,
            NgramText => &mut self.ngram_text,
            NameNgramText => &mut self.name_ngram_text,
            BranchMasks => &mut self.branch_masks,
            SubRepos => &mut self.sub_repos,
            RuneOffsets => &mut self.rune_offsets,
            NameRuneOffsets => &mut self.name_rune_offsets,
            FileEndRunes => &mut self.file_end_runes,
            NameEndRunes => &mut self.name_end_runes,
            ContentChecksums => &mut self.content_checksums,
            Languages => &mut self.languages,
            RuneDocSections => &mut self.rune_doc_sections,
            Repos => &mut self.repos,
            _ => return None,
        })
    }

    fn compound_mut(&mut self, id: SectionId) -> Option<&mut CompoundSection> {
        Some(match id {
            FileContents => &mut self.file_contents,
            FileNames => &mut self.file_names,
            FileSections => &mut self.file_sections,
            SymbolMap => &mut self.symbol_map,
            SymbolKindMap => &mut self.symbol_kind_map,
            Newlines => &mut self.newlines,
            Postings => &mut self.postings,
            NamePostings => &mut self.name_postings,
            _ => return None,
        })
    }

    pub fn set_simple(&mut self, id: SectionId, sec: SimpleSection) {
        if let Some(s) = self.simple_mut(id) {
            *s = sec;
        }
    }

    pub fn set_compound(&mut self, id: SectionId, sec: CompoundSection) {
        if let Some(s) = self.compound_mut(id) {
            *s = sec;
        }
    }

    /// Locate and decode the TOC from the file trailer.
    pub fn read(file: &dyn IndexFile) -> Result<IndexToc> {
        let size = file.size()?;
        if size < 8 {
            return Err(ShardError::format(
                "toc",
                format!("file too small: {} bytes", size),
            ));
        }
        let toc_sec = SimpleSection::decode(file.read(size - 8, 8)?);
        let body = file.read(toc_sec.off, toc_sec.sz)?;
        if body.len() < 4 {
            return Err(ShardError::format("toc", "missing section count"));
        }
        let count = be_u32(body, 0);
        let Some((version, layout)) = layout_for_count(count) else {
            return Err(ShardError::format(
                "toc",
                format!(
                    "section count mismatch: got {} want {}",
                    count,
                    LAYOUT_V16.len()
                ),
            ));
        };

        let mut toc = IndexToc {
            layout_version: version,
            ..Default::default()
        };
        let mut off = 4usize;
        for &id in layout {
            let width = if id.is_compound() { 16 } else { 8 };
            if off + width > body.len() {
                return Err(ShardError::format(
                    "toc",
                    format!("truncated while reading section {:?}", id),
                ));
            }
            if id.is_compound() {
                let sec = CompoundSection {
                    data: SimpleSection::decode(&body[off..]),
                    index: SimpleSection::decode(&body[off + 8..]),
                };
                toc.set_compound(id, sec);
            } else {
                toc.set_simple(id, SimpleSection::decode(&body[off..]));
            }
            off += width;
        }
        Ok(toc)
    }

    /// Encode the TOC body for `layout`: count, then each section.
    pub fn encode(&self, layout: &[SectionId]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + layout.len() * 16);
        out.extend_from_slice(&(layout.len() as u32).to_be_bytes());
        let mut toc = self.clone();
        for &id in layout {
            if id.is_compound() {
                if let Some(s) = toc.compound_mut(id) {
                    s.data.encode(&mut out);
                    s.index.encode(&mut out);
                }
            } else if let Some(s) = toc.simple_mut(id) {
                s.encode(&mut out);
            }
        }
        out
    }
}
