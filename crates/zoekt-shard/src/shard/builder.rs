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

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use crc::{Crc, CRC_64_GO_ISO};
use tracing::debug;

use crate::api::{Document, DocumentSection, IndexMetadata, Repository, Symbol};
use crate::codec::{marshal_doc_sections, to_sized_deltas, write_uvarint};
use crate::error::{Result, ShardError};
use crate::ngram::{runes, Ngram};
use crate::runeoffset::RUNE_OFFSET_FREQUENCY;
use crate::toc::{
    layout_for_version, CompoundSection, IndexToc, SectionId, SimpleSection, FEATURE_VERSION,
    INDEX_FORMAT_VERSION,
};

const CHECKSUM: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// Replaces the content of documents that are not indexed.
const NOT_INDEXED_MARKER: &str = "NOT-INDEXED: ";

const MAX_BRANCHES: usize = 64;

/// Accumulates trigram postings for one corpus (contents or file names).
/// Offsets are rune counts from the start of the corpus.
#[derive(Default)]
struct PostingsBuilder {
    postings: HashMap<Ngram, Vec<u8>>,
    last_offsets: HashMap<Ngram, u32>,
    /// Byte offset of every `RUNE_OFFSET_FREQUENCY`th rune.
    rune_offsets: Vec<u32>,
    rune_count: u32,
    non_ascii: bool,
    end_runes: Vec<u32>,
    end_byte: u32,
    data: Vec<u8>,
    starts: Vec<u32>,
}

impl PostingsBuilder {
    /// Index `data` as the next document. `byte_sections` must be sorted,
    /// disjoint and fall on rune boundaries; they are returned converted to
    /// corpus rune offsets.
    fn add(&mut self, data: &[u8], byte_sections: &[DocumentSection]) -> Result<Vec<DocumentSection>> {
        let mut boundaries: Vec<u32> = byte_sections.iter().flat_map(|s| [s.start, s.end]).collect();
        if !boundaries.is_empty() {
            let rune_starts: Vec<u32> = runes(data).map(|(at, _, _)| at as u32).collect();
            let byte_count = data.len() as u32;
            if let Some(&b) = boundaries
                .iter()
                .find(|&&b| b != byte_count && rune_starts.binary_search(&b).is_err())
            {
                return Err(ShardError::Build(format!("no rune for section boundary at byte {}", b)));
            }
        }
        boundaries.reverse();
        let mut rune_boundaries = Vec::with_capacity(boundaries.len());

        let end_rune = self.rune_count;
        let mut gram = ['\0'; 3];
        let mut rune_index = 0u32;
        for (at, c, sz) in runes(data) {
            if sz > 1 {
                self.non_ascii = true;
            }
            gram = [gram[1], gram[2], c];

            if (self.rune_count + rune_index) % RUNE_OFFSET_FREQUENCY == 0 {
                self.rune_offsets.push(self.end_byte + at as u32);
            }
            while boundaries.last() == Some(&(at as u32)) {
                rune_boundaries.push(end_rune + rune_index);
                boundaries.pop();
            }

            if rune_index >= 2 {
                let ng = Ngram::from_runes(gram);
                let off = end_rune + rune_index - 2;
                let last = self.last_offsets.insert(ng, off).unwrap_or(0);
                write_uvarint(self.postings.entry(ng).or_default(), (off - last) as u64);
            }
            rune_index += 1;
        }
        self.rune_count += rune_index;

        let byte_count = data.len() as u32;
        // sections may end exactly at the end of the content
        while boundaries.last() == Some(&byte_count) {
            rune_boundaries.push(end_rune + rune_index);
            boundaries.pop();
        }

        self.end_runes.push(self.rune_count);
        self.starts.push(self.end_byte);
        self.end_byte += byte_count;
        self.data.extend_from_slice(data);
        Ok(rune_boundaries
            .chunks_exact(2)
            .map(|p| DocumentSection {
                start: p[0],
                end: p[1],
            })
            .collect())
    }

    /// Ngram text and postings in ngram order.
    fn sorted(&self) -> (Vec<u8>, Vec<&[u8]>) {
        let mut keys: Vec<&Ngram> = self.postings.keys().collect();
        keys.sort();
        let mut text = Vec::with_capacity(keys.len() * 8);
        let mut lists = Vec::with_capacity(keys.len());
        for k in keys {
            text.extend_from_slice(&k.to_be_bytes());
            lists.push(self.postings[k].as_slice());
        }
        (text, lists)
    }
}

/// Interns strings in order of first appearance.
#[derive(Default)]
struct StringPool {
    ids: HashMap<String, u32>,
    values: Vec<String>,
}

impl StringPool {
    fn id(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = self.values.len() as u32;
        self.ids.insert(s.to_string(), id);
        self.values.push(s.to_string());
        id
    }

    fn entries(&self) -> Vec<&[u8]> {
        self.values.iter().map(|s| s.as_bytes()).collect()
    }
}

/// Tracks the output offset while sections are written in TOC order.
struct SectionWriter<W: Write> {
    w: W,
    off: u64,
}

impl<W: Write> SectionWriter<W> {
    fn offset(&self) -> Result<u32> {
        u32::try_from(self.off).map_err(|_| ShardError::Build("shard exceeds 4GiB".into()))
    }

    fn bytes(&mut self, b: &[u8]) -> Result<()> {
        self.w.write_all(b)?;
        self.off += b.len() as u64;
        Ok(())
    }

    fn simple(&mut self, b: &[u8]) -> Result<SimpleSection> {
        let off = self.offset()?;
        self.bytes(b)?;
        Ok(SimpleSection {
            off,
            sz: self.offset()? - off,
        })
    }

    /// Concatenated `items`, followed by the sized-delta index of their
    /// starts.
    fn compound(&mut self, items: &[&[u8]]) -> Result<CompoundSection> {
        let off = self.offset()?;
        let mut starts = Vec::with_capacity(items.len());
        for item in items {
            starts.push(self.offset()? - off);
            self.bytes(item)?;
        }
        let data = SimpleSection {
            off,
            sz: self.offset()? - off,
        };
        let index = self.simple(&to_sized_deltas(&starts))?;
        Ok(CompoundSection { data, index })
    }

    fn compound_from(&mut self, data: &[u8], starts: &[u32]) -> Result<CompoundSection> {
        let data = self.simple(data)?;
        let index = self.simple(&to_sized_deltas(starts))?;
        Ok(CompoundSection { data, index })
    }
}

fn to_json<T: serde::Serialize>(section: &'static str, v: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(v).map_err(|source| ShardError::Json { section, source })
}

fn u32s_be(v: &[u32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_be_bytes()).collect()
}

fn newline_offsets(data: &[u8]) -> Vec<u32> {
    data.iter()
        .enumerate()
        .filter(|(_, &b)| b == b'\n')
        .map(|(i, _)| i as u32)
        .collect()
}

/// Builds a single shard in memory and serializes it.
pub struct ShardBuilder {
    index_format_version: u32,
    index_time: Option<DateTime<Utc>>,
    id: String,

    content: PostingsBuilder,
    names: PostingsBuilder,
    newlines: Vec<Vec<u8>>,
    doc_sections: Vec<Vec<u8>>,
    rune_doc_sections: Vec<DocumentSection>,

    symbols: StringPool,
    symbol_kinds: StringPool,
    sym_meta_data: Vec<u32>,
    file_end_symbol: Vec<u32>,

    checksums: Vec<u8>,
    branch_masks: Vec<u64>,
    sub_repos: Vec<u32>,
    repos: Vec<u16>,

    repo_list: Vec<Repository>,
    sub_repo_indices: Vec<HashMap<String, u32>>,

    language_map: BTreeMap<String, u16>,
    languages: Vec<u16>,
}

impl Default for ShardBuilder {
    fn default() -> Self {
        ShardBuilder {
            index_format_version: INDEX_FORMAT_VERSION,
            index_time: None,
            id: String::new(),
            content: PostingsBuilder::default(),
            names: PostingsBuilder::default(),
            newlines: Vec::new(),
            doc_sections: Vec::new(),
            rune_doc_sections: Vec::new(),
            symbols: StringPool::default(),
            symbol_kinds: StringPool::default(),
            sym_meta_data: Vec::new(),
            file_end_symbol: vec![0],
            checksums: Vec::new(),
            branch_masks: Vec::new(),
            sub_repos: Vec::new(),
            repos: Vec::new(),
            repo_list: Vec::new(),
            sub_repo_indices: Vec::new(),
            language_map: BTreeMap::new(),
            languages: Vec::new(),
        }
    }
}

fn sub_repo_indices(repo: &Repository) -> HashMap<String, u32> {
    let mut paths: Vec<&str> = std::iter::once("")
        .chain(repo.sub_repo_map.keys().map(String::as_str).filter(|k| !k.is_empty()))
        .collect();
    paths.sort_unstable();
    paths
        .into_iter()
        .enumerate()
        .map(|(i, p)| (p.to_string(), i as u32))
        .collect()
}

impl ShardBuilder {
    /// A builder writing `format_version` (15 or 16).
    pub fn new(format_version: u32) -> Result<Self> {
        if layout_for_version(format_version).is_none() {
            return Err(ShardError::Build(format!("unsupported format version {}", format_version)));
        }
        Ok(ShardBuilder {
            index_format_version: format_version,
            ..Default::default()
        })
    }

    pub fn set_index_time(&mut self, t: DateTime<Utc>) {
        self.index_time = Some(t);
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// Set the repository of a single-repository shard. Must be called
    /// before any document is added.
    pub fn set_repository(&mut self, repo: Repository) -> Result<()> {
        if !self.repos.is_empty() {
            return Err(ShardError::Build("set_repository after documents were added".into()));
        }
        self.repo_list.clear();
        self.sub_repo_indices.clear();
        self.add_repository(repo)
    }

    /// Start a new repository; documents added afterwards belong to it.
    pub fn add_repository(&mut self, mut repo: Repository) -> Result<()> {
        if repo.branches.len() > MAX_BRANCHES {
            return Err(ShardError::Build("too many branches".into()));
        }
        if self.repo_list.len() > u16::MAX as usize {
            return Err(ShardError::Build(format!("too many repos in shard: max is {}", u16::MAX)));
        }
        repo.sub_repo_map.remove("");
        self.sub_repo_indices.push(sub_repo_indices(&repo));
        self.repo_list.push(repo);
        Ok(())
    }

    pub fn num_files(&self) -> usize {
        self.repos.len()
    }

    /// Content and file name bytes ingested so far.
    pub fn content_size(&self) -> u32 {
        self.content.end_byte + self.names.end_byte
    }

    pub fn add_file(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Result<()> {
        self.add(Document::new(name, content))
    }

    fn branch_mask(&self, name: &str) -> u64 {
        self.repo_list
            .last()
            .and_then(|r| r.branches.iter().position(|b| b.name == name))
            .map_or(0, |i| 1u64 << i)
    }

    /// Add a document to the current repository.
    pub fn add(&mut self, mut doc: Document) -> Result<()> {
        if self.repo_list.is_empty() {
            self.add_repository(Repository::default())?;
        }

        if doc.content.contains(&0) {
            doc.content = format!("{}binary", NOT_INDEXED_MARKER).into_bytes();
            doc.symbols.clear();
            doc.symbols_meta_data.clear();
        }

        if !doc.symbols_meta_data.is_empty() && doc.symbols_meta_data.len() != doc.symbols.len() {
            return Err(ShardError::Build(format!(
                "{}: {} symbol sections but {} metadata entries",
                doc.name,
                doc.symbols.len(),
                doc.symbols_meta_data.len()
            )));
        }
        doc.symbols_meta_data.resize(doc.symbols.len(), Symbol::default());
        let mut paired: Vec<(DocumentSection, Symbol)> = doc
            .symbols
            .drain(..)
            .zip(doc.symbols_meta_data.drain(..))
            .collect();
        paired.sort_by_key(|(s, _)| s.start);
        for w in paired.windows(2) {
            if w[0].0.end > w[1].0.start {
                return Err(ShardError::Build("sections overlap".into()));
            }
        }
        if paired.iter().any(|(s, _)| s.start > s.end) {
            return Err(ShardError::Build("section ends before it starts".into()));
        }
        if paired.last().is_some_and(|(s, _)| s.end as usize > doc.content.len()) {
            return Err(ShardError::Build("section goes past end of content".into()));
        }
        let (sections, metas): (Vec<DocumentSection>, Vec<Symbol>) = paired.into_iter().unzip();

        if !doc.sub_repository_path.is_empty() {
            let under = doc
                .name
                .strip_prefix(doc.sub_repository_path.as_str())
                .is_some_and(|rest| rest.starts_with('/') || doc.sub_repository_path.ends_with('/'));
            if !under {
                return Err(ShardError::Build(format!(
                    "path {:?} must start subrepo path {:?}",
                    doc.name, doc.sub_repository_path
                )));
            }
        }
        let repo_idx = self.repo_list.len() - 1;
        let Some(&sub_repo_idx) = self.sub_repo_indices[repo_idx].get(&doc.sub_repository_path) else {
            return Err(ShardError::Build(format!("unknown subrepo path {:?}", doc.sub_repository_path)));
        };

        let mut mask = 0u64;
        for br in &doc.branches {
            let m = self.branch_mask(br);
            if m == 0 {
                return Err(ShardError::Build(format!("no branch found for {}", br)));
            }
            mask |= m;
        }

        let lang_code = match self.language_map.get(&doc.language) {
            Some(&c) => c,
            None => {
                let limit = if self.index_format_version >= 16 { u16::MAX as usize } else { u8::MAX as usize + 1 };
                if self.language_map.len() >= limit {
                    return Err(ShardError::Build("too many languages".into()));
                }
                self.language_map.len() as u16
            }
        };

        let rune_secs = self.content.add(&doc.content, &sections)?;
        self.names.add(doc.name.as_bytes(), &[])?;
        self.language_map.entry(doc.language.clone()).or_insert(lang_code);

        for m in &metas {
            self.sym_meta_data.extend_from_slice(&[
                0,
                self.symbol_kinds.id(&m.kind),
                self.symbols.id(&m.parent),
                self.symbol_kinds.id(&m.parent_kind),
            ]);
        }
        self.rune_doc_sections.extend(rune_secs);
        self.file_end_symbol.push(self.rune_doc_sections.len() as u32);

        self.newlines.push(to_sized_deltas(&newline_offsets(&doc.content)));
        self.doc_sections.push(marshal_doc_sections(&sections));
        self.checksums
            .extend_from_slice(&CHECKSUM.checksum(&doc.content).to_be_bytes());
        self.branch_masks.push(mask);
        self.sub_repos.push(sub_repo_idx);
        self.repos.push(repo_idx as u16);
        self.languages.push(lang_code);
        Ok(())
    }

    fn metadata(&self) -> IndexMetadata {
        let index_time = self.index_time.unwrap_or_else(Utc::now);
        let id = if self.id.is_empty() {
            index_time.format("%Y%m%d%H%M%S%6f").to_string()
        } else {
            self.id.clone()
        };
        IndexMetadata {
            index_format_version: self.index_format_version,
            index_feature_version: FEATURE_VERSION,
            index_min_reader_version: self.index_format_version,
            index_time,
            plain_ascii: !self.content.non_ascii && !self.names.non_ascii,
            language_map: self.language_map.clone(),
            zoekt_version: env!("CARGO_PKG_VERSION").to_string(),
            id,
        }
    }

    fn language_bytes(&self) -> Vec<u8> {
        if self.index_format_version >= 16 {
            self.languages.iter().flat_map(|c| c.to_le_bytes()).collect()
        } else {
            self.languages.iter().map(|&c| c as u8).collect()
        }
    }

    /// Serialize the shard. Sections are written in TOC order, followed by
    /// the TOC and the trailer pointing at it.
    pub fn write<W: Write>(&self, w: W) -> Result<()> {
        let started = Instant::now();
        let layout = layout_for_version(self.index_format_version).ok_or_else(|| {
            ShardError::Build(format!("unsupported format version {}", self.index_format_version))
        })?;
        let mut repos = self.repo_list.clone();
        if repos.is_empty() {
            repos.push(Repository::default());
        }

        let mut out = SectionWriter { w, off: 0 };
        let mut toc = IndexToc::default();
        for &id in layout {
            match id {
                SectionId::MetaData => {
                    let b = to_json("index metadata", &self.metadata())?;
                    toc.set_simple(id, out.simple(&b)?);
                }
                SectionId::RepoMetaData => {
                    let b = to_json("repository metadata", &repos)?;
                    toc.set_simple(id, out.simple(&b)?);
                }
                SectionId::FileContents => {
                    let sec = out.compound_from(&self.content.data, &self.content.starts)?;
                    toc.set_compound(id, sec);
                }
                SectionId::FileNames => {
                    let sec = out.compound_from(&self.names.data, &self.names.starts)?;
                    toc.set_compound(id, sec);
                }
                SectionId::FileSections => {
                    let items: Vec<&[u8]> = self.doc_sections.iter().map(Vec::as_slice).collect();
                    toc.set_compound(id, out.compound(&items)?);
                }
                SectionId::FileEndSymbol => {
                    toc.set_simple(id, out.simple(&u32s_be(&self.file_end_symbol))?);
                }
                SectionId::SymbolMap => {
                    toc.set_compound(id, out.compound(&self.symbols.entries())?);
                }
                SectionId::SymbolKindMap => {
                    toc.set_compound(id, out.compound(&self.symbol_kinds.entries())?);
                }
                SectionId::SymbolMetaData => {
                    toc.set_simple(id, out.simple(&u32s_be(&self.sym_meta_data))?);
                }
                SectionId::Newlines => {
                    let items: Vec<&[u8]> = self.newlines.iter().map(Vec::as_slice).collect();
                    toc.set_compound(id, out.compound(&items)?);
                }
                SectionId::NgramText => {
                    toc.set_simple(id, out.simple(&self.content.sorted().0)?);
                }
                SectionId::Postings => {
                    toc.set_compound(id, out.compound(&self.content.sorted().1)?);
                }
                SectionId::NameNgramText => {
                    toc.set_simple(id, out.simple(&self.names.sorted().0)?);
                }
                SectionId::NamePostings => {
                    toc.set_compound(id, out.compound(&self.names.sorted().1)?);
                }
                SectionId::BranchMasks => {
                    let b: Vec<u8> = self.branch_masks.iter().flat_map(|m| m.to_be_bytes()).collect();
                    toc.set_simple(id, out.simple(&b)?);
                }
                SectionId::SubRepos => {
                    toc.set_simple(id, out.simple(&to_sized_deltas(&self.sub_repos))?);
                }
                SectionId::RuneOffsets => {
                    toc.set_simple(id, out.simple(&to_sized_deltas(&self.content.rune_offsets))?);
                }
                SectionId::NameRuneOffsets => {
                    toc.set_simple(id, out.simple(&to_sized_deltas(&self.names.rune_offsets))?);
                }
                SectionId::FileEndRunes => {
                    toc.set_simple(id, out.simple(&to_sized_deltas(&self.content.end_runes))?);
                }
                SectionId::NameEndRunes => {
                    toc.set_simple(id, out.simple(&to_sized_deltas(&self.names.end_runes))?);
                }
                SectionId::ContentChecksums => {
                    toc.set_simple(id, out.simple(&self.checksums)?);
                }
                SectionId::Languages => {
                    toc.set_simple(id, out.simple(&self.language_bytes())?);
                }
                SectionId::RuneDocSections => {
                    toc.set_simple(id, out.simple(&marshal_doc_sections(&self.rune_doc_sections))?);
                }
                SectionId::Repos => {
                    let b: Vec<u8> = self.repos.iter().flat_map(|r| r.to_be_bytes()).collect();
                    toc.set_simple(id, out.simple(&b)?);
                }
            }
        }

        let toc_sec = out.simple(&toc.encode(layout))?;
        let mut trailer = Vec::with_capacity(8);
        toc_sec.encode(&mut trailer);
        out.bytes(&trailer)?;
        out.w.flush()?;
        debug!(
            docs = self.num_files(),
            bytes = out.off,
            version = self.index_format_version,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "wrote shard"
        );
        Ok(())
    }

    /// Serialize into a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write(&mut buf)?;
        Ok(buf)
    }

    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let f = File::create(path.as_ref())?;
        self.write(BufWriter::new(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::from_deltas;

    #[test]
    fn postings_use_corpus_rune_offsets() {
        let mut pb = PostingsBuilder::default();
        pb.add(b"abcd", &[]).unwrap();
        pb.add("xé_abc".as_bytes(), &[]).unwrap();
        let abc = from_deltas(&pb.postings[&Ngram::from("abc")]).unwrap();
        // second document starts at rune 4, "abc" at rune 3 within it
        assert_eq!(abc, vec![0, 7]);
        assert_eq!(pb.end_runes, vec![4, 10]);
        assert_eq!(pb.starts, vec![0, 4]);
        assert!(pb.non_ascii);
    }

    #[test]
    fn rune_sections_and_boundaries() {
        let mut pb = PostingsBuilder::default();
        pb.add(b"xx", &[]).unwrap();
        let content = "aé bc".as_bytes();
        let secs = pb
            .add(content, &[DocumentSection { start: 0, end: 3 }, DocumentSection { start: 4, end: 6 }])
            .unwrap();
        assert_eq!(
            secs,
            vec![DocumentSection { start: 2, end: 4 }, DocumentSection { start: 5, end: 7 }]
        );
        // byte 2 is inside 'é'
        let err = pb.add(content, &[DocumentSection { start: 2, end: 3 }]).unwrap_err();
        assert!(err.to_string().contains("no rune for section boundary"));
    }

    #[test]
    fn rune_offsets_sampled_every_hundred_runes() {
        let mut pb = PostingsBuilder::default();
        let mut s = "é".repeat(150);
        s.push_str(&"a".repeat(100));
        pb.add(s.as_bytes(), &[]).unwrap();
        assert_eq!(pb.rune_offsets, vec![0, 200, 350]);
    }

    #[test]
    fn add_rejects_bad_documents() {
        let mut b = ShardBuilder::default();
        b.set_repository(Repository {
            name: "r".into(),
            branches: vec![crate::api::RepositoryBranch {
                name: "main".into(),
                version: "v1".into(),
            }],
            ..Default::default()
        })
        .unwrap();

        let overlapping = Document {
            symbols: vec![DocumentSection { start: 0, end: 4 }, DocumentSection { start: 2, end: 5 }],
            ..Document::new("a.go", "func main")
        };
        assert!(b.add(overlapping).unwrap_err().to_string().contains("sections overlap"));

        let past_end = Document {
            symbols: vec![DocumentSection { start: 0, end: 40 }],
            ..Document::new("a.go", "func")
        };
        assert!(b.add(past_end).unwrap_err().to_string().contains("past end"));

        let bad_branch = Document::new("a.go", "x").with_branches(["dev"]);
        assert!(b.add(bad_branch).unwrap_err().to_string().contains("no branch found for dev"));

        let bad_sub = Document {
            sub_repository_path: "vendor/x".into(),
            ..Document::new("a.go", "x")
        };
        assert!(b.add(bad_sub).is_err());
        assert_eq!(b.num_files(), 0);

        b.add(Document::new("ok.go", "fine").with_branches(["main"])).unwrap();
        assert_eq!(b.num_files(), 1);
        assert!(b.set_repository(Repository::default()).is_err());
    }

    #[test]
    fn too_many_branches() {
        let mut b = ShardBuilder::default();
        let branches = (0..65)
            .map(|i| crate::api::RepositoryBranch {
                name: format!("b{}", i),
                version: String::new(),
            })
            .collect();
        let err = b
            .set_repository(Repository {
                branches,
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("too many branches"));
    }

    #[test]
    fn binary_content_is_replaced() {
        let mut b = ShardBuilder::default();
        b.add(Document {
            symbols: vec![DocumentSection { start: 0, end: 1 }],
            ..Document::new("bin", vec![b'a', 0, b'b'])
        })
        .unwrap();
        assert_eq!(b.content.data, b"NOT-INDEXED: binary");
        assert!(b.rune_doc_sections.is_empty());
        assert_eq!(b.file_end_symbol, vec![0, 0]);
    }
}
