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
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::meta::{load_tombstones, parse_repositories, read_sidecar};
use super::{IndexData, SymbolData};
use crate::api::{IndexMetadata, Repository};
use crate::codec::{from_sized_deltas, u16s_from_be, u32s_from_be, u64s_from_be, unmarshal_doc_sections};
use crate::config::LoadOptions;
use crate::error::{Result, ShardError};
use crate::indexfile::{CachedIndexFile, IndexFile, MmapIndexFile};
use crate::posting::open_ngram_index;
use crate::runeoffset::RuneOffsetMap;
use crate::toc::{layout_for_version, IndexToc, SimpleSection, INDEX_FORMAT_VERSION, SUPPORTED_FORMAT_VERSIONS};

fn read_blob(file: &dyn IndexFile, sec: SimpleSection) -> Result<Vec<u8>> {
    Ok(file.read(sec.off, sec.sz)?.to_vec())
}

fn read_sized_deltas(file: &dyn IndexFile, sec: SimpleSection) -> Result<Vec<u32>> {
    from_sized_deltas(file.read(sec.off, sec.sz)?)
}

/// Read the shard and repository metadata without loading anything else.
pub fn read_metadata(file: &dyn IndexFile) -> Result<(IndexMetadata, Vec<Repository>)> {
    let toc = IndexToc::read(file)?;
    read_metadata_sections(file, &toc)
}

fn read_metadata_sections(file: &dyn IndexFile, toc: &IndexToc) -> Result<(IndexMetadata, Vec<Repository>)> {
    let blob = file.read(toc.meta_data.off, toc.meta_data.sz)?;
    let md: IndexMetadata = serde_json::from_slice(blob).map_err(|source| ShardError::Json {
        section: "index metadata",
        source,
    })?;

    let version = md.index_format_version;
    if !SUPPORTED_FORMAT_VERSIONS.contains(&version) {
        return Err(ShardError::format(
            "index metadata",
            format!("file is v{}, want v{}", version, INDEX_FORMAT_VERSION),
        ));
    }
    let want_sections = layout_for_version(version).map_or(0, |l| l.len());
    if version != toc.layout_version {
        return Err(ShardError::format(
            "toc",
            format!(
                "metadata declares v{} ({} sections), toc has v{} layout",
                version, want_sections, toc.layout_version
            ),
        ));
    }

    let blob = file.read(toc.repo_meta_data.off, toc.repo_meta_data.sz)?;
    let repos = parse_repositories("repository metadata", blob)?;
    Ok((md, repos))
}

impl IndexData {
    /// Memory-map the shard at `path` and load it.
    pub fn open(path: impl AsRef<Path>, opts: &LoadOptions) -> Result<IndexData> {
        let file = MmapIndexFile::open(path.as_ref())?;
        IndexData::load(Box::new(file), opts)
    }

    /// Load a shard from any backing store. Either every section loads and
    /// verifies, or an error is returned and the store is dropped.
    pub fn load(file: Box<dyn IndexFile>, opts: &LoadOptions) -> Result<IndexData> {
        let started = Instant::now();
        let toc = IndexToc::read(file.as_ref())?;
        let file: Arc<dyn IndexFile> = if opts.in_memory_content {
            let mut cached = CachedIndexFile::new(file);
            cached.cache(toc.file_contents.data)?;
            debug!(bytes = cached.cached_bytes(), "cached content section");
            Arc::new(cached)
        } else {
            Arc::from(file)
        };
        let d = read_index_data(file, &toc, opts)?;
        debug!(
            shard = %d.name(),
            docs = d.num_docs(),
            repos = d.repo_meta_data.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded shard"
        );
        Ok(d)
    }

    fn verify(&self) -> Result<()> {
        // Not exhaustive: postings can still point anywhere. This rules out
        // out-of-bounds access through the per-document tables.
        let n = match self.file_name_index.len() {
            0 => return Ok(()),
            len => len - 1,
        };
        let tables: [(&str, usize); 8] = [
            ("boundaries", self.boundaries.len().saturating_sub(1)),
            ("branch masks", self.file_branch_masks.len()),
            ("doc section index", self.doc_sections_index.len().saturating_sub(1)),
            ("newlines index", self.newlines_index.len().saturating_sub(1)),
            ("file end runes", self.file_end_runes.len()),
            ("name end runes", self.file_name_end_runes.len()),
            ("sub repos", self.sub_repos.len()),
            ("repos", self.repos.len()),
        ];
        for (what, got) in tables {
            if got != n {
                return Err(ShardError::format(
                    "verify",
                    format!("{} has {} entries, want {}", what, got, n),
                ));
            }
        }
        if let Some(&r) = self.repos.iter().find(|&&r| r as usize >= self.repo_meta_data.len()) {
            return Err(ShardError::format(
                "verify",
                format!("document repository {} out of range, have {}", r, self.repo_meta_data.len()),
            ));
        }
        if self.checksums.len() < n * super::CHECKSUM_SIZE {
            return Err(ShardError::format(
                "verify",
                format!("checksums has {} bytes, want {}", self.checksums.len(), n * super::CHECKSUM_SIZE),
            ));
        }
        let lang_width = if self.meta_data.index_format_version >= 16 { 2 } else { 1 };
        if self.languages.len() != n * lang_width {
            return Err(ShardError::format(
                "verify",
                format!("languages has {} bytes, want {}", self.languages.len(), n * lang_width),
            ));
        }
        let first_symbol_ok = self.file_end_symbol.is_empty() || self.file_end_symbol.len() == n + 1;
        if !first_symbol_ok {
            return Err(ShardError::format(
                "verify",
                format!("file end symbol has {} entries, want {}", self.file_end_symbol.len(), n + 1),
            ));
        }
        Ok(())
    }
}

fn read_index_data(file: Arc<dyn IndexFile>, toc: &IndexToc, opts: &LoadOptions) -> Result<IndexData> {
    let f = file.as_ref();
    let (meta_data, mut repo_meta_data) = read_metadata_sections(f, toc)?;
    let version = meta_data.index_format_version;

    if opts.read_sidecar_meta {
        if let Some(side) = read_sidecar(f.name())? {
            if side.len() != repo_meta_data.len() {
                return Err(ShardError::format(
                    "sidecar metadata",
                    format!("has {} repositories, shard has {}", side.len(), repo_meta_data.len()),
                ));
            }
            debug!(shard = %f.name(), "using sidecar repository metadata");
            repo_meta_data = side;
        }
    }
    let tombstones = load_tombstones(f.name())?;
    for repo in repo_meta_data.iter_mut() {
        if tombstones.contains(&repo.name) {
            repo.tombstone = true;
        }
    }

    let boundaries = toc.file_contents.relative_index(f)?;
    let newlines_index = toc.newlines.relative_index(f)?;
    let doc_sections_index = toc.file_sections.relative_index(f)?;

    let file_end_symbol = u32s_from_be("file end symbol", f.read(toc.file_end_symbol.off, toc.file_end_symbol.sz)?)?;
    let mut symbols = SymbolData::default();
    if version >= 16 {
        symbols.sym_index = toc.symbol_map.relative_index(f)?;
        symbols.sym_content = read_blob(f, toc.symbol_map.data)?;
        symbols.sym_kind_index = toc.symbol_kind_map.relative_index(f)?;
        symbols.sym_kind_content = read_blob(f, toc.symbol_kind_map.data)?;
        symbols.sym_meta_data = u32s_from_be(
            "symbol metadata",
            f.read(toc.symbol_meta_data.off, toc.symbol_meta_data.sz)?,
        )?;
    }

    let checksums = read_blob(f, toc.content_checksums)?;
    let languages = read_blob(f, toc.languages)?;

    let btree = version >= 16;
    let ngrams = open_ngram_index(file.clone(), toc.ngram_text, &toc.postings, btree)?;

    let file_branch_masks = u64s_from_be("branch masks", f.read(toc.branch_masks.off, toc.branch_masks.sz)?)?;

    let file_name_content = read_blob(f, toc.file_names.data)?;
    let file_name_index = toc.file_names.relative_index(f)?;
    let file_name_ngrams = open_ngram_index(file.clone(), toc.name_ngram_text, &toc.name_postings, btree)?;

    let mut branch_ids = Vec::with_capacity(repo_meta_data.len());
    let mut branch_names = Vec::with_capacity(repo_meta_data.len());
    for md in &repo_meta_data {
        let mut ids = HashMap::new();
        let mut names = BTreeMap::new();
        for (j, br) in md.branches.iter().enumerate().take(64) {
            let id = 1u64 << j;
            ids.insert(br.name.clone(), id);
            names.insert(id, br.name.clone());
        }
        branch_ids.push(ids);
        branch_names.push(names);
    }

    let rune_doc_sections = unmarshal_doc_sections(f.read(toc.rune_doc_sections.off, toc.rune_doc_sections.sz)?)?;

    let sub_repos = read_sized_deltas(f, toc.sub_repos)?;
    let rune_offsets = RuneOffsetMap::from_samples(&read_sized_deltas(f, toc.rune_offsets)?);
    let file_name_rune_offsets = RuneOffsetMap::from_samples(&read_sized_deltas(f, toc.name_rune_offsets)?);
    let file_name_end_runes = read_sized_deltas(f, toc.name_end_runes)?;
    let file_end_runes = read_sized_deltas(f, toc.file_end_runes)?;

    let repos = u16s_from_be("repos", f.read(toc.repos.off, toc.repos.sz)?)?;

    // index 0 is the root repository
    let sub_repo_paths = repo_meta_data
        .iter()
        .map(|md| {
            let mut keys: Vec<String> = std::iter::once(String::new())
                .chain(md.sub_repo_map.keys().filter(|k| !k.is_empty()).cloned())
                .collect();
            keys.sort();
            keys
        })
        .collect();

    let language_map = meta_data
        .language_map
        .iter()
        .map(|(name, &code)| (code, name.clone()))
        .collect();

    let mut d = IndexData {
        file,
        meta_data,
        repo_meta_data,
        ngrams,
        file_name_ngrams,
        newlines_start: toc.newlines.data.off,
        newlines_index,
        doc_sections_start: toc.file_sections.data.off,
        doc_sections_index,
        rune_doc_sections,
        rune_offsets,
        boundaries_start: toc.file_contents.data.off,
        boundaries,
        file_end_runes,
        file_name_content,
        file_name_index,
        file_name_rune_offsets,
        file_name_end_runes,
        file_end_symbol,
        symbols,
        file_branch_masks,
        branch_names,
        branch_ids,
        sub_repos,
        sub_repo_paths,
        checksums,
        languages,
        language_map,
        repos,
        repo_list_entries: Vec::new(),
    };
    d.verify()?;
    d.calculate_stats()?;
    Ok(d)
}
