//! Public data model: shard metadata, repositories, symbols and search
//! results. Metadata types serialize with the PascalCase field names used in
//! the shard's JSON sections.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, ShardError};

/// Shard-level metadata, stored as JSON in the first TOC section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IndexMetadata {
    pub index_format_version: u32,
    pub index_feature_version: u32,
    pub index_min_reader_version: u32,
    pub index_time: DateTime<Utc>,
    #[serde(rename = "PlainASCII")]
    pub plain_ascii: bool,
    pub language_map: BTreeMap<String, u16>,
    pub zoekt_version: String,
    #[serde(rename = "ID")]
    pub id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepositoryBranch {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Repository {
    #[serde(rename = "ID")]
    pub id: u32,
    pub name: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub source: String,
    pub branches: Vec<RepositoryBranch>,
    pub sub_repo_map: BTreeMap<String, Repository>,
    #[serde(rename = "CommitURLTemplate")]
    pub commit_url_template: String,
    #[serde(rename = "FileURLTemplate")]
    pub file_url_template: String,
    pub line_fragment_template: String,
    pub raw_config: BTreeMap<String, String>,
    pub rank: u16,
    pub index_options: String,
    pub has_symbols: bool,
    pub tombstone: bool,
    pub latest_commit_date: DateTime<Utc>,
    #[serde(
        skip_serializing_if = "BTreeSet::is_empty",
        serialize_with = "ser_name_set"
    )]
    pub file_tombstones: BTreeSet<String>,
}

fn ser_name_set<S: serde::Serializer>(
    set: &BTreeSet<String>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    // a JSON object with empty values, the set encoding other producers use
    use serde::ser::SerializeMap;
    let mut m = s.serialize_map(Some(set.len()))?;
    for k in set {
        m.serialize_entry(k, &serde_json::Map::new())?;
    }
    m.end()
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct RawRepository {
    #[serde(rename = "ID")]
    id: u32,
    name: String,
    #[serde(rename = "URL")]
    url: String,
    source: String,
    branches: Option<Vec<RepositoryBranch>>,
    sub_repo_map: Option<BTreeMap<String, Repository>>,
    #[serde(rename = "CommitURLTemplate")]
    commit_url_template: String,
    #[serde(rename = "FileURLTemplate")]
    file_url_template: String,
    line_fragment_template: String,
    raw_config: Option<BTreeMap<String, String>>,
    rank: u16,
    index_options: String,
    has_symbols: bool,
    tombstone: bool,
    latest_commit_date: Option<DateTime<Utc>>,
    file_tombstones: Option<BTreeMap<String, serde_json::Value>>,
}

impl<'de> Deserialize<'de> for Repository {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = RawRepository::deserialize(d)?;
        let raw_config = raw.raw_config.unwrap_or_default();
        let mut repo = Repository {
            id: raw.id,
            name: raw.name,
            url: raw.url,
            source: raw.source,
            branches: raw.branches.unwrap_or_default(),
            sub_repo_map: raw.sub_repo_map.unwrap_or_default(),
            commit_url_template: raw.commit_url_template,
            file_url_template: raw.file_url_template,
            line_fragment_template: raw.line_fragment_template,
            raw_config,
            rank: raw.rank,
            index_options: raw.index_options,
            has_symbols: raw.has_symbols,
            tombstone: raw.tombstone,
            latest_commit_date: raw.latest_commit_date.unwrap_or_default(),
            file_tombstones: raw
                .file_tombstones
                .map(|m| m.into_keys().collect())
                .unwrap_or_default(),
        };
        if let Some(v) = repo.raw_config.get("repoid") {
            repo.id = v.parse::<u32>().unwrap_or(0);
        }
        if repo.rank == 0 {
            if let Some(p) = repo.raw_config.get("priority") {
                let priority = p.parse::<f64>().unwrap_or(0.0);
                if priority > 0.0 {
                    let l = priority.ln();
                    repo.rank = ((1.0 - 1.0 / (1.0 + l).powf(0.6)) * 10000.0) as u16;
                }
            }
        }
        Ok(repo)
    }
}

impl Repository {
    /// Merge the mutable fields of `x` into `self`. Returns whether anything
    /// changed. Identity fields (id, name, branches) must agree.
    pub fn merge_mutable(&mut self, x: &Repository) -> Result<bool> {
        if self.id != x.id {
            return Err(ShardError::format("merge", "ID is immutable"));
        }
        if self.name != x.name {
            return Err(ShardError::format("merge", "Name is immutable"));
        }
        if self.branches != x.branches {
            return Err(ShardError::format("merge", "Branches is immutable"));
        }
        let mut mutated = false;
        for (k, v) in &x.raw_config {
            if k == "name" || k == "id" {
                continue;
            }
            if self.raw_config.get(k) != Some(v) {
                self.raw_config.insert(k.clone(), v.clone());
                mutated = true;
            }
        }
        if self.tombstone != x.tombstone {
            self.tombstone = x.tombstone;
            mutated = true;
        }
        if self.rank != x.rank {
            self.rank = x.rank;
            mutated = true;
        }
        if self.file_tombstones != x.file_tombstones {
            self.file_tombstones = x.file_tombstones.clone();
            mutated = true;
        }
        if self.latest_commit_date != x.latest_commit_date {
            self.latest_commit_date = x.latest_commit_date;
            mutated = true;
        }
        Ok(mutated)
    }
}

/// Aggregate statistics for a repository or a collection of them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepoStats {
    pub repos: usize,
    pub shards: usize,
    pub documents: usize,
    pub index_bytes: i64,
    pub content_bytes: i64,
    pub new_lines_count: u64,
    pub default_branch_new_lines_count: u64,
    pub other_branches_new_lines_count: u64,
}

impl RepoStats {
    pub fn add(&mut self, o: &RepoStats) {
        self.repos += o.repos;
        self.shards += o.shards;
        self.documents += o.documents;
        self.index_bytes += o.index_bytes;
        self.content_bytes += o.content_bytes;
        self.new_lines_count += o.new_lines_count;
        self.default_branch_new_lines_count += o.default_branch_new_lines_count;
        self.other_branches_new_lines_count += o.other_branches_new_lines_count;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RepoListEntry {
    pub repository: Repository,
    pub stats: RepoStats,
}

/// Half-open `[start, end)` range within a document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct DocumentSection {
    pub start: u32,
    pub end: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub sym: String,
    pub kind: String,
    pub parent: String,
    pub parent_kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LineFragmentMatch {
    /// Byte offset of the match within the document.
    pub offset: u32,
    /// Byte offset of the match within the line.
    pub line_offset: usize,
    pub match_length: usize,
    pub symbol_info: Option<Symbol>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LineMatch {
    pub line: Vec<u8>,
    pub line_start: usize,
    pub line_end: usize,
    pub line_number: usize,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
    /// The match is on the file name rather than the content.
    pub file_name: bool,
    pub line_fragments: Vec<LineFragmentMatch>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FileMatch {
    pub repository: String,
    pub repository_id: u32,
    pub file_name: String,
    pub sub_repository_name: String,
    pub sub_repository_path: String,
    pub version: String,
    pub branches: Vec<String>,
    pub language: String,
    pub checksum: Vec<u8>,
    pub content: Option<Vec<u8>>,
    pub line_matches: Vec<LineMatch>,
    pub score: f64,
}

/// Counters accumulated while searching.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub content_bytes_loaded: i64,
    pub index_bytes_loaded: i64,
    pub crashes: usize,
    pub file_count: usize,
    pub files_considered: usize,
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub shards_scanned: usize,
    pub shards_skipped: usize,
    pub shards_skipped_filter: usize,
    pub match_count: usize,
    pub ngram_matches: usize,
    pub ngram_lookups: usize,
    pub regexps_considered: usize,
}

impl Stats {
    pub fn add(&mut self, o: &Stats) {
        self.content_bytes_loaded += o.content_bytes_loaded;
        self.index_bytes_loaded += o.index_bytes_loaded;
        self.crashes += o.crashes;
        self.file_count += o.file_count;
        self.files_considered += o.files_considered;
        self.files_loaded += o.files_loaded;
        self.files_skipped += o.files_skipped;
        self.shards_scanned += o.shards_scanned;
        self.shards_skipped += o.shards_skipped;
        self.shards_skipped_filter += o.shards_skipped_filter;
        self.match_count += o.match_count;
        self.ngram_matches += o.ngram_matches;
        self.ngram_lookups += o.ngram_lookups;
        self.regexps_considered += o.regexps_considered;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SearchResult {
    pub files: Vec<FileMatch>,
    pub stats: Stats,
    /// File URL templates by repository name.
    pub repo_urls: BTreeMap<String, String>,
    /// Line fragment templates by repository name.
    pub line_fragments: BTreeMap<String, String>,
}

/// A document, as handed to the shard builder or read back from a shard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub content: Vec<u8>,
    pub branches: Vec<String>,
    pub sub_repository_path: String,
    pub language: String,
    /// Byte ranges of symbol definitions in `content`.
    pub symbols: Vec<DocumentSection>,
    /// Metadata for each entry of `symbols`; may be empty.
    pub symbols_meta_data: Vec<Symbol>,
}

impl Document {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Document {
            name: name.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_branches<S: Into<String>>(mut self, branches: impl IntoIterator<Item = S>) -> Self {
        self.branches = branches.into_iter().map(Into::into).collect();
        self
    }
}
