#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Once;

use anyhow::Result;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;
use zoekt_shard::api::{Document, Repository, RepositoryBranch};
use zoekt_shard::{IndexData, LoadOptions, Query, SearchOptions, SearchResult, ShardBuilder};

static INIT: Once = Once::new();

/// Route library logs through the test harness. `RUST_LOG` controls the level.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

pub fn repo(name: &str, branches: &[&str]) -> Repository {
    Repository {
        name: name.to_string(),
        branches: branches
            .iter()
            .enumerate()
            .map(|(i, b)| RepositoryBranch {
                name: b.to_string(),
                version: format!("v{}", i + 1),
            })
            .collect(),
        ..Default::default()
    }
}

/// Write a single-repository shard into `dir`.
pub fn write_shard(dir: &Path, file: &str, version: u32, repo: Repository, docs: Vec<Document>) -> Result<PathBuf> {
    let mut b = ShardBuilder::new(version)?;
    b.set_repository(repo)?;
    for d in docs {
        b.add(d)?;
    }
    let path = dir.join(file);
    b.write_to_path(&path)?;
    Ok(path)
}

/// A loaded shard and the temporary directory holding it.
pub struct TestShard {
    pub dir: TempDir,
    pub path: PathBuf,
    pub index: IndexData,
}

impl TestShard {
    pub fn search(&self, q: &Query) -> Result<SearchResult> {
        Ok(self.index.search(q, &SearchOptions::default())?)
    }
}

pub fn shard_with(repo: Repository, docs: Vec<Document>) -> Result<TestShard> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = write_shard(dir.path(), "test_v16.00000.zoekt", 16, repo, docs)?;
    let index = IndexData::open(&path, &LoadOptions::default())?;
    Ok(TestShard { dir, path, index })
}

/// A shard of plain documents in a repository with one branch.
pub fn shard_of(files: &[(&str, &str)]) -> Result<TestShard> {
    let docs = files
        .iter()
        .map(|(name, content)| Document::new(*name, *content).with_branches(["main"]))
        .collect();
    shard_with(repo("repo", &["main"]), docs)
}

/// File names of a result, in result order.
pub fn names(res: &SearchResult) -> Vec<&str> {
    res.files.iter().map(|f| f.file_name.as_str()).collect()
}

pub fn text(b: &[u8]) -> &str {
    std::str::from_utf8(b).unwrap_or("<invalid utf-8>")
}
