//! Mutable metadata kept beside an immutable shard.
//!
//! `<shard>.meta` holds the repository list as JSON and replaces the
//! embedded list when present. `<shard>.rip` lists tombstoned repository
//! names, one per line. Both are written to a temporary file and renamed
//! into place.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::api::Repository;
use crate::error::{Result, ShardError};
use crate::indexfile::MmapIndexFile;

#[derive(Deserialize)]
#[serde(untagged)]
enum RepositoryJson {
    Many(Vec<Repository>),
    One(Box<Repository>),
}

/// Parse a repository list. A single object is accepted as a list of one.
pub(crate) fn parse_repositories(section: &'static str, blob: &[u8]) -> Result<Vec<Repository>> {
    let parsed: RepositoryJson =
        serde_json::from_slice(blob).map_err(|source| ShardError::Json { section, source })?;
    Ok(match parsed {
        RepositoryJson::Many(v) => v,
        RepositoryJson::One(r) => vec![*r],
    })
}

fn with_suffix(shard: impl AsRef<Path>, suffix: &str) -> PathBuf {
    let mut p = shard.as_ref().as_os_str().to_owned();
    p.push(suffix);
    PathBuf::from(p)
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(b) => Ok(Some(b)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = with_suffix(path, &format!(".{}.tmp", std::process::id()));
    fs::write(&tmp, data)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Repository metadata from `<shard>.meta`; `None` when there is no sidecar.
pub fn read_sidecar(shard: impl AsRef<Path>) -> Result<Option<Vec<Repository>>> {
    match read_optional(&with_suffix(shard, ".meta"))? {
        Some(blob) => parse_repositories("sidecar metadata", &blob).map(Some),
        None => Ok(None),
    }
}

/// Merge the mutable fields of `updates` into the shard's current
/// repository metadata and write the result to `<shard>.meta`. Repositories
/// are matched by name. Returns whether anything changed.
pub fn update_sidecar(shard: impl AsRef<Path>, updates: &[Repository]) -> Result<bool> {
    let shard = shard.as_ref();
    let mut current = match read_sidecar(shard)? {
        Some(repos) => repos,
        None => {
            let file = MmapIndexFile::open(shard)?;
            super::read_metadata(&file)?.1
        }
    };

    let mut changed = false;
    for update in updates {
        let Some(repo) = current.iter_mut().find(|r| r.name == update.name) else {
            return Err(ShardError::format(
                "sidecar metadata",
                format!("repository {:?} not in shard", update.name),
            ));
        };
        changed |= repo.merge_mutable(update)?;
    }
    if !changed {
        return Ok(false);
    }
    let blob = serde_json::to_vec(&current).map_err(|source| ShardError::Json {
        section: "sidecar metadata",
        source,
    })?;
    write_atomic(&with_suffix(shard, ".meta"), &blob)?;
    Ok(true)
}

/// Repository names tombstoned in `<shard>.rip`.
pub fn load_tombstones(shard: impl AsRef<Path>) -> Result<HashSet<String>> {
    let Some(blob) = read_optional(&with_suffix(shard, ".rip"))? else {
        return Ok(HashSet::new());
    };
    Ok(String::from_utf8_lossy(&blob)
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Idempotently add `repo_name` to the shard's tombstone file. The shard is
/// not checked for containing the repository.
pub fn set_tombstone(shard: impl AsRef<Path>, repo_name: &str) -> Result<()> {
    let shard = shard.as_ref();
    let mut names: Vec<String> = load_tombstones(shard)?.into_iter().collect();
    if !names.iter().any(|n| n == repo_name) {
        names.push(repo_name.to_string());
    }
    names.sort();
    let mut out = String::new();
    for n in names {
        out.push_str(&n);
        out.push('\n');
    }
    write_atomic(&with_suffix(shard, ".rip"), out.as_bytes())
}
