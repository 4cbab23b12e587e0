//! Loader and search options.
//!
//! `LoadOptions` are layered: defaults <- TOML file <- environment <- CLI.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, ShardError};

pub const ENV_IN_MEMORY_CONTENT: &str = "ZOEKT_IN_MEMORY_CONTENT";
pub const ENV_READ_SIDECAR_META: &str = "ZOEKT_READ_SIDECAR_META";

/// How a shard is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Copy the content section into memory instead of paging it from the
    /// backing store.
    pub in_memory_content: bool,
    /// Let a `<shard>.meta` file replace the embedded repository metadata.
    pub read_sidecar_meta: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            in_memory_content: false,
            read_sidecar_meta: true,
        }
    }
}

/// Sources merged over the defaults by [`LoadOptions::load`].
#[derive(Clone, Debug, Default)]
pub struct MergeOpts {
    pub config_path: Option<PathBuf>,
    pub cli_in_memory_content: Option<bool>,
    pub cli_read_sidecar_meta: Option<bool>,
}

/// The subset of [`LoadOptions`] a config file sets; absent keys keep the
/// lower layer's value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileLoadOptions {
    in_memory_content: Option<bool>,
    read_sidecar_meta: Option<bool>,
}

fn parse_bool(key: &str, v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            warn!(key, value = v, "ignoring unparsable boolean");
            None
        }
    }
}

impl LoadOptions {
    /// Merge defaults <- config file <- process environment <- CLI.
    pub fn load(opts: MergeOpts) -> Result<LoadOptions> {
        Self::load_with_env(opts, |k| std::env::var(k).ok())
    }

    /// Like [`load`](Self::load) with an explicit environment lookup.
    pub fn load_with_env(
        opts: MergeOpts,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<LoadOptions> {
        let mut base = LoadOptions::default();

        if let Some(path) = opts.config_path.as_ref() {
            if path.exists() {
                let s = fs::read_to_string(path)?;
                let file: FileLoadOptions = toml::from_str(&s).map_err(|e| {
                    ShardError::format("config", format!("{}: {}", path.display(), e))
                })?;
                if let Some(b) = file.in_memory_content {
                    base.in_memory_content = b;
                }
                if let Some(b) = file.read_sidecar_meta {
                    base.read_sidecar_meta = b;
                }
            }
        }

        // env vars override file
        if let Some(b) = env(ENV_IN_MEMORY_CONTENT).and_then(|v| parse_bool(ENV_IN_MEMORY_CONTENT, &v)) {
            base.in_memory_content = b;
        }
        if let Some(b) = env(ENV_READ_SIDECAR_META).and_then(|v| parse_bool(ENV_READ_SIDECAR_META, &v)) {
            base.read_sidecar_meta = b;
        }

        // CLI overrides everything
        if let Some(b) = opts.cli_in_memory_content {
            base.in_memory_content = b;
        }
        if let Some(b) = opts.cli_read_sidecar_meta {
            base.read_sidecar_meta = b;
        }
        Ok(base)
    }
}

/// Per-search knobs. Zero means "no limit" for the match counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// Return the full content of every matching file.
    pub whole: bool,
    pub shard_max_match_count: usize,
    pub total_max_match_count: usize,
    /// Per-repository cap inside a compound shard.
    pub shard_repo_max_match_count: usize,
    /// Cap on the number of files returned.
    pub max_doc_display_count: usize,
    pub num_context_lines: usize,
}

impl SearchOptions {
    pub fn set_defaults(&mut self) {
        if self.total_max_match_count == 0 && self.shard_max_match_count > 0 {
            self.total_max_match_count = 10 * self.shard_max_match_count;
        }
    }
}
