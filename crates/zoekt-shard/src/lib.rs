//! Trigram-indexed shards for source code search.
//!
//! A shard is a single immutable file holding the contents, names, symbols
//! and branch membership of a set of documents, plus the trigram posting
//! lists that make substring and regexp search cheap. [`ShardBuilder`]
//! writes shards, [`IndexData`] loads and searches one, and [`DocReader`]
//! fans out over many.

pub mod api;
pub mod bloom;
pub mod codec;
pub mod config;
pub mod docreader;
pub mod error;
pub mod indexfile;
pub mod ngram;
pub mod posting;
pub mod query;
pub mod regex_analyze;
pub mod runeoffset;
mod search;
pub mod shard;
pub mod toc;

pub use crate::api::{Document, FileMatch, LineMatch, Repository, SearchResult, Stats};
pub use crate::config::{LoadOptions, MergeOpts, SearchOptions};
pub use crate::docreader::DocReader;
pub use crate::error::{Result, ShardError};
pub use crate::query::Query;
pub use crate::shard::{IndexData, ShardBuilder};
