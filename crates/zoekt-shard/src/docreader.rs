//! Reading and searching across a set of shards.

use std::path::Path;
use std::sync::mpsc;

use tracing::{debug, warn};

use crate::api::{Document, SearchResult};
use crate::config::{LoadOptions, SearchOptions};
use crate::error::Result;
use crate::query::Query;
use crate::shard::IndexData;

/// A set of opened shards.
#[derive(Debug)]
pub struct DocReader {
    shards: Vec<IndexData>,
}

impl DocReader {
    /// Open every path. Fails on the first shard that does not load; shards
    /// opened so far are dropped.
    pub fn open<P: AsRef<Path>>(paths: &[P], opts: &LoadOptions) -> Result<DocReader> {
        let mut shards = Vec::with_capacity(paths.len());
        for p in paths {
            shards.push(IndexData::open(p.as_ref(), opts)?);
        }
        debug!(shards = shards.len(), "opened doc reader");
        Ok(DocReader { shards })
    }

    pub fn shards(&self) -> &[IndexData] {
        &self.shards
    }

    /// Every document named `file_name`, at most one per shard branch set.
    /// Shards whose primary repository tombstones the file are skipped.
    pub fn read_docs(&self, file_name: &str) -> Vec<Document> {
        let (tx, rx) = mpsc::channel();
        rayon::scope(|s| {
            for shard in &self.shards {
                let tombstoned = shard
                    .repositories()
                    .first()
                    .is_some_and(|r| r.file_tombstones.contains(file_name));
                if tombstoned {
                    continue;
                }
                let tx = tx.clone();
                s.spawn(move |_| {
                    for doc in shard.docs_named(file_name) {
                        if tx.send(doc).is_err() {
                            return;
                        }
                    }
                });
            }
        });
        drop(tx);
        rx.into_iter().collect()
    }

    /// Run `q` on every shard in parallel and merge the results, best score
    /// first. A shard that fails is logged and counted as skipped.
    pub fn search_all(&self, q: &Query, opts: &SearchOptions) -> SearchResult {
        let mut opts = opts.clone();
        opts.set_defaults();

        let (tx, rx) = mpsc::channel();
        rayon::scope(|s| {
            for shard in &self.shards {
                let tx = tx.clone();
                let opts = &opts;
                s.spawn(move |_| {
                    let res = shard.search(q, opts);
                    let _ = tx.send((shard.name().to_string(), res));
                });
            }
        });
        drop(tx);

        let mut agg = SearchResult::default();
        for (name, res) in rx {
            match res {
                Ok(r) => {
                    agg.stats.add(&r.stats);
                    agg.files.extend(r.files);
                    agg.repo_urls.extend(r.repo_urls);
                    agg.line_fragments.extend(r.line_fragments);
                }
                Err(err) => {
                    warn!(shard = %name, %err, "search failed");
                    agg.stats.shards_skipped += 1;
                    agg.stats.crashes += 1;
                }
            }
        }

        agg.files
            .sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.file_name.cmp(&b.file_name)));
        if opts.total_max_match_count > 0 {
            let mut seen = 0;
            let keep = agg
                .files
                .iter()
                .take_while(|f| {
                    let before = seen;
                    seen += f.line_matches.iter().map(|l| l.line_fragments.len()).sum::<usize>();
                    before < opts.total_max_match_count
                })
                .count();
            agg.files.truncate(keep);
        }
        if opts.max_doc_display_count > 0 {
            agg.files.truncate(opts.max_doc_display_count);
        }
        agg
    }

    pub fn close(self) {
        for shard in self.shards {
            shard.close();
        }
    }
}

impl IndexData {
    fn docs_named(&self, file_name: &str) -> Vec<Document> {
        let mut out = Vec::new();
        for doc in 0..self.num_docs() {
            if self.file_name(doc) != file_name.as_bytes() {
                continue;
            }
            let content = match self.read_contents(doc) {
                Ok(c) => c.to_vec(),
                Err(err) => {
                    warn!(shard = %self.name(), file = file_name, %err, "unreadable document");
                    continue;
                }
            };
            let mut d = Document::new(file_name, content).with_branches(self.branch_names_for(doc));
            d.language = self.language(doc).to_string();
            out.push(d);
        }
        out
    }
}
