//! Per-repository statistics, computed once at load.

use tracing::warn;

use super::IndexData;
use crate::api::{RepoListEntry, RepoStats};
use crate::codec::read_uvarint;
use crate::error::{Result, ShardError};
use crate::toc::SimpleSection;

/// Longest encoding of the leading newline count.
const MAX_VARINT_LEN: u32 = 10;

impl IndexData {
    /// Approximate resident size of the loaded tables, in bytes.
    pub fn memory_use(&self) -> usize {
        let u32_tables = [
            &self.newlines_index,
            &self.doc_sections_index,
            &self.boundaries,
            &self.file_name_index,
            &self.file_end_runes,
            &self.file_name_end_runes,
            &self.file_end_symbol,
            &self.symbols.sym_kind_index,
            &self.sub_repos,
        ];
        let mut sz: usize = u32_tables.iter().map(|a| 4 * a.len()).sum();
        sz += self.rune_offsets.size_bytes();
        sz += self.file_name_rune_offsets.size_bytes();
        sz += self.languages.len();
        sz += self.checksums.len();
        sz += 2 * self.repos.len();
        sz += 8 * self.rune_doc_sections.len();
        sz += 8 * self.file_branch_masks.len();
        sz += self.ngrams.size_bytes();
        sz += self.file_name_ngrams.size_bytes();
        sz
    }

    pub(crate) fn calculate_stats(&mut self) -> Result<()> {
        let memory = self.memory_use() as i64;
        let n_repos = self.repo_meta_data.len().max(1) as i64;
        let share = memory / n_repos;
        let remainder = memory - share * n_repos;

        let mut entries = Vec::with_capacity(self.repo_meta_data.len());
        let (mut start, mut end) = (0u32, 0u32);
        for (repo_id, md) in self.repo_meta_data.iter().enumerate() {
            while (end as usize) < self.repos.len() && self.repos[end as usize] as usize == repo_id {
                end += 1;
            }
            let mut stats = self.stats_for_range(start, end);
            stats.index_bytes = if repo_id == 0 { share + remainder } else { share };
            entries.push(RepoListEntry {
                repository: md.clone(),
                stats,
            });
            start = end;
        }
        if (end as usize) != self.repos.len() {
            return Err(ShardError::format(
                "repos",
                format!(
                    "shard documents out of order with respect to repositories: document {} belongs to repository {}",
                    end, self.repos[end as usize]
                ),
            ));
        }
        self.repo_list_entries = entries;
        Ok(())
    }

    /// Statistics for documents `[start, end)`. `index_bytes` is filled in
    /// by the caller.
    fn stats_for_range(&self, start: u32, end: u32) -> RepoStats {
        if start >= end {
            return RepoStats {
                repos: 1,
                shards: 1,
                ..Default::default()
            };
        }
        let span = |index: &[u32]| -> i64 {
            match (index.get(start as usize), index.get(end as usize)) {
                (Some(&s), Some(&e)) => (e - s) as i64,
                _ => 0,
            }
        };
        let (count, default_count, other_count) = self.new_lines_stats(start, end);
        RepoStats {
            repos: 1,
            shards: 1,
            documents: (end - start) as usize,
            index_bytes: 0,
            content_bytes: span(&self.boundaries) + span(&self.file_name_index),
            new_lines_count: count,
            default_branch_new_lines_count: default_count,
            other_branches_new_lines_count: other_count,
        }
    }

    /// Newline totals over `[start, end)`: all branches, the default branch
    /// (bit 0) and every other branch counted once per branch.
    ///
    /// Only the leading count of each document's newline list is read.
    fn new_lines_stats(&self, start: u32, end: u32) -> (u64, u64, u64) {
        let (mut count, mut default_count, mut other_count) = (0u64, 0u64, 0u64);
        for doc in start..end {
            let i = doc as usize;
            let mask = self.file_branch_masks[i];
            let others = (mask >> 1).count_ones() as u64;

            let sec = SimpleSection {
                off: self.newlines_start + self.newlines_index[i],
                sz: (self.newlines_index[i + 1] - self.newlines_index[i]).min(MAX_VARINT_LEN),
            };
            let lines = match self.file.read(sec.off, sec.sz) {
                Ok(blob) if blob.is_empty() => 0,
                Ok(blob) => {
                    let mut off = 0;
                    match read_uvarint(blob, &mut off) {
                        Ok(v) => v as u64,
                        Err(err) => {
                            warn!(doc, shard = %self.file.name(), %err, "bad newline count");
                            continue;
                        }
                    }
                }
                Err(err) => {
                    warn!(doc, shard = %self.file.name(), %err, "error reading newline index");
                    continue;
                }
            };
            count += lines;
            if mask & 1 == 1 {
                default_count += lines;
            }
            other_count += others * lines;
        }
        (count, default_count, other_count)
    }
}
