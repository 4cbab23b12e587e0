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

//! Query evaluation against one loaded shard.
//!
//! `IndexData::search` compiles the query into a match tree, walks the
//! documents the tree proposes, and turns verified candidates into
//! line-addressed file matches.

mod content;
mod hititer;
mod matchtree;
mod planner;

use std::collections::BTreeMap;

use regex::bytes::Regex;
use tracing::{debug, warn};

use self::content::{find_section, Candidate, ContentProvider};
use self::matchtree::{
    BranchAtom, DocCursor, Known, MatchTree, Node, RegexpAtom, SubstrAtom, SymbolRegexpAtom, SymbolSubstrAtom,
    COST_MAX, COST_MIN,
};
use crate::api::{DocumentSection, FileMatch, LineMatch, Repository, SearchResult, Stats};
use crate::config::SearchOptions;
use crate::error::{Result, ShardError};
use crate::ngram::{rune_count, NGRAM_SIZE};
use crate::query::Query;
use crate::regex_analyze::{as_literal, required_substrings};
use crate::shard::IndexData;

const SCORE_WORD_MATCH: f64 = 500.0;
const SCORE_PARTIAL_WORD_MATCH: f64 = 50.0;
const SCORE_SYMBOL: f64 = 7000.0;
const SCORE_FACTOR_ATOM_MATCH: f64 = 400.0;
const SCORE_FILE_ORDER_FACTOR: f64 = 10.0;
const SCORE_REPO_RANK_FACTOR: f64 = 20.0;

/// Compiles queries into match trees over one shard.
struct TreeBuilder<'a> {
    index: &'a IndexData,
    next_id: usize,
    stats: Stats,
}

impl<'a> TreeBuilder<'a> {
    fn node(&mut self, node: Node<'a>) -> MatchTree<'a> {
        let id = self.next_id;
        self.next_id += 1;
        MatchTree { id, node }
    }

    fn build(&mut self, q: &Query) -> Result<MatchTree<'a>> {
        match q {
            Query::Const(true) => Ok(self.node(Node::BruteForce(DocCursor::default()))),
            Query::Const(false) => Ok(self.node(Node::NoMatch("const"))),
            Query::And(children) => {
                let children = children.iter().map(|c| self.build(c)).collect::<Result<Vec<_>>>()?;
                Ok(self.node(Node::And(children)))
            }
            Query::Or(children) => {
                let children = children.iter().map(|c| self.build(c)).collect::<Result<Vec<_>>>()?;
                Ok(self.node(Node::Or(children)))
            }
            Query::Not(child) => {
                let child = self.build(child)?;
                Ok(self.node(Node::Not(Box::new(child))))
            }
            Query::Substring {
                pattern,
                case_sensitive,
                file_name,
                content,
            } => self.scoped(*file_name, *content, |b, name| b.substring(pattern, *case_sensitive, name)),
            Query::Regexp {
                regexp,
                case_sensitive,
                file_name,
                content,
            } => self.scoped(*file_name, *content, |b, name| b.regexp(regexp, *case_sensitive, name)),
            Query::Symbol(inner) => self.symbol(inner),
            Query::Branch { pattern, exact } => Ok(self.branch(pattern, *exact)),
        }
    }

    /// Neither or both scope flags search the file name and the content.
    fn scoped(
        &mut self,
        file_name: bool,
        content: bool,
        mut leaf: impl FnMut(&mut Self, bool) -> Result<MatchTree<'a>>,
    ) -> Result<MatchTree<'a>> {
        if file_name != content {
            return leaf(self, file_name);
        }
        let name = leaf(self, true)?;
        let body = leaf(self, false)?;
        Ok(self.node(Node::Or(vec![name, body])))
    }

    /// `^` and `$` match at line boundaries.
    fn compile(&self, pattern: &str, case_sensitive: bool) -> Result<Regex> {
        let prefix = if case_sensitive { "(?m)" } else { "(?im)" };
        Ok(Regex::new(&format!("{}{}", prefix, pattern))?)
    }

    fn substring_atom(&mut self, pattern: &str, case_sensitive: bool, file_name: bool) -> Result<Option<SubstrAtom<'a>>> {
        let index = self.index;
        Ok(index
            .iterate_ngrams(pattern, case_sensitive, file_name, &mut self.stats)?
            .map(|iter| SubstrAtom::new(iter, pattern, case_sensitive, file_name)))
    }

    fn substring(&mut self, pattern: &str, case_sensitive: bool, file_name: bool) -> Result<MatchTree<'a>> {
        if rune_count(pattern.as_bytes()) < NGRAM_SIZE {
            let re = self.compile(&regex::escape(pattern), case_sensitive)?;
            return Ok(self.node(Node::Regexp(RegexpAtom::new(re, file_name))));
        }
        Ok(match self.substring_atom(pattern, case_sensitive, file_name)? {
            Some(atom) => self.node(Node::Substr(atom)),
            None => self.node(Node::NoMatch("freq=0")),
        })
    }

    fn regexp(&mut self, pattern: &str, case_sensitive: bool, file_name: bool) -> Result<MatchTree<'a>> {
        if let Some(lit) = as_literal(pattern)? {
            if rune_count(lit.as_bytes()) >= NGRAM_SIZE {
                return self.substring(&lit, case_sensitive, file_name);
            }
        }
        let re = self.compile(pattern, case_sensitive)?;
        let atom = self.node(Node::Regexp(RegexpAtom::new(re, file_name)));
        let required = required_substrings(pattern)?;
        if required.is_empty() {
            return Ok(atom);
        }
        let mut children = vec![atom];
        for lit in required {
            let sub = self.substring(&lit, case_sensitive, file_name)?;
            children.push(self.node(Node::NoVisit(Box::new(sub))));
        }
        Ok(self.node(Node::And(children)))
    }

    fn symbol(&mut self, inner: &Query) -> Result<MatchTree<'a>> {
        let (pattern, case_sensitive) = match inner {
            Query::Substring {
                pattern,
                case_sensitive,
                ..
            } => (regex::escape(pattern), *case_sensitive),
            Query::Regexp {
                regexp,
                case_sensitive,
                ..
            } => (regexp.clone(), *case_sensitive),
            other => {
                return Err(ShardError::Query(format!(
                    "symbol query must wrap a substring or regexp, got {}",
                    other
                )))
            }
        };
        let (stripped, leading, trailing) = strip_anchors(&pattern);

        // a literal anchored at one end only needs the regexp check
        if leading == trailing {
            if let Some(lit) = as_literal(stripped)? {
                if rune_count(lit.as_bytes()) >= NGRAM_SIZE {
                    let index = self.index;
                    return Ok(match self.substring_atom(&lit, case_sensitive, false)? {
                        Some(substr) => self.node(Node::SymbolSubstr(SymbolSubstrAtom {
                            substr,
                            exact: leading,
                            pattern_runes: rune_count(lit.as_bytes()) as u32,
                            sections: &index.rune_doc_sections,
                            file_end_runes: &index.file_end_runes,
                            file_end_symbol: &index.file_end_symbol,
                        })),
                        None => self.node(Node::NoMatch("freq=0")),
                    });
                }
            }
        }

        // symbols sit mid-line, so the content prefilter runs unanchored
        let child = self.regexp(stripped, case_sensitive, false)?;
        let all = stripped == ".*" && !leading && !trailing;
        let re = self.compile(&pattern, case_sensitive)?;
        Ok(self.node(Node::SymbolRegexp(SymbolRegexpAtom::new(re, all, child))))
    }

    fn branch(&mut self, pattern: &str, exact: bool) -> MatchTree<'a> {
        let index = self.index;
        let masks = if pattern == "HEAD" {
            vec![1; index.repo_meta_data.len()]
        } else {
            index
                .branch_ids
                .iter()
                .map(|ids| {
                    ids.iter()
                        .filter(|(name, _)| if exact { name.as_str() == pattern } else { name.contains(pattern) })
                        .fold(0u64, |m, (_, &bit)| m | bit)
                })
                .collect()
        };
        self.node(Node::Branch(BranchAtom::new(masks, &index.file_branch_masks, &index.repos)))
    }
}

/// Remove a leading `^` and an unescaped trailing `$`, reporting which
/// were present.
fn strip_anchors(pattern: &str) -> (&str, bool, bool) {
    let (rest, leading) = match pattern.strip_prefix('^') {
        Some(r) => (r, true),
        None => (pattern, false),
    };
    let Some(inner) = rest.strip_suffix('$') else {
        return (rest, leading, false);
    };
    let escapes = inner.bytes().rev().take_while(|&b| b == b'\\').count();
    if escapes % 2 == 1 {
        return (rest, leading, false);
    }
    (inner, leading, true)
}

/// Matches of the current document, in document order and non-overlapping.
/// File name matches are dropped when there are content matches; touching
/// and overlapping matches are merged.
fn gather_matches(mt: &MatchTree<'_>, known: &Known) -> Vec<Candidate> {
    let mut cands = Vec::new();
    mt.visit_matches(known, &mut |atom| cands.extend_from_slice(atom.atom_candidates()));

    if cands.iter().any(|c| !c.file_name) {
        cands.retain(|c| !c.file_name);
    }
    cands.sort_by_key(|c| c.byte_offset);

    let mut out: Vec<Candidate> = Vec::with_capacity(cands.len());
    for c in cands {
        if let Some(last) = out.last_mut() {
            let last_end = last.byte_offset + last.byte_match_sz;
            if last_end >= c.byte_offset {
                let end = c.byte_offset + c.byte_match_sz;
                if end > last_end {
                    last.byte_match_sz = end - last.byte_offset;
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn line_score(lm: &LineMatch, sections: &[DocumentSection]) -> f64 {
    let mut best = 0.0f64;
    for f in &lm.line_fragments {
        let start = f.line_offset;
        let end = start + f.match_length;
        let before = start == 0 || !lm.line.get(start - 1).copied().is_some_and(is_word_byte);
        let after = end >= lm.line.len() || !lm.line.get(end).copied().is_some_and(is_word_byte);
        let mut score = match (before, after) {
            (true, true) => SCORE_WORD_MATCH,
            (true, false) | (false, true) => SCORE_PARTIAL_WORD_MATCH,
            _ => 0.0,
        };
        let in_symbol = !lm.file_name && find_section(sections, f.offset, f.match_length as u32).is_some();
        if f.symbol_info.is_some() || in_symbol {
            score += SCORE_SYMBOL;
        }
        best = best.max(score);
    }
    best
}

fn add_repo(res: &mut SearchResult, repo: &Repository) {
    res.repo_urls.insert(repo.name.clone(), repo.file_url_template.clone());
    res.line_fragments
        .insert(repo.name.clone(), repo.line_fragment_template.clone());
}

impl IndexData {
    /// Run `q` over every document of the shard.
    pub fn search(&self, q: &Query, opts: &SearchOptions) -> Result<SearchResult> {
        let mut opts = opts.clone();
        opts.set_defaults();
        let mut res = SearchResult::default();
        if self.file_name_index.is_empty() || self.num_docs() == 0 {
            return Ok(res);
        }

        let q = q.clone().simplify();
        if q == Query::Const(false) {
            return Ok(res);
        }

        let mut builder = TreeBuilder {
            index: self,
            next_id: 0,
            stats: Stats::default(),
        };
        let tree = builder.build(&q)?;
        let node_count = builder.next_id;
        res.stats.add(&builder.stats);
        let Some(mut mt) = tree.prune() else {
            debug!(shard = %self.name(), query = %q, "no candidates");
            res.stats.shards_skipped_filter += 1;
            return Ok(res);
        };
        debug!(shard = %self.name(), tree = %mt, "match tree");

        let mut total_atoms = 0usize;
        mt.visit_atoms(&mut |_| total_atoms += 1);
        res.stats.shards_scanned += 1;

        let mut cp = ContentProvider::new(self);
        let mut known = Known::new(node_count);
        let doc_count = self.num_docs();
        let mut last_doc: Option<u32> = None;
        let (mut last_repo, mut repo_match_count) = (None::<u16>, 0usize);

        'docs: loop {
            let mut next = mt.next_doc();
            if let Some(last) = last_doc {
                next = next.max(last + 1);
            }

            while next < doc_count {
                let repo_id = self.repos[next as usize];
                let md = &self.repo_meta_data[repo_id as usize];
                if md.tombstone {
                    next += 1;
                    continue;
                }
                if !md.file_tombstones.is_empty() {
                    let name = String::from_utf8_lossy(self.file_name(next));
                    if md.file_tombstones.contains(name.as_ref()) {
                        next += 1;
                        continue;
                    }
                }
                if opts.shard_repo_max_match_count > 0
                    && repo_match_count >= opts.shard_repo_max_match_count
                    && last_repo == Some(repo_id)
                {
                    cp.stats.files_skipped += 1;
                    next += 1;
                    continue;
                }
                break;
            }
            if next >= doc_count {
                break;
            }
            last_doc = Some(next);

            let repo_id = self.repos[next as usize];
            if last_repo != Some(repo_id) {
                last_repo = Some(repo_id);
                repo_match_count = 0;
            }

            if opts.shard_max_match_count > 0 && res.stats.match_count >= opts.shard_max_match_count {
                cp.stats.files_skipped += (doc_count - next) as usize;
                break;
            }

            cp.stats.files_considered += 1;
            mt.prepare(next);
            cp.set_document(next);
            known.clear();

            let mut decided = None;
            for cost in COST_MIN..=COST_MAX {
                match mt.eval(&mut cp, cost, &mut known) {
                    Ok((v, true)) => {
                        decided = Some(v);
                        break;
                    }
                    Ok((_, false)) => {}
                    Err(err) => {
                        warn!(shard = %self.name(), doc = next, %err, "skipping document");
                        cp.stats.files_skipped += 1;
                        continue 'docs;
                    }
                }
            }
            match decided {
                Some(true) => {}
                Some(false) => continue,
                None => {
                    warn!(shard = %self.name(), doc = next, "match tree did not decide");
                    continue;
                }
            }

            let fm = self.file_match(&mt, &known, &mut cp, &opts, total_atoms)?;
            let fragments: usize = fm.line_matches.iter().map(|l| l.line_fragments.len()).sum();
            repo_match_count += fragments;
            res.stats.match_count += fragments;
            res.stats.file_count += 1;
            res.files.push(fm);
        }

        if opts.max_doc_display_count > 0 && res.files.len() > opts.max_doc_display_count {
            res.files.truncate(opts.max_doc_display_count);
        }

        for md in &self.repo_meta_data {
            add_repo(&mut res, md);
            for sub in md.sub_repo_map.values() {
                add_repo(&mut res, sub);
            }
        }
        res.stats.add(&cp.stats);
        Ok(res)
    }

    fn file_match(
        &self,
        mt: &MatchTree<'_>,
        known: &Known,
        cp: &mut ContentProvider<'_>,
        opts: &SearchOptions,
        total_atoms: usize,
    ) -> Result<FileMatch> {
        let doc = cp.doc();
        let md = &self.repo_meta_data[self.repos[doc as usize] as usize];
        let mut fm = FileMatch {
            repository: md.name.clone(),
            repository_id: md.id,
            file_name: String::from_utf8_lossy(self.file_name(doc)).into_owned(),
            checksum: self.checksum(doc).to_vec(),
            language: self.language(doc).to_string(),
            ..Default::default()
        };

        let sub = self.sub_repos.get(doc as usize).copied().unwrap_or(0) as usize;
        let branches = if sub > 0 {
            let paths = &self.sub_repo_paths[self.repos[doc as usize] as usize];
            let path = paths.get(sub).ok_or_else(|| {
                ShardError::format("sub repos", format!("document {} has sub repository {} of {}", doc, sub, paths.len()))
            })?;
            fm.sub_repository_path = path.clone();
            let sr = md.sub_repo_map.get(path);
            fm.sub_repository_name = sr.map(|r| r.name.clone()).unwrap_or_default();
            sr.map(|r| r.branches.as_slice()).unwrap_or(&[])
        } else {
            md.branches.as_slice()
        };
        if let Some(b) = self.branch_index(doc).and_then(|i| branches.get(i)) {
            fm.version = b.version.clone();
        }

        let mut atom_matches = 0usize;
        mt.visit_matches(known, &mut |_| atom_matches += 1);

        let mut cands = gather_matches(mt, known);
        if cands.is_empty() {
            let name = self.file_name(doc);
            cands.push(Candidate {
                file_name: true,
                byte_match_sz: name.len() as u32,
                ..Default::default()
            });
        }
        fm.line_matches = cp.fill_matches(&cands, opts.num_context_lines)?;

        let sections = if self.doc_sections_index.is_empty() { &[][..] } else { cp.doc_sections()? };
        let best = fm
            .line_matches
            .iter()
            .map(|lm| line_score(lm, sections))
            .fold(0.0, f64::max);
        fm.score = best
            + SCORE_FACTOR_ATOM_MATCH * atom_matches as f64 / total_atoms.max(1) as f64
            + SCORE_FILE_ORDER_FACTOR * (1.0 - doc as f64 / self.num_docs() as f64)
            + SCORE_REPO_RANK_FACTOR * md.rank as f64 / u16::MAX as f64;

        fm.branches = self.gather_branches(doc, mt, known);
        if opts.whole {
            fm.content = Some(cp.data(false)?.to_vec());
        }
        Ok(fm)
    }

    /// Branches queried for, or every branch holding the document when the
    /// query has no branch atom.
    fn gather_branches(&self, doc: u32, mt: &MatchTree<'_>, known: &Known) -> Vec<String> {
        let mut masks = Vec::new();
        mt.visit_matches(known, &mut |atom| {
            if let Node::Branch(b) = &atom.node {
                masks.push(b.mask(doc));
            }
        });
        if masks.is_empty() {
            return self.branch_names_for(doc);
        }
        let repo = self.repos[doc as usize] as usize;
        let names: BTreeMap<u64, &String> = masks
            .into_iter()
            .flat_map(|mask| (0..64).map(move |bit| mask & (1u64 << bit)).filter(|&b| b != 0))
            .filter_map(|bit| self.branch_names.get(repo)?.get(&bit).map(|n| (bit, n)))
            .collect();
        names.into_values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LineFragmentMatch;

    #[test]
    fn anchors_are_stripped_independently() {
        assert_eq!(strip_anchors("^foo$"), ("foo", true, true));
        assert_eq!(strip_anchors("^foo"), ("foo", true, false));
        assert_eq!(strip_anchors("foo$"), ("foo", false, true));
        assert_eq!(strip_anchors(r"foo\$"), (r"foo\$", false, false));
        assert_eq!(strip_anchors(r"foo\\$"), (r"foo\\", false, true));
        assert_eq!(strip_anchors("foo"), ("foo", false, false));
    }

    fn line(text: &str, offset: usize, len: usize) -> LineMatch {
        LineMatch {
            line: text.as_bytes().to_vec(),
            line_fragments: vec![LineFragmentMatch {
                offset: offset as u32,
                line_offset: offset,
                match_length: len,
                symbol_info: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn whole_words_score_higher() {
        assert_eq!(line_score(&line("let foo = 1", 4, 3), &[]), SCORE_WORD_MATCH);
        assert_eq!(line_score(&line("let foobar = 1", 4, 3), &[]), SCORE_PARTIAL_WORD_MATCH);
        assert_eq!(line_score(&line("xfoox", 1, 3), &[]), 0.0);

        let sections = [DocumentSection { start: 4, end: 7 }];
        assert_eq!(
            line_score(&line("let foo = 1", 4, 3), &sections),
            SCORE_WORD_MATCH + SCORE_SYMBOL
        );
    }
}
