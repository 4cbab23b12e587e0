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

//! The match tree: a query compiled against one shard.
//!
//! Documents are visited in shard order. `next_doc` proposes the next
//! document that may match, `prepare` positions every node on it, and
//! `matches` evaluates the tree in rounds of increasing cost. A node that
//! cannot decide at the current cost answers "not sure" and is asked again
//! in the next round; decided nodes are cached in [`Known`].

use std::fmt;

use regex::bytes::Regex;

use super::content::{Candidate, ContentProvider};
use super::hititer::{NgramDocIter, EXHAUSTED};
use crate::api::DocumentSection;
use crate::error::Result;

pub(crate) const COST_CONST: u8 = 0;
pub(crate) const COST_MEMORY: u8 = 1;
pub(crate) const COST_CONTENT: u8 = 2;
pub(crate) const COST_REGEXP: u8 = 3;

pub(crate) const COST_MIN: u8 = COST_CONST;
pub(crate) const COST_MAX: u8 = COST_REGEXP;

/// Results already decided for the current document, by node id.
pub(crate) struct Known(Vec<Option<bool>>);

impl Known {
    pub(crate) fn new(nodes: usize) -> Self {
        Known(vec![None; nodes])
    }

    pub(crate) fn get(&self, id: usize) -> Option<bool> {
        self.0.get(id).copied().flatten()
    }

    fn set(&mut self, id: usize, v: bool) {
        if let Some(slot) = self.0.get_mut(id) {
            *slot = Some(v);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.0.iter_mut().for_each(|v| *v = None);
    }
}

/// Iterates every document: the `next_doc` of atoms that cannot skip.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct DocCursor {
    first_done: bool,
    doc: u32,
}

impl DocCursor {
    fn next_doc(&self) -> u32 {
        if self.first_done {
            self.doc + 1
        } else {
            0
        }
    }

    fn prepare(&mut self, doc: u32) {
        self.doc = doc;
        self.first_done = true;
    }
}

pub(crate) struct SubstrAtom<'a> {
    pub(crate) iter: NgramDocIter<'a>,
    pub(crate) pattern: Vec<u8>,
    pub(crate) lowered: Vec<u8>,
    pub(crate) case_sensitive: bool,
    pub(crate) file_name: bool,
    pub(crate) current: Vec<Candidate>,
    evaluated: bool,
}

impl<'a> SubstrAtom<'a> {
    pub(crate) fn new(iter: NgramDocIter<'a>, pattern: &str, case_sensitive: bool, file_name: bool) -> Self {
        SubstrAtom {
            iter,
            pattern: pattern.as_bytes().to_vec(),
            lowered: crate::ngram::to_lower_bytes(pattern.as_bytes()),
            case_sensitive,
            file_name,
            current: Vec::new(),
            evaluated: false,
        }
    }

    fn prepare(&mut self, doc: u32) {
        self.iter.prepare(doc);
        let file_name = self.file_name;
        self.current = self
            .iter
            .candidates()
            .into_iter()
            .map(|rune_offset| Candidate {
                file_name,
                rune_offset,
                ..Default::default()
            })
            .collect();
        self.evaluated = false;
    }

    fn matches(&mut self, cp: &mut ContentProvider<'_>, cost: u8) -> Result<(bool, bool)> {
        if self.evaluated {
            return Ok((!self.current.is_empty(), true));
        }
        if self.current.is_empty() {
            return Ok((false, true));
        }
        let need = if self.file_name { COST_MEMORY } else { COST_CONTENT };
        if cost < need {
            return Ok((false, false));
        }
        let data = cp.data(self.file_name)?;
        let mut kept = Vec::with_capacity(self.current.len());
        for mut m in std::mem::take(&mut self.current) {
            m.byte_offset = cp.find_offset(self.file_name, m.rune_offset)?;
            if m.verify(data, &self.pattern, &self.lowered, self.case_sensitive) {
                kept.push(m);
            }
        }
        self.current = kept;
        self.evaluated = true;
        Ok((!self.current.is_empty(), true))
    }
}

/// Substring candidates restricted to symbol definitions.
pub(crate) struct SymbolSubstrAtom<'a> {
    pub(crate) substr: SubstrAtom<'a>,
    /// The match must cover the whole symbol.
    pub(crate) exact: bool,
    pub(crate) pattern_runes: u32,
    /// Every symbol section of the shard, in corpus rune offsets.
    pub(crate) sections: &'a [DocumentSection],
    pub(crate) file_end_runes: &'a [u32],
    pub(crate) file_end_symbol: &'a [u32],
}

impl<'a> SymbolSubstrAtom<'a> {
    fn doc_sections(&self, doc: u32) -> &'a [DocumentSection] {
        let all: &'a [DocumentSection] = self.sections;
        let i = doc as usize;
        let per_doc = self.file_end_symbol.last().map(|&n| n as usize) == Some(all.len());
        if per_doc {
            if let (Some(&s), Some(&e)) = (self.file_end_symbol.get(i), self.file_end_symbol.get(i + 1)) {
                return all.get(s as usize..e as usize).unwrap_or(&[]);
            }
        }
        let start = if i > 0 { self.file_end_runes[i - 1] } else { 0 };
        let end = self.file_end_runes[i];
        let lo = all.partition_point(|s| s.start < start);
        let hi = all.partition_point(|s| s.start < end);
        &all[lo..hi.max(lo)]
    }

    fn prepare(&mut self, doc: u32) {
        self.substr.prepare(doc);
        let file_start = if doc > 0 { self.file_end_runes[doc as usize - 1] } else { 0 };
        let sections = self.doc_sections(doc);

        let mut kept = Vec::new();
        let mut sec = 0;
        for mut c in std::mem::take(&mut self.substr.current) {
            let start = file_start + c.rune_offset;
            let end = start + self.pattern_runes;
            while sec < sections.len() && start >= sections[sec].end {
                sec += 1;
            }
            let Some(s) = sections.get(sec) else {
                break;
            };
            let inside = start >= s.start && end <= s.end;
            let whole = start == s.start && end == s.end;
            if inside && (!self.exact || whole) {
                c.symbol = Some(sec as u32);
                kept.push(c);
            }
        }
        self.substr.current = kept;
    }
}

pub(crate) struct RegexpAtom {
    pub(crate) re: Regex,
    pub(crate) file_name: bool,
    found: Vec<Candidate>,
    evaluated: bool,
    cursor: DocCursor,
}

impl RegexpAtom {
    pub(crate) fn new(re: Regex, file_name: bool) -> Self {
        RegexpAtom {
            re,
            file_name,
            found: Vec::new(),
            evaluated: false,
            cursor: DocCursor::default(),
        }
    }

    fn matches(&mut self, cp: &mut ContentProvider<'_>, cost: u8) -> Result<(bool, bool)> {
        if self.evaluated {
            return Ok((!self.found.is_empty(), true));
        }
        if cost < COST_REGEXP {
            return Ok((false, false));
        }
        cp.stats.regexps_considered += 1;
        let data = cp.data(self.file_name)?;
        let file_name = self.file_name;
        self.found = self
            .re
            .find_iter(data)
            .map(|m| Candidate {
                file_name,
                byte_offset: m.start() as u32,
                byte_match_sz: (m.end() - m.start()) as u32,
                ..Default::default()
            })
            .collect();
        self.evaluated = true;
        Ok((!self.found.is_empty(), true))
    }
}

/// A regexp evaluated inside each symbol section. `child` prefilters
/// documents with the regexp over the whole content.
pub(crate) struct SymbolRegexpAtom<'a> {
    pub(crate) re: Regex,
    /// Every section matches; skip running the regexp.
    pub(crate) all: bool,
    pub(crate) child: Box<MatchTree<'a>>,
    found: Vec<Candidate>,
    evaluated: bool,
}

impl<'a> SymbolRegexpAtom<'a> {
    pub(crate) fn new(re: Regex, all: bool, child: MatchTree<'a>) -> Self {
        SymbolRegexpAtom {
            re,
            all,
            child: Box::new(child),
            found: Vec::new(),
            evaluated: false,
        }
    }

    fn matches(&mut self, cp: &mut ContentProvider<'_>, cost: u8, known: &mut Known) -> Result<(bool, bool)> {
        if self.evaluated {
            return Ok((!self.found.is_empty(), true));
        }
        let (v, sure) = self.child.eval(cp, cost, known)?;
        if sure && !v {
            return Ok((false, true));
        }
        if cost < COST_REGEXP || !sure {
            return Ok((false, false));
        }
        let content = cp.data(false)?;
        let mut found = Vec::new();
        for (i, sec) in cp.doc_sections()?.iter().enumerate() {
            let Some(text) = content.get(sec.start as usize..sec.end as usize) else {
                continue;
            };
            let (start, end) = if self.all {
                (0, text.len())
            } else {
                match self.re.find(text) {
                    Some(m) => (m.start(), m.end()),
                    None => continue,
                }
            };
            found.push(Candidate {
                byte_offset: sec.start + start as u32,
                byte_match_sz: (end - start) as u32,
                symbol: Some(i as u32),
                ..Default::default()
            });
        }
        self.found = found;
        self.evaluated = true;
        Ok((!self.found.is_empty(), true))
    }
}

pub(crate) struct BranchAtom<'a> {
    /// Wanted branch bits, per repository.
    pub(crate) masks: Vec<u64>,
    pub(crate) file_masks: &'a [u64],
    pub(crate) repos: &'a [u16],
    cursor: DocCursor,
}

impl<'a> BranchAtom<'a> {
    pub(crate) fn new(masks: Vec<u64>, file_masks: &'a [u64], repos: &'a [u16]) -> Self {
        BranchAtom {
            masks,
            file_masks,
            repos,
            cursor: DocCursor::default(),
        }
    }

    /// Branch bits of `doc` selected by the query.
    pub(crate) fn mask(&self, doc: u32) -> u64 {
        let i = doc as usize;
        let repo = self.repos.get(i).copied().unwrap_or(0) as usize;
        self.file_masks[i] & self.masks.get(repo).copied().unwrap_or(0)
    }

    fn next_doc(&self) -> u32 {
        let start = self.cursor.next_doc();
        (start..self.file_masks.len() as u32)
            .find(|&d| self.mask(d) != 0)
            .unwrap_or(EXHAUSTED)
    }
}

pub(crate) enum Node<'a> {
    BruteForce(DocCursor),
    NoMatch(&'static str),
    And(Vec<MatchTree<'a>>),
    Or(Vec<MatchTree<'a>>),
    Not(Box<MatchTree<'a>>),
    /// Evaluated, but never contributes matches.
    NoVisit(Box<MatchTree<'a>>),
    Substr(SubstrAtom<'a>),
    SymbolSubstr(SymbolSubstrAtom<'a>),
    Regexp(RegexpAtom),
    SymbolRegexp(SymbolRegexpAtom<'a>),
    Branch(BranchAtom<'a>),
}

pub(crate) struct MatchTree<'a> {
    pub(crate) id: usize,
    pub(crate) node: Node<'a>,
}

impl<'a> MatchTree<'a> {
    pub(crate) fn next_doc(&mut self) -> u32 {
        match &mut self.node {
            Node::BruteForce(c) => c.next_doc(),
            Node::NoMatch(_) => EXHAUSTED,
            Node::And(children) => children.iter_mut().map(|c| c.next_doc()).max().unwrap_or(0),
            Node::Or(children) => children.iter_mut().map(|c| c.next_doc()).min().unwrap_or(EXHAUSTED),
            Node::Not(_) => 0,
            Node::NoVisit(child) => child.next_doc(),
            Node::Substr(s) => s.iter.next_doc(),
            Node::SymbolSubstr(s) => s.substr.iter.next_doc(),
            Node::Regexp(r) => r.cursor.next_doc(),
            Node::SymbolRegexp(s) => s.child.next_doc(),
            Node::Branch(b) => b.next_doc(),
        }
    }

    pub(crate) fn prepare(&mut self, doc: u32) {
        match &mut self.node {
            Node::BruteForce(c) => c.prepare(doc),
            Node::NoMatch(_) => {}
            Node::And(children) | Node::Or(children) => children.iter_mut().for_each(|c| c.prepare(doc)),
            Node::Not(child) | Node::NoVisit(child) => child.prepare(doc),
            Node::Substr(s) => s.prepare(doc),
            Node::SymbolSubstr(s) => s.prepare(doc),
            Node::Regexp(r) => {
                r.found.clear();
                r.evaluated = false;
                r.cursor.prepare(doc);
            }
            Node::SymbolRegexp(s) => {
                s.found.clear();
                s.evaluated = false;
                s.child.prepare(doc);
            }
            Node::Branch(b) => b.cursor.prepare(doc),
        }
    }

    /// Evaluate with caching: decided results are stored in `known`.
    pub(crate) fn eval(&mut self, cp: &mut ContentProvider<'_>, cost: u8, known: &mut Known) -> Result<(bool, bool)> {
        if let Some(v) = known.get(self.id) {
            return Ok((v, true));
        }
        let (v, sure) = self.matches(cp, cost, known)?;
        if sure {
            known.set(self.id, v);
        }
        Ok((v, sure))
    }

    /// Whether the prepared document matches, and whether that is certain.
    fn matches(&mut self, cp: &mut ContentProvider<'_>, cost: u8, known: &mut Known) -> Result<(bool, bool)> {
        match &mut self.node {
            Node::BruteForce(_) => Ok((true, true)),
            Node::NoMatch(_) => Ok((false, true)),
            Node::And(children) => {
                let mut sure = true;
                for ch in children.iter_mut() {
                    let (v, ok) = ch.eval(cp, cost, known)?;
                    if ok && !v {
                        return Ok((false, true));
                    }
                    sure &= ok;
                }
                Ok((true, sure))
            }
            Node::Or(children) => {
                // no short-circuit: every decided child can contribute matches
                let (mut any, mut sure) = (false, true);
                for ch in children.iter_mut() {
                    let (v, ok) = ch.eval(cp, cost, known)?;
                    if ok {
                        any |= v;
                    } else {
                        sure = false;
                    }
                }
                Ok((any, sure))
            }
            Node::Not(child) => {
                let (v, ok) = child.eval(cp, cost, known)?;
                Ok((!v, ok))
            }
            Node::NoVisit(child) => child.eval(cp, cost, known),
            Node::Substr(s) => s.matches(cp, cost),
            Node::SymbolSubstr(s) => s.substr.matches(cp, cost),
            Node::Regexp(r) => r.matches(cp, cost),
            Node::SymbolRegexp(s) => s.matches(cp, cost, known),
            Node::Branch(b) => Ok((b.mask(b.cursor.doc) != 0, true)),
        }
    }

    /// Visit every atom, including those under `Not` and `NoVisit`.
    pub(crate) fn visit_atoms(&self, f: &mut dyn FnMut(&MatchTree<'a>)) {
        match &self.node {
            Node::And(children) | Node::Or(children) => {
                for ch in children {
                    ch.visit_atoms(f);
                }
            }
            Node::Not(child) | Node::NoVisit(child) => child.visit_atoms(f),
            _ => f(self),
        }
    }

    /// Visit the atoms that contribute matches to the current document:
    /// children of and/or that matched, never negated or prefilter subtrees.
    pub(crate) fn visit_matches(&self, known: &Known, f: &mut dyn FnMut(&MatchTree<'a>)) {
        match &self.node {
            Node::And(children) | Node::Or(children) => {
                for ch in children {
                    if known.get(ch.id) == Some(true) {
                        ch.visit_matches(known, f);
                    }
                }
            }
            Node::Not(_) | Node::NoVisit(_) => {}
            _ => f(self),
        }
    }

    /// Drop branches that can never match. `None` means the whole tree is
    /// impossible.
    pub(crate) fn prune(self) -> Option<MatchTree<'a>> {
        let id = self.id;
        match self.node {
            Node::NoMatch(_) => None,
            Node::And(children) => {
                let pruned: Option<Vec<_>> = children.into_iter().map(MatchTree::prune).collect();
                Some(MatchTree {
                    id,
                    node: Node::And(pruned?),
                })
            }
            Node::Or(children) => {
                let mut kept: Vec<_> = children.into_iter().filter_map(MatchTree::prune).collect();
                match kept.len() {
                    0 => None,
                    1 => kept.pop(),
                    _ => Some(MatchTree { id, node: Node::Or(kept) }),
                }
            }
            Node::Not(child) => Some(match child.prune() {
                Some(ch) => MatchTree {
                    id,
                    node: Node::Not(Box::new(ch)),
                },
                None => MatchTree {
                    id,
                    node: Node::BruteForce(DocCursor::default()),
                },
            }),
            Node::NoVisit(child) => child.prune().map(|ch| MatchTree {
                id,
                node: Node::NoVisit(Box::new(ch)),
            }),
            Node::SymbolRegexp(mut s) => {
                let child = (*s.child).prune()?;
                s.child = Box::new(child);
                Some(MatchTree {
                    id,
                    node: Node::SymbolRegexp(s),
                })
            }
            node => Some(MatchTree { id, node }),
        }
    }

    /// Candidates of a matching atom for the current document.
    pub(crate) fn atom_candidates(&self) -> &[Candidate] {
        match &self.node {
            Node::Substr(s) => &s.current,
            Node::SymbolSubstr(s) => &s.substr.current,
            Node::Regexp(r) => &r.found,
            Node::SymbolRegexp(s) => &s.found,
            _ => &[],
        }
    }
}

impl fmt::Display for MatchTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |f: &mut fmt::Formatter<'_>, op: &str, children: &[MatchTree<'_>]| {
            write!(f, "{}[", op)?;
            for (i, c) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", c)?;
            }
            write!(f, "]")
        };
        let scope = |file_name: bool| if file_name { "f" } else { "" };
        match &self.node {
            Node::BruteForce(_) => write!(f, "all"),
            Node::NoMatch(why) => write!(f, "nomatch({})", why),
            Node::And(children) => list(f, "and", children),
            Node::Or(children) => list(f, "or", children),
            Node::Not(child) => write!(f, "not({})", child),
            Node::NoVisit(child) => write!(f, "novisit({})", child),
            Node::Substr(s) => write!(
                f,
                "{}substr({:?})",
                scope(s.file_name),
                String::from_utf8_lossy(&s.pattern)
            ),
            Node::SymbolSubstr(s) => write!(f, "symbol(substr({:?}))", String::from_utf8_lossy(&s.substr.pattern)),
            Node::Regexp(r) => write!(f, "{}re({})", scope(r.file_name), r.re),
            Node::SymbolRegexp(s) => write!(f, "symbol(re({}))", s.re),
            Node::Branch(b) => write!(f, "branch({:x?})", b.masks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: usize, node: Node<'_>) -> MatchTree<'_> {
        MatchTree { id, node }
    }

    #[test]
    fn prune_removes_impossible_branches() {
        let t = leaf(
            0,
            Node::And(vec![leaf(1, Node::BruteForce(DocCursor::default())), leaf(2, Node::NoMatch("freq=0"))]),
        );
        assert!(t.prune().is_none());

        let t = leaf(
            0,
            Node::Or(vec![leaf(1, Node::NoMatch("freq=0")), leaf(2, Node::BruteForce(DocCursor::default()))]),
        );
        let pruned = t.prune().unwrap();
        assert_eq!(pruned.id, 2);
        assert_eq!(pruned.to_string(), "all");

        let t = leaf(0, Node::Not(Box::new(leaf(1, Node::NoMatch("const")))));
        assert_eq!(t.prune().unwrap().to_string(), "all");
    }

    #[test]
    fn branch_atom_skips_to_matching_docs() {
        let file_masks = [0b01, 0b10, 0b11, 0b10];
        let repos = [0, 0, 0, 0];
        let mut t = leaf(0, Node::Branch(BranchAtom::new(vec![0b10], &file_masks, &repos)));
        assert_eq!(t.next_doc(), 1);
        t.prepare(1);
        assert_eq!(t.next_doc(), 2);
        t.prepare(3);
        assert_eq!(t.next_doc(), EXHAUSTED);
    }

    #[test]
    fn and_waits_for_slowest_child_or_for_fastest() {
        let file_masks = [0b01, 0b10, 0b10];
        let repos = [0, 0, 0];
        let branch = || leaf(1, Node::Branch(BranchAtom::new(vec![0b10], &file_masks, &repos)));
        let mut and = leaf(0, Node::And(vec![leaf(2, Node::BruteForce(DocCursor::default())), branch()]));
        assert_eq!(and.next_doc(), 1);
        let mut or = leaf(0, Node::Or(vec![leaf(2, Node::BruteForce(DocCursor::default())), branch()]));
        assert_eq!(or.next_doc(), 0);
    }
}
