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

//! Per-document content access for the match tree, and conversion of
//! verified candidates into line matches. File names and contents go through
//! the same code; a file name is a one-line document.

use crate::api::{DocumentSection, LineFragmentMatch, LineMatch, Stats};
use crate::error::Result;
use crate::ngram::{case_folding_equals, decode_rune};
use crate::runeoffset::RUNE_OFFSET_FREQUENCY;
use crate::shard::IndexData;

/// A possible match inside the current document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub(crate) file_name: bool,
    /// Rune offset from the start of the document (trigram candidates only).
    pub(crate) rune_offset: u32,
    pub(crate) byte_offset: u32,
    pub(crate) byte_match_sz: u32,
    /// Index into the document's symbol sections.
    pub(crate) symbol: Option<u32>,
}

impl Candidate {
    /// Compare the pattern against `data` at `byte_offset`, setting the
    /// matched size on success.
    pub(crate) fn verify(&mut self, data: &[u8], pattern: &[u8], lowered: &[u8], case_sensitive: bool) -> bool {
        let Some(rest) = data.get(self.byte_offset as usize..) else {
            return false;
        };
        if case_sensitive {
            if rest.starts_with(pattern) {
                self.byte_match_sz = pattern.len() as u32;
                return true;
            }
            return false;
        }
        match case_folding_equals(lowered, rest) {
            Some(sz) => {
                self.byte_match_sz = sz as u32;
                true
            }
            None => false,
        }
    }
}

/// Newline offsets of one document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Newlines {
    pub(crate) locs: Vec<u32>,
    pub(crate) file_size: u32,
}

impl Newlines {
    /// 1-based line containing `offset`, with its `[start, end)` bounds. An
    /// offset on a newline belongs to the line the newline ends.
    pub(crate) fn at_offset(&self, offset: u32) -> (usize, u32, u32) {
        let idx = self.locs.partition_point(|&l| l < offset);
        let (start, end) = self.line_bounds(idx as i64 + 1);
        (idx + 1, start, end)
    }

    /// Byte bounds of 1-based `line`, excluding the newline. Out-of-range
    /// lines clamp to `[0, file_size]`.
    pub(crate) fn line_bounds(&self, line: i64) -> (u32, u32) {
        let n = self.locs.len() as i64;
        let start_idx = line - 2;
        let end_idx = line - 1;
        let start = if start_idx < 0 {
            0
        } else if start_idx >= n {
            self.file_size
        } else {
            self.locs[start_idx as usize] + 1
        };
        let end = if end_idx < 0 {
            0
        } else if end_idx >= n {
            self.file_size
        } else {
            self.locs[end_idx as usize]
        };
        (start, end)
    }

    /// Lines `[low, high)` of `data`, 1-based.
    pub(crate) fn get_lines<'d>(&self, data: &'d [u8], low: i64, high: i64) -> &'d [u8] {
        if low >= high {
            return &[];
        }
        let (start, _) = self.line_bounds(low);
        let (_, end) = self.line_bounds(high - 1);
        data.get(start as usize..end as usize).unwrap_or(&[])
    }
}

/// Index of the section that contains `[off, off + sz)`.
pub(crate) fn find_section(secs: &[DocumentSection], off: u32, sz: u32) -> Option<usize> {
    let end = off + sz;
    let j = secs.partition_point(|s| s.end < end);
    let sec = secs.get(j)?;
    (sec.start <= off && end <= sec.end).then_some(j)
}

/// Split a candidate at every newline it spans, dropping empty pieces.
pub(crate) fn break_on_newlines(cm: Candidate, text: &[u8]) -> Vec<Candidate> {
    let mut out = Vec::new();
    let end = cm.byte_offset + cm.byte_match_sz;
    let mut piece = cm;
    for i in cm.byte_offset..end {
        if text.get(i as usize) == Some(&b'\n') {
            piece.byte_match_sz = i - piece.byte_offset;
            if piece.byte_match_sz != 0 {
                out.push(piece);
            }
            piece = cm;
            piece.byte_offset = i + 1;
        }
    }
    piece.byte_match_sz = end - piece.byte_offset;
    if piece.byte_match_sz != 0 {
        out.push(piece);
    }
    out
}

/// Lazily loaded view of the document under evaluation.
pub(crate) struct ContentProvider<'a> {
    pub(crate) index: &'a IndexData,
    pub(crate) stats: Stats,
    doc: u32,
    file_size: u32,
    data: Option<&'a [u8]>,
    newlines: Option<Newlines>,
    sections: Option<Vec<DocumentSection>>,
}

impl<'a> ContentProvider<'a> {
    pub(crate) fn new(index: &'a IndexData) -> Self {
        ContentProvider {
            index,
            stats: Stats::default(),
            doc: 0,
            file_size: 0,
            data: None,
            newlines: None,
            sections: None,
        }
    }

    pub(crate) fn set_document(&mut self, doc: u32) {
        let b = &self.index.boundaries;
        self.doc = doc;
        self.file_size = b[doc as usize + 1] - b[doc as usize];
        self.data = None;
        self.newlines = None;
        self.sections = None;
    }

    pub(crate) fn doc(&self) -> u32 {
        self.doc
    }

    pub(crate) fn data(&mut self, file_name: bool) -> Result<&'a [u8]> {
        if file_name {
            return Ok(self.index.file_name(self.doc));
        }
        if let Some(d) = self.data {
            return Ok(d);
        }
        let d = self.index.read_contents(self.doc)?;
        self.stats.files_loaded += 1;
        self.stats.content_bytes_loaded += d.len() as i64;
        self.data = Some(d);
        Ok(d)
    }

    pub(crate) fn newlines(&mut self) -> Result<&Newlines> {
        if self.newlines.is_none() {
            let (locs, sz) = self.index.read_newlines(self.doc)?;
            self.stats.content_bytes_loaded += sz as i64;
            self.newlines = Some(Newlines {
                locs,
                file_size: self.file_size,
            });
        }
        Ok(self.newlines.get_or_insert_with(Newlines::default))
    }

    pub(crate) fn doc_sections(&mut self) -> Result<&[DocumentSection]> {
        if self.sections.is_none() {
            let (secs, sz) = self.index.read_doc_sections(self.doc)?;
            self.stats.content_bytes_loaded += sz as i64;
            self.sections = Some(secs);
        }
        Ok(self.sections.get_or_insert_with(Vec::new))
    }

    /// Byte offset within the document of doc-relative rune `r`.
    pub(crate) fn find_offset(&mut self, file_name: bool, r: u32) -> Result<u32> {
        let ix = self.index;
        if ix.meta_data.plain_ascii {
            return Ok(r);
        }
        let i = self.doc as usize;
        let (samples, ends, doc_start) = if file_name {
            (&ix.file_name_rune_offsets, &ix.file_name_end_runes, ix.file_name_index[i])
        } else {
            (&ix.rune_offsets, &ix.file_end_runes, ix.boundaries[i])
        };
        let abs = if i > 0 { r + ends[i - 1] } else { r };
        let (mut byte_off, mut left) = samples.lookup(abs);

        let mut data: &[u8] = if file_name {
            ix.file_name_content.get(byte_off as usize..).unwrap_or(&[])
        } else {
            ix.read_content_slice(byte_off, 4 * RUNE_OFFSET_FREQUENCY)?
        };
        while left > 0 && !data.is_empty() {
            let (_, sz) = decode_rune(data);
            byte_off += sz as u32;
            data = &data[sz..];
            left -= 1;
        }
        Ok(byte_off - doc_start)
    }

    /// Line matches for merged, sorted candidates. File name candidates
    /// produce a single line holding the name.
    pub(crate) fn fill_matches(&mut self, ms: &[Candidate], context_lines: usize) -> Result<Vec<LineMatch>> {
        let Some(first) = ms.first() else {
            return Ok(Vec::new());
        };
        if first.file_name {
            let name = self.index.file_name(self.doc);
            let line_fragments = ms
                .iter()
                .map(|m| LineFragmentMatch {
                    offset: m.byte_offset,
                    line_offset: m.byte_offset as usize,
                    match_length: m.byte_match_sz as usize,
                    symbol_info: None,
                })
                .collect();
            return Ok(vec![LineMatch {
                line: name.to_vec(),
                file_name: true,
                line_fragments,
                ..Default::default()
            }]);
        }
        let data = self.data(false)?;
        let split: Vec<Candidate> = ms.iter().flat_map(|&m| break_on_newlines(m, data)).collect();
        self.fill_content_matches(&split, context_lines)
    }

    fn fill_content_matches(&mut self, mut ms: &[Candidate], context_lines: usize) -> Result<Vec<LineMatch>> {
        let data = self.data(false)?;
        let mut result = Vec::new();
        while let Some(m) = ms.first() {
            let (num, line_start, mut line_end) = self.newlines()?.at_offset(m.byte_offset);

            let mut end_match = m.byte_offset + m.byte_match_sz;
            let taken = ms.iter().take_while(|c| c.byte_offset <= line_end).count().max(1);
            let (line_cands, rest) = ms.split_at(taken);
            if let Some(last) = line_cands.last() {
                end_match = end_match.max(last.byte_offset + last.byte_match_sz);
            }
            ms = rest;

            // a merged match may run past the end of its first line
            while (line_end as usize) < data.len() && end_match > line_end {
                match data[line_end as usize + 1..].iter().position(|&b| b == b'\n') {
                    Some(next) => line_end += next as u32 + 1,
                    None => line_end = data.len() as u32,
                }
            }

            let mut lm = LineMatch {
                line: data.get(line_start as usize..line_end as usize).unwrap_or(&[]).to_vec(),
                line_start: line_start as usize,
                line_end: line_end as usize,
                line_number: num,
                ..Default::default()
            };
            if context_lines > 0 {
                let nl = self.newlines()?;
                let (num, ctx) = (num as i64, context_lines as i64);
                lm.before = nl.get_lines(data, num - ctx, num).to_vec();
                lm.after = nl.get_lines(data, num + 1, num + 1 + ctx).to_vec();
            }

            for c in line_cands {
                let symbol_info = match c.symbol {
                    Some(idx) => self.symbol_info(idx, data)?,
                    None => None,
                };
                lm.line_fragments.push(LineFragmentMatch {
                    offset: c.byte_offset,
                    line_offset: (c.byte_offset - line_start) as usize,
                    match_length: c.byte_match_sz as usize,
                    symbol_info,
                });
            }
            result.push(lm);
        }
        Ok(result)
    }

    fn symbol_info(&mut self, idx: u32, data: &[u8]) -> Result<Option<crate::api::Symbol>> {
        let first = self.index.file_end_symbol.get(self.doc as usize).copied().unwrap_or(0);
        let Some(mut sym) = self.index.symbols.data(first + idx) else {
            return Ok(None);
        };
        if let Some(sec) = self.doc_sections()?.get(idx as usize) {
            sym.sym = String::from_utf8_lossy(data.get(sec.start as usize..sec.end as usize).unwrap_or(&[]))
                .into_owned();
        }
        Ok(Some(sym))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn newlines_of(data: &[u8]) -> Newlines {
        Newlines {
            locs: data
                .iter()
                .enumerate()
                .filter(|(_, &b)| b == b'\n')
                .map(|(i, _)| i as u32)
                .collect(),
            file_size: data.len() as u32,
        }
    }

    #[test]
    fn at_offset_finds_line_and_bounds() {
        let nl = newlines_of(b"0.2.4.\n7.9.11.\n");
        assert_eq!(nl.at_offset(0), (1, 0, 6));
        assert_eq!(nl.at_offset(6), (1, 0, 6));
        assert_eq!(nl.at_offset(7), (2, 7, 14));
        assert_eq!(nl.at_offset(15), (3, 15, 15));
    }

    #[test]
    fn line_bounds_clamp() {
        let nl = newlines_of(b"ab\ncd\n");
        assert_eq!(nl.line_bounds(0), (0, 0));
        assert_eq!(nl.line_bounds(-3), (0, 0));
        assert_eq!(nl.line_bounds(2), (3, 5));
        assert_eq!(nl.line_bounds(9), (6, 6));
    }

    #[test]
    fn get_lines_spans_context() {
        let data = b"one\ntwo\nthree\nfour";
        let nl = newlines_of(data);
        assert_eq!(nl.get_lines(data, 1, 3), b"one\ntwo");
        assert_eq!(nl.get_lines(data, 4, 6), b"four");
        assert!(nl.get_lines(data, 3, 3).is_empty());
    }

    #[test]
    fn breaks_matches_on_newlines() {
        let text = b"ab\ncd\n\nef";
        let cm = Candidate {
            byte_offset: 1,
            byte_match_sz: 8,
            ..Default::default()
        };
        let got: Vec<(u32, u32)> = break_on_newlines(cm, text)
            .into_iter()
            .map(|c| (c.byte_offset, c.byte_match_sz))
            .collect();
        assert_eq!(got, vec![(1, 1), (3, 2), (7, 2)]);
    }

    #[test]
    fn find_section_requires_containment() {
        let secs = [
            DocumentSection { start: 0, end: 5 },
            DocumentSection { start: 10, end: 20 },
        ];
        assert_eq!(find_section(&secs, 1, 3), Some(0));
        assert_eq!(find_section(&secs, 12, 8), Some(1));
        assert_eq!(find_section(&secs, 4, 3), None);
        assert_eq!(find_section(&secs, 21, 1), None);
    }

    #[test]
    fn verify_case_folds() {
        let mut c = Candidate {
            byte_offset: 2,
            ..Default::default()
        };
        assert!(c.verify(b"xxHeLLo", b"hello", b"hello", false));
        assert_eq!(c.byte_match_sz, 5);
        assert!(!c.verify(b"xxHeLLo", b"hello", b"hello", true));
        let mut kelvin = Candidate::default();
        assert!(kelvin.verify("\u{212A}ey".as_bytes(), b"key", b"key", false));
        assert_eq!(kelvin.byte_match_sz, 5);
    }
}
