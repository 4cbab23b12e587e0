use std::collections::HashMap;

use super::{NgramIndex, PostingOffsets};
use crate::error::Result;
use crate::indexfile::IndexFile;
use crate::ngram::{Ngram, NGRAM_ENCODING};
use crate::toc::SimpleSection;

/// Every ngram decoded into a hash map at load time.
pub struct MapNgramIndex {
    ranks: HashMap<Ngram, u32>,
    offsets: PostingOffsets,
}

impl MapNgramIndex {
    pub(crate) fn open(
        file: &dyn IndexFile,
        text: SimpleSection,
        offsets: PostingOffsets,
    ) -> Result<Self> {
        let blob = file.read(text.off, text.sz)?;
        let ranks = blob
            .chunks_exact(NGRAM_ENCODING)
            .enumerate()
            .map(|(i, b)| (Ngram::from_be_bytes(b), i as u32))
            .collect();
        Ok(MapNgramIndex { ranks, offsets })
    }
}

impl NgramIndex for MapNgramIndex {
    fn rank(&self, ng: Ngram) -> Result<Option<usize>> {
        Ok(self.ranks.get(&ng).map(|&i| i as usize))
    }

    fn posting_list(&self, index: usize) -> SimpleSection {
        self.offsets.section(index)
    }

    fn ngram_indexes(&self, ngrams: &[Ngram]) -> Result<(Vec<usize>, usize)> {
        let mut out = Vec::with_capacity(ngrams.len());
        let mut probes = 0;
        for ng in ngrams {
            probes += 1;
            match self.ranks.get(ng) {
                Some(&i) => out.push(i as usize),
                None => break,
            }
        }
        Ok((out, probes))
    }

    fn len(&self) -> usize {
        self.ranks.len()
    }

    fn size_bytes(&self) -> usize {
        12 * self.ranks.len() + self.offsets.size_bytes()
    }
}
