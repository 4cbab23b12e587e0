//! Choose anchor trigrams for a substring and build its hit iterator.

use tracing::debug;

use super::hititer::{trigram_hits, DistanceIter, HitIterator, NgramDocIter};
use crate::api::Stats;
use crate::error::Result;
use crate::ngram::{generate_case_ngrams, rune_count, split_ngrams, Ngram};
use crate::posting::NgramIndex;
use crate::shard::IndexData;

/// Index of the first minimum.
fn first_minarg(xs: &[u32]) -> usize {
    let mut m = u32::MAX;
    let mut j = xs.len();
    for (i, &x) in xs.iter().enumerate() {
        if x < m {
            m = x;
            j = i;
        }
    }
    j
}

/// Index of the last minimum.
fn last_minarg(xs: &[u32]) -> usize {
    let mut m = u32::MAX;
    let mut j = xs.len();
    for (i, &x) in xs.iter().enumerate() {
        if x <= m {
            m = x;
            j = i;
        }
    }
    j
}

impl IndexData {
    fn ngram_index(&self, file_name: bool) -> &dyn NgramIndex {
        if file_name {
            self.file_name_ngrams.as_ref()
        } else {
            self.ngrams.as_ref()
        }
    }

    fn ngram_frequency(&self, ng: Ngram, file_name: bool) -> Result<u32> {
        self.ngram_index(file_name).frequency(ng)
    }

    /// `false` when some trigram of a case-sensitive pattern is absent.
    /// One batched probe instead of a frequency lookup per trigram.
    fn all_ngrams_present(&self, ngrams: &[Ngram], file_name: bool, stats: &mut Stats) -> Result<bool> {
        let mut sorted = ngrams.to_vec();
        sorted.sort();
        sorted.dedup();
        let (found, probes) = self.ngram_index(file_name).ngram_indexes(&sorted)?;
        stats.ngram_lookups += probes;
        debug!(ngrams = sorted.len(), found = found.len(), probes, "ngram lookup");
        Ok(found.len() == sorted.len())
    }

    /// Candidate iterator for a substring of at least three runes, or `None`
    /// when some trigram never occurs in the corpus.
    pub(crate) fn iterate_ngrams(
        &self,
        pattern: &str,
        case_sensitive: bool,
        file_name: bool,
        stats: &mut Stats,
    ) -> Result<Option<NgramDocIter<'_>>> {
        let offs = split_ngrams(pattern.as_bytes());
        if case_sensitive {
            let ngrams: Vec<Ngram> = offs.iter().map(|o| o.ngram).collect();
            if !self.all_ngrams_present(&ngrams, file_name, stats)? {
                debug!(pattern, "freq=0");
                return Ok(None);
            }
        }

        let mut frequencies = Vec::with_capacity(offs.len());
        for o in &offs {
            let freq = if case_sensitive {
                self.ngram_frequency(o.ngram, file_name)?
            } else {
                let mut sum = 0u32;
                for v in generate_case_ngrams(o.ngram) {
                    sum = sum.saturating_add(self.ngram_frequency(v, file_name)?);
                }
                sum
            };
            if freq == 0 {
                debug!(pattern, ngram = %o.ngram, "freq=0");
                return Ok(None);
            }
            frequencies.push(freq);
        }

        let mut first = first_minarg(&frequencies);
        frequencies[first] = u32::MAX;
        let mut last = last_minarg(&frequencies);
        if first > last {
            std::mem::swap(&mut first, &mut last);
        }

        let runes = rune_count(pattern.as_bytes()) as u32;
        let ends = if file_name {
            &self.file_name_end_runes
        } else {
            &self.file_end_runes
        };
        let index = self.ngram_index(file_name);
        let file = self.file.as_ref();

        let iter: Box<dyn HitIterator> = if first != last {
            let i1 = trigram_hits(file, index, offs[first].ngram, case_sensitive, stats)?;
            let i2 = trigram_hits(file, index, offs[last].ngram, case_sensitive, stats)?;
            Box::new(DistanceIter::new(i1, i2, (last - first) as u32))
        } else {
            trigram_hits(file, index, offs[last].ngram, case_sensitive, stats)?
        };
        debug!(pattern, first = %offs[first].ngram, last = %offs[last].ngram, "anchors");
        Ok(Some(NgramDocIter::new(first as u32, runes - first as u32, iter, ends)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minargs_break_ties_differently() {
        let xs = [3, 1, 2, 1];
        assert_eq!(first_minarg(&xs), 1);
        assert_eq!(last_minarg(&xs), 3);
        assert_eq!(first_minarg(&[]), 0);
        // a single trigram: the second pick lands on the same slot
        let mut one = [7u32];
        let f = first_minarg(&one);
        one[f] = u32::MAX;
        assert_eq!(last_minarg(&one), 0);
    }
}
