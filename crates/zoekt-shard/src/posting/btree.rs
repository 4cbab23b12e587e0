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

use std::sync::Arc;

use super::{NgramIndex, PostingOffsets};
use crate::error::Result;
use crate::indexfile::IndexFile;
use crate::ngram::{Ngram, NGRAM_ENCODING};
use crate::toc::SimpleSection;

/// Ngrams per bucket; a bucket is read with one page-sized access.
pub const BTREE_BUCKET_SIZE: usize = (4096 * 2) / NGRAM_ENCODING;

/// The ngram table split into fixed-size buckets. Only the first key of each
/// bucket is resident; a lookup binary searches the keys, reads one bucket
/// from the backing store and binary searches inside it.
pub struct BtreeNgramIndex {
    file: Arc<dyn IndexFile>,
    text: SimpleSection,
    count: usize,
    bucket_size: usize,
    first_keys: Vec<Ngram>,
    offsets: PostingOffsets,
}

impl BtreeNgramIndex {
    pub(crate) fn open(
        file: Arc<dyn IndexFile>,
        text: SimpleSection,
        count: usize,
        offsets: PostingOffsets,
    ) -> Result<Self> {
        Self::with_bucket_size(file, text, count, offsets, BTREE_BUCKET_SIZE)
    }

    fn with_bucket_size(
        file: Arc<dyn IndexFile>,
        text: SimpleSection,
        count: usize,
        offsets: PostingOffsets,
        bucket_size: usize,
    ) -> Result<Self> {
        let blob = file.read(text.off, text.sz)?;
        let first_keys = (0..count)
            .step_by(bucket_size)
            .map(|i| Ngram::from_be_bytes(&blob[i * NGRAM_ENCODING..]))
            .collect();
        Ok(BtreeNgramIndex {
            file,
            text,
            count,
            bucket_size,
            first_keys,
            offsets,
        })
    }

    fn bucket_for(&self, ng: Ngram) -> Option<usize> {
        self.first_keys
            .partition_point(|k| *k <= ng)
            .checked_sub(1)
    }

    fn read_bucket(&self, bucket: usize) -> Result<&[u8]> {
        let start = bucket * self.bucket_size;
        let n = self.bucket_size.min(self.count - start);
        self.file.read(
            self.text.off + (start * NGRAM_ENCODING) as u32,
            (n * NGRAM_ENCODING) as u32,
        )
    }

    fn search_bucket(&self, bucket: usize, data: &[u8], ng: Ngram) -> Option<usize> {
        let n = data.len() / NGRAM_ENCODING;
        let at = |i: usize| Ngram::from_be_bytes(&data[i * NGRAM_ENCODING..]);
        let (mut lo, mut hi) = (0usize, n);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if at(mid) < ng {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        (lo < n && at(lo) == ng).then_some(bucket * self.bucket_size + lo)
    }
}

impl NgramIndex for BtreeNgramIndex {
    fn rank(&self, ng: Ngram) -> Result<Option<usize>> {
        let Some(bucket) = self.bucket_for(ng) else {
            return Ok(None);
        };
        let data = self.read_bucket(bucket)?;
        Ok(self.search_bucket(bucket, data, ng))
    }

    fn posting_list(&self, index: usize) -> SimpleSection {
        self.offsets.section(index)
    }

    /// Sorted input lets consecutive ngrams share one bucket read; the probe
    /// count is the number of buckets read.
    fn ngram_indexes(&self, ngrams: &[Ngram]) -> Result<(Vec<usize>, usize)> {
        let mut out = Vec::with_capacity(ngrams.len());
        let mut probes = 0;
        let mut loaded: Option<(usize, &[u8])> = None;
        for &ng in ngrams {
            let Some(bucket) = self.bucket_for(ng) else {
                break;
            };
            let data = match loaded {
                Some((b, data)) if b == bucket => data,
                _ => {
                    probes += 1;
                    let data = self.read_bucket(bucket)?;
                    loaded = Some((bucket, data));
                    data
                }
            };
            match self.search_bucket(bucket, data, ng) {
                Some(i) => out.push(i),
                None => break,
            }
        }
        Ok((out, probes))
    }

    fn len(&self) -> usize {
        self.count
    }

    fn size_bytes(&self) -> usize {
        NGRAM_ENCODING * self.first_keys.len() + self.offsets.size_bytes() + 4 * 8
    }
}
