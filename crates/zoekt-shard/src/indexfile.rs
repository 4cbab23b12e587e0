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

//! Random-access backing stores for shard files.
//!
//! Searches read through `&dyn IndexFile` from many threads at once, so
//! implementations must be safe for concurrent reads.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Result, ShardError};
use crate::toc::SimpleSection;

pub trait IndexFile: Send + Sync {
    /// Borrow `sz` bytes starting at `off`.
    fn read(&self, off: u32, sz: u32) -> Result<&[u8]>;
    fn size(&self) -> Result<u32>;
    fn name(&self) -> &str;
}

fn slice_at(data: &[u8], off: u32, sz: u32) -> Result<&[u8]> {
    let start = off as usize;
    let end = start.checked_add(sz as usize);
    match end {
        Some(end) if end <= data.len() => Ok(&data[start..end]),
        _ => Err(ShardError::OutOfBounds {
            off,
            sz,
            len: data.len(),
        }),
    }
}

fn checked_size(name: &str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        ShardError::format(
            "index file",
            format!("{}: size {} exceeds 4GiB", name, len),
        )
    })
}

/// A memory-mapped shard file.
pub struct MmapIndexFile {
    name: String,
    mmap: Option<Mmap>,
}

impl MmapIndexFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let name = path.display().to_string();
        checked_size(&name, len as usize)?;
        // mapping a zero-length file fails on some platforms
        let mmap = if len == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(MmapIndexFile { name, mmap })
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl IndexFile for MmapIndexFile {
    fn read(&self, off: u32, sz: u32) -> Result<&[u8]> {
        slice_at(self.bytes(), off, sz)
    }

    fn size(&self) -> Result<u32> {
        checked_size(&self.name, self.bytes().len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A shard held entirely in memory. Used for tests and freshly built shards.
pub struct MemIndexFile {
    name: String,
    data: Vec<u8>,
}

impl MemIndexFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        MemIndexFile {
            name: name.into(),
            data,
        }
    }
}

impl IndexFile for MemIndexFile {
    fn read(&self, off: u32, sz: u32) -> Result<&[u8]> {
        slice_at(&self.data, off, sz)
    }

    fn size(&self) -> Result<u32> {
        checked_size(&self.name, self.data.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct CachedBlock {
    off: u32,
    data: Vec<u8>,
}

/// Wraps another file and serves selected sections from owned copies, so
/// hot sections do not depend on the page cache.
pub struct CachedIndexFile {
    inner: Box<dyn IndexFile>,
    blocks: Vec<CachedBlock>,
}

impl CachedIndexFile {
    pub fn new(inner: Box<dyn IndexFile>) -> Self {
        CachedIndexFile {
            inner,
            blocks: Vec::new(),
        }
    }

    /// Copy `sec` into memory.
    pub fn cache(&mut self, sec: SimpleSection) -> Result<()> {
        let data = self.inner.read(sec.off, sec.sz)?.to_vec();
        self.blocks.push(CachedBlock { off: sec.off, data });
        Ok(())
    }

    pub fn cached_bytes(&self) -> usize {
        self.blocks.iter().map(|b| b.data.len()).sum()
    }
}

impl IndexFile for CachedIndexFile {
    fn read(&self, off: u32, sz: u32) -> Result<&[u8]> {
        for block in &self.blocks {
            if off < block.off {
                continue;
            }
            let rel = (off - block.off) as usize;
            if rel + sz as usize <= block.data.len() {
                return Ok(&block.data[rel..rel + sz as usize]);
            }
        }
        self.inner.read(off, sz)
    }

    fn size(&self) -> Result<u32> {
        self.inner.size()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
