//! Extendible hash set of fingerprints.
//!
//! The directory lives in memory and maps the low `global_depth` bits of a
//! fingerprint to a bucket page. Buckets are fixed-size pages held by a
//! [`BufferPool`], so an index larger than the pool spills to the page store.
//! A full bucket splits on its next local bit; when its local depth already
//! equals the global depth the directory doubles first.

use crate::buffer_pool::{BufferPool, PoolStats};
use crate::page::{BucketPage, Fingerprint};
use crate::storage_manager::{open_page_store, PageStore};
use common::config::Config;
use common::ids::PageId;
use common::{EngineError, MAX_PAGE_SIZE};
use std::mem;

/// Deepest directory the index grows to (16M slots).
pub const MAX_GLOBAL_DEPTH: u16 = 24;

pub struct ExtendibleHashIndex {
    pool: BufferPool,
    directory: Vec<PageId>,
    global_depth: u16,
    bucket_capacity: usize,
    len: usize,
}

impl ExtendibleHashIndex {
    /// Creates an index with one empty bucket.
    ///
    /// # Arguments
    ///
    /// * `store` - Where evicted bucket pages go.
    /// * `pool_pages` - Bucket pages kept in memory.
    /// * `page_size` - Bytes per bucket page.
    pub fn new(
        store: Box<dyn PageStore>,
        pool_pages: usize,
        page_size: usize,
    ) -> Result<Self, EngineError> {
        if page_size > MAX_PAGE_SIZE {
            return Err(EngineError::ValidationError(format!(
                "page size {} is larger than {}",
                page_size, MAX_PAGE_SIZE
            )));
        }
        let bucket_capacity = BucketPage::capacity(page_size);
        if bucket_capacity == 0 {
            return Err(EngineError::ValidationError(format!(
                "page size {} cannot hold a bucket entry",
                page_size
            )));
        }
        let mut pool = BufferPool::new(store, pool_pages, page_size);
        let root = pool.new_page(0)?;
        Ok(ExtendibleHashIndex {
            pool,
            directory: vec![root],
            global_depth: 0,
            bucket_capacity,
            len: 0,
        })
    }

    /// Creates an index sized and backed as the config says.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let store = open_page_store(config)?;
        Self::new(store, config.buffer_pool_pages, config.page_size)
    }

    fn slot(&self, fp: &Fingerprint) -> usize {
        let mask = (1u64 << self.global_depth) - 1;
        (fp.lo & mask) as usize
    }

    /// Checks whether the fingerprint is in the set.
    pub fn contains(&mut self, fp: &Fingerprint) -> Result<bool, EngineError> {
        let page_id = self.directory[self.slot(fp)];
        Ok(self.pool.fetch_page(page_id)?.contains(fp))
    }

    /// Adds the fingerprint. Returns false when it was already present.
    pub fn insert(&mut self, fp: Fingerprint) -> Result<bool, EngineError> {
        loop {
            let slot = self.slot(&fp);
            let page_id = self.directory[slot];
            let page = self.pool.fetch_page(page_id)?;
            if page.contains(&fp) {
                return Ok(false);
            }
            if page.len() < self.bucket_capacity {
                self.pool.fetch_page_mut(page_id)?.entries.push(fp);
                self.len += 1;
                return Ok(true);
            }
            self.split(slot)?;
        }
    }

    /*  split
     *      purpose: make room in the bucket the directory slot points at
     *  inputs:
     *      slot: a directory slot pointing at a full bucket
     *  outputs:
     *      () once the bucket's entries are spread over two buckets, or an
     *      error if the directory cannot grow any further
     */
    fn split(&mut self, slot: usize) -> Result<(), EngineError> {
        let old_id = self.directory[slot];
        let local_depth = self.pool.fetch_page(old_id)?.local_depth;
        if local_depth == self.global_depth {
            if self.global_depth >= MAX_GLOBAL_DEPTH {
                return Err(EngineError::ExecutionError(format!(
                    "hash index directory cannot grow past depth {}",
                    MAX_GLOBAL_DEPTH
                )));
            }
            let copy = self.directory.clone();
            self.directory.extend(copy);
            self.global_depth += 1;
            debug!("hash index directory doubled to depth {}", self.global_depth);
        }

        let new_depth = local_depth + 1;
        let entries = {
            let old = self.pool.fetch_page_mut(old_id)?;
            old.local_depth = new_depth;
            mem::take(&mut old.entries)
        };
        let new_id = self.pool.new_page(new_depth)?;
        let bit = 1u64 << local_depth;
        let (moved, kept): (Vec<Fingerprint>, Vec<Fingerprint>) =
            entries.into_iter().partition(|fp| fp.lo & bit != 0);
        self.pool.fetch_page_mut(old_id)?.entries = kept;
        self.pool.fetch_page_mut(new_id)?.entries = moved;

        for (i, page_id) in self.directory.iter_mut().enumerate() {
            if *page_id == old_id && (i as u64) & bit != 0 {
                *page_id = new_id;
            }
        }
        Ok(())
    }

    /// Number of fingerprints in the set.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn global_depth(&self) -> u16 {
        self.global_depth
    }

    /// Bucket pages allocated, resident or spilled.
    pub fn num_pages(&self) -> PageId {
        self.pool.num_pages()
    }

    /// Whether any bucket page has been evicted from memory.
    pub fn has_spilled(&self) -> bool {
        self.pool.stats().evictions > 0
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Empties the set, keeping the page store for reuse.
    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.pool.clear();
        let root = self.pool.new_page(0)?;
        self.directory = vec![root];
        self.global_depth = 0;
        self.len = 0;
        Ok(())
    }
}
