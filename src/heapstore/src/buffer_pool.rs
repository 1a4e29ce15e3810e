use crate::page::BucketPage;
use crate::storage_manager::PageStore;
use common::ids::PageId;
use common::EngineError;
use std::collections::HashMap;

struct Frame {
    page: BucketPage,
    dirty: bool,
    last_used: u64,
}

/// Counters describing how the pool has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub write_backs: u64,
}

/// Holds up to `capacity` bucket pages in memory. When full, the least
/// recently used page is evicted, and written to the page store first if it
/// was modified.
pub struct BufferPool {
    store: Box<dyn PageStore>,
    frames: HashMap<PageId, Frame>,
    capacity: usize,
    page_size: usize,
    next_page_id: PageId,
    clock: u64,
    stats: PoolStats,
}

impl BufferPool {
    /// Creates an empty pool.
    ///
    /// # Arguments
    ///
    /// * `store` - Where evicted pages go.
    /// * `capacity` - Pages kept in memory, at least 2.
    /// * `page_size` - Bytes per page in the store.
    pub fn new(store: Box<dyn PageStore>, capacity: usize, page_size: usize) -> Self {
        BufferPool {
            store,
            frames: HashMap::new(),
            capacity: capacity.max(2),
            page_size,
            next_page_id: 0,
            clock: 0,
            stats: PoolStats::default(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Pages currently held in memory.
    pub fn resident(&self) -> usize {
        self.frames.len()
    }

    /// Pages allocated so far, resident or not.
    pub fn num_pages(&self) -> PageId {
        self.next_page_id
    }

    /// Reads and writes served by the page store.
    pub fn store_read_write_count(&self) -> (u64, u64) {
        self.store.read_write_count()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_one(&mut self) -> Result<(), EngineError> {
        let victim = self
            .frames
            .iter()
            .min_by_key(|(_, f)| f.last_used)
            .map(|(id, _)| *id);
        let victim = match victim {
            Some(id) => id,
            None => return Ok(()),
        };
        if let Some(frame) = self.frames.remove(&victim) {
            self.stats.evictions += 1;
            if frame.dirty {
                let bytes = frame.page.to_bytes(self.page_size)?;
                self.store.write_page(victim, &bytes)?;
                self.stats.write_backs += 1;
            }
            trace!("evicted page {} (dirty: {})", victim, frame.dirty);
        }
        Ok(())
    }

    fn make_room(&mut self) -> Result<(), EngineError> {
        while self.frames.len() >= self.capacity {
            self.evict_one()?;
        }
        Ok(())
    }

    /// Allocates a new empty page. The page starts resident and dirty.
    ///
    /// # Arguments
    ///
    /// * `local_depth` - Local depth of the new bucket.
    pub fn new_page(&mut self, local_depth: u16) -> Result<PageId, EngineError> {
        self.make_room()?;
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        let last_used = self.tick();
        self.frames.insert(
            page_id,
            Frame {
                page: BucketPage::new(page_id, local_depth),
                dirty: true,
                last_used,
            },
        );
        Ok(page_id)
    }

    fn load(&mut self, page_id: PageId) -> Result<(), EngineError> {
        if page_id >= self.next_page_id {
            return Err(EngineError::InternalError(format!(
                "page {} was never allocated",
                page_id
            )));
        }
        if self.frames.contains_key(&page_id) {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
            self.make_room()?;
            let bytes = self.store.read_page(page_id)?;
            let page = BucketPage::from_bytes(&bytes)?;
            self.frames.insert(
                page_id,
                Frame {
                    page,
                    dirty: false,
                    last_used: 0,
                },
            );
        }
        let now = self.tick();
        if let Some(frame) = self.frames.get_mut(&page_id) {
            frame.last_used = now;
        }
        Ok(())
    }

    /// Gets a page for reading, loading it from the store if needed.
    pub fn fetch_page(&mut self, page_id: PageId) -> Result<&BucketPage, EngineError> {
        self.load(page_id)?;
        self.frames
            .get(&page_id)
            .map(|f| &f.page)
            .ok_or_else(|| EngineError::InternalError(format!("page {} not resident", page_id)))
    }

    /// Gets a page for writing; the page is written back when evicted.
    pub fn fetch_page_mut(&mut self, page_id: PageId) -> Result<&mut BucketPage, EngineError> {
        self.load(page_id)?;
        match self.frames.get_mut(&page_id) {
            Some(frame) => {
                frame.dirty = true;
                Ok(&mut frame.page)
            }
            None => Err(EngineError::InternalError(format!(
                "page {} not resident",
                page_id
            ))),
        }
    }

    /// Drops every page. Page ids are reused afterwards.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.next_page_id = 0;
    }
}
