use crate::heapfile::HeapFile;
use common::config::Config;
use common::ids::PageId;
use common::EngineError;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Where the buffer pool sends pages it evicts and reads them back from.
pub trait PageStore: Send {
    /// Reads a page previously written.
    fn read_page(&mut self, page_id: PageId) -> Result<Vec<u8>, EngineError>;

    /// Writes a page, replacing any earlier version.
    fn write_page(&mut self, page_id: PageId, bytes: &[u8]) -> Result<(), EngineError>;

    /// Pages read and written so far.
    fn read_write_count(&self) -> (u64, u64);
}

/// Keeps evicted pages in memory. Used when spilling to disk is disabled.
#[derive(Default)]
pub struct MemoryPageStore {
    pages: HashMap<PageId, Vec<u8>>,
    reads: u64,
    writes: u64,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for MemoryPageStore {
    fn read_page(&mut self, page_id: PageId) -> Result<Vec<u8>, EngineError> {
        self.reads += 1;
        self.pages
            .get(&page_id)
            .cloned()
            .ok_or_else(|| EngineError::InternalError(format!("page {} was never written", page_id)))
    }

    fn write_page(&mut self, page_id: PageId, bytes: &[u8]) -> Result<(), EngineError> {
        self.writes += 1;
        self.pages.insert(page_id, bytes.to_vec());
        Ok(())
    }

    fn read_write_count(&self) -> (u64, u64) {
        (self.reads, self.writes)
    }
}

/// Keeps evicted pages in a spill file that is removed when the store is
/// dropped. The file is only created when the first page is written.
pub struct FilePageStore {
    dir: PathBuf,
    page_size: usize,
    hf: Option<HeapFile>,
}

impl FilePageStore {
    /*  new
     *      purpose: prepare a spill store in dir without touching the disk
     *  Inputs:
     *      dir: the directory holding spill files, created on first write
     *      page_size: the size of every page
     *  Outputs:
     *      the store
     */
    pub fn new(dir: &PathBuf, page_size: usize) -> Self {
        FilePageStore {
            dir: dir.clone(),
            page_size,
            hf: None,
        }
    }

    /// Path of the spill file, once it exists.
    pub fn path(&self) -> Option<&PathBuf> {
        self.hf.as_ref().map(|hf| &hf.path)
    }

    /*  open
     *      purpose: create the spill file with a random name on first use
     *  Outputs:
     *      the heap file backing the store, or an IO error
     */
    fn open(&mut self) -> Result<&HeapFile, EngineError> {
        if self.hf.is_none() {
            fs::create_dir_all(&self.dir)?;
            let mut path = self.dir.clone();
            let suffix: String = thread_rng()
                .sample_iter(Alphanumeric)
                .take(12)
                .map(char::from)
                .collect();
            path.push(format!("distinct-{}", suffix));
            path.set_extension("spill");
            debug!("Making new spill file {:?}", path);
            self.hf = Some(HeapFile::new(path, self.page_size)?);
        }
        self.hf
            .as_ref()
            .ok_or_else(|| EngineError::InternalError(String::from("spill file missing")))
    }
}

impl PageStore for FilePageStore {
    fn read_page(&mut self, page_id: PageId) -> Result<Vec<u8>, EngineError> {
        match &self.hf {
            Some(hf) => hf.read_page_from_file(page_id),
            None => Err(EngineError::InternalError(format!(
                "page {} was never written",
                page_id
            ))),
        }
    }

    fn write_page(&mut self, page_id: PageId, bytes: &[u8]) -> Result<(), EngineError> {
        self.open()?.write_page_to_file(page_id, bytes)
    }

    fn read_write_count(&self) -> (u64, u64) {
        self.hf.as_ref().map_or((0, 0), |hf| hf.read_write_count())
    }
}

impl Drop for FilePageStore {
    fn drop(&mut self) {
        if let Some(hf) = &self.hf {
            if let Err(e) = fs::remove_file(&hf.path) {
                warn!("could not remove spill file {:?}: {}", hf.path, e);
            }
        }
    }
}

/// Opens the page store the config asks for.
///
/// # Arguments
///
/// * `config` - Decides between a spill file and memory.
pub fn open_page_store(config: &Config) -> Result<Box<dyn PageStore>, EngineError> {
    if config.spill_to_disk {
        Ok(Box::new(FilePageStore::new(
            &config.spill_dir,
            config.page_size,
        )))
    } else {
        Ok(Box::new(MemoryPageStore::new()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::testutil::*;
    use temp_testdir::TempDir;

    #[test]
    fn hs_sm_file_store_removed_on_drop() {
        init();
        let tdir = TempDir::new(gen_random_dir(), true);
        let mut store = FilePageStore::new(&tdir.to_path_buf(), 64);
        assert!(store.path().is_none());
        assert!(store.read_page(0).is_err());
        store.write_page(0, &[7; 64]).unwrap();
        let path = store.path().unwrap().clone();
        assert_eq!(vec![7; 64], store.read_page(0).unwrap());
        assert!(path.exists());
        drop(store);
        assert!(!path.exists());
    }

    #[test]
    fn hs_sm_memory_store() {
        let mut store = MemoryPageStore::new();
        assert!(store.read_page(1).is_err());
        store.write_page(1, &[1, 2]).unwrap();
        assert_eq!(vec![1, 2], store.read_page(1).unwrap());
        assert_eq!((2, 1), store.read_write_count());
    }

    #[test]
    fn hs_sm_open_from_config() {
        let tdir = TempDir::new(gen_random_dir(), true);
        let mut config = Config::default();
        config.spill_dir = tdir.to_path_buf();
        config.page_size = 64;
        let mut store = open_page_store(&config).unwrap();
        assert_eq!(0, fs::read_dir(tdir.to_path_buf()).unwrap().count());
        store.write_page(2, &[0; 64]).unwrap();
        assert_eq!(1, fs::read_dir(tdir.to_path_buf()).unwrap().count());
        config.spill_to_disk = false;
        assert!(open_page_store(&config).unwrap().read_page(0).is_err());
    }
}
