use common::ids::PageId;
use common::EngineError;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// A file of fixed-size pages, addressed by page id.
pub(crate) struct HeapFile {
    pub file: Arc<RwLock<File>>,
    pub path: PathBuf,
    pub page_size: usize,
    pub read_count: AtomicU64,
    pub write_count: AtomicU64,
}

impl HeapFile {
    /*  new
     *      purpose: Create a new heapfile at the given path
     *  inputs:
     *      file_path: where the pages are stored
     *      page_size: the size of every page in the file
     *  outputs:
     *      Return Result<Self> if able to create.
     *  Notes:
     *      Errors could arise from permissions, space, etc when trying to create the file used by HeapFile.
     */
    pub(crate) fn new(file_path: PathBuf, page_size: usize) -> Result<Self, EngineError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&file_path)?;
        Ok(HeapFile {
            file: Arc::new(RwLock::new(file)),
            path: file_path,
            page_size,
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, File>, EngineError> {
        self.file
            .write()
            .map_err(|_| EngineError::IOError(format!("lock poisoned on {:?}", self.path)))
    }

    /// Number of pages in the file.
    pub fn num_pages(&self) -> Result<PageId, EngineError> {
        let file = self.lock()?;
        let file_len = file.metadata()?.len();
        Ok((file_len as usize / self.page_size) as PageId)
    }

    /*  write_page_to_file
     *      purpose: write the bytes of one page at its offset
     *  inputs:
     *      page_id: the page to write
     *      bytes: exactly page_size bytes
     *  outputs:
     *      Just () if we were able to write the page
     */
    pub(crate) fn write_page_to_file(&self, page_id: PageId, bytes: &[u8]) -> Result<(), EngineError> {
        if bytes.len() != self.page_size {
            return Err(EngineError::InternalError(format!(
                "page {} has {} bytes, expected {}",
                page_id,
                bytes.len(),
                self.page_size
            )));
        }
        #[cfg(feature = "profile")]
        {
            self.write_count.fetch_add(1, Ordering::Relaxed);
        }
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))?;
        file.write_all(bytes)?;
        Ok(())
    }

    /*  read_page_from_file
     *      purpose: read a specific page from the heapfile
     *  inputs:
     *      pid: the page we want to read
     *  outputs:
     *      the bytes of the page or an error if the page was never written
     */
    pub(crate) fn read_page_from_file(&self, pid: PageId) -> Result<Vec<u8>, EngineError> {
        #[cfg(feature = "profile")]
        {
            self.read_count.fetch_add(1, Ordering::Relaxed);
        }
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start(pid as u64 * self.page_size as u64))?;
        let mut buffer = vec![0; self.page_size];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    pub(crate) fn read_write_count(&self) -> (u64, u64) {
        (
            self.read_count.load(Ordering::Relaxed),
            self.write_count.load(Ordering::Relaxed),
        )
    }
}
