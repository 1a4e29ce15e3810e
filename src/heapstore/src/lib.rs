#[macro_use]
extern crate log;

pub mod buffer_pool;
pub mod hash_index;
mod heapfile;
pub mod page;
pub mod storage_manager;

pub use hash_index::ExtendibleHashIndex;
pub use page::Fingerprint;
