#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod storage_manager;

pub use storage_manager::ShardStore;
