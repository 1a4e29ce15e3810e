#[macro_use]
extern crate log;

pub mod transactions;

pub use common::importer::Transaction;
pub use transactions::TransactionManager;
