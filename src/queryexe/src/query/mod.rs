pub use planner::{bind, ExecutionPlanner};
pub use result::QueryResult;

pub mod access;
pub mod analyzer;
pub mod mapreduce;
mod planner;
mod result;
