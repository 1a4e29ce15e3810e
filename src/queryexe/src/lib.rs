#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod context;
pub mod opiterator;
pub mod plan;
mod planner_tests;
pub mod query;

pub use context::{CancelToken, ExecEnv, ExecutionContext};
pub use opiterator::RowIterator;
pub use plan::PlanOperator;
pub use query::{ExecutionPlanner, QueryResult};
