use crate::context::ExecutionContext;
use common::{EngineError, Row};

pub use self::ddl::{AlterDatabase, AlterTable, CreateDatabase, CreateTable, DropDatabase, DropTable};
pub use self::distinct::{Distinct, DistinctIterator};
pub use self::fanout::FanOut;
pub use self::filter::Filter;
pub use self::insert::Insert;
pub use self::limit::Limit;
pub use self::orderby::{OrderBy, SortKey};
pub use self::projection::Projection;
pub use self::scan::TableScan;
pub use self::show::{ShowColumns, ShowDatabases, ShowTables};
pub use self::values::Values;

mod ddl;
mod distinct;
mod fanout;
mod filter;
mod insert;
mod limit;
mod orderby;
mod projection;
mod scan;
mod show;
mod values;

/// Pull-based cursor over the rows of one execution of a plan operator.
///
/// A single iterator is driven by one caller at a time.
pub trait RowIterator: Send {
    /// Returns the next row, or `Ok(None)` once the stream is exhausted.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Context of the execution; checked for cancellation and deadline.
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Row>, EngineError>;

    /// Releases the resources held by the iterator and its children. Calling
    /// it more than once is allowed.
    fn close(&mut self) -> Result<(), EngineError>;
}

/// Pulls every row out of an iterator and closes it.
///
/// # Arguments
///
/// * `iter` - Iterator to drain.
/// * `ctx` - Context of the execution.
pub fn drain(iter: &mut dyn RowIterator, ctx: &ExecutionContext) -> Result<Vec<Row>, EngineError> {
    let mut rows = Vec::new();
    loop {
        match iter.next(ctx) {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break,
            Err(e) => {
                if let Err(close_err) = iter.close() {
                    warn!("closing iterator after '{}' failed: {}", e, close_err);
                }
                return Err(e);
            }
        }
    }
    iter.close()?;
    Ok(rows)
}

/// A mutation performed once, on the first pull of its iterator.
pub(crate) trait Mutation: Clone + Send + 'static {
    fn apply(&self, ctx: &ExecutionContext) -> Result<(), EngineError>;
}

/// Runs a mutation on the first `next` and reports end of stream.
pub(crate) struct MutationIterator<M: Mutation> {
    op: Option<M>,
}

impl<M: Mutation> MutationIterator<M> {
    pub(crate) fn new(op: M) -> Self {
        MutationIterator { op: Some(op) }
    }
}

impl<M: Mutation> RowIterator for MutationIterator<M> {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Row>, EngineError> {
        if let Some(op) = self.op.take() {
            ctx.check()?;
            op.apply(ctx)?;
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.op = None;
        Ok(())
    }
}

/// Rows computed on the first pull, then handed out one at a time.
pub(crate) trait Snapshot: Clone + Send + 'static {
    fn rows(&self, ctx: &ExecutionContext) -> Result<Vec<Row>, EngineError>;
}

pub(crate) struct SnapshotIterator<S: Snapshot> {
    source: S,
    rows: Option<std::vec::IntoIter<Row>>,
}

impl<S: Snapshot> SnapshotIterator<S> {
    pub(crate) fn new(source: S) -> Self {
        SnapshotIterator { source, rows: None }
    }
}

impl<S: Snapshot> RowIterator for SnapshotIterator<S> {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Row>, EngineError> {
        ctx.check()?;
        if self.rows.is_none() {
            self.rows = Some(self.source.rows(ctx)?.into_iter());
        }
        Ok(self.rows.as_mut().and_then(|rows| rows.next()))
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.rows = Some(Vec::new().into_iter());
        Ok(())
    }
}
