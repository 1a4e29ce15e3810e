use super::RowIterator;
use crate::context::ExecutionContext;
use crate::plan::{PlanOperator, Warnings};
use common::config::Config;
use common::{EngineError, Row};
use heapstore::{ExtendibleHashIndex, Fingerprint};
use std::sync::Arc;

/// Emits every distinct row of its child once, in order of first occurrence.
///
/// Rows are fingerprinted over their canonical encoding and probed against
/// an extendible hash index whose bucket pages sit in a bounded buffer pool,
/// so a large number of distinct rows spills to disk instead of growing
/// memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distinct {
    pub child: Arc<PlanOperator>,
    #[serde(skip)]
    warnings: Warnings,
}

impl Distinct {
    pub fn new(child: Arc<PlanOperator>) -> Self {
        Distinct {
            child,
            warnings: Warnings::default(),
        }
    }

    pub fn warnings(&self) -> &Warnings {
        &self.warnings
    }

    pub fn iterator(
        &self,
        ctx: &ExecutionContext,
        seed: Option<&Row>,
    ) -> Result<Box<dyn RowIterator>, EngineError> {
        let child = self.child.iterator(ctx, seed)?;
        Ok(Box::new(DistinctIterator::new(
            child,
            ctx.config(),
            self.warnings.clone(),
        )?))
    }
}

pub struct DistinctIterator {
    child: Box<dyn RowIterator>,
    /// `None` once the iterator has been exhausted or closed.
    index: Option<ExtendibleHashIndex>,
    warnings: Warnings,
    emitted: u64,
    warned: bool,
}

impl DistinctIterator {
    /// Creates the iterator together with its empty index.
    ///
    /// # Arguments
    ///
    /// * `child` - Iterator to dedup.
    /// * `config` - Sizes the buffer pool and picks the spill location.
    /// * `warnings` - Where the spill warning goes.
    pub fn new(
        child: Box<dyn RowIterator>,
        config: &Config,
        warnings: Warnings,
    ) -> Result<Self, EngineError> {
        Ok(DistinctIterator {
            child,
            index: Some(ExtendibleHashIndex::from_config(config)?),
            warnings,
            emitted: 0,
            warned: false,
        })
    }

    fn release(&mut self) {
        if let Some(index) = self.index.take() {
            debug!(
                "distinct released index of {} rows over {} pages",
                index.len(),
                index.num_pages()
            );
        }
    }

    /// Whether the row has not been seen before; records it if so.
    fn first_sighting(&mut self, row: &Row) -> Result<bool, EngineError> {
        let index = match self.index.as_mut() {
            Some(index) => index,
            None => {
                return Err(EngineError::InternalError(String::from(
                    "distinct index already released",
                )))
            }
        };
        let fresh = index.insert(Fingerprint::of(&row.canonical_bytes()))?;
        if !self.warned && index.has_spilled() {
            self.warned = true;
            self.warnings.add(format!(
                "distinct spilled to disk after {} distinct rows",
                index.len()
            ));
        }
        Ok(fresh)
    }
}

impl RowIterator for DistinctIterator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Row>, EngineError> {
        if self.index.is_none() {
            return Ok(None);
        }
        loop {
            let row = match self.child.next(ctx) {
                Ok(Some(row)) => row,
                Ok(None) => {
                    self.release();
                    return Ok(None);
                }
                Err(e) => {
                    self.release();
                    return Err(e);
                }
            };
            match self.first_sighting(&row) {
                Ok(true) => {
                    self.emitted += 1;
                    return Ok(Some(row));
                }
                Ok(false) => continue,
                Err(e) => {
                    self.release();
                    return Err(e);
                }
            }
        }
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.release();
        self.child.close()
    }
}

impl Drop for DistinctIterator {
    fn drop(&mut self) {
        if self.index.is_some() {
            trace!("distinct iterator dropped after {} rows", self.emitted);
            self.release();
        }
    }
}
