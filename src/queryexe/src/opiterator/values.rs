use super::RowIterator;
use crate::context::ExecutionContext;
use common::{EngineError, Row, Schema};

/// Literal rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Values {
    rows: Vec<Row>,
    schema: Schema,
}

impl Values {
    pub fn new(rows: Vec<Row>, schema: Schema) -> Self {
        Values { rows, schema }
    }

    /// A single row without columns, the input of a SELECT without FROM.
    pub fn single_empty_row() -> Self {
        Values::new(vec![Row::new(Vec::new())], Schema::default())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iterator(&self) -> Box<dyn RowIterator> {
        Box::new(ValuesIterator {
            rows: self.rows.clone().into_iter(),
        })
    }
}

struct ValuesIterator {
    rows: std::vec::IntoIter<Row>,
}

impl RowIterator for ValuesIterator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Row>, EngineError> {
        ctx.check()?;
        Ok(self.rows.next())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.rows = Vec::new().into_iter();
        Ok(())
    }
}
