use common::{Row, Schema};
use std::fmt;

/// Rows of an executed statement with their schema and the warnings raised
/// while producing them. A result is always complete.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    schema: Schema,
    rows: Vec<Row>,
    warnings: Vec<String>,
}

impl QueryResult {
    pub fn new(schema: Schema, rows: Vec<Row>, warnings: Vec<String>) -> Self {
        Self {
            schema,
            rows,
            warnings,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Fixed width table: a header line with the column names, then one line per
/// row.
impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .schema
            .columns()
            .map(|c| c.name().len())
            .max()
            .unwrap_or(8)
            + 2;
        let mut res = String::new();
        for col in self.schema.columns() {
            res += &format!("{:width$}", col.name(), width = width);
        }
        res += "\n";
        for row in &self.rows {
            for v in row.values() {
                res += &format!("{:width$}", v.to_string(), width = width);
            }
            res += "\n";
        }
        write!(f, "{}", res)
    }
}
