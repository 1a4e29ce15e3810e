//! Catalog introspection.

use super::{RowIterator, Snapshot, SnapshotIterator};
use crate::context::ExecutionContext;
use common::{Column, DataType, EngineError, Row, Schema, Value};

fn string_column(name: &str) -> Column {
    Column::new(name, DataType::String).with_nullable(false)
}

/// One row per database: name and id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowDatabases;

impl ShowDatabases {
    pub fn schema(&self) -> Schema {
        Schema::new(vec![string_column("name"), string_column("id")])
    }

    pub fn iterator(&self) -> Box<dyn RowIterator> {
        Box::new(SnapshotIterator::new(self.clone()))
    }
}

impl Snapshot for ShowDatabases {
    fn rows(&self, ctx: &ExecutionContext) -> Result<Vec<Row>, EngineError> {
        Ok(ctx
            .catalog()
            .databases()
            .into_iter()
            .map(|db| Row::new(vec![Value::String(db.name), Value::String(db.id.to_string())]))
            .collect())
    }
}

/// One row per table of the database: name, key and description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowTables {
    pub database: String,
}

impl ShowTables {
    pub fn schema(&self) -> Schema {
        Schema::new(vec![
            string_column("name"),
            string_column("key"),
            Column::new("description", DataType::String),
        ])
    }

    pub fn iterator(&self) -> Box<dyn RowIterator> {
        Box::new(SnapshotIterator::new(self.clone()))
    }
}

impl Snapshot for ShowTables {
    fn rows(&self, ctx: &ExecutionContext) -> Result<Vec<Row>, EngineError> {
        let tables = ctx.catalog().tables(&self.database)?;
        Ok(tables
            .into_iter()
            .map(|t| {
                let key = t.key();
                Row::new(vec![
                    Value::String(t.name),
                    Value::String(key),
                    t.description.map(Value::String).unwrap_or(Value::Null),
                ])
            })
            .collect())
    }
}

/// One row per field of the table: name, type and nullability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowColumns {
    pub database: String,
    pub table: String,
}

impl ShowColumns {
    pub fn schema(&self) -> Schema {
        Schema::new(vec![
            string_column("name"),
            string_column("type"),
            Column::new("nullable", DataType::Bool).with_nullable(false),
        ])
    }

    pub fn iterator(&self) -> Box<dyn RowIterator> {
        Box::new(SnapshotIterator::new(self.clone()))
    }
}

impl Snapshot for ShowColumns {
    fn rows(&self, ctx: &ExecutionContext) -> Result<Vec<Row>, EngineError> {
        let table = ctx.catalog().table_by_name(&self.database, &self.table)?;
        Ok(table
            .fields
            .into_iter()
            .map(|f| {
                Row::new(vec![
                    Value::String(f.name),
                    Value::String(f.dtype.to_string()),
                    Value::Bool(f.nullable),
                ])
            })
            .collect())
    }
}
