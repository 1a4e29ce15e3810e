//! Catalog mutations. Each runs on the first pull of its iterator and
//! produces no rows.

use super::{Mutation, MutationIterator, RowIterator};
use crate::context::ExecutionContext;
use crate::query::analyzer::check_add_column;
use common::ast::AlterTableOperation;
use common::table::FieldInfo;
use common::{CatalogError, EngineError};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDatabase {
    pub name: String,
    pub if_not_exists: bool,
    pub options: BTreeMap<String, String>,
}

impl CreateDatabase {
    pub fn iterator(&self) -> Box<dyn RowIterator> {
        Box::new(MutationIterator::new(self.clone()))
    }
}

impl Mutation for CreateDatabase {
    fn apply(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        match ctx.catalog().create_database(&self.name, self.options.clone()) {
            Ok(db) => {
                info!("created database {} ({})", db.name, db.id);
                Ok(())
            }
            Err(CatalogError::DatabaseNameExists(_)) if self.if_not_exists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropDatabase {
    pub name: String,
    pub if_exists: bool,
}

impl DropDatabase {
    pub fn iterator(&self) -> Box<dyn RowIterator> {
        Box::new(MutationIterator::new(self.clone()))
    }
}

impl Mutation for DropDatabase {
    /// Removes the data of every table of the database before the database
    /// itself.
    fn apply(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        let tables = match ctx.catalog().tables(&self.name) {
            Ok(tables) => tables,
            Err(CatalogError::DatabaseNameDoesNotExist(_)) if self.if_exists => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for table in &tables {
            ctx.importer().delete_table(table.id)?;
        }
        ctx.catalog().drop_database(&self.name)?;
        info!("dropped database {} with {} tables", self.name, tables.len());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterDatabase {
    pub name: String,
    pub option: String,
    pub value: String,
}

impl AlterDatabase {
    pub fn iterator(&self) -> Box<dyn RowIterator> {
        Box::new(MutationIterator::new(self.clone()))
    }
}

impl Mutation for AlterDatabase {
    fn apply(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        ctx.catalog()
            .set_database_option(&self.name, &self.option, &self.value)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTable {
    pub database: String,
    pub name: String,
    pub if_not_exists: bool,
    pub fields: Vec<FieldInfo>,
    pub description: Option<String>,
}

impl CreateTable {
    pub fn iterator(&self) -> Box<dyn RowIterator> {
        Box::new(MutationIterator::new(self.clone()))
    }
}

impl Mutation for CreateTable {
    fn apply(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        let created = ctx.catalog().create_table(
            &self.database,
            &self.name,
            self.fields.clone(),
            self.description.clone(),
        );
        match created {
            Ok(table) => {
                info!("created table {} ({})", table.name, table.key());
                Ok(())
            }
            Err(CatalogError::TableNameExists(_)) if self.if_not_exists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropTable {
    pub database: String,
    pub name: String,
    pub if_exists: bool,
}

impl DropTable {
    pub fn iterator(&self) -> Box<dyn RowIterator> {
        Box::new(MutationIterator::new(self.clone()))
    }
}

impl Mutation for DropTable {
    fn apply(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        match ctx.catalog().drop_table(&self.database, &self.name) {
            Ok(table) => {
                ctx.importer().delete_table(table.id)?;
                info!("dropped table {}", table.name);
                Ok(())
            }
            Err(CatalogError::TableNameDoesNotExist(_)) if self.if_exists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterTable {
    pub database: String,
    pub table: String,
    pub operation: AlterTableOperation,
}

impl AlterTable {
    pub fn iterator(&self) -> Box<dyn RowIterator> {
        Box::new(MutationIterator::new(self.clone()))
    }
}

impl Mutation for AlterTable {
    fn apply(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        let catalog = ctx.catalog();
        match &self.operation {
            AlterTableOperation::AddColumn(col) => {
                let table = catalog.table_by_name(&self.database, &self.table)?;
                check_add_column(ctx.source(), &table, col)?;
                let field = FieldInfo::new(&col.name, col.dtype.clone(), col.nullable);
                catalog.create_field(&self.database, &self.table, field)?;
            }
            AlterTableOperation::DropColumn(name) => {
                let table = catalog.table_by_name(&self.database, &self.table)?;
                catalog.drop_field(&self.database, &self.table, name)?;
                ctx.importer().delete_field(table.id, name)?;
            }
        }
        Ok(())
    }
}
