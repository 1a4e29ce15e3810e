use crate::ids::{DatabaseId, TableId};
use crate::{Column, DataType, Schema, ID_COLUMN};
use std::collections::BTreeMap;

/// Database implementation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DatabaseInfo {
    /// Database id.
    pub id: DatabaseId,
    /// Database name.
    pub name: String,
    /// Database options, set at creation or through ALTER DATABASE.
    pub options: BTreeMap<String, String>,
}

impl DatabaseInfo {
    /// Creates a new database with the given name.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of database.
    /// * `options` - Initial options.
    pub fn new(name: &str, options: BTreeMap<String, String>) -> Self {
        DatabaseInfo {
            id: DatabaseId::from_name(name),
            name: name.to_string(),
            options,
        }
    }
}

/// Field (column) of a table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub dtype: DataType,
    pub nullable: bool,
}

impl FieldInfo {
    pub fn new(name: &str, dtype: DataType, nullable: bool) -> Self {
        FieldInfo {
            name: name.to_string(),
            dtype,
            nullable,
        }
    }
}

/// Table implementation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TableInfo {
    /// Table name.
    pub name: String,
    /// Table id.
    pub id: TableId,
    /// Id of the owning database.
    pub database: DatabaseId,
    /// Fields in declaration order; the first one is always `_id`.
    pub fields: Vec<FieldInfo>,
    pub description: Option<String>,
}

impl TableInfo {
    /// Creates a new table with the given name and fields.
    ///
    /// # Arguments
    ///
    /// * `database` - Id of the owning database.
    /// * `name` - Name of table.
    /// * `fields` - Fields of the table, `_id` first.
    pub fn new(database: DatabaseId, name: &str, fields: Vec<FieldInfo>) -> Self {
        TableInfo {
            name: name.to_string(),
            id: TableId::from_name(database, name),
            database,
            fields,
            description: None,
        }
    }

    /// Key identifying the table across databases.
    pub fn key(&self) -> String {
        format!("tbl__{}__{}", self.database, self.id)
    }

    /// Looks up a field by name, ignoring case.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the field.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Schema of the table's rows, columns qualified with `relation`.
    ///
    /// # Arguments
    ///
    /// * `relation` - Name the columns are qualified with (table name or alias).
    pub fn schema(&self, relation: &str) -> Schema {
        let columns = self
            .fields
            .iter()
            .map(|f| {
                Column::new(&f.name, f.dtype.clone())
                    .with_nullable(f.nullable && f.name != ID_COLUMN)
                    .with_relation(relation)
            })
            .collect();
        Schema::new(columns)
    }
}
