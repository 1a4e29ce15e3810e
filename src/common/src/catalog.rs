use crate::ids::{DatabaseId, TableId};
use crate::table::*;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type DatabaseMap = Arc<RwLock<HashMap<DatabaseId, DatabaseInfo>>>;
pub type TableMap = Arc<RwLock<HashMap<TableId, Arc<RwLock<TableInfo>>>>>;

/// Catalog errors. Each kind distinguishes the entity and the key it was
/// looked up by, and embeds the offending identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogError {
    DatabaseIdExists(DatabaseId),
    DatabaseIdDoesNotExist(DatabaseId),
    DatabaseNameExists(String),
    DatabaseNameDoesNotExist(String),
    TableIdExists(TableId),
    TableIdDoesNotExist(TableId),
    TableKeyExists(String),
    TableKeyDoesNotExist(String),
    TableNameExists(String),
    TableNameDoesNotExist(String),
    FieldExists(String),
    FieldDoesNotExist(String),
}

impl CatalogError {
    /// Stable code of the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::DatabaseIdExists(_) => "DatabaseIDExists",
            CatalogError::DatabaseIdDoesNotExist(_) => "DatabaseIDDoesNotExist",
            CatalogError::DatabaseNameExists(_) => "DatabaseNameExists",
            CatalogError::DatabaseNameDoesNotExist(_) => "DatabaseNameDoesNotExist",
            CatalogError::TableIdExists(_) => "TableIDExists",
            CatalogError::TableIdDoesNotExist(_) => "TableIDDoesNotExist",
            CatalogError::TableKeyExists(_) => "TableKeyExists",
            CatalogError::TableKeyDoesNotExist(_) => "TableKeyDoesNotExist",
            CatalogError::TableNameExists(_) => "TableNameExists",
            CatalogError::TableNameDoesNotExist(_) => "TableNameDoesNotExist",
            CatalogError::FieldExists(_) => "FieldExists",
            CatalogError::FieldDoesNotExist(_) => "FieldDoesNotExist",
        }
    }
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            CatalogError::DatabaseIdExists(id) => format!("database ID '{}' already exists", id),
            CatalogError::DatabaseIdDoesNotExist(id) => {
                format!("database ID '{}' does not exist", id)
            }
            CatalogError::DatabaseNameExists(n) => format!("database name '{}' already exists", n),
            CatalogError::DatabaseNameDoesNotExist(n) => {
                format!("database name '{}' does not exist", n)
            }
            CatalogError::TableIdExists(id) => format!("table ID '{}' already exists", id),
            CatalogError::TableIdDoesNotExist(id) => format!("table ID '{}' does not exist", id),
            CatalogError::TableKeyExists(k) => format!("table key '{}' already exists", k),
            CatalogError::TableKeyDoesNotExist(k) => format!("table key '{}' does not exist", k),
            CatalogError::TableNameExists(n) => format!("table name '{}' already exists", n),
            CatalogError::TableNameDoesNotExist(n) => {
                format!("table name '{}' does not exist", n)
            }
            CatalogError::FieldExists(n) => format!("field '{}' already exists", n),
            CatalogError::FieldDoesNotExist(n) => format!("field '{}' does not exist", n),
        };
        write!(f, "{} {}", msg, self.code())
    }
}

impl std::error::Error for CatalogError {}

// A poisoned lock still guards consistent catalog data: every mutation below
// completes before it can panic.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Functions needed to implement a catalog. It keeps track of all databases,
/// their tables and the tables' fields. Implementations only provide the two
/// maps; lookups and mutations are provided on top of them.
///
/// Lookups by name ignore case. Concurrent readers are safe; mutations take
/// the write locks.
pub trait Catalog: Send + Sync {
    /// Get databases from catalog.
    fn get_databases(&self) -> DatabaseMap;

    /// Get tables from catalog.
    fn get_tables(&self) -> TableMap;

    /// Gets a database by name.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the database.
    fn database_by_name(&self, name: &str) -> Result<DatabaseInfo, CatalogError> {
        self.database_by_id(DatabaseId::from_name(name))
            .map_err(|_| CatalogError::DatabaseNameDoesNotExist(name.to_string()))
    }

    /// Gets a database by id.
    ///
    /// # Arguments
    ///
    /// * `id` - Id of the database.
    fn database_by_id(&self, id: DatabaseId) -> Result<DatabaseInfo, CatalogError> {
        let databases = self.get_databases();
        let databases_ref = read(&databases);
        databases_ref
            .get(&id)
            .cloned()
            .ok_or(CatalogError::DatabaseIdDoesNotExist(id))
    }

    /// All databases, ordered by name.
    fn databases(&self) -> Vec<DatabaseInfo> {
        let databases = self.get_databases();
        let mut res: Vec<DatabaseInfo> = read(&databases).values().cloned().collect();
        res.sort_by(|a, b| a.name.cmp(&b.name));
        res
    }

    /// Creates a database.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the new database.
    /// * `options` - Initial database options.
    fn create_database(
        &self,
        name: &str,
        options: BTreeMap<String, String>,
    ) -> Result<DatabaseInfo, CatalogError> {
        let info = DatabaseInfo::new(name, options);
        let databases = self.get_databases();
        let mut databases_ref = write(&databases);
        if databases_ref.contains_key(&info.id) {
            return Err(CatalogError::DatabaseNameExists(name.to_string()));
        }
        databases_ref.insert(info.id, info.clone());
        Ok(info)
    }

    /// Drops a database and every table in it.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the database to drop.
    fn drop_database(&self, name: &str) -> Result<(), CatalogError> {
        let id = DatabaseId::from_name(name);
        let databases = self.get_databases();
        if write(&databases).remove(&id).is_none() {
            return Err(CatalogError::DatabaseNameDoesNotExist(name.to_string()));
        }
        let tables = self.get_tables();
        write(&tables).retain(|_, t| read(t).database != id);
        Ok(())
    }

    /// Sets an option on a database.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the database.
    /// * `option` - Option to set.
    /// * `value` - New value of the option.
    fn set_database_option(
        &self,
        name: &str,
        option: &str,
        value: &str,
    ) -> Result<(), CatalogError> {
        let databases = self.get_databases();
        let mut databases_ref = write(&databases);
        match databases_ref.get_mut(&DatabaseId::from_name(name)) {
            Some(db) => {
                db.options.insert(option.to_lowercase(), value.to_string());
                Ok(())
            }
            None => Err(CatalogError::DatabaseNameDoesNotExist(name.to_string())),
        }
    }

    /// Get the table pointer for the catalog.
    ///
    /// # Arguments
    ///
    /// * `table_id` - Id of table to get the pointer for.
    fn get_table_ptr(&self, table_id: TableId) -> Result<Arc<RwLock<TableInfo>>, CatalogError> {
        let tables = self.get_tables();
        let tables_ref = read(&tables);
        match tables_ref.get(&table_id) {
            Some(table_ptr) => Ok(Arc::clone(table_ptr)),
            _ => Err(CatalogError::TableIdDoesNotExist(table_id)),
        }
    }

    /// Gets a table by id.
    ///
    /// # Arguments
    ///
    /// * `table_id` - Id of the table.
    fn table_by_id(&self, table_id: TableId) -> Result<TableInfo, CatalogError> {
        let ptr = self.get_table_ptr(table_id)?;
        let table = read(&ptr).clone();
        Ok(table)
    }

    /// Gets a table by key.
    ///
    /// # Arguments
    ///
    /// * `key` - Key of the table, as returned by `TableInfo::key`.
    fn table_by_key(&self, key: &str) -> Result<TableInfo, CatalogError> {
        let tables = self.get_tables();
        let tables_ref = read(&tables);
        tables_ref
            .values()
            .map(|t| read(t).clone())
            .find(|t| t.key() == key)
            .ok_or_else(|| CatalogError::TableKeyDoesNotExist(key.to_string()))
    }

    /// Gets a table by name.
    ///
    /// # Arguments
    ///
    /// * `database` - Name of the database holding the table.
    /// * `name` - Name of the table.
    fn table_by_name(&self, database: &str, name: &str) -> Result<TableInfo, CatalogError> {
        let db = self.database_by_name(database)?;
        self.table_by_id(TableId::from_name(db.id, name))
            .map_err(|_| CatalogError::TableNameDoesNotExist(name.to_string()))
    }

    /// Tables of a database, ordered by name.
    ///
    /// # Arguments
    ///
    /// * `database` - Name of the database.
    fn tables(&self, database: &str) -> Result<Vec<TableInfo>, CatalogError> {
        let db = self.database_by_name(database)?;
        let tables = self.get_tables();
        let mut res: Vec<TableInfo> = read(&tables)
            .values()
            .map(|t| read(t).clone())
            .filter(|t| t.database == db.id)
            .collect();
        res.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(res)
    }

    /// Creates a table.
    ///
    /// # Arguments
    ///
    /// * `database` - Name of the database to create the table in.
    /// * `name` - Name of the new table.
    /// * `fields` - Fields of the new table.
    /// * `description` - Optional table description.
    fn create_table(
        &self,
        database: &str,
        name: &str,
        fields: Vec<FieldInfo>,
        description: Option<String>,
    ) -> Result<TableInfo, CatalogError> {
        let db = self.database_by_name(database)?;
        let mut table = TableInfo::new(db.id, name, fields);
        table.description = description;
        let tables = self.get_tables();
        let mut tables_ref = write(&tables);
        if tables_ref.contains_key(&table.id) {
            return Err(CatalogError::TableNameExists(name.to_string()));
        }
        tables_ref.insert(table.id, Arc::new(RwLock::new(table.clone())));
        Ok(table)
    }

    /// Drops a table.
    ///
    /// # Arguments
    ///
    /// * `database` - Name of the database holding the table.
    /// * `name` - Name of the table to drop.
    fn drop_table(&self, database: &str, name: &str) -> Result<TableInfo, CatalogError> {
        let db = self.database_by_name(database)?;
        let tables = self.get_tables();
        let removed = write(&tables).remove(&TableId::from_name(db.id, name));
        match removed {
            Some(ptr) => Ok(read(&ptr).clone()),
            None => Err(CatalogError::TableNameDoesNotExist(name.to_string())),
        }
    }

    /// Gets a field of a table.
    ///
    /// # Arguments
    ///
    /// * `database` - Name of the database holding the table.
    /// * `table` - Name of the table.
    /// * `field` - Name of the field.
    fn field(&self, database: &str, table: &str, field: &str) -> Result<FieldInfo, CatalogError> {
        let table = self.table_by_name(database, table)?;
        table
            .field(field)
            .cloned()
            .ok_or_else(|| CatalogError::FieldDoesNotExist(field.to_string()))
    }

    /// Adds a field to a table.
    ///
    /// # Arguments
    ///
    /// * `database` - Name of the database holding the table.
    /// * `table` - Name of the table.
    /// * `field` - The new field.
    fn create_field(&self, database: &str, table: &str, field: FieldInfo) -> Result<(), CatalogError> {
        let db = self.database_by_name(database)?;
        let ptr = self
            .get_table_ptr(TableId::from_name(db.id, table))
            .map_err(|_| CatalogError::TableNameDoesNotExist(table.to_string()))?;
        let mut table_ref = write(&ptr);
        if table_ref.field(&field.name).is_some() {
            return Err(CatalogError::FieldExists(field.name));
        }
        table_ref.fields.push(field);
        Ok(())
    }

    /// Removes a field from a table.
    ///
    /// # Arguments
    ///
    /// * `database` - Name of the database holding the table.
    /// * `table` - Name of the table.
    /// * `field` - Name of the field to remove.
    fn drop_field(&self, database: &str, table: &str, field: &str) -> Result<(), CatalogError> {
        let db = self.database_by_name(database)?;
        let ptr = self
            .get_table_ptr(TableId::from_name(db.id, table))
            .map_err(|_| CatalogError::TableNameDoesNotExist(table.to_string()))?;
        let mut table_ref = write(&ptr);
        let before = table_ref.fields.len();
        table_ref
            .fields
            .retain(|f| !f.name.eq_ignore_ascii_case(field));
        if table_ref.fields.len() == before {
            return Err(CatalogError::FieldDoesNotExist(field.to_string()));
        }
        Ok(())
    }
}
