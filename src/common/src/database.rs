use crate::catalog::{Catalog, DatabaseMap, TableMap};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-memory catalog.
#[derive(Clone, Default)]
pub struct Database {
    // Requires RwLock on both map and tables to enable adding/removing tables as well as table mutability.
    /// Databases by id.
    pub databases: DatabaseMap,
    /// Locks for the tables.
    pub tables: TableMap,
}

impl Database {
    /// Initialize an empty catalog.
    pub fn new() -> Self {
        Database {
            databases: Arc::new(RwLock::new(HashMap::new())),
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Catalog for Database {
    fn get_databases(&self) -> DatabaseMap {
        self.databases.clone()
    }

    /// Gets the tables from the catalog of the database.
    fn get_tables(&self) -> TableMap {
        self.tables.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::CatalogError;
    use crate::table::FieldInfo;
    use crate::DataType;
    use std::collections::BTreeMap;

    fn fields() -> Vec<FieldInfo> {
        vec![
            FieldInfo::new("_id", DataType::Id, false),
            FieldInfo::new("a", DataType::Int, true),
        ]
    }

    #[test]
    fn test_database_lifecycle() {
        let catalog = Database::new();
        catalog.create_database("db", BTreeMap::new()).unwrap();
        assert_eq!(
            Err(CatalogError::DatabaseNameExists("DB".to_string())),
            catalog.create_database("DB", BTreeMap::new())
        );
        catalog.set_database_option("db", "Units", "4").unwrap();
        assert_eq!(
            Some(&"4".to_string()),
            catalog.database_by_name("db").unwrap().options.get("units")
        );
        catalog.drop_database("db").unwrap();
        assert_eq!(
            Err(CatalogError::DatabaseNameDoesNotExist("db".to_string())),
            catalog.database_by_name("db")
        );
    }

    #[test]
    fn test_table_lifecycle() {
        let catalog = Database::new();
        catalog.create_database("db", BTreeMap::new()).unwrap();
        let t = catalog.create_table("db", "t", fields(), None).unwrap();
        assert_eq!(
            Err(CatalogError::TableNameExists("t".to_string())),
            catalog.create_table("db", "t", fields(), None).map(|_| ())
        );
        assert_eq!(t, catalog.table_by_id(t.id).unwrap());
        assert_eq!(t, catalog.table_by_key(&t.key()).unwrap());
        assert_eq!(t, catalog.table_by_name("db", "T").unwrap());

        catalog
            .create_field("db", "t", FieldInfo::new("b", DataType::String, true))
            .unwrap();
        assert_eq!(
            Err(CatalogError::FieldExists("b".to_string())),
            catalog.create_field("db", "t", FieldInfo::new("b", DataType::Int, true))
        );
        assert_eq!(DataType::String, catalog.field("db", "t", "b").unwrap().dtype);
        catalog.drop_field("db", "t", "a").unwrap();
        assert_eq!(
            Err(CatalogError::FieldDoesNotExist("a".to_string())),
            catalog.field("db", "t", "a")
        );

        catalog.drop_database("db").unwrap();
        assert_eq!(
            Err(CatalogError::TableIdDoesNotExist(t.id)),
            catalog.table_by_id(t.id)
        );
    }

    #[test]
    fn test_tables_sorted_per_database() {
        let catalog = Database::new();
        catalog.create_database("a", BTreeMap::new()).unwrap();
        catalog.create_database("b", BTreeMap::new()).unwrap();
        catalog.create_table("a", "z", fields(), None).unwrap();
        catalog.create_table("a", "y", fields(), None).unwrap();
        catalog.create_table("b", "x", fields(), None).unwrap();
        let names: Vec<String> = catalog
            .tables("a")
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(vec!["y", "z"], names);
        assert_eq!(
            "table name 'q' does not exist TableNameDoesNotExist",
            catalog.drop_table("b", "q").unwrap_err().to_string()
        );
    }
}
