use common::ast::*;
use common::catalog::Catalog;
use common::importer::ShardSource;
use common::table::TableInfo;
use common::{Column, DataType, EngineError, Schema, Value, ID_COLUMN, MAX_DECIMAL_SCALE};
use std::collections::HashSet;

/// Resolves and validates a statement against the catalog.
///
/// Analysis returns a rewritten copy of the statement: wildcards expanded,
/// column references qualified with their relation, literals coerced to the
/// type of what they are compared with or stored into. The catalog is only
/// read.
pub struct Analyzer<'a> {
    /// Catalog to validate against.
    catalog: &'a dyn Catalog,
    /// Database unqualified table names are resolved in.
    database: &'a str,
    /// Rows of the tables, for checks that depend on whether a table is empty.
    source: Option<&'a dyn ShardSource>,
}

impl<'a> Analyzer<'a> {
    pub fn new(catalog: &'a dyn Catalog, database: &'a str) -> Self {
        Self {
            catalog,
            database,
            source: None,
        }
    }

    /// Lets the analyzer see which tables hold rows.
    pub fn with_source(mut self, source: &'a dyn ShardSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Analyzes a statement. Statements the planner does not support are
    /// returned unchanged.
    ///
    /// # Arguments
    ///
    /// * `stmt` - Statement to analyze.
    pub fn analyze(&self, stmt: &Statement) -> Result<Statement, EngineError> {
        let res = match stmt {
            Statement::Select(select) => Statement::Select(self.process_select(select)?),
            Statement::Insert {
                table,
                columns,
                rows,
            } => self.process_insert(table, columns, rows)?,
            Statement::CreateTable { columns, .. } => {
                self.catalog.database_by_name(self.database)?;
                validate_columns(columns)?;
                stmt.clone()
            }
            Statement::AlterTable { name, operation } => {
                self.process_alter_table(name, operation)?;
                stmt.clone()
            }
            Statement::DropTable { name, if_exists } => {
                if !if_exists {
                    self.table(name)?;
                }
                stmt.clone()
            }
            Statement::DropDatabase { name, if_exists } => {
                if !if_exists {
                    self.catalog.database_by_name(name)?;
                }
                stmt.clone()
            }
            Statement::AlterDatabase { name, .. } => {
                self.catalog.database_by_name(name)?;
                stmt.clone()
            }
            Statement::ShowTables => {
                self.catalog.database_by_name(self.database)?;
                stmt.clone()
            }
            Statement::ShowColumns { table } => {
                self.table(table)?;
                stmt.clone()
            }
            Statement::CreateDatabase { .. }
            | Statement::ShowDatabases
            | Statement::CreateView { .. }
            | Statement::CreateFunction { .. }
            | Statement::CreateModel { .. }
            | Statement::Delete { .. } => stmt.clone(),
        };
        Ok(res)
    }

    fn table(&self, name: &str) -> Result<TableInfo, EngineError> {
        Ok(self.catalog.table_by_name(self.database, name)?)
    }

    /// Helper function to process a SELECT.
    ///
    /// # Arguments
    ///
    /// * `select` - Query to process.
    fn process_select(&self, select: &Select) -> Result<Select, EngineError> {
        let input = match &select.from {
            Some(from) => self.table(&from.name)?.schema(from.reference_name()),
            None => Schema::default(),
        };

        let mut projection = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(qualifier) => {
                    projection.extend(expand_wildcard(qualifier.as_deref(), &input)?)
                }
                SelectItem::Expr { expr, alias } => {
                    let expr = qualify(expr, &input)?;
                    expr_type(&expr, &input)?;
                    projection.push(SelectItem::Expr {
                        expr,
                        alias: alias.clone(),
                    });
                }
            }
        }

        let selection = match &select.selection {
            Some(expr) => {
                let expr = qualify(expr, &input)?;
                match expr_type(&expr, &input)? {
                    None | Some(DataType::Bool) => {}
                    Some(dtype) => {
                        return Err(EngineError::TypeMismatch(format!(
                            "WHERE clause {} is {}, not bool",
                            expr, dtype
                        )))
                    }
                }
                Some(expr)
            }
            None => None,
        };

        // Sort keys see the output columns.
        let output = output_schema(&projection, &input)?;
        let mut order_by = Vec::new();
        for item in &select.order_by {
            let expr = qualify(&item.expr, &output)?;
            if let Some(dtype @ DataType::IdSet) | Some(dtype @ DataType::StringSet) =
                expr_type(&expr, &output)?
            {
                return Err(EngineError::TypeMismatch(format!(
                    "cannot sort by {} of type {}",
                    expr, dtype
                )));
            }
            order_by.push(OrderByItem {
                expr,
                descending: item.descending,
            });
        }

        Ok(Select {
            distinct: select.distinct,
            projection,
            from: select.from.clone(),
            selection,
            order_by,
            limit: select.limit,
        })
    }

    /// Checks the target columns and values of an INSERT and coerces literal
    /// values to the column types.
    fn process_insert(
        &self,
        table_name: &str,
        columns: &[String],
        rows: &[Vec<Expr>],
    ) -> Result<Statement, EngineError> {
        let table = self.table(table_name)?;
        let mut targets = Vec::new();
        if columns.is_empty() {
            targets.extend(table.fields.iter().cloned());
        } else {
            let mut seen = HashSet::new();
            for name in columns {
                let field = table.field(name).ok_or_else(|| {
                    EngineError::UnknownColumn(format!("{}.{}", table.name, name))
                })?;
                if !seen.insert(field.name.to_lowercase()) {
                    return Err(EngineError::ValidationError(format!(
                        "column '{}' given more than once",
                        name
                    )));
                }
                targets.push(field.clone());
            }
        }
        if !targets.iter().any(|f| f.name == ID_COLUMN) {
            return Err(EngineError::ValidationError(format!(
                "insert into {} must set '{}'",
                table.name, ID_COLUMN
            )));
        }
        for field in &table.fields {
            if !field.nullable && !targets.iter().any(|t| t.name == field.name) {
                return Err(EngineError::ValidationError(format!(
                    "column '{}' is not nullable",
                    field.name
                )));
            }
        }

        let empty = Schema::default();
        let mut checked = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if row.len() != targets.len() {
                return Err(EngineError::ValidationError(format!(
                    "row {} has {} values for {} columns",
                    i,
                    row.len(),
                    targets.len()
                )));
            }
            let mut values = Vec::with_capacity(row.len());
            for (expr, field) in row.iter().zip(&targets) {
                let expr = match expr {
                    Expr::Literal(v) => Expr::Literal(v.coerce_to(&field.dtype)?),
                    e => e.clone(),
                };
                // insert values are constant, so no column is in scope
                let dtype = expr_type(&expr, &empty)?;
                match dtype {
                    Some(dtype) if !dtype.comparable_with(&field.dtype) => {
                        return Err(EngineError::TypeMismatch(format!(
                            "value {} of type {} for column '{}' of type {}",
                            expr, dtype, field.name, field.dtype
                        )))
                    }
                    None if matches!(expr, Expr::Literal(_))
                        && (!field.nullable || field.name == ID_COLUMN) =>
                    {
                        return Err(EngineError::ValidationError(format!(
                            "column '{}' cannot be null",
                            field.name
                        )))
                    }
                    _ => {}
                }
                values.push(expr);
            }
            checked.push(values);
        }

        Ok(Statement::Insert {
            table: table.name.clone(),
            columns: targets.into_iter().map(|f| f.name).collect(),
            rows: checked,
        })
    }

    fn process_alter_table(
        &self,
        name: &str,
        operation: &AlterTableOperation,
    ) -> Result<(), EngineError> {
        let table = self.table(name)?;
        match operation {
            AlterTableOperation::AddColumn(col) => {
                if table.field(&col.name).is_some() {
                    return Err(common::CatalogError::FieldExists(col.name.clone()).into());
                }
                if let Some(source) = self.source {
                    check_add_column(source, &table, col)?;
                }
                check_scale(&col.dtype)
            }
            AlterTableOperation::DropColumn(col) => {
                if col.eq_ignore_ascii_case(ID_COLUMN) {
                    return Err(EngineError::ValidationError(format!(
                        "cannot drop '{}'",
                        ID_COLUMN
                    )));
                }
                if table.field(col).is_none() {
                    return Err(common::CatalogError::FieldDoesNotExist(col.clone()).into());
                }
                Ok(())
            }
        }
    }
}

/// Existing rows would hold null in a new non-nullable column.
///
/// # Arguments
///
/// * `source` - Rows of the table.
/// * `table` - Table the column is added to.
/// * `col` - Column being added.
pub fn check_add_column(
    source: &dyn ShardSource,
    table: &TableInfo,
    col: &ColumnDef,
) -> Result<(), EngineError> {
    if !col.nullable && !source.shards(table.id)?.is_empty() {
        return Err(EngineError::ValidationError(format!(
            "cannot add non-nullable column '{}' to table '{}' holding rows",
            col.name, table.name
        )));
    }
    Ok(())
}

/// Column list of a CREATE TABLE: `_id` of type id first, names unique.
fn validate_columns(columns: &[ColumnDef]) -> Result<(), EngineError> {
    match columns.first() {
        Some(col) if col.name == ID_COLUMN && col.dtype == DataType::Id => {}
        _ => {
            return Err(EngineError::ValidationError(format!(
                "first column must be '{}' of type id",
                ID_COLUMN
            )))
        }
    }
    let mut seen = HashSet::new();
    for col in columns {
        if !seen.insert(col.name.to_lowercase()) {
            return Err(EngineError::ValidationError(format!(
                "duplicate column '{}'",
                col.name
            )));
        }
        check_scale(&col.dtype)?;
    }
    Ok(())
}

fn check_scale(dtype: &DataType) -> Result<(), EngineError> {
    match dtype {
        DataType::Decimal(scale) if *scale > MAX_DECIMAL_SCALE => {
            Err(EngineError::ValidationError(format!(
                "decimal scale {} exceeds {}",
                scale, MAX_DECIMAL_SCALE
            )))
        }
        _ => Ok(()),
    }
}

fn column_ref(col: &Column) -> ColumnRef {
    match &col.relation {
        Some(rel) => ColumnRef::qualified(rel, &col.name),
        None => ColumnRef::new(&col.name),
    }
}

fn expand_wildcard(qualifier: Option<&str>, input: &Schema) -> Result<Vec<SelectItem>, EngineError> {
    let items: Vec<SelectItem> = input
        .columns()
        .filter(|c| match (qualifier, &c.relation) {
            (None, _) => true,
            (Some(q), Some(rel)) => rel.eq_ignore_ascii_case(q),
            (Some(_), None) => false,
        })
        .map(|c| SelectItem::Expr {
            expr: Expr::Column(column_ref(c)),
            alias: None,
        })
        .collect();
    match qualifier {
        Some(q) if items.is_empty() => Err(EngineError::ValidationError(format!(
            "relation '{}' is not in scope",
            q
        ))),
        _ => Ok(items),
    }
}

/// Qualifies the column references of an expression and coerces literals
/// compared with a typed operand to the operand's type.
///
/// # Arguments
///
/// * `expr` - Expression to rewrite.
/// * `schema` - Columns in scope.
pub fn qualify(expr: &Expr, schema: &Schema) -> Result<Expr, EngineError> {
    let res = match expr {
        Expr::Column(c) => {
            let i = schema.resolve(c.table.as_deref(), &c.name)?;
            match schema.get_column(i) {
                Some(col) => Expr::Column(column_ref(col)),
                None => return Err(EngineError::UnknownColumn(c.to_string())),
            }
        }
        Expr::Literal(_) => expr.clone(),
        Expr::Not(e) => Expr::Not(Box::new(qualify(e, schema)?)),
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: Box::new(qualify(expr, schema)?),
            negated: *negated,
        },
        Expr::Binary { left, op, right } => {
            let mut left = qualify(left, schema)?;
            let mut right = qualify(right, schema)?;
            if op.is_comparison() {
                coerce_literal(&mut right, expr_type(&left, schema)?);
                coerce_literal(&mut left, expr_type(&right, schema)?);
            }
            Expr::binary(left, *op, right)
        }
    };
    Ok(res)
}

// Leaves the literal alone when the conversion would lose information; the
// type check decides about it.
fn coerce_literal(expr: &mut Expr, target: Option<DataType>) {
    if let (Expr::Literal(v), Some(target)) = (&*expr, target) {
        if let Ok(coerced) = v.coerce_to(&target) {
            *expr = Expr::Literal(coerced);
        }
    }
}

/// Type of an expression over the given columns; `None` for the untyped NULL.
///
/// # Arguments
///
/// * `expr` - Expression to type.
/// * `schema` - Columns in scope.
pub fn expr_type(expr: &Expr, schema: &Schema) -> Result<Option<DataType>, EngineError> {
    match expr {
        Expr::Column(c) => {
            let i = schema.resolve(c.table.as_deref(), &c.name)?;
            Ok(schema.get_column(i).map(|col| col.dtype.clone()))
        }
        Expr::Literal(v) => Ok(v.data_type()),
        Expr::IsNull { expr, .. } => {
            expr_type(expr, schema)?;
            Ok(Some(DataType::Bool))
        }
        Expr::Not(e) => match expr_type(e, schema)? {
            None | Some(DataType::Bool) => Ok(Some(DataType::Bool)),
            Some(dtype) => Err(EngineError::TypeMismatch(format!(
                "NOT applied to {} of type {}",
                e, dtype
            ))),
        },
        Expr::Binary { left, op, right } => {
            let lt = expr_type(left, schema)?;
            let rt = expr_type(right, schema)?;
            if op.is_comparison() {
                if let (Some(l), Some(r)) = (&lt, &rt) {
                    if !l.comparable_with(r) {
                        return Err(EngineError::TypeMismatch(format!(
                            "cannot compare {} of type {} with {} of type {}",
                            left, l, right, r
                        )));
                    }
                }
                return Ok(Some(DataType::Bool));
            }
            if op.is_logical() {
                for (e, t) in [(left, &lt), (right, &rt)].iter() {
                    match t {
                        None | Some(DataType::Bool) => {}
                        Some(dtype) => {
                            return Err(EngineError::TypeMismatch(format!(
                                "{} operand {} is {}, not bool",
                                op, e, dtype
                            )))
                        }
                    }
                }
                return Ok(Some(DataType::Bool));
            }
            arithmetic_type(*op, lt, rt).ok_or_else(|| {
                EngineError::TypeMismatch(format!("cannot compute {}", expr))
            })
        }
    }
}

fn arithmetic_type(
    op: BinaryOp,
    lt: Option<DataType>,
    rt: Option<DataType>,
) -> Option<Option<DataType>> {
    let scale = |t: &DataType| match t {
        DataType::Decimal(s) => Some(*s),
        DataType::Int | DataType::Id => Some(0),
        _ => None,
    };
    let (l, r) = match (lt, rt) {
        (None, None) => return Some(None),
        (Some(t), None) | (None, Some(t)) => {
            scale(&t)?;
            return Some(Some(t));
        }
        (Some(l), Some(r)) => (l, r),
    };
    let (ls, rs) = (scale(&l)?, scale(&r)?);
    let decimal = matches!(l, DataType::Decimal(_)) || matches!(r, DataType::Decimal(_));
    if !decimal {
        return Some(Some(DataType::Int));
    }
    let scale = if op == BinaryOp::Multiply {
        ls.checked_add(rs).filter(|s| *s <= MAX_DECIMAL_SCALE)?
    } else {
        ls.max(rs)
    };
    Some(Some(DataType::Decimal(scale)))
}

/// Output columns of a projection. Columns are named by their alias, else by
/// the column they read, else by the expression text. The untyped NULL is
/// declared int.
///
/// # Arguments
///
/// * `items` - Projection, wildcards already expanded.
/// * `input` - Columns in scope.
pub fn output_schema(items: &[SelectItem], input: &Schema) -> Result<Schema, EngineError> {
    let mut columns = Vec::with_capacity(items.len());
    for item in items {
        let (expr, alias) = match item {
            SelectItem::Expr { expr, alias } => (expr, alias),
            SelectItem::Wildcard(_) => {
                return Err(EngineError::InternalError(String::from(
                    "wildcard left in analyzed projection",
                )))
            }
        };
        let dtype = expr_type(expr, input)?.unwrap_or(DataType::Int);
        let column = match (expr, alias) {
            (Expr::Column(c), None) => {
                let i = input.resolve(c.table.as_deref(), &c.name)?;
                match input.get_column(i) {
                    Some(col) => col.clone(),
                    None => return Err(EngineError::UnknownColumn(c.to_string())),
                }
            }
            (Expr::Column(c), Some(alias)) => {
                let i = input.resolve(c.table.as_deref(), &c.name)?;
                let nullable = input.get_column(i).map(|col| col.nullable).unwrap_or(true);
                Column::new(alias, dtype).with_nullable(nullable)
            }
            (Expr::Literal(v), alias) => {
                let name = alias.clone().unwrap_or_else(|| expr.to_string());
                Column::new(&name, dtype).with_nullable(v.is_null())
            }
            (_, alias) => {
                let name = alias.clone().unwrap_or_else(|| expr.to_string());
                Column::new(&name, dtype)
            }
        };
        columns.push(column);
    }
    Ok(Schema::new(columns))
}
