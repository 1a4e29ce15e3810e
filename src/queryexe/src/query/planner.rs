use super::analyzer::{output_schema, Analyzer};
use super::result::QueryResult;
use crate::context::{ExecEnv, ExecutionContext};
use crate::opiterator::*;
use crate::plan::{PlanExpr, PlanOperator};
use common::ast::{Expr, Select, SelectItem, Statement};
use common::table::FieldInfo;
use common::{AccessType, DataType, EngineError, Schema};
use std::io::Read;
use std::sync::Arc;

/// Compiles statements into plan operator trees and runs them.
pub struct ExecutionPlanner {
    env: Arc<ExecEnv>,
}

impl ExecutionPlanner {
    /// # Arguments
    ///
    /// * `env` - Catalog, storage, importer, gate and configuration statements run against.
    pub fn new(env: Arc<ExecEnv>) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &Arc<ExecEnv> {
        &self.env
    }

    /// Fresh context for a statement in the given database.
    pub fn context(&self, database: &str) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(&self.env), database)
    }

    /// Analyzes a statement and builds its operator tree. Every object the
    /// statement touches is checked against the access gate before the
    /// operator touching it is built.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Context of the compilation.
    /// * `stmt` - Statement to compile.
    pub fn compile_plan(
        &self,
        ctx: &ExecutionContext,
        stmt: &Statement,
    ) -> Result<PlanOperator, EngineError> {
        ctx.check()?;
        let stmt = Analyzer::new(ctx.catalog(), ctx.database())
            .with_source(ctx.source())
            .analyze(stmt)?;
        let gate = ctx.gate();
        let op = match &stmt {
            Statement::Select(select) => self.compile_select(ctx, select)?,
            Statement::CreateDatabase {
                name,
                if_not_exists,
                options,
            } => {
                gate.check_access(ctx, name, AccessType::Create)?;
                PlanOperator::CreateDatabase(CreateDatabase {
                    name: name.clone(),
                    if_not_exists: *if_not_exists,
                    options: options.clone(),
                })
            }
            Statement::DropDatabase { name, if_exists } => {
                gate.check_access(ctx, name, AccessType::Drop)?;
                PlanOperator::DropDatabase(DropDatabase {
                    name: name.clone(),
                    if_exists: *if_exists,
                })
            }
            Statement::AlterDatabase {
                name,
                option,
                value,
            } => {
                gate.check_access(ctx, name, AccessType::Alter)?;
                PlanOperator::AlterDatabase(AlterDatabase {
                    name: name.clone(),
                    option: option.clone(),
                    value: value.clone(),
                })
            }
            Statement::CreateTable {
                name,
                if_not_exists,
                columns,
                description,
            } => {
                gate.check_access(ctx, name, AccessType::Create)?;
                PlanOperator::CreateTable(CreateTable {
                    database: ctx.database().to_string(),
                    name: name.clone(),
                    if_not_exists: *if_not_exists,
                    fields: columns
                        .iter()
                        .map(|c| FieldInfo::new(&c.name, c.dtype.clone(), c.nullable))
                        .collect(),
                    description: description.clone(),
                })
            }
            Statement::DropTable { name, if_exists } => {
                gate.check_access(ctx, name, AccessType::Drop)?;
                PlanOperator::DropTable(DropTable {
                    database: ctx.database().to_string(),
                    name: name.clone(),
                    if_exists: *if_exists,
                })
            }
            Statement::AlterTable { name, operation } => {
                gate.check_access(ctx, name, AccessType::Alter)?;
                PlanOperator::AlterTable(AlterTable {
                    database: ctx.database().to_string(),
                    table: name.clone(),
                    operation: operation.clone(),
                })
            }
            Statement::Insert {
                table,
                columns,
                rows,
            } => {
                gate.check_access(ctx, table, AccessType::Write)?;
                self.compile_insert(ctx, table, columns, rows)?
            }
            Statement::ShowDatabases => PlanOperator::ShowDatabases(ShowDatabases),
            Statement::ShowTables => {
                gate.check_access(ctx, ctx.database(), AccessType::Read)?;
                PlanOperator::ShowTables(ShowTables {
                    database: ctx.database().to_string(),
                })
            }
            Statement::ShowColumns { table } => {
                gate.check_access(ctx, table, AccessType::Read)?;
                PlanOperator::ShowColumns(ShowColumns {
                    database: ctx.database().to_string(),
                    table: table.clone(),
                })
            }
            Statement::CreateView { .. }
            | Statement::CreateFunction { .. }
            | Statement::CreateModel { .. }
            | Statement::Delete { .. } => {
                return Err(EngineError::InternalError(format!(
                    "cannot plan statement: {}",
                    stmt.shape_name()
                )))
            }
        };
        let op = self.optimize_plan(op);
        debug!("compiled {} into {}", stmt.shape_name(), op.name());
        Ok(op)
    }

    /// Rewrites a compiled tree. Plans are returned as they are for now.
    fn optimize_plan(&self, op: PlanOperator) -> PlanOperator {
        op
    }

    /// Builds `Scan -> Filter -> Projection -> [Distinct] -> FanOut -> [Distinct]
    /// -> [OrderBy] -> [Limit]`. Everything below the fan-out runs on each
    /// node; the dedup above it merges what the nodes deduplicated locally.
    fn compile_select(
        &self,
        ctx: &ExecutionContext,
        select: &Select,
    ) -> Result<PlanOperator, EngineError> {
        let mut op = match &select.from {
            Some(from) => {
                ctx.gate().check_access(ctx, &from.name, AccessType::Read)?;
                let table = ctx.catalog().table_by_name(ctx.database(), &from.name)?;
                let scan = PlanOperator::TableScan(TableScan::new(&table, from.reference_name()));
                let local = compile_row_pipeline(scan, select)?;
                let fanout = PlanOperator::FanOut(FanOut::new(table.id, Arc::new(local)));
                if select.distinct {
                    PlanOperator::Distinct(Distinct::new(Arc::new(fanout)))
                } else {
                    fanout
                }
            }
            None => {
                let values = PlanOperator::Values(Values::single_empty_row());
                compile_row_pipeline(values, select)?
            }
        };

        if !select.order_by.is_empty() {
            let schema = op.schema();
            let keys = select
                .order_by
                .iter()
                .map(|item| {
                    Ok(SortKey {
                        expr: bind(&item.expr, &schema)?,
                        descending: item.descending,
                    })
                })
                .collect::<Result<Vec<_>, EngineError>>()?;
            op = PlanOperator::OrderBy(OrderBy::new(keys, Arc::new(op)));
        }
        if let Some(limit) = select.limit {
            op = PlanOperator::Limit(Limit::new(limit.limit, limit.offset, Arc::new(op)));
        }
        Ok(op)
    }

    fn compile_insert(
        &self,
        ctx: &ExecutionContext,
        table_name: &str,
        columns: &[String],
        rows: &[Vec<Expr>],
    ) -> Result<PlanOperator, EngineError> {
        let table = ctx.catalog().table_by_name(ctx.database(), table_name)?;
        let dtypes = columns
            .iter()
            .map(|c| {
                table
                    .field(c)
                    .map(|f| f.dtype.clone())
                    .ok_or_else(|| EngineError::UnknownColumn(format!("{}.{}", table.name, c)))
            })
            .collect::<Result<Vec<DataType>, EngineError>>()?;
        let empty = Schema::default();
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|e| bind(e, &empty)).collect())
            .collect::<Result<Vec<Vec<PlanExpr>>, EngineError>>()?;
        Ok(PlanOperator::Insert(Insert::new(
            table.id,
            &table.name,
            columns.to_vec(),
            dtypes,
            rows,
        )))
    }

    /// Runs a compiled plan to completion.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Context of the execution.
    /// * `plan` - Root of the operator tree.
    pub fn execute(
        &self,
        ctx: &ExecutionContext,
        plan: &PlanOperator,
    ) -> Result<QueryResult, EngineError> {
        let mut iter = plan.iterator(ctx, None)?;
        let rows = drain(iter.as_mut(), ctx)?;
        Ok(QueryResult::new(plan.schema(), rows, plan.warnings()))
    }

    /// Compiles and executes a statement.
    pub fn run(&self, ctx: &ExecutionContext, stmt: &Statement) -> Result<QueryResult, EngineError> {
        let plan = self.compile_plan(ctx, stmt)?;
        self.execute(ctx, &plan)
    }

    /// Reads back an operator tree written with [`PlanOperator::to_bytes`].
    ///
    /// # Arguments
    ///
    /// * `reader` - Source of the serialized tree.
    pub fn rehydrate_plan_op<R: Read>(&self, reader: R) -> Result<PlanOperator, EngineError> {
        PlanOperator::from_reader(reader)
    }
}

/// `Filter -> Projection -> [Distinct]` over the given source.
fn compile_row_pipeline(source: PlanOperator, select: &Select) -> Result<PlanOperator, EngineError> {
    let input = source.schema();
    let mut op = source;
    if let Some(selection) = &select.selection {
        op = PlanOperator::Filter(Filter::new(bind(selection, &input)?, Arc::new(op)));
    }
    let exprs = select
        .projection
        .iter()
        .map(|item| match item {
            SelectItem::Expr { expr, .. } => bind(expr, &input),
            SelectItem::Wildcard(_) => Err(EngineError::InternalError(String::from(
                "wildcard left in analyzed projection",
            ))),
        })
        .collect::<Result<Vec<_>, EngineError>>()?;
    let schema = output_schema(&select.projection, &input)?;
    op = PlanOperator::Projection(Projection::new(exprs, schema, Arc::new(op)));
    if select.distinct {
        op = PlanOperator::Distinct(Distinct::new(Arc::new(op)));
    }
    Ok(op)
}

/// Binds column references to positions in the schema.
///
/// # Arguments
///
/// * `expr` - Analyzed expression.
/// * `schema` - Columns of the rows the expression is evaluated on.
pub fn bind(expr: &Expr, schema: &Schema) -> Result<PlanExpr, EngineError> {
    let res = match expr {
        Expr::Column(c) => PlanExpr::Column(schema.resolve(c.table.as_deref(), &c.name)?),
        Expr::Literal(v) => PlanExpr::Literal(v.clone()),
        Expr::Binary { left, op, right } => {
            PlanExpr::binary(bind(left, schema)?, *op, bind(right, schema)?)
        }
        Expr::Not(e) => PlanExpr::Not(Box::new(bind(e, schema)?)),
        Expr::IsNull { expr, negated } => PlanExpr::IsNull {
            expr: Box::new(bind(expr, schema)?),
            negated: *negated,
        },
    };
    Ok(res)
}
