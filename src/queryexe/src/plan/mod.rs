//! Plan operators.
//!
//! A compiled statement is a tree of [`PlanOperator`]s. Trees are immutable:
//! children are shared through `Arc` and [`PlanOperator::with_children`]
//! builds a new node, so rewrites never touch the tree they start from.

mod expr;

pub use self::expr::PlanExpr;

use crate::context::ExecutionContext;
use crate::opiterator::*;
use common::{EngineError, Row, Schema};
use serde_json::json;
use std::fmt;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};

/// Diagnostics an operator collects while it executes. Shared between the
/// operator and the iterators it creates.
#[derive(Clone, Default)]
pub struct Warnings(Arc<Mutex<Vec<String>>>);

impl Warnings {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, warning: String) {
        warn!("{}", warning);
        self.lock().push(warning);
    }

    pub fn get(&self) -> Vec<String> {
        self.lock().clone()
    }
}

impl fmt::Debug for Warnings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.get().iter()).finish()
    }
}

// Warnings are not part of a plan's structure.
impl PartialEq for Warnings {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanOperator {
    TableScan(TableScan),
    Values(Values),
    Filter(Filter),
    Projection(Projection),
    Distinct(Distinct),
    FanOut(FanOut),
    OrderBy(OrderBy),
    Limit(Limit),
    CreateDatabase(CreateDatabase),
    DropDatabase(DropDatabase),
    AlterDatabase(AlterDatabase),
    CreateTable(CreateTable),
    DropTable(DropTable),
    AlterTable(AlterTable),
    Insert(Insert),
    ShowDatabases(ShowDatabases),
    ShowTables(ShowTables),
    ShowColumns(ShowColumns),
}

impl PlanOperator {
    /// Name of the operator, as shown in plans.
    pub fn name(&self) -> &'static str {
        match self {
            PlanOperator::TableScan(_) => "PlanOpTableScan",
            PlanOperator::Values(_) => "PlanOpValues",
            PlanOperator::Filter(_) => "PlanOpFilter",
            PlanOperator::Projection(_) => "PlanOpProjection",
            PlanOperator::Distinct(_) => "PlanOpDistinct",
            PlanOperator::FanOut(_) => "PlanOpFanOut",
            PlanOperator::OrderBy(_) => "PlanOpOrderBy",
            PlanOperator::Limit(_) => "PlanOpLimit",
            PlanOperator::CreateDatabase(_) => "PlanOpCreateDatabase",
            PlanOperator::DropDatabase(_) => "PlanOpDropDatabase",
            PlanOperator::AlterDatabase(_) => "PlanOpAlterDatabase",
            PlanOperator::CreateTable(_) => "PlanOpCreateTable",
            PlanOperator::DropTable(_) => "PlanOpDropTable",
            PlanOperator::AlterTable(_) => "PlanOpAlterTable",
            PlanOperator::Insert(_) => "PlanOpInsert",
            PlanOperator::ShowDatabases(_) => "PlanOpShowDatabases",
            PlanOperator::ShowTables(_) => "PlanOpShowTables",
            PlanOperator::ShowColumns(_) => "PlanOpShowColumns",
        }
    }

    /// Schema of the rows the operator produces. Filters, dedup, fan-out,
    /// sorting and limits produce their child's schema.
    pub fn schema(&self) -> Schema {
        match self {
            PlanOperator::TableScan(op) => op.schema().clone(),
            PlanOperator::Values(op) => op.schema().clone(),
            PlanOperator::Projection(op) => op.schema().clone(),
            PlanOperator::Filter(Filter { child, .. })
            | PlanOperator::Distinct(Distinct { child, .. })
            | PlanOperator::FanOut(FanOut { child, .. })
            | PlanOperator::OrderBy(OrderBy { child, .. })
            | PlanOperator::Limit(Limit { child, .. }) => child.schema(),
            PlanOperator::ShowDatabases(op) => op.schema(),
            PlanOperator::ShowTables(op) => op.schema(),
            PlanOperator::ShowColumns(op) => op.schema(),
            PlanOperator::CreateDatabase(_)
            | PlanOperator::DropDatabase(_)
            | PlanOperator::AlterDatabase(_)
            | PlanOperator::CreateTable(_)
            | PlanOperator::DropTable(_)
            | PlanOperator::AlterTable(_)
            | PlanOperator::Insert(_) => Schema::default(),
        }
    }

    pub fn children(&self) -> Vec<Arc<PlanOperator>> {
        match self {
            PlanOperator::Filter(Filter { child, .. })
            | PlanOperator::Projection(Projection { child, .. })
            | PlanOperator::Distinct(Distinct { child, .. })
            | PlanOperator::FanOut(FanOut { child, .. })
            | PlanOperator::OrderBy(OrderBy { child, .. })
            | PlanOperator::Limit(Limit { child, .. }) => vec![Arc::clone(child)],
            _ => Vec::new(),
        }
    }

    /// Returns a new operator with the children replaced. The operator
    /// itself is left as it is.
    ///
    /// # Arguments
    ///
    /// * `children` - New children, as many as the operator has.
    pub fn with_children(
        &self,
        mut children: Vec<Arc<PlanOperator>>,
    ) -> Result<PlanOperator, EngineError> {
        let arity = self.children().len();
        if children.len() != arity {
            return Err(EngineError::InternalError(format!(
                "unexpected number of children '{}'",
                children.len()
            )));
        }
        let child = match children.pop() {
            Some(child) => child,
            None => return Ok(self.clone()),
        };
        let op = match self {
            PlanOperator::Filter(op) => {
                PlanOperator::Filter(Filter::new(op.predicate.clone(), child))
            }
            PlanOperator::Projection(op) => PlanOperator::Projection(Projection::new(
                op.exprs.clone(),
                op.schema().clone(),
                child,
            )),
            PlanOperator::Distinct(_) => PlanOperator::Distinct(Distinct::new(child)),
            PlanOperator::FanOut(op) => PlanOperator::FanOut(FanOut::new(op.table, child)),
            PlanOperator::OrderBy(op) => {
                PlanOperator::OrderBy(OrderBy::new(op.keys.clone(), child))
            }
            PlanOperator::Limit(op) => {
                PlanOperator::Limit(Limit::new(op.limit, op.offset, child))
            }
            _ => {
                return Err(EngineError::InternalError(format!(
                    "{} takes no children",
                    self.name()
                )))
            }
        };
        Ok(op)
    }

    /// Creates the iterator for one execution of the operator.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Context of the execution.
    /// * `seed` - Outer row for correlated execution, visible to expressions.
    pub fn iterator(
        &self,
        ctx: &ExecutionContext,
        seed: Option<&Row>,
    ) -> Result<Box<dyn RowIterator>, EngineError> {
        ctx.check()?;
        match self {
            PlanOperator::TableScan(op) => op.iterator(ctx),
            PlanOperator::Values(op) => Ok(op.iterator()),
            PlanOperator::Filter(op) => op.iterator(ctx, seed),
            PlanOperator::Projection(op) => op.iterator(ctx, seed),
            PlanOperator::Distinct(op) => op.iterator(ctx, seed),
            PlanOperator::FanOut(op) => Ok(op.iterator(seed)),
            PlanOperator::OrderBy(op) => op.iterator(ctx, seed),
            PlanOperator::Limit(op) => op.iterator(ctx, seed),
            PlanOperator::CreateDatabase(op) => Ok(op.iterator()),
            PlanOperator::DropDatabase(op) => Ok(op.iterator()),
            PlanOperator::AlterDatabase(op) => Ok(op.iterator()),
            PlanOperator::CreateTable(op) => Ok(op.iterator()),
            PlanOperator::DropTable(op) => Ok(op.iterator()),
            PlanOperator::AlterTable(op) => Ok(op.iterator()),
            PlanOperator::Insert(op) => Ok(op.iterator()),
            PlanOperator::ShowDatabases(op) => Ok(op.iterator()),
            PlanOperator::ShowTables(op) => Ok(op.iterator()),
            PlanOperator::ShowColumns(op) => Ok(op.iterator()),
        }
    }

    /// Describes the operator and its subtree for EXPLAIN style output.
    pub fn plan(&self) -> serde_json::Value {
        let mut result = serde_json::Map::new();
        result.insert("_op".to_string(), json!(self.name()));
        result.insert("_schema".to_string(), self.schema().plan());
        match self {
            PlanOperator::TableScan(op) => {
                result.insert("table".to_string(), json!(op.table_name));
            }
            PlanOperator::Values(op) => {
                result.insert("rows".to_string(), json!(op.len()));
            }
            PlanOperator::Filter(op) => {
                result.insert("predicate".to_string(), json!(op.predicate.to_string()));
            }
            PlanOperator::Projection(op) => {
                let exprs: Vec<String> = op.exprs.iter().map(|e| e.to_string()).collect();
                result.insert("exprs".to_string(), json!(exprs));
            }
            PlanOperator::OrderBy(op) => {
                let keys: Vec<String> = op
                    .keys
                    .iter()
                    .map(|k| {
                        format!("{} {}", k.expr, if k.descending { "desc" } else { "asc" })
                    })
                    .collect();
                result.insert("keys".to_string(), json!(keys));
            }
            PlanOperator::Limit(op) => {
                result.insert("limit".to_string(), json!(op.limit));
                result.insert("offset".to_string(), json!(op.offset));
            }
            PlanOperator::CreateDatabase(CreateDatabase { name, .. })
            | PlanOperator::DropDatabase(DropDatabase { name, .. })
            | PlanOperator::AlterDatabase(AlterDatabase { name, .. }) => {
                result.insert("database".to_string(), json!(name));
            }
            PlanOperator::CreateTable(CreateTable { name, .. })
            | PlanOperator::DropTable(DropTable { name, .. })
            | PlanOperator::AlterTable(AlterTable { table: name, .. })
            | PlanOperator::ShowColumns(ShowColumns { table: name, .. }) => {
                result.insert("table".to_string(), json!(name));
            }
            PlanOperator::Insert(op) => {
                result.insert("table".to_string(), json!(op.table_name));
                result.insert("rows".to_string(), json!(op.len()));
            }
            _ => {}
        }
        if let Some(child) = self.children().first() {
            result.insert("child".to_string(), child.plan());
        }
        serde_json::Value::Object(result)
    }

    /// Warnings of the operator followed by those of its children, depth first.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = match self {
            PlanOperator::Distinct(op) => op.warnings().get(),
            _ => Vec::new(),
        };
        for child in self.children() {
            warnings.extend(child.warnings());
        }
        warnings
    }

    /// Serializes the tree for later rehydration.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EngineError> {
        Ok(serde_cbor::to_vec(self)?)
    }

    /// Reads back a tree written by [`PlanOperator::to_bytes`].
    pub fn from_reader<R: Read>(reader: R) -> Result<PlanOperator, EngineError> {
        Ok(serde_cbor::from_reader(reader)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::ExecEnv;
    use common::ast::BinaryOp;
    use common::config::Config;
    use common::testutil::*;
    use common::Value;

    fn values() -> Arc<PlanOperator> {
        let rows = create_row_list(vec![vec![1, 10], vec![2, 20], vec![1, 10]]);
        Arc::new(PlanOperator::Values(Values::new(rows, get_int_schema(2))))
    }

    fn distinct_over_filter() -> PlanOperator {
        let pred = PlanExpr::binary(
            PlanExpr::Column(0),
            BinaryOp::GtEq,
            PlanExpr::Literal(Value::Int(1)),
        );
        let filter = Arc::new(PlanOperator::Filter(Filter::new(pred, values())));
        PlanOperator::Distinct(Distinct::new(filter))
    }

    #[test]
    fn test_schema_propagates_through_unary_operators() {
        let op = distinct_over_filter();
        assert_eq!(get_int_schema(2), op.schema());
        let limit = PlanOperator::Limit(Limit::new(1, 0, Arc::new(op)));
        assert_eq!(get_int_schema(2), limit.schema());
    }

    #[test]
    fn test_with_children_is_pure() {
        let op = distinct_over_filter();
        let before = op.plan();
        let replacement = values();
        let rewritten = op.with_children(vec![Arc::clone(&replacement)]).unwrap();
        assert_eq!(before, op.plan());
        assert_ne!(before, rewritten.plan());
        assert!(Arc::ptr_eq(&replacement, &rewritten.children()[0]));
        assert!(!Arc::ptr_eq(&op.children()[0], &rewritten.children()[0]));
    }

    #[test]
    fn test_with_children_arity() {
        let op = distinct_over_filter();
        match op.with_children(vec![]) {
            Err(EngineError::InternalError(msg)) => {
                assert_eq!("unexpected number of children '0'", msg)
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(op.with_children(vec![values(), values()]).is_err());
        let leaf = values();
        assert!(leaf.with_children(vec![values()]).is_err());
        assert_eq!(*leaf, leaf.with_children(vec![]).unwrap());
    }

    #[test]
    fn test_plan_description() {
        let plan = distinct_over_filter().plan();
        assert_eq!("PlanOpDistinct", plan["_op"]);
        assert_eq!("PlanOpFilter", plan["child"]["_op"]);
        assert_eq!("PlanOpValues", plan["child"]["child"]["_op"]);
        assert_eq!("c0", plan["_schema"][0]["name"]);
        assert_eq!("int", plan["_schema"][1]["type"]);
    }

    #[test]
    fn test_rehydrate_round_trip() {
        let op = distinct_over_filter();
        let bytes = op.to_bytes().unwrap();
        let back = PlanOperator::from_reader(&bytes[..]).unwrap();
        assert_eq!(op, back);
        assert_eq!(op.plan(), back.plan());
    }

    #[test]
    fn test_iterate_and_warnings_order() {
        let tdir = temp_testdir::TempDir::new(gen_random_dir(), true);
        let mut config = Config::default();
        config.spill_dir = tdir.to_path_buf();
        let ctx = ExecutionContext::new(Arc::new(ExecEnv::in_memory(1, config)), "db");
        let inner = PlanOperator::Distinct(Distinct::new(values()));
        let outer = PlanOperator::Distinct(Distinct::new(Arc::new(inner)));
        let mut iter = outer.iterator(&ctx, None).unwrap();
        let rows = drain(iter.as_mut(), &ctx).unwrap();
        assert_eq!(create_row_list(vec![vec![1, 10], vec![2, 20]]), rows);

        if let PlanOperator::Distinct(op) = &outer {
            op.warnings().add("outer".to_string());
            if let PlanOperator::Distinct(child) = op.child.as_ref() {
                child.warnings().add("inner".to_string());
            }
        }
        assert_eq!(vec!["outer", "inner"], outer.warnings());
    }
}
