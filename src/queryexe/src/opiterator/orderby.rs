use super::{drain, RowIterator};
use crate::context::ExecutionContext;
use crate::plan::{PlanExpr, PlanOperator};
use common::{EngineError, Row, Value};
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: PlanExpr,
    pub descending: bool,
}

/// Stable sort of the child's rows. Nulls sort first in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub keys: Vec<SortKey>,
    pub child: Arc<PlanOperator>,
}

impl OrderBy {
    pub fn new(keys: Vec<SortKey>, child: Arc<PlanOperator>) -> Self {
        OrderBy { keys, child }
    }

    pub fn iterator(
        &self,
        ctx: &ExecutionContext,
        seed: Option<&Row>,
    ) -> Result<Box<dyn RowIterator>, EngineError> {
        let child = self.child.iterator(ctx, seed)?;
        Ok(Box::new(OrderByIterator {
            keys: self.keys.clone(),
            seed: seed.cloned(),
            child,
            rows: None,
        }))
    }
}

fn compare_keys(a: &[Value], b: &[Value], keys: &[SortKey]) -> Ordering {
    for ((x, y), key) in a.iter().zip(b.iter()).zip(keys) {
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => {
                let ord = x.compare(y).unwrap_or(Ordering::Equal);
                if key.descending {
                    ord.reverse()
                } else {
                    ord
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

struct OrderByIterator {
    keys: Vec<SortKey>,
    seed: Option<Row>,
    child: Box<dyn RowIterator>,
    rows: Option<std::vec::IntoIter<Row>>,
}

impl OrderByIterator {
    fn sort(&mut self, ctx: &ExecutionContext) -> Result<Vec<Row>, EngineError> {
        let rows = drain(self.child.as_mut(), ctx)?;
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let key = self
                .keys
                .iter()
                .map(|k| k.expr.eval(&row, self.seed.as_ref()))
                .collect::<Result<Vec<_>, _>>()?;
            keyed.push((key, row));
        }
        ctx.check()?;
        let keys = &self.keys;
        keyed.sort_by(|a, b| compare_keys(&a.0, &b.0, keys));
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

impl RowIterator for OrderByIterator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Row>, EngineError> {
        if self.rows.is_none() {
            let sorted = self.sort(ctx)?;
            self.rows = Some(sorted.into_iter());
        }
        Ok(self.rows.as_mut().and_then(|rows| rows.next()))
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.rows = Some(Vec::new().into_iter());
        self.child.close()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::ExecEnv;
    use crate::opiterator::Values;
    use common::config::Config;
    use common::testutil::*;

    #[test]
    fn test_order_by_stable_nulls_first() {
        let rows = vec![
            int_str_row(2, "x"),
            Row::new(vec![Value::Null, Value::String("n".into())]),
            int_str_row(1, "y"),
            int_str_row(2, "a"),
        ];
        let values = PlanOperator::Values(Values::new(rows, common::Schema::default()));
        let ctx = ExecutionContext::new(Arc::new(ExecEnv::in_memory(1, Config::default())), "db");

        let asc = OrderBy::new(
            vec![SortKey {
                expr: PlanExpr::Column(0),
                descending: false,
            }],
            Arc::new(values.clone()),
        );
        let mut iter = asc.iterator(&ctx, None).unwrap();
        let res = drain(iter.as_mut(), &ctx).unwrap();
        let names: Vec<String> = res.iter().map(|r| r.values[1].to_string()).collect();
        assert_eq!(vec!["n", "y", "x", "a"], names);

        let desc = OrderBy::new(
            vec![SortKey {
                expr: PlanExpr::Column(0),
                descending: true,
            }],
            Arc::new(values),
        );
        let mut iter = desc.iterator(&ctx, None).unwrap();
        let res = drain(iter.as_mut(), &ctx).unwrap();
        let names: Vec<String> = res.iter().map(|r| r.values[1].to_string()).collect();
        assert_eq!(vec!["n", "x", "a", "y"], names);
    }
}
