use common::ast::BinaryOp;
use common::{EngineError, Row, Value, MAX_DECIMAL_SCALE};
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt;

/// Expression bound to column positions, evaluated per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanExpr {
    /// Column of the row being evaluated.
    Column(usize),
    /// Column of the seed row the iterator was created with.
    Outer(usize),
    Literal(Value),
    Binary {
        left: Box<PlanExpr>,
        op: BinaryOp,
        right: Box<PlanExpr>,
    },
    Not(Box<PlanExpr>),
    IsNull {
        expr: Box<PlanExpr>,
        negated: bool,
    },
}

impl PlanExpr {
    pub fn binary(left: PlanExpr, op: BinaryOp, right: PlanExpr) -> Self {
        PlanExpr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Evaluates the expression. Comparisons and arithmetic with a null
    /// operand yield null; AND/OR follow three-valued logic.
    ///
    /// # Arguments
    ///
    /// * `row` - Row columns are read from.
    /// * `outer` - Seed row outer columns are read from.
    pub fn eval(&self, row: &Row, outer: Option<&Row>) -> Result<Value, EngineError> {
        match self {
            PlanExpr::Column(i) => row.get(*i).cloned().ok_or_else(|| {
                EngineError::InternalError(format!("column {} out of range", i))
            }),
            PlanExpr::Outer(i) => outer.and_then(|r| r.get(*i)).cloned().ok_or_else(|| {
                EngineError::InternalError(format!("outer column {} not available", i))
            }),
            PlanExpr::Literal(v) => Ok(v.clone()),
            PlanExpr::Not(e) => match e.eval(row, outer)? {
                Value::Null => Ok(Value::Null),
                Value::Bool(b) => Ok(Value::Bool(!b)),
                v => Err(EngineError::TypeMismatch(format!("NOT applied to {}", v))),
            },
            PlanExpr::IsNull { expr, negated } => {
                let null = expr.eval(row, outer)?.is_null();
                Ok(Value::Bool(null != *negated))
            }
            PlanExpr::Binary { left, op, right } => {
                let l = left.eval(row, outer)?;
                if op.is_logical() {
                    return logical(*op, l, || right.eval(row, outer));
                }
                let r = right.eval(row, outer)?;
                if l.is_null() || r.is_null() {
                    return Ok(Value::Null);
                }
                if op.is_comparison() {
                    compare(*op, &l, &r)
                } else {
                    arithmetic(*op, &l, &r)
                }
            }
        }
    }

    /// Whether the expression evaluates to TRUE; null and FALSE both reject.
    pub fn is_true(&self, row: &Row, outer: Option<&Row>) -> Result<bool, EngineError> {
        match self.eval(row, outer)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            v => Err(EngineError::TypeMismatch(format!(
                "predicate evaluated to non boolean {}",
                v
            ))),
        }
    }
}

fn truth(v: &Value) -> Result<Option<bool>, EngineError> {
    match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        v => Err(EngineError::TypeMismatch(format!(
            "logical operand {} is not boolean",
            v
        ))),
    }
}

fn logical<F>(op: BinaryOp, left: Value, right: F) -> Result<Value, EngineError>
where
    F: FnOnce() -> Result<Value, EngineError>,
{
    let l = truth(&left)?;
    // short circuit
    match (op, l) {
        (BinaryOp::And, Some(false)) => return Ok(Value::Bool(false)),
        (BinaryOp::Or, Some(true)) => return Ok(Value::Bool(true)),
        _ => {}
    }
    let r = truth(&right()?)?;
    let res = match (op, l, r) {
        (BinaryOp::And, _, Some(false)) => Some(false),
        (BinaryOp::And, Some(true), Some(true)) => Some(true),
        (BinaryOp::Or, _, Some(true)) => Some(true),
        (BinaryOp::Or, Some(false), Some(false)) => Some(false),
        _ => None,
    };
    Ok(res.map(Value::Bool).unwrap_or(Value::Null))
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EngineError> {
    let ord = l
        .compare(r)
        .ok_or_else(|| EngineError::TypeMismatch(format!("cannot compare {} and {}", l, r)))?;
    let res = match op {
        BinaryOp::Eq => ord == Ordering::Equal,
        BinaryOp::NotEq => ord != Ordering::Equal,
        BinaryOp::Lt => ord == Ordering::Less,
        BinaryOp::LtEq => ord != Ordering::Greater,
        BinaryOp::Gt => ord == Ordering::Greater,
        BinaryOp::GtEq => ord != Ordering::Less,
        _ => {
            return Err(EngineError::InternalError(format!(
                "{} is not a comparison",
                op
            )))
        }
    };
    Ok(Value::Bool(res))
}

fn rescale(v: i128, by: u8) -> Option<i128> {
    10i128.checked_pow(by as u32).and_then(|p| v.checked_mul(p))
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, EngineError> {
    let mismatch = || EngineError::TypeMismatch(format!("cannot compute {} {} {}", l, op, r));
    let overflow = || EngineError::ExecutionError(format!("overflow computing {} {} {}", l, op, r));
    let (lv, ls) = l.as_scaled().ok_or_else(mismatch)?;
    let (rv, rs) = r.as_scaled().ok_or_else(mismatch)?;
    let decimal = matches!(l, Value::Decimal { .. }) || matches!(r, Value::Decimal { .. });

    let (value, scale) = match op {
        BinaryOp::Plus | BinaryOp::Minus => {
            let scale = ls.max(rs);
            let lv = rescale(lv, scale - ls).ok_or_else(overflow)?;
            let rv = rescale(rv, scale - rs).ok_or_else(overflow)?;
            let v = if op == BinaryOp::Plus {
                lv.checked_add(rv)
            } else {
                lv.checked_sub(rv)
            };
            (v.ok_or_else(overflow)?, scale)
        }
        BinaryOp::Multiply => {
            let scale = ls.saturating_add(rs);
            if scale > MAX_DECIMAL_SCALE {
                return Err(overflow());
            }
            (lv.checked_mul(rv).ok_or_else(overflow)?, scale)
        }
        _ => {
            return Err(EngineError::InternalError(format!(
                "{} is not arithmetic",
                op
            )))
        }
    };
    let value = i64::try_from(value).map_err(|_| overflow())?;
    if decimal {
        Ok(Value::Decimal { value, scale })
    } else {
        Ok(Value::Int(value))
    }
}

impl fmt::Display for PlanExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanExpr::Column(i) => write!(f, "${}", i),
            PlanExpr::Outer(i) => write!(f, "outer.${}", i),
            PlanExpr::Literal(Value::String(s)) => write!(f, "'{}'", s),
            PlanExpr::Literal(v) => write!(f, "{}", v),
            PlanExpr::Binary { left, op, right } => write!(f, "({} {} {})", left, op, right),
            PlanExpr::Not(e) => write!(f, "NOT {}", e),
            PlanExpr::IsNull { expr, negated } => {
                if *negated {
                    write!(f, "{} IS NOT NULL", expr)
                } else {
                    write!(f, "{} IS NULL", expr)
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::testutil::*;

    fn lit(v: Value) -> PlanExpr {
        PlanExpr::Literal(v)
    }

    #[test]
    fn test_comparison() {
        let row = int_str_row(3, "c");
        let e = PlanExpr::binary(PlanExpr::Column(0), BinaryOp::Gt, lit(Value::Int(2)));
        assert!(e.is_true(&row, None).unwrap());
        let e = PlanExpr::binary(PlanExpr::Column(1), BinaryOp::Eq, lit(Value::String("d".into())));
        assert!(!e.is_true(&row, None).unwrap());
        let e = PlanExpr::binary(
            PlanExpr::Column(0),
            BinaryOp::Eq,
            lit(Value::Decimal { value: 300, scale: 2 }),
        );
        assert!(e.is_true(&row, None).unwrap());
    }

    #[test]
    fn test_three_valued_logic() {
        let row = Row::new(vec![]);
        let null = || lit(Value::Null);
        let t = || lit(Value::Bool(true));
        let f = || lit(Value::Bool(false));
        let and = |a, b| PlanExpr::binary(a, BinaryOp::And, b).eval(&row, None).unwrap();
        let or = |a, b| PlanExpr::binary(a, BinaryOp::Or, b).eval(&row, None).unwrap();
        assert_eq!(Value::Bool(false), and(null(), f()));
        assert_eq!(Value::Null, and(null(), t()));
        assert_eq!(Value::Bool(true), or(null(), t()));
        assert_eq!(Value::Null, or(f(), null()));
        let cmp = PlanExpr::binary(null(), BinaryOp::Eq, null());
        assert_eq!(Value::Null, cmp.eval(&row, None).unwrap());
        assert!(!cmp.is_true(&row, None).unwrap());
        assert_eq!(
            Value::Null,
            PlanExpr::Not(Box::new(null())).eval(&row, None).unwrap()
        );
    }

    #[test]
    fn test_arithmetic() {
        let row = Row::new(vec![Value::Int(7), Value::Decimal { value: 150, scale: 2 }]);
        let e = PlanExpr::binary(PlanExpr::Column(0), BinaryOp::Plus, PlanExpr::Column(1));
        assert_eq!(Value::Decimal { value: 850, scale: 2 }, e.eval(&row, None).unwrap());
        let e = PlanExpr::binary(PlanExpr::Column(0), BinaryOp::Multiply, PlanExpr::Column(1));
        assert_eq!(Value::Decimal { value: 1050, scale: 2 }, e.eval(&row, None).unwrap());
        let e = PlanExpr::binary(PlanExpr::Column(0), BinaryOp::Minus, lit(Value::Int(9)));
        assert_eq!(Value::Int(-2), e.eval(&row, None).unwrap());
        let e = PlanExpr::binary(lit(Value::Int(i64::MAX)), BinaryOp::Plus, lit(Value::Int(1)));
        assert!(e.eval(&row, None).is_err());
    }

    #[test]
    fn test_outer_and_is_null() {
        let row = Row::new(vec![Value::Null]);
        let outer = int_vec_to_row(vec![5]);
        let e = PlanExpr::binary(PlanExpr::Outer(0), BinaryOp::Eq, lit(Value::Int(5)));
        assert!(e.is_true(&row, Some(&outer)).unwrap());
        assert!(e.eval(&row, None).is_err());
        let e = PlanExpr::IsNull {
            expr: Box::new(PlanExpr::Column(0)),
            negated: false,
        };
        assert!(e.is_true(&row, None).unwrap());
    }
}
