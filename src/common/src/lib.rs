#[macro_use]
extern crate serde;
#[macro_use]
extern crate log;

use std::cmp::Ordering;
use std::convert::TryFrom;
use std::error::Error;
use std::fmt;
use std::io;

pub mod ast;
pub mod catalog;
pub mod cluster;
pub mod config;
pub mod database;
pub mod ids;
pub mod importer;
pub mod table;
pub mod testutil;

pub use catalog::CatalogError;

/// How big each page is
pub const PAGE_SIZE: usize = 8192;
/// Largest page whose entry count fits the 16-bit count of a bucket page header.
pub const MAX_PAGE_SIZE: usize = 8 + 16 * u16::MAX as usize;
// How many pages a buffer pool can hold
pub const POOL_PAGES: usize = 128;
/// Number of record ids covered by one shard.
pub const SHARD_WIDTH: u64 = 1 << 20;
/// Largest decimal scale accepted by the type system.
pub const MAX_DECIMAL_SCALE: u8 = 18;
/// Name of the record id column every table carries first.
pub const ID_COLUMN: &str = "_id";

/// Kinds of access checked before an operator touching an object is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    Read,
    Write,
    Create,
    Alter,
    Drop,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            AccessType::Read => "read",
            AccessType::Write => "write",
            AccessType::Create => "create",
            AccessType::Alter => "alter",
            AccessType::Drop => "drop",
        };
        write!(f, "{}", s)
    }
}

/// Custom error type.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// IO Errors.
    IOError(String),
    /// Catalog lookups and mutations.
    Catalog(CatalogError),
    /// Validation errors raised while analyzing a statement.
    ValidationError(String),
    /// A column reference that matches nothing in scope.
    UnknownColumn(String),
    /// A column reference that matches more than one column in scope.
    AmbiguousColumn(String),
    /// Operand or value types that do not fit together.
    TypeMismatch(String),
    /// Internal errors, including statements the planner cannot plan.
    InternalError(String),
    /// The access gate refused an operation on an object.
    AccessDenied { object: String, access: AccessType },
    /// Execution errors.
    ExecutionError(String),
    /// A map task failed without producing an error of its own.
    NodeFailure { node: String, message: String },
    /// Execution was cancelled.
    Cancelled,
    /// Execution ran past its deadline.
    Timeout,
    /// Import transaction errors.
    TransactionError(String),
    /// Encoding and decoding of plans, pages and log records.
    SerializationError(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                EngineError::IOError(s) => s.to_string(),
                EngineError::Catalog(e) => e.to_string(),
                EngineError::ValidationError(s) => format!("Validation Error: {}", s),
                EngineError::UnknownColumn(s) => format!("column '{}' not found", s),
                EngineError::AmbiguousColumn(s) => format!("column '{}' is ambiguous", s),
                EngineError::TypeMismatch(s) => format!("type mismatch: {}", s),
                EngineError::InternalError(s) => s.to_string(),
                EngineError::AccessDenied { object, access } => {
                    format!("{} access denied on '{}'", access, object)
                }
                EngineError::ExecutionError(s) => format!("Execution Error: {}", s),
                EngineError::NodeFailure { node, message } => {
                    format!("node '{}' failed: {}", node, message)
                }
                EngineError::Cancelled => String::from("execution cancelled"),
                EngineError::Timeout => String::from("execution timed out"),
                EngineError::TransactionError(s) => format!("Transaction Error: {}", s),
                EngineError::SerializationError(s) => format!("Serialization Error: {}", s),
            }
        )
    }
}

// Implement std::convert::From for EngineError; from io::Error
impl From<io::Error> for EngineError {
    fn from(error: io::Error) -> Self {
        EngineError::IOError(error.to_string())
    }
}

impl From<serde_cbor::Error> for EngineError {
    fn from(error: serde_cbor::Error) -> Self {
        EngineError::SerializationError(error.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::SerializationError(error.to_string())
    }
}

impl From<CatalogError> for EngineError {
    fn from(error: CatalogError) -> Self {
        EngineError::Catalog(error)
    }
}

impl Error for EngineError {}

/// Enumerate the supported dtypes.
#[derive(PartialEq, Eq, Hash, Serialize, Deserialize, Clone, Debug)]
pub enum DataType {
    Bool,
    Int,
    Id,
    /// Fixed point with the given number of fractional digits.
    Decimal(u8),
    String,
    /// Microseconds since the unix epoch.
    Timestamp,
    IdSet,
    StringSet,
}

impl DataType {
    /// Whether values of the type take part in numeric comparison and arithmetic.
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int | DataType::Id | DataType::Decimal(_))
    }

    /// Whether values of the two types can be compared with each other.
    ///
    /// # Arguments
    ///
    /// * `other` - Type on the other side of the comparison.
    pub fn comparable_with(&self, other: &DataType) -> bool {
        if self.is_numeric() && other.is_numeric() {
            return true;
        }
        match (self, other) {
            (DataType::IdSet, _) | (DataType::StringSet, _) => false,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "bool"),
            DataType::Int => write!(f, "int"),
            DataType::Id => write!(f, "id"),
            DataType::Decimal(scale) => write!(f, "decimal({})", scale),
            DataType::String => write!(f, "string"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::IdSet => write!(f, "idset"),
            DataType::StringSet => write!(f, "stringset"),
        }
    }
}

/// For each of the dtypes, a corresponding value. `Null` belongs to every type.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Id(u64),
    Decimal { value: i64, scale: u8 },
    String(String),
    Timestamp(i64),
    IdSet(Vec<u64>),
    StringSet(Vec<String>),
}

// Tags of the canonical encoding.
const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_ID: u8 = 3;
const TAG_DECIMAL: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_TIMESTAMP: u8 = 6;
const TAG_IDSET: u8 = 7;
const TAG_STRINGSET: u8 = 8;

fn pow10(exp: u8) -> Option<i128> {
    10i128.checked_pow(exp as u32)
}

/// Strips trailing fractional zeros so numerically equal decimals share one form.
fn normalize_decimal(mut value: i64, mut scale: u8) -> (i64, u8) {
    while scale > 0 && value % 10 == 0 {
        value /= 10;
        scale -= 1;
    }
    (value, scale)
}

fn encode_str(s: &str, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

impl Value {
    /// Returns the type of the value, `None` for null.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Bool),
            Value::Int(_) => Some(DataType::Int),
            Value::Id(_) => Some(DataType::Id),
            Value::Decimal { scale, .. } => Some(DataType::Decimal(*scale)),
            Value::String(_) => Some(DataType::String),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::IdSet(_) => Some(DataType::IdSet),
            Value::StringSet(_) => Some(DataType::StringSet),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Appends the canonical encoding of the value to `buf`.
    ///
    /// The encoding is a type tag followed by a normalised payload: decimals drop
    /// trailing fractional zeros, sets are sorted and deduplicated and strings are
    /// length prefixed. Logically equal values encode to the same bytes.
    ///
    /// # Arguments
    ///
    /// * `buf` - Buffer to append to.
    pub fn encode_canonical(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Null => buf.push(TAG_NULL),
            Value::Bool(b) => {
                buf.push(TAG_BOOL);
                buf.push(*b as u8);
            }
            Value::Int(i) => {
                buf.push(TAG_INT);
                buf.extend_from_slice(&i.to_le_bytes());
            }
            Value::Id(i) => {
                buf.push(TAG_ID);
                buf.extend_from_slice(&i.to_le_bytes());
            }
            Value::Decimal { value, scale } => {
                let (value, scale) = normalize_decimal(*value, *scale);
                buf.push(TAG_DECIMAL);
                buf.extend_from_slice(&value.to_le_bytes());
                buf.push(scale);
            }
            Value::String(s) => {
                buf.push(TAG_STRING);
                encode_str(s, buf);
            }
            Value::Timestamp(t) => {
                buf.push(TAG_TIMESTAMP);
                buf.extend_from_slice(&t.to_le_bytes());
            }
            Value::IdSet(ids) => {
                let mut ids = ids.clone();
                ids.sort_unstable();
                ids.dedup();
                buf.push(TAG_IDSET);
                buf.extend_from_slice(&(ids.len() as u32).to_le_bytes());
                for id in ids {
                    buf.extend_from_slice(&id.to_le_bytes());
                }
            }
            Value::StringSet(members) => {
                let mut members: Vec<&String> = members.iter().collect();
                members.sort();
                members.dedup();
                buf.push(TAG_STRINGSET);
                buf.extend_from_slice(&(members.len() as u32).to_le_bytes());
                for s in members {
                    encode_str(s, buf);
                }
            }
        }
    }

    /// Numeric view of the value as an unscaled integer and its scale.
    pub fn as_scaled(&self) -> Option<(i128, u8)> {
        match self {
            Value::Int(i) => Some((*i as i128, 0)),
            Value::Id(i) => Some((*i as i128, 0)),
            Value::Decimal { value, scale } => Some((*value as i128, *scale)),
            _ => None,
        }
    }

    /// Compares two values. Null sorts before everything else; numeric types
    /// compare by value across types. Returns `None` for incomparable values.
    ///
    /// # Arguments
    ///
    /// * `other` - Value to compare against.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (a, b) => {
                let (av, ascale) = a.as_scaled()?;
                let (bv, bscale) = b.as_scaled()?;
                let scale = ascale.max(bscale);
                let av = av.checked_mul(pow10(scale - ascale)?)?;
                let bv = bv.checked_mul(pow10(scale - bscale)?)?;
                Some(av.cmp(&bv))
            }
        }
    }

    /// Converts the value to the given type where no information is lost.
    ///
    /// # Arguments
    ///
    /// * `dtype` - Target type.
    pub fn coerce_to(&self, dtype: &DataType) -> Result<Value, EngineError> {
        let mismatch = || {
            EngineError::TypeMismatch(format!("cannot use value {} as type {}", self, dtype))
        };
        let coerced = match (self, dtype) {
            (Value::Null, _) => Value::Null,
            (Value::Bool(b), DataType::Bool) => Value::Bool(*b),
            (Value::Int(i), DataType::Int) => Value::Int(*i),
            (Value::Int(i), DataType::Id) if *i >= 0 => Value::Id(*i as u64),
            (Value::Int(i), DataType::Timestamp) => Value::Timestamp(*i),
            (Value::Id(i), DataType::Id) => Value::Id(*i),
            (Value::Id(i), DataType::Int) if *i <= i64::MAX as u64 => Value::Int(*i as i64),
            (Value::Int(_), DataType::Decimal(scale))
            | (Value::Id(_), DataType::Decimal(scale))
            | (Value::Decimal { .. }, DataType::Decimal(scale)) => {
                let (v, from) = self.as_scaled().ok_or_else(mismatch)?;
                if *scale >= from {
                    let scaled = pow10(*scale - from)
                        .and_then(|p| v.checked_mul(p))
                        .ok_or_else(mismatch)?;
                    let value = i64::try_from(scaled).map_err(|_| mismatch())?;
                    Value::Decimal {
                        value,
                        scale: *scale,
                    }
                } else {
                    let p = pow10(from - *scale).ok_or_else(mismatch)?;
                    if v % p != 0 {
                        return Err(mismatch());
                    }
                    let value = i64::try_from(v / p).map_err(|_| mismatch())?;
                    Value::Decimal {
                        value,
                        scale: *scale,
                    }
                }
            }
            (Value::String(s), DataType::String) => Value::String(s.clone()),
            (Value::Timestamp(t), DataType::Timestamp) => Value::Timestamp(*t),
            (Value::IdSet(ids), DataType::IdSet) => Value::IdSet(ids.clone()),
            (Value::StringSet(s), DataType::StringSet) => Value::StringSet(s.clone()),
            _ => return Err(mismatch()),
        };
        Ok(coerced)
    }

    /// Unwraps id values.
    pub fn as_id(&self) -> Option<u64> {
        match self {
            Value::Id(i) => Some(*i),
            Value::Int(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }

    /// Unwraps boolean values.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let mut a = Vec::new();
        let mut b = Vec::new();
        self.encode_canonical(&mut a);
        other.encode_canonical(&mut b);
        a == b
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Id(i) => write!(f, "{}", i),
            Value::Decimal { value, scale } => {
                if *scale == 0 {
                    return write!(f, "{}", value);
                }
                let digits = value.unsigned_abs().to_string();
                let scale = *scale as usize;
                let padded = format!("{:0>width$}", digits, width = scale + 1);
                let (int_part, frac_part) = padded.split_at(padded.len() - scale);
                let sign = if *value < 0 { "-" } else { "" };
                write!(f, "{}{}.{}", sign, int_part, frac_part)
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Timestamp(t) => write!(f, "{}", t),
            Value::IdSet(ids) => {
                let parts: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
            Value::StringSet(members) => {
                let parts: Vec<String> = members.iter().map(|s| format!("'{}'", s)).collect();
                write!(f, "[{}]", parts.join(","))
            }
        }
    }
}

/// Row type. Immutable once produced; moved to the consumer on every pull.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
pub struct Row {
    /// Row data.
    pub values: Vec<Value>,
}

impl Row {
    /// Create a new row with the given data.
    ///
    /// # Arguments
    ///
    /// * `values` - Values of the row.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get the value at index.
    ///
    /// # Arguments
    ///
    /// * `i` - Index of the value.
    pub fn get(&self, i: usize) -> Option<&Value> {
        self.values.get(i)
    }

    /// Returns an iterator over the values.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Return the length of the row.
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Append another row with self.
    ///
    /// # Arguments
    ///
    /// * `other` - Other row to append.
    pub fn merge(&self, other: &Self) -> Self {
        let mut values = self.values.clone();
        values.extend(other.values.iter().cloned());
        Self::new(values)
    }

    /// Canonical encoding of the whole row, used for dedup fingerprints.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.values.len() * 10);
        buf.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for value in &self.values {
            value.encode_canonical(&mut buf);
        }
        buf
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = String::new();
        for value in &self.values {
            res.push_str(&value.to_string());
            res.push('\t');
        }
        write!(f, "{}", res)
    }
}

/// Column descriptor. Pairs the name with the dtype and records which relation
/// produced the column.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column dtype.
    pub dtype: DataType,
    pub nullable: bool,
    /// Name (or alias) of the relation owning the column, if any.
    pub relation: Option<String>,
}

impl Column {
    /// Create a new nullable column with the given name and dtype.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the column.
    /// * `dtype` - Dtype of the column.
    pub fn new(name: &str, dtype: DataType) -> Self {
        Self {
            name: name.to_string(),
            dtype,
            nullable: true,
            relation: None,
        }
    }

    pub fn with_relation(mut self, relation: &str) -> Self {
        self.relation = Some(relation.to_string());
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Returns the name of the column.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the dtype of the column.
    pub fn dtype(&self) -> &DataType {
        &self.dtype
    }
}

/// Handle schemas.
#[derive(PartialEq, Clone, Debug, Serialize, Deserialize, Default)]
pub struct Schema {
    /// Columns of the schema.
    columns: Vec<Column>,
}

impl Schema {
    /// Create a new schema.
    ///
    /// # Arguments
    ///
    /// * `columns` - Columns of the schema in the order that they are in the schema.
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Create a new schema with the given names and dtypes.
    ///
    /// # Arguments
    ///
    /// * `names` - Names of the new schema.
    /// * `dtypes` - Dypes of the new schema.
    pub fn from_vecs(names: Vec<&str>, dtypes: Vec<DataType>) -> Self {
        let columns = names
            .iter()
            .zip(dtypes.into_iter())
            .map(|(name, dtype)| Column::new(name, dtype))
            .collect();
        Schema::new(columns)
    }

    /// Get the column from the given index.
    ///
    /// # Arguments
    ///
    /// * `i` - Index of the column to look for.
    pub fn get_column(&self, i: usize) -> Option<&Column> {
        self.columns.get(i)
    }

    /// Get an iterator of the columns.
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    /// Returns the length of the schema.
    pub fn size(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Merge two schemas into one.
    ///
    /// The other schema is appended to the current schema.
    ///
    /// # Arguments
    ///
    /// * `other` - Other schema to add to current schema.
    pub fn merge(&self, other: &Self) -> Self {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Self::new(columns)
    }

    /// Resolves a possibly qualified column reference to its index.
    ///
    /// # Arguments
    ///
    /// * `qualifier` - Relation name or alias the reference is qualified with.
    /// * `name` - Column name.
    pub fn resolve(&self, qualifier: Option<&str>, name: &str) -> Result<usize, EngineError> {
        let display = match qualifier {
            Some(q) => format!("{}.{}", q, name),
            None => name.to_string(),
        };
        let mut found = None;
        for (i, col) in self.columns.iter().enumerate() {
            if !col.name.eq_ignore_ascii_case(name) {
                continue;
            }
            if let Some(q) = qualifier {
                match &col.relation {
                    Some(rel) if rel.eq_ignore_ascii_case(q) => {}
                    _ => continue,
                }
            }
            if found.is_some() {
                return Err(EngineError::AmbiguousColumn(display));
            }
            found = Some(i);
        }
        found.ok_or(EngineError::UnknownColumn(display))
    }

    /// Checks that a row matches the schema in length and value types.
    ///
    /// # Arguments
    ///
    /// * `row` - Row to check.
    pub fn check_row(&self, row: &Row) -> Result<(), EngineError> {
        if row.size() != self.size() {
            return Err(EngineError::InternalError(format!(
                "row has {} values, schema has {} columns",
                row.size(),
                self.size()
            )));
        }
        for (value, col) in row.values().zip(self.columns()) {
            match value.data_type() {
                None if !col.nullable => {
                    return Err(EngineError::TypeMismatch(format!(
                        "null value for non-nullable column '{}'",
                        col.name
                    )))
                }
                Some(dtype) if !dtype.comparable_with(&col.dtype) => {
                    return Err(EngineError::TypeMismatch(format!(
                        "value of type {} in column '{}' of type {}",
                        dtype, col.name, col.dtype
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Describes the schema as a list of `{name, type, nullable}` maps.
    pub fn plan(&self) -> serde_json::Value {
        let cols: Vec<serde_json::Value> = self
            .columns
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "type": c.dtype.to_string(),
                    "nullable": c.nullable,
                })
            })
            .collect();
        serde_json::Value::Array(cols)
    }
}
