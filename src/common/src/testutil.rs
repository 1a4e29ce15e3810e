use crate::{Column, DataType, Row, Schema, Value};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::env;
use std::path::PathBuf;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Converts an int vector to a Row.
///
/// # Argument
///
/// * `data` - Data to put into row.
pub fn int_vec_to_row(data: Vec<i64>) -> Row {
    Row::new(data.into_iter().map(Value::Int).collect())
}

/// Creates a Vec of rows containing Int values given a 2D Vec of i64 's
pub fn create_row_list(row_data: Vec<Vec<i64>>) -> Vec<Row> {
    row_data.into_iter().map(int_vec_to_row).collect()
}

/// Creates a row of an int and a string, the shape used by most dedup tests.
pub fn int_str_row(i: i64, s: &str) -> Row {
    Row::new(vec![Value::Int(i), Value::String(s.to_string())])
}

/// Creates a new schema for a relation with width number of Int columns.
pub fn get_int_schema(width: usize) -> Schema {
    let columns = (0..width)
        .map(|i| Column::new(&format!("c{}", i), DataType::Int))
        .collect();
    Schema::new(columns)
}

/// Rows of random ints in `0..max`, `width` columns each.
pub fn gen_random_int_rows(n: usize, width: usize, max: i64) -> Vec<Row> {
    let mut rng = thread_rng();
    (0..n)
        .map(|_| {
            let values = (0..width).map(|_| Value::Int(rng.gen_range(0..max))).collect();
            Row::new(values)
        })
        .collect()
}

pub fn gen_rand_string(n: usize) -> String {
    thread_rng().sample_iter(Alphanumeric).take(n).map(char::from).collect()
}

pub fn gen_random_dir() -> PathBuf {
    init();
    let mut dir = env::temp_dir();
    dir.push(String::from("bitsql"));
    let rand_string = gen_rand_string(10);
    dir.push(rand_string);
    dir
}

/// First occurrence of every row, in input order.
pub fn first_occurrences(rows: &[Row]) -> Vec<Row> {
    let mut res: Vec<Row> = Vec::new();
    for row in rows {
        if !res.contains(row) {
            res.push(row.clone());
        }
    }
    res
}
