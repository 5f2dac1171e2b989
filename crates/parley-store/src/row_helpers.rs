//! Decoding helpers that turn missing/mistyped stored data into
//! `CorruptRow` errors naming the offending table and column.

use serde_json::{Map, Value};

use crate::backend::{Row, RowKey};
use crate::error::StoreError;

pub fn require_int(row: &Row, table: &str, column: &str) -> Result<i64, StoreError> {
    row.int(column)
        .ok_or_else(|| StoreError::corrupt(table, column, "missing or non-integer column"))
}

pub fn require_str<'a>(row: &'a Row, table: &str, column: &str) -> Result<&'a str, StoreError> {
    row.str(column)
        .ok_or_else(|| StoreError::corrupt(table, column, "missing or non-text column"))
}

pub fn key_str(key: &RowKey, idx: usize, table: &str) -> Result<String, StoreError> {
    key.str_at(idx).map(str::to_owned).ok_or_else(|| {
        StoreError::corrupt(table, format!("key[{idx}]"), "missing or non-text key component")
    })
}

pub fn key_int(key: &RowKey, idx: usize, table: &str) -> Result<i64, StoreError> {
    key.int_at(idx).ok_or_else(|| {
        StoreError::corrupt(
            table,
            format!("key[{idx}]"),
            "missing or non-integer key component",
        )
    })
}

/// Parse a JSON-object text column.
pub fn parse_json_map(
    raw: &str,
    table: &str,
    column: &str,
) -> Result<Map<String, Value>, StoreError> {
    crate::codec::deserialize_state(raw, table, column)
}
