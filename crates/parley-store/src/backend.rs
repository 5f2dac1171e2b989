use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;

/// One component of a composite row key.
///
/// `AutoIncrement` is a write-time placeholder: the store assigns the next
/// integer for that position and returns the materialized key from `put`.
/// It never appears in a stored key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    Str(String),
    Int(i64),
    AutoIncrement,
}

impl KeyValue {
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }
}

/// An ordered composite row key. Component order is the scan order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey(pub Vec<KeyValue>);

impl RowKey {
    pub fn new(components: Vec<KeyValue>) -> Self {
        Self(components)
    }

    pub fn starts_with(&self, prefix: &RowKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    pub fn str_at(&self, idx: usize) -> Option<&str> {
        match self.0.get(idx) {
            Some(KeyValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int_at(&self, idx: usize) -> Option<i64> {
        match self.0.get(idx) {
            Some(KeyValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn has_auto_increment(&self) -> bool {
        self.0.iter().any(|c| matches!(c, KeyValue::AutoIncrement))
    }
}

/// A sparse column value. The store's native types are 64-bit integers,
/// UTF-8 text, and booleans.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnValue {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl ColumnValue {
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

pub type Columns = BTreeMap<String, ColumnValue>;

/// A stored row: materialized key plus sparse named columns.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub key: RowKey,
    pub columns: Columns,
}

impl Row {
    pub fn int(&self, name: &str) -> Option<i64> {
        self.columns.get(name).and_then(ColumnValue::as_i64)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.columns.get(name).and_then(ColumnValue::as_str)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.columns.get(name).and_then(ColumnValue::as_bool)
    }
}

/// Write precondition for `put`/`update`.
///
/// `ExpectVersion` is the compare-and-swap on the `version` column that
/// carries the whole optimistic-concurrency protocol; `ExpectNotExist` makes
/// `put` an insert-only write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteCondition {
    None,
    ExpectNotExist,
    ExpectVersion(i64),
}

/// Column-level mutation applied by `update`: upserts plus deletes in one
/// write. `update` creates the row when it is absent.
#[derive(Clone, Debug, Default)]
pub struct RowUpdate {
    pub put: Columns,
    pub delete: Vec<String>,
}

/// Options for a prefix range scan.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScanOptions {
    pub reverse: bool,
    pub limit: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A predicate against the search index.
///
/// `Term` is exact (with element-wise matching when the stored value is a
/// serialized string array, the way keyword array fields behave); `Match` is
/// the full-text path; `Range` is numeric and inclusive on both bounds.
#[derive(Clone, Debug)]
pub enum SearchFilter {
    Term(String, ColumnValue),
    Match(String, String),
    Range {
        field: String,
        min: Option<i64>,
        max: Option<i64>,
    },
}

/// A query against the search index. Results carry an approximate total.
#[derive(Clone, Debug, Default)]
pub struct SearchQuery {
    pub filters: Vec<SearchFilter>,
    /// Overrides the index's declared pre-sort when set.
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Key component type in a table schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    Str,
    Int,
    /// Store-assigned, strictly increasing per key prefix.
    AutoIncrement,
}

/// Declared shape of a table: name plus ordered key schema.
#[derive(Clone, Debug)]
pub struct TableSpec {
    pub name: String,
    pub key: Vec<(String, KeyType)>,
}

/// Declared shape of a search index over one table.
#[derive(Clone, Debug)]
pub struct SearchIndexSpec {
    pub name: String,
    pub table: String,
    /// Exact-match fields (key components or columns).
    pub keyword_fields: Vec<String>,
    /// Numeric sortable fields.
    pub numeric_fields: Vec<String>,
    /// Full-text fields.
    pub text_fields: Vec<String>,
    /// The index is maintained pre-sorted by this field.
    pub default_sort: (String, SortOrder),
    /// Documents route to partitions by these fields.
    pub routing_fields: Vec<String>,
}

/// Primitive operations against the wide-column store. No business
/// semantics: entity stores own key layouts and protocols.
///
/// Implementations distinguish `StorageUnavailable` (transient, blindly
/// retryable) from `VersionConflict`/`AlreadyExists` (the caller must
/// re-read before retrying the business operation).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create a table. Fails with `AlreadyExists` when it is already there.
    async fn create_table(&self, spec: &TableSpec) -> Result<(), StoreError>;

    /// Declare a search index over a table. May take effect slowly; the
    /// index is eventually consistent with its source table.
    async fn create_search_index(&self, spec: &SearchIndexSpec) -> Result<(), StoreError>;

    /// Point read. `None` when no row exists.
    async fn get(&self, table: &str, key: &RowKey) -> Result<Option<Row>, StoreError>;

    /// Whole-row write. Resolves any `AutoIncrement` key component and
    /// returns the materialized key.
    async fn put(
        &self,
        table: &str,
        key: &RowKey,
        columns: Columns,
        condition: WriteCondition,
    ) -> Result<RowKey, StoreError>;

    /// Column-level upsert/delete on one row. Creates the row when absent
    /// (unless the condition forbids it).
    async fn update(
        &self,
        table: &str,
        key: &RowKey,
        update: RowUpdate,
        condition: WriteCondition,
    ) -> Result<(), StoreError>;

    /// Point delete. Deleting an absent row is a no-op.
    async fn delete(&self, table: &str, key: &RowKey) -> Result<(), StoreError>;

    /// Ordered prefix scan. Finite and restartable; the caller holds no
    /// cursor state between calls.
    async fn scan(
        &self,
        table: &str,
        prefix: &RowKey,
        opts: ScanOptions,
    ) -> Result<Vec<Row>, StoreError>;

    /// Best-effort batch delete. Partial failure returns the failed subset
    /// as `PartialFailure`.
    async fn batch_delete(&self, table: &str, keys: &[RowKey]) -> Result<(), StoreError>;

    /// Query the search index. Returns matching rows and an approximate
    /// total count.
    async fn search(&self, index: &str, query: &SearchQuery)
        -> Result<(Vec<Row>, i64), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_key_prefix() {
        let key = RowKey::new(vec![
            KeyValue::str("a"),
            KeyValue::str("u"),
            KeyValue::Int(3),
        ]);
        let prefix = RowKey::new(vec![KeyValue::str("a"), KeyValue::str("u")]);
        assert!(key.starts_with(&prefix));
        assert!(!prefix.starts_with(&key));
        assert!(key.starts_with(&key));
    }

    #[test]
    fn row_key_accessors() {
        let key = RowKey::new(vec![KeyValue::str("a"), KeyValue::Int(7)]);
        assert_eq!(key.str_at(0), Some("a"));
        assert_eq!(key.int_at(1), Some(7));
        assert_eq!(key.str_at(1), None);
        assert_eq!(key.int_at(2), None);
    }

    #[test]
    fn auto_increment_detection() {
        let key = RowKey::new(vec![KeyValue::str("a"), KeyValue::AutoIncrement]);
        assert!(key.has_auto_increment());
        assert!(!RowKey::new(vec![KeyValue::Int(1)]).has_auto_increment());
    }

    #[test]
    fn column_value_accessors() {
        assert_eq!(ColumnValue::Int(5).as_i64(), Some(5));
        assert_eq!(ColumnValue::str("x").as_str(), Some("x"));
        assert_eq!(ColumnValue::Bool(true).as_bool(), Some(true));
        assert_eq!(ColumnValue::Int(5).as_str(), None);
    }
}
