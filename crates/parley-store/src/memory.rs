//! In-process wide-column store emulation.
//!
//! Implements the full [`StorageBackend`] contract over `BTreeMap` rows:
//! ordered composite keys, conditional writes, per-prefix auto-increment,
//! prefix scans, and a filter-evaluating search path. The reference backend
//! for tests and embedded use; unlike a real substrate its search index is
//! immediately consistent.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::backend::{
    ColumnValue, Columns, KeyType, KeyValue, Row, RowKey, RowUpdate, ScanOptions, SearchFilter,
    SearchIndexSpec, SearchQuery, SortOrder, StorageBackend, TableSpec, WriteCondition,
};
use crate::error::StoreError;

struct TableState {
    spec: TableSpec,
    rows: BTreeMap<RowKey, Columns>,
    /// Next-sequence counters, keyed by the key prefix before the
    /// auto-increment component.
    counters: HashMap<RowKey, i64>,
}

#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, TableState>>,
    indexes: RwLock<HashMap<String, SearchIndexSpec>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_condition(
        existing: Option<&Columns>,
        condition: WriteCondition,
        table: &str,
        key: &RowKey,
    ) -> Result<(), StoreError> {
        match condition {
            WriteCondition::None => Ok(()),
            WriteCondition::ExpectNotExist => {
                if existing.is_some() {
                    Err(StoreError::AlreadyExists(format!("{table} row {key:?}")))
                } else {
                    Ok(())
                }
            }
            WriteCondition::ExpectVersion(expected) => {
                let stored = existing
                    .and_then(|columns| columns.get("version"))
                    .and_then(ColumnValue::as_i64);
                if stored == Some(expected) {
                    Ok(())
                } else {
                    Err(StoreError::VersionConflict(format!(
                        "{table} row {key:?}: expected version {expected}, stored {stored:?}"
                    )))
                }
            }
        }
    }
}

fn table<'a>(
    tables: &'a HashMap<String, TableState>,
    name: &str,
) -> Result<&'a TableState, StoreError> {
    tables
        .get(name)
        .ok_or_else(|| StoreError::InvalidArgument(format!("table not provisioned: {name}")))
}

fn table_mut<'a>(
    tables: &'a mut HashMap<String, TableState>,
    name: &str,
) -> Result<&'a mut TableState, StoreError> {
    tables
        .get_mut(name)
        .ok_or_else(|| StoreError::InvalidArgument(format!("table not provisioned: {name}")))
}

impl TableState {
    fn check_key(&self, key: &RowKey) -> Result<(), StoreError> {
        if key.0.len() != self.spec.key.len() {
            return Err(StoreError::InvalidArgument(format!(
                "table {}: key has {} components, schema wants {}",
                self.spec.name,
                key.0.len(),
                self.spec.key.len()
            )));
        }
        Ok(())
    }

    /// Replace any `AutoIncrement` placeholder with the next sequence for
    /// its key prefix. Counters start at 1 and only move forward, so
    /// assigned values are strictly increasing per prefix.
    fn materialize(&mut self, key: &RowKey) -> Result<RowKey, StoreError> {
        let mut components = Vec::with_capacity(key.0.len());
        for (idx, component) in key.0.iter().enumerate() {
            match component {
                KeyValue::AutoIncrement => {
                    if self.spec.key[idx].1 != KeyType::AutoIncrement {
                        return Err(StoreError::InvalidArgument(format!(
                            "table {}: component {idx} is not auto-increment",
                            self.spec.name
                        )));
                    }
                    let prefix = RowKey::new(components.clone());
                    let counter = self.counters.entry(prefix).or_insert(0);
                    *counter += 1;
                    components.push(KeyValue::Int(*counter));
                }
                other => components.push(other.clone()),
            }
        }
        Ok(RowKey::new(components))
    }

    /// Resolve a field by name against a row's key components first, then
    /// its columns.
    fn field(&self, key: &RowKey, columns: &Columns, name: &str) -> Option<ColumnValue> {
        if let Some(idx) = self.spec.key.iter().position(|(n, _)| n == name) {
            return match key.0.get(idx) {
                Some(KeyValue::Str(s)) => Some(ColumnValue::Str(s.clone())),
                Some(KeyValue::Int(n)) => Some(ColumnValue::Int(*n)),
                _ => None,
            };
        }
        columns.get(name).cloned()
    }
}

fn term_matches(stored: &ColumnValue, wanted: &ColumnValue) -> bool {
    if stored == wanted {
        return true;
    }
    // Keyword array fields: a serialized string array matches per element.
    if let (ColumnValue::Str(raw), ColumnValue::Str(term)) = (stored, wanted) {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(raw) {
            return items.iter().any(|item| item.as_str() == Some(term));
        }
    }
    false
}

fn filter_matches(state: &TableState, key: &RowKey, columns: &Columns, filter: &SearchFilter) -> bool {
    match filter {
        SearchFilter::Term(field, wanted) => state
            .field(key, columns, field)
            .is_some_and(|stored| term_matches(&stored, wanted)),
        SearchFilter::Match(field, text) => state
            .field(key, columns, field)
            .and_then(|v| v.as_str().map(str::to_lowercase))
            .is_some_and(|stored| stored.contains(&text.to_lowercase())),
        SearchFilter::Range { field, min, max } => {
            match state.field(key, columns, field).and_then(|v| v.as_i64()) {
                Some(n) => min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi),
                None => false,
            }
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn create_table(&self, spec: &TableSpec) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.contains_key(&spec.name) {
            return Err(StoreError::AlreadyExists(format!("table {}", spec.name)));
        }
        tables.insert(
            spec.name.clone(),
            TableState {
                spec: spec.clone(),
                rows: BTreeMap::new(),
                counters: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn create_search_index(&self, spec: &SearchIndexSpec) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write();
        if indexes.contains_key(&spec.name) {
            return Err(StoreError::AlreadyExists(format!("index {}", spec.name)));
        }
        indexes.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn get(&self, table_name: &str, key: &RowKey) -> Result<Option<Row>, StoreError> {
        let tables = self.tables.read();
        let state = table(&tables, table_name)?;
        state.check_key(key)?;
        Ok(state.rows.get(key).map(|columns| Row {
            key: key.clone(),
            columns: columns.clone(),
        }))
    }

    async fn put(
        &self,
        table_name: &str,
        key: &RowKey,
        columns: Columns,
        condition: WriteCondition,
    ) -> Result<RowKey, StoreError> {
        let mut tables = self.tables.write();
        let state = table_mut(&mut tables, table_name)?;
        state.check_key(key)?;
        let materialized = state.materialize(key)?;
        Self::check_condition(state.rows.get(&materialized), condition, table_name, &materialized)?;
        state.rows.insert(materialized.clone(), columns);
        Ok(materialized)
    }

    async fn update(
        &self,
        table_name: &str,
        key: &RowKey,
        update: RowUpdate,
        condition: WriteCondition,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let state = table_mut(&mut tables, table_name)?;
        state.check_key(key)?;
        Self::check_condition(state.rows.get(key), condition, table_name, key)?;
        let columns = state.rows.entry(key.clone()).or_default();
        for name in &update.delete {
            columns.remove(name);
        }
        for (name, value) in update.put {
            columns.insert(name, value);
        }
        Ok(())
    }

    async fn delete(&self, table_name: &str, key: &RowKey) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let state = table_mut(&mut tables, table_name)?;
        state.check_key(key)?;
        state.rows.remove(key);
        Ok(())
    }

    async fn scan(
        &self,
        table_name: &str,
        prefix: &RowKey,
        opts: ScanOptions,
    ) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read();
        let state = table(&tables, table_name)?;
        let matching = state
            .rows
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, columns)| Row {
                key: key.clone(),
                columns: columns.clone(),
            });
        let limit = opts.limit.unwrap_or(usize::MAX);
        let rows = if opts.reverse {
            matching.collect::<Vec<_>>().into_iter().rev().take(limit).collect()
        } else {
            matching.take(limit).collect()
        };
        Ok(rows)
    }

    async fn batch_delete(&self, table_name: &str, keys: &[RowKey]) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let state = table_mut(&mut tables, table_name)?;
        for key in keys {
            state.rows.remove(key);
        }
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        query: &SearchQuery,
    ) -> Result<(Vec<Row>, i64), StoreError> {
        let indexes = self.indexes.read();
        let spec = indexes
            .get(index)
            .ok_or_else(|| StoreError::InvalidArgument(format!("index not provisioned: {index}")))?;
        let tables = self.tables.read();
        let state = table(&tables, &spec.table)?;

        let mut matched: Vec<Row> = state
            .rows
            .iter()
            .filter(|(key, columns)| {
                query
                    .filters
                    .iter()
                    .all(|f| filter_matches(state, key, columns, f))
            })
            .map(|(key, columns)| Row {
                key: key.clone(),
                columns: columns.clone(),
            })
            .collect();

        let (sort_field, order) = query
            .sort
            .clone()
            .unwrap_or_else(|| spec.default_sort.clone());
        matched.sort_by(|a, b| {
            let fa = state
                .field(&a.key, &a.columns, &sort_field)
                .and_then(|v| v.as_i64())
                .unwrap_or(i64::MIN);
            let fb = state
                .field(&b.key, &b.columns, &sort_field)
                .and_then(|v| v.as_i64())
                .unwrap_or(i64::MIN);
            match order {
                SortOrder::Asc => fa.cmp(&fb),
                SortOrder::Desc => fb.cmp(&fa),
            }
        });

        let total = matched.len() as i64;
        let rows = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok((rows, total))
    }
}
