use std::sync::Arc;

use tracing::instrument;

use parley_core::keys::StateScope;
use parley_core::model::{StateData, StateMap};

use crate::backend::{
    ColumnValue, KeyValue, Row, RowKey, RowUpdate, StorageBackend, WriteCondition,
};
use crate::codec::{from_chunks, now_nanos, serialize_state, to_chunks, MAX_COLUMN_SIZE};
use crate::error::StoreError;
use crate::row_helpers;
use crate::schema::TableNames;

/// Shared logic for the three state scopes.
///
/// A state document is stored either inline in the `state` column
/// (`chunk_count = 0`) or sharded across `state_0 .. state_{n-1}` columns
/// (`chunk_count = n`) when its serialized form exceeds the per-column
/// ceiling. Exactly one of the two forms is populated at any time; writes
/// that shrink a document explicitly delete the columns the new form no
/// longer uses.
pub struct StateEntityStore {
    backend: Arc<dyn StorageBackend>,
    tables: TableNames,
}

impl StateEntityStore {
    pub fn new(backend: Arc<dyn StorageBackend>, tables: TableNames) -> Self {
        Self { backend, tables }
    }

    fn table_and_key(
        &self,
        scope: StateScope,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<(String, RowKey), StoreError> {
        if agent_id.is_empty() {
            return Err(StoreError::InvalidArgument("agent_id must be non-empty".into()));
        }
        match scope {
            StateScope::App => Ok((
                self.tables.app_state(),
                RowKey::new(vec![KeyValue::str(agent_id)]),
            )),
            StateScope::User => {
                if user_id.is_empty() {
                    return Err(StoreError::InvalidArgument(
                        "user_id must be non-empty for user state".into(),
                    ));
                }
                Ok((
                    self.tables.user_state(),
                    RowKey::new(vec![KeyValue::str(agent_id), KeyValue::str(user_id)]),
                ))
            }
            StateScope::Session => {
                if user_id.is_empty() || session_id.is_empty() {
                    return Err(StoreError::InvalidArgument(
                        "user_id and session_id must be non-empty for session state".into(),
                    ));
                }
                Ok((
                    self.tables.session_state(),
                    RowKey::new(vec![
                        KeyValue::str(agent_id),
                        KeyValue::str(user_id),
                        KeyValue::str(session_id),
                    ]),
                ))
            }
        }
    }

    /// Reassemble the serialized document from a stored row. `None` when the
    /// row carries no document (metadata-only row). A chunk column missing
    /// while `chunk_count` claims it exists is corruption, never silent
    /// truncation.
    fn decode_document(row: &Row, table: &str) -> Result<Option<String>, StoreError> {
        let chunk_count = row.int("chunk_count").unwrap_or(0);
        if chunk_count == 0 {
            return Ok(row.str("state").map(str::to_owned));
        }
        let mut chunks = Vec::with_capacity(chunk_count as usize);
        for idx in 0..chunk_count {
            let column = format!("state_{idx}");
            let chunk = row.str(&column).ok_or_else(|| {
                StoreError::corrupt(table, column.clone(), "missing state chunk")
            })?;
            chunks.push(chunk.to_owned());
        }
        Ok(Some(from_chunks(chunks)))
    }

    /// Read a scope's state document. `None` when the row is absent or
    /// carries no document.
    #[instrument(skip(self), fields(scope = %scope, agent_id, user_id, session_id))]
    pub async fn get(
        &self,
        scope: StateScope,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<StateData>, StoreError> {
        let (table, key) = self.table_and_key(scope, agent_id, user_id, session_id)?;
        let Some(row) = self.backend.get(&table, &key).await? else {
            return Ok(None);
        };
        let Some(raw) = Self::decode_document(&row, &table)? else {
            return Ok(None);
        };
        Ok(Some(StateData {
            state: row_helpers::parse_json_map(&raw, &table, "state")?,
            created_at: row.int("created_at").unwrap_or(0),
            updated_at: row.int("updated_at").unwrap_or(0),
            version: row.int("version").unwrap_or(0),
        }))
    }

    /// Apply a shallow patch: top-level patch keys overwrite the current
    /// document wholesale (nested values are replaced, never deep-merged),
    /// and a JSON `null` value removes its key. The merged document is
    /// re-serialized and re-chunked; columns the new layout no longer uses
    /// are deleted in the same write, so a shrinking document leaves no
    /// stale chunks behind.
    ///
    /// With `expected_version` set the write is an optimistic-lock update
    /// against that version; otherwise it locks on the version just read.
    #[instrument(skip(self, patch), fields(scope = %scope, agent_id, user_id, session_id))]
    pub async fn update(
        &self,
        scope: StateScope,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        patch: StateMap,
        expected_version: Option<i64>,
    ) -> Result<StateData, StoreError> {
        let (table, key) = self.table_and_key(scope, agent_id, user_id, session_id)?;
        let row = self.backend.get(&table, &key).await?;
        let row_exists = row.is_some();
        let old_chunk_count = row.as_ref().and_then(|r| r.int("chunk_count")).unwrap_or(0);
        let current_version = row.as_ref().and_then(|r| r.int("version")).unwrap_or(0);
        let current_created = row.as_ref().and_then(|r| r.int("created_at")).unwrap_or(0);
        let mut state = match &row {
            Some(row) => match Self::decode_document(row, &table)? {
                Some(raw) => row_helpers::parse_json_map(&raw, &table, "state")?,
                None => StateMap::new(),
            },
            None => StateMap::new(),
        };

        if let Some(expected) = expected_version {
            if expected != current_version {
                return Err(StoreError::VersionConflict(format!(
                    "{table} state: expected version {expected}, stored {current_version}"
                )));
            }
        }

        for (key_name, value) in patch {
            if value.is_null() {
                state.remove(&key_name);
            } else {
                state.insert(key_name, value);
            }
        }

        let raw = serialize_state(&state)?;
        let now = now_nanos();
        let created_at = if row_exists && current_created > 0 {
            current_created
        } else {
            now
        };
        let new_version = current_version + 1;

        let mut update = RowUpdate::default();
        update.put.insert("created_at".into(), ColumnValue::Int(created_at));
        update.put.insert("updated_at".into(), ColumnValue::Int(now));
        update.put.insert("version".into(), ColumnValue::Int(new_version));

        let new_chunk_count = if raw.chars().count() > MAX_COLUMN_SIZE {
            let chunks = to_chunks(&raw, MAX_COLUMN_SIZE);
            let count = chunks.len() as i64;
            for (idx, chunk) in chunks.into_iter().enumerate() {
                update.put.insert(format!("state_{idx}"), ColumnValue::Str(chunk));
            }
            if old_chunk_count == 0 {
                update.delete.push("state".into());
            }
            count
        } else {
            update.put.insert("state".into(), ColumnValue::Str(raw));
            0
        };
        update.put.insert("chunk_count".into(), ColumnValue::Int(new_chunk_count));
        for idx in new_chunk_count..old_chunk_count {
            update.delete.push(format!("state_{idx}"));
        }

        let condition = if row_exists {
            WriteCondition::ExpectVersion(expected_version.unwrap_or(current_version))
        } else {
            WriteCondition::None
        };
        self.backend.update(&table, &key, update, condition).await?;

        Ok(StateData {
            state,
            created_at,
            updated_at: now,
            version: new_version,
        })
    }

    /// Delete a scope's row. Deleting an absent row is a no-op.
    #[instrument(skip(self), fields(scope = %scope, agent_id, user_id, session_id))]
    pub async fn delete(
        &self,
        scope: StateScope,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), StoreError> {
        let (table, key) = self.table_and_key(scope, agent_id, user_id, session_id)?;
        self.backend.delete(&table, &key).await
    }
}
