use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::instrument;

use parley_core::model::Event;

use crate::backend::{
    ColumnValue, Columns, KeyValue, Row, RowKey, ScanOptions, StorageBackend, WriteCondition,
};
use crate::codec::now_nanos;
use crate::error::StoreError;
use crate::row_helpers;
use crate::schema::TableNames;

/// Maximum rows one batch-delete call may carry.
pub const BATCH_WRITE_LIMIT: usize = 200;

/// Optional overrides for `append`.
#[derive(Clone, Debug, Default)]
pub struct AppendOptions {
    /// Framework-native serialized snapshot for exact round-trips.
    pub raw_event: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

/// Owns the event row-key layout. `seq_id` is never generated here: the
/// store's auto-increment column assigns it at append time, which keeps it
/// strictly increasing per session even under concurrent appenders.
pub struct EventEntityStore {
    backend: Arc<dyn StorageBackend>,
    tables: TableNames,
}

impl EventEntityStore {
    pub fn new(backend: Arc<dyn StorageBackend>, tables: TableNames) -> Self {
        Self { backend, tables }
    }

    fn session_prefix(agent_id: &str, user_id: &str, session_id: &str) -> RowKey {
        RowKey::new(vec![
            KeyValue::str(agent_id),
            KeyValue::str(user_id),
            KeyValue::str(session_id),
        ])
    }

    fn row_to_event(&self, row: &Row) -> Result<Event, StoreError> {
        let table = self.tables.event();
        let content_raw = row_helpers::require_str(row, &table, "content")?;
        Ok(Event {
            agent_id: row_helpers::key_str(&row.key, 0, &table)?,
            user_id: row_helpers::key_str(&row.key, 1, &table)?,
            session_id: row_helpers::key_str(&row.key, 2, &table)?,
            seq_id: row_helpers::key_int(&row.key, 3, &table)?,
            event_type: row_helpers::require_str(row, &table, "type")?.to_owned(),
            content: row_helpers::parse_json_map(content_raw, &table, "content")?,
            raw_event: row.str("raw_event").map(str::to_owned),
            created_at: row_helpers::require_int(row, &table, "created_at")?,
            updated_at: row_helpers::require_int(row, &table, "updated_at")?,
            version: row_helpers::require_int(row, &table, "version")?,
        })
    }

    /// Append an event. The returned event carries the store-assigned
    /// `seq_id`.
    #[instrument(skip(self, content, opts), fields(agent_id, user_id, session_id, event_type))]
    pub async fn append(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        event_type: &str,
        content: Map<String, Value>,
        opts: AppendOptions,
    ) -> Result<Event, StoreError> {
        let now = now_nanos();
        let created_at = opts.created_at.unwrap_or(now);
        let updated_at = opts.updated_at.unwrap_or(now);

        let content_raw = serde_json::to_string(&content)
            .map_err(|e| StoreError::InvalidArgument(format!("unserializable content: {e}")))?;
        let mut columns = Columns::from([
            ("type".to_string(), ColumnValue::str(event_type)),
            ("content".to_string(), ColumnValue::Str(content_raw)),
            ("created_at".to_string(), ColumnValue::Int(created_at)),
            ("updated_at".to_string(), ColumnValue::Int(updated_at)),
            ("version".to_string(), ColumnValue::Int(1)),
        ]);
        if let Some(raw_event) = &opts.raw_event {
            columns.insert("raw_event".into(), ColumnValue::str(raw_event));
        }

        let key = RowKey::new(vec![
            KeyValue::str(agent_id),
            KeyValue::str(user_id),
            KeyValue::str(session_id),
            KeyValue::AutoIncrement,
        ]);
        let materialized = self
            .backend
            .put(&self.tables.event(), &key, columns, WriteCondition::None)
            .await?;
        let seq_id = materialized.int_at(3).ok_or_else(|| {
            StoreError::corrupt(
                self.tables.event(),
                "seq_id",
                "store returned no materialized sequence",
            )
        })?;

        Ok(Event {
            agent_id: agent_id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            seq_id,
            event_type: event_type.to_string(),
            content,
            raw_event: opts.raw_event,
            created_at,
            updated_at,
            version: 1,
        })
    }

    /// All events of a session, ascending by `seq_id`.
    #[instrument(skip(self), fields(agent_id, user_id, session_id))]
    pub async fn list(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = self
            .backend
            .scan(
                &self.tables.event(),
                &Self::session_prefix(agent_id, user_id, session_id),
                ScanOptions::default(),
            )
            .await?;
        rows.iter().map(|r| self.row_to_event(r)).collect()
    }

    /// The last `n` events of a session, still ascending: a backward scan
    /// bounded to `n`, flipped before returning.
    #[instrument(skip(self), fields(agent_id, user_id, session_id, n))]
    pub async fn recent(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        n: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = self
            .backend
            .scan(
                &self.tables.event(),
                &Self::session_prefix(agent_id, user_id, session_id),
                ScanOptions {
                    reverse: true,
                    limit: Some(n),
                },
            )
            .await?;
        let mut events = rows
            .iter()
            .map(|r| self.row_to_event(r))
            .collect::<Result<Vec<_>, _>>()?;
        events.reverse();
        Ok(events)
    }

    /// Delete every event of a session: scan a batch worth of keys, delete
    /// them, repeat until the scan comes back empty. One scan can return
    /// more rows than one batch-delete call takes, hence the loop. Returns
    /// the number of rows deleted; re-running after a partial failure is
    /// safe because deletes are idempotent.
    #[instrument(skip(self), fields(agent_id, user_id, session_id))]
    pub async fn delete_all(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<u64, StoreError> {
        let prefix = Self::session_prefix(agent_id, user_id, session_id);
        let mut deleted: u64 = 0;
        loop {
            let rows = self
                .backend
                .scan(
                    &self.tables.event(),
                    &prefix,
                    ScanOptions {
                        reverse: false,
                        limit: Some(BATCH_WRITE_LIMIT),
                    },
                )
                .await?;
            if rows.is_empty() {
                return Ok(deleted);
            }
            let keys: Vec<RowKey> = rows.into_iter().map(|r| r.key).collect();
            self.backend.batch_delete(&self.tables.event(), &keys).await?;
            deleted += keys.len() as u64;
        }
    }
}
