use std::sync::Arc;

use tracing::{instrument, warn};

use parley_core::model::{NewSessionAttrs, Session, SessionPatch};

use crate::backend::{
    ColumnValue, Columns, KeyValue, Row, RowKey, RowUpdate, ScanOptions, SearchFilter,
    SearchQuery, StorageBackend, WriteCondition,
};
use crate::codec::now_nanos;
use crate::error::StoreError;
use crate::row_helpers;
use crate::schema::TableNames;

/// Attribute filters for `search`. All set fields must match.
#[derive(Clone, Debug, Default)]
pub struct SessionFilter {
    pub user_id: Option<String>,
    /// Full-text keyword match against `summary`.
    pub summary_keyword: Option<String>,
    /// Exact match against a stored label.
    pub labels: Option<String>,
    pub framework: Option<String>,
    pub updated_after: Option<i64>,
    pub updated_before: Option<i64>,
    pub is_pinned: Option<bool>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Owns the session row-key layout, the recency (secondary) index, and the
/// optimistic-concurrency protocol for session rows.
///
/// Index maintenance is best-effort, not transactional: the primary row is
/// always written first, so a crash or index-write failure leaves the index
/// *behind*, never pointing at attribute state that was never committed.
pub struct SessionEntityStore {
    backend: Arc<dyn StorageBackend>,
    tables: TableNames,
}

impl SessionEntityStore {
    pub fn new(backend: Arc<dyn StorageBackend>, tables: TableNames) -> Self {
        Self { backend, tables }
    }

    fn primary_key(agent_id: &str, user_id: &str, session_id: &str) -> RowKey {
        RowKey::new(vec![
            KeyValue::str(agent_id),
            KeyValue::str(user_id),
            KeyValue::str(session_id),
        ])
    }

    fn index_key(session: &Session) -> RowKey {
        RowKey::new(vec![
            KeyValue::str(&session.agent_id),
            KeyValue::str(&session.user_id),
            KeyValue::Int(session.updated_at),
            KeyValue::str(&session.session_id),
        ])
    }

    fn attr_columns(session: &Session) -> Result<Columns, StoreError> {
        let mut columns = Columns::from([
            ("created_at".to_string(), ColumnValue::Int(session.created_at)),
            ("updated_at".to_string(), ColumnValue::Int(session.updated_at)),
            ("is_pinned".to_string(), ColumnValue::Bool(session.is_pinned)),
            ("version".to_string(), ColumnValue::Int(session.version)),
        ]);
        if let Some(summary) = &session.summary {
            columns.insert("summary".into(), ColumnValue::str(summary));
        }
        if let Some(labels) = &session.labels {
            columns.insert("labels".into(), ColumnValue::str(labels));
        }
        if let Some(framework) = &session.framework {
            columns.insert("framework".into(), ColumnValue::str(framework));
        }
        if let Some(extensions) = &session.extensions {
            columns.insert("extensions".into(), ColumnValue::Str(encode_extensions(extensions)?));
        }
        Ok(columns)
    }

    /// Denormalized attribute copy carried by the recency index, so `list`
    /// needs no second round-trip to the primary table.
    fn index_columns(session: &Session) -> Result<Columns, StoreError> {
        let mut columns = Columns::new();
        if let Some(summary) = &session.summary {
            columns.insert("summary".into(), ColumnValue::str(summary));
        }
        if let Some(labels) = &session.labels {
            columns.insert("labels".into(), ColumnValue::str(labels));
        }
        if let Some(framework) = &session.framework {
            columns.insert("framework".into(), ColumnValue::str(framework));
        }
        if let Some(extensions) = &session.extensions {
            columns.insert("extensions".into(), ColumnValue::Str(encode_extensions(extensions)?));
        }
        Ok(columns)
    }

    fn row_to_session(&self, row: &Row) -> Result<Session, StoreError> {
        let table = self.tables.session();
        let extensions = match row.str("extensions") {
            Some(raw) => Some(row_helpers::parse_json_map(raw, &table, "extensions")?),
            None => None,
        };
        Ok(Session {
            agent_id: row_helpers::key_str(&row.key, 0, &table)?,
            user_id: row_helpers::key_str(&row.key, 1, &table)?,
            session_id: row_helpers::key_str(&row.key, 2, &table)?,
            created_at: row_helpers::require_int(row, &table, "created_at")?,
            updated_at: row_helpers::require_int(row, &table, "updated_at")?,
            is_pinned: row.bool("is_pinned").unwrap_or(false),
            summary: row.str("summary").map(str::to_owned),
            labels: row.str("labels").map(str::to_owned),
            framework: row.str("framework").map(str::to_owned),
            extensions,
            version: row_helpers::require_int(row, &table, "version")?,
        })
    }

    /// Hydrate from a recency-index row. The index carries `updated_at` in
    /// its key and only the denormalized attribute copy; `created_at`,
    /// `is_pinned`, and `version` are not denormalized and read as defaults.
    fn index_row_to_session(&self, row: &Row) -> Result<Session, StoreError> {
        let table = self.tables.secondary_index();
        let extensions = match row.str("extensions") {
            Some(raw) => Some(row_helpers::parse_json_map(raw, &table, "extensions")?),
            None => None,
        };
        Ok(Session {
            agent_id: row_helpers::key_str(&row.key, 0, &table)?,
            user_id: row_helpers::key_str(&row.key, 1, &table)?,
            updated_at: row_helpers::key_int(&row.key, 2, &table)?,
            session_id: row_helpers::key_str(&row.key, 3, &table)?,
            created_at: 0,
            is_pinned: false,
            summary: row.str("summary").map(str::to_owned),
            labels: row.str("labels").map(str::to_owned),
            framework: row.str("framework").map(str::to_owned),
            extensions,
            version: 0,
        })
    }

    async fn write_index_row(&self, session: &Session) {
        let result = async {
            let columns = Self::index_columns(session)?;
            self.backend
                .put(
                    &self.tables.secondary_index(),
                    &Self::index_key(session),
                    columns,
                    WriteCondition::None,
                )
                .await
        }
        .await;
        if let Err(e) = result {
            warn!(session = %session.key(), error = %e, "recency index write failed; index lags until next update");
        }
    }

    async fn delete_index_row(&self, session: &Session) {
        if let Err(e) = self
            .backend
            .delete(&self.tables.secondary_index(), &Self::index_key(session))
            .await
        {
            warn!(session = %session.key(), error = %e, "recency index delete failed; dangling entry is skipped on list");
        }
    }

    /// Create a session. Fails with `AlreadyExists` when the key is taken;
    /// the write is insert-only, so a lost race never clobbers a row.
    #[instrument(skip(self, attrs), fields(agent_id, user_id, session_id))]
    pub async fn create(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        attrs: NewSessionAttrs,
    ) -> Result<Session, StoreError> {
        if agent_id.is_empty() || user_id.is_empty() || session_id.is_empty() {
            return Err(StoreError::InvalidArgument(
                "agent_id, user_id and session_id must be non-empty".into(),
            ));
        }
        let now = now_nanos();
        let session = Session {
            agent_id: agent_id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            created_at: now,
            updated_at: now,
            is_pinned: attrs.is_pinned,
            summary: attrs.summary,
            labels: attrs.labels,
            framework: attrs.framework,
            extensions: attrs.extensions,
            version: 1,
        };

        let columns = Self::attr_columns(&session)?;
        self.backend
            .put(
                &self.tables.session(),
                &Self::primary_key(agent_id, user_id, session_id),
                columns,
                WriteCondition::ExpectNotExist,
            )
            .await?;

        // Primary row is committed; the index write may lag behind it.
        self.write_index_row(&session).await;
        Ok(session)
    }

    #[instrument(skip(self), fields(agent_id, user_id, session_id))]
    pub async fn get(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let row = self
            .backend
            .get(
                &self.tables.session(),
                &Self::primary_key(agent_id, user_id, session_id),
            )
            .await?;
        row.map(|r| self.row_to_session(&r)).transpose()
    }

    /// List one user's sessions, most recently updated first, hydrated from
    /// the recency index. Entries that fail to hydrate (index lag, corrupt
    /// denormalization) are skipped.
    #[instrument(skip(self), fields(agent_id, user_id))]
    pub async fn list(
        &self,
        agent_id: &str,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Session>, StoreError> {
        let prefix = RowKey::new(vec![KeyValue::str(agent_id), KeyValue::str(user_id)]);
        let rows = self
            .backend
            .scan(
                &self.tables.secondary_index(),
                &prefix,
                ScanOptions {
                    reverse: true,
                    limit,
                },
            )
            .await?;
        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.index_row_to_session(row) {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!(error = %e, "skipping unhydratable recency index entry");
                }
            }
        }
        Ok(sessions)
    }

    /// List every session under an agent via a primary-table prefix scan,
    /// ordered by `(user_id, session_id)`. The recency index cannot serve
    /// this: a shorter index prefix would interleave users and lose global
    /// recency order.
    #[instrument(skip(self), fields(agent_id))]
    pub async fn list_all(
        &self,
        agent_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Session>, StoreError> {
        let prefix = RowKey::new(vec![KeyValue::str(agent_id)]);
        let rows = self
            .backend
            .scan(
                &self.tables.session(),
                &prefix,
                ScanOptions {
                    reverse: false,
                    limit,
                },
            )
            .await?;
        rows.iter().map(|r| self.row_to_session(r)).collect()
    }

    /// Query the search index. Eventually consistent: results may lag the
    /// latest primary-row state. Returns sessions plus an approximate total.
    #[instrument(skip(self, filter), fields(agent_id))]
    pub async fn search(
        &self,
        agent_id: &str,
        filter: &SessionFilter,
    ) -> Result<(Vec<Session>, i64), StoreError> {
        let mut filters = vec![SearchFilter::Term(
            "agent_id".into(),
            ColumnValue::str(agent_id),
        )];
        if let Some(user_id) = &filter.user_id {
            filters.push(SearchFilter::Term("user_id".into(), ColumnValue::str(user_id)));
        }
        if let Some(keyword) = &filter.summary_keyword {
            filters.push(SearchFilter::Match("summary".into(), keyword.clone()));
        }
        if let Some(label) = &filter.labels {
            filters.push(SearchFilter::Term("labels".into(), ColumnValue::str(label)));
        }
        if let Some(framework) = &filter.framework {
            filters.push(SearchFilter::Term(
                "framework".into(),
                ColumnValue::str(framework),
            ));
        }
        if let Some(pinned) = filter.is_pinned {
            filters.push(SearchFilter::Term("is_pinned".into(), ColumnValue::Bool(pinned)));
        }
        if filter.updated_after.is_some() || filter.updated_before.is_some() {
            filters.push(SearchFilter::Range {
                field: "updated_at".into(),
                min: filter.updated_after,
                max: filter.updated_before,
            });
        }

        let query = SearchQuery {
            filters,
            sort: None,
            limit: filter.limit,
            offset: filter.offset,
        };
        let (rows, total) = self
            .backend
            .search(&self.tables.search_index(), &query)
            .await?;
        let sessions = rows
            .iter()
            .map(|r| self.row_to_session(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((sessions, total))
    }

    /// Apply a shallow attribute patch under optimistic lock. The stored
    /// version must equal `expected_version`; on success the row moves to
    /// `expected_version + 1` and `updated_at` is refreshed.
    ///
    /// The index key embeds `updated_at`, so the old index row is deleted
    /// and a new one inserted — never updated in place.
    #[instrument(skip(self, patch), fields(agent_id, user_id, session_id, expected_version))]
    pub async fn update(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        patch: SessionPatch,
        expected_version: i64,
    ) -> Result<Session, StoreError> {
        let current = self
            .get(agent_id, user_id, session_id)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("session {agent_id}/{user_id}/{session_id}"))
            })?;

        let mut updated = current.clone();
        updated.updated_at = now_nanos();
        updated.version = expected_version + 1;
        if let Some(is_pinned) = patch.is_pinned {
            updated.is_pinned = is_pinned;
        }
        if let Some(summary) = patch.summary {
            updated.summary = Some(summary);
        }
        if let Some(labels) = patch.labels {
            updated.labels = Some(labels);
        }
        if let Some(extensions) = patch.extensions {
            updated.extensions = Some(extensions);
        }

        self.backend
            .update(
                &self.tables.session(),
                &Self::primary_key(agent_id, user_id, session_id),
                RowUpdate {
                    put: Self::attr_columns(&updated)?,
                    delete: vec![],
                },
                WriteCondition::ExpectVersion(expected_version),
            )
            .await?;

        if current.updated_at != updated.updated_at {
            self.delete_index_row(&current).await;
        }
        self.write_index_row(&updated).await;
        Ok(updated)
    }

    /// Delete the primary row and its index row. Events and state rows are
    /// the facade's cascade, not ours. Deleting an absent session is a
    /// no-op, so a partially-failed cascade can always be re-run.
    #[instrument(skip(self), fields(agent_id, user_id, session_id))]
    pub async fn delete(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), StoreError> {
        let Some(current) = self.get(agent_id, user_id, session_id).await? else {
            return Ok(());
        };
        self.backend
            .delete(
                &self.tables.session(),
                &Self::primary_key(agent_id, user_id, session_id),
            )
            .await?;
        self.delete_index_row(&current).await;
        Ok(())
    }
}

fn encode_extensions(extensions: &serde_json::Map<String, serde_json::Value>) -> Result<String, StoreError> {
    serde_json::to_string(extensions)
        .map_err(|e| StoreError::InvalidArgument(format!("unserializable extensions: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use serde_json::json;

    async fn setup() -> SessionEntityStore {
        let backend = Arc::new(MemoryBackend::new());
        let tables = TableNames::default();
        for spec in tables.core_table_specs() {
            backend.create_table(&spec).await.unwrap();
        }
        backend
            .create_search_index(&tables.search_index_spec())
            .await
            .unwrap();
        SessionEntityStore::new(backend, tables)
    }

    fn attrs(summary: &str) -> NewSessionAttrs {
        NewSessionAttrs {
            summary: Some(summary.into()),
            framework: Some("adk".into()),
            labels: Some(r#"["tag"]"#.into()),
            extensions: json!({"k": "v"}).as_object().cloned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_get_roundtrip() {
        let store = setup().await;
        let created = store.create("a1", "u1", "s1", attrs("hello")).await.unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.created_at, created.updated_at);

        let fetched = store.get("a1", "u1", "s1").await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.summary.as_deref(), Some("hello"));
        assert_eq!(fetched.framework.as_deref(), Some("adk"));
        assert_eq!(fetched.extensions, json!({"k": "v"}).as_object().cloned());
    }

    #[tokio::test]
    async fn get_absent_is_none() {
        let store = setup().await;
        assert!(store.get("a1", "u1", "ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_create_conflicts_and_preserves_original() {
        let store = setup().await;
        let first = store.create("a1", "u1", "s1", attrs("first")).await.unwrap();
        let err = store
            .create("a1", "u1", "s1", attrs("second"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        let fetched = store.get("a1", "u1", "s1").await.unwrap().unwrap();
        assert_eq!(fetched.summary, first.summary);
    }

    #[tokio::test]
    async fn empty_key_component_rejected() {
        let store = setup().await;
        let err = store
            .create("a1", "", "s1", NewSessionAttrs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let store = setup().await;
        let created = store.create("a1", "u1", "s1", attrs("v1")).await.unwrap();
        store
            .update(
                "a1",
                "u1",
                "s1",
                SessionPatch {
                    summary: Some("v2".into()),
                    ..Default::default()
                },
                created.version,
            )
            .await
            .unwrap();

        // Re-using the original version must fail and leave the row as-is
        let err = store
            .update(
                "a1",
                "u1",
                "s1",
                SessionPatch {
                    summary: Some("v3".into()),
                    ..Default::default()
                },
                created.version,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict(_)));

        let fetched = store.get("a1", "u1", "s1").await.unwrap().unwrap();
        assert_eq!(fetched.summary.as_deref(), Some("v2"));
        assert_eq!(fetched.version, 2);
    }

    #[tokio::test]
    async fn update_increments_version_and_refreshes_updated_at() {
        let store = setup().await;
        let created = store.create("a1", "u1", "s1", attrs("v1")).await.unwrap();
        let updated = store
            .update(
                "a1",
                "u1",
                "s1",
                SessionPatch {
                    is_pinned: Some(true),
                    ..Default::default()
                },
                1,
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert!(updated.updated_at > created.updated_at);
        assert!(updated.is_pinned);
        // Untouched fields survive the shallow patch
        assert_eq!(updated.summary.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn update_missing_session_is_not_found() {
        let store = setup().await;
        let err = store
            .update("a1", "u1", "ghost", SessionPatch::default(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_orders_by_recency() {
        let store = setup().await;
        store.create("a1", "u1", "s1", attrs("one")).await.unwrap();
        store.create("a1", "u1", "s2", attrs("two")).await.unwrap();
        store.create("a1", "u1", "s3", attrs("three")).await.unwrap();

        // Touch s1 so it becomes the most recent
        store
            .update("a1", "u1", "s1", SessionPatch::default(), 1)
            .await
            .unwrap();

        let sessions = store.list("a1", "u1", None).await.unwrap();
        let ids: Vec<_> = sessions.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s3", "s2"]);
        // Hydrated from denormalized index attributes, no primary read
        assert_eq!(sessions[0].summary.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn list_respects_limit() {
        let store = setup().await;
        for id in ["s1", "s2", "s3", "s4"] {
            store.create("a1", "u1", id, attrs(id)).await.unwrap();
        }
        let sessions = store.list("a1", "u1", Some(2)).await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "s4");
    }

    #[tokio::test]
    async fn update_leaves_no_stale_index_entry() {
        let store = setup().await;
        store.create("a1", "u1", "s1", attrs("old")).await.unwrap();
        store
            .update(
                "a1",
                "u1",
                "s1",
                SessionPatch {
                    summary: Some("new".into()),
                    ..Default::default()
                },
                1,
            )
            .await
            .unwrap();

        let sessions = store.list("a1", "u1", None).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].summary.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn list_all_scans_across_users() {
        let store = setup().await;
        store.create("a1", "u1", "s1", attrs("x")).await.unwrap();
        store.create("a1", "u2", "s2", attrs("y")).await.unwrap();
        store.create("other", "u1", "s3", attrs("z")).await.unwrap();

        let sessions = store.list_all("a1", None).await.unwrap();
        assert_eq!(sessions.len(), 2);
        // Full hydration from the primary table
        assert_eq!(sessions[0].version, 1);
        assert!(sessions[0].created_at > 0);
    }

    #[tokio::test]
    async fn search_by_keyword_and_framework() {
        let store = setup().await;
        store
            .create(
                "a1",
                "u1",
                "s1",
                NewSessionAttrs {
                    summary: Some("planning a trip to Kyoto".into()),
                    framework: Some("adk".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .create(
                "a1",
                "u1",
                "s2",
                NewSessionAttrs {
                    summary: Some("weather talk".into()),
                    framework: Some("langchain".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let (sessions, total) = store
            .search(
                "a1",
                &SessionFilter {
                    summary_keyword: Some("trip".into()),
                    framework: Some("adk".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(sessions[0].session_id, "s1");
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_clears_index() {
        let store = setup().await;
        store.create("a1", "u1", "s1", attrs("x")).await.unwrap();
        store.delete("a1", "u1", "s1").await.unwrap();

        assert!(store.get("a1", "u1", "s1").await.unwrap().is_none());
        assert!(store.list("a1", "u1", None).await.unwrap().is_empty());

        // Second delete of the same key does not fail
        store.delete("a1", "u1", "s1").await.unwrap();
    }
}
