use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use parley_core::keys::StateScope;
use parley_core::model::{Event, NewSessionAttrs, Session, SessionPatch, StateData, StateMap};

use crate::backend::{StorageBackend, TableSpec};
use crate::error::StoreError;
use crate::events::{AppendOptions, EventEntityStore};
use crate::schema::TableNames;
use crate::sessions::{SessionEntityStore, SessionFilter};
use crate::state::StateEntityStore;

/// The facade external collaborators talk to. Composes the three entity
/// stores into cross-entity operations: cascading delete, the three-tier
/// state merge, and table/index provisioning.
///
/// Every operation is a bounded sequence of storage calls with no in-process
/// locking; concurrency control is the substrate's conditional write. The
/// multi-row operations (append's session touch, cascading delete) are not
/// atomic, and every step is idempotent so an interrupted operation is safe
/// to re-run.
pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
    tables: TableNames,
    sessions: SessionEntityStore,
    events: EventEntityStore,
    state: StateEntityStore,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_table_prefix(backend, "")
    }

    /// A table-name prefix isolates tenants sharing one store instance.
    pub fn with_table_prefix(backend: Arc<dyn StorageBackend>, prefix: &str) -> Self {
        let tables = TableNames::new(prefix);
        Self {
            sessions: SessionEntityStore::new(backend.clone(), tables.clone()),
            events: EventEntityStore::new(backend.clone(), tables.clone()),
            state: StateEntityStore::new(backend.clone(), tables.clone()),
            backend,
            tables,
        }
    }

    pub fn table_names(&self) -> &TableNames {
        &self.tables
    }

    async fn create_table_tolerant(&self, spec: &TableSpec) -> Result<(), StoreError> {
        match self.backend.create_table(spec).await {
            Err(StoreError::AlreadyExists(_)) => {
                debug!(table = %spec.name, "table already provisioned, skipping");
                Ok(())
            }
            other => other,
        }
    }

    /// Create the session, event, and recency-index tables. Idempotent.
    #[instrument(skip(self))]
    pub async fn init_core_tables(&self) -> Result<(), StoreError> {
        for spec in self.tables.core_table_specs() {
            self.create_table_tolerant(&spec).await?;
        }
        Ok(())
    }

    /// Create the three state-scope tables. Idempotent.
    #[instrument(skip(self))]
    pub async fn init_state_tables(&self) -> Result<(), StoreError> {
        for spec in self.tables.state_table_specs() {
            self.create_table_tolerant(&spec).await?;
        }
        Ok(())
    }

    /// Declare the session search index. Idempotent. Index build is slow on
    /// a real substrate and has no ordering dependency on table creation.
    #[instrument(skip(self))]
    pub async fn init_search_index(&self) -> Result<(), StoreError> {
        match self
            .backend
            .create_search_index(&self.tables.search_index_spec())
            .await
        {
            Err(StoreError::AlreadyExists(_)) => {
                debug!(index = %self.tables.search_index(), "search index already provisioned, skipping");
                Ok(())
            }
            other => other,
        }
    }

    /// Provision everything: core tables, state tables, search index.
    #[instrument(skip(self))]
    pub async fn init_tables(&self) -> Result<(), StoreError> {
        self.init_core_tables().await?;
        self.init_state_tables().await?;
        self.init_search_index().await
    }

    // --- Sessions ---

    pub async fn create_session(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        attrs: NewSessionAttrs,
    ) -> Result<Session, StoreError> {
        self.sessions.create(agent_id, user_id, session_id, attrs).await
    }

    pub async fn get_session(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        self.sessions.get(agent_id, user_id, session_id).await
    }

    /// One user's sessions, most recently updated first.
    pub async fn list_sessions(
        &self,
        agent_id: &str,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Session>, StoreError> {
        self.sessions.list(agent_id, user_id, limit).await
    }

    /// Every session under an agent, across users.
    pub async fn list_all_sessions(
        &self,
        agent_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Session>, StoreError> {
        self.sessions.list_all(agent_id, limit).await
    }

    /// Query the eventually-consistent search index. Returns sessions plus
    /// an approximate total match count.
    pub async fn search_sessions(
        &self,
        agent_id: &str,
        filter: &SessionFilter,
    ) -> Result<(Vec<Session>, i64), StoreError> {
        self.sessions.search(agent_id, filter).await
    }

    pub async fn update_session(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        patch: SessionPatch,
        expected_version: i64,
    ) -> Result<Session, StoreError> {
        self.sessions
            .update(agent_id, user_id, session_id, patch, expected_version)
            .await
    }

    /// Cascading delete in fixed order: events, then session state, then the
    /// session row with its index row. Events go first — if the sequence is
    /// interrupted, the surviving session row still makes the leftovers
    /// discoverable by scan key, whereas deleting the session row first
    /// would orphan them. Each step is idempotent, so re-running after a
    /// partial failure converges to the same end state.
    #[instrument(skip(self), fields(agent_id, user_id, session_id))]
    pub async fn delete_session(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), StoreError> {
        self.events.delete_all(agent_id, user_id, session_id).await?;
        self.state
            .delete(StateScope::Session, agent_id, user_id, session_id)
            .await?;
        self.sessions.delete(agent_id, user_id, session_id).await
    }

    // --- Events ---

    /// Append an event and refresh the parent session's recency. The event
    /// write is the operation; the session touch is best-effort metadata and
    /// its failure (or the session's absence) never fails the append.
    #[instrument(skip(self, content, opts), fields(agent_id, user_id, session_id, event_type))]
    pub async fn append_event(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        event_type: &str,
        content: Map<String, Value>,
        opts: AppendOptions,
    ) -> Result<Event, StoreError> {
        let event = self
            .events
            .append(agent_id, user_id, session_id, event_type, content, opts)
            .await?;

        match self.sessions.get(agent_id, user_id, session_id).await {
            Ok(Some(session)) => {
                if let Err(e) = self
                    .sessions
                    .update(
                        agent_id,
                        user_id,
                        session_id,
                        SessionPatch::default(),
                        session.version,
                    )
                    .await
                {
                    warn!(session = %session.key(), error = %e, "session recency touch failed after append");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "session read failed after append; skipping recency touch");
            }
        }
        Ok(event)
    }

    /// All events of a session in ascending `seq_id` order.
    pub async fn get_events(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Event>, StoreError> {
        self.events.list(agent_id, user_id, session_id).await
    }

    /// The last `n` events of a session, ascending.
    pub async fn get_recent_events(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        n: usize,
    ) -> Result<Vec<Event>, StoreError> {
        self.events.recent(agent_id, user_id, session_id, n).await
    }

    /// Bulk-delete a session's events without touching the session itself.
    /// Returns the number of rows deleted.
    pub async fn delete_events(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<u64, StoreError> {
        self.events.delete_all(agent_id, user_id, session_id).await
    }

    // --- State ---

    /// Application-scope state; empty map when absent.
    pub async fn get_app_state(&self, agent_id: &str) -> Result<StateMap, StoreError> {
        Ok(self
            .state
            .get(StateScope::App, agent_id, "", "")
            .await?
            .map(|data| data.state)
            .unwrap_or_default())
    }

    /// User-scope state; empty map when absent.
    pub async fn get_user_state(
        &self,
        agent_id: &str,
        user_id: &str,
    ) -> Result<StateMap, StoreError> {
        Ok(self
            .state
            .get(StateScope::User, agent_id, user_id, "")
            .await?
            .map(|data| data.state)
            .unwrap_or_default())
    }

    /// Session-scope state; empty map when absent.
    pub async fn get_session_state(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<StateMap, StoreError> {
        Ok(self
            .state
            .get(StateScope::Session, agent_id, user_id, session_id)
            .await?
            .map(|data| data.state)
            .unwrap_or_default())
    }

    pub async fn update_app_state(
        &self,
        agent_id: &str,
        patch: StateMap,
        expected_version: Option<i64>,
    ) -> Result<StateData, StoreError> {
        self.state
            .update(StateScope::App, agent_id, "", "", patch, expected_version)
            .await
    }

    pub async fn update_user_state(
        &self,
        agent_id: &str,
        user_id: &str,
        patch: StateMap,
        expected_version: Option<i64>,
    ) -> Result<StateData, StoreError> {
        self.state
            .update(StateScope::User, agent_id, user_id, "", patch, expected_version)
            .await
    }

    pub async fn update_session_state(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        patch: StateMap,
        expected_version: Option<i64>,
    ) -> Result<StateData, StoreError> {
        self.state
            .update(
                StateScope::Session,
                agent_id,
                user_id,
                session_id,
                patch,
                expected_version,
            )
            .await
    }

    /// The three scopes shallow-merged left to right: app state is the base,
    /// user state overwrites matching top-level keys, session state wins
    /// ties. Nested values are never recursively merged — callers relying on
    /// deep merge must do it themselves.
    #[instrument(skip(self), fields(agent_id, user_id, session_id))]
    pub async fn get_merged_state(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<StateMap, StoreError> {
        let (app, user, session) = tokio::join!(
            self.state.get(StateScope::App, agent_id, "", ""),
            self.state.get(StateScope::User, agent_id, user_id, ""),
            self.state.get(StateScope::Session, agent_id, user_id, session_id),
        );

        let mut merged = app?.map(|data| data.state).unwrap_or_default();
        for layer in [user?, session?] {
            if let Some(data) = layer {
                for (key, value) in data.state {
                    merged.insert(key, value);
                }
            }
        }
        Ok(merged)
    }
}
