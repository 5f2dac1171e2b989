//! Blocking calling convention.
//!
//! [`BlockingSessionStore`] owns a current-thread runtime and drives the
//! async store to completion on the caller's thread. Semantics are identical
//! to the async surface: same arguments, same results, same error taxonomy.
//! Dropping the wrapper releases the runtime; it must not be used from
//! within an async context.

use std::sync::Arc;

use serde_json::{Map, Value};

use parley_core::model::{Event, NewSessionAttrs, Session, SessionPatch, StateData, StateMap};

use crate::backend::StorageBackend;
use crate::error::StoreError;
use crate::events::AppendOptions;
use crate::sessions::SessionFilter;
use crate::store::SessionStore;

pub struct BlockingSessionStore {
    inner: SessionStore,
    runtime: tokio::runtime::Runtime,
}

impl BlockingSessionStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Result<Self, StoreError> {
        Self::wrap(SessionStore::new(backend))
    }

    pub fn with_table_prefix(
        backend: Arc<dyn StorageBackend>,
        prefix: &str,
    ) -> Result<Self, StoreError> {
        Self::wrap(SessionStore::with_table_prefix(backend, prefix))
    }

    /// Wrap an existing async store.
    pub fn wrap(inner: SessionStore) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::StorageUnavailable(format!("runtime: {e}")))?;
        Ok(Self { inner, runtime })
    }

    /// Release the runtime and recover the async store.
    pub fn into_inner(self) -> SessionStore {
        self.inner
    }

    pub fn init_core_tables(&self) -> Result<(), StoreError> {
        self.runtime.block_on(self.inner.init_core_tables())
    }

    pub fn init_state_tables(&self) -> Result<(), StoreError> {
        self.runtime.block_on(self.inner.init_state_tables())
    }

    pub fn init_search_index(&self) -> Result<(), StoreError> {
        self.runtime.block_on(self.inner.init_search_index())
    }

    pub fn init_tables(&self) -> Result<(), StoreError> {
        self.runtime.block_on(self.inner.init_tables())
    }

    pub fn create_session(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        attrs: NewSessionAttrs,
    ) -> Result<Session, StoreError> {
        self.runtime
            .block_on(self.inner.create_session(agent_id, user_id, session_id, attrs))
    }

    pub fn get_session(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        self.runtime
            .block_on(self.inner.get_session(agent_id, user_id, session_id))
    }

    pub fn list_sessions(
        &self,
        agent_id: &str,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Session>, StoreError> {
        self.runtime
            .block_on(self.inner.list_sessions(agent_id, user_id, limit))
    }

    pub fn list_all_sessions(
        &self,
        agent_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Session>, StoreError> {
        self.runtime
            .block_on(self.inner.list_all_sessions(agent_id, limit))
    }

    pub fn search_sessions(
        &self,
        agent_id: &str,
        filter: &SessionFilter,
    ) -> Result<(Vec<Session>, i64), StoreError> {
        self.runtime
            .block_on(self.inner.search_sessions(agent_id, filter))
    }

    pub fn update_session(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        patch: SessionPatch,
        expected_version: i64,
    ) -> Result<Session, StoreError> {
        self.runtime.block_on(self.inner.update_session(
            agent_id,
            user_id,
            session_id,
            patch,
            expected_version,
        ))
    }

    pub fn delete_session(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), StoreError> {
        self.runtime
            .block_on(self.inner.delete_session(agent_id, user_id, session_id))
    }

    pub fn append_event(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        event_type: &str,
        content: Map<String, Value>,
        opts: AppendOptions,
    ) -> Result<Event, StoreError> {
        self.runtime.block_on(self.inner.append_event(
            agent_id,
            user_id,
            session_id,
            event_type,
            content,
            opts,
        ))
    }

    pub fn get_events(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<Event>, StoreError> {
        self.runtime
            .block_on(self.inner.get_events(agent_id, user_id, session_id))
    }

    pub fn get_recent_events(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        n: usize,
    ) -> Result<Vec<Event>, StoreError> {
        self.runtime
            .block_on(self.inner.get_recent_events(agent_id, user_id, session_id, n))
    }

    pub fn delete_events(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<u64, StoreError> {
        self.runtime
            .block_on(self.inner.delete_events(agent_id, user_id, session_id))
    }

    pub fn get_app_state(&self, agent_id: &str) -> Result<StateMap, StoreError> {
        self.runtime.block_on(self.inner.get_app_state(agent_id))
    }

    pub fn get_user_state(&self, agent_id: &str, user_id: &str) -> Result<StateMap, StoreError> {
        self.runtime
            .block_on(self.inner.get_user_state(agent_id, user_id))
    }

    pub fn get_session_state(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<StateMap, StoreError> {
        self.runtime
            .block_on(self.inner.get_session_state(agent_id, user_id, session_id))
    }

    pub fn update_app_state(
        &self,
        agent_id: &str,
        patch: StateMap,
        expected_version: Option<i64>,
    ) -> Result<StateData, StoreError> {
        self.runtime
            .block_on(self.inner.update_app_state(agent_id, patch, expected_version))
    }

    pub fn update_user_state(
        &self,
        agent_id: &str,
        user_id: &str,
        patch: StateMap,
        expected_version: Option<i64>,
    ) -> Result<StateData, StoreError> {
        self.runtime.block_on(self.inner.update_user_state(
            agent_id,
            user_id,
            patch,
            expected_version,
        ))
    }

    pub fn update_session_state(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
        patch: StateMap,
        expected_version: Option<i64>,
    ) -> Result<StateData, StoreError> {
        self.runtime.block_on(self.inner.update_session_state(
            agent_id,
            user_id,
            session_id,
            patch,
            expected_version,
        ))
    }

    pub fn get_merged_state(
        &self,
        agent_id: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<StateMap, StoreError> {
        self.runtime
            .block_on(self.inner.get_merged_state(agent_id, user_id, session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use serde_json::json;

    fn map(value: serde_json::Value) -> StateMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn blocking_surface_matches_async_semantics() {
        let store = BlockingSessionStore::new(Arc::new(MemoryBackend::new())).unwrap();
        store.init_tables().unwrap();

        let session = store
            .create_session("a1", "u1", "s1", NewSessionAttrs::default())
            .unwrap();
        assert_eq!(session.version, 1);

        let e1 = store
            .append_event(
                "a1",
                "u1",
                "s1",
                "message",
                map(json!({"text": "hi"})),
                AppendOptions::default(),
            )
            .unwrap();
        let e2 = store
            .append_event(
                "a1",
                "u1",
                "s1",
                "message",
                map(json!({"text": "there"})),
                AppendOptions::default(),
            )
            .unwrap();
        assert_eq!((e1.seq_id, e2.seq_id), (1, 2));

        let recent = store.get_recent_events("a1", "u1", "s1", 1).unwrap();
        assert_eq!(recent[0].content["text"], "there");

        store
            .update_session_state("a1", "u1", "s1", map(json!({"k": "v"})), None)
            .unwrap();
        assert_eq!(
            store.get_merged_state("a1", "u1", "s1").unwrap(),
            map(json!({"k": "v"}))
        );

        store.delete_session("a1", "u1", "s1").unwrap();
        assert!(store.get_session("a1", "u1", "s1").unwrap().is_none());
    }

    #[test]
    fn into_inner_recovers_async_store() {
        let store = BlockingSessionStore::new(Arc::new(MemoryBackend::new())).unwrap();
        store.init_tables().unwrap();
        let _inner: SessionStore = store.into_inner();
    }
}
