//! Table and index layout. An optional name prefix isolates tenants sharing
//! one store instance; it is purely a key-construction concern and every
//! entity store applies it through [`TableNames`].

use crate::backend::{KeyType, SearchIndexSpec, SortOrder, TableSpec};

pub const DEFAULT_SESSION_TABLE: &str = "conversation";
pub const DEFAULT_EVENT_TABLE: &str = "event";
pub const DEFAULT_SESSION_STATE_TABLE: &str = "state";
pub const DEFAULT_APP_STATE_TABLE: &str = "app_state";
pub const DEFAULT_USER_STATE_TABLE: &str = "user_state";
pub const DEFAULT_SECONDARY_INDEX_TABLE: &str = "conversation_secondary_index";
pub const DEFAULT_SEARCH_INDEX: &str = "conversation_search_index";

/// Resolved table/index names for one store instance.
#[derive(Clone, Debug, Default)]
pub struct TableNames {
    prefix: String,
}

impl TableNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn session(&self) -> String {
        format!("{}{DEFAULT_SESSION_TABLE}", self.prefix)
    }

    pub fn event(&self) -> String {
        format!("{}{DEFAULT_EVENT_TABLE}", self.prefix)
    }

    pub fn session_state(&self) -> String {
        format!("{}{DEFAULT_SESSION_STATE_TABLE}", self.prefix)
    }

    pub fn app_state(&self) -> String {
        format!("{}{DEFAULT_APP_STATE_TABLE}", self.prefix)
    }

    pub fn user_state(&self) -> String {
        format!("{}{DEFAULT_USER_STATE_TABLE}", self.prefix)
    }

    pub fn secondary_index(&self) -> String {
        format!("{}{DEFAULT_SECONDARY_INDEX_TABLE}", self.prefix)
    }

    pub fn search_index(&self) -> String {
        format!("{}{DEFAULT_SEARCH_INDEX}", self.prefix)
    }

    /// Session, event, and recency-index tables.
    pub fn core_table_specs(&self) -> Vec<TableSpec> {
        vec![
            TableSpec {
                name: self.session(),
                key: vec![
                    ("agent_id".into(), KeyType::Str),
                    ("user_id".into(), KeyType::Str),
                    ("session_id".into(), KeyType::Str),
                ],
            },
            TableSpec {
                name: self.event(),
                key: vec![
                    ("agent_id".into(), KeyType::Str),
                    ("user_id".into(), KeyType::Str),
                    ("session_id".into(), KeyType::Str),
                    ("seq_id".into(), KeyType::AutoIncrement),
                ],
            },
            TableSpec {
                name: self.secondary_index(),
                key: vec![
                    ("agent_id".into(), KeyType::Str),
                    ("user_id".into(), KeyType::Str),
                    ("updated_at".into(), KeyType::Int),
                    ("session_id".into(), KeyType::Str),
                ],
            },
        ]
    }

    /// The three state-scope tables.
    pub fn state_table_specs(&self) -> Vec<TableSpec> {
        vec![
            TableSpec {
                name: self.session_state(),
                key: vec![
                    ("agent_id".into(), KeyType::Str),
                    ("user_id".into(), KeyType::Str),
                    ("session_id".into(), KeyType::Str),
                ],
            },
            TableSpec {
                name: self.app_state(),
                key: vec![("agent_id".into(), KeyType::Str)],
            },
            TableSpec {
                name: self.user_state(),
                key: vec![
                    ("agent_id".into(), KeyType::Str),
                    ("user_id".into(), KeyType::Str),
                ],
            },
        ]
    }

    /// Search index over the session table: keyword fields for exact match,
    /// numeric sortables for recency ranges, full-text on `summary`.
    /// Pre-sorted most-recent-first and routed by `agent_id` so one agent's
    /// sessions land in one search partition.
    pub fn search_index_spec(&self) -> SearchIndexSpec {
        SearchIndexSpec {
            name: self.search_index(),
            table: self.session(),
            keyword_fields: vec![
                "agent_id".into(),
                "user_id".into(),
                "session_id".into(),
                "framework".into(),
                "is_pinned".into(),
                "labels".into(),
            ],
            numeric_fields: vec!["updated_at".into(), "created_at".into()],
            text_fields: vec!["summary".into()],
            default_sort: ("updated_at".into(), SortOrder::Desc),
            routing_fields: vec!["agent_id".into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_names_unprefixed() {
        let names = TableNames::default();
        assert_eq!(names.session(), "conversation");
        assert_eq!(names.event(), "event");
        assert_eq!(names.session_state(), "state");
        assert_eq!(names.app_state(), "app_state");
        assert_eq!(names.user_state(), "user_state");
        assert_eq!(names.secondary_index(), "conversation_secondary_index");
        assert_eq!(names.search_index(), "conversation_search_index");
    }

    #[test]
    fn prefix_applies_to_every_name() {
        let names = TableNames::new("tenant1_");
        assert_eq!(names.session(), "tenant1_conversation");
        assert_eq!(names.event(), "tenant1_event");
        assert_eq!(names.app_state(), "tenant1_app_state");
        assert_eq!(names.search_index(), "tenant1_conversation_search_index");
    }

    #[test]
    fn core_specs_cover_session_event_index() {
        let specs = TableNames::default().core_table_specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["conversation", "event", "conversation_secondary_index"]
        );
        // Event table ends in the auto-increment sequence column
        let event = &specs[1];
        assert_eq!(event.key.last().unwrap().1, KeyType::AutoIncrement);
    }

    #[test]
    fn state_specs_have_scoped_keys() {
        let specs = TableNames::default().state_table_specs();
        assert_eq!(specs[0].key.len(), 3);
        assert_eq!(specs[1].key.len(), 1);
        assert_eq!(specs[2].key.len(), 2);
    }

    #[test]
    fn search_index_shape() {
        let spec = TableNames::default().search_index_spec();
        assert_eq!(spec.table, "conversation");
        assert_eq!(spec.default_sort.0, "updated_at");
        assert_eq!(spec.routing_fields, vec!["agent_id".to_string()]);
        assert!(spec.text_fields.contains(&"summary".to_string()));
    }
}
