use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::keys::SessionKey;

/// A state document: an arbitrary-depth JSON object keyed by strings.
pub type StateMap = Map<String, Value>;

/// A stored conversation session.
///
/// Timestamps are nanosecond wall-clock values; `version` is the
/// optimistic-lock counter, `1` on creation and incremented by exactly one on
/// every successful update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_pinned: bool,
    pub summary: Option<String>,
    /// Serialized label set, stored and returned verbatim.
    pub labels: Option<String>,
    /// Originating framework tag, e.g. `"adk"` or `"langchain"`. Opaque to
    /// the store.
    pub framework: Option<String>,
    /// Framework extension data, stored as serialized JSON.
    pub extensions: Option<Map<String, Value>>,
    pub version: i64,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.agent_id, &self.user_id, &self.session_id)
    }
}

/// Optional attributes supplied when creating a session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewSessionAttrs {
    pub is_pinned: bool,
    pub summary: Option<String>,
    pub labels: Option<String>,
    pub framework: Option<String>,
    pub extensions: Option<Map<String, Value>>,
}

/// A shallow patch for `update_session`. `None` fields are left untouched.
///
/// `framework` is deliberately absent: a session never migrates between
/// frameworks after creation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    pub is_pinned: Option<bool>,
    pub summary: Option<String>,
    pub labels: Option<String>,
    pub extensions: Option<Map<String, Value>>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.is_pinned.is_none()
            && self.summary.is_none()
            && self.labels.is_none()
            && self.extensions.is_none()
    }
}

/// A stored event within a session.
///
/// `seq_id` is assigned by the store at append time and is strictly
/// increasing within one session. Events are immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,
    pub seq_id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub content: Map<String, Value>,
    /// Complete serialized snapshot of the originating framework object, for
    /// exact round-trips. Frameworks that don't need it leave it unset.
    pub raw_event: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
}

/// A state document plus its row metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateData {
    pub state: StateMap,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_session() -> Session {
        Session {
            agent_id: "a1".into(),
            user_id: "u1".into(),
            session_id: "s1".into(),
            created_at: 100,
            updated_at: 200,
            is_pinned: true,
            summary: Some("greeting".into()),
            labels: Some(r#"["tag"]"#.into()),
            framework: Some("adk".into()),
            extensions: json!({"k": "v"}).as_object().cloned(),
            version: 1,
        }
    }

    #[test]
    fn session_key_accessor() {
        let session = sample_session();
        assert_eq!(session.key().to_string(), "a1/u1/s1");
    }

    #[test]
    fn session_serde_roundtrip() {
        let session = sample_session();
        let json = serde_json::to_string(&session).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, session);
    }

    #[test]
    fn event_type_serializes_as_type() {
        let event = Event {
            agent_id: "a".into(),
            user_id: "u".into(),
            session_id: "s".into(),
            seq_id: 1,
            event_type: "message".into(),
            content: json!({"text": "hi"}).as_object().cloned().unwrap(),
            raw_event: None,
            created_at: 1,
            updated_at: 1,
            version: 1,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "message");
    }

    #[test]
    fn empty_patch() {
        assert!(SessionPatch::default().is_empty());
        let patch = SessionPatch {
            is_pinned: Some(false),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
