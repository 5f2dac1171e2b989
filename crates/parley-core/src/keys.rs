use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite identity of a session: `(agent_id, user_id, session_id)`.
///
/// Component order is significant — it is the row-key order in the session
/// table, and range scans address sessions by this prefix.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionKey {
    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.agent_id, self.user_id, self.session_id)
    }
}

/// Scope of a mutable key-value state document.
///
/// Each scope keys its rows by a prefix of the session identity:
/// - `App`: `(agent_id)`
/// - `User`: `(agent_id, user_id)`
/// - `Session`: `(agent_id, user_id, session_id)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateScope {
    App,
    User,
    Session,
}

impl fmt::Display for StateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App => write!(f, "app"),
            Self::User => write!(f, "user"),
            Self::Session => write!(f, "session"),
        }
    }
}

impl std::str::FromStr for StateScope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(Self::App),
            "user" => Ok(Self::User),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown state scope: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_components() {
        let key = SessionKey::new("a1", "u1", "s1");
        assert_eq!(key.to_string(), "a1/u1/s1");
    }

    #[test]
    fn scope_roundtrip() {
        for scope in [StateScope::App, StateScope::User, StateScope::Session] {
            let parsed: StateScope = scope.to_string().parse().unwrap();
            assert_eq!(parsed, scope);
        }
    }

    #[test]
    fn scope_parse_failure() {
        assert!("global".parse::<StateScope>().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let key = SessionKey::new("a", "u", "s");
        let json = serde_json::to_string(&key).unwrap();
        let parsed: SessionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }
}
