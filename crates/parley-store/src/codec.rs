use chrono::Utc;
use parley_core::model::StateMap;

use crate::error::StoreError;

/// Per-column value ceiling, in characters. The substrate caps a cell at
/// 2MB; 1.5M characters leaves headroom for multi-byte text.
pub const MAX_COLUMN_SIZE: usize = 1_500_000;

/// Current wall-clock time as a nanosecond timestamp.
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Serialize a state document to its stored JSON text form.
pub fn serialize_state(state: &StateMap) -> Result<String, StoreError> {
    serde_json::to_string(state)
        .map_err(|e| StoreError::InvalidArgument(format!("unserializable state: {e}")))
}

/// Deserialize a stored JSON text column back into a state document.
/// `table`/`column` name the source for corruption reports.
pub fn deserialize_state(raw: &str, table: &str, column: &str) -> Result<StateMap, StoreError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| StoreError::corrupt(table, column, format!("invalid JSON: {e}")))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StoreError::corrupt(
            table,
            column,
            format!("expected JSON object, got {other}"),
        )),
    }
}

/// Split serialized text into consecutive slices of at most `max_chars`
/// characters each. Chunks are opaque byte ranges of one logical document —
/// splitting is on character boundaries only so each chunk stays valid
/// UTF-8, never on any structural boundary.
pub fn to_chunks(data: &str, max_chars: usize) -> Vec<String> {
    debug_assert!(max_chars > 0);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for ch in data.chars() {
        current.push(ch);
        count += 1;
        if count == max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Reassemble chunk slices into the full document. Pure ordered
/// concatenation; order is mandatory.
pub fn from_chunks(chunks: Vec<String>) -> String {
    chunks.concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_roundtrip() {
        let state = json!({"counter": 42, "nested": {"deep": [1, 2]}})
            .as_object()
            .cloned()
            .unwrap();
        let raw = serialize_state(&state).unwrap();
        let back = deserialize_state(&raw, "state", "state").unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn deserialize_rejects_non_object() {
        let err = deserialize_state("[1, 2]", "state", "state").unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { .. }));
    }

    #[test]
    fn deserialize_rejects_invalid_json() {
        let err = deserialize_state("not json", "state", "state_0").unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { .. }));
    }

    #[test]
    fn chunking_roundtrip() {
        let data = "abcdefghij".repeat(10);
        let chunks = to_chunks(&data, 7);
        assert!(chunks.iter().all(|c| c.chars().count() <= 7));
        assert_eq!(from_chunks(chunks), data);
    }

    #[test]
    fn chunking_exact_multiple() {
        let chunks = to_chunks("abcdef", 3);
        assert_eq!(chunks, vec!["abc", "def"]);
    }

    #[test]
    fn chunking_under_limit_is_single() {
        assert_eq!(to_chunks("abc", 100), vec!["abc"]);
    }

    #[test]
    fn chunking_counts_chars_not_bytes() {
        // 4 chars, 12 bytes; a 2-char limit must not split inside a codepoint
        let data = "日本語字";
        let chunks = to_chunks(data, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(from_chunks(chunks), data);
    }

    #[test]
    fn empty_data_yields_no_chunks() {
        assert!(to_chunks("", 10).is_empty());
    }

    #[test]
    fn now_nanos_is_nanoseconds() {
        let ts = now_nanos();
        // Sanity: a nanosecond timestamp for any date after 2020 exceeds 1e18
        assert!(ts > 1_500_000_000_000_000_000);
    }
}
