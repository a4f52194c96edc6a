// Whole-workspace backup bundles: the three persisted documents plus the
// export time, validated in full before anything is written.

use crate::models::{now_millis, Session, Settings, SystemInstruction, Timestamp};
use crate::storage::{DocumentKey, KeyValueStore};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceSnapshot {
    pub sessions: Vec<Session>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub settings: Settings,
    #[serde(default, deserialize_with = "null_as_default")]
    pub instructions: Vec<SystemInstruction>,
    #[serde(default)]
    pub timestamp: Timestamp,
}

// Older bundles carry `"settings": null` when nothing was saved yet.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Backup file is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Invalid backup format: expected a JSON object, found {0}")]
    NotAnObject(&'static str),
    #[error("Invalid backup format: 'sessions' is missing")]
    MissingSessions,
    #[error("Invalid backup format: 'sessions' must be a list, found {0}")]
    SessionsNotAList(&'static str),
    #[error("Invalid backup format: duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: Uuid },
    #[error("Invalid backup format: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("Failed to serialize workspace: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Failed to write restored workspace: {0:#}")]
    Storage(anyhow::Error),
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Parses and validates raw bundle bytes.
pub fn parse_bundle(bytes: &[u8]) -> Result<WorkspaceSnapshot, BackupError> {
    let value: Value = serde_json::from_slice(bytes).map_err(BackupError::InvalidJson)?;
    validate(value)
}

/// Structural validation: an object whose `sessions` is a list of sessions.
/// Settings and instructions may be absent or null and then take defaults.
/// Session and instruction ids must be unique.
pub fn validate(value: Value) -> Result<WorkspaceSnapshot, BackupError> {
    let Value::Object(fields) = &value else {
        return Err(BackupError::NotAnObject(json_type_name(&value)));
    };
    match fields.get("sessions") {
        None => return Err(BackupError::MissingSessions),
        Some(Value::Array(_)) => {}
        Some(other) => return Err(BackupError::SessionsNotAList(json_type_name(other))),
    }
    let snapshot: WorkspaceSnapshot =
        serde_json::from_value(value).map_err(BackupError::Malformed)?;
    ensure_unique("session", snapshot.sessions.iter().map(|s| s.id))?;
    ensure_unique("instruction", snapshot.instructions.iter().map(|i| i.id))?;
    Ok(snapshot)
}

fn ensure_unique(kind: &'static str, ids: impl Iterator<Item = Uuid>) -> Result<(), BackupError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(BackupError::DuplicateId { kind, id });
        }
    }
    Ok(())
}

/// Reads the three documents, using defaults for any that are absent.
pub async fn export(store: &KeyValueStore) -> WorkspaceSnapshot {
    let sessions = store
        .read_as::<Vec<Session>>(DocumentKey::Sessions.name())
        .await
        .unwrap_or_default();
    let settings = store
        .read_as::<Settings>(DocumentKey::Settings.name())
        .await
        .unwrap_or_default();
    let instructions = store
        .read_as::<Vec<SystemInstruction>>(DocumentKey::Instructions.name())
        .await
        .unwrap_or_default();

    log::info!(
        "Exported workspace: {} sessions, {} instructions",
        sessions.len(),
        instructions.len()
    );
    WorkspaceSnapshot {
        sessions,
        settings,
        instructions,
        timestamp: now_millis(),
    }
}

/// Overwrites all three documents with the snapshot in one batch.
pub async fn restore(store: &KeyValueStore, snapshot: &WorkspaceSnapshot) -> Result<(), BackupError> {
    let sessions = serde_json::to_value(&snapshot.sessions).map_err(BackupError::Serialize)?;
    let settings = serde_json::to_value(&snapshot.settings).map_err(BackupError::Serialize)?;
    let instructions =
        serde_json::to_value(&snapshot.instructions).map_err(BackupError::Serialize)?;

    store
        .write_batch(&[
            (DocumentKey::Sessions.name(), sessions),
            (DocumentKey::Settings.name(), settings),
            (DocumentKey::Instructions.name(), instructions),
        ])
        .await
        .map_err(BackupError::Storage)?;

    log::info!(
        "Restored workspace: {} sessions, {} instructions",
        snapshot.sessions.len(),
        snapshot.instructions.len()
    );
    Ok(())
}

pub fn to_pretty_json(snapshot: &WorkspaceSnapshot) -> Result<String, BackupError> {
    serde_json::to_string_pretty(snapshot).map_err(BackupError::Serialize)
}

pub fn backup_file_name(date: NaiveDate) -> String {
    format!("studiochat-backup-{}.json", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteBackend, StorageBackend};
    use serde_json::json;

    #[test]
    fn rejects_non_list_sessions() {
        let err = parse_bundle(br#"{"sessions": {"id": "x"}, "timestamp": 1}"#).unwrap_err();
        assert!(matches!(err, BackupError::SessionsNotAList("an object")));
        assert!(err.to_string().contains("must be a list"));
    }

    #[test]
    fn rejects_non_objects_and_garbage() {
        assert!(matches!(
            parse_bundle(b"[1, 2]").unwrap_err(),
            BackupError::NotAnObject("a list")
        ));
        assert!(matches!(
            parse_bundle(b"not json").unwrap_err(),
            BackupError::InvalidJson(_)
        ));
        assert!(matches!(
            parse_bundle(b"{}").unwrap_err(),
            BackupError::MissingSessions
        ));
    }

    #[test]
    fn rejects_malformed_session_entries() {
        let err = parse_bundle(br#"{"sessions": [{"title": "no id"}]}"#).unwrap_err();
        assert!(matches!(err, BackupError::Malformed(_)));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let id = Uuid::new_v4();
        let session = json!({
            "id": id,
            "title": "Twin",
            "messages": [],
            "config": serde_json::to_value(crate::models::ChatConfig::default()).unwrap(),
            "lastModified": 1
        });
        let err = validate(json!({"sessions": [session.clone(), session]})).unwrap_err();
        assert!(matches!(err, BackupError::DuplicateId { kind: "session", id: dup } if dup == id));

        let instruction = json!({"id": id, "title": "a", "content": ""});
        let err = validate(json!({"sessions": [], "instructions": [instruction.clone(), instruction]}))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate instruction id"));
    }

    #[test]
    fn null_settings_and_missing_instructions_take_defaults() {
        let snapshot = validate(json!({"sessions": [], "settings": null})).unwrap();
        assert_eq!(snapshot.settings, Settings::default());
        assert!(snapshot.instructions.is_empty());
    }

    #[test]
    fn file_name_embeds_iso_date() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(backup_file_name(date), "studiochat-backup-2026-03-09.json");
    }

    #[tokio::test]
    async fn export_of_empty_store_uses_defaults() {
        let store = KeyValueStore::new(StorageBackend::Sqlite(
            SqliteBackend::in_memory().await.unwrap(),
        ));
        let before = now_millis();
        let snapshot = export(&store).await;
        assert!(snapshot.sessions.is_empty());
        assert_eq!(snapshot.settings, Settings::default());
        assert!(snapshot.timestamp >= before);

        let text = to_pretty_json(&snapshot).unwrap();
        assert!(text.contains("\n  \"sessions\": []"));
    }
}
