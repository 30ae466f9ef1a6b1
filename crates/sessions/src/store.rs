//! Persistent conversation store.
//!
//! Each conversation lives at `<storage_dir>/<2-hex>/<session_id>.json`,
//! sharded by a digest prefix of the id so a busy store does not pile
//! thousands of files into one directory. Shard directories are created
//! lazily. When a conversation grows past the configured bound, the oldest
//! messages are folded into the session's rolling summary string by a
//! deterministic digest (never an LLM round trip).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sov_domain::config::SessionsConfig;
use sov_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Data model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    pub messages: Vec<StoredMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Rolling digest of pruned messages.
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ConversationSession {
    fn new(session_id: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            summary: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn add_message(&mut self, role: &str, content: &str) {
        self.messages.push(StoredMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        });
        self.updated_at = Utc::now();
    }

    pub fn recent_messages(&self, count: usize) -> &[StoredMessage] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }
}

/// Summary row returned by [`ConversationStore::list_sessions`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConversationStore {
    storage_dir: PathBuf,
    max_messages_before_summary: usize,
    auto_save: bool,
    cache: Mutex<BTreeMap<String, ConversationSession>>,
}

impl ConversationStore {
    pub fn new(storage_dir: &Path, config: &SessionsConfig) -> Result<Self> {
        std::fs::create_dir_all(storage_dir).map_err(Error::Io)?;
        tracing::info!(dir = %storage_dir.display(), "conversation store ready");
        Ok(Self {
            storage_dir: storage_dir.to_path_buf(),
            max_messages_before_summary: config.max_messages_before_summary,
            auto_save: config.auto_save,
            cache: Mutex::new(BTreeMap::new()),
        })
    }

    /// `<storage_dir>/<2-hex shard>/<session_id>.json`; the shard directory
    /// is created lazily.
    fn session_path(&self, session_id: &str) -> PathBuf {
        let digest = Sha256::digest(session_id.as_bytes());
        let shard = hex::encode(&digest[..1]);
        self.storage_dir.join(shard).join(format!("{session_id}.json"))
    }

    pub fn create_session(&self, session_id: Option<&str>) -> Result<ConversationSession> {
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session = ConversationSession::new(id.clone());
        self.cache.lock().insert(id.clone(), session.clone());
        if self.auto_save {
            self.save_session(&id)?;
        }
        Ok(session)
    }

    /// Cached session, or lazily loaded from disk. `None` when it exists
    /// nowhere.
    pub fn get_session(&self, session_id: &str) -> Option<ConversationSession> {
        if let Some(session) = self.cache.lock().get(session_id) {
            return Some(session.clone());
        }
        self.load_session(session_id).ok().flatten()
    }

    pub fn save_session(&self, session_id: &str) -> Result<()> {
        let session = self
            .cache
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::Session(format!("unknown session: {session_id}")))?;

        let path = self.session_path(session_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }

        let json = serde_json::to_string_pretty(&session)?;
        std::fs::write(&path, json).map_err(Error::Io)?;
        tracing::debug!(session = session_id, "saved conversation");
        Ok(())
    }

    pub fn load_session(&self, session_id: &str) -> Result<Option<ConversationSession>> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let session: ConversationSession = serde_json::from_str(&raw)?;
        self.cache
            .lock()
            .insert(session_id.to_string(), session.clone());
        Ok(Some(session))
    }

    /// Append a message, pruning and digesting old history when the
    /// conversation outgrows the configured bound.
    pub fn add_message(&self, session_id: &str, role: &str, content: &str) -> Result<()> {
        {
            let mut cache = self.cache.lock();
            if !cache.contains_key(session_id) {
                drop(cache);
                if self.load_session(session_id)?.is_none() {
                    self.cache
                        .lock()
                        .insert(session_id.to_string(), ConversationSession::new(session_id.to_string()));
                }
                cache = self.cache.lock();
            }

            let session = cache.get_mut(session_id).expect("inserted above");
            session.add_message(role, content);
            if session.messages.len() > self.max_messages_before_summary {
                prune_and_digest(session, self.max_messages_before_summary / 2);
            }
        }

        if self.auto_save {
            self.save_session(session_id)?;
        }
        Ok(())
    }

    /// All persisted sessions, most recently updated first.
    pub fn list_sessions(&self, limit: usize) -> Vec<SessionSummary> {
        let mut rows: Vec<SessionSummary> = Vec::new();

        let Ok(shards) = std::fs::read_dir(&self.storage_dir) else {
            return rows;
        };
        for shard in shards.filter_map(|e| e.ok()) {
            let Ok(files) = std::fs::read_dir(shard.path()) else {
                continue;
            };
            for file in files.filter_map(|e| e.ok()) {
                let Ok(raw) = std::fs::read_to_string(file.path()) else {
                    continue;
                };
                match serde_json::from_str::<ConversationSession>(&raw) {
                    Ok(session) => rows.push(SessionSummary {
                        session_id: session.session_id,
                        message_count: session.messages.len(),
                        created_at: session.created_at,
                        updated_at: session.updated_at,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            path = %file.path().display(),
                            error = %e,
                            "skipping malformed conversation file"
                        );
                    }
                }
            }
        }

        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        rows.truncate(limit);
        rows
    }

    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        self.cache.lock().remove(session_id);
        let path = self.session_path(session_id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(Error::Io)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Delete sessions not updated within `max_age_days`. Returns how many
    /// were removed.
    pub fn cleanup_old_sessions(&self, max_age_days: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days);
        let stale: Vec<String> = self
            .list_sessions(usize::MAX)
            .into_iter()
            .filter(|s| s.updated_at < cutoff)
            .map(|s| s.session_id)
            .collect();

        let mut removed = 0;
        for id in stale {
            if self.delete_session(&id).unwrap_or(false) {
                removed += 1;
            }
        }
        removed
    }
}

/// Fold the oldest messages into the rolling summary, keeping the last
/// `keep_count` verbatim.
fn prune_and_digest(session: &mut ConversationSession, keep_count: usize) {
    if session.messages.len() <= keep_count {
        return;
    }

    let split = session.messages.len() - keep_count;
    let old: Vec<StoredMessage> = session.messages.drain(..split).collect();

    let mut bullets: Vec<String> = Vec::new();
    for msg in &old {
        match msg.role.as_str() {
            "user" => {
                let preview: String = msg.content.chars().take(200).collect();
                let ellipsis = if msg.content.chars().count() > 200 { "..." } else { "" };
                bullets.push(format!("User asked: {preview}{ellipsis}"));
            }
            "assistant" => bullets.push("Assistant responded with solution/explanation".into()),
            _ => {}
        }
    }

    let tail_start = bullets.len().saturating_sub(10);
    let digest = bullets[tail_start..].join("\n");
    if session.summary.is_empty() {
        session.summary = digest;
    } else {
        session.summary = format!("{}\n---\n{digest}", session.summary);
    }

    tracing::debug!(
        session = %session.session_id,
        pruned = old.len(),
        "digested old conversation messages"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ConversationStore {
        ConversationStore::new(dir.path(), &SessionsConfig::default()).unwrap()
    }

    fn store_with_bound(dir: &TempDir, bound: usize) -> ConversationStore {
        let config = SessionsConfig {
            max_messages_before_summary: bound,
            ..Default::default()
        };
        ConversationStore::new(dir.path(), &config).unwrap()
    }

    #[test]
    fn save_load_round_trip_preserves_messages_and_metadata() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let session = store.create_session(Some("round-trip")).unwrap();
        assert_eq!(session.session_id, "round-trip");
        store.add_message("round-trip", "user", "first question").unwrap();
        store.add_message("round-trip", "assistant", "first answer").unwrap();

        // Drop the cache by building a second store over the same dir.
        let fresh = store_with_bound(&dir, 20);
        let loaded = fresh.get_session("round-trip").expect("persisted session");
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].role, "user");
        assert_eq!(loaded.messages[0].content, "first question");
        assert_eq!(loaded.messages[1].content, "first answer");
    }

    #[test]
    fn files_are_sharded_by_digest_prefix() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create_session(Some("shard-me")).unwrap();

        let shards: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(shards.len(), 1);
        let shard_name = shards[0].file_name().to_string_lossy().to_string();
        assert_eq!(shard_name.len(), 2);
        assert!(shards[0].path().join("shard-me.json").exists());
    }

    #[test]
    fn missing_session_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).get_session("ghost").is_none());
    }

    #[test]
    fn overflow_prunes_and_digests_into_summary() {
        let dir = TempDir::new().unwrap();
        let store = store_with_bound(&dir, 6);

        store.create_session(Some("busy")).unwrap();
        for i in 0..5 {
            store.add_message("busy", "user", &format!("question {i}")).unwrap();
            store.add_message("busy", "assistant", &format!("answer {i}")).unwrap();
        }

        let session = store.get_session("busy").unwrap();
        assert!(session.messages.len() <= 6);
        assert!(session.summary.contains("User asked: question"));
        assert!(session.summary.contains("Assistant responded"));
        // The newest message survived verbatim.
        assert_eq!(session.messages.last().unwrap().content, "answer 4");
    }

    #[test]
    fn list_sessions_most_recent_first() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.create_session(Some("older")).unwrap();
        store.add_message("older", "user", "x").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        store.create_session(Some("newer")).unwrap();
        store.add_message("newer", "user", "y").unwrap();

        let rows = store.list_sessions(10);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].session_id, "newer");
        assert_eq!(rows[1].session_id, "older");

        let limited = store.list_sessions(1);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn delete_removes_file_and_cache() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create_session(Some("doomed")).unwrap();

        assert!(store.delete_session("doomed").unwrap());
        assert!(store.get_session("doomed").is_none());
        assert!(!store.delete_session("doomed").unwrap());
    }

    #[test]
    fn cleanup_removes_only_stale_sessions() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create_session(Some("fresh")).unwrap();
        store.add_message("fresh", "user", "hello").unwrap();

        // Nothing is older than a day.
        assert_eq!(store.cleanup_old_sessions(1), 0);
        // Everything is older than "minus one day" in the future sense.
        assert_eq!(store.cleanup_old_sessions(-1), 1);
        assert!(store.get_session("fresh").is_none());
    }

    #[test]
    fn recent_messages_returns_tail() {
        let mut session = ConversationSession::new("s".into());
        for i in 0..5 {
            session.add_message("user", &format!("m{i}"));
        }
        let recent = session.recent_messages(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "m3");
        assert_eq!(recent[1].content, "m4");
    }
}
