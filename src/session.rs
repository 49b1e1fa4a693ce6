use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Stored entries per conversation are capped so session files stay small.
const MAX_STORED_ENTRIES: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: String,
    pub text: String,
    pub at: DateTime<Local>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub source: String,
    pub entries: Vec<ChatEntry>,
    pub updated_at: DateTime<Local>,
}

/// Per-source conversation history, persisted as one JSON file per source.
pub struct SessionStore {
    base_dir: PathBuf,
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl SessionStore {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let sessions_dir = base_dir.join("sessions");
        std::fs::create_dir_all(&sessions_dir)?;

        let mut conversations = HashMap::new();
        for entry in std::fs::read_dir(&sessions_dir)?.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                let content = std::fs::read_to_string(&path)?;
                if let Ok(conv) = serde_json::from_str::<Conversation>(&content) {
                    let source = conv.source.clone();
                    conversations
                        .entry(source)
                        .and_modify(|existing: &mut Conversation| {
                            if conv.updated_at > existing.updated_at {
                                *existing = conv.clone();
                            }
                        })
                        .or_insert(conv);
                }
            }
        }

        Ok(Self {
            base_dir,
            conversations: Mutex::new(conversations),
        })
    }

    /// Append one message to a source's history and persist it.
    pub fn record(&self, source: &str, role: &str, text: &str) -> Result<()> {
        let mut conversations = self.conversations.lock().expect("session lock poisoned");
        let conv = conversations
            .entry(source.to_string())
            .or_insert_with(|| Conversation {
                source: source.to_string(),
                entries: Vec::new(),
                updated_at: Local::now(),
            });
        conv.entries.push(ChatEntry {
            role: role.to_string(),
            text: text.to_string(),
            at: Local::now(),
        });
        if conv.entries.len() > MAX_STORED_ENTRIES {
            let excess = conv.entries.len() - MAX_STORED_ENTRIES;
            conv.entries.drain(..excess);
        }
        conv.updated_at = Local::now();
        let conv = conv.clone();
        drop(conversations);
        self.save_to_disk(&conv)
    }

    /// Last `count` messages for a source, chronological.
    /// Returns None when the source has no history at all.
    pub fn recent(&self, source: &str, count: usize) -> Option<Vec<ChatEntry>> {
        let conversations = self.conversations.lock().expect("session lock poisoned");
        let conv = conversations.get(source)?;
        let skip = conv.entries.len().saturating_sub(count);
        Some(conv.entries[skip..].to_vec())
    }

    fn save_to_disk(&self, conv: &Conversation) -> Result<()> {
        let dir = self.base_dir.join("sessions");
        std::fs::create_dir_all(&dir)?;

        let filename = Self::session_filename(&conv.source);
        let path = dir.join(format!("{filename}.json"));
        let tmp = dir.join(format!("{filename}.json.tmp"));

        let json = serde_json::to_string_pretty(conv)?;
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn session_filename(source: &str) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        source.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}
