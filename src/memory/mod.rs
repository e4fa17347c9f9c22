//! Conversation transcript storage.
//!
//! Each user gets an append-only transcript that lives for a fixed TTL
//! from creation and then disappears, cache-style. The store only appends
//! and reads; history is never rewritten.

use crate::ai::{Message, MessageRole};
use moka::sync::Cache;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

type Transcript = Arc<RwLock<Vec<Message>>>;

pub struct TranscriptStore {
    transcripts: Cache<String, Transcript>,
}

impl TranscriptStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            transcripts: Cache::builder()
                .time_to_live(Duration::from_secs(ttl_secs))
                .build(),
        }
    }

    fn transcript(&self, user_id: &str) -> Transcript {
        self.transcripts
            .get_with(user_id.to_string(), || Arc::new(RwLock::new(Vec::new())))
    }

    pub fn append(&self, user_id: &str, role: MessageRole, content: &str) {
        self.transcript(user_id).write().push(Message {
            role,
            content: content.to_string(),
        });
    }

    /// Record one completed turn: the user's message, then the reply.
    pub fn append_turn(&self, user_id: &str, prompt: &str, reply: &str) {
        let transcript = self.transcript(user_id);
        let mut messages = transcript.write();
        messages.push(Message {
            role: MessageRole::User,
            content: prompt.to_string(),
        });
        messages.push(Message {
            role: MessageRole::Assistant,
            content: reply.to_string(),
        });
    }

    pub fn history(&self, user_id: &str) -> Vec<Message> {
        self.transcript(user_id).read().clone()
    }

    /// Render the transcript as "role: text" lines for prompt context.
    pub fn context(&self, user_id: &str) -> String {
        self.transcript(user_id)
            .read()
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
