//! Conversation state for the health assistant, owned by the caller.
//!
//! Each conversation lives in a [`SessionStore`] under its own id; nothing is
//! kept in process-wide statics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

pub const MAX_HISTORY_TURNS: usize = 20;
pub const MAX_MEMORY_ENTRIES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub id: String,
    history: VecDeque<ChatTurn>,
    memory: VecDeque<String>,
    pub created_at: DateTime<Utc>,
}

impl ConversationSession {
    fn new(id: String) -> Self {
        Self {
            id,
            history: VecDeque::new(),
            memory: VecDeque::new(),
            created_at: Utc::now(),
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &ChatTurn> {
        self.history.iter()
    }

    pub fn memory(&self) -> impl Iterator<Item = &String> {
        self.memory.iter()
    }

    /// Appends a turn, dropping the oldest beyond [`MAX_HISTORY_TURNS`].
    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) {
        self.history.push_back(ChatTurn {
            role,
            content: content.into(),
            at: Utc::now(),
        });
        while self.history.len() > MAX_HISTORY_TURNS {
            self.history.pop_front();
        }
    }

    /// Records a fact about the user; duplicates are ignored.
    pub fn remember(&mut self, fact: impl Into<String>) {
        let fact = fact.into();
        if fact.trim().is_empty() || self.memory.contains(&fact) {
            return;
        }
        self.memory.push_back(fact);
        while self.memory.len() > MAX_MEMORY_ENTRIES {
            self.memory.pop_front();
        }
    }

    /// Keeps only the last `n` turns.
    pub fn truncate_to_last(&mut self, n: usize) {
        while self.history.len() > n {
            self.history.pop_front();
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, ConversationSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session, or returns the existing one with the same id.
    pub fn create(&mut self, id: impl Into<String>) -> &mut ConversationSession {
        let id = id.into();
        self.sessions
            .entry(id.clone())
            .or_insert_with(|| ConversationSession::new(id))
    }

    pub fn get(&self, id: &str) -> Option<&ConversationSession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ConversationSession> {
        self.sessions.get_mut(id)
    }

    pub fn destroy(&mut self, id: &str) -> Option<ConversationSession> {
        self.sessions.remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
