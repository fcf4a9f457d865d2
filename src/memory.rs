//! Conversation memory: ordered (role, message) history per conversation id.
//!
//! [`ConversationStore`] is the durable collaborator; [`ConversationMemory`] wraps it with a
//! per-session async lock so that a question's history read and its turn append happen as one
//! unit for that conversation, while different conversations never contend.

use crate::completion::ChatMessage;
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::storage::is_safe_segment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Errors raised by conversation stores.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Conversation id contained path-escaping characters.
    #[error("invalid conversation id: {0}")]
    InvalidId(String),
    /// Underlying storage failed.
    #[error("conversation storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// Stored history could not be (de)serialized.
    #[error("conversation history is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ordered message log per conversation id.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create an empty session if none exists yet.
    async fn create_session(&self, conversation_id: &str) -> Result<(), MemoryError>;

    /// Return the full ordered history. Unknown sessions have an empty history.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, MemoryError>;

    /// Append `messages` to the session as a single write.
    async fn append(
        &self,
        conversation_id: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<(), MemoryError>;
}

/// Conversation store held in process memory.
#[derive(Default)]
pub struct MemoryConversationStore {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl MemoryConversationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create_session(&self, conversation_id: &str) -> Result<(), MemoryError> {
        self.sessions
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default();
        Ok(())
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, MemoryError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(
        &self,
        conversation_id: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<(), MemoryError> {
        self.sessions
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .extend(messages);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    messages: Vec<ChatMessage>,
}

/// Conversation store writing one JSON file per session under `{root}/{id}.json`.
pub struct FsConversationStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsConversationStore {
    /// Store sessions beneath `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn session_path(&self, conversation_id: &str) -> Result<PathBuf, MemoryError> {
        if !is_safe_segment(conversation_id) || conversation_id.contains('/') {
            return Err(MemoryError::InvalidId(conversation_id.to_string()));
        }
        Ok(self.root.join(format!("{conversation_id}.json")))
    }

    async fn read_session(&self, path: &PathBuf) -> Result<Option<SessionFile>, MemoryError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn write_session(&self, path: &PathBuf, session: &SessionFile) -> Result<(), MemoryError> {
        let bytes = serde_json::to_vec(session)?;
        crate::storage::write_atomic(path, &bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FsConversationStore {
    async fn create_session(&self, conversation_id: &str) -> Result<(), MemoryError> {
        let path = self.session_path(conversation_id)?;
        let _guard = self.write_lock.lock().await;
        if self.read_session(&path).await?.is_none() {
            self.write_session(&path, &SessionFile::default()).await?;
        }
        Ok(())
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, MemoryError> {
        let path = self.session_path(conversation_id)?;
        Ok(self
            .read_session(&path)
            .await?
            .map(|session| session.messages)
            .unwrap_or_default())
    }

    async fn append(
        &self,
        conversation_id: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<(), MemoryError> {
        let path = self.session_path(conversation_id)?;
        let _guard = self.write_lock.lock().await;
        let mut session = self.read_session(&path).await?.unwrap_or_default();
        session.messages.extend(messages);
        self.write_session(&path, &session).await
    }
}

/// Per-session serialized access to a [`ConversationStore`].
pub struct ConversationMemory {
    store: Arc<dyn ConversationStore>,
    session_locks: KeyedLocks,
}

impl ConversationMemory {
    /// Wrap `store`.
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            session_locks: KeyedLocks::new(),
        }
    }

    /// Acquire the lock for one conversation. Hold it from history read through turn append.
    pub async fn lock_session(&self, conversation_id: &str) -> KeyedGuard {
        self.session_locks.lock(conversation_id).await
    }

    /// Create an empty session.
    pub async fn create_session(&self, conversation_id: &str) -> Result<(), MemoryError> {
        self.store.create_session(conversation_id).await
    }

    /// Full ordered history of a conversation.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, MemoryError> {
        self.store.messages(conversation_id).await
    }

    /// Append a completed question/answer turn.
    pub async fn append_turn(
        &self,
        conversation_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<(), MemoryError> {
        self.store
            .append(
                conversation_id,
                vec![ChatMessage::user(question), ChatMessage::assistant(answer)],
            )
            .await
    }
}
