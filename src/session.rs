//! Per-connection conversation state.
//!
//! Each user connection owns exactly one [`ConversationSession`]: ordered
//! message history, and — in document mode — the built index plus the chunk
//! records it refers to. Sessions are created on connect, destroyed on
//! disconnect, and never shared across connections. The per-session
//! `tokio::Mutex` serializes questions: a new question arriving while one is
//! in flight queues behind it instead of interleaving.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::index::DocumentIndex;
use crate::models::{ChatMessage, ChunkRecord};

pub type SessionId = Uuid;

/// Index and chunk records, always built together and installed in a single
/// assignment so no query can observe one without the other.
pub struct SessionCorpus {
    pub index: DocumentIndex,
    pub chunks: Vec<ChunkRecord>,
}

impl SessionCorpus {
    pub fn chunk_by_id(&self, id: &str) -> Option<&ChunkRecord> {
        self.chunks.iter().find(|c| c.id == id)
    }
}

pub struct ConversationSession {
    pub id: SessionId,
    history: Vec<ChatMessage>,
    corpus: Option<SessionCorpus>,
}

impl ConversationSession {
    /// A fresh session whose history holds the single system directive.
    pub fn new(system_directive: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            history: vec![ChatMessage::system(system_directive)],
            corpus: None,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.history.push(ChatMessage::assistant(content));
    }

    /// Swap in a freshly built corpus. The previous corpus (if any) is
    /// replaced wholesale; a failed build never reaches this point.
    pub fn install_corpus(&mut self, corpus: SessionCorpus) {
        self.corpus = Some(corpus);
    }

    pub fn corpus(&self) -> Option<&SessionCorpus> {
        self.corpus.as_ref()
    }
}

type SessionHandle = Arc<Mutex<ConversationSession>>;

/// Registry of live sessions, keyed by session id. The map lock is held only
/// for lookups; all conversation state is behind the per-session mutex.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session for a new connection.
    pub fn open(&self, system_directive: &str) -> (SessionId, SessionHandle) {
        let session = ConversationSession::new(system_directive);
        let id = session.id;
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().unwrap().insert(id, Arc::clone(&handle));
        (id, handle)
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.read().unwrap().get(&id).cloned()
    }

    /// Drop the session on disconnect. In-flight work holding its own clone
    /// of the handle finishes or is abandoned with it; there is nothing to
    /// roll back since all session state is local to the session.
    pub fn close(&self, id: SessionId) {
        self.sessions.write().unwrap().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn history_starts_with_system_directive() {
        let session = ConversationSession::new("You are a helpful assistant.");
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].role, Role::System);
        assert_eq!(session.history()[0].content, "You are a helpful assistant.");
    }

    #[test]
    fn turns_append_in_order() {
        let mut session = ConversationSession::new("S");
        session.push_user("hi");
        session.push_assistant("hello");
        let roles: Vec<Role> = session.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[test]
    fn open_and_close_lifecycle() {
        let store = SessionStore::new();
        let (id, _handle) = store.open("S");
        assert_eq!(store.len(), 1);
        assert!(store.get(id).is_some());

        store.close(id);
        assert!(store.get(id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn sessions_are_distinct() {
        let store = SessionStore::new();
        let (a, _) = store.open("S");
        let (b, _) = store.open("S");
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn corpus_absent_until_installed() {
        let store = SessionStore::new();
        let (_, handle) = store.open("S");
        let mut session = handle.lock().await;
        assert!(session.corpus().is_none());

        session.install_corpus(SessionCorpus {
            index: crate::index::DocumentIndex::empty(),
            chunks: Vec::new(),
        });
        assert!(session.corpus().is_some());
    }
}
