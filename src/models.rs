//! Core data types shared across the pipeline.

use uuid::Uuid;

/// Message author role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of conversation history. Insertion order is significant; the
/// first entry of a session is always the system directive.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A bounded excerpt of an ingested document — the atomic unit of embedding
/// and retrieval. The id (`"{i}-pl"`, assigned in combined ingestion order)
/// is the join key between an index hit and displayable text, and is
/// immutable for the session's lifetime.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub source_document: String,
}

/// An uploaded file as handed over by the UI collaborator.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Inspectable evidence attached to a grounded answer: the text of a cited
/// chunk, named by its chunk id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceElement {
    pub name: String,
    pub content: String,
}

/// Identifier for an outbound UI message.
pub type MessageId = Uuid;

/// Events on a streaming completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental text fragment, forwarded as it arrives.
    Token(String),
    /// A retriable mid-stream failure restarted the call; discard any text
    /// accumulated so far.
    Restart,
    /// The stream completed.
    Done,
}
