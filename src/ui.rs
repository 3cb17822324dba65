//! Outbound seam to the UI collaborator.
//!
//! The chat UI (message rendering, upload widgets) lives outside this crate;
//! [`UiSink`] is everything the engine needs from it. Implementations write
//! to a terminal, a websocket, a test buffer — the engine does not care.

use async_trait::async_trait;

use crate::models::{MessageId, SourceElement};

/// Author names used for engine-originated messages.
pub const AUTHOR_ASSISTANT: &str = "Chatbot";
pub const AUTHOR_ERROR: &str = "Error";

/// Sink for messages the engine sends toward the user.
#[async_trait]
pub trait UiSink: Send + Sync {
    /// Post a new message and return its id for later updates. `elements`
    /// carries inspectable evidence attached to the message (cited chunk
    /// texts for grounded answers).
    async fn send_message(
        &self,
        author: &str,
        text: &str,
        elements: &[SourceElement],
    ) -> MessageId;

    /// Replace the text of a previously sent message.
    async fn update_message(&self, id: MessageId, text: &str);

    /// Append a streamed fragment to a previously sent message.
    async fn stream_token(&self, id: MessageId, fragment: &str);
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording sink for engine tests.

    use super::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq)]
    pub enum UiCall {
        Send {
            id: MessageId,
            author: String,
            text: String,
            elements: Vec<SourceElement>,
        },
        Update {
            id: MessageId,
            text: String,
        },
        Token {
            id: MessageId,
            fragment: String,
        },
    }

    #[derive(Default)]
    pub struct RecordingSink {
        pub calls: Mutex<Vec<UiCall>>,
    }

    impl RecordingSink {
        pub fn calls(&self) -> Vec<UiCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UiSink for RecordingSink {
        async fn send_message(
            &self,
            author: &str,
            text: &str,
            elements: &[SourceElement],
        ) -> MessageId {
            let id = Uuid::new_v4();
            self.calls.lock().unwrap().push(UiCall::Send {
                id,
                author: author.to_string(),
                text: text.to_string(),
                elements: elements.to_vec(),
            });
            id
        }

        async fn update_message(&self, id: MessageId, text: &str) {
            self.calls.lock().unwrap().push(UiCall::Update {
                id,
                text: text.to_string(),
            });
        }

        async fn stream_token(&self, id: MessageId, fragment: &str) {
            self.calls.lock().unwrap().push(UiCall::Token {
                id,
                fragment: fragment.to_string(),
            });
        }
    }
}
