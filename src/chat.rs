//! Plain chat mode (no retrieval).
//!
//! Appends the user turn to the session history, streams a completion over
//! the full history, and appends the concatenated assistant text once the
//! stream finishes. Stream events are forwarded to the caller as they
//! arrive so any transport can render tokens live.

use tokio::sync::mpsc;
use tracing::info;

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::models::StreamEvent;
use crate::session::ConversationSession;
use crate::transport::ChatRequest;

/// Stream a reply to `user_text` and return the final assistant content.
///
/// On success the history gains the user turn and the assistant turn, and
/// the forwarded fragments concatenate exactly to the returned text. On
/// failure the user turn is kept but no assistant turn is recorded, leaving
/// the session usable for a retry.
pub async fn stream_reply(
    client: &ApiClient,
    session: &mut ConversationSession,
    user_text: &str,
    temperature: f32,
    events: mpsc::Sender<StreamEvent>,
    debug_log: bool,
) -> Result<String, ApiError> {
    session.push_user(user_text);
    info!(session = %session.id, "Question received");
    if debug_log {
        info!(question = %user_text, "Question text");
    }

    let request = ChatRequest {
        messages: session.history().to_vec(),
        temperature,
    };

    let (tx, mut rx) = mpsc::channel::<StreamEvent>(32);
    let call = client.complete_streaming(&request, tx);
    let accumulate = async {
        let mut text = String::new();
        while let Some(event) = rx.recv().await {
            match &event {
                StreamEvent::Token(fragment) => text.push_str(fragment),
                StreamEvent::Restart => text.clear(),
                StreamEvent::Done => {}
            }
            // A closed receiver means the UI went away; keep accumulating so
            // the history still records the completed turn.
            let _ = events.send(event).await;
        }
        text
    };

    let (result, text) = tokio::join!(call, accumulate);
    result?;

    if debug_log {
        info!(answer = %text, "Answer text");
    }
    session.push_assistant(text.clone());
    Ok(text)
}
