//! Grounded question answering.
//!
//! For each question: retrieve the most similar chunks from the session
//! index, stuff them into the grounding prompt, ask the model for a
//! completion, then parse the `SOURCES:` line out of the answer and map the
//! cited chunk ids back to their text as inspectable evidence.

use tracing::{debug, info};

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::models::{ChatMessage, SourceElement};
use crate::session::ConversationSession;
use crate::transport::ChatRequest;

/// How many chunks are retrieved for each question.
pub const DEFAULT_TOP_K: usize = 4;

/// System prompt instructing the model to answer only from the supplied
/// context and to always cite its sources.
const GROUNDING_TEMPLATE: &str = r#"Use the following pieces of context to answer the users question.
If you don't know the answer, just say that you don't know, don't try to make up an answer.
ALWAYS return a "SOURCES" part in your answer.
The "SOURCES" part should be a reference to the source of the document from which you got your answer.

Example of your response should be:

```
The answer is foo
SOURCES: xyz
```

Begin!
----------------
"#;

/// Phase reached when a question failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Retrieving,
    Generating,
}

/// Failure of a grounded question; no partial answer accompanies it.
#[derive(Debug, thiserror::Error)]
pub enum AskError {
    #[error("no documents have been indexed for this session")]
    NoIndex,

    #[error("{phase:?} failed: {source}")]
    Api {
        phase: QueryPhase,
        #[source]
        source: ApiError,
    },
}

/// A grounded answer: the text (with its sources line appended) plus the
/// resolved chunk texts as evidence.
#[derive(Debug)]
pub struct GroundedAnswer {
    pub text: String,
    pub evidence: Vec<SourceElement>,
}

/// Answer `question` from the session's indexed documents.
///
/// Runs retrieve → generate → attribute. Retries inside the client are
/// invisible here; only a terminal failure surfaces, and it carries the
/// phase it happened in.
pub async fn answer_question(
    client: &ApiClient,
    session: &ConversationSession,
    question: &str,
    top_k: usize,
    temperature: f32,
    debug_log: bool,
) -> Result<GroundedAnswer, AskError> {
    let corpus = session.corpus().ok_or(AskError::NoIndex)?;
    info!(session = %session.id, "Question received");
    if debug_log {
        info!(question = %question, "Question text");
    }

    // Retrieving
    let query_vector = client
        .embed(&[question.to_string()])
        .await
        .map_err(|e| AskError::Api {
            phase: QueryPhase::Retrieving,
            source: e,
        })?
        .into_iter()
        .next()
        .unwrap_or_default();
    let hits = corpus.index.query(&query_vector, top_k);
    debug!(hits = hits.len(), "Retrieved context chunks");

    let context: Vec<&str> = hits
        .iter()
        .filter_map(|(id, _)| corpus.chunk_by_id(id).map(|c| c.text.as_str()))
        .collect();

    // Generating
    let request = ChatRequest {
        messages: build_grounding_messages(&context, question),
        temperature,
    };
    let raw = client.complete(&request).await.map_err(|e| AskError::Api {
        phase: QueryPhase::Generating,
        source: e,
    })?;
    if debug_log {
        info!(answer = %raw, "Raw answer");
    }

    // Attributing
    Ok(attribute_sources(&raw, session))
}

/// Grounding prompt: the instruction template with the retrieved chunk
/// texts appended as context, then the question as the user turn.
fn build_grounding_messages(context: &[&str], question: &str) -> Vec<ChatMessage> {
    let mut system = String::from(GROUNDING_TEMPLATE);
    system.push_str(&context.join("\n\n"));
    vec![ChatMessage::system(system), ChatMessage::user(question)]
}

/// Split the raw answer at the last `SOURCES:` marker and resolve the cited
/// tags against the session's chunk records. Unresolvable tags are dropped;
/// if none resolve the answer gets a "No sources found" notice instead of a
/// sources line. An answer without the marker passes through unchanged.
fn attribute_sources(raw: &str, session: &ConversationSession) -> GroundedAnswer {
    let (answer, sources_field) = split_sources(raw);
    let mut text = answer.to_string();
    let mut evidence = Vec::new();

    let Some(sources_field) = sources_field else {
        return GroundedAnswer { text, evidence };
    };

    let sources_field = sources_field.trim();
    if sources_field.is_empty() {
        return GroundedAnswer { text, evidence };
    }

    let mut found: Vec<String> = Vec::new();
    if let Some(corpus) = session.corpus() {
        for tag in sources_field.split(',') {
            let name = normalize_tag(tag);
            if name.is_empty() {
                continue;
            }
            if let Some(chunk) = corpus.chunk_by_id(&name) {
                evidence.push(SourceElement {
                    name: name.clone(),
                    content: chunk.text.clone(),
                });
                found.push(name);
            }
        }
    }

    if found.is_empty() {
        text.push_str("\nNo sources found");
    } else {
        text.push_str(&format!("\nSources: {}", found.join(", ")));
    }

    GroundedAnswer { text, evidence }
}

/// `(answer, sources)` split on the last `SOURCES:` marker; the marker line
/// itself is removed from the answer.
fn split_sources(raw: &str) -> (&str, Option<&str>) {
    match raw.rfind("SOURCES:") {
        Some(at) => {
            let answer = raw[..at].trim_end();
            let sources = raw[at + "SOURCES:".len()..].trim();
            (answer, Some(sources))
        }
        None => (raw.trim_end(), None),
    }
}

/// Trim whitespace and strip one trailing period from a cited tag.
fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DocumentIndex;
    use crate::models::ChunkRecord;
    use crate::session::SessionCorpus;

    fn session_with_chunks(ids: &[&str]) -> ConversationSession {
        let mut session = ConversationSession::new("S");
        session.install_corpus(SessionCorpus {
            index: DocumentIndex::empty(),
            chunks: ids
                .iter()
                .map(|id| ChunkRecord {
                    id: id.to_string(),
                    text: format!("text of {}", id),
                    source_document: "doc.pdf".to_string(),
                })
                .collect(),
        });
        session
    }

    #[test]
    fn split_on_last_marker() {
        let raw = "The answer is foo\nSOURCES: 0-pl, 2-pl";
        let (answer, sources) = split_sources(raw);
        assert_eq!(answer, "The answer is foo");
        assert_eq!(sources, Some("0-pl, 2-pl"));
    }

    #[test]
    fn no_marker_passes_through() {
        let (answer, sources) = split_sources("Just an answer");
        assert_eq!(answer, "Just an answer");
        assert!(sources.is_none());
    }

    #[test]
    fn tag_normalization() {
        assert_eq!(normalize_tag(" 0-pl. "), "0-pl");
        assert_eq!(normalize_tag("2-pl"), "2-pl");
        assert_eq!(normalize_tag(" . "), "");
    }

    #[test]
    fn resolvable_tags_are_attributed() {
        let session = session_with_chunks(&["0-pl", "1-pl", "2-pl"]);
        let answer =
            attribute_sources("The answer is foo\nSOURCES: 0-pl, 2-pl, 9-pl", &session);

        assert!(answer.text.ends_with("\nSources: 0-pl, 2-pl"));
        assert_eq!(answer.evidence.len(), 2);
        assert_eq!(answer.evidence[0].name, "0-pl");
        assert_eq!(answer.evidence[0].content, "text of 0-pl");
        assert_eq!(answer.evidence[1].name, "2-pl");
    }

    #[test]
    fn unresolvable_tags_yield_no_sources_notice() {
        let session = session_with_chunks(&["0-pl"]);
        let answer = attribute_sources("The answer is foo\nSOURCES: 7-pl, 9-pl", &session);

        assert!(answer.text.ends_with("\nNo sources found"));
        assert!(answer.evidence.is_empty());
    }

    #[test]
    fn trailing_period_tags_resolve() {
        let session = session_with_chunks(&["0-pl"]);
        let answer = attribute_sources("The answer is foo\nSOURCES: 0-pl.", &session);
        assert!(answer.text.ends_with("\nSources: 0-pl"));
    }

    #[test]
    fn empty_sources_field_is_left_alone() {
        let session = session_with_chunks(&["0-pl"]);
        let answer = attribute_sources("The answer is foo\nSOURCES:", &session);
        assert_eq!(answer.text, "The answer is foo");
        assert!(answer.evidence.is_empty());
    }

    #[test]
    fn missing_marker_is_left_alone() {
        let session = session_with_chunks(&["0-pl"]);
        let answer = attribute_sources("No idea.", &session);
        assert_eq!(answer.text, "No idea.");
        assert!(answer.evidence.is_empty());
    }

    #[test]
    fn grounding_prompt_contains_context_and_question() {
        let messages = build_grounding_messages(&["chunk one", "chunk two"], "what is foo?");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].content.contains("chunk one"));
        assert!(messages[0].content.contains("chunk two"));
        assert!(messages[0].content.contains("ALWAYS return a \"SOURCES\" part"));
        assert_eq!(messages[1].content, "what is foo?");
    }
}
