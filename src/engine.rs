//! Inbound event front-end.
//!
//! The UI collaborator drives the engine with three events: a session
//! starting, files being uploaded, and a user message arriving. The engine
//! owns the session registry, runs the appropriate pipeline, and reports
//! results and failures back through the [`UiSink`].
//!
//! API failures never escape to the caller: they are rendered as messages
//! from the `Error` author, and the session stays usable for a retry.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::chat;
use crate::client::ApiClient;
use crate::config::Config;
use crate::ingest::{ingest_files, IngestReport};
use crate::models::{StreamEvent, UploadedFile};
use crate::rag;
use crate::session::{SessionId, SessionStore};
use crate::ui::{UiSink, AUTHOR_ASSISTANT, AUTHOR_ERROR};

/// Which pipeline answers user messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Direct chat with streamed token output.
    Chat,
    /// Document upload + grounded question answering.
    Documents,
}

pub struct Engine {
    config: Arc<Config>,
    client: ApiClient,
    sessions: SessionStore,
    mode: EngineMode,
}

impl Engine {
    pub fn new(config: Arc<Config>, client: ApiClient, mode: EngineMode) -> Self {
        Self {
            config,
            client,
            sessions: SessionStore::new(),
            mode,
        }
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// A new connection: create its session, seeded with the system directive.
    pub fn on_session_start(&self) -> SessionId {
        let (id, _) = self.sessions.open(&self.config.system_message);
        info!(session = %id, mode = ?self.mode, "Session started");
        id
    }

    /// The connection went away: drop the session. In-flight work is
    /// abandoned best-effort; there is nothing to roll back.
    pub fn on_session_end(&self, id: SessionId) {
        self.sessions.close(id);
        info!(session = %id, "Session closed");
    }

    /// Files uploaded in document mode: run the ingest pipeline and report
    /// progress. One unreadable file is skipped with a notice; an embedding
    /// failure aborts the ingest and asks the user to retry.
    pub async fn on_files_uploaded(
        &self,
        id: SessionId,
        files: &[UploadedFile],
        ui: &dyn UiSink,
    ) -> Result<()> {
        let handle = self.sessions.get(id).context("unknown session")?;
        let mut session = handle.lock().await;

        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let message = ui
            .send_message(AUTHOR_ASSISTANT, &processing_text(&names), &[])
            .await;

        match ingest_files(&self.config, &self.client, &mut session, files).await {
            Ok(report) => {
                ui.update_message(message, &processed_text(&report)).await;
            }
            Err(e) => {
                error!(session = %id, error = %e, "Ingest failed");
                ui.update_message(message, "Document processing failed.").await;
                ui.send_message(
                    AUTHOR_ERROR,
                    &format!("{}. Please try uploading again.", e),
                    &[],
                )
                .await;
            }
        }
        Ok(())
    }

    /// A user message: answer it in the engine's mode. Holding the session
    /// lock for the whole turn queues any concurrent question behind it.
    pub async fn on_user_message(&self, id: SessionId, text: &str, ui: &dyn UiSink) -> Result<()> {
        let handle = self.sessions.get(id).context("unknown session")?;
        let mut session = handle.lock().await;

        match self.mode {
            EngineMode::Chat => {
                let message = ui.send_message(AUTHOR_ASSISTANT, "", &[]).await;
                let (events, mut rx) = mpsc::channel::<StreamEvent>(32);

                let reply = chat::stream_reply(
                    &self.client,
                    &mut session,
                    text,
                    self.config.temperature,
                    events,
                    self.config.debug,
                );
                let forward = async {
                    while let Some(event) = rx.recv().await {
                        match event {
                            StreamEvent::Token(fragment) => {
                                ui.stream_token(message, &fragment).await
                            }
                            StreamEvent::Restart => ui.update_message(message, "").await,
                            StreamEvent::Done => {}
                        }
                    }
                };

                let (result, ()) = tokio::join!(reply, forward);
                match result {
                    Ok(final_text) => ui.update_message(message, &final_text).await,
                    Err(e) => {
                        error!(session = %id, error = %e, "Chat completion failed");
                        ui.send_message(AUTHOR_ERROR, &e.to_string(), &[]).await;
                    }
                }
            }
            EngineMode::Documents => {
                let answer = rag::answer_question(
                    &self.client,
                    &session,
                    text,
                    rag::DEFAULT_TOP_K,
                    self.config.temperature,
                    self.config.debug,
                )
                .await;

                match answer {
                    Ok(answer) => {
                        session.push_user(text);
                        session.push_assistant(answer.text.clone());
                        ui.send_message(AUTHOR_ASSISTANT, &answer.text, &answer.evidence)
                            .await;
                    }
                    Err(e) => {
                        error!(session = %id, error = %e, "Grounded answer failed");
                        session.push_user(text);
                        ui.send_message(AUTHOR_ERROR, &e.to_string(), &[]).await;
                    }
                }
            }
        }
        Ok(())
    }
}

fn backticked(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("`{}`", n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn processing_text(names: &[String]) -> String {
    if names.len() == 1 {
        format!("Processing `{}`...", names[0])
    } else {
        format!("Processing {}...", backticked(names))
    }
}

fn processed_text(report: &IngestReport) -> String {
    let mut text = if report.indexed_files.len() == 1 {
        format!(
            "`{}` processed. You can now ask questions!",
            report.indexed_files[0]
        )
    } else {
        format!(
            "{} processed. You can now ask questions.",
            backticked(&report.indexed_files)
        )
    };
    for (name, err) in &report.skipped {
        text.push_str(&format!("\nSkipped `{}`: {}", name, err));
    }
    text
}
