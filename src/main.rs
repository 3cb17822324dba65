//! # Grounded Chat CLI (`gchat`)
//!
//! Reference terminal transport for the engine. Two commands mirror the two
//! engine modes:
//!
//! ```bash
//! gchat chat                     # plain streaming chat
//! gchat docs report.pdf notes.docx   # upload documents, then ask questions
//! ```
//!
//! Configuration comes from the environment (a `.env` file in the working
//! directory is honored); see `Config` for the full variable list. Type a
//! message and press enter; an empty line or EOF ends the session.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};

use grounded_chat::client::{ApiClient, RetryPolicy};
use grounded_chat::config::{AuthMode, Config};
use grounded_chat::credentials::{CommandTokenSource, CredentialProvider};
use grounded_chat::engine::{Engine, EngineMode};
use grounded_chat::models::{MessageId, SourceElement, UploadedFile};
use grounded_chat::transport::HttpTransport;
use grounded_chat::ui::UiSink;

/// Grounded Chat — chat with a model directly, or upload documents and ask
/// grounded questions with cited sources.
#[derive(Parser)]
#[command(
    name = "gchat",
    about = "Grounded Chat — a document-grounded conversational assistant",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plain chat with streamed output.
    Chat,
    /// Upload documents, then ask grounded questions about them.
    Docs {
        /// PDF or DOCX files to index.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Prints engine output to stdout. Streaming fragments are written inline;
/// updates of a streamed message are suppressed once its text was already
/// printed token by token.
struct TerminalSink {
    streamed: std::sync::Mutex<std::collections::HashSet<MessageId>>,
}

impl TerminalSink {
    fn new() -> Self {
        Self {
            streamed: std::sync::Mutex::new(std::collections::HashSet::new()),
        }
    }
}

#[async_trait]
impl UiSink for TerminalSink {
    async fn send_message(&self, author: &str, text: &str, elements: &[SourceElement]) -> MessageId {
        if !text.is_empty() {
            println!("[{}] {}", author, text);
            for element in elements {
                println!("  --- {} ---", element.name);
                for line in element.content.lines().take(4) {
                    println!("  {}", line);
                }
            }
        }
        uuid::Uuid::new_v4()
    }

    async fn update_message(&self, id: MessageId, text: &str) {
        if self.streamed.lock().unwrap().contains(&id) {
            // Text already on screen token by token; just end the line.
            println!();
            return;
        }
        println!("[Chatbot] {}", text);
    }

    async fn stream_token(&self, id: MessageId, fragment: &str) {
        let mut streamed = self.streamed.lock().unwrap();
        if streamed.insert(id) {
            print!("[Chatbot] ");
        }
        drop(streamed);
        print!("{}", fragment);
        let _ = std::io::stdout().flush();
    }
}

fn build_client(config: &Config) -> Result<ApiClient> {
    let credentials = match config.auth_mode {
        AuthMode::ApiKey => CredentialProvider::api_key(
            config
                .api_key
                .clone()
                .context("GCHAT_API_KEY is required in api_key mode")?,
        ),
        AuthMode::BearerToken => {
            let command = config
                .token_command
                .clone()
                .context("GCHAT_TOKEN_COMMAND is required in bearer_token mode")?;
            CredentialProvider::bearer(
                Box::new(CommandTokenSource::new(command)),
                config.token_refresh_secs,
            )
        }
    };

    let transport = HttpTransport::new(config)?;
    let policy = RetryPolicy::new(
        config.max_retries,
        std::time::Duration::from_secs_f64(config.backoff_base_secs),
    );
    Ok(ApiClient::new(
        Arc::new(transport),
        Arc::new(credentials),
        policy,
    ))
}

fn read_line(prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let line = line.trim().to_string();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(line))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::from_env()?);
    let client = build_client(&config)?;

    let mode = match &cli.command {
        Commands::Chat => EngineMode::Chat,
        Commands::Docs { .. } => EngineMode::Documents,
    };
    let engine = Engine::new(Arc::clone(&config), client, mode);
    let sink = TerminalSink::new();

    let session = engine.on_session_start();

    if let Commands::Docs { files } = &cli.command {
        let mut uploads = Vec::with_capacity(files.len());
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("bad file path: {}", path.display()))?;
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            uploads.push(UploadedFile { name, bytes });
        }
        engine.on_files_uploaded(session, &uploads, &sink).await?;
    }

    while let Some(line) = read_line("> ")? {
        engine.on_user_message(session, &line, &sink).await?;
    }

    engine.on_session_end(session);
    Ok(())
}
