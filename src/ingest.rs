//! Document upload pipeline.
//!
//! Coordinates the full ingest flow: upload caps → text extraction →
//! chunking → chunk id assignment → batched embedding → atomic corpus swap
//! into the session. A file that cannot be read is skipped and reported;
//! an embedding failure aborts the whole ingest with the session untouched.

use tracing::{debug, info};

use crate::chunk::split_text;
use crate::client::ApiClient;
use crate::config::Config;
use crate::error::IngestError;
use crate::extract::extract_text;
use crate::index::build_index;
use crate::models::{ChunkRecord, UploadedFile};
use crate::session::{ConversationSession, SessionCorpus};

/// What an ingest run did: how many chunks were indexed per accepted file,
/// and which files were skipped with their file-local error.
pub struct IngestReport {
    pub total_chunks: usize,
    pub indexed_files: Vec<String>,
    pub skipped: Vec<(String, IngestError)>,
}

/// Ingest uploaded files into the session.
///
/// Chunk ids are `"{i}-pl"` over the combined cross-document sequence, in
/// upload order. The index and chunk records are built completely before
/// being installed in one assignment, so a concurrent reader of the session
/// never observes partial state.
pub async fn ingest_files(
    config: &Config,
    client: &ApiClient,
    session: &mut ConversationSession,
    files: &[UploadedFile],
) -> Result<IngestReport, IngestError> {
    if files.len() > config.max_files {
        return Err(IngestError::TooManyFiles {
            count: files.len(),
            max: config.max_files,
        });
    }

    let mut texts: Vec<(String, String)> = Vec::new();
    let mut skipped: Vec<(String, IngestError)> = Vec::new();

    for file in files {
        match load_file(config, file) {
            Ok(text) => {
                debug!(file = %file.name, chars = text.len(), "Extracted text");
                texts.push((file.name.clone(), text));
            }
            Err(e) if e.is_file_local() => {
                info!(file = %file.name, error = %e, "Skipping file");
                skipped.push((file.name.clone(), e));
            }
            Err(e) => return Err(e),
        }
    }

    // Combined cross-document chunk sequence, in upload order.
    let mut chunks: Vec<ChunkRecord> = Vec::new();
    let mut indexed_files = Vec::new();
    for (name, text) in &texts {
        let pieces = split_text(text, config.chunk_size, config.chunk_overlap);
        for piece in pieces {
            chunks.push(ChunkRecord {
                id: format!("{}-pl", chunks.len()),
                text: piece,
                source_document: name.clone(),
            });
        }
        indexed_files.push(name.clone());
    }

    let index = build_index(client, &chunks, config.embeddings_batch_size).await?;
    info!(
        files = indexed_files.len(),
        chunks = chunks.len(),
        skipped = skipped.len(),
        "Ingest complete"
    );

    let total_chunks = chunks.len();
    session.install_corpus(SessionCorpus { index, chunks });

    Ok(IngestReport {
        total_chunks,
        indexed_files,
        skipped,
    })
}

fn load_file(config: &Config, file: &UploadedFile) -> Result<String, IngestError> {
    if file.bytes.len() > config.max_upload_bytes() {
        return Err(IngestError::FileTooLarge {
            name: file.name.clone(),
            max_mb: config.max_upload_mb,
        });
    }
    extract_text(&file.name, &file.bytes)
}
