//! Error taxonomy for the API client and the ingestion pipeline.
//!
//! [`ApiError`] is a closed enumeration classified once at the transport
//! boundary; callers match on the variant, never on a raw transport error.
//! [`IngestError`] covers the upload pipeline, where file-level failures
//! skip the file and pipeline-level failures abort the ingest.

/// Errors from calls to the remote chat/embedding endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("transient API error: {message}")]
    Transient { message: String },

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("authentication failed: {message}")]
    Auth { message: String },

    #[error("response parse error: {message}")]
    ResponseParse { message: String },

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ApiError>,
    },
}

impl ApiError {
    /// Whether another attempt may succeed. Invalid requests fail identically
    /// every time and are never retried; the same goes for auth and parse
    /// failures and for an already-exhausted retry loop.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout { .. }
                | ApiError::Transient { .. }
                | ApiError::Connection { .. }
                | ApiError::ServiceUnavailable { .. }
        )
    }
}

/// Errors from the document upload pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unsupported file format: .{extension}")]
    UnsupportedFormat { extension: String },

    #[error("could not extract text from {name}: {message}")]
    Extraction { name: String, message: String },

    #[error("too many files: {count} uploaded, {max} allowed")]
    TooManyFiles { count: usize, max: usize },

    #[error("{name} exceeds the upload limit of {max_mb} MB")]
    FileTooLarge { name: String, max_mb: usize },

    #[error("chunking failed for {name}: {message}")]
    Chunking { name: String, message: String },

    #[error("embedding build failed: {0}")]
    EmbeddingBuild(#[from] ApiError),
}

impl IngestError {
    /// File-level errors skip one file; everything else aborts the ingest.
    pub fn is_file_local(&self) -> bool {
        matches!(
            self,
            IngestError::UnsupportedFormat { .. }
                | IngestError::Extraction { .. }
                | IngestError::FileTooLarge { .. }
                | IngestError::Chunking { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_classes() {
        assert!(ApiError::Timeout { timeout_secs: 30 }.is_retriable());
        assert!(ApiError::Transient {
            message: "429".into()
        }
        .is_retriable());
        assert!(ApiError::Connection {
            message: "refused".into()
        }
        .is_retriable());
        assert!(ApiError::ServiceUnavailable {
            message: "503".into()
        }
        .is_retriable());
    }

    #[test]
    fn non_retriable_classes() {
        assert!(!ApiError::InvalidRequest {
            message: "prompt too large".into()
        }
        .is_retriable());
        assert!(!ApiError::Auth {
            message: "401".into()
        }
        .is_retriable());
        assert!(!ApiError::ResponseParse {
            message: "no choices".into()
        }
        .is_retriable());
        assert!(!ApiError::RetriesExhausted {
            attempts: 5,
            last: Box::new(ApiError::Timeout { timeout_secs: 30 }),
        }
        .is_retriable());
    }

    #[test]
    fn ingest_error_scope() {
        assert!(IngestError::UnsupportedFormat {
            extension: "exe".into()
        }
        .is_file_local());
        assert!(!IngestError::EmbeddingBuild(ApiError::RetriesExhausted {
            attempts: 5,
            last: Box::new(ApiError::Timeout { timeout_secs: 30 }),
        })
        .is_file_local());
    }
}
