//! HTTP transport for the chat/embedding endpoint.
//!
//! [`ApiTransport`] is the seam between the retry client and the wire: one
//! implementation speaks the deployment-routed OpenAI dialect over reqwest,
//! and tests substitute scripted fakes. Every HTTP or network failure is
//! classified into an [`ApiError`] variant here, exactly once — callers
//! never see a raw transport error.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::Config;
use crate::credentials::Credential;
use crate::error::ApiError;
use crate::models::ChatMessage;

/// A chat completion request. The deployment/model name lives in the
/// transport configuration, not on the request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

/// Operations the remote endpoint offers. Implementations classify all
/// failures into [`ApiError`] and forward streamed fragments as they arrive.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Single-shot chat completion; returns the assistant text.
    async fn complete(
        &self,
        request: &ChatRequest,
        credential: &Credential,
    ) -> Result<String, ApiError>;

    /// Streaming chat completion; sends each text fragment on `fragments`
    /// as it arrives and returns once the stream ends. Dropping the
    /// receiver aborts the stream without error.
    async fn complete_streaming(
        &self,
        request: &ChatRequest,
        credential: &Credential,
        fragments: mpsc::Sender<String>,
    ) -> Result<(), ApiError>;

    /// Embed a batch of texts; returns one vector per input, in order.
    async fn embed(
        &self,
        inputs: &[String],
        credential: &Credential,
    ) -> Result<Vec<Vec<f32>>, ApiError>;
}

/// Transport speaking the deployment-routed OpenAI wire format:
/// `POST {base}/openai/deployments/{name}/chat/completions?api-version={v}`
/// with either an `api-key` header or a bearer `Authorization` header.
pub struct HttpTransport {
    client: reqwest::Client,
    api_base: String,
    api_version: String,
    chat_deployment: String,
    embeddings_deployment: Option<String>,
    timeout_secs: u64,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::Connection {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            api_version: config.api_version.clone(),
            chat_deployment: config.chat_deployment.clone(),
            embeddings_deployment: config.embeddings_deployment.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.api_base, self.chat_deployment, self.api_version
        )
    }

    fn embeddings_url(&self) -> Result<String, ApiError> {
        let deployment =
            self.embeddings_deployment
                .as_deref()
                .ok_or_else(|| ApiError::InvalidRequest {
                    message: "no embeddings deployment configured".to_string(),
                })?;
        Ok(format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.api_base, deployment, self.api_version
        ))
    }

    fn authorize(
        &self,
        builder: reqwest::RequestBuilder,
        credential: &Credential,
    ) -> reqwest::RequestBuilder {
        match credential {
            Credential::ApiKey(key) => builder.header("api-key", key),
            Credential::Bearer { token } => {
                builder.header("Authorization", format!("Bearer {}", token))
            }
        }
    }

    fn chat_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        json!({
            "messages": messages,
            "temperature": request.temperature,
            "stream": stream,
        })
    }

    fn classify_reqwest(&self, e: reqwest::Error) -> ApiError {
        if e.is_timeout() {
            ApiError::Timeout {
                timeout_secs: self.timeout_secs,
            }
        } else {
            ApiError::Connection {
                message: e.to_string(),
            }
        }
    }
}

/// Map an HTTP status to the closed error taxonomy. The retriable set is
/// 408/429/5xx, with 503 distinguished as `ServiceUnavailable`; remaining
/// 4xx are `InvalidRequest` except the auth pair.
fn classify_status(status: reqwest::StatusCode, body: &str, timeout_secs: u64) -> ApiError {
    let message = format!("HTTP {}: {}", status.as_u16(), body);
    match status.as_u16() {
        401 | 403 => ApiError::Auth { message },
        408 => ApiError::Timeout { timeout_secs },
        429 => ApiError::Transient { message },
        503 => ApiError::ServiceUnavailable { message },
        500..=599 => ApiError::Transient { message },
        _ => ApiError::InvalidRequest { message },
    }
}

/// Parse a single SSE line; returns the JSON payload of a `data:` line,
/// or None for comments, blank lines, and the `[DONE]` terminator.
fn parse_sse_line(line: &str) -> Option<Value> {
    let data = line.trim().strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }
    serde_json::from_str(data).ok()
}

fn delta_fragment(payload: &Value) -> Option<&str> {
    payload
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}

fn parse_completion(payload: &Value) -> Result<String, ApiError> {
    payload
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ApiError::ResponseParse {
            message: "no assistant content in response".to_string(),
        })
}

fn parse_embeddings(payload: &Value, expected: usize) -> Result<Vec<Vec<f32>>, ApiError> {
    let data = payload
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ApiError::ResponseParse {
            message: "missing data array in embeddings response".to_string(),
        })?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| ApiError::ResponseParse {
                message: "missing embedding in response item".to_string(),
            })?;
        let vector: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vector));
    }

    // Order by index so vectors line up with inputs.
    indexed.sort_by_key(|(i, _)| *i);
    let vectors: Vec<Vec<f32>> = indexed.into_iter().map(|(_, v)| v).collect();

    if vectors.len() != expected {
        return Err(ApiError::ResponseParse {
            message: format!(
                "embeddings response has {} vectors for {} inputs",
                vectors.len(),
                expected
            ),
        });
    }
    Ok(vectors)
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn complete(
        &self,
        request: &ChatRequest,
        credential: &Credential,
    ) -> Result<String, ApiError> {
        let url = self.chat_url();
        debug!(url = %url, messages = request.messages.len(), "Sending completion request");

        let response = self
            .authorize(self.client.post(&url), credential)
            .json(&self.chat_body(request, false))
            .send()
            .await
            .map_err(|e| self.classify_reqwest(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.classify_reqwest(e))?;
        if !status.is_success() {
            return Err(classify_status(status, &body, self.timeout_secs));
        }

        let payload: Value = serde_json::from_str(&body).map_err(|e| ApiError::ResponseParse {
            message: format!("invalid JSON: {}", e),
        })?;
        parse_completion(&payload)
    }

    async fn complete_streaming(
        &self,
        request: &ChatRequest,
        credential: &Credential,
        fragments: mpsc::Sender<String>,
    ) -> Result<(), ApiError> {
        let url = self.chat_url();
        debug!(url = %url, messages = request.messages.len(), "Sending streaming completion request");

        let response = self
            .authorize(self.client.post(&url), credential)
            .json(&self.chat_body(request, true))
            .send()
            .await
            .map_err(|e| self.classify_reqwest(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, self.timeout_secs));
        }

        let mut stream = response.bytes_stream();
        // Byte buffer: a multi-byte character may be split across network
        // chunks, so only complete lines are decoded.
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| self.classify_reqwest(e))?;
            buffer.extend_from_slice(&bytes);

            while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line_bytes);
                if let Some(payload) = parse_sse_line(&line) {
                    if let Some(fragment) = delta_fragment(&payload) {
                        if !fragment.is_empty()
                            && fragments.send(fragment.to_string()).await.is_err()
                        {
                            // Receiver gone (session disconnected); abandon.
                            return Ok(());
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn embed(
        &self,
        inputs: &[String],
        credential: &Credential,
    ) -> Result<Vec<Vec<f32>>, ApiError> {
        let url = self.embeddings_url()?;
        debug!(url = %url, inputs = inputs.len(), "Sending embeddings request");

        let response = self
            .authorize(self.client.post(&url), credential)
            .json(&json!({ "input": inputs }))
            .send()
            .await
            .map_err(|e| self.classify_reqwest(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.classify_reqwest(e))?;
        if !status.is_success() {
            return Err(classify_status(status, &body, self.timeout_secs));
        }

        let payload: Value = serde_json::from_str(&body).map_err(|e| ApiError::ResponseParse {
            message: format!("invalid JSON: {}", e),
        })?;
        parse_embeddings(&payload, inputs.len())
    }
}
