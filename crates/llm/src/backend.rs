//! Ollama reply generation backend
//!
//! Streams `/api/chat` responses (NDJSON, one JSON object per line) and
//! yields the `message.content` of each line as a reply chunk.

use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use weaver_config::LlmConfig;
use weaver_core::{ProviderError, ReplyGenerator, ReplyRequest};

use crate::prompt::{Message, PromptBuilder};
use crate::LlmError;

/// Ollama chat backend implementing [`ReplyGenerator`]
#[derive(Clone)]
pub struct OllamaReplyGenerator {
    client: Client,
    config: LlmConfig,
    instructions: String,
}

impl OllamaReplyGenerator {
    /// Create a new generator.
    ///
    /// Fails only if the HTTP client cannot be built.
    pub fn new(config: LlmConfig, instructions: impl Into<String>) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            instructions: instructions.into(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn chat_request(&self, request: &ReplyRequest) -> OllamaChatRequest {
        let messages = PromptBuilder::for_request(&self.instructions, request);
        OllamaChatRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream: true,
            options: Some(OllamaOptions {
                temperature: Some(self.config.temperature),
                num_predict: Some(self.config.max_tokens as i32),
            }),
        }
    }

    /// Send the request and check the status line
    async fn open(&self, body: &OllamaChatRequest) -> Result<reqwest::Response, LlmError> {
        let response = self.client.post(self.api_url("/chat")).json(body).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();

        Err(status_error(status, body, retry_after))
    }

    fn stream_reply<'a>(&'a self, request: ReplyRequest) -> impl Stream<Item = Result<String, LlmError>> + Send + 'a {
        async_stream::stream! {
            let body = self.chat_request(&request);
            tracing::debug!(turn_id = request.turn_id, model = %self.config.model, messages = body.messages.len(), "Opening reply stream");

            let response = match self.open(&body).await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut bytes = response.bytes_stream();
            let mut lines = LineBuffer::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(LlmError::from(e));
                        return;
                    }
                };

                for line in lines.push(&chunk) {
                    match parse_line(&line) {
                        Ok(piece) => {
                            if !piece.content.is_empty() {
                                yield Ok(piece.content);
                            }
                            if piece.done {
                                return;
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if let Some(line) = lines.finish() {
                match parse_line(&line) {
                    Ok(piece) if !piece.content.is_empty() => {
                        yield Ok(piece.content);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(e);
                    }
                }
            }
        }
    }
}

impl ReplyGenerator for OllamaReplyGenerator {
    fn generate<'a>(
        &'a self,
        request: ReplyRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send + 'a>> {
        Box::pin(self.stream_reply(request).map(|item| item.map_err(ProviderError::from)))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn status_error(status: StatusCode, body: String, retry_after: Option<Duration>) -> LlmError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        LlmError::RateLimited { retry_after }
    } else if status.is_server_error() {
        LlmError::Server {
            status: status.as_u16(),
            message: body,
        }
    } else {
        LlmError::Api {
            status: status.as_u16(),
            message: body,
        }
    }
}

/// Splits a byte stream into complete lines
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!text.is_empty()).then_some(text)
    }
}

struct StreamPiece {
    content: String,
    done: bool,
}

fn parse_line(line: &str) -> Result<StreamPiece, LlmError> {
    let chunk: OllamaStreamChunk =
        serde_json::from_str(line).map_err(|e| LlmError::InvalidResponse(format!("{e}: {line}")))?;

    if let Some(error) = chunk.error {
        return Err(LlmError::Server {
            status: 500,
            message: error,
        });
    }

    Ok(StreamPiece {
        content: chunk.message.map(|m| m.content).unwrap_or_default(),
        done: chunk.done,
    })
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}
