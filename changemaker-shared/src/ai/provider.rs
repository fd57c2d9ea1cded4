/// Streaming chat completions
///
/// [`CompletionProvider`] abstracts the model backend. [`OpenAiCompatibleClient`]
/// talks to any `/chat/completions` endpoint that follows the OpenAI
/// streaming protocol: server-sent `data:` lines carrying JSON deltas,
/// finished by `data: [DONE]`.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Error type for completion requests
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("AI provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("AI request failed: {0}")]
    Transport(String),

    #[error("Malformed AI stream: {0}")]
    Protocol(String),

    #[error("AI not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        AiError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Token counts reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// One item of a completion stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionChunk {
    /// Generated text
    Token(String),
    /// Final token accounting
    Usage(TokenUsage),
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk, AiError>> + Send>>;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Model identifier sent with each request
    fn model(&self) -> &str;

    /// Starts a streaming completion
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, AiError>;
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Outcome of parsing one SSE line
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine {
    Chunks(Vec<CompletionChunk>),
    Done,
    Skip,
}

/// Parses a single server-sent event line
///
/// Comments, blank lines and non-`data` fields are skipped.
pub fn parse_sse_line(line: &str) -> Result<SseLine, AiError> {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();

    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: WireChunk =
        serde_json::from_str(data).map_err(|e| AiError::Protocol(e.to_string()))?;

    let mut out = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                out.push(CompletionChunk::Token(content));
            }
        }
    }
    if let Some(usage) = chunk.usage {
        out.push(CompletionChunk::Usage(usage));
    }

    Ok(SseLine::Chunks(out))
}

/// Splits a byte stream into lines and decodes them into chunks
struct SseDecoder<S> {
    bytes: S,
    buffer: Vec<u8>,
    pending: VecDeque<CompletionChunk>,
    finished: bool,
}

impl<S> SseDecoder<S>
where
    S: Stream<Item = Result<Bytes, AiError>> + Unpin,
{
    fn new(bytes: S) -> Self {
        Self {
            bytes,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn drain_lines(&mut self) -> Result<(), AiError> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = std::str::from_utf8(&line[..line.len() - 1])
                .map_err(|e| AiError::Protocol(e.to_string()))?;

            match parse_sse_line(line)? {
                SseLine::Chunks(chunks) => self.pending.extend(chunks),
                SseLine::Done => {
                    self.finished = true;
                    self.buffer.clear();
                    return Ok(());
                }
                SseLine::Skip => {}
            }
        }
        Ok(())
    }

    async fn next_chunk(&mut self) -> Option<Result<CompletionChunk, AiError>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }
            if self.finished {
                return None;
            }

            match self.bytes.next().await {
                Some(Ok(bytes)) => {
                    self.buffer.extend_from_slice(&bytes);
                    if let Err(e) = self.drain_lines() {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    // Stream closed without [DONE]; flush a trailing line
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        self.buffer.push(b'\n');
                        if let Err(e) = self.drain_lines() {
                            return Some(Err(e));
                        }
                    }
                }
            }
        }
    }
}

/// Turns raw SSE bytes into completion chunks
pub fn decode_sse<S>(bytes: S) -> CompletionStream
where
    S: Stream<Item = Result<Bytes, AiError>> + Unpin + Send + 'static,
{
    let decoder = SseDecoder::new(bytes);
    Box::pin(stream::unfold(decoder, |mut decoder| async move {
        decoder.next_chunk().await.map(|item| (item, decoder))
    }))
}

/// Client for OpenAI-compatible chat completion APIs
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AiError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AiError::NotConfigured("AI API key is empty".into()));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::NotConfigured(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, AiError> {
        debug!(
            model = %self.model,
            messages = request.messages.len(),
            "Starting streaming completion"
        );

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&WireRequest {
                model: &self.model,
                messages: &request.messages,
                stream: true,
                stream_options: StreamOptions {
                    include_usage: true,
                },
                max_tokens: request.max_tokens,
                temperature: request.temperature,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "AI provider rejected completion request");
            return Err(AiError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes_stream().map(|item| item.map_err(AiError::from));
        Ok(decode_sse(Box::pin(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            SseLine::Chunks(vec![CompletionChunk::Token("Hel".into())])
        );
    }

    #[test]
    fn test_parse_usage_line() {
        let line = r#"data: {"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            SseLine::Chunks(vec![CompletionChunk::Usage(TokenUsage {
                prompt_tokens: 12,
                completion_tokens: 30,
            })])
        );
    }

    #[test]
    fn test_parse_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line("event: message").unwrap(), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Chunks(vec![])
        );
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        assert!(matches!(
            parse_sse_line("data: {not json"),
            Err(AiError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_decoder_handles_split_lines() {
        let parts: Vec<Result<Bytes, AiError>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n")),
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"con")),
            Ok(Bytes::from_static(b"tent\":\" there\"}}]}\r\n\r\n")),
            Ok(Bytes::from_static(
                b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2}}\n\n",
            )),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n")),
        ];

        let chunks: Vec<_> = decode_sse(stream::iter(parts))
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(
            chunks,
            vec![
                CompletionChunk::Token("Hi".into()),
                CompletionChunk::Token(" there".into()),
                CompletionChunk::Usage(TokenUsage {
                    prompt_tokens: 3,
                    completion_tokens: 2,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_decoder_surfaces_transport_errors() {
        let parts: Vec<Result<Bytes, AiError>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n")),
            Err(AiError::Transport("reset".into())),
        ];

        let items: Vec<_> = decode_sse(stream::iter(parts)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(AiError::Transport(_))));
    }

    #[test]
    fn test_client_requires_api_key() {
        assert!(matches!(
            OpenAiCompatibleClient::new("https://api.openai.com/v1", " ", "gpt-4o-mini", Duration::from_secs(30)),
            Err(AiError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_wire_request_shape() {
        let messages = vec![ChatMessage::user("hi")];
        let json = serde_json::to_value(WireRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
            max_tokens: None,
            temperature: Some(0.7),
        })
        .unwrap();

        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("max_tokens").is_none());
    }
}
