//! OpenAI-compatible chat-completions engine.
//!
//! Serves every provider that speaks the `/chat/completions` streaming
//! dialect: OpenAI, Groq, OpenRouter, DeepSeek and Mistral.

use std::collections::BTreeMap;

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{header, Client};
use serde_json::{json, Value};
use tracing::debug;

use super::sse::{SseDecoder, SseEvent};
use super::{check_status, Engine, EngineRequest, EngineStream};
use crate::dispatch::{Chunk, ToolCall};
use crate::error::{PeerlinkError, Result};
use crate::keypool::Credential;
use crate::models::Provider;

/// Streaming engine for OpenAI-style APIs.
#[derive(Clone)]
pub struct OpenAiEngine {
    provider: Provider,
    base_url: String,
    client: Client,
}

impl OpenAiEngine {
    /// Create an engine for `provider` rooted at `base_url`
    pub fn new(provider: Provider, base_url: impl Into<String>, client: Client) -> Self {
        Self {
            provider,
            base_url: base_url.into(),
            client,
        }
    }

    fn body(request: &EngineRequest) -> Value {
        let mut messages = Vec::with_capacity(request.context.len() + 2);
        if let Some(instruction) = &request.instruction {
            messages.push(json!({"role": "system", "content": instruction}));
        }
        for turn in &request.context {
            messages.push(json!({"role": turn.role.as_str(), "content": turn.content}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        json!({
            "model": request.model,
            "messages": messages,
            "stream": true,
        })
    }
}

#[async_trait]
impl Engine for OpenAiEngine {
    fn name(&self) -> &str {
        self.provider.id()
    }

    async fn open(
        &self,
        request: &EngineRequest,
        credential: &Credential,
    ) -> Result<EngineStream> {
        let Credential::Key(key) = credential else {
            return Err(PeerlinkError::NoCredential(self.provider));
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(provider = %self.provider, model = %request.model, key = %key, "Opening chat stream");

        let mut builder = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", key.expose()))
            .header(header::ACCEPT, "text/event-stream")
            .json(&Self::body(request));
        if self.provider == Provider::OpenRouter {
            builder = builder.header("X-Title", "peerlink");
        }

        let response = check_status(self.provider, builder.send().await?).await?;
        Ok(decode_stream(self.provider, response.bytes_stream()))
    }
}

/// Decode a chat-completions SSE body into chunks.
pub(crate) fn decode_stream<S, E>(provider: Provider, body: S) -> EngineStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<PeerlinkError> + Send,
{
    Box::pin(try_stream! {
        let mut decoder = SseDecoder::new();
        let mut state = StreamState::new(provider);
        let mut body = Box::pin(body);

        while let Some(bytes) = body.next().await {
            let bytes = bytes.map_err(Into::<PeerlinkError>::into)?;
            for event in decoder.feed(&bytes) {
                let (chunks, done) = state.handle(event)?;
                for chunk in chunks {
                    yield chunk;
                }
                if done {
                    return;
                }
            }
        }

        if let Some(event) = decoder.finish() {
            let (chunks, _) = state.handle(event)?;
            for chunk in chunks {
                yield chunk;
            }
        }
        for call in state.tool_calls.drain() {
            yield Chunk::tool_call(call);
        }
    })
}

/// Per-stream decoding state.
struct StreamState {
    provider: Provider,
    tool_calls: ToolCallAccumulator,
}

impl StreamState {
    fn new(provider: Provider) -> Self {
        Self {
            provider,
            tool_calls: ToolCallAccumulator::default(),
        }
    }

    /// Chunks produced by one event, and whether the stream is complete.
    fn handle(&mut self, event: SseEvent) -> Result<(Vec<Chunk>, bool)> {
        let json = match event {
            SseEvent::Data(json) => json,
            SseEvent::Done => {
                let chunks = self.tool_calls.drain().into_iter().map(Chunk::tool_call).collect();
                return Ok((chunks, true));
            },
            SseEvent::Error(message) => return Err(PeerlinkError::Decode(message)),
        };

        if let Some(error) = json.get("error") {
            return Err(stream_error(self.provider, error));
        }

        let mut chunks = Vec::new();
        let Some(choice) = json.get("choices").and_then(|c| c.get(0)) else {
            return Ok((chunks, false));
        };

        let delta = &choice["delta"];
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                chunks.push(Chunk::text(text));
            }
        }
        if let Some(deltas) = delta["tool_calls"].as_array() {
            self.tool_calls.absorb(deltas);
        }
        if choice["finish_reason"].is_string() {
            chunks.extend(self.tool_calls.drain().into_iter().map(Chunk::tool_call));
        }

        Ok((chunks, false))
    }
}

fn stream_error(provider: Provider, error: &Value) -> PeerlinkError {
    let message = error["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    match error["code"].as_u64() {
        Some(code @ 100..=599) => PeerlinkError::Upstream {
            provider,
            status: code as u16,
            message,
        },
        _ => PeerlinkError::Network(format!("{provider} stream error: {message}")),
    }
}

/// Tool-call fragments arrive spread over many deltas, keyed by index.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<u64, PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, deltas: &[Value]) {
        for delta in deltas {
            let index = delta["index"].as_u64().unwrap_or(0);
            let call = self.calls.entry(index).or_default();
            if let Some(id) = delta["id"].as_str() {
                call.id = Some(id.to_string());
            }
            if let Some(name) = delta["function"]["name"].as_str() {
                call.name.push_str(name);
            }
            if let Some(arguments) = delta["function"]["arguments"].as_str() {
                call.arguments.push_str(arguments);
            }
        }
    }

    fn drain(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.calls)
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| {
                let arguments = if call.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&call.arguments)
                        .unwrap_or(Value::String(call.arguments))
                };
                ToolCall {
                    id: call.id,
                    name: call.name,
                    arguments,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Turn;
    use futures::stream;

    fn body(parts: &[&'static str]) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
        stream::iter(parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect::<Vec<_>>())
    }

    async fn collect(stream: EngineStream) -> Vec<Result<Chunk>> {
        stream.collect().await
    }

    #[test]
    fn test_body_shape() {
        let request = EngineRequest {
            provider: Provider::Groq,
            model: "llama-3.3-70b-versatile".to_string(),
            instruction: Some("be brief".to_string()),
            context: vec![Turn::user("earlier"), Turn::assistant("reply")],
            prompt: "now".to_string(),
        };
        let body = OpenAiEngine::body(&request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "now");
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn test_text_deltas() {
        let chunks = collect(decode_stream(
            Provider::OpenAI,
            body(&[
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
            ]),
        ))
        .await;
        let texts: Vec<_> = chunks
            .into_iter()
            .map(|c| c.unwrap().text.unwrap())
            .collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_tool_call_accumulated() {
        let chunks = collect(decode_stream(
            Provider::OpenAI,
            body(&[
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"{\\\"ci\"}}]}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"ty\\\":\\\"Oslo\\\"}\"}}]}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
                "data: [DONE]\n\n",
            ]),
        ))
        .await;
        assert_eq!(chunks.len(), 1);
        let call = chunks[0].as_ref().unwrap().tool_call.clone().unwrap();
        assert_eq!(call.id.as_deref(), Some("call_1"));
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments, json!({"city": "Oslo"}));
    }

    #[tokio::test]
    async fn test_in_stream_error() {
        let chunks = collect(decode_stream(
            Provider::OpenRouter,
            body(&[
                "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
                "data: {\"error\":{\"code\":429,\"message\":\"Rate limit exceeded\"}}\n\n",
            ]),
        ))
        .await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert_eq!(chunks[1].as_ref().unwrap_err().status(), Some(429));
    }

    #[tokio::test]
    async fn test_body_error_ends_stream() {
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n")),
            Err(std::io::Error::other("reset")),
        ]);
        let chunks = collect(decode_stream(Provider::OpenAI, failing)).await;
        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[1], Err(PeerlinkError::Io(_))));
    }

    #[test]
    fn test_unparseable_arguments_kept_raw() {
        let mut acc = ToolCallAccumulator::default();
        acc.absorb(&[json!({"index": 0, "function": {"name": "f", "arguments": "{oops"}})]);
        let calls = acc.drain();
        assert_eq!(calls[0].arguments, Value::String("{oops".to_string()));
        assert!(acc.drain().is_empty());
    }
}
