//! Google Gemini `streamGenerateContent` engine.
//!
//! Besides text, Gemini streams carry `functionCall` parts (surfaced as
//! tool invocation chunks) and `groundingMetadata` (surfaced as citation
//! chunks).

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::sse::{SseDecoder, SseEvent};
use super::{check_status, Engine, EngineRequest, EngineStream};
use crate::dispatch::{Chunk, Citation, Grounding, Role, ToolCall};
use crate::error::{PeerlinkError, Result};
use crate::keypool::Credential;
use crate::models::Provider;

/// Streaming engine for the Gemini API.
#[derive(Clone)]
pub struct GeminiEngine {
    base_url: String,
    client: Client,
}

impl GeminiEngine {
    /// Create an engine rooted at `base_url`
    pub fn new(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn body(request: &EngineRequest) -> Value {
        let mut contents: Vec<Value> = request
            .context
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                json!({"role": role, "parts": [{"text": turn.content}]})
            })
            .collect();
        contents.push(json!({"role": "user", "parts": [{"text": request.prompt}]}));

        let mut body = json!({ "contents": contents });
        if let Some(instruction) = &request.instruction {
            body["systemInstruction"] = json!({"parts": [{"text": instruction}]});
        }
        body
    }
}

#[async_trait]
impl Engine for GeminiEngine {
    fn name(&self) -> &str {
        Provider::Gemini.id()
    }

    async fn open(
        &self,
        request: &EngineRequest,
        credential: &Credential,
    ) -> Result<EngineStream> {
        let Credential::Key(key) = credential else {
            return Err(PeerlinkError::NoCredential(Provider::Gemini));
        };

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            request.model
        );
        debug!(model = %request.model, key = %key, "Opening Gemini stream");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", key.expose())
            .json(&Self::body(request))
            .send()
            .await?;
        let response = check_status(Provider::Gemini, response).await?;
        Ok(decode_stream(response.bytes_stream()))
    }
}

/// Decode a Gemini SSE body into chunks.
pub(crate) fn decode_stream<S, E>(body: S) -> EngineStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<PeerlinkError> + Send,
{
    Box::pin(try_stream! {
        let mut decoder = SseDecoder::new();
        let mut body = Box::pin(body);

        while let Some(bytes) = body.next().await {
            let bytes = bytes.map_err(Into::<PeerlinkError>::into)?;
            for event in decoder.feed(&bytes) {
                for chunk in handle_event(event)? {
                    yield chunk;
                }
            }
        }
        if let Some(event) = decoder.finish() {
            for chunk in handle_event(event)? {
                yield chunk;
            }
        }
    })
}

fn handle_event(event: SseEvent) -> Result<Vec<Chunk>> {
    let json = match event {
        SseEvent::Data(json) => json,
        SseEvent::Done => return Ok(Vec::new()),
        SseEvent::Error(message) => return Err(PeerlinkError::Decode(message)),
    };

    if let Some(error) = json.get("error") {
        let message = error["message"].as_str().unwrap_or("stream error").to_string();
        return Err(PeerlinkError::Upstream {
            provider: Provider::Gemini,
            status: error["code"].as_u64().unwrap_or(500) as u16,
            message,
        });
    }

    let Some(candidate) = json.get("candidates").and_then(|c| c.get(0)) else {
        if let Some(reason) = json["promptFeedback"]["blockReason"].as_str() {
            return Err(PeerlinkError::Decode(format!("Prompt blocked: {reason}")));
        }
        return Ok(Vec::new());
    };

    let mut chunks = Vec::new();
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                if !text.is_empty() {
                    chunks.push(Chunk::text(text));
                }
            }
            if let Some(call) = part.get("functionCall") {
                chunks.push(Chunk::tool_call(ToolCall {
                    id: call["id"].as_str().map(str::to_string),
                    name: call["name"].as_str().unwrap_or_default().to_string(),
                    arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
                }));
            }
        }
    }

    if let Some(grounding) = candidate.get("groundingMetadata").and_then(parse_grounding) {
        chunks.push(Chunk::grounding(grounding));
    }

    Ok(chunks)
}

fn parse_grounding(metadata: &Value) -> Option<Grounding> {
    let citations: Vec<Citation> = metadata["groundingChunks"]
        .as_array()
        .map(|chunks| {
            chunks
                .iter()
                .filter_map(|c| {
                    let web = c.get("web")?;
                    Some(Citation {
                        uri: web["uri"].as_str()?.to_string(),
                        title: web["title"].as_str().map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let queries: Vec<String> = metadata["webSearchQueries"]
        .as_array()
        .map(|q| q.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    if citations.is_empty() && queries.is_empty() {
        return None;
    }
    Some(Grounding { citations, queries })
}
