//! Managed backend engine.
//!
//! Used whenever the key pool hands out the managed sentinel. The backend
//! performs the provider call itself and streams plain text back:
//!
//! ```text
//! POST <managed url>
//! {"message": "...", "modelId": "...", "provider": "groq",
//!  "context": {"instruction": "...", "history": [{"role": "user", "content": "..."}]}}
//! ```

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{check_status, Engine, EngineRequest, EngineStream};
use crate::dispatch::Chunk;
use crate::error::{PeerlinkError, Result};
use crate::keypool::Credential;

/// Engine that forwards requests to the managed backend.
#[derive(Clone)]
pub struct ManagedEngine {
    url: String,
    client: Client,
}

impl ManagedEngine {
    /// Create an engine posting to `url`
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }

    fn body(request: &EngineRequest) -> Value {
        let history: Vec<Value> = request
            .context
            .iter()
            .map(|turn| json!({"role": turn.role.as_str(), "content": turn.content}))
            .collect();
        json!({
            "message": request.prompt,
            "modelId": request.model,
            "provider": request.provider.id(),
            "context": {
                "instruction": request.instruction,
                "history": history,
            },
        })
    }
}

#[async_trait]
impl Engine for ManagedEngine {
    fn name(&self) -> &str {
        "managed"
    }

    async fn open(
        &self,
        request: &EngineRequest,
        _credential: &Credential,
    ) -> Result<EngineStream> {
        debug!(provider = %request.provider, model = %request.model, "Forwarding to managed backend");
        let response = self
            .client
            .post(&self.url)
            .json(&Self::body(request))
            .send()
            .await?;
        let response = check_status(request.provider, response).await?;
        Ok(decode_text_stream(response.bytes_stream()))
    }
}

/// Plain-text body to text chunks. A multi-byte character split across
/// network chunks is held back until its remaining bytes arrive.
pub(crate) fn decode_text_stream<S, E>(body: S) -> EngineStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<PeerlinkError> + Send,
{
    Box::pin(try_stream! {
        let mut carry: Vec<u8> = Vec::new();
        let mut body = Box::pin(body);

        while let Some(bytes) = body.next().await {
            let bytes = bytes.map_err(Into::<PeerlinkError>::into)?;
            carry.extend_from_slice(&bytes);

            let valid = complete_utf8_prefix(&carry)?;
            if valid == 0 {
                continue;
            }

            let rest = carry.split_off(valid);
            let text = String::from_utf8_lossy(&carry).into_owned();
            carry = rest;
            yield Chunk::text(text);
        }

        if !carry.is_empty() {
            yield Chunk::text(String::from_utf8_lossy(&carry).into_owned());
        }
    })
}

/// Length of the longest prefix that ends on a character boundary.
/// Only an incomplete trailing sequence is tolerated.
fn complete_utf8_prefix(bytes: &[u8]) -> Result<usize> {
    match std::str::from_utf8(bytes) {
        Ok(_) => Ok(bytes.len()),
        Err(e) if e.error_len().is_none() => Ok(e.valid_up_to()),
        Err(e) => Err(PeerlinkError::Decode(format!("Invalid UTF-8 in managed stream: {e}"))),
    }
}
