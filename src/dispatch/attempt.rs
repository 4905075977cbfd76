//! One candidate attempt up to its first output chunk.

use futures::StreamExt;

use crate::engine::{EngineRequest, EngineSet, EngineStream};
use crate::error::{PeerlinkError, Result};
use crate::keypool::Credential;

use super::chunk::Chunk;

/// Open the candidate's stream and wait for its first output chunk.
///
/// Leading chunks without output (empty deltas) are skipped. A stream that
/// ends before producing output is an [`PeerlinkError::EmptyResponse`].
pub(crate) async fn first_output(
    engines: &EngineSet,
    request: &EngineRequest,
    credential: &Credential,
) -> Result<(Chunk, EngineStream)> {
    let engine = engines.resolve(request.provider, credential)?;
    let mut stream = engine.open(request, credential).await?;

    while let Some(item) = stream.next().await {
        let chunk = item?;
        if chunk.is_output() {
            return Ok((chunk, stream));
        }
    }
    Err(PeerlinkError::EmptyResponse(request.provider))
}
