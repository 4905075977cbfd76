//! Sequential failover across a priority list.
//!
//! Candidates are tried one at a time: the requested ones first, then the
//! configured fallbacks, de-duplicated. A candidate without an eligible
//! credential is skipped without counting as an attempt. The first
//! candidate to yield output wins and is streamed through; a failing one
//! is reported to the key pool and a `Rerouting` status names the next
//! candidate before it is tried.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::{EngineRequest, EngineSet};
use crate::error::{PeerlinkError, Result};
use crate::keypool::KeyPool;
use crate::models::{Candidate, ModelRegistry};
use crate::tokenizer::TokenCounter;

use super::attempt::first_output;
use super::chunk::{Chunk, ChunkStream, Exhaustion, StreamStatus};
use super::history::{trim_context, ConversationHistory, Turn};
use super::request::GenerationRequest;

/// Default bound on stored history turns
pub const DEFAULT_HISTORY_TURNS: usize = 50;

/// Tries candidates in priority order until one produces output.
pub struct SequentialFailoverDispatcher {
    pool: Arc<KeyPool>,
    engines: Arc<EngineSet>,
    registry: Arc<ModelRegistry>,
    history: Arc<Mutex<ConversationHistory>>,
    fallbacks: Vec<Candidate>,
    reserved_headroom: usize,
    first_chunk_timeout: Duration,
}

impl SequentialFailoverDispatcher {
    /// Create a dispatcher with default history bound, no fallbacks and
    /// the default first-chunk deadline.
    pub fn new(pool: Arc<KeyPool>, engines: Arc<EngineSet>) -> Self {
        Self {
            pool,
            engines,
            registry: Arc::new(ModelRegistry::new()),
            history: Arc::new(Mutex::new(ConversationHistory::new(DEFAULT_HISTORY_TURNS))),
            fallbacks: Vec::new(),
            reserved_headroom: 1024,
            first_chunk_timeout: Duration::from_secs(30),
        }
    }

    /// Create from the `[failover]` config section
    pub fn from_config(
        config: &Config,
        pool: Arc<KeyPool>,
        engines: Arc<EngineSet>,
    ) -> Result<Self> {
        let failover = &config.failover;
        Ok(Self::new(pool, engines)
            .with_history_turns(failover.history_turns)
            .with_fallbacks(failover.fallback_candidates()?)
            .with_reserved_headroom(failover.reserved_headroom_tokens)
            .with_first_chunk_timeout(failover.first_chunk_timeout()))
    }

    /// Replace the model registry used for context limits
    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Bound stored history to `turns` (drops anything already stored)
    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history = Arc::new(Mutex::new(ConversationHistory::new(turns)));
        self
    }

    /// Fallbacks appended after the requested candidates
    pub fn with_fallbacks(mut self, fallbacks: Vec<Candidate>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Tokens kept free for the prompt and the reply
    pub fn with_reserved_headroom(mut self, tokens: usize) -> Self {
        self.reserved_headroom = tokens;
        self
    }

    /// Deadline for each attempt's first chunk
    pub fn with_first_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.first_chunk_timeout = timeout;
        self
    }

    /// Stored turns, oldest first
    pub fn history(&self) -> Vec<Turn> {
        lock(&self.history).snapshot()
    }

    /// Forget the conversation
    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }

    /// Requested candidates followed by the fallbacks, first occurrence kept.
    pub fn candidate_list(&self, priority: &[Candidate]) -> Vec<Candidate> {
        let mut list: Vec<Candidate> = Vec::with_capacity(priority.len() + self.fallbacks.len());
        for candidate in priority.iter().chain(self.fallbacks.iter()) {
            if !list.contains(candidate) {
                list.push(candidate.clone());
            }
        }
        list
    }

    /// Run `request` against `priority` and then the fallbacks.
    ///
    /// When the request carries no explicit context, the stored history is
    /// trimmed to each candidate's context limit and sent along. The
    /// completed exchange is appended to history once the winning stream
    /// ends. When nothing produces output the stream ends with
    /// [`Exhaustion::NoCredentials`] if no request was sent at all, and
    /// [`Exhaustion::AllCandidatesFailed`] otherwise.
    pub fn execute(&self, request: GenerationRequest, priority: &[Candidate]) -> ChunkStream {
        let candidates = self.candidate_list(priority);
        let pool = Arc::clone(&self.pool);
        let engines = Arc::clone(&self.engines);
        let registry = Arc::clone(&self.registry);
        let history = Arc::clone(&self.history);
        let headroom = self.reserved_headroom;
        let first_chunk_timeout = self.first_chunk_timeout;
        let source: Vec<Turn> = if request.context.is_empty() {
            lock(&history).snapshot()
        } else {
            request.context.clone()
        };
        let span = info_span!("failover", id = %Uuid::new_v4(), candidates = candidates.len());

        Box::pin(stream! {
            let mut attempted = 0usize;
            let mut last_failed: Option<Candidate> = None;

            for candidate in candidates {
                let Some(credential) = pool.acquire(candidate.provider) else {
                    debug!(parent: &span, candidate = %candidate, "no credential, skipping");
                    continue;
                };

                if let Some(failed) = last_failed.take() {
                    yield Chunk::status(StreamStatus::Rerouting {
                        failed,
                        next: candidate.clone(),
                    });
                }

                attempted += 1;
                let counter = TokenCounter::new(registry.encoding(&candidate.model));
                let context = trim_context(
                    &source,
                    registry.context_limit(&candidate.model),
                    headroom,
                    &counter,
                );
                debug!(
                    parent: &span,
                    candidate = %candidate,
                    key = %credential.label(),
                    context_turns = context.len(),
                    "attempting"
                );

                let engine_request = EngineRequest::new(&candidate, &request, context);
                let outcome = match tokio::time::timeout(
                    first_chunk_timeout,
                    first_output(&engines, &engine_request, &credential),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(PeerlinkError::Timeout(format!(
                        "no output from {} within {}ms",
                        candidate,
                        first_chunk_timeout.as_millis()
                    ))),
                };

                match outcome {
                    Ok((first, mut rest)) => {
                        info!(parent: &span, winner = %candidate, attempts = attempted, "candidate answered");
                        let mut reply = first.text.clone().unwrap_or_default();
                        yield first;

                        let mut clean = true;
                        while let Some(item) = rest.next().await {
                            match item {
                                Ok(chunk) => {
                                    if let Some(text) = &chunk.text {
                                        reply.push_str(text);
                                    }
                                    yield chunk;
                                },
                                Err(error) => {
                                    warn!(parent: &span, candidate = %candidate, "stream failed after output: {}", error);
                                    pool.report_failure(candidate.provider, &credential, &error);
                                    clean = false;
                                    break;
                                },
                            }
                        }

                        if clean {
                            pool.report_success(candidate.provider, &credential);
                        }
                        lock(&history).push_exchange(&request.prompt, &reply);
                        return;
                    },
                    Err(error) => {
                        let class = pool.report_failure(candidate.provider, &credential, &error);
                        warn!(
                            parent: &span,
                            candidate = %candidate,
                            class = class.name(),
                            "candidate failed: {}",
                            error
                        );
                        last_failed = Some(candidate);
                    },
                }
            }

            let reason = if attempted == 0 {
                Exhaustion::NoCredentials
            } else {
                Exhaustion::AllCandidatesFailed
            };
            warn!(parent: &span, attempts = attempted, %reason, "failover exhausted");
            yield Chunk::exhausted(reason);
        })
    }
}

fn lock(history: &Mutex<ConversationHistory>) -> MutexGuard<'_, ConversationHistory> {
    history.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;

    #[test]
    fn test_candidate_list_dedups_in_order() {
        let a = Candidate::new(Provider::Groq, "a");
        let b = Candidate::new(Provider::Gemini, "b");
        let c = Candidate::new(Provider::Mistral, "c");
        let dispatcher =
            SequentialFailoverDispatcher::new(Arc::new(KeyPool::default()), Arc::new(EngineSet::new()))
                .with_fallbacks(vec![b.clone(), c.clone(), a.clone()]);

        assert_eq!(dispatcher.candidate_list(&[a.clone(), b.clone()]), vec![a, b, c]);
    }
}
