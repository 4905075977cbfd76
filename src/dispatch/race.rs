//! Concurrent provider racing.
//!
//! Every candidate in the roster is dispatched at once. The first one to
//! produce an output chunk is committed as the winner through a one-shot
//! slot; its output is forwarded as it arrives and every other candidate is
//! cancelled.
//!
//! ```text
//!            ┌─ gemini ──── first chunk ──┐
//! request ───┼─ groq ─────── (hangs) ─────┼──► commit ──► forward winner
//!            └─ openrouter ─ 503 ─ report ┘        │
//!                                                  └──► cancel the rest
//! ```
//!
//! Losers cancelled by the race are never reported to the key pool; only
//! failures observed before a commit count against a credential.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_stream::stream;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Span};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::{EngineRequest, EngineSet, EngineStream};
use crate::error::{PeerlinkError, Result};
use crate::keypool::{Credential, KeyPool};
use crate::models::Candidate;

use super::attempt::first_output;
use super::chunk::{Chunk, ChunkStream, Exhaustion};
use super::request::GenerationRequest;

/// Races one request across a fixed roster of candidates.
pub struct ProviderRaceDispatcher {
    pool: Arc<KeyPool>,
    engines: Arc<EngineSet>,
    roster: Vec<Candidate>,
    timeout: Duration,
}

impl ProviderRaceDispatcher {
    /// Create a dispatcher over `roster` with a global first-chunk deadline
    pub fn new(
        pool: Arc<KeyPool>,
        engines: Arc<EngineSet>,
        roster: Vec<Candidate>,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            engines,
            roster,
            timeout,
        }
    }

    /// Create from the `[race]` config section
    pub fn from_config(
        config: &Config,
        pool: Arc<KeyPool>,
        engines: Arc<EngineSet>,
    ) -> Result<Self> {
        Ok(Self::new(
            pool,
            engines,
            config.race.candidates()?,
            config.race.timeout(),
        ))
    }

    /// Candidates raced on every call
    pub fn roster(&self) -> &[Candidate] {
        &self.roster
    }

    /// Race `request` across the roster.
    ///
    /// The returned stream drives the race; dropping it early cancels every
    /// in-flight candidate. When nothing wins, the stream yields a single
    /// [`Chunk::exhausted`] with [`Exhaustion::Timeout`] or
    /// [`Exhaustion::AllEnginesFailed`].
    pub fn race(&self, request: GenerationRequest) -> ChunkStream {
        let pool = Arc::clone(&self.pool);
        let engines = Arc::clone(&self.engines);
        let roster = self.roster.clone();
        let timeout = self.timeout;
        let span = info_span!("race", id = %Uuid::new_v4(), candidates = roster.len());

        Box::pin(stream! {
            let cancel = CancellationToken::new();
            let _cancel_on_drop = cancel.clone().drop_guard();
            let deadline = Instant::now() + timeout;

            let (slot, mut winner_rx) = WinnerSlot::new();
            let slot = Arc::new(slot);
            let request = Arc::new(request);

            let mut attempts: FuturesUnordered<_> = roster
                .into_iter()
                .map(|candidate| {
                    run_candidate(Attempt {
                        candidate,
                        request: Arc::clone(&request),
                        pool: Arc::clone(&pool),
                        engines: Arc::clone(&engines),
                        cancel: cancel.clone(),
                        slot: Arc::clone(&slot),
                        span: span.clone(),
                    })
                })
                .collect();

            let outcome = if attempts.is_empty() {
                RaceOutcome::AllFailed
            } else {
                loop {
                    tokio::select! {
                        biased;
                        winner = &mut winner_rx => match winner {
                            Ok(winner) => break RaceOutcome::Won(winner),
                            Err(_) => break RaceOutcome::AllFailed,
                        },
                        Some(end) = attempts.next(), if !attempts.is_empty() => {
                            debug!(parent: &span, ?end, remaining = attempts.len(), "candidate settled");
                            if attempts.is_empty() && !slot.is_committed() {
                                break RaceOutcome::AllFailed;
                            }
                        },
                        () = tokio::time::sleep_until(deadline) => break RaceOutcome::Timeout,
                    }
                }
            };

            cancel.cancel();
            drop(attempts);

            match outcome {
                RaceOutcome::Won(Winner { candidate, credential, first, mut rest }) => {
                    info!(parent: &span, winner = %candidate, "race won");
                    yield first;
                    let mut clean = true;
                    while let Some(item) = rest.next().await {
                        match item {
                            Ok(chunk) => yield chunk,
                            Err(error) => {
                                warn!(parent: &span, winner = %candidate, "winner stream failed: {}", error);
                                pool.report_failure(candidate.provider, &credential, &error);
                                clean = false;
                                break;
                            },
                        }
                    }
                    if clean {
                        pool.report_success(candidate.provider, &credential);
                    }
                },
                RaceOutcome::Timeout => {
                    warn!(parent: &span, timeout_ms = timeout.as_millis() as u64, "no candidate produced output in time");
                    yield Chunk::exhausted(Exhaustion::Timeout);
                },
                RaceOutcome::AllFailed => {
                    warn!(parent: &span, "every candidate failed");
                    yield Chunk::exhausted(Exhaustion::AllEnginesFailed);
                },
            }
        })
    }
}

/// The committed candidate and the rest of its stream.
struct Winner {
    candidate: Candidate,
    credential: Credential,
    first: Chunk,
    rest: EngineStream,
}

enum RaceOutcome {
    Won(Winner),
    Timeout,
    AllFailed,
}

/// Single-assignment winner cell. The first `commit` takes the sender;
/// every later one gets its winner handed back.
struct WinnerSlot {
    tx: Mutex<Option<oneshot::Sender<Winner>>>,
}

impl WinnerSlot {
    fn new() -> (Self, oneshot::Receiver<Winner>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    fn commit(&self, winner: Winner) -> std::result::Result<(), Winner> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => tx.send(winner),
            None => Err(winner),
        }
    }

    fn is_committed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// How a candidate's future ended.
#[derive(Debug)]
enum CandidateEnd {
    /// Produced the first output and was committed
    Committed,
    /// Produced output after another candidate had already won
    Lost,
    /// Aborted by the race's own cancellation
    Cancelled,
    /// No credential available
    Skipped,
    /// Failed on its own; reported to the pool
    Failed,
}

struct Attempt {
    candidate: Candidate,
    request: Arc<GenerationRequest>,
    pool: Arc<KeyPool>,
    engines: Arc<EngineSet>,
    cancel: CancellationToken,
    slot: Arc<WinnerSlot>,
    span: Span,
}

async fn run_candidate(attempt: Attempt) -> CandidateEnd {
    let Attempt {
        candidate,
        request,
        pool,
        engines,
        cancel,
        slot,
        span,
    } = attempt;

    let Some(credential) = pool.acquire(candidate.provider) else {
        debug!(parent: &span, candidate = %candidate, "no credential, candidate sits out");
        return CandidateEnd::Skipped;
    };

    let engine_request = EngineRequest::new(&candidate, &request, request.context.clone());
    let outcome = tokio::select! {
        () = cancel.cancelled() => Err(PeerlinkError::Cancelled),
        outcome = first_output(&engines, &engine_request, &credential) => outcome,
    };

    match outcome {
        Ok((first, rest)) => {
            let winner = Winner {
                candidate,
                credential,
                first,
                rest,
            };
            match slot.commit(winner) {
                Ok(()) => CandidateEnd::Committed,
                Err(late) => {
                    debug!(parent: &span, candidate = %late.candidate, "output arrived after commit");
                    CandidateEnd::Lost
                },
            }
        },
        Err(error) if error.is_cancelled() || cancel.is_cancelled() || slot.is_committed() => {
            debug!(parent: &span, candidate = %candidate, "candidate cancelled");
            CandidateEnd::Cancelled
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
            CandidateEnd::Failed
        },
    }
}
