//! End-to-end tests for sequential failover.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{text_of, Script, ScriptedEngine};
use futures::StreamExt;
use peerlink::dispatch::{Chunk, Exhaustion, StreamStatus, Turn};
use peerlink::keypool::{CooldownPolicy, Credential, KeyPool, KeyStatus};
use peerlink::models::{Candidate, ModelCard, ModelRegistry, Provider};
use peerlink::tokenizer::TURN_OVERHEAD_TOKENS;
use peerlink::{EngineSet, GenerationRequest, SequentialFailoverDispatcher};

fn key_of(provider: Provider) -> Credential {
    Credential::key(format!("{}-key", provider.id()))
}

fn pool_for(providers: &[Provider]) -> Arc<KeyPool> {
    let pool = KeyPool::new(CooldownPolicy::default());
    for provider in providers {
        pool.insert(*provider, vec![key_of(*provider)]);
    }
    Arc::new(pool)
}

fn reroutes(chunks: &[Chunk]) -> Vec<(Candidate, Candidate)> {
    chunks
        .iter()
        .filter_map(|c| match &c.status {
            Some(StreamStatus::Rerouting { failed, next }) => Some((failed.clone(), next.clone())),
            _ => None,
        })
        .collect()
}

fn exhausted(chunks: &[Chunk]) -> Option<Exhaustion> {
    chunks.iter().find_map(|c| match &c.status {
        Some(StreamStatus::Exhausted { reason }) => Some(*reason),
        _ => None,
    })
}

/// Test two failures then a success: two reroutes, both failures cooled down
#[tokio::test(start_paused = true)]
async fn test_reroutes_until_success() {
    let a = Candidate::new(Provider::Gemini, "gemini-2.0-flash");
    let b = Candidate::new(Provider::Groq, "llama-3.3-70b-versatile");
    let c = Candidate::new(Provider::Mistral, "mistral-small-latest");

    let gemini = ScriptedEngine::new(Provider::Gemini, Script::Fail(503));
    let groq = ScriptedEngine::new(Provider::Groq, Script::Fail(429));
    let mistral = ScriptedEngine::new(
        Provider::Mistral,
        Script::Respond(Duration::from_millis(20), vec!["the ", "answer"]),
    );

    let pool = pool_for(&[Provider::Gemini, Provider::Groq, Provider::Mistral]);
    let engines = EngineSet::new()
        .with_engine(Provider::Gemini, gemini.clone())
        .with_engine(Provider::Groq, groq.clone())
        .with_engine(Provider::Mistral, mistral.clone());

    let dispatcher = SequentialFailoverDispatcher::new(Arc::clone(&pool), Arc::new(engines))
        .with_fallbacks(vec![c.clone()]);

    let chunks: Vec<Chunk> = dispatcher
        .execute(GenerationRequest::new("question"), &[a.clone(), b.clone()])
        .collect()
        .await;

    assert_eq!(reroutes(&chunks), vec![(a, b.clone()), (b, c)]);
    assert_eq!(text_of(&chunks), "the answer");
    assert!(exhausted(&chunks).is_none());

    // Status chunks precede the output
    assert!(chunks[0].status.is_some());
    assert!(chunks[1].status.is_some());
    assert_eq!(chunks[2].text.as_deref(), Some("the "));

    for provider in [Provider::Gemini, Provider::Groq] {
        let entry = pool.entry(provider, &key_of(provider)).unwrap();
        assert_eq!(entry.failure_count, 1, "{provider}");
        assert_eq!(entry.status, KeyStatus::Cooldown, "{provider}");
    }
    assert_eq!(
        pool.entry(Provider::Mistral, &key_of(Provider::Mistral)).unwrap().status,
        KeyStatus::Active
    );

    // The exchange lands in history
    let history = dispatcher.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "question");
    assert_eq!(history[1].content, "the answer");
}

/// Test an empty pool sends nothing and asks for credentials
#[tokio::test(start_paused = true)]
async fn test_no_credentials() {
    let gemini = ScriptedEngine::new(Provider::Gemini, Script::Respond(Duration::ZERO, vec!["x"]));
    let engines = EngineSet::new().with_engine(Provider::Gemini, gemini.clone());

    let dispatcher =
        SequentialFailoverDispatcher::new(Arc::new(KeyPool::default()), Arc::new(engines))
            .with_fallbacks(vec![Candidate::new(Provider::Gemini, "gemini-2.0-flash")]);

    let chunks: Vec<Chunk> = dispatcher
        .execute(GenerationRequest::new("hello"), &[])
        .collect()
        .await;

    assert_eq!(chunks.len(), 1);
    assert_eq!(exhausted(&chunks), Some(Exhaustion::NoCredentials));
    assert_eq!(gemini.calls(), 0);
    assert!(dispatcher.history().is_empty());
}

/// Test attempted failures end with all-candidates-failed, not no-credentials
#[tokio::test(start_paused = true)]
async fn test_all_candidates_failed() {
    let groq = ScriptedEngine::new(Provider::Groq, Script::Fail(500));
    let engines = EngineSet::new().with_engine(Provider::Groq, groq.clone());

    let dispatcher = SequentialFailoverDispatcher::new(pool_for(&[Provider::Groq]), Arc::new(engines));
    let chunks: Vec<Chunk> = dispatcher
        .execute(
            GenerationRequest::new("hello"),
            &[
                Candidate::new(Provider::Groq, "llama-3.1-8b-instant"),
                // No credential, silently skipped
                Candidate::new(Provider::DeepSeek, "deepseek-chat"),
            ],
        )
        .collect()
        .await;

    assert_eq!(groq.calls(), 1);
    assert!(reroutes(&chunks).is_empty());
    assert_eq!(exhausted(&chunks), Some(Exhaustion::AllCandidatesFailed));
    assert_ne!(
        Exhaustion::AllCandidatesFailed.message(),
        Exhaustion::NoCredentials.message()
    );
}

/// Test a candidate that never answers is abandoned after the first-chunk deadline
#[tokio::test(start_paused = true)]
async fn test_first_chunk_timeout_fails_over() {
    let slow = Candidate::new(Provider::Groq, "llama-3.1-8b-instant");
    let fast = Candidate::new(Provider::Gemini, "gemini-2.0-flash");

    let groq = ScriptedEngine::new(Provider::Groq, Script::Hang);
    let gemini = ScriptedEngine::new(
        Provider::Gemini,
        Script::Respond(Duration::from_millis(10), vec!["ok"]),
    );
    let pool = pool_for(&[Provider::Groq, Provider::Gemini]);
    let engines = EngineSet::new()
        .with_engine(Provider::Groq, groq.clone())
        .with_engine(Provider::Gemini, gemini.clone());

    let dispatcher = SequentialFailoverDispatcher::new(Arc::clone(&pool), Arc::new(engines))
        .with_first_chunk_timeout(Duration::from_secs(2));

    let start = tokio::time::Instant::now();
    let chunks: Vec<Chunk> = dispatcher
        .execute(GenerationRequest::new("hi"), &[slow.clone(), fast.clone()])
        .collect()
        .await;

    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(groq.was_dropped());
    assert_eq!(reroutes(&chunks), vec![(slow, fast)]);
    assert_eq!(text_of(&chunks), "ok");
    assert_eq!(
        pool.entry(Provider::Groq, &key_of(Provider::Groq)).unwrap().failure_count,
        1
    );
}

/// Test a cooled-down credential is skipped, then healed once the cooldown elapses
#[tokio::test(start_paused = true)]
async fn test_cooldown_heals_after_elapsing() {
    let primary = Candidate::new(Provider::Groq, "llama-3.1-8b-instant");
    let fallback = Candidate::new(Provider::Gemini, "gemini-2.0-flash");

    let groq = ScriptedEngine::new(Provider::Groq, Script::Fail(503));
    let gemini = ScriptedEngine::new(Provider::Gemini, Script::Respond(Duration::ZERO, vec!["ok"]));
    let pool = pool_for(&[Provider::Groq, Provider::Gemini]);
    let engines = EngineSet::new()
        .with_engine(Provider::Groq, groq.clone())
        .with_engine(Provider::Gemini, gemini.clone());
    let dispatcher = SequentialFailoverDispatcher::new(Arc::clone(&pool), Arc::new(engines))
        .with_fallbacks(vec![fallback]);

    let run = |prompt: &str| dispatcher.execute(GenerationRequest::new(prompt), &[primary.clone()]);

    let first: Vec<Chunk> = run("one").collect().await;
    assert_eq!(reroutes(&first).len(), 1);
    assert_eq!(groq.calls(), 1);

    let snapshot = pool.status_snapshot();
    let groq_status = &snapshot[&Provider::Groq];
    assert!(!groq_status.healthy);
    assert_eq!(groq_status.minutes_until_available, 1);

    // Still cooling down: skipped without a reroute notice
    tokio::time::advance(Duration::from_secs(30)).await;
    let second: Vec<Chunk> = run("two").collect().await;
    assert!(reroutes(&second).is_empty());
    assert_eq!(text_of(&second), "ok");
    assert_eq!(groq.calls(), 1);

    // Server-error cooldown is 60s
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(pool.status_snapshot()[&Provider::Groq].healthy);
    let _third: Vec<Chunk> = run("three").collect().await;
    assert_eq!(groq.calls(), 2);
    assert_eq!(
        pool.entry(Provider::Groq, &key_of(Provider::Groq)).unwrap().failure_count,
        2
    );
}

/// Test long context is trimmed to the newest turns that fit the model
#[tokio::test(start_paused = true)]
async fn test_context_trimmed_to_model_limit() {
    let model = "tiny-context-model";
    let headroom = 100;
    // 40 characters -> 10 heuristic tokens plus per-turn overhead
    let per_turn = 10 + TURN_OVERHEAD_TOKENS;

    let registry = ModelRegistry::new();
    registry.register(ModelCard::new(model, Provider::Groq, per_turn * 7 + headroom));

    let groq = ScriptedEngine::new(Provider::Groq, Script::Respond(Duration::ZERO, vec!["ok"]));
    let engines = EngineSet::new().with_engine(Provider::Groq, groq.clone());
    let dispatcher = SequentialFailoverDispatcher::new(pool_for(&[Provider::Groq]), Arc::new(engines))
        .with_registry(Arc::new(registry))
        .with_reserved_headroom(headroom);

    let context: Vec<Turn> = (0..60)
        .map(|i| {
            let content = format!("{:0>40}", i);
            if i % 2 == 0 {
                Turn::user(content)
            } else {
                Turn::assistant(content)
            }
        })
        .collect();

    let request = GenerationRequest::new("next").with_context(context);
    let _: Vec<Chunk> = dispatcher
        .execute(request, &[Candidate::new(Provider::Groq, model)])
        .collect()
        .await;

    let sent = &groq.requests()[0];
    assert_eq!(sent.context.len(), 7);
    assert_eq!(sent.context[0].content, format!("{:0>40}", 53));
    assert_eq!(sent.context[6].content, format!("{:0>40}", 59));
    assert_eq!(sent.prompt, "next");
}

/// Test stored history feeds the next request and stays bounded
#[tokio::test(start_paused = true)]
async fn test_history_carried_between_requests() {
    let groq = ScriptedEngine::new(Provider::Groq, Script::Respond(Duration::ZERO, vec!["reply"]));
    let engines = EngineSet::new().with_engine(Provider::Groq, groq.clone());
    let dispatcher = SequentialFailoverDispatcher::new(pool_for(&[Provider::Groq]), Arc::new(engines))
        .with_history_turns(4);
    let candidate = [Candidate::new(Provider::Groq, "llama-3.1-8b-instant")];

    for prompt in ["first", "second", "third"] {
        let _: Vec<Chunk> = dispatcher
            .execute(GenerationRequest::new(prompt), &candidate)
            .collect()
            .await;
    }

    let requests = groq.requests();
    assert!(requests[0].context.is_empty());
    assert_eq!(requests[1].context.len(), 2);
    assert_eq!(requests[1].context[0].content, "first");
    assert_eq!(requests[2].context.len(), 4);

    let history = dispatcher.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].content, "second");

    dispatcher.clear_history();
    assert!(dispatcher.history().is_empty());
}
