// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end orchestration scenarios driven through the ContextPool with
//! scripted providers — no sockets, no LLMs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use svea_cache::{Fingerprint, ReloadCache};
use svea_config::Config;
use svea_core::{
    AgentLimiter, BroadcastCenter, ContextPool, ContextPoolOptions, CoreError, Task,
};
use svea_model::{
    EchoProvider, Provider, ProviderEvent, ProviderFactory, ScriptedProvider, WarmPool,
};
use svea_proto::{DesktopAction, ServerEvent, WindowBounds, WindowContent};
use svea_session::SessionLogger;
use tokio::sync::mpsc;

// ── Test scaffolding ──────────────────────────────────────────────────────────

/// Hands out pre-built providers in order; echoes once the list runs dry.
struct QueueFactory {
    providers: Mutex<VecDeque<Arc<dyn Provider>>>,
}

impl QueueFactory {
    fn new(providers: Vec<Arc<dyn Provider>>) -> Arc<Self> {
        Arc::new(Self {
            providers: Mutex::new(providers.into()),
        })
    }
}

#[async_trait::async_trait]
impl ProviderFactory for QueueFactory {
    async fn build(&self) -> anyhow::Result<Arc<dyn Provider>> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Arc::new(EchoProvider)))
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

struct Harness {
    pool: Arc<ContextPool>,
    limiter: Arc<AgentLimiter>,
    events: mpsc::Receiver<ServerEvent>,
}

fn harness(
    config: Config,
    providers: Vec<Arc<dyn Provider>>,
    cache: Option<Arc<ReloadCache>>,
) -> Harness {
    let broadcast = BroadcastCenter::new();
    let (sink, events) = mpsc::channel(1024);
    broadcast.subscribe("conn1", Arc::new(sink));
    let limiter = AgentLimiter::new(config.orchestrator.max_agents);
    // Warm size 0: every take() builds cold, popping the scripted list in a
    // deterministic order.
    let warm_pool = WarmPool::new(QueueFactory::new(providers), 0);

    let pool = ContextPool::new(ContextPoolOptions {
        connection_id: "conn1".into(),
        config,
        broadcast,
        limiter: Arc::clone(&limiter),
        warm_pool,
        provider_name: "scripted".into(),
        cache,
        logger: Arc::new(SessionLogger::disabled()),
    });
    Harness { pool, limiter, events }
}

async fn wait_until(cond: impl Fn() -> bool, what: &str) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting until {what}"));
}

async fn wait_for(
    events: &mut mpsc::Receiver<ServerEvent>,
    what: &str,
    pred: impl Fn(&ServerEvent) -> bool,
) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let ev = events.recv().await.expect("event stream closed");
            if pred(&ev) {
                return ev;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

fn final_response(ev: &ServerEvent) -> Option<(String, String)> {
    match ev {
        ServerEvent::AgentResponse {
            agent_id,
            content,
            is_complete: Some(true),
        } => Some((agent_id.clone(), content.clone().unwrap_or_default())),
        _ => None,
    }
}

fn create_window(id: &str) -> DesktopAction {
    DesktopAction::WindowCreate {
        window_id: id.into(),
        title: format!("window {id}"),
        bounds: WindowBounds { x: 0.0, y: 0.0, w: 640.0, h: 480.0 },
        content: WindowContent::text("markdown", ""),
    }
}

fn slow_chunks(chunks: Vec<&str>, delay_ms: u64) -> ScriptedProvider {
    ScriptedProvider::text_chunks(chunks).with_delay(Duration::from_millis(delay_ms))
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn user_message_round_trip() {
    let mut h = harness(
        Config::default(),
        vec![Arc::new(ScriptedProvider::always_text("hello there"))],
        None,
    );
    h.pool.create_monitor_agent("m0").await.unwrap();
    h.pool
        .handle_task(Task::main("msg-1", "m0", "hi"))
        .await
        .unwrap();

    wait_for(&mut h.events, "MESSAGE_ACCEPTED", |ev| {
        matches!(ev, ServerEvent::MessageAccepted { message_id, .. } if message_id == "msg-1")
    })
    .await;
    let ev = wait_for(&mut h.events, "final response", |ev| final_response(ev).is_some()).await;
    let (agent, text) = final_response(&ev).unwrap();
    assert_eq!(agent, "main-m0");
    assert_eq!(text, "hello there");
    assert_eq!(h.pool.stats().tape_messages, 2);
}

/// Scenario 1: tasks on one window run strictly sequentially in arrival
/// order, with queue positions reported while earlier work is in flight.
#[tokio::test]
async fn sequential_per_window() {
    let window_provider: Arc<dyn Provider> = Arc::new(
        ScriptedProvider::new(vec![
            vec![
                ProviderEvent::Assistant { text: "r1".into() },
                ProviderEvent::Done,
            ],
            vec![
                ProviderEvent::Assistant { text: "r2".into() },
                ProviderEvent::Done,
            ],
            vec![
                ProviderEvent::Assistant { text: "r3".into() },
                ProviderEvent::Done,
            ],
        ])
        .with_delay(Duration::from_millis(25)),
    );
    let mut h = harness(Config::default(), vec![window_provider], None);

    h.pool.emitter().emit_as("system", vec![create_window("w1")]);

    for (msg, text) in [("t1", "first"), ("t2", "second"), ("t3", "third")] {
        h.pool
            .handle_task(Task::window(msg, "w1", text))
            .await
            .unwrap();
    }

    wait_for(&mut h.events, "t1 accepted", |ev| {
        matches!(ev, ServerEvent::MessageAccepted { message_id, .. } if message_id == "t1")
    })
    .await;
    let ev = wait_for(&mut h.events, "t2 queued", |ev| {
        matches!(ev, ServerEvent::MessageQueued { message_id, .. } if message_id == "t2")
    })
    .await;
    assert!(matches!(ev, ServerEvent::MessageQueued { position: 1, .. }));
    let ev = wait_for(&mut h.events, "t3 queued", |ev| {
        matches!(ev, ServerEvent::MessageQueued { message_id, .. } if message_id == "t3")
    })
    .await;
    assert!(matches!(ev, ServerEvent::MessageQueued { position: 2, .. }));

    // Replies arrive in exactly the order the tasks were enqueued.
    let mut replies = Vec::new();
    while replies.len() < 3 {
        let ev = wait_for(&mut h.events, "window reply", |ev| final_response(ev).is_some()).await;
        let (agent, text) = final_response(&ev).unwrap();
        assert_eq!(agent, "window-w1");
        replies.push(text);
    }
    assert_eq!(replies, ["r1", "r2", "r3"]);
}

/// Scenario 2: main-queue overflow rejects the excess task immediately and
/// every accepted task is still handled.
#[tokio::test]
async fn main_queue_overflow() {
    let mut config = Config::default();
    config.orchestrator.main_queue_cap = 3;
    config.orchestrator.monitor_budget = 1;

    let main_provider: Arc<dyn Provider> = Arc::new(
        ScriptedProvider::new(vec![
            vec![
                ProviderEvent::Assistant { text: "slow done".into() },
                ProviderEvent::Done,
            ],
            vec![ProviderEvent::Assistant { text: "q1".into() }, ProviderEvent::Done],
            vec![ProviderEvent::Assistant { text: "q2".into() }, ProviderEvent::Done],
            vec![ProviderEvent::Assistant { text: "q3".into() }, ProviderEvent::Done],
        ])
        .with_delay(Duration::from_millis(20)),
    );
    let mut h = harness(config, vec![main_provider], None);
    h.pool.create_monitor_agent("m0").await.unwrap();

    h.pool
        .handle_task(Task::main("t0", "m0", "slow turn"))
        .await
        .unwrap();
    // Once accepted, the turn is in flight and the queue is empty again.
    wait_for(&mut h.events, "t0 accepted", |ev| {
        matches!(ev, ServerEvent::MessageAccepted { message_id, .. } if message_id == "t0")
    })
    .await;

    // Four rapid sends: three fit the queue, the fourth is rejected.
    let mut outcomes = Vec::new();
    for msg in ["t1", "t2", "t3", "t4"] {
        outcomes.push(h.pool.handle_task(Task::main(msg, "m0", "queued")).await);
    }
    let rejected = outcomes
        .iter()
        .filter(|r| matches!(r, Err(CoreError::QueueFull)))
        .count();
    assert_eq!(rejected, 1, "exactly one overflow rejection");

    // All four surviving tasks are handled to completion.
    for _ in 0..4 {
        wait_for(&mut h.events, "completion", |ev| final_response(ev).is_some()).await;
    }
    assert_eq!(h.pool.stats().main_queues.get("m0"), Some(&0));
}

/// Scenario 3: interrupt mid-stream discards the partial turn and leaves
/// the session usable.
#[tokio::test]
async fn interrupt_mid_stream() {
    let main_provider: Arc<dyn Provider> = Arc::new(
        ScriptedProvider::new(vec![
            (0..10)
                .map(|i| ProviderEvent::Assistant { text: format!("chunk{i} ") })
                .chain([ProviderEvent::Done])
                .collect(),
            vec![
                ProviderEvent::Assistant { text: "recovered".into() },
                ProviderEvent::Done,
            ],
        ])
        .with_delay(Duration::from_millis(20)),
    );
    let mut h = harness(Config::default(), vec![main_provider], None);
    h.pool.create_monitor_agent("m0").await.unwrap();
    h.pool
        .handle_task(Task::main("t0", "m0", "stream a lot"))
        .await
        .unwrap();

    // Let a few chunks through, then cut it off.
    for _ in 0..3 {
        wait_for(&mut h.events, "chunk", |ev| {
            matches!(ev, ServerEvent::AgentResponse { is_complete: Some(false), .. })
        })
        .await;
    }
    h.pool.interrupt_all().await;

    // The session returns to idle promptly and nothing but the user
    // message reached the tape.
    tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            if h.pool.stats().agents.busy == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session must be idle within 200ms of the interrupt");
    assert_eq!(h.pool.stats().tape_messages, 1);

    // A follow-up message is handled normally.
    h.pool
        .handle_task(Task::main("t1", "m0", "try again"))
        .await
        .unwrap();
    let ev = wait_for(&mut h.events, "recovery", |ev| final_response(ev).is_some()).await;
    assert_eq!(final_response(&ev).unwrap().1, "recovered");
    assert_eq!(h.pool.stats().tape_messages, 3);
}

/// An exact cache hit replays the recorded actions without a provider call.
#[tokio::test]
async fn reload_exact_replay() {
    let cache = Arc::new(ReloadCache::in_memory(0.6, 3));
    let scripted = Arc::new(ScriptedProvider::new(vec![vec![
        ProviderEvent::ToolUse {
            id: "c1".into(),
            name: "window_update".into(),
            input: serde_json::json!({}),
        },
        ProviderEvent::ToolResult {
            id: "c1".into(),
            name: "window_update".into(),
            content: "ok".into(),
            actions: vec![DesktopAction::WindowSetTitle {
                window_id: "w1".into(),
                title: "Renamed".into(),
            }],
            is_error: false,
        },
        ProviderEvent::Assistant { text: "renamed".into() },
        ProviderEvent::Done,
    ]]));
    let prompts = Arc::clone(&scripted.prompts);
    let provider: Arc<dyn Provider> = scripted;
    let mut h = harness(Config::default(), vec![provider], Some(Arc::clone(&cache)));

    h.pool.emitter().emit_as("system", vec![create_window("w1")]);
    h.pool.create_monitor_agent("m0").await.unwrap();

    h.pool
        .handle_task(Task::main("t0", "m0", "rename the window"))
        .await
        .unwrap();
    let ev = wait_for(&mut h.events, "first completion", |ev| final_response(ev).is_some()).await;
    assert_eq!(final_response(&ev).unwrap().1, "renamed");
    // Recording happens just after the completion event; wait for it.
    wait_until(|| cache.len() == 1, "cache entry recorded").await;

    // Identical request against the unchanged desktop: replayed, no
    // provider call.
    h.pool
        .handle_task(Task::main("t1", "m0", "rename the window"))
        .await
        .unwrap();
    let ev = wait_for(&mut h.events, "replay notice", |ev| final_response(ev).is_some()).await;
    assert!(final_response(&ev).unwrap().1.contains("replayed"));
    assert_eq!(prompts.lock().unwrap().len(), 1, "the LLM must not be called");

    let fp = Fingerprint::compute(
        "main",
        None,
        "rename the window",
        &h.pool.registry().renderer_pairs(),
    );
    let entry = cache.lookup(&fp).exact.expect("entry still exact");
    assert_eq!(entry.use_count, 1);
}

/// Scenario 4: an exact hit whose required window is gone is marked failed
/// and the request falls through to the provider.
#[tokio::test]
async fn reload_refused_when_required_window_missing() {
    let cache = Arc::new(ReloadCache::in_memory(0.6, 3));
    let scripted = Arc::new(ScriptedProvider::new(vec![
        vec![
            ProviderEvent::ToolUse {
                id: "c1".into(),
                name: "window_create".into(),
                input: serde_json::json!({}),
            },
            ProviderEvent::ToolResult {
                id: "c1".into(),
                name: "window_create".into(),
                content: "ok".into(),
                actions: vec![create_window("w1"), create_window("w2")],
                is_error: false,
            },
            ProviderEvent::Assistant { text: "opened".into() },
            ProviderEvent::Done,
        ],
        vec![
            ProviderEvent::Assistant { text: "fresh".into() },
            ProviderEvent::Done,
        ],
    ]));
    let prompts = Arc::clone(&scripted.prompts);
    let provider: Arc<dyn Provider> = scripted;
    let mut h = harness(Config::default(), vec![provider], Some(Arc::clone(&cache)));
    h.pool.create_monitor_agent("m0").await.unwrap();

    h.pool
        .handle_task(Task::main("t0", "m0", "open notes app"))
        .await
        .unwrap();
    let ev = wait_for(&mut h.events, "first completion", |ev| final_response(ev).is_some()).await;
    assert_eq!(final_response(&ev).unwrap().1, "opened");
    assert_eq!(h.pool.stats().windows, 2);
    wait_until(|| cache.len() == 1, "cache entry recorded").await;

    // Empty the desktop again, as the recording's fingerprint saw it.
    h.pool.emitter().emit_as(
        "system",
        vec![
            DesktopAction::WindowClose { window_id: "w1".into() },
            DesktopAction::WindowClose { window_id: "w2".into() },
        ],
    );
    assert_eq!(h.pool.stats().windows, 0);

    h.pool
        .handle_task(Task::main("t1", "m0", "open notes app"))
        .await
        .unwrap();

    // A toast explains the refusal, then the provider answers normally.
    wait_for(&mut h.events, "invalidation toast", |ev| {
        matches!(ev, ServerEvent::Actions { actions }
            if actions.iter().any(|a| a.kind() == "toast.show"))
    })
    .await;
    let ev = wait_for(&mut h.events, "fresh completion", |ev| final_response(ev).is_some()).await;
    assert_eq!(final_response(&ev).unwrap().1, "fresh");
    assert_eq!(prompts.lock().unwrap().len(), 2, "the LLM runs this time");

    let fp = Fingerprint::compute("main", None, "open notes app", &[]);
    let entry = cache.lookup(&fp).exact.expect("entry still present");
    assert_eq!(entry.fail_count, 1);
    assert_eq!(entry.use_count, 0, "no replay happened");
}

/// Scenario 5: closing a window cascades — queued task dropped with a
/// notice, in-flight turn interrupted, agent disposed, slot returned.
#[tokio::test]
async fn window_close_cascades() {
    let window_provider: Arc<dyn Provider> =
        Arc::new(slow_chunks(vec!["a", "b", "c", "d", "e"], 30));
    let mut h = harness(Config::default(), vec![window_provider], None);
    let free_before = h.limiter.available();

    h.pool.emitter().emit_as("system", vec![create_window("w1")]);
    h.pool
        .handle_task(Task::window("t1", "w1", "slow work"))
        .await
        .unwrap();
    h.pool
        .handle_task(Task::window("t2", "w1", "never runs"))
        .await
        .unwrap();
    assert_eq!(h.limiter.available(), free_before - 1);

    // Give the in-flight turn a moment to start, then close the window.
    wait_for(&mut h.events, "first chunk", |ev| {
        matches!(ev, ServerEvent::AgentResponse { is_complete: Some(false), .. })
    })
    .await;
    h.pool.emitter().emit_as(
        "system",
        vec![DesktopAction::WindowClose { window_id: "w1".into() }],
    );

    wait_for(&mut h.events, "cancellation notice", |ev| {
        matches!(ev, ServerEvent::Error { error } if error.contains("t2") && error.contains("cancelled"))
    })
    .await;
    wait_for(&mut h.events, "agent destroyed", |ev| {
        matches!(
            ev,
            ServerEvent::WindowAgentStatus {
                status: svea_proto::WindowAgentState::Destroyed,
                ..
            }
        )
    })
    .await;

    // The limiter slot comes back and the mapping is gone.
    tokio::time::timeout(Duration::from_millis(500), async {
        while h.limiter.available() != free_before {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("limiter slot must return after the cascade");
    assert_eq!(h.pool.stats().window_agents, 0);
    assert_eq!(h.pool.stats().windows, 0);
}

/// Scenario 6: a slow monitor does not serialize the others.
#[tokio::test]
async fn monitor_isolation() {
    let mut config = Config::default();
    config.orchestrator.monitor_budget = 1;

    let slow: Arc<dyn Provider> = Arc::new(
        ScriptedProvider::new(vec![
            vec![ProviderEvent::Assistant { text: "m1 first".into() }, ProviderEvent::Done],
            vec![ProviderEvent::Assistant { text: "m1 second".into() }, ProviderEvent::Done],
        ])
        .with_delay(Duration::from_millis(60)),
    );
    let fast: Arc<dyn Provider> = Arc::new(ScriptedProvider::new(vec![
        vec![ProviderEvent::Assistant { text: "m2 first".into() }, ProviderEvent::Done],
        vec![ProviderEvent::Assistant { text: "m2 second".into() }, ProviderEvent::Done],
    ]));
    let mut h = harness(config, vec![slow, fast], None);
    h.pool.create_monitor_agent("m1").await.unwrap();
    h.pool.create_monitor_agent("m2").await.unwrap();

    for (msg, monitor) in [("a1", "m1"), ("a2", "m1"), ("b1", "m2"), ("b2", "m2")] {
        h.pool
            .handle_task(Task::main(msg, monitor, "work"))
            .await
            .unwrap();
    }

    let mut order = Vec::new();
    while order.len() < 4 {
        let ev = wait_for(&mut h.events, "completion", |ev| final_response(ev).is_some()).await;
        order.push(final_response(&ev).unwrap().0);
    }
    // The fast monitor finished both its tasks before the slow one's first
    // completion: wall-clock is max(m1, m2), not the sum.
    assert_eq!(order[0], "main-m2");
    assert_eq!(order[1], "main-m2");
    assert!(order[2..].iter().all(|a| a == "main-m1"));
}

/// Invariant 5: after reset only the per-monitor main agents survive and
/// every structure is empty.
#[tokio::test]
async fn reset_restores_clean_state() {
    let mut h = harness(Config::default(), vec![], None);
    h.pool.create_monitor_agent("m0").await.unwrap();
    h.pool.create_monitor_agent("m1").await.unwrap();

    // Dirty every structure: a window with an agent, tape content, a
    // queued interaction.
    h.pool.emitter().emit_as("system", vec![create_window("w1")]);
    h.pool
        .handle_task(Task::window("t1", "w1", "touch window"))
        .await
        .unwrap();
    h.pool
        .handle_task(Task::main("t2", "m0", "hello"))
        .await
        .unwrap();
    wait_for(&mut h.events, "main completion", |ev| {
        matches!(ev, ServerEvent::AgentResponse { agent_id, is_complete: Some(true), .. } if agent_id == "main-m0")
    })
    .await;
    h.pool.push_user_interactions(vec![svea_proto::UserInteraction::Click {
        x: 1.0,
        y: 2.0,
        window_id: None,
        timestamp: chrono::Utc::now(),
    }]);

    h.pool.reset().await.unwrap();

    let stats = h.pool.stats();
    assert_eq!(h.pool.session_count(), 2, "one main agent per monitor");
    assert_eq!(stats.agents.main, 2);
    assert_eq!(stats.agents.window, 0);
    assert_eq!(stats.agents.ephemeral, 0);
    assert_eq!(stats.windows, 0);
    assert_eq!(stats.window_agents, 0);
    assert_eq!(stats.tape_messages, 0);
    assert_eq!(stats.timeline_entries, 0);
    assert!(stats.main_queues.values().all(|n| *n == 0));
    assert_eq!(
        h.limiter.in_flight(),
        2,
        "exactly the two main agents hold limiter slots"
    );

    // The pool keeps working after the reset.
    h.pool
        .handle_task(Task::main("t3", "m0", "post-reset"))
        .await
        .unwrap();
    wait_for(&mut h.events, "post-reset completion", |ev| final_response(ev).is_some()).await;
}

/// DIALOG_FEEDBACK resolves dialogs parked by dialog.confirm actions.
#[tokio::test]
async fn dialog_feedback_resolves_pending() {
    let h = harness(Config::default(), vec![], None);
    h.pool.emitter().emit_as(
        "system",
        vec![DesktopAction::DialogConfirm {
            dialog_id: "d1".into(),
            title: "Delete?".into(),
            message: "Really delete the file?".into(),
        }],
    );
    // The signal loop parks the dialog asynchronously.
    tokio::time::timeout(Duration::from_millis(500), async {
        while h.pool.pending_dialog_count() != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("dialog must be parked");

    assert!(h.pool.resolve_dialog("d1", true, None));
    assert!(!h.pool.resolve_dialog("d1", true, None), "second resolve is unknown");
    assert_eq!(h.pool.pending_dialog_count(), 0);
}
