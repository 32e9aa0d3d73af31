// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! WebSocket connection lifecycle: one socket ↔ one context pool.
//!
//! Outgoing events flow through a bounded mailbox whose sending half is the
//! connection's sink in the broadcast center; this loop is the single
//! writer, so per-connection delivery order is the mailbox order.  A full
//! mailbox means the browser cannot keep up and the broadcast center evicts
//! the sink — the read side then notices the closed channel and hangs up.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use svea_core::{
    ContextPool, ContextPoolOptions, CoreError, RenderFeedback, Task,
};
use svea_proto::{ClientEvent, ConnectionState, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{build_warm_pool, ServerState};

/// Outgoing mailbox depth per connection.  Deep enough to absorb an
/// actions burst; a client that falls further behind is dropped.
const SINK_CAPACITY: usize = 256;

pub(crate) async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection = %connection_id, "client connected");

    let (sink_tx, mut sink_rx) = mpsc::channel::<ServerEvent>(SINK_CAPACITY);
    state
        .broadcast
        .subscribe(&connection_id, Arc::new(sink_tx));

    let pool = ContextPool::new(ContextPoolOptions {
        connection_id: connection_id.clone(),
        config: state.config.clone(),
        broadcast: Arc::clone(&state.broadcast),
        limiter: Arc::clone(&state.limiter),
        warm_pool: Arc::clone(&state.warm_pool),
        provider_name: state.provider_name.clone(),
        cache: state.cache.clone(),
        logger: Arc::clone(&state.logger),
    });
    state.register_pool(Arc::clone(&pool));

    let session_id = state
        .logger
        .dir()
        .and_then(|d| d.file_name())
        .map(|n| n.to_string_lossy().into_owned());
    send_event(
        &mut socket,
        &ServerEvent::ConnectionStatus {
            status: ConnectionState::Connected,
            provider: Some(pool.provider_name()),
            session_id,
            error: None,
        },
    )
    .await;

    // The first connection inherits the previous session's desktop.
    if let Some(restored) = state.take_restored() {
        pool.restore(&restored);
    }

    loop {
        tokio::select! {
            // Incoming frame from the browser.
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                log_event(&event, &connection_id);
                                dispatch(&pool, &state, event).await;
                            }
                            Err(e) => {
                                warn!(connection = %connection_id, "invalid event JSON: {e}");
                                send_event(&mut socket, &ServerEvent::Error {
                                    error: format!("invalid event JSON: {e}"),
                                }).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        debug!(connection = %connection_id, "WebSocket recv error: {e}");
                        break;
                    }
                }
            }
            // Outgoing event from the orchestrator.
            event = sink_rx.recv() => {
                match event {
                    Some(ev) => {
                        if let Some(json) = encode(&ev) {
                            if socket.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    // Sink was evicted (slow consumer) — hang up.
                    None => break,
                }
            }
        }
    }

    info!(connection = %connection_id, "client disconnected");
    state.broadcast.unsubscribe(&connection_id);
    if let Some(pool) = state.remove_pool(&connection_id) {
        pool.cleanup().await;
    }
}

async fn dispatch(pool: &Arc<ContextPool>, state: &Arc<ServerState>, event: ClientEvent) {
    match event {
        ClientEvent::UserMessage { message_id, content, interactions } => {
            // Main tasks need a monitor; a client that never subscribed one
            // gets the default.
            let monitor = match pool.active_monitor() {
                Some(m) => m,
                None => {
                    let m = "0".to_string();
                    if let Err(e) = pool.create_monitor_agent(&m).await {
                        report(pool, format!("no monitor available: {e}"));
                        return;
                    }
                    m
                }
            };
            let mut task = Task::main(message_id, monitor, content);
            if let Some(interactions) = interactions {
                task = task.with_interactions(interactions);
            }
            if let Err(e) = pool.handle_task(task).await {
                report(pool, task_error(e));
            }
        }

        ClientEvent::WindowMessage { message_id, window_id, content } => {
            let task = Task::window(message_id, window_id, content);
            if let Err(e) = pool.handle_task(task).await {
                report(pool, task_error(e));
            }
        }

        ClientEvent::ComponentAction {
            window_id,
            window_title,
            action,
            action_id,
            form_data,
            component_path,
            ..
        } => {
            let task = Task::component_action(
                window_id,
                &window_title,
                &action,
                action_id.as_deref(),
                form_data.as_ref(),
                component_path.as_deref(),
            );
            if let Err(e) = pool.handle_task(task).await {
                report(pool, task_error(e));
            }
        }

        ClientEvent::DialogFeedback { dialog_id, confirmed, remember_choice } => {
            pool.resolve_dialog(&dialog_id, confirmed, remember_choice);
        }

        ClientEvent::RenderingFeedback {
            request_id,
            window_id,
            renderer,
            success,
            error,
            url,
            locked,
        } => {
            pool.resolve_render(RenderFeedback {
                request_id,
                window_id,
                renderer,
                success,
                error,
                url,
                locked,
            });
        }

        ClientEvent::Interrupt => pool.interrupt_all().await,

        ClientEvent::InterruptAgent { agent_id } => {
            if !pool.interrupt_agent(&agent_id).await {
                report(pool, format!("no agent with id {agent_id}"));
            }
        }

        ClientEvent::SetProvider { provider } => {
            let mut cfg = state.config.provider.clone();
            match provider.parse() {
                Ok(kind) => cfg.kind = kind,
                Err(_) => {
                    report(pool, format!("unknown provider: {provider}"));
                    return;
                }
            }
            match build_warm_pool(&cfg) {
                Ok((warm, name)) => pool.set_provider(warm, name),
                Err(e) => report(pool, format!("provider swap failed: {e}")),
            }
        }

        ClientEvent::SubscribeMonitor { monitor_id } => {
            if let Err(e) = pool.create_monitor_agent(&monitor_id).await {
                report(pool, format!("monitor subscribe failed: {e}"));
            }
        }

        ClientEvent::RemoveMonitor { monitor_id } => {
            pool.remove_monitor_agent(&monitor_id).await;
        }
    }
}

fn task_error(e: CoreError) -> String {
    match e {
        CoreError::QueueFull => "task queue is full, try again shortly".to_string(),
        other => other.to_string(),
    }
}

fn report(pool: &Arc<ContextPool>, error: String) {
    warn!(connection = %pool.connection_id(), "{error}");
    // Via the connection's sink so ordering with other outgoing events is
    // preserved.
    let _ = pool.publish(ServerEvent::Error { error });
}

/// Log events at the appropriate level — message text is truncated so the
/// log is not flooded with full prompts.
fn log_event(event: &ClientEvent, connection: &str) {
    match event {
        ClientEvent::UserMessage { message_id, content, .. } => {
            let preview: String = content.chars().take(80).collect();
            let truncated = if content.len() > 80 { "…" } else { "" };
            info!(%connection, message = %message_id, input = %format!("{preview}{truncated}"), "user message");
        }
        ClientEvent::WindowMessage { message_id, window_id, .. } => {
            info!(%connection, message = %message_id, window = %window_id, "window message");
        }
        ClientEvent::ComponentAction { window_id, action, .. } => {
            info!(%connection, window = %window_id, %action, "component action");
        }
        ClientEvent::Interrupt => info!(%connection, "interrupt all"),
        ClientEvent::InterruptAgent { agent_id } => {
            info!(%connection, agent = %agent_id, "interrupt agent");
        }
        ClientEvent::SetProvider { provider } => {
            info!(%connection, %provider, "provider switch");
        }
        ClientEvent::SubscribeMonitor { monitor_id } => {
            info!(%connection, monitor = %monitor_id, "monitor subscribed");
        }
        ClientEvent::RemoveMonitor { monitor_id } => {
            info!(%connection, monitor = %monitor_id, "monitor removed");
        }
        _ => {}
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("event serialize failed: {e}");
            None
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) {
    if let Some(json) = encode(event) {
        let _ = socket.send(Message::Text(json)).await;
    }
}
