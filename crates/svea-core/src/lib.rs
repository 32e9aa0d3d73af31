// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The agent orchestration core.
//!
//! One [`ContextPool`] per client connection ties everything together:
//! per-monitor main-task queues drained under a per-monitor action budget,
//! per-window agents serialized through window queues, a global agent
//! limiter, the context tape and interaction timeline feeding prompts, the
//! window-state registry mirroring the client desktop, and the broadcast
//! center fanning server events out to the right connection.

mod broadcast;
mod budget;
mod context_pool;
mod dispatch;
mod emitter;
mod error;
mod limiter;
mod main_queue;
mod main_task;
mod pool;
mod registry;
mod role;
mod session;
mod tape;
mod task;
mod timeline;
mod window_queue;
mod window_task;

pub use broadcast::{BroadcastCenter, EventSink, SinkStatus};
pub use budget::{BudgetPermit, MonitorBudget};
pub use context_pool::{ContextPool, ContextPoolOptions, PoolStats, RenderFeedback};
pub use dispatch::{DispatchOutcome, DispatchRequest, TaskDispatcher};
pub use emitter::{ActionEmitter, CoreSignal};
pub use error::CoreError;
pub use limiter::{AgentLimiter, LimiterPermit};
pub use main_queue::{EnqueueOutcome, MainQueue};
pub use main_task::MainTaskProcessor;
pub use pool::{AgentPool, PoolCounters, ProviderSource};
pub use registry::WindowStateRegistry;
pub use role::AgentRole;
pub use session::{AgentSession, SessionPhase, TurnOutcome};
pub use tape::{ContextMessage, ContextRole, ContextTape, MessageFilter, MessageSource, PromptScope};
pub use task::{Task, TaskKind};
pub use timeline::InteractionTimeline;
pub use window_queue::{WindowEnqueue, WindowQueues};
pub use window_task::WindowTaskProcessor;
