// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Background agent task and request/event channel types.

use std::sync::Arc;

use smithers_bootstrap::{AgentBuilder, RuntimeContext};
use smithers_config::{Config, ModelConfig};
use smithers_core::AgentEvent;
use smithers_model::Message;
use tokio::sync::mpsc;
use tracing::debug;

/// Request sent from the TUI to the background agent task.
///
/// All model overrides carry an already-resolved `ModelConfig`.  The TUI
/// resolves the config via `SessionState` and `smithers_model::resolve_model_from_config`;
/// the agent task only calls `smithers_model::from_config` to instantiate the
/// provider, never re-derives which model to use.
#[derive(Debug)]
pub enum AgentRequest {
    /// Submit a new user message (normal flow).
    Submit {
        content: String,
        /// Pre-resolved model config; agent calls `from_config` to instantiate.
        model_override: Option<ModelConfig>,
    },
    /// Replace conversation history and submit (edit-and-resubmit flow).
    Resubmit {
        messages: Vec<Message>,
        new_user_content: String,
        /// Pre-resolved model config; agent calls `from_config` to instantiate.
        model_override: Option<ModelConfig>,
    },
    /// Pre-load conversation history (resume flow). Does not trigger a model
    /// call; the agent is just primed for the next submission.
    LoadHistory(Vec<Message>),
}

/// Background task that owns the `Agent` and forwards events back to the TUI.
///
/// The startup model is passed as an already-resolved `ModelConfig` (the TUI
/// applied the CLI `--model` override before spawning).  Per-message model
/// overrides in `AgentRequest` variants are also pre-resolved `ModelConfig`
/// values; this task only calls `from_config` to instantiate the provider.
///
/// `cancel_handle` is a shared slot that holds the sender half of a
/// per-submission `oneshot` channel.  The TUI drops (or sends on) the sender
/// to interrupt the current run.  The task creates a fresh channel before
/// every Submit/Resubmit and stores the sender in the slot; it is cleared
/// when the submission completes.
pub async fn agent_task(
    config: Arc<Config>,
    startup_model_cfg: ModelConfig,
    mut rx: mpsc::Receiver<AgentRequest>,
    tx: mpsc::Sender<AgentEvent>,
    cancel_handle: Arc<tokio::sync::Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
) {
    let model: Arc<dyn smithers_model::ModelProvider> =
        match smithers_model::from_config(&startup_model_cfg) {
            Ok(m) => Arc::from(m),
            Err(e) => {
                let _ = tx.send(AgentEvent::Error(format!("model init: {e}"))).await;
                return;
            }
        };

    let runtime_ctx = RuntimeContext::auto_detect();

    let mut agent = AgentBuilder::new(config.clone())
        .with_runtime_context(runtime_ctx)
        .build(model);

    while let Some(req) = rx.recv().await {
        match req {
            AgentRequest::Submit {
                content,
                model_override,
            } => {
                debug!(msg_len = content.len(), "agent task received message");

                if let Some(ref model_cfg) = model_override {
                    match smithers_model::from_config(model_cfg) {
                        Ok(m) => {
                            agent.set_model(Arc::from(m) as Arc<dyn smithers_model::ModelProvider>);
                        }
                        Err(e) => {
                            let _ = tx
                                .send(AgentEvent::Error(format!("model override init: {e}")))
                                .await;
                            continue;
                        }
                    }
                }

                let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
                *cancel_handle.lock().await = Some(cancel_tx);
                let result = agent
                    .submit_with_cancel(&content, tx.clone(), cancel_rx)
                    .await;
                cancel_handle.lock().await.take();
                if let Err(e) = result {
                    let _ = tx.send(AgentEvent::Error(format!("{:#}", e))).await;
                }
            }
            AgentRequest::Resubmit {
                messages,
                new_user_content,
                model_override,
            } => {
                debug!("agent task received resubmit");

                if let Some(ref model_cfg) = model_override {
                    match smithers_model::from_config(model_cfg) {
                        Ok(m) => {
                            agent.set_model(Arc::from(m) as Arc<dyn smithers_model::ModelProvider>);
                        }
                        Err(e) => {
                            let _ = tx
                                .send(AgentEvent::Error(format!("model override init: {e}")))
                                .await;
                            continue;
                        }
                    }
                }

                let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
                *cancel_handle.lock().await = Some(cancel_tx);
                let result = agent
                    .replace_history_and_submit_with_cancel(
                        messages,
                        &new_user_content,
                        tx.clone(),
                        cancel_rx,
                    )
                    .await;
                cancel_handle.lock().await.take();
                if let Err(e) = result {
                    let _ = tx.send(AgentEvent::Error(format!("{:#}", e))).await;
                }
            }
            AgentRequest::LoadHistory(messages) => {
                debug!(n = messages.len(), "agent task loading history");
                agent.seed_history(messages);
            }
        }
    }
}
