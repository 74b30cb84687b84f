//! Execution router: admission control and priority queueing
//!
//! Per request: `Submitted → (Admitted | Queued) → Running → {Completed |
//! Failed | Cancelled}`. Only queued requests can be cancelled; a running
//! backend call is never preempted.
//!
//! The active set, the pending queue and the backend map live behind one
//! mutex that is never held across an await. Admission (capacity check plus
//! insert into the active set) happens inside a single critical section, so
//! the number of active executions never exceeds the ceiling.
//!
//! Every admitted execution runs on its own task. When it finishes, it leaves
//! the active set and promotes queued requests while capacity remains; each
//! promotion is spawned independently.
//!
//! There is no fairness guard: a steady stream of high-priority submissions
//! starves lower priorities.

use crate::backend::{CommandBackend, ModelBackend};
use crate::config::Config;
use crate::environment::EnvironmentManager;
use crate::router::health::{BackendHealth, ExecutionState, HealthReport, HealthStatus, RouterStats};
use crate::router::queue::{PendingQueue, QueuedExecution};
use crate::tools::ToolRegistry;
use crate::types::{ExecutionRequest, ModelResult, Parameters, ROUTER_MODEL_NAME};
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reason recorded on envelopes of cancelled queued requests
pub const CANCELLED_BY_USER: &str = "Execution cancelled by user";

struct RouterState {
    backends: HashMap<String, Arc<dyn ModelBackend>>,
    /// execution id → backend name
    active: HashMap<String, String>,
    queue: PendingQueue,
}

struct RouterInner {
    registry: Arc<RwLock<ToolRegistry>>,
    state: Mutex<RouterState>,
    max_concurrent: usize,
}

/// Work handed to a running task
struct Admitted {
    backend: Arc<dyn ModelBackend>,
    tool_name: String,
    parameters: Parameters,
    execution_id: String,
    responder: oneshot::Sender<ModelResult>,
}

/// Routes tool executions to registered backends
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ExecutionRouter {
    inner: Arc<RouterInner>,
}

impl ExecutionRouter {
    /// Router with its own empty registry
    pub fn new(max_concurrent_executions: usize) -> Self {
        Self::with_registry(
            Arc::new(RwLock::new(ToolRegistry::new())),
            max_concurrent_executions,
        )
    }

    /// Router sharing an existing registry
    ///
    /// A ceiling of zero is raised to one so queued work can always drain.
    pub fn with_registry(
        registry: Arc<RwLock<ToolRegistry>>,
        max_concurrent_executions: usize,
    ) -> Self {
        if max_concurrent_executions == 0 {
            warn!("max_concurrent_executions of 0 raised to 1");
        }
        Self {
            inner: Arc::new(RouterInner {
                registry,
                state: Mutex::new(RouterState {
                    backends: HashMap::new(),
                    active: HashMap::new(),
                    queue: PendingQueue::new(),
                }),
                max_concurrent: max_concurrent_executions.max(1),
            }),
        }
    }

    /// Router with one [`CommandBackend`] per `[[backends]]` entry
    pub async fn from_config(config: &Config, environments: Arc<EnvironmentManager>) -> Self {
        let router = Self::new(config.router.max_concurrent_executions);
        for backend in &config.backends {
            let backend = CommandBackend::new(
                backend.clone(),
                Arc::clone(&environments),
                config.workspace.clone(),
            );
            router.register_backend(Arc::new(backend)).await;
        }
        router
    }

    pub fn registry(&self) -> Arc<RwLock<ToolRegistry>> {
        Arc::clone(&self.inner.registry)
    }

    pub fn max_concurrent_executions(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Register a backend and its self-described tools
    ///
    /// A backend with the same name is replaced, along with every tool the
    /// old one registered.
    pub async fn register_backend(&self, backend: Arc<dyn ModelBackend>) {
        let name = backend.name().to_string();
        let tools = backend.tool_metadata();

        let replaced = {
            let mut state = self.inner.state.lock().await;
            state.backends.insert(name.clone(), backend).is_some()
        };

        let mut registry = self.inner.registry.write().await;
        if replaced {
            warn!(model = %name, "Model already registered, replacing");
            registry.unregister_backend(&name);
        }
        for tool in tools {
            registry.register(tool);
        }
        drop(registry);

        info!(model = %name, "Registered model with router");
    }

    /// Remove a backend, fail its queued requests and drop its tools.
    ///
    /// Executions already running on the backend finish normally. Returns
    /// false if no backend had that name.
    pub async fn unregister_backend(&self, name: &str) -> bool {
        let orphaned = {
            let mut state = self.inner.state.lock().await;
            if state.backends.remove(name).is_none() {
                return false;
            }
            state.queue.drain_backend(name)
        };

        for queued in orphaned {
            let result = ModelResult::router_failure(
                &queued.tool_name,
                &queued.execution_id,
                format!("Model '{}' no longer available", name),
            );
            let _ = queued.responder.send(result);
        }

        self.inner.registry.write().await.unregister_backend(name);
        info!(model = %name, "Unregistered model from router");
        true
    }

    /// Registered backend names, sorted
    pub async fn list_backends(&self) -> Vec<String> {
        let state = self.inner.state.lock().await;
        let mut names: Vec<String> = state.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Shorthand for [`Self::execute`] with default priority and a fresh id
    pub async fn execute_tool(&self, tool_name: &str, parameters: Parameters) -> ModelResult {
        self.execute(ExecutionRequest::new(tool_name, parameters)).await
    }

    /// Run a tool, waiting for capacity if necessary.
    ///
    /// Always returns an envelope. Rejections (unknown tool, unregistered
    /// backend, missing parameters, id already in flight) fail immediately
    /// without consuming capacity.
    pub async fn execute(&self, request: ExecutionRequest) -> ModelResult {
        let ExecutionRequest {
            tool_name,
            parameters,
            priority,
            execution_id,
        } = request;
        let execution_id = execution_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let (backend_name, missing) = {
            let registry = self.inner.registry.read().await;
            match registry.get(&tool_name) {
                Some(tool) => (tool.backend.clone(), tool.missing_parameters(&parameters)),
                None => {
                    return reject(
                        &tool_name,
                        &execution_id,
                        format!("Tool '{}' not found in registry", tool_name),
                    )
                }
            }
        };

        let (responder, receiver) = oneshot::channel();

        let admitted = {
            let mut state = self.inner.state.lock().await;

            let Some(backend) = state.backends.get(&backend_name).cloned() else {
                return reject(
                    &tool_name,
                    &execution_id,
                    format!("Model '{}' not available", backend_name),
                );
            };

            if !missing.is_empty() {
                return reject(
                    &tool_name,
                    &execution_id,
                    format!("Missing required parameters: {}", missing.join(", ")),
                );
            }

            let abandoned = state.queue.prune_abandoned();
            if abandoned > 0 {
                debug!(count = abandoned, "Dropped queued executions nobody awaits");
            }

            if state.active.contains_key(&execution_id) || state.queue.contains(&execution_id) {
                return reject(
                    &tool_name,
                    &execution_id,
                    format!("Execution '{}' is already in progress", execution_id),
                );
            }

            if state.active.len() < self.inner.max_concurrent {
                state.active.insert(execution_id.clone(), backend_name.clone());
                Some(Admitted {
                    backend,
                    tool_name: tool_name.clone(),
                    parameters,
                    execution_id: execution_id.clone(),
                    responder,
                })
            } else {
                let position = state.queue.push(QueuedExecution {
                    tool_name: tool_name.clone(),
                    parameters,
                    priority,
                    execution_id: execution_id.clone(),
                    backend: backend_name.clone(),
                    responder,
                });
                info!(
                    execution_id = %execution_id,
                    tool = %tool_name,
                    priority,
                    position,
                    "Queued execution"
                );
                None
            }
        };

        if let Some(admitted) = admitted {
            self.spawn(admitted);
        }

        match receiver.await {
            Ok(result) => result,
            Err(_) => {
                error!(execution_id = %execution_id, "Execution dropped before completion");
                ModelResult::router_failure(
                    &tool_name,
                    &execution_id,
                    "Execution dropped before completion",
                )
            }
        }
    }

    /// Cancel a queued request. Running, unknown and abandoned ids return
    /// false.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let cancelled = {
            let mut state = self.inner.state.lock().await;
            state.queue.prune_abandoned();
            state.queue.remove(execution_id)
        };
        match cancelled {
            Some(queued) => {
                let result = ModelResult::builder(
                    ROUTER_MODEL_NAME,
                    &queued.tool_name,
                    &queued.execution_id,
                )
                .cancel(CANCELLED_BY_USER);
                let _ = queued.responder.send(result);
                info!(execution_id = %execution_id, "Cancelled queued execution");
                true
            }
            None => false,
        }
    }

    /// Running (with backend) or queued (with position); `None` otherwise
    pub async fn execution_status(&self, execution_id: &str) -> Option<ExecutionState> {
        let mut state = self.inner.state.lock().await;
        state.queue.prune_abandoned();
        if let Some(backend) = state.active.get(execution_id) {
            return Some(ExecutionState::Running {
                model_name: backend.clone(),
            });
        }
        state
            .queue
            .find(execution_id)
            .map(|(position, queued)| ExecutionState::Queued {
                position,
                model_name: queued.backend.clone(),
            })
    }

    pub async fn stats(&self) -> RouterStats {
        let mut state = self.inner.state.lock().await;
        state.queue.prune_abandoned();
        self.stats_locked(&state)
    }

    /// Validate every backend's environment, isolating failures per backend
    pub async fn health_check(&self) -> HealthReport {
        let backends: Vec<(String, Arc<dyn ModelBackend>)> = {
            let state = self.inner.state.lock().await;
            state
                .backends
                .iter()
                .map(|(name, backend)| (name.clone(), Arc::clone(backend)))
                .collect()
        };

        let checks = backends.into_iter().map(|(name, backend)| async move {
            let verdict = AssertUnwindSafe(backend.validate_environment())
                .catch_unwind()
                .await;
            let (status, error) = match verdict {
                Ok(true) => (HealthStatus::Healthy, None),
                Ok(false) => (HealthStatus::Unhealthy, None),
                Err(panic) => {
                    let message = panic_message(&*panic);
                    error!(model = %name, error = %message, "Health check failed");
                    (HealthStatus::Error, Some(message))
                }
            };
            let health = BackendHealth {
                status,
                environment: backend.runtime().environment.clone(),
                available_tools: backend.available_tools().len(),
                error,
            };
            (name, health)
        });

        let models = join_all(checks).await.into_iter().collect();

        HealthReport {
            router_status: "healthy".to_string(),
            models,
            stats: self.stats().await,
        }
    }

    fn stats_locked(&self, state: &RouterState) -> RouterStats {
        let mut model_names: Vec<String> = state.backends.keys().cloned().collect();
        model_names.sort();
        RouterStats {
            registered_models: state.backends.len(),
            active_executions: state.active.len(),
            queued_executions: state.queue.len(),
            max_concurrent_executions: self.inner.max_concurrent,
            model_names,
        }
    }

    /// Run an admitted execution on its own task.
    ///
    /// The id is already in the active set; the task removes it, promotes
    /// queued work, and only then resolves the caller.
    fn spawn(&self, admitted: Admitted) {
        let router = self.clone();
        tokio::spawn(async move {
            let Admitted {
                backend,
                tool_name,
                parameters,
                execution_id,
                responder,
            } = admitted;

            let result = invoke(backend, &tool_name, &parameters, &execution_id).await;
            router.finish(&execution_id).await;

            if responder.send(result).is_err() {
                debug!(execution_id = %execution_id, "Caller stopped waiting for result");
            }
        });
    }

    /// Release a slot and promote queued requests while capacity remains
    async fn finish(&self, execution_id: &str) {
        let mut promoted = Vec::new();
        let mut orphaned = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            state.active.remove(execution_id);

            while state.active.len() < self.inner.max_concurrent {
                let Some(queued) = state.queue.pop() else {
                    break;
                };

                if queued.responder.is_closed() {
                    debug!(execution_id = %queued.execution_id, "Skipping abandoned queued execution");
                    continue;
                }

                let Some(backend) = state.backends.get(&queued.backend).cloned() else {
                    orphaned.push(queued);
                    continue;
                };

                state
                    .active
                    .insert(queued.execution_id.clone(), queued.backend.clone());
                promoted.push(Admitted {
                    backend,
                    tool_name: queued.tool_name,
                    parameters: queued.parameters,
                    execution_id: queued.execution_id,
                    responder: queued.responder,
                });
            }
        }

        for queued in orphaned {
            let result = ModelResult::router_failure(
                &queued.tool_name,
                &queued.execution_id,
                format!("Model '{}' no longer available", queued.backend),
            );
            let _ = queued.responder.send(result);
        }

        for admitted in promoted {
            debug!(execution_id = %admitted.execution_id, "Promoting queued execution");
            self.spawn(admitted);
        }
    }
}

/// Validate once, then execute; panics become Failed envelopes
async fn invoke(
    backend: Arc<dyn ModelBackend>,
    tool_name: &str,
    parameters: &Parameters,
    execution_id: &str,
) -> ModelResult {
    let valid = AssertUnwindSafe(backend.validate_environment())
        .catch_unwind()
        .await;
    match valid {
        Ok(true) => {}
        Ok(false) => {
            warn!(model = %backend.name(), tool = %tool_name, execution_id = %execution_id, "Environment validation failed");
            return ModelResult::router_failure(
                tool_name,
                execution_id,
                format!("Model '{}' environment validation failed", backend.name()),
            );
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(model = %backend.name(), tool = %tool_name, execution_id = %execution_id, error = %message, "Environment validation panicked");
            return ModelResult::router_failure(
                tool_name,
                execution_id,
                format!("Execution error: {}", message),
            );
        }
    }

    info!(model = %backend.name(), tool = %tool_name, execution_id = %execution_id, "Executing tool");

    match AssertUnwindSafe(backend.execute(tool_name, parameters, execution_id))
        .catch_unwind()
        .await
    {
        Ok(result) => {
            info!(
                tool = %tool_name,
                execution_id = %execution_id,
                status = %result.status(),
                "Tool execution finished"
            );
            result
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(tool = %tool_name, execution_id = %execution_id, error = %message, "Tool execution panicked");
            ModelResult::router_failure(tool_name, execution_id, format!("Execution error: {}", message))
        }
    }
}

fn reject(tool_name: &str, execution_id: &str, reason: String) -> ModelResult {
    warn!(tool = %tool_name, execution_id = %execution_id, reason = %reason, "Rejected execution");
    ModelResult::router_failure(tool_name, execution_id, reason)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "backend panicked".to_string()
    }
}
