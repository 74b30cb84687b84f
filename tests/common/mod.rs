//! Shared fixtures for router integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use mcp_router::backend::{ModelBackend, RuntimeDescriptor};
use mcp_router::tools::{ParameterSpec, ToolMetadata};
use mcp_router::types::{ModelResult, Parameters};
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// How the mock answers `validate_environment`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Healthy,
    Unhealthy,
    Panics,
}

/// Backend that records what the router asked of it
pub struct MockBackend {
    name: String,
    runtime: RuntimeDescriptor,
    tools: Vec<ToolMetadata>,
    validation: Validation,
    panic_on_execute: AtomicBool,
    /// Each execution waits for one permit when set
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    started: Mutex<Vec<String>>,
    validations: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            runtime: RuntimeDescriptor::new(format!("{}_env", name)),
            tools: Vec::new(),
            validation: Validation::Healthy,
            panic_on_execute: AtomicBool::new(false),
            gate: None,
            delay: None,
            started: Mutex::new(Vec::new()),
            validations: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Add a tool with the given required parameters
    pub fn with_tool(mut self, tool: &str, required: &[&str]) -> Self {
        let mut metadata = ToolMetadata::new(tool, format!("{} tool", tool), &self.name, "simulation");
        for param in required {
            metadata = metadata.with_parameter(*param, ParameterSpec::required("string"));
        }
        self.tools.push(metadata);
        self
    }

    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn panicking(self) -> Self {
        self.panic_on_execute.store(true, Ordering::SeqCst);
        self
    }

    /// Execution ids in the order `execute` was entered
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn runtime(&self) -> &RuntimeDescriptor {
        &self.runtime
    }

    fn available_tools(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name.clone()).collect()
    }

    fn tool_metadata(&self) -> Vec<ToolMetadata> {
        self.tools.clone()
    }

    async fn validate_environment(&self) -> bool {
        self.validations.fetch_add(1, Ordering::SeqCst);
        match self.validation {
            Validation::Healthy => true,
            Validation::Unhealthy => false,
            Validation::Panics => panic!("conda not found"),
        }
    }

    async fn execute(
        &self,
        tool_name: &str,
        parameters: &Parameters,
        execution_id: &str,
    ) -> ModelResult {
        let builder = ModelResult::builder(&self.name, tool_name, execution_id)
            .environment(&self.runtime.environment);

        self.started.lock().unwrap().push(execution_id.to_string());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        if self.panic_on_execute.load(Ordering::SeqCst) {
            self.running.fetch_sub(1, Ordering::SeqCst);
            panic!("segfault in model core");
        }

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        builder.complete(
            Some(json!({ "tool": tool_name, "parameters": parameters })),
            None,
        )
    }
}

/// Poll `condition` every few milliseconds; panics after five seconds
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached within 5s");
}

pub fn params(pairs: &[(&str, &str)]) -> Parameters {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), json!(value)))
        .collect()
}
