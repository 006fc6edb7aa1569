//! In-process provider fakes for tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::LaunchSpec;
use crate::types::ToolDefinition;

use super::error::{McpError, McpResult};
use super::session::{ProviderConnector, ProviderSession, RemoteToolResult};

/// A recorded remote invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub provider: String,
    pub tool: String,
    pub arguments: Value,
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<RecordedCall>>,
    live: AtomicUsize,
    call_delay: Mutex<Duration>,
    /// Canned results keyed by tool name; default echoes the arguments
    responses: Mutex<HashMap<String, RemoteToolResult>>,
}

/// Connector serving canned catalogs by provider name
pub struct FakeConnector {
    catalogs: BTreeMap<String, Vec<ToolDefinition>>,
    delay: Duration,
    fallback: Option<Arc<dyn ProviderConnector>>,
    failures: Mutex<HashMap<String, usize>>,
    connects: Mutex<HashMap<String, usize>>,
    concurrent: AtomicUsize,
    pub max_concurrent: AtomicUsize,
    shared: Arc<Shared>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            catalogs: BTreeMap::new(),
            delay: Duration::ZERO,
            fallback: None,
            failures: Mutex::new(HashMap::new()),
            connects: Mutex::new(HashMap::new()),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn with_provider(mut self, name: &str, tools: Vec<ToolDefinition>) -> Self {
        self.catalogs.insert(name.to_string(), tools);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Connector used for names with no canned catalog
    pub fn with_fallback(mut self, fallback: Arc<dyn ProviderConnector>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Make the next `times` connects of `name` fail
    pub fn fail_next(&self, name: &str, times: usize) {
        self.failures.lock().insert(name.to_string(), times);
    }

    pub fn set_call_delay(&self, delay: Duration) {
        *self.shared.call_delay.lock() = delay;
    }

    pub fn respond(&self, tool: &str, result: RemoteToolResult) {
        self.shared.responses.lock().insert(tool.to_string(), result);
    }

    pub fn connects_for(&self, name: &str) -> usize {
        self.connects.lock().get(name).copied().unwrap_or(0)
    }

    pub fn live_sessions(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.shared.calls.lock().clone()
    }

    fn take_failure(&self, name: &str) -> bool {
        let mut failures = self.failures.lock();
        match failures.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ProviderConnector for FakeConnector {
    async fn connect(&self, name: &str, spec: &LaunchSpec) -> McpResult<Arc<dyn ProviderSession>> {
        let Some(catalog) = self.catalogs.get(name).cloned() else {
            return match &self.fallback {
                Some(fallback) => fallback.connect(name, spec).await,
                None => Err(McpError::ConnectionFailed(format!("no such provider '{}'", name))),
            };
        };

        *self.connects.lock().entry(name.to_string()).or_default() += 1;
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        if self.take_failure(name) {
            return Err(McpError::ConnectionFailed(format!("'{}' refused to start", name)));
        }

        self.shared.live.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeSession {
            provider: name.to_string(),
            catalog,
            shared: Arc::clone(&self.shared),
            closed: Mutex::new(false),
        }))
    }
}

struct FakeSession {
    provider: String,
    catalog: Vec<ToolDefinition>,
    shared: Arc<Shared>,
    closed: Mutex<bool>,
}

#[async_trait]
impl ProviderSession for FakeSession {
    async fn list_tools(&self) -> McpResult<Vec<ToolDefinition>> {
        Ok(self.catalog.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<RemoteToolResult> {
        if *self.closed.lock() {
            return Err(McpError::NotConnected(self.provider.clone()));
        }
        self.shared.calls.lock().push(RecordedCall {
            provider: self.provider.clone(),
            tool: name.to_string(),
            arguments: arguments.clone(),
        });

        let delay = *self.shared.call_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let canned = self.shared.responses.lock().get(name).cloned();
        Ok(canned.unwrap_or_else(|| RemoteToolResult::text(format!("{} called with {}", name, arguments))))
    }

    async fn close(&self) -> McpResult<()> {
        let mut closed = self.closed.lock();
        if !*closed {
            *closed = true;
            self.shared.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
