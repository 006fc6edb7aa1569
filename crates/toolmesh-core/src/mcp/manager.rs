//! Connection manager for named tool providers
//!
//! One long-lived session per provider, shared by every conversation. Each
//! provider moves through an explicit state machine; a connect attempt is a
//! single shared future that concurrent callers await together.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::config::LaunchSpec;
use crate::logging::SharedLogger;
use crate::schema::ToolSchema;
use crate::types::ToolDefinition;
use crate::{log_info, log_warn};

use super::error::{McpError, McpResult};
use super::session::{ProviderConnector, ProviderSession, RemoteToolResult};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifecycle state of a provider connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }

    /// Whether the manager may move from `self` to `next`
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected | Failed, Connecting)
                | (Connecting, Connected | Failed | Disconnected)
                | (Connected, Disconnected)
                | (Disconnected, Disconnected)
                | (Failed, Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog entry with its schema adapted once per fetch
#[derive(Debug, Clone)]
pub struct CatalogTool {
    pub definition: ToolDefinition,
    pub schema: Arc<ToolSchema>,
}

/// Snapshot of one configured provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub connected: bool,
    pub state: ConnectionState,
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type ConnectFuture = Shared<BoxFuture<'static, McpResult<()>>>;

struct ProviderEntry {
    spec: LaunchSpec,
    state: ConnectionState,
    /// Bumped by every attempt and disconnect; stale attempts compare against it
    generation: u64,
    in_flight: Option<ConnectFuture>,
    session: Option<Arc<dyn ProviderSession>>,
    catalog: Arc<Vec<CatalogTool>>,
    last_error: Option<String>,
}

impl ProviderEntry {
    fn new(spec: LaunchSpec) -> Self {
        Self {
            spec,
            state: ConnectionState::Disconnected,
            generation: 0,
            in_flight: None,
            session: None,
            catalog: Arc::new(Vec::new()),
            last_error: None,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }
}

type ProviderMap = Arc<Mutex<BTreeMap<String, ProviderEntry>>>;

/// Process-scoped manager of tool-provider connections
pub struct ConnectionManager {
    connector: Arc<dyn ProviderConnector>,
    providers: ProviderMap,
    connect_timeout: Duration,
    call_timeout: Duration,
    logger: SharedLogger,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn ProviderConnector>, logger: SharedLogger) -> Self {
        Self {
            connector,
            providers: Arc::new(Mutex::new(BTreeMap::new())),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            logger,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, call: Duration) -> Self {
        self.connect_timeout = connect;
        self.call_timeout = call;
        self
    }

    /// Add a configured provider in the Disconnected state
    ///
    /// An existing provider that is not connected picks up the new spec.
    pub fn register(&self, name: &str, spec: LaunchSpec) {
        let mut providers = self.providers.lock();
        match providers.get_mut(name) {
            Some(entry) if entry.state != ConnectionState::Connected && entry.in_flight.is_none() => {
                entry.spec = spec;
            }
            Some(_) => {}
            None => {
                providers.insert(name.to_string(), ProviderEntry::new(spec));
            }
        }
    }

    pub fn register_all(&self, servers: &BTreeMap<String, LaunchSpec>) {
        for (name, spec) in servers {
            self.register(name, spec.clone());
        }
    }

    /// Names of every configured provider
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.lock().keys().cloned().collect()
    }

    /// Ensure `name` is connected using `spec`
    ///
    /// No-op when already connected. While an attempt is in flight every
    /// caller awaits that same attempt.
    pub async fn connect(&self, name: &str, spec: &LaunchSpec) -> McpResult<()> {
        self.register(name, spec.clone());
        self.ensure_connected(name).await
    }

    /// Ensure a registered provider is connected using its stored spec
    pub async fn ensure_connected(&self, name: &str) -> McpResult<()> {
        let attempt = {
            let mut providers = self.providers.lock();
            let entry = providers
                .get_mut(name)
                .ok_or_else(|| McpError::UnknownProvider(name.to_string()))?;

            if entry.state == ConnectionState::Connected {
                return Ok(());
            }
            match &entry.in_flight {
                Some(in_flight) => in_flight.clone(),
                None => self.start_attempt(name, entry),
            }
        };
        attempt.await
    }

    /// Connect every registered provider concurrently
    ///
    /// Individual failures are logged and returned; they never affect the
    /// other providers.
    pub async fn connect_all(&self) -> Vec<(String, McpResult<()>)> {
        let names = self.provider_names();
        let outcomes = future::join_all(names.iter().map(|name| self.ensure_connected(name))).await;

        names
            .into_iter()
            .zip(outcomes)
            .inspect(|(name, outcome)| {
                if let Err(e) = outcome {
                    log_warn!(self.logger, "[ConnectionManager] Provider '{}' unavailable: {}", name, e);
                }
            })
            .collect()
    }

    fn start_attempt(&self, name: &str, entry: &mut ProviderEntry) -> ConnectFuture {
        entry.transition(ConnectionState::Connecting);
        entry.generation += 1;
        entry.last_error = None;

        let generation = entry.generation;
        let name = name.to_string();
        let spec = entry.spec.clone();
        let connector = Arc::clone(&self.connector);
        let providers = Arc::clone(&self.providers);
        let logger = Arc::clone(&self.logger);
        let timeout = self.connect_timeout;

        // Spawned so the attempt finishes even if every waiter goes away
        let task = tokio::spawn(async move {
            log_info!(logger, "[ConnectionManager] Connecting '{}'", name);
            let outcome = match tokio::time::timeout(timeout, establish(&*connector, &name, &spec, &logger)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(McpError::timeout(format!("connect to '{}'", name), timeout)),
            };
            settle(&providers, &name, generation, outcome, &logger).await
        });

        let attempt = async move {
            task.await
                .unwrap_or_else(|e| Err(McpError::ConnectionFailed(format!("connect task aborted: {}", e))))
        }
        .boxed()
        .shared();

        entry.in_flight = Some(attempt.clone());
        attempt
    }

    /// Close a provider's session and clear its catalog
    ///
    /// Safe to call in any state. An attempt in flight is invalidated and its
    /// session, once established, is closed instead of cached.
    pub async fn disconnect(&self, name: &str) {
        let session = {
            let mut providers = self.providers.lock();
            match providers.get_mut(name) {
                Some(entry) => {
                    entry.transition(ConnectionState::Disconnected);
                    entry.generation += 1;
                    entry.in_flight = None;
                    entry.catalog = Arc::new(Vec::new());
                    entry.last_error = None;
                    entry.session.take()
                }
                None => None,
            }
        };

        if let Some(session) = session {
            log_info!(self.logger, "[ConnectionManager] Disconnecting '{}'", name);
            if let Err(e) = session.close().await {
                log_warn!(self.logger, "[ConnectionManager] Error closing '{}': {}", name, e);
            }
        }
    }

    pub async fn disconnect_all(&self) {
        let names = self.provider_names();
        future::join_all(names.iter().map(|name| self.disconnect(name))).await;
    }

    /// Status of every configured provider, including never-connected ones
    pub fn get_status(&self) -> Vec<ProviderStatus> {
        self.providers
            .lock()
            .iter()
            .map(|(name, entry)| ProviderStatus {
                name: name.clone(),
                connected: entry.state == ConnectionState::Connected,
                state: entry.state,
                tools: entry.catalog.iter().map(|t| t.definition.clone()).collect(),
                error: entry.last_error.clone(),
            })
            .collect()
    }

    pub fn state(&self, name: &str) -> Option<ConnectionState> {
        self.providers.lock().get(name).map(|e| e.state)
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.state(name) == Some(ConnectionState::Connected)
    }

    /// Cached catalog of one provider; empty unless connected
    pub fn get_server_tools(&self, name: &str) -> Arc<Vec<CatalogTool>> {
        self.providers
            .lock()
            .get(name)
            .map(|e| Arc::clone(&e.catalog))
            .unwrap_or_default()
    }

    /// Cached catalogs of every connected provider
    pub fn get_all_tools(&self) -> BTreeMap<String, Arc<Vec<CatalogTool>>> {
        self.providers
            .lock()
            .iter()
            .filter(|(_, e)| e.state == ConnectionState::Connected)
            .map(|(name, e)| (name.clone(), Arc::clone(&e.catalog)))
            .collect()
    }

    /// Total tools across connected providers
    pub fn total_tools(&self) -> usize {
        self.get_all_tools().values().map(|c| c.len()).sum()
    }

    /// Invoke `tool` on `provider`, bounded by the call timeout
    pub async fn call_tool(&self, provider: &str, tool: &str, arguments: Value) -> McpResult<RemoteToolResult> {
        let session = {
            let providers = self.providers.lock();
            let entry = providers
                .get(provider)
                .ok_or_else(|| McpError::UnknownProvider(provider.to_string()))?;
            match (&entry.state, &entry.session) {
                (ConnectionState::Connected, Some(session)) => Arc::clone(session),
                _ => return Err(McpError::NotConnected(provider.to_string())),
            }
        };

        match tokio::time::timeout(self.call_timeout, session.call_tool(tool, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::timeout(
                format!("tool '{}' on '{}'", tool, provider),
                self.call_timeout,
            )),
        }
    }
}

/// Launch, handshake and fetch the catalog
async fn establish(
    connector: &dyn ProviderConnector,
    name: &str,
    spec: &LaunchSpec,
    logger: &SharedLogger,
) -> McpResult<(Arc<dyn ProviderSession>, Vec<CatalogTool>)> {
    let session = connector.connect(name, spec).await?;

    let definitions = match session.list_tools().await {
        Ok(definitions) => definitions,
        Err(e) => {
            let _ = session.close().await;
            return Err(e);
        }
    };

    let catalog = definitions
        .into_iter()
        .map(|definition| {
            let schema = ToolSchema::adapt(&definition.input_schema, |e| {
                log_warn!(
                    logger,
                    "[ConnectionManager] Schema of '{}.{}' not understood, accepting any input: {}",
                    name,
                    definition.name,
                    e
                );
            });
            CatalogTool {
                definition,
                schema: Arc::new(schema),
            }
        })
        .collect();

    Ok((session, catalog))
}

/// Record an attempt's outcome unless a newer attempt or a disconnect superseded it
async fn settle(
    providers: &ProviderMap,
    name: &str,
    generation: u64,
    outcome: McpResult<(Arc<dyn ProviderSession>, Vec<CatalogTool>)>,
    logger: &SharedLogger,
) -> McpResult<()> {
    let (result, orphan) = {
        let mut providers = providers.lock();
        match providers.get_mut(name) {
            Some(entry) if entry.generation == generation => {
                entry.in_flight = None;
                match outcome {
                    Ok((session, catalog)) => {
                        log_info!(logger, "[ConnectionManager] '{}' connected with {} tools", name, catalog.len());
                        entry.transition(ConnectionState::Connected);
                        entry.session = Some(session);
                        entry.catalog = Arc::new(catalog);
                        (Ok(()), None)
                    }
                    Err(e) => {
                        entry.transition(ConnectionState::Failed);
                        entry.session = None;
                        entry.catalog = Arc::new(Vec::new());
                        entry.last_error = Some(e.to_string());
                        (Err(e), None)
                    }
                }
            }
            _ => {
                let orphan = outcome.ok().map(|(session, _)| session);
                (Err(McpError::Superseded(name.to_string())), orphan)
            }
        }
    };

    if let Some(session) = orphan {
        let _ = session.close().await;
    }
    result
}
