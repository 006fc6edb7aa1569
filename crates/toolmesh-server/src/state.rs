//! Shared handler state

use std::sync::Arc;

use toolmesh_core::mcp::ProviderConnector;
use toolmesh_core::{
    AppConfig, ConnectionManager, ConversationStore, ModelResolver, Orchestrator, OrchestratorSettings, SharedLogger,
};

/// Process-scoped services handed to every handler
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub connections: Arc<ConnectionManager>,
    pub store: Arc<dyn ConversationStore>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self {
            connections: Arc::clone(orchestrator.connections()),
            store: Arc::clone(orchestrator.store()),
            orchestrator,
        })
    }

    /// Wire the connection manager, model resolver and orchestrator from config
    pub fn from_config(
        config: &AppConfig,
        connector: Arc<dyn ProviderConnector>,
        store: Arc<dyn ConversationStore>,
        logger: SharedLogger,
    ) -> Arc<Self> {
        let connections = Arc::new(
            ConnectionManager::new(connector, Arc::clone(&logger))
                .with_timeouts(config.timeouts.connect(), config.timeouts.tool_call()),
        );
        connections.register_all(&config.mcp_servers);

        let models = ModelResolver::from_config(config, Arc::clone(&logger));
        let orchestrator = Orchestrator::new(models, connections, store, logger)
            .with_settings(OrchestratorSettings::from_config(config));
        Self::new(Arc::new(orchestrator))
    }
}
