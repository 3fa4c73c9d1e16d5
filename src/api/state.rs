//! Application state shared across handlers.

use std::sync::Arc;

use crate::agent::AgentClient;
use crate::auth::AuthState;
use crate::directory::{CredentialDirectory, ProfileRepository};
use crate::gateway::GatewayClient;
use crate::relay::ChatRelay;

/// Reverse-proxy configuration for the API layer.
#[derive(Clone, Debug)]
pub struct ProxyState {
    /// Shared secret the agent host presents on `/llm-proxy` calls.
    pub shared_secret: String,
}

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Chat relay behind every chat transport.
    pub relay: ChatRelay,
    /// Agent host client.
    pub agent: Arc<AgentClient>,
    /// LLM gateway client.
    pub gateway: Arc<GatewayClient>,
    /// User profile repository.
    pub profiles: ProfileRepository,
    /// Agent-ref to credential resolution for the reverse proxy.
    pub directory: Arc<dyn CredentialDirectory>,
    /// Authentication state.
    pub auth: AuthState,
    /// Reverse proxy configuration.
    pub proxy: ProxyState,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        relay: ChatRelay,
        agent: Arc<AgentClient>,
        gateway: Arc<GatewayClient>,
        profiles: ProfileRepository,
        auth: AuthState,
        proxy: ProxyState,
    ) -> Self {
        let directory: Arc<dyn CredentialDirectory> = Arc::new(profiles.clone());
        Self {
            relay,
            agent,
            gateway,
            profiles,
            directory,
            auth,
            proxy,
        }
    }

    /// Substitute the credential directory. Used by tests.
    pub fn with_directory(mut self, directory: Arc<dyn CredentialDirectory>) -> Self {
        self.directory = directory;
        self
    }
}
