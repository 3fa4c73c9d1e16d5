//! Test utilities and common setup.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Utc;

use magpie::agent::{AgentClient, AgentClientConfig};
use magpie::api::{AppState, ProxyState, create_router};
use magpie::auth::{AuthConfig, AuthState};
use magpie::db::Database;
use magpie::directory::{ProfileRepository, UserProfile};
use magpie::gateway::{GatewayClient, GatewayClientConfig, RetryPolicy};
use magpie::history::{HistoryRepository, UsageLedger};
use magpie::relay::ChatRelay;

pub const TEST_USER: &str = "usr_test";
pub const TEST_AGENT_REF: &str = "agent-test-1";
pub const TEST_GATEWAY_KEY: &str = "sk-user-abcdef123456";
pub const SHARED_SECRET: &str = "proxy-shared-secret";

/// A fully wired application backed by an in-memory database, pointed at
/// mock upstream servers.
pub struct TestApp {
    pub state: AppState,
    pub token: String,
}

impl TestApp {
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }
}

fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: Some("test-secret-for-integration-tests-minimum-32-chars".to_string()),
        dev_mode: true,
        allowed_origins: Vec::new(),
    }
}

/// Create a test application wired against the given upstream base URLs.
///
/// Seeds one user profile with an agent reference and a gateway credential,
/// and returns a valid bearer token for that user.
pub async fn test_app(agent_url: &str, gateway_url: &str) -> TestApp {
    let db = Database::in_memory().await.unwrap();

    let profiles = ProfileRepository::new(db.pool().clone());
    profiles
        .upsert(&UserProfile {
            id: TEST_USER.to_string(),
            name: "Test User".to_string(),
            agent_ref: Some(TEST_AGENT_REF.to_string()),
            gateway_key: Some(TEST_GATEWAY_KEY.to_string()),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let agent = Arc::new(
        AgentClient::new(AgentClientConfig {
            base_url: agent_url.to_string(),
            api_token: None,
            streaming_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap(),
    );

    let gateway = Arc::new(
        GatewayClient::new(GatewayClientConfig {
            base_url: gateway_url.to_string(),
            master_key: "sk-master-test".to_string(),
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 1,
                base_backoff: Duration::from_millis(1),
            },
        })
        .unwrap(),
    );

    let history = HistoryRepository::new(db.pool().clone());
    let ledger = UsageLedger::new(db.pool().clone());
    let relay = ChatRelay::new(agent.clone(), history, ledger);

    let auth_state = AuthState::new(test_auth_config(), profiles.clone());
    let token = auth_state.generate_token(TEST_USER).unwrap();

    let state = AppState::new(
        relay,
        agent,
        gateway,
        profiles,
        auth_state,
        ProxyState {
            shared_secret: SHARED_SECRET.to_string(),
        },
    );

    TestApp { state, token }
}

/// Seed an additional profile. `gateway_key` may be absent to model a user
/// whose credential has not been provisioned yet.
pub async fn seed_profile(
    app: &TestApp,
    user_id: &str,
    agent_ref: Option<&str>,
    gateway_key: Option<&str>,
) {
    app.state
        .profiles
        .upsert(&UserProfile {
            id: user_id.to_string(),
            name: format!("User {user_id}"),
            agent_ref: agent_ref.map(str::to_string),
            gateway_key: gateway_key.map(str::to_string),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}
