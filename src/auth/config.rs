//! Authentication configuration.

use serde::{Deserialize, Serialize};

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Secret for HS256 JWT validation. `env:VAR_NAME` reads the secret
    /// from the environment at startup.
    pub jwt_secret: Option<String>,
    /// Accept `dev:<user_id>` tokens and relax CORS for localhost.
    pub dev_mode: bool,
    /// Allowed CORS origins.
    pub allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            dev_mode: false,
            allowed_origins: Vec::new(),
        }
    }
}

impl AuthConfig {
    /// Resolve `env:VAR_NAME` indirection in the configured secret.
    pub fn resolve_jwt_secret(&self) -> Option<String> {
        let secret = self.jwt_secret.as_ref()?;
        if let Some(var) = secret.strip_prefix("env:") {
            std::env::var(var).ok()
        } else {
            Some(secret.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_plain_secret() {
        let config = AuthConfig {
            jwt_secret: Some("plain-secret".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_jwt_secret().unwrap(), "plain-secret");
    }

    #[test]
    fn test_resolve_env_secret() {
        // SAFETY: test-local variable, no concurrent readers rely on it.
        unsafe { std::env::set_var("TEST_JWT_SECRET_RESOLVE", "from-env") };
        let config = AuthConfig {
            jwt_secret: Some("env:TEST_JWT_SECRET_RESOLVE".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_jwt_secret().unwrap(), "from-env");
    }
}
