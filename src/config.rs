//! Layered configuration: built-in defaults, an optional TOML file, then
//! `RING_LIGHTING_*` environment variables.

use crate::error::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "RING_LIGHTING_";

/// Endpoints, credentials and timing for one lighting session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightingConfig {
    /// OAuth token endpoint
    pub oauth_url: String,
    /// Locations listing endpoint
    pub locations_url: String,
    /// Bridge ticket endpoint (queried with `locationID`)
    pub tickets_url: String,
    pub client_id: String,
    pub scope: String,
    pub user_agent: String,
    /// Scheme used for bridge channel URLs (`wss` against the real service)
    pub channel_scheme: String,
    /// Where the refreshed session is persisted
    pub session_path: PathBuf,
    /// Seed refresh token, used only when no valid session is stored
    #[serde(default, skip_serializing)]
    pub refresh_token: Option<SecretString>,
    /// Deadline for a correlated channel response
    pub request_timeout_ms: u64,
    /// Deadline for a bridge channel handshake
    pub connect_timeout_ms: u64,
    /// Timeout for each HTTP call
    pub http_timeout_secs: u64,
    /// Queue depth above which a backlog warning is logged
    pub backlog_warn_threshold: usize,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            oauth_url: "https://oauth.ring.com/oauth/token".into(),
            locations_url: "https://app.ring.com/rhq/v1/devices/v1/locations".into(),
            tickets_url: "https://app.ring.com/api/v1/clap/tickets".into(),
            client_id: "ring_official_android".into(),
            scope: "client".into(),
            user_agent: "android:com.ringapp:2.0.67(423)".into(),
            channel_scheme: "wss".into(),
            session_path: PathBuf::from("auth.json"),
            refresh_token: None,
            request_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            http_timeout_secs: 30,
            backlog_warn_threshold: 1,
        }
    }
}

impl LightingConfig {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        Ok(config)
    }

    /// Set the seed refresh token
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(token.into()));
        self
    }

    /// Set where the session record lives
    pub fn with_session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = path.into();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Build the HTTP client shared by the token and topology calls
    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(self.http_timeout())
            .user_agent(self.user_agent.clone())
            .build()?;
        Ok(client)
    }
}
