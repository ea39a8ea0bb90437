use crate::config::LightingConfig;
use crate::error::{LightingError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// The bearer session currently in use
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub obtained_at: DateTime<Utc>,
}

/// On-disk session record, rewritten after every refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "unix_epoch", with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    /// Other fields returned by the token endpoint (expires_in, scope, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl StoredSession {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

impl From<&StoredSession> for Session {
    fn from(stored: &StoredSession) -> Self {
        Self {
            access_token: SecretString::from(stored.access_token.clone()),
            refresh_token: SecretString::from(stored.refresh_token.clone()),
            obtained_at: stored.created,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Obtains fresh access tokens and persists the rotating refresh token
pub struct TokenManager {
    http: reqwest::Client,
    oauth_url: String,
    client_id: String,
    scope: String,
    session_path: PathBuf,
    refresh_token: SecretString,
    session: Option<Session>,
}

impl TokenManager {
    /// Seed from the stored session, falling back to the configured refresh token
    pub fn load(config: &LightingConfig, http: reqwest::Client) -> Result<Self> {
        let stored = match StoredSession::read(&config.session_path) {
            Ok(stored) if !stored.refresh_token.is_empty() => Some(stored),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(
                    "No usable session at {}: {}",
                    config.session_path.display(),
                    e
                );
                None
            }
        };

        let (refresh_token, session) = match (stored, &config.refresh_token) {
            (Some(stored), _) => {
                tracing::info!("Using refresh token from {}", config.session_path.display());
                let session = (!stored.access_token.is_empty()).then(|| Session::from(&stored));
                (SecretString::from(stored.refresh_token), session)
            }
            (None, Some(seed)) => {
                tracing::info!("Using refresh token from configuration");
                (seed.clone(), None)
            }
            (None, None) => {
                return Err(LightingError::Auth(
                    "must be initialized with a refresh token".to_string(),
                ))
            }
        };

        Ok(Self {
            http,
            oauth_url: config.oauth_url.clone(),
            client_id: config.client_id.clone(),
            scope: config.scope.clone(),
            session_path: config.session_path.clone(),
            refresh_token,
            session,
        })
    }

    /// The last session obtained or loaded, if any
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Exchange the refresh token for a new session and persist it
    ///
    /// Called at the start of every task; tokens are never reused across tasks.
    pub async fn ensure_token(&mut self) -> Result<SecretString> {
        tracing::info!("Getting access token");
        let body = json!({
            "grant_type": "refresh_token",
            "refresh_token": self.refresh_token.expose_secret(),
            "client_id": self.client_id,
            "scope": self.scope,
        });

        let response = self
            .http
            .post(&self.oauth_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LightingError::Auth(format!("error getting access token: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LightingError::Auth(format!(
                "token endpoint returned HTTP {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| LightingError::Auth(format!("unreadable token response: {e}")))?;

        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LightingError::Auth("response did not contain an access token".into()))?;
        let refresh_token = token
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.refresh_token.expose_secret().to_string());

        let stored = StoredSession {
            access_token,
            refresh_token,
            created: Utc::now().trunc_subsecs(3),
            extra: token.extra,
        };

        let session = Session::from(&stored);
        self.refresh_token = session.refresh_token.clone();
        let access = session.access_token.clone();
        self.session = Some(session);

        stored.write(&self.session_path).await?;
        tracing::debug!("Session persisted to {}", self.session_path.display());

        Ok(access)
    }
}
