use secrecy::{ExposeSecret, SecretString};
use voicebridge_types::audio::Voice;

use crate::error::SessionError;

pub const DEFAULT_SESSIONS_URL: &str = "https://api.openai.com/v1/realtime/sessions";
pub const DEFAULT_NEGOTIATION_URL: &str = "https://api.openai.com/v1/realtime";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

/// Where to mint credentials and exchange session descriptions.
///
/// The long-lived API key never leaves this process; only the short-lived
/// credential minted per session is used to authorize the media leg.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    sessions_url: String,
    negotiation_url: String,
    api_key: SecretString,
    model: String,
}

impl EndpointConfig {
    pub fn new(api_key: &str) -> Self {
        Self {
            sessions_url: DEFAULT_SESSIONS_URL.to_string(),
            negotiation_url: DEFAULT_NEGOTIATION_URL.to_string(),
            api_key: SecretString::from(api_key.to_string()),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Reads the key from the `VOICEBRIDGE_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, SessionError> {
        let key = std::env::var("VOICEBRIDGE_API_KEY")
            .map_err(|_| SessionError::Credential("VOICEBRIDGE_API_KEY is not set".to_string()))?;
        Ok(Self::new(&key))
    }

    pub fn with_sessions_url(mut self, url: &str) -> Self {
        self.sessions_url = url.to_string();
        self
    }

    pub fn with_negotiation_url(mut self, url: &str) -> Self {
        self.negotiation_url = url.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Short-lived credential minted for a single session.
#[derive(Debug, Clone)]
pub struct EphemeralCredential {
    secret: SecretString,
    session_id: String,
}

impl EphemeralCredential {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub(crate) fn secret(&self) -> &SecretString {
        &self.secret
    }
}

/// Runs the two-phase negotiation: mint an ephemeral credential, then
/// trade a local session description for the remote answer.
#[derive(Debug, Clone)]
pub struct CredentialNegotiator {
    config: EndpointConfig,
    http: reqwest::Client,
}

impl CredentialNegotiator {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Mints a short-lived session credential for the given voice.
    pub async fn mint(&self, voice: &Voice) -> Result<EphemeralCredential, SessionError> {
        let payload = serde_json::json!({
            "model": self.config.model,
            "voice": voice.as_str(),
        });
        let response = self
            .http
            .post(&self.config.sessions_url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| SessionError::Credential(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Credential(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SessionError::Credential(e.to_string()))?;
        let secret = body
            .pointer("/client_secret/value")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                SessionError::Credential("response is missing client_secret.value".to_string())
            })?;
        let session_id = body
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        tracing::debug!(session_id, "minted ephemeral session credential");
        Ok(EphemeralCredential {
            secret: SecretString::from(secret.to_string()),
            session_id,
        })
    }

    /// Posts the local offer and returns the remote answer verbatim.
    pub async fn exchange_sdp(
        &self,
        credential: &EphemeralCredential,
        offer_sdp: &str,
    ) -> Result<String, SessionError> {
        let url = format!("{}?model={}", self.config.negotiation_url, self.config.model);
        let response = self
            .http
            .post(&url)
            .bearer_auth(credential.secret().expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Negotiation(format!(
                "negotiation endpoint returned {status}: {body}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))
    }
}
