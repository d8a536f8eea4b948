// src/google.rs
//
// Google OAuth code flow. Yields the principal `{uid, email, name}`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::identity::Principal;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const GOOGLE_SCOPES: &str = "openid email profile";
/// How long an issued `state` stays redeemable.
const STATE_TTL_MINUTES: i64 = 10;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    #[error("URL parsing error")]
    UrlParse(#[from] url::ParseError),

    #[error("Provider API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("Sign-in was refused by the provider: {0}")]
    Denied(String),

    #[error("OAuth state mismatch")]
    StateMismatch,

    #[error("Authorization code missing in callback")]
    MissingAuthCode,

    #[error("Provider did not return an email address")]
    MissingEmail,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthCallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

#[derive(Clone)]
pub struct GoogleProvider {
    http_client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    /// Issued states with their issue time; lapsed ones are pruned on insert.
    pending_states: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl GoogleProvider {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            client_id,
            client_secret,
            redirect_uri,
            pending_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Builds the consent URL and remembers its one-time `state`.
    pub async fn authorization_url(&self) -> Result<String, ProviderError> {
        let random_state: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();

        self.remember_state(&random_state, Utc::now()).await;

        let mut auth_url = Url::parse(GOOGLE_AUTH_URL)?;
        auth_url
            .query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", GOOGLE_SCOPES)
            .append_pair("state", &random_state)
            .append_pair("prompt", "select_account");

        Ok(auth_url.to_string())
    }

    /// Verifies the callback and exchanges its code for the principal.
    pub async fn complete(&self, params: AuthCallbackParams) -> Result<Principal, ProviderError> {
        if let Some(error) = params.error {
            let description = params.error_description.unwrap_or_default();
            return Err(ProviderError::Denied(format!("{} ({})", error, description)));
        }

        let state_known = match params.state.as_deref() {
            Some(received) => self.redeem_state(received, Utc::now()).await,
            None => false,
        };
        if !state_known {
            warn!("OAuth state mismatch occurred during callback.");
            return Err(ProviderError::StateMismatch);
        }

        let code = params.code.ok_or(ProviderError::MissingAuthCode)?;
        let access_token = self.exchange_code(&code).await?;
        let user_info = self.fetch_user_info(&access_token).await?;

        let email = user_info
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or(ProviderError::MissingEmail)?;

        info!("Provider authenticated subject {}", user_info.sub);
        Ok(Principal {
            uid: user_info.sub,
            email,
            name: user_info.name,
        })
    }

    async fn remember_state(&self, state: &str, issued_at: DateTime<Utc>) {
        let cutoff = issued_at - Duration::minutes(STATE_TTL_MINUTES);
        let mut pending = self.pending_states.lock().await;
        pending.retain(|_, issued| *issued > cutoff);
        pending.insert(state.to_string(), issued_at);
    }

    /// Consumes the state; true only if it was issued and has not lapsed.
    async fn redeem_state(&self, state: &str, now: DateTime<Utc>) -> bool {
        match self.pending_states.lock().await.remove(state) {
            Some(issued_at) => now - issued_at <= Duration::minutes(STATE_TTL_MINUTES),
            None => false,
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        let response = self
            .http_client
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message });
        }
        let token: GoogleTokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<GoogleUserInfo, ProviderError> {
        let response = self
            .http_client
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, message });
        }
        Ok(response.json().await?)
    }
}
