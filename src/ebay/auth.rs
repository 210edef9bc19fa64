use crate::config::EbayConfig;
use crate::error::PublishError;
use crate::http::build_client;
use crate::models::{Marketplace, MarketplaceCredential};
use crate::store::CredentialStore;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// A stored token within this margin of expiry is treated as stale and
/// refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 5 * 60;

/// Owns the access/refresh-token lifecycle for the REST marketplace.
///
/// This is the single choke point between stored credentials and every
/// outbound API call: a token is never handed out without re-validating
/// freshness first. The cheap path (token comfortably inside its lifetime)
/// performs no network call and takes no lock.
pub struct TokenRefresher {
    config: Arc<EbayConfig>,
    store: Arc<dyn CredentialStore>,
    http: Client,
    refresh_gate: Mutex<()>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "TokenResponse::default_expires_in")]
    expires_in: i64,
}

impl TokenResponse {
    fn default_expires_in() -> i64 {
        7200
    }
}

#[derive(Deserialize)]
struct ConnectResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "TokenResponse::default_expires_in")]
    expires_in: i64,
}

impl TokenRefresher {
    pub fn new(config: Arc<EbayConfig>, store: Arc<dyn CredentialStore>) -> Self {
        let http = build_client(config.http_timeouts);
        Self {
            config,
            store,
            http,
            refresh_gate: Mutex::new(()),
        }
    }

    /// Return an access token guaranteed fresh for at least the safety
    /// margin, refreshing and persisting a new one when necessary.
    pub async fn access_token(&self, user_id: i64) -> Result<String, PublishError> {
        let credential = self.load(user_id).await?;
        if let Some(token) = fresh_token(&credential) {
            return Ok(token);
        }

        let _guard = self.refresh_gate.lock().await;
        // A concurrent caller may have refreshed while we waited on the gate.
        let credential = self.load(user_id).await?;
        if let Some(token) = fresh_token(&credential) {
            return Ok(token);
        }
        self.refresh(user_id, credential).await
    }

    /// Authorization-code exchange for the connect flow: trade the callback
    /// code for a token pair and persist it as the user's credential.
    pub async fn connect(
        &self,
        user_id: i64,
        code: &str,
        redirect_uri: &str,
    ) -> Result<(), PublishError> {
        let response = self
            .http
            .post(self.config.token_url())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(PublishError::ConnectFailed { status, body });
        }
        let payload: ConnectResponse = serde_json::from_str(&body)
            .map_err(|err| PublishError::ConnectFailed {
                status,
                body: format!("unparseable token response: {err}"),
            })?;

        let credential = MarketplaceCredential {
            access_token: Some(payload.access_token),
            refresh_token: payload.refresh_token,
            expires_at: Some(Utc::now() + Duration::seconds(payload.expires_in)),
            ..Default::default()
        };
        self.store
            .save_credential(user_id, Marketplace::Ebay, credential)
            .await?;
        info!(target = "listbridge.ebay", user_id, "account_connected");
        Ok(())
    }

    async fn load(&self, user_id: i64) -> Result<MarketplaceCredential, PublishError> {
        match self.store.get_credential(user_id, Marketplace::Ebay).await? {
            Some(credential) if credential.access_token.is_some() => Ok(credential),
            _ => Err(PublishError::NotConnected),
        }
    }

    async fn refresh(
        &self,
        user_id: i64,
        mut credential: MarketplaceCredential,
    ) -> Result<String, PublishError> {
        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or(PublishError::NoRefreshToken)?;

        let response = self
            .http
            .post(self.config.token_url())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(PublishError::RefreshFailed { status, body });
        }

        let payload: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| PublishError::RefreshFailed {
                status,
                body: format!("unparseable token response: {err}"),
            })?;

        // Token and expiry are persisted together, before the token is
        // handed out, so `expires_at` always describes the stored token.
        credential.access_token = Some(payload.access_token.clone());
        credential.expires_at = Some(Utc::now() + Duration::seconds(payload.expires_in));
        self.store
            .save_credential(user_id, Marketplace::Ebay, credential)
            .await?;

        info!(
            target = "listbridge.ebay",
            user_id,
            expires_in = payload.expires_in,
            "access_token_refreshed"
        );
        Ok(payload.access_token)
    }
}

fn fresh_token(credential: &MarketplaceCredential) -> Option<String> {
    let expires_at = credential.expires_at?;
    if expires_at > Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) {
        credential.access_token.clone()
    } else {
        None
    }
}
