use crate::config::EbayConfig;
use crate::ebay::auth::TokenRefresher;
use crate::error::PublishError;
use crate::http::build_client;
use reqwest::{Client, Method, header};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Status + raw body of one marketplace call. The body is kept verbatim so
/// failures can surface it for diagnostics; `json()` is a lenient parse.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Thin authenticated wrapper over the REST marketplace.
///
/// Injects a freshly validated bearer token on every call and nothing else:
/// retry and error-interpretation policy belong to the pipeline.
pub struct RestApiGateway {
    config: Arc<EbayConfig>,
    refresher: Arc<TokenRefresher>,
    http: Client,
}

impl RestApiGateway {
    pub fn new(config: Arc<EbayConfig>, refresher: Arc<TokenRefresher>) -> Self {
        let http = build_client(config.http_timeouts);
        Self {
            config,
            refresher,
            http,
        }
    }

    pub async fn get(
        &self,
        user_id: i64,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResponse, PublishError> {
        self.request(Method::GET, user_id, path, params, None).await
    }

    pub async fn post(
        &self,
        user_id: i64,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, PublishError> {
        self.request(Method::POST, user_id, path, &[], body).await
    }

    pub async fn put(
        &self,
        user_id: i64,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, PublishError> {
        self.request(Method::PUT, user_id, path, &[], body).await
    }

    pub async fn delete(&self, user_id: i64, path: &str) -> Result<ApiResponse, PublishError> {
        self.request(Method::DELETE, user_id, path, &[], None).await
    }

    async fn request(
        &self,
        method: Method,
        user_id: i64,
        path: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<ApiResponse, PublishError> {
        let token = self.refresher.access_token(user_id).await?;
        let url = format!("{}{}", self.config.api_base, path);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, "application/json");
        if !params.is_empty() {
            request = request.query(params);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        debug!(
            target = "listbridge.ebay",
            %method,
            path,
            status,
            "marketplace_call"
        );
        Ok(ApiResponse { status, body })
    }
}
