//! HTTP client for the login, refresh and protected endpoints.
//!
//! Every call here is a single request/response. Retrying and falling back
//! between refresh and login is the job of `auth::TokenLifecycle`.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{TokenRecord, TokenStore, TokenTtl};
use crate::config::{Config, DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS};

use super::ApiError;

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    refresh_token: &'a str,
}

/// Body of a successful login or refresh.
///
/// The access token arrives as `accessToken` or, on some servers, `token`.
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(rename = "accessToken", default)]
    access_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<f64>,
    #[serde(default)]
    refresh_expires_in: Option<f64>,
}

impl TokenResponse {
    fn access_token(&self) -> Option<&str> {
        non_empty(&self.access_token).or_else(|| non_empty(&self.token))
    }

    fn refresh_token(&self) -> Option<&str> {
        non_empty(&self.refresh_token)
    }

    fn ttl(&self) -> TokenTtl {
        let secs = |value: Option<f64>, default: i64| value.map(|v| v as i64).unwrap_or(default);
        TokenTtl::new(
            secs(self.expires_in, DEFAULT_ACCESS_TTL_SECS),
            secs(self.refresh_expires_in, DEFAULT_REFRESH_TTL_SECS),
        )
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// API client bound to one base URL and one token file.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    config: Config,
    store: TokenStore,
}

impl ApiClient {
    pub fn new(config: Config) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let store = TokenStore::new(config.token_store.clone());

        Ok(Self {
            client,
            config,
            store,
        })
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Log in with a username and password and persist the issued tokens.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenRecord, ApiError> {
        let url = self.config.login_url();
        debug!(url = %url, username = username, "Logging in");

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let tokens = Self::token_response(response).await?;
        let refresh_token = tokens
            .refresh_token()
            .unwrap_or(self.config.default_refresh_token.as_str());

        let record = self.persist(&tokens, refresh_token)?;
        info!(username = username, "Logged in");
        Ok(record)
    }

    /// Log in with the credentials from the configuration
    pub async fn login_with_configured_credentials(&self) -> Result<TokenRecord, ApiError> {
        let credentials = self
            .config
            .credentials
            .as_ref()
            .ok_or(ApiError::MissingCredentials)?;
        self.login(&credentials.username, &credentials.password).await
    }

    /// Trade the stored refresh token for a new access token.
    ///
    /// Fails without contacting the server when there is no usable refresh
    /// token.
    pub async fn refresh_access_token(&self) -> Result<TokenRecord, ApiError> {
        let current = self.store.load();
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or(ApiError::RefreshTokenMissing)?;
        if current.is_refresh_expired() {
            return Err(ApiError::RefreshTokenExpired);
        }

        let url = self.config.refresh_url();
        debug!(url = %url, "Refreshing access token");

        let response = self
            .client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let tokens = Self::token_response(response).await?;
        let next_refresh = tokens.refresh_token().unwrap_or(refresh_token);

        let record = self.persist(&tokens, next_refresh)?;
        info!("Access token refreshed");
        Ok(record)
    }

    /// Fetch the protected resource once with the stored access token.
    ///
    /// A missing access token is reported as `Unauthorized` without sending
    /// anything.
    pub async fn get_protected_data(&self) -> Result<Value, ApiError> {
        let record = self.store.load();
        let Some(access_token) = record.access_token else {
            warn!("No access token stored");
            return Err(ApiError::Unauthorized);
        };

        let url = self.config.protected_url();
        debug!(url = %url, "Fetching protected data");

        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(ApiError::from_status(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            ApiError::InvalidResponse(format!("Protected data is not JSON: {}", e))
        })
    }

    async fn token_response(response: reqwest::Response) -> Result<TokenResponse, ApiError> {
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(ApiError::rejected(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse token response: {}", e)))
    }

    fn persist(&self, tokens: &TokenResponse, refresh_token: &str) -> Result<TokenRecord, ApiError> {
        let access_token = tokens.access_token().ok_or_else(|| {
            ApiError::InvalidResponse("Token response carries no access token".to_string())
        })?;
        Ok(self.store.save(access_token, refresh_token, tokens.ttl())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> TokenResponse {
        serde_json::from_str(json).expect("Failed to parse token response test JSON")
    }

    #[test]
    fn test_access_token_field_variants() {
        assert_eq!(parse(r#"{"accessToken": "a"}"#).access_token(), Some("a"));
        assert_eq!(parse(r#"{"token": "t"}"#).access_token(), Some("t"));
        assert_eq!(parse(r#"{"accessToken": "a", "token": "t"}"#).access_token(), Some("a"));
        assert_eq!(parse(r#"{"accessToken": "", "token": "t"}"#).access_token(), Some("t"));
        assert_eq!(parse(r#"{"accessToken": null}"#).access_token(), None);
        assert_eq!(parse(r#"{}"#).access_token(), None);
    }

    #[test]
    fn test_refresh_token_empty_is_absent() {
        assert_eq!(parse(r#"{"refreshToken": "r"}"#).refresh_token(), Some("r"));
        assert_eq!(parse(r#"{"refreshToken": ""}"#).refresh_token(), None);
        assert_eq!(parse(r#"{}"#).refresh_token(), None);
    }

    #[test]
    fn test_ttl_defaults_and_overrides() {
        assert_eq!(parse(r#"{}"#).ttl(), TokenTtl::default());
        assert_eq!(
            parse(r#"{"expires_in": 60, "refresh_expires_in": 600.0}"#).ttl(),
            TokenTtl::new(60, 600)
        );
        assert_eq!(
            parse(r#"{"expires_in": null}"#).ttl(),
            TokenTtl::default()
        );
    }

    #[test]
    fn test_ignores_unknown_fields() {
        let tokens = parse(
            r#"{"id": 1, "username": "emilys", "accessToken": "a", "refreshToken": "r", "email": "e@x"}"#,
        );
        assert_eq!(tokens.access_token(), Some("a"));
        assert_eq!(tokens.refresh_token(), Some("r"));
    }
}
