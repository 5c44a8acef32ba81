//! Application configuration.
//!
//! Configuration is read once from the environment (a `.env` file is loaded
//! by the binary beforehand) and passed to every component that needs it.
//! The API base URL is required; credentials are only needed when a login
//! actually happens.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default location of the token file, relative to the working directory
const DEFAULT_TOKEN_STORE: &str = "./token_store.json";

/// Refresh token stored when the login response does not carry one
const DEFAULT_REFRESH_TOKEN: &str = "dummy_refresh_token";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Access token lifetime used when the server sends no `expires_in`
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 3600;

/// Refresh token lifetime used when the server sends no `refresh_expires_in`
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 86400;

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";
const PROTECTED_PATH: &str = "/auth/me";

/// Username/password pair for the fallback login.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub credentials: Option<Credentials>,
    pub token_store: PathBuf,
    pub default_refresh_token: String,
    pub request_timeout: Duration,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Build a configuration with defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(&base_url.into()),
            credentials: None,
            token_store: PathBuf::from(DEFAULT_TOKEN_STORE),
            default_refresh_token: DEFAULT_REFRESH_TOKEN.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            log_dir: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_token_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_store = path.into();
        self
    }

    pub fn with_default_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.default_refresh_token = token.into();
        self
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// `DUMMY_`-prefixed names win over the plain ones so that existing
    /// `.env` files keep working.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(*name))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };

        let base_url = get(&["DUMMY_BASE_URL", "BASE_URL"])
            .context("BASE_URL is not set")?;
        let mut config = Self::new(base_url);

        let username = get(&["DUMMY_USERNAME", "USERNAME"]);
        let password = get(&["DUMMY_PASSWORD", "PASSWORD"]);
        if let (Some(username), Some(password)) = (username, password) {
            config = config.with_credentials(username, password);
        }

        if let Some(path) = get(&["TOKEN_STORE"]) {
            config.token_store = PathBuf::from(path);
        }
        if let Some(token) = get(&["DEFAULT_REFRESH_TOKEN"]) {
            config.default_refresh_token = token;
        }
        if let Some(secs) = get(&["REQUEST_TIMEOUT_SECS"]) {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("REQUEST_TIMEOUT_SECS is not a number: {}", secs))?;
            config.request_timeout = Duration::from_secs(secs);
        }
        config.log_dir = get(&["LOG_DIR"]).map(PathBuf::from);

        Ok(config)
    }

    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url, LOGIN_PATH)
    }

    pub fn refresh_url(&self) -> String {
        format!("{}{}", self.base_url, REFRESH_PATH)
    }

    pub fn protected_url(&self) -> String {
        format!("{}{}", self.base_url, PROTECTED_PATH)
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
