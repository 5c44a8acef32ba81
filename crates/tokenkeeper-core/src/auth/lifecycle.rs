//! Startup decision and the bounded 401 recovery loop.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};

use super::TokenRecord;

/// Why a fresh login is needed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginReason {
    NoTokens,
    RefreshExpired,
}

/// What to do with the stored tokens before fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupAction {
    Login(LoginReason),
    Refresh,
    UseStored,
}

impl StartupAction {
    /// Rules are evaluated in order: missing tokens, expired refresh token,
    /// expired access token.
    pub fn decide(record: &TokenRecord, now: DateTime<Utc>) -> Self {
        if !record.has_tokens() {
            StartupAction::Login(LoginReason::NoTokens)
        } else if record.is_refresh_expired_at(now) {
            StartupAction::Login(LoginReason::RefreshExpired)
        } else if record.is_access_expired_at(now) {
            StartupAction::Refresh
        } else {
            StartupAction::UseStored
        }
    }
}

/// Result of applying a `StartupAction`
#[derive(Debug)]
pub enum StartupOutcome {
    LoggedIn(LoginReason),
    Refreshed,
    /// The refresh failed with the given error and a login replaced it
    RefreshFellBack(ApiError),
    Valid,
}

impl StartupOutcome {
    /// True when startup ended with a password login
    pub fn logged_in(&self) -> bool {
        matches!(
            self,
            StartupOutcome::LoggedIn(_) | StartupOutcome::RefreshFellBack(_)
        )
    }
}

/// Successful protected fetch and what it took to get there
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    pub data: Value,
    /// A refresh was tried, whether or not it succeeded
    pub refresh_attempted: bool,
    /// A login happened inside the fetch, not counting one at startup
    pub logged_in: bool,
}

#[derive(Debug)]
enum FetchState {
    Fetching,
    Refreshing,
    LoggingIn,
    Done(Value),
    Fatal(ApiError),
}

pub struct TokenLifecycle {
    client: ApiClient,
}

impl TokenLifecycle {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn is_access_expired(&self) -> bool {
        self.client.store().load().is_access_expired()
    }

    pub fn is_refresh_expired(&self) -> bool {
        self.client.store().load().is_refresh_expired()
    }

    /// Decide from the stored record and the current time
    pub fn decide(&self) -> StartupAction {
        StartupAction::decide(&self.client.store().load(), Utc::now())
    }

    /// Carry out a startup action. Only a failed login is an error.
    pub async fn apply(&self, action: StartupAction) -> Result<StartupOutcome, ApiError> {
        debug!(?action, "Applying startup action");
        match action {
            StartupAction::Login(reason) => {
                self.client.login_with_configured_credentials().await?;
                Ok(StartupOutcome::LoggedIn(reason))
            }
            StartupAction::Refresh => match self.client.refresh_access_token().await {
                Ok(_) => Ok(StartupOutcome::Refreshed),
                Err(e) => {
                    warn!(error = %e, "Refresh failed, logging in instead");
                    self.client.login_with_configured_credentials().await?;
                    Ok(StartupOutcome::RefreshFellBack(e))
                }
            },
            StartupAction::UseStored => Ok(StartupOutcome::Valid),
        }
    }

    /// Decide and apply in one step
    pub async fn ensure_valid(&self) -> Result<StartupOutcome, ApiError> {
        self.apply(self.decide()).await
    }

    /// Fetch the protected resource, recovering from a 401.
    ///
    /// A 401 first triggers a refresh, then a login if the refresh fails or
    /// the retried fetch is rejected again. There is at most one login per
    /// run, counting one done at startup: once logged in, a 401 gets a
    /// single refresh and retry, and a second 401 is final.
    pub async fn fetch_protected_data(
        &self,
        startup: &StartupOutcome,
    ) -> Result<FetchReport, ApiError> {
        let mut fresh_login = startup.logged_in();
        let mut refresh_attempted = false;
        let mut logged_in = false;
        let mut state = FetchState::Fetching;

        loop {
            state = match state {
                FetchState::Fetching => match self.client.get_protected_data().await {
                    Ok(data) => FetchState::Done(data),
                    Err(ApiError::Unauthorized) if fresh_login && refresh_attempted => {
                        FetchState::Fatal(ApiError::UnauthorizedAfterLogin)
                    }
                    Err(ApiError::Unauthorized) if refresh_attempted => {
                        warn!("Still unauthorized after refresh");
                        FetchState::LoggingIn
                    }
                    Err(ApiError::Unauthorized) => {
                        warn!(fresh_login, "Access token rejected, trying refresh");
                        FetchState::Refreshing
                    }
                    Err(e) => FetchState::Fatal(e),
                },
                FetchState::Refreshing => {
                    refresh_attempted = true;
                    match self.client.refresh_access_token().await {
                        Ok(_) => FetchState::Fetching,
                        Err(e) if fresh_login => {
                            warn!(error = %e, "Refresh failed right after a login");
                            FetchState::Fatal(ApiError::UnauthorizedAfterLogin)
                        }
                        Err(e) => {
                            warn!(error = %e, "Refresh failed, logging in");
                            FetchState::LoggingIn
                        }
                    }
                }
                FetchState::LoggingIn => {
                    fresh_login = true;
                    logged_in = true;
                    match self.client.login_with_configured_credentials().await {
                        Ok(_) => FetchState::Fetching,
                        Err(e) => FetchState::Fatal(e),
                    }
                }
                FetchState::Done(data) => {
                    info!(refresh_attempted, logged_in, "Protected data fetched");
                    return Ok(FetchReport {
                        data,
                        refresh_attempted,
                        logged_in,
                    });
                }
                FetchState::Fatal(e) => return Err(e),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(
        access: Option<&str>,
        refresh: Option<&str>,
        access_expiry: Option<DateTime<Utc>>,
        refresh_expiry: Option<DateTime<Utc>>,
    ) -> TokenRecord {
        TokenRecord {
            access_token: access.map(String::from),
            refresh_token: refresh.map(String::from),
            access_token_expiry: access_expiry,
            refresh_token_expiry: refresh_expiry,
            ..Default::default()
        }
    }

    #[test]
    fn test_decide_no_tokens() {
        let now = Utc::now();
        let future = Some(now + Duration::hours(1));
        assert_eq!(
            StartupAction::decide(&TokenRecord::default(), now),
            StartupAction::Login(LoginReason::NoTokens)
        );
        assert_eq!(
            StartupAction::decide(&record(Some("a"), None, future, future), now),
            StartupAction::Login(LoginReason::NoTokens)
        );
        assert_eq!(
            StartupAction::decide(&record(None, Some("r"), future, future), now),
            StartupAction::Login(LoginReason::NoTokens)
        );
    }

    #[test]
    fn test_decide_refresh_expired_wins_over_access_expired() {
        let now = Utc::now();
        let past = Some(now - Duration::minutes(10));
        assert_eq!(
            StartupAction::decide(&record(Some("a"), Some("r"), past, past), now),
            StartupAction::Login(LoginReason::RefreshExpired)
        );
        assert_eq!(
            StartupAction::decide(&record(Some("a"), Some("r"), past, None), now),
            StartupAction::Login(LoginReason::RefreshExpired)
        );
    }

    #[test]
    fn test_decide_refresh() {
        let now = Utc::now();
        assert_eq!(
            StartupAction::decide(
                &record(
                    Some("a"),
                    Some("r"),
                    Some(now - Duration::minutes(10)),
                    Some(now + Duration::hours(1))
                ),
                now
            ),
            StartupAction::Refresh
        );
    }

    #[test]
    fn test_startup_outcome_logged_in() {
        assert!(StartupOutcome::LoggedIn(LoginReason::NoTokens).logged_in());
        assert!(StartupOutcome::RefreshFellBack(ApiError::RefreshTokenExpired).logged_in());
        assert!(!StartupOutcome::Refreshed.logged_in());
        assert!(!StartupOutcome::Valid.logged_in());
    }

    #[test]
    fn test_decide_use_stored() {
        let now = Utc::now();
        assert_eq!(
            StartupAction::decide(
                &record(
                    Some("a"),
                    Some("r"),
                    Some(now + Duration::minutes(10)),
                    Some(now + Duration::hours(1))
                ),
                now
            ),
            StartupAction::UseStored
        );
    }
}
