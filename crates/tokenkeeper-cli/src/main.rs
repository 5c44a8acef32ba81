//! tokenkeeper - keeps an access/refresh token pair fresh.
//!
//! Running the binary checks the stored tokens, logs in or refreshes as
//! needed, then fetches the protected resource once to prove the tokens
//! work. Configuration comes from the environment or a `.env` file.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tokenkeeper_core::{
    ApiClient, Config, FetchReport, LoginReason, StartupAction, StartupOutcome, TokenLifecycle,
};

/// File name used when logging to `LOG_DIR`
const LOG_FILE: &str = "tokenkeeper.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, filtered by `RUST_LOG` (default `warn`). With a log
/// directory, everything that passes the filter is also appended to a file.
fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(log_file_appender(dir)?);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

/// Open `LOG_FILE` in `dir`, creating the directory if needed
fn log_file_appender(dir: &Path) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE)
        .build(dir)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    let _guard = init_tracing(config.as_ref().ok().and_then(|c| c.log_dir.as_deref()))?;
    let config = config.context("Failed to load configuration")?;

    run(config, &mut io::stdout()).await
}

/// Startup decision, then one protected fetch, with status lines on `out`.
///
/// An unrecognized status from the protected endpoint is reported but is
/// not an error.
async fn run<W: Write>(config: Config, out: &mut W) -> Result<()> {
    info!(
        base_url = %config.base_url,
        token_store = %config.token_store.display(),
        "tokenkeeper starting"
    );

    let client = ApiClient::new(config).context("Failed to build HTTP client")?;
    let lifecycle = TokenLifecycle::new(client);

    let action = lifecycle.decide();
    writeln!(out, "{}", describe_action(action))?;

    let outcome = lifecycle
        .apply(action)
        .await
        .context("Could not obtain valid tokens")?;
    if let Some(line) = describe_outcome(&outcome) {
        writeln!(out, "{}", line)?;
    }

    let record = lifecycle.client().store().load();
    if let Some(remaining) = record.remaining_access(Utc::now()) {
        writeln!(out, "Access token valid for {} more minute(s).", remaining.num_minutes())?;
    }

    // Always fetch, even right after a login: it proves the tokens work
    match lifecycle.fetch_protected_data(&outcome).await {
        Ok(report) => print_report(out, &report)?,
        Err(e) if e.is_unrecognized() => {
            error!(error = %e, "Protected endpoint returned an unexpected status");
            writeln!(out, "Unknown error: {}", e)?;
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Failed to fetch protected data")),
    }

    info!("tokenkeeper done");
    Ok(())
}

fn describe_action(action: StartupAction) -> &'static str {
    match action {
        StartupAction::Login(LoginReason::NoTokens) => "No tokens found. Logging in...",
        StartupAction::Login(LoginReason::RefreshExpired) => {
            "Refresh token expired. Logging in again..."
        }
        StartupAction::Refresh => "Access token expired. Refreshing...",
        StartupAction::UseStored => "Tokens valid.",
    }
}

fn describe_outcome(outcome: &StartupOutcome) -> Option<String> {
    match outcome {
        StartupOutcome::LoggedIn(_) => Some("Logged in.".to_string()),
        StartupOutcome::Refreshed => Some("Access token refreshed.".to_string()),
        StartupOutcome::RefreshFellBack(e) if e.is_authentication() => {
            Some(format!("Refresh token not accepted ({}). Logged in instead.", e))
        }
        StartupOutcome::RefreshFellBack(e) => {
            Some(format!("Refresh failed ({}). Logged in instead.", e))
        }
        StartupOutcome::Valid => None,
    }
}

fn print_report<W: Write>(out: &mut W, report: &FetchReport) -> Result<()> {
    match (report.refresh_attempted, report.logged_in) {
        (_, true) => writeln!(out, "Access token was rejected. Logged in again.")?,
        (true, false) => writeln!(out, "Access token was rejected. Refreshed it.")?,
        (false, false) => {}
    }
    writeln!(out, "Protected data:")?;
    writeln!(out, "{}", serde_json::to_string_pretty(&report.data)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::TempDir;
    use tokenkeeper_core::ApiError;

    fn config(server: &MockServer, dir: &TempDir) -> Config {
        Config::new(server.base_url())
            .with_credentials("emilys", "emilyspass")
            .with_token_store(dir.path().join("token_store.json"))
    }

    async fn mock_login(server: &MockServer) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(POST).path("/auth/login");
                then.status(200)
                    .json_body(json!({ "accessToken": "access-1", "refreshToken": "refresh-1" }));
            })
            .await
    }

    #[test]
    fn test_describe_action() {
        assert_eq!(
            describe_action(StartupAction::Login(LoginReason::NoTokens)),
            "No tokens found. Logging in..."
        );
        assert_eq!(describe_action(StartupAction::UseStored), "Tokens valid.");
    }

    #[test]
    fn test_describe_outcome() {
        assert_eq!(describe_outcome(&StartupOutcome::Valid), None);
        assert_eq!(
            describe_outcome(&StartupOutcome::Refreshed).as_deref(),
            Some("Access token refreshed.")
        );

        let rejected = StartupOutcome::RefreshFellBack(ApiError::RefreshTokenMissing);
        assert_eq!(
            describe_outcome(&rejected).as_deref(),
            Some("Refresh token not accepted (Refresh token is missing). Logged in instead.")
        );

        let broken = StartupOutcome::RefreshFellBack(ApiError::InvalidResponse("no body".into()));
        let line = describe_outcome(&broken).unwrap();
        assert!(line.starts_with("Refresh failed ("), "{}", line);
    }

    #[test]
    fn test_log_file_appender_reports_unusable_dir() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "").unwrap();

        let err = log_file_appender(&file.join("logs")).unwrap_err();
        assert!(err.to_string().contains("Failed to open log file"));
    }

    #[test]
    fn test_log_file_appender_creates_dir() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        assert!(log_file_appender(&logs).is_ok());
        assert!(logs.is_dir());
    }

    #[tokio::test]
    async fn test_run_logs_in_and_prints_protected_data() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        let login = mock_login(&server).await;
        let me = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/auth/me")
                    .header("Authorization", "Bearer access-1");
                then.status(200).json_body(json!({ "username": "emilys" }));
            })
            .await;

        let mut out = Vec::new();
        run(config(&server, &dir), &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("No tokens found. Logging in..."));
        assert!(out.contains("Logged in."));
        assert!(out.contains("Protected data:"));
        assert!(out.contains("\"username\": \"emilys\""));
        login.assert_async().await;
        me.assert_async().await;
    }

    #[tokio::test]
    async fn test_run_reports_unrecognized_status_without_failing() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        let login = mock_login(&server).await;
        let me = server
            .mock_async(|when, then| {
                when.method(GET).path("/auth/me");
                then.status(503).body("maintenance");
            })
            .await;

        let mut out = Vec::new();
        run(config(&server, &dir), &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("Unknown error:"));
        assert!(out.contains("maintenance"));
        assert!(!out.contains("Protected data:"));
        assert_eq!(login.hits_async().await, 1);
        assert_eq!(me.hits_async().await, 1);
    }

    #[tokio::test]
    async fn test_run_fails_when_login_fails() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        server
            .mock_async(|when, then| {
                when.method(POST).path("/auth/login");
                then.status(400).json_body(json!({ "message": "Invalid credentials" }));
            })
            .await;
        let me = server
            .mock_async(|when, then| {
                when.method(GET).path("/auth/me");
                then.status(200).json_body(json!({}));
            })
            .await;

        let mut out = Vec::new();
        let err = run(config(&server, &dir), &mut out).await.unwrap_err();
        assert!(err.to_string().contains("Could not obtain valid tokens"));
        assert_eq!(me.hits_async().await, 0);
    }
}
