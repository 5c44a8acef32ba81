//! tokenkeeper-core - token store, lifecycle and API client.
//!
//! Keeps one access/refresh token pair for one HTTP API in a local JSON
//! file, refreshing or logging in again as the tokens expire.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiClient, ApiError};
pub use auth::{
    FetchReport, LoginReason, StartupAction, StartupOutcome, StoreError, TokenLifecycle,
    TokenRecord, TokenStore, TokenTtl,
};
pub use config::Config;
