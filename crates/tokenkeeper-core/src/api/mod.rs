//! REST client for the authentication API.
//!
//! Three endpoints hang off the configured base URL: `/auth/login`,
//! `/auth/refresh` and the protected `/auth/me`, which takes the access
//! token as a bearer credential.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
