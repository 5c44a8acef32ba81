//! Token persistence and lifecycle.
//!
//! This module provides:
//! - `TokenStore`: the plaintext JSON file holding the current token pair
//!   and the generation it replaced
//! - `TokenLifecycle`: the startup decision (login, refresh or keep) and the
//!   bounded 401 recovery around the protected fetch

mod error;
pub mod lifecycle;
pub mod record;
pub mod store;

pub use error::StoreError;
pub use lifecycle::{FetchReport, LoginReason, StartupAction, StartupOutcome, TokenLifecycle};
pub use record::{PreviousTokens, TokenRecord};
pub use store::{TokenStore, TokenTtl};
