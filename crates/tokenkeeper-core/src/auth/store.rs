use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use super::record::StoredTokens;
use super::{StoreError, TokenRecord};
use crate::config::{DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS};

/// Upper bound on any lifetime, keeps expiry arithmetic in range (10 years)
const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Lifetimes, in seconds, of a freshly issued token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtl {
    pub access_secs: i64,
    pub refresh_secs: i64,
}

impl Default for TokenTtl {
    fn default() -> Self {
        Self {
            access_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_secs: DEFAULT_REFRESH_TTL_SECS,
        }
    }
}

impl TokenTtl {
    pub fn new(access_secs: i64, refresh_secs: i64) -> Self {
        Self {
            access_secs: access_secs.clamp(0, MAX_TTL_SECS),
            refresh_secs: refresh_secs.clamp(0, MAX_TTL_SECS),
        }
    }
}

/// Plaintext JSON file holding the single token record.
///
/// There is no locking: two processes saving at the same time may lose
/// one of the writes.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, falling back to an all-absent record when the file
    /// is missing, empty or unreadable.
    pub fn load(&self) -> TokenRecord {
        match self.read().and_then(StoredTokens::into_record) {
            Ok(record) => record,
            Err(e) if e.is_absent() => {
                debug!(path = %self.path.display(), reason = %e, "No stored tokens");
                TokenRecord::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable token file");
                TokenRecord::default()
            }
        }
    }

    /// Overwrite the record with a new token pair.
    ///
    /// Expiries are computed from the current time. Whatever the file held
    /// before becomes the previous generation; a missing or corrupt file
    /// just means there is none.
    pub fn save(
        &self,
        access_token: &str,
        refresh_token: &str,
        ttl: TokenTtl,
    ) -> Result<TokenRecord, StoreError> {
        let now = Utc::now();
        let prior = self.read().unwrap_or_else(|e| {
            if !e.is_absent() {
                debug!(error = %e, "Discarding previous token generation");
            }
            StoredTokens::default()
        });

        let ttl = TokenTtl::new(ttl.access_secs, ttl.refresh_secs);
        let next = StoredTokens::next_generation(
            &prior,
            access_token.to_string(),
            refresh_token.to_string(),
            now + Duration::seconds(ttl.access_secs),
            now + Duration::seconds(ttl.refresh_secs),
        );

        self.write(&next)?;
        debug!(
            path = %self.path.display(),
            access_ttl = ttl.access_secs,
            refresh_ttl = ttl.refresh_secs,
            "Saved token pair"
        );

        next.into_record()
    }

    fn read(&self) -> Result<StoredTokens, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(StoreError::Missing),
            Err(e) => return Err(StoreError::Read(e)),
        };
        if contents.trim().is_empty() {
            return Err(StoreError::Empty);
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write(&self, stored: &StoredTokens) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(StoreError::Write)?;
            }
        }
        let contents = serde_json::to_string_pretty(stored)?;

        // Tokens are stored in plaintext; at least keep them private to the user
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path).map_err(StoreError::Write)?;

        // `mode` only applies to newly created files
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(StoreError::Write)?;
        }

        file.write_all(contents.as_bytes()).map_err(StoreError::Write)?;
        file.sync_all().map_err(StoreError::Write)?;

        Ok(())
    }
}
