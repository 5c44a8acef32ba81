use chrono::{DateTime, Duration, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// Value of the `id` field of the token file
const RECORD_ID: &str = "tokens";

/// Naive ISO-8601 layout written by older tooling (no UTC offset)
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// The token pair currently in use plus the generation it replaced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenRecord {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token_expiry: Option<DateTime<Utc>>,
    pub refresh_token_expiry: Option<DateTime<Utc>>,
    pub previous: PreviousTokens,
}

/// Values of the record before its last overwrite, kept verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviousTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token_expiry: Option<String>,
    pub refresh_token_expiry: Option<String>,
}

impl TokenRecord {
    /// Both token strings are present
    pub fn has_tokens(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }

    pub fn is_access_expired(&self) -> bool {
        self.is_access_expired_at(Utc::now())
    }

    /// An absent token or expiry counts as expired.
    pub fn is_access_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.access_token.as_deref(), self.access_token_expiry, now)
    }

    pub fn is_refresh_expired(&self) -> bool {
        self.is_refresh_expired_at(Utc::now())
    }

    pub fn is_refresh_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.refresh_token.as_deref(), self.refresh_token_expiry, now)
    }

    /// Time left on the access token, if it is still valid
    pub fn remaining_access(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_access_expired_at(now) {
            return None;
        }
        self.access_token_expiry.map(|expiry| expiry - now)
    }
}

fn is_expired(token: Option<&str>, expiry: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match (token, expiry) {
        (Some(_), Some(expiry)) => now >= expiry,
        _ => true,
    }
}

/// On-disk layout of the token file.
///
/// Every field tolerates being absent so that partially written or
/// hand-edited files still load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoredTokens {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub access_token_expiry: Option<String>,
    #[serde(default)]
    pub refresh_token_expiry: Option<String>,
    #[serde(default)]
    pub old_access_token: Option<String>,
    #[serde(default)]
    pub old_refresh_token: Option<String>,
    #[serde(default)]
    pub old_access_token_expiry: Option<String>,
    #[serde(default)]
    pub old_refresh_token_expiry: Option<String>,
}

impl StoredTokens {
    /// Build the next generation, shifting the current values of `prior`
    /// into the `old_*` fields.
    pub fn next_generation(
        prior: &StoredTokens,
        access_token: String,
        refresh_token: String,
        access_token_expiry: DateTime<Utc>,
        refresh_token_expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Some(RECORD_ID.to_string()),
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            access_token_expiry: Some(format_timestamp(access_token_expiry)),
            refresh_token_expiry: Some(format_timestamp(refresh_token_expiry)),
            old_access_token: prior.access_token.clone(),
            old_refresh_token: prior.refresh_token.clone(),
            old_access_token_expiry: prior.access_token_expiry.clone(),
            old_refresh_token_expiry: prior.refresh_token_expiry.clone(),
        }
    }

    pub fn into_record(self) -> Result<TokenRecord, StoreError> {
        Ok(TokenRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            access_token_expiry: parse_optional("access_token_expiry", self.access_token_expiry)?,
            refresh_token_expiry: parse_optional("refresh_token_expiry", self.refresh_token_expiry)?,
            previous: PreviousTokens {
                access_token: self.old_access_token,
                refresh_token: self.old_refresh_token,
                access_token_expiry: self.old_access_token_expiry,
                refresh_token_expiry: self.old_refresh_token_expiry,
            },
        })
    }
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_optional(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => parse_timestamp(raw)
            .map(Some)
            .ok_or_else(|| StoreError::InvalidTimestamp {
                field,
                value: raw.to_string(),
            }),
    }
}

/// Parse an RFC 3339 timestamp, or a naive one interpreted as local time.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}
