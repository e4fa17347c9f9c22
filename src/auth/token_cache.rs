use super::AuthKey;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// A short-lived authorization token issued by the hub after OTP
/// verification. The token string is opaque; only the expiry matters here.
#[derive(Debug, Clone)]
struct TokenRecord {
    token: String,
    expires_at: DateTime<Utc>,
}

/// In-memory store of authorization tokens keyed by (bank, phone, account).
///
/// Expired records are purged lazily on lookup, never by a background
/// sweeper. Lifecycle is process lifetime; nothing survives a restart.
#[derive(Debug, Default)]
pub struct TokenCache {
    records: DashMap<AuthKey, TokenRecord>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Return the token for `key` if present and unexpired. An expired
    /// record found here is deleted as a side effect.
    pub fn get(&self, key: &AuthKey) -> Option<String> {
        let expired = match self.records.get(key) {
            Some(rec) if rec.expires_at > Utc::now() => return Some(rec.token.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.records.remove(key);
        }
        None
    }

    /// Unconditionally overwrite any record for `key`. The token is stored
    /// as-is; the hub owns its format.
    pub fn put(&self, key: AuthKey, token: String, ttl_seconds: i64) {
        self.records.insert(
            key,
            TokenRecord {
                token,
                expires_at: Utc::now() + Duration::seconds(ttl_seconds),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
