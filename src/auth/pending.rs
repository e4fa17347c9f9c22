use super::{AuthAction, AuthKey, PENDING_TTL_SECS};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// One in-flight OTP challenge for an AuthKey.
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub action: AuthAction,
    pub attempts: u32,
    pub expires_at: DateTime<Utc>,
}

/// What a user's next OTP message should resolve: the challenge identity
/// plus the action to resume. At most one per user.
#[derive(Debug, Clone)]
pub struct WaitingState {
    pub phone: String,
    pub bank: String,
    pub account_id: String,
    pub action: AuthAction,
    pub expires_at: DateTime<Utc>,
}

impl WaitingState {
    pub fn key(&self) -> AuthKey {
        AuthKey::new(&self.bank, &self.phone, &self.account_id)
    }
}

/// Registry of pending OTP challenges plus the per-user waiting-state index.
///
/// Both maps hold at most one entry per key: opening a challenge for a key
/// that already has one replaces it (no queueing), and a user can only be
/// waiting on a single challenge at a time. Entries carry an expiry that is
/// enforced lazily on lookup, like the token cache.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    challenges: DashMap<AuthKey, PendingChallenge>,
    waiting: DashMap<String, WaitingState>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self {
            challenges: DashMap::new(),
            waiting: DashMap::new(),
        }
    }

    /// Record a pending challenge for `key`, replacing any prior one.
    pub fn open(&self, key: AuthKey, action: AuthAction) {
        self.challenges.insert(
            key,
            PendingChallenge {
                action,
                attempts: 0,
                expires_at: Utc::now() + Duration::seconds(PENDING_TTL_SECS),
            },
        );
    }

    /// Remove the pending challenge for `key` if present. No-op otherwise.
    pub fn close(&self, key: &AuthKey) {
        self.challenges.remove(key);
    }

    /// Current pending challenge for `key`, dropping it if expired.
    pub fn challenge(&self, key: &AuthKey) -> Option<PendingChallenge> {
        let expired = match self.challenges.get(key) {
            Some(c) if c.expires_at > Utc::now() => return Some(c.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.challenges.remove(key);
        }
        None
    }

    /// Bump the attempt counter for `key` and return the new count.
    /// Returns 0 if no live challenge exists for the key.
    pub fn note_attempt(&self, key: &AuthKey) -> u32 {
        match self.challenges.get_mut(key) {
            Some(mut c) if c.expires_at > Utc::now() => {
                c.attempts += 1;
                c.attempts
            }
            _ => 0,
        }
    }

    /// Link `user_id` to the challenge a follow-up OTP message should
    /// resolve. Replaces any prior waiting state for the user.
    pub fn set_waiting(&self, user_id: &str, phone: String, bank: String, account_id: String, action: AuthAction) {
        self.waiting.insert(
            user_id.to_string(),
            WaitingState {
                phone,
                bank,
                account_id,
                action,
                expires_at: Utc::now() + Duration::seconds(PENDING_TTL_SECS),
            },
        );
    }

    /// The user's waiting state, dropping it if expired.
    pub fn waiting(&self, user_id: &str) -> Option<WaitingState> {
        let expired = match self.waiting.get(user_id) {
            Some(w) if w.expires_at > Utc::now() => return Some(w.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.waiting.remove(user_id);
        }
        None
    }

    pub fn clear_waiting(&self, user_id: &str) {
        self.waiting.remove(user_id);
    }

    pub fn challenge_count(&self) -> usize {
        self.challenges.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }
}
