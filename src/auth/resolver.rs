//! Action resolver: the per-key UNAUTHORIZED -> CHALLENGED -> AUTHORIZED
//! state machine. AUTHORIZED reverts to UNAUTHORIZED on token expiry,
//! detected lazily by the token cache on lookup.

use super::{AuthAction, AuthKey, PendingRegistry, TokenCache, MAX_OTP_ATTEMPTS};
use crate::hub::{sanitize, AccountSummary, BankGateway, RawSummary};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of resolving an action against a key. "Needs a challenge" is
/// ordinary control flow here, not an error: callers pattern-match and
/// turn it into a user-facing OTP prompt plus a waiting-state entry.
#[derive(Debug, Clone)]
pub enum Resolution {
    Authorized(AccountSummary),
    NeedsChallenge {
        phone: String,
        bank: String,
        account_id: String,
        action: AuthAction,
    },
}

/// A failed OTP verification. `exhausted` means the attempt bound was hit
/// and the challenge was closed; the caller must also drop the user's
/// waiting state so the next message starts a fresh flow.
#[derive(Debug, Clone)]
pub struct VerifyFailure {
    pub reason: String,
    pub exhausted: bool,
}

pub struct ActionResolver {
    tokens: Arc<TokenCache>,
    pending: Arc<PendingRegistry>,
    gateway: Arc<dyn BankGateway>,
    // Serializes challenge/verify transitions per key so two concurrent
    // requests for the same (bank, phone, account) cannot issue duplicate
    // challenges or clobber each other's verification outcome.
    key_locks: DashMap<AuthKey, Arc<Mutex<()>>>,
}

impl ActionResolver {
    pub fn new(
        tokens: Arc<TokenCache>,
        pending: Arc<PendingRegistry>,
        gateway: Arc<dyn BankGateway>,
    ) -> Self {
        Self {
            tokens,
            pending,
            gateway,
            key_locks: DashMap::new(),
        }
    }

    fn key_lock(&self, key: &AuthKey) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry for `key` once no caller holds a clone. A
    /// concurrent waiter keeps the strong count above one and the entry
    /// survives; otherwise the map would grow by one entry per key ever
    /// touched.
    fn evict_idle_lock(&self, key: &AuthKey) {
        self.key_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn lock_count(&self) -> usize {
        self.key_locks.len()
    }

    /// Resolve an account-summary request for `key`.
    ///
    /// With a live token the summary is fetched and sanitized directly.
    /// Without one, a challenge is issued at the hub, recorded in the
    /// pending registry, and `NeedsChallenge` is returned.
    pub async fn resolve_summary(&self, key: &AuthKey) -> Result<Resolution, String> {
        let lock = self.key_lock(key);
        let result = {
            let _guard = lock.lock().await;
            self.resolve_summary_locked(key).await
        };
        drop(lock);
        self.evict_idle_lock(key);
        result
    }

    async fn resolve_summary_locked(&self, key: &AuthKey) -> Result<Resolution, String> {
        if self.tokens.get(key).is_none() {
            self.gateway
                .request_challenge(key, AuthAction::GetAccountSummary)
                .await?;
            self.pending.open(key.clone(), AuthAction::GetAccountSummary);
            return Ok(Resolution::NeedsChallenge {
                phone: key.phone.clone(),
                bank: key.bank.clone(),
                account_id: key.account_id.clone(),
                action: AuthAction::GetAccountSummary,
            });
        }

        let raw = self.fetch_raw_summary(key).await?;
        Ok(Resolution::Authorized(sanitize::sanitize_summary(&raw)))
    }

    /// Verify an OTP code for `key`. On success the returned token is
    /// cached with the ttl the hub granted, the pending challenge is
    /// closed, and any inline account summary comes back sanitized. On
    /// failure the challenge stays open for a retry until the attempt
    /// bound is hit.
    pub async fn verify(
        &self,
        key: &AuthKey,
        code: &str,
    ) -> Result<Option<AccountSummary>, VerifyFailure> {
        let lock = self.key_lock(key);
        let result = {
            let _guard = lock.lock().await;
            self.verify_locked(key, code).await
        };
        drop(lock);
        self.evict_idle_lock(key);
        result
    }

    async fn verify_locked(
        &self,
        key: &AuthKey,
        code: &str,
    ) -> Result<Option<AccountSummary>, VerifyFailure> {
        let attempts = self.pending.note_attempt(key);

        match self.gateway.verify_otp(key, code).await {
            Ok(grant) => match grant.token {
                Some(token) => {
                    self.tokens.put(key.clone(), token, grant.ttl_seconds);
                    self.pending.close(key);
                    log::info!("OTP verified for {}, token cached", key);
                    Ok(grant.summary.as_ref().map(sanitize::sanitize_summary))
                }
                None => Err(self.fail(key, attempts, "the bank rejected the code".to_string())),
            },
            Err(e) => Err(self.fail(key, attempts, e)),
        }
    }

    fn fail(&self, key: &AuthKey, attempts: u32, reason: String) -> VerifyFailure {
        let exhausted = attempts >= MAX_OTP_ATTEMPTS;
        if exhausted {
            self.pending.close(key);
            log::warn!("OTP attempts exhausted for {}, challenge closed", key);
        }
        VerifyFailure { reason, exhausted }
    }

    /// Fetch account data for an authorized key. If the requested account
    /// is missing from the hub's listing, the first account is substituted
    /// as a degraded best-effort result.
    async fn fetch_raw_summary(&self, key: &AuthKey) -> Result<RawSummary, String> {
        let accounts = self.gateway.accounts(&key.bank, &key.phone).await?;

        if let Some(acc) = accounts.iter().find(|a| a.account_id == key.account_id) {
            return Ok(RawSummary::from_account(acc));
        }

        match accounts.first() {
            Some(first) => {
                log::warn!(
                    "Account {} not found for {}, degrading to first account {}",
                    key.account_id,
                    key,
                    first.account_id
                );
                Ok(RawSummary::from_account(first))
            }
            None => {
                log::warn!("No accounts returned for {}, replying with empty summary", key);
                Ok(RawSummary {
                    account_number: Some(key.account_id.clone()),
                    balance: Some(0),
                    transactions: vec![],
                    last_update: None,
                })
            }
        }
    }
}
