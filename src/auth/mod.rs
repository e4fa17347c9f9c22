pub mod pending;
pub mod resolver;
pub mod token_cache;

pub use pending::{PendingRegistry, WaitingState};
pub use resolver::{ActionResolver, Resolution, VerifyFailure};
pub use token_cache::TokenCache;

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

/// Maximum OTP attempts before a pending challenge is closed and the
/// user has to start the flow over.
pub const MAX_OTP_ATTEMPTS: u32 = 3;

/// Pending challenges and waiting states expire after this many seconds.
pub const PENDING_TTL_SECS: i64 = 300;

/// Composite identity for one authorizable resource.
///
/// A token is only ever cached against a fully resolved key, so the
/// constructor requires all three parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthKey {
    pub bank: String,
    pub phone: String,
    pub account_id: String,
}

impl AuthKey {
    pub fn new(bank: impl Into<String>, phone: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            bank: bank.into(),
            phone: phone.into(),
            account_id: account_id.into(),
        }
    }
}

impl fmt::Display for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.bank, self.phone, self.account_id)
    }
}

/// Actions the planner can request, doubling as the action label carried
/// by a pending challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuthAction {
    GetAccountSummary,
    ListUserAccounts,
    SearchServices,
}
