//! Sanitation transform for outbound account data.
//!
//! Raw hub data never reaches a caller directly: account identifiers are
//! masked and transaction lists are truncated before anything leaves the
//! core, whether the data came from a listing fetch or inline with an OTP
//! verification.

use super::{RawSummary, Transaction};
use serde::Serialize;

/// Transactions kept in a sanitized summary, most recent first as the
/// hub returned them.
const MAX_TRANSACTIONS: usize = 5;

/// Merchant names longer than this are cut to 27 chars plus an ellipsis.
const MAX_MERCHANT_LEN: usize = 30;

/// Account ids at or below this length get a fixed mask instead of the
/// first4...last4 form, which would otherwise reveal the whole id.
const SHORT_ID_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub account_label: String,
    pub balance: Option<i64>,
    pub recent_transactions: Vec<SanitizedTransaction>,
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizedTransaction {
    pub date: Option<String>,
    pub amount: Option<i64>,
    pub merchant: String,
    pub kind: Option<String>,
}

pub fn mask_account(account_id: &str) -> String {
    let id = account_id.trim();
    if id.chars().count() <= SHORT_ID_LEN {
        return "****".to_string();
    }
    let chars: Vec<char> = id.chars().collect();
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

pub fn summarize_transactions(transactions: &[Transaction]) -> Vec<SanitizedTransaction> {
    transactions
        .iter()
        .take(MAX_TRANSACTIONS)
        .map(|t| SanitizedTransaction {
            date: t.date.clone(),
            amount: t.amount,
            merchant: cap_merchant(t.merchant.as_deref()),
            kind: t.kind.clone(),
        })
        .collect()
}

fn cap_merchant(merchant: Option<&str>) -> String {
    let name = match merchant {
        Some(m) if !m.is_empty() => m,
        _ => return "[masked]".to_string(),
    };
    if name.chars().count() <= MAX_MERCHANT_LEN {
        name.to_string()
    } else {
        let cut: String = name.chars().take(MAX_MERCHANT_LEN - 3).collect();
        format!("{}...", cut)
    }
}

pub fn sanitize_summary(raw: &RawSummary) -> AccountSummary {
    AccountSummary {
        account_label: raw
            .account_number
            .as_deref()
            .map(mask_account)
            .unwrap_or_else(|| "****".to_string()),
        balance: raw.balance,
        recent_transactions: summarize_transactions(&raw.transactions),
        last_update: raw.last_update.clone(),
    }
}
