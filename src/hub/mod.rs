pub mod sanitize;

pub use sanitize::{AccountSummary, SanitizedTransaction};

use crate::auth::{AuthAction, AuthKey};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One account as returned by the hub's listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "accountId")]
    pub account_id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub balance: Option<i64>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default, alias = "merchant_name")]
    pub merchant: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Unsanitized account data, either assembled from a listing fetch or
/// returned inline by the hub after OTP verification. Never leaves the
/// core without passing through [`sanitize::sanitize_summary`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawSummary {
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub balance: Option<i64>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub last_update: Option<String>,
}

impl RawSummary {
    pub fn from_account(acc: &Account) -> Self {
        Self {
            account_number: Some(acc.account_id.clone()),
            balance: acc.balance,
            transactions: acc.transactions.clone(),
            last_update: acc.last_update.clone(),
        }
    }
}

/// Outcome of an OTP verification call. `token` is absent when the hub
/// rejected the code.
#[derive(Debug, Clone)]
pub struct OtpGrant {
    pub token: Option<String>,
    pub ttl_seconds: i64,
    pub summary: Option<RawSummary>,
}

/// Reduced account view used by the cross-bank listing (no balances or
/// transactions; listing is the one flow that never requires OTP).
#[derive(Debug, Clone, Serialize)]
pub struct AccountBrief {
    pub account_id: String,
    pub label: Option<String>,
    pub last_update: Option<String>,
}

/// Network seam to the multi-bank hub. The hub routes by bank name in the
/// path; everything behind this trait is opaque to the state machine.
#[async_trait]
pub trait BankGateway: Send + Sync {
    /// Bank names the hub currently serves, from `GET /health`.
    async fn supported_banks(&self) -> Result<Vec<String>, String>;

    /// `GET /bank/{bank}/accounts/{phone}`
    async fn accounts(&self, bank: &str, phone: &str) -> Result<Vec<Account>, String>;

    /// Ask the hub to send an OTP for an action on an account
    /// (`POST /bank/{bank}/balance`).
    async fn request_challenge(&self, key: &AuthKey, action: AuthAction) -> Result<(), String>;

    /// `POST /bank/{bank}/otp/verify`
    async fn verify_otp(&self, key: &AuthKey, code: &str) -> Result<OtpGrant, String>;

    /// Keyword service lookup on the hub side
    /// (`GET /bank/{bank}/services?query=`).
    async fn bank_services(&self, bank: &str, query: &str) -> Result<Vec<String>, String>;

    /// Aggregate accounts across every supported bank for one phone.
    /// Banks that fail to answer are skipped; only the health call is fatal.
    async fn list_user_accounts(
        &self,
        phone: &str,
    ) -> Result<BTreeMap<String, Vec<AccountBrief>>, String> {
        let mut result = BTreeMap::new();
        for bank in self.supported_banks().await? {
            match self.accounts(&bank, phone).await {
                Ok(accounts) if !accounts.is_empty() => {
                    let briefs = accounts
                        .into_iter()
                        .map(|a| AccountBrief {
                            account_id: a.account_id,
                            label: a.label,
                            last_update: a.last_update,
                        })
                        .collect();
                    result.insert(bank, briefs);
                }
                Ok(_) => {}
                Err(e) => {
                    log::debug!("Skipping bank {} in account listing: {}", bank, e);
                }
            }
        }
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    banks: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChallengeRequest<'a> {
    phone: &'a str,
    account_id: &'a str,
    action: String,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    phone: &'a str,
    otp: &'a str,
    account_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    ttl: Option<i64>,
    #[serde(default)]
    account_summary: Option<RawSummary>,
}

#[derive(Debug, Deserialize)]
struct ServicesResponse {
    #[serde(default)]
    results: Vec<ServiceHit>,
}

#[derive(Debug, Deserialize)]
struct ServiceHit {
    #[serde(default)]
    text: String,
}

/// Default token lifetime when the hub omits one from a verify response.
const DEFAULT_TOKEN_TTL_SECS: i64 = 600;

/// HTTP client for the open-banking hub.
#[derive(Debug, Clone)]
pub struct HubClient {
    client: Client,
    base_url: String,
}

impl HubClient {
    pub fn new(base_url: &str) -> Result<Self, String> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BankGateway for HubClient {
    async fn supported_banks(&self) -> Result<Vec<String>, String> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| format!("Hub health check failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Hub health check returned status: {}", status));
        }

        let data: HealthResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse hub health response: {}", e))?;
        Ok(data.banks)
    }

    async fn accounts(&self, bank: &str, phone: &str) -> Result<Vec<Account>, String> {
        let url = format!("{}/bank/{}/accounts/{}", self.base_url, bank, phone);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Hub account listing failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "Hub account listing returned status: {}, body: {}",
                status, body
            ));
        }

        response
            .json()
            .await
            .map_err(|e| format!("Failed to parse hub account listing: {}", e))
    }

    async fn request_challenge(&self, key: &AuthKey, action: AuthAction) -> Result<(), String> {
        let url = format!("{}/bank/{}/balance", self.base_url, key.bank);
        let request = ChallengeRequest {
            phone: &key.phone,
            account_id: &key.account_id,
            action: action.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Hub challenge request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Hub refused to issue a challenge: {}", body));
        }

        log::info!("Challenge issued for {} (action {})", key, action);
        Ok(())
    }

    async fn verify_otp(&self, key: &AuthKey, code: &str) -> Result<OtpGrant, String> {
        let url = format!("{}/bank/{}/otp/verify", self.base_url, key.bank);
        let request = VerifyRequest {
            phone: &key.phone,
            otp: code,
            account_id: &key.account_id,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Hub OTP verification failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "Hub OTP verification returned status: {}, body: {}",
                status, body
            ));
        }

        let data: VerifyResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse hub verify response: {}", e))?;

        Ok(OtpGrant {
            token: data.access_token,
            ttl_seconds: data.ttl.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
            summary: data.account_summary,
        })
    }

    async fn bank_services(&self, bank: &str, query: &str) -> Result<Vec<String>, String> {
        let url = format!("{}/bank/{}/services", self.base_url, bank);
        let response = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|e| format!("Hub service search failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Hub service search returned status: {}", status));
        }

        let data: ServicesResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse hub service search: {}", e))?;
        Ok(data.results.into_iter().map(|h| h.text).collect())
    }
}
