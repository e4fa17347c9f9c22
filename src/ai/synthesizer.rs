//! Final response synthesis via a local LLM. The planner decides *what*
//! to do; this shapes tool data and/or planner text into the reply the
//! user actually reads.

use crate::hub::{AccountBrief, AccountSummary};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Everything the synthesizer needs for one reply.
#[derive(Debug, Clone, Default)]
pub struct SynthesisInput {
    pub user_prompt: String,
    pub intent: String,
    pub tool_text: Option<String>,
    pub planner_text: Option<String>,
    pub context: String,
}

#[async_trait]
pub trait ReplySynthesizer: Send + Sync {
    async fn synthesize(&self, input: SynthesisInput) -> Result<String, String>;
}

const SYSTEM_PROMPT: &str = "You are a friendly inter-bank assistant. Connect the \
relevant information and answer the customer concisely but completely.\n\
Rules:\n\
- Prefer tool data (balances, services, transactions...) when available.\n\
- If tool data is missing or empty, fall back to the planner text and background knowledge.\n\
- If still short on material, offer the basic service catalogue (credit cards, \
transfers, savings, consumer loans, balance lookup...).\n\
- Never answer vaguely with 'the bank offers many services'. Always give examples or a list.\n\
- Keep the tone natural, clear, and conversational.";

/// Render a sanitized account summary as prompt-ready text.
pub fn render_summary(summary: &AccountSummary) -> String {
    let mut text = format!("Account: {}\n", summary.account_label);
    if let Some(balance) = summary.balance {
        text.push_str(&format!("Balance: {}\n", balance));
    }
    if !summary.recent_transactions.is_empty() {
        text.push_str("Recent transactions:\n");
        for t in &summary.recent_transactions {
            text.push_str(&format!(
                "- {}: {} ({})\n",
                t.date.as_deref().unwrap_or("?"),
                t.amount.map(|a| a.to_string()).unwrap_or_else(|| "?".to_string()),
                t.merchant
            ));
        }
    }
    if let Some(updated) = &summary.last_update {
        text.push_str(&format!("Updated: {}", updated));
    }
    text
}

/// Render the cross-bank account listing.
pub fn render_accounts(accounts_by_bank: &BTreeMap<String, Vec<AccountBrief>>) -> String {
    let mut text = String::from("Your accounts:\n");
    for (bank, accounts) in accounts_by_bank {
        text.push_str(&format!("- {}:\n", bank));
        for a in accounts {
            text.push_str(&format!(
                "   * {} (ID: {})\n",
                a.label.as_deref().unwrap_or("unnamed"),
                a.account_id
            ));
        }
    }
    text
}

/// Render ranked service snippets.
pub fn render_services(snippets: &[String]) -> String {
    if snippets.is_empty() {
        return "No matching services found.".to_string();
    }
    let mut text = String::from("Suggested services:\n");
    for s in snippets {
        text.push_str(&format!("- {}\n", s));
    }
    text
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    options: OllamaOptions,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

/// Thin client for the Ollama generate API.
#[derive(Debug, Clone)]
pub struct OllamaSynthesizer {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaSynthesizer {
    pub fn new(endpoint: &str, model: &str) -> Result<Self, String> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
        })
    }

    fn build_prompt(input: &SynthesisInput) -> String {
        format!(
            "<<SYS>>{}<<SYS>>\n\n\
             --- Conversation history ---\n{}\n\n\
             --- User asked ---\n{}\n\n\
             --- Tool data ({}) ---\n{}\n\n\
             --- Planner text ---\n{}\n\n\
             Write a friendly reply for the customer.",
            SYSTEM_PROMPT,
            input.context,
            input.user_prompt,
            input.intent,
            input.tool_text.as_deref().unwrap_or(""),
            input.planner_text.as_deref().unwrap_or(""),
        )
    }
}

#[async_trait]
impl ReplySynthesizer for OllamaSynthesizer {
    async fn synthesize(&self, input: SynthesisInput) -> Result<String, String> {
        let request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: Self::build_prompt(&input),
            options: OllamaOptions {
                temperature: 0.2,
                num_predict: 256,
            },
            stream: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Synthesizer request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "Synthesizer returned error status: {}, body: {}",
                status, body
            ));
        }

        let data: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse synthesizer response: {}", e))?;

        Ok(data.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::SanitizedTransaction;

    #[test]
    fn test_render_summary_includes_masked_label_and_transactions() {
        let summary = AccountSummary {
            account_label: "9704...9012".to_string(),
            balance: Some(1_000_000),
            recent_transactions: vec![SanitizedTransaction {
                date: Some("2025-01-01".to_string()),
                amount: Some(-25_000),
                merchant: "cafe".to_string(),
                kind: Some("debit".to_string()),
            }],
            last_update: Some("2025-01-02".to_string()),
        };

        let text = render_summary(&summary);
        assert!(text.contains("9704...9012"));
        assert!(text.contains("Balance: 1000000"));
        assert!(text.contains("- 2025-01-01: -25000 (cafe)"));
        assert!(text.contains("Updated: 2025-01-02"));
    }

    #[test]
    fn test_render_accounts_groups_by_bank() {
        let mut by_bank = BTreeMap::new();
        by_bank.insert(
            "mock".to_string(),
            vec![AccountBrief {
                account_id: "A1".to_string(),
                label: Some("Checking".to_string()),
                last_update: None,
            }],
        );

        let text = render_accounts(&by_bank);
        assert!(text.contains("- mock:"));
        assert!(text.contains("* Checking (ID: A1)"));
    }

    #[test]
    fn test_render_services_empty_and_nonempty() {
        assert_eq!(render_services(&[]), "No matching services found.");
        let text = render_services(&["Home loan, 7.5% p.a.".to_string()]);
        assert!(text.contains("- Home loan, 7.5% p.a."));
    }
}
