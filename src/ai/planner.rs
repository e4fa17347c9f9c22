//! LLM planner: maps a user prompt (plus conversation context) to either a
//! structured tool call or a final free-text answer.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// What the planner decided. Either a named tool invocation with JSON
/// arguments, or plain text to hand to the synthesizer.
#[derive(Debug, Clone)]
pub enum PlannerReply {
    FunctionCall { name: String, arguments: Value },
    Final { text: String },
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, prompt: &str) -> Result<PlannerReply, String>;
}

const SYSTEM_INSTRUCTION: &str = "You are a ReAct-style planner for a multi-bank assistant. \
Map the user's intent to a function call whenever a suitable tool exists.\n\
Rules:\n\
- Questions like 'which accounts do I have', 'list my accounts' -> call list_user_accounts.\n\
- Questions about balance, amounts, or transactions -> call get_account_summary.\n\
- Questions about services, products, rates, cards, loans, savings -> call search_services, \
using the user's whole question as the query.\n\
- When the bank is not named, use the default bank.\n\
- Never answer directly when a tool applies; always emit a function call so the \
answer is grounded in tool data.";

fn function_declarations() -> Value {
    json!([
        {
            "name": "get_account_summary",
            "description": "Fetch a sanitized summary of one account (the server masks it).",
            "parameters": {
                "type": "object",
                "properties": {
                    "account_id": {"type": "string"},
                    "bank_name": {"type": "string", "description": "Bank name, if known"}
                },
                "required": ["account_id"]
            }
        },
        {
            "name": "search_services",
            "description": "Keyword search over banking services (loans, cards, savings...).",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Service keywords, e.g. 'home loan', 'credit card'"},
                    "bank_name": {"type": "string", "description": "Bank to search"}
                },
                "required": ["query"]
            }
        },
        {
            "name": "list_user_accounts",
            "description": "List every bank and account the user holds. Requires no OTP.",
            "parameters": {
                "type": "object",
                "properties": {
                    "phone_num": {"type": "string", "description": "Phone number or user id"}
                },
                "required": ["phone_num"]
            }
        }
    ])
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    system_instruction: Value,
    contents: Value,
    tools: Value,
    tool_config: Value,
    generation_config: Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "functionCall")]
    function_call: Option<FunctionCallPart>,
}

#[derive(Debug, Deserialize)]
struct FunctionCallPart {
    name: String,
    #[serde(default)]
    args: Value,
}

/// Gemini-backed planner client.
#[derive(Debug, Clone)]
pub struct GeminiPlanner {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiPlanner {
    pub fn new(endpoint: &str, model: &str, api_key: &str) -> Result<Self, String> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn generate(&self, prompt: &str) -> Result<PlannerReply, String> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.endpoint, self.model, self.api_key
        );

        let request = GenerateRequest {
            system_instruction: json!({"parts": [{"text": SYSTEM_INSTRUCTION}]}),
            contents: json!([{"role": "user", "parts": [{"text": prompt}]}]),
            tools: json!([{"function_declarations": function_declarations()}]),
            tool_config: json!({"function_calling_config": {"mode": "ANY"}}),
            generation_config: json!({"temperature": 0.2, "top_p": 0.9, "top_k": 32}),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Planner request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "Planner returned error status: {}, body: {}",
                status, body
            ));
        }

        let data: GenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse planner response: {}", e))?;

        // First function call wins; otherwise join whatever text came back.
        let mut chunks = Vec::new();
        for candidate in &data.candidates {
            let parts = candidate.content.as_ref().map(|c| c.parts.as_slice()).unwrap_or(&[]);
            for part in parts {
                if let Some(fc) = &part.function_call {
                    return Ok(PlannerReply::FunctionCall {
                        name: fc.name.clone(),
                        arguments: fc.args.clone(),
                    });
                }
                if let Some(text) = &part.text {
                    chunks.push(text.as_str());
                }
            }
        }

        Ok(PlannerReply::Final {
            text: chunks.join("").trim().to_string(),
        })
    }
}

#[async_trait]
impl Planner for GeminiPlanner {
    /// Planner failures degrade to a final-text reply carrying the error,
    /// so one flaky planner call never fails the whole turn.
    async fn plan(&self, prompt: &str) -> Result<PlannerReply, String> {
        match self.generate(prompt).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                log::error!("Planner degraded to text: {}", e);
                Ok(PlannerReply::Final {
                    text: format!("(planner unavailable) {}", e),
                })
            }
        }
    }
}
