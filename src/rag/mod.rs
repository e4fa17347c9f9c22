//! Vector-similarity service search collaborator. Opaque to the core:
//! a free-text query plus a bank identifier in, ranked text snippets out.

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Results returned per query.
const DEFAULT_K: usize = 5;

#[async_trait]
pub trait ServiceSearch: Send + Sync {
    async fn search(&self, bank: &str, query: &str) -> Result<Vec<String>, String>;
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    bank_name: String,
    query: &'a str,
    k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    text: String,
}

/// Client for the RAG service's `/rag/search` endpoint. Bank names map to
/// collections by the `bank_{name}` convention.
#[derive(Debug, Clone)]
pub struct RagClient {
    client: Client,
    base_url: String,
}

impl RagClient {
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

    fn collection_name(bank: &str) -> String {
        format!("bank_{}", bank.to_lowercase())
    }
}

#[async_trait]
impl ServiceSearch for RagClient {
    async fn search(&self, bank: &str, query: &str) -> Result<Vec<String>, String> {
        let url = format!("{}/rag/search", self.base_url);
        let request = SearchRequest {
            bank_name: Self::collection_name(bank),
            query,
            k: DEFAULT_K,
        };

        log::debug!("Service search against {} for '{}'", request.bank_name, query);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Service search request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "Service search returned status: {}, body: {}",
                status, body
            ));
        }

        let data: SearchResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse service search response: {}", e))?;

        Ok(data.results.into_iter().map(|h| h.text).collect())
    }
}
