use std::env;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const PORT: &str = "PORT";
    pub const OPEN_BANKING_HUB: &str = "OPEN_BANKING_HUB";
    pub const RAG_SERVICE_URL: &str = "RAG_SERVICE_URL";
    pub const PLANNER_ENDPOINT: &str = "PLANNER_ENDPOINT";
    pub const PLANNER_API_KEY: &str = "PLANNER_API_KEY";
    pub const PLANNER_MODEL: &str = "PLANNER_MODEL";
    pub const SYNTH_ENDPOINT: &str = "SYNTH_ENDPOINT";
    pub const SYNTH_MODEL: &str = "SYNTH_MODEL";
    pub const DEFAULT_BANK: &str = "DEFAULT_BANK";
    pub const DEFAULT_PHONE: &str = "DEFAULT_PHONE";
    pub const TRANSCRIPT_TTL_SECS: &str = "TRANSCRIPT_TTL_SECS";
}

/// Default values
pub mod defaults {
    pub const PORT: u16 = 8080;
    pub const OPEN_BANKING_HUB: &str = "http://localhost:4000";
    pub const RAG_SERVICE_URL: &str = "http://localhost:8002";
    pub const PLANNER_ENDPOINT: &str =
        "https://generativelanguage.googleapis.com/v1beta/models";
    pub const PLANNER_MODEL: &str = "gemini-2.0-flash";
    pub const SYNTH_ENDPOINT: &str = "http://localhost:11434/api/generate";
    pub const SYNTH_MODEL: &str = "llama3:8b";
    pub const DEFAULT_BANK: &str = "mock";
    pub const DEFAULT_PHONE: &str = "demo:thao";
    /// Transcripts expire after 24 hours of existence
    pub const TRANSCRIPT_TTL_SECS: u64 = 86_400;
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub hub_url: String,
    pub rag_url: String,
    pub planner_endpoint: String,
    pub planner_api_key: String,
    pub planner_model: String,
    pub synth_endpoint: String,
    pub synth_model: String,
    pub default_bank: String,
    pub default_phone: String,
    pub transcript_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var(env_vars::PORT)
                .unwrap_or_else(|_| defaults::PORT.to_string())
                .parse()
                .expect("PORT must be a valid number"),
            hub_url: env::var(env_vars::OPEN_BANKING_HUB)
                .unwrap_or_else(|_| defaults::OPEN_BANKING_HUB.to_string()),
            rag_url: env::var(env_vars::RAG_SERVICE_URL)
                .unwrap_or_else(|_| defaults::RAG_SERVICE_URL.to_string()),
            planner_endpoint: env::var(env_vars::PLANNER_ENDPOINT)
                .unwrap_or_else(|_| defaults::PLANNER_ENDPOINT.to_string()),
            planner_api_key: env::var(env_vars::PLANNER_API_KEY)
                .expect("PLANNER_API_KEY must be set"),
            planner_model: env::var(env_vars::PLANNER_MODEL)
                .unwrap_or_else(|_| defaults::PLANNER_MODEL.to_string()),
            synth_endpoint: env::var(env_vars::SYNTH_ENDPOINT)
                .unwrap_or_else(|_| defaults::SYNTH_ENDPOINT.to_string()),
            synth_model: env::var(env_vars::SYNTH_MODEL)
                .unwrap_or_else(|_| defaults::SYNTH_MODEL.to_string()),
            default_bank: env::var(env_vars::DEFAULT_BANK)
                .unwrap_or_else(|_| defaults::DEFAULT_BANK.to_string()),
            default_phone: env::var(env_vars::DEFAULT_PHONE)
                .unwrap_or_else(|_| defaults::DEFAULT_PHONE.to_string()),
            transcript_ttl_secs: env::var(env_vars::TRANSCRIPT_TTL_SECS)
                .unwrap_or_else(|_| defaults::TRANSCRIPT_TTL_SECS.to_string())
                .parse()
                .unwrap_or(defaults::TRANSCRIPT_TTL_SECS),
        }
    }
}
