//! Orchestration loop: decides per incoming message whether it resumes a
//! pending OTP challenge, hits the account-listing shortcut, or goes
//! through the planner, then drives the action resolver and collaborators
//! and appends the turn to the user's transcript.

use crate::ai::synthesizer::{render_accounts, render_services, render_summary};
use crate::ai::{Planner, PlannerReply, ReplySynthesizer, SynthesisInput};
use crate::auth::{ActionResolver, AuthAction, AuthKey, PendingRegistry, Resolution, WaitingState};
use crate::hub::BankGateway;
use crate::memory::TranscriptStore;
use crate::rag::ServiceSearch;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// One inbound user message with its routing parameters.
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub user_id: String,
    pub prompt: String,
    pub account_id: Option<String>,
    pub bank_name: String,
    pub phone: Option<String>,
}

/// A terminal reply plus a short tag naming which path produced it.
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub reply: String,
    pub source: &'static str,
}

#[derive(Debug, Clone)]
pub enum DispatchError {
    /// The caller sent something a programmatic client should have known
    /// better than to send (missing required argument).
    BadRequest(String),
    /// An upstream collaborator failed; surfaced as a service error.
    Internal(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::BadRequest(msg) => write!(f, "bad request: {}", msg),
            DispatchError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

/// A trimmed message that is purely numeric and 5-6 digits long looks
/// like an OTP code.
fn is_otp_shaped(message: &str) -> bool {
    let trimmed = message.trim();
    (5..=6).contains(&trimmed.len()) && trimmed.chars().all(|c| c.is_ascii_digit())
}

pub struct AskDispatcher {
    gateway: Arc<dyn BankGateway>,
    resolver: Arc<ActionResolver>,
    pending: Arc<PendingRegistry>,
    planner: Arc<dyn Planner>,
    synthesizer: Arc<dyn ReplySynthesizer>,
    search: Arc<dyn ServiceSearch>,
    transcripts: Arc<TranscriptStore>,
}

impl AskDispatcher {
    pub fn new(
        gateway: Arc<dyn BankGateway>,
        resolver: Arc<ActionResolver>,
        pending: Arc<PendingRegistry>,
        planner: Arc<dyn Planner>,
        synthesizer: Arc<dyn ReplySynthesizer>,
        search: Arc<dyn ServiceSearch>,
        transcripts: Arc<TranscriptStore>,
    ) -> Self {
        Self {
            gateway,
            resolver,
            pending,
            planner,
            synthesizer,
            search,
            transcripts,
        }
    }

    pub async fn dispatch(&self, req: AskRequest) -> Result<AskOutcome, DispatchError> {
        let banks = self
            .gateway
            .supported_banks()
            .await
            .map_err(DispatchError::Internal)?;
        if !banks.contains(&req.bank_name) {
            // Turn ends before any state is touched, transcript included.
            return Ok(AskOutcome {
                reply: format!(
                    "Bank {} is not supported yet. Please pick one of: {}",
                    req.bank_name,
                    banks.join(", ")
                ),
                source: "unsupported_bank",
            });
        }

        let trace_id = Uuid::new_v4();
        log::info!("[TRACE:{}] user_id={}, ask={}", trace_id, req.user_id, req.prompt);

        let context = self.transcripts.context(&req.user_id);
        let prompt = req.prompt.trim().to_string();

        // A digit string only counts as an OTP when this user is actually
        // waiting on a challenge; otherwise it routes like any message.
        if is_otp_shaped(&prompt) {
            if let Some(waiting) = self.pending.waiting(&req.user_id) {
                return self.resume_otp(&req.user_id, &prompt, waiting, &context).await;
            }
        }

        let lower = prompt.to_lowercase();
        if lower.contains("account") && !lower.contains("balance") && !lower.contains("transaction") {
            return self
                .handle_listing(&req.user_id, &prompt, req.phone.clone(), &context, "list_accounts_shortcut")
                .await;
        }

        let planner_prompt = format!("Conversation history:\n{}\n\nUser asks: {}", context, prompt);
        let plan = self
            .planner
            .plan(&planner_prompt)
            .await
            .map_err(DispatchError::Internal)?;

        match plan {
            PlannerReply::Final { text } => {
                if lower.contains("service") {
                    let snippets = self
                        .search_services(&req.bank_name, &prompt)
                        .await
                        .map_err(DispatchError::Internal)?;
                    let reply = self
                        .synthesize(&prompt, "search_services", Some(render_services(&snippets)), None, &context)
                        .await?;
                    return self.finish(&req.user_id, &prompt, reply, "service_wrap");
                }
                let reply = self
                    .synthesize(&prompt, "chitchat", None, Some(text), &context)
                    .await?;
                self.finish(&req.user_id, &prompt, reply, "planner_final")
            }
            PlannerReply::FunctionCall { name, arguments } => match name.parse::<AuthAction>() {
                Ok(AuthAction::GetAccountSummary) => {
                    self.handle_summary(&req, &prompt, &arguments, &context, trace_id).await
                }
                Ok(AuthAction::ListUserAccounts) => {
                    let phone = string_arg(&arguments, "phone_num").or_else(|| req.phone.clone());
                    self.handle_listing(&req.user_id, &prompt, phone, &context, "list_accounts").await
                }
                Ok(AuthAction::SearchServices) => {
                    let query = string_arg(&arguments, "query")
                        .ok_or_else(|| DispatchError::BadRequest("query required".to_string()))?;
                    let bank = string_arg(&arguments, "bank_name").unwrap_or_else(|| req.bank_name.clone());
                    let snippets = self
                        .search_services(&bank, &query)
                        .await
                        .map_err(DispatchError::Internal)?;
                    let reply = self
                        .synthesize(&prompt, "search_services", Some(render_services(&snippets)), None, &context)
                        .await?;
                    self.finish(&req.user_id, &prompt, reply, "service_search")
                }
                Err(_) => {
                    log::warn!("[TRACE:{}] planner requested unknown function {}", trace_id, name);
                    let reply = self
                        .synthesize(
                            &prompt,
                            "unsupported",
                            None,
                            Some(format!("The function {} is not supported.", name)),
                            &context,
                        )
                        .await?;
                    self.finish(&req.user_id, &prompt, reply, "unsupported_action")
                }
            },
        }
    }

    /// OTP-resume path: verify the code against the challenge the user is
    /// waiting on, then reply with the summary that challenge suspended.
    async fn resume_otp(
        &self,
        user_id: &str,
        code: &str,
        waiting: WaitingState,
        context: &str,
    ) -> Result<AskOutcome, DispatchError> {
        let key = waiting.key();

        match self.resolver.verify(&key, code).await {
            Ok(inline) => {
                let summary = match inline {
                    Some(summary) => summary,
                    // The hub omitted the inline summary; fetch explicitly
                    // now that the token is cached.
                    None => match self
                        .resolver
                        .resolve_summary(&key)
                        .await
                        .map_err(DispatchError::Internal)?
                    {
                        Resolution::Authorized(summary) => summary,
                        Resolution::NeedsChallenge { phone, bank, account_id, .. } => {
                            // Token vanished between verify and fetch (expired
                            // instantly or was evicted); re-prompt rather than fail.
                            let reply = challenge_prompt(&bank, &phone, &account_id);
                            return self.finish(user_id, code, reply, "challenge_issued");
                        }
                    },
                };
                self.pending.clear_waiting(user_id);
                let intent = waiting.action.to_string();
                let reply = self
                    .synthesize(
                        "Verify the OTP and report the balance",
                        &intent,
                        Some(render_summary(&summary)),
                        None,
                        context,
                    )
                    .await?;
                self.finish(user_id, code, reply, "otp_verified_resume")
            }
            Err(failure) => {
                let (reply, source) = if failure.exhausted {
                    self.pending.clear_waiting(user_id);
                    (
                        format!(
                            "OTP verification failed: {}. Too many attempts; please start the request again.",
                            failure.reason
                        ),
                        "otp_exhausted",
                    )
                } else {
                    (
                        format!("OTP verification failed: {}", failure.reason),
                        "otp_failed",
                    )
                };
                self.finish(user_id, code, reply, source)
            }
        }
    }

    async fn handle_summary(
        &self,
        req: &AskRequest,
        prompt: &str,
        arguments: &Value,
        context: &str,
        trace_id: Uuid,
    ) -> Result<AskOutcome, DispatchError> {
        let phone = match req.phone.clone() {
            Some(phone) => phone,
            None => {
                let reply = "Which phone number should I look up the account for?".to_string();
                return self.finish(&req.user_id, prompt, reply, "clarification");
            }
        };

        let mut account_id = req.account_id.clone().or_else(|| string_arg(arguments, "account_id"));

        // Best-effort auto-resolve: first account under the requested bank.
        if account_id.is_none() {
            match self.gateway.accounts(&req.bank_name, &phone).await {
                Ok(accounts) => account_id = accounts.first().map(|a| a.account_id.clone()),
                Err(e) => {
                    log::warn!("[TRACE:{}] account auto-resolve failed: {}", trace_id, e);
                }
            }
        }

        let account_id = match account_id {
            Some(id) => id,
            None => {
                let reply = "Which bank and account would you like the balance for?".to_string();
                return self.finish(&req.user_id, prompt, reply, "clarification");
            }
        };

        let key = AuthKey::new(&req.bank_name, &phone, &account_id);
        match self
            .resolver
            .resolve_summary(&key)
            .await
            .map_err(DispatchError::Internal)?
        {
            Resolution::Authorized(summary) => {
                let reply = self
                    .synthesize(prompt, "get_account_summary", Some(render_summary(&summary)), None, context)
                    .await?;
                self.finish(&req.user_id, prompt, reply, "account_summary")
            }
            Resolution::NeedsChallenge { phone, bank, account_id, action } => {
                // Waiting state is registered in the same step the
                // challenge prompt goes out, so the next numeric message
                // from this user resumes exactly this action.
                self.pending.set_waiting(
                    &req.user_id,
                    phone.clone(),
                    bank.clone(),
                    account_id.clone(),
                    action,
                );
                let reply = challenge_prompt(&bank, &phone, &account_id);
                self.finish(&req.user_id, prompt, reply, "challenge_issued")
            }
        }
    }

    async fn handle_listing(
        &self,
        user_id: &str,
        prompt: &str,
        phone: Option<String>,
        context: &str,
        source: &'static str,
    ) -> Result<AskOutcome, DispatchError> {
        let phone = match phone {
            Some(phone) => phone,
            None => {
                let reply = "Which phone number should I list accounts for?".to_string();
                return self.finish(user_id, prompt, reply, "clarification");
            }
        };

        let accounts_by_bank = self
            .gateway
            .list_user_accounts(&phone)
            .await
            .map_err(DispatchError::Internal)?;
        let reply = self
            .synthesize(prompt, "list_user_accounts", Some(render_accounts(&accounts_by_bank)), None, context)
            .await?;
        self.finish(user_id, prompt, reply, source)
    }

    /// Vector search first; when the index has nothing for the query, fall
    /// back to the hub's plain keyword endpoint.
    async fn search_services(&self, bank: &str, query: &str) -> Result<Vec<String>, String> {
        let snippets = self.search.search(bank, query).await?;
        if !snippets.is_empty() {
            return Ok(snippets);
        }
        self.gateway.bank_services(bank, query).await
    }

    async fn synthesize(
        &self,
        user_prompt: &str,
        intent: &str,
        tool_text: Option<String>,
        planner_text: Option<String>,
        context: &str,
    ) -> Result<String, DispatchError> {
        self.synthesizer
            .synthesize(SynthesisInput {
                user_prompt: user_prompt.to_string(),
                intent: intent.to_string(),
                tool_text,
                planner_text,
                context: context.to_string(),
            })
            .await
            .map_err(DispatchError::Internal)
    }

    fn finish(
        &self,
        user_id: &str,
        prompt: &str,
        reply: String,
        source: &'static str,
    ) -> Result<AskOutcome, DispatchError> {
        self.transcripts.append_turn(user_id, prompt, &reply);
        Ok(AskOutcome { reply, source })
    }
}

fn challenge_prompt(bank: &str, phone: &str, account_id: &str) -> String {
    format!(
        "Bank {} has sent an OTP code to {} for account {}. Please enter the code to verify.",
        bank, phone, account_id
    )
}

fn string_arg(arguments: &Value, name: &str) -> Option<String> {
    arguments
        .get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenCache;
    use crate::hub::{Account, OtpGrant, Transaction};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GOOD_OTP: &str = "123456";

    struct MockHub {
        banks: Vec<String>,
        accounts: Vec<Account>,
        challenges_issued: AtomicUsize,
    }

    impl MockHub {
        fn new(accounts: Vec<Account>) -> Self {
            Self {
                banks: vec!["mock".to_string()],
                accounts,
                challenges_issued: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BankGateway for MockHub {
        async fn supported_banks(&self) -> Result<Vec<String>, String> {
            Ok(self.banks.clone())
        }

        async fn accounts(&self, _bank: &str, _phone: &str) -> Result<Vec<Account>, String> {
            Ok(self.accounts.clone())
        }

        async fn request_challenge(&self, _key: &AuthKey, _action: AuthAction) -> Result<(), String> {
            self.challenges_issued.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn verify_otp(&self, _key: &AuthKey, code: &str) -> Result<OtpGrant, String> {
            Ok(OtpGrant {
                token: (code == GOOD_OTP).then(|| "tok-fresh".to_string()),
                ttl_seconds: 600,
                summary: None,
            })
        }

        async fn bank_services(&self, _bank: &str, query: &str) -> Result<Vec<String>, String> {
            Ok(vec![format!("hub-svc for {}", query)])
        }
    }

    struct MockPlanner {
        reply: PlannerReply,
        calls: AtomicUsize,
    }

    impl MockPlanner {
        fn new(reply: PlannerReply) -> Self {
            Self {
                reply,
                calls: AtomicUsize::new(0),
            }
        }

        fn final_text(text: &str) -> Self {
            Self::new(PlannerReply::Final { text: text.to_string() })
        }
    }

    #[async_trait]
    impl Planner for MockPlanner {
        async fn plan(&self, _prompt: &str) -> Result<PlannerReply, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    /// Deterministic synthesizer: echoes the intent plus whichever text
    /// source is present, so assertions can see the tool data.
    struct EchoSynth;

    #[async_trait]
    impl ReplySynthesizer for EchoSynth {
        async fn synthesize(&self, input: SynthesisInput) -> Result<String, String> {
            let body = input
                .tool_text
                .or(input.planner_text)
                .unwrap_or_default();
            Ok(format!("[{}] {}", input.intent, body))
        }
    }

    struct MockSearch;

    #[async_trait]
    impl ServiceSearch for MockSearch {
        async fn search(&self, _bank: &str, query: &str) -> Result<Vec<String>, String> {
            Ok(vec![format!("svc-hit for {}", query)])
        }
    }

    struct EmptySearch;

    #[async_trait]
    impl ServiceSearch for EmptySearch {
        async fn search(&self, _bank: &str, _query: &str) -> Result<Vec<String>, String> {
            Ok(vec![])
        }
    }

    struct Fixture {
        tokens: Arc<TokenCache>,
        pending: Arc<PendingRegistry>,
        hub: Arc<MockHub>,
        planner: Arc<MockPlanner>,
        transcripts: Arc<TranscriptStore>,
        dispatcher: AskDispatcher,
    }

    fn fixture(hub: MockHub, planner: MockPlanner) -> Fixture {
        fixture_with_search(hub, planner, Arc::new(MockSearch))
    }

    fn fixture_with_search(
        hub: MockHub,
        planner: MockPlanner,
        search: Arc<dyn ServiceSearch>,
    ) -> Fixture {
        let tokens = Arc::new(TokenCache::new());
        let pending = Arc::new(PendingRegistry::new());
        let hub = Arc::new(hub);
        let planner = Arc::new(planner);
        let transcripts = Arc::new(TranscriptStore::new(60));
        let resolver = Arc::new(ActionResolver::new(tokens.clone(), pending.clone(), hub.clone()));
        let dispatcher = AskDispatcher::new(
            hub.clone(),
            resolver,
            pending.clone(),
            planner.clone(),
            Arc::new(EchoSynth),
            search,
            transcripts.clone(),
        );
        Fixture {
            tokens,
            pending,
            hub,
            planner,
            transcripts,
            dispatcher,
        }
    }

    fn account(id: &str, balance: i64, tx_count: usize) -> Account {
        Account {
            account_id: id.to_string(),
            label: Some(format!("Checking {}", id)),
            balance: Some(balance),
            transactions: (0..tx_count)
                .map(|i| Transaction {
                    date: Some(format!("2025-01-{:02}", i + 1)),
                    amount: Some(-(i as i64) * 1000),
                    merchant: Some(format!("merchant-{}", i)),
                    kind: Some("debit".to_string()),
                })
                .collect(),
            last_update: Some("2025-01-10".to_string()),
        }
    }

    fn summary_request(prompt: &str) -> AskRequest {
        AskRequest {
            user_id: "u1".to_string(),
            prompt: prompt.to_string(),
            account_id: Some("A1".to_string()),
            bank_name: "mock".to_string(),
            phone: Some("0901234567".to_string()),
        }
    }

    fn summary_planner() -> MockPlanner {
        MockPlanner::new(PlannerReply::FunctionCall {
            name: "get_account_summary".to_string(),
            arguments: json!({"account_id": "A1"}),
        })
    }

    // No cached token: the first request yields a challenge, and a follow-up
    // message holding the correct code resumes the suspended summary.
    #[tokio::test]
    async fn test_summary_without_token_then_otp_resume() {
        let f = fixture(MockHub::new(vec![account("A1", 500, 8)]), summary_planner());

        let out = f.dispatcher.dispatch(summary_request("how much is in A1?")).await.unwrap();
        assert_eq!(out.source, "challenge_issued");
        assert!(out.reply.contains("mock"));
        assert!(out.reply.contains("0901234567"));
        assert!(out.reply.contains("A1"));
        assert!(f.pending.waiting("u1").is_some());
        assert_eq!(f.hub.challenges_issued.load(Ordering::SeqCst), 1);

        // Follow-up message that is nothing but the code
        let out = f
            .dispatcher
            .dispatch(AskRequest {
                prompt: GOOD_OTP.to_string(),
                account_id: None,
                ..summary_request("")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "otp_verified_resume");
        // Short account id gets the fixed mask; only 5 of 8 transactions survive
        assert!(out.reply.contains("****"));
        assert!(out.reply.contains("merchant-4"));
        assert!(!out.reply.contains("merchant-5"));
        assert!(f.pending.waiting("u1").is_none());
        assert!(f.pending.challenge(&AuthKey::new("mock", "0901234567", "A1")).is_none());
    }

    #[tokio::test]
    async fn test_summary_with_valid_token_skips_challenge() {
        let f = fixture(MockHub::new(vec![account("A1", 500, 2)]), summary_planner());
        f.tokens.put(AuthKey::new("mock", "0901234567", "A1"), "tok-live".to_string(), 600);

        let out = f.dispatcher.dispatch(summary_request("balance please")).await.unwrap();
        assert_eq!(out.source, "account_summary");
        assert!(out.reply.contains("Balance: 500"));
        assert_eq!(f.hub.challenges_issued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_bank_lists_banks_without_state_change() {
        let f = fixture(MockHub::new(vec![account("A1", 500, 0)]), summary_planner());

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                bank_name: "unknownbank".to_string(),
                ..summary_request("balance?")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "unsupported_bank");
        assert!(out.reply.contains("mock"));
        assert!(f.transcripts.history("u1").is_empty());
        assert_eq!(f.pending.challenge_count(), 0);
        assert_eq!(f.hub.challenges_issued.load(Ordering::SeqCst), 0);
        assert_eq!(f.planner.calls.load(Ordering::SeqCst), 0);
    }

    // A second request while one challenge is outstanding replaces it; the
    // OTP then completes the newer request, never the abandoned one.
    #[tokio::test]
    async fn test_second_request_overwrites_pending_challenge() {
        let f = fixture(MockHub::new(vec![account("A1", 500, 0), account("A2", 900, 0)]), summary_planner());

        let out = f.dispatcher.dispatch(summary_request("balance of A1")).await.unwrap();
        assert_eq!(out.source, "challenge_issued");

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                account_id: Some("A2".to_string()),
                ..summary_request("no wait, A2")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "challenge_issued");
        assert_eq!(f.hub.challenges_issued.load(Ordering::SeqCst), 2);
        // Only one challenge per key pair; the waiting state now points at A2
        assert_eq!(f.pending.waiting("u1").unwrap().account_id, "A2");

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                prompt: GOOD_OTP.to_string(),
                account_id: None,
                ..summary_request("")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "otp_verified_resume");
        assert!(out.reply.contains("Balance: 900"));
        // The A2 key holds the token; A1 never completed
        assert!(f.tokens.get(&AuthKey::new("mock", "0901234567", "A2")).is_some());
        assert!(f.tokens.get(&AuthKey::new("mock", "0901234567", "A1")).is_none());
    }

    #[tokio::test]
    async fn test_stray_otp_without_waiting_state_goes_to_planner() {
        let f = fixture(
            MockHub::new(vec![account("A1", 500, 0)]),
            MockPlanner::final_text("just a number, noted"),
        );

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                prompt: "123456".to_string(),
                account_id: None,
                ..summary_request("")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "planner_final");
        assert_eq!(f.planner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_otp_permits_retry() {
        let f = fixture(MockHub::new(vec![account("A1", 500, 0)]), summary_planner());

        f.dispatcher.dispatch(summary_request("balance?")).await.unwrap();

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                prompt: "000000".to_string(),
                account_id: None,
                ..summary_request("")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "otp_failed");
        // Challenge and waiting state survive for the retry
        assert!(f.pending.waiting("u1").is_some());
        assert!(f.pending.challenge(&AuthKey::new("mock", "0901234567", "A1")).is_some());

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                prompt: GOOD_OTP.to_string(),
                account_id: None,
                ..summary_request("")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "otp_verified_resume");
    }

    #[tokio::test]
    async fn test_exhausted_attempts_clear_waiting_state() {
        let f = fixture(MockHub::new(vec![account("A1", 500, 0)]), summary_planner());
        f.dispatcher.dispatch(summary_request("balance?")).await.unwrap();

        for _ in 0..2 {
            let out = f
                .dispatcher
                .dispatch(AskRequest {
                    prompt: "000000".to_string(),
                    account_id: None,
                    ..summary_request("")
                })
                .await
                .unwrap();
            assert_eq!(out.source, "otp_failed");
        }

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                prompt: "000000".to_string(),
                account_id: None,
                ..summary_request("")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "otp_exhausted");
        assert!(f.pending.waiting("u1").is_none());
        assert_eq!(f.pending.challenge_count(), 0);
    }

    #[tokio::test]
    async fn test_listing_shortcut_bypasses_planner() {
        let f = fixture(
            MockHub::new(vec![account("A1", 500, 0)]),
            MockPlanner::final_text("should not be called"),
        );

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                prompt: "which accounts do I have?".to_string(),
                account_id: None,
                ..summary_request("")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "list_accounts_shortcut");
        assert!(out.reply.contains("Checking A1"));
        assert_eq!(f.planner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_balance_keyword_defeats_listing_shortcut() {
        let f = fixture(MockHub::new(vec![account("A1", 500, 0)]), summary_planner());

        let out = f
            .dispatcher
            .dispatch(summary_request("what's the balance on my account?"))
            .await
            .unwrap();
        // Went through the planner to the summary flow, not the listing
        assert_eq!(out.source, "challenge_issued");
        assert_eq!(f.planner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_service_keyword_on_final_reply_searches() {
        let f = fixture(
            MockHub::new(vec![account("A1", 500, 0)]),
            MockPlanner::final_text("generic answer"),
        );

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                prompt: "tell me about your loan services".to_string(),
                account_id: None,
                ..summary_request("")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "service_wrap");
        assert!(out.reply.contains("svc-hit for tell me about your loan services"));
    }

    #[tokio::test]
    async fn test_empty_search_falls_back_to_hub_services() {
        let f = fixture_with_search(
            MockHub::new(vec![account("A1", 500, 0)]),
            MockPlanner::final_text("generic answer"),
            Arc::new(EmptySearch),
        );

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                prompt: "what savings services are there?".to_string(),
                account_id: None,
                ..summary_request("")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "service_wrap");
        assert!(out.reply.contains("hub-svc for what savings services are there?"));
    }

    #[tokio::test]
    async fn test_missing_account_auto_resolves_to_first() {
        let f = fixture(
            MockHub::new(vec![account("FIRST", 1, 0)]),
            MockPlanner::new(PlannerReply::FunctionCall {
                name: "get_account_summary".to_string(),
                arguments: json!({}),
            }),
        );

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                account_id: None,
                ..summary_request("what's my balance?")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "challenge_issued");
        assert_eq!(f.pending.waiting("u1").unwrap().account_id, "FIRST");
    }

    #[tokio::test]
    async fn test_unresolvable_account_asks_for_clarification() {
        let f = fixture(
            MockHub::new(vec![]),
            MockPlanner::new(PlannerReply::FunctionCall {
                name: "get_account_summary".to_string(),
                arguments: json!({}),
            }),
        );

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                account_id: None,
                ..summary_request("what's my balance?")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "clarification");
        assert_eq!(f.hub.challenges_issued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_services_without_query_is_bad_request() {
        let f = fixture(
            MockHub::new(vec![account("A1", 500, 0)]),
            MockPlanner::new(PlannerReply::FunctionCall {
                name: "search_services".to_string(),
                arguments: json!({}),
            }),
        );

        let err = f
            .dispatcher
            .dispatch(AskRequest {
                account_id: None,
                ..summary_request("find me things")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_planner_function_degrades_to_apology() {
        let f = fixture(
            MockHub::new(vec![account("A1", 500, 0)]),
            MockPlanner::new(PlannerReply::FunctionCall {
                name: "transfer_funds".to_string(),
                arguments: json!({}),
            }),
        );

        let out = f
            .dispatcher
            .dispatch(AskRequest {
                account_id: None,
                ..summary_request("wire money to my cousin")
            })
            .await
            .unwrap();
        assert_eq!(out.source, "unsupported_action");
        assert!(out.reply.contains("transfer_funds"));
    }

    #[tokio::test]
    async fn test_terminal_replies_are_appended_to_transcript() {
        let f = fixture(MockHub::new(vec![account("A1", 500, 0)]), summary_planner());

        f.dispatcher.dispatch(summary_request("balance?")).await.unwrap();
        let history = f.transcripts.history("u1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "balance?");
        assert!(history[1].content.contains("OTP"));
    }

    #[test]
    fn test_otp_shape_detection() {
        assert!(is_otp_shaped("12345"));
        assert!(is_otp_shaped(" 123456 "));
        assert!(!is_otp_shaped("1234"));
        assert!(!is_otp_shaped("1234567"));
        assert!(!is_otp_shaped("12a456"));
        assert!(!is_otp_shaped("balance"));
    }
}
