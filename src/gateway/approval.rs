//! LLM-backed approval client.
//!
//! Sends a candidate setup plus the zone context to a chat-completions
//! endpoint and parses a structured verdict out of the reply. Any transport
//! or parse failure surfaces as an `Err`; the orchestrator maps that to a
//! rejected verdict so the service can never take down a cycle.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{ApprovalService, ApprovalVerdict};
use crate::analysis::zones::ZoneLists;
use crate::options::chain::ChainAnalysis;
use crate::options::strike::TradeSetup;

/// Chat completions endpoint
pub const API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Model used for setup evaluation
const MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You are a disciplined intraday options risk reviewer. \
Evaluate the proposed trade against the supplied zone and option-chain context. \
Reply with JSON only: {\"approved\": bool, \"probability_estimate\": 0-100, \"reasoning\": string}.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct LlmApprovalClient {
    client: Client,
    api_url: String,
    api_key: String,
}

impl LlmApprovalClient {
    pub fn new(api_key: String) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("failed to build HTTP client")?,
            api_url: API_URL.to_string(),
            api_key,
        })
    }

    /// Override the API URL (test servers).
    pub fn with_api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url;
        self
    }

    async fn complete(&self, user_content: String) -> Result<String> {
        let body = serde_json::json!({
            "model": MODEL,
            "temperature": 0.1,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_content},
            ],
        });

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("approval request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("approval service returned {status}: {body}"));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("failed to parse approval response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("approval response had no choices"))
    }
}

/// Pull the verdict JSON out of a reply that may wrap it in code fences or
/// surrounding prose.
fn parse_verdict(content: &str) -> Result<ApprovalVerdict> {
    let start = content
        .find('{')
        .ok_or_else(|| anyhow!("no JSON object in approval reply"))?;
    let end = content
        .rfind('}')
        .ok_or_else(|| anyhow!("no JSON object in approval reply"))?;
    let verdict: ApprovalVerdict = serde_json::from_str(&content[start..=end])
        .context("malformed verdict JSON in approval reply")?;
    if !(0.0..=100.0).contains(&verdict.probability_estimate) {
        return Err(anyhow!(
            "probability estimate {} out of range",
            verdict.probability_estimate
        ));
    }
    Ok(verdict)
}

#[async_trait]
impl ApprovalService for LlmApprovalClient {
    async fn evaluate_setup(
        &self,
        setup: &TradeSetup,
        zones: &ZoneLists,
        chain_analysis: Option<&ChainAnalysis>,
    ) -> Result<ApprovalVerdict> {
        let payload = serde_json::json!({
            "setup": setup,
            "demand_zones": zones.demand,
            "supply_zones": zones.supply,
            "option_analysis": chain_analysis,
        });
        let content = self.complete(payload.to_string()).await?;
        let verdict = parse_verdict(&content)?;
        debug!(
            approved = verdict.approved,
            probability = verdict.probability_estimate,
            "approval verdict received"
        );
        Ok(verdict)
    }

    async fn analyze_zones(&self, zones: &ZoneLists) -> Result<serde_json::Value> {
        let payload = serde_json::json!({
            "demand_zones": zones.demand,
            "supply_zones": zones.supply,
        });
        let content = self.complete(payload.to_string()).await?;
        Ok(serde_json::Value::String(content))
    }
}
