use crate::diagnoser::{parse_diagnosis, AlertContext, Diagnoser};
use crate::models::{ChatMessage, ChatRequest, ChatResponse};
use crate::prompt::{build_diagnosis_prompt, SYSTEM_PROMPT};
use anyhow::{Context, Result};
use async_trait::async_trait;
use oxheal_common::remediation::Diagnosis;
use reqwest::Client;
use std::time::Duration;

/// Diagnoser backed by any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct ChatDiagnoser {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
    max_tokens: Option<usize>,
    temperature: Option<f32>,
}

impl ChatDiagnoser {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<usize>,
        temperature: Option<f32>,
    ) -> Result<Self> {
        // Per-call deadlines come from `diagnose`; this only caps runaway connections.
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            api_key,
            model: model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            client,
            max_tokens,
            temperature,
        })
    }

    async fn call_api(&self, prompt: &str) -> Result<String> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(
            model = %self.model,
            prompt_length = prompt.len(),
            "Calling chat completions API"
        );

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("Failed to send diagnosis request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Diagnosis request failed");
            anyhow::bail!("chat completions error {status}: {body}");
        }

        let chat_resp: ChatResponse = resp
            .json()
            .await
            .context("Failed to parse chat completions response")?;

        tracing::debug!(usage = ?chat_resp.usage, "Diagnosis response received");

        chat_resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Empty response from chat completions API"))
    }
}

#[async_trait]
impl Diagnoser for ChatDiagnoser {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn diagnose(&self, context: &AlertContext, timeout: Duration) -> Result<Diagnosis> {
        let prompt = build_diagnosis_prompt(context);
        let content = tokio::time::timeout(timeout, self.call_api(&prompt))
            .await
            .with_context(|| format!("diagnosis timed out after {}ms", timeout.as_millis()))??;
        Ok(parse_diagnosis(&content, self.provider()))
    }
}
