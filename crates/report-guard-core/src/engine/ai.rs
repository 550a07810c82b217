use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::domain::{EngineKind, FindingDraft, ProviderConfig, Severity};
use crate::resolver::Resolved;
use crate::scoring::{score_findings, SeverityWeights};

use super::{EngineError, Evaluation, Evaluator};

const MAX_REPORT_CHARS: usize = 12_000;
const MAX_COMPLETION_TOKENS: u32 = 1024;

const SYSTEM_PROMPT: &str = "You are a compliance reviewer for asbestos-inventory reports. \
Judge the report against the supplied checklist and respond with strict JSON only: \
{\"summary\": \"...\", \"findings\": [{\"rule_id\": \"...\", \"severity\": \"low|medium|high|critical\", \
\"message\": \"...\", \"section\": null, \"evidence\": null, \"suggestion\": null}]}. \
Report only genuine checklist violations; an empty findings array means the report passes.";

/// Transport-level failures from an AI provider. All of these are transient
/// from the orchestrator's point of view.
#[derive(Debug, Error)]
pub enum AiClientError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider response missing message content")]
    EmptyResponse,
}

/// Client abstraction over the provider HTTP call, so the evaluator can be
/// exercised with scripted responses in tests.
#[async_trait]
pub trait AiClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AiClientError>;
}

/// Reqwest-backed client speaking either the Anthropic messages shape or the
/// OpenAI chat-completions shape, chosen by the provider id. Retries live in
/// the orchestrator's attempt budget, not here.
pub struct HttpAiClient {
    http: Client,
    provider: String,
    url: String,
    credential: String,
    model: String,
}

impl HttpAiClient {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, AiClientError> {
        let (default_base, path) = match config.provider.as_str() {
            "anthropic" => ("https://api.anthropic.com", "/v1/messages"),
            _ => ("https://api.openai.com", "/v1/chat/completions"),
        };
        let base = config
            .endpoint
            .clone()
            .unwrap_or_else(|| default_base.to_string());
        let url = format!("{}{}", base.trim_end_matches('/'), path);
        let http = Client::builder()
            .user_agent(concat!("report-guard/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| AiClientError::Request(err.to_string()))?;
        Ok(Self {
            http,
            provider: config.provider.clone(),
            url,
            credential: config.credential.clone(),
            model: config.model.clone(),
        })
    }

    async fn complete_anthropic(&self, system: &str, user: &str) -> Result<String, AiClientError> {
        let payload = AnthropicRequest {
            model: self.model.clone(),
            system: system.to_string(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: user.to_string(),
            }],
            max_tokens: MAX_COMPLETION_TOKENS,
        };
        let response = self
            .http
            .post(&self.url)
            .header("x-api-key", &self.credential)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .map_err(|err| AiClientError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiClientError::Status { status, body });
        }
        let message: AnthropicResponse = response
            .json()
            .await
            .map_err(|err| AiClientError::Request(err.to_string()))?;
        message
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or(AiClientError::EmptyResponse)
    }

    async fn complete_openai(&self, system: &str, user: &str) -> Result<String, AiClientError> {
        let payload = OpenAiRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".into(),
                    content: user.to_string(),
                },
            ],
        };
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.credential)
            .json(&payload)
            .send()
            .await
            .map_err(|err| AiClientError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiClientError::Status { status, body });
        }
        let message: OpenAiResponse = response
            .json()
            .await
            .map_err(|err| AiClientError::Request(err.to_string()))?;
        message
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(AiClientError::EmptyResponse)
    }
}

#[async_trait]
impl AiClient for HttpAiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AiClientError> {
        match self.provider.as_str() {
            "anthropic" => self.complete_anthropic(system, user).await,
            _ => self.complete_openai(system, user).await,
        }
    }
}

/// AI-assisted strategy: send the checklist and report text to the provider
/// and require a strictly structured JSON verdict. A malformed response is a
/// transient failure, never a fabricated score.
pub struct AiEvaluator {
    client: Arc<dyn AiClient>,
    model: String,
    weights: SeverityWeights,
}

impl AiEvaluator {
    pub fn new(client: Arc<dyn AiClient>, model: impl Into<String>, weights: SeverityWeights) -> Self {
        Self {
            client,
            model: model.into(),
            weights,
        }
    }

    fn build_prompt(resolved: &Resolved, report_text: &str) -> String {
        let mut prompt = String::new();
        if let Some(instructions) = &resolved.definition.instructions {
            prompt.push_str(instructions);
            prompt.push_str("\n\n");
        }
        prompt.push_str("Checklist definition:\n");
        prompt.push_str(&resolved.content);
        prompt.push_str("\n\nReport text:\n");
        prompt.push_str(&truncate(report_text, MAX_REPORT_CHARS));
        prompt
    }

    fn parse_verdict(raw: &str) -> Result<AiVerdict, EngineError> {
        serde_json::from_str(raw.trim())
            .map_err(|err| EngineError::Transient(format!("malformed provider response: {err}")))
    }
}

#[async_trait]
impl Evaluator for AiEvaluator {
    #[instrument(name = "ai_evaluate", skip(self, report_text, resolved), fields(checklist = %resolved.checklist, model = %self.model))]
    async fn evaluate(
        &self,
        report_text: &str,
        resolved: &Resolved,
    ) -> Result<Evaluation, EngineError> {
        let prompt = Self::build_prompt(resolved, report_text);
        let raw = self
            .client
            .complete(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|err| EngineError::Transient(err.to_string()))?;
        let verdict = Self::parse_verdict(&raw)?;

        let mut findings: Vec<FindingDraft> = verdict
            .findings
            .into_iter()
            .map(|finding| FindingDraft {
                rule_id: finding.rule_id,
                section: finding.section,
                severity: finding.severity,
                message: finding.message,
                suggestion: finding.suggestion,
                evidence: finding.evidence,
                tags: finding.tags,
            })
            .collect();
        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });

        let scored = score_findings(&findings, resolved.definition.item_count(), &self.weights);
        debug!(findings = findings.len(), score = %scored.score, "ai evaluation completed");

        Ok(Evaluation {
            engine: EngineKind::Ai,
            engine_version: self.model.clone(),
            summary: verdict.summary,
            findings,
            scored,
        })
    }

    fn kind(&self) -> EngineKind {
        EngineKind::Ai
    }
}

fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "…"
}

#[derive(Deserialize)]
struct AiVerdict {
    summary: String,
    #[serde(default)]
    findings: Vec<AiFinding>,
}

#[derive(Deserialize)]
struct AiFinding {
    rule_id: String,
    severity: Severity,
    message: String,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    evidence: Option<String>,
    #[serde(default)]
    suggestion: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    system: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    _type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChecklistDefinition, ProviderId, Score};
    use crate::resolver::ResolutionScope;
    use chrono::Utc;
    use httpmock::prelude::*;

    const CHECKLIST: &str = r#"{
        "title": "t",
        "items": [
            {"id": "A", "severity": "critical", "kind": "keyword", "pattern": "sampling plan", "message": "m"},
            {"id": "B", "severity": "high", "kind": "keyword", "pattern": "risk class", "message": "m"}
        ]
    }"#;

    fn resolved() -> Resolved {
        Resolved {
            checklist: "inv".into(),
            scope: ResolutionScope::BaseVersion(1),
            content: CHECKLIST.to_string(),
            definition: ChecklistDefinition::parse(CHECKLIST).unwrap(),
        }
    }

    struct ScriptedClient {
        response: String,
    }

    #[async_trait]
    impl AiClient for ScriptedClient {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, AiClientError> {
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn structured_verdict_is_scored_deterministically() {
        let client = Arc::new(ScriptedClient {
            response: r#"{
                "summary": "Sampling plan missing; lab accreditation unclear.",
                "findings": [
                    {"rule_id": "A", "severity": "critical", "message": "No sampling plan."},
                    {"rule_id": "B", "severity": "high", "message": "No risk classification.", "evidence": "…"}
                ]
            }"#
            .into(),
        });
        let evaluator = AiEvaluator::new(client, "claude-3-haiku", SeverityWeights::default());
        let evaluation = evaluator.evaluate("report text", &resolved()).await.unwrap();

        assert_eq!(evaluation.engine, EngineKind::Ai);
        assert_eq!(evaluation.engine_version, "claude-3-haiku");
        assert_eq!(evaluation.scored.score, Score::from_hundredths(5_500));
        assert_eq!(evaluation.scored.rules_failed, 2);
        assert_eq!(evaluation.findings[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn non_json_response_is_transient() {
        let client = Arc::new(ScriptedClient {
            response: "I could not find any problems with this report.".into(),
        });
        let evaluator = AiEvaluator::new(client, "claude-3-haiku", SeverityWeights::default());
        let err = evaluator.evaluate("report", &resolved()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unknown_severity_is_transient() {
        let client = Arc::new(ScriptedClient {
            response: r#"{"summary": "s", "findings": [{"rule_id": "A", "severity": "catastrophic", "message": "m"}]}"#.into(),
        });
        let evaluator = AiEvaluator::new(client, "claude-3-haiku", SeverityWeights::default());
        let err = evaluator.evaluate("report", &resolved()).await.unwrap_err();
        assert!(matches!(err, EngineError::Transient(_)));
    }

    #[test]
    fn truncate_long_input_appends_ellipsis() {
        let result = truncate("abcdefghij", 4);
        assert_eq!(result, "abcd…");
        assert_eq!(truncate("abc", 4), "abc");
    }

    fn provider_config(provider: &str, url: String) -> ProviderConfig {
        ProviderConfig {
            id: ProviderId::new(),
            name: "test".into(),
            provider: provider.into(),
            model: "test-model".into(),
            credential: "test-key".into(),
            endpoint: Some(url),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn anthropic_shape_round_trips() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/messages")
                .header("x-api-key", "test-key");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"content":[{"type":"text","text":"{\"summary\":\"ok\",\"findings\":[]}"}]}"#);
        });

        let client =
            HttpAiClient::new(&provider_config("anthropic", server.base_url()), Duration::from_secs(5))
                .unwrap();
        let raw = client.complete("system", "user").await.unwrap();
        assert!(raw.contains("\"summary\""));
        mock.assert();
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn openai_error_status_is_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(503).body("overloaded");
        });

        let client =
            HttpAiClient::new(&provider_config("openai", server.base_url()), Duration::from_secs(5))
                .unwrap();
        let err = client.complete("system", "user").await.unwrap_err();
        assert!(matches!(err, AiClientError::Status { status: 503, .. }));
    }
}
