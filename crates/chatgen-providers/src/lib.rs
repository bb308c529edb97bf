//! Chatgen Providers
//!
//! Media generation backends (image, video, audio, edit, chat) behind one trait,
//! plus the static per-task provider orders used for failover.

mod backoff;
mod order;

pub use backoff::RetryPolicy;
pub use order::{remaining_candidates, ProviderOrder};

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

const HTTP_TIMEOUT_SECS: u64 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Image,
    Video,
    Audio,
    ImageEdit,
    Music,
    Chat,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Image => "image",
            TaskKind::Video => "video",
            TaskKind::Audio => "audio",
            TaskKind::ImageEdit => "image_edit",
            TaskKind::Music => "music",
            TaskKind::Chat => "chat",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "image" => Ok(TaskKind::Image),
            "video" => Ok(TaskKind::Video),
            "audio" | "speech" | "tts" => Ok(TaskKind::Audio),
            "image_edit" | "edit" => Ok(TaskKind::ImageEdit),
            "music" => Ok(TaskKind::Music),
            "chat" | "text" => Ok(TaskKind::Chat),
            _ => Err(format!("Unknown task kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Gemini,
    Openai,
    Grok,
    Sora,
    Veo,
    Kling,
    Elevenlabs,
    Suno,
}

impl ProviderId {
    pub const ALL: [ProviderId; 8] = [
        ProviderId::Gemini,
        ProviderId::Openai,
        ProviderId::Grok,
        ProviderId::Sora,
        ProviderId::Veo,
        ProviderId::Kling,
        ProviderId::Elevenlabs,
        ProviderId::Suno,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::Openai => "openai",
            ProviderId::Grok => "grok",
            ProviderId::Sora => "sora",
            ProviderId::Veo => "veo",
            ProviderId::Kling => "kling",
            ProviderId::Elevenlabs => "elevenlabs",
            ProviderId::Suno => "suno",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "Gemini",
            ProviderId::Openai => "OpenAI",
            ProviderId::Grok => "Grok",
            ProviderId::Sora => "Sora 2",
            ProviderId::Veo => "Veo 3",
            ProviderId::Kling => "Kling",
            ProviderId::Elevenlabs => "ElevenLabs",
            ProviderId::Suno => "Suno",
        }
    }

    pub fn capabilities(&self) -> &'static [TaskKind] {
        match self {
            ProviderId::Gemini => &[
                TaskKind::Image,
                TaskKind::ImageEdit,
                TaskKind::Audio,
                TaskKind::Chat,
            ],
            ProviderId::Openai => &[
                TaskKind::Image,
                TaskKind::ImageEdit,
                TaskKind::Audio,
                TaskKind::Chat,
            ],
            ProviderId::Grok => &[TaskKind::Image, TaskKind::Chat],
            ProviderId::Sora | ProviderId::Veo | ProviderId::Kling => &[TaskKind::Video],
            ProviderId::Elevenlabs => &[TaskKind::Audio],
            ProviderId::Suno => &[TaskKind::Music],
        }
    }

    pub fn supports(&self, task: TaskKind) -> bool {
        self.capabilities().contains(&task)
    }

    /// Generates images but cannot edit an existing one.
    pub fn is_create_only(&self) -> bool {
        self.supports(TaskKind::Image) && !self.supports(TaskKind::ImageEdit)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" | "nano-banana" | "גמיני" | "ג'מיני" => Ok(ProviderId::Gemini),
            "openai" | "gpt" | "chatgpt" | "dall-e" | "dalle" | "אופנאי" | "צ'אטגפט" => {
                Ok(ProviderId::Openai)
            }
            "grok" | "xai" | "x.ai" | "גרוק" => Ok(ProviderId::Grok),
            "sora" | "sora2" | "sora-2" | "סורה" => Ok(ProviderId::Sora),
            "veo" | "veo3" | "veo-3" | "וויאו" => Ok(ProviderId::Veo),
            "kling" | "klingai" | "קלינג" => Ok(ProviderId::Kling),
            "elevenlabs" | "eleven" | "11labs" => Ok(ProviderId::Elevenlabs),
            "suno" | "סונו" => Ok(ProviderId::Suno),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Input for one generation call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MediaRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MediaRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Outcome of a provider call that reached the backend. Transport failures are `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderReply {
    Url(String),
    Text(String),
    Failed(String),
}

impl ProviderReply {
    pub fn parse(value: &serde_json::Value) -> Result<Self> {
        if let Some(error) = value.get("error") {
            let message = match error {
                serde_json::Value::String(text) => text.clone(),
                other => other
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            };
            return Ok(ProviderReply::Failed(message));
        }
        if let Some(url) = value.get("url").and_then(|v| v.as_str()) {
            if !url.trim().is_empty() {
                return Ok(ProviderReply::Url(url.trim().to_string()));
            }
        }
        if let Some(text) = value.get("text").and_then(|v| v.as_str()) {
            return Ok(ProviderReply::Text(text.to_string()));
        }
        Err(anyhow!(
            "Provider response has neither 'url', 'text' nor 'error': {}",
            value
        ))
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, ProviderReply::Failed(_))
    }
}

#[async_trait::async_trait]
pub trait MediaProvider: Send + Sync {
    fn id(&self) -> ProviderId;
    fn supports(&self, task: TaskKind) -> bool {
        self.id().supports(task)
    }
    async fn generate(&self, task: TaskKind, request: &MediaRequest) -> Result<ProviderReply>;
}

/// JSON-over-HTTP backend: `POST {base_url}/{task}` answering `{url}`, `{text}` or `{error}`.
pub struct HttpMediaProvider {
    client: Client,
    id: ProviderId,
    api_key: String,
    base_url: String,
    model: Option<String>,
    tasks: Vec<TaskKind>,
    retry_policy: RetryPolicy,
}

impl HttpMediaProvider {
    pub fn new(
        id: ProviderId,
        api_key: String,
        base_url: String,
        model: Option<String>,
        retry_policy: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            id,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            tasks: id.capabilities().to_vec(),
            retry_policy,
        })
    }

    /// Restrict the endpoint to a subset of the provider's capabilities.
    pub fn with_tasks(mut self, tasks: Vec<TaskKind>) -> Self {
        let id = self.id;
        self.tasks = tasks.into_iter().filter(|t| id.supports(*t)).collect();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, request: &MediaRequest) -> Result<serde_json::Value> {
        let mut body = serde_json::to_value(request)?;
        if let (Some(model), Some(map)) = (&self.model, body.as_object_mut()) {
            map.insert("model".to_string(), serde_json::json!(model));
        }
        Ok(body)
    }

    async fn request_task(&self, task: TaskKind, body: serde_json::Value) -> Result<ProviderReply> {
        let url = format!("{}/{}", self.base_url, task.as_str());
        let start = Instant::now();
        let mut attempt: u32 = 1;

        loop {
            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    let headers = response.headers().clone();
                    let raw_body = response.text().await?;

                    if status.is_success() {
                        let parsed: serde_json::Value =
                            serde_json::from_str(&raw_body).map_err(|e| {
                                anyhow!(
                                    "Provider response decode failed at {}: {} | body={}",
                                    url,
                                    e,
                                    backoff::body_excerpt(&raw_body)
                                )
                            })?;
                        return ProviderReply::parse(&parsed);
                    }

                    let snippet = backoff::body_excerpt(&raw_body);
                    if !backoff::is_transient_status(status) {
                        // Backend refused the request: an expected failure, not a transport one.
                        return Ok(ProviderReply::Failed(format!("HTTP {}: {}", status, snippet)));
                    }

                    if let Some(delay) = self.retry_policy.pause_before(
                        attempt,
                        backoff::server_hint(&headers),
                        start.elapsed(),
                    ) {
                        tracing::warn!(
                            provider = %self.id,
                            task = %task,
                            status = %status.as_u16(),
                            attempt = attempt,
                            delay_ms = delay.as_millis(),
                            "Retrying media request after transient HTTP error"
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    return Ok(ProviderReply::Failed(format!("HTTP {}: {}", status, snippet)));
                }
                Err(err) => {
                    if !backoff::is_transient_transport(&err) {
                        return Err(err.into());
                    }

                    if let Some(delay) =
                        self.retry_policy.pause_before(attempt, None, start.elapsed())
                    {
                        tracing::warn!(
                            provider = %self.id,
                            task = %task,
                            attempt = attempt,
                            delay_ms = delay.as_millis(),
                            error = %err,
                            "Retrying media request after transient network error"
                        );
                        sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(err.into());
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MediaProvider for HttpMediaProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn supports(&self, task: TaskKind) -> bool {
        self.tasks.contains(&task)
    }

    async fn generate(&self, task: TaskKind, request: &MediaRequest) -> Result<ProviderReply> {
        if !self.supports(task) {
            return Ok(ProviderReply::Failed(format!(
                "{} does not support {}",
                self.id.display_name(),
                task
            )));
        }
        let body = self.request_body(request)?;
        self.request_task(task, body).await
    }
}

/// Lookup of configured backends by provider id.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MediaProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.iter().map(|p| p.id()).collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering the same id twice replaces the earlier backend.
    pub fn add_provider(&mut self, provider: Arc<dyn MediaProvider>) {
        let id = provider.id();
        self.providers.retain(|p| p.id() != id);
        self.providers.push(provider);
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn MediaProvider>> {
        self.providers.iter().find(|p| p.id() == id).cloned()
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpMediaProvider, ProviderId, ProviderReply, RetryPolicy, TaskKind};

    #[test]
    fn provider_aliases_resolve() {
        assert_eq!("veo3".parse::<ProviderId>(), Ok(ProviderId::Veo));
        assert_eq!("Sora-2".parse::<ProviderId>(), Ok(ProviderId::Sora));
        assert_eq!("xai".parse::<ProviderId>(), Ok(ProviderId::Grok));
        assert_eq!("גרוק".parse::<ProviderId>(), Ok(ProviderId::Grok));
        assert_eq!(" ChatGPT ".parse::<ProviderId>(), Ok(ProviderId::Openai));
        assert!("midjourney".parse::<ProviderId>().is_err());
    }

    #[test]
    fn grok_is_create_only_for_images() {
        assert!(ProviderId::Grok.is_create_only());
        assert!(!ProviderId::Gemini.is_create_only());
        assert!(!ProviderId::Kling.is_create_only());
        assert!(ProviderId::Kling.supports(TaskKind::Video));
    }

    #[test]
    fn reply_parse_reads_url_text_and_error() {
        let url = ProviderReply::parse(&serde_json::json!({"url": " https://cdn/x.png "}))
            .expect("url reply");
        assert_eq!(url, ProviderReply::Url("https://cdn/x.png".to_string()));

        let text = ProviderReply::parse(&serde_json::json!({"text": "shalom"})).expect("text");
        assert_eq!(text, ProviderReply::Text("shalom".to_string()));

        let failed = ProviderReply::parse(&serde_json::json!({
            "error": {"message": "safety filter", "code": 400}
        }))
        .expect("error reply");
        assert_eq!(failed, ProviderReply::Failed("safety filter".to_string()));
        assert!(!failed.is_success());
    }

    #[test]
    fn reply_parse_errors_on_empty_object() {
        assert!(ProviderReply::parse(&serde_json::json!({})).is_err());
    }

    #[test]
    fn with_tasks_drops_unsupported_capabilities() {
        let provider = HttpMediaProvider::new(
            ProviderId::Grok,
            "k".to_string(),
            "https://media.example/grok/".to_string(),
            None,
            RetryPolicy::default(),
        )
        .expect("client")
        .with_tasks(vec![TaskKind::Image, TaskKind::ImageEdit]);
        assert_eq!(provider.base_url(), "https://media.example/grok");
        assert!(super::MediaProvider::supports(&provider, TaskKind::Image));
        assert!(!super::MediaProvider::supports(&provider, TaskKind::ImageEdit));
    }

    #[test]
    fn request_body_includes_model_override() {
        let provider = HttpMediaProvider::new(
            ProviderId::Openai,
            "k".to_string(),
            "https://media.example/openai".to_string(),
            Some("gpt-image-1".to_string()),
            RetryPolicy::default(),
        )
        .expect("client");
        let mut request = super::MediaRequest::prompt("a fox");
        request.image_url = Some("https://cdn/fox.png".to_string());
        let body = provider.request_body(&request).expect("body");
        assert_eq!(body["model"], "gpt-image-1");
        assert_eq!(body["prompt"], "a fox");
        assert_eq!(body["image_url"], "https://cdn/fox.png");
        assert!(body.get("target_language").is_none());
    }
}
