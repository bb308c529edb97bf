//! Chatgen Core
//!
//! Command retry engine with provider fallback cascade

pub mod ack;
pub mod cascade;
pub mod error;
pub mod media_tools;
pub mod multi_step;
pub mod retry;
pub mod selector;
pub mod step_filter;
pub mod store;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

use anyhow::{anyhow, Context, Result};
use chatgen_config::{Config, ProvidersConfig};
use chatgen_providers::{
    HttpMediaProvider, ProviderId, ProviderOrder, ProviderRegistry, RetryPolicy, TaskKind,
};
use chatgen_storage::Storage;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use ack::{AckNotifier, Language};
pub use cascade::{CascadeSuccess, FallbackCascade};
pub use error::{CascadeError, CascadeFailure, EngineError, FailureList, RestorableInput};
pub use media_tools::{register_media_tools, MediaTool};
pub use multi_step::{MultiStepExecutor, PlanRunner, SequentialPlanRunner};
pub use retry::{retry_tool_definition, RetryArgs, RetryEngine, RETRY_TOOL_NAME};
pub use selector::{resolve_provider, ProviderSource, ResolvedProvider};
pub use step_filter::{describe_steps, filter_steps, FilteredPlan, Step, StepSelection};
pub use store::CommandStore;
pub use tools::{ToolCategory, ToolId};

/// Who is asking, and in which language replies go out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatContext {
    pub chat_id: String,
    /// Message that triggered the request; acks quote it when present.
    pub message_id: Option<String>,
    pub language: Language,
}

impl ChatContext {
    pub fn new(chat_id: impl Into<String>, language: Language) -> Self {
        Self {
            chat_id: chat_id.into(),
            message_id: None,
            language,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        quoted_message_id: Option<&str>,
        typing_delay_ms: Option<u64>,
    ) -> Result<()>;
}

/// Per-step diagnostics of a plan execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepReport {
    pub step_number: usize,
    pub tool: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

/// Result handed back to the agent. Engine failures are values here, never errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepReport>,
}

impl ToolResponse {
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn media(url: impl Into<String>, provider: ProviderId) -> Self {
        Self {
            success: true,
            media_urls: vec![url.into()],
            provider: Some(provider),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Value stored as the command's `result`.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    async fn execute(&self, args: serde_json::Value, ctx: &ChatContext) -> Result<ToolResponse>;
}

/// Invocable tools by name. Built once at startup and passed to whoever dispatches.
pub trait ToolRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<Arc<dyn Tool>>;
    fn names(&self) -> Vec<String>;
}

#[derive(Default, Clone)]
pub struct StaticToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        let name = name.into();
        debug!("Registered tool '{}'", name);
        self.tools.insert(name, tool);
    }
}

impl ToolRegistry for StaticToolRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    pub model: Option<String>,
    pub max_iterations: usize,
    pub timeout: Duration,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.agent.model.clone(),
            max_iterations: config.agent.max_iterations,
            timeout: Duration::from_millis(config.agent.timeout_ms),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub fn retry_policy_from_config(config: &ProvidersConfig) -> RetryPolicy {
    let mut policy = RetryPolicy::default();
    if let Some(cfg) = &config.http_retry {
        if let Some(v) = cfg.window_secs {
            policy.window_secs = v;
        }
        if let Some(v) = cfg.initial_delay_secs {
            policy.initial_delay_secs = v;
        }
        if let Some(v) = cfg.backoff_factor {
            policy.backoff_factor = v.max(1);
        }
        if let Some(v) = cfg.max_delay_secs {
            policy.max_delay_secs = v;
        }
    }
    policy
}

pub fn build_provider_registry(config: &ProvidersConfig) -> Result<ProviderRegistry> {
    let policy = retry_policy_from_config(config);
    let mut registry = ProviderRegistry::new();

    for provider_config in &config.providers {
        let id: ProviderId = provider_config
            .name
            .parse()
            .map_err(|e: String| anyhow!("Provider '{}': {}", provider_config.name, e))?;
        if registry.get(id).is_some() {
            anyhow::bail!(
                "Provider '{}' configures {} a second time",
                provider_config.name,
                id
            );
        }
        let base_url = provider_config
            .base_url
            .clone()
            .ok_or_else(|| anyhow!("Provider '{}' has no base_url", provider_config.name))?;

        let mut provider = HttpMediaProvider::new(
            id,
            provider_config.api_key.clone(),
            base_url,
            provider_config.model.clone(),
            policy.clone(),
        )
        .with_context(|| format!("Failed to build HTTP client for '{}'", id))?;

        if !provider_config.tasks.is_empty() {
            let tasks = provider_config
                .tasks
                .iter()
                .map(|t| t.parse::<TaskKind>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| anyhow!("Provider '{}': {}", provider_config.name, e))?;
            provider = provider.with_tasks(tasks);
        }

        info!("Registered provider {} at {}", id, provider.base_url());
        registry.add_provider(Arc::new(provider));
    }

    Ok(registry)
}

pub fn build_provider_order(config: &ProvidersConfig) -> Result<ProviderOrder> {
    let mut order = ProviderOrder::default();
    if let Some(fallback) = &config.fallback {
        for (task, list) in fallback.lists() {
            let task: TaskKind = task.parse().map_err(|e: String| anyhow!(e))?;
            order = order.with_list(task, list)?;
        }
    }
    Ok(order)
}

/// Wire providers, media tools and the retry engine from configuration.
pub fn build_engine(
    config: &Config,
    storage: Arc<Mutex<Storage>>,
    messenger: Arc<dyn Messenger>,
) -> Result<RetryEngine> {
    let providers = build_provider_registry(&config.providers)?;
    let order = build_provider_order(&config.providers)?;
    let notifier = AckNotifier::new(messenger, config.chat.ack_typing_delay_ms);
    let settings = AgentSettings::from_config(config);

    let cascade = Arc::new(FallbackCascade::new(
        providers,
        order.clone(),
        notifier.clone(),
    ));
    let mut tools = StaticToolRegistry::new();
    register_media_tools(&mut tools, cascade);
    let tools: Arc<dyn ToolRegistry> = Arc::new(tools);

    let runner = Arc::new(SequentialPlanRunner::new(tools.clone()));
    let executor = MultiStepExecutor::new(runner, notifier.clone());

    Ok(RetryEngine::new(
        CommandStore::new(storage),
        tools,
        executor,
        notifier,
        order,
        settings,
    ))
}
