//! Retry router
//!
//! Entry point of `retry_last_command`: loads the chat's last command and replays it,
//! either as a single tool call or as a filtered multi-step plan.

use crate::ack::{AckNotifier, Language};
use crate::error::{EngineError, RestorableInput};
use crate::multi_step::MultiStepExecutor;
use crate::selector::resolve_provider;
use crate::step_filter::filter_steps;
use crate::store::CommandStore;
use crate::tools::{ToolCategory, ToolId};
use crate::{AgentSettings, ChatContext, ToolRegistry, ToolResponse};
use chatgen_providers::{FunctionDefinition, ProviderId, ProviderOrder, ToolDefinition};
use chatgen_storage::CommandMetadata;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const RETRY_TOOL_NAME: &str = "retry_last_command";

const NO_OVERRIDE: &str = "none";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Arguments of `retry_last_command` as sent by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RetryArgs {
    #[serde(default)]
    pub provider_override: Option<String>,
    #[serde(default)]
    pub modifications: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub step_numbers: Vec<usize>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub step_tools: Vec<String>,
}

impl RetryArgs {
    /// Parsed override. `"none"`, blanks and unknown names mean no override.
    pub fn provider(&self) -> Option<ProviderId> {
        let raw = self.provider_override.as_deref()?.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case(NO_OVERRIDE) {
            return None;
        }
        match raw.parse() {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!("Ignoring provider override: {}", e);
                None
            }
        }
    }

    pub fn modifications(&self) -> Option<&str> {
        self.modifications
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

pub fn retry_tool_definition() -> ToolDefinition {
    let mut providers: Vec<&str> = ProviderId::ALL.iter().map(|p| p.as_str()).collect();
    providers.push(NO_OVERRIDE);

    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: RETRY_TOOL_NAME.to_string(),
            description: "Retry the last command of this chat. Keeps the original provider \
                unless provider_override is given. For multi-step commands, step_numbers \
                (1-based) or step_tools select which steps run again."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "provider_override": {
                        "type": "string",
                        "enum": providers,
                        "description": "Provider to use instead of the original one"
                    },
                    "modifications": {
                        "type": "string",
                        "description": "Changes to apply to the original request"
                    },
                    "step_numbers": {
                        "type": "array",
                        "items": { "type": "integer", "minimum": 1 },
                        "description": "Steps of a multi-step command to retry (1-based)"
                    },
                    "step_tools": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Tool names of the steps to retry"
                    }
                }
            }),
        },
    }
}

fn stored_str(args: &Map<String, Value>, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn with_modifications(base: &str, modifications: Option<&str>) -> String {
    match modifications {
        Some(mods) => format!("{} {}", base, mods).trim().to_string(),
        None => base.trim().to_string(),
    }
}

/// Rebuild the arguments of a single-step command for replay.
pub fn build_single_step_args(
    tool: &ToolId,
    command: &CommandMetadata,
    modifications: Option<&str>,
    provider: Option<ProviderId>,
) -> Result<Value, EngineError> {
    let mut args = match &command.tool_args {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let original_prompt = command
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    let missing = EngineError::MissingRestorableInput;

    match tool.category {
        ToolCategory::Image | ToolCategory::Video | ToolCategory::Chat | ToolCategory::Music => {
            let base = stored_str(&args, "prompt")
                .or(original_prompt)
                .ok_or(missing(RestorableInput::Prompt))?;
            args.insert("prompt".into(), with_modifications(&base, modifications).into());
        }
        ToolCategory::ImageEdit => {
            let instruction = stored_str(&args, "prompt")
                .or_else(|| stored_str(&args, "instruction"))
                .or(original_prompt)
                .ok_or(missing(RestorableInput::EditInstruction))?;
            let image_url = stored_str(&args, "image_url")
                .ok_or(missing(RestorableInput::ImageUrl))?;
            args.insert(
                "prompt".into(),
                with_modifications(&instruction, modifications).into(),
            );
            args.insert("image_url".into(), image_url.into());
        }
        ToolCategory::Speech | ToolCategory::Translation => {
            let restorable = if tool.category == ToolCategory::Speech {
                RestorableInput::Prompt
            } else {
                RestorableInput::TranslationText
            };
            let text = stored_str(&args, "text")
                .or_else(|| stored_str(&args, "prompt"))
                .or(original_prompt)
                .ok_or(missing(restorable))?;
            args.insert("text".into(), text.into());
            // The text itself is replayed verbatim; changes become delivery instructions.
            if let Some(mods) = modifications {
                args.insert("instructions".into(), mods.into());
            }
        }
        ToolCategory::Poll => {
            let question = stored_str(&args, "question")
                .or_else(|| stored_str(&args, "topic"))
                .or(original_prompt)
                .ok_or(missing(RestorableInput::PollQuestion))?;
            args.insert(
                "question".into(),
                with_modifications(&question, modifications).into(),
            );
        }
        ToolCategory::Location | ToolCategory::MultiStep | ToolCategory::Other => {}
    }

    if let Some(provider) = provider {
        args.insert("provider".into(), provider.as_str().into());
    }
    Ok(Value::Object(args))
}

fn cannot_retry_text(tool: &str, lang: Language) -> String {
    match lang {
        Language::English => format!(
            "ℹ️ I can't retry '{}' automatically, please ask again.",
            tool
        ),
        Language::Hebrew => format!(
            "ℹ️ אין לי אפשרות לנסות שוב את '{}' אוטומטית, נא לבקש שוב.",
            tool
        ),
    }
}

fn replayed_prompt(args: &Value) -> Option<String> {
    ["prompt", "text", "question"]
        .iter()
        .find_map(|key| args.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

pub struct RetryEngine {
    store: CommandStore,
    tools: Arc<dyn ToolRegistry>,
    executor: MultiStepExecutor,
    notifier: AckNotifier,
    order: ProviderOrder,
    settings: AgentSettings,
}

impl RetryEngine {
    pub fn new(
        store: CommandStore,
        tools: Arc<dyn ToolRegistry>,
        executor: MultiStepExecutor,
        notifier: AckNotifier,
        order: ProviderOrder,
        settings: AgentSettings,
    ) -> Self {
        Self {
            store,
            tools,
            executor,
            notifier,
            order,
            settings,
        }
    }

    pub fn store(&self) -> &CommandStore {
        &self.store
    }

    pub fn tools(&self) -> &Arc<dyn ToolRegistry> {
        &self.tools
    }

    /// Agent-facing entry: raw JSON arguments in, tool response out.
    pub async fn handle_tool_call(&self, ctx: &ChatContext, args: Value) -> ToolResponse {
        match serde_json::from_value::<RetryArgs>(args) {
            Ok(args) => self.retry_last_command(ctx, args).await,
            Err(e) => {
                warn!(chat_id = %ctx.chat_id, "Invalid {} arguments: {}", RETRY_TOOL_NAME, e);
                ToolResponse::failure(format!("Invalid arguments: {}", e))
            }
        }
    }

    /// Never fails: engine errors come back as `success: false` with a localized message.
    pub async fn retry_last_command(&self, ctx: &ChatContext, args: RetryArgs) -> ToolResponse {
        info!(
            chat_id = %ctx.chat_id,
            override_ = ?args.provider_override,
            steps = ?args.step_numbers,
            step_tools = ?args.step_tools,
            "Retry requested"
        );

        let outcome = match tokio::time::timeout(self.settings.timeout, self.route(ctx, &args))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::TimedOut(self.settings.timeout)),
        };

        match outcome {
            Ok(response) => response,
            Err(e) => {
                warn!(chat_id = %ctx.chat_id, "Retry failed: {}", e);
                ToolResponse::failure(e.user_message(ctx.language))
            }
        }
    }

    async fn route(&self, ctx: &ChatContext, args: &RetryArgs) -> Result<ToolResponse, EngineError> {
        let stored = self
            .store
            .get_last(&ctx.chat_id)
            .await
            .map_err(|e| EngineError::PersistenceUnavailable(e.to_string()))?
            .ok_or(EngineError::NoPriorCommand)?;
        let command = stored.metadata;
        let tool = ToolId::parse(&command.tool);
        debug!(
            chat_id = %ctx.chat_id,
            "Last command: {} ({:?}, stored {})", tool.name, tool.category, stored.timestamp
        );

        if tool.is_multi_step() || command.is_multi_step {
            self.retry_plan(ctx, args, command).await
        } else {
            self.retry_single(ctx, args, command, &tool).await
        }
    }

    async fn retry_plan(
        &self,
        ctx: &ChatContext,
        args: &RetryArgs,
        command: CommandMetadata,
    ) -> Result<ToolResponse, EngineError> {
        let plan = command
            .plan
            .as_deref()
            .filter(|plan| !plan.is_empty())
            .ok_or(EngineError::MissingRestorableInput(RestorableInput::Plan))?;
        let filtered = filter_steps(plan, &args.step_numbers, &args.step_tools)?;

        let response = self
            .executor
            .execute(
                ctx,
                filtered,
                args.modifications(),
                args.provider(),
                &self.settings,
            )
            .await;

        // The stored plan stays whole so the next retry can select from every step again.
        let metadata = CommandMetadata {
            result: Some(response.to_value()),
            failed: !response.success,
            ..command
        };
        self.persist(ctx, &metadata).await;
        Ok(response)
    }

    async fn retry_single(
        &self,
        ctx: &ChatContext,
        args: &RetryArgs,
        command: CommandMetadata,
        tool: &ToolId,
    ) -> Result<ToolResponse, EngineError> {
        let handler = tool
            .category
            .operation()
            .and_then(|op| self.tools.get(op))
            .or_else(|| self.tools.get(&tool.name));
        let Some(handler) = handler else {
            info!(chat_id = %ctx.chat_id, "No automatic retry for '{}'", tool.name);
            return Ok(ToolResponse::failure(cannot_retry_text(
                &tool.name,
                ctx.language,
            )));
        };

        let resolved = resolve_provider(tool, &command, args.provider(), &self.order);
        let provider = resolved.map(|r| r.provider);
        if let Some(resolved) = resolved {
            info!(
                chat_id = %ctx.chat_id,
                "Retrying {} with {} ({:?})", tool.name, resolved.provider, resolved.source
            );
        }
        let call_args = build_single_step_args(tool, &command, args.modifications(), provider)?;

        self.notifier
            .retry_started(ctx, tool.category, provider)
            .await;
        let response = match handler.execute(call_args.clone(), ctx).await {
            Ok(response) => response,
            Err(e) => {
                warn!(chat_id = %ctx.chat_id, "Retried tool {} failed: {}", tool.name, e);
                ToolResponse::failure(format!("❌ {}", e))
            }
        };

        let metadata = CommandMetadata {
            tool: command.tool,
            prompt: replayed_prompt(&call_args).or(command.prompt),
            tool_args: call_args,
            plan: None,
            is_multi_step: false,
            result: Some(response.to_value()),
            failed: !response.success,
        };
        self.persist(ctx, &metadata).await;
        Ok(response)
    }

    async fn persist(&self, ctx: &ChatContext, metadata: &CommandMetadata) {
        let message_id = ctx
            .message_id
            .clone()
            .unwrap_or_else(|| format!("retry-{}", uuid::Uuid::new_v4()));
        self.store.save(&ctx.chat_id, &message_id, metadata).await;
    }
}
