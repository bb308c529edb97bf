//! Provider-backed tools with automatic failover
//!
//! Each tool calls the requested (or default) provider first. When that fails, the
//! fallback cascade continues from the next provider in the task's order.

use crate::cascade::{validate_edit_source, CascadeSuccess, FallbackCascade};
use crate::error::{CascadeError, CascadeFailure, EngineError, FailureList};
use crate::tools::ToolCategory;
use crate::{ChatContext, StaticToolRegistry, Tool, ToolResponse};
use anyhow::{anyhow, Result};
use chatgen_providers::{MediaRequest, ProviderId, ProviderReply, TaskKind};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const MEDIA_CATEGORIES: [ToolCategory; 7] = [
    ToolCategory::Image,
    ToolCategory::Video,
    ToolCategory::ImageEdit,
    ToolCategory::Chat,
    ToolCategory::Speech,
    ToolCategory::Music,
    ToolCategory::Translation,
];

/// Keys consumed by the tool itself rather than forwarded to the provider.
const RESERVED_KEYS: [&str; 7] = [
    "prompt",
    "text",
    "image_url",
    "target_language",
    "provider",
    "service",
    "question",
];

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub struct MediaTool {
    category: ToolCategory,
    task: TaskKind,
    cascade: Arc<FallbackCascade>,
}

impl MediaTool {
    pub fn new(category: ToolCategory, cascade: Arc<FallbackCascade>) -> Option<Self> {
        let task = category.task()?;
        Some(Self {
            category,
            task,
            cascade,
        })
    }

    fn request_from_args(&self, args: &Value) -> Result<MediaRequest> {
        let prompt = match self.category {
            ToolCategory::Speech | ToolCategory::Translation => {
                str_arg(args, "text").or_else(|| str_arg(args, "prompt"))
            }
            _ => str_arg(args, "prompt"),
        }
        .ok_or_else(|| anyhow!("missing 'prompt' for {}", self.task))?;

        let mut extra = serde_json::Map::new();
        if let Value::Object(map) = args {
            for (key, value) in map {
                if !RESERVED_KEYS.contains(&key.as_str()) {
                    extra.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(MediaRequest {
            prompt: prompt.to_string(),
            image_url: str_arg(args, "image_url").map(str::to_string),
            target_language: str_arg(args, "target_language").map(str::to_string),
            extra,
        })
    }

    /// Requested provider when it can serve the task, else the head of the task's order.
    fn primary_provider(&self, args: &Value) -> Option<ProviderId> {
        let requested = str_arg(args, "provider")
            .or_else(|| str_arg(args, "service"))
            .and_then(|name| name.parse::<ProviderId>().ok())
            .filter(|p| p.supports(self.task));
        requested
            .or_else(|| self.cascade.order().next_provider(self.task, &[]))
            .or(match self.task {
                TaskKind::Chat => Some(ProviderId::Gemini),
                TaskKind::Music => Some(ProviderId::Suno),
                _ => None,
            })
    }

    fn success(reply: ProviderReply, provider: ProviderId) -> ToolResponse {
        match reply {
            ProviderReply::Url(url) => ToolResponse::media(url, provider),
            ProviderReply::Text(text) => ToolResponse {
                provider: Some(provider),
                ..ToolResponse::text(text)
            },
            ProviderReply::Failed(reason) => ToolResponse::failure(reason),
        }
    }

    fn failure(&self, err: CascadeError, ctx: &ChatContext) -> ToolResponse {
        ToolResponse::failure(EngineError::from(err).user_message(ctx.language))
    }
}

#[async_trait::async_trait]
impl Tool for MediaTool {
    async fn execute(&self, args: Value, ctx: &ChatContext) -> Result<ToolResponse> {
        let request = self.request_from_args(&args)?;
        if self.task == TaskKind::ImageEdit {
            if let Err(e) = validate_edit_source(&request) {
                return Ok(self.failure(e, ctx));
            }
        }

        let Some(primary) = self.primary_provider(&args) else {
            return Ok(self.failure(
                CascadeError::AllFailed(CascadeFailure {
                    task: self.task,
                    failures: FailureList::new(),
                }),
                ctx,
            ));
        };
        debug!(chat_id = %ctx.chat_id, "{} via {}", self.task, primary);

        let reason = match self.cascade.attempt(ctx, self.task, primary, &request).await {
            Ok(reply) => return Ok(Self::success(reply, primary)),
            Err(reason) => reason,
        };

        info!(
            chat_id = %ctx.chat_id,
            "{} failed for {}, starting fallback", primary, self.task
        );
        let outcome = if self.task == TaskKind::ImageEdit {
            self.cascade.edit_image(ctx, &request, Some(primary)).await
        } else {
            self.cascade.run(ctx, self.task, &request, &[primary]).await
        };

        Ok(match outcome {
            Ok(CascadeSuccess {
                provider, reply, ..
            }) => Self::success(reply, provider),
            Err(CascadeError::AllFailed(mut failure)) => {
                let mut failures = FailureList::new();
                failures.push(primary, reason);
                for f in failure.failures.iter() {
                    failures.push(f.provider, f.reason.clone());
                }
                failure.failures = failures;
                self.failure(CascadeError::AllFailed(failure), ctx)
            }
            Err(other) => self.failure(other, ctx),
        })
    }
}

/// Register one provider-backed tool per media operation.
pub fn register_media_tools(registry: &mut StaticToolRegistry, cascade: Arc<FallbackCascade>) {
    for category in MEDIA_CATEGORIES {
        let (Some(name), Some(tool)) = (
            category.operation(),
            MediaTool::new(category, cascade.clone()),
        ) else {
            continue;
        };
        registry.register(name, Arc::new(tool));
    }
}
