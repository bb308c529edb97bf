//! Multi-step plan replay

use crate::ack::AckNotifier;
use crate::step_filter::{FilteredPlan, Step};
use crate::tools::{ToolCategory, ToolId};
use crate::{AgentSettings, ChatContext, StepReport, ToolRegistry, ToolResponse};
use chatgen_providers::ProviderId;
use std::sync::Arc;
use tracing::{info, warn};

/// Executes prepared plan steps and aggregates their outcome.
#[async_trait::async_trait]
pub trait PlanRunner: Send + Sync {
    async fn run(&self, steps: &[Step], ctx: &ChatContext, settings: &AgentSettings)
        -> ToolResponse;
}

/// Modifications go to the first kept step's action only. The override is written to both
/// `provider` and `service` of every image, video and edit step whose task it can serve.
pub fn prepare_plan(
    mut plan: FilteredPlan,
    modifications: Option<&str>,
    provider_override: Option<ProviderId>,
) -> FilteredPlan {
    let modifications = modifications.map(str::trim).filter(|m| !m.is_empty());
    if let (Some(mods), Some(first)) = (modifications, plan.steps.first_mut()) {
        first.action = format!("{} {}", first.action, mods).trim().to_string();
    }

    if let Some(provider) = provider_override {
        for step in plan.steps.iter_mut() {
            let category = ToolId::parse(&step.tool).category;
            let serves = category.task().is_some_and(|task| provider.supports(task));
            if category.accepts_provider_override() && serves {
                let value = serde_json::Value::String(provider.as_str().to_string());
                step.parameters.insert("provider".to_string(), value.clone());
                step.parameters.insert("service".to_string(), value);
            }
        }
    }
    plan
}

pub struct MultiStepExecutor {
    runner: Arc<dyn PlanRunner>,
    notifier: AckNotifier,
}

impl MultiStepExecutor {
    pub fn new(runner: Arc<dyn PlanRunner>, notifier: AckNotifier) -> Self {
        Self { runner, notifier }
    }

    /// One ack for the whole plan, then the runner's result as-is.
    pub async fn execute(
        &self,
        ctx: &ChatContext,
        plan: FilteredPlan,
        modifications: Option<&str>,
        provider_override: Option<ProviderId>,
        settings: &AgentSettings,
    ) -> ToolResponse {
        let plan = prepare_plan(plan, modifications, provider_override);
        info!(
            chat_id = %ctx.chat_id,
            "Replaying {} step(s) (original {:?})",
            plan.steps.len(),
            plan.original_numbers
        );
        self.notifier.steps_retry_started(ctx, &plan).await;
        self.runner.run(&plan.steps, ctx, settings).await
    }
}

/// Runs steps one after another through the tool registry. Stops at the first failed step;
/// the remaining steps are reported as skipped.
pub struct SequentialPlanRunner {
    registry: Arc<dyn ToolRegistry>,
}

impl SequentialPlanRunner {
    pub fn new(registry: Arc<dyn ToolRegistry>) -> Self {
        Self { registry }
    }

    /// A provider named only in the step's tool name (`grok_image`) is written into the
    /// args so the replay stays on it.
    fn step_args(step: &Step, previous_media: Option<&str>) -> serde_json::Value {
        let mut args = step.parameters.clone();
        let id = ToolId::parse(&step.tool);
        if !args.contains_key("provider") && !args.contains_key("service") {
            if let (Some(provider), Some(_)) = (id.provider, id.category.task()) {
                args.insert(
                    "provider".to_string(),
                    serde_json::Value::String(provider.as_str().to_string()),
                );
            }
        }
        let action = step.action.trim();
        if !action.is_empty() {
            args.insert(
                "prompt".to_string(),
                serde_json::Value::String(action.to_string()),
            );
        }
        if id.category == ToolCategory::ImageEdit && !args.contains_key("image_url")
        {
            if let Some(url) = previous_media {
                args.insert(
                    "image_url".to_string(),
                    serde_json::Value::String(url.to_string()),
                );
            }
        }
        serde_json::Value::Object(args)
    }

    fn skipped(step: &Step, reason: &str) -> StepReport {
        StepReport {
            step_number: step.step_number,
            tool: step.tool.clone(),
            success: false,
            error: Some(reason.to_string()),
            skipped: true,
            ..StepReport::default()
        }
    }
}

#[async_trait::async_trait]
impl PlanRunner for SequentialPlanRunner {
    async fn run(
        &self,
        steps: &[Step],
        ctx: &ChatContext,
        settings: &AgentSettings,
    ) -> ToolResponse {
        let mut reports = Vec::with_capacity(steps.len());
        let mut media_urls: Vec<String> = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        let mut provider = None;
        let mut first_error: Option<String> = None;

        for step in steps {
            if first_error.is_some() {
                reports.push(Self::skipped(step, "previous step failed"));
                continue;
            }
            if step.step_number > settings.max_iterations {
                reports.push(Self::skipped(step, "step limit reached"));
                first_error.get_or_insert_with(|| {
                    format!("Stopped after {} steps", settings.max_iterations)
                });
                continue;
            }

            let id = ToolId::parse(&step.tool);
            let tool = self
                .registry
                .get(&step.tool)
                .or_else(|| id.category.operation().and_then(|op| self.registry.get(op)));

            let mut report = StepReport {
                step_number: step.step_number,
                tool: step.tool.clone(),
                ..StepReport::default()
            };

            let outcome = match tool {
                None => Err(format!("no tool available for '{}'", step.label())),
                Some(tool) => {
                    let args = Self::step_args(step, media_urls.last().map(String::as_str));
                    match tool.execute(args, ctx).await {
                        Ok(response) if response.success => Ok(response),
                        Ok(response) => Err(response
                            .error
                            .unwrap_or_else(|| "step reported failure".to_string())),
                        Err(e) => Err(e.to_string()),
                    }
                }
            };

            match outcome {
                Ok(response) => {
                    report.success = true;
                    report.media_url = response.media_urls.first().cloned();
                    report.text = response.data.clone();
                    media_urls.extend(response.media_urls);
                    texts.extend(response.data);
                    provider = response.provider.or(provider);
                }
                Err(reason) => {
                    warn!(
                        chat_id = %ctx.chat_id,
                        "Step {} ({}) failed: {}", step.step_number, step.label(), reason
                    );
                    first_error = Some(format!(
                        "Step {} ({}) failed: {}",
                        step.step_number,
                        step.label(),
                        reason
                    ));
                    report.error = Some(reason);
                }
            }
            reports.push(report);
        }

        ToolResponse {
            success: first_error.is_none(),
            data: if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            },
            error: first_error,
            media_urls,
            provider,
            steps: reports,
        }
    }
}
