//! Provider resolution for single-step retries

use crate::tools::{ToolCategory, ToolId};
use chatgen_providers::{ProviderId, ProviderOrder};
use chatgen_storage::CommandMetadata;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSource {
    Override,
    Recorded,
    ToolName,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedProvider {
    pub provider: ProviderId,
    pub source: ProviderSource,
}

/// Provider recorded on the original command: its `provider`/`service` args, then the
/// provider reported in its result.
fn recorded_provider(command: &CommandMetadata) -> Option<ProviderId> {
    let from = |value: &serde_json::Value, key: &str| -> Option<ProviderId> {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    };

    from(&command.tool_args, "provider")
        .or_else(|| from(&command.tool_args, "service"))
        .or_else(|| command.result.as_ref().and_then(|r| from(r, "provider")))
}

fn default_provider(category: ToolCategory, order: &ProviderOrder) -> Option<ProviderId> {
    if let Some(task) = category.task() {
        if let Some(first) = order.next_provider(task, &[]) {
            return Some(first);
        }
    }
    match category {
        ToolCategory::Chat | ToolCategory::Translation => Some(ProviderId::Gemini),
        ToolCategory::Music => Some(ProviderId::Suno),
        _ => None,
    }
}

/// Override, then the recorded provider, then the tool-name provider, then the task default.
/// Retries stay on the original provider unless the user names another. Candidates that
/// cannot serve the tool's task are passed over. Tools that are not provider-driven resolve
/// to `None`.
pub fn resolve_provider(
    tool: &ToolId,
    command: &CommandMetadata,
    provider_override: Option<ProviderId>,
    order: &ProviderOrder,
) -> Option<ResolvedProvider> {
    let task = tool.category.task()?;
    let usable = |provider: ProviderId, source: ProviderSource| {
        if provider.supports(task) {
            Some(ResolvedProvider { provider, source })
        } else {
            warn!(
                "Ignoring {:?} provider {} for {}: it does not handle {}",
                source, provider, tool.name, task
            );
            None
        }
    };

    provider_override
        .and_then(|p| usable(p, ProviderSource::Override))
        .or_else(|| recorded_provider(command).and_then(|p| usable(p, ProviderSource::Recorded)))
        .or_else(|| tool.provider.and_then(|p| usable(p, ProviderSource::ToolName)))
        .or_else(|| {
            default_provider(tool.category, order).map(|provider| ResolvedProvider {
                provider,
                source: ProviderSource::Default,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::{resolve_provider, ProviderSource};
    use crate::tools::ToolId;
    use chatgen_providers::{ProviderId, ProviderOrder};
    use chatgen_storage::CommandMetadata;

    fn command(tool: &str, args: serde_json::Value) -> CommandMetadata {
        CommandMetadata {
            tool: tool.to_string(),
            tool_args: args,
            ..CommandMetadata::default()
        }
    }

    #[test]
    fn override_beats_recorded_provider() {
        let cmd = command("create_image", serde_json::json!({"provider": "openai"}));
        let resolved = resolve_provider(
            &ToolId::parse(&cmd.tool),
            &cmd,
            Some(ProviderId::Gemini),
            &ProviderOrder::default(),
        )
        .expect("resolved");
        assert_eq!(resolved.provider, ProviderId::Gemini);
        assert_eq!(resolved.source, ProviderSource::Override);
    }

    #[test]
    fn recorded_provider_is_sticky() {
        let cmd = command("create_video", serde_json::json!({"provider": "kling"}));
        let resolved = resolve_provider(
            &ToolId::parse(&cmd.tool),
            &cmd,
            None,
            &ProviderOrder::default(),
        )
        .expect("resolved");
        assert_eq!(resolved.provider, ProviderId::Kling);
        assert_eq!(resolved.source, ProviderSource::Recorded);

        let cmd = command("create_image", serde_json::json!({"service": "grok"}));
        let resolved =
            resolve_provider(&ToolId::parse(&cmd.tool), &cmd, None, &ProviderOrder::default())
                .expect("resolved");
        assert_eq!(resolved.provider, ProviderId::Grok);
    }

    #[test]
    fn result_provider_used_when_args_silent() {
        let mut cmd = command("create_image", serde_json::json!({"prompt": "cat"}));
        cmd.result = Some(serde_json::json!({"success": true, "provider": "openai"}));
        let resolved =
            resolve_provider(&ToolId::parse(&cmd.tool), &cmd, None, &ProviderOrder::default())
                .expect("resolved");
        assert_eq!(resolved.provider, ProviderId::Openai);
        assert_eq!(resolved.source, ProviderSource::Recorded);
    }

    #[test]
    fn tool_name_then_default() {
        let cmd = command("grok_image", serde_json::json!({"prompt": "cat"}));
        let resolved =
            resolve_provider(&ToolId::parse(&cmd.tool), &cmd, None, &ProviderOrder::default())
                .expect("resolved");
        assert_eq!(resolved.provider, ProviderId::Grok);
        assert_eq!(resolved.source, ProviderSource::ToolName);

        let cmd = command("create_video", serde_json::json!({"prompt": "waves"}));
        let resolved =
            resolve_provider(&ToolId::parse(&cmd.tool), &cmd, None, &ProviderOrder::default())
                .expect("resolved");
        assert_eq!(resolved.provider, ProviderId::Sora);
        assert_eq!(resolved.source, ProviderSource::Default);

        let cmd = command("create_music", serde_json::json!({"prompt": "jazz"}));
        let resolved =
            resolve_provider(&ToolId::parse(&cmd.tool), &cmd, None, &ProviderOrder::default())
                .expect("resolved");
        assert_eq!(resolved.provider, ProviderId::Suno);
    }

    #[test]
    fn non_provider_tools_resolve_to_none() {
        let cmd = command("create_poll", serde_json::json!({"question": "pizza?"}));
        assert!(resolve_provider(
            &ToolId::parse(&cmd.tool),
            &cmd,
            Some(ProviderId::Gemini),
            &ProviderOrder::default()
        )
        .is_none());
    }

    #[test]
    fn override_for_another_task_keeps_recorded_provider() {
        let cmd = command("create_image", serde_json::json!({"provider": "gemini"}));
        let resolved = resolve_provider(
            &ToolId::parse(&cmd.tool),
            &cmd,
            Some(ProviderId::Suno),
            &ProviderOrder::default(),
        )
        .expect("resolved");
        assert_eq!(resolved.provider, ProviderId::Gemini);
        assert_eq!(resolved.source, ProviderSource::Recorded);

        let cmd = command("create_video", serde_json::json!({}));
        let resolved = resolve_provider(
            &ToolId::parse(&cmd.tool),
            &cmd,
            Some(ProviderId::Grok),
            &ProviderOrder::default(),
        )
        .expect("resolved");
        assert_eq!(resolved.source, ProviderSource::Default);
        assert!(resolved.provider.supports(chatgen_providers::TaskKind::Video));
    }
}
