//! Acknowledgement messages
//!
//! Short localized progress notes sent before provider attempts. Sending is best-effort:
//! a failed send is logged and otherwise ignored.

use crate::step_filter::{FilteredPlan, StepSelection};
use crate::tools::ToolCategory;
use crate::{ChatContext, Messenger};
use chatgen_providers::{ProviderId, TaskKind};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    English,
    Hebrew,
}

impl std::str::FromStr for Language {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "en" | "english" => Ok(Language::English),
            "he" | "iw" | "hebrew" | "עברית" => Ok(Language::Hebrew),
            _ => Err(format!("Unknown language: {}", s)),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::English => write!(f, "en"),
            Language::Hebrew => write!(f, "he"),
        }
    }
}

pub fn task_label(task: TaskKind, lang: Language) -> &'static str {
    match (task, lang) {
        (TaskKind::Image, Language::English) => "image",
        (TaskKind::Image, Language::Hebrew) => "תמונה",
        (TaskKind::Video, Language::English) => "video",
        (TaskKind::Video, Language::Hebrew) => "וידאו",
        (TaskKind::Audio, Language::English) => "audio",
        (TaskKind::Audio, Language::Hebrew) => "אודיו",
        (TaskKind::ImageEdit, Language::English) => "image edit",
        (TaskKind::ImageEdit, Language::Hebrew) => "עריכת תמונה",
        (TaskKind::Music, Language::English) => "song",
        (TaskKind::Music, Language::Hebrew) => "שיר",
        (TaskKind::Chat, Language::English) => "reply",
        (TaskKind::Chat, Language::Hebrew) => "תשובה",
    }
}

/// Ack sent before a single-step retry dispatch. `None` for tools that are retried silently.
pub fn retry_ack_text(
    category: ToolCategory,
    provider: Option<ProviderId>,
    lang: Language,
) -> Option<String> {
    let with = |en: &str, he: &str| -> String {
        match (lang, provider) {
            (Language::English, Some(p)) => format!("{} with {}...", en, p.display_name()),
            (Language::Hebrew, Some(p)) => format!("{} עם {}...", he, p.display_name()),
            (Language::English, None) => format!("{}...", en),
            (Language::Hebrew, None) => format!("{}...", he),
        }
    };

    let text = match category {
        ToolCategory::Location => return None,
        ToolCategory::Image => with("🎨 Retrying the image", "🎨 מנסה שוב ליצור את התמונה"),
        ToolCategory::Video => with("🎬 Retrying the video", "🎬 מנסה שוב ליצור את הווידאו"),
        ToolCategory::ImageEdit => with("✏️ Retrying the edit", "✏️ מנסה שוב לערוך את התמונה"),
        ToolCategory::Chat => with("💬 Retrying", "💬 מנסה שוב"),
        ToolCategory::Speech => with("🎙️ Recreating the audio", "🎙️ מייצר מחדש את ההקלטה"),
        ToolCategory::Music => with("🎵 Recreating the song", "🎵 יוצר מחדש את השיר"),
        ToolCategory::Translation => with("🌐 Translating again", "🌐 מתרגם שוב"),
        ToolCategory::Poll => with("📊 Recreating the poll", "📊 יוצר מחדש את הסקר"),
        ToolCategory::MultiStep | ToolCategory::Other => with("🔄 Retrying", "🔄 מנסה שוב"),
    };
    Some(text)
}

pub fn multi_step_ack_text(plan: &FilteredPlan, lang: Language) -> String {
    match &plan.selection {
        StepSelection::All => match lang {
            Language::English => format!("🔄 Retrying all {} steps...", plan.steps.len()),
            Language::Hebrew => format!("🔄 מבצע שוב את כל {} השלבים...", plan.steps.len()),
        },
        StepSelection::Numbers(_) => {
            let numbers = plan
                .original_numbers
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            match (lang, plan.original_numbers.len()) {
                (Language::English, 1) => format!("🔄 Retrying step {}...", numbers),
                (Language::English, _) => format!("🔄 Retrying steps {}...", numbers),
                (Language::Hebrew, 1) => format!("🔄 מבצע שוב את שלב {}...", numbers),
                (Language::Hebrew, _) => format!("🔄 מבצע שוב את שלבים {}...", numbers),
            }
        }
        StepSelection::Tools(_) => {
            let labels = plan
                .steps
                .iter()
                .map(|s| s.label())
                .collect::<Vec<_>>()
                .join(", ");
            match lang {
                Language::English => format!("🔄 Retrying: {}...", labels),
                Language::Hebrew => format!("🔄 מבצע שוב: {}...", labels),
            }
        }
    }
}

pub fn provider_attempt_text(task: TaskKind, provider: ProviderId, lang: Language) -> String {
    match lang {
        Language::English => format!(
            "⏳ Trying {} ({})...",
            provider.display_name(),
            task_label(task, lang)
        ),
        Language::Hebrew => format!(
            "⏳ מנסה עם {} ({})...",
            provider.display_name(),
            task_label(task, lang)
        ),
    }
}

pub fn provider_failure_text(provider: ProviderId, reason: &str, lang: Language) -> String {
    match lang {
        Language::English => format!("❌ {} failed: {}", provider.display_name(), reason),
        Language::Hebrew => format!("❌ {} נכשל: {}", provider.display_name(), reason),
    }
}

#[derive(Clone)]
pub struct AckNotifier {
    messenger: Arc<dyn Messenger>,
    typing_delay_ms: Option<u64>,
}

impl AckNotifier {
    pub fn new(messenger: Arc<dyn Messenger>, typing_delay_ms: Option<u64>) -> Self {
        Self {
            messenger,
            typing_delay_ms,
        }
    }

    pub async fn send(&self, ctx: &ChatContext, text: &str) {
        debug!(chat_id = %ctx.chat_id, ack = %text, "Sending ack");
        if let Err(e) = self
            .messenger
            .send_text(
                &ctx.chat_id,
                text,
                ctx.message_id.as_deref(),
                self.typing_delay_ms,
            )
            .await
        {
            warn!(chat_id = %ctx.chat_id, error = %e, "Ack send failed");
        }
    }

    pub async fn retry_started(
        &self,
        ctx: &ChatContext,
        category: ToolCategory,
        provider: Option<ProviderId>,
    ) {
        if let Some(text) = retry_ack_text(category, provider, ctx.language) {
            self.send(ctx, &text).await;
        }
    }

    pub async fn steps_retry_started(&self, ctx: &ChatContext, plan: &FilteredPlan) {
        self.send(ctx, &multi_step_ack_text(plan, ctx.language)).await;
    }

    pub async fn provider_attempt(&self, ctx: &ChatContext, task: TaskKind, provider: ProviderId) {
        self.send(ctx, &provider_attempt_text(task, provider, ctx.language))
            .await;
    }

    pub async fn provider_failed(&self, ctx: &ChatContext, provider: ProviderId, reason: &str) {
        self.send(ctx, &provider_failure_text(provider, reason, ctx.language))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::{multi_step_ack_text, retry_ack_text, AckNotifier, Language};
    use crate::step_filter::filter_steps;
    use crate::test_support::{plan_step, FailingMessenger};
    use crate::tools::ToolCategory;
    use crate::ChatContext;
    use chatgen_providers::ProviderId;
    use std::sync::Arc;

    #[test]
    fn location_retry_has_no_ack() {
        assert!(retry_ack_text(ToolCategory::Location, None, Language::English).is_none());
    }

    #[test]
    fn image_ack_names_provider_in_both_languages() {
        let en = retry_ack_text(ToolCategory::Image, Some(ProviderId::Openai), Language::English)
            .expect("ack");
        assert!(en.contains("OpenAI"), "{}", en);
        let he = retry_ack_text(ToolCategory::Image, Some(ProviderId::Kling), Language::Hebrew)
            .expect("ack");
        assert!(he.contains("Kling") && he.contains("עם"), "{}", he);
    }

    #[test]
    fn multi_step_ack_variants() {
        let plan = vec![
            plan_step("create_poll", "poll"),
            plan_step("create_image", "image"),
            plan_step("send_location", "location"),
        ];

        let all = filter_steps(&plan, &[], &[]).expect("all");
        assert_eq!(
            multi_step_ack_text(&all, Language::English),
            "🔄 Retrying all 3 steps..."
        );

        let numbers = filter_steps(&plan, &[3, 1], &[]).expect("numbers");
        assert_eq!(
            multi_step_ack_text(&numbers, Language::English),
            "🔄 Retrying steps 1, 3..."
        );

        let tools = filter_steps(&plan, &[], &["image".to_string()]).expect("tools");
        assert_eq!(
            multi_step_ack_text(&tools, Language::English),
            "🔄 Retrying: create_image..."
        );
    }

    #[test]
    fn language_parses_codes() {
        assert_eq!("he".parse::<Language>(), Ok(Language::Hebrew));
        assert_eq!("English".parse::<Language>(), Ok(Language::English));
        assert!("fr".parse::<Language>().is_err());
    }

    #[tokio::test]
    async fn send_failure_is_swallowed() {
        let notifier = AckNotifier::new(Arc::new(FailingMessenger), None);
        let ctx = ChatContext::new("chat-1", Language::English);
        notifier
            .retry_started(&ctx, ToolCategory::Video, Some(ProviderId::Sora))
            .await;
        notifier.provider_failed(&ctx, ProviderId::Sora, "boom").await;
    }
}
