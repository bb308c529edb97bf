//! Tool identifiers
//!
//! Stored tool names are parsed once into a `{category, provider}` pair; everything
//! downstream dispatches on the category.

use chatgen_providers::{ProviderId, TaskKind};
use chatgen_storage::MULTI_STEP_TOOL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCategory {
    Image,
    Video,
    ImageEdit,
    Chat,
    Speech,
    Music,
    Translation,
    Poll,
    Location,
    MultiStep,
    Other,
}

impl ToolCategory {
    /// Provider task backing this category, if it is provider-driven.
    pub fn task(&self) -> Option<TaskKind> {
        match self {
            ToolCategory::Image => Some(TaskKind::Image),
            ToolCategory::Video => Some(TaskKind::Video),
            ToolCategory::ImageEdit => Some(TaskKind::ImageEdit),
            ToolCategory::Chat | ToolCategory::Translation => Some(TaskKind::Chat),
            ToolCategory::Speech => Some(TaskKind::Audio),
            ToolCategory::Music => Some(TaskKind::Music),
            ToolCategory::Poll
            | ToolCategory::Location
            | ToolCategory::MultiStep
            | ToolCategory::Other => None,
        }
    }

    /// Registry name of the downstream operation a retry dispatches to.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            ToolCategory::Image => Some("create_image"),
            ToolCategory::Video => Some("create_video"),
            ToolCategory::ImageEdit => Some("edit_image"),
            ToolCategory::Chat => Some("chat"),
            ToolCategory::Speech => Some("text_to_speech"),
            ToolCategory::Music => Some("create_music"),
            ToolCategory::Translation => Some("translate_text"),
            ToolCategory::Poll => Some("create_poll"),
            ToolCategory::Location => Some("send_location"),
            ToolCategory::MultiStep | ToolCategory::Other => None,
        }
    }

    /// Plan steps of these categories take the retry's provider override.
    pub fn accepts_provider_override(&self) -> bool {
        matches!(
            self,
            ToolCategory::Image | ToolCategory::Video | ToolCategory::ImageEdit
        )
    }

    fn from_operation(op: &str) -> Self {
        match op {
            "image" | "create_image" | "generate_image" | "text_to_image" => ToolCategory::Image,
            "video" | "create_video" | "generate_video" | "text_to_video" | "image_to_video"
            | "video_to_video" => ToolCategory::Video,
            "edit" | "edit_image" | "image_edit" => ToolCategory::ImageEdit,
            "chat" | "chat_completion" | "ask" => ToolCategory::Chat,
            "tts" | "speech" | "text_to_speech" | "voice" => ToolCategory::Speech,
            "music" | "create_music" | "song" => ToolCategory::Music,
            "translate" | "translate_text" | "translate_and_speak" => ToolCategory::Translation,
            "poll" | "create_poll" => ToolCategory::Poll,
            "location" | "send_location" => ToolCategory::Location,
            MULTI_STEP_TOOL => ToolCategory::MultiStep,
            _ => ToolCategory::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolId {
    pub name: String,
    pub category: ToolCategory,
    pub provider: Option<ProviderId>,
}

impl ToolId {
    /// Accepts generic names (`create_image`) and names carrying a provider token in any
    /// `_`-separated position (`grok_image`, `create_image_grok`, `text_to_video_kling`).
    /// A provider token is only taken when the rest of the name is a known operation.
    pub fn parse(name: &str) -> Self {
        let normalized = name.trim().to_lowercase();
        let tokens: Vec<&str> = normalized.split('_').collect();

        let with_provider = tokens.iter().enumerate().find_map(|(idx, token)| {
            let provider = token.parse::<ProviderId>().ok()?;
            let rest: Vec<&str> = tokens
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != idx)
                .map(|(_, t)| *t)
                .collect();
            match ToolCategory::from_operation(&rest.join("_")) {
                ToolCategory::Other => None,
                category => Some((category, provider)),
            }
        });

        let (category, provider) = match with_provider {
            Some((category, provider)) => (category, Some(provider)),
            None => (ToolCategory::from_operation(&normalized), None),
        };

        Self {
            name: name.trim().to_string(),
            category,
            provider,
        }
    }

    pub fn is_multi_step(&self) -> bool {
        self.category == ToolCategory::MultiStep
    }
}
