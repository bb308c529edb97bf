//! Engine failure taxonomy
//!
//! Failures stay typed inside the engine and become user text only at the tool boundary.

use crate::ack::{task_label, Language};
use chatgen_providers::{ProviderId, TaskKind};
use std::time::Duration;
use thiserror::Error;

/// Input that had to be recovered from the stored command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorableInput {
    Prompt,
    EditInstruction,
    ImageUrl,
    Plan,
    PollQuestion,
    TranslationText,
}

impl RestorableInput {
    fn label(&self, lang: Language) -> &'static str {
        match (self, lang) {
            (RestorableInput::Prompt, Language::English) => "prompt",
            (RestorableInput::Prompt, Language::Hebrew) => "הבקשה",
            (RestorableInput::EditInstruction, Language::English) => "edit instruction",
            (RestorableInput::EditInstruction, Language::Hebrew) => "הוראת העריכה",
            (RestorableInput::ImageUrl, Language::English) => "source image",
            (RestorableInput::ImageUrl, Language::Hebrew) => "תמונת המקור",
            (RestorableInput::Plan, Language::English) => "step plan",
            (RestorableInput::Plan, Language::Hebrew) => "תוכנית השלבים",
            (RestorableInput::PollQuestion, Language::English) => "poll question",
            (RestorableInput::PollQuestion, Language::Hebrew) => "שאלת הסקר",
            (RestorableInput::TranslationText, Language::English) => "text to translate",
            (RestorableInput::TranslationText, Language::Hebrew) => "הטקסט לתרגום",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub reason: String,
}

/// Ordered record of every failed provider attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureList(Vec<ProviderFailure>);

impl FailureList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, provider: ProviderId, reason: impl Into<String>) {
        self.0.push(ProviderFailure {
            provider,
            reason: reason.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderFailure> {
        self.0.iter()
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.0.iter().map(|f| f.provider).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeFailure {
    pub task: TaskKind,
    pub failures: FailureList,
}

impl CascadeFailure {
    pub fn render(&self, lang: Language) -> String {
        let task = task_label(self.task, lang);
        let mut out = if self.failures.is_empty() {
            match lang {
                Language::English => format!("❌ No provider is available for the {}.", task),
                Language::Hebrew => format!("❌ אין ספק זמין עבור {}.", task),
            }
        } else {
            match lang {
                Language::English => format!("❌ All providers failed for the {}:", task),
                Language::Hebrew => format!("❌ כל הספקים נכשלו עבור {}:", task),
            }
        };
        for failure in self.failures.iter() {
            out.push_str(&format!(
                "\n• {}: {}",
                failure.provider.display_name(),
                failure.reason
            ));
        }
        out.push_str("\n\n💡 ");
        out.push_str(task_hint(self.task, lang));
        out
    }
}

fn task_hint(task: TaskKind, lang: Language) -> &'static str {
    match (task, lang) {
        (TaskKind::Image, Language::English) => {
            "If this request needs a video rather than an image, ask for a video. Otherwise try rephrasing."
        }
        (TaskKind::Image, Language::Hebrew) => {
            "אם הבקשה דורשת וידאו ולא תמונה, בקש וידאו. אחרת נסה לנסח מחדש."
        }
        (TaskKind::Video, Language::English) => {
            "Video generation is strict about content; try a shorter, simpler description."
        }
        (TaskKind::Video, Language::Hebrew) => {
            "יצירת וידאו רגישה לתוכן; נסה תיאור קצר ופשוט יותר."
        }
        (TaskKind::ImageEdit, Language::English) => {
            "Reply to the image you want edited and describe the change clearly."
        }
        (TaskKind::ImageEdit, Language::Hebrew) => {
            "הגב לתמונה שברצונך לערוך ותאר את השינוי בבירור."
        }
        (TaskKind::Audio, Language::English) => "Try a shorter text.",
        (TaskKind::Audio, Language::Hebrew) => "נסה טקסט קצר יותר.",
        (_, Language::English) => "Try rephrasing the request.",
        (_, Language::Hebrew) => "נסה לנסח את הבקשה מחדש.",
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CascadeError {
    #[error("image edit requested without a source image url")]
    MissingSourceImage,
    #[error("all providers failed for {}", .0.task)]
    AllFailed(CascadeFailure),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no previous command to retry")]
    NoPriorCommand,
    #[error("no steps matched the selection ({} available)", .available.len())]
    NoMatchingSteps { available: Vec<String> },
    #[error("could not restore {0:?} from the stored command")]
    MissingRestorableInput(RestorableInput),
    #[error("all providers failed for {}", .0.task)]
    AllProvidersFailed(CascadeFailure),
    #[error("command store unavailable: {0}")]
    PersistenceUnavailable(String),
    #[error("retry timed out after {0:?}")]
    TimedOut(Duration),
}

impl From<CascadeError> for EngineError {
    fn from(err: CascadeError) -> Self {
        match err {
            CascadeError::MissingSourceImage => {
                EngineError::MissingRestorableInput(RestorableInput::ImageUrl)
            }
            CascadeError::AllFailed(failure) => EngineError::AllProvidersFailed(failure),
        }
    }
}

impl EngineError {
    pub fn user_message(&self, lang: Language) -> String {
        match (self, lang) {
            (EngineError::NoPriorCommand, Language::English) => {
                "❌ There is no previous command to retry.".to_string()
            }
            (EngineError::NoPriorCommand, Language::Hebrew) => {
                "❌ אין פקודה קודמת לניסיון חוזר.".to_string()
            }
            (EngineError::NoMatchingSteps { available }, Language::English) => format!(
                "❌ No steps matched the request. Available steps:\n{}",
                available.join("\n")
            ),
            (EngineError::NoMatchingSteps { available }, Language::Hebrew) => format!(
                "❌ לא נמצאו שלבים מתאימים. השלבים הזמינים:\n{}",
                available.join("\n")
            ),
            (EngineError::MissingRestorableInput(what), Language::English) => format!(
                "❌ Could not recover the {} of the last command. Please send the request again.",
                what.label(lang)
            ),
            (EngineError::MissingRestorableInput(what), Language::Hebrew) => format!(
                "❌ לא הצלחתי לשחזר את {} של הפקודה הקודמת. נא לשלוח את הבקשה שוב.",
                what.label(lang)
            ),
            (EngineError::AllProvidersFailed(failure), _) => failure.render(lang),
            (EngineError::PersistenceUnavailable(_), Language::English) => {
                "⚠️ Retry is temporarily unavailable.".to_string()
            }
            (EngineError::PersistenceUnavailable(_), Language::Hebrew) => {
                "⚠️ ניסיון חוזר אינו זמין כרגע.".to_string()
            }
            (EngineError::TimedOut(_), Language::English) => {
                "⏱️ The retry took too long and was stopped.".to_string()
            }
            (EngineError::TimedOut(_), Language::Hebrew) => {
                "⏱️ הניסיון החוזר ארך זמן רב מדי והופסק.".to_string()
            }
        }
    }
}
