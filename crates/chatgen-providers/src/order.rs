//! Per-task provider priority lists

use crate::{ProviderId, TaskKind};
use anyhow::{bail, Result};

/// Immutable priority order per task kind. Tasks without a list (music, chat) never cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOrder {
    image: Vec<ProviderId>,
    video: Vec<ProviderId>,
    audio: Vec<ProviderId>,
    image_edit: Vec<ProviderId>,
}

impl Default for ProviderOrder {
    fn default() -> Self {
        Self {
            image: vec![ProviderId::Gemini, ProviderId::Openai, ProviderId::Grok],
            video: vec![ProviderId::Sora, ProviderId::Veo, ProviderId::Kling],
            audio: vec![ProviderId::Elevenlabs, ProviderId::Openai, ProviderId::Gemini],
            // Edit never falls back to a create-only provider.
            image_edit: vec![ProviderId::Gemini, ProviderId::Openai],
        }
    }
}

impl ProviderOrder {
    pub fn for_task(&self, task: TaskKind) -> &[ProviderId] {
        match task {
            TaskKind::Image => &self.image,
            TaskKind::Video => &self.video,
            TaskKind::Audio => &self.audio,
            TaskKind::ImageEdit => &self.image_edit,
            TaskKind::Music | TaskKind::Chat => &[],
        }
    }

    /// Replace one task's list. Every entry must be known, unique and able to serve the task.
    pub fn with_list(mut self, task: TaskKind, names: &[String]) -> Result<Self> {
        let mut list: Vec<ProviderId> = Vec::with_capacity(names.len());
        for name in names {
            let id: ProviderId = match name.parse() {
                Ok(id) => id,
                Err(e) => bail!("Fallback list '{}': {}", task, e),
            };
            if list.contains(&id) {
                bail!("Fallback list '{}' lists '{}' more than once", task, id);
            }
            if !id.supports(task) {
                bail!(
                    "Fallback list '{}' contains '{}', which cannot serve that task",
                    task,
                    id
                );
            }
            list.push(id);
        }
        if list.is_empty() {
            bail!("Fallback list '{}' cannot be empty", task);
        }

        match task {
            TaskKind::Image => self.image = list,
            TaskKind::Video => self.video = list,
            TaskKind::Audio => self.audio = list,
            TaskKind::ImageEdit => self.image_edit = list,
            TaskKind::Music | TaskKind::Chat => {
                bail!("Task '{}' has no fallback order", task)
            }
        }
        Ok(self)
    }

    pub fn candidates(&self, task: TaskKind, tried: &[ProviderId]) -> Vec<ProviderId> {
        remaining_candidates(self.for_task(task), tried)
    }

    /// Next untried provider in cyclic order, if any remain.
    pub fn next_provider(&self, task: TaskKind, tried: &[ProviderId]) -> Option<ProviderId> {
        self.candidates(task, tried).into_iter().next()
    }
}

/// `order` minus `tried`, rotated to resume right after the last tried provider.
/// When nothing was tried, or the last tried provider is not in `order`, iteration starts at the head.
pub fn remaining_candidates(order: &[ProviderId], tried: &[ProviderId]) -> Vec<ProviderId> {
    let start = tried
        .last()
        .and_then(|last| order.iter().position(|p| p == last))
        .map(|idx| idx + 1)
        .unwrap_or(0);

    order
        .iter()
        .cycle()
        .skip(start)
        .take(order.len())
        .filter(|p| !tried.contains(p))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{remaining_candidates, ProviderOrder};
    use crate::{ProviderId, TaskKind};

    const A: ProviderId = ProviderId::Gemini;
    const B: ProviderId = ProviderId::Openai;
    const C: ProviderId = ProviderId::Grok;

    #[test]
    fn resumes_after_last_tried_and_wraps() {
        assert_eq!(remaining_candidates(&[A, B, C], &[B]), vec![C, A]);
        assert_eq!(remaining_candidates(&[A, B, C], &[C]), vec![A, B]);
        assert_eq!(remaining_candidates(&[A, B, C], &[A, C]), vec![B]);
    }

    #[test]
    fn starts_from_head_without_history() {
        assert_eq!(remaining_candidates(&[A, B, C], &[]), vec![A, B, C]);
        assert_eq!(
            remaining_candidates(&[A, B, C], &[ProviderId::Kling]),
            vec![A, B, C]
        );
        assert!(remaining_candidates(&[A, B, C], &[A, B, C]).is_empty());
    }

    #[test]
    fn default_orders_have_no_duplicates_and_edit_excludes_create_only() {
        let order = ProviderOrder::default();
        for task in [
            TaskKind::Image,
            TaskKind::Video,
            TaskKind::Audio,
            TaskKind::ImageEdit,
        ] {
            let list = order.for_task(task);
            for (i, p) in list.iter().enumerate() {
                assert!(!list[i + 1..].contains(p), "{} repeated in {}", p, task);
                assert!(p.supports(task));
            }
        }
        assert!(order
            .for_task(TaskKind::ImageEdit)
            .iter()
            .all(|p| !p.is_create_only()));
        assert!(order.for_task(TaskKind::Music).is_empty());
    }

    #[test]
    fn video_order_is_sora_veo_kling() {
        let order = ProviderOrder::default();
        assert_eq!(
            order.for_task(TaskKind::Video),
            &[ProviderId::Sora, ProviderId::Veo, ProviderId::Kling]
        );
        assert_eq!(
            order.next_provider(TaskKind::Video, &[ProviderId::Kling]),
            Some(ProviderId::Sora)
        );
    }

    #[test]
    fn override_rejects_create_only_provider_for_edit() {
        let err = ProviderOrder::default()
            .with_list(
                TaskKind::ImageEdit,
                &["openai".to_string(), "grok".to_string()],
            )
            .expect_err("grok cannot edit");
        assert!(err.to_string().contains("grok"), "{}", err);
    }

    #[test]
    fn override_replaces_list_with_aliases() {
        let order = ProviderOrder::default()
            .with_list(TaskKind::Video, &["kling".to_string(), "veo3".to_string()])
            .expect("valid override");
        assert_eq!(
            order.for_task(TaskKind::Video),
            &[ProviderId::Kling, ProviderId::Veo]
        );
    }

    #[test]
    fn override_rejects_duplicates() {
        assert!(ProviderOrder::default()
            .with_list(TaskKind::Image, &["gemini".to_string(), "google".to_string()])
            .is_err());
    }
}
