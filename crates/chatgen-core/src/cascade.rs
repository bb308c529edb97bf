//! Provider fallback cascade
//!
//! Sequential trial of the per-task provider order, resuming after the last provider
//! already tried. The first success wins; every failure is kept for the final report.

use crate::ack::AckNotifier;
use crate::error::{CascadeError, CascadeFailure, FailureList};
use crate::ChatContext;
use chatgen_providers::{
    MediaRequest, ProviderId, ProviderOrder, ProviderRegistry, ProviderReply, TaskKind,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CascadeSuccess {
    pub provider: ProviderId,
    pub reply: ProviderReply,
    /// 1-based attempt that succeeded.
    pub attempt: usize,
    /// Failures collected before the successful attempt.
    pub failures: FailureList,
}

/// Edits need a reachable http(s) source image.
pub fn validate_edit_source(request: &MediaRequest) -> Result<(), CascadeError> {
    let raw = request
        .image_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(CascadeError::MissingSourceImage)?;
    match url::Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(CascadeError::MissingSourceImage),
    }
}

pub struct FallbackCascade {
    providers: ProviderRegistry,
    order: ProviderOrder,
    notifier: AckNotifier,
}

impl FallbackCascade {
    pub fn new(providers: ProviderRegistry, order: ProviderOrder, notifier: AckNotifier) -> Self {
        Self {
            providers,
            order,
            notifier,
        }
    }

    pub fn order(&self) -> &ProviderOrder {
        &self.order
    }

    /// One provider call with its ack. A failed reply or transport error is returned as the
    /// failure reason, after the failure ack went out.
    pub async fn attempt(
        &self,
        ctx: &ChatContext,
        task: TaskKind,
        provider: ProviderId,
        request: &MediaRequest,
    ) -> Result<ProviderReply, String> {
        let backend = self
            .providers
            .get(provider)
            .filter(|p| p.supports(task))
            .ok_or_else(|| format!("{} is not configured for {}", provider.display_name(), task))?;

        self.notifier.provider_attempt(ctx, task, provider).await;
        let reason = match backend.generate(task, request).await {
            Ok(ProviderReply::Failed(reason)) => reason,
            Ok(reply) => {
                info!(chat_id = %ctx.chat_id, "Provider {} succeeded for {}", provider, task);
                return Ok(reply);
            }
            Err(e) => e.to_string(),
        };

        warn!(chat_id = %ctx.chat_id, "Provider {} failed for {}: {}", provider, task, reason);
        self.notifier.provider_failed(ctx, provider, &reason).await;
        Err(reason)
    }

    pub async fn run(
        &self,
        ctx: &ChatContext,
        task: TaskKind,
        request: &MediaRequest,
        tried: &[ProviderId],
    ) -> Result<CascadeSuccess, CascadeError> {
        if task == TaskKind::ImageEdit {
            validate_edit_source(request)?;
        }

        let candidates: Vec<ProviderId> = self
            .order
            .candidates(task, tried)
            .into_iter()
            .filter(|p| task != TaskKind::ImageEdit || !p.is_create_only())
            .collect();
        debug!(
            chat_id = %ctx.chat_id,
            "Cascade for {}: candidates {:?} (tried {:?})", task, candidates, tried
        );

        let mut failures = FailureList::new();
        let mut attempts = 0;
        for provider in candidates {
            let configured = self
                .providers
                .get(provider)
                .map(|p| p.supports(task))
                .unwrap_or(false);
            if !configured {
                debug!("Skipping {} for {}: not configured", provider, task);
                continue;
            }

            attempts += 1;
            match self.attempt(ctx, task, provider, request).await {
                Ok(reply) => {
                    return Ok(CascadeSuccess {
                        provider,
                        reply,
                        attempt: attempts,
                        failures,
                    })
                }
                Err(reason) => failures.push(provider, reason),
            }
        }

        warn!(
            chat_id = %ctx.chat_id,
            "Cascade exhausted for {} after {} attempt(s)", task, attempts
        );
        Err(CascadeError::AllFailed(CascadeFailure { task, failures }))
    }

    /// Edit cascade that never calls `avoid` (usually the provider that just failed).
    pub async fn edit_image(
        &self,
        ctx: &ChatContext,
        request: &MediaRequest,
        avoid: Option<ProviderId>,
    ) -> Result<CascadeSuccess, CascadeError> {
        let tried: Vec<ProviderId> = avoid.into_iter().collect();
        self.run(ctx, TaskKind::ImageEdit, request, &tried).await
    }
}
