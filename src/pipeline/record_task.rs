//! Per-record processing: slot resolution, assembly, validation, publish.

use chrono::Utc;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};

use super::Pipeline;
use super::summary::{PublishStatus, RecordOutcome};
use crate::publisher::PublishOutcome;
use crate::registry::{ContentTemplate, GenerationSlot};
use crate::retry::{SlotGeneration, generate_with_retry};
use crate::types::{Event, RecordStage, Slug, SlotOutcome, SlotSource};

/// Forward-only stage holder that reports every transition
struct StageTracker<'a> {
    pipeline: &'a Pipeline,
    slug: Slug,
    stage: RecordStage,
}

impl<'a> StageTracker<'a> {
    fn new(pipeline: &'a Pipeline, slug: Slug) -> Self {
        Self {
            pipeline,
            slug,
            stage: RecordStage::Pending,
        }
    }

    fn enter(&mut self, next: RecordStage) {
        match self.stage.advance(next) {
            Ok(stage) => {
                self.stage = stage;
                tracing::debug!(slug = %self.slug, stage = ?stage, "Record stage changed");
                self.pipeline.emit(Event::StageChanged {
                    slug: self.slug.clone(),
                    stage,
                });
            }
            Err(e) => {
                tracing::error!(slug = %self.slug, error = %e, "Rejected stage transition");
            }
        }
    }
}

impl Pipeline {
    /// Drive one template to a terminal stage
    pub(crate) async fn process_record(&self, template: &ContentTemplate) -> RecordOutcome {
        let slug = template.slug().clone();
        let mut stage = StageTracker::new(self, slug.clone());

        tracing::info!(slug = %slug, slots = template.slots().len(), "Processing record");

        stage.enter(RecordStage::GeneratingAssets);
        let slots = self.resolve_slots(template).await;

        stage.enter(RecordStage::Assembling);
        let assembled = match self.assembler.assemble(template, &slots, Utc::now()) {
            Ok(assembled) => assembled,
            Err(e) => {
                return self.fail(&mut stage, slots, e.to_string());
            }
        };

        stage.enter(RecordStage::Validating);
        let resolved = slots.iter().filter(|s| !s.reference.is_empty()).count();
        if let Err(violations) =
            self.validator
                .validate(&assembled.record, template.slots().len(), resolved)
        {
            tracing::warn!(
                slug = %slug,
                violations = ?violations.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "Record failed validation, skipping"
            );
            self.emit(Event::RecordSkipped {
                slug: slug.clone(),
                violations: violations.iter().map(ToString::to_string).collect(),
            });
            stage.enter(RecordStage::Failed);
            return RecordOutcome {
                slug,
                stage: stage.stage,
                status: PublishStatus::Skipped(violations),
                slots,
            };
        }

        stage.enter(RecordStage::Publishing);
        let status = match self.publisher.publish(&assembled.record).await {
            PublishOutcome::Published(mode) => PublishStatus::Published(mode),
            PublishOutcome::DryRun => PublishStatus::DryRun,
            PublishOutcome::Failed(reason) => return self.fail(&mut stage, slots, reason),
        };

        let fallbacks = slots
            .iter()
            .filter(|s| s.source == SlotSource::Fallback)
            .count();
        self.emit(Event::RecordPublished {
            slug: slug.clone(),
            fallbacks,
        });
        stage.enter(RecordStage::Done);

        RecordOutcome {
            slug,
            stage: stage.stage,
            status,
            slots,
        }
    }

    fn fail(
        &self,
        stage: &mut StageTracker<'_>,
        slots: Vec<SlotOutcome>,
        reason: String,
    ) -> RecordOutcome {
        tracing::error!(slug = %stage.slug, stage = ?stage.stage, error = %reason, "Record failed");
        self.emit(Event::RecordFailed {
            slug: stage.slug.clone(),
            error: reason.clone(),
        });
        stage.enter(RecordStage::Failed);
        RecordOutcome {
            slug: stage.slug.clone(),
            stage: stage.stage,
            status: PublishStatus::Failed(reason),
            slots,
        }
    }

    /// Resolve every slot, in declared order
    ///
    /// With one worker, slots run strictly one after another. With more,
    /// up to that many run at once and outcomes still come back in order.
    async fn resolve_slots(&self, template: &ContentTemplate) -> Vec<SlotOutcome> {
        let unavailable_flag = AtomicBool::new(false);
        let unavailable = &unavailable_flag;
        let slug = template.slug();
        let workers = self.config.limiter.max_concurrent_generations.max(1);

        futures::stream::iter(template.slots())
            .map(move |slot| self.resolve_slot(slug, slot, unavailable))
            .buffered(workers)
            .collect()
            .await
    }

    async fn resolve_slot(
        &self,
        slug: &Slug,
        slot: &GenerationSlot,
        unavailable: &AtomicBool,
    ) -> SlotOutcome {
        let _key_guard = self.assets.lock(&slot.key).await;

        match self.assets.get(&slot.key).await {
            Ok(Some(asset)) => {
                tracing::debug!(slug = %slug, key = %slot.key, "Using cached asset");
                return self.resolved(slug, slot, asset.reference, SlotSource::Cached, 0);
            }
            Ok(None) => {}
            Err(e) => {
                return self.fallback(slug, slot, 0, format!("asset lookup failed: {e}"));
            }
        }

        if unavailable.load(Ordering::SeqCst) {
            return self.fallback(
                slug,
                slot,
                0,
                "generation unavailable for this record".to_string(),
            );
        }

        let generation = {
            let _permit = self.generation_permits.acquire().await.ok();
            generate_with_retry(&self.retry_policy, self.sleeper.as_ref(), move || async move {
                self.limiter.acquire().await;
                self.client.generate(&slot.prompt, &self.constraints).await
            })
            .await
        };

        match generation {
            SlotGeneration::Generated { bytes, attempts } => {
                match self.assets.put(&slot.key, &bytes).await {
                    Ok(asset) => {
                        self.resolved(slug, slot, asset.reference, SlotSource::Generated, attempts)
                    }
                    Err(e) => self.fallback(
                        slug,
                        slot,
                        attempts,
                        format!("failed to store generated asset: {e}"),
                    ),
                }
            }
            SlotGeneration::Failed {
                reason,
                attempts,
                unavailable: no_credential,
            } => {
                if no_credential {
                    unavailable.store(true, Ordering::SeqCst);
                }
                self.fallback(slug, slot, attempts, reason)
            }
        }
    }

    fn resolved(
        &self,
        slug: &Slug,
        slot: &GenerationSlot,
        reference: String,
        source: SlotSource,
        attempts: u32,
    ) -> SlotOutcome {
        self.emit(Event::SlotResolved {
            slug: slug.clone(),
            index: slot.index,
            source,
            reference: reference.clone(),
        });
        SlotOutcome {
            index: slot.index,
            key: slot.key.clone(),
            reference,
            source,
            attempts,
            failure: None,
        }
    }

    fn fallback(
        &self,
        slug: &Slug,
        slot: &GenerationSlot,
        attempts: u32,
        reason: String,
    ) -> SlotOutcome {
        tracing::warn!(
            slug = %slug,
            index = slot.index,
            key = %slot.key,
            reason = %reason,
            "Slot using fallback reference"
        );
        self.emit(Event::SlotFallback {
            slug: slug.clone(),
            index: slot.index,
            reason: reason.clone(),
        });
        SlotOutcome {
            index: slot.index,
            key: slot.key.clone(),
            reference: slot.fallback_reference.clone(),
            source: SlotSource::Fallback,
            attempts,
            failure: Some(reason),
        }
    }
}
