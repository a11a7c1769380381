pub mod key;
pub mod normalize;
pub mod publish;
pub mod reconcile;

use crate::config::PipelineTarget;
use crate::feed::{Feed, Offer};
use crate::fetch::Fetcher;
use crate::models::{RunCounts, RunReport, StageReport};
use normalize::{finalize_feed, normalize_offers};
use reconcile::{ReferenceIndex, VendorExceptions, reconcile};
use serde_json::{Value, json};
use std::{future::Future, time::Instant};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Fetch → reconcile → normalise → publish for one configured target.
///
/// Each run is independent: nothing is carried over between runs, so
/// unchanged upstream feeds reproduce the same output bytes.
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Fetcher,
}

impl Pipeline {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    pub async fn run(
        &self,
        name: &str,
        target: &PipelineTarget,
    ) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let title = target.title.clone().unwrap_or_else(|| name.to_uppercase());
        let mut stages = Vec::new();
        info!(target = "feeds.pipeline", target_name = name, %run_id, "run started");

        let (mut primary, reference) = self
            .capture_stage("fetch_feeds", &mut stages, fetch_feeds(&self.fetcher, target))
            .await?;

        let mut counts = RunCounts {
            total: primary.shop.offers.len(),
            reference_offers: reference.shop.offers.len(),
            ..RunCounts::default()
        };

        let offers = std::mem::take(&mut primary.shop.offers);
        let reconciled = self
            .capture_stage("reconcile", &mut stages, async {
                Ok(reconcile_stage(offers, &reference, target))
            })
            .await?;
        counts.removed_missing = reconciled.removed_missing;
        counts.price_updates = reconciled.price_updates;
        counts.other_updates = reconciled.other_updates;

        let reference_date = reference.date().map(str::to_string);
        let normalized = self
            .capture_stage("normalize", &mut stages, async {
                Ok(normalize_stage(reconciled.offers, target))
            })
            .await?;
        counts.removed_invalid = normalized.removed_invalid;
        counts.kept = normalized.offers.len();

        primary.shop.offers = normalized.offers;
        finalize_feed(&mut primary, || {
            reference_date
                .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d %H:%M").to_string())
        });

        let published = self
            .capture_stage("publish", &mut stages, async {
                let published = publish::publish(&primary, &target.output)
                    .await
                    .map_err(|err| PipelineError::publish("publish", err.to_string()))?;
                let output = json!({
                    "path": published.path.display().to_string(),
                    "bytes": published.bytes,
                    "offers": primary.shop.offers.len(),
                });
                Ok(StageOutcome::new(published, output))
            })
            .await?;

        info!(
            target = "feeds.pipeline",
            target_name = name,
            %run_id,
            total = counts.total,
            kept = counts.kept,
            removed_missing = counts.removed_missing,
            removed_invalid = counts.removed_invalid,
            "run finished"
        );

        Ok(RunReport {
            run_id,
            target: name.to_string(),
            title,
            output: published.path,
            counts,
            stages,
        })
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

async fn fetch_feeds(
    fetcher: &Fetcher,
    target: &PipelineTarget,
) -> Result<StageOutcome<(Feed, Feed)>, PipelineError> {
    let reference = async {
        fetcher
            .fetch_feed(&target.reference)
            .await
            .map_err(|err| PipelineError::fetch("fetch_reference", err.to_string()))
    };
    let primary = async {
        fetcher
            .fetch_feed(&target.primary)
            .await
            .map_err(|err| PipelineError::fetch("fetch_primary", err.to_string()))
    };
    let (reference, primary) = tokio::try_join!(reference, primary)?;
    let output = json!({
        "primary_offers": primary.shop.offers.len(),
        "reference_offers": reference.shop.offers.len(),
    });
    Ok(StageOutcome::new((primary, reference), output))
}

fn reconcile_stage(
    offers: Vec<Offer>,
    reference: &Feed,
    target: &PipelineTarget,
) -> StageOutcome<reconcile::Reconciled> {
    let index = ReferenceIndex::build(reference);
    if index.is_empty() {
        warn!(
            target = "feeds.pipeline",
            "reference feed has no keyed offers; only vendor exceptions survive"
        );
    }
    let exceptions = VendorExceptions::new(&target.vendor_exceptions);
    let reconciled = reconcile(offers, &index, &exceptions);
    let output = json!({
        "reference_keys": index.len(),
        "reference_duplicates": index.duplicates(),
        "matched": reconciled.matched,
        "exempted": reconciled.exempted,
        "removed_missing": reconciled.removed_missing,
        "price_updates": reconciled.price_updates,
        "other_updates": reconciled.other_updates,
    });
    StageOutcome::new(reconciled, output)
}

fn normalize_stage(
    offers: Vec<Offer>,
    target: &PipelineTarget,
) -> StageOutcome<normalize::Normalized> {
    let normalized = normalize_offers(offers, &target.locales, &target.schema);
    let output = json!({
        "kept": normalized.offers.len(),
        "removed_invalid": normalized.removed_invalid,
        "reasons": normalized.reasons,
    });
    StageOutcome::new(normalized, output)
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    Fetch,
    Publish,
}

impl PipelineError {
    pub fn fetch(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Fetch,
        }
    }

    pub fn publish(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Publish,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}
