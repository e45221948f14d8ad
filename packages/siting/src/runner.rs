//! Concurrent processing of many regions.
//!
//! Regions are independent, so a bounded number of them run at once. Each
//! region's store work is blocking and runs on tokio's blocking pool under
//! a wall-clock deadline. A region that misses its deadline is reported as
//! timed out and its worker stops before the next node. Anything it wrote
//! up to then stays valid: evaluation skips nodes that already have a
//! verdict and summaries are upserts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt as _;
use tokio::sync::Semaphore;

use crate::SitingError;
use crate::aggregate::{AggregateReport, AreaAggregator};
use crate::config::SitingConfig;
use crate::pipeline::{AdmissibilityPipeline, RegionReport};
use crate::progress::ProgressCallback;
use crate::store::LandStore;

/// Which stages to run for each region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionJob {
    pub evaluate: bool,
    pub aggregate: bool,
}

impl RegionJob {
    pub const EVALUATE: Self = Self {
        evaluate: true,
        aggregate: false,
    };

    pub const AGGREGATE: Self = Self {
        evaluate: false,
        aggregate: true,
    };

    pub const FULL: Self = Self {
        evaluate: true,
        aggregate: true,
    };
}

/// Result of processing one region.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionOutcome {
    Completed {
        region_id: u32,
        evaluation: Option<RegionReport>,
        /// `None` when aggregation was not requested or was skipped because
        /// evaluation left nodes without a verdict.
        aggregation: Option<AggregateReport>,
    },
    Failed {
        region_id: u32,
        error: String,
    },
    TimedOut {
        region_id: u32,
    },
}

impl RegionOutcome {
    #[must_use]
    pub const fn region_id(&self) -> u32 {
        match self {
            Self::Completed { region_id, .. }
            | Self::Failed { region_id, .. }
            | Self::TimedOut { region_id } => *region_id,
        }
    }

    /// Returns `true` if running the region again may finish work this run
    /// did not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Completed { evaluation, .. } => {
                evaluation.as_ref().is_some_and(|report| !report.is_complete())
            }
            Self::Failed { .. } | Self::TimedOut { .. } => true,
        }
    }
}

/// Outcomes of a run, ordered by region id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub outcomes: Vec<RegionOutcome>,
}

impl RunSummary {
    /// Regions worth running again.
    #[must_use]
    pub fn retryable_regions(&self) -> Vec<u32> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.is_retryable())
            .map(RegionOutcome::region_id)
            .collect()
    }

    /// Number of regions that completed.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, RegionOutcome::Completed { .. }))
            .count()
    }
}

pub(crate) fn process_region(
    store: Arc<dyn LandStore>,
    config: &SitingConfig,
    region_id: u32,
    job: RegionJob,
    cancelled: Option<Arc<AtomicBool>>,
) -> Result<(Option<RegionReport>, Option<AggregateReport>), SitingError> {
    let evaluation = if job.evaluate {
        let mut pipeline = AdmissibilityPipeline::new(store.clone(), config);
        if let Some(flag) = &cancelled {
            pipeline = pipeline.with_cancel_flag(flag.clone());
        }
        Some(pipeline.evaluate_region(region_id)?)
    } else {
        None
    };

    if evaluation.as_ref().is_some_and(|report| !report.is_complete()) {
        log::warn!("Region {region_id}: evaluation incomplete, skipping aggregation");
        return Ok((evaluation, None));
    }
    if cancelled.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
        log::warn!("Region {region_id}: cancelled before aggregation");
        return Ok((evaluation, None));
    }

    let aggregation = if job.aggregate {
        Some(AreaAggregator::new(store, config).aggregate_region(region_id)?)
    } else {
        None
    };

    Ok((evaluation, aggregation))
}

/// Runs `job` for every region in `region_ids`, at most
/// `max_concurrent_regions` at a time.
///
/// A worker holds its concurrency permit until its blocking work returns,
/// even after its region timed out, so the store never sees more than
/// `max_concurrent_regions` regions at once. A timed-out region is told to
/// stop before its next node.
///
/// Never fails as a whole; per-region problems are reported in the
/// returned outcomes.
pub async fn run_regions(
    store: Arc<dyn LandStore>,
    config: Arc<SitingConfig>,
    region_ids: Vec<u32>,
    job: RegionJob,
    progress: Arc<dyn ProgressCallback>,
) -> RunSummary {
    let deadline = config.region_deadline();
    let concurrency = config.max_concurrent_regions.max(1);
    let permits = Arc::new(Semaphore::new(concurrency));

    log::info!(
        "Processing {} regions ({concurrency} at a time, {deadline:?} deadline each)",
        region_ids.len()
    );
    progress.set_total(region_ids.len() as u64);

    let mut outcomes: Vec<RegionOutcome> = futures::stream::iter(region_ids)
        .map(|region_id| {
            let store = store.clone();
            let config = config.clone();
            let progress = progress.clone();
            let permits = permits.clone();

            async move {
                let Ok(permit) = permits.acquire_owned().await else {
                    return RegionOutcome::Failed {
                        region_id,
                        error: "worker pool closed".to_string(),
                    };
                };

                let cancelled = Arc::new(AtomicBool::new(false));
                let flag = cancelled.clone();
                let worker = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    process_region(store, &config, region_id, job, Some(flag))
                });

                let outcome = match tokio::time::timeout(deadline, worker).await {
                    Ok(Ok(Ok((evaluation, aggregation)))) => RegionOutcome::Completed {
                        region_id,
                        evaluation,
                        aggregation,
                    },
                    Ok(Ok(Err(e))) => {
                        log::error!("Region {region_id} failed: {e}");
                        RegionOutcome::Failed {
                            region_id,
                            error: e.to_string(),
                        }
                    }
                    Ok(Err(e)) => {
                        log::error!("Region {region_id} worker aborted: {e}");
                        RegionOutcome::Failed {
                            region_id,
                            error: format!("worker aborted: {e}"),
                        }
                    }
                    Err(_) => {
                        cancelled.store(true, Ordering::Relaxed);
                        log::warn!("Region {region_id} exceeded its {deadline:?} deadline");
                        RegionOutcome::TimedOut { region_id }
                    }
                };

                progress.set_message(format!("region {region_id}"));
                progress.inc(1);
                outcome
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    outcomes.sort_by_key(RegionOutcome::region_id);

    let summary = RunSummary { outcomes };
    progress.finish(format!(
        "{} of {} regions completed",
        summary.completed(),
        summary.outcomes.len()
    ));

    summary
}
