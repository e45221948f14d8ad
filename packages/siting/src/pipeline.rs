//! Per-region admissibility evaluation.
//!
//! Each candidate node moves through `Unevaluated -> EvaluatedLocal ->
//! Final`. The local stage only looks at restrictions of the node's own
//! region; nodes that survive it are checked against the union of all
//! neighbouring regions' restrictions, loaded once per region on first
//! use. Final verdicts are written back one node at a time, so a run that
//! stops halfway resumes where it left off.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use wind_siting_land_models::{Landuse, Node, NodeVerdict};
use wind_siting_spatial::RestrictionIndex;

use crate::SitingError;
use crate::classify::Classifier;
use crate::config::SitingConfig;
use crate::neighbours::RegionResolver;
use crate::retry::RetryPolicy;
use crate::store::{LandStore, StoreError, dedup_nodes_by_id};

/// Where a node is in its evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeState {
    /// No verdict yet.
    Unevaluated,
    /// Classified against its own region only.
    EvaluatedLocal(NodeVerdict),
    /// Ready to persist.
    Final(NodeVerdict),
}

/// Counts and problem nodes from evaluating one region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionReport {
    pub region_id: u32,
    /// Allowable-landuse nodes found in the region.
    pub candidates: usize,
    /// Nodes classified and persisted by this run.
    pub evaluated: usize,
    /// Nodes that already had a verdict.
    pub skipped: usize,
    pub buildable: usize,
    pub restricted: usize,
    /// Nodes whose verdict could not be persisted after retries.
    pub failed_nodes: Vec<i64>,
    /// Nodes the store no longer knows about.
    pub missing_nodes: Vec<i64>,
    /// Evaluation stopped early; remaining candidates were not visited.
    pub cancelled: bool,
}

impl RegionReport {
    fn new(region_id: u32) -> Self {
        Self {
            region_id,
            ..Self::default()
        }
    }

    /// Returns `true` if every candidate the store still holds now has a
    /// persisted verdict. Missing nodes do not count against completeness.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_nodes.is_empty() && !self.cancelled
    }
}

/// Classifies and persists the candidate nodes of a region.
pub struct AdmissibilityPipeline {
    store: Arc<dyn LandStore>,
    classifier: Classifier,
    allowable: Vec<Landuse>,
    restricting: Vec<Landuse>,
    retry: RetryPolicy,
    cancelled: Option<Arc<AtomicBool>>,
}

impl AdmissibilityPipeline {
    #[must_use]
    pub fn new(store: Arc<dyn LandStore>, config: &SitingConfig) -> Self {
        Self {
            store,
            classifier: Classifier::from_config(config),
            allowable: config.allowable_landuse.clone(),
            restricting: config.restricting_landuse.clone(),
            retry: RetryPolicy::from(&config.retry),
            cancelled: None,
        }
    }

    /// Stops evaluation before the next node once `flag` is set.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Evaluates every candidate node of `region_id` that has no verdict
    /// yet.
    ///
    /// Individual node failures are recorded in the report and do not stop
    /// the region.
    ///
    /// # Errors
    ///
    /// Returns [`SitingError::Store`] if the region's candidate or
    /// restriction nodes cannot be fetched.
    pub fn evaluate_region(&self, region_id: u32) -> Result<RegionReport, SitingError> {
        let candidates = self.retry.run("fetch candidate nodes", || {
            self.store
                .fetch_nodes_by_region_and_landuse(region_id, &self.allowable)
        })?;
        if self.is_cancelled() {
            log::warn!("Region {region_id}: cancelled before classification");
            return Ok(RegionReport {
                candidates: candidates.len(),
                cancelled: true,
                ..RegionReport::new(region_id)
            });
        }
        let restricting = self.retry.run("fetch restricting nodes", || {
            self.store
                .fetch_nodes_by_region_and_landuse(region_id, &self.restricting)
        })?;

        log::info!(
            "Region {region_id}: {} candidates, {} local restrictions",
            candidates.len(),
            restricting.len()
        );

        let local_index = RestrictionIndex::from_nodes(&restricting);
        let mut neighbour_index = None;
        let mut report = RegionReport::new(region_id);
        report.candidates = candidates.len();

        for node in &candidates {
            if self.is_cancelled() {
                log::warn!(
                    "Region {region_id}: cancelled after {} of {} candidates",
                    report.evaluated + report.skipped,
                    candidates.len()
                );
                report.cancelled = true;
                break;
            }
            match self.evaluate_node(node, &local_index, &mut neighbour_index) {
                Ok(Some(verdict)) => {
                    report.evaluated += 1;
                    if verdict.is_buildable {
                        report.buildable += 1;
                    } else {
                        report.restricted += 1;
                    }
                }
                Ok(None) => report.skipped += 1,
                Err(StoreError::NodeNotFound(id)) => {
                    log::warn!("Region {region_id}: node {id} disappeared from the store");
                    report.missing_nodes.push(id);
                }
                Err(e) => {
                    log::error!("Region {region_id}: failed to evaluate node {}: {e}", node.id);
                    report.failed_nodes.push(node.id);
                }
            }
        }

        log::info!(
            "Region {region_id}: evaluated {} ({} buildable, {} restricted), skipped {}, failed {}, missing {}",
            report.evaluated,
            report.buildable,
            report.restricted,
            report.skipped,
            report.failed_nodes.len(),
            report.missing_nodes.len()
        );

        Ok(report)
    }

    /// Classifies and persists one node. Returns `None` if the node already
    /// had a verdict.
    fn evaluate_node(
        &self,
        node: &Node,
        local_index: &RestrictionIndex,
        neighbour_index: &mut Option<RestrictionIndex>,
    ) -> Result<Option<NodeVerdict>, StoreError> {
        if self
            .retry
            .run("check node state", || self.store.node_already_final(node.id))?
        {
            return Ok(None);
        }

        let mut state = NodeState::Unevaluated;
        let verdict = loop {
            state = match state {
                NodeState::Unevaluated => NodeState::EvaluatedLocal(
                    self.classifier.classify_local(node, local_index),
                ),
                NodeState::EvaluatedLocal(local) if !local.is_buildable => {
                    NodeState::Final(local)
                }
                NodeState::EvaluatedLocal(local) => {
                    if neighbour_index.is_none() {
                        *neighbour_index = Some(self.load_neighbour_index(node.region_id)?);
                    }
                    let index = neighbour_index.get_or_insert_with(RestrictionIndex::empty);
                    NodeState::Final(self.classifier.classify_neighbours(
                        node.coordinates,
                        index,
                        local,
                    ))
                }
                NodeState::Final(verdict) => break verdict,
            };
        };

        log::debug!(
            "Node {}: distance {:.3} km to {:?}, buildable={}",
            node.id,
            verdict.closest_distance_restriction,
            verdict.restricting_node_id,
            verdict.is_buildable
        );

        self.retry.run("persist node verdict", || {
            self.store.persist_node_verdict(node.id, &verdict)
        })?;

        Ok(Some(verdict))
    }

    fn load_neighbour_index(&self, region_id: u32) -> Result<RestrictionIndex, StoreError> {
        let resolver = RegionResolver::new(self.store.as_ref());
        let neighbours = self
            .retry
            .run("fetch region neighbours", || resolver.get_neighbours(region_id))?;

        let mut nodes = Vec::new();
        for neighbour in &neighbours {
            nodes.extend(self.retry.run("fetch neighbour restrictions", || {
                self.store
                    .fetch_nodes_by_region_and_landuse(*neighbour, &self.restricting)
            })?);
        }
        let nodes = dedup_nodes_by_id(nodes);

        log::debug!(
            "Region {region_id}: {} restrictions across {} neighbours",
            nodes.len(),
            neighbours.len()
        );

        Ok(RestrictionIndex::from_nodes(&nodes))
    }
}
