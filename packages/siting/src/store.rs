//! Storage port consumed by the pipeline and the aggregator.
//!
//! The engine never owns a connection: callers hand it an
//! `Arc<dyn LandStore>` and keep responsibility for its lifecycle. Each
//! method is one discrete request; nothing spans several nodes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use wind_siting_land_models::{
    EvaluatedNode, Landuse, Node, NodeVerdict, Region, RegionSummary, ThresholdKey,
};

/// Errors surfaced by a [`LandStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A node id the store does not know.
    #[error("Node {0} not found")]
    NodeNotFound(i64),

    /// A region id the store does not know.
    #[error("Region {0} not found")]
    RegionNotFound(u32),

    /// The backend rejected or failed the request.
    #[error("Storage backend error: {message}")]
    Backend {
        /// Description of what went wrong.
        message: String,
    },
}

impl StoreError {
    /// Returns `true` for failures worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }
}

/// Read/write access to nodes, regions and summaries.
pub trait LandStore: Send + Sync {
    /// All region ids, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn region_ids(&self) -> Result<Vec<u32>, StoreError>;

    /// Nodes of `region_id` whose landuse is in `landuse`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn fetch_nodes_by_region_and_landuse(
        &self,
        region_id: u32,
        landuse: &[Landuse],
    ) -> Result<Vec<Node>, StoreError>;

    /// Stored neighbour list, or `None` if the region is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn fetch_region_neighbours(&self, region_id: u32) -> Result<Option<Vec<u32>>, StoreError>;

    /// Whether the node already carries a verdict.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NodeNotFound`] for unknown ids.
    fn node_already_final(&self, node_id: i64) -> Result<bool, StoreError>;

    /// Writes the verdict fields onto an existing node. Never inserts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NodeNotFound`] for unknown ids.
    fn persist_node_verdict(&self, node_id: i64, verdict: &NodeVerdict) -> Result<(), StoreError>;

    /// Buildable nodes of `region_id` whose landuse is in `landuse`, with
    /// their verdicts, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn fetch_buildable_nodes(
        &self,
        region_id: u32,
        landuse: &[Landuse],
    ) -> Result<Vec<EvaluatedNode>, StoreError>;

    /// Upserts the summary for `(region_id, key)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RegionNotFound`] for unknown regions.
    fn persist_region_summary(
        &self,
        region_id: u32,
        key: ThresholdKey,
        summary: &RegionSummary,
    ) -> Result<(), StoreError>;

    /// Every stored summary of `region_id`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    fn region_summaries(
        &self,
        region_id: u32,
    ) -> Result<Vec<(ThresholdKey, RegionSummary)>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    regions: BTreeMap<u32, Region>,
    nodes: BTreeMap<i64, (Node, Option<NodeVerdict>)>,
    summaries: BTreeMap<(u32, ThresholdKey), RegionSummary>,
    verdict_writes: usize,
    failing_writes: u32,
    fetch_delays: BTreeMap<u32, Duration>,
}

/// An in-memory [`LandStore`] for tests and small dry runs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fetches_in_flight: AtomicUsize,
    peak_fetches_in_flight: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a region.
    pub fn insert_region(&self, region: Region) {
        self.lock().regions.insert(region.id, region);
    }

    /// Adds or replaces a node, clearing any verdict.
    pub fn insert_node(&self, node: Node) {
        self.lock().nodes.insert(node.id, (node, None));
    }

    /// The stored verdict of a node, if any.
    #[must_use]
    pub fn verdict(&self, node_id: i64) -> Option<NodeVerdict> {
        self.lock().nodes.get(&node_id).and_then(|(_, v)| *v)
    }

    /// Number of successful verdict writes so far.
    #[must_use]
    pub fn verdict_writes(&self) -> usize {
        self.lock().verdict_writes
    }

    /// Makes the next `count` verdict writes fail with a backend error.
    pub fn fail_next_verdict_writes(&self, count: u32) {
        self.lock().failing_writes = count;
    }

    /// Makes every node fetch for `region_id` sleep for `delay` first.
    pub fn delay_region_fetches(&self, region_id: u32, delay: Duration) {
        self.lock().fetch_delays.insert(region_id, delay);
    }

    /// Highest number of node fetches that were running at the same time.
    #[must_use]
    pub fn peak_fetches_in_flight(&self) -> usize {
        self.peak_fetches_in_flight.load(Ordering::SeqCst)
    }

    /// The stored summary of a region for `key`, if any.
    #[must_use]
    pub fn summary(&self, region_id: u32, key: ThresholdKey) -> Option<RegionSummary> {
        self.lock().summaries.get(&(region_id, key)).copied()
    }
}

fn landuse_matches(node: &Node, landuse: &[Landuse]) -> bool {
    node.landuse.is_some_and(|l| landuse.contains(&l))
}

impl LandStore for MemoryStore {
    fn region_ids(&self) -> Result<Vec<u32>, StoreError> {
        Ok(self.lock().regions.keys().copied().collect())
    }

    fn fetch_nodes_by_region_and_landuse(
        &self,
        region_id: u32,
        landuse: &[Landuse],
    ) -> Result<Vec<Node>, StoreError> {
        let in_flight = self.fetches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_fetches_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let delay = self.lock().fetch_delays.get(&region_id).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let nodes = self
            .lock()
            .nodes
            .values()
            .filter(|(node, _)| node.region_id == region_id && landuse_matches(node, landuse))
            .map(|(node, _)| node.clone())
            .collect();

        self.fetches_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(nodes)
    }

    fn fetch_region_neighbours(&self, region_id: u32) -> Result<Option<Vec<u32>>, StoreError> {
        Ok(self
            .lock()
            .regions
            .get(&region_id)
            .map(|region| region.neighbours.clone()))
    }

    fn node_already_final(&self, node_id: i64) -> Result<bool, StoreError> {
        self.lock()
            .nodes
            .get(&node_id)
            .map(|(_, verdict)| verdict.is_some())
            .ok_or(StoreError::NodeNotFound(node_id))
    }

    fn persist_node_verdict(&self, node_id: i64, verdict: &NodeVerdict) -> Result<(), StoreError> {
        let mut state = self.lock();

        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(StoreError::Backend {
                message: format!("injected write failure for node {node_id}"),
            });
        }

        let (_, slot) = state
            .nodes
            .get_mut(&node_id)
            .ok_or(StoreError::NodeNotFound(node_id))?;
        *slot = Some(*verdict);
        state.verdict_writes += 1;
        Ok(())
    }

    fn fetch_buildable_nodes(
        &self,
        region_id: u32,
        landuse: &[Landuse],
    ) -> Result<Vec<EvaluatedNode>, StoreError> {
        Ok(self
            .lock()
            .nodes
            .values()
            .filter(|(node, _)| node.region_id == region_id && landuse_matches(node, landuse))
            .filter_map(|(node, verdict)| {
                verdict
                    .as_ref()
                    .filter(|v| v.is_buildable)
                    .map(|verdict| EvaluatedNode {
                        node: node.clone(),
                        verdict: *verdict,
                    })
            })
            .collect())
    }

    fn persist_region_summary(
        &self,
        region_id: u32,
        key: ThresholdKey,
        summary: &RegionSummary,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.regions.contains_key(&region_id) {
            return Err(StoreError::RegionNotFound(region_id));
        }
        state.summaries.insert((region_id, key), *summary);
        Ok(())
    }

    fn region_summaries(
        &self,
        region_id: u32,
    ) -> Result<Vec<(ThresholdKey, RegionSummary)>, StoreError> {
        Ok(self
            .lock()
            .summaries
            .iter()
            .filter(|((id, _), _)| *id == region_id)
            .map(|((_, key), summary)| (*key, *summary))
            .collect())
    }
}

/// Collects node ids into a set, keeping the first occurrence order of
/// `nodes` and dropping later duplicates.
pub(crate) fn dedup_nodes_by_id(nodes: Vec<Node>) -> Vec<Node> {
    let mut seen = BTreeSet::new();
    nodes.into_iter().filter(|node| seen.insert(node.id)).collect()
}

#[cfg(test)]
mod tests {
    use wind_siting_land_models::Coordinates;

    use super::*;

    fn node(id: i64, region_id: u32, landuse: Landuse) -> Node {
        Node {
            id,
            coordinates: Coordinates::new(19.0, 52.0),
            region_id,
            landuse: Some(landuse),
            way_id: Some(1),
        }
    }

    #[test]
    fn fetch_filters_by_region_and_landuse() {
        let store = MemoryStore::new();
        store.insert_node(node(1, 1, Landuse::Farmland));
        store.insert_node(node(2, 1, Landuse::Residential));
        store.insert_node(node(3, 2, Landuse::Farmland));

        let nodes = store
            .fetch_nodes_by_region_and_landuse(1, &[Landuse::Farmland])
            .unwrap();

        assert_eq!(nodes.iter().map(|n| n.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn verdict_writes_never_insert() {
        let store = MemoryStore::new();
        store.insert_node(node(1, 1, Landuse::Farmland));

        store
            .persist_node_verdict(1, &NodeVerdict::from_distance(3.0, Some(9), 2.0))
            .unwrap();

        assert!(store.node_already_final(1).unwrap());
        assert!(matches!(
            store.persist_node_verdict(2, &NodeVerdict::disqualified(9)),
            Err(StoreError::NodeNotFound(2))
        ));
        assert_eq!(store.verdict_writes(), 1);
    }

    #[test]
    fn injected_failures_are_transient() {
        let store = MemoryStore::new();
        store.insert_node(node(1, 1, Landuse::Farmland));
        store.fail_next_verdict_writes(1);

        let err = store
            .persist_node_verdict(1, &NodeVerdict::disqualified(9))
            .unwrap_err();

        assert!(err.is_transient());
        assert!(!StoreError::NodeNotFound(1).is_transient());
        assert!(store.persist_node_verdict(1, &NodeVerdict::disqualified(9)).is_ok());
    }

    #[test]
    fn summaries_need_a_known_region() {
        let store = MemoryStore::new();
        let key = ThresholdKey::new(2000, 10);

        assert!(matches!(
            store.persist_region_summary(5, key, &RegionSummary::default()),
            Err(StoreError::RegionNotFound(5))
        ));
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let nodes = vec![
            node(2, 1, Landuse::Farmland),
            node(1, 1, Landuse::Farmland),
            node(2, 2, Landuse::Farmland),
        ];

        let deduped = dedup_nodes_by_id(nodes);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].region_id, 1);
        assert_eq!(deduped[1].id, 1);
    }
}
