//! Admissible area and installable power per region.
//!
//! Buildable nodes are grouped by way. For each distance threshold only the
//! nodes at least that far from any restriction count; the convex hull of a
//! way's remaining nodes gives its area, and area times the power density
//! gives its power. Ways below the per-way power threshold are dropped
//! entirely.

use std::collections::BTreeMap;
use std::sync::Arc;

use wind_siting_land_models::{Coordinates, EvaluatedNode, Landuse, RegionSummary, ThresholdKey};
use wind_siting_spatial::polygon_area_km2;

use crate::SitingError;
use crate::config::SitingConfig;
use crate::retry::RetryPolicy;
use crate::store::LandStore;

/// What a single way adds to a region summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WayContribution {
    pub way_id: i64,
    pub area_km2: f64,
    pub power_mw: f64,
    pub node_count: u64,
}

/// Area and power of one way from its qualifying node positions.
///
/// Fewer than three positions cannot span an area and contribute zero
/// area and power, but still count their nodes.
#[must_use]
pub fn way_contribution(
    way_id: i64,
    positions: &[Coordinates],
    power_density_mw_per_km2: f64,
) -> WayContribution {
    let area_km2 = if positions.len() >= 3 {
        polygon_area_km2(positions)
    } else {
        0.0
    };

    WayContribution {
        way_id,
        area_km2,
        power_mw: area_km2 * power_density_mw_per_km2,
        node_count: positions.len() as u64,
    }
}

/// Summary of `nodes` for one threshold pair.
///
/// Nodes without a way are ignored. Ways are visited in id order so the
/// floating-point sums do not depend on input order.
#[must_use]
pub fn summarize(
    nodes: &[EvaluatedNode],
    key: ThresholdKey,
    power_density_mw_per_km2: f64,
) -> RegionSummary {
    let min_distance_km = key.distance_km();
    let mut ways: BTreeMap<i64, Vec<Coordinates>> = BTreeMap::new();

    for evaluated in nodes {
        let Some(way_id) = evaluated.node.way_id else {
            continue;
        };
        if evaluated.verdict.closest_distance_restriction >= min_distance_km {
            ways.entry(way_id).or_default().push(evaluated.node.coordinates);
        }
    }

    ways
        .iter()
        .map(|(way_id, positions)| {
            way_contribution(*way_id, positions, power_density_mw_per_km2)
        })
        .filter(|way| way.power_mw >= key.min_power())
        .fold(RegionSummary::default(), |mut summary, way| {
            summary.overall_area_km2 += way.area_km2;
            summary.overall_power_mw += way.power_mw;
            summary.node_count += way.node_count;
            summary
        })
}

/// Summaries written for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateReport {
    pub region_id: u32,
    /// Buildable allowable-landuse nodes the summaries were built from.
    pub buildable_nodes: usize,
    pub summaries: Vec<(ThresholdKey, RegionSummary)>,
}

/// Computes and stores region summaries for every configured threshold
/// pair.
pub struct AreaAggregator {
    store: Arc<dyn LandStore>,
    keys: Vec<ThresholdKey>,
    allowable: Vec<Landuse>,
    power_density_mw_per_km2: f64,
    retry: RetryPolicy,
}

impl AreaAggregator {
    #[must_use]
    pub fn new(store: Arc<dyn LandStore>, config: &SitingConfig) -> Self {
        Self {
            store,
            keys: config.threshold_keys(),
            allowable: config.allowable_landuse.clone(),
            power_density_mw_per_km2: config.power_density_mw_per_km2,
            retry: RetryPolicy::from(&config.retry),
        }
    }

    /// Recomputes and upserts every summary of `region_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SitingError::Store`] if the nodes cannot be fetched or a
    /// summary cannot be written, including when the region is unknown.
    pub fn aggregate_region(&self, region_id: u32) -> Result<AggregateReport, SitingError> {
        let nodes = self.retry.run("fetch buildable nodes", || {
            self.store.fetch_buildable_nodes(region_id, &self.allowable)
        })?;

        log::debug!("Region {region_id}: aggregating {} buildable nodes", nodes.len());

        let mut summaries = Vec::with_capacity(self.keys.len());
        for &key in &self.keys {
            let summary = summarize(&nodes, key, self.power_density_mw_per_km2);
            self.retry.run("persist region summary", || {
                self.store.persist_region_summary(region_id, key, &summary)
            })?;

            log::debug!(
                "Region {region_id} {key}: {:.3} km², {:.1} MW, {} nodes",
                summary.overall_area_km2,
                summary.overall_power_mw,
                summary.node_count
            );
            summaries.push((key, summary));
        }

        log::info!(
            "Region {region_id}: wrote {} summaries from {} buildable nodes",
            summaries.len(),
            nodes.len()
        );

        Ok(AggregateReport {
            region_id,
            buildable_nodes: nodes.len(),
            summaries,
        })
    }
}

#[cfg(test)]
mod tests {
    use wind_siting_land_models::{Node, NodeVerdict, Region};

    use super::*;
    use crate::config::RetryConfig;
    use crate::store::{MemoryStore, StoreError};

    /// Roughly 1 km east-west at 52°N.
    const LON_1KM: f64 = 0.014_6;
    /// Roughly 1 km north-south.
    const LAT_1KM: f64 = 0.009;
    const DENSITY: f64 = 19.8;

    fn evaluated(id: i64, way_id: Option<i64>, lon: f64, lat: f64, distance_km: f64) -> EvaluatedNode {
        EvaluatedNode {
            node: Node {
                id,
                coordinates: Coordinates::new(lon, lat),
                region_id: 1,
                landuse: Some(Landuse::Farmland),
                way_id,
            },
            verdict: NodeVerdict::from_distance(distance_km, Some(500), 0.5),
        }
    }

    /// The four corners of a ~1 km² square at `(lon, lat)`, all 1 km from
    /// the nearest restriction.
    fn square(first_id: i64, way_id: i64, lon: f64, lat: f64) -> Vec<EvaluatedNode> {
        vec![
            evaluated(first_id, Some(way_id), lon, lat, 1.0),
            evaluated(first_id + 1, Some(way_id), lon + LON_1KM, lat, 1.0),
            evaluated(first_id + 2, Some(way_id), lon + LON_1KM, lat + LAT_1KM, 1.0),
            evaluated(first_id + 3, Some(way_id), lon, lat + LAT_1KM, 1.0),
        ]
    }

    #[test]
    fn unit_square_way_contributes_area_times_density() {
        let summary = summarize(&square(1, 10, 19.0, 52.0), ThresholdKey::new(500, 0), DENSITY);

        assert_eq!(summary.node_count, 4);
        assert!((summary.overall_area_km2 - 1.0).abs() < 0.05, "{summary:?}");
        assert!((summary.overall_power_mw - summary.overall_area_km2 * DENSITY).abs() < 1e-9);
    }

    #[test]
    fn nodes_below_the_distance_threshold_are_excluded() {
        let mut nodes = square(1, 10, 19.0, 52.0);
        let base = summarize(&nodes, ThresholdKey::new(500, 0), DENSITY);
        nodes.push(evaluated(5, Some(10), 19.0 + LON_1KM * 2.0, 52.0, 0.3));

        let summary = summarize(&nodes, ThresholdKey::new(500, 0), DENSITY);

        assert_eq!(summary.node_count, 4);
        assert!((summary.overall_area_km2 - base.overall_area_km2).abs() < 1e-12);
    }

    #[test]
    fn ways_below_three_nodes_count_nodes_but_no_area() {
        let nodes = vec![
            evaluated(1, Some(10), 19.0, 52.0, 1.0),
            evaluated(2, Some(10), 19.01, 52.0, 1.0),
        ];

        let summary = summarize(&nodes, ThresholdKey::new(500, 0), DENSITY);

        assert_eq!(summary.node_count, 2);
        assert!(summary.overall_area_km2.abs() < f64::EPSILON);
        assert!(summary.overall_power_mw.abs() < f64::EPSILON);
    }

    #[test]
    fn ways_below_min_power_are_dropped_entirely() {
        let nodes = square(1, 10, 19.0, 52.0);

        let summary = summarize(&nodes, ThresholdKey::new(500, 100), DENSITY);

        assert_eq!(summary, RegionSummary::default());
    }

    #[test]
    fn nodes_without_a_way_are_ignored() {
        let mut nodes = square(1, 10, 19.0, 52.0);
        nodes.push(evaluated(9, None, 19.5, 52.5, 3.0));

        assert_eq!(
            summarize(&nodes, ThresholdKey::new(500, 0), DENSITY).node_count,
            4
        );
    }

    #[test]
    fn region_total_is_the_sum_of_its_ways() {
        let a = square(1, 10, 19.0, 52.0);
        let b = square(5, 20, 19.2, 52.1);
        let key = ThresholdKey::new(500, 0);

        let sa = summarize(&a, key, DENSITY);
        let sb = summarize(&b, key, DENSITY);
        let both: Vec<EvaluatedNode> = b.iter().chain(a.iter()).cloned().collect();
        let total = summarize(&both, key, DENSITY);

        assert_eq!(total.node_count, sa.node_count + sb.node_count);
        assert!((total.overall_area_km2 - (sa.overall_area_km2 + sb.overall_area_km2)).abs() < 1e-9);
        assert!((total.overall_power_mw - (sa.overall_power_mw + sb.overall_power_mw)).abs() < 1e-9);
    }

    #[test]
    fn node_count_never_grows_with_distance() {
        let nodes: Vec<EvaluatedNode> = (0..40_i32)
            .map(|i| {
                let f = f64::from(i);
                evaluated(
                    i64::from(i),
                    Some(i64::from(i % 4)),
                    19.0 + (f * 0.013) % 0.05,
                    52.0 + (f * 0.007) % 0.03,
                    0.5 + f * 0.03,
                )
            })
            .collect();

        let counts: Vec<u64> = [0.5, 0.75, 1.0, 1.25, 1.5]
            .iter()
            .map(|&km| summarize(&nodes, ThresholdKey::from_km(km, 0), DENSITY).node_count)
            .collect();

        assert!(counts.windows(2).all(|w| w[0] >= w[1]), "{counts:?}");
        assert_eq!(counts[0], 40);
    }

    fn config() -> SitingConfig {
        SitingConfig {
            retry: RetryConfig {
                max_retries: 0,
                base_delay_ms: 0,
            },
            ..SitingConfig::default()
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_region(Region {
            id: 1,
            name: "Mazowieckie".to_string(),
            neighbours: Vec::new(),
        });
        for evaluated in square(1, 10, 19.0, 52.0) {
            store.insert_node(evaluated.node.clone());
            store
                .persist_node_verdict(evaluated.node.id, &evaluated.verdict)
                .unwrap();
        }
        store
    }

    #[test]
    fn writes_every_threshold_key() {
        let store = seeded_store();
        let aggregator = AreaAggregator::new(store.clone(), &config());

        let report = aggregator.aggregate_region(1).unwrap();

        assert_eq!(report.buildable_nodes, 4);
        assert_eq!(report.summaries.len(), 5);
        for key in config().threshold_keys() {
            let stored = store.summary(1, key).unwrap();
            let expected = if key.distance_m <= 1000 { 4 } else { 0 };
            assert_eq!(stored.node_count, expected, "{key}");
        }
    }

    #[test]
    fn rerun_overwrites_previous_summaries() {
        let store = seeded_store();
        let aggregator = AreaAggregator::new(store.clone(), &config());
        aggregator.aggregate_region(1).unwrap();

        store
            .persist_node_verdict(1, &NodeVerdict::disqualified(500))
            .unwrap();
        aggregator.aggregate_region(1).unwrap();

        let summary = store.summary(1, ThresholdKey::new(500, 0)).unwrap();
        assert_eq!(summary.node_count, 3);
        assert!(summary.overall_area_km2 > 0.0);
        assert!(summary.overall_area_km2 < 0.6);
    }

    #[test]
    fn unknown_region_fails() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = AreaAggregator::new(store, &config());

        assert!(matches!(
            aggregator.aggregate_region(42),
            Err(SitingError::Store(StoreError::RegionNotFound(42)))
        ));
    }
}
