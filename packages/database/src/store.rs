//! [`LandStore`] backed by a single `DuckDB` connection.
//!
//! `DuckDB` connections are not `Sync`, so access is serialized through a
//! mutex. Every trait method takes the lock for exactly one query.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use duckdb::Connection;
use wind_siting::{LandStore, StoreError};
use wind_siting_land_models::{
    EvaluatedNode, Landuse, Node, NodeVerdict, RegionSummary, SummaryRecord, ThresholdKey,
};

use crate::{DbError, land_db};

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        Self::Backend {
            message: e.to_string(),
        }
    }
}

/// Shared handle to the siting database.
pub struct DuckStore {
    conn: Mutex<Connection>,
}

impl DuckStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        Ok(Self::from_connection(land_db::open(path)?))
    }

    /// Opens an empty in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Ok(Self::from_connection(land_db::open_in_memory()?))
    }

    /// Wraps a connection whose schema already exists.
    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Locks the connection for direct use, e.g. by the importer.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clears all node verdicts and summaries.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the update fails.
    pub fn reset_results(&self) -> Result<(), DbError> {
        land_db::reset_results(&self.connection())
    }

    /// Stored summaries, optionally for a single region.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn summary_records(&self, region_id: Option<u32>) -> Result<Vec<SummaryRecord>, DbError> {
        land_db::summary_records(&self.connection(), region_id)
    }
}

impl LandStore for DuckStore {
    fn region_ids(&self) -> Result<Vec<u32>, StoreError> {
        Ok(land_db::region_ids(&self.connection())?)
    }

    fn fetch_nodes_by_region_and_landuse(
        &self,
        region_id: u32,
        landuse: &[Landuse],
    ) -> Result<Vec<Node>, StoreError> {
        Ok(land_db::nodes_by_region_and_landuse(
            &self.connection(),
            region_id,
            landuse,
        )?)
    }

    fn fetch_region_neighbours(&self, region_id: u32) -> Result<Option<Vec<u32>>, StoreError> {
        Ok(land_db::region_neighbours(&self.connection(), region_id)?)
    }

    fn node_already_final(&self, node_id: i64) -> Result<bool, StoreError> {
        land_db::node_has_verdict(&self.connection(), node_id)?
            .ok_or(StoreError::NodeNotFound(node_id))
    }

    fn persist_node_verdict(&self, node_id: i64, verdict: &NodeVerdict) -> Result<(), StoreError> {
        if land_db::update_node_verdict(&self.connection(), node_id, verdict)? {
            Ok(())
        } else {
            Err(StoreError::NodeNotFound(node_id))
        }
    }

    fn fetch_buildable_nodes(
        &self,
        region_id: u32,
        landuse: &[Landuse],
    ) -> Result<Vec<EvaluatedNode>, StoreError> {
        Ok(land_db::buildable_nodes(&self.connection(), region_id, landuse)?)
    }

    fn persist_region_summary(
        &self,
        region_id: u32,
        key: ThresholdKey,
        summary: &RegionSummary,
    ) -> Result<(), StoreError> {
        let conn = self.connection();
        if !land_db::region_exists(&conn, region_id)? {
            return Err(StoreError::RegionNotFound(region_id));
        }
        Ok(land_db::upsert_region_summary(&conn, region_id, key, summary)?)
    }

    fn region_summaries(
        &self,
        region_id: u32,
    ) -> Result<Vec<(ThresholdKey, RegionSummary)>, StoreError> {
        let records = land_db::summary_records(&self.connection(), Some(region_id))?;

        Ok(records
            .into_iter()
            .map(|record| {
                (
                    ThresholdKey::new(record.distance_m, record.min_power_mw),
                    RegionSummary {
                        overall_area_km2: record.overall_area_km2,
                        overall_power_mw: record.overall_power_mw,
                        node_count: record.node_count,
                    },
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wind_siting::{AdmissibilityPipeline, AreaAggregator, SitingConfig};
    use wind_siting_land_models::{Coordinates, Region, Way};

    use super::*;

    /// Roughly 1 km east-west at 52°N.
    const LON_1KM: f64 = 0.014_6;
    /// Roughly 1 km north-south.
    const LAT_1KM: f64 = 0.009;

    fn node(id: i64, lon: f64, lat: f64, landuse: Landuse, way_id: i64) -> Node {
        Node {
            id,
            coordinates: Coordinates::new(lon, lat),
            region_id: 1,
            landuse: Some(landuse),
            way_id: Some(way_id),
        }
    }

    /// One ~1 km² farmland square with a residential node 2 km south of it.
    fn seeded() -> Arc<DuckStore> {
        let store = DuckStore::open_in_memory().unwrap();
        {
            let conn = store.connection();
            land_db::insert_regions(
                &conn,
                &[Region {
                    id: 1,
                    name: "Podlaskie".to_string(),
                    neighbours: Vec::new(),
                }],
            )
            .unwrap();
            land_db::insert_nodes(
                &conn,
                &[
                    node(1, 23.0, 53.0, Landuse::Farmland, 10),
                    node(2, 23.0 + LON_1KM, 53.0, Landuse::Farmland, 10),
                    node(3, 23.0 + LON_1KM, 53.0 + LAT_1KM, Landuse::Farmland, 10),
                    node(4, 23.0, 53.0 + LAT_1KM, Landuse::Farmland, 10),
                    node(5, 23.0, 53.0 - 2.0 * LAT_1KM, Landuse::Residential, 20),
                ],
            )
            .unwrap();
            land_db::insert_ways(
                &conn,
                &[
                    Way {
                        id: 10,
                        region_id: 1,
                        landuse: Some(Landuse::Farmland),
                        nodes: vec![1, 2, 3, 4],
                    },
                    Way {
                        id: 20,
                        region_id: 1,
                        landuse: Some(Landuse::Residential),
                        nodes: vec![5],
                    },
                ],
            )
            .unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn unknown_ids_map_to_not_found() {
        let store = seeded();
        let verdict = NodeVerdict::disqualified(5);

        assert!(matches!(
            store.node_already_final(99),
            Err(StoreError::NodeNotFound(99))
        ));
        assert!(matches!(
            store.persist_node_verdict(99, &verdict),
            Err(StoreError::NodeNotFound(99))
        ));
        assert!(matches!(
            store.persist_region_summary(7, ThresholdKey::new(500, 0), &RegionSummary::default()),
            Err(StoreError::RegionNotFound(7))
        ));
        assert_eq!(store.fetch_region_neighbours(7).unwrap(), None);
    }

    #[test]
    fn evaluates_and_aggregates_end_to_end() {
        let store = seeded();
        let config = SitingConfig::default();

        let report = AdmissibilityPipeline::new(store.clone(), &config)
            .evaluate_region(1)
            .unwrap();
        assert_eq!(report.evaluated, 4);
        assert_eq!(report.buildable, 4);

        let nearest = store.fetch_buildable_nodes(1, Landuse::ALLOWABLE).unwrap();
        assert_eq!(nearest.len(), 4);
        assert!(nearest.iter().all(|n| n.verdict.restricting_node_id == Some(5)));
        assert!((nearest[0].verdict.closest_distance_restriction - 2.0).abs() < 0.01);

        AreaAggregator::new(store.clone(), &config)
            .aggregate_region(1)
            .unwrap();

        let summaries = store.region_summaries(1).unwrap();
        assert_eq!(summaries.len(), 5);
        let (key, summary) = summaries[0];
        assert_eq!(key, ThresholdKey::new(500, 0));
        assert_eq!(summary.node_count, 4);
        assert!((summary.overall_area_km2 - 1.0).abs() < 0.05);

        let rerun = AdmissibilityPipeline::new(store.clone(), &config)
            .evaluate_region(1)
            .unwrap();
        assert_eq!(rerun.skipped, 4);
    }
}
