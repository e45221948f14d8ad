#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Land-use node, way, region and result summary types.
//!
//! These types are shared by the admissibility engine, the storage adapter
//! and the OSM importer. Nodes carry their land-use tag and way membership
//! from import; the three verdict fields are added later by the
//! admissibility pipeline and never removed.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A WGS84 position stored as `(longitude, latitude)` in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
}

impl Coordinates {
    /// Creates a coordinate pair from longitude and latitude.
    #[must_use]
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Returns `true` if both components are finite and within the WGS84
    /// longitude/latitude ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

/// OSM `landuse` tag values the engine cares about.
///
/// Values outside this set are imported as "no landuse" and take no part
/// in classification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Landuse {
    // Allowable
    Farmland,
    Meadow,
    Brownfield,
    Orchard,
    Grass,
    // Restricting
    Residential,
    NatureReserve,
    Construction,
    Military,
}

impl Landuse {
    /// Land uses on which a turbine may be placed.
    pub const ALLOWABLE: &[Self] = &[
        Self::Farmland,
        Self::Meadow,
        Self::Brownfield,
        Self::Orchard,
        Self::Grass,
    ];

    /// Land uses that impose a minimum distance on nearby turbines.
    pub const RESTRICTING: &[Self] = &[
        Self::Residential,
        Self::NatureReserve,
        Self::Construction,
        Self::Military,
    ];
}

/// A point imported from OSM, either a buildability candidate or a
/// restriction source depending on its land use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// OSM node id.
    pub id: i64,
    /// Node position.
    pub coordinates: Coordinates,
    /// Administrative region owning this node.
    pub region_id: u32,
    /// Land use of the way this node belongs to, if any.
    pub landuse: Option<Landuse>,
    /// Way this node belongs to, if any.
    pub way_id: Option<i64>,
}

/// The three fields the admissibility pipeline adds to a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeVerdict {
    /// Kilometres to the nearest restricting node found, `0` when the node
    /// was disqualified by a candidate under the minimum distance.
    pub closest_distance_restriction: f64,
    /// The restricting node that produced the distance. `None` is the
    /// sentinel for "nothing found inside the search box".
    pub restricting_node_id: Option<i64>,
    /// Final admissibility verdict.
    pub is_buildable: bool,
}

impl NodeVerdict {
    /// Builds a verdict whose buildability is derived from `distance_km`.
    ///
    /// A distance exactly equal to the minimum counts as buildable.
    #[must_use]
    pub fn from_distance(
        distance_km: f64,
        restricting_node_id: Option<i64>,
        min_allowable_distance_km: f64,
    ) -> Self {
        Self {
            closest_distance_restriction: distance_km,
            restricting_node_id,
            is_buildable: distance_km >= min_allowable_distance_km,
        }
    }

    /// Verdict for a node disqualified by `restricting_node_id`.
    #[must_use]
    pub const fn disqualified(restricting_node_id: i64) -> Self {
        Self {
            closest_distance_restriction: 0.0,
            restricting_node_id: Some(restricting_node_id),
            is_buildable: false,
        }
    }
}

/// A node together with its persisted verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedNode {
    /// The node.
    pub node: Node,
    /// Its verdict.
    pub verdict: NodeVerdict,
}

/// A polygonal land-use feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Way {
    /// OSM way id.
    pub id: i64,
    /// Region the way was extracted for.
    pub region_id: u32,
    /// Land use tag.
    pub landuse: Option<Landuse>,
    /// Member node ids in OSM order.
    pub nodes: Vec<i64>,
}

/// An administrative region and its neighbour references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// 1-based sequential id.
    pub id: u32,
    /// Human-readable administrative name.
    pub name: String,
    /// Neighbouring region ids, in the order they were supplied.
    pub neighbours: Vec<u32>,
}

/// Parameter pair a region summary is computed for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ThresholdKey {
    /// Minimum distance to any restriction, in metres.
    pub distance_m: u32,
    /// Minimum power a single way must reach to count, in MW.
    pub min_power_mw: u32,
}

impl ThresholdKey {
    /// Creates a key from whole metres and MW.
    #[must_use]
    pub const fn new(distance_m: u32, min_power_mw: u32) -> Self {
        Self {
            distance_m,
            min_power_mw,
        }
    }

    /// Creates a key from a distance in kilometres, rounded to the metre.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_km(distance_km: f64, min_power_mw: u32) -> Self {
        Self::new((distance_km * 1000.0).round().max(0.0) as u32, min_power_mw)
    }

    /// Distance threshold in kilometres.
    #[must_use]
    pub fn distance_km(&self) -> f64 {
        f64::from(self.distance_m) / 1000.0
    }

    /// Minimum per-way power in MW.
    #[must_use]
    pub fn min_power(&self) -> f64 {
        f64::from(self.min_power_mw)
    }
}

impl std::fmt::Display for ThresholdKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}m_{}MW", self.distance_m, self.min_power_mw)
    }
}

/// Aggregated admissible area and power for one region and one
/// [`ThresholdKey`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionSummary {
    /// Summed hull area of the contributing ways, km².
    pub overall_area_km2: f64,
    /// Estimated installable power of the contributing ways, MW.
    pub overall_power_mw: f64,
    /// Qualifying nodes of the contributing ways.
    pub node_count: u64,
}

/// A persisted summary as exposed to reporting consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Region the summary belongs to.
    pub region_id: u32,
    /// Distance threshold in metres.
    pub distance_m: u32,
    /// Per-way power threshold in MW.
    pub min_power_mw: u32,
    /// Summed area, km².
    pub overall_area_km2: f64,
    /// Summed power, MW.
    pub overall_power_mw: f64,
    /// Qualifying node count.
    pub node_count: u64,
}

impl SummaryRecord {
    /// Flattens a keyed summary into a record.
    #[must_use]
    pub const fn new(region_id: u32, key: ThresholdKey, summary: RegionSummary) -> Self {
        Self {
            region_id,
            distance_m: key.distance_m,
            min_power_mw: key.min_power_mw,
            overall_area_km2: summary.overall_area_km2,
            overall_power_mw: summary.overall_power_mw,
            node_count: summary.node_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn landuse_sets_are_disjoint_and_complete() {
        for landuse in Landuse::ALLOWABLE {
            assert!(!Landuse::RESTRICTING.contains(landuse));
        }
        assert_eq!(Landuse::ALLOWABLE.len() + Landuse::RESTRICTING.len(), 9);
    }

    #[test]
    fn landuse_parses_osm_tag_values() {
        assert_eq!(
            Landuse::from_str("nature_reserve").unwrap(),
            Landuse::NatureReserve
        );
        assert_eq!(Landuse::from_str("farmland").unwrap(), Landuse::Farmland);
        assert!(Landuse::from_str("forest").is_err());
        assert_eq!(Landuse::Military.to_string(), "military");
    }

    #[test]
    fn verdict_ties_at_threshold_are_buildable() {
        let verdict = NodeVerdict::from_distance(0.5, Some(7), 0.5);
        assert!(verdict.is_buildable);

        let verdict = NodeVerdict::from_distance(0.499_999, Some(7), 0.5);
        assert!(!verdict.is_buildable);
    }

    #[test]
    fn threshold_key_round_trips_km() {
        let key = ThresholdKey::from_km(0.75, 0);
        assert_eq!(key.distance_m, 750);
        assert!((key.distance_km() - 0.75).abs() < f64::EPSILON);
        assert_eq!(key.to_string(), "750m_0MW");
    }

    #[test]
    fn threshold_keys_order_by_distance_then_power() {
        let mut keys = vec![
            ThresholdKey::new(1000, 0),
            ThresholdKey::new(500, 5),
            ThresholdKey::new(500, 0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ThresholdKey::new(500, 0),
                ThresholdKey::new(500, 5),
                ThresholdKey::new(1000, 0),
            ]
        );
    }

    #[test]
    fn summary_record_serializes_flat() {
        let record = SummaryRecord::new(
            3,
            ThresholdKey::new(500, 0),
            RegionSummary {
                overall_area_km2: 1.5,
                overall_power_mw: 29.7,
                node_count: 12,
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["region_id"], 3);
        assert_eq!(json["distance_m"], 500);
        assert_eq!(json["node_count"], 12);
    }
}
