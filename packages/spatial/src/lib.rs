#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Geodesic math and an in-memory restriction index.
//!
//! Restricting nodes for a region (or for the union of its neighbours) are
//! loaded into an R-tree once, and each candidate node then asks for the
//! restrictions inside a small coordinate box around it. The box is a cheap
//! prefilter only; exact distances are computed with
//! [`haversine_distance_km`] by the classifier.

pub mod geomath;

use rstar::{AABB, RTree, RTreeObject};
use wind_siting_land_models::{Coordinates, Node};

pub use geomath::{EARTH_RADIUS_KM, haversine_distance_km, polygon_area_km2};

/// Half-width of the default prefilter box, in degrees (~3.3 km of latitude).
pub const DEFAULT_BBOX_HALF_WIDTH_DEG: f64 = 0.04;

/// A coordinate-space bounding box in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// The square box of `half_width_deg` around `center`.
    #[must_use]
    pub fn around(center: Coordinates, half_width_deg: f64) -> Self {
        Self::new(
            center.lon - half_width_deg,
            center.lat - half_width_deg,
            center.lon + half_width_deg,
            center.lat + half_width_deg,
        )
    }

    /// Inclusive containment test.
    #[must_use]
    pub fn contains(&self, point: Coordinates) -> bool {
        (self.west..=self.east).contains(&point.lon) && (self.south..=self.north).contains(&point.lat)
    }

    fn envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.west, self.south], [self.east, self.north])
    }
}

/// A restricting node reduced to what the distance scan needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestrictingPoint {
    /// Node id reported as the restricting node.
    pub node_id: i64,
    /// Node position.
    pub coordinates: Coordinates,
}

impl From<&Node> for RestrictingPoint {
    fn from(node: &Node) -> Self {
        Self {
            node_id: node.id,
            coordinates: node.coordinates,
        }
    }
}

/// Keeps the candidates inside `bbox`, preserving their order.
pub fn within_box(
    candidates: &[RestrictingPoint],
    bbox: BoundingBox,
) -> impl Iterator<Item = &RestrictingPoint> {
    candidates
        .iter()
        .filter(move |candidate| bbox.contains(candidate.coordinates))
}

/// A restricting point stored in the R-tree with its insertion order.
struct IndexEntry {
    order: usize,
    point: RestrictingPoint,
}

impl RTreeObject for IndexEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.point.coordinates.lon, self.point.coordinates.lat])
    }
}

/// R-tree over a fixed set of restricting nodes.
///
/// Lookups return candidates in the order the points were supplied, so the
/// first-found semantics of the classifier do not depend on the tree layout.
pub struct RestrictionIndex {
    tree: RTree<IndexEntry>,
}

impl RestrictionIndex {
    /// Bulk-loads the given points.
    #[must_use]
    pub fn new(points: impl IntoIterator<Item = RestrictingPoint>) -> Self {
        let entries: Vec<IndexEntry> = points
            .into_iter()
            .enumerate()
            .map(|(order, point)| IndexEntry { order, point })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Bulk-loads the given nodes.
    #[must_use]
    pub fn from_nodes(nodes: &[Node]) -> Self {
        Self::new(nodes.iter().map(RestrictingPoint::from))
    }

    /// An index with no restrictions.
    #[must_use]
    pub fn empty() -> Self {
        Self { tree: RTree::new() }
    }

    /// Number of indexed restricting points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Returns `true` if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Restricting points inside the box of `half_width_deg` around
    /// `origin`, in insertion order.
    #[must_use]
    pub fn candidates_near(&self, origin: Coordinates, half_width_deg: f64) -> Vec<RestrictingPoint> {
        let query_env = BoundingBox::around(origin, half_width_deg).envelope();

        let mut hits: Vec<&IndexEntry> = self
            .tree
            .locate_in_envelope_intersecting(&query_env)
            .collect();
        hits.sort_unstable_by_key(|entry| entry.order);

        hits.into_iter().map(|entry| entry.point).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(node_id: i64, lon: f64, lat: f64) -> RestrictingPoint {
        RestrictingPoint {
            node_id,
            coordinates: Coordinates::new(lon, lat),
        }
    }

    #[test]
    fn bbox_is_inclusive() {
        let bbox = BoundingBox::around(Coordinates::new(20.0, 50.0), 0.04);
        assert!(bbox.contains(Coordinates::new(bbox.east, 50.0)));
        assert!(bbox.contains(Coordinates::new(bbox.west, bbox.south)));
        assert!(!bbox.contains(Coordinates::new(20.0401, 50.0)));
    }

    #[test]
    fn within_box_preserves_order() {
        let candidates = vec![
            point(3, 20.01, 50.0),
            point(1, 21.0, 50.0),
            point(2, 20.0, 50.02),
        ];
        let bbox = BoundingBox::around(Coordinates::new(20.0, 50.0), 0.04);

        let ids: Vec<i64> = within_box(&candidates, bbox).map(|p| p.node_id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn index_returns_candidates_in_insertion_order() {
        let points: Vec<RestrictingPoint> = (0..50_i32)
            .map(|i| point(i64::from(100 - i), 20.0 + f64::from(i) * 0.001, 50.0))
            .collect();
        let index = RestrictionIndex::new(points.clone());

        let hits = index.candidates_near(Coordinates::new(20.0, 50.0), 0.04);
        let expected: Vec<i64> = points.iter().map(|p| p.node_id).collect();
        assert_eq!(hits.iter().map(|p| p.node_id).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn index_matches_linear_prefilter() {
        let points: Vec<RestrictingPoint> = (0..200_i32)
            .map(|i| {
                let f = f64::from(i);
                point(i64::from(i), 19.9 + (f * 0.37) % 0.2, 51.9 + (f * 0.61) % 0.2)
            })
            .collect();
        let index = RestrictionIndex::new(points.clone());
        let origin = Coordinates::new(20.0, 52.0);

        let from_index: Vec<i64> = index
            .candidates_near(origin, 0.04)
            .iter()
            .map(|p| p.node_id)
            .collect();
        let from_scan: Vec<i64> = within_box(&points, BoundingBox::around(origin, 0.04))
            .map(|p| p.node_id)
            .collect();

        assert!(!from_index.is_empty());
        assert_eq!(from_index, from_scan);
    }

    #[test]
    fn empty_index_has_no_candidates() {
        let index = RestrictionIndex::empty();
        assert!(index.is_empty());
        assert!(index.candidates_near(Coordinates::new(20.0, 50.0), 0.04).is_empty());
    }
}
