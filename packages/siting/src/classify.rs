//! Nearest-restriction classification of a single candidate node.
//!
//! A candidate is compared against the restricting nodes inside a small
//! coordinate box around it. The first restriction closer than the minimum
//! allowable distance disqualifies the node immediately; otherwise the
//! nearest restriction found decides.

use std::ops::ControlFlow;

use wind_siting_land_models::{Coordinates, Node, NodeVerdict};
use wind_siting_spatial::{
    BoundingBox, RestrictingPoint, RestrictionIndex, haversine_distance_km, within_box,
};

use crate::config::SitingConfig;

/// Outcome of scanning one set of candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scan {
    /// No candidate was inside the prefilter box.
    Empty,
    /// This restriction is closer than the minimum allowable distance.
    Disqualified(i64),
    /// No candidate was too close; the nearest one found.
    Nearest {
        /// Restricting node id.
        node_id: i64,
        /// Haversine distance in km.
        distance_km: f64,
    },
}

/// Distance thresholds used for one classification run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classifier {
    /// Minimum distance to a restriction for a node to be buildable, km.
    pub min_allowable_distance_km: f64,
    /// Prefilter box half-width, degrees.
    pub bbox_half_width_deg: f64,
    /// Distance recorded when the same-region box is empty, km.
    pub sentinel_distance_km: f64,
}

impl Classifier {
    #[must_use]
    pub const fn new(
        min_allowable_distance_km: f64,
        bbox_half_width_deg: f64,
        sentinel_distance_km: f64,
    ) -> Self {
        Self {
            min_allowable_distance_km,
            bbox_half_width_deg,
            sentinel_distance_km,
        }
    }

    #[must_use]
    pub const fn from_config(config: &SitingConfig) -> Self {
        Self::new(
            config.min_allowable_distance_km,
            config.bbox_half_width_deg,
            config.sentinel_distance_km,
        )
    }

    /// Scans `candidates` in order.
    ///
    /// Short-circuits on the first candidate strictly closer than the
    /// minimum. Without a short-circuit the strict minimum wins and ties
    /// keep the candidate seen first.
    pub fn scan<'a>(
        &self,
        origin: Coordinates,
        candidates: impl IntoIterator<Item = &'a RestrictingPoint>,
    ) -> Scan {
        let flow = candidates
            .into_iter()
            .try_fold(None::<(i64, f64)>, |nearest, candidate| {
                let distance = haversine_distance_km(origin, candidate.coordinates);
                if distance < self.min_allowable_distance_km {
                    return ControlFlow::Break(candidate.node_id);
                }
                match nearest {
                    Some((_, best)) if best <= distance => ControlFlow::Continue(nearest),
                    _ => ControlFlow::Continue(Some((candidate.node_id, distance))),
                }
            });

        match flow {
            ControlFlow::Break(node_id) => Scan::Disqualified(node_id),
            ControlFlow::Continue(None) => Scan::Empty,
            ControlFlow::Continue(Some((node_id, distance_km))) => Scan::Nearest {
                node_id,
                distance_km,
            },
        }
    }

    /// Same-region classification against an unfiltered slice of
    /// restrictions. The slice is reduced to the prefilter box first.
    #[must_use]
    pub fn classify(&self, node: &Node, candidates: &[RestrictingPoint]) -> NodeVerdict {
        let bbox = BoundingBox::around(node.coordinates, self.bbox_half_width_deg);
        let scan = self.scan(node.coordinates, within_box(candidates, bbox));
        self.local_verdict(scan)
    }

    /// Same-region classification through an R-tree. The index narrows the
    /// restrictions to the node's box before [`Classifier::classify`] runs.
    #[must_use]
    pub fn classify_local(&self, node: &Node, index: &RestrictionIndex) -> NodeVerdict {
        let candidates = index.candidates_near(node.coordinates, self.bbox_half_width_deg);
        self.classify(node, &candidates)
    }

    /// Refines a buildable local verdict with the neighbouring regions'
    /// restrictions. Non-buildable verdicts are already final and returned
    /// unchanged.
    #[must_use]
    pub fn classify_neighbours(
        &self,
        origin: Coordinates,
        index: &RestrictionIndex,
        local: NodeVerdict,
    ) -> NodeVerdict {
        if !local.is_buildable {
            return local;
        }

        let candidates = index.candidates_near(origin, self.bbox_half_width_deg);
        self.merge(local, self.scan(origin, &candidates))
    }

    fn local_verdict(&self, scan: Scan) -> NodeVerdict {
        match scan {
            Scan::Empty => NodeVerdict::from_distance(
                self.sentinel_distance_km,
                None,
                self.min_allowable_distance_km,
            ),
            Scan::Disqualified(node_id) => NodeVerdict::disqualified(node_id),
            Scan::Nearest {
                node_id,
                distance_km,
            } => NodeVerdict::from_distance(
                distance_km,
                Some(node_id),
                self.min_allowable_distance_km,
            ),
        }
    }

    fn merge(&self, local: NodeVerdict, scan: Scan) -> NodeVerdict {
        match scan {
            Scan::Empty => local,
            Scan::Disqualified(node_id) => NodeVerdict::disqualified(node_id),
            Scan::Nearest {
                node_id,
                distance_km,
            } => {
                // A sentinel distance is not a real measurement.
                let replaces = local.restricting_node_id.is_none()
                    || distance_km < local.closest_distance_restriction;
                if replaces {
                    NodeVerdict::from_distance(
                        distance_km,
                        Some(node_id),
                        self.min_allowable_distance_km,
                    )
                } else {
                    local
                }
            }
        }
    }
}
