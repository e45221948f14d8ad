//! Overpass API JSON extracts.
//!
//! A region extract is the `out:json` answer to a query for land-use ways
//! inside the region's boundary plus their member nodes. Land use lives on
//! the ways; nodes inherit it (and their way id) from the way that lists
//! them.

use std::collections::{BTreeMap, btree_map::Entry};
use std::path::Path;
use std::str::FromStr as _;

use serde::Deserialize;
use wind_siting_land_models::{Coordinates, Landuse, Node, Way};

use crate::OsmError;

#[derive(Deserialize)]
struct OverpassResponse {
    elements: Vec<Element>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Element {
    Node {
        id: i64,
        lat: f64,
        lon: f64,
    },
    Way {
        id: i64,
        #[serde(default)]
        nodes: Vec<i64>,
        #[serde(default)]
        tags: BTreeMap<String, String>,
    },
    #[serde(other)]
    Other,
}

/// Nodes and ways imported for one region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionExtract {
    /// Every valid node, ordered by id.
    pub nodes: Vec<Node>,
    /// Every way, in input order, listing only members that were found.
    pub ways: Vec<Way>,
}

impl RegionExtract {
    /// Nodes that carry a land use.
    #[must_use]
    pub fn tagged_node_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.landuse.is_some()).count()
    }
}

/// Parses an Overpass JSON document into nodes and ways of `region_id`.
///
/// Nodes with out-of-range coordinates are dropped. A node listed by more
/// than one way keeps the first way. Way members with no matching node are
/// skipped.
///
/// # Errors
///
/// Returns [`OsmError::Json`] if the document is not an Overpass response.
pub fn parse_overpass(json: &str, region_id: u32) -> Result<RegionExtract, OsmError> {
    let response: OverpassResponse = serde_json::from_str(json)?;

    let mut nodes: BTreeMap<i64, Node> = BTreeMap::new();
    let mut raw_ways = Vec::new();
    let mut invalid = 0_usize;

    for element in response.elements {
        match element {
            Element::Node { id, lat, lon } => {
                let coordinates = Coordinates::new(lon, lat);
                if !coordinates.is_valid() {
                    invalid += 1;
                    continue;
                }
                nodes.entry(id).or_insert(Node {
                    id,
                    coordinates,
                    region_id,
                    landuse: None,
                    way_id: None,
                });
            }
            Element::Way { id, nodes: members, tags } => raw_ways.push((id, members, tags)),
            Element::Other => {}
        }
    }

    if invalid > 0 {
        log::warn!("Region {region_id}: dropped {invalid} nodes with invalid coordinates");
    }

    let mut ways = Vec::with_capacity(raw_ways.len());
    let mut missing_refs = 0_usize;

    for (way_id, members, tags) in raw_ways {
        let landuse = tags.get("landuse").and_then(|value| {
            let parsed = Landuse::from_str(value).ok();
            if parsed.is_none() {
                log::debug!("Way {way_id}: ignoring landuse {value:?}");
            }
            parsed
        });

        let mut found = Vec::with_capacity(members.len());
        for node_id in members {
            let Entry::Occupied(mut entry) = nodes.entry(node_id) else {
                missing_refs += 1;
                continue;
            };
            let node = entry.get_mut();

            match node.way_id {
                None => {
                    node.way_id = Some(way_id);
                    node.landuse = landuse;
                }
                Some(first) if first != way_id => {
                    log::warn!("Node {node_id} is in ways {first} and {way_id}, keeping {first}");
                }
                Some(_) => {}
            }
            // Closed ways repeat their first node.
            if !found.contains(&node_id) {
                found.push(node_id);
            }
        }

        ways.push(Way {
            id: way_id,
            region_id,
            landuse,
            nodes: found,
        });
    }

    if missing_refs > 0 {
        log::warn!("Region {region_id}: skipped {missing_refs} way members with no node");
    }

    let extract = RegionExtract {
        nodes: nodes.into_values().collect(),
        ways,
    };
    log::debug!(
        "Region {region_id}: {} nodes ({} tagged), {} ways",
        extract.nodes.len(),
        extract.tagged_node_count(),
        extract.ways.len()
    );

    Ok(extract)
}

/// Reads and parses an Overpass JSON file.
///
/// # Errors
///
/// Returns [`OsmError::FileNotFound`] if the file does not exist, or any
/// error from reading or [`parse_overpass`].
pub fn read_overpass_file(path: &Path, region_id: u32) -> Result<RegionExtract, OsmError> {
    if !path.exists() {
        return Err(OsmError::FileNotFound(path.display().to_string()));
    }

    let json = std::fs::read_to_string(path)?;
    parse_overpass(&json, region_id).map_err(|e| OsmError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
