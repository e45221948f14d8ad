//! Region and neighbour list files.

use std::collections::BTreeMap;

use wind_siting_land_models::Region;

/// A region name with its assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRecord {
    /// 1-based position in the region list.
    pub id: u32,
    pub name: String,
}

/// Parses a region list: one name per line, ids assigned from 1 in file
/// order. Blank lines are ignored and do not consume an id.
#[must_use]
pub fn parse_region_list(text: &str) -> Vec<RegionRecord> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .zip(1_u32..)
        .map(|(name, id)| RegionRecord {
            id,
            name: name.to_string(),
        })
        .collect()
}

/// Splits one `Name - A; B;` line into the region name and its neighbour
/// names.
fn split_neighbour_line(line: &str) -> Option<(&str, Vec<&str>)> {
    let (name, rest) = line.split_once(" - ")?;
    let neighbours = rest
        .split(';')
        .map(str::trim)
        .filter(|neighbour| !neighbour.is_empty())
        .collect();
    Some((name.trim(), neighbours))
}

/// Builds a [`Region`] for every record, resolving neighbour names from
/// `text`.
///
/// Regions without a neighbour line get an empty list. Malformed lines
/// and unknown names are skipped with a warning.
#[must_use]
pub fn parse_neighbour_list(text: &str, regions: &[RegionRecord]) -> Vec<Region> {
    let ids: BTreeMap<&str, u32> = regions.iter().map(|r| (r.name.as_str(), r.id)).collect();
    let mut neighbours: BTreeMap<u32, Vec<u32>> = BTreeMap::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((name, names)) = split_neighbour_line(line) else {
            log::warn!("Neighbour list line {}: missing ' - ' separator", index + 1);
            continue;
        };
        let Some(&region_id) = ids.get(name) else {
            log::warn!("Neighbour list line {}: unknown region {name:?}", index + 1);
            continue;
        };

        let resolved = neighbours.entry(region_id).or_default();
        for neighbour in names {
            match ids.get(neighbour) {
                Some(&id) => resolved.push(id),
                None => log::warn!("Region {name:?}: unknown neighbour {neighbour:?}"),
            }
        }
    }

    regions
        .iter()
        .map(|record| Region {
            id: record.id,
            name: record.name.clone(),
            neighbours: neighbours.remove(&record.id).unwrap_or_default(),
        })
        .collect()
}
