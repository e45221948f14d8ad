//! Neighbour lookup for regions.

use std::collections::BTreeSet;

use crate::store::{LandStore, StoreError};

/// Resolves the regions adjacent to a given region.
pub struct RegionResolver<'a> {
    store: &'a dyn LandStore,
}

impl<'a> RegionResolver<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn LandStore) -> Self {
        Self { store }
    }

    /// Neighbour ids of `region_id` in stored order, without self
    /// references or repeats.
    ///
    /// An unknown region yields an empty list and a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store request itself fails.
    pub fn get_neighbours(&self, region_id: u32) -> Result<Vec<u32>, StoreError> {
        let Some(stored) = self.store.fetch_region_neighbours(region_id)? else {
            log::warn!("Region {region_id} not found, treating it as having no neighbours");
            return Ok(Vec::new());
        };

        let mut seen = BTreeSet::new();
        let neighbours: Vec<u32> = stored
            .into_iter()
            .filter(|&id| id != region_id && seen.insert(id))
            .collect();

        log::debug!("Region {region_id} has {} neighbours", neighbours.len());
        Ok(neighbours)
    }
}
