//! Tile schema abstraction and zoom-level resolution.
//!
//! A tile schema describes which zoom levels a tile source offers, the
//! resolution and footprint of each level, and how to enumerate the tiles
//! overlapping a region. The fetch engine consumes schemas exclusively
//! through the [`TileSchema`] trait; [`GridSchema`] is the regular-grid
//! implementation used by file-backed sources and tests.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::coord::{Extent, Resolution, TileIndex, TileInfo};

/// Errors produced by schema queries.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema exposes no zoom levels at all.
    #[error("schema has no resolutions")]
    NoResolutions,
}

/// Descriptor of a tile source's zoom levels and tile layout.
///
/// Implementations are read-only from the fetch engine's perspective and
/// must be safe to query from multiple tasks at once.
pub trait TileSchema: Send + Sync {
    /// All zoom levels, keyed by level identifier.
    fn resolutions(&self) -> &BTreeMap<String, Resolution>;

    /// The full area covered by the schema, in map units.
    fn extent(&self) -> &Extent;

    /// Every tile overlapping `extent` at the given level.
    ///
    /// An unknown level yields an empty list. Indices below the schema
    /// origin come out negative; callers that cannot use such boundary
    /// artifacts filter them.
    fn tile_infos(&self, extent: &Extent, level_id: &str) -> Vec<TileInfo>;
}

/// Picks the schema level whose resolution is closest to `target`.
///
/// Targets finer than the finest level clamp to the finest, coarser than
/// the coarsest clamp to the coarsest; in between the level minimizing
/// `|units_per_pixel - target|` wins, first encountered (in coarse-to-fine
/// order) on ties.
pub fn nearest_level(
    resolutions: &BTreeMap<String, Resolution>,
    target: f64,
) -> Result<String, SchemaError> {
    if resolutions.is_empty() {
        return Err(SchemaError::NoResolutions);
    }

    let mut ordered: Vec<&Resolution> = resolutions.values().collect();
    ordered.sort_by(|a, b| {
        b.units_per_pixel
            .partial_cmp(&a.units_per_pixel)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // finer than the finest level on offer
    let finest = ordered[ordered.len() - 1];
    if finest.units_per_pixel > target {
        return Ok(finest.id.clone());
    }

    // coarser than the coarsest
    let coarsest = ordered[0];
    if coarsest.units_per_pixel < target {
        return Ok(coarsest.id.clone());
    }

    let mut best = coarsest;
    let mut best_distance = f64::MAX;
    for resolution in ordered {
        let distance = (resolution.units_per_pixel - target).abs();
        if distance < best_distance {
            best = resolution;
            best_distance = distance;
        }
    }
    Ok(best.id.clone())
}

/// Regular-grid tile schema.
///
/// Tiles are square-pixel rasters laid out on a grid anchored at the
/// lower-left corner of the schema extent, rows counting upwards. All
/// levels share the same pixel size, so a level's tile footprint in map
/// units is `units_per_pixel * tile_size`.
pub struct GridSchema {
    extent: Extent,
    tile_size: u32,
    resolutions: BTreeMap<String, Resolution>,
}

impl GridSchema {
    /// Create a schema covering `extent` with the given levels.
    pub fn new(extent: Extent, tile_size: u32, levels: impl IntoIterator<Item = Resolution>) -> Self {
        let resolutions = levels
            .into_iter()
            .map(|level| (level.id.clone(), level))
            .collect();
        Self {
            extent,
            tile_size,
            resolutions,
        }
    }

    /// Edge length of a tile in pixels.
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }
}

impl TileSchema for GridSchema {
    fn resolutions(&self) -> &BTreeMap<String, Resolution> {
        &self.resolutions
    }

    fn extent(&self) -> &Extent {
        &self.extent
    }

    fn tile_infos(&self, extent: &Extent, level_id: &str) -> Vec<TileInfo> {
        let Some(resolution) = self.resolutions.get(level_id) else {
            return Vec::new();
        };

        let tile_units = resolution.units_per_pixel * self.tile_size as f64;
        let matrix_cols = (self.extent.width() / tile_units).ceil() as i32;
        let matrix_rows = (self.extent.height() / tile_units).ceil() as i32;

        let first_col = ((extent.min_x - self.extent.min_x) / tile_units).floor() as i32;
        let first_row = ((extent.min_y - self.extent.min_y) / tile_units).floor() as i32;
        let last_col =
            (((extent.max_x - self.extent.min_x) / tile_units).ceil() as i32 - 1).min(matrix_cols - 1);
        let last_row =
            (((extent.max_y - self.extent.min_y) / tile_units).ceil() as i32 - 1).min(matrix_rows - 1);

        let mut infos = Vec::new();
        for col in first_col..=last_col {
            for row in first_row..=last_row {
                let min_x = self.extent.min_x + col as f64 * tile_units;
                let min_y = self.extent.min_y + row as f64 * tile_units;
                infos.push(TileInfo::new(
                    TileIndex::new(level_id, col, row),
                    Extent::new(min_x, min_y, min_x + tile_units, min_y + tile_units),
                ));
            }
        }
        infos
    }
}
