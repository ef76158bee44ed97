//! Priority ordering of the tiles a view needs.

use std::cmp::Ordering;

use tracing::warn;

use crate::coord::{Extent, Resolution, TileInfo};
use crate::schema::TileSchema;

/// Decides which tiles a view needs and in what order to fetch them.
///
/// Pure: no I/O, no state, safe to call from any number of tasks.
pub trait FetchStrategy: Send + Sync {
    /// The prioritized tile list for rendering `extent` at `level_id`.
    fn tiles_wanted(
        &self,
        schema: &dyn TileSchema,
        extent: &Extent,
        level_id: &str,
    ) -> Vec<TileInfo>;
}

/// The default strategy: coarse fallbacks first, view center first.
///
/// Walks every level at or coarser than the target, coarsest first, so a
/// renderer can paint low-detail tiles immediately and overwrite them as
/// finer ones arrive. Within each level tiles are ordered by distance from
/// their center to the view center. Tiles with a negative row or column
/// (schema boundary artifacts) are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoarseToFineStrategy;

impl FetchStrategy for CoarseToFineStrategy {
    fn tiles_wanted(
        &self,
        schema: &dyn TileSchema,
        extent: &Extent,
        level_id: &str,
    ) -> Vec<TileInfo> {
        let resolutions = schema.resolutions();
        let Some(target) = resolutions.get(level_id) else {
            warn!(level = level_id, "level unknown to the schema, wanting nothing");
            return Vec::new();
        };

        let mut levels: Vec<&Resolution> = resolutions
            .values()
            .filter(|r| r.units_per_pixel >= target.units_per_pixel)
            .collect();
        levels.sort_by(|a, b| {
            b.units_per_pixel
                .partial_cmp(&a.units_per_pixel)
                .unwrap_or(Ordering::Equal)
        });

        let center_x = extent.center_x();
        let center_y = extent.center_y();

        let mut wanted = Vec::new();
        for level in levels {
            let mut infos = schema.tile_infos(extent, &level.id);
            infos.sort_by(|a, b| {
                let da = distance(center_x, center_y, a.extent.center_x(), a.extent.center_y());
                let db = distance(center_x, center_y, b.extent.center_x(), b.extent.center_y());
                da.partial_cmp(&db).unwrap_or(Ordering::Equal)
            });
            wanted.extend(
                infos
                    .into_iter()
                    .filter(|info| info.index.row >= 0 && info.index.col >= 0),
            );
        }
        wanted
    }
}

fn distance(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    ((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt()
}
