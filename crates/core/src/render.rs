//! Per-zoom feature rendering.
//!
//! [`FeatureRenderer`] turns one [`RenderableFeature`] into tile features for
//! every zoom level it renders at. Each zoom runs the same pipeline:
//!
//! 1. resolve the feature's settings for the zoom,
//! 2. skip the feature if it renders below its minimum pixel size,
//! 3. simplify to the zoom's pixel tolerance and repair the result,
//! 4. apply the feature's geometry transforms,
//! 5. slice into tiles, assign label-grid groups, and emit.
//!
//! A failure at one zoom is logged and skipped; other zooms still render.

use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{
    Area, BooleanOps, BoundingRect, Euclidean, Geometry, Length, Line, LineString, MultiPolygon,
    Polygon,
};

use crate::clip::covered_tiles;
use crate::feature::{GroupInfo, RenderableFeature, TileFeature, DEFAULT_MIN_PIXEL_SIZE};
use crate::simplify::simplify_geometry;
use crate::tile::{PIXEL_QUANTUM, TILE_SIZE};
use crate::Result;

/// Zoom range the renderer produces tiles for (inclusive).
#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { min_zoom: 0, max_zoom: 14 }
    }
}

/// Renders features into per-tile output through an emit callback.
pub struct FeatureRenderer<F: FnMut(TileFeature)> {
    config: RenderConfig,
    emit: F,
}

impl<F: FnMut(TileFeature)> FeatureRenderer<F> {
    pub fn new(config: RenderConfig, emit: F) -> Self {
        Self { config, emit }
    }

    /// Render `feature` at every zoom in the intersection of its zoom range
    /// and the renderer's.
    ///
    /// Zoom levels that fail (for example on non-finite coordinates) are
    /// logged and skipped rather than aborting the remaining zooms.
    pub fn render(&mut self, feature: &RenderableFeature) {
        let lo = feature.min_zoom().max(self.config.min_zoom);
        let hi = feature.max_zoom().min(self.config.max_zoom);
        for zoom in lo..=hi {
            if let Err(e) = self.render_at_zoom(feature, zoom) {
                log::warn!(
                    "skipping feature {} in layer {:?} at z{}: {}",
                    feature.source_id(),
                    feature.layer(),
                    zoom,
                    e
                );
            }
        }
    }

    fn render_at_zoom(&mut self, feature: &RenderableFeature, zoom: u8) -> Result<()> {
        // Pixels per world unit at this zoom.
        let scale = TILE_SIZE * (1u64 << zoom) as f64;
        let buffer_px = feature.buffer_pixels_at(zoom);
        let tolerance_px = feature.pixel_tolerance_at(zoom);
        // At the deepest zoom there is nowhere further to zoom in, so the
        // size floor drops to the output grid quantum unless overridden.
        let default_min = if zoom == self.config.max_zoom {
            PIXEL_QUANTUM
        } else {
            DEFAULT_MIN_PIXEL_SIZE
        };
        let min_size_px = feature.min_pixel_size_at(zoom, default_min);

        if below_min_size(feature.geometry(), scale, min_size_px) {
            return Ok(());
        }

        // Tolerance converts to world units; distance-based simplification
        // commutes with uniform scaling, so this matches pixel-space output.
        let mut geometry =
            simplify_geometry(feature.geometry(), feature.simplify_method(), tolerance_px / scale);
        geometry = repair_polygons(geometry);

        for transform in feature.transforms() {
            geometry = transform(geometry);
        }

        let tiled = covered_tiles(&geometry, zoom, buffer_px)?;

        let (grid_size, grid_limit) = feature.label_grid_at(zoom);
        if grid_size > 0.0 {
            assert!(
                buffer_px >= grid_size,
                "label grid cells ({} px) larger than the tile buffer ({} px) \
                 would group points differently in adjacent tiles",
                grid_size,
                buffer_px
            );
        }

        let attrs = feature.attrs_at_zoom(zoom);
        for (tile, tile_geometry) in tiled.iter() {
            let group = if grid_size > 0.0 {
                label_grid_group(tile_geometry, tile.encoded(), grid_size)
                    .map(|group| GroupInfo { group, limit: grid_limit })
            } else {
                None
            };
            (self.emit)(TileFeature {
                tile,
                layer: feature.layer().to_string(),
                geometry: tile_geometry.clone(),
                attrs: attrs.clone(),
                group,
                z_order: feature.z_order(),
                source_id: feature.source_id(),
            });
        }
        Ok(())
    }
}

/// Whether the feature renders too small to keep at this scale.
///
/// Lines compare their length, polygons the area of their bounding box
/// (cheaper than true area and close enough for a drop filter). Points have
/// no size and always pass. Exactly at the floor keeps.
fn below_min_size(geometry: &Geometry<f64>, scale: f64, min_size_px: f64) -> bool {
    if min_size_px <= 0.0 {
        return false;
    }
    match geometry {
        Geometry::Line(l) => Euclidean.length(l) * scale < min_size_px,
        Geometry::LineString(ls) => Euclidean.length(ls) * scale < min_size_px,
        Geometry::MultiLineString(mls) => Euclidean.length(mls) * scale < min_size_px,
        Geometry::Polygon(_)
        | Geometry::MultiPolygon(_)
        | Geometry::Rect(_)
        | Geometry::Triangle(_) => match geometry.bounding_rect() {
            Some(rect) => {
                rect.width() * scale * (rect.height() * scale) < min_size_px * min_size_px
            }
            None => true,
        },
        Geometry::GeometryCollection(gc) => {
            gc.0.iter().all(|g| below_min_size(g, scale, min_size_px))
        }
        Geometry::Point(_) | Geometry::MultiPoint(_) => false,
    }
}

/// Label-grid cell key for a point geometry on one tile.
///
/// The key is a pure function of (tile, cell), so rendering the same feature
/// from different threads or in a different order yields identical groups.
fn label_grid_group(geometry: &Geometry<f64>, tile_key: u32, grid_size: f64) -> Option<u64> {
    let p = match geometry {
        Geometry::Point(p) => p.0,
        Geometry::MultiPoint(mp) => mp.0.first()?.0,
        _ => return None,
    };
    let cell_x = (p.x / grid_size).floor() as i64;
    let cell_y = (p.y / grid_size).floor() as i64;
    Some(((tile_key as u64) << 32) | (((cell_x & 0xffff) as u64) << 16) | ((cell_y & 0xffff) as u64))
}

/// Drop degenerate rings, then normalize rings that self-intersect after
/// simplification. Non-polygon geometry passes through.
fn repair_polygons(geometry: Geometry<f64>) -> Geometry<f64> {
    let polys = match geometry {
        Geometry::Polygon(p) => vec![p],
        Geometry::MultiPolygon(mp) => mp.0,
        other => return other,
    };

    let mut kept: Vec<Polygon<f64>> = Vec::with_capacity(polys.len());
    let mut needs_normalize = false;
    for poly in polys {
        if !ring_is_usable(poly.exterior()) {
            continue;
        }
        let interiors: Vec<LineString<f64>> =
            poly.interiors().iter().filter(|r| ring_is_usable(r)).cloned().collect();
        let poly = Polygon::new(poly.exterior().clone(), interiors);
        if !needs_normalize {
            needs_normalize = ring_self_intersects(poly.exterior())
                || poly.interiors().iter().any(|r| ring_self_intersects(r));
        }
        kept.push(poly);
    }

    let mut result = MultiPolygon(kept);
    if needs_normalize {
        // Union with nothing rebuilds the rings under even-odd rules, which
        // splits bowties instead of letting them reach the clipper.
        result = result.union(&MultiPolygon::new(vec![]));
    }
    match result.0.len() {
        0 => Geometry::MultiPolygon(result),
        1 => Geometry::Polygon(result.0.pop().expect("len checked")),
        _ => Geometry::MultiPolygon(result),
    }
}

fn ring_is_usable(ring: &LineString<f64>) -> bool {
    ring.0.len() >= 4 && Polygon::new(ring.clone(), vec![]).unsigned_area() > 0.0
}

/// Proper (crossing) intersection between any two non-adjacent ring segments.
fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let segs: Vec<Line<f64>> = ring.lines().collect();
    for i in 0..segs.len() {
        for j in (i + 1)..segs.len() {
            if j == i + 1 || (i == 0 && j == segs.len() - 1) {
                continue;
            }
            if let Some(LineIntersection::SinglePoint { is_proper: true, .. }) =
                line_intersection(segs[i], segs[j])
            {
                return true;
            }
        }
    }
    false
}
