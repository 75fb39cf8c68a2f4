//! Zoom-aware geometry processing for vector tile pipelines.
//!
//! This crate covers the computational middle of a tiling pipeline: it takes
//! features in normalized Web Mercator world coordinates and turns them into
//! per-tile pixel geometry, leaving parsing on one side and encoding on the
//! other to the caller.
//!
//! The pieces, in pipeline order:
//!
//! - [`tile`]: tile addressing, projection math, and the output pixel grid.
//! - [`feature`]: [`RenderableFeature`] inputs with per-zoom rendering rules
//!   and [`TileFeature`] outputs.
//! - [`simplify`]: Douglas-Peucker and Visvalingam-Whyatt line
//!   simplification.
//! - [`clip`]: [`covered_tiles`] slices one geometry into every tile it
//!   touches, with O(1) fill tiles for large polygon interiors.
//! - [`render`]: [`FeatureRenderer`] runs the per-zoom pipeline and emits
//!   tile features through a callback.
//! - [`merge`]: per-tile post-processing that chains line pieces and unions
//!   nearby polygons.
//!
//! # Example
//!
//! ```
//! use geo::{Geometry, Point};
//! use tilepress_core::{FeatureRenderer, RenderConfig, RenderableFeature};
//!
//! let (x, y) = tilepress_core::lng_lat_to_world(13.4, 52.5);
//! let feature = RenderableFeature::point("poi", &Geometry::Point(Point::new(x, y)))
//!     .expect("point geometry")
//!     .with_zoom_range(10, 14);
//!
//! let mut features = Vec::new();
//! let mut renderer = FeatureRenderer::new(RenderConfig::default(), |f| features.push(f));
//! renderer.render(&feature);
//! drop(renderer);
//! assert_eq!(features.len(), 5);
//! ```

pub mod clip;
pub mod feature;
pub mod merge;
pub mod render;
pub mod simplify;
pub mod tile;
pub mod zoom_function;

pub use clip::{covered_tiles, TiledGeometry};
pub use feature::{
    AttrMap, GeometryTransform, GroupInfo, RenderableFeature, TileFeature, DEFAULT_BUFFER_PIXELS,
    DEFAULT_MIN_PIXEL_SIZE, DEFAULT_PIXEL_TOLERANCE,
};
pub use merge::{merge_line_strings, merge_line_strings_with, merge_polygons};
pub use render::{FeatureRenderer, RenderConfig};
pub use simplify::{simplify_geometry, SimplifyMethod};
pub use tile::{lng_lat_to_world, world_to_lng_lat, TileCoord, MAX_LATITUDE, MAX_ZOOM, TILE_SIZE};
pub use zoom_function::ZoomValue;

/// Errors surfaced by geometry processing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input geometry cannot be processed (non-finite coordinates and
    /// similar structural problems).
    #[error("invalid geometry: {reason}")]
    InvalidGeometry { reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
