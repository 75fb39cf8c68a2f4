//! Feature model: renderer input and per-tile output.
//!
//! A [`RenderableFeature`] is a source geometry in world coordinates plus the
//! rules that control how it renders at each zoom: zoom range, buffer,
//! simplification tolerance, minimum size, label grid, attributes. Rules are
//! set with builder-style `with_*` methods and most accept either a constant
//! or a [`ZoomValue`] step function.
//!
//! A [`TileFeature`] is one rendered output: a geometry in tile pixel
//! coordinates assigned to a single tile, with its attributes resolved for
//! the tile's zoom.

use std::sync::Arc;

use geo::{Coord, CoordsIter, Geometry};
use serde_json::Value;

use crate::simplify::SimplifyMethod;
use crate::tile::TileCoord;
use crate::zoom_function::ZoomValue;

/// Insertion-ordered attribute map.
pub type AttrMap = serde_json::Map<String, Value>;

/// Geometry rewrite hook applied after simplification and before clipping.
pub type GeometryTransform = Arc<dyn Fn(Geometry<f64>) -> Geometry<f64> + Send + Sync>;

/// Default tile buffer in pixels.
pub const DEFAULT_BUFFER_PIXELS: f64 = 4.0;

/// Default simplification tolerance in pixels.
pub const DEFAULT_PIXEL_TOLERANCE: f64 = 0.1;

/// Default minimum feature size in pixels (below the maximum zoom).
pub const DEFAULT_MIN_PIXEL_SIZE: f64 = 1.0;

/// An attribute with an optional zoom gate.
#[derive(Debug, Clone)]
struct Attr {
    value: ZoomValue<Value>,
    min_zoom: u8,
}

/// Broad shape class of a geometry, by coordinate dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShapeKind {
    Point,
    Line,
    Polygon,
}

fn shape_of(geometry: &Geometry<f64>) -> Option<ShapeKind> {
    match geometry {
        Geometry::Point(_) | Geometry::MultiPoint(_) => Some(ShapeKind::Point),
        Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => Some(ShapeKind::Line),
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
            Some(ShapeKind::Polygon)
        }
        // A collection is classified by its highest-dimension member, the
        // usual convention for mixed GIS sources.
        Geometry::GeometryCollection(gc) => gc.0.iter().filter_map(shape_of).max_by_key(|k| match k {
            ShapeKind::Point => 0,
            ShapeKind::Line => 1,
            ShapeKind::Polygon => 2,
        }),
    }
}

/// True when every coordinate of the geometry is the same point.
fn is_degenerate(geometry: &Geometry<f64>) -> Option<Coord<f64>> {
    let mut coords = geometry.coords_iter();
    let first = coords.next()?;
    coords.all(|c| c == first).then_some(first)
}

/// A source feature plus its per-zoom rendering rules.
#[derive(Clone)]
pub struct RenderableFeature {
    geometry: Geometry<f64>,
    layer: String,
    source_id: u64,
    z_order: i32,
    min_zoom: u8,
    max_zoom: u8,
    buffer_pixels: ZoomValue<f64>,
    pixel_tolerance: ZoomValue<f64>,
    min_pixel_size: Option<ZoomValue<f64>>,
    label_grid_size: ZoomValue<f64>,
    label_grid_limit: ZoomValue<u32>,
    simplify_method: SimplifyMethod,
    transforms: Vec<GeometryTransform>,
    attrs: Vec<(String, Attr)>,
}

impl std::fmt::Debug for RenderableFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderableFeature")
            .field("layer", &self.layer)
            .field("source_id", &self.source_id)
            .field("min_zoom", &self.min_zoom)
            .field("max_zoom", &self.max_zoom)
            .field("transforms", &self.transforms.len())
            .finish_non_exhaustive()
    }
}

impl RenderableFeature {
    fn with_geometry(layer: impl Into<String>, geometry: Geometry<f64>) -> Self {
        Self {
            geometry,
            layer: layer.into(),
            source_id: 0,
            z_order: 0,
            min_zoom: 0,
            max_zoom: 14,
            buffer_pixels: DEFAULT_BUFFER_PIXELS.into(),
            pixel_tolerance: DEFAULT_PIXEL_TOLERANCE.into(),
            min_pixel_size: None,
            label_grid_size: 0.0.into(),
            label_grid_limit: 0u32.into(),
            simplify_method: SimplifyMethod::default(),
            transforms: Vec::new(),
            attrs: Vec::new(),
        }
    }

    /// A point feature, if the source geometry is point-like.
    ///
    /// A degenerate line or polygon whose coordinates are all identical
    /// coerces to a point at that location.
    pub fn point(layer: impl Into<String>, geometry: &Geometry<f64>) -> Option<Self> {
        match shape_of(geometry)? {
            ShapeKind::Point => Some(Self::with_geometry(layer, geometry.clone())),
            _ => {
                let c = is_degenerate(geometry)?;
                Some(Self::with_geometry(layer, Geometry::Point(c.into())))
            }
        }
    }

    /// A line feature, if the source geometry is line-like.
    pub fn line(layer: impl Into<String>, geometry: &Geometry<f64>) -> Option<Self> {
        (shape_of(geometry)? == ShapeKind::Line).then(|| Self::with_geometry(layer, geometry.clone()))
    }

    /// A polygon feature, if the source geometry is polygon-like.
    pub fn polygon(layer: impl Into<String>, geometry: &Geometry<f64>) -> Option<Self> {
        (shape_of(geometry)? == ShapeKind::Polygon).then(|| Self::with_geometry(layer, geometry.clone()))
    }

    /// A feature keeping the source geometry's native shape class.
    pub fn from_geometry(layer: impl Into<String>, geometry: &Geometry<f64>) -> Option<Self> {
        shape_of(geometry).map(|_| Self::with_geometry(layer, geometry.clone()))
    }

    /// Restrict the zoom levels this feature renders at (inclusive).
    pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    /// Stable source identifier carried through to every output feature.
    pub fn with_source_id(mut self, id: u64) -> Self {
        self.source_id = id;
        self
    }

    /// Relative drawing order within a layer; higher sorts later.
    pub fn with_z_order(mut self, z_order: i32) -> Self {
        self.z_order = z_order;
        self
    }

    /// Tile buffer in pixels; detail beyond it is clipped away.
    pub fn with_buffer_pixels(mut self, buffer: impl Into<ZoomValue<f64>>) -> Self {
        self.buffer_pixels = buffer.into();
        self
    }

    /// Simplification tolerance in pixels.
    pub fn with_pixel_tolerance(mut self, tolerance: impl Into<ZoomValue<f64>>) -> Self {
        self.pixel_tolerance = tolerance.into();
        self
    }

    /// Minimum rendered size in pixels: length for lines, bounding-box side
    /// product for polygons. Smaller features are skipped at that zoom.
    pub fn with_min_pixel_size(mut self, size: impl Into<ZoomValue<f64>>) -> Self {
        self.min_pixel_size = Some(size.into());
        self
    }

    /// Spread point labels on a pixel grid: at most `limit` points per
    /// `size`-pixel cell. A size of 0 disables the grid.
    pub fn with_label_grid(mut self, size: impl Into<ZoomValue<f64>>, limit: impl Into<ZoomValue<u32>>) -> Self {
        self.label_grid_size = size.into();
        self.label_grid_limit = limit.into();
        self
    }

    /// Choose the simplification algorithm.
    pub fn with_simplify_method(mut self, method: SimplifyMethod) -> Self {
        self.simplify_method = method;
        self
    }

    /// Append a geometry transform, run after simplification and before
    /// clipping. Transforms run in registration order.
    pub fn with_transform(mut self, transform: GeometryTransform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Set an attribute, constant or stepped by zoom.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<ZoomValue<Value>>) -> Self {
        self.attrs.push((key.into(), Attr { value: value.into(), min_zoom: 0 }));
        self
    }

    /// Set an attribute that only appears at or above `min_zoom`.
    pub fn with_attr_min_zoom(
        mut self,
        key: impl Into<String>,
        value: impl Into<ZoomValue<Value>>,
        min_zoom: u8,
    ) -> Self {
        self.attrs.push((key.into(), Attr { value: value.into(), min_zoom }));
        self
    }

    pub fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    pub fn source_id(&self) -> u64 {
        self.source_id
    }

    pub fn z_order(&self) -> i32 {
        self.z_order
    }

    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    pub(crate) fn buffer_pixels_at(&self, zoom: u8) -> f64 {
        self.buffer_pixels.eval_or(zoom, DEFAULT_BUFFER_PIXELS)
    }

    pub(crate) fn pixel_tolerance_at(&self, zoom: u8) -> f64 {
        self.pixel_tolerance.eval_or(zoom, DEFAULT_PIXEL_TOLERANCE)
    }

    pub(crate) fn min_pixel_size_at(&self, zoom: u8, default: f64) -> f64 {
        match &self.min_pixel_size {
            Some(v) => v.eval_or(zoom, default),
            None => default,
        }
    }

    pub(crate) fn label_grid_at(&self, zoom: u8) -> (f64, u32) {
        (self.label_grid_size.eval_or(zoom, 0.0), self.label_grid_limit.eval_or(zoom, 0))
    }

    pub(crate) fn simplify_method(&self) -> SimplifyMethod {
        self.simplify_method
    }

    pub(crate) fn transforms(&self) -> &[GeometryTransform] {
        &self.transforms
    }

    /// Resolve attributes for one zoom level, in insertion order.
    ///
    /// Attributes gated below `zoom` and entries that evaluate to nothing
    /// (or to JSON null) are omitted.
    pub fn attrs_at_zoom(&self, zoom: u8) -> AttrMap {
        let mut out = AttrMap::new();
        for (key, attr) in &self.attrs {
            if zoom < attr.min_zoom {
                continue;
            }
            match attr.value.eval(zoom) {
                Some(Value::Null) | None => {}
                Some(v) => {
                    out.insert(key.clone(), v.clone());
                }
            }
        }
        out
    }
}

/// Label-grid group assignment on an output feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupInfo {
    /// Grid cell key, unique per (tile, cell).
    pub group: u64,
    /// Maximum features downstream should keep in this cell.
    pub limit: u32,
}

/// One rendered feature assigned to a single tile.
///
/// The geometry is in tile pixel coordinates: `[0, 256]` spans the tile,
/// negative and `> 256` values lie in the buffer.
#[derive(Debug, Clone)]
pub struct TileFeature {
    pub tile: TileCoord,
    pub layer: String,
    pub geometry: Geometry<f64>,
    pub attrs: AttrMap,
    pub group: Option<GroupInfo>,
    pub z_order: i32,
    pub source_id: u64,
}
