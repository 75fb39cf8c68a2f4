//! Slicing world geometry into per-tile clipped pieces.
//!
//! [`covered_tiles`] takes one geometry in normalized world coordinates and a
//! zoom level and produces a [`TiledGeometry`]: every tile the geometry
//! touches, each holding the piece clipped to that tile plus its buffer, in
//! tile pixel coordinates.
//!
//! # How polygons are sliced
//!
//! Each ring is classified per tile before any clipping happens:
//!
//! - **Boundary tiles** (a ring segment's envelope, grown by the buffer
//!   margin, touches the tile) walk the ring through a Sutherland-Hodgman
//!   clip against the buffered tile rectangle.
//! - **Non-boundary tiles** are wholly inside or outside the ring, decided
//!   by crossing parity on a vertical ray through the tile's center column.
//!   Inside tiles become *fill tiles* and emit the exact `[0,256]²` square
//!   with no clipping at all, so oceans and forests cost O(1) per tile.
//!
//! Holes subtract per tile: a hole that fully covers a tile cancels it, a
//! hole crossing a tile contributes an interior ring. Multipolygon members
//! combine fill coverage by even-odd parity.
//!
//! # Robustness
//!
//! Invalid input (self-touching rings, zero-area slivers) must never panic:
//! degenerate clip output is dropped and the parity classification decides
//! instead. Non-finite coordinates are rejected up front.

use std::collections::{BTreeMap, HashMap, HashSet};

use geo::{CoordsIter, Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};

use crate::tile::{quantize_px, TileCoord, MAX_ZOOM, TILE_SIZE};
use crate::{Error, Result};

/// Smallest ring area (in px²) kept after clipping; anything below is
/// quantization residue.
const MIN_RING_AREA_PX: f64 = 1e-3;

/// Clipped per-tile pieces of one geometry at one zoom level.
#[derive(Debug, Clone)]
pub struct TiledGeometry {
    zoom: u8,
    tiles: BTreeMap<TileCoord, Geometry<f64>>,
}

impl TiledGeometry {
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// Whether the geometry touches tile `(x, y)` at this zoom.
    pub fn test(&self, x: u32, y: u32) -> bool {
        self.tiles.contains_key(&TileCoord::new(x, y, self.zoom))
    }

    pub fn get(&self, tile: &TileCoord) -> Option<&Geometry<f64>> {
        self.tiles.get(tile)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tiles in ascending tile-key order.
    pub fn iter(&self) -> impl Iterator<Item = (TileCoord, &Geometry<f64>)> {
        self.tiles.iter().map(|(t, g)| (*t, g))
    }

    pub fn into_tiles(self) -> BTreeMap<TileCoord, Geometry<f64>> {
        self.tiles
    }
}

/// Slice a world-coordinate geometry into per-tile pixel geometry at `zoom`.
///
/// `buffer_pixels` extends each tile's clip window on every side; pieces in
/// the buffer carry negative or `> 256` pixel values. Coordinates are snapped
/// to the 1/16-px output grid.
///
/// Tiles east/west of the world wrap around the antimeridian; tiles north or
/// south of it are dropped.
pub fn covered_tiles(geometry: &Geometry<f64>, zoom: u8, buffer_pixels: f64) -> Result<TiledGeometry> {
    assert!(zoom <= MAX_ZOOM, "zoom {} exceeds MAX_ZOOM", zoom);
    check_finite(geometry)?;

    let margin = buffer_pixels.max(0.0) / TILE_SIZE;
    let mut sink = TileSink::new(zoom);

    let mut stack: Vec<&Geometry<f64>> = vec![geometry];
    while let Some(g) = stack.pop() {
        match g {
            Geometry::Point(p) => slice_point(p.0, margin, &mut sink),
            Geometry::MultiPoint(mp) => {
                for p in &mp.0 {
                    slice_point(p.0, margin, &mut sink);
                }
            }
            Geometry::Line(l) => {
                slice_line(&LineString::new(vec![l.start, l.end]), margin, &mut sink)
            }
            Geometry::LineString(ls) => slice_line(ls, margin, &mut sink),
            Geometry::MultiLineString(mls) => {
                for ls in &mls.0 {
                    slice_line(ls, margin, &mut sink);
                }
            }
            Geometry::Polygon(poly) => slice_polygons(std::slice::from_ref(poly), margin, &mut sink),
            Geometry::MultiPolygon(mp) => slice_polygons(&mp.0, margin, &mut sink),
            Geometry::Rect(r) => slice_polygons(&[r.to_polygon()], margin, &mut sink),
            Geometry::Triangle(t) => slice_polygons(&[t.to_polygon()], margin, &mut sink),
            Geometry::GeometryCollection(gc) => {
                for member in gc.0.iter().rev() {
                    stack.push(member);
                }
            }
        }
    }

    Ok(TiledGeometry { zoom, tiles: sink.finish() })
}

fn check_finite(geometry: &Geometry<f64>) -> Result<()> {
    for c in geometry.coords_iter() {
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err(Error::InvalidGeometry {
                reason: format!("non-finite coordinate ({}, {})", c.x, c.y),
            });
        }
    }
    Ok(())
}

/// Collects per-tile pieces, wrapping x across the antimeridian and
/// dropping tiles outside the y range.
struct TileSink {
    zoom: u8,
    n: i64,
    tiles: BTreeMap<TileCoord, Vec<Geometry<f64>>>,
}

impl TileSink {
    fn new(zoom: u8) -> Self {
        Self { zoom, n: 1i64 << zoom, tiles: BTreeMap::new() }
    }

    fn push(&mut self, tx: i64, ty: i64, geometry: Geometry<f64>) {
        if ty < 0 || ty >= self.n {
            return;
        }
        let x = tx.rem_euclid(self.n) as u32;
        let tile = TileCoord::new(x, ty as u32, self.zoom);
        self.tiles.entry(tile).or_default().push(geometry);
    }

    fn finish(self) -> BTreeMap<TileCoord, Geometry<f64>> {
        self.tiles.into_iter().map(|(tile, parts)| (tile, combine_parts(parts))).collect()
    }
}

/// Merge the pieces landing on one tile into a single geometry.
fn combine_parts(mut parts: Vec<Geometry<f64>>) -> Geometry<f64> {
    if parts.len() == 1 {
        return parts.pop().expect("len checked");
    }
    let mut points: Vec<Point<f64>> = Vec::new();
    let mut lines: Vec<LineString<f64>> = Vec::new();
    let mut polys: Vec<Polygon<f64>> = Vec::new();
    for part in parts {
        match part {
            Geometry::Point(p) => points.push(p),
            Geometry::MultiPoint(mp) => points.extend(mp.0),
            Geometry::LineString(ls) => lines.push(ls),
            Geometry::MultiLineString(mls) => lines.extend(mls.0),
            Geometry::Polygon(p) => polys.push(p),
            Geometry::MultiPolygon(mp) => polys.extend(mp.0),
            other => {
                // Only the six types above are ever pushed.
                debug_assert!(false, "unexpected tile part: {:?}", other);
            }
        }
    }
    let mut groups: Vec<Geometry<f64>> = Vec::new();
    if !points.is_empty() {
        groups.push(if points.len() == 1 {
            Geometry::Point(points.pop().expect("len checked"))
        } else {
            Geometry::MultiPoint(MultiPoint(points))
        });
    }
    if !lines.is_empty() {
        groups.push(if lines.len() == 1 {
            Geometry::LineString(lines.pop().expect("len checked"))
        } else {
            Geometry::MultiLineString(MultiLineString(lines))
        });
    }
    if !polys.is_empty() {
        groups.push(if polys.len() == 1 {
            Geometry::Polygon(polys.pop().expect("len checked"))
        } else {
            Geometry::MultiPolygon(MultiPolygon(polys))
        });
    }
    if groups.len() == 1 {
        groups.pop().expect("len checked")
    } else {
        Geometry::GeometryCollection(geo::GeometryCollection(groups))
    }
}

/// Candidate tile index range covering `[lo, hi]` in tile units, capped at
/// one full world so wide geometry never visits a column twice.
fn tile_range(lo: f64, hi: f64, n: i64) -> (i64, i64) {
    let a = lo.floor() as i64;
    let b = hi.floor() as i64;
    if b.saturating_sub(a) >= n {
        (0, n - 1)
    } else {
        (a, b)
    }
}

// ========== Points ==========

fn slice_point(p: Coord<f64>, margin: f64, sink: &mut TileSink) {
    let n = sink.n as f64;
    let u = Coord { x: p.x * n, y: p.y * n };
    let buffer_px = margin * TILE_SIZE;
    let (min_tx, max_tx) = tile_range(u.x - margin, u.x + margin, sink.n);
    let (min_ty, max_ty) = tile_range(u.y - margin, u.y + margin, sink.n);
    for ty in min_ty..=max_ty {
        for tx in min_tx..=max_tx {
            let px = (u.x - tx as f64) * TILE_SIZE;
            let py = (u.y - ty as f64) * TILE_SIZE;
            if px >= -buffer_px
                && px <= TILE_SIZE + buffer_px
                && py >= -buffer_px
                && py <= TILE_SIZE + buffer_px
            {
                sink.push(tx, ty, Geometry::Point(Point::new(quantize_px(px), quantize_px(py))));
            }
        }
    }
}

// ========== Lines ==========

/// Clip segment `a → b` to an axis-aligned rectangle (Liang-Barsky).
fn clip_segment(
    a: Coord<f64>,
    b: Coord<f64>,
    rect: (f64, f64, f64, f64),
) -> Option<(Coord<f64>, Coord<f64>)> {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    let checks = [
        (-dx, a.x - rect.0),
        (dx, rect.2 - a.x),
        (-dy, a.y - rect.1),
        (dy, rect.3 - a.y),
    ];
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                if r > t0 {
                    t0 = r;
                }
            } else {
                if r < t0 {
                    return None;
                }
                if r < t1 {
                    t1 = r;
                }
            }
        }
    }
    Some((
        Coord { x: a.x + t0 * dx, y: a.y + t0 * dy },
        Coord { x: a.x + t1 * dx, y: a.y + t1 * dy },
    ))
}

fn slice_line(ls: &LineString<f64>, margin: f64, sink: &mut TileSink) {
    if ls.0.len() < 2 {
        return;
    }
    let n = sink.n as f64;
    let units: Vec<Coord<f64>> = ls.0.iter().map(|c| Coord { x: c.x * n, y: c.y * n }).collect();

    // Per-tile chains of consecutive clipped segments, in tile px.
    let mut chains: HashMap<(i64, i64), Vec<Vec<Coord<f64>>>> = HashMap::new();

    for seg in units.windows(2) {
        let (a, b) = (seg[0], seg[1]);
        let (min_tx, max_tx) = tile_range(a.x.min(b.x) - margin, a.x.max(b.x) + margin, sink.n);
        let (min_ty, max_ty) = tile_range(a.y.min(b.y) - margin, a.y.max(b.y) + margin, sink.n);
        let min_ty = min_ty.max(0);
        let max_ty = max_ty.min(sink.n - 1);
        for ty in min_ty..=max_ty {
            for tx in min_tx..=max_tx {
                let rect = (
                    tx as f64 - margin,
                    ty as f64 - margin,
                    tx as f64 + 1.0 + margin,
                    ty as f64 + 1.0 + margin,
                );
                let Some((p, q)) = clip_segment(a, b, rect) else {
                    continue;
                };
                let to_px = |c: Coord<f64>| Coord {
                    x: quantize_px((c.x - tx as f64) * TILE_SIZE),
                    y: quantize_px((c.y - ty as f64) * TILE_SIZE),
                };
                let (p, q) = (to_px(p), to_px(q));
                let tile_chains = chains.entry((tx, ty)).or_default();
                match tile_chains.last_mut() {
                    // The previous segment ended exactly where this one
                    // starts: same chain.
                    Some(chain) if chain.last() == Some(&p) => {
                        if q != p {
                            chain.push(q);
                        }
                    }
                    _ => {
                        if p != q {
                            tile_chains.push(vec![p, q]);
                        }
                    }
                }
            }
        }
    }

    for ((tx, ty), tile_chains) in chains {
        for chain in tile_chains {
            if chain.len() >= 2 {
                sink.push(tx, ty, Geometry::LineString(LineString::new(chain)));
            }
        }
    }
}

// ========== Polygons ==========

/// Per-ring classification index: which tiles the ring's boundary touches,
/// and where the ring crosses each tile column's center line.
struct RingInfo {
    boundary: HashSet<(i64, i64)>,
    /// Column index → sorted ys where the ring crosses `x = col + 0.5`.
    crossings: HashMap<i64, Vec<f64>>,
    env: (f64, f64, f64, f64),
}

impl RingInfo {
    /// `ring` is closed and in tile units.
    fn build(ring: &[Coord<f64>], margin: f64, n: i64) -> Self {
        let mut boundary = HashSet::new();
        let mut crossings: HashMap<i64, Vec<f64>> = HashMap::new();
        let mut env = (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for seg in ring.windows(2) {
            let (a, b) = (seg[0], seg[1]);
            env.0 = env.0.min(a.x.min(b.x));
            env.1 = env.1.min(a.y.min(b.y));
            env.2 = env.2.max(a.x.max(b.x));
            env.3 = env.3.max(a.y.max(b.y));

            let (min_tx, max_tx) = tile_range(a.x.min(b.x) - margin, a.x.max(b.x) + margin, n);
            let (min_ty, max_ty) = tile_range(a.y.min(b.y) - margin, a.y.max(b.y) + margin, n);
            for ty in min_ty..=max_ty {
                for tx in min_tx..=max_tx {
                    boundary.insert((tx, ty));
                }
            }

            // Even-odd crossing record: half-open in x so a vertex shared by
            // two segments counts once.
            if a.x != b.x {
                let (lo, hi) = (a.x.min(b.x), a.x.max(b.x));
                let first = (lo - 0.5).floor() as i64;
                let last = (hi - 0.5).ceil() as i64;
                for col in first..=last {
                    let cx = col as f64 + 0.5;
                    if lo <= cx && cx < hi {
                        let t = (cx - a.x) / (b.x - a.x);
                        crossings.entry(col).or_default().push(a.y + t * (b.y - a.y));
                    }
                }
            }
        }
        for ys in crossings.values_mut() {
            ys.sort_by(|a, b| a.partial_cmp(b).expect("finite ys"));
        }
        Self { boundary, crossings, env }
    }

    fn is_boundary(&self, tx: i64, ty: i64) -> bool {
        self.boundary.contains(&(tx, ty))
    }

    /// Even-odd test for the tile's center point.
    fn center_inside(&self, tx: i64, ty: i64) -> bool {
        let cy = ty as f64 + 0.5;
        match self.crossings.get(&tx) {
            Some(ys) => ys.iter().take_while(|y| **y < cy).count() % 2 == 1,
            None => false,
        }
    }
}

/// Clip a closed ring against a rectangle, one rectangle edge at a time.
fn clip_ring_to_rect(ring: &[Coord<f64>], rect: (f64, f64, f64, f64)) -> Vec<Coord<f64>> {
    let mut output = ring.to_vec();
    // Drop the closing duplicate; the edge walk treats the input cyclically.
    if output.len() > 1 && output.first() == output.last() {
        output.pop();
    }

    output = clip_against_edge(
        &output,
        |c| c.x >= rect.0,
        |c1, c2| {
            let t = (rect.0 - c1.x) / (c2.x - c1.x);
            Coord { x: rect.0, y: c1.y + t * (c2.y - c1.y) }
        },
    );
    output = clip_against_edge(
        &output,
        |c| c.x <= rect.2,
        |c1, c2| {
            let t = (rect.2 - c1.x) / (c2.x - c1.x);
            Coord { x: rect.2, y: c1.y + t * (c2.y - c1.y) }
        },
    );
    output = clip_against_edge(
        &output,
        |c| c.y >= rect.1,
        |c1, c2| {
            let t = (rect.1 - c1.y) / (c2.y - c1.y);
            Coord { x: c1.x + t * (c2.x - c1.x), y: rect.1 }
        },
    );
    output = clip_against_edge(
        &output,
        |c| c.y <= rect.3,
        |c1, c2| {
            let t = (rect.3 - c1.y) / (c2.y - c1.y);
            Coord { x: c1.x + t * (c2.x - c1.x), y: rect.3 }
        },
    );
    output
}

/// One Sutherland-Hodgman pass against a single clip edge.
fn clip_against_edge<F, I>(vertices: &[Coord<f64>], inside: F, intersect: I) -> Vec<Coord<f64>>
where
    F: Fn(&Coord<f64>) -> bool,
    I: Fn(&Coord<f64>, &Coord<f64>) -> Coord<f64>,
{
    if vertices.is_empty() {
        return Vec::new();
    }
    let mut output = Vec::with_capacity(vertices.len() + 4);
    for i in 0..vertices.len() {
        let current = &vertices[i];
        let next = &vertices[(i + 1) % vertices.len()];
        let current_inside = inside(current);
        let next_inside = inside(next);
        if current_inside {
            output.push(*current);
            if !next_inside {
                output.push(intersect(current, next));
            }
        } else if next_inside {
            output.push(intersect(current, next));
        }
    }
    output
}

/// Shoelace signed area of an open ring (no closing duplicate required).
fn ring_signed_area(ring: &[Coord<f64>]) -> f64 {
    let mut sum = 0.0;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[(i + 1) % ring.len()];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// Convert a clipped ring from tile units to closed, quantized tile px.
///
/// Returns `None` when nothing of substance is left: fewer than three
/// distinct points, or area below the quantization floor. Orientation is
/// normalized from `exterior`.
fn ring_to_px(ring: &[Coord<f64>], tx: i64, ty: i64, exterior: bool) -> Option<LineString<f64>> {
    if ring.len() < 3 {
        return None;
    }
    let mut px: Vec<Coord<f64>> = Vec::with_capacity(ring.len() + 1);
    for c in ring {
        let p = Coord {
            x: quantize_px((c.x - tx as f64) * TILE_SIZE),
            y: quantize_px((c.y - ty as f64) * TILE_SIZE),
        };
        if px.last() != Some(&p) {
            px.push(p);
        }
    }
    while px.len() > 1 && px.first() == px.last() {
        px.pop();
    }
    if px.len() < 3 {
        return None;
    }
    let area = ring_signed_area(&px);
    if area.abs() < MIN_RING_AREA_PX {
        return None;
    }
    if (area > 0.0) != exterior {
        px.reverse();
    }
    let first = px[0];
    px.push(first);
    Some(LineString::new(px))
}

fn full_square() -> LineString<f64> {
    LineString::new(vec![
        Coord { x: 0.0, y: 0.0 },
        Coord { x: TILE_SIZE, y: 0.0 },
        Coord { x: TILE_SIZE, y: TILE_SIZE },
        Coord { x: 0.0, y: TILE_SIZE },
        Coord { x: 0.0, y: 0.0 },
    ])
}

fn buffered_square(margin: f64) -> LineString<f64> {
    let b = margin * TILE_SIZE;
    LineString::new(vec![
        Coord { x: -b, y: -b },
        Coord { x: TILE_SIZE + b, y: -b },
        Coord { x: TILE_SIZE + b, y: TILE_SIZE + b },
        Coord { x: -b, y: TILE_SIZE + b },
        Coord { x: -b, y: -b },
    ])
}

/// How a member polygon's outer ring covers one tile.
enum Outer {
    /// Fully covers the tile; no clipped geometry needed.
    Fill,
    /// Crosses the tile; the clipped exterior ring in px.
    Ring(LineString<f64>),
}

/// Accumulated coverage of one tile across multipolygon members.
#[derive(Default)]
struct Cover {
    /// Members that fully cover the tile; combined by even-odd parity.
    fills: u32,
    parts: Vec<Polygon<f64>>,
}

fn slice_polygons(polys: &[Polygon<f64>], margin: f64, sink: &mut TileSink) {
    let mut covers: BTreeMap<(i64, i64), Cover> = BTreeMap::new();
    for poly in polys {
        slice_one_polygon(poly, margin, sink.n, &mut covers);
    }
    for ((tx, ty), cover) in covers {
        let mut rings: Vec<Polygon<f64>> = Vec::new();
        if cover.fills % 2 == 1 {
            rings.push(Polygon::new(full_square(), vec![]));
        }
        rings.extend(cover.parts);
        match rings.len() {
            0 => {}
            1 => sink.push(tx, ty, Geometry::Polygon(rings.pop().expect("len checked"))),
            _ => sink.push(tx, ty, Geometry::MultiPolygon(MultiPolygon(rings))),
        }
    }
}

fn scale_ring(ring: &LineString<f64>, n: f64) -> Vec<Coord<f64>> {
    let mut out: Vec<Coord<f64>> = ring.0.iter().map(|c| Coord { x: c.x * n, y: c.y * n }).collect();
    if out.len() > 1 && out.first() != out.last() {
        out.push(out[0]);
    }
    out
}

fn slice_one_polygon(
    poly: &Polygon<f64>,
    margin: f64,
    n: i64,
    covers: &mut BTreeMap<(i64, i64), Cover>,
) {
    let scale = n as f64;
    let exterior = scale_ring(poly.exterior(), scale);
    if exterior.len() < 4 {
        return;
    }
    let holes: Vec<Vec<Coord<f64>>> = poly
        .interiors()
        .iter()
        .map(|r| scale_ring(r, scale))
        .filter(|r| r.len() >= 4)
        .collect();

    let outer_info = RingInfo::build(&exterior, margin, n);
    let hole_infos: Vec<RingInfo> = holes.iter().map(|h| RingInfo::build(h, margin, n)).collect();

    let (min_tx, max_tx) = tile_range(outer_info.env.0 - margin, outer_info.env.2 + margin, n);
    let (min_ty, max_ty) = tile_range(outer_info.env.1 - margin, outer_info.env.3 + margin, n);
    let min_ty = min_ty.max(0);
    let max_ty = max_ty.min(n - 1);

    for ty in min_ty..=max_ty {
        for tx in min_tx..=max_tx {
            let rect = (
                tx as f64 - margin,
                ty as f64 - margin,
                tx as f64 + 1.0 + margin,
                ty as f64 + 1.0 + margin,
            );

            let outer = if outer_info.is_boundary(tx, ty) {
                let clipped = clip_ring_to_rect(&exterior, rect);
                match ring_to_px(&clipped, tx, ty, true) {
                    Some(ring) => Some(Outer::Ring(ring)),
                    // Degenerate clip residue; parity decides.
                    None => outer_info.center_inside(tx, ty).then_some(Outer::Fill),
                }
            } else if outer_info.center_inside(tx, ty) {
                Some(Outer::Fill)
            } else {
                None
            };
            let Some(outer) = outer else { continue };

            let mut interior_rings: Vec<LineString<f64>> = Vec::new();
            let mut cancelled = false;
            for (hole, info) in holes.iter().zip(&hole_infos) {
                if info.is_boundary(tx, ty) {
                    let clipped = clip_ring_to_rect(hole, rect);
                    match ring_to_px(&clipped, tx, ty, false) {
                        Some(ring) => interior_rings.push(ring),
                        None => {
                            if info.center_inside(tx, ty) {
                                cancelled = true;
                                break;
                            }
                        }
                    }
                } else if info.center_inside(tx, ty) {
                    // The hole swallows this tile whole.
                    cancelled = true;
                    break;
                }
            }
            if cancelled {
                continue;
            }

            let entry = covers.entry((tx, ty)).or_default();
            match outer {
                Outer::Fill if interior_rings.is_empty() => entry.fills += 1,
                Outer::Fill => {
                    entry.parts.push(Polygon::new(buffered_square(margin), interior_rings))
                }
                Outer::Ring(ring) => entry.parts.push(Polygon::new(ring, interior_rings)),
            }
        }
    }
}
