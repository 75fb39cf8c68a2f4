//! Tile addressing and world-coordinate math.
//!
//! World coordinates are normalized Web Mercator: the unit square `[0,1)²`
//! covers the projectable world, x growing east and y growing south. At zoom
//! `z` the world is a `2^z × 2^z` grid of 256-pixel tiles, so one world unit
//! equals `256·2^z` pixels.
//!
//! Output geometry is quantized to a sub-pixel grid of 4096 units per tile
//! (16 units per pixel), which keeps exact-equality comparisons meaningful
//! for downstream merging.

use std::cmp::Ordering;
use std::f64::consts::PI;

/// Tile edge length in pixels.
pub const TILE_SIZE: f64 = 256.0;

/// Sub-pixel precision units per tile.
pub const TILE_PRECISION: f64 = 4096.0;

/// One sub-pixel unit in pixels: the quantum of the output coordinate grid.
pub const PIXEL_QUANTUM: f64 = TILE_SIZE / TILE_PRECISION;

/// Highest zoom level the 32-bit tile encoding supports.
pub const MAX_ZOOM: u8 = 15;

/// Web Mercator latitude cutoff.
pub const MAX_LATITUDE: f64 = 85.05112877980659;

/// Convert longitude/latitude (degrees) to normalized world coordinates.
///
/// Latitude is clamped to the Web Mercator range, so poles map onto the
/// top/bottom edge of the world square rather than to infinity.
pub fn lng_lat_to_world(lng: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = (lng + 180.0) / 360.0;
    let sin = lat.to_radians().sin();
    let y = 0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * PI);
    (x, y)
}

/// Convert normalized world coordinates back to longitude/latitude (degrees).
pub fn world_to_lng_lat(x: f64, y: f64) -> (f64, f64) {
    let lng = x * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y)).sinh().atan().to_degrees();
    (lng, lat)
}

/// Snap a pixel coordinate to the 1/16-px output grid.
#[inline]
pub fn quantize_px(v: f64) -> f64 {
    let units_per_px = TILE_PRECISION / TILE_SIZE;
    (v * units_per_px).round() / units_per_px
}

/// Tile coordinates: x, y, and zoom level.
///
/// Ordering follows [`TileCoord::encoded`], i.e. zoom-major, then row-major
/// within a zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl TileCoord {
    /// Create a new tile coordinate. `x` and `y` must be below `2^z`.
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        debug_assert!(z <= MAX_ZOOM, "zoom {} exceeds MAX_ZOOM", z);
        debug_assert!(
            x < (1u32 << z) && y < (1u32 << z),
            "tile ({}, {}) out of range for z{}",
            x,
            y,
            z
        );
        Self { x, y, z }
    }

    /// Pack (z, y, x) into a single 32-bit key.
    ///
    /// All tiles of lower zooms sort first (pyramid offset `(4^z - 1) / 3`),
    /// then tiles within a zoom in row-major order. Fits in 32 bits up to
    /// [`MAX_ZOOM`].
    pub fn encoded(&self) -> u32 {
        let below = ((1u64 << (2 * self.z)) - 1) / 3;
        (below + (self.y as u64) * (1u64 << self.z) + self.x as u64) as u32
    }

    /// Invert [`TileCoord::encoded`].
    pub fn from_encoded(encoded: u32) -> Self {
        let mut z = 0u8;
        loop {
            let below = ((1u64 << (2 * z)) - 1) / 3;
            let count = 1u64 << (2 * z);
            if (encoded as u64) < below + count {
                let rem = encoded as u64 - below;
                let n = 1u64 << z;
                return Self::new((rem % n) as u32, (rem / n) as u32, z);
            }
            z += 1;
        }
    }

    /// World-coordinate extent of this tile: (min x, min y, max x, max y).
    pub fn bounds_world(&self) -> (f64, f64, f64, f64) {
        let n = (1u64 << self.z) as f64;
        (
            self.x as f64 / n,
            self.y as f64 / n,
            (self.x as f64 + 1.0) / n,
            (self.y as f64 + 1.0) / n,
        )
    }
}

impl Ord for TileCoord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.encoded().cmp(&other.encoded())
    }
}

impl PartialOrd for TileCoord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
