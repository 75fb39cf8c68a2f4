//! Line simplification with selectable algorithms.
//!
//! Two classic algorithms are offered:
//!
//! - **Ramer-Douglas-Peucker** keeps points that deviate from the chord by
//!   more than the tolerance. Good at preserving sharp corners; the default.
//! - **Visvalingam-Whyatt** removes points by smallest effective triangle
//!   area. Produces smoother results on natural lines (coastlines, rivers).
//!
//! Both take a distance tolerance in the caller's coordinate units. For
//! Visvalingam-Whyatt the distance is converted to an area threshold by
//! squaring, so the two methods drop comparable amounts of detail at the same
//! tolerance.

use geo::{Geometry, LineString, MultiLineString, MultiPolygon, Polygon, Simplify, SimplifyVw};

/// Which simplification algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimplifyMethod {
    /// Ramer-Douglas-Peucker: perpendicular-distance based.
    #[default]
    DouglasPeucker,
    /// Visvalingam-Whyatt: effective-triangle-area based.
    VisvalingamWhyatt,
}

/// Simplify a geometry with the given method and distance tolerance.
///
/// A tolerance of zero or below returns the input unchanged. Points and
/// multipoints always pass through. Line strings with fewer than three points
/// and degenerate rings are left alone rather than collapsed further.
pub fn simplify_geometry(geometry: &Geometry<f64>, method: SimplifyMethod, tolerance: f64) -> Geometry<f64> {
    if tolerance <= 0.0 {
        return geometry.clone();
    }
    match geometry {
        Geometry::LineString(ls) => Geometry::LineString(simplify_line(ls, method, tolerance)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(MultiLineString(
            mls.0.iter().map(|ls| simplify_line(ls, method, tolerance)).collect(),
        )),
        Geometry::Polygon(poly) => Geometry::Polygon(simplify_polygon(poly, method, tolerance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(MultiPolygon(
            mp.0.iter().map(|p| simplify_polygon(p, method, tolerance)).collect(),
        )),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(geo::GeometryCollection(
            gc.0.iter().map(|g| simplify_geometry(g, method, tolerance)).collect(),
        )),
        other => other.clone(),
    }
}

fn simplify_line(ls: &LineString<f64>, method: SimplifyMethod, tolerance: f64) -> LineString<f64> {
    if ls.0.len() < 3 {
        return ls.clone();
    }
    match method {
        SimplifyMethod::DouglasPeucker => ls.simplify(&tolerance),
        // VW thresholds are areas; square the distance tolerance so the two
        // methods are interchangeable at the call site.
        SimplifyMethod::VisvalingamWhyatt => ls.simplify_vw(&(tolerance * tolerance)),
    }
}

fn simplify_polygon(poly: &Polygon<f64>, method: SimplifyMethod, tolerance: f64) -> Polygon<f64> {
    let simplify_ring = |ring: &LineString<f64>| -> LineString<f64> {
        // A closed ring needs 4 points minimum; below that there is nothing
        // left to remove.
        if ring.0.len() < 5 {
            return ring.clone();
        }
        simplify_line(ring, method, tolerance)
    };
    Polygon::new(
        simplify_ring(poly.exterior()),
        poly.interiors().iter().map(simplify_ring).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, point};

    fn zigzag() -> LineString<f64> {
        // Small perturbations around a straight line from (0,0) to (10,0).
        LineString(vec![
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 2.0, y: 0.05 },
            coord! { x: 4.0, y: -0.04 },
            coord! { x: 6.0, y: 0.03 },
            coord! { x: 8.0, y: -0.05 },
            coord! { x: 10.0, y: 0.0 },
        ])
    }

    #[test]
    fn test_douglas_peucker_removes_small_deviations() {
        let simplified = simplify_geometry(&Geometry::LineString(zigzag()), SimplifyMethod::DouglasPeucker, 0.1);
        if let Geometry::LineString(ls) = simplified {
            assert_eq!(ls.0.len(), 2, "all sub-tolerance wiggles should vanish");
            assert_eq!(ls.0[0], coord! { x: 0.0, y: 0.0 });
            assert_eq!(ls.0[1], coord! { x: 10.0, y: 0.0 });
        } else {
            panic!("geometry type changed during simplification");
        }
    }

    #[test]
    fn test_visvalingam_removes_small_triangles() {
        let simplified =
            simplify_geometry(&Geometry::LineString(zigzag()), SimplifyMethod::VisvalingamWhyatt, 0.5);
        if let Geometry::LineString(ls) = simplified {
            assert!(ls.0.len() < 6, "VW should remove low-area vertices");
            assert_eq!(ls.0.first(), Some(&coord! { x: 0.0, y: 0.0 }), "endpoints are pinned");
            assert_eq!(ls.0.last(), Some(&coord! { x: 10.0, y: 0.0 }), "endpoints are pinned");
        } else {
            panic!("geometry type changed during simplification");
        }
    }

    #[test]
    fn test_zero_tolerance_is_identity() {
        let input = Geometry::LineString(zigzag());
        assert_eq!(simplify_geometry(&input, SimplifyMethod::DouglasPeucker, 0.0), input);
    }

    #[test]
    fn test_sharp_corner_survives_douglas_peucker() {
        let corner = LineString(vec![
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 5.0, y: 0.0 },
            coord! { x: 5.0, y: 5.0 },
        ]);
        let simplified =
            simplify_geometry(&Geometry::LineString(corner.clone()), SimplifyMethod::DouglasPeucker, 0.5);
        assert_eq!(simplified, Geometry::LineString(corner), "a real corner must not be dropped");
    }

    #[test]
    fn test_points_pass_through() {
        let p = Geometry::Point(point! { x: 3.0, y: 4.0 });
        assert_eq!(simplify_geometry(&p, SimplifyMethod::DouglasPeucker, 10.0), p);
    }

    #[test]
    fn test_polygon_rings_stay_closed() {
        let poly = Polygon::new(
            LineString(vec![
                coord! { x: 0.0, y: 0.0 },
                coord! { x: 4.0, y: 0.01 },
                coord! { x: 8.0, y: 0.0 },
                coord! { x: 8.0, y: 8.0 },
                coord! { x: 0.0, y: 8.0 },
                coord! { x: 0.0, y: 0.0 },
            ]),
            vec![],
        );
        let simplified = simplify_geometry(&Geometry::Polygon(poly), SimplifyMethod::DouglasPeucker, 0.1);
        if let Geometry::Polygon(p) = simplified {
            let ring = p.exterior();
            assert_eq!(ring.0.first(), ring.0.last(), "exterior ring must remain closed");
            assert_eq!(ring.0.len(), 5, "the near-collinear mid-edge point should drop");
        } else {
            panic!("geometry type changed during simplification");
        }
    }
}
