//! End-to-end pipeline scenarios.
//!
//! Each test drives the public API the way a tiling pipeline would: build
//! features in world coordinates, render them across zooms, and post-process
//! per tile. Module-level unit tests cover the individual algorithms; these
//! check that the stages agree with each other, in particular that
//!
//! - pixel positions line up across zoom levels,
//! - rendered pieces still chain back together after clipping, and
//! - attribute zoom gates survive the whole trip.

use std::collections::BTreeMap;

use geo::{Area, Geometry, LineString, Point, Polygon};
use serde_json::json;
use tilepress_core::{
    covered_tiles, lng_lat_to_world, merge_line_strings, world_to_lng_lat, FeatureRenderer,
    RenderConfig, RenderableFeature, TileCoord, TileFeature,
};

fn render_all(config: RenderConfig, features: &[RenderableFeature]) -> Vec<TileFeature> {
    let mut out = Vec::new();
    let mut renderer = FeatureRenderer::new(config, |f| out.push(f));
    for feature in features {
        renderer.render(feature);
    }
    drop(renderer);
    out
}

fn by_tile(features: Vec<TileFeature>) -> BTreeMap<TileCoord, Vec<TileFeature>> {
    let mut map: BTreeMap<TileCoord, Vec<TileFeature>> = BTreeMap::new();
    for f in features {
        map.entry(f.tile).or_default().push(f);
    }
    map
}

#[test]
fn point_stays_centered_across_zooms() {
    // Center of z14 tile (100, 200); at z13 the same point sits at the
    // quarter position of tile (50, 100).
    let n = 16384.0;
    let world = Point::new(100.5 / n, 200.5 / n);
    let feature = RenderableFeature::point("poi", &Geometry::Point(world))
        .unwrap()
        .with_zoom_range(13, 14);

    let out = render_all(RenderConfig::default(), std::slice::from_ref(&feature));
    assert_eq!(out.len(), 2);

    assert_eq!(out[0].tile, TileCoord::new(50, 100, 13));
    assert_eq!(out[0].geometry, Geometry::Point(Point::new(64.0, 64.0)));

    assert_eq!(out[1].tile, TileCoord::new(100, 200, 14));
    assert_eq!(out[1].geometry, Geometry::Point(Point::new(128.0, 128.0)));
}

#[test]
fn polygon_renders_fill_and_boundary_tiles_with_attrs() {
    // A 3 x 2 tile-unit park at z5.
    let n = 32.0;
    let ring: LineString<f64> = LineString::new(
        [(8.5, 8.5), (11.5, 8.5), (11.5, 10.5), (8.5, 10.5), (8.5, 8.5)]
            .iter()
            .map(|&(x, y)| geo::Coord { x: x / n, y: y / n })
            .collect(),
    );
    let feature =
        RenderableFeature::polygon("landuse", &Geometry::Polygon(Polygon::new(ring, vec![])))
            .unwrap()
            .with_zoom_range(5, 5)
            .with_attr("kind", json!("park"));

    let out = render_all(RenderConfig::default(), std::slice::from_ref(&feature));
    let tiles = by_tile(out);
    assert_eq!(tiles.len(), 12, "a 4 x 3 block of tiles is touched");

    for (tile, features) in &tiles {
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].layer, "landuse");
        assert_eq!(features[0].attrs["kind"], "park");
        assert!((8..=11).contains(&tile.x) && (8..=10).contains(&tile.y));
    }

    // Interior tiles carry the exact tile square, untouched by clipping.
    for (x, y) in [(9u32, 9u32), (10, 9)] {
        let f = &tiles[&TileCoord::new(x, y, 5)][0];
        match &f.geometry {
            Geometry::Polygon(p) => {
                assert_eq!(p.unsigned_area(), 256.0 * 256.0);
                assert!(p.interiors().is_empty());
                assert!(
                    p.exterior().0.iter().all(|c| (0.0..=256.0).contains(&c.x)
                        && (0.0..=256.0).contains(&c.y)),
                    "fill squares never extend into the buffer"
                );
            }
            other => panic!("fill tile should hold a polygon, got {:?}", other),
        }
    }
}

#[test]
fn world_spanning_polygon_fills_every_tile() {
    let world = Geometry::Polygon(Polygon::new(
        LineString::new(
            [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]
                .iter()
                .map(|&(x, y)| geo::Coord { x, y })
                .collect(),
        ),
        vec![],
    ));
    let tiled = covered_tiles(&world, 3, 4.0).unwrap();
    assert_eq!(tiled.len(), 64, "every z3 tile is covered");
    match tiled.get(&TileCoord::new(3, 3, 3)).unwrap() {
        Geometry::Polygon(p) => assert_eq!(p.unsigned_area(), 256.0 * 256.0),
        other => panic!("interior ocean tile should be a fill square, got {:?}", other),
    }
}

#[test]
fn small_polygon_with_hole_fits_one_tile() {
    // At z4 the whole donut sits inside tile (5, 5).
    let n = 16.0;
    let ring = |x0: f64, y0: f64, x1: f64, y1: f64| {
        LineString::new(
            [(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]
                .iter()
                .map(|&(x, y)| geo::Coord { x: x / n, y: y / n })
                .collect(),
        )
    };
    let donut = Geometry::Polygon(Polygon::new(
        ring(5.2, 5.2, 5.8, 5.8),
        vec![ring(5.4, 5.4, 5.6, 5.6)],
    ));

    let tiled = covered_tiles(&donut, 4, 4.0).unwrap();
    assert_eq!(tiled.len(), 1);
    match tiled.get(&TileCoord::new(5, 5, 4)).unwrap() {
        Geometry::Polygon(p) => {
            assert_eq!(p.interiors().len(), 1, "the hole survives as one interior ring");
            let outer = Polygon::new(p.exterior().clone(), vec![]).unsigned_area();
            let hole = Polygon::new(p.interiors()[0].clone(), vec![]).unsigned_area();
            // Quantization moves each edge by at most 1/16 px.
            assert!((outer - 153.6 * 153.6).abs() < 20.0, "outer area {}", outer);
            assert!((hole - 51.2 * 51.2).abs() < 20.0, "hole area {}", hole);
        }
        other => panic!("expected a single donut polygon, got {:?}", other),
    }
}

#[test]
fn rendered_road_segments_chain_back_together() {
    // Two road segments sharing an endpoint, with a name that only appears
    // at z14.
    let n = 16384.0;
    let segment = |x0: f64, x1: f64| {
        let ls = LineString::new(vec![
            geo::Coord { x: x0 / n, y: 200.5 / n },
            geo::Coord { x: x1 / n, y: 200.5 / n },
        ]);
        RenderableFeature::line("road", &Geometry::LineString(ls))
            .unwrap()
            .with_zoom_range(13, 14)
            .with_attr("class", json!("primary"))
            .with_attr_min_zoom("name", json!("High Street"), 14)
    };
    let features = [segment(100.1, 100.5), segment(100.5, 100.9)];

    let rendered = render_all(RenderConfig::default(), &features);
    let tiles = by_tile(rendered);

    let z13 = &tiles[&TileCoord::new(50, 100, 13)];
    assert_eq!(z13.len(), 2, "both segments land in the z13 tile");
    let merged = merge_line_strings(z13.clone(), 0.0, 0.0, 0.0).unwrap();
    assert_eq!(merged.len(), 1, "matching attrs chain into one road");
    match &merged[0].geometry {
        Geometry::LineString(ls) => assert_eq!(ls.0.len(), 3),
        other => panic!("expected one chained line, got {:?}", other),
    }
    assert_eq!(merged[0].attrs["class"], "primary");
    assert!(!merged[0].attrs.contains_key("name"), "the name is gated to z14");

    let z14 = &tiles[&TileCoord::new(100, 200, 14)];
    let merged = merge_line_strings(z14.clone(), 0.0, 0.0, 0.0).unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].attrs["name"], "High Street");
}

#[test]
fn tile_pixels_project_back_to_the_source_location() {
    let (lng, lat) = (2.3522, 48.8566);
    let (wx, wy) = lng_lat_to_world(lng, lat);
    let feature = RenderableFeature::point("poi", &Geometry::Point(Point::new(wx, wy)))
        .unwrap()
        .with_zoom_range(14, 14);

    let out = render_all(RenderConfig::default(), std::slice::from_ref(&feature));
    let f = out.iter().find(|f| f.tile.z == 14).expect("rendered at z14");
    let Geometry::Point(px) = &f.geometry else { panic!("point feature") };

    let scale = 16384.0;
    let back_x = (f.tile.x as f64 + px.x() / 256.0) / scale;
    let back_y = (f.tile.y as f64 + px.y() / 256.0) / scale;
    let (lng2, lat2) = world_to_lng_lat(back_x, back_y);
    // One z14 pixel is roughly 1e-4 degrees of longitude.
    assert!((lng - lng2).abs() < 2e-4, "longitude drifted: {} vs {}", lng, lng2);
    assert!((lat - lat2).abs() < 2e-4, "latitude drifted: {} vs {}", lat, lat2);
}
