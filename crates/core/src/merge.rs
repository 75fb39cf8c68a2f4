//! Post-render merging of features within one tile.
//!
//! Both entry points take the features of a single (tile, layer) batch and
//! combine the ones whose attributes match exactly; features of other
//! geometry types pass through untouched. Output order is deterministic:
//! pass-through features first in input order, then one merged feature per
//! attribute group in first-seen order.
//!
//! [`merge_line_strings`] chains touching line pieces end to end, drops
//! short results, re-simplifies, and can thin out detail beyond the tile's
//! clip window. [`merge_polygons`] unions polygons that sit within a given
//! distance of each other, optionally bridging gaps by growing before the
//! union and shrinking back after.

use std::collections::{HashMap, VecDeque};

use geo::{
    Area, BooleanOps, BoundingRect, Coord, CoordsIter, Distance, Euclidean, Geometry, Length,
    Line, LineString, MultiLineString, MultiPolygon, Polygon, Simplify,
};
use rstar::{RTree, RTreeObject, AABB};

use crate::feature::{AttrMap, TileFeature};
use crate::tile::TILE_SIZE;
use crate::{Error, Result};

/// Merge line features with a fixed length floor.
///
/// See [`merge_line_strings_with`] for the knobs; `min_length` here applies
/// uniformly to every attribute group.
pub fn merge_line_strings(
    features: Vec<TileFeature>,
    min_length: f64,
    tolerance: f64,
    clip_margin: f64,
) -> Result<Vec<TileFeature>> {
    merge_line_strings_with(features, |_| min_length, tolerance, clip_margin)
}

/// Merge line features, chaining pieces that share endpoints.
///
/// Pieces chain only where exactly two chain ends meet; junctions of three
/// or more stay split so road classes keep their topology. After chaining:
///
/// - chains shorter than the group's length floor (px) are dropped,
/// - `tolerance > 0` re-simplifies each chain (Douglas-Peucker),
/// - `clip_margin > 0` collapses runs of consecutive points outside
///   `[-clip_margin, 256 + clip_margin]²` to their first and last point,
///   and drops chains that lie entirely outside.
///
/// `min_length` is evaluated once per attribute group, so the floor can be
/// driven by the group's own attributes.
pub fn merge_line_strings_with(
    features: Vec<TileFeature>,
    min_length: impl Fn(&AttrMap) -> f64,
    tolerance: f64,
    clip_margin: f64,
) -> Result<Vec<TileFeature>> {
    check_all_finite(&features)?;
    let (pass, groups) = partition_by_attrs(features, |g| {
        matches!(g, Geometry::LineString(_) | Geometry::MultiLineString(_))
    });

    let mut out = pass;
    for group in groups {
        let floor = min_length(&group[0].attrs);
        if group.len() == 1 && floor <= 0.0 && tolerance <= 0.0 && clip_margin <= 0.0 {
            out.extend(group);
            continue;
        }
        if let Some(merged) = merge_line_group(group, floor, tolerance, clip_margin) {
            out.push(merged);
        }
    }
    Ok(out)
}

fn merge_line_group(
    group: Vec<TileFeature>,
    floor: f64,
    tolerance: f64,
    clip_margin: f64,
) -> Option<TileFeature> {
    let mut template = group[0].clone();

    let mut pieces: Vec<Vec<Coord<f64>>> = Vec::new();
    for feature in &group {
        match &feature.geometry {
            Geometry::LineString(ls) => pieces.push(ls.0.clone()),
            Geometry::MultiLineString(mls) => pieces.extend(mls.0.iter().map(|ls| ls.0.clone())),
            _ => unreachable!("partition only admits line geometry"),
        }
    }

    let mut chains = merge_chains(pieces);
    if floor > 0.0 {
        chains.retain(|chain| chain_length(chain) >= floor);
    }
    if tolerance > 0.0 {
        for chain in &mut chains {
            *chain = LineString::new(std::mem::take(chain)).simplify(&tolerance).0;
        }
    }
    if clip_margin > 0.0 {
        chains = chains
            .into_iter()
            .filter_map(|chain| remove_detail_outside(chain, clip_margin))
            .collect();
    }
    chains.retain(|chain| chain.len() >= 2);

    template.geometry = match chains.len() {
        0 => return None,
        1 => Geometry::LineString(LineString::new(chains.pop().expect("len checked"))),
        _ => Geometry::MultiLineString(MultiLineString(
            chains.into_iter().map(LineString::new).collect(),
        )),
    };
    Some(template)
}

/// Endpoint node key on the 1/16-px grid.
type NodeKey = (i64, i64);

fn node_key(c: Coord<f64>) -> NodeKey {
    ((c.x * 16.0).round() as i64, (c.y * 16.0).round() as i64)
}

fn chain_length(chain: &[Coord<f64>]) -> f64 {
    chain.windows(2).map(|w| Euclidean.length(&Line::new(w[0], w[1]))).sum()
}

/// Join chains end to end wherever exactly two chain ends meet.
///
/// Driven by a work list of endpoint nodes; each merge removes one chain, so
/// the loop terminates even on closed rings (a chain meeting itself counts
/// as one participant and is left alone).
fn merge_chains(input: Vec<Vec<Coord<f64>>>) -> Vec<Vec<Coord<f64>>> {
    let mut chains: Vec<Option<Vec<Coord<f64>>>> =
        input.into_iter().filter(|c| c.len() >= 2).map(Some).collect();

    // Node -> chain ids that ever had an endpoint there. Entries go stale
    // when chains merge; readers re-check against the live chain.
    let mut ends: HashMap<NodeKey, Vec<usize>> = HashMap::new();
    for (i, chain) in chains.iter().enumerate() {
        let chain = chain.as_ref().expect("freshly created");
        ends.entry(node_key(chain[0])).or_default().push(i);
        ends.entry(node_key(*chain.last().expect("len >= 2"))).or_default().push(i);
    }

    let mut worklist: Vec<NodeKey> = ends.keys().copied().collect();
    worklist.sort_unstable();
    let mut queue: VecDeque<NodeKey> = worklist.into();

    while let Some(key) = queue.pop_front() {
        let Some(ids) = ends.get(&key) else { continue };
        let mut uniq = ids.clone();
        uniq.sort_unstable();
        uniq.dedup();

        let mut degree = 0u32;
        let mut live: Vec<usize> = Vec::new();
        for id in uniq {
            if let Some(chain) = &chains[id] {
                let here = (node_key(chain[0]) == key) as u32
                    + (node_key(*chain.last().expect("len >= 2")) == key) as u32;
                if here > 0 {
                    live.push(id);
                    degree += here;
                }
            }
        }
        if degree != 2 || live.len() != 2 {
            continue;
        }

        let (a, b) = (live[0], live[1]);
        let mut ca = chains[a].take().expect("live");
        let mut cb = chains[b].take().expect("live");
        if node_key(ca[0]) == key {
            ca.reverse();
        }
        if node_key(*cb.last().expect("len >= 2")) == key {
            cb.reverse();
        }
        if ca.last() == cb.first() {
            ca.pop();
        }
        ca.extend(cb);

        let front = node_key(ca[0]);
        let back = node_key(*ca.last().expect("merged chain is non-empty"));
        chains[a] = Some(ca);
        ends.entry(front).or_default().push(a);
        ends.entry(back).or_default().push(a);
        queue.push_back(front);
        queue.push_back(back);
    }

    chains.into_iter().flatten().collect()
}

/// Collapse runs of points outside the clip window.
///
/// A run of two or more consecutive outside points keeps only its first and
/// last; a lone outside point stays, since it still bends the line inside
/// the window. Chains entirely outside return `None`.
fn remove_detail_outside(chain: Vec<Coord<f64>>, margin: f64) -> Option<Vec<Coord<f64>>> {
    let lo = -margin;
    let hi = TILE_SIZE + margin;
    let outside = |c: &Coord<f64>| c.x < lo || c.x > hi || c.y < lo || c.y > hi;

    if chain.iter().all(|c| outside(c)) {
        return None;
    }
    let mut out = Vec::with_capacity(chain.len());
    let mut i = 0;
    while i < chain.len() {
        if !outside(&chain[i]) {
            out.push(chain[i]);
            i += 1;
            continue;
        }
        let start = i;
        while i < chain.len() && outside(&chain[i]) {
            i += 1;
        }
        out.push(chain[start]);
        if i - 1 > start {
            out.push(chain[i - 1]);
        }
    }
    Some(out)
}

/// Merge polygon features whose boundaries sit within `min_dist` px.
///
/// Polygons in one attribute group are clustered transitively by distance,
/// then each cluster is unioned. With `buffer_amount > 0` every member grows
/// by that many px before the union and the result shrinks back, which
/// bridges sub-`buffer_amount` gaps the way a morphological close does.
///
/// Area floors apply after merging: polygons whose exterior covers less than
/// `min_area` px² drop, holes under `min_hole_area` px² are filled in.
pub fn merge_polygons(
    features: Vec<TileFeature>,
    min_area: f64,
    min_hole_area: f64,
    min_dist: f64,
    buffer_amount: f64,
) -> Result<Vec<TileFeature>> {
    check_all_finite(&features)?;
    let (pass, groups) = partition_by_attrs(features, |g| {
        matches!(g, Geometry::Polygon(_) | Geometry::MultiPolygon(_))
    });

    let mut out = pass;
    for group in groups {
        let mut template = group[0].clone();

        let mut polys: Vec<Polygon<f64>> = Vec::new();
        for feature in &group {
            match &feature.geometry {
                Geometry::Polygon(p) => polys.push(p.clone()),
                Geometry::MultiPolygon(mp) => polys.extend(mp.0.iter().cloned()),
                _ => unreachable!("partition only admits polygon geometry"),
            }
        }

        let mut kept: Vec<Polygon<f64>> = Vec::new();
        for component in proximity_components(&polys, min_dist.max(0.0)) {
            let merged = if component.len() == 1 {
                MultiPolygon(vec![polys[component[0]].clone()])
            } else {
                let members: Vec<Polygon<f64>> =
                    component.iter().map(|&i| polys[i].clone()).collect();
                union_all(members, buffer_amount)
            };
            kept.extend(filter_by_area(merged, min_area, min_hole_area));
        }

        match kept.len() {
            0 => continue,
            1 => template.geometry = Geometry::Polygon(kept.pop().expect("len checked")),
            _ => template.geometry = Geometry::MultiPolygon(MultiPolygon(kept)),
        }
        out.push(template);
    }
    Ok(out)
}

struct TreeEntry {
    idx: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for TreeEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// Connected components under "boundary distance <= min_dist", found by
/// flood fill over an R-tree of bounding boxes expanded by the distance.
fn proximity_components(polys: &[Polygon<f64>], min_dist: f64) -> Vec<Vec<usize>> {
    let entries: Vec<TreeEntry> = polys
        .iter()
        .enumerate()
        .filter_map(|(idx, p)| {
            p.bounding_rect().map(|r| TreeEntry {
                idx,
                env: AABB::from_corners([r.min().x, r.min().y], [r.max().x, r.max().y]),
            })
        })
        .collect();
    let tree = RTree::bulk_load(entries);

    let mut visited = vec![false; polys.len()];
    let mut components = Vec::new();
    for start in 0..polys.len() {
        if visited[start] || polys[start].bounding_rect().is_none() {
            continue;
        }
        visited[start] = true;
        let mut component = Vec::new();
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            component.push(i);
            let r = polys[i].bounding_rect().expect("visited implies a bounding rect");
            let query = AABB::from_corners(
                [r.min().x - min_dist, r.min().y - min_dist],
                [r.max().x + min_dist, r.max().y + min_dist],
            );
            let mut candidates: Vec<usize> =
                tree.locate_in_envelope_intersecting(&query).map(|e| e.idx).collect();
            candidates.sort_unstable();
            for j in candidates {
                if !visited[j] && Euclidean.distance(&polys[i], &polys[j]) <= min_dist {
                    visited[j] = true;
                    stack.push(j);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }
    components
}

fn union_all(polys: Vec<Polygon<f64>>, buffer_amount: f64) -> MultiPolygon<f64> {
    if buffer_amount > 0.0 {
        let mut merged = MultiPolygon::new(vec![]);
        for p in &polys {
            let grown = geo_buffer::buffer_polygon(p, buffer_amount);
            merged = if merged.0.is_empty() { grown } else { merged.union(&grown) };
        }
        geo_buffer::buffer_multi_polygon(&merged, -buffer_amount)
    } else {
        let mut iter = polys.into_iter();
        let first = MultiPolygon::new(iter.next().into_iter().collect());
        iter.fold(first, |acc, p| acc.union(&MultiPolygon::new(vec![p])))
    }
}

fn ring_area(ring: &LineString<f64>) -> f64 {
    Polygon::new(ring.clone(), vec![]).unsigned_area()
}

fn filter_by_area(mp: MultiPolygon<f64>, min_area: f64, min_hole_area: f64) -> Vec<Polygon<f64>> {
    mp.0.into_iter()
        .filter_map(|poly| {
            let (exterior, interiors) = poly.into_inner();
            if ring_area(&exterior) < min_area {
                return None;
            }
            let holes = if min_hole_area > 0.0 {
                interiors.into_iter().filter(|r| ring_area(r) >= min_hole_area).collect()
            } else {
                interiors
            };
            Some(Polygon::new(exterior, holes))
        })
        .collect()
}

fn check_all_finite(features: &[TileFeature]) -> Result<()> {
    for feature in features {
        for c in feature.geometry.coords_iter() {
            if !c.x.is_finite() || !c.y.is_finite() {
                return Err(Error::InvalidGeometry {
                    reason: format!("non-finite coordinate ({}, {})", c.x, c.y),
                });
            }
        }
    }
    Ok(())
}

/// Split into pass-through features and groups of mergeable features with
/// equal attributes, both in stable input order.
fn partition_by_attrs(
    features: Vec<TileFeature>,
    mergeable: impl Fn(&Geometry<f64>) -> bool,
) -> (Vec<TileFeature>, Vec<Vec<TileFeature>>) {
    let mut pass = Vec::new();
    let mut groups: Vec<Vec<TileFeature>> = Vec::new();
    for feature in features {
        if mergeable(&feature.geometry) {
            match groups.iter_mut().find(|g| g[0].attrs == feature.attrs) {
                Some(group) => group.push(feature),
                None => groups.push(vec![feature]),
            }
        } else {
            pass.push(feature);
        }
    }
    (pass, groups)
}
