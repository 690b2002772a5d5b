//! Plane-cut engine for brush meshes.
//!
//! [`CutEngine::cut`] clips a mesh against oriented planes in caller order,
//! keeping the inside (negative) half-space of each. Per plane the pipeline
//! is: classify vertices, split straddling edges, divide polygons with
//! vertices on both sides, stitch cap polygons over the opening, flood-fill
//! the kept component through twins, and compact.
//!
//! The engine owns reusable scratch buffers behind a mutex, so one engine
//! value can serve many cuts without reallocating per plane.

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::brush_error::BrushError;
use crate::geometry::plane::{Plane, SIDE_INSIDE, SIDE_ON, SIDE_OUTSIDE};
use crate::topology::brush_mesh::BrushMesh;
use crate::topology::cache::InvalidateCache;
use crate::topology::edit::{self, DegenerateReport};
use crate::topology::half_edge::{HalfEdge, INVALID_INDEX, Polygon, Surface};

/// Tolerances for the cut pipeline.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CutConfig {
    /// Dead zone around a plane inside which a vertex counts as on-plane.
    pub distance_epsilon: f64,
    /// Vertex weld radius used by [`CutEngine::cleanup`].
    pub weld_epsilon: f64,
}

impl Default for CutConfig {
    fn default() -> Self {
        Self {
            distance_epsilon: 1e-4,
            weld_epsilon: 1e-5,
        }
    }
}

/// Reusable per-plane working state.
#[derive(Default)]
struct CutScratch {
    /// Per-vertex side classification.
    sides: Vec<i8>,
    /// Per-vertex signed distance to the current plane.
    distances: Vec<f64>,
    /// Ring destination sides for the polygon under examination.
    seq: Vec<i8>,
    /// Kept-side half-edges rimming the opening.
    boundary: Vec<u32>,
    /// Flood-fill state.
    keep: Vec<bool>,
    queue: Vec<u32>,
}

enum PlaneOutcome {
    /// The plane missed the mesh.
    Unchanged,
    /// Material was removed and the mesh is still alive.
    Cut,
    /// Nothing was left on the inside.
    Emptied,
}

/// Plane-cut engine with reusable scratch storage.
pub struct CutEngine {
    config: CutConfig,
    scratch: Mutex<CutScratch>,
}

impl Default for CutEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CutEngine {
    pub fn new() -> Self {
        Self::with_config(CutConfig::default())
    }

    pub fn with_config(config: CutConfig) -> Self {
        Self {
            config,
            scratch: Mutex::new(CutScratch::default()),
        }
    }

    pub fn config(&self) -> &CutConfig {
        &self.config
    }

    /// Clip `mesh` against each plane in order, keeping the negative side.
    ///
    /// New cap polygons carry `surface` and the cutting plane. Returns
    /// `Ok(true)` while the mesh survives and `Ok(false)` once it is emptied
    /// (including cutting an already-empty mesh). A mesh left with fewer
    /// than 4 polygons by any plane is degenerate and is emptied as well.
    ///
    /// Vertices orphaned by discarded polygons stay in the vertex table;
    /// [`CutEngine::cleanup`] drops them.
    ///
    /// # Errors
    /// - Any validation error of the input mesh; cuts refuse invalid input.
    /// - [`BrushError::OddCrossingCount`] when a polygon ring crosses the
    ///   plane an odd number of times (corrupt topology).
    /// - [`BrushError::CapStitchFailed`] when the opening's rim cannot be
    ///   chained into closed loops.
    pub fn cut(
        &self,
        mesh: &mut BrushMesh,
        planes: &[Plane],
        surface: Surface,
    ) -> Result<bool, BrushError> {
        if mesh.is_empty() {
            return Ok(false);
        }
        mesh.validate(true)?;
        let mut scratch = self.scratch.lock();
        for plane in planes {
            match self.cut_plane(mesh, *plane, surface, &mut scratch)? {
                PlaneOutcome::Emptied => return Ok(false),
                PlaneOutcome::Unchanged | PlaneOutcome::Cut => {}
            }
        }
        Ok(!mesh.is_empty())
    }

    /// Post-cut cleanup: weld and degenerate removal with the configured
    /// epsilon, then orphaned-vertex collection.
    ///
    /// Returns the degenerate-removal report; orphan collection runs even
    /// when that report is empty.
    ///
    /// # Errors
    /// Propagates [`edit::remove_degenerate_topology`] failures.
    pub fn cleanup(&self, mesh: &mut BrushMesh) -> Result<DegenerateReport, BrushError> {
        let report = edit::remove_degenerate_topology(mesh, self.config.weld_epsilon)?;
        edit::remove_unused_vertices(mesh);
        Ok(report)
    }

    fn cut_plane(
        &self,
        mesh: &mut BrushMesh,
        plane: Plane,
        surface: Surface,
        scratch: &mut CutScratch,
    ) -> Result<PlaneOutcome, BrushError> {
        let eps = self.config.distance_epsilon;
        scratch.sides.clear();
        scratch.distances.clear();
        scratch.sides.reserve(mesh.vertices.len());
        scratch.distances.reserve(mesh.vertices.len());
        let mut any_outside = false;
        let mut any_inside = false;
        for v in &mesh.vertices {
            let d = plane.signed_distance(v.as_dvec3());
            let side = if d > eps {
                SIDE_OUTSIDE
            } else if d < -eps {
                SIDE_INSIDE
            } else {
                SIDE_ON
            };
            any_outside |= side == SIDE_OUTSIDE;
            any_inside |= side == SIDE_INSIDE;
            scratch.distances.push(d);
            scratch.sides.push(side);
        }
        if !any_outside {
            return Ok(PlaneOutcome::Unchanged);
        }
        if !any_inside {
            // Everything sits outside or on the plane.
            clear_mesh(mesh);
            return Ok(PlaneOutcome::Emptied);
        }

        split_crossing_edges(mesh, scratch)?;
        split_crossed_polygons(mesh, scratch)?;

        // Per-polygon side after splitting: any outside destination marks the
        // polygon for the discard pile.
        let discard: Vec<bool> = mesh
            .polygons
            .iter()
            .map(|poly| {
                poly.range()
                    .any(|e| scratch.sides[mesh.half_edges[e].vertex as usize] == SIDE_OUTSIDE)
            })
            .collect();
        if !discard.iter().any(|&d| d) {
            // Only unreferenced vertices were outside.
            return Ok(PlaneOutcome::Unchanged);
        }

        let cap_polygons = build_caps(mesh, scratch, &discard, plane, surface)?;
        let kept = flood_fill_keep(mesh, scratch, &cap_polygons);
        log::debug!(
            "cut plane {:?}: kept {} of {} polygons, {} caps",
            plane,
            kept,
            mesh.polygons.len(),
            cap_polygons.len()
        );
        if kept < 4 {
            clear_mesh(mesh);
            return Ok(PlaneOutcome::Emptied);
        }
        for (p, poly) in mesh.polygons.iter_mut().enumerate() {
            if !scratch.keep[p] {
                poly.edge_count = 0;
            }
        }
        mesh.invalidate_cache();
        edit::compact_half_edges(mesh)?;
        Ok(PlaneOutcome::Cut)
    }
}

/// Convenience wrapper: cut with a fresh default-configured engine.
///
/// # Errors
/// See [`CutEngine::cut`].
pub fn cut(mesh: &mut BrushMesh, planes: &[Plane], surface: Surface) -> Result<bool, BrushError> {
    CutEngine::new().cut(mesh, planes, surface)
}

/// Split every edge whose endpoints lie on strictly opposite sides.
///
/// The interpolated vertex always runs from the inside endpoint toward the
/// outside endpoint, so a shared edge produces one bit-identical split point
/// no matter which polygon reaches it first; the twin is handled inside the
/// same [`edit::split_half_edge`] call.
fn split_crossing_edges(mesh: &mut BrushMesh, scratch: &mut CutScratch) -> Result<(), BrushError> {
    for p in 0..mesh.polygons.len() {
        let mut k = 0;
        loop {
            let poly = mesh.polygons[p];
            if k >= poly.edge_count {
                break;
            }
            let e = poly.first_edge + k;
            let a = mesh.origin(e);
            let b = mesh.destination(e);
            let side_a = scratch.sides[a as usize];
            let side_b = scratch.sides[b as usize];
            if side_a as i32 * side_b as i32 >= 0 {
                k += 1;
                continue;
            }
            let (from, to) = if side_a == SIDE_INSIDE { (a, b) } else { (b, a) };
            let d_from = scratch.distances[from as usize];
            let d_to = scratch.distances[to as usize];
            let t = (d_from / (d_from - d_to)).clamp(0.0, 1.0);
            let point = mesh.vertex64(from).lerp(mesh.vertex64(to), t);
            mesh.vertices.push(point.as_vec3());
            scratch.sides.push(SIDE_ON);
            scratch.distances.push(0.0);
            let vertex = mesh.vertices.len() as u32 - 1;
            edit::split_half_edge(mesh, e, vertex)?;
            // Both halves now end or start at an on-plane vertex.
            k += 2;
        }
    }
    Ok(())
}

/// Divide every polygon with destinations on both sides along the chord from
/// an out-crossing to its matching in-crossing, repeating until each piece is
/// single-sided. Appended outside pieces contain no inside vertices and need
/// no further work.
fn split_crossed_polygons(mesh: &mut BrushMesh, scratch: &mut CutScratch) -> Result<(), BrushError> {
    let mut p = 0;
    while p < mesh.polygons.len() {
        loop {
            let poly = mesh.polygons[p];
            scratch.seq.clear();
            scratch
                .seq
                .extend(poly.range().map(|e| scratch.sides[mesh.half_edges[e].vertex as usize]));
            let seq = &scratch.seq;
            if !seq.contains(&SIDE_OUTSIDE) || !seq.contains(&SIDE_INSIDE) {
                break;
            }
            let n = seq.len();
            let out_k = (0..n).find(|&k| is_out_crossing(seq, k));
            let Some(out_k) = out_k else {
                return Err(crossing_mismatch(p, seq));
            };
            let mut in_k = None;
            let mut j = (out_k + 1) % n;
            while j != out_k {
                if is_in_crossing(seq, j) {
                    in_k = Some(j);
                    break;
                }
                j = (j + 1) % n;
            }
            let Some(in_k) = in_k else {
                return Err(crossing_mismatch(p, seq));
            };
            edit::split_polygon(mesh, p as u32, out_k as u32, in_k as u32)?;
            // Re-examine the kept piece; it may hold further crossing pairs.
        }
        p += 1;
    }
    Ok(())
}

/// Collect the kept-side rim of the opening, stitch it into cycles, and
/// append one cap polygon per cycle.
///
/// A rim edge lies in the plane (both endpoints on) with its twin in a
/// discarded polygon. Each cap edge twins its rim edge, so the kept region
/// closes and the discarded region becomes a separate component.
fn build_caps(
    mesh: &mut BrushMesh,
    scratch: &mut CutScratch,
    discard: &[bool],
    plane: Plane,
    surface: Surface,
) -> Result<Vec<u32>, BrushError> {
    scratch.boundary.clear();
    for (p, poly) in mesh.polygons.iter().enumerate() {
        if discard[p] {
            continue;
        }
        for e in poly.range() {
            let he = mesh.half_edges[e];
            if scratch.sides[he.vertex as usize] != SIDE_ON {
                continue;
            }
            if scratch.sides[mesh.half_edges[he.twin as usize].vertex as usize] != SIDE_ON {
                continue;
            }
            let q = mesh.owner_of(he.twin);
            if q != INVALID_INDEX && discard[q as usize] {
                scratch.boundary.push(e as u32);
            }
        }
    }
    if scratch.boundary.is_empty() {
        // The discarded region is a separate component with no shared rim.
        return Ok(Vec::new());
    }

    let mut by_origin: HashMap<u32, Vec<usize>> = HashMap::new();
    for (i, &e) in scratch.boundary.iter().enumerate() {
        by_origin.entry(mesh.origin(e)).or_default().push(i);
    }

    let mut used = vec![false; scratch.boundary.len()];
    let mut cycles: Vec<Vec<u32>> = Vec::new();
    for start in 0..scratch.boundary.len() {
        if used[start] {
            continue;
        }
        used[start] = true;
        let first = scratch.boundary[start];
        let close_at = mesh.origin(first);
        let mut cycle = vec![first];
        let mut cur = first;
        loop {
            let target = mesh.destination(cur);
            if target == close_at {
                break;
            }
            // Prefer a continuation that does not immediately double back
            // over the edge we just traversed.
            let origin_cur = mesh.origin(cur);
            let mut chosen = None;
            let mut fallback = None;
            if let Some(list) = by_origin.get(&target) {
                for &i in list {
                    if used[i] {
                        continue;
                    }
                    if mesh.destination(scratch.boundary[i]) != origin_cur {
                        chosen = Some(i);
                        break;
                    }
                    if fallback.is_none() {
                        fallback = Some(i);
                    }
                }
            }
            let Some(next) = chosen.or(fallback) else {
                return Err(BrushError::CapStitchFailed { vertex: target });
            };
            used[next] = true;
            cycle.push(scratch.boundary[next]);
            cur = scratch.boundary[next];
            if cycle.len() > scratch.boundary.len() {
                return Err(BrushError::CapStitchFailed { vertex: target });
            }
        }
        if cycle.len() < 3 {
            return Err(BrushError::CapStitchFailed { vertex: close_at });
        }
        cycles.push(cycle);
    }

    // Cap ring order is the reversed rim: each cap edge runs against its rim
    // edge, which also makes the cap wind outward along the plane normal.
    let mut cap_polygons = Vec::with_capacity(cycles.len());
    for cycle in &cycles {
        let first_edge = mesh.half_edges.len() as u32;
        for (k, &rim) in cycle.iter().rev().enumerate() {
            let cap = first_edge + k as u32;
            let origin = mesh.origin(rim);
            mesh.half_edges.push(HalfEdge::new(origin, rim));
            mesh.half_edges[rim as usize].twin = cap;
        }
        cap_polygons.push(mesh.polygons.len() as u32);
        mesh.polygons
            .push(Polygon::new(first_edge, cycle.len() as u32, surface));
        mesh.planes.push(plane);
    }
    mesh.invalidate_cache();
    Ok(cap_polygons)
}

/// Flood polygon adjacency through twins from the caps and from every
/// polygon with an inside destination; returns how many polygons were
/// reached. Rim retwinning has already detached the discarded component.
fn flood_fill_keep(mesh: &BrushMesh, scratch: &mut CutScratch, cap_polygons: &[u32]) -> usize {
    let total = mesh.polygons.len();
    scratch.keep.clear();
    scratch.keep.resize(total, false);
    scratch.queue.clear();
    for &p in cap_polygons {
        if !scratch.keep[p as usize] {
            scratch.keep[p as usize] = true;
            scratch.queue.push(p);
        }
    }
    for (p, poly) in mesh.polygons.iter().enumerate() {
        if scratch.keep[p] {
            continue;
        }
        let inside = poly
            .range()
            .any(|e| scratch.sides[mesh.half_edges[e].vertex as usize] == SIDE_INSIDE);
        if inside {
            scratch.keep[p] = true;
            scratch.queue.push(p as u32);
        }
    }
    let mut kept = scratch.queue.len();
    while let Some(p) = scratch.queue.pop() {
        let poly = mesh.polygons[p as usize];
        for e in poly.range() {
            let q = mesh.owner_of(mesh.half_edges[e].twin);
            if q != INVALID_INDEX && !scratch.keep[q as usize] {
                scratch.keep[q as usize] = true;
                scratch.queue.push(q);
                kept += 1;
            }
        }
    }
    kept
}

fn clear_mesh(mesh: &mut BrushMesh) {
    mesh.vertices.clear();
    mesh.half_edges.clear();
    mesh.polygons.clear();
    mesh.planes.clear();
    mesh.invalidate_cache();
}

/// Side of the nearest non-on destination before `k`, cyclically.
fn prev_non_on(seq: &[i8], k: usize) -> i8 {
    let n = seq.len();
    let mut j = (k + n - 1) % n;
    while j != k {
        if seq[j] != SIDE_ON {
            return seq[j];
        }
        j = (j + n - 1) % n;
    }
    SIDE_ON
}

/// Side of the nearest non-on destination after `k`, cyclically.
fn next_non_on(seq: &[i8], k: usize) -> i8 {
    let n = seq.len();
    let mut j = (k + 1) % n;
    while j != k {
        if seq[j] != SIDE_ON {
            return seq[j];
        }
        j = (j + 1) % n;
    }
    SIDE_ON
}

/// Last on-vertex of a run where the ring goes from inside to outside.
fn is_out_crossing(seq: &[i8], k: usize) -> bool {
    let n = seq.len();
    seq[k] == SIDE_ON && seq[(k + 1) % n] == SIDE_OUTSIDE && prev_non_on(seq, k) == SIDE_INSIDE
}

/// First on-vertex of a run where the ring comes back from outside to inside.
fn is_in_crossing(seq: &[i8], k: usize) -> bool {
    let n = seq.len();
    seq[k] == SIDE_ON && seq[(k + n - 1) % n] == SIDE_OUTSIDE && next_non_on(seq, k) == SIDE_INSIDE
}

/// A ring with destinations on both sides must pair every exit with a
/// re-entry. Rings that reach here have a breakdown the splitter cannot
/// resolve, which only corrupt topology produces.
fn crossing_mismatch(polygon: usize, seq: &[i8]) -> BrushError {
    let outs = (0..seq.len()).filter(|&k| is_out_crossing(seq, k)).count();
    let ins = (0..seq.len()).filter(|&k| is_in_crossing(seq, k)).count();
    debug_assert_eq!(
        outs, ins,
        "polygon {polygon} exits the plane {outs} times but re-enters {ins} times"
    );
    BrushError::OddCrossingCount {
        polygon: polygon as u32,
        crossings: outs + ins,
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
