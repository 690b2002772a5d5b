//! Invariant-checked editing primitives for brush meshes.
//!
//! Everything here preserves the mesh invariants: twin symmetry, ascending
//! disjoint polygon ranges, and ring closure. The primitives do the index
//! arithmetic once, carefully, so the cut engine and authoring code never
//! touch raw twin bookkeeping.
//!
//! All edits invalidate the derived edge-owner cache and, in debug or
//! `check-invariants` builds, re-validate the mesh on exit.

use glam::DVec3;
use hashbrown::HashMap;

use crate::brush_error::BrushError;
use crate::debug_invariants::DebugInvariants;
use crate::topology::brush_mesh::BrushMesh;
use crate::topology::cache::InvalidateCache;
use crate::topology::half_edge::{HalfEdge, INVALID_INDEX, Polygon};

/// Outcome of [`split_half_edge`]: the four final edge indices around the
/// inserted vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SplitEdge {
    /// First half in the split edge's ring: runs origin -> new vertex.
    pub front: u32,
    /// Second half: runs new vertex -> old destination.
    pub back: u32,
    /// Twin of `back`, in the neighboring ring: old destination -> new vertex.
    pub twin_front: u32,
    /// Twin of `front`: new vertex -> origin.
    pub twin_back: u32,
}

/// Summary of a [`compact_half_edges`] pass.
///
/// The maps take old indices to new ones so callers can re-aim per-edge or
/// per-polygon data they keep alongside the mesh.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompactReport {
    pub removed_half_edges: usize,
    pub removed_polygons: usize,
    /// Old half-edge index to new, [`INVALID_INDEX`] for removed entries.
    pub half_edge_map: Vec<u32>,
    /// Old polygon index to new, [`INVALID_INDEX`] for removed entries.
    pub polygon_map: Vec<u32>,
}

impl CompactReport {
    pub fn changed(&self) -> bool {
        self.removed_half_edges != 0 || self.removed_polygons != 0
    }
}

/// Summary of a [`remove_degenerate_topology`] pass.
///
/// Carries the same old-to-new maps as [`CompactReport`] for half-edges and
/// polygons; the vertex table has no map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DegenerateReport {
    pub welded_vertices: usize,
    pub removed_half_edges: usize,
    pub removed_polygons: usize,
    /// Old half-edge index to new, [`INVALID_INDEX`] for removed entries.
    pub half_edge_map: Vec<u32>,
    /// Old polygon index to new, [`INVALID_INDEX`] for removed entries.
    pub polygon_map: Vec<u32>,
}

impl DegenerateReport {
    pub fn changed(&self) -> bool {
        self.welded_vertices != 0 || self.removed_half_edges != 0 || self.removed_polygons != 0
    }
}

/// Insert `vertex` into `edge` and its twin.
///
/// The edge pair becomes two collinear pairs meeting at `vertex`; both
/// neighboring rings grow by one edge. Twin indices across the whole table
/// shift by the two insertions; the shift a given index receives depends on
/// whether it sits before both insertion points, between them, or after
/// both.
///
/// # Errors
/// - [`BrushError::EdgeIndexOutOfBounds`] for a bad `edge`.
/// - [`BrushError::VertexIndexOutOfBounds`] for a bad `vertex`.
/// - [`BrushError::TwinSelfReference`] if the mesh is corrupt at `edge`.
pub fn split_half_edge(
    mesh: &mut BrushMesh,
    edge: u32,
    vertex: u32,
) -> Result<SplitEdge, BrushError> {
    let len = mesh.half_edges.len();
    if edge as usize >= len {
        return Err(BrushError::EdgeIndexOutOfBounds { edge, len });
    }
    if vertex as usize >= mesh.vertices.len() {
        return Err(BrushError::VertexIndexOutOfBounds {
            vertex,
            len: mesh.vertices.len(),
        });
    }
    let t = mesh.half_edges[edge as usize].twin;
    if t as usize >= len {
        return Err(BrushError::EdgeIndexOutOfBounds { edge: t, len });
    }
    if t == edge {
        return Err(BrushError::TwinSelfReference { edge });
    }
    let owner_a = mesh.owner_of(edge);
    let owner_b = mesh.owner_of(t);
    if owner_a == INVALID_INDEX {
        return Err(BrushError::EdgeNotOwned { edge });
    }
    if owner_b == INVALID_INDEX {
        return Err(BrushError::EdgeNotOwned { edge: t });
    }
    let dest = mesh.half_edges[edge as usize].vertex;
    let origin = mesh.half_edges[t as usize].vertex;

    // Insertion points in the original index space: one new edge right after
    // `edge`, one right after its twin.
    let pos_a = edge + 1;
    let pos_b = t + 1;
    let remap = |x: u32| x + (x >= pos_a) as u32 + (x >= pos_b) as u32;

    for he in &mut mesh.half_edges {
        he.twin = remap(he.twin);
    }
    let final_edge = remap(edge);
    let final_t = remap(t);
    let final_a = final_edge + 1; // the new second half in `edge`'s ring
    let final_b = final_t + 1; // the new second half in the twin's ring

    // front: origin -> vertex, twinned with the twin ring's second half.
    mesh.half_edges[edge as usize] = HalfEdge::new(vertex, final_b);
    // twin front: dest -> vertex, twinned with our second half.
    mesh.half_edges[t as usize] = HalfEdge::new(vertex, final_a);

    let second_half = HalfEdge::new(dest, final_t); // vertex -> dest
    let twin_second = HalfEdge::new(origin, final_edge); // vertex -> origin
    if pos_a >= pos_b {
        mesh.half_edges.insert(pos_a as usize, second_half);
        mesh.half_edges.insert(pos_b as usize, twin_second);
    } else {
        mesh.half_edges.insert(pos_b as usize, twin_second);
        mesh.half_edges.insert(pos_a as usize, second_half);
    }

    for (p, poly) in mesh.polygons.iter_mut().enumerate() {
        let shift = (pos_a <= poly.first_edge) as u32 + (pos_b <= poly.first_edge) as u32;
        poly.first_edge += shift;
        if p as u32 == owner_a {
            poly.edge_count += 1;
        }
        if p as u32 == owner_b {
            poly.edge_count += 1;
        }
    }

    mesh.invalidate_cache();
    mesh.debug_assert_invariants();
    Ok(SplitEdge {
        front: final_edge,
        back: final_a,
        twin_front: final_t,
        twin_back: final_b,
    })
}

/// Split `polygon` along the chord between the destination vertices of the
/// ring edges at offsets `index_out` and `index_in`.
///
/// The arc from `index_out` (exclusive) through `index_in` (inclusive)
/// becomes a new polygon appended at the end of the table, closed by a new
/// twin pair along the chord; the original keeps the remaining arc. The two
/// offset orderings move different arcs: `index_out < index_in` carves the
/// middle of the stored range, the reverse ordering carves its wrapping
/// complement. The new polygon inherits the original's plane and surface.
///
/// Returns the new polygon's index.
///
/// # Errors
/// - [`BrushError::PolygonIndexOutOfBounds`] / [`BrushError::RingOffsetOutOfBounds`]
///   for bad arguments.
/// - [`BrushError::InvalidPolygonSplit`] when either piece would drop below
///   three edges or the chord endpoints coincide.
pub fn split_polygon(
    mesh: &mut BrushMesh,
    polygon: u32,
    index_out: u32,
    index_in: u32,
) -> Result<u32, BrushError> {
    let poly_len = mesh.polygons.len();
    if polygon as usize >= poly_len {
        return Err(BrushError::PolygonIndexOutOfBounds {
            polygon,
            len: poly_len,
        });
    }
    let poly = mesh.polygons[polygon as usize];
    let n = poly.edge_count;
    for offset in [index_out, index_in] {
        if offset >= n {
            return Err(BrushError::RingOffsetOutOfBounds {
                polygon,
                offset,
                edge_count: n,
            });
        }
    }
    // Ring size of each piece, counting original edges only.
    let k_new = (index_in + n - index_out) % n;
    let k_keep = n - k_new;
    if k_new < 2 || k_keep < 2 {
        return Err(BrushError::InvalidPolygonSplit {
            polygon,
            index_out,
            index_in,
        });
    }
    let f = poly.first_edge;
    let dest_out = mesh.half_edges[(f + index_out) as usize].vertex;
    let dest_in = mesh.half_edges[(f + index_in) as usize].vertex;
    if dest_out == dest_in {
        return Err(BrushError::InvalidPolygonSplit {
            polygon,
            index_out,
            index_in,
        });
    }

    let old_len = mesh.half_edges.len() as u32;
    // Ring slots of the kept piece (in stored order) and of the moved piece
    // (in ring order), as global edge ids; INVALID_INDEX marks the new edge.
    let mut kept: Vec<u32> = Vec::with_capacity(k_keep as usize + 1);
    let mut moved: Vec<u32> = Vec::with_capacity(k_new as usize + 1);
    if index_out < index_in {
        kept.extend(f..=f + index_out);
        kept.push(INVALID_INDEX);
        kept.extend(f + index_in + 1..f + n);
        moved.extend(f + index_out + 1..=f + index_in);
    } else {
        kept.extend(f + index_in + 1..=f + index_out);
        kept.push(INVALID_INDEX);
        moved.extend(f + index_out + 1..f + n);
        moved.extend(f..=f + index_in);
    }
    moved.push(INVALID_INDEX);

    // Final slots: kept stays at `f`, the moved arc lands at the table end
    // (shrunk by the arc, grown by the two new edges).
    let delta = 1i64 - k_new as i64;
    let base = (old_len as i64 + delta) as u32;
    let chord_keep = f + kept
        .iter()
        .position(|&g| g == INVALID_INDEX)
        .map(|i| i as u32)
        .unwrap_or(0);
    let chord_new = base + k_new;

    let mut map = vec![INVALID_INDEX; old_len as usize];
    for i in 0..f {
        map[i as usize] = i;
    }
    for (k, &g) in kept.iter().enumerate() {
        if g != INVALID_INDEX {
            map[g as usize] = f + k as u32;
        }
    }
    for i in f + n..old_len {
        map[i as usize] = (i as i64 + delta) as u32;
    }
    for (j, &g) in moved.iter().enumerate() {
        if g != INVALID_INDEX {
            map[g as usize] = base + j as u32;
        }
    }

    let old = std::mem::take(&mut mesh.half_edges);
    let mut table = Vec::with_capacity(old.len() + 2);
    table.extend_from_slice(&old[..f as usize]);
    for &g in &kept {
        if g == INVALID_INDEX {
            // Chord in the kept ring: dest(out) -> dest(in).
            table.push(HalfEdge::new(dest_in, chord_new));
        } else {
            table.push(old[g as usize]);
        }
    }
    table.extend_from_slice(&old[(f + n) as usize..]);
    for &g in &moved {
        if g == INVALID_INDEX {
            // Chord in the new ring: dest(in) -> dest(out).
            table.push(HalfEdge::new(dest_out, chord_keep));
        } else {
            table.push(old[g as usize]);
        }
    }
    for (i, he) in table.iter_mut().enumerate() {
        let i = i as u32;
        if i == chord_keep || i == chord_new {
            continue;
        }
        he.twin = map[he.twin as usize];
    }
    mesh.half_edges = table;

    mesh.polygons[polygon as usize].edge_count = k_keep + 1;
    for poly in &mut mesh.polygons[polygon as usize + 1..] {
        poly.first_edge = (poly.first_edge as i64 + delta) as u32;
    }
    mesh.polygons
        .push(Polygon::new(base, k_new + 1, poly.surface));
    let plane = mesh.planes[polygon as usize];
    mesh.planes.push(plane);

    mesh.invalidate_cache();
    mesh.debug_assert_invariants();
    Ok(mesh.polygons.len() as u32 - 1)
}

/// Remove a half-edge pair and merge its two adjacent polygons.
///
/// The polygon owning `edge` absorbs the twin's ring; the twin's polygon is
/// removed and later polygon indices shift down by one. The merged polygon
/// keeps the absorber's plane and surface. Lazily deleted polygons elsewhere
/// in the mesh are compacted away as a side effect.
///
/// Returns the merged polygon's (post-shift) index.
///
/// # Errors
/// - [`BrushError::EdgeIndexOutOfBounds`] for a bad `edge`.
/// - [`BrushError::EdgeNotRemovable`] when both sides of the pair belong to
///   the same polygon.
pub fn remove_edge(mesh: &mut BrushMesh, edge: u32) -> Result<u32, BrushError> {
    let len = mesh.half_edges.len();
    if edge as usize >= len {
        return Err(BrushError::EdgeIndexOutOfBounds { edge, len });
    }
    let t = mesh.half_edges[edge as usize].twin;
    if t as usize >= len {
        return Err(BrushError::EdgeIndexOutOfBounds { edge: t, len });
    }
    let p = mesh.owner_of(edge);
    let q = mesh.owner_of(t);
    if p == INVALID_INDEX {
        return Err(BrushError::EdgeNotOwned { edge });
    }
    if q == INVALID_INDEX {
        return Err(BrushError::EdgeNotOwned { edge: t });
    }
    if p == q {
        return Err(BrushError::EdgeNotRemovable {
            edge,
            reason: "edge and twin belong to the same polygon",
        });
    }

    let poly_p = mesh.polygons[p as usize];
    let poly_q = mesh.polygons[q as usize];

    // Merged ring: p's ring with `edge` replaced by q's ring rotated to start
    // just after the twin.
    let mut merged: Vec<u32> = Vec::with_capacity((poly_p.edge_count + poly_q.edge_count - 2) as usize);
    for g in poly_p.first_edge..poly_p.end_edge() {
        if g == edge {
            let offset_t = t - poly_q.first_edge;
            for k in 1..poly_q.edge_count {
                merged.push(poly_q.first_edge + (offset_t + k) % poly_q.edge_count);
            }
        } else {
            merged.push(g);
        }
    }

    let mut rings: Vec<Vec<u32>> = Vec::with_capacity(mesh.polygons.len());
    for (idx, poly) in mesh.polygons.iter().enumerate() {
        let idx = idx as u32;
        if idx == p {
            rings.push(std::mem::take(&mut merged));
        } else if idx == q {
            rings.push(Vec::new());
        } else {
            rings.push((poly.first_edge..poly.end_edge()).collect());
        }
    }
    // The rebuild also drops polygons that were already lazily deleted; the
    // remap table knows where the merged polygon landed.
    let maps = rebuild_from_rings(mesh, rings)?;

    mesh.debug_assert_invariants();
    Ok(maps.polygons[p as usize])
}

/// Drop lazily deleted polygons and every half-edge no live polygon owns,
/// rewriting twin indices through a remap table. Idempotent.
///
/// The report carries the old-to-new maps; on an already-compact mesh they
/// are identities.
///
/// # Errors
/// Returns [`BrushError::EdgeIndexOutOfBounds`] if a surviving edge's twin
/// was dropped, which means the caller deleted one side of a twin pair
/// without re-pointing the other.
pub fn compact_half_edges(mesh: &mut BrushMesh) -> Result<CompactReport, BrushError> {
    let before_edges = mesh.half_edges.len();
    let before_polys = mesh.polygons.len();
    let already_compact = {
        let mut offset = 0u32;
        mesh.polygons.iter().all(|poly| {
            let ok = !poly.is_dead() && poly.first_edge == offset;
            offset = poly.end_edge();
            ok
        }) && offset as usize == before_edges
    };
    if already_compact {
        return Ok(CompactReport {
            half_edge_map: (0..before_edges as u32).collect(),
            polygon_map: (0..before_polys as u32).collect(),
            ..CompactReport::default()
        });
    }

    let rings: Vec<Vec<u32>> = mesh
        .polygons
        .iter()
        .map(|poly| {
            if poly.is_dead() {
                Vec::new()
            } else {
                (poly.first_edge..poly.end_edge()).collect()
            }
        })
        .collect();
    let maps = rebuild_from_rings(mesh, rings)?;

    mesh.debug_assert_invariants();
    Ok(CompactReport {
        removed_half_edges: before_edges - mesh.half_edges.len(),
        removed_polygons: before_polys - mesh.polygons.len(),
        half_edge_map: maps.half_edges,
        polygon_map: maps.polygons,
    })
}

/// Weld vertices closer than `weld_epsilon` (each cluster merges at its
/// mean position), collapse the zero-length edge pairs that creates, splice
/// out polygons reduced below three edges, and remap every table.
/// Unreferenced vertices are dropped at the end.
///
/// The report's maps take old half-edge and polygon indices to their final
/// positions for callers holding per-edge or per-polygon data of their own.
///
/// # Errors
/// Returns [`BrushError::InvalidGeometry`] if sliver splicing fails to
/// converge, which indicates corrupt input topology.
pub fn remove_degenerate_topology(
    mesh: &mut BrushMesh,
    weld_epsilon: f64,
) -> Result<DegenerateReport, BrushError> {
    let welded_vertices = weld_vertices(mesh, weld_epsilon);

    let edge_len = mesh.half_edges.len();
    let mut edge_dead = vec![false; edge_len];
    let mut poly_dead: Vec<bool> = mesh.polygons.iter().map(|p| p.is_dead()).collect();

    // Fixpoint: collapsing edges can produce bigons, splicing bigons can
    // expose more zero-length pairs.
    let mut pass = 0usize;
    loop {
        let mut changed = false;

        for (p, poly) in mesh.polygons.iter().enumerate() {
            if poly_dead[p] {
                continue;
            }
            for g in poly.range() {
                if edge_dead[g] {
                    continue;
                }
                let t = mesh.half_edges[g].twin as usize;
                if mesh.half_edges[g].vertex == mesh.half_edges[t].vertex {
                    // Zero length: destination equals origin.
                    edge_dead[g] = true;
                    edge_dead[t] = true;
                    changed = true;
                }
            }
        }

        for p in 0..mesh.polygons.len() {
            if poly_dead[p] {
                continue;
            }
            let live: Vec<u32> = mesh.polygons[p]
                .range()
                .filter(|&g| !edge_dead[g])
                .map(|g| g as u32)
                .collect();
            match live.len() {
                0 => {
                    poly_dead[p] = true;
                    changed = true;
                }
                1 => {
                    // A lone surviving edge has no ring; its pair dies with it.
                    let g = live[0];
                    let t = mesh.half_edges[g as usize].twin;
                    edge_dead[g as usize] = true;
                    edge_dead[t as usize] = true;
                    poly_dead[p] = true;
                    changed = true;
                }
                2 => {
                    let (e1, e2) = (live[0], live[1]);
                    let t1 = mesh.half_edges[e1 as usize].twin;
                    let t2 = mesh.half_edges[e2 as usize].twin;
                    if (t1 == e2 && t2 == e1) || edge_dead[t1 as usize] || edge_dead[t2 as usize]
                    {
                        // Self-twinned bubble (or neighbors already gone):
                        // nothing to splice onto.
                        edge_dead[e1 as usize] = true;
                        edge_dead[e2 as usize] = true;
                    } else {
                        // Splice the neighbors together across the bigon.
                        mesh.half_edges[t1 as usize].twin = t2;
                        mesh.half_edges[t2 as usize].twin = t1;
                        edge_dead[e1 as usize] = true;
                        edge_dead[e2 as usize] = true;
                    }
                    poly_dead[p] = true;
                    changed = true;
                }
                _ => {}
            }
        }

        if !changed {
            break;
        }
        pass += 1;
        if pass > mesh.polygons.len() + 1 {
            return Err(BrushError::InvalidGeometry(
                "degenerate-topology splicing did not converge".into(),
            ));
        }
    }

    let any_dead = edge_dead.iter().any(|&d| d) || poly_dead.iter().any(|&d| d);
    let maps = if any_dead {
        let rings: Vec<Vec<u32>> = mesh
            .polygons
            .iter()
            .enumerate()
            .map(|(p, poly)| {
                if poly_dead[p] {
                    Vec::new()
                } else {
                    poly.range()
                        .filter(|&g| !edge_dead[g])
                        .map(|g| g as u32)
                        .collect()
                }
            })
            .collect();
        rebuild_from_rings(mesh, rings)?
    } else {
        RemapTables {
            half_edges: (0..edge_len as u32).collect(),
            polygons: (0..mesh.polygons.len() as u32).collect(),
        }
    };

    let removed_half_edges = maps.half_edges.len() - mesh.half_edges.len();
    let removed_polygons = maps.polygons.len() - mesh.polygons.len();
    let report = DegenerateReport {
        welded_vertices,
        removed_half_edges,
        removed_polygons,
        half_edge_map: maps.half_edges,
        polygon_map: maps.polygons,
    };
    if report.changed() {
        remove_unused_vertices(mesh);
        mesh.invalidate_cache();
    }
    mesh.debug_assert_invariants();
    Ok(report)
}

/// Flip the mesh inside-out.
///
/// Every half-edge swaps destination with its twin's, every ring reverses in
/// place (twin indices follow the reversal), and every plane is negated.
/// The signed volume changes sign. Used after
/// [`BrushMesh::is_inside_out`] reports a wound-backwards mesh.
pub fn invert(mesh: &mut BrushMesh) {
    let len = mesh.half_edges.len() as u32;
    let mut map: Vec<u32> = (0..len).collect();
    for poly in &mesh.polygons {
        if poly.is_dead() {
            continue;
        }
        let n = poly.edge_count;
        for k in 0..n {
            map[(poly.first_edge + k) as usize] = poly.first_edge + (n - 1 - k);
        }
    }
    let old = std::mem::take(&mut mesh.half_edges);
    let mut table = vec![HalfEdge::new(0, 0); old.len()];
    for (e, he) in old.iter().enumerate() {
        let twin = he.twin as usize;
        table[map[e] as usize] = HalfEdge::new(old[twin].vertex, map[twin]);
    }
    mesh.half_edges = table;
    for plane in &mut mesh.planes {
        *plane = plane.negated();
    }
    mesh.invalidate_cache();
    mesh.debug_assert_invariants();
}

/// Drop vertices no half-edge references, remapping the vertex table.
///
/// Returns how many vertices were removed.
pub fn remove_unused_vertices(mesh: &mut BrushMesh) -> usize {
    let mut used = vec![false; mesh.vertices.len()];
    for he in &mesh.half_edges {
        used[he.vertex as usize] = true;
    }
    let removed = used.iter().filter(|&&u| !u).count();
    if removed == 0 {
        return 0;
    }
    let mut map = vec![INVALID_INDEX; mesh.vertices.len()];
    let mut next = 0u32;
    let old = std::mem::take(&mut mesh.vertices);
    let mut vertices = Vec::with_capacity(old.len() - removed);
    for (v, keep) in used.iter().enumerate() {
        if *keep {
            map[v] = next;
            next += 1;
            vertices.push(old[v]);
        }
    }
    mesh.vertices = vertices;
    for he in &mut mesh.half_edges {
        he.vertex = map[he.vertex as usize];
    }
    removed
}

// -----------------------------------------------------------------------------
// Shared rebuild machinery
// -----------------------------------------------------------------------------

/// Old-to-new index maps from a table rebuild. Removed rows map to
/// [`INVALID_INDEX`].
struct RemapTables {
    half_edges: Vec<u32>,
    polygons: Vec<u32>,
}

/// Rebuild the half-edge, polygon, and plane tables from per-polygon rings
/// of surviving old edge ids. An empty ring drops its polygon. Twin fields
/// are rewritten through the old-to-new map, which is handed back with the
/// polygon map.
fn rebuild_from_rings(
    mesh: &mut BrushMesh,
    rings: Vec<Vec<u32>>,
) -> Result<RemapTables, BrushError> {
    let old_edges = std::mem::take(&mut mesh.half_edges);
    let old_polygons = std::mem::take(&mut mesh.polygons);
    let old_planes = std::mem::take(&mut mesh.planes);

    let mut map = vec![INVALID_INDEX; old_edges.len()];
    let mut polygon_map = vec![INVALID_INDEX; old_polygons.len()];
    let mut edges = Vec::with_capacity(old_edges.len());
    let mut polygons = Vec::with_capacity(old_polygons.len());
    let mut planes = Vec::with_capacity(old_planes.len());
    for (p, ring) in rings.iter().enumerate() {
        if ring.is_empty() {
            continue;
        }
        let first_edge = edges.len() as u32;
        for &g in ring {
            map[g as usize] = edges.len() as u32;
            edges.push(old_edges[g as usize]);
        }
        polygon_map[p] = polygons.len() as u32;
        polygons.push(Polygon::new(
            first_edge,
            ring.len() as u32,
            old_polygons[p].surface,
        ));
        planes.push(old_planes[p]);
    }
    for he in &mut edges {
        let twin = map[he.twin as usize];
        if twin == INVALID_INDEX {
            let dangling = he.twin;
            // Restore enough state for the caller to inspect the failure.
            mesh.half_edges = old_edges;
            mesh.polygons = old_polygons;
            mesh.planes = old_planes;
            mesh.invalidate_cache();
            return Err(BrushError::DanglingTwin { twin: dangling });
        }
        he.twin = twin;
    }

    mesh.half_edges = edges;
    mesh.polygons = polygons;
    mesh.planes = planes;
    mesh.invalidate_cache();
    Ok(RemapTables {
        half_edges: map,
        polygons: polygon_map,
    })
}

/// Weld vertices within `epsilon` of each other onto the lowest-index
/// member of their cluster, rewriting destinations. Each surviving
/// representative moves to its cluster's mean position. Returns the number
/// of vertices redirected.
fn weld_vertices(mesh: &mut BrushMesh, epsilon: f64) -> usize {
    if mesh.vertices.len() < 2 || epsilon <= 0.0 {
        return 0;
    }
    let inv_cell = 1.0 / epsilon;
    let mut grid: HashMap<(i64, i64, i64), Vec<u32>> = HashMap::new();
    let mut map: Vec<u32> = (0..mesh.vertices.len() as u32).collect();
    let mut welded = 0usize;
    for v in 0..mesh.vertices.len() {
        let pos = mesh.vertices[v].as_dvec3();
        let cell = (
            (pos.x * inv_cell).floor() as i64,
            (pos.y * inv_cell).floor() as i64,
            (pos.z * inv_cell).floor() as i64,
        );
        let mut target = None;
        'search: for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let key = (cell.0 + dx, cell.1 + dy, cell.2 + dz);
                    if let Some(bucket) = grid.get(&key) {
                        for &other in bucket {
                            if (mesh.vertices[other as usize].as_dvec3() - pos).length()
                                <= epsilon
                            {
                                target = Some(other);
                                break 'search;
                            }
                        }
                    }
                }
            }
        }
        match target {
            Some(other) => {
                map[v] = other;
                welded += 1;
            }
            None => grid.entry(cell).or_default().push(v as u32),
        }
    }
    if welded == 0 {
        return 0;
    }
    // Sums accumulate in index order; identical inputs produce identical
    // means.
    let mut sums = vec![(DVec3::ZERO, 0u32); mesh.vertices.len()];
    for (v, &root) in map.iter().enumerate() {
        let entry = &mut sums[root as usize];
        entry.0 += mesh.vertices[v].as_dvec3();
        entry.1 += 1;
    }
    for (root, (sum, count)) in sums.into_iter().enumerate() {
        if count > 1 {
            mesh.vertices[root] = (sum / count as f64).as_vec3();
        }
    }
    for he in &mut mesh.half_edges {
        he.vertex = map[he.vertex as usize];
    }
    welded
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------


#[cfg(test)]
mod split_polygon_tests {
    use super::*;
    use crate::topology::half_edge::Surface;
    use crate::topology::validation::{ValidationOptions, validate_brush_mesh};

    fn cube() -> BrushMesh {
        BrushMesh::cube(1.0, Surface::default()).unwrap()
    }

    #[test]
    fn forward_ordering_carves_the_middle_arc() {
        let mut mesh = cube();
        let volume = mesh.signed_volume();
        let new_poly = split_polygon(&mut mesh, 0, 0, 2).unwrap();
        assert_eq!(new_poly, 6);
        assert_eq!(mesh.polygons.len(), 7);
        assert_eq!(mesh.planes.len(), 7);
        assert_eq!(mesh.half_edges.len(), 26);
        assert_eq!(mesh.polygons[0].edge_count, 3);
        assert_eq!(mesh.polygons[6].edge_count, 3);
        assert_eq!(mesh.polygons[6].surface, mesh.polygons[0].surface);
        assert_eq!(mesh.planes[6], mesh.planes[0]);
        validate_brush_mesh(&mesh, &ValidationOptions::all()).unwrap();
        assert!((mesh.signed_volume() - volume).abs() < 1e-9);
    }

    #[test]
    fn reverse_ordering_carves_the_wrapping_arc() {
        let mut mesh = cube();
        let volume = mesh.signed_volume();
        let new_poly = split_polygon(&mut mesh, 3, 2, 0).unwrap();
        assert_eq!(new_poly, 6);
        assert_eq!(mesh.polygons[3].edge_count, 3);
        assert_eq!(mesh.polygons[6].edge_count, 3);
        validate_brush_mesh(&mesh, &ValidationOptions::all()).unwrap();
        assert!((mesh.signed_volume() - volume).abs() < 1e-9);
    }

    #[test]
    fn chord_edges_twin_each_other() {
        let mut mesh = cube();
        let new_poly = split_polygon(&mut mesh, 0, 0, 2).unwrap();
        let kept = mesh.polygons[0];
        let added = mesh.polygons[new_poly as usize];
        let chord_keep = (kept.first_edge..kept.end_edge())
            .find(|&e| {
                let t = mesh.twin(e);
                t >= added.first_edge && t < added.end_edge()
            })
            .expect("kept ring references the new ring");
        let chord_new = mesh.twin(chord_keep);
        assert_eq!(mesh.twin(chord_new), chord_keep);
        assert_eq!(mesh.origin(chord_keep), mesh.destination(chord_new));
    }

    #[test]
    fn middle_polygon_split_shifts_later_ranges() {
        let mut mesh = cube();
        let ranges_before: Vec<u32> = mesh.polygons.iter().map(|p| p.first_edge).collect();
        split_polygon(&mut mesh, 2, 1, 3).unwrap();
        validate_brush_mesh(&mesh, &ValidationOptions::all()).unwrap();
        // Polygon 2 shrank by one stored edge, later ranges moved back by one.
        assert_eq!(mesh.polygons[3].first_edge, ranges_before[3] - 1);
        assert_eq!(mesh.polygons[5].first_edge, ranges_before[5] - 1);
    }

    #[test]
    fn adjacent_offsets_are_rejected() {
        let mut mesh = cube();
        assert!(matches!(
            split_polygon(&mut mesh, 0, 0, 1),
            Err(BrushError::InvalidPolygonSplit { .. })
        ));
        assert!(matches!(
            split_polygon(&mut mesh, 0, 2, 2),
            Err(BrushError::InvalidPolygonSplit { .. })
        ));
        assert!(matches!(
            split_polygon(&mut mesh, 0, 0, 7),
            Err(BrushError::RingOffsetOutOfBounds { .. })
        ));
    }
}



#[cfg(test)]
mod degenerate_tests {
    use super::*;
    use crate::topology::half_edge::Surface;
    use crate::topology::validation::{ValidationOptions, validate_brush_mesh};
    use glam::Vec3;

    #[test]
    fn coincident_corner_collapses_to_a_triangle_pair() {
        // A cube whose vertex 1 sits on vertex 0: the shared edge is
        // zero-length, its two incident quads become triangles.
        let mut mesh = BrushMesh::cube(1.0, Surface::default()).unwrap();
        mesh.vertices[1] = mesh.vertices[0];
        let report = remove_degenerate_topology(&mut mesh, 1e-5).unwrap();
        assert!(report.changed());
        assert_eq!(report.welded_vertices, 1);
        assert_eq!(report.removed_half_edges, 2);
        assert_eq!(report.removed_polygons, 0);
        assert_eq!(mesh.vertices.len(), 7);
        assert_eq!(mesh.half_edges.len(), 22);
        let counts: Vec<u32> = mesh.polygons.iter().map(|p| p.edge_count).collect();
        assert_eq!(counts.iter().filter(|&&c| c == 3).count(), 2);
        assert_eq!(counts.iter().filter(|&&c| c == 4).count(), 4);
        validate_brush_mesh(&mesh, &ValidationOptions::all()).unwrap();
    }

    #[test]
    fn sliver_pillow_collapses_to_nothing() {
        // Two triangles glued back to back with one pair of coincident
        // vertices: welding leaves two bigons that splice away completely.
        let vertices = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(5e-6, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
        ];
        let faces = [vec![0, 1, 2], vec![2, 1, 0]];
        let mut mesh = BrushMesh::from_polygons(vertices, &faces, Surface::default()).unwrap();
        let report = remove_degenerate_topology(&mut mesh, 1e-5).unwrap();
        assert!(report.changed());
        assert_eq!(report.welded_vertices, 1);
        assert_eq!(report.removed_polygons, 2);
        assert_eq!(report.removed_half_edges, 6);
        assert!(mesh.is_empty());
        assert!(mesh.vertices.is_empty());
    }

    #[test]
    fn clean_mesh_is_untouched() {
        let mut mesh = BrushMesh::cube(1.0, Surface::default()).unwrap();
        let report = remove_degenerate_topology(&mut mesh, 1e-5).unwrap();
        assert!(!report.changed());
        assert_eq!(mesh.half_edges.len(), 24);
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(report.half_edge_map, (0..24).collect::<Vec<u32>>());
        assert_eq!(report.polygon_map, (0..6).collect::<Vec<u32>>());
    }

    #[test]
    fn remap_tables_name_the_surviving_rows() {
        let mut mesh = BrushMesh::cube(1.0, Surface::default()).unwrap();
        mesh.vertices[1] = mesh.vertices[0];
        let report = remove_degenerate_topology(&mut mesh, 1e-5).unwrap();
        assert_eq!(report.half_edge_map.len(), 24);
        assert_eq!(report.polygon_map, (0..6).collect::<Vec<u32>>());

        let dropped = report
            .half_edge_map
            .iter()
            .filter(|&&m| m == INVALID_INDEX)
            .count();
        assert_eq!(dropped, report.removed_half_edges);

        // Survivors keep their relative order and densely fill the new
        // table.
        let survivors: Vec<u32> = report
            .half_edge_map
            .iter()
            .copied()
            .filter(|&m| m != INVALID_INDEX)
            .collect();
        assert_eq!(survivors.len(), mesh.half_edges.len());
        assert!(survivors.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn welded_cluster_lands_on_the_mean_position() {
        // Vertex 1 sits a hair off vertex 0: the pair welds onto index 0,
        // which moves to the midpoint.
        let mut mesh = BrushMesh::cube(1.0, Surface::default()).unwrap();
        let a = mesh.vertices[0];
        let b = a + Vec3::new(4e-6, 0.0, 0.0);
        mesh.vertices[1] = b;
        let report = remove_degenerate_topology(&mut mesh, 1e-5).unwrap();
        assert_eq!(report.welded_vertices, 1);
        let expected = (a + b) * 0.5;
        assert!((mesh.vertices[0] - expected).length() < 1e-6);
        validate_brush_mesh(&mesh, &ValidationOptions::all()).unwrap();
    }
}
