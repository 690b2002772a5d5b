//! `BrushMesh`: flat half-edge storage for brush polyhedra.
//!
//! The mesh is four parallel tables: vertices, half-edges, polygons, and one
//! plane per polygon (same index). Polygons own contiguous, ascending
//! half-edge ranges, so the usual next/prev links are unnecessary; ring order
//! is the range order and the origin of an edge is its twin's destination.
//!
//! A derived reverse index (owning polygon per half-edge) is cached lazily
//! and invalidated by every topological mutation, in the same discipline the
//! edit and cut modules rely on.

use ahash::AHasher;
use glam::{DVec3, Vec3};
use hashbrown::HashMap;
use once_cell::sync::OnceCell;
use std::hash::Hasher;

use crate::brush_error::BrushError;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::plane::{self, Plane};
use crate::topology::cache::InvalidateCache;
use crate::topology::half_edge::{HalfEdge, INVALID_INDEX, Polygon, Surface};
use crate::topology::validation::{self, ValidationOptions};

/// Ring deviation from its fitted plane above which a warning is logged.
const PLANE_RESIDUAL_WARN: f64 = 1e-3;

/// A brush polyhedron as flat half-edge tables.
#[derive(Clone, Debug, Default)]
pub struct BrushMesh {
    /// Vertex positions.
    pub vertices: Vec<Vec3>,
    /// Half-edge records; ring order is implicit in polygon ranges.
    pub half_edges: Vec<HalfEdge>,
    /// Polygons owning ascending, disjoint half-edge ranges.
    pub polygons: Vec<Polygon>,
    /// One outward-facing plane per polygon, same index.
    pub planes: Vec<Plane>,
    /// Cached owning-polygon index per half-edge.
    edge_owner: OnceCell<Vec<u32>>,
}

impl BrushMesh {
    /// Creates a new, empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the mesh has no live polygons.
    pub fn is_empty(&self) -> bool {
        self.polygons.iter().all(|p| p.is_dead())
    }

    /// Number of live (not lazily deleted) polygons.
    pub fn live_polygon_count(&self) -> usize {
        self.polygons.iter().filter(|p| !p.is_dead()).count()
    }

    // -------------------------------------------------------------------------
    // Ring navigation
    // -------------------------------------------------------------------------

    /// Destination vertex of `edge`.
    #[inline]
    pub fn destination(&self, edge: u32) -> u32 {
        self.half_edges[edge as usize].vertex
    }

    /// Twin of `edge`.
    #[inline]
    pub fn twin(&self, edge: u32) -> u32 {
        self.half_edges[edge as usize].twin
    }

    /// Origin vertex of `edge`, i.e. its twin's destination.
    #[inline]
    pub fn origin(&self, edge: u32) -> u32 {
        self.half_edges[self.twin(edge) as usize].vertex
    }

    /// Next edge within `polygon`'s ring, wrapping at the range end.
    #[inline]
    pub fn ring_next(&self, polygon: &Polygon, edge: u32) -> u32 {
        polygon.first_edge + (edge - polygon.first_edge + 1) % polygon.edge_count
    }

    /// Previous edge within `polygon`'s ring, wrapping at the range start.
    #[inline]
    pub fn ring_prev(&self, polygon: &Polygon, edge: u32) -> u32 {
        polygon.first_edge + (edge - polygon.first_edge + polygon.edge_count - 1) % polygon.edge_count
    }

    /// Vertex position widened to `f64` for geometric work.
    #[inline]
    pub fn vertex64(&self, vertex: u32) -> DVec3 {
        self.vertices[vertex as usize].as_dvec3()
    }

    /// Ring vertex positions of `polygon`, in ring order.
    pub fn ring_positions(&self, polygon: &Polygon) -> Vec<DVec3> {
        polygon
            .range()
            .map(|e| self.vertices[self.half_edges[e].vertex as usize].as_dvec3())
            .collect()
    }

    // -------------------------------------------------------------------------
    // Derived reverse index
    // -------------------------------------------------------------------------

    /// Owning polygon per half-edge, built lazily and cached.
    ///
    /// Slots not covered by any live polygon hold [`INVALID_INDEX`].
    pub fn edge_owner_cache(&self) -> &[u32] {
        self.edge_owner.get_or_init(|| {
            let mut owners = vec![INVALID_INDEX; self.half_edges.len()];
            for (p, poly) in self.polygons.iter().enumerate() {
                let end = (poly.end_edge() as usize).min(owners.len());
                let start = (poly.first_edge as usize).min(end);
                for slot in &mut owners[start..end] {
                    *slot = p as u32;
                }
            }
            owners
        })
    }

    /// Owning polygon of `edge`.
    #[inline]
    pub fn owner_of(&self, edge: u32) -> u32 {
        self.edge_owner_cache()[edge as usize]
    }

    // -------------------------------------------------------------------------
    // Geometry passes
    // -------------------------------------------------------------------------

    /// Recompute every live polygon's plane with Newell's method, `d` fitted
    /// through the ring centroid.
    ///
    /// Degenerate rings keep their previous plane and are logged; validation
    /// reports them separately.
    pub fn calculate_planes(&mut self) {
        self.planes.resize(self.polygons.len(), Plane::default());
        let mut ring = Vec::new();
        for p in 0..self.polygons.len() {
            let poly = self.polygons[p];
            if poly.is_dead() {
                continue;
            }
            ring.clear();
            ring.extend(
                poly.range()
                    .map(|e| self.vertices[self.half_edges[e].vertex as usize].as_dvec3()),
            );
            match Plane::from_ring(&ring) {
                Ok(plane) => {
                    let residual = plane.max_residual(&ring);
                    if residual > PLANE_RESIDUAL_WARN {
                        log::warn!(
                            "polygon {p} deviates from its fitted plane by {residual:.2e}"
                        );
                    }
                    self.planes[p] = plane;
                }
                Err(err) => {
                    log::warn!("keeping previous plane for polygon {p}: {err}");
                }
            }
        }
    }

    /// Snap every vertex onto the intersection of its incident planes.
    ///
    /// Exactly three incident planes solve directly; more than three average
    /// all finite triple intersections; fewer than three (or nothing finite)
    /// leave the vertex at its previous position.
    pub fn snap_vertices_to_planes(&mut self) {
        if self.polygons.is_empty() {
            return;
        }
        let mut incident: Vec<Vec<u32>> = vec![Vec::new(); self.vertices.len()];
        for (p, poly) in self.polygons.iter().enumerate() {
            for e in poly.range() {
                let v = self.half_edges[e].vertex as usize;
                if !incident[v].contains(&(p as u32)) {
                    incident[v].push(p as u32);
                }
            }
        }
        let mut planes = Vec::new();
        for (v, polys) in incident.iter().enumerate() {
            planes.clear();
            planes.extend(polys.iter().map(|&p| self.planes[p as usize]));
            if let Some(snapped) = plane::solve_vertex(&planes) {
                if snapped.is_finite() {
                    self.vertices[v] = snapped.as_vec3();
                }
            }
        }
    }

    /// Signed volume via the divergence theorem over ring fans.
    ///
    /// Positive for outward-wound meshes.
    pub fn signed_volume(&self) -> f64 {
        let mut volume = 0.0;
        for poly in &self.polygons {
            if poly.is_dead() {
                continue;
            }
            let range = poly.range();
            let base = self.vertices[self.half_edges[range.start].vertex as usize].as_dvec3();
            for e in range.start + 1..range.end - 1 {
                let a = self.vertices[self.half_edges[e].vertex as usize].as_dvec3();
                let b = self.vertices[self.half_edges[e + 1].vertex as usize].as_dvec3();
                volume += base.dot(a.cross(b));
            }
        }
        volume / 6.0
    }

    /// True when the mesh is wound inside-out (negative volume).
    ///
    /// Callers typically follow up with [`crate::topology::edit::invert`].
    pub fn is_inside_out(&self) -> bool {
        !self.is_empty() && self.signed_volume() < 0.0
    }

    /// Axis-aligned bounding box over the vertex table.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let (first, rest) = self.vertices.split_first()?;
        let mut min = *first;
        let mut max = *first;
        for v in rest {
            min = min.min(*v);
            max = max.max(*v);
        }
        Some((min, max))
    }

    /// Self-intersection detection is not implemented; always `false`.
    ///
    /// Kept as an explicit query so callers can see the gap rather than
    /// assume coverage from `validate`.
    pub fn is_self_intersecting(&self) -> bool {
        false
    }

    /// Order-sensitive 64-bit content hash over the four tables.
    ///
    /// Structurally identical meshes hash identically; any single-bit change
    /// to a vertex, edge, polygon or plane changes the result.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = AHasher::default();
        hasher.write_u64(self.vertices.len() as u64);
        hasher.write(bytemuck::cast_slice(&self.vertices));
        hasher.write_u64(self.half_edges.len() as u64);
        hasher.write(bytemuck::cast_slice(&self.half_edges));
        hasher.write_u64(self.polygons.len() as u64);
        for poly in &self.polygons {
            hasher.write_u32(poly.first_edge);
            hasher.write_u32(poly.edge_count);
            hasher.write_u32(poly.surface.material);
            hasher.write_u32(poly.surface.flags.bits());
            hasher.write_u32(poly.surface.smoothing_group);
        }
        hasher.write_u64(self.planes.len() as u64);
        hasher.write(bytemuck::cast_slice(&self.planes));
        hasher.finish()
    }

    /// Structural validation; logs every failure before returning the first
    /// error when `log_errors` is set. An empty mesh fails the check, so
    /// callers that may hold an emptied mesh test [`BrushMesh::is_empty`]
    /// first.
    ///
    /// # Errors
    /// Returns the first invariant violation found; see
    /// [`crate::topology::validation`] for the full check list.
    pub fn validate(&self, log_errors: bool) -> Result<(), BrushError> {
        let options = ValidationOptions {
            log_errors,
            check_non_empty: true,
            ..ValidationOptions::default()
        };
        validation::validate_brush_mesh(self, &options)
    }

    // -------------------------------------------------------------------------
    // Authoring
    // -------------------------------------------------------------------------

    /// Build a mesh from polygon soup: faces list vertex indices in ring
    /// order, wound counter-clockwise seen from outside.
    ///
    /// Twins are matched through a directed-edge map; planes are fitted on
    /// the way out.
    ///
    /// # Errors
    /// - [`BrushError::PolygonTooSmall`] for faces under 3 vertices.
    /// - [`BrushError::VertexIndexOutOfBounds`] for out-of-range indices.
    /// - [`BrushError::DuplicateDirectedEdge`] when two faces share a
    ///   directed edge (non-manifold input).
    /// - [`BrushError::UnmatchedEdge`] when an edge has no opposite (open or
    ///   inconsistently wound input).
    pub fn from_polygons(
        vertices: Vec<Vec3>,
        faces: &[Vec<u32>],
        surface: Surface,
    ) -> Result<Self, BrushError> {
        let mut mesh = Self {
            vertices,
            ..Self::default()
        };
        let mut directed: HashMap<(u32, u32), u32> = HashMap::new();
        for face in faces {
            if face.len() < 3 {
                return Err(BrushError::PolygonTooSmall {
                    polygon: mesh.polygons.len() as u32,
                    edge_count: face.len() as u32,
                });
            }
            let first_edge = mesh.half_edges.len() as u32;
            for (k, &origin) in face.iter().enumerate() {
                let dest = face[(k + 1) % face.len()];
                for v in [origin, dest] {
                    if v as usize >= mesh.vertices.len() {
                        return Err(BrushError::VertexIndexOutOfBounds {
                            vertex: v,
                            len: mesh.vertices.len(),
                        });
                    }
                }
                if directed.insert((origin, dest), first_edge + k as u32).is_some() {
                    return Err(BrushError::DuplicateDirectedEdge {
                        from: origin,
                        to: dest,
                    });
                }
                mesh.half_edges.push(HalfEdge::new(dest, INVALID_INDEX));
            }
            mesh.polygons
                .push(Polygon::new(first_edge, face.len() as u32, surface));
        }
        for (&(origin, dest), &e) in directed.iter() {
            let Some(&t) = directed.get(&(dest, origin)) else {
                return Err(BrushError::UnmatchedEdge {
                    from: origin,
                    to: dest,
                });
            };
            mesh.half_edges[e as usize].twin = t;
        }
        mesh.calculate_planes();
        mesh.debug_assert_invariants();
        Ok(mesh)
    }

    /// Axis-aligned box between `min` and `max`.
    ///
    /// # Errors
    /// Returns [`BrushError::InvalidGeometry`] unless `min < max` on every
    /// axis.
    pub fn box_from_bounds(min: Vec3, max: Vec3, surface: Surface) -> Result<Self, BrushError> {
        if !(min.x < max.x && min.y < max.y && min.z < max.z) {
            return Err(BrushError::InvalidGeometry(format!(
                "box needs min < max per axis, got {min} .. {max}"
            )));
        }
        let vertices = vec![
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, max.y, max.z),
            Vec3::new(min.x, max.y, max.z),
        ];
        let faces = [
            vec![0, 3, 2, 1], // z = min
            vec![4, 5, 6, 7], // z = max
            vec![0, 1, 5, 4], // y = min
            vec![2, 3, 7, 6], // y = max
            vec![0, 4, 7, 3], // x = min
            vec![1, 2, 6, 5], // x = max
        ];
        Self::from_polygons(vertices, &faces, surface)
    }

    /// Cube centered on the origin with the given half extent.
    ///
    /// # Errors
    /// Returns [`BrushError::InvalidGeometry`] for a non-positive extent.
    pub fn cube(half_extent: f32, surface: Surface) -> Result<Self, BrushError> {
        Self::box_from_bounds(Vec3::splat(-half_extent), Vec3::splat(half_extent), surface)
    }
}

impl InvalidateCache for BrushMesh {
    #[inline]
    fn invalidate_cache(&mut self) {
        self.edge_owner.take();
    }
}

impl DebugInvariants for BrushMesh {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "BrushMesh invalid");
    }

    fn validate_invariants(&self) -> Result<(), BrushError> {
        validation::validate_brush_mesh(self, &ValidationOptions::default())
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod builder_tests {
    use super::*;

    #[test]
    fn cube_tables_line_up() {
        let cube = BrushMesh::cube(1.0, Surface::default()).unwrap();
        assert_eq!(cube.vertices.len(), 8);
        assert_eq!(cube.half_edges.len(), 24);
        assert_eq!(cube.polygons.len(), 6);
        assert_eq!(cube.planes.len(), 6);
        cube.validate(true).unwrap();
    }

    #[test]
    fn cube_twins_are_symmetric() {
        let cube = BrushMesh::cube(1.0, Surface::default()).unwrap();
        for e in 0..cube.half_edges.len() as u32 {
            let t = cube.twin(e);
            assert_ne!(t, e);
            assert_eq!(cube.twin(t), e);
            assert_eq!(cube.origin(e), cube.destination(t));
        }
    }

    #[test]
    fn cube_planes_face_outward() {
        let cube = BrushMesh::cube(1.0, Surface::default()).unwrap();
        for plane in &cube.planes {
            assert!(plane.signed_distance(DVec3::ZERO) < 0.0);
        }
        assert!(!cube.is_inside_out());
        assert!(!cube.is_self_intersecting());
    }

    #[test]
    fn cube_volume_and_bounds() {
        let cube = BrushMesh::cube(1.0, Surface::default()).unwrap();
        assert!((cube.signed_volume() - 8.0).abs() < 1e-9);
        let (min, max) = cube.bounds().unwrap();
        assert_eq!(min, Vec3::splat(-1.0));
        assert_eq!(max, Vec3::splat(1.0));
    }

    #[test]
    fn open_soup_is_rejected() {
        let vertices = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        let faces = [vec![0, 1, 2]];
        assert!(matches!(
            BrushMesh::from_polygons(vertices, &faces, Surface::default()),
            Err(BrushError::UnmatchedEdge { .. })
        ));
    }

    #[test]
    fn repeated_directed_edge_is_rejected() {
        let vertices = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z];
        let faces = [vec![0, 1, 2], vec![0, 1, 3]];
        assert!(matches!(
            BrushMesh::from_polygons(vertices, &faces, Surface::default()),
            Err(BrushError::DuplicateDirectedEdge { from: 0, to: 1 })
        ));
    }

    #[test]
    fn degenerate_box_is_rejected() {
        assert!(BrushMesh::box_from_bounds(Vec3::ZERO, Vec3::ZERO, Surface::default()).is_err());
        assert!(BrushMesh::cube(0.0, Surface::default()).is_err());
    }
}



#[cfg(test)]
mod hash_tests {
    use super::*;

    #[test]
    fn identical_meshes_hash_identically() {
        let a = BrushMesh::cube(1.0, Surface::default()).unwrap();
        let b = BrushMesh::cube(1.0, Surface::default()).unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn vertex_nudge_changes_hash() {
        let a = BrushMesh::cube(1.0, Surface::default()).unwrap();
        let mut b = a.clone();
        b.vertices[0].x = f32::from_bits(b.vertices[0].x.to_bits() ^ 1);
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn surface_change_changes_hash() {
        let a = BrushMesh::cube(1.0, Surface::default()).unwrap();
        let b = BrushMesh::cube(1.0, Surface::with_material(7)).unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
