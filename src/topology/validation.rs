//! Brush mesh validation helpers.
//!
//! Validation fails closed: every enabled check runs, every failure can be
//! logged, and the first error is returned. Operations that require a sound
//! mesh (the cut engine, the blob codec) refuse to run when this fails.

use crate::brush_error::BrushError;
use crate::topology::brush_mesh::BrushMesh;
use crate::topology::half_edge::INVALID_INDEX;

/// Optional validation toggles for brush mesh checks.
#[derive(Debug, Clone, Copy)]
pub struct ValidationOptions {
    /// Log each failure with `log::warn!` before returning the first error.
    pub log_errors: bool,
    /// Reject empty vertex, half-edge, or polygon tables.
    ///
    /// Editing can legitimately empty a mesh, so the post-edit invariant
    /// re-checks leave this off.
    pub check_non_empty: bool,
    /// Ensure polygon ranges are ascending, disjoint, and in bounds.
    pub check_ranges: bool,
    /// Ensure twin links are symmetric, live, and never self-referential.
    pub check_twins: bool,
    /// Ensure rings chain origin-to-destination.
    pub check_ring_closure: bool,
    /// Ensure live ranges tile the half-edge table without gaps.
    ///
    /// Only holds after compaction; leave off for meshes carrying lazily
    /// deleted polygons.
    pub check_compact: bool,
    /// How to handle polygons whose stored plane is degenerate.
    pub degenerate_planes: DegeneratePlaneHandling,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            log_errors: false,
            check_non_empty: false,
            check_ranges: true,
            check_twins: true,
            check_ring_closure: true,
            check_compact: false,
            degenerate_planes: DegeneratePlaneHandling::Warn,
        }
    }
}

impl ValidationOptions {
    /// Enable every check, including the post-compaction tiling check.
    pub fn all() -> Self {
        Self {
            log_errors: true,
            check_non_empty: true,
            check_ranges: true,
            check_twins: true,
            check_ring_closure: true,
            check_compact: true,
            degenerate_planes: DegeneratePlaneHandling::Error,
        }
    }
}

/// Behavior for degenerate stored planes (near-zero normal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegeneratePlaneHandling {
    /// Skip the check.
    Ignore,
    /// Log a warning per degenerate plane.
    Warn,
    /// Return an error on the first degenerate plane.
    Error,
}

/// Validate the structural invariants of a brush mesh.
///
/// # Errors
/// Returns the first violation found among: empty tables (when enabled),
/// plane/polygon table mismatch, range bounds and ordering, twin symmetry
/// and liveness, vertex bounds, ring closure, and (optionally) table tiling
/// and degenerate planes.
pub fn validate_brush_mesh(
    mesh: &BrushMesh,
    options: &ValidationOptions,
) -> Result<(), BrushError> {
    let mut errors: Vec<BrushError> = Vec::new();

    if options.check_non_empty
        && (mesh.vertices.is_empty() || mesh.half_edges.is_empty() || mesh.polygons.is_empty())
    {
        errors.push(BrushError::EmptyMesh {
            vertices: mesh.vertices.len(),
            half_edges: mesh.half_edges.len(),
            polygons: mesh.polygons.len(),
        });
    }

    if mesh.planes.len() != mesh.polygons.len() {
        errors.push(BrushError::PlaneCountMismatch {
            planes: mesh.planes.len(),
            polygons: mesh.polygons.len(),
        });
    }

    if options.check_ranges {
        check_ranges(mesh, options.check_compact, &mut errors);
    }
    if options.check_twins {
        check_twins(mesh, &mut errors);
    }
    if options.check_ring_closure {
        check_ring_closure(mesh, &mut errors);
    }
    check_degenerate_planes(mesh, options.degenerate_planes, &mut errors);

    if options.log_errors {
        for err in &errors {
            log::warn!("mesh validation: {err}");
        }
    }
    match errors.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn check_ranges(mesh: &BrushMesh, check_compact: bool, errors: &mut Vec<BrushError>) {
    let len = mesh.half_edges.len();
    let mut prev_end = 0u32;
    for (p, poly) in mesh.polygons.iter().enumerate() {
        if poly.is_dead() {
            continue;
        }
        if poly.edge_count < 3 {
            errors.push(BrushError::PolygonTooSmall {
                polygon: p as u32,
                edge_count: poly.edge_count,
            });
            continue;
        }
        if poly.end_edge() as usize > len {
            errors.push(BrushError::PolygonRangeOutOfBounds {
                polygon: p as u32,
                first_edge: poly.first_edge,
                edge_count: poly.edge_count,
                len,
            });
            continue;
        }
        if poly.first_edge < prev_end {
            errors.push(BrushError::PolygonRangeOverlap {
                polygon: p as u32,
                previous_end: prev_end,
                first_edge: poly.first_edge,
            });
        } else if check_compact && poly.first_edge != prev_end {
            errors.push(BrushError::PolygonRangeOverlap {
                polygon: p as u32,
                previous_end: prev_end,
                first_edge: poly.first_edge,
            });
        }
        prev_end = prev_end.max(poly.end_edge());
    }
    if check_compact && (prev_end as usize) != len {
        // Trailing edges no polygon owns.
        errors.push(BrushError::PolygonRangeOutOfBounds {
            polygon: mesh.polygons.len() as u32,
            first_edge: prev_end,
            edge_count: 0,
            len,
        });
    }
}

fn check_twins(mesh: &BrushMesh, errors: &mut Vec<BrushError>) {
    let len = mesh.half_edges.len();
    let owners = mesh.edge_owner_cache();
    for poly in mesh.polygons.iter() {
        if poly.is_dead() || poly.end_edge() as usize > len {
            continue;
        }
        for e in poly.range() {
            let he = mesh.half_edges[e];
            if he.vertex as usize >= mesh.vertices.len() {
                errors.push(BrushError::VertexIndexOutOfBounds {
                    vertex: he.vertex,
                    len: mesh.vertices.len(),
                });
            }
            let t = he.twin;
            if t as usize >= len {
                errors.push(BrushError::EdgeIndexOutOfBounds {
                    edge: t,
                    len,
                });
                continue;
            }
            if t as usize == e {
                errors.push(BrushError::TwinSelfReference { edge: e as u32 });
                continue;
            }
            let back = mesh.half_edges[t as usize].twin;
            if back as usize != e {
                errors.push(BrushError::TwinAsymmetry {
                    edge: e as u32,
                    twin: t,
                    twin_twin: back,
                });
            }
            if owners[t as usize] == INVALID_INDEX {
                // Twin lives in unowned (deleted) storage.
                errors.push(BrushError::EdgeIndexOutOfBounds { edge: t, len });
            }
        }
    }
}

fn check_ring_closure(mesh: &BrushMesh, errors: &mut Vec<BrushError>) {
    let len = mesh.half_edges.len();
    for (p, poly) in mesh.polygons.iter().enumerate() {
        if poly.is_dead() || poly.end_edge() as usize > len {
            continue;
        }
        for e in poly.range() {
            let prev = mesh.ring_prev(poly, e as u32);
            let twin = mesh.half_edges[e].twin;
            if twin as usize >= len {
                continue; // reported by the twin check
            }
            let origin = mesh.half_edges[twin as usize].vertex;
            if origin != mesh.half_edges[prev as usize].vertex {
                errors.push(BrushError::RingNotClosed {
                    polygon: p as u32,
                    edge: e as u32,
                });
            }
        }
    }
}

fn check_degenerate_planes(
    mesh: &BrushMesh,
    handling: DegeneratePlaneHandling,
    errors: &mut Vec<BrushError>,
) {
    if handling == DegeneratePlaneHandling::Ignore {
        return;
    }
    for (p, poly) in mesh.polygons.iter().enumerate() {
        if poly.is_dead() || p >= mesh.planes.len() {
            continue;
        }
        let n = mesh.planes[p].normal;
        if n.length_squared() < 1e-12 {
            match handling {
                DegeneratePlaneHandling::Warn => {
                    log::warn!("polygon {p} carries a degenerate plane (normal {n})");
                }
                DegeneratePlaneHandling::Error => {
                    errors.push(BrushError::InvalidGeometry(format!(
                        "polygon {p} carries a degenerate plane (normal {n})"
                    )));
                }
                DegeneratePlaneHandling::Ignore => {}
            }
        }
    }
}

#[cfg(any(
    debug_assertions,
    feature = "strict-invariants",
    feature = "check-invariants"
))]
/// Debug-only structural validation (enabled in strict builds).
pub fn debug_validate_brush_mesh(mesh: &BrushMesh) -> Result<(), BrushError> {
    validate_brush_mesh(mesh, &ValidationOptions::default())
}

#[cfg(not(any(
    debug_assertions,
    feature = "strict-invariants",
    feature = "check-invariants"
)))]
/// No-op structural validation for release builds.
pub fn debug_validate_brush_mesh(_mesh: &BrushMesh) -> Result<(), BrushError> {
    Ok(())
}
