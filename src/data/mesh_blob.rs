//! Blob codec for [`BrushMesh`].
//!
//! The wire image is a [`MeshBlobRoot`] directory at payload offset 0 whose
//! array fields point at the four mesh tables. Vertices, half-edges, and
//! planes are cast straight from their in-memory records; polygons go through
//! [`PolygonRecord`] so the surface metadata is stored flat.

use glam::Vec3;

use crate::brush_error::BrushError;
use crate::data::arena::BlobArena;
use crate::data::blob::BlobAsset;
use crate::geometry::plane::Plane;
use crate::topology::brush_mesh::BrushMesh;
use crate::topology::half_edge::{HalfEdge, Polygon, Surface, SurfaceFlags};

/// Array field on the wire: self-relative offset plus element count.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ArrayField {
    pub offset: i32,
    pub count: u32,
}

/// Root directory of a serialized mesh.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshBlobRoot {
    pub vertices: ArrayField,
    pub half_edges: ArrayField,
    pub polygons: ArrayField,
    pub planes: ArrayField,
}

/// Polygon as stored in a blob, surface metadata inlined.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PolygonRecord {
    pub first_edge: u32,
    pub edge_count: u32,
    pub material: u32,
    pub flags_bits: u32,
    pub smoothing_group: u32,
}

impl From<&Polygon> for PolygonRecord {
    fn from(polygon: &Polygon) -> Self {
        Self {
            first_edge: polygon.first_edge,
            edge_count: polygon.edge_count,
            material: polygon.surface.material,
            flags_bits: polygon.surface.flags.bits(),
            smoothing_group: polygon.surface.smoothing_group,
        }
    }
}

impl PolygonRecord {
    /// Unknown flag bits are retained, matching the flags' serde behavior.
    pub fn to_polygon(&self) -> Polygon {
        Polygon {
            first_edge: self.first_edge,
            edge_count: self.edge_count,
            surface: Surface {
                material: self.material,
                flags: SurfaceFlags::from_bits_retain(self.flags_bits),
                smoothing_group: self.smoothing_group,
            },
        }
    }
}

impl BrushMesh {
    /// Serializes this mesh into a relocatable blob.
    ///
    /// # Errors
    /// Refuses an invalid mesh with its validation error; propagates arena
    /// failures for oversized tables.
    pub fn to_blob(&self) -> Result<BlobAsset, BrushError> {
        self.validate(false)?;
        let mut arena = BlobArena::new();
        let root = arena.alloc_struct::<MeshBlobRoot>()?;
        if !self.vertices.is_empty() {
            let table = arena.alloc_slice(self.vertices.as_slice())?;
            arena.write_array_field(
                root,
                std::mem::offset_of!(MeshBlobRoot, vertices),
                table,
                self.vertices.len() as u32,
            )?;
        }
        if !self.half_edges.is_empty() {
            let table = arena.alloc_slice(self.half_edges.as_slice())?;
            arena.write_array_field(
                root,
                std::mem::offset_of!(MeshBlobRoot, half_edges),
                table,
                self.half_edges.len() as u32,
            )?;
        }
        if !self.polygons.is_empty() {
            let records: Vec<PolygonRecord> =
                self.polygons.iter().map(PolygonRecord::from).collect();
            let table = arena.alloc_slice(records.as_slice())?;
            arena.write_array_field(
                root,
                std::mem::offset_of!(MeshBlobRoot, polygons),
                table,
                records.len() as u32,
            )?;
        }
        if !self.planes.is_empty() {
            let table = arena.alloc_slice(self.planes.as_slice())?;
            arena.write_array_field(
                root,
                std::mem::offset_of!(MeshBlobRoot, planes),
                table,
                self.planes.len() as u32,
            )?;
        }
        arena.finalize()
    }

    /// Decodes a mesh from a blob and validates the full topology.
    ///
    /// # Errors
    /// Propagates blob access failures (null handle, truncation, field
    /// bounds) and every mesh validation error, so a decoded mesh is always
    /// structurally sound.
    pub fn from_blob(blob: &BlobAsset) -> Result<Self, BrushError> {
        // Presence and size check for the directory itself.
        blob.root::<MeshBlobRoot>()?;
        let vertices = blob
            .read_array::<Vec3>(std::mem::offset_of!(MeshBlobRoot, vertices))?
            .to_vec();
        let half_edges = blob
            .read_array::<HalfEdge>(std::mem::offset_of!(MeshBlobRoot, half_edges))?
            .to_vec();
        let polygons: Vec<Polygon> = blob
            .read_array::<PolygonRecord>(std::mem::offset_of!(MeshBlobRoot, polygons))?
            .iter()
            .map(PolygonRecord::to_polygon)
            .collect();
        let planes = blob
            .read_array::<Plane>(std::mem::offset_of!(MeshBlobRoot, planes))?
            .to_vec();

        let mut mesh = BrushMesh::new();
        mesh.vertices = vertices;
        mesh.half_edges = half_edges;
        mesh.polygons = polygons;
        mesh.planes = planes;
        mesh.validate(false)?;
        Ok(mesh)
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod record_layout_tests {
    //! Compile-time assertions on the wire layout.
    use super::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<ArrayField>(), 8);
    const_assert_eq!(size_of::<MeshBlobRoot>(), 32);
    const_assert_eq!(size_of::<PolygonRecord>(), 20);
    const_assert_eq!(std::mem::offset_of!(MeshBlobRoot, vertices), 0);
    const_assert_eq!(std::mem::offset_of!(MeshBlobRoot, half_edges), 8);
    const_assert_eq!(std::mem::offset_of!(MeshBlobRoot, polygons), 16);
    const_assert_eq!(std::mem::offset_of!(MeshBlobRoot, planes), 24);

    #[test]
    fn polygon_record_round_trips_surface_bits() {
        let polygon = Polygon::new(
            12,
            4,
            Surface {
                material: 3,
                flags: SurfaceFlags::NO_COLLISION | SurfaceFlags::NO_RENDER,
                smoothing_group: 9,
            },
        );
        let record = PolygonRecord::from(&polygon);
        assert_eq!(record.to_polygon(), polygon);
    }
}
