//! # brush-carve
//!
//! brush-carve is a half-edge brush-mesh library for constructive level
//! geometry. It provides flat-table mesh topology with lazy deletion,
//! invariant-checked editing primitives, a deterministic plane-cut engine
//! with cap stitching, relocatable blob serialization, and a
//! content-addressed mesh registry.
//!
//! ## Features
//! - `BrushMesh`: four parallel tables (vertices, half-edges, polygons,
//!   planes) where ring order is the storage order and an edge's origin is
//!   its twin's destination
//! - Editing primitives (`split_half_edge`, `split_polygon`, `remove_edge`,
//!   compaction, degenerate removal, inversion) that keep twin symmetry and
//!   range tiling intact
//! - `CutEngine`: clip against plane stacks, cap the openings, flood-fill
//!   away the discarded side
//! - Relocatable blobs: position-independent images built by a two-phase
//!   arena and read in place through bounds-checked relative accessors
//! - `MeshRegistry`: content-hash keyed, reference-counted blob store
//!
//! ## Determinism
//!
//! Identical inputs produce identical meshes, content hashes, and blob
//! images: cut traversal order, arena layout, and hashing are all fully
//! specified. Debug builds (and the `check-invariants` feature) re-verify
//! the topology invariants after every mutating operation.
//!
//! ## Usage
//! Add `brush-carve` as a dependency in your `Cargo.toml` and enable
//! features as needed:
//!
//! ```toml
//! [dependencies]
//! brush-carve = "0.3"
//! # Optional features:
//! # features = ["check-invariants","strict-invariants"]
//! ```

// Re-export our major subsystems:
pub mod algs;
pub mod brush_error;
pub mod data;
pub mod debug_invariants;
pub mod geometry;
pub mod topology;

pub use brush_error::BrushError;
pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::cut::{CutConfig, CutEngine, cut};
    pub use crate::brush_error::BrushError;
    pub use crate::data::arena::BlobArena;
    pub use crate::data::blob::BlobAsset;
    pub use crate::data::registry::{MeshRegistry, RegistryObserver};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::geometry::plane::Plane;
    pub use crate::topology::brush_mesh::BrushMesh;
    pub use crate::topology::cache::InvalidateCache;
    pub use crate::topology::edit::{
        compact_half_edges, invert, remove_degenerate_topology, remove_edge, remove_unused_vertices,
        split_half_edge, split_polygon,
    };
    pub use crate::topology::half_edge::{BrushMeshKey, HalfEdge, Polygon, Surface, SurfaceFlags};
    pub use crate::topology::validation::{ValidationOptions, validate_brush_mesh};
}
