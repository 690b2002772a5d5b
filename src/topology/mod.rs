//! Top-level module for brush mesh topology.
//!
//! This module provides the half-edge representation used throughout the
//! crate and the operations that keep it consistent:
//! - Flat `HalfEdge`/`Polygon`/`Surface` records and the `BrushMesh` tables
//! - Invariant-checked editing primitives (splits, merges, compaction)
//! - Structural validation with configurable strictness
//!
//! Most users will interact with [`BrushMesh`] directly and reach into
//! [`edit`] for topology surgery; the cut engine in [`crate::algs`] is built
//! entirely from these primitives.

pub mod brush_mesh;
pub mod cache;
pub mod edit;
pub mod half_edge;
pub mod validation;

pub use brush_mesh::BrushMesh;
pub use cache::InvalidateCache;
pub use half_edge::{BrushMeshKey, HalfEdge, Polygon, Surface, SurfaceFlags};
pub use validation::{ValidationOptions, validate_brush_mesh};
