//! BrushError: Unified error type for brush-carve public APIs
//!
//! This error type is used throughout the brush-carve library to provide
//! robust, non-panicking error handling for all public APIs.

use thiserror::Error;

/// Unified error type for brush-carve operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrushError {
    /// A half-edge's twin does not point back at it.
    #[error("twin asymmetry: half-edge {edge} has twin {twin}, but {twin}.twin is {twin_twin}")]
    TwinAsymmetry { edge: u32, twin: u32, twin_twin: u32 },
    /// A half-edge names itself as its own twin.
    #[error("half-edge {edge} is its own twin")]
    TwinSelfReference { edge: u32 },
    /// A half-edge index is outside the half-edge table.
    #[error("half-edge index {edge} out of bounds (table has {len} entries)")]
    EdgeIndexOutOfBounds { edge: u32, len: usize },
    /// A vertex index is outside the vertex table.
    #[error("vertex index {vertex} out of bounds (table has {len} entries)")]
    VertexIndexOutOfBounds { vertex: u32, len: usize },
    /// A polygon index is outside the polygon table.
    #[error("polygon index {polygon} out of bounds (table has {len} entries)")]
    PolygonIndexOutOfBounds { polygon: u32, len: usize },
    /// A live polygon has fewer than three half-edges.
    #[error("polygon {polygon} has {edge_count} half-edges; a live polygon needs at least 3")]
    PolygonTooSmall { polygon: u32, edge_count: u32 },
    /// A polygon's half-edge range runs past the half-edge table.
    #[error(
        "polygon {polygon} range [{first_edge}, {first_edge}+{edge_count}) exceeds table of {len}"
    )]
    PolygonRangeOutOfBounds {
        polygon: u32,
        first_edge: u32,
        edge_count: u32,
        len: usize,
    },
    /// Polygon ranges are not ascending and disjoint.
    #[error("polygon {polygon} starts at {first_edge}, before the previous range end {previous_end}")]
    PolygonRangeOverlap {
        polygon: u32,
        previous_end: u32,
        first_edge: u32,
    },
    /// Ring edges do not chain origin-to-destination.
    #[error("polygon {polygon} ring is not closed at half-edge {edge}")]
    RingNotClosed { polygon: u32, edge: u32 },
    /// The plane table and polygon table have different lengths.
    #[error("plane table has {planes} entries for {polygons} polygons")]
    PlaneCountMismatch { planes: usize, polygons: usize },
    /// A vertex, half-edge, or polygon table is empty.
    #[error("mesh has empty tables: {vertices} vertices, {half_edges} half-edges, {polygons} polygons")]
    EmptyMesh {
        vertices: usize,
        half_edges: usize,
        polygons: usize,
    },
    /// A ring-relative edge offset is outside the polygon's ring.
    #[error("ring offset {offset} out of bounds for polygon {polygon} with {edge_count} edges")]
    RingOffsetOutOfBounds {
        polygon: u32,
        offset: u32,
        edge_count: u32,
    },
    /// The two split offsets do not describe a valid chord.
    #[error("cannot split polygon {polygon} between ring offsets {index_out} and {index_in}")]
    InvalidPolygonSplit {
        polygon: u32,
        index_out: u32,
        index_in: u32,
    },
    /// Removing this edge would not leave a mergeable polygon pair.
    #[error("cannot remove half-edge {edge}: {reason}")]
    EdgeNotRemovable { edge: u32, reason: &'static str },
    /// The half-edge is not inside any live polygon's range.
    #[error("half-edge {edge} is not owned by a live polygon")]
    EdgeNotOwned { edge: u32 },
    /// A rebuild dropped one side of a twin pair without re-pointing the other.
    #[error("half-edge twin {twin} was removed but is still referenced")]
    DanglingTwin { twin: u32 },
    /// A directed edge appeared twice while building from polygon soup.
    #[error("directed edge {from}->{to} appears in two faces; mesh is non-manifold")]
    DuplicateDirectedEdge { from: u32, to: u32 },
    /// A directed edge has no opposite while building from polygon soup.
    #[error("directed edge {from}->{to} has no opposite; mesh is open or inconsistently wound")]
    UnmatchedEdge { from: u32, to: u32 },

    /// A polygon ring crossed the cutting plane an odd number of times.
    #[error("polygon {polygon} crosses the cutting plane {crossings} times; crossings must pair up")]
    OddCrossingCount { polygon: u32, crossings: usize },
    /// Cap stitching could not find a continuation edge at a vertex.
    #[error("cap stitching stuck at vertex {vertex}: no unused boundary edge starts there")]
    CapStitchFailed { vertex: u32 },

    /// Invalid geometric configuration, e.g. all ring vertices collinear.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Finalizing an arena that never received a root allocation.
    #[error("blob arena has no root allocation to finalize")]
    ArenaEmpty,
    /// An allocation id is outside the arena's allocation list.
    #[error("allocation id {alloc} out of bounds (arena has {len} allocations)")]
    AllocationIndexOutOfBounds { alloc: u32, len: usize },
    /// A field write does not fit inside its allocation.
    #[error("field at offset {offset}+{len} does not fit allocation {alloc} of size {size}")]
    FieldOutsideAllocation {
        alloc: u32,
        offset: u32,
        len: u32,
        size: u32,
    },
    /// The finished payload exceeds what relative `i32` offsets can address.
    #[error("blob payload of {len} bytes exceeds the addressable maximum of {max}")]
    BlobTooLarge { len: usize, max: usize },

    /// The blob's validation tag does not match.
    #[error("blob validation tag mismatch: found {found:#018x}")]
    BlobValidationTag { found: u64 },
    /// The blob buffer is shorter than its layout requires.
    #[error("blob truncated: expected {expected} bytes, found {found}")]
    BlobTruncated { expected: usize, found: usize },
    /// A relative field resolves outside the payload.
    #[error("blob field at payload offset {field} resolves to [{start}, {end}) outside payload of {len}")]
    BlobFieldOutOfBounds {
        field: usize,
        start: i64,
        end: i64,
        len: usize,
    },
    /// A typed view of blob bytes failed (alignment or size).
    #[error("blob cast failed while reading {context}")]
    BlobCastFailed { context: &'static str },
    /// Accessor called on the null blob sentinel.
    #[error("operation on the null blob handle")]
    NullBlob,
    /// Dispose called on a snapshot-imported (read-only) blob.
    #[error("cannot dispose a snapshot-imported blob (allocator tag {tag})")]
    DisposeReadOnlyBlob { tag: u32 },
    /// Dispose called twice on the same blob storage.
    #[error("blob storage already disposed")]
    AlreadyDisposed,

    /// Registry lookup/acquire/release on a key with no entry.
    #[error("no registry entry for mesh key {key:#018x}")]
    UnknownMeshKey { key: u64 },
}
