//! Core half-edge records for brush meshes.
//!
//! A brush mesh stores per half-edge only the destination vertex and the
//! index of its twin. There are no next/prev links: ring order is implicit
//! in the owning polygon's contiguous half-edge range, and the origin of a
//! half-edge is recovered as the destination of its twin.
//!
//! This module provides:
//! - The flat `HalfEdge` and `Polygon` records the mesh tables are made of.
//! - `Surface`, the plain value metadata carried per polygon.
//! - `BrushMeshKey`, the non-zero content-hash key used by the registry,
//!   with the same layout guarantees as a raw `u64`.

use std::{fmt, num::NonZeroU64};

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Sentinel index used while twin links are still being matched up.
///
/// Never present in a validated mesh.
pub const INVALID_INDEX: u32 = u32::MAX;

/// A half-edge: destination vertex plus twin index.
///
/// The oppositely oriented partner lives in the neighboring polygon;
/// `half_edges[half_edges[e].twin].twin == e` holds for every live edge.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct HalfEdge {
    /// Destination vertex index.
    pub vertex: u32,
    /// Index of the twin half-edge.
    pub twin: u32,
}

impl HalfEdge {
    #[inline]
    pub const fn new(vertex: u32, twin: u32) -> Self {
        Self { vertex, twin }
    }
}

bitflags! {
    /// Per-polygon surface behavior toggles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SurfaceFlags: u32 {
        /// No flags.
        const NONE = 0;
        /// Surface is skipped by renderers.
        const NO_RENDER = 1 << 0;
        /// Surface generates no collision geometry.
        const NO_COLLISION = 1 << 1;
        /// Surface casts shadows.
        const CAST_SHADOWS = 1 << 2;
        /// Surface is visible from both sides.
        const DOUBLE_SIDED = 1 << 3;
    }
}

/// Flags serialize as their raw bit pattern.
impl Serialize for SurfaceFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for SurfaceFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(SurfaceFlags::from_bits_retain)
    }
}

/// Plain value metadata carried by every polygon.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Surface {
    pub material: u32,
    pub flags: SurfaceFlags,
    pub smoothing_group: u32,
}

impl Surface {
    #[inline]
    pub const fn with_material(material: u32) -> Self {
        Self {
            material,
            flags: SurfaceFlags::NONE,
            smoothing_group: 0,
        }
    }
}

/// A polygon: a contiguous range of half-edges plus its surface.
///
/// Ranges across the polygon table are ascending and disjoint. A live
/// polygon has `edge_count >= 3`; `edge_count == 0` marks a lazily deleted
/// polygon awaiting compaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polygon {
    pub first_edge: u32,
    pub edge_count: u32,
    pub surface: Surface,
}

impl Polygon {
    #[inline]
    pub const fn new(first_edge: u32, edge_count: u32, surface: Surface) -> Self {
        Self {
            first_edge,
            edge_count,
            surface,
        }
    }

    /// Half-edge index range owned by this polygon.
    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.first_edge as usize..(self.first_edge + self.edge_count) as usize
    }

    /// One past the last owned half-edge index.
    #[inline]
    pub const fn end_edge(&self) -> u32 {
        self.first_edge + self.edge_count
    }

    /// Lazily deleted, waiting for `compact_half_edges`.
    #[inline]
    pub const fn is_dead(&self) -> bool {
        self.edge_count == 0
    }
}

/// Content-hash key for registered brush meshes.
///
/// Wraps a nonzero `u64` so that 0 stays reserved as the "no mesh" sentinel;
/// `Option<BrushMeshKey>` is exactly as large as a raw `u64`.
///
/// # Memory layout
/// This type is `repr(transparent)`: same ABI and alignment as `u64`.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct BrushMeshKey(NonZeroU64);

impl BrushMeshKey {
    /// Creates a key from a raw `u64` value.
    ///
    /// # Panics
    ///
    /// Panics if `raw == 0`. We reserve 0 as the "no mesh" sentinel.
    #[inline]
    pub fn new(raw: u64) -> Self {
        BrushMeshKey(NonZeroU64::new(raw).expect("BrushMeshKey must be non-zero"))
    }

    /// Creates a key from a content hash, remapping the (vanishingly rare)
    /// zero hash to a fixed nonzero value.
    #[inline]
    pub const fn from_hash(hash: u64) -> Self {
        match NonZeroU64::new(hash) {
            Some(nz) => BrushMeshKey(nz),
            None => BrushMeshKey(NonZeroU64::MAX),
        }
    }

    /// Returns the inner `u64` value of this key.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

// -----------------------------------------------------------------------------
// Formatting traits
// -----------------------------------------------------------------------------

impl fmt::Debug for BrushMeshKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BrushMeshKey").field(&self.get()).finish()
    }
}

/// Prints the key as its raw hexadecimal hash.
impl fmt::Display for BrushMeshKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.get())
    }
}

// -----------------------------------------------------------------------------
// Testing and assertions
// -----------------------------------------------------------------------------


#[cfg(test)]
mod key_tests {
    use super::*;

    #[test]
    fn new_zero_panics() {
        assert!(std::panic::catch_unwind(|| BrushMeshKey::new(0)).is_err());
    }

    #[test]
    fn new_and_get() {
        let k = BrushMeshKey::new(42);
        assert_eq!(k.get(), 42);
    }

    #[test]
    fn zero_hash_is_remapped() {
        let k = BrushMeshKey::from_hash(0);
        assert_ne!(k.get(), 0);
        assert_eq!(BrushMeshKey::from_hash(7).get(), 7);
    }

    #[test]
    fn debug_and_display() {
        let k = BrushMeshKey::new(7);
        assert_eq!(format!("{:?}", k), "BrushMeshKey(7)");
        assert_eq!(format!("{}", k), "0x0000000000000007");
    }

    #[test]
    fn ordering_and_hash() {
        let a = BrushMeshKey::new(1);
        let b = BrushMeshKey::new(2);
        assert!(a < b);
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 2);
    }
}

#[cfg(test)]
mod serde_tests {
    use super::*;

    #[test]
    fn key_json_roundtrip() {
        let k = BrushMeshKey::new(123);
        let s = serde_json::to_string(&k).unwrap();
        let k2: BrushMeshKey = serde_json::from_str(&s).unwrap();
        assert_eq!(k2, k);
    }

    #[test]
    fn surface_json_roundtrip() {
        let s = Surface {
            material: 3,
            flags: SurfaceFlags::NO_RENDER | SurfaceFlags::DOUBLE_SIDED,
            smoothing_group: 1,
        };
        let json = serde_json::to_string(&s).unwrap();
        let s2: Surface = serde_json::from_str(&json).unwrap();
        assert_eq!(s2, s);
    }
}

#[cfg(test)]
mod abi_tests {
    use super::*;
    use static_assertions::{assert_eq_align, assert_eq_size};

    #[test]
    fn key_matches_u64() {
        assert_eq_align!(BrushMeshKey, u64);
        assert_eq_size!(BrushMeshKey, u64);
    }

    #[test]
    fn half_edge_is_two_words() {
        assert_eq_align!(HalfEdge, u32);
        assert_eq_size!(HalfEdge, u64);
    }
}

#[cfg(test)]
mod polygon_tests {
    use super::*;

    #[test]
    fn range_and_liveness() {
        let p = Polygon::new(4, 3, Surface::default());
        assert_eq!(p.range(), 4..7);
        assert_eq!(p.end_edge(), 7);
        assert!(!p.is_dead());
        let dead = Polygon::new(4, 0, Surface::default());
        assert!(dead.is_dead());
    }

    #[test]
    fn surface_flag_bits_roundtrip() {
        let f = SurfaceFlags::NO_COLLISION | SurfaceFlags::CAST_SHADOWS;
        assert_eq!(SurfaceFlags::from_bits_retain(f.bits()), f);
    }
}
