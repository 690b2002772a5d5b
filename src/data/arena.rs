//! Two-phase blob construction.
//!
//! Scratch phase: [`BlobArena`] bump-allocates records out of fixed-size
//! chunks and keeps every allocation and pointer/array field write as an
//! index-based record. Nothing is resolved while building, so allocations can
//! be filled in any order.
//!
//! Finalize phase: allocations are laid out by prefix sum (16-byte aligned,
//! in scratch order), the recorded patches are applied in one sorted pass as
//! self-relative `i32` offsets, the payload is hashed, and the result is
//! wrapped in a [`BlobAsset`] behind the standard 32-byte header.

use std::hash::Hasher;

use ahash::AHasher;

use crate::brush_error::BrushError;
use crate::data::blob::{
    ALLOC_TAG_ARENA, BLOB_ALIGN, BLOB_HEADER_BYTES, BLOB_VALIDATION_TAG, BlobAsset, BlobHeader,
};
use crate::debug_invariants::DebugInvariants;

/// Default scratch chunk size.
pub const BLOB_CHUNK_BYTES: usize = 64 * 1024;

/// Largest payload self-relative `i32` fields can address.
pub const MAX_PAYLOAD_BYTES: usize = i32::MAX as usize;

/// Handle to one arena allocation. Only meaningful for the arena that
/// issued it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AllocId(u32);

/// Where an allocation lives in scratch storage.
#[derive(Copy, Clone, Debug)]
struct AllocRecord {
    chunk: u32,
    offset: u32,
    size: u32,
}

/// A pointer or array field awaiting resolution at finalize.
#[derive(Copy, Clone, Debug)]
struct PatchRecord {
    /// Allocation holding the field.
    alloc: u32,
    /// Byte offset of the field within that allocation.
    field_offset: u32,
    /// Allocation the field points at.
    target: u32,
    /// `Some(count)` for array fields, `None` for plain pointers.
    array_len: Option<u32>,
}

/// Bump allocator that finalizes into a relocatable blob.
///
/// The first allocation becomes the root struct at payload offset 0.
pub struct BlobArena {
    chunk_size: usize,
    chunks: Vec<Vec<u8>>,
    /// Chunk currently being bump-allocated, if any.
    bump: Option<usize>,
    cursor: usize,
    allocs: Vec<AllocRecord>,
    patches: Vec<PatchRecord>,
}

impl Default for BlobArena {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobArena {
    pub fn new() -> Self {
        Self::with_chunk_size(BLOB_CHUNK_BYTES)
    }

    /// An arena drawing from chunks of `chunk_size` bytes; allocations at or
    /// above that size get a dedicated chunk.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            chunks: Vec::new(),
            bump: None,
            cursor: 0,
            allocs: Vec::new(),
            patches: Vec::new(),
        }
    }

    pub fn allocation_count(&self) -> usize {
        self.allocs.len()
    }

    /// Reserves `size` zero-filled bytes and returns their handle.
    ///
    /// # Errors
    /// [`BrushError::BlobTooLarge`] when a single allocation exceeds what
    /// relative offsets can address.
    pub fn alloc_bytes(&mut self, size: usize) -> Result<AllocId, BrushError> {
        if size > MAX_PAYLOAD_BYTES {
            return Err(BrushError::BlobTooLarge {
                len: size,
                max: MAX_PAYLOAD_BYTES,
            });
        }
        let (chunk, offset) = if self.chunk_size == 0 || size >= self.chunk_size {
            self.chunks.push(vec![0u8; size]);
            (self.chunks.len() - 1, 0)
        } else {
            match self.bump {
                Some(chunk) if self.cursor + size <= self.chunks[chunk].len() => {
                    let offset = self.cursor;
                    self.cursor += size;
                    (chunk, offset)
                }
                _ => {
                    self.chunks.push(vec![0u8; self.chunk_size]);
                    let chunk = self.chunks.len() - 1;
                    self.bump = Some(chunk);
                    self.cursor = size;
                    (chunk, 0)
                }
            }
        };
        self.allocs.push(AllocRecord {
            chunk: chunk as u32,
            offset: offset as u32,
            size: size as u32,
        });
        Ok(AllocId(self.allocs.len() as u32 - 1))
    }

    /// Reserves a zeroed `T`.
    ///
    /// # Errors
    /// See [`BlobArena::alloc_bytes`].
    pub fn alloc_struct<T: bytemuck::Pod>(&mut self) -> Result<AllocId, BrushError> {
        self.alloc_bytes(size_of::<T>())
    }

    /// Reserves a copy of `data`.
    ///
    /// # Errors
    /// See [`BlobArena::alloc_bytes`].
    pub fn alloc_slice<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<AllocId, BrushError> {
        let id = self.alloc_bytes(std::mem::size_of_val(data))?;
        self.write_bytes(id, 0, bytemuck::cast_slice(data))?;
        Ok(id)
    }

    /// Writes a plain value into an allocation.
    ///
    /// # Errors
    /// Fails on a stale handle or a write outside the allocation.
    pub fn write<T: bytemuck::Pod>(
        &mut self,
        alloc: AllocId,
        offset: usize,
        value: T,
    ) -> Result<(), BrushError> {
        self.write_bytes(alloc, offset, bytemuck::bytes_of(&value))
    }

    /// Records an array field: at finalize, `field_offset` receives the
    /// relative offset of `target` followed by `count`.
    ///
    /// A field left unwritten stays zero, which readers treat as the empty
    /// array.
    ///
    /// # Errors
    /// Fails on stale handles or a field outside its allocation.
    pub fn write_array_field(
        &mut self,
        alloc: AllocId,
        field_offset: usize,
        target: AllocId,
        count: u32,
    ) -> Result<(), BrushError> {
        self.check_field(alloc, field_offset, 8)?;
        self.check_alloc(target)?;
        self.patches.push(PatchRecord {
            alloc: alloc.0,
            field_offset: field_offset as u32,
            target: target.0,
            array_len: Some(count),
        });
        Ok(())
    }

    /// Records a pointer field: at finalize, `field_offset` receives the
    /// relative offset of `target`.
    ///
    /// A field left unwritten stays zero, which readers treat as null.
    ///
    /// # Errors
    /// Fails on stale handles or a field outside its allocation.
    pub fn write_ptr_field(
        &mut self,
        alloc: AllocId,
        field_offset: usize,
        target: AllocId,
    ) -> Result<(), BrushError> {
        self.check_field(alloc, field_offset, 4)?;
        self.check_alloc(target)?;
        self.patches.push(PatchRecord {
            alloc: alloc.0,
            field_offset: field_offset as u32,
            target: target.0,
            array_len: None,
        });
        Ok(())
    }

    /// Lays out every allocation, applies the recorded patches, and seals the
    /// image behind a header. Consumes the arena.
    ///
    /// # Errors
    /// - [`BrushError::ArenaEmpty`] without a root allocation.
    /// - [`BrushError::BlobTooLarge`] when the laid-out payload exceeds what
    ///   relative offsets can address.
    pub fn finalize(self) -> Result<BlobAsset, BrushError> {
        self.debug_assert_invariants();
        if self.allocs.is_empty() {
            return Err(BrushError::ArenaEmpty);
        }

        // Records are pushed in ascending scratch order, so walking them in
        // order is the sorted layout pass.
        let mut finals = Vec::with_capacity(self.allocs.len());
        let mut cursor = 0u64;
        for record in &self.allocs {
            let base = cursor.next_multiple_of(BLOB_ALIGN as u64);
            finals.push(base);
            cursor = base + record.size as u64;
        }
        if cursor > MAX_PAYLOAD_BYTES as u64 {
            return Err(BrushError::BlobTooLarge {
                len: cursor as usize,
                max: MAX_PAYLOAD_BYTES,
            });
        }
        let payload_len = cursor as usize;

        let mut image = vec![0u8; BLOB_HEADER_BYTES + payload_len];
        for (record, &base) in self.allocs.iter().zip(&finals) {
            let src = &self.chunks[record.chunk as usize]
                [record.offset as usize..record.offset as usize + record.size as usize];
            let at = BLOB_HEADER_BYTES + base as usize;
            image[at..at + record.size as usize].copy_from_slice(src);
        }

        // One deterministic pass in ascending field order.
        let mut patches = self.patches;
        patches.sort_by_key(|p| (finals[p.alloc as usize], p.field_offset));
        for patch in &patches {
            let field = finals[patch.alloc as usize] + patch.field_offset as u64;
            let relative = finals[patch.target as usize] as i64 - field as i64;
            let at = BLOB_HEADER_BYTES + field as usize;
            image[at..at + 4].copy_from_slice(&(relative as i32).to_le_bytes());
            if let Some(count) = patch.array_len {
                image[at + 4..at + 8].copy_from_slice(&count.to_le_bytes());
            }
        }

        let mut hasher = AHasher::default();
        hasher.write(&image[BLOB_HEADER_BYTES..]);
        let header = BlobHeader {
            validation_tag: BLOB_VALIDATION_TAG,
            length: payload_len as u32,
            allocator_tag: ALLOC_TAG_ARENA,
            content_hash: hasher.finish(),
            padding: 0,
        };
        image[..BLOB_HEADER_BYTES].copy_from_slice(bytemuck::bytes_of(&header));
        Ok(BlobAsset::from_image(&image))
    }

    fn write_bytes(
        &mut self,
        alloc: AllocId,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), BrushError> {
        self.check_field(alloc, offset, bytes.len())?;
        let record = self.allocs[alloc.0 as usize];
        let at = record.offset as usize + offset;
        self.chunks[record.chunk as usize][at..at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn check_alloc(&self, alloc: AllocId) -> Result<AllocRecord, BrushError> {
        self.allocs
            .get(alloc.0 as usize)
            .copied()
            .ok_or(BrushError::AllocationIndexOutOfBounds {
                alloc: alloc.0,
                len: self.allocs.len(),
            })
    }

    fn check_field(&self, alloc: AllocId, offset: usize, len: usize) -> Result<(), BrushError> {
        let record = self.check_alloc(alloc)?;
        if offset + len > record.size as usize {
            return Err(BrushError::FieldOutsideAllocation {
                alloc: alloc.0,
                offset: offset as u32,
                len: len as u32,
                size: record.size,
            });
        }
        Ok(())
    }
}

impl DebugInvariants for BlobArena {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "BlobArena invalid");
    }

    fn validate_invariants(&self) -> Result<(), BrushError> {
        let len = self.allocs.len();
        for patch in &self.patches {
            let record = self.allocs.get(patch.alloc as usize).ok_or(
                BrushError::AllocationIndexOutOfBounds {
                    alloc: patch.alloc,
                    len,
                },
            )?;
            if self.allocs.get(patch.target as usize).is_none() {
                return Err(BrushError::AllocationIndexOutOfBounds {
                    alloc: patch.target,
                    len,
                });
            }
            let field_len = if patch.array_len.is_some() { 8 } else { 4 };
            if patch.field_offset + field_len > record.size {
                return Err(BrushError::FieldOutsideAllocation {
                    alloc: patch.alloc,
                    offset: patch.field_offset,
                    len: field_len,
                    size: record.size,
                });
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod layout_tests {
    use super::*;

    #[test]
    fn allocations_are_sixteen_byte_aligned() {
        let mut arena = BlobArena::new();
        let root = arena.alloc_bytes(8).unwrap();
        let a = arena.alloc_slice(&[1u32, 2, 3]).unwrap();
        arena.write_array_field(root, 0, a, 3).unwrap();
        let blob = arena.finalize().unwrap();

        // Root at 0 (8 bytes), array aligned up to 16.
        let payload = blob.payload().unwrap();
        assert_eq!(payload.len(), 16 + 12);
        let values = blob.read_array::<u32>(0).unwrap();
        assert_eq!(values, &[1, 2, 3]);
    }

    #[test]
    fn empty_arena_wont_finalize() {
        let arena = BlobArena::new();
        assert!(matches!(arena.finalize(), Err(BrushError::ArenaEmpty)));
    }

    #[test]
    fn identical_builds_produce_identical_images() {
        let build = || {
            let mut arena = BlobArena::with_chunk_size(32);
            let root = arena.alloc_bytes(16).unwrap();
            let a = arena.alloc_slice(&[10u64, 20, 30]).unwrap();
            let b = arena.alloc_slice(&[7u16; 5]).unwrap();
            arena.write_array_field(root, 0, a, 3).unwrap();
            arena.write_array_field(root, 8, b, 5).unwrap();
            arena.finalize().unwrap()
        };
        let first = build();
        let second = build();
        assert_eq!(first.image().unwrap(), second.image().unwrap());
        assert_eq!(
            first.content_hash().unwrap(),
            second.content_hash().unwrap()
        );
    }

    #[test]
    fn large_allocation_gets_a_dedicated_chunk() {
        let mut arena = BlobArena::with_chunk_size(64);
        let root = arena.alloc_bytes(8).unwrap();
        let big = vec![0xA5u8; 1000];
        let a = arena.alloc_slice(big.as_slice()).unwrap();
        arena.write_array_field(root, 0, a, 1000).unwrap();
        let blob = arena.finalize().unwrap();
        assert_eq!(blob.read_array::<u8>(0).unwrap(), big.as_slice());
    }

    #[test]
    fn pointer_fields_resolve_and_null_stays_null() {
        let mut arena = BlobArena::new();
        let root = arena.alloc_bytes(8).unwrap();
        let value = arena.alloc_slice(&[0xDEAD_BEEFu32]).unwrap();
        // Field at 0 patched, field at 4 left null.
        arena.write_ptr_field(root, 0, value).unwrap();
        let blob = arena.finalize().unwrap();
        assert_eq!(*blob.read_ptr::<u32>(0).unwrap().unwrap(), 0xDEAD_BEEF);
        assert!(blob.read_ptr::<u32>(4).unwrap().is_none());
    }
}
