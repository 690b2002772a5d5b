//! Relocatable blob assets.
//!
//! A blob is a 32-byte header followed by a position-independent payload.
//! Every pointer inside the payload is a self-relative `i32` (the target
//! offset minus the field offset), so the image can be memcpy'd, mapped, or
//! sent over a wire and read in place. [`BlobAsset`] is the immutable handle:
//! cheap to clone (refcounted bytes), equality is storage identity, and all
//! typed reads bounds-check before casting.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

use crate::brush_error::BrushError;

/// Value of [`BlobHeader::validation_tag`] for every blob this crate writes.
pub const BLOB_VALIDATION_TAG: u64 = u64::from_le_bytes(*b"CARVBLOB");

/// Allocator tag of a blob finalized by a [`crate::data::arena::BlobArena`].
pub const ALLOC_TAG_ARENA: u32 = 1;
/// Allocator tag of a snapshot-imported (read-only) blob.
pub const ALLOC_TAG_SNAPSHOT: u32 = 2;

/// Size of the header written in front of every payload.
pub const BLOB_HEADER_BYTES: usize = 32;
/// Alignment of the image base (and therefore of the payload base).
pub const BLOB_ALIGN: usize = 16;

/// Fixed header in front of every blob payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BlobHeader {
    pub validation_tag: u64,
    /// Payload byte length (excluding this header).
    pub length: u32,
    pub allocator_tag: u32,
    /// Hash of the payload bytes.
    pub content_hash: u64,
    /// Reserved, always zero.
    pub padding: u64,
}

/// Immutable handle to a finalized blob image.
///
/// Clones share the same storage and the same disposed flag, so a registry
/// can hand out views while a later [`BlobAsset::dispose`] still invalidates
/// every outstanding clone.
#[derive(Clone)]
pub struct BlobAsset {
    bytes: Bytes,
    disposed: Arc<AtomicBool>,
}

impl BlobAsset {
    /// Wraps a finished header + payload image in aligned shared storage.
    pub(crate) fn from_image(image: &[u8]) -> Self {
        Self {
            bytes: aligned_copy(image),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Inert sentinel: not valid, every accessor fails with [`BrushError::NullBlob`].
    pub fn null() -> Self {
        Self {
            bytes: Bytes::new(),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Imports an existing serialized image.
    ///
    /// The copy is re-tagged [`ALLOC_TAG_SNAPSHOT`], marking the handle
    /// read-only: snapshot blobs refuse [`BlobAsset::dispose`].
    ///
    /// # Errors
    /// Fails on a short buffer, a foreign validation tag, or a length field
    /// that disagrees with the buffer size.
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self, BrushError> {
        if bytes.len() < BLOB_HEADER_BYTES {
            return Err(BrushError::BlobTruncated {
                expected: BLOB_HEADER_BYTES,
                found: bytes.len(),
            });
        }
        let header: BlobHeader = bytemuck::pod_read_unaligned(&bytes[..BLOB_HEADER_BYTES]);
        if header.validation_tag != BLOB_VALIDATION_TAG {
            return Err(BrushError::BlobValidationTag {
                found: header.validation_tag,
            });
        }
        let payload = bytes.len() - BLOB_HEADER_BYTES;
        if header.length as usize != payload {
            return Err(BrushError::BlobTruncated {
                expected: header.length as usize,
                found: payload,
            });
        }
        let mut image = bytes.to_vec();
        let tag_at = std::mem::offset_of!(BlobHeader, allocator_tag);
        image[tag_at..tag_at + 4].copy_from_slice(&ALLOC_TAG_SNAPSHOT.to_le_bytes());
        Ok(Self::from_image(&image))
    }

    /// True when the header is present, carries our validation tag, and the
    /// storage has not been disposed.
    pub fn is_valid(&self) -> bool {
        self.guard().is_ok()
    }

    /// The parsed header.
    ///
    /// # Errors
    /// [`BrushError::NullBlob`] without storage, [`BrushError::AlreadyDisposed`]
    /// after disposal, [`BrushError::BlobValidationTag`] on a foreign image.
    pub fn header(&self) -> Result<BlobHeader, BrushError> {
        let image = self.guard()?;
        Ok(bytemuck::pod_read_unaligned(&image[..BLOB_HEADER_BYTES]))
    }

    /// Hash of the payload bytes, as recorded at finalize time.
    pub fn content_hash(&self) -> Result<u64, BrushError> {
        Ok(self.header()?.content_hash)
    }

    /// Allocator tag ([`ALLOC_TAG_ARENA`] or [`ALLOC_TAG_SNAPSHOT`]).
    pub fn allocator_tag(&self) -> Result<u32, BrushError> {
        Ok(self.header()?.allocator_tag)
    }

    /// The full image (header plus payload), e.g. for snapshot export.
    pub fn image(&self) -> Result<&[u8], BrushError> {
        let payload = self.payload()?;
        let total = BLOB_HEADER_BYTES + payload.len();
        Ok(&self.bytes[..total])
    }

    /// The payload bytes, bounds-checked against the header length.
    pub fn payload(&self) -> Result<&[u8], BrushError> {
        let image = self.guard()?;
        let header: BlobHeader = bytemuck::pod_read_unaligned(&image[..BLOB_HEADER_BYTES]);
        let expected = header.length as usize;
        let found = image.len() - BLOB_HEADER_BYTES;
        if expected > found {
            return Err(BrushError::BlobTruncated { expected, found });
        }
        Ok(&image[BLOB_HEADER_BYTES..BLOB_HEADER_BYTES + expected])
    }

    /// Typed view of the root struct at payload offset 0.
    ///
    /// # Errors
    /// Fails when the payload is shorter than `T` or the cast is rejected.
    pub fn root<T: bytemuck::Pod>(&self) -> Result<&T, BrushError> {
        let payload = self.payload()?;
        let size = size_of::<T>();
        let bytes = payload
            .get(..size)
            .ok_or(BrushError::BlobFieldOutOfBounds {
                field: 0,
                start: 0,
                end: size as i64,
                len: payload.len(),
            })?;
        bytemuck::try_from_bytes(bytes).map_err(|_| BrushError::BlobCastFailed {
            context: std::any::type_name::<T>(),
        })
    }

    /// Resolves an array field (relative `i32` offset plus `u32` count) at
    /// payload offset `field` into a typed slice.
    ///
    /// A zero offset or zero count is the empty array.
    ///
    /// # Errors
    /// Fails when the field or the resolved range falls outside the payload,
    /// or the element cast is rejected.
    pub fn read_array<T: bytemuck::Pod>(&self, field: usize) -> Result<&[T], BrushError> {
        let payload = self.payload()?;
        let rel = read_i32(payload, field)?;
        let count = read_u32(payload, field + 4)?;
        if rel == 0 || count == 0 {
            return Ok(&[]);
        }
        let start = field as i64 + rel as i64;
        let end = start + count as i64 * size_of::<T>() as i64;
        let range = checked_range(payload, field, start, end)?;
        bytemuck::try_cast_slice(&payload[range]).map_err(|_| BrushError::BlobCastFailed {
            context: std::any::type_name::<T>(),
        })
    }

    /// Resolves a pointer field (relative `i32`) at payload offset `field`.
    ///
    /// A zero offset is null and reads as `None`.
    ///
    /// # Errors
    /// Same failure modes as [`BlobAsset::read_array`].
    pub fn read_ptr<T: bytemuck::Pod>(&self, field: usize) -> Result<Option<&T>, BrushError> {
        let payload = self.payload()?;
        let rel = read_i32(payload, field)?;
        if rel == 0 {
            return Ok(None);
        }
        let start = field as i64 + rel as i64;
        let end = start + size_of::<T>() as i64;
        let range = checked_range(payload, field, start, end)?;
        bytemuck::try_from_bytes(&payload[range])
            .map(Some)
            .map_err(|_| BrushError::BlobCastFailed {
                context: std::any::type_name::<T>(),
            })
    }

    /// Releases the storage of an arena-built blob.
    ///
    /// Clones of this handle observe the disposal through the shared flag
    /// and fail subsequent accesses with [`BrushError::AlreadyDisposed`].
    ///
    /// # Errors
    /// - [`BrushError::NullBlob`] on the null sentinel.
    /// - [`BrushError::DisposeReadOnlyBlob`] on a snapshot import.
    /// - [`BrushError::AlreadyDisposed`] when a clone already disposed it.
    pub fn dispose(self) -> Result<(), BrushError> {
        if self.bytes.len() < BLOB_HEADER_BYTES {
            return Err(BrushError::NullBlob);
        }
        let header: BlobHeader =
            bytemuck::pod_read_unaligned(&self.bytes[..BLOB_HEADER_BYTES]);
        if header.validation_tag != BLOB_VALIDATION_TAG {
            return Err(BrushError::BlobValidationTag {
                found: header.validation_tag,
            });
        }
        if header.allocator_tag == ALLOC_TAG_SNAPSHOT {
            return Err(BrushError::DisposeReadOnlyBlob {
                tag: header.allocator_tag,
            });
        }
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(BrushError::AlreadyDisposed);
        }
        Ok(())
    }

    fn guard(&self) -> Result<&[u8], BrushError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(BrushError::AlreadyDisposed);
        }
        if self.bytes.len() < BLOB_HEADER_BYTES {
            return Err(BrushError::NullBlob);
        }
        let tag = u64::from_le_bytes(
            self.bytes[..8].try_into().map_err(|_| BrushError::NullBlob)?,
        );
        if tag != BLOB_VALIDATION_TAG {
            return Err(BrushError::BlobValidationTag { found: tag });
        }
        Ok(&self.bytes)
    }
}

/// Identity of the underlying storage, not content equality.
impl PartialEq for BlobAsset {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.bytes.as_ref() as *const [u8], other.bytes.as_ref())
    }
}

impl Eq for BlobAsset {}

impl fmt::Debug for BlobAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.header() {
            Ok(header) => f
                .debug_struct("BlobAsset")
                .field("length", &header.length)
                .field("allocator_tag", &header.allocator_tag)
                .field("content_hash", &format_args!("{:#018x}", header.content_hash))
                .finish(),
            Err(err) => f.debug_struct("BlobAsset").field("state", &err).finish(),
        }
    }
}

/// Copies `image` into refcounted storage whose base is 16-byte aligned, so
/// the payload (at byte 32) is aligned for every record type we cast to.
fn aligned_copy(image: &[u8]) -> Bytes {
    // Exactly sized, so the Vec -> Bytes conversion cannot move the buffer
    // after we compute the alignment padding.
    let mut raw = vec![0u8; image.len() + BLOB_ALIGN];
    let pad = raw.as_ptr().align_offset(BLOB_ALIGN);
    debug_assert!(pad < BLOB_ALIGN);
    raw[pad..pad + image.len()].copy_from_slice(image);
    let out = Bytes::from(raw).slice(pad..pad + image.len());
    debug_assert_eq!(out.as_ptr() as usize % BLOB_ALIGN, 0);
    out
}

fn read_i32(payload: &[u8], at: usize) -> Result<i32, BrushError> {
    let bytes = payload
        .get(at..at + 4)
        .ok_or(BrushError::BlobFieldOutOfBounds {
            field: at,
            start: at as i64,
            end: at as i64 + 4,
            len: payload.len(),
        })?;
    Ok(i32::from_le_bytes(bytes.try_into().map_err(|_| {
        BrushError::BlobCastFailed { context: "i32 field" }
    })?))
}

fn read_u32(payload: &[u8], at: usize) -> Result<u32, BrushError> {
    let bytes = payload
        .get(at..at + 4)
        .ok_or(BrushError::BlobFieldOutOfBounds {
            field: at,
            start: at as i64,
            end: at as i64 + 4,
            len: payload.len(),
        })?;
    Ok(u32::from_le_bytes(bytes.try_into().map_err(|_| {
        BrushError::BlobCastFailed { context: "u32 field" }
    })?))
}

fn checked_range(
    payload: &[u8],
    field: usize,
    start: i64,
    end: i64,
) -> Result<std::ops::Range<usize>, BrushError> {
    if start < 0 || end < start || end > payload.len() as i64 {
        return Err(BrushError::BlobFieldOutOfBounds {
            field,
            start,
            end,
            len: payload.len(),
        });
    }
    Ok(start as usize..end as usize)
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod layout_tests {
    //! Compile-time assertions on the header layout.
    use super::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<BlobHeader>(), BLOB_HEADER_BYTES);
    const_assert_eq!(std::mem::offset_of!(BlobHeader, validation_tag), 0);
    const_assert_eq!(std::mem::offset_of!(BlobHeader, length), 8);
    const_assert_eq!(std::mem::offset_of!(BlobHeader, allocator_tag), 12);
    const_assert_eq!(std::mem::offset_of!(BlobHeader, content_hash), 16);
    const_assert_eq!(std::mem::offset_of!(BlobHeader, padding), 24);

    #[test]
    fn tag_spells_the_magic() {
        assert_eq!(&BLOB_VALIDATION_TAG.to_le_bytes(), b"CARVBLOB");
    }
}
