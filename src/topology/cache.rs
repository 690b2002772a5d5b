//! Cache invalidation seam for structures with derived lookup tables.

/// Implemented by anything that lazily derives state from the mesh tables,
/// such as the edge-to-owner map on [`crate::topology::brush_mesh::BrushMesh`].
///
/// Editing primitives call this after reindexing; a stale cache would resolve
/// half-edges to polygons that no longer own them.
pub trait InvalidateCache {
    /// Drop every derived table so the next query rebuilds it.
    fn invalidate_cache(&mut self);
}

impl<T: InvalidateCache + ?Sized> InvalidateCache for Box<T> {
    #[inline]
    fn invalidate_cache(&mut self) {
        (**self).invalidate_cache();
    }
}
