//! Content-addressed registry of serialized brush meshes.
//!
//! Meshes are stored once per content hash as immutable blobs and shared by
//! reference count. The registry is the seam between mesh authoring and the
//! consumers holding keys: authoring calls [`MeshRegistry::create_or_reuse`]
//! after every edit, readers resolve keys through [`MeshRegistry::lookup`].

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::brush_error::BrushError;
use crate::data::blob::BlobAsset;
use crate::topology::brush_mesh::BrushMesh;
use crate::topology::half_edge::BrushMeshKey;

/// Fewer vertices than this is not a storable solid.
const MIN_VERTICES: usize = 4;
/// Fewer live polygons than this is not a storable solid.
const MIN_POLYGONS: usize = 4;
/// Fewer half-edges than this is not a storable solid.
const MIN_HALF_EDGES: usize = 12;

/// Callback surface for registry evictions.
///
/// The registry's one outward call: fired after the last reference to a key
/// is released and its entry removed.
pub trait RegistryObserver: Send + Sync {
    fn mesh_removed(&self, key: BrushMeshKey);
}

struct RegistryEntry {
    ref_count: u32,
    blob: BlobAsset,
}

/// Shared store of mesh blobs keyed by content hash.
#[derive(Default)]
pub struct MeshRegistry {
    entries: DashMap<BrushMeshKey, RegistryEntry>,
    observer: Option<Arc<dyn RegistryObserver>>,
}

impl MeshRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(observer: Arc<dyn RegistryObserver>) -> Self {
        Self {
            entries: DashMap::new(),
            observer: Some(observer),
        }
    }

    /// Number of distinct meshes currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores `mesh` (or reuses the existing entry with the same content)
    /// and returns its key, releasing `previous` when it is replaced.
    ///
    /// Degenerate meshes (fewer than 4 vertices, 4 live polygons, or 12
    /// half-edges) are not stored: `previous` is released and the result is
    /// `Ok(None)`. When the mesh hashes to `previous` the same key comes
    /// back with its reference count untouched.
    ///
    /// # Errors
    /// Propagates serialization failures for a mesh not yet in the store.
    pub fn create_or_reuse(
        &self,
        mesh: &BrushMesh,
        previous: Option<BrushMeshKey>,
    ) -> Result<Option<BrushMeshKey>, BrushError> {
        if mesh.vertices.len() < MIN_VERTICES
            || mesh.live_polygon_count() < MIN_POLYGONS
            || mesh.half_edges.len() < MIN_HALF_EDGES
        {
            if let Some(previous) = previous {
                self.release_relaxed(previous);
            }
            return Ok(None);
        }

        let key = BrushMeshKey::from_hash(mesh.content_hash());
        if previous == Some(key) {
            return Ok(Some(key));
        }
        if let Some(previous) = previous {
            self.release_relaxed(previous);
        }
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => occupied.get_mut().ref_count += 1,
            Entry::Vacant(vacant) => {
                let blob = mesh.to_blob()?;
                vacant.insert(RegistryEntry { ref_count: 1, blob });
            }
        }
        Ok(Some(key))
    }

    /// Takes another reference to an existing entry; returns the new count.
    ///
    /// # Errors
    /// [`BrushError::UnknownMeshKey`] when nothing is stored under `key`.
    pub fn acquire(&self, key: BrushMeshKey) -> Result<u32, BrushError> {
        let mut entry = self
            .entries
            .get_mut(&key)
            .ok_or(BrushError::UnknownMeshKey { key: key.get() })?;
        entry.ref_count += 1;
        Ok(entry.ref_count)
    }

    /// Drops a reference; returns the remaining count. At zero the entry is
    /// removed, the observer notified, and the blob storage dropped.
    ///
    /// # Errors
    /// [`BrushError::UnknownMeshKey`] when nothing is stored under `key`.
    pub fn release(&self, key: BrushMeshKey) -> Result<u32, BrushError> {
        let remaining = {
            let mut entry = self
                .entries
                .get_mut(&key)
                .ok_or(BrushError::UnknownMeshKey { key: key.get() })?;
            entry.ref_count = entry.ref_count.saturating_sub(1);
            entry.ref_count
        };
        // The guard is dropped before removal; re-check under the shard lock
        // in case another thread acquired in between.
        if remaining == 0
            && self
                .entries
                .remove_if(&key, |_, entry| entry.ref_count == 0)
                .is_some()
        {
            if let Some(observer) = &self.observer {
                observer.mesh_removed(key);
            }
        }
        Ok(remaining)
    }

    /// Cheap shared view of a stored blob.
    pub fn lookup(&self, key: BrushMeshKey) -> Option<BlobAsset> {
        self.entries.get(&key).map(|entry| entry.blob.clone())
    }

    /// Current reference count under `key`, if stored.
    pub fn ref_count(&self, key: BrushMeshKey) -> Option<u32> {
        self.entries.get(&key).map(|entry| entry.ref_count)
    }

    fn release_relaxed(&self, key: BrushMeshKey) {
        if self.release(key).is_err() {
            log::warn!("released mesh key {key} with no registry entry");
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod registry_tests {
    use super::*;
    use crate::topology::half_edge::Surface;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Removals(Mutex<Vec<BrushMeshKey>>);

    impl RegistryObserver for Removals {
        fn mesh_removed(&self, key: BrushMeshKey) {
            self.0.lock().push(key);
        }
    }

    fn cube(material: u32) -> BrushMesh {
        BrushMesh::cube(1.0, Surface::with_material(material)).unwrap()
    }

    #[test]
    fn storing_and_looking_up_a_cube() {
        let registry = MeshRegistry::new();
        let mesh = cube(1);
        let key = registry.create_or_reuse(&mesh, None).unwrap().unwrap();
        assert_eq!(key, BrushMeshKey::from_hash(mesh.content_hash()));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ref_count(key), Some(1));

        let blob = registry.lookup(key).unwrap();
        let decoded = BrushMesh::from_blob(&blob).unwrap();
        assert_eq!(decoded.content_hash(), mesh.content_hash());
    }

    #[test]
    fn identical_content_shares_one_entry() {
        let registry = MeshRegistry::new();
        let a = registry.create_or_reuse(&cube(1), None).unwrap().unwrap();
        let b = registry.create_or_reuse(&cube(1), None).unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ref_count(a), Some(2));
    }

    #[test]
    fn unchanged_mesh_keeps_its_refcount() {
        let registry = MeshRegistry::new();
        let mesh = cube(1);
        let key = registry.create_or_reuse(&mesh, None).unwrap();
        let again = registry.create_or_reuse(&mesh, key).unwrap();
        assert_eq!(again, key);
        assert_eq!(registry.ref_count(key.unwrap()), Some(1));
    }

    #[test]
    fn replacement_releases_the_previous_entry() {
        let observer = Arc::new(Removals::default());
        let registry = MeshRegistry::with_observer(observer.clone());
        let old = registry.create_or_reuse(&cube(1), None).unwrap().unwrap();
        let new = registry
            .create_or_reuse(&cube(2), Some(old))
            .unwrap()
            .unwrap();
        assert_ne!(old, new);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(old).is_none());
        assert_eq!(observer.0.lock().as_slice(), &[old]);
    }

    #[test]
    fn degenerate_mesh_stores_nothing_and_releases_previous() {
        let observer = Arc::new(Removals::default());
        let registry = MeshRegistry::with_observer(observer.clone());
        let key = registry.create_or_reuse(&cube(1), None).unwrap().unwrap();
        let result = registry.create_or_reuse(&BrushMesh::new(), Some(key)).unwrap();
        assert_eq!(result, None);
        assert!(registry.is_empty());
        assert_eq!(observer.0.lock().as_slice(), &[key]);
    }

    #[test]
    fn acquire_and_release_balance() {
        let observer = Arc::new(Removals::default());
        let registry = MeshRegistry::with_observer(observer.clone());
        let key = registry.create_or_reuse(&cube(1), None).unwrap().unwrap();
        assert_eq!(registry.acquire(key).unwrap(), 2);
        assert_eq!(registry.release(key).unwrap(), 1);
        assert!(observer.0.lock().is_empty());
        assert_eq!(registry.release(key).unwrap(), 0);
        assert!(registry.lookup(key).is_none());
        assert_eq!(observer.0.lock().as_slice(), &[key]);
    }

    #[test]
    fn unknown_keys_are_errors() {
        let registry = MeshRegistry::new();
        let key = BrushMeshKey::new(0xABCD);
        assert!(matches!(
            registry.acquire(key),
            Err(BrushError::UnknownMeshKey { .. })
        ));
        assert!(matches!(
            registry.release(key),
            Err(BrushError::UnknownMeshKey { .. })
        ));
        assert!(registry.lookup(key).is_none());
    }

    #[test]
    fn lookup_views_share_storage() {
        let registry = MeshRegistry::new();
        let key = registry.create_or_reuse(&cube(1), None).unwrap().unwrap();
        let a = registry.lookup(key).unwrap();
        let b = registry.lookup(key).unwrap();
        // Identity equality: both views wrap the same stored bytes.
        assert_eq!(a, b);
    }
}
