use std::sync::Arc;

use brush_carve::prelude::*;
use glam::Vec3;
use parking_lot::Mutex;

#[derive(Default)]
struct Removals(Mutex<Vec<BrushMeshKey>>);

impl RegistryObserver for Removals {
    fn mesh_removed(&self, key: BrushMeshKey) {
        self.0.lock().push(key);
    }
}

fn cube() -> BrushMesh {
    BrushMesh::cube(1.0, Surface::with_material(1)).expect("cube builds")
}

#[test]
fn an_edit_session_replaces_and_finally_drains_the_store() {
    let removals = Arc::new(Removals::default());
    let registry = MeshRegistry::with_observer(removals.clone());

    // Author a cube and store it.
    let mut mesh = cube();
    let first = registry
        .create_or_reuse(&mesh, None)
        .expect("store succeeds")
        .expect("cube is storable");
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.ref_count(first), Some(1));

    // A reader can decode the stored blob back into an identical mesh.
    let blob = registry.lookup(first).expect("entry resolves");
    let decoded = BrushMesh::from_blob(&blob).expect("blob decodes");
    assert_eq!(decoded.content_hash(), mesh.content_hash());
    assert_eq!(decoded.vertices, mesh.vertices);

    // Re-storing the unchanged mesh reuses the entry.
    let again = registry
        .create_or_reuse(&mesh, Some(first))
        .expect("store succeeds");
    assert_eq!(again, Some(first));
    assert_eq!(registry.ref_count(first), Some(1));

    // Halve the cube; the new content replaces the old entry.
    cut(&mut mesh, &[Plane::new(Vec3::Z, 0.0)], Surface::with_material(2))
        .expect("cut succeeds");
    let second = registry
        .create_or_reuse(&mesh, Some(first))
        .expect("store succeeds")
        .expect("half cube is storable");
    assert_ne!(second, first);
    assert_eq!(registry.len(), 1);
    assert_eq!(*removals.0.lock(), vec![first]);

    // Cut everything away; the emptied mesh stores nothing and the previous
    // entry drains out.
    cut(&mut mesh, &[Plane::new(Vec3::Z, 4.0)], Surface::with_material(2))
        .expect("cut succeeds");
    assert!(mesh.is_empty());
    let gone = registry
        .create_or_reuse(&mesh, Some(second))
        .expect("store succeeds");
    assert_eq!(gone, None);
    assert!(registry.is_empty());
    assert_eq!(*removals.0.lock(), vec![first, second]);
}

#[test]
fn shared_consumers_hold_the_entry_open() {
    let removals = Arc::new(Removals::default());
    let registry = MeshRegistry::with_observer(removals.clone());

    let key = registry
        .create_or_reuse(&cube(), None)
        .expect("store succeeds")
        .expect("cube is storable");

    // A second consumer appears.
    assert_eq!(registry.acquire(key).expect("acquire succeeds"), 2);

    // The author lets go; the consumer still resolves the blob.
    assert_eq!(registry.release(key).expect("release succeeds"), 1);
    assert!(registry.lookup(key).is_some());
    assert!(removals.0.lock().is_empty());

    // The last consumer lets go; now the entry is evicted.
    assert_eq!(registry.release(key).expect("release succeeds"), 0);
    assert!(registry.lookup(key).is_none());
    assert!(registry.is_empty());
    assert_eq!(*removals.0.lock(), vec![key]);
}

#[test]
fn stored_blobs_survive_a_snapshot_round_trip() {
    let registry = MeshRegistry::new();
    let mesh = cube();
    let key = registry
        .create_or_reuse(&mesh, None)
        .expect("store succeeds")
        .expect("cube is storable");

    // Export the image, reimport it elsewhere, and decode.
    let blob = registry.lookup(key).expect("entry resolves");
    let image = blob.image().expect("image readable").to_vec();
    let snapshot = BlobAsset::from_snapshot(&image).expect("snapshot imports");
    let decoded = BrushMesh::from_blob(&snapshot).expect("snapshot decodes");
    assert_eq!(decoded.content_hash(), mesh.content_hash());
    assert_eq!(
        BrushMeshKey::from_hash(decoded.content_hash()),
        key,
        "the key is derivable from decoded content"
    );
}
