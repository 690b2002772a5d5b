//! Data module: relocatable blobs and the content-addressed mesh store.

pub mod arena;
pub mod blob;
pub mod mesh_blob;
pub mod registry;

pub use arena::{AllocId, BlobArena};
pub use blob::{BLOB_VALIDATION_TAG, BlobAsset, BlobHeader};
pub use mesh_blob::{MeshBlobRoot, PolygonRecord};
pub use registry::{MeshRegistry, RegistryObserver};
