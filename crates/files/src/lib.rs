//! Files domain module: uploaded assets, cross-organization share grants, the
//! view/manage access policy and on-disk blob storage.

pub mod access;
pub mod blob;
pub mod model;

pub use access::{FileAction, can_manage, can_view};
pub use blob::{BlobError, BlobReader, BlobStore, LocalBlobStore, StoredBlob, sha256_hex};
pub use model::{FileAsset, FileShare, NewFileAsset};
