//! Object storage access.

pub mod vfs;

pub use vfs::{ObjectStoreFileSystem, StorageCredentials, VirtualFileSystem, VirtualPath};
