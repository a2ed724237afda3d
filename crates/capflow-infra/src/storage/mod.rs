//! Filesystem storage for externally stored artifacts.

pub mod blob;

pub use blob::FsBlobStore;
