pub mod blob;

pub use blob::CachedBlob;
