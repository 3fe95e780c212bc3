pub mod blobs;
pub mod kv;

pub use blobs::BlobRepository;
pub use kv::KvRepository;
