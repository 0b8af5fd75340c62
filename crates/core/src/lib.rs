//! Retrace Core - file primitives for the retrace operation journal
//!
//! This crate provides:
//! - BLAKE3 content hashing (streaming and memory-mapped)
//! - File metadata capture at journaling time

pub mod hash;
pub mod metadata;

pub use hash::{hash_bytes, hash_file, hash_file_auto, hash_file_mmap, ContentHash};
pub use metadata::FileMetadata;

/// Common result type used throughout retrace-core
pub type Result<T> = anyhow::Result<T>;
