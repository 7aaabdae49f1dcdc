//! Core domain types for the chunkd file chunking service.
//!
//! This crate defines the data model shared by the storage and server crates:
//! - Upload identifiers
//! - The size policy and chunk planning
//! - Chunk descriptors and manifests
//! - Filename sanitization
//! - Configuration

pub mod chunk;
pub mod config;
pub mod error;
pub mod filename;
pub mod manifest;
pub mod policy;
pub mod upload;

pub use chunk::{ChunkDescriptor, ChunkPlan, ChunkSpan, chunk_name};
pub use error::{Error, Result};
pub use filename::sanitize_filename;
pub use manifest::Manifest;
pub use policy::SizePolicy;
pub use upload::UploadId;

/// Default maximum chunk size: 25 MiB
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 25 * 1024 * 1024;

/// Default maximum accepted upload size: 2 GiB
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 2 * 1024 * 1024 * 1024;
