//! HTTP service for chunkd.
//!
//! This crate provides the HTTP surface over the chunking engine:
//! - File upload with size-based splitting
//! - Manifest retrieval by upload id
//! - Health and legacy echo endpoints
//! - Prometheus metrics

pub mod error;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use ingest::{IngestError, Ingestor, SourceStream};
pub use routes::create_router;
pub use state::AppState;
