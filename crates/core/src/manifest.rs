//! Upload manifests and their JSON document form.

use crate::chunk::ChunkDescriptor;
use crate::error::{Error, Result};
use crate::upload::UploadId;
use serde::{Deserialize, Serialize};

/// The record of one upload's chunking outcome.
///
/// Built exactly once at ingestion time and never modified. A chunked
/// manifest always carries a contiguous `1..=N` chunk list whose sizes sum to
/// `original_size`; an unchunked manifest carries none.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ManifestDocument", try_from = "ManifestDocument")]
pub struct Manifest {
    file_id: UploadId,
    original_filename: String,
    original_size: u64,
    chunks: Vec<ChunkDescriptor>,
}

impl Manifest {
    /// Manifest for a payload stored whole.
    pub fn unchunked(file_id: UploadId, original_filename: String, original_size: u64) -> Self {
        Self {
            file_id,
            original_filename,
            original_size,
            chunks: Vec::new(),
        }
    }

    /// Manifest for a split payload, checked for a lossless ordered partition.
    pub fn chunked(
        file_id: UploadId,
        original_filename: String,
        original_size: u64,
        chunks: Vec<ChunkDescriptor>,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(Error::ManifestIntegrity(
                "chunked manifest requires at least one chunk".into(),
            ));
        }
        let manifest = Self {
            file_id,
            original_filename,
            original_size,
            chunks,
        };
        manifest.verify()?;
        Ok(manifest)
    }

    /// Check numbering and size invariants of the chunk list.
    pub fn verify(&self) -> Result<()> {
        let mut total: u64 = 0;
        for (index, chunk) in self.chunks.iter().enumerate() {
            let expected = index as u64 + 1;
            if chunk.chunk_number != expected {
                return Err(Error::ManifestIntegrity(format!(
                    "chunk at position {index} has number {}, expected {expected}",
                    chunk.chunk_number
                )));
            }
            if chunk.chunk_size == 0 {
                return Err(Error::ManifestIntegrity(format!(
                    "chunk {expected} is empty"
                )));
            }
            total = total.checked_add(chunk.chunk_size).ok_or_else(|| {
                Error::ManifestIntegrity("chunk sizes overflow".into())
            })?;
        }
        if self.is_chunked() && total != self.original_size {
            return Err(Error::ManifestIntegrity(format!(
                "chunk sizes sum to {total}, original size is {}",
                self.original_size
            )));
        }
        Ok(())
    }

    pub fn file_id(&self) -> &UploadId {
        &self.file_id
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    /// Whether the payload was split.
    pub fn is_chunked(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Chunk descriptors in ascending order (empty when unchunked).
    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    /// Human-readable summary included in responses.
    pub fn message(&self) -> String {
        if self.is_chunked() {
            format!("File successfully chunked into {} parts", self.chunks.len())
        } else {
            "File is within the chunk size limit, no chunking needed".to_string()
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        serde_json::from_slice(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// JSON shape of a manifest as returned to callers and persisted remotely.
#[derive(Serialize, Deserialize)]
struct ManifestDocument {
    file_id: UploadId,
    original_filename: String,
    original_size: u64,
    chunked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    num_chunks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chunks: Option<Vec<ChunkDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl From<Manifest> for ManifestDocument {
    fn from(manifest: Manifest) -> Self {
        let message = Some(manifest.message());
        let chunked = manifest.is_chunked();
        Self {
            file_id: manifest.file_id,
            original_filename: manifest.original_filename,
            original_size: manifest.original_size,
            chunked,
            num_chunks: chunked.then_some(manifest.chunks.len() as u64),
            chunks: chunked.then_some(manifest.chunks),
            message,
        }
    }
}

impl TryFrom<ManifestDocument> for Manifest {
    type Error = Error;

    fn try_from(doc: ManifestDocument) -> Result<Self> {
        let chunks = doc.chunks.unwrap_or_default();
        if let Some(declared) = doc.num_chunks
            && declared != chunks.len() as u64
        {
            return Err(Error::ManifestIntegrity(format!(
                "num_chunks is {declared} but {} chunks are listed",
                chunks.len()
            )));
        }

        if doc.chunked {
            Manifest::chunked(doc.file_id, doc.original_filename, doc.original_size, chunks)
        } else if chunks.is_empty() {
            Ok(Manifest::unchunked(
                doc.file_id,
                doc.original_filename,
                doc.original_size,
            ))
        } else {
            Err(Error::ManifestIntegrity(
                "unchunked manifest must not list chunks".into(),
            ))
        }
    }
}
