//! Upload and manifest retrieval handlers.

use crate::error::{ApiError, ApiResult, FILE_ID_NOT_FOUND};
use crate::ingest::SourceStream;
use crate::metrics::{
    BYTES_INGESTED, CHUNKS_STORED, INGEST_DURATION, UPLOADS_CHUNKED, UPLOADS_INGESTED,
    record_ingest_failure, record_manifest_lookup,
};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Multipart, Path, State};
use chunkd_core::{Manifest, UploadId};
use chunkd_storage::RegistryError;
use futures::TryStreamExt;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Name of the multipart field carrying the file.
const FILE_FIELD: &str = "file";

/// POST /upload - Ingest one file from a multipart body.
///
/// The first field named `file`, or else the first field carrying a
/// filename, is taken as the upload. Other fields are skipped.
#[instrument(skip(state, multipart))]
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Arc<Manifest>>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some(FILE_FIELD) && field.file_name().is_none() {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_owned) else {
            return Err(ApiError::BadRequest(
                "file field has no filename".to_string(),
            ));
        };

        let start_time = Instant::now();
        let body: SourceStream<'_> = Box::pin(field.map_err(io::Error::other));
        let result = state.ingestor.ingest(&filename, body).await;
        INGEST_DURATION.observe(start_time.elapsed().as_secs_f64());

        return match result {
            Ok(manifest) => {
                UPLOADS_INGESTED.inc();
                BYTES_INGESTED.inc_by(manifest.original_size());
                if manifest.is_chunked() {
                    UPLOADS_CHUNKED.inc();
                    CHUNKS_STORED.inc_by(manifest.chunks().len() as u64);
                }
                Ok(Json(manifest))
            }
            Err(e) => {
                record_ingest_failure(e.kind());
                Err(e.into())
            }
        };
    }

    Err(ApiError::BadRequest(format!(
        "multipart body has no '{FILE_FIELD}' field"
    )))
}

/// GET /chunks/{file_id} - Return the manifest of an earlier upload.
#[instrument(skip(state))]
pub async fn get_chunks(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<Arc<Manifest>>> {
    // Malformed ids cannot name an upload, so they read as unknown ones.
    let upload_id = UploadId::parse(&file_id).map_err(|_| {
        record_manifest_lookup("missing");
        ApiError::NotFound(FILE_ID_NOT_FOUND.to_string())
    })?;

    match state.registry.lookup_with_source(&upload_id).await {
        Ok((manifest, source)) => {
            record_manifest_lookup(source.as_str());
            Ok(Json(manifest))
        }
        Err(e) => {
            if matches!(e, RegistryError::NotFound(_)) {
                record_manifest_lookup("missing");
            }
            Err(e.into())
        }
    }
}
