use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::app::AppState;
use crate::error::ApiError;
use crate::files::{content_type, range::parse_range, LocalFilesAdapter};
use crate::middleware::RequestContext;

/// POST /{mount}/files/:filename - store an upload for a signed-in caller
pub async fn upload_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Extension(context): Extension<RequestContext>,
    body: Bytes,
) -> Result<Response, ApiError> {
    if context.caller.is_none() && !context.master {
        return Err(ApiError::authentication_required());
    }
    LocalFilesAdapter::validate_filename(&filename)?;
    if body.is_empty() {
        return Err(ApiError::bad_request("Invalid file upload."));
    }
    if body.len() > state.config.files.max_upload_bytes {
        return Err(ApiError::payload_too_large("File is too large"));
    }

    let name = LocalFilesAdapter::stored_name(&filename);
    state.files.create_file(&name, &body).await?;
    let url = state.files.file_location(&name);
    tracing::info!("Stored upload {} ({} bytes)", name, body.len());

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, url.clone())],
        Json(json!({ "name": name, "url": url })),
    )
        .into_response())
}

/// DELETE /{mount}/files/:filename - master key only
pub async fn delete_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Extension(context): Extension<RequestContext>,
) -> Result<StatusCode, ApiError> {
    if !context.master {
        return Err(ApiError::forbidden("Master key is required to delete files"));
    }
    state.files.delete_file(&filename).await?;
    Ok(StatusCode::OK)
}

/// GET /{mount}/files/:app_id/:filename - serve a file, honouring `Range`
pub async fn get_file(
    State(state): State<AppState>,
    Path((app_id, filename)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if app_id != state.files.app_id() {
        return Err(ApiError::not_found("File not found"));
    }
    let (mut file, size) = state.files.open(&filename).await?;
    let mime = content_type(&filename);

    let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, mime.to_string()),
                (header::CONTENT_LENGTH, size.to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
            Body::from_stream(ReaderStream::new(file)),
        )
            .into_response());
    };

    let range = match parse_range(range_header, size) {
        Ok(range) => range,
        Err(unsatisfiable) => {
            return Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, unsatisfiable.content_range())],
            )
                .into_response());
        }
    };

    file.seek(std::io::SeekFrom::Start(range.start))
        .await
        .map_err(crate::files::FileError::from)?;
    let stream = ReaderStream::new(file.take(range.len()));

    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CONTENT_LENGTH, range.len().to_string()),
            (header::CONTENT_RANGE, range.content_range(size)),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
