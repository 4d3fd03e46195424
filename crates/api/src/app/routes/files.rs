use std::io;
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Extension, Multipart, Path},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};

use portal_core::FileId;
use portal_infra::{PortalError, PortalServices};

use crate::app::dto::{FileResponse, ShareRequest};
use crate::app::errors::{ApiError, ApiResult};
use crate::context::RequestPrincipal;

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

/// GET /files - own organization's files plus files shared with it
pub async fn list(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
) -> ApiResult<Json<Vec<FileResponse>>> {
    let files = services.files.list(caller.user()).await?;
    Ok(Json(files.into_iter().map(FileResponse::from).collect()))
}

/// POST /files - multipart upload, field `file`
pub async fn upload(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<FileResponse>)> {
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();

        // Streamed into the blob store. Multipart failures stay validation errors.
        let mut broken = None;
        let uploaded = {
            let content = StreamReader::new(field.map_err(|e| {
                let err = io::Error::new(io::ErrorKind::InvalidData, e.to_string());
                broken = Some(e);
                err
            }));
            tokio::pin!(content);
            services
                .files
                .upload(caller.principal(), &name, &mut content, Utc::now())
                .await
        };
        if let Some(err) = broken {
            return Err(bad_multipart(err));
        }
        return Ok((StatusCode::CREATED, Json(uploaded?.into())));
    }
    Err(PortalError::validation("multipart field 'file' is required").into())
}

/// GET /files/:id - file content as an attachment
pub async fn download(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let (file, reader) = services.files.download(caller.user(), FileId::new(id)).await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        file.original_name.replace(['"', '\\'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, file.size_bytes.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response())
}

/// POST /files/:id/share - replace the set of organizations the file is shared with
pub async fn share(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Path(id): Path<i64>,
    Json(req): Json<ShareRequest>,
) -> ApiResult<Json<FileResponse>> {
    let shared = services
        .files
        .share(caller.principal(), FileId::new(id), &req.member_ids, Utc::now())
        .await?;
    Ok(Json(FileResponse::from(shared.file).with_shares(&shared.shares)))
}

pub async fn delete(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    services
        .files
        .delete(caller.principal(), FileId::new(id), Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ApiError {
    PortalError::validation(format!("malformed multipart body: {err}")).into()
}
