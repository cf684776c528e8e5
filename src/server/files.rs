use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::auth::helpers::SESSION_TOKEN_HEADER;
use crate::auth::{Download, FileManager, RequireSession};
use crate::cms::MetaEdit;
use crate::files::{PrefsPatch, Upload, sanitize_download_name};
use crate::server::AppState;
use crate::server::dto::BulkDeleteRequest;
use crate::server::response::{ApiError, with_session};
use crate::server::validation::parse_file_tag;
use crate::types::{FileMeta, Session, UploadFields};

pub fn files_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/files", get(list_files).post(upload_file))
        .route("/files/prefs", patch(update_prefs))
        .route("/files/bulk-delete", post(bulk_delete))
        .route(
            "/files/{tag}",
            get(get_file).patch(edit_file).delete(delete_file),
        )
        .route("/files/{tag}/copy", post(copy_file))
        .route("/files/{tag}/content", get(download_file))
}

/// GET /files
pub async fn list_files(
    auth: RequireSession<FileManager>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let listing = state.cms.list_files(&auth.session).await?;
    Ok(with_session(&auth.session, StatusCode::OK, listing))
}

/// POST /files (multipart: `file`, `title`, `description`, `type_label`)
pub async fn upload_file(
    auth: RequireSession<FileManager>,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let session = &auth.session;
    let mut fields = UploadFields::default();
    let mut upload: Option<Upload> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                discard(&state, upload).await;
                return Err(ApiError::bad_request(format!("Failed to read multipart: {e}")));
            }
        };
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            if upload.is_some() {
                discard(&state, upload).await;
                return Err(ApiError::bad_request("Only one file per upload"));
            }
            if fields.file_name.is_empty() {
                fields.file_name = field.file_name().unwrap_or_default().to_string();
            }
            upload = Some(receive(&state, session, field).await?);
            continue;
        }

        let text = match field.text().await {
            Ok(text) => text,
            Err(e) => {
                discard(&state, upload).await;
                return Err(ApiError::bad_request(format!("Failed to read {name}: {e}")));
            }
        };
        match name.as_str() {
            "title" => fields.title = text,
            "description" => fields.description = text,
            "type_label" => fields.type_label = text,
            "file_name" => fields.file_name = text,
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::bad_request("File field is required"))?;
    let uploaded = state.cms.finish_upload(session, upload, fields).await?;
    Ok(with_session(session, StatusCode::CREATED, uploaded))
}

/// Streams one multipart field into a new upload.
async fn receive(
    state: &AppState,
    session: &Session,
    mut field: axum::extract::multipart::Field<'_>,
) -> Result<Upload, ApiError> {
    let mut upload = state.cms.begin_upload(session).await?;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = upload.write_chunk(&chunk).await {
                    state.cms.abort_upload(upload).await;
                    return Err(e.into());
                }
            }
            Ok(None) => return Ok(upload),
            Err(e) => {
                state.cms.abort_upload(upload).await;
                return Err(ApiError::bad_request(format!("Upload interrupted: {e}")));
            }
        }
    }
}

async fn discard(state: &AppState, upload: Option<Upload>) {
    if let Some(upload) = upload {
        state.cms.abort_upload(upload).await;
    }
}

/// PATCH /files/prefs
pub async fn update_prefs(
    auth: RequireSession<FileManager>,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<PrefsPatch>,
) -> Result<Response, ApiError> {
    let prefs = state.cms.update_prefs(&auth.session, patch).await?;
    Ok(with_session(&auth.session, StatusCode::OK, prefs))
}

/// GET /files/{tag}
pub async fn get_file(
    auth: RequireSession<FileManager>,
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
) -> Result<Response, ApiError> {
    let tag = parse_file_tag(&tag, &auth.session.login_name)?;
    let entry = state.cms.file_entry(&auth.session, &tag).await?;
    Ok(with_session(&auth.session, StatusCode::OK, entry))
}

/// PATCH /files/{tag}
pub async fn edit_file(
    auth: RequireSession<FileManager>,
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
    Json(edit): Json<MetaEdit>,
) -> Result<Response, ApiError> {
    let tag = parse_file_tag(&tag, &auth.session.login_name)?;
    let edited = state.cms.edit_file(&auth.session, &tag, edit).await?;
    Ok(with_session(&auth.session, StatusCode::OK, edited))
}

/// DELETE /files/{tag}
pub async fn delete_file(
    auth: RequireSession<FileManager>,
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
) -> Result<Response, ApiError> {
    let tag = parse_file_tag(&tag, &auth.session.login_name)?;
    state.cms.delete_file(&auth.session, &tag).await?;
    Ok((
        StatusCode::NO_CONTENT,
        [(SESSION_TOKEN_HEADER, auth.session.token.clone())],
    )
        .into_response())
}

/// POST /files/bulk-delete
pub async fn bulk_delete(
    auth: RequireSession<FileManager>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Response, ApiError> {
    let result = state.cms.bulk_delete(&auth.session, &req.file_tags).await?;
    Ok(with_session(&auth.session, StatusCode::OK, result))
}

/// POST /files/{tag}/copy
pub async fn copy_file(
    auth: RequireSession<FileManager>,
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
) -> Result<Response, ApiError> {
    let tag = parse_file_tag(&tag, &auth.session.login_name)?;
    let copy = state.cms.copy_file(&auth.session, &tag).await?;
    Ok(with_session(&auth.session, StatusCode::CREATED, copy))
}

/// GET /files/{tag}/content
pub async fn download_file(
    auth: RequireSession<Download>,
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
) -> Result<Response, ApiError> {
    let tag = parse_file_tag(&tag, &auth.session.login_name)?;
    let (meta, file) = state.cms.open_file(&auth.session, &tag).await?;
    Ok(file_response(&meta, file, state.cms.files().chunk_size()))
}

/// GET /users/{user_name}/{tag}
///
/// Anything but an existing world-shared file is the same 404.
pub async fn world_download(
    State(state): State<Arc<AppState>>,
    Path((user_name, tag)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let tag = parse_file_tag(&tag, "anonymous").map_err(|_| ApiError::not_found("Not found"))?;
    let (meta, file) = state
        .cms
        .open_world_file(&user_name, &tag)
        .await
        .map_err(|e| {
            if e.is_storage() {
                ApiError::from(e)
            } else {
                ApiError::not_found("Not found")
            }
        })?;
    Ok(file_response(&meta, file, state.cms.files().chunk_size()))
}

fn file_response(meta: &FileMeta, file: File, chunk_size: usize) -> Response {
    let stream = ReaderStream::with_capacity(file, chunk_size);
    let body = Body::from_stream(stream);
    let disposition = format!(
        "attachment; filename=\"{}\"",
        sanitize_download_name(&meta.file_name)
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, meta.size)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header("X-Content-Type-Options", "nosniff")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
