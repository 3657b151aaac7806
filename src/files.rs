//! 文件列表、上传与下载处理器。

use axum::body::Body as AxumBody;
use axum::extract::multipart::MultipartError;
use axum::extract::{Extension, Multipart, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use futures_util::TryStreamExt;
use httpdate::fmt_http_date;
use std::io;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::config::UPLOAD_FIELD;
use crate::error::ApiError;
use crate::http::prefers_html;
use crate::page::{Notice, render_index};
use crate::storage::{Storage, StorageError, StoredFile};

/// 首页：列出已存储的文件。
pub async fn index(Extension(storage): Extension<Arc<Storage>>) -> Result<Html<String>, ApiError> {
    let files = storage.list().await?;
    info!(count = files.len(), "list files");
    Ok(Html(render_index(&files, None)))
}

/// 上传文件（multipart 字段 `file`）。
///
/// 脚本客户端成功时得到 204；浏览器表单提交得到带提示的列表页。
pub async fn upload(
    Extension(storage): Extension<Arc<Storage>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let result = receive_upload(&storage, &mut multipart).await;
    if let Err(err) = &result {
        warn!(status = %err.status(), reason = err.message(), "upload rejected");
    }

    if !prefers_html(&headers) {
        return match result {
            Ok(_) => StatusCode::NO_CONTENT.into_response(),
            Err(err) => err.into_response(),
        };
    }

    let (status, notice) = match result {
        Ok(stored) => (
            StatusCode::OK,
            Notice::success(format!("File {} uploaded successfully", stored.name)),
        ),
        Err(ApiError::Internal(detail)) => {
            return ApiError::Internal(detail).into_response();
        }
        Err(err) => (err.status(), Notice::error(err.message())),
    };
    match storage.list().await {
        Ok(files) => (status, Html(render_index(&files, Some(&notice)))).into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn receive_upload(
    storage: &Storage,
    multipart: &mut Multipart,
) -> Result<StoredFile, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let raw_name = field.file_name().unwrap_or_default().to_string();
        let limit = storage.max_upload_size();
        let content = field.map_err(move |err| upload_stream_error(err, limit));
        return Ok(storage.save(&raw_name, content).await?);
    }
    Err(ApiError::BadRequest("No file part".into()))
}

/// multipart 流错误转为存储层错误，保留超限语义。
fn upload_stream_error(err: MultipartError, limit: u64) -> StorageError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        StorageError::PayloadTooLarge { limit }
    } else if status.is_client_error() {
        StorageError::Io(io::Error::new(io::ErrorKind::InvalidData, err.body_text()))
    } else {
        StorageError::Io(io::Error::other(err.body_text()))
    }
}

/// 以附件形式下载文件。
pub async fn download(
    Path(name): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let (file, stored) = storage.retrieve(&name).await?;
    let mime = mime_guess::from_path(&stored.name).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header_value(mime.essence_str())?);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(stored.size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&format!("attachment; filename=\"{}\"", stored.name))?,
    );
    if let Some(modified) = stored.modified {
        headers.insert(header::LAST_MODIFIED, header_value(&fmt_http_date(modified))?);
    }

    info!(name = %stored.name, size = stored.size, "download file");
    let body = AxumBody::from_stream(ReaderStream::new(file));
    Ok((StatusCode::OK, headers, body).into_response())
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::Internal(format!("bad header value {value:?}")))
}
