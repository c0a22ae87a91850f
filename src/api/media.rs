use axum::{
    body::Body,
    extract::{Extension, Path},
    http::{header, HeaderMap, HeaderValue},
    response::Response,
    routing::get,
    Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::api::product::VIDEO_DIR;
use crate::config::Config;
use crate::middleware::logging::{to_response, ApiError};

static FILE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9]+$").unwrap());

pub fn media_router() -> Router {
    Router::new().route("/media/videos/:file", get(serve_video))
}

async fn serve_video(
    Path(file): Path<String>,
    Extension(config): Extension<Arc<Config>>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::NotFound("Not found".to_string());

    if !FILE_NAME_REGEX.is_match(&file) {
        return Err(not_found());
    }

    let path = config.upload_dir.join(VIDEO_DIR).join(&file);
    let file = tokio::fs::File::open(&path).await.map_err(|_| not_found())?;

    let content_type = mime_guess::from_path(&path)
        .first_raw()
        .unwrap_or("application/octet-stream");

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static("inline"),
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok(to_response((headers, body), Ok(())))
}
