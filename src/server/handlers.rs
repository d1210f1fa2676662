//! Route handlers (§4.7).

use super::html;
use super::state::AppState;
use crate::cache::ConversionCache;
use crate::converter::ConvertOptions;
use crate::error::{ConverterError, FolioError};
use crate::model::CacheKey;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use std::time::Duration;
use tokio_util::io::ReaderStream;

/// `GET /` — HTML catalog.
pub async fn catalog_html(State(state): State<AppState>) -> Html<String> {
    let books = state.provider.list();
    Html(html::render_catalog(
        &state.config.server.title,
        &books,
        state.converter.is_available(),
    ))
}

/// `GET /api/books` — JSON catalog.
pub async fn list_books(State(state): State<AppState>) -> Json<Vec<crate::model::BookDescriptor>> {
    Json(state.provider.list())
}

/// `GET /api/status`.
pub async fn server_status(State(state): State<AppState>) -> Json<crate::model::ServerStatus> {
    Json(state.status())
}

/// `GET /qr` — connect-URL as a PNG.
pub async fn qr_code(State(state): State<AppState>) -> Result<Response, FolioError> {
    let status = state.status();
    let url = status
        .server_url
        .unwrap_or_else(|| "http://localhost".to_string());
    let png = crate::qrcode::encode_png(&url, &crate::qrcode::QrOptions::default())
        .map_err(|e| FolioError::Config(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// `GET /api/books/{id}/cover` — reserved, always 404.
pub async fn book_cover(Path(_id): Path<String>) -> StatusCode {
    StatusCode::NOT_FOUND
}

/// `GET /api/books/{id}/download` — stream the raw file.
pub async fn download_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, FolioError> {
    state.begin_download();
    let result = raw_download(&state, &id).await;
    state.end_download();
    result
}

async fn raw_download(state: &AppState, id: &str) -> Result<Response, FolioError> {
    let access = state
        .provider
        .get_book_file_url(id)
        .ok_or_else(|| FolioError::BookNotFound(id.to_string()))?;
    let format = state
        .provider
        .get_book_format(id)
        .ok_or_else(|| FolioError::BookNotFound(id.to_string()))?;

    let file_name = access
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    stream_file(access.path(), format.mime_type(), &file_name).await
}

/// `GET /api/books/{id}/kindle` — stream a Kindle-compatible transcode,
/// following the five-step algorithm exactly (§4.7).
pub async fn download_kindle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, FolioError> {
    state.begin_download();
    let result = kindle_download(&state, &id).await;
    state.end_download();
    result
}

const CONVERSION_TIMEOUT: Duration = Duration::from_secs(300);
const KINDLE_TARGET: &str = "mobi";

async fn kindle_download(state: &AppState, id: &str) -> Result<Response, FolioError> {
    let access = state
        .provider
        .get_book_file_url(id)
        .ok_or_else(|| FolioError::BookNotFound(id.to_string()))?;
    let format = state
        .provider
        .get_book_format(id)
        .ok_or_else(|| FolioError::BookNotFound(id.to_string()))?;

    if format.kindle_native() {
        let file_name = access
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        return stream_file(access.path(), format.mime_type(), &file_name).await;
    }

    if !state.converter.is_available() {
        return Err(FolioError::Converter(ConverterError::ConverterMissing));
    }

    let source_stem = access
        .path()
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.to_string());
    let download_name = format!("{source_stem}.{KINDLE_TARGET}");

    let key = CacheKey::new(id, KINDLE_TARGET);
    if let Some(cached) = state.cache.get(&key) {
        return stream_file(&cached, "application/x-mobipocket-ebook", &download_name).await;
    }

    let _guard = state.cache.lock(&key).await;
    if let Some(cached) = state.cache.get(&key) {
        return stream_file(&cached, "application/x-mobipocket-ebook", &download_name).await;
    }

    let metadata = state.provider.get_book_metadata(id);
    let mut extra_args = Vec::new();
    if let Some(metadata) = &metadata {
        if let Some(title) = &metadata.title {
            extra_args.push("--title".to_string());
            extra_args.push(title.clone());
        }
        if !metadata.authors.is_empty() {
            extra_args.push("--authors".to_string());
            extra_args.push(metadata.authors.join(" & "));
        }
    }

    let options = ConvertOptions {
        profile: state.config.converter.default_profile.clone(),
        preserve_embedded_metadata: true,
        extra_args,
        ..Default::default()
    };

    let convert_future = state.converter.convert(access.path(), KINDLE_TARGET, options);
    let converted = match tokio::time::timeout(CONVERSION_TIMEOUT, convert_future).await {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => return Err(FolioError::Converter(e)),
        Err(_) => return Err(FolioError::ConversionTimeout),
    };

    let stored = cache_put(&state.cache, &key, &converted).await?;
    stream_file(&stored, "application/x-mobipocket-ebook", &download_name).await
}

async fn cache_put(
    cache: &ConversionCache,
    key: &CacheKey,
    source: &std::path::Path,
) -> Result<std::path::PathBuf, FolioError> {
    cache.put(key, source).await.map_err(FolioError::Io)
}

async fn stream_file(
    path: &std::path::Path,
    mime_type: &str,
    file_name: &str,
) -> Result<Response, FolioError> {
    let file = tokio::fs::File::open(path).await.map_err(FolioError::Io)?;
    let metadata = file.metadata().await.map_err(FolioError::Io)?;

    let stream = ReaderStream::new(file);
    let body = axum::body::Body::from_stream(stream);

    Ok((
        [
            (header::CONTENT_TYPE, mime_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
            (header::CONTENT_LENGTH, metadata.len().to_string()),
        ],
        body,
    )
        .into_response())
}
