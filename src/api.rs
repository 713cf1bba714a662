//! HTTP surface: routing, handlers and the JSON error envelope.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use mime_guess::{MimeGuess, mime::Mime};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, warn};

use crate::{
    config::Settings,
    extractor::{AccessDenied, ExtractError, YtDlp},
    fetch::{DEFAULT_IMAGE_TYPE, FetchError, Fetcher},
    model::{DirectUrl, IMAGE_PROXY_PATH, VideoInfo, attachment_filename},
};

const INDEX_FILE: &str = "index.html";

#[derive(Clone)]
pub struct AppState {
    extractor: YtDlp,
    fetcher: Fetcher,
    static_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(extractor: YtDlp, fetcher: Fetcher, static_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            fetcher,
            static_dir: Arc::new(static_dir.into()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            YtDlp::from_settings(settings),
            Fetcher::new(
                &settings.user_agent,
                settings.connect_timeout,
                settings.max_image_bytes,
            ),
            settings.static_dir.clone(),
        )
    }

    pub fn extractor(&self) -> &YtDlp {
        &self.extractor
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        let message = err.to_string();
        warn!(error = %message, "extraction failed");
        match AccessDenied::classify(&message) {
            Some(kind) => Self::forbidden(kind.reason()),
            None => Self::bad_request(message),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        warn!(error = %err, "upstream fetch failed");
        Self::bad_request(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                detail: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Builds the full application. API routes live under `api_prefix` (which may
/// be empty); the image proxy is additionally reachable at the root because
/// rewritten thumbnails point there.
pub fn router(state: AppState, api_prefix: &str) -> Router {
    let api = Router::new()
        .route("/info", get(info))
        .route("/download", get(download))
        .route(IMAGE_PROXY_PATH, get(proxy_image))
        .route("/health", get(health));

    let app = if api_prefix.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new()
            .nest(api_prefix, api)
            .route(IMAGE_PROXY_PATH, get(proxy_image))
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    app.route("/", get(index))
        .route("/static/{*path}", get(static_asset))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct InfoQuery {
    url: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DownloadMode {
    #[default]
    Stream,
    Direct,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    url: String,
    format_id: String,
    #[serde(default)]
    mode: DownloadMode,
}

#[derive(Debug, Deserialize)]
struct ImageQuery {
    url: String,
}

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    extractor: String,
}

async fn info(
    State(state): State<AppState>,
    Query(query): Query<InfoQuery>,
) -> ApiResult<Json<VideoInfo>> {
    let raw = state.extractor.resolve(&query.url).await?;
    Ok(Json(VideoInfo::from_raw(&raw, &query.url)))
}

/// Re-extracts on every call; direct URLs are signed and expire.
async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let raw = state.extractor.resolve(&query.url).await?;
    let format = raw
        .find_format(&query.format_id)
        .ok_or_else(|| ApiError::not_found("Format not found"))?;
    let direct_url = format
        .url
        .clone()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::not_found("Format has no direct URL"))?;

    if query.mode == DownloadMode::Direct {
        return Ok(Json(DirectUrl { direct_url }).into_response());
    }

    let filename = attachment_filename(
        raw.title.as_deref().unwrap_or_default(),
        format.ext.as_deref().unwrap_or_default(),
    );
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .map_err(|err| ApiError::internal(err.to_string()))?;
    let upstream_headers = format.http_headers.clone().unwrap_or_default();

    // The transfer task is detached; it ends on its own once the body is dropped.
    let stream = state
        .fetcher
        .open_stream(&direct_url, upstream_headers)
        .await?;
    debug!(format_id = %query.format_id, %filename, "streaming download");

    let mut response = Body::from_stream(stream.body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    if let Some(length) = stream.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}

async fn proxy_image(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> ApiResult<Response> {
    let image = match state.fetcher.image(&query.url).await {
        Ok(image) => image,
        Err(FetchError::Status(status)) => {
            debug!(status, url = %query.url, "image upstream refused");
            return Err(ApiError::not_found("Image not found"));
        }
        Err(err) => return Err(err.into()),
    };

    let content_type = HeaderValue::from_str(&image.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_IMAGE_TYPE));
    let mut response = Body::from(image.bytes).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    Ok(response)
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthPayload>> {
    let version = state
        .extractor
        .version()
        .await
        .map_err(|err| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;
    Ok(Json(HealthPayload {
        status: "ok",
        extractor: version,
    }))
}

async fn index(State(state): State<AppState>) -> ApiResult<Response> {
    stream_file(state.static_dir.join(INDEX_FILE), None).await
}

async fn static_asset(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
) -> ApiResult<Response> {
    let relative = safe_relative_path(&path).ok_or_else(|| ApiError::not_found("file not found"))?;
    stream_file(state.static_dir.join(relative), None).await
}

/// Accepts only plain relative paths; anything with `..`, a root or a drive
/// prefix is rejected.
fn safe_relative_path(raw: &str) -> Option<&Path> {
    let path = Path::new(raw);
    let plain = path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    (plain && !raw.is_empty()).then_some(path)
}

async fn stream_file(path: PathBuf, mime: Option<Mime>) -> ApiResult<Response> {
    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ApiError::not_found("file not found"));
    }
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    let guessed = mime.or_else(|| MimeGuess::from_path(&path).first());
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);
    let mut response = body.into_response();
    if let Some(mime) = guessed
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}
