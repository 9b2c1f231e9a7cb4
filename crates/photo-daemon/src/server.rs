use std::{path::PathBuf, sync::Arc};

use crate::config::{AppConfig, BlobBackendConfig, LOCAL_BLOB_ROUTE};
use crate::middleware::request_counter_layer;
use crate::status::{MemoryInfo, ServerStats, StatusResponse};
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use photo_core::{
    BlobStore, LocalBlobStore, PhotoRecord, PhotoRepository, RepositoryError, S3BlobStore,
    StoredPhoto, UploadError, UploadService,
};
use photo_db::Database;
use serde::Serialize;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

/// Multipart part carrying the uploaded file.
const FILE_FIELD: &str = "file";

pub struct AppState {
    pub uploads: UploadService,
    pub stats: Arc<ServerStats>,
}

impl AppState {
    pub fn new(uploads: UploadService) -> Self {
        Self {
            uploads,
            stats: Arc::new(ServerStats::new()),
        }
    }
}

/// Router options that do not live in `AppState`.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Directory served under `/blobs` when the local backend is active.
    pub blob_dir: Option<PathBuf>,
    pub cors_allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            blob_dir: None,
            cors_allowed_origins: vec!["*".to_string()],
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    let db = Database::connect(&config.db_url)
        .await
        .context("failed to open database")?;

    let (blobs, blob_dir): (Arc<dyn BlobStore>, Option<PathBuf>) = match &config.blob {
        BlobBackendConfig::S3(s3) => {
            let store = S3BlobStore::connect(s3.clone())
                .await
                .context("failed to configure S3 blob storage")?;
            (Arc::new(store), None)
        }
        BlobBackendConfig::Local { root } => {
            let store = LocalBlobStore::open(root.clone(), config.local_blob_base()?)
                .await
                .context("failed to prepare local blob directory")?;
            let dir = store.root().to_path_buf();
            (Arc::new(store), Some(dir))
        }
    };
    let photos: Arc<dyn PhotoRepository> = Arc::new(db);

    let state = Arc::new(AppState::new(UploadService::new(blobs, photos)));
    let settings = HttpSettings {
        blob_dir,
        cors_allowed_origins: config.cors_allowed_origins.clone(),
        max_upload_bytes: config.max_upload_bytes,
    };
    let app = build_app(state, &settings)?;

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listen socket")?;

    info!(addr = %config.listen_addr, "photo-daemon listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited")?;
    info!("photo-daemon stopped");
    Ok(())
}

/// Routes plus the full middleware stack. The request counter sits outermost
/// so every request is counted, including rejected and unknown ones.
pub fn build_app(state: Arc<AppState>, settings: &HttpSettings) -> Result<Router> {
    let mut router = build_router();
    if let Some(dir) = &settings.blob_dir {
        router = router.nest_service(LOCAL_BLOB_ROUTE, ServeDir::new(dir));
    }

    Ok(router
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .layer(cors_layer(&settings.cors_allowed_origins)?)
        .layer(TraceLayer::new_for_http())
        .layer(request_counter_layer(state.stats.clone()))
        .with_state(state))
}

fn build_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(server_status))
        .route("/photos", get(list_photos).post(upload_photo))
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::from(Any)
    } else {
        let values = origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid CORS origin '{origin}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        AllowOrigin::list(values)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Server time, uptime, request count and host memory", body = StatusResponse))
)]
async fn server_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(state.stats.snapshot())
}

#[utoipa::path(
    get,
    path = "/photos",
    responses(
        (status = 200, description = "All photo records, newest first", body = [PhotoResponse]),
        (status = 500, description = "Database failure", body = ErrorBody)
    )
)]
async fn list_photos(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PhotoResponse>>, ApiError> {
    let records = state.uploads.list_photos().await?;
    Ok(Json(records.into_iter().map(PhotoResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/photos",
    request_body(content = UploadPhotoForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Photo stored and recorded", body = UploadResponse),
        (status = 400, description = "Malformed multipart body or missing file part", body = ErrorBody),
        (status = 413, description = "Body exceeds the configured upload limit", body = ErrorBody),
        (status = 500, description = "Blob storage or database failure", body = ErrorBody)
    )
)]
async fn upload_photo(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let multipart =
        multipart.map_err(|rejection| ApiError::new(rejection.status(), rejection.body_text()))?;
    let (filename, content) = read_file_field(multipart).await?;
    let stored = state.uploads.handle_upload(&filename, content).await?;
    Ok((StatusCode::CREATED, Json(UploadResponse::from(stored))))
}

/// Buffers the first part named `file`. Other parts are skipped.
async fn read_file_field(mut multipart: Multipart) -> Result<(String, Bytes), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(ApiError::from)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_owned)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ApiError::bad_request("the 'file' part has no filename"))?;
        let content = field.bytes().await.map_err(ApiError::from)?;
        return Ok((filename, content));
    }

    Err(ApiError::bad_request("multipart body has no 'file' part"))
}

#[derive(Debug, Serialize, ToSchema)]
struct PhotoResponse {
    id: i64,
    photo_name: String,
    photo_url: String,
    is_deleted: bool,
    created_at: String,
    deleted_at: Option<String>,
}

impl From<PhotoRecord> for PhotoResponse {
    fn from(record: PhotoRecord) -> Self {
        Self {
            id: record.id,
            photo_name: record.photo_name,
            photo_url: record.photo_url,
            is_deleted: record.is_deleted,
            created_at: record.created_at.to_rfc3339(),
            deleted_at: record.deleted_at.map(|ts| ts.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
struct UploadResponse {
    photo_name: String,
    photo_url: String,
}

impl From<StoredPhoto> for UploadResponse {
    fn from(stored: StoredPhoto) -> Self {
        Self {
            photo_name: stored.photo_name,
            photo_url: stored.photo_url,
        }
    }
}

/// Documentation-only shape of the upload form.
#[allow(dead_code)]
#[derive(ToSchema)]
struct UploadPhotoForm {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[derive(Debug)]
struct ApiError {
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

    fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        ApiError::internal(err)
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        ApiError::internal(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::new(err.status(), err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = %self.status, message = %self.message, "api error");
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
struct ErrorBody {
    error: String,
}

pub mod docs {
    use super::*;

    #[derive(OpenApi)]
    #[openapi(
        info(title = "Photo Upload API", version = "0.1.0"),
        paths(server_status, list_photos, upload_photo),
        components(schemas(
            StatusResponse,
            MemoryInfo,
            PhotoResponse,
            UploadResponse,
            UploadPhotoForm,
            ErrorBody
        ))
    )]
    pub struct ApiDoc;
}
