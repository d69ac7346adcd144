//! Axum routes for the upload page.

use crate::config::Config;
use crate::scratch::{self, ScratchFile};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::{Html, Json};
use axum::routing::{get, post};
use axum::Router;
use facematch_core::{ComparisonResult, FaceProcessor, ModelStatus};
use serde::Serialize;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

const INDEX_HTML: &str = include_str!("../static/index.html");
const UPLOAD_URL_PREFIX: &str = "/static/uploads";

pub struct AppState {
    pub processor: Arc<FaceProcessor>,
    pub config: Config,
}

pub fn router(state: Arc<AppState>) -> Router {
    let uploads = ServeDir::new(&state.config.upload_dir);
    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload))
        .route("/clear", post(clear))
        .route("/health", get(health))
        .nest_service(UPLOAD_URL_PREFIX, uploads)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `{success, message}` body used for every non-comparison reply.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self { success: true, message: message.into() })
    }

    fn failure(message: impl Into<String>) -> Json<Self> {
        Json(Self { success: false, message: message.into() })
    }
}

fn server_error(e: impl std::fmt::Display) -> Json<MessageResponse> {
    tracing::error!(error = %e, "upload failed");
    MessageResponse::failure(format!("Server error: {e}"))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub result: ComparisonResult,
    pub image1_url: String,
    pub image2_url: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub models: ModelStatus,
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        models: state.processor.status(),
    })
}

struct UploadedImage {
    filename: String,
    data: Bytes,
}

/// Pull the `image1` and `image2` file fields out of the form.
async fn read_images(
    mut multipart: Multipart,
) -> Result<(Option<UploadedImage>, Option<UploadedImage>), axum::extract::multipart::MultipartError> {
    let mut image1 = None;
    let mut image2 = None;

    while let Some(field) = multipart.next_field().await? {
        let slot = match field.name() {
            Some("image1") => &mut image1,
            Some("image2") => &mut image2,
            _ => continue,
        };
        let filename = field.file_name().unwrap_or_default().to_owned();
        let data = field.bytes().await?;
        *slot = Some(UploadedImage { filename, data });
    }

    Ok((image1, image2))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, Json<MessageResponse>> {
    let (image1, image2) = read_images(multipart).await.map_err(server_error)?;

    let (Some(image1), Some(image2)) = (image1, image2) else {
        return Err(MessageResponse::failure("Both images are required"));
    };
    if image1.filename.is_empty() || image2.filename.is_empty() {
        return Err(MessageResponse::failure("Please select both images"));
    }
    if !(scratch::allowed_file(&image1.filename) && scratch::allowed_file(&image2.filename)) {
        return Err(MessageResponse::failure(
            "Invalid file type. Please use PNG, JPG, JPEG, GIF, BMP, or TIFF",
        ));
    }

    let dir = &state.config.upload_dir;
    let file1 = ScratchFile::write(dir, scratch::unique_name(&image1.filename, "upload1"), &image1.data)
        .await
        .map_err(server_error)?;
    let file2 = ScratchFile::write(dir, scratch::unique_name(&image2.filename, "upload2"), &image2.data)
        .await
        .map_err(server_error)?;

    let processor = Arc::clone(&state.processor);
    let (path1, path2) = (file1.path().to_path_buf(), file2.path().to_path_buf());
    let result = tokio::task::spawn_blocking(move || processor.compare_faces(&path1, &path2))
        .await
        .map_err(server_error)?;

    tracing::info!(
        success = result.success,
        likelihood = result.likelihood,
        same = result.is_same_person,
        "comparison served"
    );

    Ok(Json(UploadResponse {
        result,
        image1_url: format!("{UPLOAD_URL_PREFIX}/{}", file1.name()),
        image2_url: format!("{UPLOAD_URL_PREFIX}/{}", file2.name()),
    }))
}

async fn clear(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    match scratch::clear_dir(&state.config.upload_dir).await {
        Ok(removed) => {
            tracing::info!(removed, "upload directory cleared");
            MessageResponse::ok("Upload directory cleared")
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to clear uploads");
            MessageResponse::failure(format!("Error clearing uploads: {e}"))
        }
    }
}
