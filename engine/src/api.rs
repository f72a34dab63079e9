// --- HTTP API -------------------------------------------------------------------
//
// Thin translation from JSON requests to supervisor calls. Every supervisor
// call goes through the one `Mutex`, which is what serializes mutations; a
// geometry restart holds it until the new session is up.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::ipc::MediaChannel;
use crate::player::{
    Geometry, PlayRequest, PlayerError, Resolution, StatusSnapshot, Supervisor, DEFAULT_VOLUME,
};
use crate::presets::{self, PresetEntry, Presets};
use crate::process::MediaProcess;
use crate::watchdog::{SharedStats, WatchdogStats};

/// Video container extensions listed by `/api/v1/files`.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "webm", "flv", "wmv", "m4v"];

pub struct AppState<C, P> {
    pub version: String,
    pub supervisor: Arc<Mutex<Supervisor<C, P>>>,
    pub presets: Arc<Mutex<Presets>>,
    pub db_path: String,
    pub watchdog: SharedStats,
}

// Manual impl: derive would demand `C: Clone, P: Clone`.
impl<C, P> Clone for AppState<C, P> {
    fn clone(&self) -> Self {
        Self {
            version: self.version.clone(),
            supervisor: self.supervisor.clone(),
            presets: self.presets.clone(),
            db_path: self.db_path.clone(),
            watchdog: self.watchdog.clone(),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<PlayerError> for ApiError {
    fn from(e: PlayerError) -> Self {
        let status = match e {
            PlayerError::Validation(_) => StatusCode::BAD_REQUEST,
            PlayerError::NotFound(_) => StatusCode::NOT_FOUND,
            PlayerError::LaunchFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PlayerError::CommandFailure(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

// Malformed bodies get the same `{"error"}` shape as every other failure.
impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::bad_request(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("api error {}: {}", self.status, self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

pub fn build_router<C, P>(state: AppState<C, P>) -> Router
where
    C: MediaChannel + 'static,
    P: MediaProcess + 'static,
{
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/v1/ping", get(ping::<C, P>))
        .route("/api/v1/play", post(api_play::<C, P>))
        .route("/api/v1/stop", post(api_stop::<C, P>))
        .route("/api/v1/pause", post(api_pause::<C, P>))
        .route("/api/v1/seek", post(api_seek::<C, P>))
        .route("/api/v1/seek-relative", post(api_seek_relative::<C, P>))
        .route("/api/v1/volume", post(api_volume::<C, P>))
        .route("/api/v1/geometry", post(api_geometry::<C, P>))
        .route("/api/v1/status", get(api_status::<C, P>))
        .route(
            "/api/v1/display/resolution",
            get(api_get_resolution::<C, P>).post(api_set_resolution::<C, P>),
        )
        .route(
            "/api/v1/presets",
            get(api_list_presets::<C, P>).post(api_save_preset::<C, P>),
        )
        .route("/api/v1/presets/:name/load", post(api_load_preset::<C, P>))
        .route(
            "/api/v1/presets/:name",
            axum::routing::delete(api_delete_preset::<C, P>),
        )
        .route("/api/v1/files", get(api_list_files::<C, P>))
        .route("/api/v1/watchdog", get(api_watchdog::<C, P>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ping<C, P>(State(state): State<AppState<C, P>>) -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "version": state.version }))
}

// --- Playback control ---

#[derive(Deserialize)]
struct PlayBody {
    source: Option<String>,
    #[serde(rename = "loop")]
    loop_playback: Option<bool>,
    volume: Option<f64>,
}

async fn api_play<C, P>(
    State(state): State<AppState<C, P>>,
    body: Result<Json<PlayBody>, JsonRejection>,
) -> ApiResult
where
    C: MediaChannel,
    P: MediaProcess,
{
    let Json(body) = body?;
    let source = body
        .source
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("No source provided"))?;

    let req = PlayRequest {
        source,
        loop_playback: Some(body.loop_playback.unwrap_or(true)),
        volume: Some(body.volume.map_or(DEFAULT_VOLUME, |v| v.round() as i64)),
        seek_to: None,
    };

    let st = state.supervisor.lock().await.play(req).await?;
    Ok(Json(json!({ "status": st.status, "source": st.source })))
}

async fn api_stop<C, P>(State(state): State<AppState<C, P>>) -> ApiResult
where
    C: MediaChannel,
    P: MediaProcess,
{
    let st = state.supervisor.lock().await.stop().await;
    Ok(Json(json!({ "status": st.status })))
}

async fn api_pause<C, P>(State(state): State<AppState<C, P>>) -> ApiResult
where
    C: MediaChannel,
    P: MediaProcess,
{
    let status = state.supervisor.lock().await.pause().await;
    Ok(Json(json!({ "status": status })))
}

#[derive(Deserialize)]
struct SeekBody {
    position: Option<f64>,
}

async fn api_seek<C, P>(
    State(state): State<AppState<C, P>>,
    body: Result<Json<SeekBody>, JsonRejection>,
) -> ApiResult
where
    C: MediaChannel,
    P: MediaProcess,
{
    let Json(body) = body?;
    let position = body
        .position
        .ok_or_else(|| ApiError::bad_request("No position provided"))?;
    let acked = state.supervisor.lock().await.seek(position).await;
    Ok(Json(json!({ "status": "ok", "position": position, "acked": acked })))
}

#[derive(Deserialize)]
struct SeekRelativeBody {
    #[serde(default)]
    seconds: f64,
}

async fn api_seek_relative<C, P>(
    State(state): State<AppState<C, P>>,
    body: Result<Json<SeekRelativeBody>, JsonRejection>,
) -> ApiResult
where
    C: MediaChannel,
    P: MediaProcess,
{
    let Json(body) = body?;
    let acked = state.supervisor.lock().await.seek_relative(body.seconds).await;
    Ok(Json(json!({ "status": "ok", "acked": acked })))
}

#[derive(Deserialize)]
struct VolumeBody {
    volume: Option<f64>,
}

async fn api_volume<C, P>(
    State(state): State<AppState<C, P>>,
    body: Result<Json<VolumeBody>, JsonRejection>,
) -> ApiResult
where
    C: MediaChannel,
    P: MediaProcess,
{
    let Json(body) = body?;
    let volume = body
        .volume
        .ok_or_else(|| ApiError::bad_request("No volume provided"))?;
    let stored = state
        .supervisor
        .lock()
        .await
        .set_volume(volume.round() as i64)
        .await;
    Ok(Json(json!({ "status": "ok", "volume": stored })))
}

#[derive(Deserialize)]
struct GeometryBody {
    x: Option<i32>,
    y: Option<i32>,
    width: Option<i32>,
    height: Option<i32>,
}

impl GeometryBody {
    fn validate(self) -> Result<Geometry, PlayerError> {
        let (Some(x), Some(y), Some(width), Some(height)) = (self.x, self.y, self.width, self.height)
        else {
            return Err(PlayerError::Validation("Missing geometry parameters".into()));
        };
        validate_geometry(Geometry { x, y, width, height })
    }
}

fn validate_geometry(g: Geometry) -> Result<Geometry, PlayerError> {
    if g.width <= 0 || g.height <= 0 {
        return Err(PlayerError::Validation(
            "width and height must be positive".into(),
        ));
    }
    Ok(g)
}

async fn api_geometry<C, P>(
    State(state): State<AppState<C, P>>,
    body: Result<Json<GeometryBody>, JsonRejection>,
) -> ApiResult
where
    C: MediaChannel,
    P: MediaProcess,
{
    let Json(body) = body?;
    let geometry = body.validate()?;
    let geometry = state.supervisor.lock().await.set_geometry(geometry).await?;
    Ok(Json(json!({ "status": "ok", "geometry": geometry })))
}

async fn api_status<C, P>(State(state): State<AppState<C, P>>) -> Json<StatusSnapshot>
where
    C: MediaChannel,
    P: MediaProcess,
{
    Json(state.supervisor.lock().await.status().await)
}

// --- Display ---

async fn api_get_resolution<C, P>(State(state): State<AppState<C, P>>) -> Json<Resolution>
where
    C: MediaChannel,
    P: MediaProcess,
{
    Json(state.supervisor.lock().await.display_resolution())
}

#[derive(Deserialize)]
struct ResolutionBody {
    width: Option<u32>,
    height: Option<u32>,
}

async fn api_set_resolution<C, P>(
    State(state): State<AppState<C, P>>,
    body: Result<Json<ResolutionBody>, JsonRejection>,
) -> Result<Json<Resolution>, ApiError>
where
    C: MediaChannel,
    P: MediaProcess,
{
    let Json(body) = body?;
    let (Some(width), Some(height)) = (body.width, body.height) else {
        return Err(ApiError::bad_request("Width and height required"));
    };
    if width == 0 || height == 0 {
        return Err(ApiError::bad_request("Width and height required"));
    }
    let res = Resolution { width, height };
    state.supervisor.lock().await.set_display_resolution(res);
    Ok(Json(res))
}

// --- Presets ---

async fn api_list_presets<C, P>(State(state): State<AppState<C, P>>) -> Json<Presets> {
    Json(state.presets.lock().await.clone())
}

#[derive(Deserialize)]
struct SavePresetBody {
    name: Option<String>,
    geometry: Option<Geometry>,
    #[serde(default)]
    description: String,
}

async fn api_save_preset<C, P>(
    State(state): State<AppState<C, P>>,
    body: Result<Json<SavePresetBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let (Some(name), Some(geometry)) = (body.name.filter(|n| !n.trim().is_empty()), body.geometry)
    else {
        return Err(ApiError::bad_request("Name and geometry required"));
    };
    let geometry = validate_geometry(geometry)?;
    let entry = PresetEntry {
        geometry,
        description: body.description,
    };

    presets::persist_preset(state.db_path.clone(), name.clone(), entry.clone())
        .await
        .map_err(|e| ApiError::internal(format!("Failed to save preset: {e}")))?;
    state.presets.lock().await.insert(name.clone(), entry);

    Ok(Json(json!({ "status": "saved", "name": name })))
}

async fn api_load_preset<C, P>(
    State(state): State<AppState<C, P>>,
    Path(name): Path<String>,
) -> ApiResult
where
    C: MediaChannel,
    P: MediaProcess,
{
    let entry = state.presets.lock().await.get(&name).cloned();
    let Some(entry) = entry else {
        return Err(ApiError::not_found("Preset not found"));
    };

    let geometry = state
        .supervisor
        .lock()
        .await
        .set_geometry(entry.geometry)
        .await?;
    Ok(Json(json!({ "status": "loaded", "geometry": geometry })))
}

async fn api_delete_preset<C, P>(
    State(state): State<AppState<C, P>>,
    Path(name): Path<String>,
) -> ApiResult {
    if !state.presets.lock().await.contains_key(&name) {
        return Err(ApiError::not_found("Preset not found"));
    }

    presets::persist_delete(state.db_path.clone(), name.clone())
        .await
        .map_err(|e| ApiError::internal(format!("Failed to delete preset: {e}")))?;
    state.presets.lock().await.remove(&name);

    Ok(Json(json!({ "status": "deleted", "name": name })))
}

// --- Media listing ---

#[derive(Debug, Serialize, PartialEq)]
pub struct MediaFile {
    pub name: String,
    pub size: u64,
    /// Unix seconds.
    pub modified: u64,
}

pub fn list_media_files(dir: &std::path::Path) -> anyhow::Result<Vec<MediaFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for ent in std::fs::read_dir(dir)
        .map_err(|e| anyhow::anyhow!("failed to read_dir({}): {e}", dir.display()))?
    {
        let ent = ent?;
        let path = ent.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            continue;
        }

        let meta = ent.metadata()?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        out.push(MediaFile {
            name: ent.file_name().to_string_lossy().to_string(),
            size: meta.len(),
            modified,
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

async fn api_list_files<C, P>(State(state): State<AppState<C, P>>) -> Result<Json<Vec<MediaFile>>, ApiError>
where
    C: MediaChannel,
    P: MediaProcess,
{
    let dir = state.supervisor.lock().await.media_dir().to_path_buf();
    let files = tokio::task::spawn_blocking(move || list_media_files(&dir))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(files))
}

async fn api_watchdog<C, P>(State(state): State<AppState<C, P>>) -> Json<WatchdogStats> {
    Json(state.watchdog.lock().await.clone())
}
