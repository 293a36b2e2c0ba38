#![forbid(unsafe_code)]

//! Axum host for the downloader. Every user action arrives as a JSON request
//! against a session; the reply is the effect the page renders.
//!
//! Extractor, ffmpeg and thumbnail calls block, so they run on the blocking
//! pool. Session state sits behind a `parking_lot` mutex that is never held
//! across an `.await`.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{FromRequestParts, Path as AxumPath, Query, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header, request::Parts,
    },
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use clap::Parser;
use cookie::{Cookie, SameSite};
use grabdeck::{
    GrabError,
    bulk::{BulkReport, download_many},
    config::{RuntimeOverrides, RuntimePaths, resolve_runtime_paths},
    converter::convert_to_audio,
    downloader::{DownloadRequest, Downloader},
    extractor::{Extractor, YtDlp},
    planner::{Container, Quality},
    platform::{Platform, classify},
    playlist::Playlist,
    probe::{ProbeResult, probe},
    registry::{ArtifactRecord, Destination},
    review::{Review, submit_review},
    session::{Session, SessionHandle, SessionStore},
    thumbnail::fetch_thumbnail,
};
use mime_guess::{MimeGuess, mime::Mime};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    signal,
    time::MissedTickBehavior,
};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SESSION_COOKIE: &str = "grabdeck_session";
const SESSION_HEADER: &str = "x-session-id";

/// Command-line flags; each one wins over the environment and `.env`.
#[derive(Debug, Clone, Default, Parser)]
#[command(author, version, about = "Serve the grabdeck downloader UI and API")]
struct BackendArgs {
    /// Where finished downloads are written
    #[arg(long, value_name = "DIR")]
    downloads_dir: Option<PathBuf>,

    /// Where audio conversions are written
    #[arg(long, value_name = "DIR")]
    converted_dir: Option<PathBuf>,

    /// Static frontend directory
    #[arg(long, value_name = "DIR")]
    www_root: Option<PathBuf>,

    #[arg(long)]
    port: Option<u16>,

    /// Listen address (IPv4 or IPv6)
    #[arg(long)]
    host: Option<String>,

    /// yt-dlp executable
    #[arg(long, value_name = "PATH")]
    yt_dlp: Option<PathBuf>,

    /// ffmpeg executable
    #[arg(long, value_name = "PATH")]
    ffmpeg: Option<PathBuf>,

    /// Seconds a session may sit idle before it is dropped
    #[arg(long, value_name = "SECS")]
    session_ttl_secs: Option<u64>,

    /// Alternate `.env` file
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            downloads_dir: self.downloads_dir,
            converted_dir: self.converted_dir,
            www_root: self.www_root,
            port: self.port,
            host: self.host,
            yt_dlp: self.yt_dlp,
            ffmpeg: self.ffmpeg,
            session_ttl_secs: self.session_ttl_secs,
            env_path: self.env_file,
        }
    }
}

/// Parses the listen address; hostnames are rejected.
fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/GRABDECK_HOST")
}

#[derive(Clone)]
struct AppState {
    sessions: SessionStore,
    downloader: Downloader,
    extractor: Arc<dyn Extractor>,
    paths: Arc<RuntimePaths>,
}

impl AppState {
    fn new(paths: RuntimePaths, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            sessions: SessionStore::with_ttl(paths.session_ttl),
            downloader: Downloader::new(extractor.clone(), paths.downloads_dir.clone()),
            extractor,
            paths: Arc::new(paths),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    kind: &'static str,
    tips: &'static [&'static str],
    /// Platform labels offered back when a URL is rejected.
    supported: Vec<&'static str>,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind,
            tips: &[],
            supported: Vec::new(),
        }
    }

    /// 404 with kind `not_found`.
    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 400 for malformed or empty user input.
    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }

    /// 401 when the request carries no live session.
    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "no_session", message)
    }

    /// 500 for failures that are not the caller's fault.
    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl From<GrabError> for ApiError {
    fn from(err: GrabError) -> Self {
        let status = match &err {
            GrabError::UnsupportedPlatform { .. } | GrabError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            GrabError::ProbeFailed(_) | GrabError::DownloadFailed(_) => StatusCode::BAD_GATEWAY,
            GrabError::ThumbnailUnavailable | GrabError::NotFound(_) => StatusCode::NOT_FOUND,
            GrabError::Filesystem(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let supported = match &err {
            GrabError::UnsupportedPlatform { .. } => {
                Platform::supported().into_iter().map(Platform::label).collect()
            }
            _ => Vec::new(),
        };
        Self {
            status,
            message: err.to_string(),
            kind: err.kind(),
            tips: err.troubleshooting(),
            supported,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, kind = self.kind, "{}", self.message);
        }
        let mut body = serde_json::json!({
            "error": self.message,
            "kind": self.kind,
        });
        if !self.tips.is_empty() {
            body["tips"] = serde_json::json!(self.tips);
        }
        if !self.supported.is_empty() {
            body["supported"] = serde_json::json!(self.supported);
        }
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Runs blocking work (extractor, ffmpeg, HTTP) off the async workers.
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::internal(format!("worker failed: {err}")))
}

/// The caller's session, found via the session cookie or `x-session-id`.
#[derive(Clone)]
struct ActiveSession {
    id: String,
    handle: SessionHandle,
}

impl FromRequestParts<AppState> for ActiveSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let id = session_id_from_headers(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("no session; POST /api/session first"))?;
        let handle = state
            .sessions
            .get(&id)
            .ok_or_else(|| ApiError::unauthorized("session has ended"))?;
        Ok(Self { id, handle })
    }
}

/// `x-session-id` wins over the session cookie.
fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        && !value.is_empty()
    {
        return Some(value.to_string());
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = BackendArgs::parse();
    let paths = resolve_runtime_paths(args.into_overrides())?;
    paths.prepare()?;
    let host = parse_host_arg(&paths.host)?;
    let addr = SocketAddr::new(host, paths.port);

    let extractor: Arc<dyn Extractor> = Arc::new(YtDlp::new(paths.yt_dlp.clone()));
    let state = AppState::new(paths, extractor);
    tokio::spawn(expire_idle_sessions(state.sessions.clone()));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(%addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

/// Sweeps idle sessions a few times per TTL for the life of the process.
async fn expire_idle_sessions(sessions: SessionStore) {
    let period = (sessions.ttl() / 4).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        sessions.sweep();
    }
}

/// `RUST_LOG` filter, `info` by default.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/session", post(create_session).delete(end_session))
        .route("/api/inspect", post(inspect))
        .route("/api/thumbnail", get(thumbnail))
        .route("/api/downloads", post(start_download))
        .route("/api/downloads/batch", post(start_batch))
        .route("/api/history", get(list_history))
        .route("/api/history/{index}", delete(delete_history))
        .route("/api/history/{index}/file", get(download_history_file))
        .route("/api/private/reveal", post(reveal_private))
        .route("/api/private/delete", post(delete_private))
        .route("/api/private/file", post(download_private_file))
        .route("/api/playlists", get(list_playlists).post(create_playlist))
        .route("/api/playlists/{name}", get(get_playlist))
        .route("/api/playlists/{name}/items", post(add_playlist_item))
        .route(
            "/api/playlists/{name}/items/{index}",
            delete(remove_playlist_item),
        )
        .route("/api/playlists/{name}/download", post(download_playlist))
        .route("/api/player", get(get_player).put(set_player))
        .route("/api/player/stream", get(stream_now_playing))
        .route("/api/convert", post(convert))
        .route("/api/reviews", get(list_reviews).post(post_review))
        .fallback(static_fallback)
        .with_state(state)
}

/// Resolves on Ctrl+C.
async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("failed to install Ctrl+C handler: {err}");
    }
}

/// Unknown `/api` paths are JSON 404s; everything else is a static file.
async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_www_path(&state.paths.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

#[derive(Serialize)]
struct SessionPayload {
    session_id: String,
}

/// Starts a session and hands its id back as a cookie and in the body.
async fn create_session(State(state): State<AppState>) -> ApiResult<Response> {
    let (id, _) = state.sessions.create();
    info!(session = %id, "session created");
    let cookie = Cookie::build((SESSION_COOKIE, id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    let mut response = Json(SessionPayload { session_id: id }).into_response();
    insert_header(&mut response, header::SET_COOKIE, cookie.to_string());
    Ok(response)
}

/// Drops the session's registries and clears the cookie. Files stay.
async fn end_session(State(state): State<AppState>, session: ActiveSession) -> Response {
    state.sessions.end(&session.id);
    info!(session = %session.id, "session ended");
    let mut cookie = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    cookie.make_removal();
    let mut response = StatusCode::NO_CONTENT.into_response();
    insert_header(&mut response, header::SET_COOKIE, cookie.to_string());
    response
}

#[derive(Deserialize)]
struct UrlPayload {
    url: String,
}

#[derive(Serialize)]
struct InspectPayload {
    #[serde(flatten)]
    probe: ProbeResult,
    duration_text: String,
}

/// Classifies and probes a URL without downloading it.
async fn inspect(
    State(state): State<AppState>,
    Json(payload): Json<UrlPayload>,
) -> ApiResult<Json<InspectPayload>> {
    let url = payload.url.trim().to_string();
    if url.is_empty() {
        return Err(ApiError::bad_request("url is empty"));
    }
    if classify(&url) == Platform::Unknown {
        return Err(GrabError::UnsupportedPlatform { url }.into());
    }

    let extractor = state.extractor.clone();
    let probed = {
        let url = url.clone();
        blocking(move || probe(extractor.as_ref(), &url)).await?
    };
    let probe = probed.ok_or_else(|| GrabError::ProbeFailed(format!("could not resolve {url}")))?;
    Ok(Json(InspectPayload {
        duration_text: probe.duration_text(),
        probe,
    }))
}

/// Proxies a thumbnail image, 404 when it cannot be fetched or decoded.
async fn thumbnail(Query(payload): Query<UrlPayload>) -> ApiResult<Response> {
    let thumb = blocking(move || fetch_thumbnail(&payload.url))
        .await?
        .ok_or(GrabError::ThumbnailUnavailable)?;
    Ok(([(header::CONTENT_TYPE, thumb.mime_type())], thumb.bytes).into_response())
}

#[derive(Serialize)]
struct DownloadPayload {
    record: ArtifactRecord,
    destination: Destination,
    used_fallback: bool,
}

/// Downloads one URL, records it and makes it the now-playing track.
async fn start_download(
    State(state): State<AppState>,
    session: ActiveSession,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Json<DownloadPayload>> {
    let downloader = state.downloader.clone();
    let job = request.clone();
    let outcome = blocking(move || downloader.download(&job)).await??;

    let record = ArtifactRecord::from_outcome(&outcome, &request.url, request.container);
    let destination = {
        let mut session = session.handle.lock();
        let destination = session
            .registry
            .record(record.clone(), request.private_passphrase());
        session.play(&outcome.path);
        destination
    };
    Ok(Json(DownloadPayload {
        record,
        destination,
        used_fallback: outcome.used_fallback,
    }))
}

#[derive(Deserialize)]
struct BatchPayload {
    urls: Vec<String>,
    #[serde(default)]
    quality: Quality,
    #[serde(default)]
    container: Container,
    #[serde(default)]
    subtitles: bool,
}

#[derive(Serialize)]
struct BatchSummary {
    total: usize,
    succeeded: usize,
    skipped: Vec<String>,
    records: Vec<ArtifactRecord>,
}

/// Downloads several URLs through the bulk pool; unsupported ones are skipped.
async fn start_batch(
    State(state): State<AppState>,
    session: ActiveSession,
    Json(payload): Json<BatchPayload>,
) -> ApiResult<Json<BatchSummary>> {
    let (supported, skipped): (Vec<String>, Vec<String>) = payload
        .urls
        .iter()
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .partition(|url| classify(url).is_supported());
    if supported.is_empty() {
        return Err(ApiError::bad_request("no supported URLs in batch"));
    }

    let requests: Vec<DownloadRequest> = supported
        .iter()
        .map(|url| DownloadRequest {
            subtitles: payload.subtitles,
            ..DownloadRequest::new(url.clone(), payload.quality, payload.container)
        })
        .collect();
    let report = download_many(&state.downloader, requests).await;

    let records: Vec<ArtifactRecord> = report
        .outcomes
        .iter()
        .zip(&supported)
        .filter_map(|(outcome, url)| {
            outcome
                .as_ref()
                .map(|outcome| ArtifactRecord::from_outcome(outcome, url, payload.container))
        })
        .collect();
    {
        let mut session = session.handle.lock();
        for record in &records {
            session.registry.record_public(record.clone());
        }
    }

    Ok(Json(BatchSummary {
        total: report.total(),
        succeeded: report.succeeded,
        skipped,
        records,
    }))
}

/// History in download order.
async fn list_history(session: ActiveSession) -> Json<Vec<ArtifactRecord>> {
    Json(session.handle.lock().registry.history().to_vec())
}

/// Removes one history entry and, best effort, its file.
async fn delete_history(
    session: ActiveSession,
    AxumPath(index): AxumPath<usize>,
) -> ApiResult<Json<ArtifactRecord>> {
    let removed = session.handle.lock().registry.delete_public(index)?;
    Ok(Json(removed))
}

#[derive(Deserialize)]
struct RevealPayload {
    passphrase: String,
}

#[derive(Deserialize)]
struct PrivateEntryPayload {
    passphrase: String,
    index: usize,
}

/// Private actions need a non-empty passphrase.
fn require_passphrase(passphrase: &str) -> ApiResult<&str> {
    if passphrase.is_empty() {
        Err(ApiError::bad_request("passphrase is empty"))
    } else {
        Ok(passphrase)
    }
}

/// Lists a private bucket; an unknown passphrase yields an empty list.
async fn reveal_private(
    session: ActiveSession,
    Json(payload): Json<RevealPayload>,
) -> ApiResult<Json<Vec<ArtifactRecord>>> {
    let passphrase = require_passphrase(&payload.passphrase)?;
    Ok(Json(session.handle.lock().registry.reveal(passphrase).to_vec()))
}

/// Removes one private entry and, best effort, its file.
async fn delete_private(
    session: ActiveSession,
    Json(payload): Json<PrivateEntryPayload>,
) -> ApiResult<Json<ArtifactRecord>> {
    let passphrase = require_passphrase(&payload.passphrase)?;
    let removed = session
        .handle
        .lock()
        .registry
        .delete_private(passphrase, payload.index)?;
    Ok(Json(removed))
}

/// Sends a history artifact as an attachment.
async fn download_history_file(
    session: ActiveSession,
    AxumPath(index): AxumPath<usize>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let record = session
        .handle
        .lock()
        .registry
        .history()
        .get(index)
        .cloned()
        .ok_or_else(|| GrabError::NotFound(format!("history entry {index}")))?;
    serve_artifact(record, &headers).await
}

/// Sends a private artifact as an attachment.
async fn download_private_file(
    session: ActiveSession,
    headers: HeaderMap,
    Json(payload): Json<PrivateEntryPayload>,
) -> ApiResult<Response> {
    let passphrase = require_passphrase(&payload.passphrase)?;
    let record = session
        .handle
        .lock()
        .registry
        .reveal(passphrase)
        .get(payload.index)
        .cloned()
        .ok_or_else(|| GrabError::NotFound(format!("private entry {}", payload.index)))?;
    serve_artifact(record, &headers).await
}

/// Audio containers go out as `audio/mpeg`; video types are guessed from the
/// extension.
async fn serve_artifact(record: ArtifactRecord, headers: &HeaderMap) -> ApiResult<Response> {
    if !record.file_exists() {
        return Err(ApiError::not_found(format!(
            "{} is no longer on disk",
            record.file.display()
        )));
    }
    let mime = if record.format.is_audio() {
        "audio/mpeg".parse::<Mime>().ok()
    } else {
        None
    };
    let file_name = record
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| record.title.clone());
    let mut response = stream_file(record.file, mime, Some(headers)).await?;
    insert_header(
        &mut response,
        header::CONTENT_DISPOSITION,
        content_disposition(&file_name),
    );
    Ok(response)
}

/// `attachment` with an ASCII `filename` and a UTF-8 `filename*`.
fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_' | ' ' | '(' | ')') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(file_name)
    )
}

#[derive(Serialize)]
struct PlaylistSummary {
    name: String,
    entries: usize,
}

#[derive(Deserialize)]
struct PlaylistCreatePayload {
    name: String,
}

#[derive(Deserialize)]
struct PlaylistItemPayload {
    history_index: usize,
}

/// Playlist names with entry counts, in creation order.
async fn list_playlists(session: ActiveSession) -> Json<Vec<PlaylistSummary>> {
    let session = session.handle.lock();
    let summaries = session
        .playlists
        .names()
        .into_iter()
        .map(|name| PlaylistSummary {
            name: name.to_string(),
            entries: session
                .playlists
                .get(name)
                .map_or(0, |list| list.entries.len()),
        })
        .collect();
    Json(summaries)
}

/// Creates an empty playlist; blank or duplicate names are rejected.
async fn create_playlist(
    session: ActiveSession,
    Json(payload): Json<PlaylistCreatePayload>,
) -> ApiResult<(StatusCode, Json<Playlist>)> {
    let mut session = session.handle.lock();
    let created = session.playlists.create(&payload.name)?.clone();
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_playlist(
    session: ActiveSession,
    AxumPath(name): AxumPath<String>,
) -> ApiResult<Json<Playlist>> {
    session
        .handle
        .lock()
        .playlists
        .get(&name)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("playlist {name:?} not found")))
}

/// Copies a history entry into a playlist.
async fn add_playlist_item(
    session: ActiveSession,
    AxumPath(name): AxumPath<String>,
    Json(payload): Json<PlaylistItemPayload>,
) -> ApiResult<Json<Playlist>> {
    let mut session = session.handle.lock();
    let record = session
        .registry
        .history()
        .get(payload.history_index)
        .cloned()
        .ok_or_else(|| GrabError::NotFound(format!("history entry {}", payload.history_index)))?;
    session.playlists.add(&name, record)?;
    let updated = session
        .playlists
        .get(&name)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("playlist {name:?} not found")))?;
    Ok(Json(updated))
}

/// Removes a playlist entry. The file is left alone.
async fn remove_playlist_item(
    session: ActiveSession,
    AxumPath((name, index)): AxumPath<(String, usize)>,
) -> ApiResult<Json<ArtifactRecord>> {
    let removed = session.handle.lock().playlists.remove(&name, index)?;
    Ok(Json(removed))
}

#[derive(Deserialize, Default)]
struct PlaylistDownloadPayload {
    #[serde(default)]
    quality: Quality,
}

#[derive(Serialize)]
struct PlaylistDownloadSummary {
    total: usize,
    succeeded: usize,
}

/// Re-fetches every playlist entry and reports how many succeeded.
async fn download_playlist(
    State(state): State<AppState>,
    session: ActiveSession,
    AxumPath(name): AxumPath<String>,
    Json(payload): Json<PlaylistDownloadPayload>,
) -> ApiResult<Json<PlaylistDownloadSummary>> {
    let quality = payload.quality;
    let requests: Vec<DownloadRequest> = {
        let session = session.handle.lock();
        let playlist = session
            .playlists
            .get(&name)
            .ok_or_else(|| ApiError::not_found(format!("playlist {name:?} not found")))?;
        playlist
            .entries
            .iter()
            .map(|entry| DownloadRequest::new(entry.url.clone(), quality, entry.format))
            .collect()
    };
    if requests.is_empty() {
        return Err(ApiError::bad_request(format!("playlist {name:?} is empty")));
    }

    let BulkReport { outcomes, succeeded } = download_many(&state.downloader, requests).await;
    Ok(Json(PlaylistDownloadSummary {
        total: outcomes.len(),
        succeeded,
    }))
}

#[derive(Serialize)]
struct PlayerPayload {
    now_playing: Option<String>,
    message: Option<&'static str>,
    quick_picks: Vec<ArtifactRecord>,
}

#[derive(Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
enum PlayRequest {
    History { index: usize },
    Private { passphrase: String, index: usize },
    Playlist { name: String, index: usize },
    Stop,
}

fn player_payload(session: &Session) -> PlayerPayload {
    let now_playing = session
        .now_playing()
        .map(|path| path.to_string_lossy().into_owned());
    PlayerPayload {
        message: now_playing.is_none().then_some("nothing playing"),
        now_playing,
        quick_picks: session.quick_picks().to_vec(),
    }
}

/// Now playing plus quick picks.
async fn get_player(session: ActiveSession) -> Json<PlayerPayload> {
    Json(player_payload(&session.handle.lock()))
}

/// Plays a history, private or playlist entry, or stops playback.
async fn set_player(
    session: ActiveSession,
    Json(request): Json<PlayRequest>,
) -> ApiResult<Json<PlayerPayload>> {
    let mut session = session.handle.lock();
    let selected = match &request {
        PlayRequest::Stop => {
            session.stop();
            return Ok(Json(player_payload(&session)));
        }
        PlayRequest::History { index } => session.registry.history().get(*index).cloned(),
        PlayRequest::Private { passphrase, index } => {
            session.registry.reveal(passphrase).get(*index).cloned()
        }
        PlayRequest::Playlist { name, index } => session
            .playlists
            .get(name)
            .and_then(|list| list.entries.get(*index))
            .cloned(),
    };
    let record = selected.ok_or_else(|| ApiError::not_found("entry not found"))?;
    if !record.file_exists() {
        return Err(ApiError::not_found(format!(
            "{} is no longer on disk",
            record.file.display()
        )));
    }
    session.play(&record.file);
    Ok(Json(player_payload(&session)))
}

/// Streams the now-playing file with byte-range support.
async fn stream_now_playing(session: ActiveSession, headers: HeaderMap) -> ApiResult<Response> {
    let path = session
        .handle
        .lock()
        .now_playing()
        .map(Path::to_path_buf)
        .ok_or_else(|| ApiError::not_found("nothing playing"))?;
    stream_file(path, None, Some(&headers)).await
}

#[derive(Deserialize)]
struct ConvertPayload {
    history_index: usize,
}

#[derive(Serialize)]
struct ConvertSummary {
    path: String,
}

/// Converts a history entry to MP3 in the converted directory.
async fn convert(
    State(state): State<AppState>,
    session: ActiveSession,
    Json(payload): Json<ConvertPayload>,
) -> ApiResult<Json<ConvertSummary>> {
    let source = session
        .handle
        .lock()
        .registry
        .history()
        .get(payload.history_index)
        .map(|record| record.file.clone())
        .ok_or_else(|| GrabError::NotFound(format!("history entry {}", payload.history_index)))?;
    if !source.is_file() {
        return Err(ApiError::not_found(format!(
            "{} is no longer on disk",
            source.display()
        )));
    }

    let ffmpeg = state.paths.ffmpeg.clone();
    let converted_dir = state.paths.converted_dir.clone();
    let target = blocking(move || convert_to_audio(&ffmpeg, &source, &converted_dir))
        .await?
        .map_err(|err| ApiError::internal(format!("conversion failed: {err:#}")))?;
    Ok(Json(ConvertSummary {
        path: target.to_string_lossy().into_owned(),
    }))
}

#[derive(Deserialize)]
struct ReviewPayload {
    #[serde(default)]
    name: String,
    rating: u8,
    review: String,
}

/// Reviews, newest first.
async fn list_reviews(session: ActiveSession) -> Json<Vec<Review>> {
    Json(session.handle.lock().reviews().cloned().collect())
}

async fn post_review(
    session: ActiveSession,
    Json(payload): Json<ReviewPayload>,
) -> ApiResult<(StatusCode, Json<Review>)> {
    let review = submit_review(&payload.name, payload.rating, &payload.review)?;
    session.handle.lock().add_review(review.clone());
    Ok((StatusCode::CREATED, Json(review)))
}

/// Serves a file under the www root; directories map to `index.html`.
async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => stream_file(root.join("index.html"), None, None).await,
        Ok(_) => stream_file(target, None, None).await,
        Err(_) if should_fallback_to_index(request_path) => {
            stream_file(root.join("index.html"), None, None).await
        }
        Err(_) => Err(ApiError::not_found("file not found")),
    }
}

/// Rejects any path that would leave the www root.
fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// Extensionless paths are client-side routes and get `index.html`.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

/// Inserts a header, skipping values that are not valid header text.
fn insert_header(response: &mut Response, name: HeaderName, value: impl AsRef<str>) {
    if let Ok(value) = HeaderValue::from_str(value.as_ref()) {
        response.headers_mut().insert(name, value);
    }
}

/// Streams a file, honouring a single `Range` request. `mime` overrides the
/// type guessed from the extension.
async fn stream_file(
    path: PathBuf,
    mime: Option<Mime>,
    headers: Option<&HeaderMap>,
) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?
        .len();

    let guessed = mime.or_else(|| MimeGuess::from_path(&path).first());
    let range = headers
        .and_then(|headers| headers.get(header::RANGE))
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            insert_header(&mut response, header::CONTENT_RANGE, format!("bytes */{size}"));
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| ApiError::not_found("file not found"))?;
            let mut response = Body::from_stream(ReaderStream::new(file.take(length))).into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            insert_header(
                &mut response,
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{size}"),
            );
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        None => Body::from_stream(ReaderStream::new(file)).into_response(),
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = guessed {
        insert_header(&mut response, header::CONTENT_TYPE, mime.to_string());
    }

    Ok(response)
}

/// Parses `bytes=a-b`, `bytes=a-` and `bytes=-n` into an inclusive range.
fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let (unit, range) = value.split_once('=')?;
    if unit.trim() != "bytes" {
        return None;
    }
    let (start_str, end_str) = range.trim().split_once('-')?;

    if start_str.is_empty() {
        // "-N" is the last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix_len), size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    (end >= start).then_some((start, end))
}
