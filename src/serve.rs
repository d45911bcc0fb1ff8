use axum::{
    body::Body,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Extension, Multipart, Path, Query, Request, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use fs2::FileExt;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{self, AuthError, SessionStore};
use crate::config::AppConfig;
use crate::constants::SESSION_COOKIE;
use crate::credentials;
use crate::db::{self, DynError};
use crate::forward::{Forwarder, TelegramForwarder};
use crate::models::User;
use crate::monitor::{Monitor, MonitorError, MonitorSettings, SettingsPatch};
use crate::recorder::FfmpegRecorder;
use crate::tiktok::TikTokClient;
use crate::video::{TransformOptions, VideoError, VideoService};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

// State shared by all handlers
pub struct AppState {
    pub pool: SqlitePool,
    pub sessions: SessionStore,
    pub video: VideoService,
    pub monitor: Arc<Monitor>,
    pub max_upload_bytes: usize,
    pub session_ttl_secs: i64,
}

/// The logged-in account, inserted by the login middleware
#[derive(Clone)]
pub struct CurrentUser(pub User);

// ============================================================================
// Response helpers
// ============================================================================

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Error shape used under /live/api
fn live_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "message": message.into() })),
    )
        .into_response()
}

fn auth_error_response(e: AuthError) -> Response {
    let status = match &e {
        AuthError::MissingCredentials
        | AuthError::InvalidUsername(_)
        | AuthError::WeakPassword
        | AuthError::CannotDeleteSelf => StatusCode::BAD_REQUEST,
        AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AuthError::PendingApproval => StatusCode::FORBIDDEN,
        AuthError::UsernameTaken(_) => StatusCode::CONFLICT,
        AuthError::UserNotFound => StatusCode::NOT_FOUND,
        AuthError::Database(msg) => {
            error!("Account operation failed: {}", msg);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(status, e.to_string())
}

fn monitor_error_response(e: MonitorError) -> Response {
    let status = match &e {
        MonitorError::InvalidInput(_) | MonitorError::InvalidSettings(_) => {
            StatusCode::BAD_REQUEST
        }
        MonitorError::Duplicate(_) => StatusCode::CONFLICT,
        MonitorError::NotFound => StatusCode::NOT_FOUND,
        MonitorError::Database(msg) => {
            error!("Monitor operation failed: {}", msg);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    live_error(status, e.to_string())
}

fn video_error_response(e: VideoError) -> Response {
    let status = match &e {
        VideoError::InvalidFileType
        | VideoError::InvalidFileName
        | VideoError::InvalidOptions(_) => StatusCode::BAD_REQUEST,
        VideoError::NotFound => StatusCode::NOT_FOUND,
        VideoError::Processing(_) | VideoError::Io(_) => {
            error!("Video processing failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    json_error(status, e.to_string())
}

fn multipart_error_response(status: StatusCode, text: String) -> Response {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        json_error(StatusCode::PAYLOAD_TOO_LARGE, "File too large")
    } else {
        json_error(status, text)
    }
}

fn field_error(e: MultipartError) -> Response {
    multipart_error_response(e.status(), e.body_text())
}

fn bad_json(e: JsonRejection) -> Response {
    json_error(StatusCode::BAD_REQUEST, e.body_text())
}

// ============================================================================
// Sessions
// ============================================================================

/// Value of the session cookie, if the request carries one
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, max_age_secs
    )
}

fn with_cookie(mut response: Response, cookie: String) -> Response {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        Err(e) => error!("Failed to build session cookie: {}", e),
    }
    response
}

fn login_redirect(req: &Request) -> Response {
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let location = format!("/login?next={}", urlencoding::encode(&target));
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Reject requests without a live session of an approved account
async fn require_login(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let user_id = match session_token(req.headers()).and_then(|t| state.sessions.get(&t)) {
        Some(id) => id,
        None => return login_redirect(&req),
    };
    let user = match db::get_user_by_id(&state.pool, user_id).await {
        Ok(Some(user)) if user.is_approved() => user,
        Ok(_) => return login_redirect(&req),
        Err(e) => {
            error!("Failed to load session user {}: {}", user_id, e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };
    req.extensions_mut().insert(CurrentUser(user));
    next.run(req).await
}

async fn require_admin(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    req: Request,
    next: Next,
) -> Response {
    if !user.is_admin() {
        return json_error(StatusCode::FORBIDDEN, "Admin access required");
    }
    next.run(req).await
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router around shared state
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/health", get(health_handler))
        .route("/login", get(login_page_handler).post(login_handler))
        .route("/register", post(register_handler));

    let admin = Router::new()
        .route("/admin/users", get(admin_users_handler))
        .route("/admin/users/pending", get(admin_pending_handler))
        .route("/admin/users/{id}/approve", post(admin_approve_handler))
        .route("/admin/users/{id}", delete(admin_delete_handler))
        .route_layer(middleware::from_fn(require_admin));

    let protected = Router::new()
        .route("/logout", post(logout_handler))
        .route("/api/v1/me", get(me_handler))
        .route("/api/v1/password", post(change_password_handler))
        .route(
            "/api/v1/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(state.max_upload_bytes)),
        )
        .route("/api/v1/download/{name}", get(download_handler))
        .route("/live/api/status", get(live_status_handler))
        .route("/live/api/start", post(live_start_handler))
        .route("/live/api/stop", post(live_stop_handler))
        .route(
            "/live/api/users",
            get(live_users_handler).post(live_add_user_handler),
        )
        .route("/live/api/users/{id}", delete(live_remove_user_handler))
        .route(
            "/live/api/users/{id}/monitoring",
            post(live_set_monitoring_handler),
        )
        .route(
            "/live/api/settings",
            get(live_settings_handler).post(live_update_settings_handler),
        )
        .route("/live/api/recordings", get(live_recordings_handler))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_login));

    public
        .merge(protected)
        .fallback(not_found_handler)
        .layer(cors)
        .with_state(state)
}

async fn not_found_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "Not found")
}

async fn health_handler() -> Response {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(Deserialize)]
struct CredentialsBody {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct NextQuery {
    next: Option<String>,
}

/// Only same-site absolute paths are honoured as redirect targets
fn safe_next(next: Option<String>) -> String {
    match next {
        Some(n) if n.starts_with('/') && !n.starts_with("//") => n,
        _ => "/".to_string(),
    }
}

async fn login_page_handler(Query(query): Query<NextQuery>) -> Response {
    Json(json!({
        "message": "POST a JSON body with username and password to /login",
        "next": safe_next(query.next),
    }))
    .into_response()
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NextQuery>,
    body: Result<Json<CredentialsBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(e),
    };
    match auth::authenticate(&state.pool, &body.username, &body.password).await {
        Ok(user) => {
            let token = state.sessions.create(user.id);
            info!("User '{}' logged in", user.username);
            let response = Json(json!({
                "success": true,
                "user": user,
                "next": safe_next(query.next),
            }))
            .into_response();
            with_cookie(response, session_cookie(&token, state.session_ttl_secs))
        }
        Err(e) => {
            warn!("Failed login for '{}': {}", body.username.trim(), e);
            auth_error_response(e)
        }
    }
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CredentialsBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(e),
    };
    match auth::register(&state.pool, &body.username, &body.password).await {
        Ok(user) => {
            info!("Registered account '{}' pending approval", user.username);
            (
                StatusCode::CREATED,
                Json(json!({
                    "success": true,
                    "message": "Registration successful. Your account is pending admin approval.",
                    "user": user,
                })),
            )
                .into_response()
        }
        Err(e) => auth_error_response(e),
    }
}

async fn logout_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.sessions.remove(&token);
    }
    with_cookie(
        Json(json!({ "success": true })).into_response(),
        session_cookie("", 0),
    )
}

async fn me_handler(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Response {
    Json(json!({ "user": user })).into_response()
}

#[derive(Deserialize)]
struct PasswordBody {
    current_password: String,
    new_password: String,
}

async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    body: Result<Json<PasswordBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_json(e),
    };
    match auth::change_password(&state.pool, &user, &body.current_password, &body.new_password)
        .await
    {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => auth_error_response(e),
    }
}

async fn admin_users_handler(State(state): State<Arc<AppState>>) -> Response {
    match auth::list_users(&state.pool).await {
        Ok(users) => Json(json!({ "users": users })).into_response(),
        Err(e) => auth_error_response(e),
    }
}

async fn admin_pending_handler(State(state): State<Arc<AppState>>) -> Response {
    match auth::list_pending_users(&state.pool).await {
        Ok(users) => Json(json!({ "users": users })).into_response(),
        Err(e) => auth_error_response(e),
    }
}

async fn admin_approve_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    match auth::approve_user(&state.pool, id).await {
        Ok(user) => Json(json!({ "success": true, "user": user })).into_response(),
        Err(e) => auth_error_response(e),
    }
}

async fn admin_delete_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Response {
    match auth::delete_user(&state.pool, admin.id, id).await {
        Ok(()) => {
            state.sessions.remove_user(id);
            Json(json!({ "success": true })).into_response()
        }
        Err(e) => auth_error_response(e),
    }
}

// ============================================================================
// Video upload
// ============================================================================

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

/// Fold one multipart text field into the transformation options
fn apply_option(opts: &mut TransformOptions, name: &str, value: &str) -> Result<(), String> {
    let number = |value: &str| -> Result<Option<f64>, String> {
        if value.is_empty() {
            return Ok(None);
        }
        value
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("{} must be a number", name))
    };
    match name {
        "trim_start" => opts.trim_start = number(value)?,
        "trim_end" => opts.trim_end = number(value)?,
        "scale" => opts.scale = number(value)?,
        "zoom" => opts.zoom = number(value)?,
        "flip_horizontal" => opts.flip_horizontal = parse_flag(value),
        "strip_audio" => opts.strip_audio = parse_flag(value),
        _ => {}
    }
    Ok(())
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(e) => return multipart_error_response(e.status(), e.body_text()),
    };

    let mut file: Option<(String, Bytes)> = None;
    let mut opts = TransformOptions::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return field_error(e),
        };
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            match field.bytes().await {
                Ok(data) => file = Some((file_name, data)),
                Err(e) => return field_error(e),
            }
        } else {
            let value = match field.text().await {
                Ok(v) => v,
                Err(e) => return field_error(e),
            };
            if let Err(msg) = apply_option(&mut opts, &name, value.trim()) {
                return json_error(StatusCode::BAD_REQUEST, msg);
            }
        }
    }

    let (file_name, data) = match file {
        Some(f) => f,
        None => return json_error(StatusCode::BAD_REQUEST, "No file provided"),
    };
    if file_name.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "No file selected");
    }

    match state.video.process_upload(&file_name, &data, &opts).await {
        Ok(result) => Json(json!({ "success": true, "result": result })).into_response(),
        Err(e) => video_error_response(e),
    }
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "mp4" => "video/mp4",
        Some(ext) if ext == "mov" => "video/quicktime",
        Some(ext) if ext == "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    let path = match state.video.processed_path(&name) {
        Ok(p) => p,
        Err(e) => return video_error_response(e),
    };
    match tokio::fs::read(&path).await {
        Ok(data) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type_for(&name).to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", name),
                ),
            ],
            Body::from(data),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to read '{}': {}", path.display(), e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file")
        }
    }
}

// ============================================================================
// Live monitor API
// ============================================================================

#[derive(Serialize)]
struct LiveOk<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    data: T,
}

fn live_ok<T: Serialize>(data: T) -> Response {
    Json(LiveOk {
        success: true,
        data,
    })
    .into_response()
}

async fn live_status_handler(State(state): State<Arc<AppState>>) -> Response {
    live_ok(state.monitor.get_monitoring_status())
}

async fn live_start_handler(State(state): State<Arc<AppState>>) -> Response {
    let started = state.monitor.start_monitoring();
    let message = if started {
        "Monitoring started"
    } else {
        "Monitoring is already running"
    };
    live_ok(json!({ "started": started, "message": message }))
}

async fn live_stop_handler(State(state): State<Arc<AppState>>) -> Response {
    let stopped = state.monitor.stop_monitoring().await;
    let message = if stopped {
        "Monitoring stopped"
    } else {
        "Monitoring is not running"
    };
    live_ok(json!({ "stopped": stopped, "message": message }))
}

async fn live_users_handler(State(state): State<Arc<AppState>>) -> Response {
    live_ok(json!({ "users": state.monitor.get_monitoring_status().users }))
}

#[derive(Deserialize)]
struct AddUserBody {
    #[serde(default, alias = "input", alias = "url")]
    username: String,
}

async fn live_add_user_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AddUserBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return live_error(StatusCode::BAD_REQUEST, e.body_text()),
    };
    match state.monitor.add_user(&body.username).await {
        Ok(user) => live_ok(json!({
            "message": format!("Added {} to monitoring list", user.username),
            "user": user,
        })),
        Err(e) => monitor_error_response(e),
    }
}

async fn live_remove_user_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.monitor.remove_user(&id).await {
        Ok(()) => live_ok(json!({ "message": "Removed from monitoring" })),
        Err(e) => monitor_error_response(e),
    }
}

#[derive(Deserialize)]
struct MonitoringBody {
    monitoring: bool,
}

async fn live_set_monitoring_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<MonitoringBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return live_error(StatusCode::BAD_REQUEST, e.body_text()),
    };
    match state.monitor.set_monitoring(&id, body.monitoring).await {
        Ok(user) => live_ok(json!({ "user": user })),
        Err(e) => monitor_error_response(e),
    }
}

async fn live_settings_handler(State(state): State<Arc<AppState>>) -> Response {
    live_ok(json!({ "settings": state.monitor.get_settings() }))
}

async fn live_update_settings_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SettingsPatch>, JsonRejection>,
) -> Response {
    let Json(patch) = match body {
        Ok(b) => b,
        Err(e) => return live_error(StatusCode::BAD_REQUEST, e.body_text()),
    };
    match state.monitor.update_settings(patch) {
        Ok(settings) => live_ok(json!({ "settings": settings })),
        Err(e) => monitor_error_response(e),
    }
}

#[derive(Deserialize)]
struct RecordingsQuery {
    limit: Option<u64>,
    username: Option<String>,
}

async fn live_recordings_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecordingsQuery>,
) -> Response {
    let result = match query.username.as_deref() {
        Some(username) => state.monitor.recordings_for_user(username).await,
        None => state.monitor.recordings(query.limit).await,
    };
    match result {
        Ok(recordings) => live_ok(json!({ "recordings": recordings })),
        Err(e) => monitor_error_response(e),
    }
}

// ============================================================================
// Startup
// ============================================================================

/// Build the Telegram forwarder when a bot token can be found
fn build_forwarder(
    config: &AppConfig,
    creds: &Option<credentials::Credentials>,
) -> Option<Arc<dyn Forwarder>> {
    let profile = match config.telegram.credential_profile.as_deref() {
        Some(p) => p,
        None => {
            if config.telegram.enabled {
                warn!("telegram.enabled is set but telegram.credential_profile is missing; recordings will stay local");
            }
            return None;
        }
    };
    match credentials::telegram_token(creds, profile) {
        Ok(token) => Some(Arc::new(TelegramForwarder::new(&config.telegram.api_url, token))),
        Err(e) => {
            warn!("Telegram forwarding unavailable: {}", e);
            None
        }
    }
}

/// Open storage and wire every service into the shared state
pub async fn build_state(config: &AppConfig) -> Result<Arc<AppState>, DynError> {
    let pool = db::open_database(&config.database_path).await?;
    db::init_database_schema(&pool).await?;
    auth::seed_admin(&pool, &config.admin.username, &config.admin.password)
        .await
        .map_err(|e| format!("Failed to seed admin account: {}", e))?;

    let creds = credentials::load_credentials()?;
    let cookies = credentials::tiktok_cookies(&creds, config.tiktok.credential_profile.as_deref())?;
    let probe = Arc::new(TikTokClient::new(&config.tiktok, &cookies)?);
    let recorder = Arc::new(FfmpegRecorder::new(config.monitor.ffmpeg_path.clone()));
    let forwarder = build_forwarder(config, &creds);

    let monitor = Monitor::new(
        pool.clone(),
        MonitorSettings::from_config(config),
        config.monitor.autostart,
        probe,
        recorder,
        forwarder,
    );
    monitor.load_from_db().await?;

    let video = VideoService::new(
        config.upload_dir.clone(),
        config.processed_dir(),
        config.allowed_extensions.clone(),
        config.monitor.ffmpeg_path.clone(),
    );

    Ok(Arc::new(AppState {
        pool,
        sessions: SessionStore::new(config.session_ttl_hours),
        video,
        monitor,
        max_upload_bytes: config.max_upload_bytes(),
        session_ttl_secs: config.session_ttl_hours * 3600,
    }))
}

/// Run the web application until Ctrl-C
pub fn serve_app(config: AppConfig) -> Result<(), DynError> {
    // One server per database
    let lock_path = config.database_path.with_extension("lock");
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let lock_file = File::create(&lock_path)
        .map_err(|e| format!("Failed to create lock file '{}': {}", lock_path.display(), e))?;
    lock_file.try_lock_exclusive().map_err(|e| {
        format!(
            "Another instance is already serving '{}'. Lock file: {}. Error: {}",
            config.database_path.display(),
            lock_path.display(),
            e
        )
    })?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let state = build_state(&config).await?;

        if config.monitor.autostart && state.monitor.target_count() > 0 {
            state.monitor.start_monitoring();
        }

        let sessions_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                let purged = sessions_state.sessions.purge_expired();
                if purged > 0 {
                    info!("Purged {} expired session(s)", purged);
                }
            }
        });

        let addr = format!("{}:{}", config.host, config.port);
        println!("Database: {}", config.database_path.display());
        println!("Uploads: {}", config.upload_dir.display());
        println!("Recordings: {}", config.recordings_dir().display());
        println!("Listening on: http://{}", addr);
        println!("Endpoints:");
        println!("  GET  /health");
        println!("  POST /login, /register, /logout");
        println!("  POST /api/v1/upload  - upload and transform a video");
        println!("  GET  /api/v1/download/{{name}}  - fetch a processed video");
        println!("  GET  /live/api/status  - live monitor state");
        println!("  GET  /admin/users  - account administration");

        let app = build_router(state.clone());
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                info!("Shutting down");
            })
            .await
            .map_err(|e| format!("Server error: {}", e))?;

        state.monitor.stop_monitoring().await;
        Ok::<(), DynError>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; tiktok_reup_session=abc123; other=1"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc123"));

        let mut empty = HeaderMap::new();
        empty.insert(header::COOKIE, HeaderValue::from_static("tiktok_reup_session="));
        assert_eq!(session_token(&empty), None);
        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_safe_next_rejects_offsite_targets() {
        assert_eq!(safe_next(Some("/live/api/status".to_string())), "/live/api/status");
        assert_eq!(safe_next(Some("//evil.example".to_string())), "/");
        assert_eq!(safe_next(Some("https://evil.example".to_string())), "/");
        assert_eq!(safe_next(None), "/");
    }

    #[test]
    fn test_apply_option() {
        let mut opts = TransformOptions::default();
        apply_option(&mut opts, "trim_start", "1.5").unwrap();
        apply_option(&mut opts, "zoom", "").unwrap();
        apply_option(&mut opts, "flip_horizontal", "on").unwrap();
        apply_option(&mut opts, "unknown", "x").unwrap();
        assert_eq!(opts.trim_start, Some(1.5));
        assert_eq!(opts.zoom, None);
        assert!(opts.flip_horizontal);
        assert!(apply_option(&mut opts, "scale", "big").is_err());
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.MP4"), "video/mp4");
        assert_eq!(content_type_for("a.mkv"), "video/x-matroska");
        assert_eq!(content_type_for("a"), "application/octet-stream");
    }
}
