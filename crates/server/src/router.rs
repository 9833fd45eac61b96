//! HTTP routing for browsing, downloads and uploads.
//!
//! Every request walks the same states: the path is resolved to a realm, a
//! provider is opened for that realm, the target is stat'd, and then either a
//! directory listing or a file stream is produced. Providers live for one
//! request; remote sessions are closed when the last owner lets go.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::TryStreamExt;
use protocol::{ListingResponse, ListingSummary, RangeSpec, UploadReport, MSG_FORBIDDEN, MSG_INVALID_OPERATION};
use serde::Deserialize;
use tokio_util::io::StreamReader;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RemoteConfig};
use crate::files::{
    root_listing, servers_listing, summarize, FilesystemProvider, FsError, LocalProvider, PathKey,
    Provider, Realm, RelPath, RemoteHost, RemoteProvider, StreamingResponder,
};

/// Multipart field name carrying uploaded files.
pub const UPLOAD_FIELD: &str = "files[]";

/// Cookie remembering the dotfile preference.
pub const HIDE_DOTFILE_COOKIE: &str = "hide-dotfile";

/// Lifetime of the dotfile preference cookie, in seconds.
const HIDE_DOTFILE_COOKIE_MAX_AGE: u64 = 16_070_400;

/// Errors that end a request.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Storage or path error.
    #[error(transparent)]
    Fs(#[from] FsError),

    /// The multipart body could not be read.
    #[error("malformed upload: {0}")]
    Upload(#[from] MultipartError),
}

impl RouterError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            RouterError::Fs(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            RouterError::Fs(FsError::ConnectionFailed(_)) => StatusCode::BAD_GATEWAY,
            RouterError::Fs(FsError::PermissionDenied(_)) => StatusCode::FORBIDDEN,
            RouterError::Fs(FsError::InvalidFilename(_)) => StatusCode::BAD_REQUEST,
            RouterError::Fs(FsError::QuotaExceeded(_)) => StatusCode::PAYLOAD_TOO_LARGE,
            RouterError::Fs(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RouterError::Upload(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match status {
            StatusCode::NOT_FOUND => "Not found",
            StatusCode::BAD_GATEWAY => "Remote host unavailable",
            StatusCode::FORBIDDEN => "Forbidden",
            StatusCode::BAD_REQUEST => "Bad request",
            StatusCode::PAYLOAD_TOO_LARGE => "Payload too large",
            _ => "Internal server error",
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request failed");
        }

        (status, body).into_response()
    }
}

/// Shared, read-only state for all requests.
#[derive(Debug, Clone)]
pub struct AppState {
    storage_root: PathBuf,
    default_user: String,
    identity_header: Option<HeaderName>,
    hide_dotfiles: bool,
    remote: RemoteConfig,
    max_upload_size: u64,
    responder: StreamingResponder,
}

impl AppState {
    /// Build the state from a validated configuration.
    pub fn from_config(config: &Config) -> Self {
        let identity_header = match config.server.identity_header.trim() {
            "" => None,
            name => match HeaderName::try_from(name) {
                Ok(header) => Some(header),
                Err(e) => {
                    warn!(header = %name, error = %e, "Ignoring invalid identity header name");
                    None
                }
            },
        };

        Self {
            storage_root: config.storage.resolved_root(),
            default_user: config.server.default_user.clone(),
            identity_header,
            hide_dotfiles: config.storage.hide_dotfiles,
            remote: config.remote.clone(),
            max_upload_size: config.transfer.max_upload_size,
            responder: StreamingResponder::new(
                config.transfer.chunk_size,
                config.transfer.cache_max_age,
            ),
        }
    }

    /// The authenticated user for a request.
    fn identity(&self, headers: &HeaderMap) -> String {
        self.identity_header
            .as_ref()
            .and_then(|name| headers.get(name))
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_user.clone())
    }

    /// Dotfile filter: query parameter, then cookie, then configuration.
    fn hide_dotfiles(&self, query: &ListingQuery, headers: &HeaderMap) -> bool {
        query
            .hide_dotfile
            .as_deref()
            .or_else(|| cookie_value(headers, HIDE_DOTFILE_COOKIE))
            .and_then(parse_flag)
            .unwrap_or(self.hide_dotfiles)
    }

    /// Whether `host` is one of the configured remote hosts.
    fn is_known_host(&self, host: &RemoteHost) -> bool {
        let port = host.port_or(self.remote.port);
        self.remote.hosts.iter().any(|entry| match RemoteHost::parse(entry) {
            Ok(known) => known.host == host.host && known.port_or(self.remote.port) == port,
            Err(_) => false,
        })
    }

    /// Open the provider backing a storage realm.
    async fn open_provider(&self, realm: &Realm) -> Result<Provider, FsError> {
        match realm {
            Realm::Local { user } => {
                let provider = LocalProvider::for_user(&self.storage_root, user)
                    .await?
                    .with_max_upload_size(self.max_upload_size);
                Ok(Provider::Local(provider))
            }
            Realm::Remote { host } => {
                if !self.is_known_host(host) {
                    debug!(host = %host, "Rejected unconfigured remote host");
                    return Err(FsError::NotFound(host.to_string()));
                }
                let provider = RemoteProvider::connect(host, &self.remote)
                    .await?
                    .with_max_upload_size(self.max_upload_size);
                Ok(Provider::Remote(provider))
            }
            Realm::Root | Realm::ServersIndex => Err(FsError::NotFound(realm.to_string())),
        }
    }
}

/// Query parameters understood on GET.
#[derive(Debug, Default, Deserialize)]
pub struct ListingQuery {
    #[serde(rename = "hide-dotfile")]
    hide_dotfile: Option<String>,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_root).post(post_root))
        .route("/*path", get(get_path).post(post_path))
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn get_root(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListingQuery>,
) -> Result<Response, RouterError> {
    serve_get(&state, "", &headers, &query).await
}

async fn get_path(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ListingQuery>,
) -> Result<Response, RouterError> {
    serve_get(&state, &path, &headers, &query).await
}

async fn post_root() -> Response {
    forbidden()
}

async fn post_path(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, RouterError> {
    let user = state.identity(&headers);
    let key = match PathKey::resolve(&path, &user) {
        Ok(key) if key.is_storage() => key,
        Ok(_) | Err(FsError::NotFound(_)) => {
            debug!(path = %path, user = %user, "Upload outside a storage realm");
            return Ok(forbidden());
        }
        Err(e) => return Err(e.into()),
    };
    debug!(path = %path, realm = %key.realm, "Resolved upload target");

    let provider = state.open_provider(&key.realm).await?;
    let result = receive_upload(&provider, &key.path, multipart).await;
    provider.close().await;
    result
}

async fn serve_get(
    state: &AppState,
    raw: &str,
    headers: &HeaderMap,
    query: &ListingQuery,
) -> Result<Response, RouterError> {
    let user = state.identity(headers);
    let hide = state.hide_dotfiles(query, headers);
    let key = PathKey::resolve(raw, &user)?;
    debug!(path = %raw, realm = %key.realm, "Resolved path");

    match key.realm {
        Realm::Root => Ok(listing_response(raw, hide, root_listing(&user))),
        Realm::ServersIndex => Ok(listing_response(raw, hide, servers_listing(&state.remote.hosts))),
        Realm::Local { .. } | Realm::Remote { .. } => {
            let provider = state.open_provider(&key.realm).await?;
            let result = serve_storage(state, &provider, &key, raw, hide, headers).await;
            provider.close().await;
            result
        }
    }
}

async fn serve_storage(
    state: &AppState,
    provider: &Provider,
    key: &PathKey,
    raw: &str,
    hide: bool,
    headers: &HeaderMap,
) -> Result<Response, RouterError> {
    let meta = provider.stat(&key.path).await?;
    debug!(
        path = %key,
        provider = provider.kind(),
        is_directory = meta.is_directory,
        size = meta.size,
        "Stat'd path"
    );

    if meta.is_directory {
        let summary = summarize(provider, &key.path, hide).await?;
        let mut response = listing_response(raw, hide, summary);
        let cookie = format!(
            "{}={}; Max-Age={}; Path=/",
            HIDE_DOTFILE_COOKIE,
            if hide { "yes" } else { "no" },
            HIDE_DOTFILE_COOKIE_MAX_AGE
        );
        if let Ok(value) = cookie.parse() {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        debug!(path = %key, "Served directory");
        return Ok(response);
    }

    // A Range header that is present but unreadable still means "a range was asked for".
    let range = RangeSpec::from_header_lenient(
        headers
            .get(header::RANGE)
            .map(|value| value.to_str().unwrap_or_default()),
    );
    let handle = provider.open_for_read(&key.path).await?;
    let filename = key.path.file_name();
    let mime = mime_guess::from_path(filename.unwrap_or_default()).first_or_octet_stream();

    let response = state
        .responder
        .respond(handle, meta.size, range, filename, mime.as_ref())?;
    debug!(path = %key, status = response.status().as_u16(), "Serving file");
    Ok(response)
}

async fn receive_upload(
    provider: &Provider,
    dir: &RelPath,
    mut multipart: Multipart,
) -> Result<Response, RouterError> {
    let meta = provider.stat(dir).await?;
    if !meta.is_directory {
        debug!(path = %dir, "Upload target is not a directory");
        return Ok(Json(UploadReport::rejected(MSG_INVALID_OPERATION)).into_response());
    }

    let mut report = UploadReport::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let submitted = field.file_name().unwrap_or_default().to_string();
        let reader = StreamReader::new(field.map_err(io::Error::other));
        tokio::pin!(reader);

        match provider.save(dir, &submitted, reader).await {
            Ok(saved) => {
                info!(
                    dir = %dir,
                    name = %saved.name,
                    size = saved.size,
                    sha256 = %saved.sha256,
                    "File saved"
                );
                report.record_saved(saved.name, saved.size, saved.sha256);
            }
            Err(e) => {
                warn!(dir = %dir, name = %submitted, error = %e, "Upload failed");
                report.record_failed(submitted, e.to_string());
            }
        }
    }

    debug!(
        dir = %dir,
        saved = report.saved_count(),
        failed = report.files.len() - report.saved_count(),
        "Upload finished"
    );
    Ok(Json(report).into_response())
}

fn listing_response(raw: &str, hide: bool, summary: ListingSummary) -> Response {
    Json(ListingResponse::new(raw, hide, summary)).into_response()
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, Json(UploadReport::rejected(MSG_FORBIDDEN))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn state_with(configure: impl FnOnce(&mut Config)) -> AppState {
        let mut config = Config::default();
        configure(&mut config);
        AppState::from_config(&config)
    }

    #[test]
    fn test_identity_defaults() {
        let state = state_with(|_| {});
        assert_eq!(state.identity(&HeaderMap::new()), "test");
    }

    #[test]
    fn test_identity_from_header() {
        let state = state_with(|c| c.server.identity_header = "X-Forwarded-User".to_string());

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-user", HeaderValue::from_static("alice"));
        assert_eq!(state.identity(&headers), "alice");

        headers.insert("x-forwarded-user", HeaderValue::from_static("  "));
        assert_eq!(state.identity(&headers), "test");
    }

    #[test]
    fn test_identity_header_ignored_when_unset() {
        let state = state_with(|_| {});
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-user", HeaderValue::from_static("alice"));
        assert_eq!(state.identity(&headers), "test");
    }

    #[test]
    fn test_hide_dotfiles_precedence() {
        let state = state_with(|c| c.storage.hide_dotfiles = true);
        let mut headers = HeaderMap::new();

        let none = ListingQuery::default();
        assert!(state.hide_dotfiles(&none, &headers));

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; hide-dotfile=no"));
        assert!(!state.hide_dotfiles(&none, &headers));

        let yes = ListingQuery {
            hide_dotfile: Some("yes".to_string()),
        };
        assert!(state.hide_dotfiles(&yes, &headers));

        let junk = ListingQuery {
            hide_dotfile: Some("maybe".to_string()),
        };
        assert!(state.hide_dotfiles(&junk, &HeaderMap::new()));
    }

    #[test]
    fn test_known_hosts() {
        let state = state_with(|c| c.remote.hosts = vec!["127.0.0.1".to_string(), "backup:2222".to_string()]);

        assert!(state.is_known_host(&RemoteHost::parse("127.0.0.1").unwrap()));
        assert!(state.is_known_host(&RemoteHost::parse("127.0.0.1:22").unwrap()));
        assert!(state.is_known_host(&RemoteHost::parse("backup:2222").unwrap()));
        assert!(!state.is_known_host(&RemoteHost::parse("backup").unwrap()));
        assert!(!state.is_known_host(&RemoteHost::parse("evil.example").unwrap()));
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (FsError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (FsError::PathTraversal("..".into()), StatusCode::NOT_FOUND),
            (FsError::IsADirectory("x".into()), StatusCode::NOT_FOUND),
            (FsError::ConnectionFailed("h".into()), StatusCode::BAD_GATEWAY),
            (FsError::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
            (FsError::QuotaExceeded("x".into()), StatusCode::PAYLOAD_TOO_LARGE),
            (FsError::Transfer("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(RouterError::from(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_error_body_hides_paths() {
        let response = RouterError::from(FsError::NotFound("/home/test/secret".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Not found");
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("a=1; hide-dotfile=yes"));
        assert_eq!(cookie_value(&headers, "hide-dotfile"), Some("yes"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
