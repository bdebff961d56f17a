//!
//! docgate HTTP server
//! -------------------
//! Axum-based HTTP surface for the document-sharing service.
//!
//! Responsibilities:
//! - Cookie session gate mapping a session id to a verified email (24h TTL).
//! - Login-code request/verify endpoints backed by the `token` module.
//! - Permission-gated PDF streaming with caching disabled.
//! - Admin endpoints: multipart PDF upload, access grants, data listing.
//! - Page routes redirect unauthenticated callers to the login page; API and
//!   data routes answer with status JSON instead.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::{Duration, Instant}};

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::blob::{BlobReader, SharedBlobStore};
use crate::error::AppError;
use crate::mail::SharedMailer;
use crate::store::SharedStore;
use crate::{access, docs, token};

const SESSION_COOKIE: &str = "docgate_session";
const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// One authenticated session. Checked lazily: an expired entry is dropped on
/// the first lookup that sees it.
#[derive(Debug, Clone)]
struct SessionEntry {
    email: String,
    expires_at: Instant,
}

/// Shared server state injected into all handlers.
///
/// Holds the collaborator seams (persistence store, blob store, mail sender)
/// and the session id -> email mapping. Sessions are in-process only.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub blobs: SharedBlobStore,
    pub mailer: SharedMailer,
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl AppState {
    pub fn new(store: SharedStore, blobs: SharedBlobStore, mailer: SharedMailer) -> Self {
        Self {
            store,
            blobs,
            mailer,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

/// Mount all routes onto a router bound to the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/request-login", post(request_login))
        .route("/verify", post(verify))
        .route("/logout", get(logout))
        .route("/grant-access", post(grant_access))
        .route("/upload", post(upload))
        .route("/pdf-data/{doc_id}", get(pdf_data))
        .route("/api/dashboard", get(api_dashboard))
        .route("/api/data", get(api_data))
        // Multipart bodies up to the PDF cap plus framing overhead.
        .layer(DefaultBodyLimit::max(docs::MAX_UPLOAD_BYTES + 64 * 1024))
        .with_state(state)
}

/// Start the docgate HTTP server on the given port.
pub async fn run_with_port(http_port: u16, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Session gate
// ---------------------------------------------------------------------------

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name {
                return Some(v[1..].to_string());
            }
        }
    }
    None
}

fn gen_sid() -> crate::error::AppResult<String> {
    let mut bytes = [0u8; 16];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| AppError::store(format!("rng failure: {e}")))?;
    let mut sid = String::with_capacity(32);
    use std::fmt::Write as _;
    for b in &bytes {
        let _ = write!(&mut sid, "{:02x}", b);
    }
    Ok(sid)
}

fn set_session_cookie(sid: &str) -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/",
        SESSION_COOKIE, sid
    ))
    .unwrap()
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax; Path=/",
        SESSION_COOKIE
    ))
    .unwrap()
}

/// Resolve the authenticated email for a request, dropping the session if it
/// has expired. Two-phase: read under the shared lock, remove under the
/// exclusive one only when needed.
async fn authed_email(state: &AppState, headers: &HeaderMap) -> Option<String> {
    let sid = parse_cookie(headers, SESSION_COOKIE)?;
    let now = Instant::now();
    let mut drop_sid = false;
    let out = {
        let map = state.sessions.read().await;
        match map.get(&sid) {
            Some(ent) if ent.expires_at > now => Some(ent.email.clone()),
            Some(_) => {
                drop_sid = true;
                None
            }
            None => None,
        }
    };
    if drop_sid {
        state.sessions.write().await.remove(&sid);
    }
    out
}

/// Create a session for a verified email. The map write completes before this
/// returns, so the follow-up redirect always sees the session.
async fn create_session(state: &AppState, email: &str) -> crate::error::AppResult<String> {
    let sid = gen_sid()?;
    let entry = SessionEntry {
        email: email.to_string(),
        expires_at: Instant::now() + SESSION_TTL,
    };
    state.sessions.write().await.insert(sid.clone(), entry);
    Ok(sid)
}

/// Body extractor for endpoints posted both by HTML forms and by API
/// clients: JSON when the content type says so, urlencoded form otherwise.
struct FormOrJson<T>(T);

impl<S, T> FromRequest<S> for FormOrJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);
        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(FormOrJson(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            Ok(FormOrJson(value))
        }
    }
}

fn error_json(err: &AppError) -> (StatusCode, Json<serde_json::Value>) {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({"status": "error", "code": err.code_str(), "message": err.message()})),
    )
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::UNAUTHORIZED, Json(json!({"status": "unauthorized"})))
}

// ---------------------------------------------------------------------------
// Auth routes (page-facing: errors are plain text, success is a redirect)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RequestLoginPayload {
    email: String,
}

async fn request_login(
    State(state): State<AppState>,
    FormOrJson(payload): FormOrJson<RequestLoginPayload>,
) -> Response {
    match token::request_login(state.store.as_ref(), state.mailer.as_ref(), &payload.email).await {
        Ok(email) => {
            Redirect::to(&format!("/verify.html?email={}", urlencoding::encode(&email)))
                .into_response()
        }
        Err(e @ AppError::Validation { .. }) => {
            (StatusCode::BAD_REQUEST, e.message().to_string()).into_response()
        }
        Err(e @ AppError::Delivery { .. }) => {
            error!("login code delivery failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error sending login code. Please check if the email is valid.".to_string(),
            )
                .into_response()
        }
        Err(e) => {
            error!("request-login failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error requesting login code.".to_string())
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifyPayload {
    email: String,
    code: String,
}

async fn verify(
    State(state): State<AppState>,
    FormOrJson(payload): FormOrJson<VerifyPayload>,
) -> Response {
    match token::verify(state.store.as_ref(), &payload.email, &payload.code).await {
        Ok(email) => {
            let sid = match create_session(&state, &email).await {
                Ok(sid) => sid,
                Err(e) => {
                    error!("session creation failed: {e}");
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Error during verification.".to_string(),
                    )
                        .into_response();
                }
            };
            let mut headers = HeaderMap::new();
            headers.insert("Set-Cookie", set_session_cookie(&sid));
            headers.insert("Location", HeaderValue::from_static("/dashboard.html"));
            (StatusCode::SEE_OTHER, headers).into_response()
        }
        Err(e @ (AppError::InvalidToken | AppError::ExpiredToken)) => {
            (StatusCode::BAD_REQUEST, e.message().to_string()).into_response()
        }
        Err(e) => {
            error!("verification failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error during verification.".to_string())
                .into_response()
        }
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(sid) = parse_cookie(&headers, SESSION_COOKIE) {
        state.sessions.write().await.remove(&sid);
    }
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_session_cookie());
    h.insert("Location", HeaderValue::from_static("/login.html"));
    (StatusCode::SEE_OTHER, h).into_response()
}

async fn root() -> Redirect {
    Redirect::to("/login.html")
}

// ---------------------------------------------------------------------------
// Admin routes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GrantPayload {
    email: String,
    #[serde(rename = "documentId")]
    document_id: String,
}

async fn grant_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    FormOrJson(payload): FormOrJson<GrantPayload>,
) -> Response {
    let Some(_admin) = authed_email(&state, &headers).await else {
        return unauthorized().into_response();
    };
    match access::grant_access(state.store.as_ref(), &payload.email, &payload.document_id).await {
        Ok(_created) => Redirect::to("/permissions.html").into_response(),
        Err(e) => {
            error!("grant-access failed: {e}");
            error_json(&e).into_response()
        }
    }
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let Some(_admin) = authed_email(&state, &headers).await else {
        return unauthorized().into_response();
    };

    // Single expected field: pdfFile. Anything else is skipped.
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => {
                warn!("multipart read failed: {e}");
                return error_json(&AppError::validation("Malformed upload body.")).into_response();
            }
        };
        if field.name() != Some("pdfFile") {
            continue;
        }
        let original_name = field.file_name().unwrap_or("document.pdf").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let bytes = match field.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!("upload body read failed: {e}");
                return error_json(&AppError::validation("Upload body too large or truncated."))
                    .into_response();
            }
        };
        return match docs::store_document(
            state.store.as_ref(),
            state.blobs.as_ref(),
            &original_name,
            &content_type,
            &bytes,
        )
        .await
        {
            Ok(_doc) => Redirect::to("/permissions.html").into_response(),
            Err(e) => {
                error!("upload failed: {e}");
                error_json(&e).into_response()
            }
        };
    }
    error_json(&AppError::validation("Missing pdfFile field.")).into_response()
}

async fn api_data(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(_email) = authed_email(&state, &headers).await else {
        return unauthorized().into_response();
    };
    let documents = match state.store.list_documents().await {
        Ok(d) => d,
        Err(e) => return error_json(&e).into_response(),
    };
    let permissions = match state.store.list_permissions().await {
        Ok(p) => p,
        Err(e) => return error_json(&e).into_response(),
    };
    Json(json!({"documents": documents, "permissions": permissions})).into_response()
}

// ---------------------------------------------------------------------------
// User routes
// ---------------------------------------------------------------------------

async fn api_dashboard(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(email) = authed_email(&state, &headers).await else {
        return unauthorized().into_response();
    };
    match access::documents_for(state.store.as_ref(), &email).await {
        Ok(docs) => Json(docs).into_response(),
        Err(e) => {
            error!("dashboard listing failed: {e}");
            error_json(&e).into_response()
        }
    }
}

/// Chunked body over the blob reader. A mid-stream I/O error terminates the
/// body; headers are already committed at that point, so there is no second
/// status write and no retry.
fn pdf_body(reader: BlobReader) -> Body {
    let stream = futures_util::stream::try_unfold(reader, |mut r| async move {
        let mut buf = vec![0u8; 64 * 1024];
        let n = r.read(&mut buf).await.inspect_err(|e| {
            error!("error streaming PDF blob: {e}");
        })?;
        if n == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        buf.truncate(n);
        Ok(Some((Bytes::from(buf), r)))
    });
    Body::from_stream(stream)
}

async fn pdf_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(doc_id): Path<String>,
) -> Response {
    let Some(email) = authed_email(&state, &headers).await else {
        return unauthorized().into_response();
    };
    match docs::fetch_document(state.store.as_ref(), state.blobs.as_ref(), &email, &doc_id).await {
        Ok(content) => {
            let mut h = HeaderMap::new();
            h.insert("Content-Type", HeaderValue::from_static("application/pdf"));
            h.insert("Content-Disposition", HeaderValue::from_static("inline"));
            // Access is permission-gated per request; never serve from cache.
            h.insert(
                "Cache-Control",
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            );
            (StatusCode::OK, h, pdf_body(content.reader)).into_response()
        }
        Err(e) => error_json(&e).into_response(),
    }
}
