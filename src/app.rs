use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::services::ServeDir;

use crate::backend::Credentials;
use crate::config::Config;
use crate::context::{AppContext, Backend};
use crate::delete::{Answered, DeleteOutcome};
use crate::downloader::{Download, TableFormat};
use crate::entry::{Entry, PendingFile};
use crate::error::{AuthError, EditError};
use crate::form::SubmitOutcome;
use crate::notify::NoticeKind;

const SESSION_COOKIE: &str = "session";
const STATIC_DIR: &str = "static";
const UPLOAD_LIMIT_BYTES: usize = 50 * 1024 * 1024;

/// Shared server state: one application context, one writer at a time
pub struct AppState {
    context: Mutex<AppContext>,
}

impl AppState {
    pub fn new(context: AppContext) -> Arc<Self> {
        Arc::new(AppState {
            context: Mutex::new(context),
        })
    }
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    message: Option<String>,
}

impl StatusResponse {
    fn ok() -> Self {
        StatusResponse {
            status: "ok".to_string(),
            message: None,
        }
    }

    fn error(message: impl ToString) -> Self {
        StatusResponse {
            status: "error".to_string(),
            message: Some(message.to_string()),
        }
    }
}

fn error_response(code: StatusCode, message: impl ToString) -> Response {
    (code, Json(StatusResponse::error(message))).into_response()
}

#[derive(Serialize)]
struct SessionResponse {
    signed_in: bool,
    user_id: Option<String>,
    email: Option<String>,
}

#[derive(Serialize)]
struct EntryView {
    #[serde(flatten)]
    entry: Entry,
    expanded: bool,
    image_urls: Vec<String>,
}

#[derive(Serialize)]
struct EntriesResponse {
    entries: Vec<EntryView>,
    total: usize,
    no_matches: bool,
}

#[derive(Serialize)]
struct DraftResponse {
    entry_id: String,
    label: String,
    images: Vec<String>,
}

#[derive(Serialize)]
struct NoticeResponse {
    kind: NoticeKind,
    message: String,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

#[derive(Deserialize)]
struct ConfirmQuery {
    #[serde(default)]
    confirm: bool,
}

/// Build the router around an application context
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/entries", get(list_entries).post(submit_entry).delete(clear_entries))
        .route("/api/entries/:id", delete(delete_entry).put(save_edit))
        .route("/api/entries/:id/expand", post(toggle_expanded))
        .route("/api/entries/:id/edit", post(begin_edit))
        .route("/api/edit", delete(cancel_edit))
        .route("/api/export/:format", get(export))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/api/signup", post(handle_signup))
        .route("/api/login", post(handle_login))
        .route("/api/logout", post(handle_logout))
        .route("/api/session", get(current_session))
        .route("/api/notice", get(current_notice))
        .merge(protected)
        .fallback_service(ServeDir::new(STATIC_DIR))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES))
        .with_state(state)
}

/// Start the web server
#[cfg(not(tarpaulin_include))]
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let backend = Backend::from_config(&config)?;
    let context = AppContext::new(backend, &config).await;
    let app = build_router(AppState::new(context));

    let listener = TcpListener::bind(&config.bind_addr).await?;
    log::info!("Listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Authentication middleware
///
/// Lets the request through only when the `session` cookie carries the
/// current identity's access token.
async fn require_auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Response {
    let authorized = {
        let mut context = state.context.lock().await;
        context.sync_session().await;
        match (jar.get(SESSION_COOKIE), context.identity()) {
            (Some(cookie), Some(identity)) => cookie.value() == identity.access_token,
            _ => false,
        }
    };

    if authorized {
        next.run(request).await
    } else {
        error_response(StatusCode::UNAUTHORIZED, "Not signed in")
    }
}

fn auth_status(e: &AuthError) -> StatusCode {
    match e {
        AuthError::InvalidCredentials | AuthError::NotSignedIn => StatusCode::UNAUTHORIZED,
        AuthError::AlreadyRegistered => StatusCode::CONFLICT,
        AuthError::MissingField(_) => StatusCode::BAD_REQUEST,
        AuthError::Backend(_) | AuthError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn handle_signup(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(credentials): Json<Credentials>,
) -> Response {
    let mut context = state.context.lock().await;
    match context.sign_up(&credentials).await {
        Ok(Some(identity)) => {
            let cookie = Cookie::new(SESSION_COOKIE, identity.access_token);
            (jar.add(cookie), Json(StatusResponse::ok())).into_response()
        }
        Ok(None) => Json(StatusResponse::ok()).into_response(),
        Err(e) => error_response(auth_status(&e), e),
    }
}

async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(credentials): Json<Credentials>,
) -> Response {
    let mut context = state.context.lock().await;
    match context.sign_in(&credentials).await {
        Ok(identity) => {
            let body = SessionResponse {
                signed_in: true,
                user_id: Some(identity.user_id.clone()),
                email: Some(identity.email.clone()),
            };
            let cookie = Cookie::new(SESSION_COOKIE, identity.access_token);
            (jar.add(cookie), Json(body)).into_response()
        }
        Err(e) => error_response(auth_status(&e), e),
    }
}

async fn handle_logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let mut context = state.context.lock().await;
    let jar = jar.remove(Cookie::from(SESSION_COOKIE));
    match context.sign_out().await {
        Ok(()) => (jar, Json(StatusResponse::ok())).into_response(),
        Err(e) => (jar, error_response(StatusCode::BAD_GATEWAY, e)).into_response(),
    }
}

async fn current_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    let mut context = state.context.lock().await;
    context.sync_session().await;
    let identity = context.identity();
    Json(SessionResponse {
        signed_in: identity.is_some(),
        user_id: identity.map(|i| i.user_id.clone()),
        email: identity.map(|i| i.email.clone()),
    })
}

async fn current_notice(State(state): State<Arc<AppState>>) -> Json<Option<NoticeResponse>> {
    let context = state.context.lock().await;
    Json(context.notice().map(|notice| NoticeResponse {
        kind: notice.kind,
        message: notice.message.clone(),
    }))
}

fn entries_response(context: &AppContext) -> EntriesResponse {
    let list = context.list();
    let entries = list
        .visible()
        .into_iter()
        .map(|entry| EntryView {
            expanded: list.is_expanded(&entry.id),
            image_urls: entry
                .images
                .iter()
                .map(|path| context.resolve_image(path))
                .collect(),
            entry: entry.clone(),
        })
        .collect();

    EntriesResponse {
        entries,
        total: list.entries().len(),
        no_matches: list.shows_no_matches(),
    }
}

async fn list_entries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let mut context = state.context.lock().await;
    // Read failures are only logged; the last loaded list is served
    let _ = context.refresh().await;
    context
        .list_mut()
        .set_search(query.q.unwrap_or_default());
    Json(entries_response(&context)).into_response()
}

struct EntryFields {
    label: Option<String>,
    files: Vec<PendingFile>,
    detach: Vec<String>,
}

/// Collect `label`, `files` and `remove` fields from a multipart body
async fn read_entry_fields(mut multipart: Multipart) -> Result<EntryFields, Response> {
    let mut fields = EntryFields {
        label: None,
        files: Vec::new(),
        detach: Vec::new(),
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(error_response(StatusCode::BAD_REQUEST, e)),
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "label" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
                fields.label = Some(text);
            }
            "remove" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
                fields.detach.push(text);
            }
            "files" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))?;
                let mut file = PendingFile::new(file_name, bytes.to_vec());
                file.content_type = content_type;
                fields.files.push(file);
            }
            other => log::debug!("Ignoring multipart field {}", other),
        }
    }

    Ok(fields)
}

async fn submit_entry(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let fields = match read_entry_fields(multipart).await {
        Ok(fields) => fields,
        Err(response) => return response,
    };

    let mut context = state.context.lock().await;
    let form = context.form_mut();
    form.set_label(fields.label.unwrap_or_default());
    form.cancel();
    form.add_files(fields.files);

    match context.submit().await {
        Ok(SubmitOutcome::Saved { entry, uploads }) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "status": "ok",
                "entry": entry,
                "failed_uploads": uploads.failed.iter().map(|f| &f.item).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Ok(SubmitOutcome::Ignored) => Json(StatusResponse {
            status: "ignored".to_string(),
            message: None,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

async fn toggle_expanded(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let mut context = state.context.lock().await;
    let expanded = context.list_mut().toggle_expanded(&id);
    Json(serde_json::json!({ "expanded": expanded })).into_response()
}

async fn begin_edit(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let mut context = state.context.lock().await;
    if let Err(e) = context.begin_edit(&id) {
        return error_response(StatusCode::NOT_FOUND, e);
    }
    match context.edit_state().draft() {
        Some(draft) => Json(DraftResponse {
            entry_id: draft.entry_id.clone(),
            label: draft.label.clone(),
            images: draft.images.clone(),
        })
        .into_response(),
        None => error_response(StatusCode::CONFLICT, EditError::NotEditing),
    }
}

async fn cancel_edit(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    state.context.lock().await.cancel_edit();
    Json(StatusResponse::ok())
}

async fn save_edit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Response {
    let fields = match read_entry_fields(multipart).await {
        Ok(fields) => fields,
        Err(response) => return response,
    };

    let mut context = state.context.lock().await;
    let Some(draft) = context
        .edit_state_mut()
        .draft_mut()
        .filter(|draft| draft.entry_id == id)
    else {
        return error_response(StatusCode::CONFLICT, EditError::NotEditing);
    };

    if let Some(label) = fields.label {
        draft.label = label;
    }
    draft.images.retain(|path| !fields.detach.contains(path));
    // Each save request carries the full set of files to add
    draft.new_files = fields.files;

    match context.save_edit().await {
        Ok(saved) => Json(serde_json::json!({
            "status": "ok",
            "images": saved.patch.images,
            "failed_uploads": saved.uploads.failed.iter().map(|f| &f.item).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e @ EditError::Update(_)) => error_response(StatusCode::BAD_GATEWAY, e),
        Err(e) => error_response(StatusCode::CONFLICT, e),
    }
}

fn delete_response(outcome: Result<DeleteOutcome, crate::error::DeleteError>) -> Response {
    match outcome {
        Ok(DeleteOutcome::Deleted { blob_error }) => Json(StatusResponse {
            status: "ok".to_string(),
            message: blob_error,
        })
        .into_response(),
        Ok(DeleteOutcome::Cancelled) => error_response(
            StatusCode::PRECONDITION_REQUIRED,
            "Deletion must be confirmed with ?confirm=true",
        ),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e),
    }
}

async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ConfirmQuery>,
) -> Response {
    let mut context = state.context.lock().await;
    let outcome = context.delete_entry(&id, &mut Answered(query.confirm)).await;
    delete_response(outcome)
}

async fn clear_entries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConfirmQuery>,
) -> Response {
    let mut context = state.context.lock().await;
    let outcome = context.clear_all(&mut Answered(query.confirm)).await;
    delete_response(outcome)
}

fn download_response(download: Download) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download.content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", download.filename),
        )
        .body(Body::from(download.bytes))
        .unwrap_or_else(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e))
}

async fn export(State(state): State<Arc<AppState>>, Path(format): Path<String>) -> Response {
    let context = state.context.lock().await;

    let download = if format == "zip" {
        context.export_archive().await.map(|archive| archive.download)
    } else {
        match format.parse::<TableFormat>() {
            Ok(table) => context.export_table(table),
            Err(e) => return error_response(StatusCode::NOT_FOUND, e),
        }
    };

    match download {
        Ok(download) => download_response(download),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
