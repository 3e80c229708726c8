use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{PdfChatError, Result};
use crate::handlers::{Action, Dispatcher, Outcome};
use crate::knowledge::{KnowledgeStore, RagApp};
use crate::models::{ChatParams, ChatReply, SessionSnapshot, UploadedPdf};
use crate::session::{SessionRegistry, SharedSession, StoreFactory};
use crate::view;

pub const SESSION_COOKIE: &str = "pdfchat_session";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(config: Config, factory: StoreFactory) -> Self {
        let registry = SessionRegistry::new(
            config.vectordb.root_dir.clone(),
            Duration::from_secs(config.server.session_idle_secs),
            factory,
        );
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            dispatcher: Arc::new(Dispatcher::new()),
        }
    }

    /// State whose sessions talk to the Ollama server named in `config`
    pub fn with_ollama(config: Config) -> Self {
        let store_config = config.clone();
        let factory: StoreFactory = Arc::new(move |dir: &Path| -> Result<Arc<dyn KnowledgeStore>> {
            let app = RagApp::from_config(&store_config, dir)?;
            Ok(Arc::new(app) as Arc<dyn KnowledgeStore>)
        });
        Self::new(config, factory)
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.upload.max_bytes;
    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload))
        .route("/add", post(add_to_knowledge_base))
        .route("/chat", post(chat))
        .route("/clear", post(clear_history))
        .route("/new-upload", post(new_upload))
        .route("/api/session", get(api_session))
        .route("/api/add", post(api_add))
        .route("/api/chat", post(api_chat))
        .route("/api/clear", post(api_clear))
        .route("/api/new-upload", post(api_new_upload))
        .route("/health", get(|| async { "ok" }))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

impl IntoResponse for PdfChatError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        (
            status,
            Html(view::render_error("Chat with PDF", &self.to_string())),
        )
            .into_response()
    }
}

/// JSON flavoured error for the /api routes
pub struct ApiError(PdfChatError);

impl From<PdfChatError> for ApiError {
    fn from(e: PdfChatError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

fn status_for(err: &PdfChatError) -> StatusCode {
    match err {
        PdfChatError::InvalidState(_) => StatusCode::CONFLICT,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        PdfChatError::Pdf(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PdfChatError::Transport(_) | PdfChatError::Backend(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Session id from the request's cookie header, if present and well formed
pub fn session_id_from(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == SESSION_COOKIE)
        .and_then(|(_, v)| Uuid::parse_str(v.trim()).ok())
}

struct SessionHandle {
    id: Uuid,
    session: SharedSession,
    created: bool,
}

impl SessionHandle {
    async fn resolve(state: &AppState, headers: &HeaderMap) -> Result<Self> {
        let (id, session, created) = state
            .registry
            .get_or_create(session_id_from(headers))
            .await?;
        Ok(Self {
            id,
            session,
            created,
        })
    }

    async fn apply(&self, state: &AppState, action: Action) -> Result<Outcome> {
        state.dispatcher.apply(&self.session, action).await
    }

    /// Attach the session cookie when this request started the session
    fn respond(&self, body: impl IntoResponse) -> Response {
        let mut resp = body.into_response();
        if self.created {
            let cookie = format!("{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax", self.id);
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                resp.headers_mut().insert(SET_COOKIE, value);
            }
        }
        resp
    }
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let handle = SessionHandle::resolve(&state, &headers).await?;
    let html = {
        let ctx = handle.session.lock().await;
        view::render_page(&state.config.server, &ctx)
    };
    Ok(handle.respond(Html(html)))
}

/// Run `action` and send the browser back to the page to re-render
async fn act_and_redirect(state: &AppState, headers: &HeaderMap, action: Action) -> Result<Response> {
    let handle = SessionHandle::resolve(state, headers).await?;
    let result = handle
        .apply(state, action)
        .await
        .map(|_| Redirect::to("/"));
    Ok(handle.respond(result))
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadedPdf> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PdfChatError::InvalidUpload(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| PdfChatError::InvalidUpload(e.to_string()))?;
        return Ok(UploadedPdf {
            file_name,
            content_type,
            bytes,
        });
    }
    Err(PdfChatError::InvalidUpload(
        "request has no file field".to_string(),
    ))
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response> {
    let upload = read_upload(multipart).await?;
    act_and_redirect(&state, &headers, Action::Upload(upload)).await
}

async fn add_to_knowledge_base(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response> {
    act_and_redirect(&state, &headers, Action::AddToKnowledgeBase).await
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<ChatParams>,
) -> Result<Response> {
    act_and_redirect(
        &state,
        &headers,
        Action::Chat {
            prompt: params.prompt,
        },
    )
    .await
}

async fn clear_history(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    act_and_redirect(&state, &headers, Action::ClearHistory).await
}

async fn new_upload(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    act_and_redirect(&state, &headers, Action::NewUpload).await
}

async fn snapshot(handle: &SessionHandle) -> SessionSnapshot {
    handle.session.lock().await.snapshot()
}

async fn api_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Response, ApiError> {
    let handle = SessionHandle::resolve(&state, &headers).await?;
    Ok(handle.respond(Json(snapshot(&handle).await)))
}

async fn api_act(
    state: &AppState,
    headers: &HeaderMap,
    action: Action,
) -> std::result::Result<Response, ApiError> {
    let handle = SessionHandle::resolve(state, headers).await?;
    let result = match handle.apply(state, action).await {
        Ok(_) => Ok(Json(snapshot(&handle).await)),
        Err(e) => Err(ApiError(e)),
    };
    Ok(handle.respond(result))
}

async fn api_add(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Response, ApiError> {
    api_act(&state, &headers, Action::AddToKnowledgeBase).await
}

async fn api_clear(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Response, ApiError> {
    api_act(&state, &headers, Action::ClearHistory).await
}

async fn api_new_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Response, ApiError> {
    api_act(&state, &headers, Action::NewUpload).await
}

async fn api_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<ChatParams>,
) -> std::result::Result<Response, ApiError> {
    let handle = SessionHandle::resolve(&state, &headers).await?;
    let result = match handle
        .apply(
            &state,
            Action::Chat {
                prompt: params.prompt,
            },
        )
        .await
    {
        Ok(Outcome::Answered(answer)) => {
            let messages = handle.session.lock().await.messages.len();
            Ok(Json(ChatReply { answer, messages }))
        }
        Ok(other) => Err(ApiError(PdfChatError::Internal(format!(
            "chat produced unexpected outcome {other:?}"
        )))),
        Err(e) => Err(ApiError(e)),
    };
    Ok(handle.respond(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::MockKnowledgeStore;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state_with(root: &Path, build: fn() -> MockKnowledgeStore) -> AppState {
        let mut config = Config::default();
        config.vectordb.root_dir = Some(root.to_path_buf());
        state_from(config, build)
    }

    fn state_from(config: Config, build: fn() -> MockKnowledgeStore) -> AppState {
        let factory: StoreFactory = Arc::new(move |_dir: &Path| -> Result<Arc<dyn KnowledgeStore>> {
            Ok(Arc::new(build()))
        });
        AppState::new(config, factory)
    }

    fn echo_store() -> MockKnowledgeStore {
        let mut store = MockKnowledgeStore::new();
        store.expect_add().returning(|_, _| Ok(()));
        store
            .expect_chat()
            .returning(|p| Ok(format!("You asked: {p}")));
        store
    }

    fn down_store() -> MockKnowledgeStore {
        let mut store = MockKnowledgeStore::new();
        store
            .expect_chat()
            .returning(|_| Err(PdfChatError::Backend("connection refused".to_string())));
        store
    }

    fn cookie_of(resp: &Response) -> String {
        let set = resp.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        set.split(';').next().unwrap().to_string()
    }

    async fn body_string(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn multipart_body(boundary: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
        multipart_typed(boundary, file_name, "application/pdf", content)
    }

    fn multipart_typed(
        boundary: &str,
        file_name: &str,
        content_type: &str,
        content: &[u8],
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    #[test]
    fn test_session_id_from_cookie_header() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {SESSION_COOKIE}={id}")).unwrap(),
        );
        assert_eq!(session_id_from(&headers), Some(id));

        let mut bad = HeaderMap::new();
        bad.insert(COOKIE, HeaderValue::from_static("pdfchat_session=nope"));
        assert_eq!(session_id_from(&bad), None);
    }

    #[tokio::test]
    async fn test_health() {
        let root = tempfile::tempdir().unwrap();
        let app = router(state_with(root.path(), echo_store));
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "ok");
    }

    #[tokio::test]
    async fn test_first_visit_sets_cookie_and_renders_page() {
        let root = tempfile::tempdir().unwrap();
        let app = router(state_with(root.path(), echo_store));
        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(cookie_of(&resp).starts_with(SESSION_COOKIE));
        assert!(body_string(resp).await.contains("Ask a question about the PDF"));
    }

    #[tokio::test]
    async fn test_upload_add_chat_clear_flow() {
        let root = tempfile::tempdir().unwrap();
        let state = state_with(root.path(), echo_store);
        let app = router(state.clone());

        let boundary = "XBOUNDARYX";
        let resp = app
            .clone()
            .oneshot(
                Request::post("/upload")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(multipart_body(boundary, "hello.pdf", b"%PDF-1.4")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let cookie = cookie_of(&resp);

        let resp = app
            .clone()
            .oneshot(
                Request::post("/add")
                    .header(COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert!(resp.headers().get(SET_COOKIE).is_none());

        let resp = app
            .clone()
            .oneshot(
                Request::post("/chat")
                    .header(COOKIE, &cookie)
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("prompt=What+does+the+document+say%3F"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let resp = app
            .clone()
            .oneshot(
                Request::get("/api/session")
                    .header(COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let snap: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(snap["pdf_added"], true);
        assert_eq!(snap["pending_upload"], "hello.pdf");
        assert_eq!(snap["messages"].as_array().unwrap().len(), 2);
        assert_eq!(snap["messages"][1]["role"], "assistant");
        assert_eq!(
            snap["messages"][1]["content"],
            "You asked: What does the document say?"
        );

        let resp = app
            .clone()
            .oneshot(
                Request::post("/api/clear")
                    .header(COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let snap: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert!(snap["messages"].as_array().unwrap().is_empty());

        let resp = app
            .oneshot(
                Request::post("/api/new-upload")
                    .header(COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let snap: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(snap["pdf_added"], false);
        assert!(snap["messages"].as_array().unwrap().is_empty());
        assert_eq!(state.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_non_pdf_upload_rejected() {
        let root = tempfile::tempdir().unwrap();
        let app = router(state_with(root.path(), echo_store));
        let boundary = "B";
        let resp = app
            .oneshot(
                Request::post("/upload")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(multipart_body(boundary, "notes.txt", b"hi")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(resp).await.contains("not a PDF"));
    }

    #[tokio::test]
    async fn test_pdf_name_with_wrong_content_type_rejected() {
        let root = tempfile::tempdir().unwrap();
        let state = state_with(root.path(), echo_store);
        let app = router(state.clone());
        let boundary = "B";
        let resp = app
            .oneshot(
                Request::post("/upload")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(multipart_typed(
                        boundary,
                        "x.pdf",
                        "text/plain",
                        b"%PDF-1.4",
                    )))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(resp).await.contains("text/plain"));
    }

    #[tokio::test]
    async fn test_idle_sessions_are_dropped_between_visits() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.vectordb.root_dir = Some(root.path().to_path_buf());
        config.server.session_idle_secs = 0;
        let state = state_from(config, echo_store);
        let app = router(state.clone());

        for _ in 0..10 {
            let resp = app
                .clone()
                .oneshot(Request::get("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
        assert_eq!(state.registry.len().await, 1);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 10);
    }

    #[tokio::test]
    async fn test_add_before_upload_is_conflict() {
        let root = tempfile::tempdir().unwrap();
        let app = router(state_with(root.path(), echo_store));
        let resp = app
            .oneshot(Request::post("/api/add").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(resp.headers().get(SET_COOKIE).is_some());
    }

    #[tokio::test]
    async fn test_backend_failure_is_bad_gateway_and_keeps_transcript() {
        let root = tempfile::tempdir().unwrap();
        let app = router(state_with(root.path(), down_store));

        let resp = app
            .clone()
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt":"hello?"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let cookie = cookie_of(&resp);
        let err: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert!(err["error"].as_str().unwrap().contains("connection refused"));

        let resp = app
            .oneshot(
                Request::get("/api/session")
                    .header(COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let snap: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert!(snap["messages"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_api_chat_returns_answer() {
        let root = tempfile::tempdir().unwrap();
        let app = router(state_with(root.path(), echo_store));
        let resp = app
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt":"hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let reply: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(reply["answer"], "You asked: hi");
        assert_eq!(reply["messages"], 2);
    }
}
