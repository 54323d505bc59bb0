use std::sync::{Arc, Mutex};

use axum::body::to_bytes;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use studentconnect_client::forms::{self, CommentForm, LoginForm, ResetPasswordForm, SignupForm};
use studentconnect_client::models::{Credentials, PostQuery, PostType, ProfileUpdate};
use studentconnect_client::payload::{PostDraft, PostKind, Upload};
use studentconnect_client::{
    ApiClient, LocalStorage, MemoryTokenStore, SessionState, SessionStore, TokenStore,
    ValidationError,
};
use tempfile::tempdir;

const VALID_TOKEN: &str = "tok-1";

#[derive(Debug, Clone, PartialEq)]
struct Recorded {
    method: Method,
    path: String,
    query: Option<String>,
    bearer: Option<String>,
    json: Option<Value>,
    /// Multipart parts as (name, text value); file parts carry `None`.
    form: Vec<(String, Option<String>)>,
}

#[derive(Clone, Default)]
struct FakeBackend {
    calls: Arc<Mutex<Vec<Recorded>>>,
    /// Token handed out by login instead of `VALID_TOKEN`; `/me` rejects it.
    minted_token: Arc<Mutex<Option<String>>>,
}

impl FakeBackend {
    fn mint_unrecognised_tokens(&self, token: &str) {
        *self.minted_token.lock().unwrap() = Some(token.to_string());
    }

    fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_to(&self, method: Method, path: &str) -> Vec<Recorded> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method && call.path == path)
            .collect()
    }
}

fn ada() -> Value {
    json!({
        "id": "u1",
        "name": "Ada Lovelace",
        "username": "ada",
        "email": "a@b.com",
        "bio": "Mathematician",
        "profile_picture": "",
        "created_at": "2024-01-01T09:00:00"
    })
}

fn post_from_form(form: &[(String, Option<String>)]) -> Value {
    let text = |name: &str| {
        form.iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| value.clone())
    };
    json!({
        "id": "p-new",
        "title": text("title").unwrap_or_default(),
        "content": text("content").unwrap_or_default(),
        "post_type": text("post_type").unwrap_or_default(),
        "tags": text("tags")
            .map(|tags| tags.split(',').filter(|t| !t.is_empty()).map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default(),
        "author_id": "u1",
        "author_name": "Ada Lovelace",
        "author_username": "ada",
        "author_profile_picture": "",
        "job_link": text("job_link"),
        "company": text("company"),
        "location": text("location"),
        "comments_count": 0,
        "created_at": "2024-03-01T10:00:00",
        "updated_at": "2024-03-01T10:00:00"
    })
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Could not validate credentials"})),
    )
        .into_response()
}

async fn handle(State(backend): State<FakeBackend>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    let is_multipart = request
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let mut form = Vec::new();
    let mut body_json = None;
    if is_multipart {
        let mut multipart = Multipart::from_request(request, &backend)
            .await
            .expect("multipart body");
        while let Some(field) = multipart.next_field().await.expect("next field") {
            let name = field.name().unwrap_or_default().to_string();
            if field.file_name().is_some() {
                field.bytes().await.expect("file bytes");
                form.push((name, None));
            } else {
                form.push((name, Some(field.text().await.expect("text field"))));
            }
        }
    } else {
        let bytes = to_bytes(request.into_body(), usize::MAX)
            .await
            .expect("request body");
        if !bytes.is_empty() {
            body_json = serde_json::from_slice(&bytes).ok();
        }
    }

    backend.calls.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        query,
        bearer: bearer.clone(),
        json: body_json.clone(),
        form: form.clone(),
    });

    let authed = bearer.as_deref() == Some(VALID_TOKEN);
    match (method, path.as_str()) {
        (Method::POST, "/api/auth/login") => {
            let password = body_json
                .as_ref()
                .and_then(|body| body.get("password"))
                .and_then(Value::as_str);
            if password == Some("secret") {
                let token = backend
                    .minted_token
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| VALID_TOKEN.to_string());
                Json(json!({"access_token": token, "token_type": "bearer"})).into_response()
            } else {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"detail": "Incorrect email or password"})),
                )
                    .into_response()
            }
        }
        (Method::POST, "/api/auth/signup") => Json(ada()).into_response(),
        (Method::GET, "/api/auth/me") if authed => Json(ada()).into_response(),
        (Method::PUT, "/api/auth/profile") if authed => Json(json!({
            "id": "u1",
            "name": "Ada King",
            "username": "ada",
            "email": "a@b.com",
            "created_at": "2024-01-01T09:00:00"
        }))
        .into_response(),
        (Method::POST, "/api/auth/profile/picture") if authed => {
            let mut user = ada();
            user["profile_picture"] = json!("https://cdn.example.edu/ada.png");
            Json(user).into_response()
        }
        (Method::POST, "/api/auth/reset-password") => {
            Json(json!({"message": "Password reset successfully"})).into_response()
        }
        (Method::POST, "/api/posts/") if authed => Json(post_from_form(&form)).into_response(),
        (Method::GET, "/api/posts/") => Json(json!([])).into_response(),
        (Method::POST, "/api/comments/") if authed => {
            let body = body_json.unwrap_or_default();
            Json(json!({
                "id": "c-new",
                "content": body["content"],
                "post_id": body["post_id"],
                "parent_comment_id": body.get("parent_comment_id").cloned().unwrap_or(Value::Null),
                "author_id": "u1",
                "author_name": "Ada Lovelace",
                "author_username": "ada",
                "replies": [],
                "created_at": "2024-03-01T10:00:00",
                "updated_at": "2024-03-01T10:00:00"
            }))
            .into_response()
        }
        (_, "/api/auth/me" | "/api/auth/profile" | "/api/auth/profile/picture" | "/api/posts/" | "/api/comments/") => {
            unauthorized()
        }
        _ => (StatusCode::NOT_FOUND, Json(json!({"detail": "Not Found"}))).into_response(),
    }
}

async fn spawn_backend() -> (String, FakeBackend) {
    let backend = FakeBackend::default();
    let app = Router::new()
        .fallback(handle)
        .with_state(backend.clone())
        .layer(DefaultBodyLimit::max(16 * 1024 * 1024));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake backend");
    });
    (format!("http://{addr}"), backend)
}

fn session_with(base_url: &str, tokens: Arc<dyn TokenStore>) -> SessionStore {
    SessionStore::new(ApiClient::new(base_url, tokens).expect("api client"))
}

#[tokio::test]
async fn startup_without_token_makes_no_calls() {
    let (base_url, backend) = spawn_backend().await;
    let session = session_with(&base_url, Arc::new(MemoryTokenStore::new()));

    assert_eq!(session.restore().await, SessionState::Anonymous);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn startup_with_accepted_token_authenticates() {
    let (base_url, backend) = spawn_backend().await;
    let session = session_with(&base_url, Arc::new(MemoryTokenStore::with_token(VALID_TOKEN)));

    let state = session.restore().await;
    assert_eq!(state.current_user().map(|u| u.username.as_str()), Some("ada"));
    let me = backend.calls_to(Method::GET, "/api/auth/me");
    assert_eq!(me.len(), 1);
    assert_eq!(me[0].bearer.as_deref(), Some(VALID_TOKEN));
}

#[tokio::test]
async fn startup_with_rejected_token_erases_it() {
    let (base_url, _backend) = spawn_backend().await;
    let dir = tempdir().expect("tempdir");
    let storage = Arc::new(LocalStorage::open(dir.path().join("local_storage.json")));
    storage.store("expired").expect("seed token");

    let session = session_with(&base_url, storage.clone());
    assert_eq!(session.restore().await, SessionState::Anonymous);
    assert_eq!(storage.load(), None);
    assert_eq!(
        LocalStorage::open(dir.path().join("local_storage.json")).load(),
        None
    );
}

#[tokio::test]
async fn login_persists_token_and_resolves_user_once() {
    let (base_url, backend) = spawn_backend().await;
    let dir = tempdir().expect("tempdir");
    let storage = Arc::new(LocalStorage::open(dir.path().join("local_storage.json")));
    let session = session_with(&base_url, storage.clone());
    session.restore().await;

    let form = LoginForm {
        email: "a@b.com".into(),
        password: "secret".into(),
    };
    let token = form.submit(&session).await.expect("login");
    assert_eq!(token.access_token, VALID_TOKEN);

    let login_calls = backend.calls_to(Method::POST, "/api/auth/login");
    assert_eq!(login_calls.len(), 1);
    assert_eq!(
        login_calls[0].json,
        Some(json!({"email": "a@b.com", "password": "secret"}))
    );
    assert_eq!(storage.load().as_deref(), Some(VALID_TOKEN));

    let me = backend.calls_to(Method::GET, "/api/auth/me");
    assert_eq!(me.len(), 1);
    assert_eq!(me[0].bearer.as_deref(), Some(VALID_TOKEN));
    assert!(session.state().is_authenticated());
}

#[tokio::test]
async fn login_then_logout_leaves_nothing_behind() {
    let (base_url, _backend) = spawn_backend().await;
    let dir = tempdir().expect("tempdir");
    let storage = Arc::new(LocalStorage::open(dir.path().join("local_storage.json")));
    let session = session_with(&base_url, storage.clone());

    for _ in 0..2 {
        session
            .login(&Credentials {
                email: "a@b.com".into(),
                password: "secret".into(),
            })
            .await
            .expect("login");
        session.logout().expect("logout");
        assert_eq!(session.state(), SessionState::Anonymous);
        assert_eq!(storage.load(), None);
    }
}

#[tokio::test]
async fn failed_login_surfaces_backend_detail() {
    let (base_url, backend) = spawn_backend().await;
    let tokens = Arc::new(MemoryTokenStore::new());
    let session = session_with(&base_url, tokens.clone());

    let err = session
        .login(&Credentials {
            email: "a@b.com".into(),
            password: "wrong".into(),
        })
        .await
        .expect_err("login should fail");
    assert_eq!(err.detail(), Some("Incorrect email or password"));
    assert_eq!(err.display_message("Login failed"), "Incorrect email or password");
    assert_eq!(session.state(), SessionState::Anonymous);
    assert_eq!(tokens.load(), None);
    assert!(backend.calls_to(Method::GET, "/api/auth/me").is_empty());
}

async fn authenticated_with_local_storage(
    base_url: &str,
) -> (tempfile::TempDir, Arc<LocalStorage>, SessionStore) {
    let dir = tempdir().expect("tempdir");
    let storage = Arc::new(LocalStorage::open(dir.path().join("local_storage.json")));
    storage.store(VALID_TOKEN).expect("seed token");
    let session = session_with(base_url, storage.clone());
    assert!(session.restore().await.is_authenticated());
    (dir, storage, session)
}

#[tokio::test]
async fn failed_login_drops_an_authenticated_session() {
    let (base_url, _backend) = spawn_backend().await;
    let (dir, storage, session) = authenticated_with_local_storage(&base_url).await;

    let err = session
        .login(&Credentials {
            email: "a@b.com".into(),
            password: "wrong".into(),
        })
        .await
        .expect_err("login should fail");
    assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
    assert_eq!(session.state(), SessionState::Anonymous);
    assert_eq!(storage.load(), None);
    assert_eq!(
        LocalStorage::open(dir.path().join("local_storage.json")).load(),
        None
    );
}

#[tokio::test]
async fn login_whose_token_fails_resolution_is_dropped() {
    let (base_url, backend) = spawn_backend().await;
    let (_dir, storage, session) = authenticated_with_local_storage(&base_url).await;
    backend.mint_unrecognised_tokens("tok-fresh");

    let err = session
        .login(&Credentials {
            email: "a@b.com".into(),
            password: "secret".into(),
        })
        .await
        .expect_err("resolution should fail");
    assert_eq!(err.detail(), Some("Could not validate credentials"));
    assert_eq!(session.state(), SessionState::Anonymous);
    assert_eq!(storage.load(), None);

    let me = backend.calls_to(Method::GET, "/api/auth/me");
    assert_eq!(me.len(), 2);
    assert_eq!(me[1].bearer.as_deref(), Some("tok-fresh"));
}

#[tokio::test]
async fn signup_does_not_authenticate() {
    let (base_url, backend) = spawn_backend().await;
    let session = session_with(&base_url, Arc::new(MemoryTokenStore::new()));
    session.restore().await;

    let form = SignupForm {
        name: "Ada Lovelace".into(),
        username: "ada".into(),
        email: "a@b.com".into(),
        password: "secret".into(),
        bio: Some(String::new()),
    };
    let user = form.submit(&session).await.expect("signup");
    assert_eq!(user.username, "ada");
    assert_eq!(session.state(), SessionState::Anonymous);

    let signup = backend.calls_to(Method::POST, "/api/auth/signup");
    assert_eq!(
        signup[0].json,
        Some(json!({
            "email": "a@b.com",
            "username": "ada",
            "name": "Ada Lovelace",
            "password": "secret"
        }))
    );
}

#[tokio::test]
async fn profile_update_replaces_user_wholesale() {
    let (base_url, backend) = spawn_backend().await;
    let session = session_with(&base_url, Arc::new(MemoryTokenStore::with_token(VALID_TOKEN)));
    let before = session.restore().await;
    assert_eq!(
        before.current_user().and_then(|u| u.bio()),
        Some("Mathematician")
    );

    let update = ProfileUpdate {
        name: Some("Ada King".into()),
        ..Default::default()
    };
    let updated = session.update_profile(&update).await.expect("update");
    assert_eq!(updated.name, "Ada King");
    assert_eq!(updated.bio(), None);
    assert_eq!(session.current_user(), Some(updated));

    let calls = backend.calls_to(Method::PUT, "/api/auth/profile");
    assert_eq!(calls[0].json, Some(json!({"name": "Ada King"})));
}

#[tokio::test]
async fn observers_see_each_transition() {
    let (base_url, _backend) = spawn_backend().await;
    let session = session_with(&base_url, Arc::new(MemoryTokenStore::with_token(VALID_TOKEN)));
    let mut rx = session.subscribe();
    assert_eq!(*rx.borrow_and_update(), SessionState::Unresolved);

    session.restore().await;
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().is_authenticated());

    session.logout().unwrap();
    assert_eq!(*rx.borrow_and_update(), SessionState::Anonymous);
}

#[tokio::test]
async fn reset_password_needs_link_token() {
    let (base_url, backend) = spawn_backend().await;
    let session = session_with(&base_url, Arc::new(MemoryTokenStore::new()));

    let without_token = ResetPasswordForm::from_link("https://connect.example.edu/reset-password");
    assert_eq!(
        without_token.link_error(),
        Some(ValidationError::InvalidResetLink)
    );
    let err = without_token
        .submit(&session, "newpass", "newpass")
        .await
        .expect_err("no token");
    assert!(err.is_validation());
    assert!(backend.calls().is_empty());

    let mismatched = ResetPasswordForm::from_link("token=r-42");
    let err = mismatched
        .submit(&session, "newpass", "newpasz")
        .await
        .expect_err("mismatch");
    assert_eq!(err.display_message("x"), "Passwords do not match");
    assert!(backend.calls().is_empty());

    let form = ResetPasswordForm::from_link("https://connect.example.edu/reset-password?token=r-42");
    let reply = form.submit(&session, "newpass", "newpass").await.expect("reset");
    assert_eq!(reply.message, "Password reset successfully");
    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "/api/auth/reset-password");
    assert_eq!(
        calls[0].json,
        Some(json!({"token": "r-42", "new_password": "newpass"}))
    );
}

#[tokio::test]
async fn profile_picture_is_gated_before_upload() {
    let (base_url, backend) = spawn_backend().await;
    let session = session_with(&base_url, Arc::new(MemoryTokenStore::with_token(VALID_TOKEN)));
    session.restore().await;
    let mib = 1024 * 1024;

    let too_big = Upload::with_mime("huge.png", "image/png", vec![0; 6 * mib]);
    let err = forms::upload_profile_picture(&session, too_big)
        .await
        .expect_err("too big");
    assert!(err.is_validation());

    let not_image = Upload::with_mime("cv.pdf", "application/pdf", vec![0; 1024]);
    let err = forms::upload_profile_picture(&session, not_image)
        .await
        .expect_err("not an image");
    assert_eq!(err.display_message("x"), "Please select an image file");
    assert!(backend
        .calls_to(Method::POST, "/api/auth/profile/picture")
        .is_empty());

    let fine = Upload::with_mime("me.png", "image/png", vec![0; 2 * mib]);
    let user = forms::upload_profile_picture(&session, fine)
        .await
        .expect("upload");
    assert_eq!(
        user.profile_picture_url(),
        Some("https://cdn.example.edu/ada.png")
    );
    let uploads = backend.calls_to(Method::POST, "/api/auth/profile/picture");
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].form, vec![("file".to_string(), None)]);
    assert_eq!(session.current_user(), Some(user));
}

#[tokio::test]
async fn jobs_post_is_sent_as_multipart_without_document() {
    let (base_url, backend) = spawn_backend().await;
    let session = session_with(&base_url, Arc::new(MemoryTokenStore::with_token(VALID_TOKEN)));

    let draft = PostDraft::new(
        "SWE Intern",
        "Summer internship, apply by March",
        PostKind::Jobs {
            job_link: "https://x".into(),
            company: Some("Acme".into()),
            location: None,
        },
    );
    let post = forms::publish_post(&session, draft).await.expect("create post");
    assert_eq!(post.post_type, PostType::Jobs);

    let calls = backend.calls_to(Method::POST, "/api/posts/");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].bearer.as_deref(), Some(VALID_TOKEN));
    let form = &calls[0].form;
    let value = |name: &str| {
        form.iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| value.as_deref())
    };
    assert_eq!(value("title"), Some("SWE Intern"));
    assert_eq!(value("post_type"), Some("jobs"));
    assert_eq!(value("job_link"), Some("https://x"));
    assert_eq!(value("company"), Some("Acme"));
    assert!(form.iter().all(|(name, _)| name != "document"));
}

#[tokio::test]
async fn invalid_draft_never_reaches_backend() {
    let (base_url, backend) = spawn_backend().await;
    let session = session_with(&base_url, Arc::new(MemoryTokenStore::with_token(VALID_TOKEN)));
    let draft = PostDraft::new(
        "Hiring",
        "Details soon",
        PostKind::Jobs {
            job_link: " ".into(),
            company: None,
            location: None,
        },
    );
    let err = forms::publish_post(&session, draft).await.expect_err("invalid");
    assert_eq!(err.display_message("x"), "Job link is required for job posts");
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn bearer_header_follows_token_presence() {
    let (base_url, backend) = spawn_backend().await;
    let tokens = Arc::new(MemoryTokenStore::new());
    let api = ApiClient::new(&base_url, tokens.clone()).expect("api");

    let query = PostQuery::default().search("graphs").post_type(PostType::Notes);
    api.list_posts(&query).await.expect("anonymous feed");
    tokens.store(VALID_TOKEN).unwrap();
    api.list_posts(&PostQuery::default()).await.expect("authed feed");

    let calls = backend.calls_to(Method::GET, "/api/posts/");
    assert_eq!(calls[0].bearer, None);
    assert_eq!(calls[0].query.as_deref(), Some("search=graphs&post_type=notes"));
    assert_eq!(calls[1].bearer.as_deref(), Some(VALID_TOKEN));
    assert_eq!(calls[1].query, None);
}

#[tokio::test]
async fn replies_carry_parent_comment_id() {
    let (base_url, backend) = spawn_backend().await;
    let session = session_with(&base_url, Arc::new(MemoryTokenStore::with_token(VALID_TOKEN)));

    let blank = CommentForm::new("p1", "   ");
    assert!(blank.submit(&session).await.unwrap_err().is_validation());

    let reply = CommentForm::new("p1", "Same question here").reply_to("c1");
    let comment = reply.submit(&session).await.expect("reply");
    assert_eq!(comment.parent_comment_id.as_deref(), Some("c1"));

    let calls = backend.calls_to(Method::POST, "/api/comments/");
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].json,
        Some(json!({"content": "Same question here", "post_id": "p1", "parent_comment_id": "c1"}))
    );
}

#[tokio::test]
async fn missing_resource_reports_backend_detail() {
    let (base_url, _backend) = spawn_backend().await;
    let api = ApiClient::new(&base_url, Arc::new(MemoryTokenStore::new())).expect("api");
    let err = api.get_post("missing").await.expect_err("404");
    assert_eq!(err.status(), Some(reqwest::StatusCode::NOT_FOUND));
    assert_eq!(err.detail(), Some("Not Found"));
}
