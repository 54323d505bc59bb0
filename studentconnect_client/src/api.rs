use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;

use crate::config::{sanitize_base_url, ClientConfig};
use crate::error::ClientError;
use crate::models::{
    AccessToken, Comment, Credentials, ForgotPasswordRequest, MessageResponse, NewComment,
    Pagination, Post, PostQuery, ProfileUpdate, ResetPasswordRequest, SignupRequest, User,
};
use crate::payload::{profile_picture_payload, FormPayload, PostDraft, Upload};
use crate::storage::TokenStore;

pub type ApiResult<T> = Result<T, ClientError>;

/// Stateless pass-through to the backend REST API.
///
/// The only state it consults is the token store, which is read on every
/// request so a freshly stored or cleared token takes effect immediately.
/// Nothing is retried, cached or deduplicated.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
    tokens: Arc<dyn TokenStore>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenStore>) -> ApiResult<Self> {
        let base_url = sanitize_base_url(base_url.into())?;
        let client = Client::builder().build()?;
        Ok(Self {
            base_url,
            client,
            tokens,
        })
    }

    pub fn from_config(config: &ClientConfig, tokens: Arc<dyn TokenStore>) -> ApiResult<Self> {
        let mut builder = Client::builder().user_agent(concat!(
            "studentconnect/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            base_url: sanitize_base_url(config.api_url.clone())?,
            client: builder.build()?,
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Starts a request against `path`, attaching `Authorization: Bearer`
    /// when the token store currently holds a token.
    pub fn request(&self, method: Method, path: &str) -> ApiResult<RequestBuilder> {
        let url = self.url(path)?;
        Ok(self.request_url(method, url))
    }

    fn request_url(&self, method: Method, url: Url) -> RequestBuilder {
        let token = self.tokens.load();
        tracing::debug!(%method, path = url.path(), authenticated = token.is_some(), "api request");
        let builder = self.client.request(method, url);
        match token {
            Some(token) => builder.header(AUTHORIZATION, format!("Bearer {token}")),
            None => builder,
        }
    }

    // ---- auth -------------------------------------------------------------

    pub async fn signup(&self, input: &SignupRequest) -> ApiResult<User> {
        self.send(self.request(Method::POST, "/api/auth/signup")?.json(input))
            .await
    }

    pub async fn login(&self, credentials: &Credentials) -> ApiResult<AccessToken> {
        self.send(
            self.request(Method::POST, "/api/auth/login")?
                .json(credentials),
        )
        .await
    }

    pub async fn current_user(&self) -> ApiResult<User> {
        self.send(self.request(Method::GET, "/api/auth/me")?).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> ApiResult<User> {
        self.send(self.request(Method::PUT, "/api/auth/profile")?.json(update))
            .await
    }

    pub async fn update_profile_picture(&self, upload: Upload) -> ApiResult<User> {
        self.send_form("/api/auth/profile/picture", profile_picture_payload(upload))
            .await
    }

    pub async fn user_profile(&self, username: &str) -> ApiResult<User> {
        let url = self.nested_url("/api/auth/user", username)?;
        self.send(self.request_url(Method::GET, url)).await
    }

    pub async fn forgot_password(&self, email: &str) -> ApiResult<MessageResponse> {
        let body = ForgotPasswordRequest {
            email: email.to_string(),
        };
        self.send(
            self.request(Method::POST, "/api/auth/forgot-password")?
                .json(&body),
        )
        .await
    }

    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> ApiResult<MessageResponse> {
        let body = ResetPasswordRequest {
            token: token.to_string(),
            new_password: new_password.to_string(),
        };
        self.send(
            self.request(Method::POST, "/api/auth/reset-password")?
                .json(&body),
        )
        .await
    }

    // ---- posts ------------------------------------------------------------

    pub async fn create_post(&self, draft: PostDraft) -> ApiResult<Post> {
        self.send_form("/api/posts/", draft.into_payload()).await
    }

    pub async fn list_posts(&self, query: &PostQuery) -> ApiResult<Vec<Post>> {
        self.send(self.request(Method::GET, "/api/posts/")?.query(query))
            .await
    }

    pub async fn get_post(&self, post_id: &str) -> ApiResult<Post> {
        let url = self.nested_url("/api/posts", post_id)?;
        self.send(self.request_url(Method::GET, url)).await
    }

    pub async fn user_posts(
        &self,
        username: &str,
        pagination: &Pagination,
    ) -> ApiResult<Vec<Post>> {
        let url = self.nested_url("/api/posts/user", username)?;
        self.send(self.request_url(Method::GET, url).query(pagination))
            .await
    }

    // ---- comments ---------------------------------------------------------

    pub async fn create_comment(&self, comment: &NewComment) -> ApiResult<Comment> {
        self.send(self.request(Method::POST, "/api/comments/")?.json(comment))
            .await
    }

    pub async fn post_comments(&self, post_id: &str) -> ApiResult<Vec<Comment>> {
        let url = self.nested_url("/api/comments", post_id)?;
        self.send(self.request_url(Method::GET, url)).await
    }

    async fn send_form<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: FormPayload,
    ) -> ApiResult<T> {
        let form = payload.into_multipart()?;
        self.send(self.request(Method::POST, path)?.multipart(form))
            .await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            let err = ClientError::from_backend_body(status, &body);
            tracing::warn!(status = %status, detail = ?err.detail(), "backend rejected request");
            return Err(err);
        }
        serde_json::from_slice(&body).map_err(ClientError::Decode)
    }

    fn url(&self, path: &str) -> ApiResult<Url> {
        let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|_| ClientError::InvalidBaseUrl(self.base_url.clone()))
    }

    /// `prefix` plus one caller-supplied segment, percent-encoded so ids and
    /// usernames can never add path components of their own.
    fn nested_url(&self, prefix: &str, segment: &str) -> ApiResult<Url> {
        let mut url = self.url(prefix)?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidBaseUrl(self.base_url.clone()))?
            .pop_if_empty()
            .push(segment);
        Ok(url)
    }
}
