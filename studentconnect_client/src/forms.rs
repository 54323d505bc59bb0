//! Form checks and the single call each form makes once its input is valid.
//!
//! Every check runs before any network traffic; a form that fails
//! validation never reaches the API client.

use std::sync::Arc;

use reqwest::Url;

use crate::api::ApiResult;
use crate::error::ValidationError;
use crate::models::{
    AccessToken, Comment, Credentials, MessageResponse, NewComment, Post, ProfileUpdate,
    SignupRequest, User,
};
use crate::payload::{PostDraft, Upload};
use crate::session::SessionStore;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PROFILE_PICTURE_BYTES: u64 = 5 * 1024 * 1024;

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

fn check_password_length(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

/// New password plus confirmation: present, long enough, and equal.
pub fn check_new_password(password: &str, confirmation: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::NewPasswordRequired);
    }
    check_password_length(password)?;
    if password != confirmation {
        return Err(ValidationError::PasswordMismatch);
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("email", &self.email)?;
        require("password", &self.password)
    }

    pub async fn submit(&self, session: &SessionStore) -> ApiResult<AccessToken> {
        self.validate()?;
        session
            .login(&Credentials {
                email: self.email.trim().to_string(),
                password: self.password.clone(),
            })
            .await
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub bio: Option<String>,
}

impl SignupForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name)?;
        require("username", &self.username)?;
        require("email", &self.email)?;
        require("password", &self.password)?;
        check_password_length(&self.password)
    }

    pub async fn submit(&self, session: &SessionStore) -> ApiResult<User> {
        self.validate()?;
        let request = SignupRequest {
            email: self.email.trim().to_string(),
            username: self.username.trim().to_string(),
            name: self.name.trim().to_string(),
            password: self.password.clone(),
            bio: self.bio.clone().filter(|bio| !bio.trim().is_empty()),
        };
        session.signup(&request).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ForgotPasswordForm {
    pub email: String,
}

impl ForgotPasswordForm {
    pub async fn submit(&self, session: &SessionStore) -> ApiResult<MessageResponse> {
        require("email", &self.email)?;
        session.forgot_password(self.email.trim()).await
    }
}

/// Reset form opened from an emailed link; the link's `token` query
/// parameter is the only credential it uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetPasswordForm {
    token: Option<String>,
}

impl ResetPasswordForm {
    /// Accepts a full link (`https://.../reset-password?token=...`) or just
    /// its query string (`token=...`).
    pub fn from_link(link: &str) -> Self {
        let link = link.trim();
        let parsed = Url::parse(link).or_else(|_| {
            Url::parse(&format!("http://localhost/?{}", link.trim_start_matches('?')))
        });
        let token = parsed.ok().and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "token")
                .map(|(_, value)| value.into_owned())
                .filter(|value| !value.trim().is_empty())
        });
        Self { token }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: Some(token).filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Error to show as soon as the form opens.
    pub fn link_error(&self) -> Option<ValidationError> {
        self.token.is_none().then_some(ValidationError::InvalidResetLink)
    }

    pub fn validate(&self, password: &str, confirmation: &str) -> Result<&str, ValidationError> {
        check_new_password(password, confirmation)?;
        self.token().ok_or(ValidationError::MissingResetToken)
    }

    pub async fn submit(
        &self,
        session: &SessionStore,
        password: &str,
        confirmation: &str,
    ) -> ApiResult<MessageResponse> {
        let token = self.validate(password, confirmation)?;
        session.reset_password(token, password).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileForm {
    pub name: Option<String>,
    pub username: Option<String>,
    pub bio: Option<String>,
}

impl ProfileForm {
    /// Pre-filled from the current user, as the edit dialog starts out.
    pub fn from_user(user: &User) -> Self {
        Self {
            name: Some(user.name.clone()),
            username: Some(user.username.clone()),
            bio: Some(user.bio().unwrap_or_default().to_string()),
        }
    }

    pub fn into_update(self) -> Result<ProfileUpdate, ValidationError> {
        if let Some(name) = &self.name {
            require("name", name)?;
        }
        if let Some(username) = &self.username {
            require("username", username)?;
        }
        Ok(ProfileUpdate {
            name: self.name.map(|v| v.trim().to_string()),
            username: self.username.map(|v| v.trim().to_string()),
            bio: self.bio,
            profile_picture: None,
        })
    }

    pub async fn submit(self, session: &SessionStore) -> ApiResult<Arc<User>> {
        let update = self.into_update()?;
        session.update_profile(&update).await
    }
}

/// Image type and size gate for profile pictures; exactly 5 MiB passes.
pub fn check_profile_picture(upload: &Upload) -> Result<(), ValidationError> {
    if !upload.is_image() {
        return Err(ValidationError::NotAnImage);
    }
    if upload.size() > MAX_PROFILE_PICTURE_BYTES {
        return Err(ValidationError::FileTooLarge {
            size: upload.size(),
            limit: MAX_PROFILE_PICTURE_BYTES,
        });
    }
    Ok(())
}

pub async fn upload_profile_picture(session: &SessionStore, upload: Upload) -> ApiResult<Arc<User>> {
    check_profile_picture(&upload)?;
    session.update_profile_picture(upload).await
}

pub async fn publish_post(session: &SessionStore, draft: PostDraft) -> ApiResult<Post> {
    draft.validate()?;
    session.api().create_post(draft).await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentForm {
    pub post_id: String,
    pub parent_comment_id: Option<String>,
    pub content: String,
}

impl CommentForm {
    pub fn new(post_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
            parent_comment_id: None,
            content: content.into(),
        }
    }

    pub fn reply_to(mut self, comment_id: impl Into<String>) -> Self {
        self.parent_comment_id = Some(comment_id.into());
        self
    }

    pub async fn submit(&self, session: &SessionStore) -> ApiResult<Comment> {
        if self.content.trim().is_empty() {
            return Err(ValidationError::EmptyComment.into());
        }
        session
            .api()
            .create_comment(&NewComment {
                content: self.content.clone(),
                post_id: self.post_id.clone(),
                parent_comment_id: self.parent_comment_id.clone(),
            })
            .await
    }
}
