use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

impl User {
    pub fn bio(&self) -> Option<&str> {
        non_empty(&self.bio)
    }

    pub fn profile_picture_url(&self) -> Option<&str> {
        non_empty(&self.profile_picture)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Notes,
    Jobs,
    Threads,
}

impl PostType {
    pub const ALL: [PostType; 3] = [PostType::Notes, PostType::Jobs, PostType::Threads];

    pub fn as_str(self) -> &'static str {
        match self {
            PostType::Notes => "notes",
            PostType::Jobs => "jobs",
            PostType::Threads => "threads",
        }
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown post type '{0}' (expected notes, jobs or threads)")]
pub struct UnknownPostType(pub String);

impl FromStr for PostType {
    type Err = UnknownPostType;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        PostType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownPostType(raw.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub content: String,
    pub post_type: PostType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub author_id: String,
    pub author_name: String,
    pub author_username: String,
    #[serde(default)]
    pub author_profile_picture: Option<String>,
    #[serde(default)]
    pub document_url: Option<String>,
    #[serde(default)]
    pub document_name: Option<String>,
    #[serde(default)]
    pub job_link: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub comments_count: u32,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Type-specific fields of a post, selected by its `post_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostDetails<'a> {
    Notes {
        document_url: Option<&'a str>,
        document_name: Option<&'a str>,
    },
    Jobs {
        job_link: Option<&'a str>,
        company: Option<&'a str>,
        location: Option<&'a str>,
    },
    Threads,
}

impl Post {
    pub fn author_profile_picture_url(&self) -> Option<&str> {
        non_empty(&self.author_profile_picture)
    }

    pub fn kind(&self) -> PostDetails<'_> {
        match self.post_type {
            PostType::Notes => PostDetails::Notes {
                document_url: non_empty(&self.document_url),
                document_name: non_empty(&self.document_name),
            },
            PostType::Jobs => PostDetails::Jobs {
                job_link: non_empty(&self.job_link),
                company: non_empty(&self.company),
                location: non_empty(&self.location),
            },
            PostType::Threads => PostDetails::Threads,
        }
    }
}

/// A comment as listed under a post; top-level comments carry their direct
/// replies, replies never carry further replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub post_id: String,
    #[serde(default)]
    pub parent_comment_id: Option<String>,
    #[serde(default)]
    pub author_id: String,
    pub author_name: String,
    #[serde(default)]
    pub author_username: String,
    #[serde(default)]
    pub author_profile_picture: Option<String>,
    #[serde(default)]
    pub replies: Vec<Comment>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Comment {
    pub fn author_profile_picture_url(&self) -> Option<&str> {
        non_empty(&self.author_profile_picture)
    }

    pub fn is_reply(&self) -> bool {
        self.parent_comment_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub username: String,
    pub name: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// Partial profile update; fields left as `None` are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.username.is_none()
            && self.bio.is_none()
            && self.profile_picture.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    pub content: String,
    pub post_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_comment_id: Option<String>,
}

/// Feed filters; unset fields are left out of the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_type: Option<PostType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl PostQuery {
    pub fn search(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        self.search = if term.trim().is_empty() { None } else { Some(term) };
        self
    }

    pub fn post_type(mut self, post_type: PostType) -> Self {
        self.post_type = Some(post_type);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Pagination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
