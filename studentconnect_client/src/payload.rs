//! Multipart payloads for the two file-bearing submissions: post creation
//! and profile-picture upload.

use crate::error::{ClientError, StorageError, ValidationError};
use crate::models::PostType;
use reqwest::multipart::{Form, Part};
use std::path::Path;

/// A file picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Wraps in-memory bytes. The MIME type is sniffed from the content and
    /// falls back to the file extension.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime = detect_mime(&file_name, &bytes);
        Self {
            file_name,
            mime,
            bytes,
        }
    }

    pub fn with_mime(file_name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();
        Ok(Self::new(file_name, bytes))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }

    fn into_part(self) -> Result<Part, ClientError> {
        Ok(Part::bytes(self.bytes)
            .file_name(self.file_name)
            .mime_str(&self.mime)?)
    }
}

fn detect_mime(file_name: &str, bytes: &[u8]) -> String {
    if let Some(kind) = infer::get(bytes) {
        return kind.mime_type().to_string();
    }
    let ext = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let mime = match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        _ => "application/octet-stream",
    };
    mime.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    Text(String),
    File(Upload),
}

/// Ordered multipart fields, kept inspectable until the moment they are
/// turned into a request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormPayload {
    fields: Vec<(String, FormField)>,
}

impl FormPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), FormField::Text(value.into())));
        self
    }

    pub fn file(mut self, name: impl Into<String>, upload: Upload) -> Self {
        self.fields.push((name.into(), FormField::File(upload)));
        self
    }

    pub fn fields(&self) -> &[(String, FormField)] {
        &self.fields
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.iter().any(|(field, _)| field == name)
    }

    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.fields.iter().find_map(|(field, value)| match value {
            FormField::Text(text) if field == name => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn into_multipart(self) -> Result<Form, ClientError> {
        let mut form = Form::new();
        for (name, field) in self.fields {
            form = match field {
                FormField::Text(value) => form.text(name, value),
                FormField::File(upload) => form.part(name, upload.into_part()?),
            };
        }
        Ok(form)
    }
}

/// Fields that only exist for one post type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostKind {
    Notes {
        document: Option<Upload>,
    },
    Jobs {
        job_link: String,
        company: Option<String>,
        location: Option<String>,
    },
    Threads,
}

impl PostKind {
    pub fn post_type(&self) -> PostType {
        match self {
            PostKind::Notes { .. } => PostType::Notes,
            PostKind::Jobs { .. } => PostType::Jobs,
            PostKind::Threads => PostType::Threads,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub kind: PostKind,
}

impl PostDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>, kind: PostKind) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            kind,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn post_type(&self) -> PostType {
        self.kind.post_type()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title"));
        }
        if self.content.trim().is_empty() {
            return Err(ValidationError::MissingField("content"));
        }
        if let PostKind::Jobs { job_link, .. } = &self.kind {
            if job_link.trim().is_empty() {
                return Err(ValidationError::JobLinkRequired);
            }
        }
        Ok(())
    }

    pub fn into_payload(self) -> FormPayload {
        let post_type = self.post_type();
        let payload = FormPayload::new()
            .text("title", self.title)
            .text("content", self.content)
            .text("post_type", post_type.as_str())
            .text("tags", self.tags.join(","));
        match self.kind {
            PostKind::Jobs {
                job_link,
                company,
                location,
            } => payload
                .text("job_link", job_link)
                .text("company", company.unwrap_or_default())
                .text("location", location.unwrap_or_default()),
            PostKind::Notes {
                document: Some(document),
            } => payload.file("document", document),
            PostKind::Notes { document: None } | PostKind::Threads => payload,
        }
    }
}

pub fn profile_picture_payload(upload: Upload) -> FormPayload {
    FormPayload::new().file("file", upload)
}

/// Splits comma separated tag input, dropping blanks.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}
