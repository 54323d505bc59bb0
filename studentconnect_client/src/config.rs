use crate::error::ClientError;
use reqwest::Url;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const API_URL_ENV: &str = "STUDENTCONNECT_API_URL";
pub const DATA_DIR_ENV: &str = "STUDENTCONNECT_DATA_DIR";
pub const TIMEOUT_ENV: &str = "STUDENTCONNECT_HTTP_TIMEOUT_SECS";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub paths: ClientPaths,
    /// `None` leaves the transport default in place.
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ClientError> {
        let api_url = env::var(API_URL_ENV)
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let paths = match env::var(DATA_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => ClientPaths::from_base_dir(dir),
            _ => ClientPaths::discover(),
        };
        let request_timeout = env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        Ok(Self {
            api_url: sanitize_base_url(api_url)?,
            paths,
            request_timeout,
        })
    }

    pub fn new(api_url: impl Into<String>, paths: ClientPaths) -> Result<Self, ClientError> {
        Ok(Self {
            api_url: sanitize_base_url(api_url.into())?,
            paths,
            request_timeout: None,
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Result<Self, ClientError> {
        self.api_url = sanitize_base_url(api_url.into())?;
        Ok(self)
    }

    pub fn with_paths(mut self, paths: ClientPaths) -> Self {
        self.paths = paths;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ClientPaths {
    pub base: PathBuf,
    pub local_storage: PathBuf,
}

impl ClientPaths {
    pub fn discover() -> Self {
        let base = dirs::data_dir()
            .map(|dir| dir.join("studentconnect"))
            .unwrap_or_else(|| PathBuf::from(".studentconnect"));
        Self::from_base_dir(base)
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref().to_path_buf();
        let local_storage = base.join("local_storage.json");
        Self {
            base,
            local_storage,
        }
    }
}

pub(crate) fn sanitize_base_url(raw: String) -> Result<String, ClientError> {
    let mut base = raw.trim().to_string();
    if !base.starts_with("http://") && !base.starts_with("https://") {
        base = format!("http://{base}");
    }
    while base.ends_with('/') {
        base.pop();
    }
    Url::parse(&base).map_err(|_| ClientError::InvalidBaseUrl(raw))?;
    Ok(base)
}
