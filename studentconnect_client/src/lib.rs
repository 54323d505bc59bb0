//! Client side of the StudentConnect platform: a typed API client, the
//! session store that tracks who is logged in, and the form logic the
//! front end drives. All business rules live in the backend service.

pub mod api;
pub mod config;
pub mod error;
pub mod forms;
pub mod models;
pub mod payload;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod utils;

use std::sync::Arc;

pub use api::{ApiClient, ApiResult};
pub use config::{ClientConfig, ClientPaths};
pub use error::{ClientError, StorageError, ValidationError};
pub use session::{Session, SessionState, SessionStore};
pub use storage::{LocalStorage, MemoryTokenStore, TokenStore};

/// Wires the durable token store, API client and session store together
/// from a configuration. The returned session is still `Unresolved`; call
/// [`SessionStore::restore`] to validate any stored token.
pub fn connect(config: &ClientConfig) -> Result<SessionStore, ClientError> {
    let tokens: Arc<dyn TokenStore> = Arc::new(LocalStorage::open(&config.paths.local_storage));
    let api = ApiClient::from_config(config, tokens)?;
    Ok(SessionStore::new(api))
}
