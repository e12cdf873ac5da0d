// HTTP client for the remote store
pub mod api;

// FUSE binding (optional)
#[cfg(feature = "fuse")]
pub mod fuse;

// Logging and signal handling
pub mod process;

// App state (configuration, paths)
pub mod state;

pub use api::{ApiClient, ApiError};
pub use state::{AppConfig, AppState, StateError};
