//! Session authentication and file handling behind the vault HTTP surface.

pub mod auth;
pub mod error;
pub mod files;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod state;
pub mod storage;

pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, AppStateInner};
