//! HTTP surface of the proxy.

pub mod error;
pub mod headers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, AppState};
