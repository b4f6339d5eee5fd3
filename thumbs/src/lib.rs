//! Thumbnail proxy: maps opaque 12-character ids back to public video ids
//! and serves the best thumbnail the upstream has for them.

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod panic_hook;

pub use error::{Error, Result};
