//! bilimod - batch block/unblock for Bilibili users
//!
//! This crate extracts user ids from pasted text and runs paced, authenticated
//! block/unblock calls against Bilibili's relation API. The session cookies
//! stay inside a dedicated session worker; the batch side reaches it only
//! through the [`relay`] request/reply channel.

pub mod action;
pub mod batch;
pub mod cli;
pub mod config;
pub mod cookies;
pub mod error;
pub mod executor;
pub mod exit_code;
pub mod i18n;
pub mod logging;
pub mod output;
pub mod relay;
pub mod uid;
pub mod utils;

pub use error::{BilimodError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
