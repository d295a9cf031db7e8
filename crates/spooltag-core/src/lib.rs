//! Core types shared by every spooltag crate.
//!
//! This crate holds the tag payload model, the memory layout constants of the
//! payload block and the closed error taxonomy that reader operations report
//! to their callers.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{MessageKey, Result, SessionError};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
