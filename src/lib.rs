//! Core of an AWS developer toolkit: the region and service catalog, account
//! resolution over the shared credentials file, and a cache of service clients that
//! follows the selected account.

pub mod config;
pub mod context;
pub mod errors;
pub mod services;
pub mod utils;

pub use context::ToolkitContext;
pub use errors::{ToolkitError, ToolkitResult};
