//! Claude CLI discovery
//!
//! Locates a working Claude CLI executable from explicit overrides,
//! well-known installation directories and the search PATH.

mod config;
mod resolver;

pub use config::*;
pub use resolver::*;
