//! The single interactive Claude CLI session

mod manager;
mod pty;
pub mod types;

pub use manager::{clamp_dimensions, TerminalManager};
pub use types::{CommandMode, StartTerminalRequest, TerminalEvent, TerminalPhase, TerminalState};
