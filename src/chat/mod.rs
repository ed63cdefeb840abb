//! One-shot agent exchanges over the Claude CLI stream-json protocol

pub mod decoder;
pub mod registry;
pub mod stream;
pub mod types;

pub use registry::StreamRegistry;
pub use stream::{StreamHandle, StreamOrchestrator, StreamOutcome};
pub use types::{PermissionMode, SendResult, StreamEvent, StreamPayload, StreamRequest};
