/// Generation request client
///
/// Owns the lifecycle of creative-generation requests (video, image, music)
/// from local admission through remote submission to a terminal state,
/// enforcing a local concurrency ceiling and notifying observers on every
/// state transition.
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod request;
pub use request::*;

pub mod catalog;
pub use catalog::*;

mod backend;
pub use backend::*;

mod http;
pub use http::*;

mod client;
pub use client::*;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("request not found: {0}")]
    NotFound(RequestId),

    #[error("request already terminal: {0}")]
    AlreadyTerminal(RequestId),
}

pub type Result<T> = std::result::Result<T, GenerationError>;

/// Local request identifier, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub uuid::Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
