//! Master error taxonomy
//!
//! Every operator- or framework-facing operation fails with one of four
//! categories. `Conflict` is decided before any side effect: a request
//! that cannot be satisfied leaves the partition and the outstanding
//! offers exactly as they were.

use arbor_allocator::AllocatorError;
use arbor_types::ResourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MasterError {
    /// The request is malformed or names an unknown entity
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Policy denies the operation for this principal
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The cluster state cannot satisfy the request right now
    #[error("conflict: {0}")]
    Conflict(String),

    /// An internal subsystem failed
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MasterError>;

impl MasterError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<ResourceError> for MasterError {
    fn from(error: ResourceError) -> Self {
        match error {
            ResourceError::InsufficientResources { .. } => Self::Conflict(error.to_string()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<AllocatorError> for MasterError {
    fn from(error: AllocatorError) -> Self {
        match error {
            AllocatorError::UnknownAgent(id) => Self::BadRequest(format!("unknown agent: {id}")),
            AllocatorError::AgentAlreadyRegistered(id) => {
                Self::BadRequest(format!("agent already registered: {id}"))
            }
            AllocatorError::Resources(inner) => Self::from(inner),
        }
    }
}
