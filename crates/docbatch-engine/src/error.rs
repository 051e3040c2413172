use std::time::SystemTime;

use serde::Serialize;
use thiserror::Error;

use crate::transport::TransportError;

/// Stable error codes surfaced at the engine boundary for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingRequiredParam,
    InvalidRange,
    LocatorNotFound,
    AmbiguousLocator,
    OverlappingOperations,
    IndexOutOfBounds,
    StaleSnapshot,
    PartialApplyUnsupported,
    UndoNotAvailable,
    RemoteTransportError,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("operation {index}: missing required parameter '{param}'")]
    MissingRequiredParam { index: usize, param: &'static str },

    #[error("operation {index}: invalid range {start}..{end}")]
    InvalidRange {
        index: usize,
        start: usize,
        end: usize,
    },

    #[error("operation {index}: {message}")]
    LocatorNotFound { index: usize, message: String },

    #[error(
        "operation {index}: search '{search}' matched {matches} locations but a unique match was required"
    )]
    AmbiguousLocator {
        index: usize,
        search: String,
        matches: usize,
    },

    #[error("operations {first} and {second} target overlapping ranges")]
    OverlappingOperations { first: usize, second: usize },

    #[error("operation {index}: offset {offset} is outside the writable range 1..={max}")]
    IndexOutOfBounds {
        index: usize,
        offset: usize,
        max: usize,
    },

    #[error("snapshot fetched at {fetched_at:?} predates the last applied batch; re-fetch and retry")]
    StaleSnapshot { fetched_at: SystemTime },

    #[error("transport applied {applied} of {total} requests; partial application is not supported")]
    PartialApplyUnsupported { applied: usize, total: usize },

    #[error("{message}")]
    UndoNotAvailable { message: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::MissingRequiredParam { .. } => ErrorCode::MissingRequiredParam,
            EngineError::InvalidRange { .. } => ErrorCode::InvalidRange,
            EngineError::LocatorNotFound { .. } => ErrorCode::LocatorNotFound,
            EngineError::AmbiguousLocator { .. } => ErrorCode::AmbiguousLocator,
            EngineError::OverlappingOperations { .. } => ErrorCode::OverlappingOperations,
            EngineError::IndexOutOfBounds { .. } => ErrorCode::IndexOutOfBounds,
            EngineError::StaleSnapshot { .. } => ErrorCode::StaleSnapshot,
            EngineError::PartialApplyUnsupported { .. } => ErrorCode::PartialApplyUnsupported,
            EngineError::UndoNotAvailable { .. } => ErrorCode::UndoNotAvailable,
            EngineError::Transport(_) => ErrorCode::RemoteTransportError,
        }
    }

    /// The batch index of the operation this error is about, when there is one.
    pub fn operation_index(&self) -> Option<usize> {
        match self {
            EngineError::MissingRequiredParam { index, .. }
            | EngineError::InvalidRange { index, .. }
            | EngineError::LocatorNotFound { index, .. }
            | EngineError::AmbiguousLocator { index, .. }
            | EngineError::IndexOutOfBounds { index, .. } => Some(*index),
            EngineError::OverlappingOperations { first, .. } => Some(*first),
            _ => None,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code(),
            message: self.to_string(),
            offending_operation_index: self.operation_index(),
        }
    }
}

/// Structured error shape returned to callers at the batch boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending_operation_index: Option<usize>,
}
