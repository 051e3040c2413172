pub mod batch;
pub mod error;
pub mod ops;
pub mod snapshot;
pub mod transport;

// Re-export key types for easier usage
pub use batch::history::{
    AppliedOperationRecord, DocumentState, HistoryStats, HistoryStore, UndoCapability,
};
pub use batch::{
    BatchExecutor, BatchRequest, BatchResult, ExecutionMode, OperationOutcome, PreviewReport,
    TabDiff,
};
pub use error::{EngineError, ErrorCode, ErrorPayload};
pub use ops::locator::{Locator, Occurrence, SearchPosition};
pub use ops::{ListStyle, OpKind, Operation, Range, Target, TextStyle};
pub use snapshot::{DocumentSnapshot, Heading, ORIGIN, Tab};
pub use transport::{DocRequest, DocumentTransport, InMemoryTransport, SubmitOutcome, TransportError};
