//! Kestrel Core
//!
//! Dependency-light foundation shared across the Kestrel workspace: the data
//! model for runs, workers, evidence and reflection, the `RunEvent` stream
//! vocabulary, and the core error type.
//!
//! Heavier concerns (HTTP, generation providers, storage) live in the `llm`
//! crate and the main application crate, which extend these types.

pub mod error;
pub mod events;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use events::RunEvent;
pub use types::{
    ConsistencyCheck, EvidenceRecord, Framework, FusedEvidence, FusedRecord, Reflection,
    RunRecord, StabilityRating, TaskKind, WorkerErrorKind, WorkerId, WorkerResult, WorkerStatus,
    CANONICAL_WORKER_ORDER,
};
