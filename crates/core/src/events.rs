//! Run Event Stream
//!
//! The tagged event vocabulary produced while a run executes. Producers
//! (executor units, synthesis, reflection) push events into a bounded channel
//! and a single drainer serializes them toward the transport, so frame order
//! on the wire equals production order.
//!
//! Exactly one terminal event (`Done` or `Error`) ends every stream; nothing
//! may follow it.

use serde::{Deserialize, Serialize};

use crate::types::{Reflection, WorkerId};

/// One event in a run's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A worker unit is about to invoke its worker. Emitted in canonical
    /// worker-set order.
    WorkerStarted { worker: WorkerId },

    /// Human-readable progress from a running worker; real-time order, no
    /// cross-worker ordering promised.
    WorkerProgress { worker: WorkerId, text: String },

    /// A worker finished; `summary` is a one-line success or error line.
    WorkerCompleted { worker: WorkerId, summary: String },

    /// A pipeline phase boundary ("retrieval", "synthesis", ...).
    Phase { name: String },

    /// An incremental fragment of the synthesis. Deltas are contiguous: no
    /// other event interleaves between the synthesis phase marker and the
    /// terminator, and their concatenation equals the persisted text.
    SynthesisDelta { text: String },

    /// The retained reflection, emitted once after synthesis completes.
    Reflection { reflection: Reflection },

    /// Successful terminator.
    Done,

    /// Failure terminator; `kind` follows the error taxonomy
    /// (`internal`, `generation_unavailable`, ...).
    Error { kind: String, message: String },
}

impl RunEvent {
    /// Whether this event terminates the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Done | RunEvent::Error { .. })
    }

    pub fn phase(name: impl Into<String>) -> Self {
        RunEvent::Phase { name: name.into() }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        RunEvent::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
