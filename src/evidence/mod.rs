//! Evidence Layer
//!
//! Retrieval over weighted corpora (`store`), dense vector indices (`index`),
//! reliability-weighted fusion (`fusion`), and source/framework planning
//! (`orchestrator`).

pub mod fusion;
pub mod index;
pub mod orchestrator;
pub mod store;

pub use orchestrator::SourcePlan;
pub use store::{CorpusMeta, EvidenceStore};
