//! steptrace: record-and-replay instruction tracing for Linux
//!
//! Attaches to a process, single-steps it while recording registers,
//! decoded instructions and stack changes, and serves the recording to a
//! small web viewer. Ships with `slow-hello`, a deterministic demo tracee.

pub mod demo;
pub mod error;
pub mod launcher;
pub mod server;
pub mod stats;
pub mod storage;
pub mod tracer;

pub use error::{LaunchError, StorageError, TraceError, TracerError};
pub use launcher::TraceeProcess;
pub use stats::TraceStats;
pub use storage::{InsnKind, MemChange, RegisterFile, TraceDb, TraceEntry};
pub use tracer::{StepEvent, Tracer, TracerConfig};
