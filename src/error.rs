//! Error types for steptrace
//!
//! Provides error handling for:
//! - Tracee launch failures
//! - ptrace attach/step/detach failures
//! - Trace database persistence failures

use std::path::PathBuf;

use nix::errno::Errno;

/// Top-level steptrace error type
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// Launching the tracee failed
    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),

    /// A ptrace operation failed
    #[error("tracer failed: {0}")]
    Tracer(#[from] TracerError),

    /// Persisting or loading the trace database failed
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    /// Underlying I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tracee launch errors
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Spawning the program failed
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// Tracee exited before the tracer could attach
    #[error("{program} exited during startup ({status})")]
    ExitedEarly {
        program: String,
        status: std::process::ExitStatus,
    },
}

/// ptrace session errors
///
/// Every variant carries the tracee pid so a failure deep in the step loop
/// still identifies which process it was about.
#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    /// Attaching to the tracee failed
    #[error("attach to pid {pid} failed: {source}")]
    Attach { pid: i32, source: Errno },

    /// Waiting for a tracee stop failed
    #[error("wait on pid {pid} failed: {source}")]
    Wait { pid: i32, source: Errno },

    /// Requesting a single step failed
    #[error("single-step of pid {pid} failed: {source}")]
    Step { pid: i32, source: Errno },

    /// Reading the tracee register file failed
    #[error("register read from pid {pid} failed: {source}")]
    Registers { pid: i32, source: Errno },

    /// Reading tracee memory failed
    #[error("memory read at {addr:#x} from pid {pid} failed: {source}")]
    Memory { pid: i32, addr: u64, source: Errno },

    /// Detaching from the tracee failed
    #[error("detach from pid {pid} failed: {source}")]
    Detach { pid: i32, source: Errno },

    /// Constructing the disassembler failed
    #[error("disassembler init failed: {0}")]
    Disassembler(#[from] capstone::Error),
}

impl TracerError {
    /// Check if the error means the tracee no longer exists
    #[inline]
    #[must_use]
    pub fn is_tracee_gone(&self) -> bool {
        match self {
            Self::Wait { source, .. }
            | Self::Step { source, .. }
            | Self::Registers { source, .. }
            | Self::Memory { source, .. }
            | Self::Detach { source, .. } => matches!(source, Errno::ESRCH | Errno::ECHILD),
            Self::Attach { source, .. } => *source == Errno::ESRCH,
            _ => false,
        }
    }
}

/// Trace database errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading a trace file failed
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Writing a trace file failed
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Encoding trace entries failed
    #[error("trace encoding failed: {0}")]
    Encode(#[source] bincode::Error),

    /// Decoding trace entries failed
    #[error("trace decoding failed: {0}")]
    Decode(#[source] bincode::Error),
}
