//! Instruction-level tracing
//!
//! Drives a stopped tracee one instruction at a time with ptrace:
//! - every step snapshots registers, decodes the instruction at pc, and
//!   diffs a window of stack around sp against the last look at it
//! - stop signals other than the step trap are re-injected on the next
//!   resume, so the tracee's own signal handling still works
//! - tracee exit is consumed by the step loop and surfaced as a
//!   [`StepEvent`], not an error
//!
//! The tracee is stopped whenever control is outside [`Tracer::single_step`];
//! dropping the tracer detaches and lets it run free again.

pub mod insn;
pub mod regs;

use std::collections::HashMap;
use std::io::IoSliceMut;

use capstone::prelude::*;
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::error::TracerError;
use crate::storage::{MemChange, TraceDb, TraceEntry};

/// Mnemonic recorded when the disassembler cannot decode the bytes at pc
const UNDECODED: &str = "??";

/// Tuning knobs for a trace session
#[derive(Debug, Clone, Copy)]
pub struct TracerConfig {
    /// Bytes of stack captured around sp each step; 0 disables the diff
    pub stack_window: usize,
    /// Bytes fetched at pc for instruction decoding
    pub code_window: usize,
    /// Window bases kept for diffing; the cache is flushed once it holds
    /// this many, so deep traces stay bounded
    pub max_cached_windows: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            stack_window: 256,
            code_window: 16,
            max_cached_windows: 4096,
        }
    }
}

/// Outcome of one call to [`Tracer::single_step`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    /// One instruction executed and recorded
    Stepped(TraceEntry),
    /// Tracee exited with a status code; sticky once returned
    Exited(i32),
    /// Tracee was killed by a signal; sticky once returned
    Terminated(Signal),
}

/// A live single-step session over one tracee
pub struct Tracer {
    pid: Pid,
    db: TraceDb,
    cs: Capstone,
    config: TracerConfig,
    step_count: u64,
    depth: u32,
    stack_cache: HashMap<u64, Vec<u8>>,
    pending_signal: Option<Signal>,
    finished: Option<StepEvent>,
    attached: bool,
}

impl Tracer {
    /// Attach to `pid` and wait for it to stop
    ///
    /// The stop signal the attach itself raises is swallowed here, never
    /// re-injected.
    pub fn attach(pid: Pid, db: TraceDb, config: TracerConfig) -> Result<Self, TracerError> {
        ptrace::attach(pid).map_err(|source| TracerError::Attach {
            pid: pid.as_raw(),
            source,
        })?;

        match waitpid(pid, None) {
            Ok(WaitStatus::Stopped(..)) => {}
            Ok(status) => {
                // raced with the tracee dying between attach and stop
                tracing::warn!(?status, "tracee did not stop after attach");
                return Err(TracerError::Attach {
                    pid: pid.as_raw(),
                    source: Errno::ESRCH,
                });
            }
            Err(source) => {
                return Err(TracerError::Wait {
                    pid: pid.as_raw(),
                    source,
                })
            }
        }

        let cs = build_disassembler()?;
        tracing::debug!(pid = pid.as_raw(), "attached");

        Ok(Self {
            pid,
            db,
            cs,
            config,
            step_count: 0,
            depth: 0,
            stack_cache: HashMap::new(),
            pending_signal: None,
            finished: None,
            attached: true,
        })
    }

    /// Pid of the tracee
    #[inline]
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Steps recorded so far in this session
    #[inline]
    #[must_use]
    pub fn steps_taken(&self) -> u64 {
        self.step_count
    }

    /// Record the instruction the tracee is stopped at, then execute it
    ///
    /// Returns [`StepEvent::Stepped`] with the recorded entry. When the
    /// executed instruction ends the process, that final entry is still
    /// returned as `Stepped`; the exit shows up on the next call.
    pub fn single_step(&mut self) -> Result<StepEvent, TracerError> {
        if let Some(event) = &self.finished {
            return Ok(event.clone());
        }

        let regs = regs::read_registers(self.pid)?;
        let (mnemonic, operands, insn_bytes) = self.decode_at(regs.pc)?;
        let kind = insn::classify(&mnemonic);
        let mem_changes = self.diff_stack_window(regs.sp);

        let entry = TraceEntry {
            step: self.step_count,
            pc: regs.pc,
            insn_bytes,
            mnemonic,
            operands,
            kind,
            depth: self.depth,
            regs,
            mem_changes,
        };
        self.db.insert(entry.clone());

        // the recorded depth is the one the instruction executes at
        self.depth = insn::next_depth(self.depth, kind);
        self.step_count += 1;

        ptrace::step(self.pid, self.pending_signal.take()).map_err(|source| {
            TracerError::Step {
                pid: self.pid.as_raw(),
                source,
            }
        })?;
        if let Some(event) = self.wait_for_stop()? {
            self.finished = Some(event);
        }

        Ok(StepEvent::Stepped(entry))
    }

    /// Detach and let the tracee run free
    ///
    /// A no-op once the tracee has exited.
    pub fn detach(&mut self) -> Result<(), TracerError> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;
        if self.finished.is_some() {
            return Ok(());
        }
        ptrace::detach(self.pid, None).map_err(|source| TracerError::Detach {
            pid: self.pid.as_raw(),
            source,
        })
    }

    /// Block until the tracee stops again after a resume
    ///
    /// `None` means it is stopped and steppable; `Some` carries the exit.
    fn wait_for_stop(&mut self) -> Result<Option<StepEvent>, TracerError> {
        let status = waitpid(self.pid, None).map_err(|source| TracerError::Wait {
            pid: self.pid.as_raw(),
            source,
        })?;

        match status {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => Ok(None),
            WaitStatus::Stopped(_, sig) => {
                // the tracee was signaled mid-step; hand the signal back on
                // the next resume instead of eating it
                tracing::debug!(signal = %sig, "re-injecting stop signal");
                self.pending_signal = Some(sig);
                Ok(None)
            }
            WaitStatus::Exited(_, code) => Ok(Some(StepEvent::Exited(code))),
            WaitStatus::Signaled(_, sig, _) => Ok(Some(StepEvent::Terminated(sig))),
            other => {
                tracing::warn!(?other, "unexpected wait status");
                Ok(None)
            }
        }
    }

    /// Fetch and decode the instruction at `pc`
    fn decode_at(&mut self, pc: u64) -> Result<(String, String, Vec<u8>), TracerError> {
        let code = self.read_memory(pc, self.config.code_window)?;
        Ok(decode_one(&self.cs, code, pc))
    }

    /// Diff the sp-centered stack window against the previous look at the
    /// same window base
    fn diff_stack_window(&mut self, sp: u64) -> Vec<MemChange> {
        if self.config.stack_window == 0 {
            return Vec::new();
        }
        let half = (self.config.stack_window / 2) as u64;
        let base = sp.saturating_sub(half);

        let window = match self.read_memory(base, self.config.stack_window) {
            Ok(window) => window,
            Err(err) => {
                // windows straddling an unmapped page are skipped, not fatal
                tracing::trace!(%err, "stack window unreadable");
                return Vec::new();
            }
        };
        diff_window(
            &mut self.stack_cache,
            self.config.max_cached_windows,
            base,
            window,
        )
    }

    /// Read `len` bytes of tracee memory, short reads allowed
    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>, TracerError> {
        let mut buf = vec![0u8; len];
        let read = {
            let mut local = [IoSliceMut::new(&mut buf)];
            let remote = [RemoteIoVec {
                base: addr as usize,
                len,
            }];
            process_vm_readv(self.pid, &mut local, &remote).map_err(|source| {
                TracerError::Memory {
                    pid: self.pid.as_raw(),
                    addr,
                    source,
                }
            })?
        };
        buf.truncate(read);
        Ok(buf)
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        // leave the tracee running, not frozen at its last stop
        if self.attached && self.finished.is_none() {
            let _ = ptrace::detach(self.pid, None);
        }
    }
}

/// Decode the first instruction in `code`
///
/// Undecodable bytes come back under the `"??"` mnemonic with the raw
/// window as bytes, never an error; the cpu can often execute what this
/// capstone build cannot name.
fn decode_one(cs: &Capstone, code: Vec<u8>, pc: u64) -> (String, String, Vec<u8>) {
    let decoded = match cs.disasm_count(&code, pc, 1) {
        Ok(insns) => insns.iter().next().map(|insn| {
            (
                insn.mnemonic().unwrap_or(UNDECODED).to_string(),
                insn.op_str().unwrap_or("").to_string(),
                insn.bytes().to_vec(),
            )
        }),
        Err(_) => None,
    };
    decoded.unwrap_or_else(|| (UNDECODED.to_string(), String::new(), code))
}

/// Diff `current` against the cached capture of `base`, then remember it
///
/// The first capture of a base reports nothing. Adding a base to a cache
/// already holding `limit` windows flushes it first, so every evicted
/// base diffs like a first capture the next time it comes around.
fn diff_window(
    cache: &mut HashMap<u64, Vec<u8>>,
    limit: usize,
    base: u64,
    current: Vec<u8>,
) -> Vec<MemChange> {
    let mut changes = Vec::new();
    if let Some(prev) = cache.get(&base) {
        for (i, (old, new)) in prev.iter().zip(current.iter()).enumerate() {
            if old != new {
                changes.push(MemChange {
                    addr: base + i as u64,
                    old_val: *old,
                    new_val: *new,
                });
            }
        }
    } else if cache.len() >= limit {
        cache.clear();
    }
    cache.insert(base, current);
    changes
}

#[cfg(target_arch = "x86_64")]
fn build_disassembler() -> Result<Capstone, capstone::Error> {
    Capstone::new()
        .x86()
        .mode(arch::x86::ArchMode::Mode64)
        .build()
}

#[cfg(target_arch = "aarch64")]
fn build_disassembler() -> Result<Capstone, capstone::Error> {
    Capstone::new()
        .arm64()
        .mode(arch::arm64::ArchMode::Arm)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_windows() {
        let config = TracerConfig::default();
        assert_eq!(config.stack_window, 256);
        assert_eq!(config.code_window, 16);
        assert_eq!(config.max_cached_windows, 4096);
    }

    #[test]
    fn disassembler_builds_for_host() {
        assert!(build_disassembler().is_ok());
    }

    #[test]
    fn decode_falls_back_on_an_empty_window() {
        let cs = build_disassembler().expect("host disassembler");
        let (mnemonic, operands, bytes) = decode_one(&cs, Vec::new(), 0x1000);

        assert_eq!(mnemonic, UNDECODED);
        assert!(operands.is_empty());
        assert!(bytes.is_empty());
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn decode_names_a_return() {
        let cs = build_disassembler().expect("host disassembler");
        let (mnemonic, _, bytes) = decode_one(&cs, vec![0xc3], 0x1000);

        assert_eq!(mnemonic, "ret");
        assert_eq!(bytes, vec![0xc3]);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn decode_keeps_undecodable_bytes() {
        // 0x06 (push es) does not exist in 64-bit mode
        let cs = build_disassembler().expect("host disassembler");
        let (mnemonic, operands, bytes) = decode_one(&cs, vec![0x06], 0x1000);

        assert_eq!(mnemonic, UNDECODED);
        assert!(operands.is_empty());
        assert_eq!(bytes, vec![0x06]);
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn decode_names_a_return() {
        let cs = build_disassembler().expect("host disassembler");
        let (mnemonic, _, bytes) = decode_one(&cs, vec![0xc0, 0x03, 0x5f, 0xd6], 0x1000);

        assert_eq!(mnemonic, "ret");
        assert_eq!(bytes, vec![0xc0, 0x03, 0x5f, 0xd6]);
    }

    #[test]
    fn first_window_capture_reports_nothing() {
        let mut cache = HashMap::new();
        let changes = diff_window(&mut cache, 8, 0x7000, vec![1, 2, 3, 4]);

        assert!(changes.is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn window_diff_locates_changed_bytes() {
        let mut cache = HashMap::new();
        diff_window(&mut cache, 8, 0x7000, vec![0xaa, 0xbb, 0xcc]);
        let changes = diff_window(&mut cache, 8, 0x7000, vec![0xaa, 0xfe, 0xcc]);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].addr, 0x7001);
        assert_eq!(changes[0].old_val, 0xbb);
        assert_eq!(changes[0].new_val, 0xfe);
    }

    #[test]
    fn window_cache_flushes_at_its_limit() {
        let mut cache = HashMap::new();
        for base in 0..10u64 {
            diff_window(&mut cache, 4, base * 0x100, vec![0xab; 4]);
            assert!(cache.len() <= 4);
        }

        // base 0 was flushed out, so its next capture diffs like a first one
        let changes = diff_window(&mut cache, 4, 0, vec![0xcd; 4]);
        assert!(changes.is_empty());
    }
}
