//! Register capture
//!
//! Reads the stopped tracee's register file and flattens it into the
//! architecture-neutral [`RegisterFile`] record.

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::error::TracerError;
use crate::storage::RegisterFile;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("steptrace supports x86_64 and aarch64 Linux targets");

/// Snapshot the general-purpose registers of a stopped tracee
#[cfg(target_arch = "x86_64")]
pub fn read_registers(pid: Pid) -> Result<RegisterFile, TracerError> {
    let regs = ptrace::getregs(pid).map_err(|source| TracerError::Registers {
        pid: pid.as_raw(),
        source,
    })?;

    let gpr = vec![
        ("rax".to_string(), regs.rax),
        ("rbx".to_string(), regs.rbx),
        ("rcx".to_string(), regs.rcx),
        ("rdx".to_string(), regs.rdx),
        ("rsi".to_string(), regs.rsi),
        ("rdi".to_string(), regs.rdi),
        ("rbp".to_string(), regs.rbp),
        ("rsp".to_string(), regs.rsp),
        ("r8".to_string(), regs.r8),
        ("r9".to_string(), regs.r9),
        ("r10".to_string(), regs.r10),
        ("r11".to_string(), regs.r11),
        ("r12".to_string(), regs.r12),
        ("r13".to_string(), regs.r13),
        ("r14".to_string(), regs.r14),
        ("r15".to_string(), regs.r15),
        ("rip".to_string(), regs.rip),
        ("eflags".to_string(), regs.eflags),
    ];

    Ok(RegisterFile {
        pc: regs.rip,
        sp: regs.rsp,
        gpr,
    })
}

/// Snapshot the general-purpose registers of a stopped tracee
#[cfg(target_arch = "aarch64")]
pub fn read_registers(pid: Pid) -> Result<RegisterFile, TracerError> {
    let regs = ptrace::getregset::<ptrace::regset::NT_PRSTATUS>(pid).map_err(|source| {
        TracerError::Registers {
            pid: pid.as_raw(),
            source,
        }
    })?;

    let mut gpr = Vec::with_capacity(regs.regs.len() + 3);
    for (i, value) in regs.regs.iter().enumerate() {
        gpr.push((format!("x{i}"), *value));
    }
    gpr.push(("sp".to_string(), regs.sp));
    gpr.push(("pc".to_string(), regs.pc));
    gpr.push(("pstate".to_string(), regs.pstate));

    Ok(RegisterFile {
        pc: regs.pc,
        sp: regs.sp,
        gpr,
    })
}
