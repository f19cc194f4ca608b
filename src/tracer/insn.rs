//! Instruction classification
//!
//! Maps decoded mnemonics onto [`InsnKind`] so call depth and control-flow
//! stats come from a typed field instead of repeated string matching, and
//! derives the call depth transition from the kind.

use crate::storage::InsnKind;

/// Classify a lowercase mnemonic as decoded by capstone
///
/// Covers x86_64 and aarch64; anything unrecognized, including the `"??"`
/// placeholder for undecodable bytes, is [`InsnKind::Other`].
#[must_use]
pub fn classify(mnemonic: &str) -> InsnKind {
    match mnemonic {
        "call" | "lcall" | "bl" | "blr" => InsnKind::Call,
        "iret" | "iretd" | "iretq" => InsnKind::Ret,
        "jmp" | "ljmp" | "b" | "br" | "cbz" | "cbnz" | "tbz" | "tbnz" => InsnKind::Jump,
        m if m.starts_with("ret") => InsnKind::Ret,
        // x86 conditional jumps and loops, aarch64 b.<cond>
        m if m.starts_with('j') || m.starts_with("b.") || m.starts_with("loop") => InsnKind::Jump,
        _ => InsnKind::Other,
    }
}

/// Call depth after an instruction of `kind` executes at `depth`
///
/// Saturating on both ends: a return at the attach frame stays at zero
/// instead of underflowing.
#[must_use]
pub fn next_depth(depth: u32, kind: InsnKind) -> u32 {
    match kind {
        InsnKind::Call => depth.saturating_add(1),
        InsnKind::Ret => depth.saturating_sub(1),
        InsnKind::Jump | InsnKind::Other => depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x86_control_flow() {
        assert_eq!(classify("call"), InsnKind::Call);
        assert_eq!(classify("ret"), InsnKind::Ret);
        assert_eq!(classify("jmp"), InsnKind::Jump);
        assert_eq!(classify("jne"), InsnKind::Jump);
        assert_eq!(classify("loopne"), InsnKind::Jump);
    }

    #[test]
    fn aarch64_control_flow() {
        assert_eq!(classify("bl"), InsnKind::Call);
        assert_eq!(classify("blr"), InsnKind::Call);
        assert_eq!(classify("ret"), InsnKind::Ret);
        assert_eq!(classify("b"), InsnKind::Jump);
        assert_eq!(classify("b.eq"), InsnKind::Jump);
        assert_eq!(classify("cbz"), InsnKind::Jump);
    }

    #[test]
    fn straight_line_code_is_other() {
        assert_eq!(classify("mov"), InsnKind::Other);
        assert_eq!(classify("add"), InsnKind::Other);
        // not confused by mnemonics that merely start with 'b'
        assert_eq!(classify("bic"), InsnKind::Other);
        assert_eq!(classify("bt"), InsnKind::Other);
    }

    #[test]
    fn undecodable_is_other() {
        assert_eq!(classify("??"), InsnKind::Other);
        assert_eq!(classify(""), InsnKind::Other);
    }

    #[test]
    fn depth_follows_calls_and_returns() {
        let mut depth = 0;
        depth = next_depth(depth, InsnKind::Call);
        depth = next_depth(depth, InsnKind::Call);
        assert_eq!(depth, 2);
        depth = next_depth(depth, InsnKind::Ret);
        assert_eq!(depth, 1);
        depth = next_depth(depth, InsnKind::Jump);
        depth = next_depth(depth, InsnKind::Other);
        assert_eq!(depth, 1);
    }

    #[test]
    fn depth_saturates_at_both_ends() {
        // attaching mid-function sees returns before any call
        assert_eq!(next_depth(0, InsnKind::Ret), 0);
        assert_eq!(next_depth(u32::MAX, InsnKind::Call), u32::MAX);
    }
}
