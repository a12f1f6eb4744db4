//! The procedure status machine.

use strum::Display;

/// Analysis progress of one procedure.
///
/// The driver advances a procedure monotonically through these states:
///
/// ```text
/// Undecoded -> Decoded -> Visited -> InCycle -> Preserveds -> EarlyDone -> Final -> CodeGenerated
/// ```
///
/// Non-recursive procedures skip `InCycle`/`Preserveds` and move straight through.
/// Calls to a procedure already `Final` link against its return statement; calls to
/// one still between `Visited` and `EarlyDone` have found a recursion cycle and are
/// modelled as childless until the whole group completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum ProcStatus {
    /// Registered but not yet decoded.
    Undecoded,
    /// Statements decoded into the control-flow graph.
    Decoded,
    /// Seen by the driver on the way down.
    Visited,
    /// Known to be part of a recursion group still under analysis.
    InCycle,
    /// The recursion group has completed middle decompilation; preservations hold.
    Preserveds,
    /// Middle decompilation done; unused-statement removal pending.
    EarlyDone,
    /// Fully decompiled.
    Final,
    /// Emitted; the statement list is frozen.
    CodeGenerated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_order_matches_progress() {
        assert!(ProcStatus::Undecoded < ProcStatus::Decoded);
        assert!(ProcStatus::Decoded < ProcStatus::Visited);
        assert!(ProcStatus::Visited < ProcStatus::InCycle);
        assert!(ProcStatus::InCycle < ProcStatus::Preserveds);
        assert!(ProcStatus::Preserveds < ProcStatus::EarlyDone);
        assert!(ProcStatus::EarlyDone < ProcStatus::Final);
        assert!(ProcStatus::Final < ProcStatus::CodeGenerated);
    }

    #[test]
    fn test_cycle_detection_window() {
        // The driver detects a cycle when a callee is visited but unfinished
        let in_window =
            |s: ProcStatus| s >= ProcStatus::Visited && s <= ProcStatus::EarlyDone;
        assert!(!in_window(ProcStatus::Decoded));
        assert!(in_window(ProcStatus::Visited));
        assert!(in_window(ProcStatus::InCycle));
        assert!(in_window(ProcStatus::EarlyDone));
        assert!(!in_window(ProcStatus::Final));
    }
}
