//! Basic blocks.

use crate::ir::{BlockId, StmtId};

/// How a basic block hands control to its successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Falls through to the next block.
    Fall,
    /// Ends in an unconditional jump (one successor).
    Oneway,
    /// Ends in a conditional branch (taken successor first, then fall-through).
    Twoway,
    /// Ends in a computed jump (successors unknown until recovered).
    Computed,
    /// Ends in a call (one successor: the return point).
    Call,
    /// Ends in a return (no successors).
    Ret,
}

/// A maximal straight-line sequence of statements with a single entry and exit.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// This block's identifier.
    pub id: BlockId,
    /// Lowest native address covered by the block.
    pub addr: u64,
    /// Statements in execution order (arena indices).
    pub stmts: Vec<StmtId>,
    /// Exit kind.
    pub kind: BlockKind,
    /// Predecessor blocks.
    pub in_edges: Vec<BlockId>,
    /// Successor blocks. For [`BlockKind::Twoway`] the taken target comes first.
    pub out_edges: Vec<BlockId>,
}

impl BasicBlock {
    /// Creates an empty block.
    #[must_use]
    pub fn new(id: BlockId, addr: u64, kind: BlockKind) -> Self {
        Self {
            id,
            addr,
            stmts: Vec::new(),
            kind,
            in_edges: Vec::new(),
            out_edges: Vec::new(),
        }
    }

    /// The last statement of the block, if any.
    #[must_use]
    pub fn last_stmt(&self) -> Option<StmtId> {
        self.stmts.last().copied()
    }
}
