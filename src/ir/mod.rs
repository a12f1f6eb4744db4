//! Intermediate representation for decompilation.
//!
//! This module provides the expression and statement algebra that the rest of the
//! analysis operates on. Machine code arrives as register-transfer statements over
//! these expressions; decompilation rewrites them in place until they read as typed,
//! structured source.
//!
//! # Architecture
//!
//! The IR is organized into focused sub-modules:
//!
//! - [`operators`] - Closed operator enums for unary/binary/ternary forms
//! - [`exp`] - The [`Exp`] tagged sum with structural ordering and generic traversals
//! - [`simplify`] - Algebraic simplification used by proving and propagation
//! - [`stmt`] - Statement kinds stored in a per-procedure arena
//!
//! # Identifier model
//!
//! The original design of this kind of system links statements, blocks and procedures
//! with raw back-pointers. Here every control-flow graph owns its statements in a
//! contiguous arena and hands out stable [`StmtId`] indices; subscripted references
//! ([`Exp::Ref`]) store an index, never a pointer. [`BlockId`] and [`ProcId`] play the
//! same role for basic blocks and procedures.

mod exp;
mod operators;
mod simplify;
mod stmt;

pub use exp::{Const, Exp, LocationKind, LocationSet};
pub use operators::{BinaryOp, Terminal, TernaryOp, UnaryOp};
pub use simplify::simplify;
pub use stmt::{
    can_rename, CallDest, CallStmt, PhiOperand, ReturnStmt, SimpleAssign, Statement, StmtKind,
};

use std::fmt;

/// Unique identifier for a statement within one procedure's arena.
///
/// This is a lightweight handle into the statement arena owned by the procedure's
/// control-flow graph, providing O(1) access. The identifier is unique within a single
/// procedure but not globally unique across procedures.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StmtId(usize);

impl StmtId {
    /// Creates a new statement identifier.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the underlying arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Unique identifier for a basic block within one procedure's control-flow graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(usize);

impl BlockId {
    /// Creates a new block identifier.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the underlying index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Unique identifier for a procedure within a program.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcId(usize);

impl ProcId {
    /// Creates a new procedure identifier.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the underlying index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_newtypes() {
        assert_eq!(StmtId::new(3).index(), 3);
        assert_eq!(format!("{}", StmtId::new(3)), "s3");
        assert_eq!(format!("{}", BlockId::new(0)), "b0");
        assert_eq!(format!("{:?}", ProcId::new(7)), "p7");
        assert!(StmtId::new(1) < StmtId::new(2));
    }
}
