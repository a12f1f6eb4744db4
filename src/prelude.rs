//! Convenient re-exports of the commonly used types.
//!
//! ```rust,ignore
//! use relift::prelude::*;
//! ```

pub use crate::cfg::{BasicBlock, BlockKind, Cfg, ConnectionGraph, DomTree};
pub use crate::dataflow::{propagate_statements, TypeAnalyzer, DFA_ITER_LIMIT};
pub use crate::decompile::{
    decompile, decompile_program, from_ssa, CycleGroup, Param, ProcStatus, Procedure,
};
pub use crate::ir::{
    BinaryOp, BlockId, CallDest, CallStmt, Const, Exp, LocationKind, LocationSet, PhiOperand,
    ProcId, ReturnStmt, SimpleAssign, Statement, StmtId, StmtKind, Terminal, TernaryOp, UnaryOp,
};
pub use crate::program::{Frontend, GlobalMap, Image, Parameter, Program, Section, Signature};
pub use crate::types::{
    registry, CompoundMember, DataInterval, DataIntervalMap, FuncSig, Type, UnionMember, STD_SIZE,
};
pub use crate::{Error, Result};
