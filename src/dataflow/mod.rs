//! Data-flow analyses over the statement IR.
//!
//! - [`typing`] - The data-flow type analyzer: `ascend`/`descend` passes iterated to
//!   a fixed point over the meet lattice
//! - [`propagate`] - Expression propagation with its dominating-phi and
//!   destination-count guards
//!
//! Both operate on one procedure's [`Cfg`](crate::cfg::Cfg) after SSA renaming; the
//! pipeline decides when they run and how their outcomes (change flags, the
//! indirect-call `convert` signal) feed back into iteration.

pub mod propagate;
pub mod typing;

pub use propagate::{propagate_statements, PropagateResult};
pub use typing::{TypeAnalyzer, DFA_ITER_LIMIT};
