//! The decompilation core: per-procedure state, the pipeline, and the call-graph
//! driver.
//!
//! # Architecture
//!
//! - [`status`] - The procedure status machine
//! - [`proc`] - [`Procedure`]: symbol map, locals, parameters, proven equations,
//!   cycle-group handle
//! - [`prove`] - Preservation proving with conditional premises
//! - [`pipeline`] - `initialise → early → middle → remove-unused`, each with its
//!   internal fixed points
//! - [`fromssa`] - The inverse SSA transform
//! - [`driver`] - Depth-first call-graph traversal, cycle-group discovery,
//!   recursion-group analysis, whole-program return/parameter trimming
//!
//! # Entry point
//!
//! [`driver::decompile_program`] drives everything: it decompiles each procedure
//! (discovering recursion groups on the way), removes redundant returns and
//! parameters program-wide, and leaves every procedure fully typed and SSA-free,
//! ready for an emitter.

pub mod driver;
mod fromssa;
pub mod pipeline;
mod proc;
pub mod prove;
mod status;

pub use driver::{decompile, decompile_program, recursion_group_analysis};
pub use fromssa::from_ssa;
pub use proc::{CycleGroup, Param, Procedure};
pub use status::ProcStatus;
