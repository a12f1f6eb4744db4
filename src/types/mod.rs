//! The type algebra and its lattice.
//!
//! Decompilation recovers types by data-flow analysis: every expression starts as
//! [`Type::Void`] (no information) and accumulates constraints through the `meet`
//! operator until a fixed point is reached. This module provides:
//!
//! - [`ty`] - The [`Type`] tagged sum, sizes and C-style descriptions
//! - [`meet`] - The meet operator, compatibility predicate and union construction
//! - [`registry`] - The process-wide named-type registry
//! - [`interval`] - [`DataIntervalMap`]: typed memory regions for stack frames and
//!   global data
//!
//! # Lattice shape
//!
//! `Void` is top. Meeting two types returns the most informative type compatible
//! with both; where no common refinement exists the result is a union, so the
//! lattice never bottoms out into an error value. See `meet` for the laws and the
//! change-flag contract the fixed-point iteration relies on.

mod interval;
mod meet;
pub mod registry;
mod ty;

pub use interval::{DataInterval, DataIntervalMap};
pub use ty::{CompoundMember, FuncSig, Type, UnionMember, STD_SIZE};
