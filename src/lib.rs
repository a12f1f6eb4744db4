#![deny(missing_docs)]
#![allow(dead_code)]

//! # relift
//!
//! A machine-code decompilation core: takes a disassembled procedure's low-level
//! intermediate representation (basic blocks of register-transfer statements) and
//! raises it to a typed, structured, high-level representation suitable for
//! emitting source code.
//!
//! # Architecture
//!
//! The library is organized into layers that mirror the decompilation flow:
//!
//! - **IR Layer** ([`ir`]): the expression and statement algebra. Expressions are a
//!   tagged sum with structural ordering and generic fold/map traversals;
//!   statements live in per-procedure arenas and reference each other by stable
//!   index, never by pointer.
//! - **Type Layer** ([`types`]): the type lattice with its `meet` operator, the
//!   process-wide named-type registry, and the data-interval maps that describe
//!   typed memory regions (stack frames, global data).
//! - **CFG Layer** ([`cfg`]): dominator trees, dominance frontiers, phi placement,
//!   SSA renaming, live ranges and interference.
//! - **Dataflow Layer** ([`dataflow`]): the data-flow type analyzer
//!   (ascend/descend to a fixed point) and guarded expression propagation.
//! - **Decompile Layer** ([`decompile`]): per-procedure state, preservation
//!   proving, the bounded decompilation pipeline, the inverse SSA transform, and
//!   the call-graph driver that discovers recursion groups on the fly.
//! - **Program Layer** ([`program`]): the whole-program container and the
//!   interfaces to external collaborators (instruction decoder, loader image,
//!   signature registry).
//!
//! # Usage
//!
//! ```rust,ignore
//! use relift::prelude::*;
//!
//! let mut prog = Program::new(image);
//! let main = prog.add_proc("main", 0x1000, 28);
//! decompile_program(&prog, &frontend)?;
//!
//! // Every reachable procedure is now fully typed and SSA-free
//! let proc = prog.proc(main);
//! for sid in proc.cfg.statements() {
//!     println!("{}", proc.cfg.stmt(sid));
//! }
//! ```
//!
//! # Concurrency model
//!
//! The core is single-threaded and cooperative. The driver owns the procedure
//! under analysis for the duration of its analysis window; recursion-group members
//! share exactly one cycle-group set (pointer-identical handles), and all mutation
//! happens under one thread. Timeouts are realised as iteration caps (the type
//! analyzer stops after 20 round-robin passes, the middle pipeline after ten), not
//! wall-clock.
//!
//! # Error handling
//!
//! Recoverable conditions (type weaves, failed preservation proofs, missed fixed
//! points) are logged through the `log` facade and degrade gracefully; only broken
//! internal invariants surface as [`Error::Internal`]. See [`Error`] for the full
//! taxonomy.

pub mod cfg;
pub mod dataflow;
pub mod decompile;
pub mod ir;
pub mod program;
pub mod types;

mod error;

pub use error::Error;
pub(crate) use error::internal_error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude;
