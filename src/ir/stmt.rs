//! Statement kinds and the statement arena node.
//!
//! Every statement carries a sequence number (0 for implicit assignments placed at
//! procedure entry), the [`BlockId`] of its enclosing basic block, and the native
//! address it was lifted from. Statements live in a contiguous arena owned by their
//! procedure's control-flow graph; all references between statements are [`StmtId`]
//! indices.
//!
//! # Assignment variants
//!
//! - [`StmtKind::Assign`] - ordinary assignment with a right-hand side
//! - [`StmtKind::Phi`] - SSA merge pseudo-assignment with one operand per predecessor
//! - [`StmtKind::Implicit`] - entry pseudo-definition naming a caller-supplied value
//! - [`StmtKind::Bool`] - set-on-condition assignment (e.g. `setcc`)
//!
//! # Collectors
//!
//! Calls and returns carry two collectors filled during SSA renaming: the *definition
//! collector* snapshots which definition of each location reaches the statement
//! (powering call bypass and `localise`), and the call's *use collector* records the
//! locations live at the call, which drives argument discovery and redundant-return
//! removal.

use std::fmt;

use crate::ir::{BlockId, Exp, LocationKind, LocationSet, ProcId, StmtId, Terminal};
use crate::types::Type;

/// A plain `lhs := rhs` pair with a type, used for call arguments and return values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleAssign {
    /// Assigned location.
    pub lhs: Exp,
    /// Type of the assigned value.
    pub ty: Type,
    /// Assigned value.
    pub rhs: Exp,
}

/// One phi operand: the value of `base` as defined by `def`, arriving over the edge
/// from `pred`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiOperand {
    /// Predecessor block this operand arrives from.
    pub pred: BlockId,
    /// Base expression of the merged location.
    pub base: Exp,
    /// Defining statement of the arriving value (`None` before renaming).
    pub def: Option<StmtId>,
}

/// Destination of a call statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallDest {
    /// A fixed native address not yet bound to a procedure.
    Fixed(u64),
    /// A user procedure in the same program.
    Proc(ProcId),
    /// A library procedure, identified by its index in the signature registry.
    Lib(usize),
    /// A computed destination still awaiting resolution.
    Computed(Exp),
}

impl CallDest {
    /// Returns `true` for a computed (indirect) destination.
    #[must_use]
    pub const fn is_computed(&self) -> bool {
        matches!(self, Self::Computed(_))
    }
}

/// A call statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStmt {
    /// Where the call goes.
    pub dest: CallDest,
    /// Argument assignments, ordered per the callee signature.
    pub args: Vec<SimpleAssign>,
    /// Locations this call defines in the caller (the callee's returns).
    pub defines: Vec<(Exp, Type)>,
    /// Locations live at this call (used by the callee), filled during renaming.
    pub use_collector: LocationSet,
    /// Reaching definition of each location at this call, filled during renaming.
    pub def_collector: Vec<(Exp, Option<StmtId>)>,
    /// Whether the callee's effects are modelled conservatively because it has not
    /// been analyzed yet (or is in the current recursion group).
    pub childless: bool,
}

impl CallStmt {
    /// Creates a call with empty collectors.
    #[must_use]
    pub fn new(dest: CallDest) -> Self {
        Self {
            dest,
            args: Vec::new(),
            defines: Vec::new(),
            use_collector: LocationSet::new(),
            def_collector: Vec::new(),
            childless: true,
        }
    }

    /// The definition of `base` reaching this call, if collected.
    #[must_use]
    pub fn find_def_for(&self, base: &Exp) -> Option<Option<StmtId>> {
        self.def_collector
            .iter()
            .find(|(b, _)| b == base)
            .map(|(_, d)| *d)
    }

    /// Rewrites `e` as seen from just before this call: every location is
    /// subscripted with the definition reaching the call.
    #[must_use]
    pub fn localise(&self, e: &Exp) -> Exp {
        let mut out = e.clone();
        for (base, def) in &self.def_collector {
            out.subscript_var(base, *def);
        }
        out
    }

    /// Drops arguments whose right-hand sides duplicate an earlier argument.
    pub fn eliminate_duplicate_args(&mut self) {
        let mut seen: Vec<Exp> = Vec::new();
        self.args.retain(|a| {
            if seen.contains(&a.rhs) {
                return false;
            }
            seen.push(a.rhs.clone());
            true
        });
    }
}

/// The unique return statement of a procedure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReturnStmt {
    /// Locations modified by the procedure (reaching the exit, preserveds removed).
    pub modifieds: Vec<(Exp, Type)>,
    /// The subset of modifieds actually returned, with their value expressions.
    pub returns: Vec<SimpleAssign>,
    /// Reaching definition of each location at the exit, filled during renaming.
    pub def_collector: Vec<(Exp, Option<StmtId>)>,
}

impl ReturnStmt {
    /// The definition of `base` reaching the exit, if collected.
    #[must_use]
    pub fn find_def_for(&self, base: &Exp) -> Option<Option<StmtId>> {
        self.def_collector
            .iter()
            .find(|(b, _)| b == base)
            .map(|(_, d)| *d)
    }

    /// Removes `base` from the modifieds (and the returns, which are a subset).
    pub fn remove_modified(&mut self, base: &Exp) {
        self.modifieds.retain(|(b, _)| b != base);
        self.returns.retain(|a| &a.lhs != base);
    }

    /// Removes `base` from the returns only.
    pub fn remove_return(&mut self, base: &Exp) {
        self.returns.retain(|a| &a.lhs != base);
    }
}

/// The kind tag of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    /// Ordinary assignment.
    Assign {
        /// Assigned location.
        lhs: Exp,
        /// Current type of the assigned value.
        ty: Type,
        /// Assigned value.
        rhs: Exp,
    },
    /// SSA merge pseudo-assignment.
    Phi {
        /// Merged location.
        lhs: Exp,
        /// Current type of the merged value.
        ty: Type,
        /// One operand per predecessor, in predecessor order.
        operands: Vec<PhiOperand>,
    },
    /// Entry pseudo-definition of a caller-supplied value.
    Implicit {
        /// Defined location.
        lhs: Exp,
        /// Current type.
        ty: Type,
    },
    /// Set-on-condition assignment.
    Bool {
        /// Assigned location.
        lhs: Exp,
        /// Current type (boolean unless refined).
        ty: Type,
        /// The condition whose truth value is stored.
        cond: Exp,
    },
    /// Procedure call.
    Call(CallStmt),
    /// Procedure return.
    Return(ReturnStmt),
    /// Conditional branch; falls through when the condition is false.
    Branch {
        /// Branch condition (`None` until lifted).
        cond: Option<Exp>,
        /// Native address of the taken target.
        dest: u64,
    },
    /// Unconditional jump.
    Goto {
        /// Native address of the target.
        dest: u64,
    },
    /// Jump through a computed destination (switch tables, indirect tail calls).
    ComputedGoto {
        /// The destination expression.
        dest: Exp,
    },
    /// Pseudo-statement marking a control-flow join; inserted and removed around
    /// path-sensitive passes.
    Junction,
}

/// A statement in a procedure's arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Proc-local sequence number; 0 marks implicit assignments.
    pub number: u32,
    /// Enclosing basic block.
    pub block: BlockId,
    /// Native address this statement was lifted from.
    pub addr: u64,
    /// The kind tag and payload.
    pub kind: StmtKind,
}

impl Statement {
    /// Creates a statement with sequence number 0 (renumbered later).
    #[must_use]
    pub fn new(block: BlockId, addr: u64, kind: StmtKind) -> Self {
        Self {
            number: 0,
            block,
            addr,
            kind,
        }
    }

    /// Returns `true` for any of the four assignment variants.
    #[must_use]
    pub const fn is_assignment(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Assign { .. }
                | StmtKind::Phi { .. }
                | StmtKind::Implicit { .. }
                | StmtKind::Bool { .. }
        )
    }

    /// Returns `true` for an ordinary assignment.
    #[must_use]
    pub const fn is_assign(&self) -> bool {
        matches!(self.kind, StmtKind::Assign { .. })
    }

    /// Returns `true` for a phi assignment.
    #[must_use]
    pub const fn is_phi(&self) -> bool {
        matches!(self.kind, StmtKind::Phi { .. })
    }

    /// Returns `true` for an implicit assignment.
    #[must_use]
    pub const fn is_implicit(&self) -> bool {
        matches!(self.kind, StmtKind::Implicit { .. })
    }

    /// Returns `true` for a call.
    #[must_use]
    pub const fn is_call(&self) -> bool {
        matches!(self.kind, StmtKind::Call(_))
    }

    /// Returns `true` for a return.
    #[must_use]
    pub const fn is_return(&self) -> bool {
        matches!(self.kind, StmtKind::Return(_))
    }

    /// Returns `true` for a conditional branch.
    #[must_use]
    pub const fn is_branch(&self) -> bool {
        matches!(self.kind, StmtKind::Branch { .. })
    }

    /// The left-hand side of an assignment variant.
    #[must_use]
    pub const fn lhs(&self) -> Option<&Exp> {
        match &self.kind {
            StmtKind::Assign { lhs, .. }
            | StmtKind::Phi { lhs, .. }
            | StmtKind::Implicit { lhs, .. }
            | StmtKind::Bool { lhs, .. } => Some(lhs),
            _ => None,
        }
    }

    /// The right-hand side of an ordinary assignment.
    #[must_use]
    pub const fn rhs(&self) -> Option<&Exp> {
        match &self.kind {
            StmtKind::Assign { rhs, .. } => Some(rhs),
            _ => None,
        }
    }

    /// The call payload, if this is a call.
    #[must_use]
    pub const fn as_call(&self) -> Option<&CallStmt> {
        match &self.kind {
            StmtKind::Call(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable call payload.
    pub fn as_call_mut(&mut self) -> Option<&mut CallStmt> {
        match &mut self.kind {
            StmtKind::Call(c) => Some(c),
            _ => None,
        }
    }

    /// The return payload, if this is a return.
    #[must_use]
    pub const fn as_return(&self) -> Option<&ReturnStmt> {
        match &self.kind {
            StmtKind::Return(r) => Some(r),
            _ => None,
        }
    }

    /// Mutable return payload.
    pub fn as_return_mut(&mut self) -> Option<&mut ReturnStmt> {
        match &mut self.kind {
            StmtKind::Return(r) => Some(r),
            _ => None,
        }
    }

    /// The locations this statement defines (bare base expressions).
    #[must_use]
    pub fn definitions(&self) -> Vec<Exp> {
        match &self.kind {
            StmtKind::Assign { lhs, .. }
            | StmtKind::Phi { lhs, .. }
            | StmtKind::Implicit { lhs, .. }
            | StmtKind::Bool { lhs, .. } => vec![lhs.clone()],
            StmtKind::Call(c) => {
                if c.childless {
                    vec![Exp::Terminal(Terminal::DefineAll)]
                } else {
                    c.defines.iter().map(|(e, _)| e.clone()).collect()
                }
            }
            _ => Vec::new(),
        }
    }

    /// The type this statement assigns to `base`, if it defines `base`.
    #[must_use]
    pub fn type_for(&self, base: &Exp) -> Option<Type> {
        match &self.kind {
            StmtKind::Assign { lhs, ty, .. }
            | StmtKind::Phi { lhs, ty, .. }
            | StmtKind::Implicit { lhs, ty }
            | StmtKind::Bool { lhs, ty, .. } => (lhs == base).then(|| ty.clone()),
            StmtKind::Call(c) => c
                .defines
                .iter()
                .find(|(e, _)| e == base)
                .map(|(_, t)| t.clone())
                .or_else(|| c.childless.then(|| Type::Void)),
            StmtKind::Return(r) => r
                .modifieds
                .iter()
                .find(|(e, _)| e == base)
                .map(|(_, t)| t.clone()),
            _ => None,
        }
    }

    /// Replaces the type this statement records for `base`.
    pub fn set_type_for(&mut self, base: &Exp, new_ty: Type) {
        match &mut self.kind {
            StmtKind::Assign { lhs, ty, .. }
            | StmtKind::Phi { lhs, ty, .. }
            | StmtKind::Implicit { lhs, ty }
            | StmtKind::Bool { lhs, ty, .. } => {
                if lhs == base {
                    *ty = new_ty;
                }
            }
            StmtKind::Call(c) => {
                if let Some(slot) = c.defines.iter_mut().find(|(e, _)| e == base) {
                    slot.1 = new_ty;
                }
            }
            StmtKind::Return(r) => {
                if let Some(slot) = r.modifieds.iter_mut().find(|(e, _)| e == base) {
                    slot.1 = new_ty;
                }
            }
            _ => {}
        }
    }

    /// Collects the locations this statement uses.
    ///
    /// With `include_collectors` set, the expressions held in call/return collectors
    /// count as uses as well; reference counting for unused-statement removal passes
    /// `false` so collector-only uses do not keep statements alive.
    pub fn add_used_locs(&self, set: &mut LocationSet, include_collectors: bool) {
        match &self.kind {
            StmtKind::Assign { lhs, rhs, .. } => {
                rhs.add_used_locs(set);
                // A memory write uses its address computation
                if let Exp::MemOf(addr) = lhs {
                    addr.add_used_locs(set);
                }
            }
            StmtKind::Phi { operands, .. } => {
                for op in operands {
                    set.insert(Exp::subscript(op.base.clone(), op.def));
                }
            }
            StmtKind::Implicit { .. } | StmtKind::Junction | StmtKind::Goto { .. } => {}
            StmtKind::Bool { lhs, cond, .. } => {
                cond.add_used_locs(set);
                if let Exp::MemOf(addr) = lhs {
                    addr.add_used_locs(set);
                }
            }
            StmtKind::Call(c) => {
                if let CallDest::Computed(dest) = &c.dest {
                    dest.add_used_locs(set);
                }
                for a in &c.args {
                    a.rhs.add_used_locs(set);
                }
                if include_collectors {
                    for u in &c.use_collector {
                        u.add_used_locs(set);
                    }
                }
            }
            StmtKind::Return(r) => {
                for a in &r.returns {
                    a.rhs.add_used_locs(set);
                }
                if include_collectors {
                    for (base, def) in &r.def_collector {
                        set.insert(Exp::subscript(base.clone(), *def));
                    }
                }
            }
            StmtKind::Branch { cond, .. } => {
                if let Some(c) = cond {
                    c.add_used_locs(set);
                }
            }
            StmtKind::ComputedGoto { dest } => dest.add_used_locs(set),
        }
    }

    /// All used locations as a fresh set (collectors excluded).
    #[must_use]
    pub fn used_locs(&self) -> LocationSet {
        let mut set = LocationSet::new();
        self.add_used_locs(&mut set, false);
        set
    }

    /// Applies `f` to every *use* expression in place: right-hand sides, addresses
    /// inside written memory locations, conditions, call arguments and destinations.
    /// Left-hand side base locations are not touched.
    pub fn map_uses(&mut self, f: &mut impl FnMut(&mut Exp)) {
        match &mut self.kind {
            StmtKind::Assign { lhs, rhs, .. } => {
                f(rhs);
                if let Exp::MemOf(addr) = lhs {
                    f(addr);
                }
            }
            StmtKind::Bool { lhs, cond, .. } => {
                f(cond);
                if let Exp::MemOf(addr) = lhs {
                    f(addr);
                }
            }
            StmtKind::Phi { .. } | StmtKind::Implicit { .. } => {}
            StmtKind::Call(c) => {
                if let CallDest::Computed(dest) = &mut c.dest {
                    f(dest);
                }
                for a in &mut c.args {
                    f(&mut a.rhs);
                }
            }
            StmtKind::Return(r) => {
                for a in &mut r.returns {
                    f(&mut a.rhs);
                }
            }
            StmtKind::Branch { cond, .. } => {
                if let Some(c) = cond {
                    f(c);
                }
            }
            StmtKind::ComputedGoto { dest } => f(dest),
            StmtKind::Goto { .. } | StmtKind::Junction => {}
        }
    }

    /// Applies `f` to every expression in the statement, including left-hand sides
    /// and phi operand bases. Used by the inverse SSA transform when subscripts are
    /// replaced wholesale.
    pub fn map_all_exps(&mut self, f: &mut impl FnMut(&mut Exp)) {
        match &mut self.kind {
            StmtKind::Assign { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            StmtKind::Bool { lhs, cond, .. } => {
                f(lhs);
                f(cond);
            }
            StmtKind::Phi { lhs, operands, .. } => {
                f(lhs);
                for op in operands {
                    f(&mut op.base);
                }
            }
            StmtKind::Implicit { lhs, .. } => f(lhs),
            StmtKind::Call(c) => {
                if let CallDest::Computed(dest) = &mut c.dest {
                    f(dest);
                }
                for a in &mut c.args {
                    f(&mut a.lhs);
                    f(&mut a.rhs);
                }
            }
            StmtKind::Return(r) => {
                for a in &mut r.returns {
                    f(&mut a.lhs);
                    f(&mut a.rhs);
                }
                for (m, _) in &mut r.modifieds {
                    f(m);
                }
            }
            StmtKind::Branch { cond, .. } => {
                if let Some(c) = cond {
                    f(c);
                }
            }
            StmtKind::ComputedGoto { dest } => f(dest),
            StmtKind::Goto { .. } | StmtKind::Junction => {}
        }
    }

    /// Returns `true` if any contained expression (collectors excluded) still holds
    /// a subscripted reference.
    #[must_use]
    pub fn has_refs(&self) -> bool {
        let mut found = false;
        let mut probe = self.clone();
        probe.map_all_exps(&mut |e| {
            e.for_each(&mut |n| found |= n.is_subscript());
        });
        found
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:4} ", self.number)?;
        match &self.kind {
            StmtKind::Assign { lhs, ty, rhs } => write!(f, "{lhs} := {rhs} : {ty}"),
            StmtKind::Phi { lhs, operands, .. } => {
                write!(f, "{lhs} := phi(")?;
                for (i, op) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match op.def {
                        Some(d) => write!(f, "{}{{{d}}}", op.base)?,
                        None => write!(f, "{}{{-}}", op.base)?,
                    }
                }
                write!(f, ")")
            }
            StmtKind::Implicit { lhs, ty } => write!(f, "{lhs} := -implicit- : {ty}"),
            StmtKind::Bool { lhs, cond, .. } => write!(f, "{lhs} := ({cond}) ? 1 : 0"),
            StmtKind::Call(c) => {
                match &c.dest {
                    CallDest::Fixed(a) => write!(f, "call {a:#x}")?,
                    CallDest::Proc(p) => write!(f, "call {p}")?,
                    CallDest::Lib(i) => write!(f, "call lib#{i}")?,
                    CallDest::Computed(e) => write!(f, "call [{e}]")?,
                }
                write!(f, "(")?;
                for (i, a) in c.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a.rhs)?;
                }
                write!(f, ")")
            }
            StmtKind::Return(r) => {
                write!(f, "ret")?;
                for (i, a) in r.returns.iter().enumerate() {
                    if i == 0 {
                        write!(f, " ")?;
                    } else {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} := {}", a.lhs, a.rhs)?;
                }
                Ok(())
            }
            StmtKind::Branch { cond: Some(c), dest } => write!(f, "branch {dest:#x} if {c}"),
            StmtKind::Branch { cond: None, dest } => write!(f, "branch {dest:#x}"),
            StmtKind::Goto { dest } => write!(f, "goto {dest:#x}"),
            StmtKind::ComputedGoto { dest } => write!(f, "goto [{dest}]"),
            StmtKind::Junction => write!(f, "junction"),
        }
    }
}

/// Convenience predicate: `true` when `e` is a location the renamer may subject to
/// SSA renaming. Memory locations, locals and parameters are only renameable once
/// the rename-memofs knob is on (they must not bind before their address expressions
/// have stabilised); the caller passes that state in.
#[must_use]
pub fn can_rename(e: &Exp, rename_memofs: bool) -> bool {
    match e {
        Exp::Reg(_) => true,
        Exp::Terminal(t) => t.is_flag() || *t == Terminal::Pc,
        Exp::Location(LocationKind::Temp(_)) => true,
        Exp::Location(LocationKind::Global(_)) => false,
        Exp::Location(_) => rename_memofs,
        Exp::MemOf(_) => rename_memofs,
        _ => false,
    }
}
