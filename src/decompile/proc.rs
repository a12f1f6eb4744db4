//! Per-procedure decompilation state.
//!
//! A [`Procedure`] owns its control-flow graph (and through it every statement), its
//! symbol and locals tables, the discovered parameter list, the proven and premised
//! preservation equations, and its cycle-group handle. Everything the pipeline and
//! the driver know about one procedure lives here.
//!
//! # Cycle groups
//!
//! Procedures in one recursion group share a single [`CycleGroup`] set: the handles
//! are reference-counted and pointer-identical, so any member's update is visible to
//! all. The core is single-threaded (see the concurrency notes in the crate docs),
//! which is what makes the shared `RefCell` sound.
//!
//! # Symbol map
//!
//! The symbol map is multi-valued on the key: the same machine location can carry
//! different types at different program points and then maps to more than one
//! symbol. Lookup prefers the first mapping whose recorded type is compatible.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use log::{debug, trace};

use crate::cfg::Cfg;
use crate::decompile::ProcStatus;
use crate::ir::{Exp, LocationKind, ProcId, StmtId};
use crate::program::Signature;
use crate::types::{DataIntervalMap, Type};

/// The shared set of procedures forming one recursion group.
pub type CycleGroup = Rc<RefCell<BTreeSet<ProcId>>>;

/// One discovered parameter: the implicit-assignment location and its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// The parameter's machine location (e.g. `r8` or `m[sp{-} + 4]`).
    pub exp: Exp,
    /// Its accumulated type.
    pub ty: Type,
}

/// A procedure under decompilation.
#[derive(Debug)]
pub struct Procedure {
    id: ProcId,
    name: String,
    addr: u64,
    status: ProcStatus,
    /// The control-flow graph, owning all statements.
    pub cfg: Cfg,
    /// This procedure's signature (grown by discovery unless forced).
    pub signature: Signature,
    /// Multi-valued map from machine location to symbolic location.
    pub symbol_map: BTreeMap<Exp, Vec<Exp>>,
    /// Local variable name → type.
    pub locals: BTreeMap<String, Type>,
    /// Ordered final parameters (implicit assignments at entry).
    pub parameters: Vec<Param>,
    /// The unique return statement, if the procedure returns.
    pub return_stmt: Option<StmtId>,
    /// Unconditionally proven preservation equations (`lhs = rhs` at exit).
    pub proven_true: BTreeMap<Exp, Exp>,
    /// Equations currently assumed while proving recursion-group members.
    pub recur_premises: BTreeMap<Exp, Exp>,
    /// The recursion group this procedure belongs to, if any.
    pub cycle_group: Option<CycleGroup>,
    /// Call sites that call this procedure: (caller, call statement).
    pub callers: BTreeSet<(ProcId, StmtId)>,
    /// Callees by id, in discovery order.
    pub callees: Vec<ProcId>,
    /// Locations this procedure uses before defining (its call-uses collector).
    pub col: BTreeSet<Exp>,
    /// Typed layout of the stack frame.
    pub frame: DataIntervalMap,
    next_local: u32,
    next_stmt_number: u32,
}

impl Procedure {
    /// Creates an undecoded procedure.
    #[must_use]
    pub fn new(id: ProcId, name: impl Into<String>, addr: u64, stack_register: u16) -> Self {
        let name = name.into();
        Self {
            id,
            signature: Signature::new(name.clone(), stack_register),
            name,
            addr,
            status: ProcStatus::Undecoded,
            cfg: Cfg::new(),
            symbol_map: BTreeMap::new(),
            locals: BTreeMap::new(),
            parameters: Vec::new(),
            return_stmt: None,
            proven_true: BTreeMap::new(),
            recur_premises: BTreeMap::new(),
            cycle_group: None,
            callers: BTreeSet::new(),
            callees: Vec::new(),
            col: BTreeSet::new(),
            frame: DataIntervalMap::new(),
            next_local: 0,
            next_stmt_number: 0,
        }
    }

    /// This procedure's id.
    #[must_use]
    pub const fn id(&self) -> ProcId {
        self.id
    }

    /// This procedure's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry address.
    #[must_use]
    pub const fn addr(&self) -> u64 {
        self.addr
    }

    /// Current analysis status.
    #[must_use]
    pub const fn status(&self) -> ProcStatus {
        self.status
    }

    /// Advances (or rolls back, for switch-recovery restarts) the status.
    pub fn set_status(&mut self, status: ProcStatus) {
        if status != self.status {
            trace!("{}: status {} -> {status}", self.name, self.status);
            self.status = status;
        }
    }

    /// Assigns sequence numbers to any unnumbered statements.
    pub fn number_statements(&mut self) {
        let mut next = self.next_stmt_number;
        self.cfg.number_statements(&mut next);
        self.next_stmt_number = next;
    }

    // ------------------------------------------------------------------
    // Locals and symbols
    // ------------------------------------------------------------------

    /// Creates a fresh local of type `ty` for the location `base`, recording it in
    /// the locals table and the symbol map. Returns the local's expression.
    pub fn new_local(&mut self, ty: Type, base: &Exp) -> Exp {
        let name = self.new_local_name();
        debug!("{}: new local {name} : {ty} for {base}", self.name);
        self.locals.insert(name.clone(), ty);
        let local = Exp::local(name);
        self.map_symbol_to(base.clone(), local.clone());
        local
    }

    /// Invents a fresh local name.
    pub fn new_local_name(&mut self) -> String {
        let n = self.next_local;
        self.next_local += 1;
        format!("local{n}")
    }

    /// Records a local by explicit name.
    pub fn add_local(&mut self, ty: Type, name: impl Into<String>, base: &Exp) {
        let name = name.into();
        self.locals.insert(name.clone(), ty);
        self.map_symbol_to(base.clone(), Exp::local(name));
    }

    /// Returns `true` if a local with `name` exists.
    #[must_use]
    pub fn exists_local(&self, name: &str) -> bool {
        self.locals.contains_key(name)
    }

    /// The type of a named local or parameter.
    #[must_use]
    pub fn type_for_location(&self, e: &Exp) -> Option<&Type> {
        let Exp::Location(kind) = e else {
            return None;
        };
        match kind {
            LocationKind::Local(n) | LocationKind::Temp(n) => self.locals.get(n),
            LocationKind::Param(n) => self
                .signature
                .params
                .iter()
                .find(|p| &p.name == n)
                .map(|p| &p.ty),
            LocationKind::Global(_) => None,
        }
    }

    /// Adds a mapping from a machine location to a symbolic location. The map is
    /// multi-valued; duplicates are ignored.
    pub fn map_symbol_to(&mut self, from: Exp, to: Exp) {
        let entry = self.symbol_map.entry(from).or_default();
        if !entry.contains(&to) {
            entry.push(to);
        }
    }

    /// The first symbol mapped for `from`, if any.
    #[must_use]
    pub fn first_symbol_for(&self, from: &Exp) -> Option<&Exp> {
        self.symbol_map.get(from).and_then(|v| v.first())
    }

    /// The symbol name a subscripted reference maps to, if any.
    #[must_use]
    pub fn lookup_sym_from_ref(&self, r: &Exp) -> Option<&str> {
        let syms = self.symbol_map.get(r)?;
        syms.iter().find_map(|s| match s {
            Exp::Location(kind) => Some(kind.name()),
            _ => None,
        })
    }

    /// Removes one `from → to` symbol mapping.
    pub fn remove_symbol_mapping(&mut self, from: &Exp, to: &Exp) {
        if let Some(v) = self.symbol_map.get_mut(from) {
            v.retain(|s| s != to);
            if v.is_empty() {
                self.symbol_map.remove(from);
            }
        }
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    /// Inserts a discovered parameter in signature order (no-op when the location
    /// is already a parameter).
    pub fn insert_parameter(&mut self, exp: Exp, ty: Type) {
        if self.parameters.iter().any(|p| p.exp == exp) {
            return;
        }
        let at = self.parameters.partition_point(|p| {
            self.signature.argument_compare(&p.exp, &exp) != std::cmp::Ordering::Greater
        });
        self.parameters.insert(at, Param { exp, ty });
    }

    /// Removes the parameter at location `e` from the list and the signature.
    pub fn remove_parameter(&mut self, e: &Exp) {
        self.parameters.retain(|p| &p.exp != e);
        self.signature.remove_parameter(e);
    }

    // ------------------------------------------------------------------
    // Preservation facts
    // ------------------------------------------------------------------

    /// What is proven about `lhs` at exit: the expression it still holds.
    #[must_use]
    pub fn get_proven(&self, lhs: &Exp) -> Option<&Exp> {
        self.proven_true.get(lhs)
    }

    /// The premise currently assumed about `lhs`, if any.
    #[must_use]
    pub fn get_premised(&self, lhs: &Exp) -> Option<&Exp> {
        self.recur_premises.get(lhs)
    }

    /// Assumes `lhs = lhs` while a conditional proof is in flight.
    pub fn set_premise(&mut self, lhs: Exp) {
        self.recur_premises.insert(lhs.clone(), lhs);
    }

    /// Drops the premise about `lhs`.
    pub fn kill_premise(&mut self, lhs: &Exp) {
        self.recur_premises.remove(lhs);
    }

    /// Returns `true` when `e = e` is proven at exit.
    #[must_use]
    pub fn is_preserved(&self, e: &Exp) -> bool {
        self.proven_true.get(e).is_some_and(|rhs| rhs == e)
    }

    // ------------------------------------------------------------------
    // Cycle groups
    // ------------------------------------------------------------------

    /// Returns `true` if this procedure and `other` share a recursion group.
    #[must_use]
    pub fn does_recurse_to(&self, other: ProcId) -> bool {
        self.cycle_group
            .as_ref()
            .is_some_and(|g| g.borrow().contains(&other))
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    /// Locations never reported as returns: the program counter, condition codes,
    /// temporaries, and the stack pointer (whose preservation is structural).
    #[must_use]
    pub fn filter_returns(&self, e: &Exp) -> bool {
        match e {
            Exp::Terminal(t) => t.is_flag() || *t == crate::ir::Terminal::Pc,
            Exp::Location(LocationKind::Temp(_)) => true,
            Exp::Reg(r) => *r == self.signature.stack_register,
            _ => self.is_preserved(e),
        }
    }

    /// Locations never reported as parameters: the program counter, condition
    /// codes, temporaries, the stack pointer, and memory at constant addresses
    /// (globals).
    #[must_use]
    pub fn filter_params(&self, e: &Exp) -> bool {
        match e {
            Exp::Terminal(_) => true,
            Exp::Location(LocationKind::Temp(_)) => true,
            Exp::Reg(r) => *r == self.signature.stack_register,
            Exp::MemOf(addr) => addr.addr_value().is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinaryOp;

    fn proc() -> Procedure {
        Procedure::new(ProcId::new(0), "test", 0x1000, 28)
    }

    #[test]
    fn test_new_local_registers_symbol() {
        let mut p = proc();
        let base = Exp::subscript(Exp::reg(24), None);
        let local = p.new_local(Type::int(32), &base);
        assert_eq!(local, Exp::local("local0"));
        assert!(p.exists_local("local0"));
        assert_eq!(p.first_symbol_for(&base), Some(&local));
        assert_eq!(p.lookup_sym_from_ref(&base), Some("local0"));
        // Names don't repeat
        assert_eq!(p.new_local_name(), "local1");
    }

    #[test]
    fn test_symbol_map_is_multivalued() {
        let mut p = proc();
        let key = Exp::reg(24);
        p.map_symbol_to(key.clone(), Exp::local("a"));
        p.map_symbol_to(key.clone(), Exp::local("b"));
        p.map_symbol_to(key.clone(), Exp::local("a")); // duplicate ignored
        assert_eq!(p.symbol_map[&key].len(), 2);
        p.remove_symbol_mapping(&key, &Exp::local("a"));
        assert_eq!(p.first_symbol_for(&key), Some(&Exp::local("b")));
    }

    #[test]
    fn test_parameter_order_follows_signature() {
        let mut p = proc();
        let stack4 = Exp::mem_of(Exp::binary(
            BinaryOp::Add,
            Exp::subscript(Exp::reg(28), None),
            Exp::int(4),
        ));
        p.insert_parameter(stack4.clone(), Type::int(32));
        p.insert_parameter(Exp::reg(8), Type::int(32));
        assert_eq!(p.parameters[0].exp, Exp::reg(8));
        assert_eq!(p.parameters[1].exp, stack4);
        // Duplicate insert is a no-op
        p.insert_parameter(Exp::reg(8), Type::Char);
        assert_eq!(p.parameters.len(), 2);
    }

    #[test]
    fn test_preservation_facts() {
        let mut p = proc();
        assert!(!p.is_preserved(&Exp::reg(28)));
        p.proven_true.insert(Exp::reg(28), Exp::reg(28));
        assert!(p.is_preserved(&Exp::reg(28)));

        p.set_premise(Exp::reg(29));
        assert_eq!(p.get_premised(&Exp::reg(29)), Some(&Exp::reg(29)));
        p.kill_premise(&Exp::reg(29));
        assert_eq!(p.get_premised(&Exp::reg(29)), None);
    }

    #[test]
    fn test_filters() {
        let mut p = proc();
        assert!(p.filter_returns(&Exp::Terminal(crate::ir::Terminal::Flags)));
        assert!(p.filter_returns(&Exp::reg(28))); // stack pointer
        assert!(!p.filter_returns(&Exp::reg(24)));
        p.proven_true.insert(Exp::reg(29), Exp::reg(29));
        assert!(p.filter_returns(&Exp::reg(29))); // preserved

        assert!(p.filter_params(&Exp::reg(28)));
        assert!(p.filter_params(&Exp::mem_of(Exp::addr(0x8000))));
        assert!(!p.filter_params(&Exp::reg(8)));
    }

    #[test]
    fn test_cycle_group_sharing() {
        let mut a = Procedure::new(ProcId::new(0), "a", 0, 28);
        let mut b = Procedure::new(ProcId::new(1), "b", 0x100, 28);
        let group: CycleGroup = Rc::new(RefCell::new(BTreeSet::new()));
        group.borrow_mut().insert(a.id());
        group.borrow_mut().insert(b.id());
        a.cycle_group = Some(Rc::clone(&group));
        b.cycle_group = Some(Rc::clone(&group));

        // An update through one member is visible to the other
        a.cycle_group
            .as_ref()
            .unwrap()
            .borrow_mut()
            .insert(ProcId::new(2));
        assert!(b.does_recurse_to(ProcId::new(2)));
    }
}
