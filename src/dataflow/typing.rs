//! Data-flow based type analysis.
//!
//! Types are recovered by iterating two passes over every statement until the meet
//! lattice stops changing: `ascend` computes a bottom-up type for an expression from
//! its subexpressions, and `descend` pushes contextual knowledge back down, meeting
//! it into the types stored on defining statements. The round robin is capped at
//! [`DFA_ITER_LIMIT`] iterations; on pathological inputs the analyzer logs the
//! failure and proceeds with the best typing found so far.
//!
//! # Addition and subtraction
//!
//! Pointer arithmetic makes `+` and `-` the interesting operators. The sigma/delta
//! functions encode the result/operand tables: a pointer plus an integer is a
//! pointer, a pointer minus a pointer is an integer, and conflicting evidence
//! degrades to `void *` rather than erroring.
//!
//! # Side effects
//!
//! Descending is allowed to *rewrite* expressions when the recovered type says the
//! representation is wrong: integer constants reinterpret as floats, `char *` typed
//! constants into read-only memory become string literals, and constants feeding
//! pointer contexts register program globals. The scaled-array pattern
//! `m[idx*K1 + K2]` is rewritten to `name[idx]` by the post-pass
//! [`TypeAnalyzer::apply_results`], which also harvests stack-frame layout and
//! global uses from implicit assignments.

use log::{debug, warn};

use crate::cfg::Cfg;
use crate::ir::{
    BinaryOp, Const, Exp, SimpleAssign, Statement, StmtId, StmtKind, Terminal, TernaryOp,
};
use crate::program::{GlobalMap, Image, Signature};
use crate::types::{DataIntervalMap, Type, STD_SIZE};

/// Iteration cap for the round-robin fixed point.
pub const DFA_ITER_LIMIT: u32 = 20;

/// The per-procedure type analyzer.
///
/// Borrows the procedure's control-flow graph and stack layout together with the
/// program-level global map and image for the duration of one analysis.
pub struct TypeAnalyzer<'a> {
    /// The procedure's graph (types live on its statements).
    pub cfg: &'a mut Cfg,
    /// Program-wide globals, grown as pointer constants are discovered.
    pub globals: &'a mut GlobalMap,
    /// The read-only image, for string recovery and section queries.
    pub image: &'a Image,
    /// The procedure's stack-frame layout, grown from typed stack accesses.
    pub frame: &'a mut DataIntervalMap,
    /// The procedure's signature (stack register, parameter types).
    pub sig: &'a Signature,
    /// Procedure name, for diagnostics.
    pub proc_name: &'a str,
}

impl TypeAnalyzer<'_> {
    /// Runs ascend/descend over all statements to a fixed point.
    ///
    /// Returns `true` on convergence; `false` (after logging) when the iteration
    /// cap was reached.
    pub fn run(&mut self) -> bool {
        // Signature parameter types seed their implicit definitions
        let seeds: Vec<(Exp, Type)> = self
            .sig
            .params
            .iter()
            .map(|p| (p.exp.clone(), p.ty.clone()))
            .collect();
        for (exp, ty) in seeds {
            if let Some(def) = self.cfg.find_implicit_assign(&exp) {
                let mut ch = false;
                self.meet_with_for(&ty, Some(def), &exp, &mut ch);
            }
        }

        for iter in 1..=DFA_ITER_LIMIT {
            let mut ch = false;
            for sid in self.cfg.statements() {
                self.analyze_stmt(sid, &mut ch);
            }
            if !ch {
                debug!(
                    "type analysis for {} converged after {iter} iterations",
                    self.proc_name
                );
                return true;
            }
        }
        warn!(
            "type analysis of {} did not reach a fixed point after {DFA_ITER_LIMIT} iterations",
            self.proc_name
        );
        false
    }

    fn analyze_stmt(&mut self, sid: StmtId, ch: &mut bool) {
        let block = self.cfg.stmt(sid).block;
        let kind = std::mem::replace(&mut self.cfg.stmt_mut(sid).kind, StmtKind::Junction);
        let mut probe = Statement::new(block, 0, kind);

        match &mut probe.kind {
            StmtKind::Assign { lhs, ty, rhs } => {
                let tr = self.ascend(rhs);
                // The lhs may hold the more general of the two pointer types
                let new_ty = ty.meet_with(&tr, ch, true);
                *ty = new_ty.clone();
                self.descend(rhs, &new_ty, ch);
                self.analyze_memof_lhs(lhs, ty, ch);
            }
            StmtKind::Phi { lhs, ty, operands } => {
                let mut meet_of_args = Type::Void;
                for op in operands.iter() {
                    let t = self.type_for(op.def, &op.base);
                    let mut ignore = false;
                    meet_of_args = meet_of_args.meet_with(&t, &mut ignore, false);
                }
                *ty = ty.meet_with(&meet_of_args, ch, false);
                let ty_snapshot = ty.clone();
                for op in operands.iter() {
                    let base = op.base.clone();
                    self.meet_with_for(&ty_snapshot, op.def, &base, ch);
                }
                self.analyze_memof_lhs(lhs, ty, ch);
            }
            StmtKind::Implicit { lhs, ty } => {
                self.analyze_memof_lhs(lhs, ty, ch);
            }
            StmtKind::Bool { lhs, ty, cond } => {
                *ty = ty.meet_with(&Type::Boolean, ch, false);
                self.descend(cond, &Type::Boolean, ch);
                self.analyze_memof_lhs(lhs, ty, ch);
            }
            StmtKind::Call(call) => {
                for SimpleAssign { ty, rhs, .. } in &mut call.args {
                    let tr = self.ascend(rhs);
                    let new_ty = ty.meet_with(&tr, ch, true);
                    *ty = new_ty.clone();
                    self.descend(rhs, &new_ty, ch);
                }
                if let crate::ir::CallDest::Computed(dest) = &mut call.dest {
                    let fn_ty = Type::pointer(Type::Void);
                    self.descend(dest, &fn_ty, ch);
                }
            }
            StmtKind::Return(ret) => {
                for SimpleAssign { ty, rhs, .. } in &mut ret.returns {
                    let tr = self.ascend(rhs);
                    let new_ty = ty.meet_with(&tr, ch, true);
                    *ty = new_ty.clone();
                    self.descend(rhs, &new_ty, ch);
                }
            }
            StmtKind::Branch { cond: Some(c), .. } => {
                self.descend(c, &Type::Boolean, ch);
            }
            _ => {}
        }

        // Merge back any type another statement's pass pushed onto our own
        // definitions while the kind was detached (self-referential phis)
        for def in probe.definitions() {
            if let Some(arena_ty) = self.cfg.stmt(sid).type_for(&def) {
                if let Some(local_ty) = probe.type_for(&def) {
                    let mut ignore = false;
                    let merged = local_ty.meet_with(&arena_ty, &mut ignore, false);
                    probe.set_type_for(&def, merged);
                }
            }
        }
        self.cfg.stmt_mut(sid).kind = probe.kind;
    }

    /// The special handling for assignments through memory: the written location's
    /// address must be a pointer to the assigned type (unless it is an ordinary
    /// stack slot, which would only generate noise).
    fn analyze_memof_lhs(&mut self, lhs: &mut Exp, ty: &mut Type, ch: &mut bool) {
        let (is_memof, is_stack_local) = match lhs {
            Exp::MemOf(_) => (true, self.sig.stack_offset(lhs).is_some()),
            _ => (false, false),
        };
        if !is_memof || is_stack_local {
            return;
        }
        let Exp::MemOf(addr) = lhs else {
            return;
        };
        let addr_ty = self.ascend(addr);
        let memof_ty = if addr_ty.resolves_to_pointer() {
            addr_ty.dereference()
        } else {
            Type::Void
        };
        *ty = ty.meet_with(&memof_ty, ch, false);
        let ptr_ty = Type::pointer(ty.clone());
        self.descend(addr, &ptr_ty, ch);
    }

    // ------------------------------------------------------------------
    // Ascend
    // ------------------------------------------------------------------

    /// Computes a bottom-up type for `e` from the types of its subexpressions.
    #[must_use]
    pub fn ascend(&self, e: &Exp) -> Type {
        match e {
            Exp::Const(c) => match c {
                Const::Int(_) | Const::Addr(_) => Type::Void,
                Const::Flt(_) => Type::float(64),
                Const::Str(_) => Type::pointer(Type::Char),
            },
            Exp::Terminal(t) => match t {
                Terminal::Pc | Terminal::Flags => Type::unsigned_int(STD_SIZE),
                Terminal::ZeroFlag | Terminal::CarryFlag | Terminal::True | Terminal::False => {
                    Type::Boolean
                }
                _ => Type::Void,
            },
            Exp::Ref(base, def) => self.type_for(*def, base),
            Exp::MemOf(addr) => {
                let ta = self.ascend(addr);
                if ta.resolves_to_pointer() {
                    ta.dereference()
                } else {
                    Type::Void
                }
            }
            Exp::AddrOf(x) => Type::pointer(self.ascend(x)),
            Exp::Typed(ty, _) => ty.clone(),
            Exp::Binary(op, a, b) => {
                if *op == BinaryOp::FlagCall {
                    return Type::Void;
                }
                let ta = self.ascend(a);
                let tb = self.ascend(b);
                match op {
                    BinaryOp::Add => sigma_sum(&ta, &tb),
                    BinaryOp::Sub => delta_difference(&ta, &tb),
                    BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                        Type::Integer {
                            size: ta.size_bits(),
                            sign: -1,
                        }
                    }
                    BinaryOp::SMul | BinaryOp::SDiv | BinaryOp::SMod | BinaryOp::Sar => {
                        Type::Integer {
                            size: ta.size_bits(),
                            sign: 1,
                        }
                    }
                    BinaryOp::BitAnd
                    | BinaryOp::BitOr
                    | BinaryOp::BitXor
                    | BinaryOp::Shr
                    | BinaryOp::Shl => Type::Integer {
                        size: ta.size_bits(),
                        sign: 0,
                    },
                    op if op.is_comparison() => Type::Boolean,
                    BinaryOp::LogAnd | BinaryOp::LogOr => Type::Boolean,
                    BinaryOp::ArrayIndex => match ta.resolved() {
                        Type::Array { base, .. } => *base,
                        _ => Type::Void,
                    },
                    _ => Type::Void,
                }
            }
            Exp::Ternary(op, ..) => match op {
                // The to-size is the second operand of the conversion ternaries
                TernaryOp::FSize => Type::float(self.const_size(e, 1).unwrap_or(64)),
                TernaryOp::SignExt => {
                    Type::integer_like(self.const_size(e, 1).unwrap_or(STD_SIZE), 1)
                }
                TernaryOp::ZeroExt => {
                    Type::integer_like(self.const_size(e, 1).unwrap_or(STD_SIZE), -1)
                }
                TernaryOp::Cond => Type::Void,
            },
            _ => Type::Void,
        }
    }

    /// Reads the `n`th operand of a ternary as a size constant.
    fn const_size(&self, e: &Exp, n: usize) -> Option<u64> {
        let operand = match n {
            0 => e.sub1()?,
            1 => e.sub2()?,
            _ => e.sub3()?,
        };
        operand.int_value().and_then(|v| u64::try_from(v).ok())
    }

    /// The type statement `def` records for `base`; `Void` when unknown.
    #[must_use]
    pub fn type_for(&self, def: Option<StmtId>, base: &Exp) -> Type {
        def.and_then(|d| self.cfg.stmt(d).type_for(base))
            .unwrap_or(Type::Void)
    }

    /// Meets `ty` into the type statement `def` records for `base`, setting `ch`
    /// when the stored type changed. Returns the met type.
    pub fn meet_with_for(
        &mut self,
        ty: &Type,
        def: Option<StmtId>,
        base: &Exp,
        ch: &mut bool,
    ) -> Type {
        let Some(d) = def else {
            return ty.clone();
        };
        let cur = self.cfg.stmt(d).type_for(base).unwrap_or(Type::Void);
        let mut local_ch = false;
        let new = cur.meet_with(ty, &mut local_ch, false);
        if local_ch {
            *ch = true;
            self.cfg.stmt_mut(d).set_type_for(base, new.clone());
        }
        new
    }

    // ------------------------------------------------------------------
    // Descend
    // ------------------------------------------------------------------

    /// Pushes the knowledge that `e` has type `parent` down the expression tree.
    pub fn descend(&mut self, e: &mut Exp, parent: &Type, ch: &mut bool) {
        match e {
            Exp::Ref(base, def) => {
                let base_snapshot = base.as_ref().clone();
                let new_ty = self.meet_with_for(parent, *def, &base_snapshot, ch);
                // The base may itself be an m[...] worth descending into
                self.descend(base, &new_ty, ch);
            }
            Exp::Const(c) => self.descend_const(c, parent, ch),
            Exp::MemOf(addr) => self.descend_memof(addr, parent, ch),
            Exp::AddrOf(x) => {
                if let Type::Pointer(inner) = &parent.resolved() {
                    self.descend(x, inner, ch);
                }
            }
            Exp::Location(crate::ir::LocationKind::Global(name)) => {
                if let Some(cur) = self.globals.type_of(name).cloned() {
                    let mut local_ch = false;
                    let met = cur.meet_with(parent, &mut local_ch, false);
                    if local_ch {
                        *ch = true;
                        self.globals.set_type(name, met);
                    }
                }
            }
            Exp::Binary(op, a, b) => self.descend_binary(*op, a, b, parent, ch),
            Exp::Ternary(op, a, _b, c) => match op {
                TernaryOp::FSize => {
                    let from = a.int_value().and_then(|v| u64::try_from(v).ok());
                    self.descend(c, &Type::float(from.unwrap_or(64)), ch);
                }
                TernaryOp::SignExt | TernaryOp::ZeroExt => {
                    let from = a
                        .int_value()
                        .and_then(|v| u64::try_from(v).ok())
                        .unwrap_or(STD_SIZE);
                    let sign = if *op == TernaryOp::SignExt { 1 } else { -1 };
                    let from_ty = Type::integer_like(from, sign);
                    self.descend(c, &from_ty, ch);
                }
                TernaryOp::Cond => {}
            },
            _ => {}
        }
    }

    /// Contextual constant rewriting: floats recover their bit pattern, `char *`
    /// constants into readable memory become string literals, and data pointers
    /// register globals.
    fn descend_const(&mut self, c: &mut Const, parent: &Type, ch: &mut bool) {
        let resolved = parent.resolved();
        match (&resolved, &*c) {
            (Type::Float { .. }, Const::Int(v)) => {
                let f = f32::from_bits(*v as u32);
                *c = Const::Flt(f64::from(f));
                *ch = true;
            }
            (Type::Pointer(pointee), Const::Int(_) | Const::Addr(_)) => {
                let Some(addr) = const_addr(c) else {
                    return;
                };
                if pointee.resolves_to_char() {
                    if let Some(s) = self.image.string_at(addr) {
                        *c = Const::Str(s);
                        *ch = true;
                    }
                } else if (pointee.resolves_to_integer()
                    || pointee.resolves_to_float()
                    || pointee.resolves_to_size())
                    && self.image.contains(addr)
                {
                    self.globals.global_used(addr, pointee);
                }
            }
            _ => {}
        }
    }

    fn descend_memof(&mut self, addr: &mut Exp, parent: &Type, ch: &mut bool) {
        // m[idx * K1 + K2]: an array of parent with base address K2
        if let Exp::Binary(BinaryOp::Add, mul, k2) = addr {
            if let (Exp::Binary(BinaryOp::Mul, idx, k1), Some(base_addr)) =
                (&mut **mul, k2.addr_value())
            {
                if let Some(stride) = k1.int_value() {
                    if stride > 0 && (stride as u64) * 8 != parent.size_bits() {
                        debug!(
                            "apparent array reference has stride {} bits but parent type {} has size {}",
                            stride * 8,
                            parent.ctype(),
                            parent.size_bits()
                        );
                    }
                    let idx_ty = Type::Integer {
                        size: parent.size_bits(),
                        sign: 0,
                    };
                    self.descend(idx, &idx_ty, ch);
                    self.globals
                        .global_used(base_addr, &Type::unbounded_array(parent.clone()));
                    return;
                }
            }
        }
        // m[p + K] where p is a typed pointer: a field at offset K of the pointee
        if let Exp::Binary(BinaryOp::Add, p, k) = addr {
            if p.is_subscript() {
                if let Some(offset) = k.int_value() {
                    let p_ty = self.ascend(p);
                    if p_ty.resolves_to_pointer() && offset >= 0 {
                        let mut pointee = p_ty.dereference();
                        if !pointee.resolves_to_compound() {
                            pointee = Type::generic_compound();
                        }
                        let mut local_ch = false;
                        pointee.update_generic_member(
                            (offset as u64) * 8,
                            parent,
                            &mut local_ch,
                        );
                        if local_ch {
                            *ch = true;
                        }
                        if let Some((base, def)) = p.ref_parts() {
                            let base = base.clone();
                            self.meet_with_for(&Type::pointer(pointee), def, &base, ch);
                        }
                        return;
                    }
                }
            }
        }
        // m[K]: a direct global access
        if let Some(gaddr) = addr.addr_value() {
            if self.image.contains(gaddr) {
                self.globals.global_used(gaddr, parent);
                return;
            }
        }
        // Otherwise the address is simply a pointer to the parent type
        let ptr = Type::pointer(parent.clone());
        self.descend(addr, &ptr, ch);
    }

    fn descend_binary(
        &mut self,
        op: BinaryOp,
        a: &mut Exp,
        b: &mut Exp,
        parent: &Type,
        ch: &mut bool,
    ) {
        if op == BinaryOp::FlagCall {
            return;
        }
        let ta = self.ascend(a);
        let tb = self.ascend(b);
        match op {
            BinaryOp::Add => {
                let ta = {
                    let mut ignore = false;
                    ta.meet_with(&sigma_addend(parent, &tb), &mut ignore, false)
                };
                self.descend(a, &ta, ch);
                let tb = {
                    let mut ignore = false;
                    tb.meet_with(&sigma_addend(parent, &ta), &mut ignore, false)
                };
                self.descend(b, &tb, ch);
            }
            BinaryOp::Sub => {
                let ta2 = {
                    let mut ignore = false;
                    ta.meet_with(&delta_minuend(parent, &tb), &mut ignore, false)
                };
                self.descend(a, &ta2, ch);
                let tb2 = {
                    let mut ignore = false;
                    tb.meet_with(&delta_subtrahend(parent, &ta), &mut ignore, false)
                };
                self.descend(b, &tb2, ch);
            }
            op if op.is_unsigned_comparison() => {
                let nt = Type::Integer {
                    size: ta.size_bits(),
                    sign: -1,
                };
                self.descend_both(a, b, &ta, &tb, &nt, ch);
            }
            op if op.is_signed_comparison() => {
                let nt = Type::Integer {
                    size: ta.size_bits(),
                    sign: 1,
                };
                self.descend_both(a, b, &ta, &tb, &nt, ch);
            }
            BinaryOp::BitAnd
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::Shl
            | BinaryOp::Shr
            | BinaryOp::Sar
            | BinaryOp::Mul
            | BinaryOp::SMul
            | BinaryOp::Div
            | BinaryOp::SDiv
            | BinaryOp::Mod
            | BinaryOp::SMod => {
                let signedness = op.operand_signedness();
                let parent_size = parent.size_bits();
                let ta2 = {
                    let mut ignore = false;
                    ta.meet_with(
                        &Type::Integer {
                            size: parent_size,
                            sign: signedness,
                        },
                        &mut ignore,
                        false,
                    )
                };
                self.descend(a, &ta2, ch);
                // Shifts are not symmetric: the amount carries no signedness
                let b_sign = match op {
                    BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Sar => 0,
                    _ => signedness,
                };
                let tb2 = {
                    let mut ignore = false;
                    tb.meet_with(
                        &Type::Integer {
                            size: parent_size,
                            sign: b_sign,
                        },
                        &mut ignore,
                        false,
                    )
                };
                self.descend(b, &tb2, ch);
            }
            _ => {}
        }
    }

    fn descend_both(
        &mut self,
        a: &mut Exp,
        b: &mut Exp,
        ta: &Type,
        tb: &Type,
        nt: &Type,
        ch: &mut bool,
    ) {
        let mut ignore = false;
        let ta = ta.meet_with(nt, &mut ignore, false);
        let tb = tb.meet_with(nt, &mut ignore, false);
        self.descend(a, &ta, ch);
        self.descend(b, &tb, ch);
    }

    // ------------------------------------------------------------------
    // Post-pass
    // ------------------------------------------------------------------

    /// Applies the gathered types: rewrites scaled array references, resolves
    /// direct global writes, and harvests implicit assignments and stack slots
    /// into the frame layout.
    pub fn apply_results(&mut self) {
        for sid in self.cfg.statements() {
            let block = self.cfg.stmt(sid).block;
            let kind = std::mem::replace(&mut self.cfg.stmt_mut(sid).kind, StmtKind::Junction);
            let mut probe = Statement::new(block, 0, kind);

            self.rewrite_scaled_arrays(&mut probe);
            self.rewrite_global_writes(&mut probe);
            self.harvest_implicit(&probe);
            self.harvest_stack_slot(&probe);

            self.cfg.stmt_mut(sid).kind = probe.kind;
        }
    }

    /// `m[idx*K1 + K2]` becomes `name[idx]` over a registered global array.
    fn rewrite_scaled_arrays(&mut self, stmt: &mut Statement) {
        let elem_ty = match &stmt.kind {
            StmtKind::Assign { ty, .. }
            | StmtKind::Phi { ty, .. }
            | StmtKind::Implicit { ty, .. }
            | StmtKind::Bool { ty, .. } => match ty {
                Type::Size { bits } => Type::int(*bits),
                other => other.clone(),
            },
            _ => Type::Void,
        };
        let globals = &mut *self.globals;
        stmt.map_all_exps(&mut |e| {
            rewrite_scaled_in(e, &elem_ty, globals);
        });
    }

    /// `m[K] := x` with `K` in mapped data becomes a named global write.
    fn rewrite_global_writes(&mut self, stmt: &mut Statement) {
        if let StmtKind::Assign { lhs, ty, .. } = &mut stmt.kind {
            if let Exp::MemOf(addr) = lhs {
                if let Some(gaddr) = addr.addr_value() {
                    if self.image.contains(gaddr) {
                        let name = self.globals.global_used(gaddr, ty);
                        *lhs = Exp::global(name);
                    }
                }
            }
        }
    }

    /// Implicit definitions of `m[K]` register globals; implicit definitions of a
    /// signature parameter refine the parameter type (read back by the caller).
    fn harvest_implicit(&mut self, stmt: &Statement) {
        let StmtKind::Implicit { lhs, ty } = &stmt.kind else {
            return;
        };
        if let Exp::MemOf(addr) = lhs {
            if let Some(gaddr) = addr.addr_value() {
                if self.image.contains(gaddr) {
                    self.globals.global_used(gaddr, ty);
                }
            }
        }
    }

    /// A typed write to `m[sp ± K]` adds (or merges) a slot in the frame layout.
    fn harvest_stack_slot(&mut self, stmt: &Statement) {
        let (lhs, ty) = match &stmt.kind {
            StmtKind::Assign { lhs, ty, .. } | StmtKind::Implicit { lhs, ty } => (lhs, ty),
            _ => return,
        };
        let Some(offset) = self.sig.stack_offset(lhs) else {
            return;
        };
        if !ty.is_complete() {
            return;
        }
        let key = offset as u64;
        let name = format!("local{}", self.frame.len());
        // Weaves are reported by the map itself; analysis continues regardless
        let _ = self.frame.add_item(key, &name, ty.clone());
    }
}

fn const_addr(c: &Const) -> Option<u64> {
    match c {
        Const::Addr(a) => Some(*a),
        Const::Int(v) if *v > 0 => Some(*v as u64),
        _ => None,
    }
}

fn rewrite_scaled_in(e: &mut Exp, elem_ty: &Type, globals: &mut GlobalMap) {
    if let Exp::MemOf(addr) = e {
        if let Exp::Binary(BinaryOp::Add, mul, k2) = addr.as_mut() {
            if let (Exp::Binary(BinaryOp::Mul, idx, k1), Some(base_addr)) =
                (&**mul, k2.addr_value())
            {
                if k1.is_int_const() {
                    let name =
                        globals.global_used(base_addr, &Type::unbounded_array(elem_ty.clone()));
                    *e = Exp::binary(BinaryOp::ArrayIndex, Exp::global(name), (**idx).clone());
                    return;
                }
            }
        }
    }
    for c in e.children_mut() {
        rewrite_scaled_in(c, elem_ty, globals);
    }
}

// ----------------------------------------------------------------------
// The sigma/delta tables for addition and subtraction
// ----------------------------------------------------------------------

/// Result type of `a + b` given operand types.
fn sigma_sum(ta: &Type, tb: &Type) -> Type {
    if ta.resolves_to_pointer() {
        if tb.resolves_to_pointer() {
            return ta.create_union(tb, false);
        }
        return Type::pointer(Type::Void);
    }
    if ta.resolves_to_integer() {
        if tb.resolves_to_pointer() {
            return Type::pointer(Type::Void);
        }
        return tb.clone();
    }
    if tb.resolves_to_pointer() {
        return Type::pointer(Type::Void);
    }
    ta.clone()
}

/// Operand type of an addition whose result has type `tc` and whose other operand
/// has type `to`.
fn sigma_addend(tc: &Type, to: &Type) -> Type {
    if tc.resolves_to_pointer() {
        if to.resolves_to_pointer() {
            return Type::int(STD_SIZE);
        }
        if to.resolves_to_integer() {
            return Type::pointer(Type::Void);
        }
        return to.clone();
    }
    if tc.resolves_to_integer() {
        if to.resolves_to_pointer() {
            return tc.create_union(to, false);
        }
        return to.clone();
    }
    if to.resolves_to_pointer() {
        return Type::int(STD_SIZE);
    }
    tc.clone()
}

/// Minuend type of a subtraction whose result has type `tc` and whose subtrahend
/// has type `tb`.
fn delta_minuend(tc: &Type, tb: &Type) -> Type {
    if tc.resolves_to_pointer() {
        if tb.resolves_to_pointer() {
            return tc.create_union(tb, false);
        }
        return Type::pointer(Type::Void);
    }
    if tc.resolves_to_integer() {
        if tb.resolves_to_pointer() {
            return Type::pointer(Type::Void);
        }
        return tc.clone();
    }
    if tb.resolves_to_pointer() {
        return Type::pointer(Type::Void);
    }
    tc.clone()
}

/// Subtrahend type of a subtraction whose result has type `tc` and whose minuend
/// has type `ta`.
fn delta_subtrahend(tc: &Type, ta: &Type) -> Type {
    if tc.resolves_to_pointer() {
        if ta.resolves_to_pointer() {
            return Type::int(STD_SIZE);
        }
        if ta.resolves_to_integer() {
            return tc.create_union(ta, false);
        }
        return Type::int(STD_SIZE);
    }
    if tc.resolves_to_integer() {
        if ta.resolves_to_pointer() {
            return Type::pointer(Type::Void);
        }
        return ta.clone();
    }
    ta.clone()
}

/// Result type of `a - b` given operand types.
fn delta_difference(ta: &Type, tb: &Type) -> Type {
    if ta.resolves_to_pointer() {
        if tb.resolves_to_pointer() {
            return Type::int(STD_SIZE);
        }
        if tb.resolves_to_integer() {
            return Type::pointer(Type::Void);
        }
        return tb.clone();
    }
    if ta.resolves_to_integer() {
        if tb.resolves_to_pointer() {
            return ta.create_union(tb, false);
        }
        return Type::int(STD_SIZE);
    }
    if tb.resolves_to_pointer() {
        return Type::int(STD_SIZE);
    }
    ta.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::BlockKind;

    fn analyzer_fixture(
        cfg: &mut Cfg,
        globals: &mut GlobalMap,
        image: &Image,
        frame: &mut DataIntervalMap,
        sig: &Signature,
    ) -> bool {
        let mut ta = TypeAnalyzer {
            cfg,
            globals,
            image,
            frame,
            sig,
            proc_name: "test",
        };
        let converged = ta.run();
        ta.apply_results();
        converged
    }

    fn rw_image() -> Image {
        let mut img = Image::new();
        img.add_section(".data", 0x8000, vec![0u8; 0x100], true);
        img
    }

    #[test]
    fn test_sigma_sum_tables() {
        let p = Type::pointer(Type::Char);
        let i = Type::int(32);
        assert!(sigma_sum(&p, &i).resolves_to_pointer());
        assert!(sigma_sum(&i, &p).resolves_to_pointer());
        assert!(sigma_sum(&i, &i).resolves_to_integer());
        // pointer + pointer is nonsense: degrades to a union
        assert!(sigma_sum(&p, &p).resolves_to_union());
    }

    #[test]
    fn test_delta_difference_tables() {
        let p = Type::pointer(Type::Char);
        let i = Type::int(32);
        assert!(delta_difference(&p, &p).resolves_to_integer());
        assert!(delta_difference(&p, &i).resolves_to_pointer());
        assert!(delta_difference(&i, &i).resolves_to_integer());
    }

    #[test]
    fn test_assign_meets_rhs_type() {
        // r24 := r25{imp} where the implicit gets seeded as char* via the signature
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Ret);
        cfg.add_stmt(
            b0,
            0x1000,
            StmtKind::Assign {
                lhs: Exp::reg(24),
                ty: Type::Void,
                rhs: Exp::reg(25),
            },
        );
        crate::cfg::ssa::rename_block_vars(&mut cfg, true);

        let mut sig = Signature::new("test", 28);
        sig.params.push(crate::program::Parameter {
            name: "param1".into(),
            exp: Exp::reg(25),
            ty: Type::pointer(Type::Char),
        });
        let mut globals = GlobalMap::new();
        let image = rw_image();
        let mut frame = DataIntervalMap::new();
        assert!(analyzer_fixture(&mut cfg, &mut globals, &image, &mut frame, &sig));

        let sid = cfg.statements()[1];
        let ty = cfg.stmt(sid).type_for(&Exp::reg(24)).unwrap();
        assert!(ty.resolves_to_pointer(), "assign type is {ty}");
    }

    #[test]
    fn test_scaled_array_recovery() {
        // m[idx*4 + 0x8000] := 0 with idx an integer: the global at 0x8000 becomes
        // an array and the reference is rewritten to an index expression
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Ret);
        let lhs = Exp::mem_of(Exp::binary(
            BinaryOp::Add,
            Exp::binary(BinaryOp::Mul, Exp::reg(8), Exp::int(4)),
            Exp::addr(0x8000),
        ));
        let sid = cfg.add_stmt(
            b0,
            0x1000,
            StmtKind::Assign {
                lhs,
                ty: Type::size(32),
                rhs: Exp::int(0),
            },
        );
        crate::cfg::ssa::rename_block_vars(&mut cfg, true);

        let sig = Signature::new("test", 28);
        let mut globals = GlobalMap::new();
        let image = rw_image();
        let mut frame = DataIntervalMap::new();
        analyzer_fixture(&mut cfg, &mut globals, &image, &mut frame, &sig);

        // The global array is registered
        let name = globals.name_at(0x8000).expect("array global registered");
        assert!(globals.type_of(name).unwrap().resolves_to_array());

        // The left-hand side reads as name[idx]
        let lhs = cfg.stmt(sid).lhs().unwrap();
        assert!(
            matches!(lhs, Exp::Binary(BinaryOp::ArrayIndex, ..)),
            "lhs is {lhs}"
        );
    }

    #[test]
    fn test_stack_slot_harvested_into_frame() {
        // m[r28{imp} - 8] := r24 : int32 records a frame slot at offset -8
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Ret);
        let lhs = Exp::mem_of(Exp::binary(BinaryOp::Sub, Exp::reg(28), Exp::int(8)));
        cfg.add_stmt(
            b0,
            0x1000,
            StmtKind::Assign {
                lhs,
                ty: Type::signed_int(32),
                rhs: Exp::reg(24),
            },
        );
        crate::cfg::ssa::rename_block_vars(&mut cfg, true);

        let sig = Signature::new("test", 28);
        let mut globals = GlobalMap::new();
        let image = rw_image();
        let mut frame = DataIntervalMap::new();
        analyzer_fixture(&mut cfg, &mut globals, &image, &mut frame, &sig);

        let key = (-8i64) as u64;
        let (_, entry) = frame.find(key).expect("frame slot recorded");
        assert!(entry.ty.resolves_to_integer());
    }

    #[test]
    fn test_phi_operand_types_meet() {
        // Both definitions of r24 feed a phi; the phi type reflects their meet
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Twoway);
        let b1 = cfg.add_block(0x1010, BlockKind::Fall);
        let b2 = cfg.add_block(0x1020, BlockKind::Fall);
        let b3 = cfg.add_block(0x1030, BlockKind::Ret);
        cfg.add_edge(b0, b1);
        cfg.add_edge(b0, b2);
        cfg.add_edge(b1, b3);
        cfg.add_edge(b2, b3);
        cfg.add_stmt(
            b1,
            0x1010,
            StmtKind::Assign {
                lhs: Exp::reg(24),
                ty: Type::signed_int(32),
                rhs: Exp::int(5),
            },
        );
        cfg.add_stmt(
            b2,
            0x1020,
            StmtKind::Assign {
                lhs: Exp::reg(24),
                ty: Type::int(32),
                rhs: Exp::int(6),
            },
        );
        cfg.add_stmt(
            b3,
            0x1030,
            StmtKind::Assign {
                lhs: Exp::reg(25),
                ty: Type::Void,
                rhs: Exp::reg(24),
            },
        );
        crate::cfg::ssa::place_phi_functions(&mut cfg);
        crate::cfg::ssa::rename_block_vars(&mut cfg, true);

        let sig = Signature::new("test", 28);
        let mut globals = GlobalMap::new();
        let image = rw_image();
        let mut frame = DataIntervalMap::new();
        analyzer_fixture(&mut cfg, &mut globals, &image, &mut frame, &sig);

        let phi_id = cfg.block(b3).stmts[0];
        assert!(cfg.stmt(phi_id).is_phi());
        let ty = cfg.stmt(phi_id).type_for(&Exp::reg(24)).unwrap();
        assert!(ty.resolves_to_integer(), "phi type is {ty}");
    }
}
