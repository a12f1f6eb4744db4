//! Expression propagation.
//!
//! Propagation replaces a use `x{def}` with the right-hand side of `def` when `def`
//! is a simple assignment, shrinking the statement list toward source-level
//! expressions. Four sub-passes run per invocation:
//!
//! 1. **Destination counts** - how many statements use each definition; a
//!    non-trivial right-hand side is only propagated to a unique use, otherwise the
//!    duplication would manufacture extra locals later.
//! 2. **Dominating-phi uses** - references that appear as phi operands must not be
//!    propagated past, or the phi would lose the value identity it merges.
//! 3. **Flag propagation** - condition-code assignments propagate unconditionally;
//!    branch conditions are meaningless without them, even at the cost of locals.
//! 4. **Guarded substitution** - everything else, with the guards above, followed
//!    by simplification and collector refresh.
//!
//! A use defined by a *call* is never propagated here; replacing it is the bypass
//! logic's job, which needs the callee's preservation facts.
//!
//! When propagation turns a computed call destination into a constant the `convert`
//! flag is raised; the pipeline rewrites the call to a direct one and restarts its
//! dataflow, because previously-blocked propagations may now succeed.

use rustc_hash::FxHashMap;

use crate::cfg::Cfg;
use crate::ir::{simplify, CallDest, Exp, LocationSet, StmtId, StmtKind, Terminal};

/// Outcome of one propagation invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagateResult {
    /// Whether any statement changed.
    pub changed: bool,
    /// Whether a computed call destination resolved to a constant.
    pub convert: bool,
}

/// Runs the four propagation sub-passes over every statement.
pub fn propagate_statements(cfg: &mut Cfg, pass: u32) -> PropagateResult {
    log::trace!("propagating statements, pass {pass}");
    let mut result = PropagateResult::default();

    // Sub-pass 1: count how many statements use each definition
    let mut dest_counts: FxHashMap<Exp, usize> = FxHashMap::default();
    for sid in cfg.statements() {
        for u in cfg.stmt(sid).used_locs() {
            if u.is_subscript() {
                *dest_counts.entry(u).or_insert(0) += 1;
            }
        }
    }

    // Sub-pass 2: references kept live by a phi
    let mut used_by_dom_phi = LocationSet::new();
    for sid in cfg.statements() {
        if let StmtKind::Phi { operands, .. } = &cfg.stmt(sid).kind {
            for op in operands {
                used_by_dom_phi.insert(Exp::subscript(op.base.clone(), op.def));
            }
        }
    }

    // Sub-pass 3: flags, unconditionally
    for sid in cfg.statements() {
        if cfg.stmt(sid).is_phi() {
            continue;
        }
        result.changed |= propagate_into_stmt(cfg, sid, &dest_counts, &used_by_dom_phi, true);
    }

    // Sub-pass 4: the rest, guarded
    for sid in cfg.statements() {
        if cfg.stmt(sid).is_phi() {
            continue;
        }
        result.changed |= propagate_into_stmt(cfg, sid, &dest_counts, &used_by_dom_phi, false);
        if let StmtKind::Call(call) = &cfg.stmt(sid).kind {
            if let CallDest::Computed(dest) = &call.dest {
                let mut bare = dest.clone();
                bare.strip_refs();
                if simplify(bare).addr_value().is_some() {
                    result.convert = true;
                }
            }
        }
    }

    propagate_to_collectors(cfg);
    result
}

/// Substitutes eligible definitions into one statement, then simplifies it.
/// Repeats until the statement stops changing (a substitution can expose another).
fn propagate_into_stmt(
    cfg: &mut Cfg,
    sid: StmtId,
    dest_counts: &FxHashMap<Exp, usize>,
    used_by_dom_phi: &LocationSet,
    flags_only: bool,
) -> bool {
    let mut changed = false;
    for _ in 0..10 {
        let mut kind = std::mem::replace(&mut cfg.stmt_mut(sid).kind, StmtKind::Junction);
        let mut round_changed = false;
        {
            let cfg_ref: &Cfg = cfg;
            let mut probe = crate::ir::Statement::new(cfg_ref.stmt(sid).block, 0, kind);
            probe.map_uses(&mut |e| {
                substitute(
                    e,
                    cfg_ref,
                    sid,
                    dest_counts,
                    used_by_dom_phi,
                    flags_only,
                    &mut round_changed,
                );
            });
            if round_changed {
                probe.map_uses(&mut |e| {
                    let cur = std::mem::replace(e, Exp::Terminal(Terminal::Wild));
                    *e = simplify(cur);
                });
            }
            kind = probe.kind;
        }
        cfg.stmt_mut(sid).kind = kind;
        if !round_changed {
            break;
        }
        changed = true;
    }
    changed
}

fn substitute(
    e: &mut Exp,
    cfg: &Cfg,
    current: StmtId,
    dest_counts: &FxHashMap<Exp, usize>,
    used_by_dom_phi: &LocationSet,
    flags_only: bool,
    changed: &mut bool,
) {
    if let Exp::Ref(base, Some(def)) = e {
        let def = *def;
        // Rewrite inside a memory base first; the outer reference may then become
        // eligible with its final address form
        if let Exp::MemOf(addr) = base.as_mut() {
            substitute(
                addr,
                cfg,
                current,
                dest_counts,
                used_by_dom_phi,
                flags_only,
                changed,
            );
        }
        if def == current {
            return;
        }
        let is_flag_base = matches!(base.as_ref(), Exp::Terminal(t) if t.is_flag());
        if flags_only && !is_flag_base {
            return;
        }
        let def_stmt = cfg.stmt(def);
        let StmtKind::Assign { lhs, rhs, .. } = &def_stmt.kind else {
            return;
        };
        if lhs != base.as_ref() {
            return;
        }
        if !flags_only {
            if used_by_dom_phi.contains(e) {
                return;
            }
            let unique = dest_counts.get(e).copied().unwrap_or(0) <= 1;
            if !unique && !is_trivial(rhs) {
                return;
            }
        }
        *e = rhs.clone();
        *changed = true;
        return;
    }
    for c in e.children_mut() {
        substitute(
            c,
            cfg,
            current,
            dest_counts,
            used_by_dom_phi,
            flags_only,
            changed,
        );
    }
}

/// A right-hand side cheap enough to duplicate at every use.
fn is_trivial(e: &Exp) -> bool {
    match e {
        Exp::Const(_) | Exp::Terminal(_) | Exp::Reg(_) | Exp::Location(_) => true,
        Exp::Ref(base, _) => is_trivial(base),
        Exp::AddrOf(inner) => is_trivial(inner),
        Exp::MemOf(_) => false,
        _ => false,
    }
}

/// Refreshes the addresses held in call/return collectors with trivial
/// substitutions, so stack-argument locations localise to their final form.
fn propagate_to_collectors(cfg: &mut Cfg) {
    let stmts = cfg.statements();
    for sid in stmts {
        let mut kind = std::mem::replace(&mut cfg.stmt_mut(sid).kind, StmtKind::Junction);
        {
            let cfg_ref: &Cfg = cfg;
            let refresh = |e: &mut Exp| {
                let mut changed = false;
                collector_substitute(e, cfg_ref, &mut changed);
                if changed {
                    let cur = std::mem::replace(e, Exp::Terminal(Terminal::Wild));
                    *e = simplify(cur);
                }
            };
            match &mut kind {
                StmtKind::Call(call) => {
                    for (base, _) in &mut call.def_collector {
                        refresh(base);
                    }
                    let updated: LocationSet = call
                        .use_collector
                        .iter()
                        .cloned()
                        .map(|mut u| {
                            refresh(&mut u);
                            u
                        })
                        .collect();
                    call.use_collector = updated;
                }
                StmtKind::Return(ret) => {
                    for (base, _) in &mut ret.def_collector {
                        refresh(base);
                    }
                }
                _ => {}
            }
        }
        cfg.stmt_mut(sid).kind = kind;
    }
}

/// Collector-side substitution: only trivially-copyable definitions, only inside
/// memory addresses (the outer location identity must not change class).
fn collector_substitute(e: &mut Exp, cfg: &Cfg, changed: &mut bool) {
    if let Exp::MemOf(addr) = e {
        inner_substitute(addr, cfg, changed);
        return;
    }
    if let Exp::Ref(base, _) = e {
        if let Exp::MemOf(addr) = base.as_mut() {
            inner_substitute(addr, cfg, changed);
        }
    }
}

fn inner_substitute(e: &mut Exp, cfg: &Cfg, changed: &mut bool) {
    if let Exp::Ref(base, Some(def)) = e {
        if let StmtKind::Assign { lhs, rhs, .. } = &cfg.stmt(*def).kind {
            if lhs == base.as_ref() && is_trivial(rhs) {
                *e = rhs.clone();
                *changed = true;
                return;
            }
        }
    }
    for c in e.children_mut() {
        inner_substitute(c, cfg, changed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::BlockKind;
    use crate::ir::{BinaryOp, CallStmt, PhiOperand};
    use crate::types::Type;

    fn assign(lhs: Exp, rhs: Exp) -> StmtKind {
        StmtKind::Assign {
            lhs,
            ty: Type::Void,
            rhs,
        }
    }

    #[test]
    fn test_simple_chain_propagates() {
        // r24 := r28{imp} + 4 ; r25 := r24{s0}  =>  r25 := r28{imp} + 4
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Ret);
        let s0 = cfg.add_stmt(
            b0,
            0x1000,
            assign(
                Exp::reg(24),
                Exp::binary(BinaryOp::Add, Exp::reg(28), Exp::int(4)),
            ),
        );
        let s1 = cfg.add_stmt(b0, 0x1004, assign(Exp::reg(25), Exp::reg(24)));
        crate::cfg::ssa::rename_block_vars(&mut cfg, true);

        let r = propagate_statements(&mut cfg, 1);
        assert!(r.changed);
        let imp = cfg.find_implicit_assign(&Exp::reg(28)).unwrap();
        assert_eq!(
            cfg.stmt(s1).rhs(),
            Some(&Exp::binary(
                BinaryOp::Add,
                Exp::subscript(Exp::reg(28), Some(imp)),
                Exp::int(4)
            ))
        );
        let _ = s0;
    }

    #[test]
    fn test_propagation_folds_preservation_pattern() {
        // sp := sp - 4 ; sp := sp + 4 propagates and simplifies to sp := sp{imp}
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Ret);
        let _s0 = cfg.add_stmt(
            b0,
            0x1000,
            assign(
                Exp::reg(28),
                Exp::binary(BinaryOp::Sub, Exp::reg(28), Exp::int(4)),
            ),
        );
        let s1 = cfg.add_stmt(
            b0,
            0x1004,
            assign(
                Exp::reg(28),
                Exp::binary(BinaryOp::Add, Exp::reg(28), Exp::int(4)),
            ),
        );
        crate::cfg::ssa::rename_block_vars(&mut cfg, true);
        propagate_statements(&mut cfg, 1);

        let imp = cfg.find_implicit_assign(&Exp::reg(28)).unwrap();
        assert_eq!(
            cfg.stmt(s1).rhs(),
            Some(&Exp::subscript(Exp::reg(28), Some(imp)))
        );
    }

    #[test]
    fn test_non_trivial_rhs_with_multiple_uses_blocked() {
        // r24 := m[r28{imp}] used twice: the memory load must not be duplicated
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Ret);
        let s0 = cfg.add_stmt(
            b0,
            0x1000,
            assign(Exp::reg(24), Exp::mem_of(Exp::reg(28))),
        );
        let s1 = cfg.add_stmt(b0, 0x1004, assign(Exp::reg(25), Exp::reg(24)));
        let s2 = cfg.add_stmt(b0, 0x1008, assign(Exp::reg(26), Exp::reg(24)));
        crate::cfg::ssa::rename_block_vars(&mut cfg, true);
        propagate_statements(&mut cfg, 1);

        assert_eq!(cfg.stmt(s1).rhs(), Some(&Exp::subscript(Exp::reg(24), Some(s0))));
        assert_eq!(cfg.stmt(s2).rhs(), Some(&Exp::subscript(Exp::reg(24), Some(s0))));
    }

    #[test]
    fn test_phi_operand_blocks_propagation() {
        // A definition used by a phi operand stays put
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Twoway);
        let b1 = cfg.add_block(0x1010, BlockKind::Fall);
        let b2 = cfg.add_block(0x1020, BlockKind::Ret);
        cfg.add_edge(b0, b1);
        cfg.add_edge(b0, b2);
        cfg.add_edge(b1, b2);
        let s0 = cfg.add_stmt(
            b0,
            0x1000,
            assign(
                Exp::reg(24),
                Exp::binary(BinaryOp::Add, Exp::reg(28), Exp::int(8)),
            ),
        );
        let _s1 = cfg.add_stmt(b1, 0x1010, assign(Exp::reg(24), Exp::int(1)));
        let phi = cfg.insert_stmt_front(
            b2,
            StmtKind::Phi {
                lhs: Exp::reg(24),
                ty: Type::Void,
                operands: vec![
                    PhiOperand {
                        pred: b0,
                        base: Exp::reg(24),
                        def: None,
                    },
                    PhiOperand {
                        pred: b1,
                        base: Exp::reg(24),
                        def: None,
                    },
                ],
            },
        );
        let s2 = cfg.add_stmt(b2, 0x1020, assign(Exp::reg(25), Exp::reg(24)));
        crate::cfg::ssa::rename_block_vars(&mut cfg, true);
        propagate_statements(&mut cfg, 1);

        // The phi operand reference s0 was not propagated into the phi, and the
        // use of the phi result was not replaced either
        if let StmtKind::Phi { operands, .. } = &cfg.stmt(phi).kind {
            assert!(operands.iter().any(|op| op.def == Some(s0)));
        } else {
            panic!("expected phi");
        }
        assert_eq!(
            cfg.stmt(s2).rhs(),
            Some(&Exp::subscript(Exp::reg(24), Some(phi)))
        );
    }

    #[test]
    fn test_flag_assignments_propagate_unconditionally() {
        // %flags := flagcall(...) feeds two branches; both get the condition
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Twoway);
        let flags = Exp::Terminal(Terminal::Flags);
        let cond_rhs = Exp::binary(
            BinaryOp::FlagCall,
            Exp::mem_of(Exp::reg(24)),
            Exp::mem_of(Exp::reg(25)),
        );
        let _s0 = cfg.add_stmt(b0, 0x1000, assign(flags.clone(), cond_rhs.clone()));
        let s1 = cfg.add_stmt(b0, 0x1004, assign(Exp::reg(26), flags.clone()));
        let s2 = cfg.add_stmt(b0, 0x1008, assign(Exp::reg(27), flags.clone()));
        crate::cfg::ssa::rename_block_vars(&mut cfg, true);
        propagate_statements(&mut cfg, 1);

        // Despite the non-trivial rhs and two uses, the flags were substituted
        for sid in [s1, s2] {
            let rhs = cfg.stmt(sid).rhs().unwrap();
            assert!(
                matches!(rhs, Exp::Binary(BinaryOp::FlagCall, ..)),
                "rhs is {rhs}"
            );
        }
    }

    #[test]
    fn test_convert_raised_for_resolved_indirect_call() {
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Call);
        let s0 = cfg.add_stmt(b0, 0x1000, assign(Exp::reg(24), Exp::addr(0x4000)));
        let call = CallStmt::new(CallDest::Computed(Exp::reg(24)));
        let _c = cfg.add_stmt(b0, 0x1004, StmtKind::Call(call));
        crate::cfg::ssa::rename_block_vars(&mut cfg, true);

        let r = propagate_statements(&mut cfg, 1);
        assert!(r.convert);
        let _ = s0;
    }
}
