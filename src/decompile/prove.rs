//! Preservation proving.
//!
//! `prove` attempts to show that an equation `lhs = rhs` holds at a procedure's
//! exit, by rewriting the left side backward through the definitions of subscripted
//! uses until the two sides coincide (or nothing more can be rewritten). The common
//! query is `sp = sp + K`: stack-pointer preservation is what makes stack-local
//! naming alias-safe.
//!
//! # Calls and recursion
//!
//! A reference defined by a call is bypassed using the callee's proven facts. When
//! the callee belongs to the caller's recursion group and has no proof yet, the
//! equation is *premised*: assumed true, recorded in the callee's premise map so
//! the recursive proof attempt terminates, and discharged afterwards. Only
//! unconditional results are cached in `proven_true` — a failed or premised proof
//! may become provable once the group settles, so negative results are never
//! remembered.
//!
//! # Phis and induction
//!
//! A phi requires proving the equation for every operand. A visited set detects
//! induction through phi cycles: re-reaching a phi with the right side unchanged
//! proves that operand by induction.
//!
//! # Termination
//!
//! Rewriting is bounded by a recursion budget; exceeding it is the
//! `InfeasibleProof` condition and the location is conservatively treated as not
//! preserved.

use log::{error, trace, warn};

use rustc_hash::FxHashMap;

use crate::ir::{simplify, BinaryOp, CallDest, CallStmt, Exp, ProcId, StmtId, StmtKind, Terminal};
use crate::program::Program;

/// Recursion budget for the prover.
const PROVE_DEPTH_LIMIT: u32 = 20;

/// Attempts to prove `query` (an equality) at the exit of `pid`.
///
/// With `conditional` set the result is not cached: it holds only under premises
/// currently in force.
pub fn prove(prog: &Program, pid: ProcId, query: &Exp, conditional: bool) -> bool {
    let Exp::Binary(BinaryOp::Eq, qleft, qright) = query else {
        error!("prove called with a non-equality: {query}");
        return false;
    };
    let orig_left = qleft.as_ref().clone();
    let orig_right = qright.as_ref().clone();

    if prog.proc(pid).proven_true.get(&orig_left) == Some(&orig_right) {
        trace!("found {query} in the proven cache of {}", prog.proc(pid).name());
        return true;
    }

    // The right side is the target entry-value expression; bare locations in a
    // proof context denote values at procedure entry
    let right = simplify(orig_right.clone());

    // The left side starts from the definition reaching the exit
    let mut left = orig_left.clone();
    if !left.is_subscript() {
        let found = {
            let proc = prog.proc(pid);
            proc.return_stmt.and_then(|rs| {
                proc.cfg
                    .stmt(rs)
                    .as_return()
                    .and_then(|r| r.find_def_for(&left))
            })
        };
        match found {
            Some(def) => left = Exp::subscript(left, def),
            None => {
                // Not in the return collector. If no childless call clobbers
                // everything, a location with no definition reaching the exit
                // trivially preserves itself.
                let clobbered = {
                    let proc = prog.proc(pid);
                    proc.return_stmt.is_some_and(|rs| {
                        proc.cfg.stmt(rs).as_return().is_some_and(|r| {
                            r.find_def_for(&Exp::Terminal(Terminal::DefineAll)).is_some()
                        })
                    })
                };
                let trivially = orig_left == simplify(orig_right.clone());
                if trivially && !clobbered {
                    if !conditional {
                        prog.proc_mut(pid)
                            .proven_true
                            .insert(orig_left, orig_right);
                    }
                    return true;
                }
                trace!("{orig_left} not in the return collector; prove returns false");
                return false;
            }
        }
    }

    let in_cycle = prog.proc(pid).cycle_group.is_some();
    if in_cycle {
        // Save the query as a premise so recursive bypasses may assume it
        prog.proc_mut(pid)
            .recur_premises
            .insert(orig_left.clone(), orig_right.clone());
    }

    let mut last_phis = Vec::new();
    let mut cache = FxHashMap::default();
    let query = strip_implicit_refs(Exp::equate(left, right), prog, pid);
    let result = prover(prog, pid, query.clone(), &mut last_phis, &mut cache, None, 0);

    if in_cycle {
        prog.proc_mut(pid).recur_premises.remove(&orig_left);
    }
    trace!(
        "prove returns {result} for {query} in {}",
        prog.proc(pid).name()
    );
    if result && !conditional {
        prog.proc_mut(pid).proven_true.insert(orig_left, orig_right);
    }
    result
}

/// One backward-rewriting engine run. `last_phi` is the phi whose operand is
/// currently being proved; `cache` remembers per-phi successes.
fn prover(
    prog: &Program,
    pid: ProcId,
    query: Exp,
    last_phis: &mut Vec<StmtId>,
    cache: &mut FxHashMap<StmtId, Exp>,
    last_phi: Option<StmtId>,
    depth: u32,
) -> bool {
    if depth > PROVE_DEPTH_LIMIT {
        warn!(
            "preservation proof for {query} exceeded the recursion budget in {}",
            prog.proc(pid).name()
        );
        return false;
    }
    let phi_ind = query.sub2().cloned().unwrap_or(Exp::Terminal(Terminal::False));
    if let Some(lp) = last_phi {
        if cache.get(&lp) == Some(&phi_ind) {
            return true;
        }
    }

    let mut refs_to: Vec<StmtId> = Vec::new();
    let mut called: Vec<(StmtId, Exp)> = Vec::new();
    let mut swapped = false;
    let mut query = query;

    loop {
        trace!("prover: {query}");
        let (mut l, mut r) = match query {
            Exp::Terminal(Terminal::True) => return true,
            Exp::Terminal(Terminal::False) => return false,
            Exp::Const(crate::ir::Const::Int(v)) => return v != 0,
            Exp::Binary(BinaryOp::Eq, a, b) => (*a, *b),
            _ => return false,
        };
        let mut changed = false;

        if l == r {
            return true;
        }

        // Move constants to the right
        if !changed {
            let moved = match &l {
                Exp::Binary(op @ (BinaryOp::Add | BinaryOp::Sub), x, k) if k.is_int_const() => {
                    let inverse = if *op == BinaryOp::Add {
                        BinaryOp::Sub
                    } else {
                        BinaryOp::Add
                    };
                    Some((x.as_ref().clone(), inverse, k.as_ref().clone()))
                }
                _ => None,
            };
            if let Some((new_l, inverse, k)) = moved {
                r = Exp::binary(inverse, r, k);
                l = new_l;
                changed = true;
            }
        }

        // Substitute through the definition of a subscripted left side
        if !changed {
            if let Exp::Ref(base, Some(def)) = &l {
                let base = base.as_ref().clone();
                let def = *def;
                match classify_def(prog, pid, def) {
                    DefKind::Call(call) => {
                        match bypass_call(
                            prog, pid, &call, def, &base, &l, &r, &mut called, last_phis, cache,
                            last_phi, depth,
                        ) {
                            Bypass::Recurse(result) => return result,
                            Bypass::Rewrite(new_l) => {
                                l = new_l;
                                changed = true;
                            }
                            Bypass::Refuted => {
                                l = Exp::Terminal(Terminal::False);
                                changed = true;
                            }
                            Bypass::NoFact => {}
                        }
                    }
                    DefKind::Phi(operand_defs) => {
                        let ok = if last_phis.contains(&def) || last_phi == Some(def) {
                            trace!("phi loop detected, checking induction");
                            r == phi_ind
                        } else {
                            let mut all = true;
                            for op_def in operand_defs {
                                let mut e_l = l.clone();
                                if let Exp::Ref(_, d) = &mut e_l {
                                    *d = op_def;
                                }
                                if let Some(lp) = last_phi {
                                    last_phis.push(lp);
                                }
                                let sub = prover(
                                    prog,
                                    pid,
                                    Exp::equate(e_l, r.clone()),
                                    last_phis,
                                    cache,
                                    Some(def),
                                    depth + 1,
                                );
                                if last_phi.is_some() {
                                    last_phis.pop();
                                }
                                if !sub {
                                    all = false;
                                    break;
                                }
                            }
                            if all {
                                cache.insert(def, r.clone());
                            }
                            all
                        };
                        return ok;
                    }
                    DefKind::AssignRhs(rhs) => {
                        if refs_to.contains(&def) {
                            error!("reference loop through {def} while proving in {}",
                                prog.proc(pid).name());
                            return false;
                        }
                        refs_to.push(def);
                        l = rhs;
                        changed = true;
                    }
                    DefKind::Opaque => {}
                }
            }
        }

        // Strip matching memory dereferences
        if !changed {
            if let (Exp::MemOf(x), Exp::MemOf(y)) = (&l, &r) {
                let (x, y) = (x.as_ref().clone(), y.as_ref().clone());
                l = x;
                r = y;
                changed = true;
            }
        }

        // Last chance: swap the sides once
        if !changed && !swapped {
            std::mem::swap(&mut l, &mut r);
            swapped = true;
            refs_to.clear();
            changed = true;
        }

        query = strip_implicit_refs(simplify(Exp::equate(l, r)), prog, pid);
        if !changed {
            return matches!(query, Exp::Terminal(Terminal::True));
        }
    }
}

/// Rewrites references to implicit (entry) definitions as bare locations: in a
/// proof, a bare location *is* its value at procedure entry.
fn strip_implicit_refs(e: Exp, prog: &Program, pid: ProcId) -> Exp {
    let proc = prog.proc(pid);
    e.map(&mut |n| match n {
        Exp::Ref(base, Some(d)) if proc.cfg.stmt(d).is_implicit() => *base,
        other => other,
    })
}

enum DefKind {
    Call(CallStmt),
    Phi(Vec<Option<StmtId>>),
    AssignRhs(Exp),
    Opaque,
}

fn classify_def(prog: &Program, pid: ProcId, def: StmtId) -> DefKind {
    let proc = prog.proc(pid);
    match &proc.cfg.stmt(def).kind {
        StmtKind::Call(c) => DefKind::Call(c.clone()),
        StmtKind::Phi { operands, .. } => {
            DefKind::Phi(operands.iter().map(|op| op.def).collect())
        }
        StmtKind::Assign { rhs, .. } => DefKind::AssignRhs(rhs.clone()),
        _ => DefKind::Opaque,
    }
}

enum Bypass {
    /// The rewritten query was proved (or refuted) by a recursive prover run.
    Recurse(bool),
    /// The left side was rewritten through the call; continue the main loop.
    Rewrite(Exp),
    /// A call loop was detected; the query is refuted.
    Refuted,
    /// Nothing is known about this call.
    NoFact,
}

#[allow(clippy::too_many_arguments)]
fn bypass_call(
    prog: &Program,
    pid: ProcId,
    call: &CallStmt,
    def: StmtId,
    base: &Exp,
    l: &Exp,
    r: &Exp,
    called: &mut Vec<(StmtId, Exp)>,
    last_phis: &mut Vec<StmtId>,
    cache: &mut FxHashMap<StmtId, Exp>,
    last_phi: Option<StmtId>,
    depth: u32,
) -> Bypass {
    // Conditional preservation logic for callees in our recursion group
    if let CallDest::Proc(callee) = &call.dest {
        let callee = *callee;
        let in_group = prog.proc(callee).does_recurse_to(pid);
        if in_group {
            if let Some(proven_to) = prog.proc(callee).get_proven(base).cloned() {
                let new_l = call.localise(&proven_to);
                return Bypass::Recurse(prover(
                    prog,
                    pid,
                    Exp::equate(new_l, r.clone()),
                    last_phis,
                    cache,
                    last_phi,
                    depth + 1,
                ));
            }
            if let Some(premised) = prog.proc(callee).get_premised(base).cloned() {
                trace!(
                    "conditional preservation for call to {} allows bypassing",
                    prog.proc(callee).name()
                );
                let new_l = call.localise(&premised);
                return Bypass::Recurse(prover(
                    prog,
                    pid,
                    Exp::equate(new_l, r.clone()),
                    last_phis,
                    cache,
                    last_phi,
                    depth + 1,
                ));
            }
            // No proof and no premise yet: make a new premise and try to prove it
            // conditionally in the callee
            trace!(
                "new required premise {base} = {base} for {}",
                prog.proc(callee).name()
            );
            prog.proc_mut(callee).set_premise(base.clone());
            let ok = prove(
                prog,
                callee,
                &Exp::equate(base.clone(), base.clone()),
                true,
            );
            prog.proc_mut(callee).kill_premise(base);
            if ok {
                let new_l = call.localise(base);
                return Bypass::Recurse(prover(
                    prog,
                    pid,
                    Exp::equate(new_l, r.clone()),
                    last_phis,
                    cache,
                    last_phi,
                    depth + 1,
                ));
            }
            trace!("conditional preservation premise failed for {base}");
        }
    }

    // The ordinary case: use what the callee is proven to leave in the location
    let proven = match &call.dest {
        CallDest::Proc(callee) => prog.proc(*callee).get_proven(base).cloned(),
        CallDest::Lib(idx) => prog.lib_sig(*idx).proven_for(base),
        _ => None,
    };
    let Some(right_side) = proven else {
        return Bypass::NoFact;
    };
    let current = Exp::equate(l.clone(), r.clone());
    if called.iter().any(|(d, q)| *d == def && *q == current) {
        warn!("call loop detected while proving {current}");
        return Bypass::Refuted;
    }
    called.push((def, current));
    Bypass::Rewrite(call.localise(&right_side))
}
