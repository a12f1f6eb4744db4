//! The call-graph driver.
//!
//! [`decompile`] performs a depth-first traversal of the call graph, discovering
//! strongly connected components (recursion groups) on the fly. `path` is the
//! ordered list of ancestors on the current DFS stack; finding a callee that is
//! visited-but-unfinished means a cycle, and every procedure from the callee to the
//! end of the path joins the current cycle contribution. Groups are shared sets:
//! every member holds the same reference-counted handle, so late-joining branches
//! of a cycle are visible to all members at once.
//!
//! A procedure with an empty contribution is analyzed on the spot. Otherwise the
//! contribution propagates upward until the DFS returns to the first path element
//! inside the group — at that point every member of the component is known, and
//! [`recursion_group_analysis`] analyzes the whole group together (with the
//! post-pass run exactly twice, preserving the original's literal bound).
//!
//! [`decompile_program`] wraps the traversal, then runs the whole-program
//! redundant-return/parameter removal to its own fixed point, and finally takes
//! every procedure out of SSA form.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use log::{debug, trace, warn};

use crate::decompile::pipeline::{
    early_decompile, find_final_parameters, initialise_decompile, middle_decompile,
    remove_call_liveness, remove_unused_statements, rem_unused_stmt_etc, update_arguments,
};
use crate::decompile::prove;
use crate::decompile::{from_ssa, CycleGroup, ProcStatus};
use crate::ir::{CallDest, Exp, LocationSet, ProcId, StmtId, StmtKind};
use crate::program::{Frontend, Program};
use crate::Result;

/// Decompiles every procedure of the program, removes redundant returns and
/// parameters program-wide, and transforms each procedure out of SSA form.
///
/// # Errors
///
/// Propagates decoder failures from the [`Frontend`].
pub fn decompile_program(prog: &Program, frontend: &dyn Frontend) -> Result<()> {
    let mut path = Vec::new();
    for pid in prog.proc_ids() {
        if prog.proc(pid).status() < ProcStatus::Final {
            decompile(prog, frontend, pid, &mut path)?;
            debug_assert!(path.is_empty(), "driver left a non-empty path");
        }
    }

    remove_unused_returns(prog);

    for pid in prog.proc_ids() {
        finalise(prog, pid);
    }
    Ok(())
}

/// Depth-first decompilation of one procedure. Returns the set of procedures this
/// subtree contributes to an enclosing recursion cycle (empty when none).
///
/// # Errors
///
/// Propagates decoder failures from the [`Frontend`].
pub fn decompile(
    prog: &Program,
    frontend: &dyn Frontend,
    pid: ProcId,
    path: &mut Vec<ProcId>,
) -> Result<BTreeSet<ProcId>> {
    trace!(
        "{}considering {}",
        if prog.proc(pid).status() >= ProcStatus::Visited {
            "re"
        } else {
            ""
        },
        prog.proc(pid).name()
    );

    if prog.proc(pid).status() >= ProcStatus::Final {
        warn!("{} already has status Final", prog.proc(pid).name());
        return Ok(BTreeSet::new());
    }
    if prog.proc(pid).status() < ProcStatus::Decoded {
        frontend.decode(prog, pid)?;
        prog.proc_mut(pid).set_status(ProcStatus::Decoded);
    }
    if prog.proc(pid).status() < ProcStatus::Visited {
        prog.proc_mut(pid).set_status(ProcStatus::Visited);
    }

    let mut child: BTreeSet<ProcId> = BTreeSet::new();
    path.push(pid);

    // Recurse to children first: depth-first search over the outgoing calls
    for (sid, callee) in resolved_calls(prog, pid) {
        register_call(prog, pid, sid, callee);
        let callee_status = prog.proc(callee).status();

        if callee_status == ProcStatus::Final {
            // Already decompiled; the call links to the callee's return statement
            // via update_call_defines at the next pipeline step
            continue;
        }

        if callee_status >= ProcStatus::Visited && callee_status <= ProcStatus::EarlyDone {
            // A cycle. Either it is brand new (the callee is on our path), or we
            // found a new branch of an existing cycle.
            if let Some(pos) = path.iter().position(|&p| p == callee) {
                child.extend(path[pos..].iter().copied());
            } else {
                let group_members: BTreeSet<ProcId> = prog
                    .proc(callee)
                    .cycle_group
                    .as_ref()
                    .map(|g| g.borrow().clone())
                    .unwrap_or_default();
                child.extend(group_members.iter().copied());
                // Splice in everything after the first path element already in
                // the callee's group
                if let Some(fpos) = path.iter().position(|p| group_members.contains(p)) {
                    child.extend(path[fpos + 1..].iter().copied());
                }
            }
            unite_cycle_groups(prog, &mut child);
            prog.proc_mut(pid).set_status(ProcStatus::InCycle);
        } else {
            // No new cycle: plain recursion
            let tmp = decompile(prog, frontend, callee, path)?;
            if !tmp.is_empty() {
                child.extend(tmp);
                unite_cycle_groups(prog, &mut child);
                prog.proc_mut(pid).set_status(ProcStatus::InCycle);
            }
        }
    }

    if child.is_empty() {
        debug!("decompiling {}", prog.proc(pid).name());
        initialise_decompile(prog, pid);
        early_decompile(prog, pid);
        child = middle_decompile(prog, frontend, pid, path)?;
        if !child.is_empty() {
            // A switch restart discovered cycles; treat them like call cycles
            unite_cycle_groups(prog, &mut child);
        }
    }

    if child.is_empty() {
        rem_unused_stmt_etc(prog, pid);
        prog.proc_mut(pid).set_status(ProcStatus::Final);
        debug!("end decompile of {}", prog.proc(pid).name());
    } else {
        // This procedure is involved in recursion. Have we collected the whole
        // strongly connected component? We have exactly when the first path
        // element inside our group is this procedure.
        let group = prog.proc(pid).cycle_group.as_ref().map(Rc::clone);
        let entry_of_cycle = group.as_ref().is_some_and(|g| {
            path.iter().find(|p| g.borrow().contains(*p)).copied() == Some(pid)
        });
        if entry_of_cycle {
            recursion_group_analysis(prog, frontend, pid, path)?;
            prog.proc_mut(pid).set_status(ProcStatus::Final);
            child = BTreeSet::new();
        }
    }

    path.pop();
    Ok(child)
}

/// Every member of `child` joins one shared cycle group, unioning in any group a
/// member already belonged to. The handle is pointer-identical across members.
fn unite_cycle_groups(prog: &Program, child: &mut BTreeSet<ProcId>) {
    let mut all = child.clone();
    for &c in child.iter() {
        if let Some(g) = prog.proc(c).cycle_group.as_ref() {
            all.extend(g.borrow().iter().copied());
        }
    }
    *child = all.clone();
    let group: CycleGroup = Rc::new(RefCell::new(all.clone()));
    for &c in &all {
        prog.proc_mut(c).cycle_group = Some(Rc::clone(&group));
    }
}

/// Analyzes a complete recursion group as a unit.
///
/// The members are first initialised and early-decompiled with their calls treated
/// as childless; middle decompilation then runs with conditional preservation; the
/// calls inside the group are marked non-childless so arguments flow; and the
/// post-pass (unused-statement removal, parameters, call updates) runs exactly
/// twice over the whole group.
pub fn recursion_group_analysis(
    prog: &Program,
    frontend: &dyn Frontend,
    pid: ProcId,
    path: &mut Vec<ProcId>,
) -> Result<()> {
    let members: Vec<ProcId> = prog
        .proc(pid)
        .cycle_group
        .as_ref()
        .map(|g| g.borrow().iter().copied().collect())
        .unwrap_or_else(|| vec![pid]);
    debug!(
        "recursion group analysis for {:?}",
        members
            .iter()
            .map(|&m| prog.proc(m).name().to_string())
            .collect::<Vec<_>>()
    );

    // Initial and early decompile with calls treated as childless
    for &m in &members {
        prog.proc_mut(m).set_status(ProcStatus::InCycle);
        initialise_decompile(prog, m);
        early_decompile(prog, m);
    }

    // The standard preservation analysis performs conditional preservation
    for &m in &members {
        middle_decompile(prog, frontend, m, path)?;
        prog.proc_mut(m).set_status(ProcStatus::Preserveds);
    }

    // Mark the in-group calls as non-childless so arguments flow
    for &m in &members {
        mark_group_calls_non_childless(prog, m, &members);
    }

    // Propagate into the initial arguments before removing unused statements
    for &m in &members {
        update_arguments(prog, m);
        let mut proc = prog.proc_mut(m);
        crate::dataflow::propagate_statements(&mut proc.cfg, 0);
    }

    // The post-pass bound is literal: twice, not "until no change"
    for _ in 0..2 {
        for &m in &members {
            rem_unused_stmt_etc(prog, m);
        }
    }

    for &m in &members {
        prog.proc_mut(m).set_status(ProcStatus::Final);
    }
    debug!("end recursion group analysis");
    Ok(())
}

fn mark_group_calls_non_childless(prog: &Program, pid: ProcId, members: &[ProcId]) {
    let calls = resolved_calls(prog, pid);
    let mut proc = prog.proc_mut(pid);
    for (sid, callee) in calls {
        if members.contains(&callee) {
            if let Some(call) = proc.cfg.stmt_mut(sid).as_call_mut() {
                call.childless = false;
            }
        }
    }
}

/// The calls of `pid` with user-procedure destinations, resolving fixed addresses
/// as a side effect.
fn resolved_calls(prog: &Program, pid: ProcId) -> Vec<(StmtId, ProcId)> {
    let call_ids: Vec<StmtId> = {
        let proc = prog.proc(pid);
        proc.cfg
            .statements()
            .into_iter()
            .filter(|&s| proc.cfg.stmt(s).is_call())
            .collect()
    };
    let mut out = Vec::new();
    for sid in call_ids {
        let dest = {
            let proc = prog.proc(pid);
            proc.cfg.stmt(sid).as_call().expect("call id").dest.clone()
        };
        match dest {
            CallDest::Proc(p) => out.push((sid, p)),
            CallDest::Fixed(addr) => {
                if let Some(p) = prog.find_proc_by_addr(addr) {
                    if let Some(call) = prog.proc_mut(pid).cfg.stmt_mut(sid).as_call_mut() {
                        call.dest = CallDest::Proc(p);
                    }
                    out.push((sid, p));
                }
            }
            _ => {}
        }
    }
    out
}

fn register_call(prog: &Program, pid: ProcId, sid: StmtId, callee: ProcId) {
    prog.proc_mut(callee).callers.insert((pid, sid));
    let mut proc = prog.proc_mut(pid);
    if !proc.callees.contains(&callee) {
        proc.callees.push(callee);
    }
}

// ----------------------------------------------------------------------
// Whole-program redundant return and parameter removal
// ----------------------------------------------------------------------

/// Removes returns no caller uses and parameters with no gainful use, iterating
/// the affected procedures until no change (each removal can expose another in a
/// caller or callee).
pub fn remove_unused_returns(prog: &Program) {
    let mut worklist: BTreeSet<ProcId> = prog.proc_ids().collect();
    let mut budget = prog.proc_count().saturating_mul(16).max(64);
    while let Some(&pid) = worklist.iter().next() {
        worklist.remove(&pid);
        remove_redundant_returns(prog, pid, &mut worklist);
        if budget == 0 {
            warn!("redundant-return removal did not settle; proceeding");
            break;
        }
        budget -= 1;
    }
}

/// Removes the returns of `pid` not live at any caller, then the parameters with
/// no gainful use. Affected callers and callees are scheduled on `worklist`.
pub fn remove_redundant_returns(
    prog: &Program,
    pid: ProcId,
    worklist: &mut BTreeSet<ProcId>,
) -> bool {
    let mut removed_params = remove_redundant_parameters(prog, pid);
    let Some(rs) = prog.proc(pid).return_stmt else {
        return removed_params;
    };
    debug!("removing unused returns for {}", prog.proc(pid).name());

    // The program's entry procedure keeps its returns; everything else keeps only
    // what is live at some caller. A procedure with no callers at all therefore
    // loses every return, which is what lets removal cascade through call chains.
    if prog.proc(pid).name() == "main" || prog.proc(pid).signature.forced {
        return removed_params;
    }
    let callers: Vec<(ProcId, StmtId)> = prog.proc(pid).callers.iter().copied().collect();
    let mut removed_rets = false;
    let mut live = LocationSet::new();
    for (caller, call_sid) in &callers {
        let caller_proc = prog.proc(*caller);
        if let Some(call) = caller_proc.cfg.stmt(*call_sid).as_call() {
            live.extend(call.use_collector.iter().cloned());
        }
    }
    let to_remove: Vec<Exp> = {
        let proc = prog.proc(pid);
        proc.cfg
            .stmt(rs)
            .as_return()
            .map(|r| {
                r.returns
                    .iter()
                    .filter(|a| !live.contains(&a.lhs))
                    .map(|a| a.lhs.clone())
                    .collect()
            })
            .unwrap_or_default()
    };
    for lhs in to_remove {
        debug!("removing unused return {lhs} from {}", prog.proc(pid).name());
        let mut proc = prog.proc_mut(pid);
        if let Some(ret) = proc.cfg.stmt_mut(rs).as_return_mut() {
            ret.remove_return(&lhs);
            ret.modifieds.retain(|(b, _)| b != &lhs);
        }
        removed_rets = true;
    }

    // Removing returns can strand parameters
    removed_params |= remove_redundant_parameters(prog, pid);

    if removed_params || removed_rets {
        // Callers must refresh their arguments and be re-examined
        for (caller, _) in &callers {
            update_arguments(prog, *caller);
            worklist.insert(*caller);
        }
        update_for_use_change(prog, pid, worklist);
    }
    removed_rets || removed_params
}

/// Redoes the dataflow of `pid` after a return or argument change, removing newly
/// unused statements; schedules further procedures whose use sets changed.
fn update_for_use_change(prog: &Program, pid: ProcId, worklist: &mut BTreeSet<ProcId>) {
    debug!("updating {} for changes to uses", prog.proc(pid).name());
    let old_params = prog.proc(pid).parameters.len();
    let old_liveness: Vec<(StmtId, LocationSet)> = call_liveness(prog, pid);

    {
        let mut proc = prog.proc_mut(pid);
        remove_call_liveness(&mut proc);
        crate::cfg::ssa::rename_block_vars(&mut proc.cfg, true);
        remove_unused_statements(&mut proc);
    }
    find_final_parameters(prog, pid);
    remove_redundant_parameters(prog, pid);

    if prog.proc(pid).parameters.len() != old_params {
        let callers: Vec<ProcId> = prog.proc(pid).callers.iter().map(|(c, _)| *c).collect();
        for caller in callers {
            update_arguments(prog, caller);
            worklist.insert(caller);
        }
    }
    // A call whose liveness shrank can make its callee's returns redundant
    for (sid, new_live) in call_liveness(prog, pid) {
        let changed = old_liveness
            .iter()
            .find(|(old_sid, _)| *old_sid == sid)
            .map_or(true, |(_, old)| old != &new_live);
        if changed {
            let dest = prog.proc(pid).cfg.stmt(sid).as_call().map(|c| c.dest.clone());
            if let Some(CallDest::Proc(callee)) = dest {
                worklist.insert(callee);
            }
        }
    }
}

fn call_liveness(prog: &Program, pid: ProcId) -> Vec<(StmtId, LocationSet)> {
    let proc = prog.proc(pid);
    proc.cfg
        .statements()
        .into_iter()
        .filter_map(|s| {
            proc.cfg
                .stmt(s)
                .as_call()
                .map(|c| (s, c.use_collector.clone()))
        })
        .collect()
}

/// Drops parameters with no gainful use. A use is *gainful* unless it only feeds a
/// recursive call back into this procedure, a recursive return, or a phi that
/// transmits one.
pub fn remove_redundant_parameters(prog: &Program, pid: ProcId) -> bool {
    if prog.proc(pid).signature.forced {
        return false;
    }
    let params: Vec<Exp> = prog
        .proc(pid)
        .parameters
        .iter()
        .map(|p| p.exp.clone())
        .collect();
    let mut removed = false;
    for param in params {
        let mut bare = param.clone();
        bare.strip_refs();
        let mut visited = BTreeSet::new();
        if check_for_gainful_use(prog, pid, &bare, &mut visited) {
            continue;
        }
        debug!(
            "removing redundant parameter {param} in {}",
            prog.proc(pid).name()
        );
        let mut proc = prog.proc_mut(pid);
        proc.remove_parameter(&param);
        // Kill the symbol so a local can be created later, and the implicit
        // assignment so the parameter cannot come back
        proc.symbol_map.remove(&param);
        proc.cfg.remove_implicit_assign(&param);
        drop(proc);
        removed = true;
        // Callers drop the corresponding argument
        let callers: Vec<ProcId> = prog.proc(pid).callers.iter().map(|(c, _)| *c).collect();
        for caller in callers {
            update_arguments(prog, caller);
        }
    }
    removed
}

/// Searches for a gainful use of `bparam{0}` in `pid`. Uses that merely feed the
/// recursion (arguments of recursive calls, recursive returns, phis that transmit
/// them) do not count.
fn check_for_gainful_use(
    prog: &Program,
    pid: ProcId,
    bparam: &Exp,
    visited: &mut BTreeSet<ProcId>,
) -> bool {
    visited.insert(pid);
    let proc = prog.proc(pid);
    let implicit = proc.cfg.find_implicit_assign(bparam);
    let param_ref = Exp::subscript(bparam.clone(), implicit);

    for sid in proc.cfg.statements() {
        let stmt = proc.cfg.stmt(sid);
        match &stmt.kind {
            StmtKind::Call(call) => {
                if let CallDest::Proc(callee) = call.dest {
                    let recursive = callee == pid || prog.proc(callee).does_recurse_to(pid);
                    if recursive {
                        // An argument of the form lloc := f(bparam{0}) is gainful
                        // only if the callee uses lloc gainfully
                        for arg in &call.args {
                            if arg.rhs.used_locs().contains(&param_ref) {
                                let mut lloc = arg.lhs.clone();
                                lloc.strip_refs();
                                if !visited.contains(&callee)
                                    && check_for_gainful_use(prog, callee, &lloc, visited)
                                {
                                    return true;
                                }
                            }
                        }
                        continue;
                    }
                }
            }
            StmtKind::Return(_) => {
                if proc.cycle_group.is_some() {
                    // Recursive returns do not make a parameter gainful
                    continue;
                }
            }
            StmtKind::Phi { lhs, .. } => {
                if proc.cycle_group.is_some() && proc.return_stmt.is_some() {
                    // A phi defining a component of a recursive return is ignored
                    let phi_ref = Exp::subscript(lhs.clone(), Some(sid));
                    let in_return = proc.return_stmt.is_some_and(|rs| {
                        proc.cfg.stmt(rs).as_return().is_some_and(|r| {
                            r.returns
                                .iter()
                                .any(|a| a.rhs.used_locs().contains(&phi_ref))
                        })
                    });
                    if in_return {
                        continue;
                    }
                }
            }
            _ => {}
        }
        let mut uses = LocationSet::new();
        stmt.add_used_locs(&mut uses, false);
        if uses.contains(&param_ref) {
            return true;
        }
    }
    false
}

// ----------------------------------------------------------------------
// Final transform
// ----------------------------------------------------------------------

/// Takes a finished procedure out of SSA form and freezes its statement list for
/// emission.
pub fn finalise(prog: &Program, pid: ProcId) {
    if prog.proc(pid).status() != ProcStatus::Final {
        return;
    }
    {
        let mut proc = prog.proc_mut(pid);
        from_ssa(&mut proc);
        final_simplify(&mut proc);
    }
    prog.proc_mut(pid).set_status(ProcStatus::CodeGenerated);
}

/// Final cosmetic simplification of every statement.
fn final_simplify(proc: &mut crate::decompile::Procedure) {
    for sid in proc.cfg.statements() {
        let block = proc.cfg.stmt(sid).block;
        let kind = std::mem::replace(&mut proc.cfg.stmt_mut(sid).kind, StmtKind::Junction);
        let mut probe = crate::ir::Statement::new(block, 0, kind);
        probe.map_uses(&mut |e| {
            let cur = std::mem::replace(e, Exp::Terminal(crate::ir::Terminal::Wild));
            *e = crate::ir::simplify(cur);
        });
        proc.cfg.stmt_mut(sid).kind = probe.kind;
    }
}

/// Forwards to [`prove::prove`]: kept here so driver-level callers need one import.
pub fn prove_preservation(prog: &Program, pid: ProcId, query: &Exp) -> bool {
    prove::prove(prog, pid, query, false)
}
