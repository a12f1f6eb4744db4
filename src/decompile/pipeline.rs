//! The per-procedure decompilation pipeline.
//!
//! Four stages, driven to fixed points:
//!
//! 1. [`initialise_decompile`] - statement numbering and bookkeeping.
//! 2. [`early_decompile`] - call-define updates, read-only constant inlining, first
//!    phi placement, renaming and propagation (mostly to settle the stack pointer).
//! 3. [`middle_decompile`] - preservation analysis, call bypassing, argument
//!    discovery, and the bounded outer loop (passes 3 through 12) of
//!    place/rename/propagate; finishes by unlocking memory-location renaming. If an
//!    indirect jump is resolved mid-flight, everything so far is invalid: the graph
//!    is cleared, the procedure re-decoded, and the driver re-entered.
//! 4. [`rem_unused_stmt_etc`] - type analysis, unused-statement removal, final
//!    parameter discovery, call updates and branch tidying.
//!
//! Every function here takes the program and a procedure id and borrows
//! procedures only for the step at hand: preservation proving and argument updates
//! read other procedures mid-flight, so no borrow may be held across those calls.

use std::collections::BTreeSet;

use log::{debug, trace};

use rustc_hash::FxHashMap;

use crate::cfg::ssa::{place_phi_functions, rename_block_vars};
use crate::dataflow::{propagate_statements, TypeAnalyzer};
use crate::decompile::prove::prove;
use crate::decompile::{driver, Procedure, ProcStatus};
use crate::ir::{
    simplify, BinaryOp, CallDest, Exp, LocationKind, ProcId, SimpleAssign, StmtId, StmtKind,
    Terminal, UnaryOp,
};
use crate::program::{Frontend, Program};
use crate::types::Type;
use crate::Result;

/// First and last pass numbers of the middle-decompile outer loop.
const MIDDLE_FIRST_PASS: u32 = 3;
const MIDDLE_LAST_PASS: u32 = 12;

/// Stage 1: sort, number, and prepare the statements.
pub fn initialise_decompile(prog: &Program, pid: ProcId) {
    let mut proc = prog.proc_mut(pid);
    debug!("initialise decompile for {}", proc.name());
    proc.number_statements();
}

/// Stage 2: first placement of phi functions, renaming and propagation.
pub fn early_decompile(prog: &Program, pid: ProcId) {
    if prog.proc(pid).status() >= ProcStatus::EarlyDone {
        return;
    }
    debug!("early decompile for {}", prog.proc(pid).name());

    update_call_defines(prog, pid);
    replace_simple_global_constants(prog, pid);

    {
        let mut proc = prog.proc_mut(pid);
        place_phi_functions(&mut proc.cfg);
        proc.number_statements();
        rename_block_vars(&mut proc.cfg, true);
    }
    {
        let mut proc = prog.proc_mut(pid);
        propagate_statements(&mut proc.cfg, 1);
    }
}

/// Stage 3: everything from preservation up to (but not including) removing unused
/// statements. Returns the cycle contribution of a switch-recovery restart (empty
/// in the common case).
pub fn middle_decompile(
    prog: &Program,
    frontend: &dyn Frontend,
    pid: ProcId,
    path: &mut Vec<ProcId>,
) -> Result<BTreeSet<ProcId>> {
    debug!("middle decompile for {}", prog.proc(pid).name());

    // Bypass children already finalised, and settle the stack pointer
    fix_call_and_phi_refs(prog, pid);
    if prog.proc(pid).status() != ProcStatus::InCycle {
        let mut proc = prog.proc_mut(pid);
        propagate_statements(&mut proc.cfg, 2);
    }

    find_sp_preservation(prog, pid);
    find_preserveds(prog, pid);
    fix_call_and_phi_refs(prog, pid);

    // Create the initial arguments so stack parameters localise correctly
    {
        let mut proc = prog.proc_mut(pid);
        let change = place_phi_functions(&mut proc.cfg);
        if change {
            proc.number_statements();
        }
        rename_block_vars(&mut proc.cfg, false);
        propagate_statements(&mut proc.cfg, 2);
    }
    update_arguments(prog, pid);

    // The bounded outer fixed point
    for pass in MIDDLE_FIRST_PASS..=MIDDLE_LAST_PASS {
        trace!("middle pass {pass} for {}", prog.proc(pid).name());
        let mut change = {
            let mut proc = prog.proc_mut(pid);
            let placed = place_phi_functions(&mut proc.cfg);
            if placed {
                proc.number_statements();
            }
            placed | rename_block_vars(&mut proc.cfg, false)
        };

        // Seed the return statement with the definitions reaching the exit
        update_returns(prog, pid);

        // Update-returns loop (literal bound of three)
        for _ in 0..3 {
            if prog.proc(pid).status() != ProcStatus::InCycle {
                let mut proc = prog.proc_mut(pid);
                rename_block_vars(&mut proc.cfg, true);
            }
            find_preserveds(prog, pid);
            update_call_defines(prog, pid);
            fix_call_and_phi_refs(prog, pid);
            find_preserveds(prog, pid);
            update_returns(prog, pid);
        }

        // Propagate; a convert means an indirect call became direct and dataflow
        // restarts at level zero once
        loop {
            let result = {
                let mut proc = prog.proc_mut(pid);
                propagate_statements(&mut proc.cfg, pass)
            };
            change |= result.changed;
            change |= {
                let mut proc = prog.proc_mut(pid);
                rename_block_vars(&mut proc.cfg, true)
            };
            if !result.convert {
                break;
            }
            debug!(
                "restarting dataflow for {} after indirect call conversion",
                prog.proc(pid).name()
            );
            convert_indirect_calls(prog, pid);
            update_call_defines(prog, pid);
            let mut proc = prog.proc_mut(pid);
            proc.cfg.set_rename_memofs(false);
            rename_block_vars(&mut proc.cfg, true);
        }

        // Cosmetic only: these preserve semantics solely because uses are absent
        remove_sp_assigns_if_possible(prog, pid);
        remove_matching_assigns_if_possible(prog, pid, &Exp::Terminal(Terminal::Pc));
        remove_temp_assigns_if_possible(prog, pid);

        if !change {
            break;
        }
    }

    // Memory locations may now bind: their address expressions are final
    debug!("allowing SSA renaming of memory locations for {}", prog.proc(pid).name());
    {
        let mut proc = prog.proc_mut(pid);
        proc.cfg.set_rename_memofs(true);
        let change = place_phi_functions(&mut proc.cfg);
        if change {
            proc.number_statements();
        }
        rename_block_vars(&mut proc.cfg, false);
        propagate_statements(&mut proc.cfg, MIDDLE_LAST_PASS + 1);
    }
    fix_call_and_phi_refs(prog, pid);

    // A computed jump resolved to a table invalidates everything done so far
    if frontend.decode_indirect(prog, pid) {
        debug!(
            "restarting decompilation of {}: indirect jumps were analysed",
            prog.proc(pid).name()
        );
        {
            let mut proc = prog.proc_mut(pid);
            proc.return_stmt = None;
            proc.cfg.clear();
            proc.set_status(ProcStatus::Visited);
        }
        frontend.decode(prog, pid)?;
        prog.proc_mut(pid).set_status(ProcStatus::Decoded);
        // Re-enter the driver for this procedure with the current path
        path.pop();
        let ret = driver::decompile(prog, frontend, pid, path)?;
        path.push(pid);
        return Ok(ret);
    }

    find_preserveds(prog, pid);
    eliminate_duplicate_args(prog, pid);
    prog.proc_mut(pid).set_status(ProcStatus::EarlyDone);
    Ok(BTreeSet::new())
}

/// Stage 4: type analysis, unused-statement removal, final parameters, call
/// updates and branch tidying.
pub fn rem_unused_stmt_etc(prog: &Program, pid: ProcId) {
    debug!("remove unused statements for {}", prog.proc(pid).name());

    if prog.proc(pid).status() < ProcStatus::Final {
        type_analysis(prog, pid);
        // Locals are identified now; redo the dataflow
        let mut proc = prog.proc_mut(pid);
        let change = place_phi_functions(&mut proc.cfg);
        if change {
            proc.number_statements();
        }
        rename_block_vars(&mut proc.cfg, true);
        propagate_statements(&mut proc.cfg, 20);
    }

    {
        let mut proc = prog.proc_mut(pid);
        remove_unused_statements(&mut proc);
        remove_null_statements(&mut proc);
    }

    find_final_parameters(prog, pid);
    update_call_defines(prog, pid);
    update_arguments(prog, pid);

    {
        let mut proc = prog.proc_mut(pid);
        branch_analysis(&mut proc);
        fix_ugly_branches(&mut proc);
        // Recalculate the livenesses the removals invalidated
        remove_call_liveness(&mut proc);
        rename_block_vars(&mut proc.cfg, true);
    }
}

// ----------------------------------------------------------------------
// Call maintenance
// ----------------------------------------------------------------------

/// Refreshes the defines of every call from what is known about its callee.
/// A call stays childless while its callee is unfinished; once marked
/// non-childless (recursion-group analysis) it never reverts.
pub fn update_call_defines(prog: &Program, pid: ProcId) {
    let call_ids: Vec<StmtId> = call_statements(prog, pid);
    for sid in call_ids {
        let dest = {
            let proc = prog.proc(pid);
            proc.cfg.stmt(sid).as_call().expect("call id").dest.clone()
        };
        // Late-bind fixed destinations
        let dest = match dest {
            CallDest::Fixed(addr) => match prog.find_proc_by_addr(addr) {
                Some(p) => CallDest::Proc(p),
                None => CallDest::Fixed(addr),
            },
            other => other,
        };
        let was_childless = {
            let proc = prog.proc(pid);
            proc.cfg.stmt(sid).as_call().expect("call id").childless
        };
        let (childless, defines) = match &dest {
            CallDest::Lib(idx) => (false, prog.lib_sig(*idx).returns.clone()),
            CallDest::Proc(callee) => {
                let callee_proc = prog.proc(*callee);
                let finished = callee_proc.status() >= ProcStatus::Final;
                let childless = was_childless && !finished;
                if childless {
                    (true, Vec::new())
                } else {
                    let mods = callee_proc.return_stmt.and_then(|rs| {
                        callee_proc
                            .cfg
                            .stmt(rs)
                            .as_return()
                            .map(|r| r.modifieds.clone())
                    });
                    (false, mods.unwrap_or_default())
                }
            }
            _ => (true, Vec::new()),
        };
        let mut proc = prog.proc_mut(pid);
        if let Some(call) = proc.cfg.stmt_mut(sid).as_call_mut() {
            call.dest = dest;
            call.childless = childless;
            call.defines = defines;
        }
    }
}

/// Rebuilds each call's arguments from its callee's parameters, localised to the
/// definitions reaching the call.
pub fn update_arguments(prog: &Program, pid: ProcId) {
    let call_ids: Vec<StmtId> = call_statements(prog, pid);
    for sid in call_ids {
        let (dest, childless) = {
            let proc = prog.proc(pid);
            let call = proc.cfg.stmt(sid).as_call().expect("call id");
            (call.dest.clone(), call.childless)
        };
        if childless {
            continue;
        }
        let params: Vec<(Exp, Type)> = match &dest {
            CallDest::Lib(idx) => prog
                .lib_sig(*idx)
                .params
                .iter()
                .map(|p| (p.exp.clone(), p.ty.clone()))
                .collect(),
            CallDest::Proc(callee) => prog
                .proc(*callee)
                .parameters
                .iter()
                .map(|p| (p.exp.clone(), p.ty.clone()))
                .collect(),
            _ => continue,
        };
        let mut proc = prog.proc_mut(pid);
        let call = proc.cfg.stmt_mut(sid).as_call_mut().expect("call id");
        let args: Vec<SimpleAssign> = params
            .into_iter()
            .map(|(exp, ty)| {
                let mut bare = exp.clone();
                bare.strip_refs();
                SimpleAssign {
                    rhs: simplify(call.localise(&bare)),
                    lhs: bare,
                    ty,
                }
            })
            .collect();
        call.args = args;
        call.eliminate_duplicate_args();
    }
}

fn eliminate_duplicate_args(prog: &Program, pid: ProcId) {
    let mut proc = prog.proc_mut(pid);
    for sid in proc.cfg.statements() {
        if let Some(call) = proc.cfg.stmt_mut(sid).as_call_mut() {
            call.eliminate_duplicate_args();
        }
    }
}

/// Clears the use collectors of every call, prior to a liveness recomputation.
pub fn remove_call_liveness(proc: &mut Procedure) {
    for sid in proc.cfg.statements() {
        if let Some(call) = proc.cfg.stmt_mut(sid).as_call_mut() {
            call.use_collector.clear();
        }
    }
}

fn call_statements(prog: &Program, pid: ProcId) -> Vec<StmtId> {
    let proc = prog.proc(pid);
    proc.cfg
        .statements()
        .into_iter()
        .filter(|&s| proc.cfg.stmt(s).is_call())
        .collect()
}

/// Rewrites computed calls whose destination has resolved to a known procedure.
pub fn convert_indirect_calls(prog: &Program, pid: ProcId) -> bool {
    let mut converted = false;
    for sid in call_statements(prog, pid) {
        let target = {
            let proc = prog.proc(pid);
            let call = proc.cfg.stmt(sid).as_call().expect("call id");
            let CallDest::Computed(dest) = &call.dest else {
                continue;
            };
            let mut bare = dest.clone();
            bare.strip_refs();
            simplify(bare).addr_value()
        };
        let Some(addr) = target else { continue };
        let new_dest = prog
            .find_proc_by_addr(addr)
            .map_or(CallDest::Fixed(addr), CallDest::Proc);
        debug!(
            "converted indirect call at {sid} in {} to {addr:#x}",
            prog.proc(pid).name()
        );
        if let Some(call) = prog.proc_mut(pid).cfg.stmt_mut(sid).as_call_mut() {
            call.dest = new_dest;
        }
        converted = true;
    }
    converted
}

// ----------------------------------------------------------------------
// Returns and preservation
// ----------------------------------------------------------------------

/// Rebuilds the return statement's modifieds and returns from the definitions
/// reaching the exit. A location whose reaching definition is its implicit
/// assignment was never modified; filtered locations (condition codes, the program
/// counter, temporaries, the stack pointer, proven preserveds) never surface.
pub fn update_returns(prog: &Program, pid: ProcId) {
    let Some(rs) = prog.proc(pid).return_stmt else {
        return;
    };
    let collector = {
        let proc = prog.proc(pid);
        proc.cfg
            .stmt(rs)
            .as_return()
            .map(|r| r.def_collector.clone())
            .unwrap_or_default()
    };
    let mut mods: Vec<(Exp, Type, Option<StmtId>)> = Vec::new();
    {
        let proc = prog.proc(pid);
        for (base, def) in &collector {
            if *base == Exp::Terminal(Terminal::DefineAll) {
                continue;
            }
            let Some(d) = def else { continue };
            if proc.cfg.stmt(*d).is_implicit() {
                continue;
            }
            if proc.filter_returns(base) {
                continue;
            }
            let ty = proc.cfg.stmt(*d).type_for(base).unwrap_or(Type::Void);
            mods.push((base.clone(), ty, *def));
        }
    }
    let mut proc = prog.proc_mut(pid);
    if let Some(ret) = proc.cfg.stmt_mut(rs).as_return_mut() {
        ret.modifieds = mods.iter().map(|(b, t, _)| (b.clone(), t.clone())).collect();
        ret.returns = mods
            .into_iter()
            .map(|(base, ty, def)| SimpleAssign {
                rhs: Exp::subscript(base.clone(), def),
                lhs: base,
                ty,
            })
            .collect();
    }
}

/// Stack-pointer preservation: try `sp = sp + 4k` for small `k` so stack locals can
/// be named alias-conservatively.
pub fn find_sp_preservation(prog: &Program, pid: ProcId) {
    let sp = Exp::reg(prog.proc(pid).signature.stack_register);
    for k in 0..8 {
        let rhs = if k == 0 {
            sp.clone()
        } else {
            Exp::binary(BinaryOp::Add, sp.clone(), Exp::int(k * 4))
        };
        trace!("attempting to prove sp = sp + {} for {}", k * 4, prog.proc(pid).name());
        if prove(prog, pid, &Exp::equate(sp.clone(), rhs), false) {
            break;
        }
    }
}

/// Proves preservation for every location in the return statement's modifieds and
/// removes the proven ones.
pub fn find_preserveds(prog: &Program, pid: ProcId) {
    let Some(rs) = prog.proc(pid).return_stmt else {
        trace!("no return statement, cannot find preservations");
        return;
    };
    let mods: Vec<Exp> = {
        let proc = prog.proc(pid);
        proc.cfg
            .stmt(rs)
            .as_return()
            .map(|r| r.modifieds.iter().map(|(b, _)| b.clone()).collect())
            .unwrap_or_default()
    };
    for lhs in mods {
        trace!("attempting to prove {lhs} preserved by {}", prog.proc(pid).name());
        prove(prog, pid, &Exp::equate(lhs.clone(), lhs), false);
    }
    // Remove the preserved locations from the modifieds and returns. Only plain
    // identities count here; `sp = sp + 4` is bypass knowledge, not preservation.
    let proven: Vec<Exp> = prog
        .proc(pid)
        .proven_true
        .iter()
        .filter(|(l, r)| l == r)
        .map(|(l, _)| l.clone())
        .collect();
    let mut proc = prog.proc_mut(pid);
    if let Some(ret) = proc.cfg.stmt_mut(rs).as_return_mut() {
        for lhs in proven {
            ret.remove_modified(&lhs);
        }
    }
}

/// Bypasses references to finalised callees: a use defined by a call is replaced
/// with what the callee is proven to leave in the location, localised to the call
/// site.
pub fn fix_call_and_phi_refs(prog: &Program, pid: ProcId) {
    let stmts: Vec<StmtId> = prog.proc(pid).cfg.statements();
    for sid in stmts {
        if prog.proc(pid).cfg.stmt(sid).is_phi() {
            continue;
        }
        let block = prog.proc(pid).cfg.stmt(sid).block;
        let mut kind = {
            let mut proc = prog.proc_mut(pid);
            std::mem::replace(&mut proc.cfg.stmt_mut(sid).kind, StmtKind::Junction)
        };
        {
            let proc = prog.proc(pid);
            let mut probe = crate::ir::Statement::new(block, 0, kind);
            probe.map_uses(&mut |e| {
                let mut changed = false;
                bypass_refs(e, prog, &proc, &mut changed);
                if changed {
                    let cur = std::mem::replace(e, Exp::Terminal(Terminal::Wild));
                    *e = simplify(cur);
                }
            });
            kind = probe.kind;
        }
        prog.proc_mut(pid).cfg.stmt_mut(sid).kind = kind;
    }
}

fn bypass_refs(e: &mut Exp, prog: &Program, proc: &Procedure, changed: &mut bool) {
    if let Exp::Ref(base, Some(def)) = e {
        if let Some(call) = proc.cfg.stmt(*def).as_call() {
            let proven = match &call.dest {
                CallDest::Proc(callee) => prog.proc(*callee).get_proven(base).cloned(),
                CallDest::Lib(idx) => prog.lib_sig(*idx).proven_for(base),
                _ => None,
            };
            if let Some(rhs) = proven {
                *e = call.localise(&rhs);
                *changed = true;
                return;
            }
        }
        if let Exp::MemOf(addr) = base.as_mut() {
            bypass_refs(addr, prog, proc, changed);
        }
        return;
    }
    for c in e.children_mut() {
        bypass_refs(c, prog, proc, changed);
    }
}

// ----------------------------------------------------------------------
// Cosmetic assignment removal
// ----------------------------------------------------------------------

/// Removes every assignment to the stack pointer when no use of it (other than the
/// entry value) survives anywhere.
pub fn remove_sp_assigns_if_possible(prog: &Program, pid: ProcId) {
    let sp = Exp::reg(prog.proc(pid).signature.stack_register);
    remove_matching_assigns_if_possible(prog, pid, &sp);
}

/// Removes every assignment to lifter temporaries with no surviving uses.
fn remove_temp_assigns_if_possible(prog: &Program, pid: ProcId) {
    let temps: BTreeSet<Exp> = {
        let proc = prog.proc(pid);
        proc.cfg
            .statements()
            .into_iter()
            .filter_map(|s| match proc.cfg.stmt(s).lhs() {
                Some(e @ Exp::Location(LocationKind::Temp(_))) => Some(e.clone()),
                _ => None,
            })
            .collect()
    };
    for t in temps {
        remove_matching_assigns_if_possible(prog, pid, &t);
    }
}

/// Removes all assignments to `target` when the only uses of `target` anywhere are
/// its entry value (references to the implicit assignment).
pub fn remove_matching_assigns_if_possible(prog: &Program, pid: ProcId, target: &Exp) {
    let removable: Option<Vec<StmtId>> = {
        let proc = prog.proc(pid);
        let mut found_assign = false;
        let mut ids = Vec::new();
        for sid in proc.cfg.statements() {
            let stmt = proc.cfg.stmt(sid);
            if stmt.is_assignment() && !stmt.is_implicit() && stmt.lhs() == Some(target) {
                found_assign = true;
                ids.push(sid);
            }
            let mut uses = crate::ir::LocationSet::new();
            stmt.add_used_locs(&mut uses, false);
            for u in uses {
                if let Some((base, Some(def))) = u.ref_parts() {
                    if base == target && !proc.cfg.stmt(def).is_implicit() {
                        // A live use of a real definition: removal would change
                        // behaviour
                        return;
                    }
                }
            }
        }
        found_assign.then_some(ids)
    };
    let Some(ids) = removable else { return };
    debug!(
        "removing {} assignments to {target} in {}",
        ids.len(),
        prog.proc(pid).name()
    );
    let mut proc = prog.proc_mut(pid);
    for sid in ids {
        let _ = proc.cfg.remove_stmt(sid);
    }
}

// ----------------------------------------------------------------------
// Constants from the image
// ----------------------------------------------------------------------

/// Inlines loads from read-only memory: `x := m[K]` with `K` in a read-only
/// section becomes `x := <word at K>`.
pub fn replace_simple_global_constants(prog: &Program, pid: ProcId) {
    let mut proc = prog.proc_mut(pid);
    for sid in proc.cfg.statements() {
        let StmtKind::Assign { rhs, .. } = &mut proc.cfg.stmt_mut(sid).kind else {
            continue;
        };
        let Exp::MemOf(addr) = &*rhs else { continue };
        let Some(k) = addr.addr_value() else { continue };
        if !prog.image.is_read_only(k) {
            continue;
        }
        if let Some(word) = prog.image.read_u32(k) {
            trace!("inlining read-only constant m[{k:#x}] = {word:#x}");
            *rhs = Exp::int(i64::from(word));
        }
    }
}

// ----------------------------------------------------------------------
// Parameters
// ----------------------------------------------------------------------

/// Discovers the final parameters from the implicit assignments at entry: registers
/// (other than the stack pointer) and stack locations matching `m[sp ± K]`.
pub fn find_final_parameters(prog: &Program, pid: ProcId) {
    let mut proc = prog.proc_mut(pid);
    debug!("finding final parameters for {}", proc.name());
    proc.parameters.clear();

    if proc.signature.forced {
        // The signature is authoritative: copy it
        let params: Vec<(Exp, Type)> = proc
            .signature
            .params
            .iter()
            .map(|p| (p.exp.clone(), p.ty.clone()))
            .collect();
        for (exp, ty) in params {
            proc.cfg.implicit_assign(&exp);
            proc.insert_parameter(exp, ty);
        }
        return;
    }

    let candidates: Vec<(Exp, StmtId)> = proc
        .cfg
        .implicit_assigns()
        .map(|(e, s)| (e.clone(), s))
        .collect();
    proc.col.clear();
    for (e, sid) in candidates {
        proc.col.insert(e.clone());
        if proc.signature.find_param(&e).is_some() {
            continue;
        }
        let is_reg = matches!(e, Exp::Reg(r) if r != proc.signature.stack_register);
        let is_stack = proc.signature.is_stack_local_pattern(&e)
            && proc.signature.stack_offset(&e).unwrap_or(-1) >= 0;
        if !(is_reg || is_stack) || proc.filter_params(&e) {
            continue;
        }
        // A parameter must actually be used: an implicit with no remaining
        // references is left for redundancy elimination anyway, but skipping it
        // here avoids churn
        let used = proc.cfg.statements().into_iter().any(|s| {
            let mut uses = crate::ir::LocationSet::new();
            proc.cfg.stmt(s).add_used_locs(&mut uses, true);
            uses.iter().any(
                |u| matches!(u.ref_parts(), Some((base, Some(d))) if base == &e && d == sid),
            )
        });
        if !used {
            continue;
        }
        let ty = proc.cfg.stmt(sid).type_for(&e).unwrap_or(Type::Void);
        debug!("found new parameter {e} for {}", proc.name());
        proc.signature.add_parameter(e.clone(), ty.clone());
        proc.insert_parameter(e, ty);
    }
}

// ----------------------------------------------------------------------
// Unused statement removal
// ----------------------------------------------------------------------

/// Removes assignments nothing uses, iterating because removing one statement can
/// strand the definitions it used. Writes to globals, to memory that cannot be
/// renamed, and to structure members are always kept.
pub fn remove_unused_statements(proc: &mut Procedure) {
    let mut counts: FxHashMap<StmtId, usize> = FxHashMap::default();
    for sid in proc.cfg.statements() {
        for def in stmt_def_uses(proc, sid) {
            *counts.entry(def).or_insert(0) += 1;
        }
    }

    loop {
        let mut change = false;
        for sid in proc.cfg.statements() {
            let stmt = proc.cfg.stmt(sid);
            if !stmt.is_assignment() {
                continue;
            }
            let Some(lhs) = stmt.lhs() else { continue };
            // Assignments to globals must always be kept
            if matches!(lhs, Exp::Location(LocationKind::Global(_))) {
                continue;
            }
            // Writes through unrenameable memory are observable
            if matches!(lhs, Exp::MemOf(_)) && !crate::ir::can_rename(lhs, proc.cfg.rename_memofs())
            {
                continue;
            }
            // Member and array writes: conservatively keep
            if matches!(
                lhs,
                Exp::Binary(BinaryOp::MemberAccess, ..) | Exp::Binary(BinaryOp::ArrayIndex, ..)
            ) {
                continue;
            }
            if counts.get(&sid).copied().unwrap_or(0) != 0 {
                continue;
            }
            // Unused: release the references it held, then remove it
            for def in stmt_def_uses(proc, sid) {
                if let Some(c) = counts.get_mut(&def) {
                    *c = c.saturating_sub(1);
                }
            }
            trace!("removing unused statement {}", proc.cfg.stmt(sid));
            let _ = proc.cfg.remove_stmt(sid);
            change = true;
        }
        if !change {
            break;
        }
    }
}

/// The set of definitions one statement uses (each counted once per statement).
fn stmt_def_uses(proc: &Procedure, sid: StmtId) -> BTreeSet<StmtId> {
    let mut uses = crate::ir::LocationSet::new();
    proc.cfg.stmt(sid).add_used_locs(&mut uses, false);
    uses.iter()
        .filter_map(|u| u.ref_parts().and_then(|(_, d)| d))
        .collect()
}

/// Removes `x := x` statements left behind by propagation.
pub fn remove_null_statements(proc: &mut Procedure) {
    let nulls: Vec<StmtId> = proc
        .cfg
        .statements()
        .into_iter()
        .filter(|&sid| {
            let stmt = proc.cfg.stmt(sid);
            match (&stmt.kind, stmt.lhs(), stmt.rhs()) {
                (StmtKind::Assign { .. }, Some(lhs), Some(rhs)) => {
                    let mut bare = rhs.clone();
                    bare.strip_refs();
                    &bare == lhs
                }
                _ => false,
            }
        })
        .collect();
    for sid in nulls {
        trace!("removing null statement {}", proc.cfg.stmt(sid));
        let _ = proc.cfg.remove_stmt(sid);
    }
}

// ----------------------------------------------------------------------
// Branch tidying
// ----------------------------------------------------------------------

/// Merges cascaded conditional branches into short-circuit conditions:
///
/// ```text
/// branch A if c1          branch B if !c1 && c2   (fall-through middle)
/// branch B if c2    =>    branch B if c1 || c2    (shared target)
/// A: ...
/// ```
pub fn branch_analysis(proc: &mut Procedure) {
    loop {
        let mut merged = false;
        for b in proc.cfg.block_ids().collect::<Vec<_>>() {
            let (taken, fall) = {
                let blk = proc.cfg.block(b);
                if blk.out_edges.len() != 2 {
                    continue;
                }
                (blk.out_edges[0], blk.out_edges[1])
            };
            let Some(branch_id) = proc.cfg.block(b).last_stmt() else {
                continue;
            };
            if !proc.cfg.stmt(branch_id).is_branch() {
                continue;
            }
            // The fall-through block must hold exactly one statement (a branch)
            // and have no other predecessors
            let fall_blk = proc.cfg.block(fall);
            if fall_blk.stmts.len() != 1
                || fall_blk.in_edges.len() != 1
                || fall_blk.out_edges.len() != 2
            {
                continue;
            }
            let inner_id = fall_blk.stmts[0];
            if !proc.cfg.stmt(inner_id).is_branch() {
                continue;
            }
            let (inner_taken, inner_fall) = (fall_blk.out_edges[0], fall_blk.out_edges[1]);

            let (c1, _) = branch_parts(proc, branch_id);
            let (c2, inner_dest) = branch_parts(proc, inner_id);
            let (Some(c1), Some(c2)) = (c1, c2) else {
                continue;
            };

            if inner_fall == taken {
                // branch A if c1; branch B if c2; A: ...
                //   => branch B if !c1 && c2
                let cond = simplify(Exp::binary(
                    BinaryOp::LogAnd,
                    Exp::unary(UnaryOp::LNot, c1),
                    c2,
                ));
                if let StmtKind::Branch { cond: c, dest } = &mut proc.cfg.stmt_mut(branch_id).kind
                {
                    *c = Some(cond);
                    *dest = inner_dest;
                }
                proc.cfg.replace_edge(b, taken, inner_taken);
                proc.cfg.replace_edge(b, fall, inner_fall);
                proc.cfg.remove_block(fall);
                merged = true;
                break;
            }
            if inner_taken == taken {
                // branch B if c1; branch B if c2; A: ...
                //   => branch B if c1 || c2
                let cond = simplify(Exp::binary(BinaryOp::LogOr, c1, c2));
                if let StmtKind::Branch { cond: c, .. } = &mut proc.cfg.stmt_mut(branch_id).kind {
                    *c = Some(cond);
                }
                proc.cfg.replace_edge(b, fall, inner_fall);
                proc.cfg.remove_block(fall);
                merged = true;
                break;
            }
        }
        if !merged {
            break;
        }
    }
}

fn branch_parts(proc: &Procedure, sid: StmtId) -> (Option<Exp>, u64) {
    match &proc.cfg.stmt(sid).kind {
        StmtKind::Branch { cond, dest } => (cond.clone(), *dest),
        _ => (None, 0),
    }
}

/// Repairs `x{p} - 1 >= 0` conditions produced by over-propagation: when `p` is a
/// phi with an operand assignment whose right side is exactly `x{p} - 1`, the
/// condition reads much better through that assignment's destination.
pub fn fix_ugly_branches(proc: &mut Procedure) {
    for sid in proc.cfg.statements() {
        let StmtKind::Branch { cond: Some(c), .. } = &proc.cfg.stmt(sid).kind else {
            continue;
        };
        let Exp::Binary(BinaryOp::SGe, ugly, zero) = c else {
            continue;
        };
        if zero.int_value() != Some(0) {
            continue;
        }
        let Exp::Binary(BinaryOp::Sub, x, one) = ugly.as_ref() else {
            continue;
        };
        if one.int_value() != Some(1) || !x.is_subscript() {
            continue;
        }
        let Some((_, Some(phi_id))) = x.ref_parts() else {
            continue;
        };
        let StmtKind::Phi { operands, .. } = &proc.cfg.stmt(phi_id).kind else {
            continue;
        };
        let ugly_clone = ugly.as_ref().clone();
        let replacement = operands.iter().find_map(|op| {
            let def = op.def?;
            let stmt = proc.cfg.stmt(def);
            (stmt.rhs() == Some(&ugly_clone))
                .then(|| stmt.lhs().cloned())
                .flatten()
                .map(|lhs| Exp::subscript(lhs, Some(def)))
        });
        if let Some(repl) = replacement {
            if let StmtKind::Branch { cond: Some(c), .. } = &mut proc.cfg.stmt_mut(sid).kind {
                let _ = c.replace_exp(&ugly_clone, &repl);
            }
        }
    }
}

// ----------------------------------------------------------------------
// Type analysis entry
// ----------------------------------------------------------------------

/// Runs data-flow type analysis for the procedure and applies the gathered types.
pub fn type_analysis(prog: &Program, pid: ProcId) {
    let mut proc = prog.proc_mut(pid);
    debug!("type analysis for {}", proc.name());
    let name = proc.name().to_string();
    let proc = &mut *proc;
    let mut globals = prog.globals.borrow_mut();
    let mut analyzer = TypeAnalyzer {
        cfg: &mut proc.cfg,
        globals: &mut globals,
        image: &prog.image,
        frame: &mut proc.frame,
        sig: &proc.signature,
        proc_name: &name,
    };
    analyzer.run();
    analyzer.apply_results();
}
