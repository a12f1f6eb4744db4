//! Live-range computation over subscripted references.
//!
//! The inverse SSA transform must not give two simultaneously-live versions of the
//! same base location one local variable. This module computes liveness at the
//! granularity of `base{def}` references with a standard backward fixed point, then
//! records every pair of same-base, different-definition references that are live at
//! the same program point into the interference graph.
//!
//! Phi operands are uses on the incoming *edge*, not inside the block, and a phi's
//! own definition is killed at the top of its block; both follow the usual SSA
//! liveness treatment.

use crate::cfg::{Cfg, ConnectionGraph};
use crate::ir::{BlockId, Exp, LocationSet, StmtId, StmtKind};

/// Computes interferences between subscripted references and records them in `ig`.
pub fn find_interferences(cfg: &Cfg, ig: &mut ConnectionGraph) {
    let n = cfg.block_count();
    if n == 0 {
        return;
    }
    let mut live_in: Vec<LocationSet> = vec![LocationSet::new(); n];

    // Backward fixed point over the whole graph
    loop {
        let mut changed = false;
        for b in cfg.block_ids().collect::<Vec<_>>().into_iter().rev() {
            let mut live = live_out(cfg, &live_in, b);
            for &sid in cfg.block(b).stmts.iter().rev() {
                step_backward(cfg, sid, &mut live, None);
            }
            if live != live_in[b.index()] {
                live_in[b.index()] = live;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Final pass: walk again and record simultaneous same-base references
    for b in cfg.block_ids() {
        let mut live = live_out(cfg, &live_in, b);
        connect_pairs(&live, ig);
        for &sid in cfg.block(b).stmts.iter().rev() {
            step_backward(cfg, sid, &mut live, Some(ig));
        }
    }
}

/// Live set at the bottom of `b`: successors' live-ins (minus their phi
/// definitions, which are killed inside) plus the phi operands arriving over the
/// edge from `b`.
fn live_out(cfg: &Cfg, live_in: &[LocationSet], b: BlockId) -> LocationSet {
    let mut out = LocationSet::new();
    for &s in &cfg.block(b).out_edges {
        out.extend(live_in[s.index()].iter().cloned());
        for &sid in &cfg.block(s).stmts {
            let stmt = cfg.stmt(sid);
            if stmt.is_implicit() {
                continue;
            }
            let StmtKind::Phi { operands, .. } = &stmt.kind else {
                break;
            };
            if let Some(op) = operands.iter().find(|op| op.pred == b) {
                out.insert(Exp::subscript(op.base.clone(), op.def));
            }
        }
    }
    out
}

/// Applies one statement backward: kill the references it defines, then make its
/// uses live (phi uses live on edges, not here). When `ig` is given, a use
/// becoming live interferes with every live same-base reference with a different
/// definition.
fn step_backward(cfg: &Cfg, sid: StmtId, live: &mut LocationSet, ig: Option<&mut ConnectionGraph>) {
    live.retain(|e| !matches!(e.ref_parts(), Some((_, Some(def))) if def == sid));

    if !cfg.stmt(sid).is_phi() {
        let mut uses = LocationSet::new();
        cfg.stmt(sid).add_used_locs(&mut uses, false);
        for u in uses {
            if u.is_subscript() {
                live.insert(u);
            }
        }
    }
    if let Some(ig) = ig {
        connect_pairs(live, ig);
    }
}

fn connect_pairs(live: &LocationSet, ig: &mut ConnectionGraph) {
    let refs: Vec<&Exp> = live.iter().filter(|e| e.is_subscript()).collect();
    for (i, a) in refs.iter().enumerate() {
        for b in refs.iter().skip(i + 1) {
            if let (Some((ab, ad)), Some((bb, bd))) = (a.ref_parts(), b.ref_parts()) {
                if ab == bb && ad != bd {
                    ig.connect(a, b);
                }
            }
        }
    }
}
