//! SSA construction: phi placement and block-variable renaming.
//!
//! Phi placement follows the standard iterated-dominance-frontier algorithm; renaming
//! walks the dominator tree maintaining a per-location stack of reaching definitions.
//! Both are re-runnable: placement skips phis that already exist, and renaming
//! re-subscripts existing references, reporting through its return value whether
//! anything actually changed. The pipeline leans on that to detect its fixed point.
//!
//! # What gets renamed
//!
//! Registers, condition codes and temporaries are always renameable. Memory-of
//! expressions (and named locals/parameters) join only once the graph's
//! rename-memofs knob is switched on, late in the pipeline, when propagation can no
//! longer change their address expressions.
//!
//! # Childless calls
//!
//! A call whose callee has not been analyzed defines *every* location. The renamer
//! tracks this with a separate "define-all" stack; resolving a use compares the
//! per-location stack against the define-all stack and picks whichever definition is
//! more recent.
//!
//! # Collectors
//!
//! While renaming, calls and returns snapshot the definition reaching them for every
//! known location (their definition collectors), and every resolved use whose
//! definition is a call is recorded in that call's use collector. Those collectors
//! are exactly what preservation proving, argument discovery and redundant-return
//! removal consume.

use rustc_hash::FxHashMap;

use crate::cfg::{Cfg, DomTree};
use crate::ir::{can_rename, BlockId, Exp, StmtId, StmtKind, Terminal};
use crate::types::Type;

/// Places phi functions at the iterated dominance frontier of every definition.
/// Returns `true` if any phi was added.
pub fn place_phi_functions(cfg: &mut Cfg) -> bool {
    if cfg.entry().is_none() {
        return false;
    }
    let dom = cfg.dominator_tree();
    let frontiers = cfg.dominance_frontiers(&dom);
    let rename_memofs = cfg.rename_memofs();

    // Collect definition sites per location
    let mut defsites: FxHashMap<Exp, Vec<BlockId>> = FxHashMap::default();
    for sid in cfg.statements() {
        let stmt = cfg.stmt(sid);
        for def in stmt.definitions() {
            if def == Exp::Terminal(Terminal::DefineAll) || !can_rename(&def, rename_memofs) {
                continue;
            }
            defsites.entry(def).or_default().push(stmt.block);
        }
    }

    // Existing phis, so placement is idempotent
    let mut existing: FxHashMap<BlockId, Vec<Exp>> = FxHashMap::default();
    for sid in cfg.statements() {
        let stmt = cfg.stmt(sid);
        if let StmtKind::Phi { lhs, .. } = &stmt.kind {
            existing.entry(stmt.block).or_default().push(lhs.clone());
        }
    }

    let mut changed = false;
    let mut vars: Vec<Exp> = defsites.keys().cloned().collect();
    vars.sort();
    for var in vars {
        let mut worklist = defsites[&var].clone();
        let mut placed: Vec<BlockId> = Vec::new();
        while let Some(site) = worklist.pop() {
            for &front in &frontiers[site.index()] {
                if placed.contains(&front) {
                    continue;
                }
                let already = existing
                    .get(&front)
                    .is_some_and(|phis| phis.contains(&var));
                if !already {
                    let operands = cfg
                        .block(front)
                        .in_edges
                        .iter()
                        .map(|&pred| crate::ir::PhiOperand {
                            pred,
                            base: var.clone(),
                            def: None,
                        })
                        .collect();
                    cfg.insert_stmt_front(
                        front,
                        StmtKind::Phi {
                            lhs: var.clone(),
                            ty: Type::Void,
                            operands,
                        },
                    );
                    existing.entry(front).or_default().push(var.clone());
                    changed = true;
                }
                placed.push(front);
                // The phi is itself a definition
                worklist.push(front);
            }
        }
    }
    changed
}

/// One entry on a renaming stack: a monotone push sequence number plus the defining
/// statement. The sequence number arbitrates between a location's own stack and the
/// define-all stack.
type StackEntry = (u64, StmtId);

struct Renamer<'a> {
    cfg: &'a mut Cfg,
    stacks: FxHashMap<Exp, Vec<StackEntry>>,
    define_all: Vec<StackEntry>,
    seq: u64,
    changed: bool,
}

/// Renames every use of a renameable location to a subscripted reference to its
/// reaching definition, and fills the call/return collectors. Returns `true` when
/// any subscript or collector entry changed.
///
/// `_clear_stacks` is accepted for pipeline parity; every invocation performs a
/// fresh, complete rename (which is idempotent on an already-renamed graph).
pub fn rename_block_vars(cfg: &mut Cfg, _clear_stacks: bool) -> bool {
    let Some(entry) = cfg.entry() else {
        return false;
    };
    let dom = cfg.dominator_tree();
    let mut renamer = Renamer {
        cfg,
        stacks: FxHashMap::default(),
        define_all: Vec::new(),
        seq: 0,
        changed: false,
    };
    renamer.rename_block(entry, &dom);
    renamer.changed
}

impl Renamer<'_> {
    fn rename_block(&mut self, b: BlockId, dom: &DomTree) {
        let mut pushed: Vec<Option<Exp>> = Vec::new();
        let stmt_ids = self.cfg.block(b).stmts.clone();

        for sid in stmt_ids {
            let rename_memofs = self.cfg.rename_memofs();

            // Uses first (phi operands are handled from the predecessor side)
            if !self.cfg.stmt(sid).is_phi() {
                let mut kind =
                    std::mem::replace(&mut self.cfg.stmt_mut(sid).kind, StmtKind::Junction);
                let mut probe = crate::ir::Statement::new(b, 0, kind);
                probe.map_uses(&mut |e| self.rename_use(e, rename_memofs));
                kind = probe.kind;
                self.cfg.stmt_mut(sid).kind = kind;
            }

            // Calls and returns snapshot the reaching definitions
            if self.cfg.stmt(sid).is_call() {
                let snapshot = self.snapshot();
                if let Some(call) = self.cfg.stmt_mut(sid).as_call_mut() {
                    if call.def_collector != snapshot {
                        call.def_collector = snapshot;
                        self.changed = true;
                    }
                }
            } else if self.cfg.stmt(sid).is_return() {
                let snapshot = self.snapshot();
                if let Some(ret) = self.cfg.stmt_mut(sid).as_return_mut() {
                    if ret.def_collector != snapshot {
                        ret.def_collector = snapshot;
                        self.changed = true;
                    }
                }
            }

            // Then definitions
            for def in self.cfg.stmt(sid).definitions() {
                if def == Exp::Terminal(Terminal::DefineAll) {
                    self.seq += 1;
                    self.define_all.push((self.seq, sid));
                    pushed.push(None);
                } else if can_rename(&def, self.cfg.rename_memofs()) {
                    self.seq += 1;
                    self.stacks
                        .entry(def.clone())
                        .or_default()
                        .push((self.seq, sid));
                    pushed.push(Some(def));
                }
            }
        }

        // Feed phi operands of successors
        for succ in self.cfg.block(b).out_edges.clone() {
            for sid in self.cfg.block(succ).stmts.clone() {
                let stmt = self.cfg.stmt(sid);
                if stmt.is_implicit() {
                    continue;
                }
                if !stmt.is_phi() {
                    break;
                }
                let base = stmt.lhs().expect("phi has an lhs").clone();
                let def = self.reaching_def(&base);
                self.note_use_of(def, &base);
                if let StmtKind::Phi { operands, .. } = &mut self.cfg.stmt_mut(sid).kind {
                    if let Some(op) = operands.iter_mut().find(|op| op.pred == b) {
                        if op.def != Some(def) || op.base != base {
                            op.base = base;
                            op.def = Some(def);
                            self.changed = true;
                        }
                    } else {
                        operands.push(crate::ir::PhiOperand {
                            pred: b,
                            base,
                            def: Some(def),
                        });
                        self.changed = true;
                    }
                }
            }
        }

        // Recurse into dominated blocks
        for &child in dom.children(b).to_vec().iter() {
            self.rename_block(child, dom);
        }

        // Unwind this block's definitions
        for p in pushed.into_iter().rev() {
            match p {
                None => {
                    self.define_all.pop();
                }
                Some(e) => {
                    self.stacks.get_mut(&e).expect("pushed stack exists").pop();
                }
            }
        }
    }

    /// Rewrites one use expression, subscripting every renameable location with its
    /// reaching definition.
    fn rename_use(&mut self, e: &mut Exp, rename_memofs: bool) {
        match e {
            Exp::Ref(base, def) => {
                // Re-subscript: rename inside a memory base first, then refresh
                if let Exp::MemOf(addr) = base.as_mut() {
                    self.rename_use(addr, rename_memofs);
                }
                let d = self.reaching_def(base);
                self.note_use_of(d, base);
                if *def != Some(d) {
                    *def = Some(d);
                    self.changed = true;
                }
            }
            _ if can_rename(e, rename_memofs) => {
                if let Exp::MemOf(addr) = e {
                    self.rename_use(addr, rename_memofs);
                }
                let d = self.reaching_def(e);
                self.note_use_of(d, e);
                let base = std::mem::replace(e, Exp::Terminal(Terminal::Wild));
                *e = Exp::subscript(base, Some(d));
                self.changed = true;
            }
            Exp::MemOf(addr) => {
                // The memory location itself stays bare, but its address has uses
                self.rename_use(addr, rename_memofs);
            }
            _ => {
                for c in e.children_mut() {
                    self.rename_use(c, rename_memofs);
                }
            }
        }
    }

    /// The definition of `base` reaching the current program point, creating an
    /// implicit assignment when none exists.
    fn reaching_def(&mut self, base: &Exp) -> StmtId {
        let own = self.stacks.get(base).and_then(|v| v.last()).copied();
        let all = self.define_all.last().copied();
        match (own, all) {
            (Some((s1, d1)), Some((s2, d2))) => {
                if s1 > s2 {
                    d1
                } else {
                    d2
                }
            }
            (Some((_, d)), None) | (None, Some((_, d))) => d,
            (None, None) => self.cfg.implicit_assign(base),
        }
    }

    /// Records that `base` (as defined by `def`) is used; a call definition gains a
    /// use-collector entry, which is what keeps its returns alive.
    fn note_use_of(&mut self, def: StmtId, base: &Exp) {
        if self.cfg.stmt(def).is_call() {
            if let Some(call) = self.cfg.stmt_mut(def).as_call_mut() {
                if call.use_collector.insert(base.clone()) {
                    self.changed = true;
                }
            }
        }
    }

    /// The reaching definition of every known location, for call/return collectors.
    fn snapshot(&mut self) -> Vec<(Exp, Option<StmtId>)> {
        let mut keys: Vec<Exp> = self.stacks.keys().cloned().collect();
        for (base, _) in self.cfg.implicit_assigns() {
            if !keys.contains(base) {
                keys.push(base.clone());
            }
        }
        keys.sort();
        let mut out = Vec::with_capacity(keys.len() + 1);
        if let Some(&(_, d)) = self.define_all.last() {
            out.push((Exp::Terminal(Terminal::DefineAll), Some(d)));
        }
        for k in keys {
            let def = self.reaching_def(&k);
            out.push((k, Some(def)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::BlockKind;
    use crate::ir::BinaryOp;

    fn assign(lhs: Exp, rhs: Exp) -> StmtKind {
        StmtKind::Assign {
            lhs,
            ty: Type::Void,
            rhs,
        }
    }

    /// 0: r24 := 5      1: r24 := 6
    ///  \              /
    ///   2: r25 := r24
    fn diamond_with_defs() -> (Cfg, StmtId, StmtId, StmtId) {
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Twoway);
        let b1 = cfg.add_block(0x1010, BlockKind::Fall);
        let b2 = cfg.add_block(0x1020, BlockKind::Fall);
        let b3 = cfg.add_block(0x1030, BlockKind::Ret);
        cfg.add_edge(b0, b1);
        cfg.add_edge(b0, b2);
        cfg.add_edge(b1, b3);
        cfg.add_edge(b2, b3);
        let s1 = cfg.add_stmt(b1, 0x1010, assign(Exp::reg(24), Exp::int(5)));
        let s2 = cfg.add_stmt(b2, 0x1020, assign(Exp::reg(24), Exp::int(6)));
        let s3 = cfg.add_stmt(b3, 0x1030, assign(Exp::reg(25), Exp::reg(24)));
        (cfg, s1, s2, s3)
    }

    #[test]
    fn test_phi_placed_at_join() {
        let (mut cfg, ..) = diamond_with_defs();
        assert!(place_phi_functions(&mut cfg));
        let b3 = BlockId::new(3);
        let first = cfg.block(b3).stmts[0];
        let stmt = cfg.stmt(first);
        assert!(stmt.is_phi());
        assert_eq!(stmt.lhs(), Some(&Exp::reg(24)));
        if let StmtKind::Phi { operands, .. } = &stmt.kind {
            assert_eq!(operands.len(), 2);
        }
        // Idempotent
        assert!(!place_phi_functions(&mut cfg));
    }

    #[test]
    fn test_rename_links_uses_through_phi() {
        let (mut cfg, s1, s2, s3) = diamond_with_defs();
        place_phi_functions(&mut cfg);
        assert!(rename_block_vars(&mut cfg, true));

        let phi_id = cfg.block(BlockId::new(3)).stmts[0];
        if let StmtKind::Phi { operands, .. } = &cfg.stmt(phi_id).kind {
            let defs: Vec<_> = operands.iter().map(|op| op.def).collect();
            assert!(defs.contains(&Some(s1)));
            assert!(defs.contains(&Some(s2)));
        } else {
            panic!("expected phi");
        }

        // The use of r24 now references the phi
        assert_eq!(
            cfg.stmt(s3).rhs(),
            Some(&Exp::subscript(Exp::reg(24), Some(phi_id)))
        );

        // A second rename is a no-op
        assert!(!rename_block_vars(&mut cfg, true));
    }

    #[test]
    fn test_use_before_def_creates_implicit() {
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
        rename_block_vars(&mut cfg, true);
        let imp = cfg
            .find_implicit_assign(&Exp::reg(28))
            .expect("implicit created for use before def");
        assert_eq!(
            cfg.stmt(s0).rhs(),
            Some(&Exp::binary(
                BinaryOp::Add,
                Exp::subscript(Exp::reg(28), Some(imp)),
                Exp::int(4)
            ))
        );
    }

    #[test]
    fn test_straightline_def_use_links() {
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Ret);
        let s0 = cfg.add_stmt(b0, 0x1000, assign(Exp::reg(24), Exp::int(1)));
        let s1 = cfg.add_stmt(b0, 0x1004, assign(Exp::reg(24), Exp::int(2)));
        let s2 = cfg.add_stmt(b0, 0x1008, assign(Exp::reg(25), Exp::reg(24)));
        rename_block_vars(&mut cfg, true);
        // The use sees the *second* definition
        assert_eq!(
            cfg.stmt(s2).rhs(),
            Some(&Exp::subscript(Exp::reg(24), Some(s1)))
        );
        let _ = s0;
    }

    #[test]
    fn test_childless_call_defines_everything() {
        use crate::ir::{CallDest, CallStmt};
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Call);
        let b1 = cfg.add_block(0x1010, BlockKind::Ret);
        cfg.add_edge(b0, b1);
        let s0 = cfg.add_stmt(b0, 0x1000, assign(Exp::reg(24), Exp::int(1)));
        let call = cfg.add_stmt(
            b0,
            0x1004,
            StmtKind::Call(CallStmt::new(CallDest::Fixed(0x2000))),
        );
        let s2 = cfg.add_stmt(b1, 0x1010, assign(Exp::reg(25), Exp::reg(24)));
        rename_block_vars(&mut cfg, true);
        // The use of r24 is intercepted by the childless call, not s0
        assert_eq!(
            cfg.stmt(s2).rhs(),
            Some(&Exp::subscript(Exp::reg(24), Some(call)))
        );
        // And the call's use collector records the liveness
        let c = cfg.stmt(call).as_call().unwrap();
        assert!(c.use_collector.contains(&Exp::reg(24)));
        // The call's def collector saw s0's definition of r24
        assert_eq!(c.find_def_for(&Exp::reg(24)), Some(Some(s0)));
    }

    #[test]
    fn test_memofs_rename_only_when_enabled() {
        let mut cfg = Cfg::new();
        let b0 = cfg.add_block(0x1000, BlockKind::Ret);
        let loc = Exp::mem_of(Exp::binary(BinaryOp::Sub, Exp::reg(28), Exp::int(4)));
        let st = cfg.add_stmt(b0, 0x1000, assign(Exp::reg(24), loc.clone()));
        rename_block_vars(&mut cfg, true);
        // Address inside the memof is renamed, the memof itself is not
        let rhs = cfg.stmt(st).rhs().unwrap();
        assert!(matches!(rhs, Exp::MemOf(_)));

        cfg.set_rename_memofs(true);
        rename_block_vars(&mut cfg, true);
        let rhs = cfg.stmt(st).rhs().unwrap();
        assert!(rhs.is_subscript());
    }
}
