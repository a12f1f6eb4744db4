//! End-to-end scenarios driving the public decompilation API.

use relift::prelude::*;

/// A frontend for procedures whose statements are already in place.
struct PreDecoded;

impl Frontend for PreDecoded {
    fn decode(&self, _prog: &Program, _pid: ProcId) -> Result<()> {
        Ok(())
    }
}

fn assign(lhs: Exp, ty: Type, rhs: Exp) -> StmtKind {
    StmtKind::Assign { lhs, ty, rhs }
}

/// S1: a procedure that decrements and restores the stack pointer proves
/// `r28 = r28`, and the return statement does not list `r28` as modified.
#[test]
fn s1_stack_pointer_preservation() {
    let mut prog = Program::new(Image::new());
    let pid = prog.add_proc("pushpop", 0x1000, 28);
    {
        let mut proc = prog.proc_mut(pid);
        let b0 = proc.cfg.add_block(0x1000, BlockKind::Ret);
        proc.cfg.add_stmt(
            b0,
            0x1000,
            assign(
                Exp::reg(28),
                Type::size(32),
                Exp::binary(BinaryOp::Sub, Exp::reg(28), Exp::int(4)),
            ),
        );
        proc.cfg.add_stmt(
            b0,
            0x1004,
            assign(
                Exp::reg(28),
                Type::size(32),
                Exp::binary(BinaryOp::Add, Exp::reg(28), Exp::int(4)),
            ),
        );
        let ret = proc
            .cfg
            .add_stmt(b0, 0x1008, StmtKind::Return(ReturnStmt::default()));
        proc.return_stmt = Some(ret);
        proc.set_status(ProcStatus::Decoded);
    }

    decompile_program(&prog, &PreDecoded).unwrap();

    let proc = prog.proc(pid);
    assert_eq!(proc.get_proven(&Exp::reg(28)), Some(&Exp::reg(28)));
    let ret = proc
        .cfg
        .stmt(proc.return_stmt.unwrap())
        .as_return()
        .unwrap();
    assert!(
        !ret.modifieds.iter().any(|(b, _)| b == &Exp::reg(28)),
        "r28 still listed as modified"
    );
}

/// S2: a phi whose operands are both `5` collapses; no phi survives and no edge
/// copies are inserted.
#[test]
fn s2_phi_collapse() {
    // Named "main" so the whole-program return trimming keeps its return value
    // live; the phi then survives to the SSA inverse transform where it must
    // collapse
    let mut prog = Program::new(Image::new());
    let pid = prog.add_proc("main", 0x1000, 28);
    {
        let mut proc = prog.proc_mut(pid);
        let b0 = proc.cfg.add_block(0x1000, BlockKind::Twoway);
        let b1 = proc.cfg.add_block(0x1010, BlockKind::Fall);
        let b2 = proc.cfg.add_block(0x1020, BlockKind::Fall);
        let b3 = proc.cfg.add_block(0x1030, BlockKind::Ret);
        proc.cfg.add_edge(b0, b1);
        proc.cfg.add_edge(b0, b2);
        proc.cfg.add_edge(b1, b3);
        proc.cfg.add_edge(b2, b3);
        proc.cfg.add_stmt(
            b0,
            0x1000,
            StmtKind::Branch {
                cond: Some(Exp::binary(BinaryOp::SLt, Exp::reg(8), Exp::int(0))),
                dest: 0x1020,
            },
        );
        proc.cfg
            .add_stmt(b1, 0x1010, assign(Exp::reg(24), Type::size(32), Exp::int(5)));
        proc.cfg
            .add_stmt(b2, 0x1020, assign(Exp::reg(24), Type::size(32), Exp::int(5)));
        let ret_val = proc.cfg.add_stmt(
            b3,
            0x1030,
            assign(Exp::reg(25), Type::size(32), Exp::reg(24)),
        );
        let ret = proc
            .cfg
            .add_stmt(b3, 0x1034, StmtKind::Return(ReturnStmt::default()));
        proc.return_stmt = Some(ret);
        proc.set_status(ProcStatus::Decoded);
        let _ = ret_val;
    }

    decompile_program(&prog, &PreDecoded).unwrap();

    let proc = prog.proc(pid);
    for sid in proc.cfg.statements() {
        assert!(!proc.cfg.stmt(sid).is_phi(), "phi survived decompilation");
        assert!(
            !proc.cfg.stmt(sid).has_refs(),
            "SSA reference survived: {}",
            proc.cfg.stmt(sid)
        );
    }
}

/// S3: mutual recursion `A -> B -> A` forms one cycle group, is analyzed once as a
/// group, and both procedures finish.
#[test]
fn s3_cycle_detection() {
    let mut prog = Program::new(Image::new());
    let a = prog.add_proc("a", 0x1000, 28);
    let b = prog.add_proc("b", 0x2000, 28);

    for (pid, callee_addr) in [(a, 0x2000u64), (b, 0x1000u64)] {
        let mut proc = prog.proc_mut(pid);
        let addr = proc.addr();
        let b0 = proc.cfg.add_block(addr, BlockKind::Call);
        let b1 = proc.cfg.add_block(addr + 0x10, BlockKind::Ret);
        proc.cfg.add_edge(b0, b1);
        proc.cfg.add_stmt(
            b0,
            addr,
            StmtKind::Call(CallStmt::new(CallDest::Fixed(callee_addr))),
        );
        let ret = proc
            .cfg
            .add_stmt(b1, addr + 0x10, StmtKind::Return(ReturnStmt::default()));
        proc.return_stmt = Some(ret);
        proc.set_status(ProcStatus::Decoded);
    }

    let mut path = Vec::new();
    let child = decompile(&prog, &PreDecoded, a, &mut path).unwrap();
    assert!(child.is_empty(), "cycle leaked out of its entry point");
    assert!(path.is_empty());

    // Both ended in Final, sharing one (pointer-identical) cycle group
    assert_eq!(prog.proc(a).status(), ProcStatus::Final);
    assert_eq!(prog.proc(b).status(), ProcStatus::Final);
    assert!(prog.proc(a).does_recurse_to(b));
    assert!(prog.proc(b).does_recurse_to(a));
    let ga = prog.proc(a).cycle_group.clone().unwrap();
    let gb = prog.proc(b).cycle_group.clone().unwrap();
    assert!(std::rc::Rc::ptr_eq(&ga, &gb));
    assert_eq!(ga.borrow().len(), 2);
}

/// S4: a scaled memory reference against a global base registers a global array
/// and is rewritten to an index expression.
#[test]
fn s4_scaled_array_recovery() {
    let mut image = Image::new();
    image.add_section(".data", 0x8000, vec![0u8; 0x100], true);
    let mut prog = Program::new(image);
    let pid = prog.add_proc("store", 0x1000, 28);
    {
        let mut proc = prog.proc_mut(pid);
        let b0 = proc.cfg.add_block(0x1000, BlockKind::Ret);
        let lhs = Exp::mem_of(Exp::binary(
            BinaryOp::Add,
            Exp::binary(BinaryOp::Mul, Exp::reg(8), Exp::int(4)),
            Exp::addr(0x8000),
        ));
        proc.cfg
            .add_stmt(b0, 0x1000, assign(lhs, Type::size(32), Exp::int(0)));
        let ret = proc
            .cfg
            .add_stmt(b0, 0x1004, StmtKind::Return(ReturnStmt::default()));
        proc.return_stmt = Some(ret);
        proc.set_status(ProcStatus::Decoded);
    }

    decompile_program(&prog, &PreDecoded).unwrap();

    let globals = prog.globals.borrow();
    let name = globals.name_at(0x8000).expect("global registered at 0x8000");
    assert!(
        globals.type_of(name).unwrap().resolves_to_array(),
        "global at 0x8000 is {}",
        globals.type_of(name).unwrap()
    );

    // The store survives (array writes are observable) as an index expression
    let proc = prog.proc(pid);
    let indexed = proc.cfg.statements().into_iter().any(|s| {
        matches!(
            proc.cfg.stmt(s).lhs(),
            Some(Exp::Binary(BinaryOp::ArrayIndex, ..))
        )
    });
    assert!(indexed, "store was not rewritten to an array index");
}

/// S5: a return no caller uses is removed, and iteration continues until no
/// change.
#[test]
fn s5_redundant_return_removal() {
    let mut prog = Program::new(Image::new());
    let callee = prog.add_proc("callee", 0x2000, 28);
    let caller = prog.add_proc("caller", 0x1000, 28);
    {
        let mut proc = prog.proc_mut(callee);
        let b0 = proc.cfg.add_block(0x2000, BlockKind::Ret);
        proc.cfg
            .add_stmt(b0, 0x2000, assign(Exp::reg(24), Type::size(32), Exp::int(5)));
        let ret = proc
            .cfg
            .add_stmt(b0, 0x2004, StmtKind::Return(ReturnStmt::default()));
        proc.return_stmt = Some(ret);
        proc.set_status(ProcStatus::Decoded);
    }
    {
        let mut proc = prog.proc_mut(caller);
        let b0 = proc.cfg.add_block(0x1000, BlockKind::Call);
        let b1 = proc.cfg.add_block(0x1010, BlockKind::Ret);
        proc.cfg.add_edge(b0, b1);
        proc.cfg.add_stmt(
            b0,
            0x1000,
            StmtKind::Call(CallStmt::new(CallDest::Fixed(0x2000))),
        );
        // The caller never reads r24 after the call
        let ret = proc
            .cfg
            .add_stmt(b1, 0x1010, StmtKind::Return(ReturnStmt::default()));
        proc.return_stmt = Some(ret);
        proc.set_status(ProcStatus::Decoded);
    }

    decompile_program(&prog, &PreDecoded).unwrap();

    let proc = prog.proc(callee);
    let ret = proc
        .cfg
        .stmt(proc.return_stmt.unwrap())
        .as_return()
        .unwrap();
    assert!(
        !ret.returns.iter().any(|a| a.lhs == Exp::reg(24)),
        "unused return r24 survived"
    );
}

/// S6: inserting a weaving interval is rejected and leaves the first entry alone.
#[test]
fn s6_data_interval_weave() {
    let mut dim = DataIntervalMap::new();
    dim.add_item(0x100, "a", Type::int(32)).unwrap();
    let err = dim.add_item(0x102, "b", Type::int(32)).unwrap_err();
    assert!(matches!(err, Error::TypeWeave { addr: 0x102, .. }));
    assert_eq!(dim.len(), 1);
    assert_eq!(dim.find(0x100).unwrap().1.name, "a");
}

/// The driver terminates on every input and leaves every reachable procedure
/// fully decompiled (property 6).
#[test]
fn driver_reaches_fixed_point() {
    let mut prog = Program::new(Image::new());
    // A small program: main calls f twice, f calls g, g self-recurses
    let main = prog.add_proc("main", 0x1000, 28);
    let f = prog.add_proc("f", 0x2000, 28);
    let g = prog.add_proc("g", 0x3000, 28);

    {
        let mut proc = prog.proc_mut(main);
        let b0 = proc.cfg.add_block(0x1000, BlockKind::Call);
        let b1 = proc.cfg.add_block(0x1010, BlockKind::Call);
        let b2 = proc.cfg.add_block(0x1020, BlockKind::Ret);
        proc.cfg.add_edge(b0, b1);
        proc.cfg.add_edge(b1, b2);
        proc.cfg
            .add_stmt(b0, 0x1000, StmtKind::Call(CallStmt::new(CallDest::Fixed(0x2000))));
        proc.cfg
            .add_stmt(b1, 0x1010, StmtKind::Call(CallStmt::new(CallDest::Fixed(0x2000))));
        let ret = proc
            .cfg
            .add_stmt(b2, 0x1020, StmtKind::Return(ReturnStmt::default()));
        proc.return_stmt = Some(ret);
        proc.set_status(ProcStatus::Decoded);
    }
    for (pid, addr, callee) in [(f, 0x2000u64, 0x3000u64), (g, 0x3000, 0x3000)] {
        let mut proc = prog.proc_mut(pid);
        let b0 = proc.cfg.add_block(addr, BlockKind::Call);
        let b1 = proc.cfg.add_block(addr + 0x10, BlockKind::Ret);
        proc.cfg.add_edge(b0, b1);
        proc.cfg
            .add_stmt(b0, addr, StmtKind::Call(CallStmt::new(CallDest::Fixed(callee))));
        let ret = proc
            .cfg
            .add_stmt(b1, addr + 0x10, StmtKind::Return(ReturnStmt::default()));
        proc.return_stmt = Some(ret);
        proc.set_status(ProcStatus::Decoded);
    }

    decompile_program(&prog, &PreDecoded).unwrap();

    for pid in prog.proc_ids() {
        assert!(
            prog.proc(pid).status() >= ProcStatus::Final,
            "{} did not finish: {}",
            prog.proc(pid).name(),
            prog.proc(pid).status()
        );
        for sid in prog.proc(pid).cfg.statements() {
            assert!(
                !prog.proc(pid).cfg.stmt(sid).has_refs(),
                "reference survived in {}",
                prog.proc(pid).name()
            );
        }
    }
    // g is its own one-element recursion group
    assert!(prog.proc(g).does_recurse_to(g));
}
