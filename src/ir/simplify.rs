//! Algebraic simplification.
//!
//! Propagation and preservation proving both rewrite expressions heavily; without
//! constant folding and address canonicalisation the rewritten forms never converge
//! (`r28 + 4 - 4` must read as `r28` for a preservation proof to close). Simplification
//! runs bottom-up to a fixed point; it is purely structural and never consults types.

use crate::ir::{BinaryOp, Const, Exp, Terminal, TernaryOp, UnaryOp};

/// Simplifies an expression to a fixed point.
#[must_use]
pub fn simplify(e: Exp) -> Exp {
    let mut cur = e;
    for _ in 0..8 {
        let before = cur.clone();
        cur = cur.map(&mut simplify_node);
        if cur == before {
            break;
        }
    }
    cur
}

fn simplify_node(e: Exp) -> Exp {
    match e {
        Exp::Unary(op, a) => simplify_unary(op, *a),
        Exp::Binary(op, a, b) => simplify_binary(op, *a, *b),
        Exp::Ternary(TernaryOp::Cond, c, t, f) => match *c {
            Exp::Terminal(Terminal::True) => *t,
            Exp::Terminal(Terminal::False) => *f,
            c => Exp::ternary(TernaryOp::Cond, c, *t, *f),
        },
        // m[&x] and &m[x] cancel
        Exp::MemOf(a) => match *a {
            Exp::AddrOf(inner) => *inner,
            a => Exp::MemOf(Box::new(a)),
        },
        Exp::AddrOf(a) => match *a {
            Exp::MemOf(inner) => *inner,
            a => Exp::AddrOf(Box::new(a)),
        },
        other => other,
    }
}

fn simplify_unary(op: UnaryOp, a: Exp) -> Exp {
    match (op, a) {
        (UnaryOp::Neg, Exp::Const(Const::Int(v))) => Exp::int(v.wrapping_neg()),
        (UnaryOp::Neg, Exp::Unary(UnaryOp::Neg, inner)) => *inner,
        (UnaryOp::Not, Exp::Const(Const::Int(v))) => Exp::int(!v),
        (UnaryOp::Not, Exp::Unary(UnaryOp::Not, inner)) => *inner,
        (UnaryOp::LNot, Exp::Terminal(Terminal::True)) => Exp::Terminal(Terminal::False),
        (UnaryOp::LNot, Exp::Terminal(Terminal::False)) => Exp::Terminal(Terminal::True),
        (UnaryOp::LNot, Exp::Unary(UnaryOp::LNot, inner)) => *inner,
        (op, a) => Exp::unary(op, a),
    }
}

fn simplify_binary(op: BinaryOp, a: Exp, b: Exp) -> Exp {
    // Constant folding
    if let (Some(x), Some(y)) = (a.int_value(), b.int_value()) {
        if let Some(folded) = fold_ints(op, x, y) {
            return folded;
        }
    }

    match op {
        BinaryOp::Add => {
            if b.int_value() == Some(0) {
                return a;
            }
            if a.int_value() == Some(0) {
                return b;
            }
            // Canonicalise x + -k to x - k
            if let Some(k) = b.int_value() {
                if k < 0 {
                    return Exp::binary(BinaryOp::Sub, a, Exp::int(k.wrapping_neg()));
                }
            }
            // Negated operand folds into a subtraction
            let b = match b {
                Exp::Unary(UnaryOp::Neg, inner) => {
                    return Exp::binary(BinaryOp::Sub, a, *inner)
                }
                other => other,
            };
            // (x ± k1) + k2 combines
            if let Some(e) = combine_offsets(BinaryOp::Add, &a, &b) {
                return e;
            }
            Exp::binary(op, a, b)
        }
        BinaryOp::Sub => {
            if b.int_value() == Some(0) {
                return a;
            }
            if a == b {
                return Exp::int(0);
            }
            if let Some(k) = b.int_value() {
                if k < 0 {
                    return Exp::binary(BinaryOp::Add, a, Exp::int(k.wrapping_neg()));
                }
            }
            if let Some(e) = combine_offsets(BinaryOp::Sub, &a, &b) {
                return e;
            }
            Exp::binary(op, a, b)
        }
        BinaryOp::Mul | BinaryOp::SMul => {
            if b.int_value() == Some(1) {
                return a;
            }
            if a.int_value() == Some(1) {
                return b;
            }
            if a.int_value() == Some(0) || b.int_value() == Some(0) {
                return Exp::int(0);
            }
            Exp::binary(op, a, b)
        }
        BinaryOp::Eq => {
            if a == b {
                return Exp::Terminal(Terminal::True);
            }
            Exp::binary(op, a, b)
        }
        BinaryOp::Ne => {
            if a == b {
                return Exp::Terminal(Terminal::False);
            }
            Exp::binary(op, a, b)
        }
        BinaryOp::LogAnd => match (&a, &b) {
            (Exp::Terminal(Terminal::True), _) => b,
            (_, Exp::Terminal(Terminal::True)) => a,
            (Exp::Terminal(Terminal::False), _) | (_, Exp::Terminal(Terminal::False)) => {
                Exp::Terminal(Terminal::False)
            }
            _ => Exp::binary(op, a, b),
        },
        BinaryOp::LogOr => match (&a, &b) {
            (Exp::Terminal(Terminal::False), _) => b,
            (_, Exp::Terminal(Terminal::False)) => a,
            (Exp::Terminal(Terminal::True), _) | (_, Exp::Terminal(Terminal::True)) => {
                Exp::Terminal(Terminal::True)
            }
            _ => Exp::binary(op, a, b),
        },
        BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Sar => {
            if b.int_value() == Some(0) {
                return a;
            }
            Exp::binary(op, a, b)
        }
        _ => Exp::binary(op, a, b),
    }
}

/// Folds `(x ± k1) ± k2` into a single offset from `x`.
fn combine_offsets(outer: BinaryOp, a: &Exp, b: &Exp) -> Option<Exp> {
    let k2 = b.int_value()?;
    let Exp::Binary(inner, x, k1) = a else {
        return None;
    };
    let k1 = k1.int_value()?;
    let signed_k1 = match inner {
        BinaryOp::Add => k1,
        BinaryOp::Sub => k1.wrapping_neg(),
        _ => return None,
    };
    let signed_k2 = match outer {
        BinaryOp::Add => k2,
        BinaryOp::Sub => k2.wrapping_neg(),
        _ => return None,
    };
    let total = signed_k1.wrapping_add(signed_k2);
    let x = x.as_ref().clone();
    Some(if total >= 0 {
        Exp::binary(BinaryOp::Add, x, Exp::int(total))
    } else {
        Exp::binary(BinaryOp::Sub, x, Exp::int(total.wrapping_neg()))
    })
}

fn fold_ints(op: BinaryOp, x: i64, y: i64) -> Option<Exp> {
    let b = |v: bool| {
        Exp::Terminal(if v { Terminal::True } else { Terminal::False })
    };
    Some(match op {
        BinaryOp::Add => Exp::int(x.wrapping_add(y)),
        BinaryOp::Sub => Exp::int(x.wrapping_sub(y)),
        BinaryOp::Mul | BinaryOp::SMul => Exp::int(x.wrapping_mul(y)),
        BinaryOp::Div => {
            if y == 0 {
                return None;
            }
            Exp::int(((x as u64) / (y as u64)) as i64)
        }
        BinaryOp::SDiv => {
            if y == 0 {
                return None;
            }
            Exp::int(x.wrapping_div(y))
        }
        BinaryOp::BitAnd => Exp::int(x & y),
        BinaryOp::BitOr => Exp::int(x | y),
        BinaryOp::BitXor => Exp::int(x ^ y),
        BinaryOp::Shl => Exp::int(x.wrapping_shl(y as u32)),
        BinaryOp::Shr => Exp::int(((x as u64).wrapping_shr(y as u32)) as i64),
        BinaryOp::Sar => Exp::int(x.wrapping_shr(y as u32)),
        BinaryOp::Eq => b(x == y),
        BinaryOp::Ne => b(x != y),
        BinaryOp::SLt => b(x < y),
        BinaryOp::SGt => b(x > y),
        BinaryOp::SLe => b(x <= y),
        BinaryOp::SGe => b(x >= y),
        BinaryOp::ULt => b((x as u64) < (y as u64)),
        BinaryOp::UGt => b((x as u64) > (y as u64)),
        BinaryOp::ULe => b((x as u64) <= (y as u64)),
        BinaryOp::UGe => b((x as u64) >= (y as u64)),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_folding() {
        let e = Exp::binary(BinaryOp::Add, Exp::int(4), Exp::int(-4));
        assert_eq!(simplify(e), Exp::int(0));
        let e = Exp::binary(BinaryOp::Mul, Exp::int(6), Exp::int(7));
        assert_eq!(simplify(e), Exp::int(42));
    }

    #[test]
    fn test_identity_elimination() {
        let e = Exp::binary(BinaryOp::Add, Exp::reg(28), Exp::int(0));
        assert_eq!(simplify(e), Exp::reg(28));
        let e = Exp::binary(BinaryOp::Mul, Exp::reg(24), Exp::int(1));
        assert_eq!(simplify(e), Exp::reg(24));
    }

    #[test]
    fn test_negative_offset_canonicalised() {
        // m[r28 + -8] reads as m[r28 - 8]
        let e = Exp::mem_of(Exp::binary(BinaryOp::Add, Exp::reg(28), Exp::int(-8)));
        assert_eq!(
            simplify(e),
            Exp::mem_of(Exp::binary(BinaryOp::Sub, Exp::reg(28), Exp::int(8)))
        );
    }

    #[test]
    fn test_offset_chains_combine() {
        // (r28 - 4) + 4 collapses to r28
        let e = Exp::binary(
            BinaryOp::Add,
            Exp::binary(BinaryOp::Sub, Exp::reg(28), Exp::int(4)),
            Exp::int(4),
        );
        assert_eq!(simplify(e), Exp::reg(28));

        let e = Exp::binary(
            BinaryOp::Add,
            Exp::binary(BinaryOp::Add, Exp::reg(28), Exp::int(8)),
            Exp::int(4),
        );
        assert_eq!(
            simplify(e),
            Exp::binary(BinaryOp::Add, Exp::reg(28), Exp::int(12))
        );
    }

    #[test]
    fn test_equality_of_identical_sides() {
        let e = Exp::equate(Exp::reg(28), Exp::reg(28));
        assert_eq!(simplify(e), Exp::Terminal(Terminal::True));
        let e = Exp::binary(BinaryOp::Ne, Exp::reg(28), Exp::reg(28));
        assert_eq!(simplify(e), Exp::Terminal(Terminal::False));
    }

    #[test]
    fn test_self_subtraction() {
        let e = Exp::binary(BinaryOp::Sub, Exp::reg(24), Exp::reg(24));
        assert_eq!(simplify(e), Exp::int(0));
    }

    #[test]
    fn test_mem_addr_cancellation() {
        let e = Exp::mem_of(Exp::addr_of(Exp::local("x")));
        assert_eq!(simplify(e), Exp::local("x"));
    }

    #[test]
    fn test_double_negation() {
        let e = Exp::unary(UnaryOp::Neg, Exp::unary(UnaryOp::Neg, Exp::reg(1)));
        assert_eq!(simplify(e), Exp::reg(1));
    }

    #[test]
    fn test_logical_connectives() {
        let e = Exp::binary(
            BinaryOp::LogAnd,
            Exp::Terminal(Terminal::True),
            Exp::reg(1),
        );
        assert_eq!(simplify(e), Exp::reg(1));
        let e = Exp::binary(
            BinaryOp::LogOr,
            Exp::reg(1),
            Exp::Terminal(Terminal::True),
        );
        assert_eq!(simplify(e), Exp::Terminal(Terminal::True));
    }

    #[test]
    fn test_comparison_folding() {
        let e = Exp::binary(BinaryOp::SLt, Exp::int(-1), Exp::int(0));
        assert_eq!(simplify(e), Exp::Terminal(Terminal::True));
        // Unsigned: -1 is the largest value
        let e = Exp::binary(BinaryOp::ULt, Exp::int(-1), Exp::int(0));
        assert_eq!(simplify(e), Exp::Terminal(Terminal::False));
    }

    #[test]
    fn test_simplify_reaches_fixed_point() {
        // ((r28 + 4) - 4) + 0 requires several passes
        let e = Exp::binary(
            BinaryOp::Add,
            Exp::binary(
                BinaryOp::Sub,
                Exp::binary(BinaryOp::Add, Exp::reg(28), Exp::int(4)),
                Exp::int(4),
            ),
            Exp::int(0),
        );
        assert_eq!(simplify(e), Exp::reg(28));
    }
}
