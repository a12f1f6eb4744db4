//! Procedure signatures and the library-signature registry interface.
//!
//! A [`Signature`] records what the ABI and any signature database know about a
//! procedure: named, typed parameters with their machine locations; return
//! locations; the stack register; and (for library procedures) the set of locations
//! the callee preserves. User-procedure signatures start empty and are grown by
//! parameter discovery.
//!
//! # Parameter ordering
//!
//! Parameters keep ABI order: register parameters by register number, then stack
//! parameters by ascending offset. [`Signature::argument_compare`] is the total
//! order used when inserting discovered parameters.

use std::cmp::Ordering;

use crate::ir::{BinaryOp, Exp};
use crate::types::Type;

/// One named, typed, located parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Parameter name (`param1`, ... when invented).
    pub name: String,
    /// Machine location of the parameter (e.g. `r8`, `m[r28{-} + 4]`).
    pub exp: Exp,
    /// Parameter type.
    pub ty: Type,
}

/// A procedure signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Procedure name.
    pub name: String,
    /// Ordered parameters.
    pub params: Vec<Parameter>,
    /// Return locations with their types.
    pub returns: Vec<(Exp, Type)>,
    /// The stack-pointer register for this ABI.
    pub stack_register: u16,
    /// Locations the procedure is known to preserve (library signatures).
    pub preserved: Vec<Exp>,
    /// A forced signature is authoritative: discovery must not add or remove
    /// parameters or returns.
    pub forced: bool,
}

impl Signature {
    /// Creates an empty signature.
    #[must_use]
    pub fn new(name: impl Into<String>, stack_register: u16) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: Vec::new(),
            stack_register,
            preserved: Vec::new(),
            forced: false,
        }
    }

    /// Index of the parameter at location `e`.
    #[must_use]
    pub fn find_param(&self, e: &Exp) -> Option<usize> {
        self.params.iter().position(|p| &p.exp == e)
    }

    /// Adds a parameter at its ABI position, inventing a name. No-op if a parameter
    /// already occupies the location.
    pub fn add_parameter(&mut self, e: Exp, ty: Type) {
        if self.find_param(&e).is_some() {
            return;
        }
        let name = format!("param{}", self.params.len() + 1);
        let at = self
            .params
            .partition_point(|p| self.argument_compare(&p.exp, &e) != Ordering::Greater);
        self.params.insert(
            at,
            Parameter {
                name,
                exp: e,
                ty,
            },
        );
    }

    /// Removes the parameter at location `e`; returns its old index.
    pub fn remove_parameter(&mut self, e: &Exp) -> Option<usize> {
        let idx = self.find_param(e)?;
        self.params.remove(idx);
        Some(idx)
    }

    /// Removes the return at location `e`.
    pub fn remove_return(&mut self, e: &Exp) {
        self.returns.retain(|(loc, _)| loc != e);
    }

    /// Returns `true` if `e` is in the preserved set.
    #[must_use]
    pub fn is_preserved(&self, e: &Exp) -> bool {
        self.preserved.contains(e)
    }

    /// What this signature proves about location `e` at exit: preserved locations
    /// prove `e = e`.
    #[must_use]
    pub fn proven_for(&self, e: &Exp) -> Option<Exp> {
        self.is_preserved(e).then(|| e.clone())
    }

    /// The ABI total order on parameter locations: registers (by number) before
    /// stack locations (by ascending offset), everything else last in structural
    /// order.
    #[must_use]
    pub fn argument_compare(&self, a: &Exp, b: &Exp) -> Ordering {
        rank_of(a, self.stack_register).cmp(&rank_of(b, self.stack_register))
    }

    /// Returns `true` when `e` matches the stack-local/parameter pattern
    /// `m[sp ± K]` (with the stack pointer possibly subscripted).
    #[must_use]
    pub fn is_stack_local_pattern(&self, e: &Exp) -> bool {
        self.stack_offset(e).is_some()
    }

    /// The byte offset from the entry stack pointer when `e` matches `m[sp ± K]`.
    #[must_use]
    pub fn stack_offset(&self, e: &Exp) -> Option<i64> {
        let addr = match e {
            Exp::MemOf(addr) => addr.as_ref(),
            Exp::Ref(base, _) => {
                return self.stack_offset(base);
            }
            _ => return None,
        };
        let is_sp = |x: &Exp| match x {
            Exp::Reg(r) => *r == self.stack_register,
            Exp::Ref(base, _) => matches!(base.as_ref(), Exp::Reg(r) if *r == self.stack_register),
            _ => false,
        };
        match addr {
            x if is_sp(x) => Some(0),
            Exp::Binary(BinaryOp::Add, x, k) if is_sp(x) => k.int_value(),
            Exp::Binary(BinaryOp::Sub, x, k) if is_sp(x) => k.int_value().map(i64::wrapping_neg),
            _ => None,
        }
    }
}

/// Orders parameter locations: (class, key) where registers rank before memory.
fn rank_of(e: &Exp, sp: u16) -> (u8, i64) {
    match e {
        Exp::Reg(r) => (0, i64::from(*r)),
        Exp::Ref(base, _) => rank_of(base, sp),
        Exp::MemOf(addr) => {
            let off = match addr.as_ref() {
                Exp::Binary(BinaryOp::Add, _, k) => k.int_value().unwrap_or(i64::MAX),
                Exp::Binary(BinaryOp::Sub, _, k) => {
                    k.int_value().map_or(i64::MAX, i64::wrapping_neg)
                }
                _ => 0,
            };
            (1, off)
        }
        _ => (2, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_param(off: i64) -> Exp {
        Exp::mem_of(Exp::binary(
            BinaryOp::Add,
            Exp::subscript(Exp::reg(28), None),
            Exp::int(off),
        ))
    }

    #[test]
    fn test_parameter_insertion_keeps_abi_order() {
        let mut sig = Signature::new("f", 28);
        sig.add_parameter(stack_param(8), Type::int(32));
        sig.add_parameter(Exp::reg(9), Type::int(32));
        sig.add_parameter(stack_param(4), Type::int(32));
        sig.add_parameter(Exp::reg(8), Type::int(32));
        let order: Vec<Exp> = sig.params.iter().map(|p| p.exp.clone()).collect();
        assert_eq!(
            order,
            vec![Exp::reg(8), Exp::reg(9), stack_param(4), stack_param(8)]
        );
        // Names are positional at creation time
        assert!(sig.params.iter().all(|p| p.name.starts_with("param")));
    }

    #[test]
    fn test_duplicate_parameter_ignored() {
        let mut sig = Signature::new("f", 28);
        sig.add_parameter(Exp::reg(8), Type::int(32));
        sig.add_parameter(Exp::reg(8), Type::Char);
        assert_eq!(sig.params.len(), 1);
    }

    #[test]
    fn test_stack_local_pattern() {
        let sig = Signature::new("f", 28);
        assert_eq!(sig.stack_offset(&stack_param(4)), Some(4));
        let neg = Exp::mem_of(Exp::binary(
            BinaryOp::Sub,
            Exp::subscript(Exp::reg(28), None),
            Exp::int(8),
        ));
        assert_eq!(sig.stack_offset(&neg), Some(-8));
        assert_eq!(sig.stack_offset(&Exp::reg(8)), None);
        // A subscripted memof still matches
        assert_eq!(
            sig.stack_offset(&Exp::subscript(stack_param(4), None)),
            Some(4)
        );
    }

    #[test]
    fn test_preserved_proves_identity() {
        let mut sig = Signature::new("strlen", 28);
        sig.preserved.push(Exp::reg(28));
        assert_eq!(sig.proven_for(&Exp::reg(28)), Some(Exp::reg(28)));
        assert_eq!(sig.proven_for(&Exp::reg(24)), None);
    }
}
