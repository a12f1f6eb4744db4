//! Closed operator enums for the expression algebra.
//!
//! Every operator the lifter can produce is a variant here; analyses match on them
//! exhaustively, so an unhandled operator is a compile-time error rather than a silent
//! fall-through.
//!
//! # Signedness conventions
//!
//! Machine arithmetic carries signedness in the opcode, not the operands, so the IR
//! keeps separate signed/unsigned variants where the distinction is observable:
//! [`BinaryOp::Mul`]/[`BinaryOp::SMul`], [`BinaryOp::Shr`]/[`BinaryOp::Sar`], and the
//! two comparison families. The type analyzer reads signedness evidence off these
//! operators (see `dataflow::typing`).

use std::fmt;

use strum::{EnumCount, EnumIter};

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumCount, EnumIter)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement.
    Not,
    /// Logical (boolean) negation.
    LNot,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Neg => "-",
            Self::Not => "~",
            Self::LNot => "!",
        };
        f.write_str(s)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumCount, EnumIter)]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Unsigned multiply.
    Mul,
    /// Signed multiply.
    SMul,
    /// Unsigned divide.
    Div,
    /// Signed divide.
    SDiv,
    /// Unsigned remainder.
    Mod,
    /// Signed remainder.
    SMod,
    /// Shift left.
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right.
    Sar,
    /// Bitwise and.
    BitAnd,
    /// Bitwise or.
    BitOr,
    /// Bitwise exclusive or.
    BitXor,
    /// Logical (short-circuit) and.
    LogAnd,
    /// Logical (short-circuit) or.
    LogOr,
    /// Equality comparison.
    Eq,
    /// Inequality comparison.
    Ne,
    /// Signed less-than.
    SLt,
    /// Signed greater-than.
    SGt,
    /// Signed less-or-equal.
    SLe,
    /// Signed greater-or-equal.
    SGe,
    /// Unsigned less-than.
    ULt,
    /// Unsigned greater-than.
    UGt,
    /// Unsigned less-or-equal.
    ULe,
    /// Unsigned greater-or-equal.
    UGe,
    /// Structure member access (`s.m`); the right operand is a string constant.
    MemberAccess,
    /// Array indexing (`a[i]`).
    ArrayIndex,
    /// A call to a flag-setting micro-function; appears only in condition-code
    /// assignments emitted by the lifter.
    FlagCall,
}

impl BinaryOp {
    /// Returns `true` for the comparison operators (both signedness families plus
    /// equality).
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::Ne
                | Self::SLt
                | Self::SGt
                | Self::SLe
                | Self::SGe
                | Self::ULt
                | Self::UGt
                | Self::ULe
                | Self::UGe
        )
    }

    /// Returns `true` for the signed comparison operators.
    #[must_use]
    pub const fn is_signed_comparison(self) -> bool {
        matches!(self, Self::SLt | Self::SGt | Self::SLe | Self::SGe)
    }

    /// Returns `true` for the unsigned comparison operators.
    #[must_use]
    pub const fn is_unsigned_comparison(self) -> bool {
        matches!(self, Self::ULt | Self::UGt | Self::ULe | Self::UGe)
    }

    /// Signedness evidence this operator contributes to its integer operands:
    /// `+1` signed, `-1` unsigned, `0` unknown.
    #[must_use]
    pub const fn operand_signedness(self) -> i32 {
        match self {
            Self::SMul | Self::SDiv | Self::SMod | Self::Sar => 1,
            Self::Mul | Self::Div | Self::Mod => -1,
            _ => 0,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::SMul => "*!",
            Self::Div => "/",
            Self::SDiv => "/!",
            Self::Mod => "%",
            Self::SMod => "%!",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Sar => ">>A",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::LogAnd => "&&",
            Self::LogOr => "||",
            Self::Eq => "=",
            Self::Ne => "~=",
            Self::SLt => "<",
            Self::SGt => ">",
            Self::SLe => "<=",
            Self::SGe => ">=",
            Self::ULt => "<u",
            Self::UGt => ">u",
            Self::ULe => "<=u",
            Self::UGe => ">=u",
            Self::MemberAccess => ".",
            Self::ArrayIndex => "[]",
            Self::FlagCall => "flagcall",
        };
        f.write_str(s)
    }
}

/// Ternary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumCount, EnumIter)]
pub enum TernaryOp {
    /// Conditional expression (`c ? a : b`).
    Cond,
    /// Sign extension: `SignExt(from-size, to-size, e)`; sizes are integer constants.
    SignExt,
    /// Zero extension: `ZeroExt(from-size, to-size, e)`.
    ZeroExt,
    /// Floating-point size conversion: `FSize(from-size, to-size, e)`.
    FSize,
}

impl fmt::Display for TernaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cond => "?:",
            Self::SignExt => "sgnex",
            Self::ZeroExt => "zfill",
            Self::FSize => "fsize",
        };
        f.write_str(s)
    }
}

/// Terminal (leaf) expressions that are not constants, registers or locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumCount, EnumIter)]
pub enum Terminal {
    /// The program counter.
    Pc,
    /// The packed condition-code word.
    Flags,
    /// The zero flag.
    ZeroFlag,
    /// The carry flag.
    CarryFlag,
    /// Boolean true.
    True,
    /// Boolean false.
    False,
    /// "Every location": stands in for the define set of a call whose callee has not
    /// been analyzed, and for the `<all> = <all>` preservation query.
    DefineAll,
    /// Wildcard matching any expression (search patterns only).
    Wild,
    /// Wildcard matching any integer constant (search patterns only).
    WildIntConst,
    /// Wildcard matching any string constant (search patterns only).
    WildStrConst,
}

impl Terminal {
    /// Returns `true` if this terminal is a condition-code location (a flag or the
    /// packed flags word).
    #[must_use]
    pub const fn is_flag(self) -> bool {
        matches!(self, Self::Flags | Self::ZeroFlag | Self::CarryFlag)
    }

    /// Returns `true` for the search-pattern wildcards.
    #[must_use]
    pub const fn is_wild(self) -> bool {
        matches!(self, Self::Wild | Self::WildIntConst | Self::WildStrConst)
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pc => "%pc",
            Self::Flags => "%flags",
            Self::ZeroFlag => "%ZF",
            Self::CarryFlag => "%CF",
            Self::True => "true",
            Self::False => "false",
            Self::DefineAll => "<all>",
            Self::Wild => "WILD",
            Self::WildIntConst => "WILDINT",
            Self::WildStrConst => "WILDSTR",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_comparison_predicates() {
        assert!(BinaryOp::SLt.is_comparison());
        assert!(BinaryOp::SLt.is_signed_comparison());
        assert!(!BinaryOp::SLt.is_unsigned_comparison());
        assert!(BinaryOp::UGe.is_unsigned_comparison());
        assert!(BinaryOp::Eq.is_comparison());
        assert!(!BinaryOp::Add.is_comparison());
    }

    #[test]
    fn test_operand_signedness() {
        assert_eq!(BinaryOp::SMul.operand_signedness(), 1);
        assert_eq!(BinaryOp::Sar.operand_signedness(), 1);
        assert_eq!(BinaryOp::Div.operand_signedness(), -1);
        assert_eq!(BinaryOp::BitAnd.operand_signedness(), 0);
        assert_eq!(BinaryOp::Shl.operand_signedness(), 0);
    }

    #[test]
    fn test_every_binary_op_displays() {
        for op in BinaryOp::iter() {
            assert!(!format!("{op}").is_empty());
        }
    }

    #[test]
    fn test_flag_terminals() {
        assert!(Terminal::Flags.is_flag());
        assert!(Terminal::CarryFlag.is_flag());
        assert!(!Terminal::Pc.is_flag());
        assert!(Terminal::WildIntConst.is_wild());
    }
}
