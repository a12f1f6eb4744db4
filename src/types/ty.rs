//! The type algebra.
//!
//! [`Type`] is a tagged sum over every type the analysis can infer. Types form a
//! lattice with [`Type::Void`] as top; unions are the join for otherwise-incompatible
//! types (the meet operator lives in [`super::meet`]). Equality, ordering and hashing
//! are structural so types can key maps and live inside expressions.
//!
//! # Signedness
//!
//! Integer signedness is tracked as a signed *counter*, not a flag: every piece of
//! evidence for signed use increments it, every piece for unsigned use decrements it,
//! and zero means unknown. Two integer types are *equivalent* when their sizes match
//! and their counters agree in sign, even if the raw counters differ; use
//! [`Type::equivalent`] for lattice-level comparisons and `==` only for structural
//! identity.
//!
//! # Named types
//!
//! [`Type::Named`] resolves through the process-wide [registry](super::registry).
//! Names beginning with `alpha` are wildcard types produced for pointers whose
//! pointee is not yet known.

use std::fmt;

use crate::types::registry;

/// The width in bits of a machine word (and therefore of pointers).
pub const STD_SIZE: u64 = 32;

/// A named member of a compound (struct) type.
///
/// Compound layouts are packed: a member's offset is the sum of the sizes of the
/// members before it. Accessors report offsets in bits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompoundMember {
    /// Member name.
    pub name: String,
    /// Member type.
    pub ty: Type,
}

/// A named member of a union type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnionMember {
    /// Member name (`x0`, `x1`, ... when synthesized by the meet operator).
    pub name: String,
    /// Member type.
    pub ty: Type,
}

/// The type-level view of a procedure signature.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncSig {
    /// Procedure name, if known.
    pub name: String,
    /// Parameter types in order.
    pub params: Vec<Type>,
    /// Return type.
    pub ret: Type,
}

/// A type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    /// Top of the lattice: no information.
    Void,
    /// Integer of `size` bits with a signedness evidence counter (positive = signed,
    /// negative = unsigned, zero = unknown).
    Integer {
        /// Width in bits (0 = unknown).
        size: u64,
        /// Signedness evidence counter.
        sign: i32,
    },
    /// IEEE-754 floating point of `size` bits.
    Float {
        /// Width in bits.
        size: u64,
    },
    /// Boolean.
    Boolean,
    /// 8-bit character.
    Char,
    /// Pointer to the base type.
    Pointer(Box<Type>),
    /// Array of `base`; `length` of `None` means unbounded.
    Array {
        /// Element type.
        base: Box<Type>,
        /// Element count, or `None` when unbounded.
        length: Option<u64>,
    },
    /// Structure with packed members; `generic` compounds grow members on demand as
    /// offsets are discovered.
    Compound {
        /// Ordered members.
        members: Vec<CompoundMember>,
        /// Whether members may still be discovered.
        generic: bool,
    },
    /// Union of alternatives.
    Union {
        /// Members in insertion order.
        members: Vec<UnionMember>,
    },
    /// Procedure type.
    Func(Box<FuncSig>),
    /// A name resolving through the process-wide registry.
    Named(String),
    /// Size-only knowledge: `bits` wide, broad type unknown.
    Size {
        /// Width in bits.
        bits: u64,
    },
    /// The upper half of a split value (e.g. the high word of a 64-bit multiply).
    Upper(Box<Type>),
    /// The lower half of a split value.
    Lower(Box<Type>),
}

impl Type {
    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Integer of unknown signedness.
    #[must_use]
    pub const fn int(size: u64) -> Self {
        Self::Integer { size, sign: 0 }
    }

    /// Signed integer.
    #[must_use]
    pub const fn signed_int(size: u64) -> Self {
        Self::Integer { size, sign: 1 }
    }

    /// Unsigned integer.
    #[must_use]
    pub const fn unsigned_int(size: u64) -> Self {
        Self::Integer { size, sign: -1 }
    }

    /// Integer-like type of the given size and signedness: 1-bit becomes boolean,
    /// 8-bit unsigned-or-unknown becomes char.
    #[must_use]
    pub const fn integer_like(size: u64, sign: i32) -> Self {
        match size {
            1 => Self::Boolean,
            8 if sign <= 0 => Self::Char,
            _ => Self::Integer { size, sign },
        }
    }

    /// Float of the given width.
    #[must_use]
    pub const fn float(size: u64) -> Self {
        Self::Float { size }
    }

    /// Pointer to `base`.
    #[must_use]
    pub fn pointer(base: Type) -> Self {
        Self::Pointer(Box::new(base))
    }

    /// Bounded array.
    #[must_use]
    pub fn array(base: Type, length: u64) -> Self {
        Self::Array {
            base: Box::new(base),
            length: Some(length),
        }
    }

    /// Unbounded array.
    #[must_use]
    pub fn unbounded_array(base: Type) -> Self {
        Self::Array {
            base: Box::new(base),
            length: None,
        }
    }

    /// Generic compound with no members yet.
    #[must_use]
    pub const fn generic_compound() -> Self {
        Self::Compound {
            members: Vec::new(),
            generic: true,
        }
    }

    /// Named type.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Size-only type.
    #[must_use]
    pub const fn size(bits: u64) -> Self {
        Self::Size { bits }
    }

    // ------------------------------------------------------------------
    // Resolution and classification
    // ------------------------------------------------------------------

    /// Resolves [`Type::Named`] through the registry, transitively. Returns a clone
    /// of the resolved type; unresolvable names resolve to themselves.
    #[must_use]
    pub fn resolved(&self) -> Type {
        let mut cur = self.clone();
        let mut guard = 0;
        while let Self::Named(name) = &cur {
            match registry::resolve(name) {
                Some(next) => cur = next,
                None => break,
            }
            guard += 1;
            if guard > 32 {
                break;
            }
        }
        cur
    }

    /// Returns `true` if this (after name resolution) is `Void`.
    #[must_use]
    pub fn resolves_to_void(&self) -> bool {
        matches!(self.resolved(), Self::Void)
    }

    /// Returns `true` if this (after name resolution) is an integer.
    #[must_use]
    pub fn resolves_to_integer(&self) -> bool {
        matches!(self.resolved(), Self::Integer { .. })
    }

    /// Returns `true` if this (after name resolution) is a float.
    #[must_use]
    pub fn resolves_to_float(&self) -> bool {
        matches!(self.resolved(), Self::Float { .. })
    }

    /// Returns `true` if this (after name resolution) is a pointer.
    #[must_use]
    pub fn resolves_to_pointer(&self) -> bool {
        matches!(self.resolved(), Self::Pointer(_))
    }

    /// Returns `true` if this (after name resolution) is an array.
    #[must_use]
    pub fn resolves_to_array(&self) -> bool {
        matches!(self.resolved(), Self::Array { .. })
    }

    /// Returns `true` if this (after name resolution) is a compound.
    #[must_use]
    pub fn resolves_to_compound(&self) -> bool {
        matches!(self.resolved(), Self::Compound { .. })
    }

    /// Returns `true` if this (after name resolution) is a union.
    #[must_use]
    pub fn resolves_to_union(&self) -> bool {
        matches!(self.resolved(), Self::Union { .. })
    }

    /// Returns `true` if this (after name resolution) is size-only.
    #[must_use]
    pub fn resolves_to_size(&self) -> bool {
        matches!(self.resolved(), Self::Size { .. })
    }

    /// Returns `true` if this (after name resolution) is `Char`.
    #[must_use]
    pub fn resolves_to_char(&self) -> bool {
        matches!(self.resolved(), Self::Char)
    }

    /// Returns `true` for the pointee wildcard: a named type whose name starts with
    /// `alpha`.
    #[must_use]
    pub fn is_alpha(&self) -> bool {
        matches!(self, Self::Named(n) if n.starts_with("alpha"))
    }

    /// Returns `true` when the type carries more than size-only knowledge.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !matches!(self, Self::Void | Self::Size { .. })
    }

    /// The pointee of a pointer, dereferencing through unions of pointers; `Void`
    /// when not dereferenceable.
    #[must_use]
    pub fn dereference(&self) -> Type {
        match self.resolved() {
            Self::Pointer(base) => *base,
            Self::Union { members } => {
                let mut out = Vec::new();
                for m in members {
                    let elem = m.ty.dereference();
                    if matches!(elem, Self::Void) {
                        return Self::Void;
                    }
                    out.push(UnionMember {
                        name: format!("x{}", out.len()),
                        ty: elem,
                    });
                }
                Self::Union { members: out }
            }
            _ => Self::Void,
        }
    }

    // ------------------------------------------------------------------
    // Sizes
    // ------------------------------------------------------------------

    /// Size in bits. Unbounded arrays saturate to `u64::MAX`; unknown sizes are 0.
    #[must_use]
    pub fn size_bits(&self) -> u64 {
        match self {
            Self::Void | Self::Func(_) => 0,
            Self::Integer { size, .. } | Self::Float { size } | Self::Size { bits: size } => *size,
            Self::Boolean => 1,
            Self::Char => 8,
            Self::Pointer(_) => STD_SIZE,
            Self::Array { base, length } => match length {
                Some(n) => base.size_bits().saturating_mul(*n),
                None => u64::MAX,
            },
            Self::Compound { members, .. } => members.iter().map(|m| m.ty.size_bits()).sum(),
            Self::Union { members } => members.iter().map(|m| m.ty.size_bits()).max().unwrap_or(0),
            Self::Named(_) => {
                let r = self.resolved();
                if matches!(r, Self::Named(_)) {
                    0
                } else {
                    r.size_bits()
                }
            }
            Self::Upper(base) | Self::Lower(base) => base.size_bits() / 2,
        }
    }

    /// Size in whole bytes, rounding up. Unbounded arrays saturate.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        let bits = self.size_bits();
        if bits == u64::MAX {
            u64::MAX
        } else {
            (bits + 7) / 8
        }
    }

    /// Widens the stored size in place where the representation allows it.
    pub fn set_size(&mut self, new_bits: u64) {
        match self {
            Self::Integer { size, .. } | Self::Float { size } | Self::Size { bits: size } => {
                *size = new_bits;
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Compound accessors (offsets in bits)
    // ------------------------------------------------------------------

    /// The member type covering the given bit offset of a compound.
    #[must_use]
    pub fn type_at_offset(&self, bit_offset: u64) -> Option<&Type> {
        if let Self::Compound { members, .. } = self {
            let mut off = 0;
            for m in members {
                let sz = m.ty.size_bits();
                if bit_offset < off + sz {
                    return Some(&m.ty);
                }
                off += sz;
            }
        }
        None
    }

    /// The member name covering the given bit offset of a compound.
    #[must_use]
    pub fn name_at_offset(&self, bit_offset: u64) -> Option<&str> {
        if let Self::Compound { members, .. } = self {
            let mut off = 0;
            for m in members {
                let sz = m.ty.size_bits();
                if bit_offset < off + sz {
                    return Some(&m.name);
                }
                off += sz;
            }
        }
        None
    }

    /// Replaces the member type covering the given bit offset of a compound.
    pub fn set_type_at_offset(&mut self, bit_offset: u64, ty: Type) {
        if let Self::Compound { members, .. } = self {
            let mut off = 0;
            for m in members.iter_mut() {
                let sz = m.ty.size_bits();
                if bit_offset < off + sz {
                    m.ty = ty;
                    return;
                }
                off += sz;
            }
        }
    }

    /// How many bits into its covering member the given compound offset lands.
    #[must_use]
    pub fn offset_remainder(&self, bit_offset: u64) -> u64 {
        if let Self::Compound { members, .. } = self {
            let mut off = 0;
            for m in members {
                let sz = m.ty.size_bits();
                if bit_offset < off + sz {
                    return bit_offset - off;
                }
                off += sz;
            }
        }
        bit_offset
    }

    /// Ensures a generic compound has a member of type `ty` at the given bit offset,
    /// meeting with any member already there. Pads with size-only filler as needed.
    /// Sets `ch` when the compound changed.
    pub fn update_generic_member(&mut self, bit_offset: u64, ty: &Type, ch: &mut bool) {
        let Self::Compound { members, generic } = self else {
            return;
        };
        if !*generic {
            return;
        }
        let mut off = 0;
        for m in members.iter_mut() {
            let sz = m.ty.size_bits();
            if bit_offset < off + sz {
                let met = m.ty.meet_with(ty, ch, false);
                if met != m.ty {
                    *ch = true;
                    m.ty = met;
                }
                return;
            }
            off += sz;
        }
        if bit_offset > off {
            members.push(CompoundMember {
                name: format!("pad{off}"),
                ty: Type::size(bit_offset - off),
            });
        }
        members.push(CompoundMember {
            name: format!("member{bit_offset}"),
            ty: ty.clone(),
        });
        *ch = true;
    }

    // ------------------------------------------------------------------
    // Structure relations
    // ------------------------------------------------------------------

    /// Returns `true` if `self` is a super-structure of `other`: the same member
    /// types at the same offsets, with `self` at least as long.
    #[must_use]
    pub fn is_super_struct_of(&self, other: &Type) -> bool {
        let (Self::Compound { members: a, .. }, Self::Compound { members: b, .. }) = (self, other)
        else {
            return false;
        };
        if a.len() < b.len() {
            return false;
        }
        a.iter().zip(b.iter()).all(|(x, y)| x.ty == y.ty)
    }

    /// Returns `true` if `self` is `Void`, equal to `other`, or a sub-structure of it.
    #[must_use]
    pub fn is_sub_type_or_equal(&self, other: &Type) -> bool {
        if self.resolves_to_void() || self == other {
            return true;
        }
        if self.resolves_to_compound() && other.resolves_to_compound() {
            return other.is_super_struct_of(self);
        }
        false
    }

    /// Lattice-level equivalence: structural equality modulo the magnitude of integer
    /// signedness counters (only their sign matters).
    #[must_use]
    pub fn equivalent(&self, other: &Type) -> bool {
        match (self, other) {
            (Self::Integer { size: s1, sign: g1 }, Self::Integer { size: s2, sign: g2 }) => {
                s1 == s2 && g1.signum() == g2.signum()
            }
            (Self::Pointer(a), Self::Pointer(b)) => a.equivalent(b),
            (
                Self::Array {
                    base: a,
                    length: l1,
                },
                Self::Array {
                    base: b,
                    length: l2,
                },
            ) => l1 == l2 && a.equivalent(b),
            (Self::Upper(a), Self::Upper(b)) | (Self::Lower(a), Self::Lower(b)) => a.equivalent(b),
            (
                Self::Compound {
                    members: a,
                    generic: g1,
                },
                Self::Compound {
                    members: b,
                    generic: g2,
                },
            ) => {
                g1 == g2
                    && a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| x.ty.equivalent(&y.ty))
            }
            (Self::Union { members: a }, Self::Union { members: b }) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.ty.equivalent(&y.ty))
            }
            _ => self == other,
        }
    }

    // ------------------------------------------------------------------
    // C-style descriptions
    // ------------------------------------------------------------------

    /// A C-style description of this type. Used for diagnostics and as the union
    /// quality measure (shorter descriptions are preferred).
    #[must_use]
    pub fn ctype(&self) -> String {
        match self {
            Self::Void => "void".to_string(),
            Self::Integer { size, sign } => {
                let base = match size {
                    0 => "int".to_string(),
                    8 => "char".to_string(),
                    16 => "short".to_string(),
                    32 => "int".to_string(),
                    64 => "long long".to_string(),
                    n => format!("int{n}"),
                };
                if *sign < 0 {
                    format!("unsigned {base}")
                } else {
                    base
                }
            }
            Self::Float { size } => match size {
                32 => "float".to_string(),
                64 => "double".to_string(),
                n => format!("float{n}"),
            },
            Self::Boolean => "bool".to_string(),
            Self::Char => "char".to_string(),
            Self::Pointer(base) => format!("{} *", base.ctype()),
            Self::Array { base, length } => match length {
                Some(n) => format!("{}[{n}]", base.ctype()),
                None => format!("{}[]", base.ctype()),
            },
            Self::Compound { members, .. } => {
                let mut s = String::from("struct { ");
                for m in members {
                    s.push_str(&format!("{} {}; ", m.ty.ctype(), m.name));
                }
                s.push('}');
                s
            }
            Self::Union { members } => {
                let mut s = String::from("union { ");
                for m in members {
                    s.push_str(&format!("{} {}; ", m.ty.ctype(), m.name));
                }
                s.push('}');
                s
            }
            Self::Func(sig) => format!("{} (*)({})", sig.ret.ctype(), sig.params.len()),
            Self::Named(n) => n.clone(),
            Self::Size { bits } => format!("__size{bits}"),
            Self::Upper(base) => format!("/*upper*/ {}", base.ctype()),
            Self::Lower(base) => format!("/*lower*/ {}", base.ctype()),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ctype())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(Type::int(32).size_bits(), 32);
        assert_eq!(Type::int(32).size_bytes(), 4);
        assert_eq!(Type::Boolean.size_bits(), 1);
        assert_eq!(Type::Boolean.size_bytes(), 1);
        assert_eq!(Type::Char.size_bits(), 8);
        assert_eq!(Type::pointer(Type::Void).size_bits(), STD_SIZE);
        assert_eq!(Type::array(Type::int(32), 10).size_bytes(), 40);
        assert_eq!(Type::unbounded_array(Type::int(32)).size_bits(), u64::MAX);
    }

    #[test]
    fn test_integer_like() {
        assert_eq!(Type::integer_like(1, 0), Type::Boolean);
        assert_eq!(Type::integer_like(8, -1), Type::Char);
        assert_eq!(Type::integer_like(8, 1), Type::Integer { size: 8, sign: 1 });
        assert_eq!(Type::integer_like(32, 1), Type::signed_int(32));
    }

    #[test]
    fn test_equivalent_ignores_sign_magnitude() {
        let a = Type::Integer { size: 32, sign: 1 };
        let b = Type::Integer { size: 32, sign: 3 };
        let c = Type::Integer { size: 32, sign: -2 };
        assert!(a.equivalent(&b));
        assert!(!a.equivalent(&c));
        assert_ne!(a, b); // structural equality still distinguishes them
        assert!(Type::pointer(a.clone()).equivalent(&Type::pointer(b)));
    }

    #[test]
    fn test_compound_offsets() {
        let c = Type::Compound {
            members: vec![
                CompoundMember {
                    name: "a".into(),
                    ty: Type::int(32),
                },
                CompoundMember {
                    name: "b".into(),
                    ty: Type::int(16),
                },
            ],
            generic: false,
        };
        assert_eq!(c.type_at_offset(0), Some(&Type::int(32)));
        assert_eq!(c.type_at_offset(31), Some(&Type::int(32)));
        assert_eq!(c.type_at_offset(32), Some(&Type::int(16)));
        assert_eq!(c.name_at_offset(32), Some("b"));
        assert_eq!(c.type_at_offset(48), None);
        assert_eq!(c.offset_remainder(40), 8);
    }

    #[test]
    fn test_update_generic_member() {
        let mut c = Type::generic_compound();
        let mut ch = false;
        c.update_generic_member(0, &Type::int(32), &mut ch);
        assert!(ch);
        assert_eq!(c.type_at_offset(0), Some(&Type::int(32)));

        // Member at offset 64 gets padding inserted
        ch = false;
        c.update_generic_member(64, &Type::pointer(Type::Char), &mut ch);
        assert!(ch);
        assert_eq!(c.type_at_offset(64), Some(&Type::pointer(Type::Char)));
        assert_eq!(c.type_at_offset(32), Some(&Type::size(32)));
    }

    #[test]
    fn test_super_struct() {
        let small = Type::Compound {
            members: vec![CompoundMember {
                name: "a".into(),
                ty: Type::int(32),
            }],
            generic: false,
        };
        let big = Type::Compound {
            members: vec![
                CompoundMember {
                    name: "a".into(),
                    ty: Type::int(32),
                },
                CompoundMember {
                    name: "b".into(),
                    ty: Type::Char,
                },
            ],
            generic: false,
        };
        assert!(big.is_super_struct_of(&small));
        assert!(!small.is_super_struct_of(&big));
        assert!(small.is_sub_type_or_equal(&big));
    }

    #[test]
    fn test_ctype() {
        assert_eq!(Type::int(32).ctype(), "int");
        assert_eq!(Type::unsigned_int(16).ctype(), "unsigned short");
        assert_eq!(Type::float(64).ctype(), "double");
        assert_eq!(Type::pointer(Type::Char).ctype(), "char *");
        assert_eq!(Type::array(Type::int(32), 4).ctype(), "int[4]");
    }

    #[test]
    fn test_alpha() {
        assert!(Type::named("alpha3").is_alpha());
        assert!(!Type::named("FILE").is_alpha());
    }

    #[test]
    fn test_dereference() {
        assert_eq!(Type::pointer(Type::Char).dereference(), Type::Char);
        assert_eq!(Type::int(32).dereference(), Type::Void);
    }
}
