//! The meet operator over the type lattice.
//!
//! `meet` returns the most informative type compatible with both operands. `Void` is
//! the identity; types with no common refinement join into a union. The operator is
//! commutative and idempotent up to [`Type::equivalent`] (integer signedness counters
//! may drift in magnitude without constituting a change).
//!
//! The change flag passed to [`Type::meet_with`] is set whenever the result is not
//! equivalent to the receiver; the data-flow type analyzer iterates until no statement
//! reports a change.
//!
//! [`Type::is_compatible_with`] is the weaker predicate guarding meets: it holds
//! exactly when a meet would not have to produce a union.

use log::warn;

use crate::types::{Type, UnionMember, STD_SIZE};

impl Type {
    /// Computes the meet of `self` and `other`.
    ///
    /// Sets `ch` when the result is not equivalent to `self`. With `highest_ptr` set,
    /// a meet of two pointers returns a pointer to a common supertype instead of
    /// recursing into the bases; assignments use this for their left-hand side, which
    /// may legitimately hold the more general of the two types.
    #[must_use]
    pub fn meet_with(&self, other: &Type, ch: &mut bool, highest_ptr: bool) -> Type {
        let result = self.meet_inner(other, highest_ptr);
        if !result.equivalent(self) {
            *ch = true;
        }
        result
    }

    fn meet_inner(&self, other: &Type, highest_ptr: bool) -> Type {
        // Resolve a named receiver first; keep the name when the meet leaves the
        // resolved type unchanged.
        if let Self::Named(_) = self {
            let resolved = self.resolved();
            if !matches!(resolved, Self::Named(_)) {
                let mut ch = false;
                let ret = resolved.meet_with(other, &mut ch, highest_ptr);
                if ret.equivalent(&resolved) {
                    return self.clone();
                }
                return ret;
            }
            if other.resolves_to_void() || self == other {
                return self.clone();
            }
            return self.create_union(other, highest_ptr);
        }

        match self {
            Self::Void => other.clone(),

            Self::Func(_) => {
                if other.resolves_to_void() || self == other {
                    self.clone()
                } else {
                    self.create_union(other, highest_ptr)
                }
            }

            Self::Integer { size, sign } => {
                let r = other.resolved();
                match r {
                    Self::Void => self.clone(),
                    Self::Integer {
                        size: s2,
                        sign: g2,
                    } => Self::Integer {
                        size: (*size).max(s2),
                        sign: sign + g2.signum(),
                    },
                    // Char merges into integer from either side
                    Self::Char => Self::Integer {
                        size: (*size).max(8),
                        sign: *sign,
                    },
                    Self::Size { bits } => {
                        if *size != 0 && *size != bits {
                            warn!("integer size {size} meet with size type {bits}");
                        }
                        Self::Integer {
                            size: (*size).max(bits),
                            sign: *sign,
                        }
                    }
                    _ => self.create_union(other, highest_ptr),
                }
            }

            Self::Float { size } => {
                let r = other.resolved();
                match r {
                    Self::Void => self.clone(),
                    Self::Float { size: s2 } => Self::Float {
                        size: (*size).max(s2),
                    },
                    Self::Size { bits } => Self::Float {
                        size: (*size).max(bits),
                    },
                    _ => self.create_union(other, highest_ptr),
                }
            }

            Self::Boolean => {
                if other.resolves_to_void() || matches!(other.resolved(), Self::Boolean) {
                    self.clone()
                } else {
                    self.create_union(other, highest_ptr)
                }
            }

            Self::Char => {
                let r = other.resolved();
                match r {
                    Self::Void | Self::Char => self.clone(),
                    // char yields to integer
                    Self::Integer { .. } => r,
                    Self::Size { bits: 8 } => self.clone(),
                    _ => self.create_union(other, highest_ptr),
                }
            }

            Self::Pointer(base) => self.meet_pointer(base, other, highest_ptr),

            Self::Array { base, length } => self.meet_array(base, *length, other, highest_ptr),

            Self::Compound { members, .. } => {
                let r = other.resolved();
                match &r {
                    Self::Void => self.clone(),
                    Self::Compound { .. } => {
                        if r.is_super_struct_of(self) {
                            // The other structure covers all of ours; keep its names
                            return r;
                        }
                        if self.is_super_struct_of(&r) || self == &r {
                            return self.clone();
                        }
                        self.create_union(other, highest_ptr)
                    }
                    _ => {
                        // struct meet first element = struct
                        if members
                            .first()
                            .is_some_and(|m| m.ty.is_compatible_with(&r))
                        {
                            self.clone()
                        } else {
                            self.create_union(other, highest_ptr)
                        }
                    }
                }
            }

            Self::Union { members } => self.meet_union(members, other, highest_ptr),

            Self::Size { bits } => {
                let r = other.resolved();
                match r {
                    Self::Void => self.clone(),
                    Self::Size { bits: b2 } => {
                        if b2 != *bits {
                            warn!("size {bits} meet with size {b2}");
                        }
                        Self::Size {
                            bits: (*bits).max(b2),
                        }
                    }
                    Self::Integer { .. } | Self::Float { .. } | Self::Pointer(_) => {
                        let mut r = r;
                        if r.size_bits() == 0 {
                            r.set_size(*bits);
                        } else if r.size_bits() != *bits {
                            warn!(
                                "size {bits} meet with {}; allowing temporarily",
                                r.ctype()
                            );
                        }
                        r
                    }
                    _ => self.create_union(other, highest_ptr),
                }
            }

            Self::Upper(base) => {
                let r = other.resolved();
                match r {
                    Self::Void => self.clone(),
                    Self::Upper(b2) => {
                        let mut ch = false;
                        Self::Upper(Box::new(base.meet_with(&b2, &mut ch, highest_ptr)))
                    }
                    _ => self.create_union(other, highest_ptr),
                }
            }

            Self::Lower(base) => {
                let r = other.resolved();
                match r {
                    Self::Void => self.clone(),
                    Self::Lower(b2) => {
                        let mut ch = false;
                        Self::Lower(Box::new(base.meet_with(&b2, &mut ch, highest_ptr)))
                    }
                    _ => self.create_union(other, highest_ptr),
                }
            }

            Self::Named(_) => unreachable!("handled above"),
        }
    }

    fn meet_pointer(&self, base: &Type, other: &Type, highest_ptr: bool) -> Type {
        let r = other.resolved();
        match &r {
            Self::Void => self.clone(),
            Self::Size { bits } if *bits == STD_SIZE => self.clone(),
            Self::Pointer(obase) => {
                let self_alpha = base.is_alpha();
                let other_alpha = obase.is_alpha();
                if self_alpha && !other_alpha {
                    // Promote the wildcard pointee to the concrete one. A pointer can
                    // never point to itself; collapse that to void *.
                    if obase.as_ref() == self {
                        return Self::pointer(Self::Void);
                    }
                    return r.clone();
                }
                if other_alpha {
                    return self.clone();
                }
                if highest_ptr {
                    // The greatest of the two base types
                    if base.is_sub_type_or_equal(obase) {
                        return r.clone();
                    }
                    if obase.is_sub_type_or_equal(base) {
                        return self.clone();
                    }
                    return Self::pointer(Self::Void);
                }
                if base == obase.as_ref() {
                    return self.clone();
                }
                if obase.resolves_to_pointer() && self.pointer_depth() == r.pointer_depth() {
                    let own_final = self.final_points_to();
                    let other_final = r.final_points_to();
                    if own_final.resolves_to_void() {
                        return r.clone();
                    }
                    if other_final.resolves_to_void() || own_final == other_final {
                        return self.clone();
                    }
                }
                if base.is_compatible_with(obase) {
                    let mut ch = false;
                    return Self::pointer(base.meet_with(obase, &mut ch, highest_ptr));
                }
                self.create_union(other, highest_ptr)
            }
            _ => self.create_union(other, highest_ptr),
        }
    }

    fn meet_array(
        &self,
        base: &Type,
        length: Option<u64>,
        other: &Type,
        highest_ptr: bool,
    ) -> Type {
        let r = other.resolved();
        match &r {
            Self::Void => self.clone(),
            Self::Array {
                base: obase,
                length: olength,
            } => {
                let mut ch = false;
                let new_base = base.meet_with(obase, &mut ch, highest_ptr);
                let mut new_length = length;
                if &new_base != base {
                    new_length = convert_length(length, base, &new_base);
                }
                // Bounded beats unbounded; smaller bound wins
                new_length = match (new_length, olength) {
                    (Some(a), Some(b)) => Some(a.min(*b)),
                    (None, Some(b)) => Some(*b),
                    (l, None) => l,
                };
                Self::Array {
                    base: Box::new(new_base),
                    length: new_length,
                }
            }
            _ => {
                if base == &r {
                    return self.clone();
                }
                if self.is_compatible(&r, false) {
                    // Complete element types win over size-only knowledge
                    if base.is_complete() && !r.is_complete() {
                        return self.clone();
                    }
                    if base.size_bits() == r.size_bits()
                        && !matches!(base, Self::Size { .. })
                        && matches!(r, Self::Size { .. })
                    {
                        return self.clone();
                    }
                    let mut ch = false;
                    let new_base = base.meet_with(&r, &mut ch, highest_ptr);
                    if &new_base == base {
                        return self.clone();
                    }
                    let new_length = convert_length(length, base, &new_base);
                    return Self::Array {
                        base: Box::new(new_base),
                        length: new_length,
                    };
                }
                self.create_union(other, highest_ptr)
            }
        }
    }

    fn meet_union(&self, members: &[UnionMember], other: &Type, highest_ptr: bool) -> Type {
        let r = other.resolved();
        if matches!(r, Self::Void) {
            return self.clone();
        }
        if let Self::Union {
            members: other_members,
        } = &r
        {
            let mut result = self.clone();
            for m in other_members {
                let mut ch = false;
                result = result.meet_with(&m.ty, &mut ch, highest_ptr);
            }
            return result;
        }

        // Match the other type against each member. A member whose meet requires no
        // change means the union already covers it. Otherwise the member producing the
        // shortest C-style description wins (quality heuristic); failing everything,
        // append a fresh member.
        let mut best: Option<(usize, Type)> = None;
        for (i, m) in members.iter().enumerate() {
            if !m.ty.is_compatible_with(&r) {
                continue;
            }
            let mut ch = false;
            let met = m.ty.meet_with(&r, &mut ch, highest_ptr);
            if met.equivalent(&m.ty) {
                return self.clone();
            }
            let quality = met.ctype().len();
            if best.as_ref().map_or(true, |(_, b)| quality < b.ctype().len()) {
                best = Some((i, met));
            }
        }
        let mut new_members = members.to_vec();
        if let Some((i, met)) = best {
            new_members[i].ty = met;
        } else {
            new_members.push(UnionMember {
                name: format!("x{}", new_members.len()),
                ty: r,
            });
        }
        Self::Union {
            members: new_members,
        }
    }

    /// Joins `self` and `other` into a union. Called when no meet rule applies; the
    /// degradation is logged since emitted code quality suffers.
    #[must_use]
    pub(crate) fn create_union(&self, other: &Type, highest_ptr: bool) -> Type {
        debug_assert!(!self.resolves_to_union());
        if other.resolves_to_union() {
            // All the union logic lives in one place
            let mut ch = false;
            return other.resolved().meet_with(self, &mut ch, highest_ptr);
        }
        // anytype meet compound-with-compatible-first-element = the compound
        if let Self::Compound { members, .. } = &other.resolved() {
            if members
                .first()
                .is_some_and(|m| m.ty.is_compatible_with(self))
            {
                return other.clone();
            }
        }
        // anytype meet array-of-compatible-element = the array
        if let Self::Array { base, .. } = &other.resolved() {
            if base.is_compatible_with(self) {
                return other.clone();
            }
        }
        warn!(
            "type conflict: union created from {} and {}",
            self.ctype(),
            other.ctype()
        );
        Self::Union {
            members: vec![
                UnionMember {
                    name: "x0".to_string(),
                    ty: self.clone(),
                },
                UnionMember {
                    name: "x1".to_string(),
                    ty: other.clone(),
                },
            ],
        }
    }

    /// Number of pointer levels before a non-pointer pointee.
    #[must_use]
    pub fn pointer_depth(&self) -> u32 {
        match self {
            Self::Pointer(base) => 1 + base.pointer_depth(),
            _ => 0,
        }
    }

    /// The first non-pointer type reached by dereferencing.
    #[must_use]
    pub fn final_points_to(&self) -> &Type {
        match self {
            Self::Pointer(base) => base.final_points_to(),
            other => other,
        }
    }

    // ------------------------------------------------------------------
    // Compatibility
    // ------------------------------------------------------------------

    /// Returns `true` when a meet of `self` and `other` would not produce a union.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Type) -> bool {
        self.compatible_with(other, false)
    }

    /// Compatibility with the `all` refinement: with `all` set, an array or compound
    /// is *not* considered compatible with its own element/first-member type.
    #[must_use]
    pub fn compatible_with(&self, other: &Type, all: bool) -> bool {
        // Container types own the comparison logic
        if other.resolves_to_compound() || other.resolves_to_array() || other.resolves_to_union() {
            return other.resolved().is_compatible(self, all);
        }
        self.is_compatible(other, all)
    }

    fn is_compatible(&self, other: &Type, all: bool) -> bool {
        match self {
            Self::Void => true,

            Self::Size { bits } => {
                let r = other.resolved();
                match r {
                    Self::Void => true,
                    Self::Func(_) => false,
                    Self::Union { .. } => r.is_compatible(self, all),
                    Self::Array { base, .. } => self.compatible_with(&base, all),
                    _ => r.size_bits() == *bits,
                }
            }

            Self::Integer { size, .. } => {
                let r = other.resolved();
                match r {
                    Self::Void | Self::Integer { .. } | Self::Char => true,
                    Self::Union { .. } => r.is_compatible(self, all),
                    Self::Size { bits } => bits == *size,
                    _ => false,
                }
            }

            Self::Float { size } => {
                let r = other.resolved();
                match r {
                    Self::Void | Self::Float { .. } => true,
                    Self::Union { .. } => r.is_compatible(self, all),
                    Self::Array { base, .. } => self.compatible_with(&base, all),
                    Self::Size { bits } => bits == *size,
                    _ => false,
                }
            }

            Self::Char => {
                let r = other.resolved();
                match r {
                    Self::Void | Self::Char | Self::Integer { .. } => true,
                    Self::Size { bits } => bits == 8,
                    Self::Union { .. } => r.is_compatible(self, all),
                    Self::Array { base, .. } => self.compatible_with(&base, all),
                    _ => false,
                }
            }

            Self::Boolean => {
                let r = other.resolved();
                match r {
                    Self::Void | Self::Boolean => true,
                    Self::Union { .. } => r.is_compatible(self, all),
                    Self::Size { bits } => bits == 1,
                    _ => false,
                }
            }

            Self::Func(sig) => {
                let r = other.resolved();
                match r {
                    Self::Void => true,
                    Self::Union { .. } => r.is_compatible(self, all),
                    Self::Size { bits } => bits == STD_SIZE,
                    Self::Func(osig) => *sig == osig,
                    _ => false,
                }
            }

            Self::Pointer(base) => {
                let r = other.resolved();
                match r {
                    Self::Void => true,
                    Self::Union { .. } => r.is_compatible(self, all),
                    Self::Size { bits } => bits == STD_SIZE,
                    Self::Pointer(obase) => base.compatible_with(&obase, all),
                    _ => false,
                }
            }

            Self::Named(name) => {
                if matches!(other, Self::Named(n) if n == name) {
                    return true;
                }
                let resolved = self.resolved();
                if !matches!(resolved, Self::Named(_)) {
                    return resolved.compatible_with(other, all);
                }
                other.resolves_to_void() || self == other
            }

            Self::Array { base, .. } => {
                let r = other.resolved();
                match &r {
                    Self::Void => true,
                    Self::Array { base: obase, .. } => base.compatible_with(obase, all),
                    Self::Union { .. } => r.is_compatible(self, all),
                    // An array of x is compatible with x
                    _ => !all && base.compatible_with(&r, all),
                }
            }

            Self::Union { members } => {
                let r = other.resolved();
                match &r {
                    Self::Void => true,
                    Self::Union {
                        members: other_members,
                    } => {
                        // Compatible when one member set subsumes the other
                        if members.len() < other_members.len() {
                            members.iter().all(|m| r.is_compatible(&m.ty, all))
                        } else {
                            other_members.iter().all(|m| self.is_compatible(&m.ty, all))
                        }
                    }
                    _ => members.iter().any(|m| r.compatible_with(&m.ty, all)),
                }
            }

            Self::Compound { members, .. } => {
                let r = other.resolved();
                match &r {
                    Self::Void => true,
                    Self::Union { .. } => r.is_compatible(self, all),
                    Self::Compound {
                        members: other_members,
                        ..
                    } => {
                        members.len() == other_members.len()
                            && members
                                .iter()
                                .zip(other_members)
                                .all(|(a, b)| a.ty.compatible_with(&b.ty, all))
                    }
                    // A struct is compatible with its first member
                    _ => {
                        !all && members
                            .first()
                            .is_some_and(|m| m.ty.compatible_with(&r, all))
                    }
                }
            }

            Self::Upper(base) => {
                let r = other.resolved();
                match &r {
                    Self::Void => true,
                    Self::Upper(obase) => base.compatible_with(obase, all),
                    Self::Union { .. } => r.is_compatible(self, all),
                    _ => false,
                }
            }

            Self::Lower(base) => {
                let r = other.resolved();
                match &r {
                    Self::Void => true,
                    Self::Lower(obase) => base.compatible_with(obase, all),
                    Self::Union { .. } => r.is_compatible(self, all),
                    _ => false,
                }
            }
        }
    }
}

/// Recomputes an array length so total byte size is preserved when the element type
/// changes width.
fn convert_length(length: Option<u64>, old_base: &Type, new_base: &Type) -> Option<u64> {
    let length = length?;
    let old_bits = old_base.size_bits();
    let new_bits = new_base.size_bits();
    if old_bits == 0 || new_bits == 0 || new_bits == u64::MAX {
        return Some(length);
    }
    Some((length * old_bits) / new_bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CompoundMember;

    fn meet(a: &Type, b: &Type) -> Type {
        let mut ch = false;
        a.meet_with(b, &mut ch, false)
    }

    fn samples() -> Vec<Type> {
        vec![
            Type::Void,
            Type::int(32),
            Type::signed_int(32),
            Type::unsigned_int(16),
            Type::float(64),
            Type::Boolean,
            Type::Char,
            Type::pointer(Type::Char),
            Type::pointer(Type::Void),
            Type::array(Type::int(32), 8),
            Type::size(32),
            Type::size(8),
        ]
    }

    #[test]
    fn test_void_is_identity() {
        for t in samples() {
            assert!(meet(&Type::Void, &t).equivalent(&t), "void ∧ {t}");
            assert!(meet(&t, &Type::Void).equivalent(&t), "{t} ∧ void");
        }
    }

    #[test]
    fn test_meet_idempotent() {
        for t in samples() {
            let mut ch = false;
            let r = t.meet_with(&t, &mut ch, false);
            assert!(r.equivalent(&t), "{t} ∧ {t} = {r}");
            assert!(!ch, "idempotent meet set the change flag for {t}");
        }
    }

    #[test]
    fn test_meet_commutative() {
        for a in samples() {
            for b in samples() {
                let ab = meet(&a, &b);
                let ba = meet(&b, &a);
                assert!(
                    ab.equivalent(&ba),
                    "{a} ∧ {b} = {ab} but {b} ∧ {a} = {ba}"
                );
            }
        }
    }

    #[test]
    fn test_integer_meet_integer() {
        let a = Type::Integer { size: 16, sign: 1 };
        let b = Type::Integer { size: 32, sign: 1 };
        let r = meet(&a, &b);
        assert!(r.equivalent(&Type::signed_int(32)));

        // Conflicting evidence cancels
        let a = Type::Integer { size: 32, sign: 1 };
        let b = Type::Integer { size: 32, sign: -1 };
        let r = meet(&a, &b);
        assert!(matches!(r, Type::Integer { size: 32, sign: 0 }));
    }

    #[test]
    fn test_char_meets_integer() {
        let r = meet(&Type::Char, &Type::int(32));
        assert!(r.resolves_to_integer());
        let r = meet(&Type::Char, &Type::size(8));
        assert_eq!(r, Type::Char);
    }

    #[test]
    fn test_float_widens() {
        let r = meet(&Type::float(32), &Type::float(64));
        assert_eq!(r, Type::float(64));
        let r = meet(&Type::float(32), &Type::size(64));
        assert_eq!(r, Type::float(64));
    }

    #[test]
    fn test_size_adopts_broad_type() {
        let r = meet(&Type::size(32), &Type::int(32));
        assert!(r.resolves_to_integer());
        let mut ch = false;
        let r = Type::size(32).meet_with(&Type::Integer { size: 0, sign: 0 }, &mut ch, false);
        assert_eq!(r.size_bits(), 32);
        assert!(ch);
    }

    #[test]
    fn test_pointer_alpha_promotion() {
        let wild = Type::pointer(Type::named("alpha0"));
        let concrete = Type::pointer(Type::Char);
        let r = meet(&wild, &concrete);
        assert_eq!(r, concrete);
        let r = meet(&concrete, &wild);
        assert_eq!(r, concrete);
    }

    #[test]
    fn test_pointer_bases_meet() {
        let a = Type::pointer(Type::int(32));
        let b = Type::pointer(Type::Integer { size: 32, sign: 1 });
        let r = meet(&a, &b);
        assert!(r.resolves_to_pointer());
    }

    #[test]
    fn test_incompatible_meet_creates_union() {
        let r = meet(&Type::float(64), &Type::pointer(Type::Char));
        assert!(r.resolves_to_union());
        if let Type::Union { members } = &r {
            assert_eq!(members.len(), 2);
            assert_eq!(members[0].name, "x0");
            assert_eq!(members[1].name, "x1");
        }
    }

    #[test]
    fn test_union_absorbs_compatible_member() {
        let u = meet(&Type::float(64), &Type::pointer(Type::Char));
        // Meeting with float again: already covered, unchanged
        let mut ch = false;
        let r = u.meet_with(&Type::float(64), &mut ch, false);
        assert!(r.equivalent(&u));
        assert!(!ch);
    }

    #[test]
    fn test_union_appends_incompatible_member() {
        let u = meet(&Type::float(64), &Type::pointer(Type::Char));
        let mut ch = false;
        let r = u.meet_with(&Type::Boolean, &mut ch, false);
        assert!(ch);
        if let Type::Union { members } = r {
            assert_eq!(members.len(), 3);
            assert_eq!(members[2].name, "x2");
        } else {
            panic!("expected union");
        }
    }

    #[test]
    fn test_array_meets_element() {
        // Arrays subsume their element type
        let arr = Type::array(Type::int(32), 10);
        let r = meet(&arr, &Type::int(32));
        assert!(r.resolves_to_array());
    }

    #[test]
    fn test_array_meet_array_takes_min_length() {
        let a = Type::array(Type::int(32), 10);
        let b = Type::array(Type::int(32), 6);
        let r = meet(&a, &b);
        assert_eq!(r, Type::array(Type::int(32), 6));
    }

    #[test]
    fn test_array_length_preserves_bytes() {
        // 8 x 16-bit meets 32-bit element: same 16 bytes, 4 elements
        let a = Type::array(Type::int(16), 8);
        let b = Type::array(Type::int(32), 8);
        let r = meet(&a, &b);
        if let Type::Array { base, length } = r {
            assert_eq!(base.size_bits(), 32);
            assert_eq!(length, Some(4));
        } else {
            panic!("expected array");
        }
    }

    #[test]
    fn test_compound_super_struct_wins() {
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
        assert_eq!(meet(&small, &big), big);
        assert_eq!(meet(&big, &small), big);
    }

    #[test]
    fn test_meet_monotone_on_chain() {
        // void ⊒ size(32) ⊒ int(32): meeting with char keeps the order
        let top = Type::Void;
        let mid = Type::size(32);
        let c = Type::int(32);
        let mt = meet(&top, &c);
        let mm = meet(&mid, &c);
        // meet with the greater operand is no more constrained than with the lesser
        assert!(mm.size_bits() >= mt.size_bits() || mt.resolves_to_void());
    }

    #[test]
    fn test_compatibility_guards_meet() {
        let pairs = [
            (Type::int(32), Type::Char),
            (Type::float(32), Type::size(32)),
            (Type::pointer(Type::Void), Type::size(32)),
        ];
        for (a, b) in pairs {
            assert!(a.is_compatible_with(&b), "{a} should be compatible with {b}");
            let r = meet(&a, &b);
            assert!(!r.resolves_to_union(), "{a} ∧ {b} produced a union");
        }
        assert!(!Type::float(64).is_compatible_with(&Type::pointer(Type::Char)));
    }
}
