//! The expression algebra.
//!
//! [`Exp`] is a tagged sum covering every expression form the lifter and the analyses
//! produce: constants, registers, memory dereferences, operator applications, named
//! locations and subscripted (SSA) references. Equality, ordering and hashing are
//! structural, which lets expressions serve directly as map keys (symbol maps, location
//! sets, proven-equation maps).
//!
//! # Subscripted references
//!
//! After SSA construction every use of a mutable location is wrapped in [`Exp::Ref`],
//! which pairs the base location with the [`StmtId`] of its defining statement (`None`
//! transiently denotes "no definition reaches here" until implicit assignments are
//! placed). The reference stores an arena index, never a pointer; it stays valid for
//! the life of the owning control-flow graph. After the inverse SSA transform no `Ref`
//! remains anywhere in a procedure.
//!
//! # Traversals
//!
//! Rather than a visitor hierarchy, the algebra exposes two generic traversals:
//! [`Exp::fold`] (bottom-up reduction) and [`Exp::map`] (bottom-up rewrite), plus the
//! simpler [`Exp::for_each`]. Pattern search with wildcard terminals is layered on top
//! of these.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::ir::{BinaryOp, StmtId, Terminal, TernaryOp, UnaryOp};
use crate::types::Type;

/// A constant leaf.
///
/// Floating-point constants compare and hash by bit pattern so that the algebra stays
/// totally ordered.
#[derive(Debug, Clone)]
pub enum Const {
    /// Integer constant (bit pattern; signedness is recovered by type analysis).
    Int(i64),
    /// Floating-point constant.
    Flt(f64),
    /// String constant.
    Str(String),
    /// Native address constant.
    Addr(u64),
}

impl Const {
    const fn rank(&self) -> u8 {
        match self {
            Self::Int(_) => 0,
            Self::Flt(_) => 1,
            Self::Str(_) => 2,
            Self::Addr(_) => 3,
        }
    }
}

impl PartialEq for Const {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Flt(a), Self::Flt(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Addr(a), Self::Addr(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Const {}

impl PartialOrd for Const {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Const {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Flt(a), Self::Flt(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Addr(a), Self::Addr(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Const {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Int(v) => v.hash(state),
            Self::Flt(v) => v.to_bits().hash(state),
            Self::Str(v) => v.hash(state),
            Self::Addr(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Flt(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Addr(v) => write!(f, "{v:#x}"),
        }
    }
}

/// The kind of a named location.
///
/// Named locations appear once symbol mapping has run: stack slots become locals,
/// entry definitions become parameters, data addresses become globals, and lifter
/// scratch values become temporaries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocationKind {
    /// A named local variable of the owning procedure.
    Local(String),
    /// A named parameter of the owning procedure.
    Param(String),
    /// A named global data item.
    Global(String),
    /// A lifter-introduced temporary.
    Temp(String),
}

impl LocationKind {
    /// Returns the symbolic name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Local(n) | Self::Param(n) | Self::Global(n) | Self::Temp(n) => n,
        }
    }
}

/// A set of location expressions, ordered structurally.
pub type LocationSet = BTreeSet<Exp>;

/// An expression.
///
/// See the [module documentation](self) for the overall design. All child links are
/// owned boxes; sharing between statements is by clone, never by alias, so rewriting
/// one statement can never corrupt another.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Exp {
    /// A constant.
    Const(Const),
    /// A terminal (program counter, condition codes, wildcards, ...).
    Terminal(Terminal),
    /// Machine register `n`.
    Reg(u16),
    /// Memory dereference `m[e]`.
    MemOf(Box<Exp>),
    /// Address-of `&e`.
    AddrOf(Box<Exp>),
    /// Unary operator application.
    Unary(UnaryOp, Box<Exp>),
    /// Binary operator application.
    Binary(BinaryOp, Box<Exp>, Box<Exp>),
    /// Ternary operator application.
    Ternary(TernaryOp, Box<Exp>, Box<Exp>, Box<Exp>),
    /// An expression with an explicit type ascription.
    Typed(Type, Box<Exp>),
    /// A named location (local, parameter, global, temporary).
    Location(LocationKind),
    /// A subscripted reference: the base location plus the statement that defines the
    /// value being used. `None` means "no definition" and only occurs before implicit
    /// assignments are placed.
    Ref(Box<Exp>, Option<StmtId>),
}

impl Exp {
    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// Integer constant.
    #[must_use]
    pub const fn int(v: i64) -> Self {
        Self::Const(Const::Int(v))
    }

    /// Address constant.
    #[must_use]
    pub const fn addr(v: u64) -> Self {
        Self::Const(Const::Addr(v))
    }

    /// String constant.
    #[must_use]
    pub fn str(v: impl Into<String>) -> Self {
        Self::Const(Const::Str(v.into()))
    }

    /// Register location `r<n>`.
    #[must_use]
    pub const fn reg(n: u16) -> Self {
        Self::Reg(n)
    }

    /// Memory dereference `m[e]`.
    #[must_use]
    pub fn mem_of(e: Exp) -> Self {
        Self::MemOf(Box::new(e))
    }

    /// Address-of `&e`.
    #[must_use]
    pub fn addr_of(e: Exp) -> Self {
        Self::AddrOf(Box::new(e))
    }

    /// Unary application.
    #[must_use]
    pub fn unary(op: UnaryOp, e: Exp) -> Self {
        Self::Unary(op, Box::new(e))
    }

    /// Binary application.
    #[must_use]
    pub fn binary(op: BinaryOp, lhs: Exp, rhs: Exp) -> Self {
        Self::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Ternary application.
    #[must_use]
    pub fn ternary(op: TernaryOp, a: Exp, b: Exp, c: Exp) -> Self {
        Self::Ternary(op, Box::new(a), Box::new(b), Box::new(c))
    }

    /// Subscripted reference to `base` as defined by `def`.
    #[must_use]
    pub fn subscript(base: Exp, def: Option<StmtId>) -> Self {
        Self::Ref(Box::new(base), def)
    }

    /// Named local location.
    #[must_use]
    pub fn local(name: impl Into<String>) -> Self {
        Self::Location(LocationKind::Local(name.into()))
    }

    /// Named parameter location.
    #[must_use]
    pub fn param(name: impl Into<String>) -> Self {
        Self::Location(LocationKind::Param(name.into()))
    }

    /// Named global location.
    #[must_use]
    pub fn global(name: impl Into<String>) -> Self {
        Self::Location(LocationKind::Global(name.into()))
    }

    /// Named temporary location.
    #[must_use]
    pub fn temp(name: impl Into<String>) -> Self {
        Self::Location(LocationKind::Temp(name.into()))
    }

    /// The canonical preservation query `lhs = rhs`.
    #[must_use]
    pub fn equate(lhs: Exp, rhs: Exp) -> Self {
        Self::binary(BinaryOp::Eq, lhs, rhs)
    }

    // ------------------------------------------------------------------
    // Predicates and accessors
    // ------------------------------------------------------------------

    /// Returns `true` for any constant.
    #[must_use]
    pub const fn is_const(&self) -> bool {
        matches!(self, Self::Const(_))
    }

    /// Returns `true` for an integer constant.
    #[must_use]
    pub const fn is_int_const(&self) -> bool {
        matches!(self, Self::Const(Const::Int(_)))
    }

    /// Returns the integer value if this is an integer constant.
    #[must_use]
    pub const fn int_value(&self) -> Option<i64> {
        match self {
            Self::Const(Const::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns the address value if this is an address or non-negative integer
    /// constant.
    #[must_use]
    pub const fn addr_value(&self) -> Option<u64> {
        match self {
            Self::Const(Const::Addr(v)) => Some(*v),
            Self::Const(Const::Int(v)) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Returns `true` for register `n` specifically.
    #[must_use]
    pub fn is_reg_n(&self, n: u16) -> bool {
        matches!(self, Self::Reg(r) if *r == n)
    }

    /// Returns `true` for a memory dereference.
    #[must_use]
    pub const fn is_mem_of(&self) -> bool {
        matches!(self, Self::MemOf(_))
    }

    /// Returns `true` for a subscripted reference.
    #[must_use]
    pub const fn is_subscript(&self) -> bool {
        matches!(self, Self::Ref(..))
    }

    /// Returns `true` for an equality (`lhs = rhs`) expression.
    #[must_use]
    pub const fn is_equality(&self) -> bool {
        matches!(self, Self::Binary(BinaryOp::Eq, ..))
    }

    /// Returns `true` if this expression is an assignable location: a register, a
    /// memory dereference, a named location, or a condition-code terminal.
    #[must_use]
    pub fn is_location(&self) -> bool {
        match self {
            Self::Reg(_) | Self::MemOf(_) | Self::Location(_) => true,
            Self::Terminal(t) => t.is_flag() || *t == Terminal::Pc,
            _ => false,
        }
    }

    /// The base and definition of a subscripted reference.
    #[must_use]
    pub fn ref_parts(&self) -> Option<(&Exp, Option<StmtId>)> {
        match self {
            Self::Ref(base, def) => Some((base, *def)),
            _ => None,
        }
    }

    /// First child, if any.
    #[must_use]
    pub fn sub1(&self) -> Option<&Exp> {
        match self {
            Self::MemOf(a) | Self::AddrOf(a) | Self::Unary(_, a) | Self::Typed(_, a) => Some(a),
            Self::Binary(_, a, _) | Self::Ternary(_, a, _, _) | Self::Ref(a, _) => Some(a),
            _ => None,
        }
    }

    /// Second child, if any.
    #[must_use]
    pub fn sub2(&self) -> Option<&Exp> {
        match self {
            Self::Binary(_, _, b) | Self::Ternary(_, _, b, _) => Some(b),
            _ => None,
        }
    }

    /// Third child, if any.
    #[must_use]
    pub fn sub3(&self) -> Option<&Exp> {
        match self {
            Self::Ternary(_, _, _, c) => Some(c),
            _ => None,
        }
    }

    /// Maximum nesting depth of `m[...]` within this expression.
    #[must_use]
    pub fn mem_depth(&self) -> u32 {
        match self {
            Self::MemOf(a) => 1 + a.mem_depth(),
            _ => self
                .children()
                .into_iter()
                .map(Exp::mem_depth)
                .max()
                .unwrap_or(0),
        }
    }

    // ------------------------------------------------------------------
    // Traversals
    // ------------------------------------------------------------------

    /// Immutable references to all direct children, outermost first.
    #[must_use]
    pub fn children(&self) -> Vec<&Exp> {
        match self {
            Self::Const(_) | Self::Terminal(_) | Self::Reg(_) | Self::Location(_) => Vec::new(),
            Self::MemOf(a) | Self::AddrOf(a) | Self::Unary(_, a) | Self::Typed(_, a) => vec![a],
            Self::Ref(a, _) => vec![a],
            Self::Binary(_, a, b) => vec![a, b],
            Self::Ternary(_, a, b, c) => vec![a, b, c],
        }
    }

    /// Mutable references to all direct children.
    pub fn children_mut(&mut self) -> Vec<&mut Exp> {
        match self {
            Self::Const(_) | Self::Terminal(_) | Self::Reg(_) | Self::Location(_) => Vec::new(),
            Self::MemOf(a) | Self::AddrOf(a) | Self::Unary(_, a) | Self::Typed(_, a) => vec![a],
            Self::Ref(a, _) => vec![a],
            Self::Binary(_, a, b) => vec![a, b],
            Self::Ternary(_, a, b, c) => vec![a, b, c],
        }
    }

    /// Pre-order traversal calling `f` on every node.
    pub fn for_each(&self, f: &mut impl FnMut(&Exp)) {
        f(self);
        for c in self.children() {
            c.for_each(f);
        }
    }

    /// Bottom-up fold: `f` receives each node together with the already-folded results
    /// of its children.
    pub fn fold<R>(&self, f: &mut impl FnMut(&Exp, Vec<R>) -> R) -> R {
        let child_results = self.children().into_iter().map(|c| c.fold(f)).collect();
        f(self, child_results)
    }

    /// Bottom-up rewrite: children are rewritten first, then `f` is applied to the
    /// rebuilt node.
    #[must_use]
    pub fn map(self, f: &mut impl FnMut(Exp) -> Exp) -> Exp {
        let rebuilt = match self {
            Self::MemOf(a) => Self::MemOf(Box::new(a.map(f))),
            Self::AddrOf(a) => Self::AddrOf(Box::new(a.map(f))),
            Self::Unary(op, a) => Self::Unary(op, Box::new(a.map(f))),
            Self::Typed(ty, a) => Self::Typed(ty, Box::new(a.map(f))),
            Self::Ref(a, d) => Self::Ref(Box::new(a.map(f)), d),
            Self::Binary(op, a, b) => Self::Binary(op, Box::new(a.map(f)), Box::new(b.map(f))),
            Self::Ternary(op, a, b, c) => {
                Self::Ternary(op, Box::new(a.map(f)), Box::new(b.map(f)), Box::new(c.map(f)))
            }
            leaf => leaf,
        };
        f(rebuilt)
    }

    // ------------------------------------------------------------------
    // Pattern matching with wildcards
    // ------------------------------------------------------------------

    /// Structural match against a pattern, honouring the wildcard terminals:
    /// [`Terminal::Wild`] matches anything, [`Terminal::WildIntConst`] any integer or
    /// address constant, [`Terminal::WildStrConst`] any string constant.
    #[must_use]
    pub fn matches(&self, pattern: &Exp) -> bool {
        match pattern {
            Exp::Terminal(Terminal::Wild) => return true,
            Exp::Terminal(Terminal::WildIntConst) => {
                return matches!(self, Exp::Const(Const::Int(_)) | Exp::Const(Const::Addr(_)))
            }
            Exp::Terminal(Terminal::WildStrConst) => {
                return matches!(self, Exp::Const(Const::Str(_)))
            }
            _ => {}
        }
        match (self, pattern) {
            (Exp::MemOf(a), Exp::MemOf(p)) | (Exp::AddrOf(a), Exp::AddrOf(p)) => a.matches(p),
            (Exp::Unary(op, a), Exp::Unary(pop, p)) => op == pop && a.matches(p),
            (Exp::Binary(op, a, b), Exp::Binary(pop, pa, pb)) => {
                op == pop && a.matches(pa) && b.matches(pb)
            }
            (Exp::Ternary(op, a, b, c), Exp::Ternary(pop, pa, pb, pc)) => {
                op == pop && a.matches(pa) && b.matches(pb) && c.matches(pc)
            }
            (Exp::Ref(a, _), Exp::Ref(p, _)) => a.matches(p),
            _ => self == pattern,
        }
    }

    /// Finds all subexpressions matching `pattern`, outermost first.
    #[must_use]
    pub fn search_all(&self, pattern: &Exp) -> Vec<Exp> {
        let mut found = Vec::new();
        self.for_each(&mut |e| {
            if e.matches(pattern) {
                found.push(e.clone());
            }
        });
        found
    }

    /// Returns `true` if any subexpression matches `pattern`.
    #[must_use]
    pub fn contains_match(&self, pattern: &Exp) -> bool {
        let mut found = false;
        self.for_each(&mut |e| found |= e.matches(pattern));
        found
    }

    /// Replaces every subexpression matching `pattern` with `replacement`, returning
    /// `true` if anything changed. Matching is outermost-wins: a replaced node is not
    /// searched again.
    pub fn search_and_replace(&mut self, pattern: &Exp, replacement: &Exp) -> bool {
        if self.matches(pattern) {
            *self = replacement.clone();
            return true;
        }
        let mut changed = false;
        for c in self.children_mut() {
            changed |= c.search_and_replace(pattern, replacement);
        }
        changed
    }

    /// Replaces every structurally equal occurrence of `from` with `to`; returns
    /// `true` if anything changed.
    pub fn replace_exp(&mut self, from: &Exp, to: &Exp) -> bool {
        if self == from {
            *self = to.clone();
            return true;
        }
        let mut changed = false;
        for c in self.children_mut() {
            changed |= c.replace_exp(from, to);
        }
        changed
    }

    // ------------------------------------------------------------------
    // Subscript (SSA reference) manipulation
    // ------------------------------------------------------------------

    /// Wraps every occurrence of the location `base` in a [`Exp::Ref`] with the given
    /// definition. An occurrence that is already subscripted has its definition
    /// replaced instead of gaining a second subscript.
    pub fn subscript_var(&mut self, base: &Exp, def: Option<StmtId>) {
        if let Self::Ref(b, d) = self {
            if b.as_ref() == base {
                *d = def;
                return;
            }
            b.subscript_var(base, def);
            return;
        }
        if self == base {
            let inner = std::mem::replace(self, Exp::Terminal(Terminal::Wild));
            *self = Exp::subscript(inner, def);
            return;
        }
        for c in self.children_mut() {
            c.subscript_var(base, def);
        }
    }

    /// Wraps every location leaf in a null (`{-}`) subscript. Used to turn a bare
    /// pattern like `m[sp + 4]` into the form renaming produces.
    #[must_use]
    pub fn subscript_all_null(self) -> Exp {
        // Outermost locations first so m[...] gets one subscript, not one per level
        if self.is_location() {
            let inner = match self {
                Self::MemOf(a) => Self::MemOf(Box::new(a.subscript_all_null())),
                other => other,
            };
            return Exp::subscript(inner, None);
        }
        self.map_children(|c| c.subscript_all_null())
    }

    fn map_children(self, f: impl Fn(Exp) -> Exp) -> Exp {
        match self {
            Self::MemOf(a) => Self::MemOf(Box::new(f(*a))),
            Self::AddrOf(a) => Self::AddrOf(Box::new(f(*a))),
            Self::Unary(op, a) => Self::Unary(op, Box::new(f(*a))),
            Self::Typed(ty, a) => Self::Typed(ty, Box::new(f(*a))),
            Self::Ref(a, d) => Self::Ref(Box::new(f(*a)), d),
            Self::Binary(op, a, b) => Self::Binary(op, Box::new(f(*a)), Box::new(f(*b))),
            Self::Ternary(op, a, b, c) => {
                Self::Ternary(op, Box::new(f(*a)), Box::new(f(*b)), Box::new(f(*c)))
            }
            leaf => leaf,
        }
    }

    /// Removes every subscript, leaving bare base locations. Returns `true` if all
    /// removed subscripts had no explicit definition (`None`), the pattern parameters
    /// take.
    pub fn strip_refs(&mut self) -> bool {
        let mut all_null = true;
        self.strip_refs_inner(&mut all_null);
        all_null
    }

    fn strip_refs_inner(&mut self, all_null: &mut bool) {
        if let Self::Ref(base, def) = self {
            if def.is_some() {
                *all_null = false;
            }
            let mut inner = std::mem::replace(base.as_mut(), Exp::Terminal(Terminal::Wild));
            inner.strip_refs_inner(all_null);
            *self = inner;
            return;
        }
        for c in self.children_mut() {
            c.strip_refs_inner(all_null);
        }
    }

    // ------------------------------------------------------------------
    // Used-location collection
    // ------------------------------------------------------------------

    /// Collects the locations used by this expression into `set`.
    ///
    /// A subscripted reference is collected whole (the `Ref` wrapper carries the value
    /// identity); the address computation inside a `m[...]` is searched as well, since
    /// its components are uses in their own right.
    pub fn add_used_locs(&self, set: &mut LocationSet) {
        match self {
            Self::Ref(base, _) => {
                set.insert(self.clone());
                if let Self::MemOf(addr) = base.as_ref() {
                    addr.add_used_locs(set);
                }
            }
            Self::Reg(_) | Self::Location(_) => {
                set.insert(self.clone());
            }
            Self::Terminal(t) if t.is_flag() || *t == Terminal::Pc => {
                set.insert(self.clone());
            }
            Self::MemOf(addr) => {
                set.insert(self.clone());
                addr.add_used_locs(set);
            }
            _ => {
                for c in self.children() {
                    c.add_used_locs(set);
                }
            }
        }
    }

    /// All used locations of this expression as a fresh set.
    #[must_use]
    pub fn used_locs(&self) -> LocationSet {
        let mut set = LocationSet::new();
        self.add_used_locs(&mut set);
        set
    }
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(c) => write!(f, "{c}"),
            Self::Terminal(t) => write!(f, "{t}"),
            Self::Reg(n) => write!(f, "r{n}"),
            Self::MemOf(a) => write!(f, "m[{a}]"),
            Self::AddrOf(a) => write!(f, "&{a}"),
            Self::Unary(op, a) => write!(f, "{op}{a}"),
            Self::Binary(BinaryOp::ArrayIndex, a, b) => write!(f, "{a}[{b}]"),
            Self::Binary(BinaryOp::MemberAccess, a, b) => write!(f, "{a}.{b}"),
            Self::Binary(op, a, b) => write!(f, "({a} {op} {b})"),
            Self::Ternary(op, a, b, c) => write!(f, "{op}({a}, {b}, {c})"),
            Self::Typed(ty, a) => write!(f, "({ty}){a}"),
            Self::Location(l) => write!(f, "{}", l.name()),
            Self::Ref(base, Some(def)) => write!(f, "{base}{{{def}}}"),
            Self::Ref(base, None) => write!(f, "{base}{{-}}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp_minus_4() -> Exp {
        Exp::mem_of(Exp::binary(BinaryOp::Sub, Exp::reg(28), Exp::int(4)))
    }

    #[test]
    fn test_structural_equality_and_order() {
        assert_eq!(sp_minus_4(), sp_minus_4());
        assert_ne!(Exp::reg(28), Exp::reg(29));
        assert!(Exp::reg(1) < Exp::reg(2));
        let a = Exp::subscript(Exp::reg(24), Some(StmtId::new(5)));
        let b = Exp::subscript(Exp::reg(24), Some(StmtId::new(6)));
        assert_ne!(a, b);
    }

    #[test]
    fn test_float_constants_are_ordered() {
        let a = Exp::Const(Const::Flt(1.5));
        let b = Exp::Const(Const::Flt(2.5));
        assert!(a < b);
        assert_eq!(a, Exp::Const(Const::Flt(1.5)));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", sp_minus_4()), "m[(r28 - 4)]");
        let r = Exp::subscript(Exp::reg(24), Some(StmtId::new(5)));
        assert_eq!(format!("{r}"), "r24{s5}");
        let r = Exp::subscript(Exp::reg(24), None);
        assert_eq!(format!("{r}"), "r24{-}");
    }

    #[test]
    fn test_fold_counts_nodes() {
        let e = Exp::binary(BinaryOp::Add, sp_minus_4(), Exp::int(1));
        let count = e.fold(&mut |_, kids: Vec<u32>| 1 + kids.iter().sum::<u32>());
        // Add, MemOf, Sub, r28, 4, 1
        assert_eq!(count, 6);
    }

    #[test]
    fn test_map_rewrites_bottom_up() {
        let e = Exp::binary(BinaryOp::Add, Exp::reg(24), Exp::int(0));
        let out = e.map(&mut |e| match e {
            Exp::Reg(24) => Exp::reg(25),
            other => other,
        });
        assert_eq!(out, Exp::binary(BinaryOp::Add, Exp::reg(25), Exp::int(0)));
    }

    #[test]
    fn test_wildcard_matching() {
        // m[idx * K1 + K2] with idx wild
        let pat = Exp::mem_of(Exp::binary(
            BinaryOp::Add,
            Exp::binary(
                BinaryOp::Mul,
                Exp::Terminal(Terminal::Wild),
                Exp::Terminal(Terminal::WildIntConst),
            ),
            Exp::Terminal(Terminal::WildIntConst),
        ));
        let e = Exp::mem_of(Exp::binary(
            BinaryOp::Add,
            Exp::binary(BinaryOp::Mul, Exp::reg(8), Exp::int(4)),
            Exp::int(0x8000),
        ));
        assert!(e.matches(&pat));
        assert!(!sp_minus_4().matches(&pat));
    }

    #[test]
    fn test_search_and_replace() {
        let mut e = Exp::binary(BinaryOp::Add, Exp::reg(24), Exp::reg(24));
        let changed = e.replace_exp(&Exp::reg(24), &Exp::local("x"));
        assert!(changed);
        assert_eq!(e, Exp::binary(BinaryOp::Add, Exp::local("x"), Exp::local("x")));
    }

    #[test]
    fn test_subscript_var() {
        let mut e = Exp::binary(BinaryOp::Add, Exp::reg(24), Exp::int(1));
        e.subscript_var(&Exp::reg(24), Some(StmtId::new(3)));
        assert_eq!(
            e,
            Exp::binary(
                BinaryOp::Add,
                Exp::subscript(Exp::reg(24), Some(StmtId::new(3))),
                Exp::int(1)
            )
        );
        // Re-subscripting replaces the definition
        e.subscript_var(&Exp::reg(24), Some(StmtId::new(9)));
        assert_eq!(
            e,
            Exp::binary(
                BinaryOp::Add,
                Exp::subscript(Exp::reg(24), Some(StmtId::new(9))),
                Exp::int(1)
            )
        );
    }

    #[test]
    fn test_strip_refs() {
        let mut e = Exp::binary(
            BinaryOp::Add,
            Exp::subscript(Exp::reg(24), Some(StmtId::new(3))),
            Exp::subscript(Exp::reg(25), None),
        );
        let all_null = e.strip_refs();
        assert!(!all_null);
        assert_eq!(e, Exp::binary(BinaryOp::Add, Exp::reg(24), Exp::reg(25)));

        let mut e = Exp::subscript(Exp::reg(24), None);
        assert!(e.strip_refs());
        assert_eq!(e, Exp::reg(24));
    }

    #[test]
    fn test_used_locs() {
        // m[r28{s1} - 4]{s2} uses the whole ref and r28{s1}
        let addr = Exp::binary(
            BinaryOp::Sub,
            Exp::subscript(Exp::reg(28), Some(StmtId::new(1))),
            Exp::int(4),
        );
        let e = Exp::subscript(Exp::mem_of(addr), Some(StmtId::new(2)));
        let locs = e.used_locs();
        assert_eq!(locs.len(), 2);
        assert!(locs.contains(&e));
        assert!(locs.contains(&Exp::subscript(Exp::reg(28), Some(StmtId::new(1)))));
    }

    #[test]
    fn test_mem_depth() {
        assert_eq!(Exp::reg(1).mem_depth(), 0);
        assert_eq!(sp_minus_4().mem_depth(), 1);
        let nested = Exp::mem_of(Exp::binary(BinaryOp::Add, sp_minus_4(), Exp::int(8)));
        assert_eq!(nested.mem_depth(), 2);
    }
}
