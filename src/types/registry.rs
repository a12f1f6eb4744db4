//! The process-wide named-type registry.
//!
//! [`Type::Named`](super::Type::Named) resolves through this registry. It is
//! deliberately global: names like `FILE` or `size_t` mean the same thing in every
//! procedure of every program being decompiled in the process.
//!
//! # Lifecycle and writers
//!
//! The registry is single-writer by contract: loaders and signature readers populate
//! it before decompilation starts ([`define`]), decompilation only reads
//! ([`resolve`]). [`clear`] exists for teardown between programs and for test
//! isolation; calling it mid-analysis invalidates nothing structurally (names simply
//! stop resolving) but is not meaningful.

use std::sync::{OnceLock, RwLock};

use rustc_hash::FxHashMap;

use crate::types::Type;

fn registry() -> &'static RwLock<FxHashMap<String, Type>> {
    static REGISTRY: OnceLock<RwLock<FxHashMap<String, Type>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// Defines (or redefines) a named type.
pub fn define(name: impl Into<String>, ty: Type) {
    registry()
        .write()
        .expect("named-type registry poisoned")
        .insert(name.into(), ty);
}

/// Resolves a name to its defined type, if any.
#[must_use]
pub fn resolve(name: &str) -> Option<Type> {
    registry()
        .read()
        .expect("named-type registry poisoned")
        .get(name)
        .cloned()
}

/// Removes every definition. For teardown between programs and test isolation.
pub fn clear() {
    registry()
        .write()
        .expect("named-type registry poisoned")
        .clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_resolve_roundtrip() {
        define("__relift_test_size_t", Type::unsigned_int(32));
        assert_eq!(
            resolve("__relift_test_size_t"),
            Some(Type::unsigned_int(32))
        );
        assert_eq!(resolve("__relift_test_undefined"), None);
    }

    #[test]
    fn test_named_type_resolution_in_meet() {
        define("__relift_test_word", Type::int(32));
        let named = Type::named("__relift_test_word");
        let mut ch = false;
        // Meeting with a compatible type keeps the name
        let r = named.meet_with(&Type::int(32), &mut ch, false);
        assert_eq!(r, named);
    }
}
