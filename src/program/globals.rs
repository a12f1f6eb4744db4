//! The program-wide global address → name/type map.
//!
//! The type analyzer calls [`GlobalMap::global_used`] whenever an address constant
//! turns out to be a data pointer; the map names the global (inventing `global<n>`
//! names when the symbol table has none) and accumulates its type by meet. The
//! global data layout itself lives in a [`DataIntervalMap`] so overlapping uses are
//! reconciled with the same rules as stack frames.

use std::collections::BTreeMap;

use log::debug;

use crate::types::{DataIntervalMap, Type};

/// One named global data item.
#[derive(Debug, Clone)]
pub struct Global {
    /// Symbolic name.
    pub name: String,
    /// Accumulated type.
    pub ty: Type,
}

/// Address-keyed map of globals plus the typed layout of global memory.
#[derive(Debug, Clone, Default)]
pub struct GlobalMap {
    by_addr: BTreeMap<u64, Global>,
    /// Typed layout of global data; insertions reconcile overlaps.
    pub layout: DataIntervalMap,
    next: u32,
}

impl GlobalMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the global at `addr` is used with type `ty`, naming it if new.
    /// Returns the global's name. Writes are last-writer-wins on the type.
    pub fn global_used(&mut self, addr: u64, ty: &Type) -> String {
        if let Some(g) = self.by_addr.get_mut(&addr) {
            let mut ch = false;
            g.ty = g.ty.meet_with(ty, &mut ch, false);
            if ch {
                // Layout errors here are recoverable; the name mapping stands
                let _ = self.layout.add_item(addr, &g.name.clone(), g.ty.clone());
            }
            return g.name.clone();
        }
        let name = self.new_global_name(addr);
        debug!("global {name} at {addr:#x} used with type {ty}");
        self.by_addr.insert(
            addr,
            Global {
                name: name.clone(),
                ty: ty.clone(),
            },
        );
        let _ = self.layout.add_item(addr, &name, ty.clone());
        name
    }

    /// The name of the global at exactly `addr`, if known.
    #[must_use]
    pub fn name_at(&self, addr: u64) -> Option<&str> {
        self.by_addr.get(&addr).map(|g| g.name.as_str())
    }

    /// The address of the named global.
    #[must_use]
    pub fn addr_of(&self, name: &str) -> Option<u64> {
        self.by_addr
            .iter()
            .find(|(_, g)| g.name == name)
            .map(|(&a, _)| a)
    }

    /// Invents a fresh name for the global at `addr`.
    pub fn new_global_name(&mut self, _addr: u64) -> String {
        let n = self.next;
        self.next += 1;
        format!("global{n}")
    }

    /// The accumulated type of the named global.
    #[must_use]
    pub fn type_of(&self, name: &str) -> Option<&Type> {
        self.by_addr
            .values()
            .find(|g| g.name == name)
            .map(|g| &g.ty)
    }

    /// Replaces the type of the named global.
    pub fn set_type(&mut self, name: &str, ty: Type) {
        if let Some(g) = self.by_addr.values_mut().find(|g| g.name == name) {
            g.ty = ty;
        }
    }

    /// Iterates globals in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Global)> {
        self.by_addr.iter().map(|(&a, g)| (a, g))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_used_names_and_meets() {
        let mut gm = GlobalMap::new();
        let name = gm.global_used(0x8000, &Type::int(32));
        assert_eq!(name, "global0");
        assert_eq!(gm.name_at(0x8000), Some("global0"));
        assert_eq!(gm.addr_of("global0"), Some(0x8000));

        // A second use at the same address meets the types
        let name2 = gm.global_used(0x8000, &Type::signed_int(32));
        assert_eq!(name2, "global0");
        assert!(gm.type_of("global0").unwrap().resolves_to_integer());

        // A different address gets a fresh name
        let other = gm.global_used(0x9000, &Type::Char);
        assert_eq!(other, "global1");
    }
}
