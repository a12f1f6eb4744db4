//! Address-keyed map of typed memory regions.
//!
//! A [`DataIntervalMap`] tracks what is known about a contiguous address space: the
//! stack frame of one procedure, or the global data of a whole program. Each entry
//! covers `[start, start + size)` bytes with a name and a type; insertions that
//! overlap existing entries must be type-compatible, and are merged by descending
//! into compounds/arrays and meeting the member types.
//!
//! Two overlapping entries where neither contains the other ("weaving") indicate a
//! genuine type error in the input or the analysis; the insertion is logged and
//! dropped, never applied partially.

use std::collections::BTreeMap;

use log::{debug, error, warn};

use crate::types::Type;
use crate::{Error, Result};

/// One typed region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInterval {
    /// Covered size in bytes.
    pub size: u64,
    /// Symbolic name of the item.
    pub name: String,
    /// Its type.
    pub ty: Type,
}

/// An ordered map from start address to typed region.
///
/// Invariant: after any sequence of [`add_item`](Self::add_item) calls that returned
/// `Ok`, no two entries overlap by a non-zero number of bytes.
#[derive(Debug, Clone, Default)]
pub struct DataIntervalMap {
    map: BTreeMap<u64, DataInterval>,
}

impl DataIntervalMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` when the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Finds the entry whose `[start, start + size)` range contains `addr`.
    ///
    /// We have to look at the last entry starting at or before `addr`, because an
    /// entry may start earlier yet still cover the address.
    #[must_use]
    pub fn find(&self, addr: u64) -> Option<(u64, &DataInterval)> {
        let (&start, entry) = self.map.range(..=addr).next_back()?;
        if addr < start.saturating_add(entry.size) {
            Some((start, entry))
        } else {
            None
        }
    }

    /// Iterates entries in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &DataInterval)> {
        self.map.iter().map(|(&a, e)| (a, e))
    }

    /// Checks whether `[addr, addr + size)` overlaps nothing.
    ///
    /// An unbounded array ending exactly where the new range starts is shrunk to fit
    /// and does not count as an overlap.
    fn is_clear(&mut self, addr: u64, size: u64) -> bool {
        let last_byte = addr.saturating_add(size).saturating_sub(1);
        let Some((&start, entry)) = self.map.range(..=last_byte).next_back() else {
            return true;
        };
        let end = start.saturating_add(entry.size);
        if end <= addr {
            return true;
        }
        if matches!(&entry.ty, Type::Array { length: None, .. }) && start < addr {
            let new_size = addr - start;
            debug!("shrinking unbounded array at {start:#x} to {new_size} bytes");
            self.map.get_mut(&start).expect("entry just found").size = new_size;
            return true;
        }
        false
    }

    /// Adds a new data item, merging with existing typed regions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeWeave`] when the new item would overlap two entries
    /// without containing either, and [`Error::TypeConflict`] when an overlapped
    /// member type is incompatible. In both cases the error is also logged and the
    /// map is left unchanged.
    pub fn add_item(&mut self, addr: u64, name: &str, ty: Type) -> Result<()> {
        // A new entry in the tail of an unbounded array bounds the array first
        let unbounded_tail = self.find(addr).and_then(|(start, entry)| {
            (start < addr && matches!(&entry.ty, Type::Array { length: None, .. }))
                .then_some(start)
        });
        if let Some(start) = unbounded_tail {
            let covered = addr - start;
            debug!("shrinking unbounded array at {start:#x} to {covered} bytes");
            let entry = self.map.get_mut(&start).expect("entry just found");
            entry.size = covered;
            if let Type::Array { base, length: None } = &entry.ty {
                let base = base.clone();
                let elem = base.size_bytes().max(1);
                entry.ty = Type::Array {
                    base,
                    length: Some(covered / elem),
                };
            }
            return self.add_item(addr, name, ty);
        }

        let new_size = ty.size_bytes();
        match self.find(addr) {
            None => self.replace_components(addr, name, ty),
            Some((start, entry)) if start < addr => {
                // The existing entry comes first; it must also end last
                if start.saturating_add(entry.size) < addr.saturating_add(new_size) {
                    let err = Error::TypeWeave {
                        addr,
                        new_ty: ty.ctype(),
                        name: entry.name.clone(),
                        existing: start,
                        existing_ty: entry.ty.ctype(),
                    };
                    error!("{err}");
                    return Err(err);
                }
                self.enter_component(start, addr, &ty)
            }
            Some((start, entry)) => {
                // Starts at the same address; compare where the items end
                let end_of_current = start.saturating_add(entry.size);
                let end_of_new = addr.saturating_add(new_size);
                if end_of_current < end_of_new {
                    self.replace_components(addr, name, ty)
                } else if end_of_current == end_of_new {
                    self.check_matching(start, &ty);
                    Ok(())
                } else {
                    self.enter_component(start, addr, &ty)
                }
            }
        }
    }

    /// Removes the entry starting exactly at `addr`, if any.
    pub fn delete_item(&mut self, addr: u64) {
        self.map.remove(&addr);
    }

    /// The new item lands inside an existing larger entry: descend into its
    /// compound/array structure and meet the member type at the right offset.
    fn enter_component(&mut self, start: u64, addr: u64, ty: &Type) -> Result<()> {
        let entry = self.map.get_mut(&start).expect("containing entry");
        let bit_offset = (addr - start) * 8;
        if entry.ty.resolves_to_compound() {
            let Some(member) = entry.ty.type_at_offset(bit_offset) else {
                return conflict(addr, ty, &entry.ty);
            };
            if !member.is_compatible_with(ty) {
                return conflict(addr, ty, member);
            }
            let mut ch = false;
            let met = member.meet_with(ty, &mut ch, false);
            entry.ty.set_type_at_offset(bit_offset, met);
            Ok(())
        } else if entry.ty.resolves_to_array() {
            let (base, length) = match &entry.ty {
                Type::Array { base, length } => (base.as_ref().clone(), *length),
                _ => unreachable!(),
            };
            if !base.is_compatible_with(ty) {
                return conflict(addr, ty, &base);
            }
            let mut ch = false;
            let met = base.meet_with(ty, &mut ch, false);
            entry.ty = Type::Array {
                base: Box::new(met),
                length,
            };
            Ok(())
        } else {
            let err = Error::TypeConflict {
                addr,
                lhs: ty.ctype(),
                rhs: entry.ty.ctype(),
            };
            error!("existing type at {start:#x} is not a structure or array: {err}");
            Err(err)
        }
    }

    /// The new item is a compound or array overlapping existing smaller entries:
    /// meet each overlapped type into the corresponding slot, then delete the
    /// overlapped entries and insert the new one.
    fn replace_components(&mut self, addr: u64, name: &str, mut ty: Type) -> Result<()> {
        let new_size = ty.size_bytes();
        let past_last = addr.saturating_add(new_size);
        let overlapped: Vec<u64> = self
            .map
            .range(addr..past_last)
            .map(|(&a, _)| a)
            .collect();

        if ty.resolves_to_compound() {
            for &start in &overlapped {
                let entry = &self.map[&start];
                self.check_contained(addr, past_last, start, entry)?;
                let bit_offset = (start - addr) * 8;
                let Some(member) = ty.type_at_offset(bit_offset) else {
                    return conflict(addr, &entry.ty, &ty);
                };
                if !member.compatible_with(&entry.ty, true) {
                    return conflict(addr, &entry.ty, member);
                }
                let mut ch = false;
                let met = entry.ty.meet_with(member, &mut ch, false);
                ty.set_type_at_offset(bit_offset, met);
            }
        } else if ty.resolves_to_array() {
            let (mut member, length) = match &ty {
                Type::Array { base, length } => (base.as_ref().clone(), *length),
                _ => unreachable!(),
            };
            for &start in &overlapped {
                let entry = &self.map[&start];
                self.check_contained(addr, past_last, start, entry)?;
                if !member.compatible_with(&entry.ty, true) {
                    return conflict(addr, &entry.ty, &member);
                }
                let mut ch = false;
                member = member.meet_with(&entry.ty, &mut ch, false);
            }
            ty = Type::Array {
                base: Box::new(member),
                length,
            };
        } else {
            // A scalar must not overlap anything (modulo unbounded-array shrinking)
            if !self.is_clear(addr, new_size.max(1)) {
                let (existing, entry) = self.find_any_overlap(addr, past_last);
                let err = Error::TypeWeave {
                    addr,
                    new_ty: ty.ctype(),
                    name: entry.name.clone(),
                    existing,
                    existing_ty: entry.ty.ctype(),
                };
                error!("{err}");
                return Err(err);
            }
        }

        for start in overlapped {
            self.map.remove(&start);
        }
        self.map.insert(
            addr,
            DataInterval {
                size: ty.size_bytes(),
                name: name.to_string(),
                ty,
            },
        );
        Ok(())
    }

    /// Size match at the same address: check compatibility and merge the types.
    fn check_matching(&mut self, start: u64, ty: &Type) {
        let entry = self.map.get_mut(&start).expect("matching entry");
        if entry.ty.is_compatible_with(ty) {
            let mut ch = false;
            entry.ty = entry.ty.meet_with(ty, &mut ch, false);
        } else {
            // Could be OK (e.g. one view of an overlay); keep the old type
            warn!(
                "type difference at {start:#x}: existing {} but added {}",
                entry.ty.ctype(),
                ty.ctype()
            );
        }
    }

    fn check_contained(
        &self,
        addr: u64,
        past_last: u64,
        start: u64,
        entry: &DataInterval,
    ) -> Result<()> {
        if start.saturating_add(entry.size) > past_last {
            let err = Error::TypeWeave {
                addr,
                new_ty: String::from("<container>"),
                name: entry.name.clone(),
                existing: start,
                existing_ty: entry.ty.ctype(),
            };
            error!("{err}");
            return Err(err);
        }
        Ok(())
    }

    fn find_any_overlap(&self, addr: u64, past_last: u64) -> (u64, &DataInterval) {
        if let Some((start, entry)) = self.find(addr) {
            return (start, entry);
        }
        self.map
            .range(addr..past_last)
            .next()
            .map(|(&a, e)| (a, e))
            .expect("overlap reported but none found")
    }
}

fn conflict(addr: u64, new: &Type, existing: &Type) -> Result<()> {
    let err = Error::TypeConflict {
        addr,
        lhs: new.ctype(),
        rhs: existing.ctype(),
    };
    error!("{err}");
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_find() {
        let mut dim = DataIntervalMap::new();
        dim.add_item(0x100, "a", Type::int(32)).unwrap();
        dim.add_item(0x104, "b", Type::int(32)).unwrap();
        assert_eq!(dim.len(), 2);
        assert_eq!(dim.find(0x100).unwrap().1.name, "a");
        assert_eq!(dim.find(0x103).unwrap().1.name, "a");
        assert_eq!(dim.find(0x104).unwrap().1.name, "b");
        assert!(dim.find(0x108).is_none());
        assert!(dim.find(0xff).is_none());
    }

    #[test]
    fn test_weave_is_rejected() {
        let mut dim = DataIntervalMap::new();
        dim.add_item(0x100, "a", Type::int(32)).unwrap();
        // 0x102..0x106 weaves with 0x100..0x104
        let err = dim.add_item(0x102, "b", Type::int(32)).unwrap_err();
        assert!(matches!(err, Error::TypeWeave { addr: 0x102, .. }));
        // First entry untouched, second dropped
        assert_eq!(dim.len(), 1);
        assert_eq!(dim.find(0x100).unwrap().1.ty, Type::int(32));
        assert!(dim.find(0x105).is_none());
    }

    #[test]
    fn test_component_entry_into_array() {
        let mut dim = DataIntervalMap::new();
        dim.add_item(0x200, "arr", Type::array(Type::int(32), 4))
            .unwrap();
        // An int dropped inside the array merges into the base type
        dim.add_item(0x204, "elem", Type::signed_int(32)).unwrap();
        assert_eq!(dim.len(), 1);
        let (_, entry) = dim.find(0x204).unwrap();
        assert!(entry.ty.resolves_to_array());
    }

    #[test]
    fn test_container_absorbs_existing_entries() {
        let mut dim = DataIntervalMap::new();
        dim.add_item(0x300, "x", Type::int(32)).unwrap();
        dim.add_item(0x304, "y", Type::int(32)).unwrap();
        // An array over both replaces them
        dim.add_item(0x300, "arr", Type::array(Type::int(32), 4))
            .unwrap();
        assert_eq!(dim.len(), 1);
        assert_eq!(dim.find(0x306).unwrap().1.name, "arr");
    }

    #[test]
    fn test_same_address_same_size_meets() {
        let mut dim = DataIntervalMap::new();
        dim.add_item(0x400, "v", Type::size(32)).unwrap();
        dim.add_item(0x400, "v", Type::signed_int(32)).unwrap();
        assert_eq!(dim.len(), 1);
        assert!(dim.find(0x400).unwrap().1.ty.resolves_to_integer());
    }

    #[test]
    fn test_unbounded_array_shrinks_to_fit() {
        let mut dim = DataIntervalMap::new();
        dim.add_item(0x500, "buf", Type::unbounded_array(Type::Char))
            .unwrap();
        // A new scalar at the tail forces the array to a finite bound
        dim.add_item(0x510, "n", Type::int(32)).unwrap();
        assert_eq!(dim.len(), 2);
        let (_, entry) = dim.find(0x500).unwrap();
        assert_eq!(entry.size, 0x10);
        assert!(dim.find(0x510).is_some());
    }

    #[test]
    fn test_incompatible_member_rejected() {
        let mut dim = DataIntervalMap::new();
        dim.add_item(0x600, "arr", Type::array(Type::float(32), 4))
            .unwrap();
        let err = dim
            .add_item(0x604, "p", Type::pointer(Type::Char))
            .unwrap_err();
        assert!(matches!(err, Error::TypeConflict { .. }));
    }

    #[test]
    fn test_no_overlap_after_ok_sequence() {
        let mut dim = DataIntervalMap::new();
        dim.add_item(0x10, "a", Type::int(32)).unwrap();
        dim.add_item(0x14, "b", Type::int(16)).unwrap();
        dim.add_item(0x18, "c", Type::array(Type::Char, 8)).unwrap();
        let entries: Vec<_> = dim.iter().collect();
        for w in entries.windows(2) {
            let (a_start, a) = &w[0];
            let (b_start, _) = &w[1];
            assert!(a_start + a.size <= *b_start, "entries overlap");
        }
    }
}
