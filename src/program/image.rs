//! Read-only view of the loaded binary image.
//!
//! The loader (an external collaborator) hands the core an addressable byte array
//! partitioned into sections. The core consults it for three things: resolving
//! addresses to sections, inlining constants from read-only memory, and recovering
//! string literals pointed to by `char *` typed constants.

/// One mapped section.
#[derive(Debug, Clone)]
pub struct Section {
    /// Section name (informational).
    pub name: String,
    /// Base virtual address.
    pub addr: u64,
    /// Raw bytes.
    pub data: Vec<u8>,
    /// Whether the section is writable at run time.
    pub writable: bool,
}

impl Section {
    /// End address (exclusive).
    #[must_use]
    pub fn end(&self) -> u64 {
        self.addr + self.data.len() as u64
    }
}

/// The read-only image: a set of non-overlapping sections.
#[derive(Debug, Clone, Default)]
pub struct Image {
    sections: Vec<Section>,
}

impl Image {
    /// Creates an empty image.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a section.
    pub fn add_section(
        &mut self,
        name: impl Into<String>,
        addr: u64,
        data: Vec<u8>,
        writable: bool,
    ) {
        self.sections.push(Section {
            name: name.into(),
            addr,
            data,
            writable,
        });
    }

    /// The section containing `addr`, if any.
    #[must_use]
    pub fn section_for(&self, addr: u64) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| addr >= s.addr && addr < s.end())
    }

    /// Returns `true` if `addr` is mapped.
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        self.section_for(addr).is_some()
    }

    /// Returns `true` if `addr` lies in read-only memory (so a load from it can be
    /// inlined as a constant).
    #[must_use]
    pub fn is_read_only(&self, addr: u64) -> bool {
        self.section_for(addr).is_some_and(|s| !s.writable)
    }

    /// Reads a little-endian 32-bit word.
    #[must_use]
    pub fn read_u32(&self, addr: u64) -> Option<u32> {
        let s = self.section_for(addr)?;
        let off = (addr - s.addr) as usize;
        let bytes = s.data.get(off..off + 4)?;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Reads a little-endian 64-bit word.
    #[must_use]
    pub fn read_u64(&self, addr: u64) -> Option<u64> {
        let s = self.section_for(addr)?;
        let off = (addr - s.addr) as usize;
        let bytes = s.data.get(off..off + 8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    /// Reads a NUL-terminated string, rejecting non-printable content.
    #[must_use]
    pub fn string_at(&self, addr: u64) -> Option<String> {
        let s = self.section_for(addr)?;
        let off = (addr - s.addr) as usize;
        let tail = s.data.get(off..)?;
        let len = tail.iter().position(|&b| b == 0)?;
        let bytes = &tail[..len];
        if bytes.is_empty() || !bytes.iter().all(|&b| b == b'\t' || b == b'\n' || (0x20..0x7f).contains(&b)) {
            return None;
        }
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Image {
        let mut img = Image::new();
        let mut rodata = b"hello\0\x2a\0\0\0".to_vec();
        rodata.resize(16, 0);
        img.add_section(".rodata", 0x8000, rodata, false);
        img.add_section(".data", 0x9000, vec![0u8; 16], true);
        img
    }

    #[test]
    fn test_section_queries() {
        let img = image();
        assert!(img.contains(0x8000));
        assert!(img.contains(0x800f));
        assert!(!img.contains(0x8010));
        assert!(img.is_read_only(0x8000));
        assert!(!img.is_read_only(0x9000));
    }

    #[test]
    fn test_reads() {
        let img = image();
        // "hello\0" then 0x2a as a 32-bit LE word
        assert_eq!(img.read_u32(0x8006), Some(0x2a));
        assert_eq!(img.string_at(0x8000), Some("hello".to_string()));
        // The word after the terminator is not a printable string
        assert_eq!(img.string_at(0x8006), None);
    }
}
