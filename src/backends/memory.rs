// SPDX-License-Identifier: MIT OR Apache-2.0

/* ---------------------------------------------------------------------------------------------- */

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::bdf::PciBdf;
use crate::config::{validate_access, AccessWidth, PciConfigIo, PCIE_CONFIG_SPACE_LEN};

/* ---------------------------------------------------------------------------------------------- */

/// A [`PciConfigIo`] backed by plain memory, holding a full 4 KiB config space per function.
///
/// Functions must be added with [`MemoryConfigSpace::add_function`] before they respond. Reads
/// from functions that were never added return all-ones and writes to them are dropped, like
/// configuration accesses to an empty slot on real hardware.
///
/// Registers have RAM semantics: there are no read-only bits, no write-1-to-clear bits, and no
/// side effects.
#[derive(Debug, Default)]
pub struct MemoryConfigSpace {
    functions: Mutex<HashMap<PciBdf, Box<[u8]>>>,
}

impl MemoryConfigSpace {
    pub fn new() -> MemoryConfigSpace {
        MemoryConfigSpace::default()
    }

    /// Adds a function whose config space is all zeroes. Does nothing if it is already present.
    pub fn add_function(&self, bdf: PciBdf) {
        self.lock()
            .entry(bdf)
            .or_insert_with(|| vec![0; PCIE_CONFIG_SPACE_LEN as usize].into_boxed_slice());
    }

    pub fn remove_function(&self, bdf: PciBdf) -> bool {
        self.lock().remove(&bdf).is_some()
    }

    pub fn contains_function(&self, bdf: PciBdf) -> bool {
        self.lock().contains_key(&bdf)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PciBdf, Box<[u8]>>> {
        // the map is never left in an inconsistent state, so a poisoned lock is still usable
        self.functions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PciConfigIo for MemoryConfigSpace {
    fn read(&self, bdf: PciBdf, offset: u32, width: AccessWidth) -> io::Result<u32> {
        validate_access(offset, width)?;

        let functions = self.lock();
        let data = match functions.get(&bdf) {
            Some(data) => data,
            None => return Ok(width.mask()),
        };

        let start = offset as usize;
        let bytes = &data[start..start + width.bytes() as usize];

        Ok(bytes
            .iter()
            .rev()
            .fold(0, |value, &byte| value << 8 | u32::from(byte)))
    }

    fn write(&self, bdf: PciBdf, offset: u32, width: AccessWidth, value: u32) -> io::Result<()> {
        validate_access(offset, width)?;

        let mut functions = self.lock();
        let data = match functions.get_mut(&bdf) {
            Some(data) => data,
            None => return Ok(()),
        };

        let start = offset as usize;
        let bytes = &mut data[start..start + width.bytes() as usize];
        bytes.copy_from_slice(&value.to_le_bytes()[..width.bytes() as usize]);

        Ok(())
    }
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let bdf = PciBdf::new(1, 0, 0).unwrap();
        let io = MemoryConfigSpace::new();
        io.add_function(bdf);

        io.write(bdf, 0x100, AccessWidth::Dword, 0xaabb_ccdd).unwrap();

        assert_eq!(io.read(bdf, 0x100, AccessWidth::Byte).unwrap(), 0xdd);
        assert_eq!(io.read(bdf, 0x103, AccessWidth::Byte).unwrap(), 0xaa);
        assert_eq!(io.read(bdf, 0x102, AccessWidth::Word).unwrap(), 0xaabb);

        io.write(bdf, 0x101, AccessWidth::Byte, 0x11).unwrap();
        assert_eq!(io.read(bdf, 0x100, AccessWidth::Dword).unwrap(), 0xaabb_11dd);
    }

    #[test]
    fn test_missing_function() {
        let present = PciBdf::new(1, 0, 0).unwrap();
        let missing = PciBdf::new(1, 1, 0).unwrap();
        let io = MemoryConfigSpace::new();
        io.add_function(present);

        io.write(missing, 0x00, AccessWidth::Dword, 0).unwrap();
        assert_eq!(io.read(missing, 0x00, AccessWidth::Word).unwrap(), 0xffff);
        assert!(!io.contains_function(missing));

        assert!(io.remove_function(present));
        assert_eq!(
            io.read(present, 0x00, AccessWidth::Dword).unwrap(),
            0xffff_ffff
        );
    }

    #[test]
    fn test_invalid_access() {
        let bdf = PciBdf::new(1, 0, 0).unwrap();
        let io = MemoryConfigSpace::new();
        io.add_function(bdf);

        let err = io.read(bdf, 0x1000, AccessWidth::Byte).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = io.write(bdf, 0x02, AccessWidth::Dword, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }
}

/* ---------------------------------------------------------------------------------------------- */
