// SPDX-License-Identifier: MIT OR Apache-2.0

/* ---------------------------------------------------------------------------------------------- */

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::bdf::PciBdf;
use crate::config::{validate_access, AccessWidth, PciConfigIo};

/* ---------------------------------------------------------------------------------------------- */

const DEFAULT_ROOT: &str = "/sys/bus/pci/devices";

/// A [`PciConfigIo`] that goes through Linux's `/sys/bus/pci/devices/<address>/config` files.
///
/// Every access opens the file anew and uses positional I/O, so nothing is cached and no file
/// offset is shared between concurrent accesses. Note that unprivileged processes can only read
/// the first 64 bytes of config space through sysfs, and that writing always requires privileges.
#[derive(Clone, Debug)]
pub struct SysfsConfigIo {
    root: PathBuf,
}

impl SysfsConfigIo {
    pub fn new() -> SysfsConfigIo {
        SysfsConfigIo::with_root(DEFAULT_ROOT)
    }

    /// Use `root` instead of `/sys/bus/pci/devices`. It must contain one directory per function,
    /// named like `0000:00:1c.0`, each with a `config` file.
    pub fn with_root<P: AsRef<Path>>(root: P) -> SysfsConfigIo {
        SysfsConfigIo {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn config_path(&self, bdf: PciBdf) -> PathBuf {
        self.root.join(format!("0000:{}", bdf)).join("config")
    }
}

impl Default for SysfsConfigIo {
    fn default() -> Self {
        SysfsConfigIo::new()
    }
}

impl PciConfigIo for SysfsConfigIo {
    fn read(&self, bdf: PciBdf, offset: u32, width: AccessWidth) -> io::Result<u32> {
        validate_access(offset, width)?;

        let file = OpenOptions::new().read(true).open(self.config_path(bdf))?;

        let mut bytes = [0u8; 4];
        file.read_exact_at(&mut bytes[..width.bytes() as usize], offset.into())?;

        Ok(u32::from_le_bytes(bytes))
    }

    fn write(&self, bdf: PciBdf, offset: u32, width: AccessWidth, value: u32) -> io::Result<()> {
        validate_access(offset, width)?;

        let file = OpenOptions::new().write(true).open(self.config_path(bdf))?;

        let bytes = value.to_le_bytes();
        file.write_all_at(&bytes[..width.bytes() as usize], offset.into())
    }
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
