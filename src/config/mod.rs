// SPDX-License-Identifier: MIT OR Apache-2.0

//! Access to the configuration space of physical PCI functions.
//!
//! Hardware is reached through a [`PciConfigIo`], which reads and writes 1, 2, or 4 bytes at some
//! offset of the config space of the function at some [`PciBdf`]. On top of that,
//! [`PciConfigSpace`] binds one function and provides typed accesses, and the [`caps`],
//! [`ext_caps`], and [`ptm`] modules know how to find and decode the registers this crate cares
//! about.

/* ---------------------------------------------------------------------------------------------- */

pub mod caps;
pub mod ext_caps;
pub mod ptm;

use num_traits::{PrimInt, Unsigned};
use std::fmt::{Debug, LowerHex};
use std::io::{self, ErrorKind};

use crate::bdf::PciBdf;

/* ---------------------------------------------------------------------------------------------- */

/// Length of conventional PCI config space.
pub const PCI_CONFIG_SPACE_LEN: u32 = 0x100;

/// Length of PCI Express extended config space.
pub const PCIE_CONFIG_SPACE_LEN: u32 = 0x1000;

pub const PCIR_VENDOR_ID: u32 = 0x00;
pub const PCIR_STATUS: u32 = 0x06;
pub const PCIR_HEADER_TYPE: u32 = 0x0e;
pub const PCIR_PRIMARY_BUS: u32 = 0x18;
pub const PCIR_SECONDARY_BUS: u32 = 0x19;
pub const PCIR_SUBORDINATE_BUS: u32 = 0x1a;
pub const PCIR_CAPABILITIES_POINTER: u32 = 0x34;

/// "Capabilities List" bit of the Status register.
pub const PCIM_STATUS_CAP_LIST: u16 = 0x0010;

/// "Header Layout" bits of the Header Type register.
pub const PCIM_HEADER_LAYOUT: u8 = 0x7f;
pub const PCIM_HEADER_LAYOUT_BRIDGE: u8 = 0x01;

/* ---------------------------------------------------------------------------------------------- */

/// The size of a single config space access.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AccessWidth {
    Byte = 1,
    Word = 2,
    Dword = 4,
}

impl AccessWidth {
    pub fn bytes(&self) -> u32 {
        *self as u32
    }

    /// The bits of a `u32` that a value of this width occupies.
    pub fn mask(&self) -> u32 {
        match self {
            AccessWidth::Byte => 0xff,
            AccessWidth::Word => 0xffff,
            AccessWidth::Dword => 0xffff_ffff,
        }
    }
}

impl TryFrom<u32> for AccessWidth {
    type Error = io::Error;

    fn try_from(bytes: u32) -> io::Result<Self> {
        match bytes {
            1 => Ok(AccessWidth::Byte),
            2 => Ok(AccessWidth::Word),
            4 => Ok(AccessWidth::Dword),
            _ => Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("Config space accesses are 1, 2, or 4 bytes wide, got {}", bytes),
            )),
        }
    }
}

/// Fails unless an access of the given width at the given offset is naturally aligned and falls
/// within extended config space.
pub fn validate_access(offset: u32, width: AccessWidth) -> io::Result<()> {
    let end = u64::from(offset) + u64::from(width.bytes());

    if end > u64::from(PCIE_CONFIG_SPACE_LEN) {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!(
                "Tried to access config space range [{:#x}, {:#x}), must be within [0x0, {:#x})",
                offset, end, PCIE_CONFIG_SPACE_LEN
            ),
        ));
    }

    if offset % width.bytes() != 0 {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!(
                "Config space access at {:#x} must be {}-byte aligned",
                offset,
                width.bytes()
            ),
        ));
    }

    Ok(())
}

/* ---------------------------------------------------------------------------------------------- */

/// Raw config space I/O on physical PCI functions.
///
/// Values are passed in the low-order bits of a `u32`, in native endianness. Implementations must
/// be safe to call concurrently; they perform no caching, so every read observes the register's
/// state at the time of the call.
pub trait PciConfigIo: Debug + Send + Sync {
    /// Read `width` bytes at `offset` of the config space of the function at `bdf`.
    fn read(&self, bdf: PciBdf, offset: u32, width: AccessWidth) -> io::Result<u32>;

    /// Write the low-order `width` bytes of `value` at `offset` of the config space of the
    /// function at `bdf`.
    fn write(&self, bdf: PciBdf, offset: u32, width: AccessWidth, value: u32) -> io::Result<()>;
}

/* ---------------------------------------------------------------------------------------------- */

use private::Sealed;
mod private {
    /// Private trait that can be used as a supertrait to make other traits non-implementable from
    /// outside this crate.
    pub trait Sealed {}
}

/// Trait for types that represent the value of a config space register.
///
/// This is implemented for [`u8`], [`u16`], and [`u32`].
///
/// This trait is _sealed_, and thus cannot be implemented by users of the crate.
pub trait PciRegisterValue: PrimInt + Unsigned + Debug + LowerHex + Sealed {
    const WIDTH: AccessWidth;

    fn from_raw(raw: u32) -> Self;

    fn into_raw(self) -> u32;
}

impl Sealed for u8 {}
impl PciRegisterValue for u8 {
    const WIDTH: AccessWidth = AccessWidth::Byte;

    fn from_raw(raw: u32) -> Self {
        raw as u8
    }

    fn into_raw(self) -> u32 {
        self.into()
    }
}

impl Sealed for u16 {}
impl PciRegisterValue for u16 {
    const WIDTH: AccessWidth = AccessWidth::Word;

    fn from_raw(raw: u32) -> Self {
        raw as u16
    }

    fn into_raw(self) -> u32 {
        self.into()
    }
}

impl Sealed for u32 {}
impl PciRegisterValue for u32 {
    const WIDTH: AccessWidth = AccessWidth::Dword;

    fn from_raw(raw: u32) -> Self {
        raw
    }

    fn into_raw(self) -> u32 {
        self
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// The config space of a single physical PCI function.
///
/// This is cheap to create and copy; it borrows the [`PciConfigIo`] and holds nothing else.
#[derive(Clone, Copy, Debug)]
pub struct PciConfigSpace<'a> {
    io: &'a dyn PciConfigIo,
    bdf: PciBdf,
}

impl<'a> PciConfigSpace<'a> {
    pub fn new(io: &'a dyn PciConfigIo, bdf: PciBdf) -> Self {
        PciConfigSpace { io, bdf }
    }

    pub fn bdf(&self) -> PciBdf {
        self.bdf
    }

    pub fn io(&self) -> &'a dyn PciConfigIo {
        self.io
    }

    pub fn read<T: PciRegisterValue>(&self, offset: u32) -> io::Result<T> {
        let raw = self.io.read(self.bdf, offset, T::WIDTH)?;
        Ok(T::from_raw(raw))
    }

    pub fn write<T: PciRegisterValue>(&self, offset: u32, value: T) -> io::Result<()> {
        self.io.write(self.bdf, offset, T::WIDTH, value.into_raw())
    }

    /// Whether the function responds at all. Absent functions read as all-ones.
    pub fn is_present(&self) -> io::Result<bool> {
        Ok(self.read::<u16>(PCIR_VENDOR_ID)? != 0xffff)
    }

    /// Whether the function has a type 1 (PCI-to-PCI bridge) header.
    pub fn is_bridge(&self) -> io::Result<bool> {
        let header_type = self.read::<u8>(PCIR_HEADER_TYPE)?;
        Ok(header_type & PCIM_HEADER_LAYOUT == PCIM_HEADER_LAYOUT_BRIDGE)
    }
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
