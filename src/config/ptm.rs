// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Precision Time Measurement (PTM) Extended Capability, described in Section 7.9.15 of the
//! "PCI Express® Base Specification Revision 6.0".
//!
//! This crate only inspects these registers to decide whether PTM can be passed through; it never
//! enables PTM itself. Once a root port is passed through, the guest programs the control register
//! directly.

/* ---------------------------------------------------------------------------------------------- */

use std::io;

use crate::config::PciConfigSpace;

/* ---------------------------------------------------------------------------------------------- */

/// Offset of the PTM Capability register within the capability.
pub const PCIR_PTM_CAP: u32 = 0x04;
pub const PCIM_PTM_CAP_REQ: u32 = 0x0000_0001;
pub const PCIM_PTM_CAP_RSP: u32 = 0x0000_0002;
pub const PCIM_PTM_CAP_ROOT: u32 = 0x0000_0004;
pub const PCIM_PTM_GRANULARITY: u32 = 0x0000_ff00;

/// Offset of the PTM Control register within the capability.
pub const PCIR_PTM_CTRL: u32 = 0x08;
pub const PCIM_PTM_CTRL_ENABLE: u32 = 0x0000_0001;
pub const PCIM_PTM_CTRL_ROOT_SELECT: u32 = 0x0000_0002;
pub const PCIM_PTM_CTRL_GRANULARITY: u32 = 0x0000_ff00;

/* ---------------------------------------------------------------------------------------------- */

/// A snapshot of the PTM Capability register.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PtmCapabilityRegister(pub u32);

impl PtmCapabilityRegister {
    /// The function can request time from an upstream PTM root.
    pub fn requestor_capable(&self) -> bool {
        self.0 & PCIM_PTM_CAP_REQ != 0
    }

    pub fn responder_capable(&self) -> bool {
        self.0 & PCIM_PTM_CAP_RSP != 0
    }

    /// The function can be the root of a PTM hierarchy.
    pub fn root_capable(&self) -> bool {
        self.0 & PCIM_PTM_CAP_ROOT != 0
    }

    /// Local clock granularity in nanoseconds. 0 means "not implemented" and 0xff means "greater
    /// than 254 ns".
    pub fn local_clock_granularity(&self) -> u8 {
        ((self.0 & PCIM_PTM_GRANULARITY) >> 8) as u8
    }
}

/// A snapshot of the PTM Control register.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PtmControlRegister(pub u32);

impl PtmControlRegister {
    pub fn enabled(&self) -> bool {
        self.0 & PCIM_PTM_CTRL_ENABLE != 0
    }

    pub fn root_selected(&self) -> bool {
        self.0 & PCIM_PTM_CTRL_ROOT_SELECT != 0
    }

    pub fn effective_granularity(&self) -> u8 {
        ((self.0 & PCIM_PTM_CTRL_GRANULARITY) >> 8) as u8
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        PtmControlRegister(set_bits(self.0, PCIM_PTM_CTRL_ENABLE, enabled))
    }

    pub fn with_root_selected(self, root_selected: bool) -> Self {
        PtmControlRegister(set_bits(self.0, PCIM_PTM_CTRL_ROOT_SELECT, root_selected))
    }
}

fn set_bits(value: u32, mask: u32, set: bool) -> u32 {
    if set {
        value | mask
    } else {
        value & !mask
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// Reads the PTM Capability register of a PTM Extended Capability found at `offset`.
pub fn read_ptm_capability(config: PciConfigSpace, offset: u16) -> io::Result<PtmCapabilityRegister> {
    let value = config.read::<u32>(u32::from(offset) + PCIR_PTM_CAP)?;
    Ok(PtmCapabilityRegister(value))
}

/// Reads the PTM Control register of a PTM Extended Capability found at `offset`.
pub fn read_ptm_control(config: PciConfigSpace, offset: u16) -> io::Result<PtmControlRegister> {
    let value = config.read::<u32>(u32::from(offset) + PCIR_PTM_CTRL)?;
    Ok(PtmControlRegister(value))
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
