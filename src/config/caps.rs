// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lookup of PCI Capabilities in conventional config space, and decoding of the parts of the PCI
//! Express Capability and of the type 1 header that PTM passthrough depends on.
//!
//! | Section number | Section title | Item |
//! |-|-|-|
//! | 7.5.1.3.5 | Primary/Secondary/Subordinate Bus Number Registers | [`bridge_buses`] |
//! | 7.5.3.2 | PCI Express Capabilities Register | [`PcieDeviceType`] |

/* ---------------------------------------------------------------------------------------------- */

use std::fmt;
use std::io::{self, ErrorKind};
use std::ops::Range;

use crate::config::{
    PciConfigSpace, PCIM_STATUS_CAP_LIST, PCIR_CAPABILITIES_POINTER, PCIR_PRIMARY_BUS,
    PCIR_SECONDARY_BUS, PCIR_STATUS, PCIR_SUBORDINATE_BUS, PCI_CONFIG_SPACE_LEN,
};
use crate::topology::BridgeBuses;

/* ---------------------------------------------------------------------------------------------- */

pub const PCIY_EXPRESS: u8 = 0x10;

/// Offset of the PCI Express Capabilities register within the PCI Express Capability.
pub const PCIER_FLAGS: u32 = 0x02;
pub const PCIEM_FLAGS_TYPE: u16 = 0x00f0;

/* ---------------------------------------------------------------------------------------------- */

/// Returns the offset of the first Capability with the given ID, or `None` if there is none.
///
/// Fails if the list is malformed: an entry points outside of `[0x40, 0xff]` or the list is
/// longer than could possibly fit, which implies a cycle.
pub fn find_capability(config: PciConfigSpace, capability_id: u8) -> io::Result<Option<u8>> {
    const CAP_RANGE: Range<u32> = 0x40..PCI_CONFIG_SPACE_LEN;

    // one entry per byte would already be a cycle
    const ITERATIONS_UPPER_BOUND: u32 = CAP_RANGE.end - CAP_RANGE.start;

    if config.read::<u16>(PCIR_STATUS)? & PCIM_STATUS_CAP_LIST == 0 {
        return Ok(None);
    }

    let mut next_cap_offset = config.read::<u8>(PCIR_CAPABILITIES_POINTER)? & 0xfc;
    let mut iterations = 0;

    while next_cap_offset != 0x00 {
        if !CAP_RANGE.contains(&u32::from(next_cap_offset)) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "{}: Capability has offset 0x{:02x}, should be in [0x40, 0xff]",
                    config.bdf(),
                    next_cap_offset,
                ),
            ));
        }

        if iterations == ITERATIONS_UPPER_BOUND {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "{}: Found more than {} Capabilities, which implies a capability list cycle",
                    config.bdf(),
                    ITERATIONS_UPPER_BOUND,
                ),
            ));
        }

        let offset = u32::from(next_cap_offset);
        if config.read::<u8>(offset)? == capability_id {
            return Ok(Some(next_cap_offset));
        }

        next_cap_offset = config.read::<u8>(offset + 1)? & 0xfc;
        iterations += 1;
    }

    Ok(None)
}

/// Returns the offset of the PCI Express Capability, or `None` for conventional PCI functions.
pub fn pcie_capability(config: PciConfigSpace) -> io::Result<Option<u8>> {
    find_capability(config, PCIY_EXPRESS)
}

/* ---------------------------------------------------------------------------------------------- */

/// The "Device/Port Type" field of the PCI Express Capabilities register.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PcieDeviceType {
    Endpoint,
    LegacyEndpoint,
    RootPort,
    UpstreamSwitchPort,
    DownstreamSwitchPort,
    PcieToPciBridge,
    PciToPcieBridge,
    RootComplexIntegratedEndpoint,
    RootComplexEventCollector,
    Reserved(u8),
}

impl PcieDeviceType {
    pub fn from_bits(bits: u8) -> PcieDeviceType {
        match bits & 0x0f {
            0x0 => PcieDeviceType::Endpoint,
            0x1 => PcieDeviceType::LegacyEndpoint,
            0x4 => PcieDeviceType::RootPort,
            0x5 => PcieDeviceType::UpstreamSwitchPort,
            0x6 => PcieDeviceType::DownstreamSwitchPort,
            0x7 => PcieDeviceType::PcieToPciBridge,
            0x8 => PcieDeviceType::PciToPcieBridge,
            0x9 => PcieDeviceType::RootComplexIntegratedEndpoint,
            0xa => PcieDeviceType::RootComplexEventCollector,
            other => PcieDeviceType::Reserved(other),
        }
    }

    pub fn into_bits(self) -> u8 {
        match self {
            PcieDeviceType::Endpoint => 0x0,
            PcieDeviceType::LegacyEndpoint => 0x1,
            PcieDeviceType::RootPort => 0x4,
            PcieDeviceType::UpstreamSwitchPort => 0x5,
            PcieDeviceType::DownstreamSwitchPort => 0x6,
            PcieDeviceType::PcieToPciBridge => 0x7,
            PcieDeviceType::PciToPcieBridge => 0x8,
            PcieDeviceType::RootComplexIntegratedEndpoint => 0x9,
            PcieDeviceType::RootComplexEventCollector => 0xa,
            PcieDeviceType::Reserved(bits) => bits & 0x0f,
        }
    }

    /// Decodes the type from the value of the PCI Express Capabilities register.
    pub fn from_capabilities_register(flags: u16) -> PcieDeviceType {
        PcieDeviceType::from_bits(((flags & PCIEM_FLAGS_TYPE) >> 4) as u8)
    }
}

impl fmt::Display for PcieDeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PcieDeviceType::Endpoint => "PCI Express Endpoint",
            PcieDeviceType::LegacyEndpoint => "Legacy PCI Express Endpoint",
            PcieDeviceType::RootPort => "Root Port",
            PcieDeviceType::UpstreamSwitchPort => "Upstream Switch Port",
            PcieDeviceType::DownstreamSwitchPort => "Downstream Switch Port",
            PcieDeviceType::PcieToPciBridge => "PCI Express to PCI/PCI-X Bridge",
            PcieDeviceType::PciToPcieBridge => "PCI/PCI-X to PCI Express Bridge",
            PcieDeviceType::RootComplexIntegratedEndpoint => "Root Complex Integrated Endpoint",
            PcieDeviceType::RootComplexEventCollector => "Root Complex Event Collector",
            PcieDeviceType::Reserved(bits) => return write!(f, "reserved type {:#x}", bits),
        };
        f.write_str(name)
    }
}

/// Returns the function's Device/Port Type, or `None` for conventional PCI functions.
pub fn pcie_device_type(config: PciConfigSpace) -> io::Result<Option<PcieDeviceType>> {
    let offset = match pcie_capability(config)? {
        Some(offset) => u32::from(offset),
        None => return Ok(None),
    };

    let flags = config.read::<u16>(offset + PCIER_FLAGS)?;
    Ok(Some(PcieDeviceType::from_capabilities_register(flags)))
}

pub fn is_root_port(config: PciConfigSpace) -> io::Result<bool> {
    Ok(pcie_device_type(config)? == Some(PcieDeviceType::RootPort))
}

/* ---------------------------------------------------------------------------------------------- */

/// Reads the bus numbers of a bridge, failing with [`ErrorKind::InvalidInput`] if the function
/// doesn't have a type 1 header.
pub fn bridge_buses(config: PciConfigSpace) -> io::Result<BridgeBuses> {
    if !config.is_bridge()? {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("{} is not a bridge", config.bdf()),
        ));
    }

    Ok(BridgeBuses {
        primary: config.read(PCIR_PRIMARY_BUS)?,
        secondary: config.read(PCIR_SECONDARY_BUS)?,
        subordinate: config.read(PCIR_SUBORDINATE_BUS)?,
    })
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
