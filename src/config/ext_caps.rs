// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lookup of PCI Express Extended Capabilities.
//!
//! For plain old non-extended Capabilities, see [`caps`](super::caps).

/* ---------------------------------------------------------------------------------------------- */

use std::io::{self, ErrorKind};
use std::ops::Range;

use crate::config::caps::pcie_capability;
use crate::config::{PciConfigSpace, PCIE_CONFIG_SPACE_LEN, PCI_CONFIG_SPACE_LEN};

/* ---------------------------------------------------------------------------------------------- */

pub const PCIZ_PTM: u16 = 0x001f;

/* ---------------------------------------------------------------------------------------------- */

/// An Extended Capability header, as found at the start of every Extended Capability.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExtendedCapabilityHeader(pub u32);

impl ExtendedCapabilityHeader {
    pub fn capability_id(&self) -> u16 {
        self.0 as u16
    }

    /// This field is a PCI-SIG defined version number that indicates the version of the
    /// Capability structure present.
    pub fn capability_version(&self) -> u8 {
        ((self.0 >> 16) & 0xf) as u8
    }

    /// The offset of the next Extended Capability, or 0x000 if this is the last one.
    pub fn next_capability_offset(&self) -> u16 {
        (self.0 >> 20) as u16
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// Returns the offsets and headers of all Extended Capabilities, in list order.
///
/// Functions that aren't PCI Express have no Extended Capabilities, and neither do functions whose
/// first header at 0x100 is all-zeroes or all-ones.
pub fn extended_capabilities(
    config: PciConfigSpace,
) -> io::Result<Vec<(u16, ExtendedCapabilityHeader)>> {
    const CAP_RANGE: Range<u32> = PCI_CONFIG_SPACE_LEN..PCIE_CONFIG_SPACE_LEN;

    // Number of dwords in extended config space
    const ITERATIONS_UPPER_BOUND: usize = ((CAP_RANGE.end - CAP_RANGE.start) / 4) as usize;

    // conventional functions may return garbage past 0x100
    if pcie_capability(config)?.is_none() {
        return Ok(Vec::new());
    }

    let mut caps = Vec::new();
    let mut next_cap_offset = CAP_RANGE.start;

    while next_cap_offset != 0x000 {
        if !CAP_RANGE.contains(&next_cap_offset) {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "{}: Extended Capability has offset 0x{:03x}, should be in [0x100, 0xfff]",
                    config.bdf(),
                    next_cap_offset,
                ),
            ));
        }

        if caps.len() == ITERATIONS_UPPER_BOUND {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "{}: Found more than {} Extended Capabilities, which implies a capability \
                    list cycle",
                    config.bdf(),
                    ITERATIONS_UPPER_BOUND,
                ),
            ));
        }

        let header = ExtendedCapabilityHeader(config.read::<u32>(next_cap_offset)?);

        if header.0 == 0x0000_0000 || header.0 == 0xffff_ffff {
            // empty list, or the function went away
            break;
        }

        caps.push((next_cap_offset as u16, header));
        next_cap_offset = u32::from(header.next_capability_offset()) & 0xffc;
    }

    Ok(caps)
}

/// Returns the offset of the first Extended Capability with the given ID, or `None` if there is
/// none.
pub fn find_extended_capability(
    config: PciConfigSpace,
    capability_id: u16,
) -> io::Result<Option<u16>> {
    Ok(extended_capabilities(config)?
        .into_iter()
        .find(|(_, header)| header.capability_id() == capability_id)
        .map(|(offset, _)| offset))
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
