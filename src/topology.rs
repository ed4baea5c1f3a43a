// SPDX-License-Identifier: MIT OR Apache-2.0

//! The host's PCI topology, as seen by the PTM prober.
//!
//! Enumerating the host PCI hierarchy is not this crate's job. Instead, the prober asks a
//! [`PciTopology`] about the functions it cares about. Every answer is a fresh value, so nothing
//! handed out before a [`PciTopology::refresh`] can dangle after it.

/* ---------------------------------------------------------------------------------------------- */

use std::fmt;
use std::io;

use crate::bdf::PciBdf;
use crate::config::caps::PcieDeviceType;

/* ---------------------------------------------------------------------------------------------- */

/// A physical PCI function on the host.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PhysicalDevice {
    pub bdf: PciBdf,
}

impl PhysicalDevice {
    pub fn new(bdf: PciBdf) -> PhysicalDevice {
        PhysicalDevice { bdf }
    }
}

impl From<PciBdf> for PhysicalDevice {
    fn from(bdf: PciBdf) -> Self {
        PhysicalDevice::new(bdf)
    }
}

impl fmt::Display for PhysicalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.bdf.fmt(f)
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// The bus numbers programmed into a bridge or root port.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct BridgeBuses {
    /// The bus the bridge itself sits on.
    pub primary: u8,
    /// The bus directly below the bridge.
    pub secondary: u8,
    /// The highest-numbered bus below the bridge.
    pub subordinate: u8,
}

impl BridgeBuses {
    /// Whether functions on `bus` are downstream of the bridge.
    pub fn contains(&self, bus: u8) -> bool {
        (self.secondary..=self.subordinate).contains(&bus)
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// Answers questions about the host's PCI hierarchy.
///
/// Implementations are expected to cache an enumeration of the hierarchy and rebuild it in
/// [`PciTopology::refresh`]. The prober always refreshes before asking anything else.
pub trait PciTopology {
    /// Re-enumerates the host PCI hierarchy.
    fn refresh(&mut self) -> io::Result<()>;

    /// Returns the offset of the given Extended Capability of `device`, or `None` if it has none.
    fn find_extended_capability(&self, device: &PhysicalDevice, capability_id: u16) -> Option<u16>;

    /// The Device/Port Type of a PCI Express function.
    fn pcie_device_type(&self, device: &PhysicalDevice) -> PcieDeviceType;

    /// Returns the root port above `device`, or `None` if it can't be determined.
    fn find_root_port(&self, device: &PhysicalDevice) -> Option<PhysicalDevice>;

    /// Reads the bus numbers of a bridge.
    fn bridge_buses(&self, bridge: &PhysicalDevice) -> io::Result<BridgeBuses>;

    /// Counts the functions whose bus is within the bridge's secondary..=subordinate range. The
    /// bridge itself is never counted.
    fn count_devices_on_bridge(&self, buses: &BridgeBuses) -> usize;

    /// Reads a dword of `device`'s config space. Offsets past the end read as all-ones.
    fn read_config_u32(&self, device: &PhysicalDevice, offset: u32) -> u32;
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
