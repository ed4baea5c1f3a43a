// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mocks of the interfaces this crate consumes, to facilitate testing code built on top of it.

/* ---------------------------------------------------------------------------------------------- */

use std::io;

use mockall::mock;

use crate::assign::{AssignPciDev, PciDeviceAssigner};
use crate::bdf::PciBdf;
use crate::config::caps::PcieDeviceType;
use crate::config::{AccessWidth, PciConfigIo};
use crate::topology::{BridgeBuses, PciTopology, PhysicalDevice};

/* ---------------------------------------------------------------------------------------------- */

mock! {
    #[derive(Debug)]
    pub PciTopology {}

    impl PciTopology for PciTopology {
        fn refresh(&mut self) -> io::Result<()>;
        fn find_extended_capability(&self, device: &PhysicalDevice, capability_id: u16) -> Option<u16>;
        fn pcie_device_type(&self, device: &PhysicalDevice) -> PcieDeviceType;
        fn find_root_port(&self, device: &PhysicalDevice) -> Option<PhysicalDevice>;
        fn bridge_buses(&self, bridge: &PhysicalDevice) -> io::Result<BridgeBuses>;
        fn count_devices_on_bridge(&self, buses: &BridgeBuses) -> usize;
        fn read_config_u32(&self, device: &PhysicalDevice, offset: u32) -> u32;
    }
}

mock! {
    #[derive(Debug)]
    pub PciDeviceAssigner {}

    impl PciDeviceAssigner for PciDeviceAssigner {
        fn assign_pcidev(&mut self, assignment: &AssignPciDev) -> io::Result<()>;
    }
}

mock! {
    #[derive(Debug)]
    pub PciConfigIo {}

    impl PciConfigIo for PciConfigIo {
        fn read(&self, bdf: PciBdf, offset: u32, width: AccessWidth) -> io::Result<u32>;
        fn write(&self, bdf: PciBdf, offset: u32, width: AccessWidth, value: u32) -> io::Result<()>;
    }
}

/* ---------------------------------------------------------------------------------------------- */
