// SPDX-License-Identifier: MIT OR Apache-2.0

//! A crate for passing PCIe Precision Time Measurement (PTM) through to virtual machines.
//!
//! PTM lets an endpoint synchronize its clock with the root complex. For a guest to use PTM on a
//! passed-through endpoint, it must also see the PTM root above that endpoint. This crate decides
//! whether that is possible and, if it is, hands the physical root port to the guest behind a
//! virtual root port that forwards every config space access to it.
//!
//! The work is split in two:
//!
//! 1. [`ptm::probe`] checks the endpoint and its root port against the host's PCI hierarchy,
//!    described by a [`PciTopology`](topology::PciTopology), and assigns the root port to the
//!    guest through a [`PciDeviceAssigner`](assign::PciDeviceAssigner);
//! 2. [`VirtualRootPort`](vpci::vroot_port::VirtualRootPort) is the virtual PCI function the guest
//!    then sees, kept in a [`VdevRegistry`](vpci::VdevRegistry) along with the guest's other
//!    virtual functions.
//!
//! Physical config space is reached through a [`PciConfigIo`](config::PciConfigIo). Two backends
//! are provided: [`SysfsConfigIo`](backends::sysfs::SysfsConfigIo), which uses Linux's sysfs and
//! can be disabled through the `sysfs` crate feature, and
//! [`MemoryConfigSpace`](backends::memory::MemoryConfigSpace), which is handy for testing. The
//! [`config`] module also provides walkers for Capabilities and Extended Capabilities on top of any
//! backend, which implementations of [`PciTopology`](topology::PciTopology) may find useful.
//!
//! This crate logs through `tracing` and never installs a subscriber itself.
//!
//! Example usage:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ptm_passthru::assign::PciDeviceAssigner;
//! use ptm_passthru::backends::sysfs::SysfsConfigIo;
//! use ptm_passthru::ptm::{probe, PassthroughDevice, PtmProbeOutcome};
//! use ptm_passthru::topology::{PciTopology, PhysicalDevice};
//! use ptm_passthru::vpci::vroot_port::VirtualRootPort;
//! use ptm_passthru::vpci::VdevRegistry;
//!
//! let assigner: &mut dyn PciDeviceAssigner = unimplemented!();
//! let topology: &mut dyn PciTopology = unimplemented!();
//!
//! let ptdev = PassthroughDevice {
//!     phys: PhysicalDevice::new("01:00.0".parse()?),
//!     virt_bdf: "00:05.0".parse()?,
//!     pcie_cap: Some(0x40),
//! };
//!
//! let mut registry = VdevRegistry::new();
//!
//! match probe(assigner, topology, &ptdev)? {
//!     PtmProbeOutcome::RootComplexIntegrated => {}
//!     PtmProbeOutcome::RootPortAssigned(assignment) => {
//!         VirtualRootPort::attach(&mut registry, &assignment, Arc::new(SysfsConfigIo::new()))?;
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/* ---------------------------------------------------------------------------------------------- */

pub mod assign;
pub mod backends;
pub mod bdf;
pub mod config;
#[cfg(any(test, feature = "test-mocks"))]
pub mod mocks;
pub mod ptm;
pub mod topology;
pub mod vpci;

/* ---------------------------------------------------------------------------------------------- */

/// Sends `tracing` output of the current test to the test harness. Filtered by `RUST_LOG`.
#[cfg(test)]
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/* ---------------------------------------------------------------------------------------------- */
