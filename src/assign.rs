// SPDX-License-Identifier: MIT OR Apache-2.0

/* ---------------------------------------------------------------------------------------------- */

use std::io;

use crate::bdf::PciBdf;

/* ---------------------------------------------------------------------------------------------- */

/// A request to bind a physical PCI function to a guest at some virtual BDF.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AssignPciDev {
    pub phys_bdf: PciBdf,
    pub virt_bdf: PciBdf,
}

/// The hypervisor's device assignment interface, bound to a single guest.
///
/// Once a physical function is assigned, the guest owns its config space. Unassigning it is up to
/// the implementation; this crate never asks for it.
pub trait PciDeviceAssigner {
    /// Assigns `assignment.phys_bdf` to the guest at `assignment.virt_bdf`. Blocks until the
    /// hypervisor accepts or rejects the request.
    fn assign_pcidev(&mut self, assignment: &AssignPciDev) -> io::Result<()>;
}

/* ---------------------------------------------------------------------------------------------- */
