// SPDX-License-Identifier: MIT OR Apache-2.0

//! A virtual root port that forwards everything to a physical one.
//!
//! PTM needs the guest to see a root port with a PTM Extended Capability above the passed-through
//! endpoint. Rather than emulating one, [`VirtualRootPort`] proxies every config space access to
//! the physical root port selected by the prober, so the guest programs the real PTM Control
//! register.

/* ---------------------------------------------------------------------------------------------- */

use std::io;
use std::sync::Arc;

use tracing::{info, warn};

use crate::assign::AssignPciDev;
use crate::config::{AccessWidth, PciConfigIo};
use crate::vpci::{PciVdev, PciVdevOps, VdevId, VdevRegistry, VpciError};

/* ---------------------------------------------------------------------------------------------- */

#[derive(Debug)]
pub struct VirtualRootPort {
    io: Arc<dyn PciConfigIo>,
}

impl VirtualRootPort {
    pub fn new(io: Arc<dyn PciConfigIo>) -> VirtualRootPort {
        VirtualRootPort { io }
    }

    /// Adds a virtual root port for a root port assigned by the prober.
    pub fn attach(
        registry: &mut VdevRegistry,
        assignment: &AssignPciDev,
        io: Arc<dyn PciConfigIo>,
    ) -> Result<VdevId, VpciError> {
        registry.add(
            PciVdev::new(assignment.virt_bdf, assignment.phys_bdf),
            Box::new(VirtualRootPort::new(io)),
        )
    }
}

impl PciVdevOps for VirtualRootPort {
    fn init(&mut self, vdev: &mut PciVdev) {
        info!(virt_bdf = %vdev.bdf, phys_bdf = %vdev.phys_bdf, "virtual root port initialized");
    }

    fn deinit(&mut self, vdev: &mut PciVdev) {
        vdev.parent_user = None;
        vdev.user = None;
    }

    fn read_cfg(
        &self,
        vdev: &PciVdev,
        offset: u32,
        width: AccessWidth,
        value: &mut u32,
    ) -> io::Result<()> {
        *value = match self.io.read(vdev.phys_bdf, offset, width) {
            Ok(v) => v,
            Err(err) => {
                warn!(
                    phys_bdf = %vdev.phys_bdf,
                    offset,
                    width = width.bytes(),
                    error = %err,
                    "root port config read failed"
                );
                width.mask()
            }
        };
        Ok(())
    }

    fn write_cfg(
        &mut self,
        vdev: &PciVdev,
        offset: u32,
        width: AccessWidth,
        value: u32,
    ) -> io::Result<()> {
        if let Err(err) = self.io.write(vdev.phys_bdf, offset, width, value) {
            warn!(
                phys_bdf = %vdev.phys_bdf,
                offset,
                width = width.bytes(),
                error = %err,
                "root port config write failed"
            );
        }
        Ok(())
    }
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
