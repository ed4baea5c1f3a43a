// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deciding whether PTM can be passed through to a guest, and passing through the root port it
//! needs.
//!
//! A PTM requestor only works if every hop between it and a PTM root is faithful to the hardware.
//! For a root complex integrated endpoint there are no hops. For a regular endpoint, the root port
//! above it must itself be passed through, which is only safe if the endpoint is the one and only
//! function below that root port: the guest gets raw access to the root port's config space, and
//! with it control over the whole bus behind it.

/* ---------------------------------------------------------------------------------------------- */

use std::io;

use thiserror::Error;

use crate::assign::{AssignPciDev, PciDeviceAssigner};
use crate::bdf::PciBdf;
use crate::config::caps::PcieDeviceType;
use crate::config::ext_caps::PCIZ_PTM;
use crate::config::ptm::{PtmCapabilityRegister, PCIR_PTM_CAP};
use crate::topology::{PciTopology, PhysicalDevice};

/* ---------------------------------------------------------------------------------------------- */

/// A physical function that is being passed through to a guest.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PassthroughDevice {
    pub phys: PhysicalDevice,
    /// Where the guest sees the function.
    pub virt_bdf: PciBdf,
    /// Offset of the function's PCI Express Capability, or `None` for conventional PCI.
    pub pcie_cap: Option<u8>,
}

/// What [`probe`] did to make PTM work for a device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PtmProbeOutcome {
    /// The device is a root complex integrated endpoint, so no root port is involved.
    RootComplexIntegrated,
    /// The device's root port was assigned to the guest. A virtual root port must now be created
    /// to forward the guest's config space accesses to it.
    RootPortAssigned(AssignPciDev),
}

#[derive(Debug, Error)]
pub enum PtmError {
    #[error("failed to scan the host PCI hierarchy")]
    TopologyRefreshFailed(#[source] io::Error),

    #[error("{0} is not a PCI Express device")]
    NotPcieCapable(PciBdf),

    #[error("{0} doesn't support PTM")]
    PtmUnsupported(PciBdf),

    #[error(
        "PTM can only be enabled on root complex integrated endpoints or endpoints, but {bdf} is \
        a {device_type}"
    )]
    UnsupportedDeviceType {
        bdf: PciBdf,
        device_type: PcieDeviceType,
    },

    #[error("{0} must be a PTM requestor")]
    RequestorCapabilityMissing(PciBdf),

    #[error("cannot find root port of {0}")]
    RootPortNotFound(PciBdf),

    #[error("root port {root_port} of {device} is not a PTM root")]
    RootCapabilityMissing { root_port: PciBdf, device: PciBdf },

    #[error("failed to read bus numbers of root port {root_port}")]
    BridgeRangeQueryFailed {
        root_port: PciBdf,
        #[source]
        source: io::Error,
    },

    #[error(
        "cannot pass through root port {root_port} that has {count} devices below it, expected 1"
    )]
    RootPortNotExclusive { root_port: PciBdf, count: usize },

    #[error("failed to assign root port {} to the guest at {}", .assignment.phys_bdf, .assignment.virt_bdf)]
    AssignmentRejected {
        assignment: AssignPciDev,
        #[source]
        source: io::Error,
    },
}

/* ---------------------------------------------------------------------------------------------- */

/// Checks whether PTM can be enabled for `ptdev` in the guest, and if `ptdev` is an endpoint,
/// assigns its root port to the guest at the same virtual BDF as `ptdev`.
///
/// Nothing is assigned unless every check passes. Failures are final: they describe how the
/// hardware is wired, which retrying won't change.
pub fn probe(
    assigner: &mut dyn PciDeviceAssigner,
    topology: &mut dyn PciTopology,
    ptdev: &PassthroughDevice,
) -> Result<PtmProbeOutcome, PtmError> {
    topology.refresh().map_err(PtmError::TopologyRefreshFailed)?;

    let device = &ptdev.phys;

    if ptdev.pcie_cap.is_none() {
        return Err(PtmError::NotPcieCapable(device.bdf));
    }

    let device_ptm_offset = topology
        .find_extended_capability(device, PCIZ_PTM)
        .ok_or(PtmError::PtmUnsupported(device.bdf))?;

    match topology.pcie_device_type(device) {
        PcieDeviceType::Endpoint => {
            let cap = ptm_capability_of(&*topology, device, device_ptm_offset);
            if !cap.requestor_capable() {
                return Err(PtmError::RequestorCapabilityMissing(device.bdf));
            }

            let root_port = topology
                .find_root_port(device)
                .ok_or(PtmError::RootPortNotFound(device.bdf))?;

            check_root_port(&*topology, device, &root_port)?;

            let assignment = AssignPciDev {
                phys_bdf: root_port.bdf,
                // the virtual root port takes the same BDF as its downstream device
                virt_bdf: ptdev.virt_bdf,
            };

            assign_root_port(assigner, assignment)?;

            Ok(PtmProbeOutcome::RootPortAssigned(assignment))
        }
        PcieDeviceType::RootComplexIntegratedEndpoint => {
            tracing::info!(
                device = %device.bdf,
                "PTM requestor is a root complex integrated endpoint, no root port needed"
            );
            Ok(PtmProbeOutcome::RootComplexIntegrated)
        }
        device_type => Err(PtmError::UnsupportedDeviceType {
            bdf: device.bdf,
            device_type,
        }),
    }
}

/// Reads the PTM Capability register through the oracle, given the capability's offset.
fn ptm_capability_of(
    topology: &dyn PciTopology,
    device: &PhysicalDevice,
    offset: u16,
) -> PtmCapabilityRegister {
    let register = topology.read_config_u32(device, u32::from(offset) + PCIR_PTM_CAP);
    let cap = PtmCapabilityRegister(register);

    tracing::debug!(
        device = %device.bdf,
        ptm_cap = format_args!("{:#x}", cap.0),
        offset = format_args!("{:#x}", offset),
        granularity = cap.local_clock_granularity(),
        "read PTM capability"
    );

    cap
}

fn check_root_port(
    topology: &dyn PciTopology,
    device: &PhysicalDevice,
    root_port: &PhysicalDevice,
) -> Result<(), PtmError> {
    // a missing capability reads as an all-zero register
    let cap = topology
        .find_extended_capability(root_port, PCIZ_PTM)
        .map(|offset| ptm_capability_of(topology, root_port, offset))
        .unwrap_or_default();

    if !cap.root_capable() {
        return Err(PtmError::RootCapabilityMissing {
            root_port: root_port.bdf,
            device: device.bdf,
        });
    }

    // If anything besides `device` sits below the root port, passing the root port through would
    // hand those functions to the guest too.
    let buses = topology
        .bridge_buses(root_port)
        .map_err(|source| PtmError::BridgeRangeQueryFailed {
            root_port: root_port.bdf,
            source,
        })?;

    let count = topology.count_devices_on_bridge(&buses);
    if count != 1 {
        return Err(PtmError::RootPortNotExclusive {
            root_port: root_port.bdf,
            count,
        });
    }

    Ok(())
}

fn assign_root_port(
    assigner: &mut dyn PciDeviceAssigner,
    assignment: AssignPciDev,
) -> Result<(), PtmError> {
    tracing::info!(
        phys_bdf = %assignment.phys_bdf,
        virt_bdf = %assignment.virt_bdf,
        "assigning root port to guest"
    );

    assigner.assign_pcidev(&assignment).map_err(|source| {
        tracing::error!(
            phys_bdf = %assignment.phys_bdf,
            error = %source,
            "failed to assign root port to guest"
        );
        PtmError::AssignmentRejected { assignment, source }
    })
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::io::ErrorKind;

    use mockall::predicate::eq;

    use super::*;
    use crate::config::ptm::{PCIM_PTM_CAP_REQ, PCIM_PTM_CAP_ROOT};
    use crate::init_tracing;
    use crate::mocks::{MockPciDeviceAssigner, MockPciTopology};
    use crate::topology::BridgeBuses;

    const DEVICE_PTM_OFFSET: u16 = 0x220;
    const ROOT_PORT_PTM_OFFSET: u16 = 0x150;

    fn endpoint() -> PhysicalDevice {
        PhysicalDevice::new(PciBdf::new(0x02, 0x00, 0x0).unwrap())
    }

    fn root_port() -> PhysicalDevice {
        PhysicalDevice::new(PciBdf::new(0x00, 0x1c, 0x0).unwrap())
    }

    fn root_port_buses() -> BridgeBuses {
        BridgeBuses {
            primary: 0x00,
            secondary: 0x02,
            subordinate: 0x02,
        }
    }

    fn ptdev(phys: PhysicalDevice) -> PassthroughDevice {
        PassthroughDevice {
            phys,
            virt_bdf: PciBdf::new(0x00, 0x05, 0x0).unwrap(),
            pcie_cap: Some(0x40),
        }
    }

    /// Expects the calls made before the device type is known.
    fn expect_device(topology: &mut MockPciTopology, device: PhysicalDevice, ty: PcieDeviceType) {
        topology.expect_refresh().times(1).returning(|| Ok(()));
        topology
            .expect_find_extended_capability()
            .withf(move |d, id| *d == device && *id == PCIZ_PTM)
            .times(1)
            .return_const(Some(DEVICE_PTM_OFFSET));
        topology
            .expect_pcie_device_type()
            .withf(move |d| *d == device)
            .times(1)
            .return_const(ty);
    }

    fn expect_ptm_cap(
        topology: &mut MockPciTopology,
        device: PhysicalDevice,
        offset: u16,
        value: u32,
    ) {
        topology
            .expect_read_config_u32()
            .withf(move |d, o| *d == device && *o == u32::from(offset) + PCIR_PTM_CAP)
            .times(1)
            .return_const(value);
    }

    /// Expects every call up to and including the bus range query of a valid endpoint and root
    /// port, with `count` devices below the root port.
    fn expect_endpoint_topology(topology: &mut MockPciTopology, count: usize) {
        expect_device(topology, endpoint(), PcieDeviceType::Endpoint);
        expect_ptm_cap(topology, endpoint(), DEVICE_PTM_OFFSET, PCIM_PTM_CAP_REQ);
        topology
            .expect_find_root_port()
            .withf(|d| *d == endpoint())
            .times(1)
            .return_const(Some(root_port()));
        topology
            .expect_find_extended_capability()
            .withf(|d, id| *d == root_port() && *id == PCIZ_PTM)
            .times(1)
            .return_const(Some(ROOT_PORT_PTM_OFFSET));
        expect_ptm_cap(
            topology,
            root_port(),
            ROOT_PORT_PTM_OFFSET,
            PCIM_PTM_CAP_ROOT | 0x0000_0400,
        );
        topology
            .expect_bridge_buses()
            .withf(|d| *d == root_port())
            .times(1)
            .returning(|_| Ok(root_port_buses()));
        topology
            .expect_count_devices_on_bridge()
            .with(eq(root_port_buses()))
            .times(1)
            .return_const(count);
    }

    #[test]
    fn test_endpoint_assigns_root_port() {
        init_tracing();

        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();
        let ptdev = ptdev(endpoint());

        expect_endpoint_topology(&mut topology, 1);

        let expected = AssignPciDev {
            phys_bdf: root_port().bdf,
            virt_bdf: ptdev.virt_bdf,
        };
        assigner
            .expect_assign_pcidev()
            .with(eq(expected))
            .times(1)
            .returning(|_| Ok(()));

        let outcome = probe(&mut assigner, &mut topology, &ptdev).unwrap();
        assert_eq!(outcome, PtmProbeOutcome::RootPortAssigned(expected));
    }

    #[test]
    fn test_root_port_shared_with_another_device() {
        init_tracing();

        let mut topology = MockPciTopology::new();
        // any call to the assigner would panic
        let mut assigner = MockPciDeviceAssigner::new();

        expect_endpoint_topology(&mut topology, 2);

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(
            err,
            PtmError::RootPortNotExclusive { root_port: rp, count: 2 } if rp == root_port().bdf
        ));
    }

    #[test]
    fn test_root_port_without_devices() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        expect_endpoint_topology(&mut topology, 0);

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(
            err,
            PtmError::RootPortNotExclusive { count: 0, .. }
        ));
    }

    #[test]
    fn test_device_without_ptm() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        topology.expect_refresh().times(1).returning(|| Ok(()));
        topology
            .expect_find_extended_capability()
            .withf(|d, id| *d == endpoint() && *id == PCIZ_PTM)
            .times(1)
            .return_const(None::<u16>);

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(err, PtmError::PtmUnsupported(bdf) if bdf == endpoint().bdf));
    }

    #[test]
    fn test_unsupported_device_type() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        expect_device(&mut topology, endpoint(), PcieDeviceType::PcieToPciBridge);

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(
            err,
            PtmError::UnsupportedDeviceType {
                device_type: PcieDeviceType::PcieToPciBridge,
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "PTM can only be enabled on root complex integrated endpoints or endpoints, but \
            02:00.0 is a PCI Express to PCI/PCI-X Bridge"
        );
    }

    #[test]
    fn test_legacy_endpoint_is_unsupported() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        expect_device(&mut topology, endpoint(), PcieDeviceType::LegacyEndpoint);

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(err, PtmError::UnsupportedDeviceType { .. }));
    }

    #[test]
    fn test_root_complex_integrated_endpoint() {
        init_tracing();

        // no expectations for find_root_port or assign_pcidev, so calling them would panic
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();
        let rcie = PhysicalDevice::new(PciBdf::new(0x00, 0x1f, 0x6).unwrap());

        expect_device(
            &mut topology,
            rcie,
            PcieDeviceType::RootComplexIntegratedEndpoint,
        );

        let outcome = probe(&mut assigner, &mut topology, &ptdev(rcie)).unwrap();
        assert_eq!(outcome, PtmProbeOutcome::RootComplexIntegrated);
    }

    #[test]
    fn test_not_pcie() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        topology.expect_refresh().times(1).returning(|| Ok(()));

        let ptdev = PassthroughDevice {
            pcie_cap: None,
            ..ptdev(endpoint())
        };

        let err = probe(&mut assigner, &mut topology, &ptdev).unwrap_err();
        assert!(matches!(err, PtmError::NotPcieCapable(bdf) if bdf == endpoint().bdf));
    }

    #[test]
    fn test_refresh_failure() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        topology
            .expect_refresh()
            .times(1)
            .returning(|| Err(io::Error::new(ErrorKind::PermissionDenied, "no sysfs")));

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(err, PtmError::TopologyRefreshFailed(_)));

        let source = err.source().unwrap().downcast_ref::<io::Error>().unwrap();
        assert_eq!(source.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_endpoint_not_requestor() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        expect_device(&mut topology, endpoint(), PcieDeviceType::Endpoint);
        // responder and root capable, but not requestor capable
        expect_ptm_cap(&mut topology, endpoint(), DEVICE_PTM_OFFSET, 0x0000_0006);

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(err, PtmError::RequestorCapabilityMissing(_)));
    }

    #[test]
    fn test_capability_at_end_of_config_space() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        topology.expect_refresh().times(1).returning(|| Ok(()));
        topology
            .expect_find_extended_capability()
            .times(1)
            .return_const(Some(0xfffe_u16));
        topology
            .expect_pcie_device_type()
            .times(1)
            .return_const(PcieDeviceType::Endpoint);
        // the register lies past 0xffff, where nothing answers
        topology
            .expect_read_config_u32()
            .with(eq(endpoint()), eq(0x1_0002))
            .times(1)
            .return_const(0xffff_fffe_u32);

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(err, PtmError::RequestorCapabilityMissing(_)));
    }

    #[test]
    fn test_root_port_not_found() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        expect_device(&mut topology, endpoint(), PcieDeviceType::Endpoint);
        expect_ptm_cap(&mut topology, endpoint(), DEVICE_PTM_OFFSET, PCIM_PTM_CAP_REQ);
        topology
            .expect_find_root_port()
            .times(1)
            .return_const(None::<PhysicalDevice>);

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(err, PtmError::RootPortNotFound(bdf) if bdf == endpoint().bdf));
    }

    #[test]
    fn test_root_port_without_ptm() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        expect_device(&mut topology, endpoint(), PcieDeviceType::Endpoint);
        expect_ptm_cap(&mut topology, endpoint(), DEVICE_PTM_OFFSET, PCIM_PTM_CAP_REQ);
        topology
            .expect_find_root_port()
            .times(1)
            .return_const(Some(root_port()));
        topology
            .expect_find_extended_capability()
            .withf(|d, _| *d == root_port())
            .times(1)
            .return_const(None::<u16>);

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(
            err,
            PtmError::RootCapabilityMissing { root_port: rp, device }
                if rp == root_port().bdf && device == endpoint().bdf
        ));
    }

    #[test]
    fn test_root_port_not_ptm_root() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        expect_device(&mut topology, endpoint(), PcieDeviceType::Endpoint);
        expect_ptm_cap(&mut topology, endpoint(), DEVICE_PTM_OFFSET, PCIM_PTM_CAP_REQ);
        topology
            .expect_find_root_port()
            .times(1)
            .return_const(Some(root_port()));
        topology
            .expect_find_extended_capability()
            .withf(|d, _| *d == root_port())
            .times(1)
            .return_const(Some(ROOT_PORT_PTM_OFFSET));
        expect_ptm_cap(
            &mut topology,
            root_port(),
            ROOT_PORT_PTM_OFFSET,
            PCIM_PTM_CAP_REQ,
        );

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(err, PtmError::RootCapabilityMissing { .. }));
        assert_eq!(
            err.to_string(),
            "root port 00:1c.0 of 02:00.0 is not a PTM root"
        );
    }

    #[test]
    fn test_bridge_range_query_failure() {
        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        expect_device(&mut topology, endpoint(), PcieDeviceType::Endpoint);
        expect_ptm_cap(&mut topology, endpoint(), DEVICE_PTM_OFFSET, PCIM_PTM_CAP_REQ);
        topology
            .expect_find_root_port()
            .times(1)
            .return_const(Some(root_port()));
        topology
            .expect_find_extended_capability()
            .withf(|d, _| *d == root_port())
            .times(1)
            .return_const(Some(ROOT_PORT_PTM_OFFSET));
        expect_ptm_cap(
            &mut topology,
            root_port(),
            ROOT_PORT_PTM_OFFSET,
            PCIM_PTM_CAP_ROOT,
        );
        topology
            .expect_bridge_buses()
            .times(1)
            .returning(|_| Err(io::Error::new(ErrorKind::InvalidInput, "not a bridge")));

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        assert!(matches!(err, PtmError::BridgeRangeQueryFailed { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_assignment_rejected() {
        init_tracing();

        let mut topology = MockPciTopology::new();
        let mut assigner = MockPciDeviceAssigner::new();

        expect_endpoint_topology(&mut topology, 1);
        assigner
            .expect_assign_pcidev()
            .times(1)
            .returning(|_| Err(io::Error::new(ErrorKind::AddrInUse, "already assigned")));

        let err = probe(&mut assigner, &mut topology, &ptdev(endpoint())).unwrap_err();
        match &err {
            PtmError::AssignmentRejected { assignment, source } => {
                assert_eq!(assignment.phys_bdf, root_port().bdf);
                assert_eq!(source.kind(), ErrorKind::AddrInUse);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(
            err.to_string(),
            "failed to assign root port 00:1c.0 to the guest at 00:05.0"
        );
    }
}

/* ---------------------------------------------------------------------------------------------- */
