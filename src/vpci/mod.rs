// SPDX-License-Identifier: MIT OR Apache-2.0

//! Virtual PCI functions presented to a guest.
//!
//! Every virtual function is a [`PciVdev`] paired with a [`PciVdevOps`] that implements its
//! behavior. A [`VdevRegistry`] owns both, dispatches the guest's config space accesses by virtual
//! BDF, and tracks which virtual functions use which through [`VdevId`]s instead of references.

/* ---------------------------------------------------------------------------------------------- */

pub mod vroot_port;

use std::collections::HashMap;
use std::fmt::Debug;
use std::io;

use thiserror::Error;

use crate::bdf::PciBdf;
use crate::config::AccessWidth;

/* ---------------------------------------------------------------------------------------------- */

/// Identifies a virtual function within a [`VdevRegistry`].
///
/// Ids are reused after removal, so an id kept outside of the registry must be dropped when its
/// function is removed. Ids stored in other functions' [`PciVdev`] are cleared automatically.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct VdevId(usize);

/// The framework's view of a virtual PCI function.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PciVdev {
    /// Where the guest sees the function.
    pub bdf: PciBdf,
    /// The physical function backing it.
    pub phys_bdf: PciBdf,
    /// The function this one was handed down from, if any.
    pub parent_user: Option<VdevId>,
    /// The function currently using this one, if any.
    pub user: Option<VdevId>,
}

impl PciVdev {
    pub fn new(bdf: PciBdf, phys_bdf: PciBdf) -> PciVdev {
        PciVdev {
            bdf,
            phys_bdf,
            parent_user: None,
            user: None,
        }
    }
}

/// The behavior of a kind of virtual PCI function.
pub trait PciVdevOps: Debug + Send {
    /// Called once the function is in the registry, before the guest can access it.
    fn init(&mut self, vdev: &mut PciVdev);

    /// Called when the function is removed from the registry. Must drop every reference to other
    /// functions held in `vdev`.
    fn deinit(&mut self, vdev: &mut PciVdev);

    /// Handles a guest read of `width` bytes at `offset`, storing the result in the low-order bits
    /// of `value`.
    fn read_cfg(
        &self,
        vdev: &PciVdev,
        offset: u32,
        width: AccessWidth,
        value: &mut u32,
    ) -> io::Result<()>;

    /// Handles a guest write of the low-order `width` bytes of `value` at `offset`.
    fn write_cfg(
        &mut self,
        vdev: &PciVdev,
        offset: u32,
        width: AccessWidth,
        value: u32,
    ) -> io::Result<()>;
}

/* ---------------------------------------------------------------------------------------------- */

#[derive(Debug, Error)]
pub enum VpciError {
    #[error("virtual BDF {0} is already in use")]
    BdfInUse(PciBdf),

    #[error("no virtual device at {0}")]
    NotFound(PciBdf),

    #[error("stale virtual device id {0:?}")]
    StaleId(VdevId),

    #[error("config space access to virtual device {bdf} failed")]
    Access {
        bdf: PciBdf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
struct Slot {
    vdev: PciVdev,
    ops: Box<dyn PciVdevOps>,
}

/// Owns the virtual PCI functions of a guest.
#[derive(Debug, Default)]
pub struct VdevRegistry {
    slots: Vec<Option<Slot>>,
    by_bdf: HashMap<PciBdf, VdevId>,
}

impl VdevRegistry {
    pub fn new() -> VdevRegistry {
        VdevRegistry::default()
    }

    pub fn len(&self) -> usize {
        self.by_bdf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_bdf.is_empty()
    }

    /// Adds a function and initializes it. Fails if its virtual BDF is taken.
    pub fn add(&mut self, vdev: PciVdev, ops: Box<dyn PciVdevOps>) -> Result<VdevId, VpciError> {
        if self.by_bdf.contains_key(&vdev.bdf) {
            return Err(VpciError::BdfInUse(vdev.bdf));
        }

        let id = match self.slots.iter().position(Option::is_none) {
            Some(index) => VdevId(index),
            None => {
                self.slots.push(None);
                VdevId(self.slots.len() - 1)
            }
        };

        let mut slot = Slot { vdev, ops };
        slot.ops.init(&mut slot.vdev);

        self.by_bdf.insert(slot.vdev.bdf, id);
        self.slots[id.0] = Some(slot);

        Ok(id)
    }

    /// Records that `user` is using the function owned by `owner`.
    pub fn link(&mut self, owner: VdevId, user: VdevId) -> Result<(), VpciError> {
        self.slot(user)?;
        self.slot_mut(owner)?.vdev.user = Some(user);
        self.slot_mut(user)?.vdev.parent_user = Some(owner);
        Ok(())
    }

    pub fn id(&self, bdf: PciBdf) -> Option<VdevId> {
        self.by_bdf.get(&bdf).copied()
    }

    pub fn get(&self, bdf: PciBdf) -> Option<&PciVdev> {
        let id = self.id(bdf)?;
        self.slot(id).ok().map(|slot| &slot.vdev)
    }

    pub fn get_by_id(&self, id: VdevId) -> Option<&PciVdev> {
        self.slot(id).ok().map(|slot| &slot.vdev)
    }

    /// Forwards a guest config space read to the function at `bdf`.
    pub fn read_cfg(&self, bdf: PciBdf, offset: u32, width: AccessWidth) -> Result<u32, VpciError> {
        let id = self.id(bdf).ok_or(VpciError::NotFound(bdf))?;
        let slot = self.slot(id)?;

        let mut value = 0;
        slot.ops
            .read_cfg(&slot.vdev, offset, width, &mut value)
            .map_err(|source| VpciError::Access { bdf, source })?;

        Ok(value & width.mask())
    }

    /// Forwards a guest config space write to the function at `bdf`.
    pub fn write_cfg(
        &mut self,
        bdf: PciBdf,
        offset: u32,
        width: AccessWidth,
        value: u32,
    ) -> Result<(), VpciError> {
        let id = self.id(bdf).ok_or(VpciError::NotFound(bdf))?;
        let Slot { vdev, ops } = self.slot_mut(id)?;

        ops.write_cfg(vdev, offset, width, value & width.mask())
            .map_err(|source| VpciError::Access { bdf, source })
    }

    /// Deinitializes and removes the function at `bdf`, and clears every reference to it held by
    /// other functions.
    pub fn remove(&mut self, bdf: PciBdf) -> Result<PciVdev, VpciError> {
        let id = self.by_bdf.remove(&bdf).ok_or(VpciError::NotFound(bdf))?;
        let mut slot = self.slots[id.0].take().ok_or(VpciError::StaleId(id))?;

        slot.ops.deinit(&mut slot.vdev);

        for other in self.slots.iter_mut().flatten() {
            if other.vdev.parent_user == Some(id) {
                other.vdev.parent_user = None;
            }
            if other.vdev.user == Some(id) {
                other.vdev.user = None;
            }
        }

        Ok(slot.vdev)
    }

    fn slot(&self, id: VdevId) -> Result<&Slot, VpciError> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(VpciError::StaleId(id))
    }

    fn slot_mut(&mut self, id: VdevId) -> Result<&mut Slot, VpciError> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(VpciError::StaleId(id))
    }
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
