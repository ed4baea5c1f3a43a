// SPDX-License-Identifier: MIT OR Apache-2.0

//! Implementations of [`PciConfigIo`](crate::config::PciConfigIo).

/* ---------------------------------------------------------------------------------------------- */

pub mod memory;

#[cfg(feature = "sysfs")]
pub mod sysfs;

/* ---------------------------------------------------------------------------------------------- */
