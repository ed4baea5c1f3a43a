// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bus/Device/Function addresses.

/* ---------------------------------------------------------------------------------------------- */

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/* ---------------------------------------------------------------------------------------------- */

/// The address of a PCI __function__ within segment 0.
///
/// Used both for physical functions on the host and for virtual functions presented to a guest.
/// Which namespace a given value lives in is determined by where it is stored, not by its type.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PciBdf {
    bus: u8,
    device: u8,
    function: u8,
}

impl PciBdf {
    pub const MAX_DEVICE: u8 = 0x1f;
    pub const MAX_FUNCTION: u8 = 0x07;

    /// Returns `None` if `device` or `function` don't fit in their 5-bit and 3-bit fields.
    pub const fn new(bus: u8, device: u8, function: u8) -> Option<PciBdf> {
        if device > Self::MAX_DEVICE || function > Self::MAX_FUNCTION {
            return None;
        }

        Some(PciBdf {
            bus,
            device,
            function,
        })
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn device(&self) -> u8 {
        self.device
    }

    pub fn function(&self) -> u8 {
        self.function
    }

    /// Packs the address as `bus[15:8] device[7:3] function[2:0]`.
    pub fn to_bits(&self) -> u16 {
        u16::from(self.bus) << 8 | u16::from(self.device) << 3 | u16::from(self.function)
    }

    pub fn from_bits(bits: u16) -> PciBdf {
        PciBdf {
            bus: (bits >> 8) as u8,
            device: ((bits >> 3) & 0x1f) as u8,
            function: (bits & 0x07) as u8,
        }
    }
}

impl fmt::Display for PciBdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{:x}", self.bus, self.device, self.function)
    }
}

/* ---------------------------------------------------------------------------------------------- */

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ParseBdfError {
    #[error("expected `bb:dd.f` or `0000:bb:dd.f`, got {0:?}")]
    Syntax(String),
    #[error("only PCI segment 0000 is supported, got {0:?}")]
    Segment(String),
    #[error("device {device:#x} or function {function:#x} out of range")]
    OutOfRange { device: u8, function: u8 },
}

impl FromStr for PciBdf {
    type Err = ParseBdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let syntax = || ParseBdfError::Syntax(s.to_owned());

        let parts: Vec<&str> = s.split(':').collect();
        let (bus, slot) = match parts.as_slice() {
            [bus, slot] => (*bus, *slot),
            [segment, bus, slot] => {
                if u16::from_str_radix(segment, 16).map_err(|_| syntax())? != 0 {
                    return Err(ParseBdfError::Segment(s.to_owned()));
                }
                (*bus, *slot)
            }
            _ => return Err(syntax()),
        };

        let (device, function) = slot.split_once('.').ok_or_else(syntax)?;

        let bus = u8::from_str_radix(bus, 16).map_err(|_| syntax())?;
        let device = u8::from_str_radix(device, 16).map_err(|_| syntax())?;
        let function = u8::from_str_radix(function, 16).map_err(|_| syntax())?;

        PciBdf::new(bus, device, function).ok_or(ParseBdfError::OutOfRange { device, function })
    }
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
