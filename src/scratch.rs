// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-visible staging buffer.
//!
//! Vendor requests move bulk payloads through this buffer: the host writes
//! into it with an OUT control transfer, the device reads flash pages into it
//! or exchanges it with an SPI peripheral in place, and the host reads it back
//! with an IN transfer.

use crate::config::SCRATCH_SIZE;
use crate::usb::control::Stall;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScratchError {
    /// The requested window does not fit in the pad.
    OutOfRange,
}

impl From<ScratchError> for Stall {
    fn from(_: ScratchError) -> Self {
        Stall
    }
}

pub struct ScratchPad([u8; SCRATCH_SIZE]);

impl ScratchPad {
    pub const fn new() -> Self {
        Self([0; SCRATCH_SIZE])
    }

    /// Window for the host to read. A window running off the end is clipped;
    /// only an offset past the end is an error.
    pub fn readable(&self, offset: usize, len: usize) -> Result<&[u8], ScratchError> {
        let tail = self.0.get(offset..).ok_or(ScratchError::OutOfRange)?;
        Ok(&tail[..len.min(tail.len())])
    }

    /// Window to be overwritten, whether by the host or by an SPI exchange.
    /// Must fit entirely.
    pub fn writable(&mut self, offset: usize, len: usize) -> Result<&mut [u8], ScratchError> {
        let end = offset.checked_add(len).ok_or(ScratchError::OutOfRange)?;
        self.0.get_mut(offset..end).ok_or(ScratchError::OutOfRange)
    }

    pub fn fill(&mut self, byte: u8) {
        self.0.fill(byte);
    }

    pub fn clear(&mut self) {
        self.fill(0);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl Default for ScratchPad {
    fn default() -> Self {
        Self::new()
    }
}
