// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Moving packets in and out of the endpoint buffers.
//!
//! Packet data goes through a register window rather than shared memory:
//! point CTRL at a logical endpoint with the read or write enable bit set,
//! then pop words out of RXDATA or push them into TXDATA. Words are
//! little-endian, so the first byte of the packet is the low byte of the
//! first word.

use super::sie::{Sie, UsbRegisters};

/// Data-valid flag in RXPLEN.
const RX_DATA_VALID: u32 = 1 << 10;
const RX_LENGTH_MASK: u32 = 0x3FF;

const CTRL_READ_EN: u32 = 1 << 0;
const CTRL_WRITE_EN: u32 = 1 << 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointError {
    /// Tried to read an IN endpoint or write an OUT one.
    WrongDirection,
}

/// Physical endpoint numbers have the direction in the bottom bit.
pub const fn is_in(ep: u8) -> bool {
    ep & 1 != 0
}

fn ctrl_word(ep: u8, enable: u32) -> u32 {
    u32::from(ep >> 1) << 2 | enable
}

impl<R: UsbRegisters> Sie<R> {
    /// Length of the packet waiting on OUT endpoint `ep`, or 0 if there is
    /// none (or `ep` is an IN endpoint).
    pub fn read_packet_length(&mut self, ep: u8) -> usize {
        if is_in(ep) {
            return 0;
        }
        self.regs_mut().select_buffer(ctrl_word(ep, CTRL_READ_EN));
        let rxplen = self.regs_mut().rx_packet_length();
        if rxplen & RX_DATA_VALID == 0 {
            0
        } else {
            (rxplen & RX_LENGTH_MASK) as usize
        }
    }

    /// Copies the waiting packet on `ep` into `buf`, which should be sized to
    /// the length reported by `read_packet_length`.
    ///
    /// This does not release the hardware buffer; follow up with
    /// `clear_buffer` on the selected endpoint.
    pub fn read_packet(&mut self, ep: u8, buf: &mut [u8]) -> Result<(), EndpointError> {
        if is_in(ep) {
            return Err(EndpointError::WrongDirection);
        }
        let regs = self.regs_mut();
        regs.select_buffer(ctrl_word(ep, CTRL_READ_EN));
        for chunk in buf.chunks_mut(4) {
            let word = regs.read_rx_word().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
        Ok(())
    }

    /// Loads `data` into the IN buffer of `ep`. The packet is not sent until
    /// the endpoint is selected and `validate_buffer` is issued.
    pub fn write_packet(&mut self, ep: u8, data: &[u8]) -> Result<(), EndpointError> {
        if !is_in(ep) {
            return Err(EndpointError::WrongDirection);
        }
        let regs = self.regs_mut();
        regs.select_buffer(ctrl_word(ep, CTRL_WRITE_EN));
        regs.write_tx_length(data.len() as u32);
        if data.is_empty() {
            // The engine latches a zero-length packet on the first TXDATA
            // write, so it still needs one.
            regs.write_tx_word(0);
        }
        for chunk in data.chunks(4) {
            let mut word = [0; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            regs.write_tx_word(u32::from_le_bytes(word));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockUsb;

    #[test]
    fn packets_move_as_le_words() {
        let mut sie = Sie::new(MockUsb::new());
        sie.regs_mut().host_out(6, &[1, 2, 3, 4, 5]);
        assert_eq!(sie.read_packet_length(6), 5);
        let mut buf = [0; 5];
        sie.read_packet(6, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn nothing_waiting_reads_as_zero_length() {
        let mut sie = Sie::new(MockUsb::new());
        assert_eq!(sie.read_packet_length(6), 0);
        assert_eq!(sie.read_packet_length(7), 0);
    }

    #[test]
    fn direction_is_enforced() {
        let mut sie = Sie::new(MockUsb::new());
        assert_eq!(sie.read_packet(7, &mut [0; 4]), Err(EndpointError::WrongDirection));
        assert_eq!(sie.write_packet(6, &[0; 4]), Err(EndpointError::WrongDirection));
    }

    #[test]
    fn zero_length_write_touches_txdata() {
        let mut sie = Sie::new(MockUsb::new());
        sie.write_packet(1, &[]).unwrap();
        assert_eq!(sie.regs().tx_words, 1);
        assert_eq!(sie.regs().tx_len, 0);
    }
}
