// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data and status stages of control transfers on endpoint 0.
//!
//! Once a SETUP packet has been decoded, whoever handled it describes what
//! should happen next as an [`Action`]:
//!
//! - `Send`: there is a data stage toward the host. The data is chopped into
//!   64-byte packets and fed to EP0 IN one buffer at a time, resuming every
//!   time the engine tells us a buffer went out. If the data ends on a
//!   packet boundary, a final zero-length packet tells the host we are done.
//! - `Capture`: there is a data stage from the host, and its contents should
//!   land in the scratch pad. Once all of it has arrived we acknowledge with
//!   a zero-length IN packet.
//! - `Ack`: no data (or data we don't care about). Acknowledge with a
//!   zero-length IN packet, after the host's data if it sends any.
//!
//! A handler that doesn't like the request returns `Err(Stall)` and the
//! endpoint is stalled until the next SETUP.
//!
//! Any new SETUP cancels whatever was in flight. The host is allowed to give
//! up on a transfer halfway and start another, and the new one wins.

use super::endpoint::EndpointError;
use super::setup::{SetupPacket, UsbDir};
use super::sie::{DevInt, EndpointControl, EndpointStatus, Sie, UsbRegisters};
use super::{EP0_IN, EP0_OUT};
use crate::config::{PACKET_SIZE, RESPONSE_SIZE};
use crate::scratch::ScratchPad;

/// Reject the current control request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stall;

/// Where the bytes of an IN data stage come from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Static(&'static [u8]),
    /// The pipe's response buffer, filled in by the request handler.
    Response,
    /// The scratch pad, from this offset on.
    Scratch { offset: usize },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Send `len` bytes of `source`, or fewer if the host asked for fewer.
    Send { source: Source, len: usize },
    /// Acknowledge with a zero-length packet.
    Ack,
    /// Store the host's `len` bytes into the scratch pad at `offset`. The
    /// window must already have been checked against the pad.
    Capture { offset: usize, len: usize },
}

#[derive(Copy, Clone, Debug)]
struct Transmit {
    source: Source,
    len: usize,
    /// Offset of the next packet. Runs one packet past `len` when the
    /// trailing zero-length packet is needed.
    cursor: usize,
}

#[derive(Copy, Clone, Debug)]
struct Capture {
    offset: usize,
    remaining: usize,
}

pub struct ControlPipe {
    transmit: Option<Transmit>,
    capture: Option<Capture>,
    /// Send a zero-length IN packet once the host's OUT data arrives.
    ack_out: bool,
    response: [u8; RESPONSE_SIZE],
}

fn source_bytes<'a>(source: Source, response: &'a [u8], scratch: &'a ScratchPad) -> &'a [u8] {
    match source {
        Source::Static(bytes) => bytes,
        Source::Response => response,
        Source::Scratch { offset } => scratch.readable(offset, usize::MAX).unwrap_or(&[]),
    }
}

impl ControlPipe {
    pub const fn new() -> Self {
        Self {
            transmit: None,
            capture: None,
            ack_out: false,
            response: [0; RESPONSE_SIZE],
        }
    }

    /// Forgets any transfer in progress.
    pub fn cancel(&mut self) {
        self.transmit = None;
        self.capture = None;
        self.ack_out = false;
    }

    pub fn is_idle(&self) -> bool {
        self.transmit.is_none() && self.capture.is_none() && !self.ack_out
    }

    /// Buffer for responses assembled at request time.
    pub fn response_mut(&mut self) -> &mut [u8] {
        &mut self.response
    }

    /// Begins the data or status stage for `setup` as described by `action`.
    pub fn start<R: UsbRegisters>(
        &mut self,
        sie: &mut Sie<R>,
        scratch: &ScratchPad,
        setup: &SetupPacket,
        action: Action,
    ) -> Result<(), EndpointError> {
        match action {
            Action::Send { source, len } => {
                let available = source_bytes(source, &self.response, scratch).len();
                let len = len.min(available).min(usize::from(setup.length()));
                self.transmit = Some(Transmit { source, len, cursor: 0 });
                self.continue_transmit(sie, scratch)
            }
            Action::Ack => {
                if setup.direction() == UsbDir::Out && setup.length() != 0 {
                    self.ack_out = true;
                    Ok(())
                } else {
                    send_ack(sie)
                }
            }
            Action::Capture { offset, len } => {
                if len == 0 {
                    send_ack(sie)
                } else {
                    self.capture = Some(Capture { offset, remaining: len });
                    Ok(())
                }
            }
        }
    }

    /// Queues as many packets of the current IN data stage as the endpoint
    /// has room for. Does nothing if there is no data stage in progress.
    pub fn continue_transmit<R: UsbRegisters>(
        &mut self,
        sie: &mut Sie<R>,
        scratch: &ScratchPad,
    ) -> Result<(), EndpointError> {
        let Some(tx) = self.transmit.as_mut() else {
            return Ok(());
        };

        sie.clear_interrupts(DevInt::EP1);
        sie.select_endpoint_clear(EP0_IN);
        let data = source_bytes(tx.source, &self.response, scratch);
        loop {
            if sie.select_endpoint(EP0_IN).contains(EndpointStatus::FULL) {
                break;
            }
            let end = (tx.cursor + PACKET_SIZE).min(tx.len);
            sie.write_packet(EP0_IN, &data[tx.cursor..end])?;
            sie.validate_buffer();

            tx.cursor += PACKET_SIZE;
            if tx.cursor > tx.len {
                self.transmit = None;
                break;
            }
        }
        Ok(())
    }

    /// Handles a non-SETUP packet on EP0 OUT: either the next piece of a
    /// capture, or the host's status stage / unwanted data.
    pub fn receive_out<R: UsbRegisters>(
        &mut self,
        sie: &mut Sie<R>,
        scratch: &mut ScratchPad,
    ) -> Result<(), EndpointError> {
        let Some(capture) = self.capture.as_mut() else {
            sie.clear_buffer();
            if core::mem::take(&mut self.ack_out) {
                send_ack(sie)?;
            }
            return Ok(());
        };

        let len = sie.read_packet_length(EP0_OUT).min(PACKET_SIZE);
        let mut packet = [0; PACKET_SIZE];
        sie.read_packet(EP0_OUT, &mut packet[..len])?;
        sie.clear_buffer();

        let n = len.min(capture.remaining);
        if let Ok(dest) = scratch.writable(capture.offset, n) {
            dest.copy_from_slice(&packet[..n]);
        }
        capture.offset += n;
        capture.remaining -= n;
        if capture.remaining == 0 {
            self.capture = None;
            send_ack(sie)?;
        }
        Ok(())
    }
}

impl Default for ControlPipe {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero-length packet on EP0 IN, completing a status stage.
pub fn send_ack<R: UsbRegisters>(sie: &mut Sie<R>) -> Result<(), EndpointError> {
    sie.write_packet(EP0_IN, &[])?;
    sie.select_endpoint(EP0_IN);
    sie.validate_buffer();
    Ok(())
}

/// Stalls EP0 until the next SETUP.
pub fn stall<R: UsbRegisters>(sie: &mut Sie<R>) {
    sie.set_endpoint_status(EP0_OUT, EndpointControl::CONDITIONAL_STALL);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockUsb;

    fn setup(bytes: [u8; 8]) -> SetupPacket {
        SetupPacket::parse(&bytes).unwrap()
    }

    static DATA: [u8; 100] = {
        let mut d = [0; 100];
        let mut i = 0;
        while i < d.len() {
            d[i] = i as u8;
            i += 1;
        }
        d
    };

    #[test]
    fn send_resumes_on_each_in_completion() {
        let mut sie = Sie::new(MockUsb::new());
        let scratch = ScratchPad::new();
        let mut pipe = ControlPipe::new();
        let req = setup([0xC0, 0x99, 0, 0, 0, 0, 0xFF, 0]);
        pipe.start(&mut sie, &scratch, &req, Action::Send { source: Source::Static(&DATA), len: 100 })
            .unwrap();

        assert_eq!(sie.regs().sent(EP0_IN), [&DATA[..64]]);
        sie.regs_mut().host_ack_in(EP0_IN);
        pipe.continue_transmit(&mut sie, &scratch).unwrap();
        assert_eq!(sie.regs().sent(EP0_IN), [&DATA[..64], &DATA[64..]]);
        assert!(pipe.is_idle());

        // Nothing left: further completions send nothing.
        sie.regs_mut().host_ack_in(EP0_IN);
        pipe.continue_transmit(&mut sie, &scratch).unwrap();
        assert_eq!(sie.regs().sent(EP0_IN).len(), 2);
    }

    #[test]
    fn send_is_clipped_to_wlength() {
        let mut sie = Sie::new(MockUsb::new());
        let scratch = ScratchPad::new();
        let mut pipe = ControlPipe::new();
        let req = setup([0xC0, 0x99, 0, 0, 0, 0, 10, 0]);
        pipe.start(&mut sie, &scratch, &req, Action::Send { source: Source::Static(&DATA), len: 100 })
            .unwrap();
        assert_eq!(sie.regs().sent(EP0_IN), [&DATA[..10]]);
        assert!(pipe.is_idle());
    }

    #[test]
    fn ack_for_out_data_waits_for_the_data() {
        let mut sie = Sie::new(MockUsb::new());
        let mut scratch = ScratchPad::new();
        let mut pipe = ControlPipe::new();
        let req = setup([0x40, 0x12, 0, 0, 0, 0, 4, 0]);
        pipe.start(&mut sie, &scratch, &req, Action::Ack).unwrap();
        assert!(sie.regs().sent(EP0_IN).is_empty());

        sie.regs_mut().host_out(EP0_OUT, &[1, 2, 3, 4]);
        sie.select_endpoint_clear(EP0_OUT);
        pipe.receive_out(&mut sie, &mut scratch).unwrap();
        assert_eq!(sie.regs().sent(EP0_IN), [&[][..]]);
        assert!(pipe.is_idle());
    }

    #[test]
    fn capture_spans_packets() {
        let mut sie = Sie::new(MockUsb::new());
        let mut scratch = ScratchPad::new();
        let mut pipe = ControlPipe::new();
        let req = setup([0x40, 0x18, 0, 0, 16, 0, 100, 0]);
        pipe.start(&mut sie, &scratch, &req, Action::Capture { offset: 16, len: 100 })
            .unwrap();

        sie.regs_mut().host_out(EP0_OUT, &DATA[..64]);
        sie.select_endpoint_clear(EP0_OUT);
        pipe.receive_out(&mut sie, &mut scratch).unwrap();
        assert!(sie.regs().sent(EP0_IN).is_empty());

        sie.regs_mut().host_out(EP0_OUT, &DATA[64..]);
        sie.select_endpoint_clear(EP0_OUT);
        pipe.receive_out(&mut sie, &mut scratch).unwrap();
        assert_eq!(sie.regs().sent(EP0_IN), [&[][..]]);
        assert_eq!(&scratch.as_slice()[16..116], &DATA[..]);
        assert!(pipe.is_idle());
    }
}
