// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte stream over the bulk endpoint pair.
//!
//! Two rings sit between the USB interrupt and the rest of the firmware. The
//! interrupt side ([`SerialEndpoints`]) moves whole packets between the
//! endpoint buffers and the rings whenever the hardware has room or data. The
//! application side ([`SerialPort`]) reads and writes bytes at its own pace.
//! If the receive ring is too full to take a packet, the packet is left in
//! the endpoint buffer (which NAKs the host) and retried on the next frame.

use crate::config::{PACKET_SIZE, SERIAL_RX_SIZE, SERIAL_TX_SIZE};
use crate::ring::{Consumer, Producer, RingBuffer};
use crate::usb::sie::{EndpointStatus, Sie, UsbRegisters};
use crate::usb::{BULK_IN, BULK_OUT};

/// Not enough data or room to do all of what was asked; nothing was done.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WouldBlock;

pub type RxRing = RingBuffer<SERIAL_RX_SIZE>;
pub type TxRing = RingBuffer<SERIAL_TX_SIZE>;

/// Splits the two rings into the interrupt-side and application-side halves.
pub fn split<'a>(rx: &'a mut RxRing, tx: &'a mut TxRing) -> (SerialEndpoints<'a>, SerialPort<'a>) {
    let (rx_producer, rx_consumer) = rx.split();
    let (tx_producer, tx_consumer) = tx.split();
    (
        SerialEndpoints {
            rx: rx_producer,
            tx: tx_consumer,
            staging: [0; PACKET_SIZE],
        },
        SerialPort {
            rx: rx_consumer,
            tx: tx_producer,
        },
    )
}

pub struct SerialEndpoints<'a> {
    rx: Producer<'a, SERIAL_RX_SIZE>,
    tx: Consumer<'a, SERIAL_TX_SIZE>,
    staging: [u8; PACKET_SIZE],
}

impl SerialEndpoints<'_> {
    /// Drains waiting OUT packets into the receive ring while they fit.
    /// Returns whether anything moved.
    pub fn try_receive<R: UsbRegisters>(&mut self, sie: &mut Sie<R>) -> bool {
        let mut progress = false;
        while sie
            .select_endpoint_clear(BULK_OUT)
            .contains(EndpointStatus::FULL)
        {
            let len = sie.read_packet_length(BULK_OUT).min(PACKET_SIZE);
            if self.rx.free() < len {
                break;
            }
            let packet = &mut self.staging[..len];
            if sie.read_packet(BULK_OUT, packet).is_err() {
                break;
            }
            sie.clear_buffer();
            self.rx.write_bytes(packet);
            progress = true;
        }
        progress
    }

    /// Fills free IN buffers from the transmit ring. Returns whether
    /// anything moved.
    pub fn try_send<R: UsbRegisters>(&mut self, sie: &mut Sie<R>) -> bool {
        let mut progress = false;
        while !sie
            .select_endpoint_clear(BULK_IN)
            .contains(EndpointStatus::FULL)
        {
            let len = self.tx.len().min(PACKET_SIZE);
            if len == 0 {
                break;
            }
            let packet = &mut self.staging[..len];
            self.tx.read_bytes(packet);
            if sie.write_packet(BULK_IN, packet).is_err() {
                break;
            }
            sie.validate_buffer();
            progress = true;
        }
        progress
    }
}

/// Application end of the byte stream.
pub struct SerialPort<'a> {
    rx: Consumer<'a, SERIAL_RX_SIZE>,
    tx: Producer<'a, SERIAL_TX_SIZE>,
}

impl SerialPort<'_> {
    pub fn can_recv(&self) -> bool {
        self.rx.can_read()
    }

    pub fn recv_byte(&mut self) -> Option<u8> {
        self.rx.read_byte()
    }

    /// The byte `n` places from the front of the receive queue.
    pub fn peek(&self, n: usize) -> Option<u8> {
        self.rx.peek(n)
    }

    pub fn bytes_to_recv(&self) -> usize {
        self.rx.len()
    }

    /// Fills all of `bytes`, or takes nothing if not enough has arrived.
    pub fn recv_bytes(&mut self, bytes: &mut [u8]) -> Result<(), WouldBlock> {
        if self.rx.len() < bytes.len() {
            return Err(WouldBlock);
        }
        self.rx.read_bytes(bytes);
        Ok(())
    }

    pub fn can_send(&self) -> bool {
        self.tx.can_write()
    }

    pub fn send_byte(&mut self, byte: u8) -> Result<(), WouldBlock> {
        if !self.tx.can_write() {
            return Err(WouldBlock);
        }
        self.tx.write_byte(byte);
        Ok(())
    }

    pub fn bytes_can_send(&self) -> usize {
        self.tx.free()
    }

    /// Queues all of `bytes`, or none if they don't all fit.
    pub fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), WouldBlock> {
        if self.tx.free() < bytes.len() {
            return Err(WouldBlock);
        }
        self.tx.write_bytes(bytes);
        Ok(())
    }

    /// Bytes queued but not yet handed to the endpoint.
    pub fn send_queued(&self) -> usize {
        self.tx.len()
    }
}
