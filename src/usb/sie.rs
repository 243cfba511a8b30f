// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Serial Interface Engine command channel.
//!
//! The LPC13xx USB block does not expose endpoint state as plain registers.
//! Instead, most things go through a tiny command protocol spoken over two
//! registers: you write a command code into CMDCODE, wait for the engine to
//! say it has taken it (CC_EMPTY in the device interrupt status), and then
//! optionally either write one data byte the same way or ask for a byte back
//! and wait for CD_FULL before reading it out of CMDDATA.
//!
//! The engine always completes these handshakes within a few USB clocks, so
//! the waits here are unbounded. Everything is strictly synchronous.
//!
//! Endpoint numbers in this module are *physical* endpoint numbers, which on
//! this part means `2 * logical + direction` with IN as 1. EP0 OUT is 0, EP0
//! IN is 1, and so on.

use bitflags::bitflags;

/// Access to the USB device controller's registers.
///
/// Implemented over the real register block in firmware and over a simulated
/// engine in tests. Methods map one-to-one onto register accesses; reads with
/// side effects take `&mut self`.
pub trait UsbRegisters {
    /// DEVINTST.
    fn interrupt_status(&self) -> u32;
    /// DEVINTCLR.
    fn clear_interrupts(&mut self, bits: u32);
    /// DEVINTSET.
    fn set_interrupts(&mut self, bits: u32);
    /// DEVINTEN.
    fn enable_interrupts(&mut self, bits: u32);
    /// CMDCODE.
    fn write_command(&mut self, word: u32);
    /// CMDDATA.
    fn read_command_data(&mut self) -> u32;
    /// CTRL. Selects the logical endpoint and direction for the packet
    /// registers below.
    fn select_buffer(&mut self, word: u32);
    /// RXPLEN.
    fn rx_packet_length(&mut self) -> u32;
    /// RXDATA. Each read pops one word.
    fn read_rx_word(&mut self) -> u32;
    /// TXPLEN.
    fn write_tx_length(&mut self, len: u32);
    /// TXDATA.
    fn write_tx_word(&mut self, word: u32);
}

bitflags! {
    /// Bits of the device interrupt registers (DEVINTST/EN/CLR/SET).
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct DevInt: u32 {
        const FRAME = 1 << 0;
        const EP0 = 1 << 1;
        const EP1 = 1 << 2;
        const EP2 = 1 << 3;
        const EP3 = 1 << 4;
        const EP4 = 1 << 5;
        const EP5 = 1 << 6;
        const EP6 = 1 << 7;
        const EP7 = 1 << 8;
        const DEV_STAT = 1 << 9;
        /// The engine has consumed the last CMDCODE write.
        const CC_EMPTY = 1 << 10;
        /// CMDDATA holds a byte for us.
        const CD_FULL = 1 << 11;
    }

    /// Result of Select Endpoint.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct EndpointStatus: u8 {
        /// For OUT, a packet is waiting. For IN, no buffer is free.
        const FULL = 1 << 0;
        const STALLED = 1 << 1;
        /// The waiting OUT packet arrived in a SETUP token.
        const SETUP = 1 << 2;
        /// A SETUP packet overwrote an unread one.
        const OVERWRITTEN = 1 << 3;
    }

    /// Argument to Set Endpoint Status.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct EndpointControl: u8 {
        const STALL = 1 << 0;
        const DISABLED = 1 << 5;
        /// Stalls both halves of a control endpoint until the next SETUP.
        const CONDITIONAL_STALL = 1 << 7;
    }

    /// Device status byte (Set/Get Device Status).
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct DeviceStatus: u8 {
        /// Drives the soft-connect pin.
        const CONNECT = 1 << 0;
        const CONNECT_CHANGE = 1 << 1;
        const SUSPEND = 1 << 2;
        const SUSPEND_CHANGE = 1 << 3;
        const BUS_RESET = 1 << 4;
    }
}

/// SIE command codes. Endpoint commands add the physical endpoint number.
pub mod cmd {
    pub const SET_ADDRESS: u8 = 0xD0;
    pub const CONFIGURE_DEVICE: u8 = 0xD8;
    pub const SET_MODE: u8 = 0xF3;
    pub const SET_DEVICE_STATUS: u8 = 0xFE;
    pub const GET_DEVICE_STATUS: u8 = 0xFE;
    pub const GET_ERROR_CODE: u8 = 0xFF;
    pub const SELECT_ENDPOINT: u8 = 0x00;
    pub const SELECT_ENDPOINT_CLEAR: u8 = 0x40;
    pub const SET_ENDPOINT_STATUS: u8 = 0x40;
    pub const CLEAR_BUFFER: u8 = 0xF2;
    pub const VALIDATE_BUFFER: u8 = 0xFA;
}

/// CMDCODE phase field.
const PHASE_COMMAND: u32 = 0x0500;
const PHASE_WRITE: u32 = 0x0100;
const PHASE_READ: u32 = 0x0200;

pub struct Sie<R> {
    regs: R,
}

impl<R: UsbRegisters> Sie<R> {
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn interrupt_status(&self) -> DevInt {
        DevInt::from_bits_truncate(self.regs.interrupt_status())
    }

    pub fn clear_interrupts(&mut self, bits: DevInt) {
        self.regs.clear_interrupts(bits.bits());
    }

    pub fn set_interrupts(&mut self, bits: DevInt) {
        self.regs.set_interrupts(bits.bits());
    }

    pub fn enable_interrupts(&mut self, bits: DevInt) {
        self.regs.enable_interrupts(bits.bits());
    }

    fn wait_for(&self, flag: DevInt) {
        while !self.interrupt_status().contains(flag) {}
    }

    pub fn send_command(&mut self, code: u8) {
        self.clear_interrupts(DevInt::CC_EMPTY | DevInt::CD_FULL);
        self.regs.write_command(u32::from(code) << 16 | PHASE_COMMAND);
        self.wait_for(DevInt::CC_EMPTY);
    }

    pub fn send_data(&mut self, data: u8) {
        self.clear_interrupts(DevInt::CC_EMPTY | DevInt::CD_FULL);
        self.regs.write_command(u32::from(data) << 16 | PHASE_WRITE);
        self.wait_for(DevInt::CC_EMPTY);
    }

    /// Reads back the data byte produced by command `code`, which must be the
    /// command most recently sent.
    pub fn receive_data(&mut self, code: u8) -> u8 {
        self.clear_interrupts(DevInt::CC_EMPTY | DevInt::CD_FULL);
        self.regs.write_command(u32::from(code) << 16 | PHASE_READ);
        self.wait_for(DevInt::CD_FULL);
        self.regs.read_command_data() as u8
    }

    fn command_read(&mut self, code: u8) -> u8 {
        self.send_command(code);
        self.receive_data(code)
    }

    fn command_write(&mut self, code: u8, data: u8) {
        self.send_command(code);
        self.send_data(data);
    }

    /// The new address takes effect once the status stage of the current
    /// control transfer completes.
    pub fn set_address(&mut self, enable: bool, address: u8) {
        let enable = if enable { 0x80 } else { 0 };
        self.command_write(cmd::SET_ADDRESS, enable | (address & 0x7F));
    }

    /// Until configured, the engine only answers on the control endpoint.
    pub fn configure_device(&mut self, configured: bool) {
        self.command_write(cmd::CONFIGURE_DEVICE, u8::from(configured));
    }

    pub fn set_mode(&mut self, mode: u8) {
        self.command_write(cmd::SET_MODE, mode);
    }

    pub fn set_device_status(&mut self, status: DeviceStatus) {
        self.command_write(cmd::SET_DEVICE_STATUS, status.bits());
    }

    /// Also clears the DEV_STAT interrupt cause.
    pub fn device_status(&mut self) -> DeviceStatus {
        DeviceStatus::from_bits_retain(self.command_read(cmd::GET_DEVICE_STATUS))
    }

    pub fn error_code(&mut self) -> u8 {
        self.command_read(cmd::GET_ERROR_CODE)
    }

    /// Makes `ep` the target of later buffer commands and reports its state.
    pub fn select_endpoint(&mut self, ep: u8) -> EndpointStatus {
        EndpointStatus::from_bits_retain(self.command_read(cmd::SELECT_ENDPOINT + ep))
    }

    /// As `select_endpoint`, also acknowledging the endpoint's interrupt.
    pub fn select_endpoint_clear(&mut self, ep: u8) -> EndpointStatus {
        EndpointStatus::from_bits_retain(self.command_read(cmd::SELECT_ENDPOINT_CLEAR + ep))
    }

    pub fn set_endpoint_status(&mut self, ep: u8, control: EndpointControl) {
        self.command_write(cmd::SET_ENDPOINT_STATUS + ep, control.bits());
    }

    /// Frees the selected OUT buffer for the next packet. Returns non-zero if
    /// a SETUP overwrote the packet before it was cleared.
    pub fn clear_buffer(&mut self) -> u8 {
        self.command_read(cmd::CLEAR_BUFFER)
    }

    /// Hands the selected IN buffer to the engine for transmission.
    pub fn validate_buffer(&mut self) {
        self.send_command(cmd::VALIDATE_BUFFER);
    }
}
