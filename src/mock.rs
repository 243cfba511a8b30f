// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated hardware for host tests.
//!
//! [`MockUsb`] models just enough of the SIE command engine and the packet
//! register window for the control and serial code to run against it: it
//! decodes the command protocol, keeps per-endpoint buffer state, and
//! records every packet validated for transmission. The `host_*` methods play
//! the part of the host.
//!
//! [`FlashSim`] models the shared SPI bus with a flash part and an FPGA on
//! it. It is shared between a [`MockBus`] (the byte exchange) and
//! [`MockPins`] (chip selects, PROG and DONE) the same way the real pins and
//! SSP block share the physical bus.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorKind, ErrorType, SpiBus};

use crate::board::{BoardIo, Chip, Led, PowerDrive, SpiPins};
use crate::dpc::{Reprogram, SoftInterrupt};
use crate::usb::sie::{cmd, DevInt, DeviceStatus, EndpointStatus, UsbRegisters};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Command(u8),
    Write(u8),
    Read(u8),
}

#[derive(Default, Debug)]
pub struct MockEndpoint {
    /// OUT packets waiting, with their SETUP flag.
    pub rx: VecDeque<(Vec<u8>, bool)>,
    /// IN buffer handed to the engine and not yet collected by the host.
    pub in_full: bool,
    pub stalled: bool,
    pub disabled: bool,
    /// Every IN packet validated on this endpoint, in order.
    pub sent: Vec<Vec<u8>>,
}

#[derive(Debug)]
pub struct MockUsb {
    pub commands: Vec<Command>,
    pub int_status: u32,
    pub int_enable: u32,
    pub endpoints: Vec<MockEndpoint>,
    pub address: Option<u8>,
    pub configured: bool,
    pub connected: bool,
    pub mode: u8,
    /// Change bits reported (and cleared) by the next Get Device Status.
    pub status_changes: u8,
    last_command: u8,
    selected: u8,
    cmd_data: u32,
    rx_ep: u8,
    rx_pos: usize,
    tx_ep: u8,
    pub tx_len: u32,
    pub tx_words: usize,
    tx_data: Vec<u8>,
}

impl MockUsb {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            int_status: 0,
            int_enable: 0,
            endpoints: (0..10).map(|_| MockEndpoint::default()).collect(),
            address: None,
            configured: false,
            connected: false,
            mode: 0,
            status_changes: 0,
            last_command: 0,
            selected: 0,
            cmd_data: 0,
            rx_ep: 0,
            rx_pos: 0,
            tx_ep: 1,
            tx_len: 0,
            tx_words: 0,
            tx_data: Vec::new(),
        }
    }

    pub fn endpoint(&self, ep: u8) -> &MockEndpoint {
        &self.endpoints[usize::from(ep)]
    }

    pub fn endpoint_mut(&mut self, ep: u8) -> &mut MockEndpoint {
        &mut self.endpoints[usize::from(ep)]
    }

    pub fn sent(&self, ep: u8) -> Vec<&[u8]> {
        self.endpoint(ep).sent.iter().map(Vec::as_slice).collect()
    }

    /// OUT packets still waiting on `ep`.
    pub fn queued(&self, ep: u8) -> usize {
        self.endpoint(ep).rx.len()
    }

    fn raise(&mut self, ep: u8) {
        self.int_status |= 1 << (ep + 1);
    }

    /// The host sends a SETUP. This replaces anything unread on EP0 OUT,
    /// lifts a stall, and abandons whatever was sitting in EP0 IN.
    pub fn host_setup(&mut self, packet: [u8; 8]) {
        let ep0 = self.endpoint_mut(0);
        ep0.rx.clear();
        ep0.rx.push_back((packet.to_vec(), true));
        ep0.stalled = false;
        let ep1 = self.endpoint_mut(1);
        ep1.stalled = false;
        ep1.in_full = false;
        self.raise(0);
    }

    pub fn host_out(&mut self, ep: u8, data: &[u8]) {
        assert_eq!(ep & 1, 0, "not an OUT endpoint");
        self.endpoint_mut(ep).rx.push_back((data.to_vec(), false));
        self.raise(ep);
    }

    /// The host collects the packet in the IN buffer of `ep`.
    pub fn host_ack_in(&mut self, ep: u8) {
        self.endpoint_mut(ep).in_full = false;
        self.raise(ep);
    }

    pub fn bus_reset(&mut self) {
        self.status_changes |= DeviceStatus::BUS_RESET.bits();
        self.int_status |= DevInt::DEV_STAT.bits();
    }

    fn endpoint_status(&self, ep: u8) -> u8 {
        let e = self.endpoint(ep);
        let mut status = EndpointStatus::empty();
        if ep & 1 == 0 {
            if let Some((_, setup)) = e.rx.front() {
                status |= EndpointStatus::FULL;
                if *setup {
                    status |= EndpointStatus::SETUP;
                }
            }
        } else if e.in_full {
            status |= EndpointStatus::FULL;
        }
        if e.stalled {
            status |= EndpointStatus::STALLED;
        }
        status.bits()
    }

    fn command_phase(&mut self, code: u8) {
        self.last_command = code;
        if code == cmd::VALIDATE_BUFFER {
            let packet = self.tx_data[..self.tx_len as usize].to_vec();
            let ep = self.endpoint_mut(self.selected);
            assert!(!ep.in_full, "validated a busy IN buffer");
            ep.in_full = true;
            ep.sent.push(packet);
        }
    }

    fn write_phase(&mut self, data: u8) {
        match self.last_command {
            cmd::SET_ADDRESS => self.address = (data & 0x80 != 0).then_some(data & 0x7F),
            cmd::CONFIGURE_DEVICE => self.configured = data & 1 != 0,
            cmd::SET_MODE => self.mode = data,
            cmd::SET_DEVICE_STATUS => self.connected = data & 1 != 0,
            code @ 0x40..=0x49 => {
                let ep = self.endpoint_mut(code - 0x40);
                ep.stalled = data & 0x81 != 0;
                ep.disabled = data & 0x20 != 0;
            }
            other => panic!("unexpected write after command {other:#x}"),
        }
    }

    fn read_phase(&mut self, code: u8) -> u32 {
        assert_eq!(code, self.last_command, "read phase names another command");
        match code {
            ep @ 0x00..=0x09 => {
                self.selected = ep;
                u32::from(self.endpoint_status(ep))
            }
            code @ 0x40..=0x49 => {
                let ep = code - 0x40;
                self.selected = ep;
                self.int_status &= !(1 << (ep + 1));
                u32::from(self.endpoint_status(ep))
            }
            cmd::GET_DEVICE_STATUS => {
                let status = u8::from(self.connected) | self.status_changes;
                self.status_changes = 0;
                u32::from(status)
            }
            cmd::GET_ERROR_CODE => 0,
            cmd::CLEAR_BUFFER => {
                let selected = self.selected;
                self.endpoint_mut(selected).rx.pop_front();
                0
            }
            other => panic!("unexpected read of command {other:#x}"),
        }
    }
}

impl UsbRegisters for MockUsb {
    fn interrupt_status(&self) -> u32 {
        self.int_status
    }

    fn clear_interrupts(&mut self, bits: u32) {
        self.int_status &= !bits;
    }

    fn set_interrupts(&mut self, bits: u32) {
        self.int_status |= bits;
    }

    fn enable_interrupts(&mut self, bits: u32) {
        self.int_enable = bits;
    }

    fn write_command(&mut self, word: u32) {
        let data = (word >> 16) as u8;
        match word & 0xFF00 {
            0x0500 => {
                self.commands.push(Command::Command(data));
                self.command_phase(data);
            }
            0x0100 => {
                self.commands.push(Command::Write(data));
                self.write_phase(data);
            }
            0x0200 => {
                self.commands.push(Command::Read(data));
                self.cmd_data = self.read_phase(data);
                self.int_status |= DevInt::CD_FULL.bits();
            }
            other => panic!("bad command phase {other:#x}"),
        }
        self.int_status |= DevInt::CC_EMPTY.bits();
    }

    fn read_command_data(&mut self) -> u32 {
        self.cmd_data
    }

    fn select_buffer(&mut self, word: u32) {
        let logical = ((word >> 2) & 0xF) as u8;
        if word & 1 != 0 {
            self.rx_ep = logical * 2;
            self.rx_pos = 0;
        }
        if word & 2 != 0 {
            self.tx_ep = logical * 2 + 1;
        }
    }

    fn rx_packet_length(&mut self) -> u32 {
        match self.endpoint(self.rx_ep).rx.front() {
            Some((packet, _)) => 0x400 | packet.len() as u32,
            None => 0,
        }
    }

    fn read_rx_word(&mut self) -> u32 {
        let pos = self.rx_pos;
        self.rx_pos += 4;
        let mut word = [0; 4];
        if let Some((packet, _)) = self.endpoint(self.rx_ep).rx.front() {
            for (i, b) in word.iter_mut().enumerate() {
                *b = packet.get(pos + i).copied().unwrap_or(0);
            }
        }
        u32::from_le_bytes(word)
    }

    fn write_tx_length(&mut self, len: u32) {
        self.tx_len = len;
        self.tx_words = 0;
        self.tx_data.clear();
    }

    fn write_tx_word(&mut self, word: u32) {
        self.tx_words += 1;
        self.tx_data.extend_from_slice(&word.to_le_bytes());
    }
}

/// One flash part plus an FPGA on a shared SPI bus.
#[derive(Debug)]
pub struct FlashSim {
    pub engaged: bool,
    pub flash_selected: bool,
    pub fpga_selected: bool,
    pub prog_high: bool,
    /// DONE polls after PROG is released before the FPGA reports booted.
    /// `None` never boots.
    pub boot_polls: Option<u32>,
    done_polls: u32,
    pub id: [u8; 3],
    pub memory: Vec<u8>,
    /// Status polls an erase or program stays busy for. `None` stays busy
    /// forever.
    pub busy_polls: Option<u32>,
    busy: Option<u32>,
    pub write_enabled: bool,
    /// Opcode of every completed flash transaction.
    pub opcodes: Vec<u8>,
    /// Bytes clocked out to the FPGA.
    pub fpga_bytes: Vec<u8>,
    transaction: Vec<u8>,
    pub delay_ns: u64,
    /// Makes every bus operation fail.
    pub bus_fault: bool,
}

pub const SIM_FLASH_SIZE: usize = 1 << 18;

impl FlashSim {
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            engaged: false,
            flash_selected: false,
            fpga_selected: false,
            prog_high: true,
            boot_polls: Some(3),
            done_polls: 0,
            id: [0x01, 0x40, 0x15],
            memory: vec![0xFF; SIM_FLASH_SIZE],
            busy_polls: Some(2),
            busy: None,
            write_enabled: false,
            opcodes: Vec::new(),
            fpga_bytes: Vec::new(),
            transaction: Vec::new(),
            delay_ns: 0,
            bus_fault: false,
        }))
    }

    fn check_bus(&self) -> Result<(), ErrorKind> {
        if self.bus_fault {
            Err(ErrorKind::Other)
        } else {
            Ok(())
        }
    }

    pub fn count(&self, opcode: u8) -> usize {
        self.opcodes.iter().filter(|&&o| o == opcode).count()
    }

    fn address(&self) -> usize {
        let t = &self.transaction;
        (usize::from(t[1]) << 16 | usize::from(t[2]) << 8 | usize::from(t[3])) % SIM_FLASH_SIZE
    }

    fn exchange(&mut self, mosi: u8) -> u8 {
        assert!(
            !(self.flash_selected && self.fpga_selected),
            "both chip selects asserted"
        );
        if self.fpga_selected {
            self.fpga_bytes.push(mosi);
            return !mosi;
        }
        if !self.flash_selected {
            return 0xFF;
        }
        self.transaction.push(mosi);
        let i = self.transaction.len() - 1;
        match self.transaction[0] {
            0x9F if (1..=3).contains(&i) => self.id[i - 1],
            0x05 if i >= 1 => {
                let busy = match &mut self.busy {
                    None => false,
                    Some(0) => {
                        self.busy = None;
                        false
                    }
                    Some(n) => {
                        *n -= 1;
                        true
                    }
                };
                u8::from(busy) | u8::from(self.write_enabled) << 1
            }
            0x03 if i >= 4 => {
                let addr = (self.address() + i - 4) % SIM_FLASH_SIZE;
                self.memory[addr]
            }
            0x02 if i >= 4 => {
                if self.write_enabled {
                    let addr = (self.address() + i - 4) % SIM_FLASH_SIZE;
                    self.memory[addr] &= mosi;
                }
                0xFF
            }
            _ => 0xFF,
        }
    }

    fn end_flash_transaction(&mut self) {
        let Some(&opcode) = self.transaction.first() else {
            return;
        };
        match opcode {
            0x06 => self.write_enabled = true,
            0x20 | 0xD8 if self.write_enabled && self.transaction.len() >= 4 => {
                let size = if opcode == 0x20 { 4096 } else { 65536 };
                let start = self.address() / size * size;
                let end = (start + size).min(SIM_FLASH_SIZE);
                self.memory[start..end].fill(0xFF);
                self.write_enabled = false;
                self.busy = self.busy_polls.or(Some(u32::MAX));
            }
            0x02 if self.write_enabled => {
                self.write_enabled = false;
                self.busy = self.busy_polls.or(Some(u32::MAX));
            }
            _ => {}
        }
        self.opcodes.push(opcode);
        self.transaction.clear();
    }
}

pub struct MockBus(pub Rc<RefCell<FlashSim>>);

impl ErrorType for MockBus {
    type Error = ErrorKind;
}

impl SpiBus<u8> for MockBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
        let mut sim = self.0.borrow_mut();
        sim.check_bus()?;
        for w in words {
            *w = sim.exchange(0);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), ErrorKind> {
        let mut sim = self.0.borrow_mut();
        sim.check_bus()?;
        for &w in words {
            sim.exchange(w);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), ErrorKind> {
        let mut sim = self.0.borrow_mut();
        sim.check_bus()?;
        for i in 0..read.len().max(write.len()) {
            let miso = sim.exchange(write.get(i).copied().unwrap_or(0));
            if let Some(r) = read.get_mut(i) {
                *r = miso;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), ErrorKind> {
        let mut sim = self.0.borrow_mut();
        sim.check_bus()?;
        for w in words {
            *w = sim.exchange(*w);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ErrorKind> {
        Ok(())
    }
}

pub struct MockPins(pub Rc<RefCell<FlashSim>>);

impl DelayNs for MockPins {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().delay_ns += u64::from(ns);
    }
}

impl SpiPins for MockPins {
    fn engage(&mut self) {
        self.0.borrow_mut().engaged = true;
    }

    fn release(&mut self) {
        let mut sim = self.0.borrow_mut();
        sim.engaged = false;
        sim.flash_selected = false;
        sim.fpga_selected = false;
    }

    fn select(&mut self, chip: Chip, asserted: bool) {
        let mut sim = self.0.borrow_mut();
        match chip {
            Chip::Flash => {
                if sim.flash_selected && !asserted {
                    sim.end_flash_transaction();
                }
                sim.flash_selected = asserted;
            }
            Chip::Fpga => sim.fpga_selected = asserted,
        }
    }

    fn set_fpga_prog(&mut self, high: bool) {
        let mut sim = self.0.borrow_mut();
        sim.prog_high = high;
        if !high {
            sim.done_polls = 0;
        }
    }

    fn fpga_done(&self) -> bool {
        let mut sim = self.0.borrow_mut();
        if !sim.prog_high {
            return false;
        }
        sim.done_polls += 1;
        matches!(sim.boot_polls, Some(n) if sim.done_polls > n)
    }
}

/// A bus, its pins and a handle on the simulated parts behind them.
pub fn spi() -> (MockBus, MockPins, Rc<RefCell<FlashSim>>) {
    let sim = FlashSim::new();
    (MockBus(sim.clone()), MockPins(sim.clone()), sim)
}

#[derive(Debug)]
pub struct MockIo {
    pub green: bool,
    pub red: bool,
    pub drive: PowerDrive,
    pub sense: u8,
    pub button: bool,
    pub adc: [u16; 3],
    pub uid: [u8; 16],
}

impl Default for MockIo {
    fn default() -> Self {
        Self {
            green: false,
            red: false,
            drive: PowerDrive::Off,
            sense: 0,
            button: false,
            adc: [0; 3],
            uid: core::array::from_fn(|i| i as u8),
        }
    }
}

impl BoardIo for MockIo {
    fn set_led(&mut self, led: Led, on: bool) {
        match led {
            Led::Green => self.green = on,
            Led::Red => self.red = on,
        }
    }

    fn set_power_drive(&mut self, drive: PowerDrive) {
        self.drive = drive;
    }

    fn power_drive(&self) -> PowerDrive {
        self.drive
    }

    fn sense_bits(&self) -> u8 {
        self.sense
    }

    fn button_pressed(&self) -> bool {
        self.button
    }

    fn adc_averages(&self) -> [u16; 3] {
        self.adc
    }

    fn device_uid(&self) -> [u8; 16] {
        self.uid
    }
}

#[derive(Default, Debug)]
pub struct MockIrq {
    pub enabled: Cell<bool>,
    pub pending: Cell<bool>,
    pub lowest: Cell<bool>,
    pub pends: Cell<u32>,
}

impl SoftInterrupt for MockIrq {
    fn enable(&self) {
        self.enabled.set(true);
    }

    fn disable(&self) {
        self.enabled.set(false);
    }

    fn pend(&self) {
        self.pending.set(true);
        self.pends.set(self.pends.get() + 1);
    }

    fn unpend(&self) {
        self.pending.set(false);
    }

    fn set_lowest_priority(&self) {
        self.lowest.set(true);
    }
}

#[derive(Default, Debug)]
pub struct CountingReprogram {
    pub calls: u32,
}

impl Reprogram for CountingReprogram {
    fn reprogram(&mut self) {
        self.calls += 1;
    }
}
