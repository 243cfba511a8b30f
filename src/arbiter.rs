// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared SPI bus between the configuration flash and the FPGA.
//!
//! Both parts hang off the same three SPI lines, each with its own chip
//! select. The FPGA also reads the flash over those lines when it
//! configures, which is why the pins can be released to high impedance
//! entirely.
//!
//! Every operation here is one or more complete transactions: exactly one
//! select is asserted (after deasserting the other), the bytes move, the bus
//! is flushed and the select is deasserted again. Nothing is left half-done
//! between calls.
//!
//! The flash part is expected to be a particular one. Until its JEDEC id has
//! been read back and matched (or the host has explicitly overridden the
//! check), erase and program are refused by the vendor layer; see
//! [`Arbiter::flash_unlocked`].

use byteorder::{BigEndian, ByteOrder};
use embedded_hal::spi::{Error as _, ErrorKind, SpiBus};

use crate::board::{Chip, SpiPins};
use crate::config::{FLASH_ADDRESS_LIMIT, FLASH_BUSY_BUDGET, FLASH_ID, FPGA_BOOT_BUDGET};
use crate::retry::{poll_until, Timeout};

/// Flash opcodes.
mod op {
    pub const PAGE_PROGRAM: u8 = 0x02;
    pub const READ: u8 = 0x03;
    pub const READ_STATUS: u8 = 0x05;
    pub const WRITE_ENABLE: u8 = 0x06;
    pub const SECTOR_ERASE: u8 = 0x20;
    pub const READ_ID: u8 = 0x9F;
    pub const RELEASE_POWER_DOWN: u8 = 0xAB;
    pub const BLOCK_ERASE: u8 = 0xD8;
}

const STATUS_BUSY: u8 = 1 << 0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiError {
    Bus(ErrorKind),
    /// The flash stayed busy, or the FPGA never raised DONE.
    Timeout,
}

impl From<Timeout> for SpiError {
    fn from(_: Timeout) -> Self {
        Self::Timeout
    }
}

/// Whether erase and program may touch the flash.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lockout {
    Unknown,
    /// The part answered with the expected id, or the host said to go ahead
    /// anyway.
    Verified,
}

pub struct Arbiter<B, P> {
    bus: B,
    pins: P,
    /// Chip whose select is currently asserted.
    owner: Option<Chip>,
    lockout: Lockout,
}

/// Opcode followed by a 24-bit big-endian address.
fn addressed(opcode: u8, address: u32) -> [u8; 4] {
    let mut header = [opcode, 0, 0, 0];
    BigEndian::write_u24(&mut header[1..], address & (FLASH_ADDRESS_LIMIT - 1));
    header
}

impl<B: SpiBus<u8>, P: SpiPins> Arbiter<B, P> {
    /// Takes the bus in the released state.
    pub fn new(bus: B, mut pins: P) -> Self {
        pins.release();
        Self {
            bus,
            pins,
            owner: None,
            lockout: Lockout::Unknown,
        }
    }

    pub fn owner(&self) -> Option<Chip> {
        self.owner
    }

    pub fn lockout(&self) -> Lockout {
        self.lockout
    }

    pub fn engage(&mut self) {
        self.pins.select(Chip::Flash, false);
        self.pins.select(Chip::Fpga, false);
        self.owner = None;
        self.pins.engage();
    }

    pub fn release(&mut self) {
        self.pins.select(Chip::Flash, false);
        self.pins.select(Chip::Fpga, false);
        self.owner = None;
        self.pins.release();
    }

    fn transaction<T>(
        &mut self,
        chip: Chip,
        body: impl FnOnce(&mut B) -> Result<T, B::Error>,
    ) -> Result<T, SpiError> {
        self.pins.select(chip.other(), false);
        self.pins.select(chip, true);
        self.owner = Some(chip);

        let result = match body(&mut self.bus) {
            Ok(v) => self.bus.flush().map(|()| v),
            Err(e) => Err(e),
        };

        self.pins.select(chip, false);
        self.owner = None;
        result.map_err(|e| SpiError::Bus(e.kind()))
    }

    /// Wakes the flash from deep power-down and reads its 24-bit JEDEC id.
    pub fn read_id(&mut self) -> Result<u32, SpiError> {
        self.transaction(Chip::Flash, |bus| bus.write(&[op::RELEASE_POWER_DOWN]))?;
        self.pins.delay_us(20);

        let mut id = [op::READ_ID, 0, 0, 0];
        self.transaction(Chip::Flash, |bus| bus.transfer_in_place(&mut id))?;
        Ok(BigEndian::read_u24(&id[1..]))
    }

    pub fn status(&mut self) -> Result<u8, SpiError> {
        let mut status = [op::READ_STATUS, 0];
        self.transaction(Chip::Flash, |bus| bus.transfer_in_place(&mut status))?;
        Ok(status[1])
    }

    /// Polls the status register until the busy bit clears.
    pub fn wait_busy(&mut self) -> Result<(), SpiError> {
        let mut fault = None;
        let outcome = poll_until(FLASH_BUSY_BUDGET, || match self.status() {
            Ok(status) => status & STATUS_BUSY == 0,
            Err(e) => {
                fault = Some(e);
                true
            }
        });
        if let Some(e) = fault {
            return Err(e);
        }
        if outcome.is_err() {
            warn!("flash stuck busy");
        }
        outcome?;
        Ok(())
    }

    pub fn write_enable(&mut self) -> Result<(), SpiError> {
        self.transaction(Chip::Flash, |bus| bus.write(&[op::WRITE_ENABLE]))?;
        self.pins.delay_us(10);
        Ok(())
    }

    fn erase(&mut self, opcode: u8, address: u32) -> Result<(), SpiError> {
        self.write_enable()?;
        let header = addressed(opcode, address);
        self.transaction(Chip::Flash, |bus| bus.write(&header))?;
        self.wait_busy()
    }

    /// Erases the 4 KiB sector containing `address`.
    pub fn erase_sector(&mut self, address: u32) -> Result<(), SpiError> {
        self.erase(op::SECTOR_ERASE, address)
    }

    /// Erases the 64 KiB block containing `address`.
    pub fn erase_block(&mut self, address: u32) -> Result<(), SpiError> {
        self.erase(op::BLOCK_ERASE, address)
    }

    pub fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), SpiError> {
        let header = addressed(op::READ, address);
        self.transaction(Chip::Flash, |bus| {
            bus.write(&header)?;
            bus.read(buf)
        })
    }

    /// Programs `data` starting at `address`. Page wrap-around is the part's
    /// business; callers keep to one page.
    pub fn program(&mut self, address: u32, data: &[u8]) -> Result<(), SpiError> {
        self.write_enable()?;
        let header = addressed(op::PAGE_PROGRAM, address);
        self.transaction(Chip::Flash, |bus| {
            bus.write(&header)?;
            bus.write(data)
        })?;
        self.wait_busy()
    }

    /// Full-duplex exchange with `chip`, replacing `buf` with what came back.
    pub fn exchange(&mut self, chip: Chip, buf: &mut [u8]) -> Result<(), SpiError> {
        self.engage();
        self.transaction(chip, |bus| bus.transfer_in_place(buf))
    }

    /// Pulls PROG low, restarting FPGA configuration. Unless `halt`, PROG is
    /// released again after the minimum pulse.
    pub fn fpga_prog(&mut self, halt: bool) {
        self.pins.set_fpga_prog(false);
        if !halt {
            self.pins.delay_ms(2);
            self.pins.set_fpga_prog(true);
        }
    }

    /// Waits for the FPGA to finish configuring, then takes the bus back.
    pub fn fpga_wait_boot(&mut self) -> Result<(), SpiError> {
        let pins = &self.pins;
        if let Err(e) = poll_until(FPGA_BOOT_BUDGET, || pins.fpga_done()) {
            warn!("fpga did not come up");
            return Err(e.into());
        }
        self.pins.delay_ms(1);
        self.engage();
        Ok(())
    }

    /// Reads the flash id, marking the part verified if it is the expected
    /// one. A mismatch leaves the lockout as it was.
    pub fn identify(&mut self) -> Result<u32, SpiError> {
        let id = self.read_id()?;
        if id == FLASH_ID {
            if self.lockout != Lockout::Verified {
                info!("flash {=u32:x} verified", id);
            }
            self.lockout = Lockout::Verified;
        } else {
            warn!("unexpected flash id {=u32:x}", id);
        }
        Ok(id)
    }

    /// Whether the flash may be erased or programmed. The first call after
    /// a power change identifies the part; later calls are free.
    pub fn flash_unlocked(&mut self) -> Result<bool, SpiError> {
        if self.lockout == Lockout::Unknown {
            self.identify()?;
        }
        Ok(self.lockout == Lockout::Verified)
    }

    pub fn override_lockout(&mut self) {
        warn!("flash lockout overridden");
        self.lockout = Lockout::Verified;
    }

    pub fn reset_lockout(&mut self) {
        self.lockout = Lockout::Unknown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, MockBus, MockPins};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn arbiter() -> (Arbiter<MockBus, MockPins>, Rc<RefCell<mock::FlashSim>>) {
        let (bus, pins, sim) = mock::spi();
        let id = FLASH_ID.to_be_bytes();
        sim.borrow_mut().id = [id[1], id[2], id[3]];
        (Arbiter::new(bus, pins), sim)
    }

    #[test]
    fn id_is_big_endian_after_wakeup() {
        let (mut spi, sim) = arbiter();
        sim.borrow_mut().id = [0xC2, 0x20, 0x13];
        assert_eq!(spi.read_id(), Ok(0xC2_2013));
        let sim = sim.borrow();
        assert_eq!(sim.opcodes, [0xAB, 0x9F]);
        assert_eq!(sim.delay_ns, 20_000);
    }

    #[test]
    fn lockout_follows_id() {
        let (mut spi, sim) = arbiter();
        sim.borrow_mut().id = [0xEF, 0x40, 0x18];
        assert_eq!(spi.flash_unlocked(), Ok(false));
        // Still unknown, so every check tries again.
        assert_eq!(spi.flash_unlocked(), Ok(false));
        assert_eq!(sim.borrow().count(0x9F), 2);

        spi.override_lockout();
        assert_eq!(spi.flash_unlocked(), Ok(true));
        assert_eq!(sim.borrow().count(0x9F), 2);
    }

    #[test]
    fn bus_fault_while_identifying_is_reported() {
        let (mut spi, sim) = arbiter();
        sim.borrow_mut().bus_fault = true;
        assert_eq!(spi.flash_unlocked(), Err(SpiError::Bus(ErrorKind::Other)));
        assert_eq!(spi.lockout(), Lockout::Unknown);

        sim.borrow_mut().bus_fault = false;
        assert_eq!(spi.flash_unlocked(), Ok(true));
    }

    #[test]
    fn program_then_read_back() {
        let (mut spi, sim) = arbiter();
        spi.engage();
        spi.erase_sector(0x1000).unwrap();
        spi.program(0x1010, b"bitstream").unwrap();
        let mut buf = [0; 12];
        spi.read(0x100E, &mut buf).unwrap();
        assert_eq!(&buf, b"\xFF\xFFbitstream\xFF");
        assert_eq!(
            sim.borrow().opcodes.iter().filter(|&&o| o != 0x05).copied().collect::<Vec<_>>(),
            [0x06, 0x20, 0x06, 0x02, 0x03]
        );
        assert_eq!(spi.owner(), None);
    }

    #[test]
    fn program_without_write_enable_is_ignored_by_part() {
        let (mut spi, sim) = arbiter();
        let header = addressed(op::PAGE_PROGRAM, 0);
        spi.transaction(Chip::Flash, |bus| {
            bus.write(&header)?;
            bus.write(&[0])
        })
        .unwrap();
        assert_eq!(sim.borrow().memory[0], 0xFF);
    }

    #[test]
    fn erase_times_out_when_stuck_busy() {
        let (mut spi, sim) = arbiter();
        sim.borrow_mut().busy_polls = None;
        assert_eq!(spi.erase_block(0), Err(SpiError::Timeout));
        assert_eq!(sim.borrow().count(0x05), FLASH_BUSY_BUDGET as usize + 1);
    }

    #[test]
    fn fpga_exchange_only_selects_fpga() {
        let (mut spi, sim) = arbiter();
        let mut buf = [0x00, 0x5A, 0xFF];
        spi.exchange(Chip::Fpga, &mut buf).unwrap();
        assert_eq!(buf, [0xFF, 0xA5, 0x00]);
        let sim = sim.borrow();
        assert_eq!(sim.fpga_bytes, [0x00, 0x5A, 0xFF]);
        assert!(sim.opcodes.is_empty());
        assert!(sim.engaged);
        assert!(!sim.fpga_selected);
    }

    #[test]
    fn addresses_are_24_bit() {
        assert_eq!(addressed(0x03, 0x12_3456), [0x03, 0x12, 0x34, 0x56]);
        assert_eq!(addressed(0x03, 0x0100_0001), [0x03, 0, 0, 1]);
    }

    #[test]
    fn fpga_prog_pulse() {
        let (mut spi, sim) = arbiter();
        spi.fpga_prog(true);
        assert!(!sim.borrow().prog_high);
        assert_eq!(sim.borrow().delay_ns, 0);
        spi.fpga_prog(false);
        assert!(sim.borrow().prog_high);
        assert_eq!(sim.borrow().delay_ns, 2_000_000);
    }
}
