// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The carrier board, as seen from the microcontroller.
//!
//! Pins and analog inputs are reached through two traits. [`BoardIo`] covers
//! everything except the SPI bus: LEDs, the two power enables, the sense
//! lines, the button, the ADC and the chip's own unique id. [`SpiPins`]
//! covers the side of the SPI bus that isn't the byte exchange itself: pin
//! muxing, the two chip selects and the FPGA's PROG and DONE lines.
//!
//! [`Board`] combines them with the bus [`Arbiter`] and implements the power
//! sequencing.

use byteorder::LittleEndian;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiBus;
use num_derive::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, Unaligned, U16};

use crate::arbiter::Arbiter;

/// The two parts on the shared SPI bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Chip {
    Flash,
    Fpga,
}

impl Chip {
    pub fn other(self) -> Self {
        match self {
            Self::Flash => Self::Fpga,
            Self::Fpga => Self::Flash,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Led {
    Green,
    Red,
}

/// State of the two board power enables.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerDrive {
    /// Both enables released.
    Off = 0,
    /// Only the soft-start enable, which charges the input through a
    /// current limit.
    Soft = 1,
    /// Both enables.
    Full = 2,
}

/// Argument of the set-power-mode vendor request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerMode {
    Idle = 0,
    SoftOn = 1,
    FullOn = 2,
    /// Hold the FPGA in configuration reset and take the SPI bus, so the
    /// flash can be reached.
    FlashEngage = 3,
    /// Give the bus back and let the FPGA configure itself from flash.
    FpgaReboot = 4,
}

pub trait BoardIo {
    fn set_led(&mut self, led: Led, on: bool);
    fn set_power_drive(&mut self, drive: PowerDrive);
    fn power_drive(&self) -> PowerDrive;
    /// The two sense lines, in the bottom two bits.
    fn sense_bits(&self) -> u8;
    fn button_pressed(&self) -> bool;
    /// Latest [`AdcAccumulator`] sums of the three monitored ADC channels.
    fn adc_averages(&self) -> [u16; 3];
    fn device_uid(&self) -> [u8; 16];
}

/// Control lines of the shared SPI bus.
///
/// The delay is part of the same object because every timing requirement of
/// the bus (power-up, write enable, FPGA PROG pulse) is a wait between two
/// pin operations.
pub trait SpiPins: DelayNs {
    /// Routes the shared pins to the SPI controller. Both selects are left
    /// as they were.
    fn engage(&mut self);
    /// Returns every shared pin, selects included, to a high-impedance input
    /// so the FPGA can drive the bus itself.
    fn release(&mut self);
    fn select(&mut self, chip: Chip, asserted: bool);
    /// Drives PROG high (run) or low (hold in configuration reset).
    fn set_fpga_prog(&mut self, high: bool);
    fn fpga_done(&self) -> bool;
}

/// Reply to the telemetry request.
#[repr(C)]
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
pub struct Telemetry {
    pub adc: [U16<LittleEndian>; 3],
    pub sense: u8,
}

/// Samples summed per published ADC reading.
pub const ADC_OVERSAMPLE: u8 = 16;

/// Sums ADC scans in groups of [`ADC_OVERSAMPLE`]. The sums are what the
/// telemetry request reports: 16 10-bit samples still fit in a `u16`.
#[derive(Debug, Default)]
pub struct AdcAccumulator {
    sums: [u16; 3],
    count: u8,
}

impl AdcAccumulator {
    pub const fn new() -> Self {
        Self {
            sums: [0; 3],
            count: 0,
        }
    }

    /// Adds one scan of the three channels, returning the finished sums when
    /// a group completes.
    pub fn add(&mut self, sample: [u16; 3]) -> Option<[u16; 3]> {
        for (sum, s) in self.sums.iter_mut().zip(sample) {
            *sum += s & 0x3FF;
        }
        self.count += 1;
        if self.count < ADC_OVERSAMPLE {
            return None;
        }
        self.count = 0;
        Some(core::mem::take(&mut self.sums))
    }
}

pub struct Board<IO, B, P> {
    pub io: IO,
    pub spi: Arbiter<B, P>,
}

impl<IO, B, P> Board<IO, B, P>
where
    IO: BoardIo,
    B: SpiBus<u8>,
    P: SpiPins,
{
    pub fn new(io: IO, spi: Arbiter<B, P>) -> Self {
        Self { io, spi }
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            adc: self.io.adc_averages().map(U16::new),
            sense: self.io.sense_bits(),
        }
    }

    /// Bit 0 is the green LED, bit 1 the red one.
    pub fn set_leds(&mut self, bits: u8) {
        self.io.set_led(Led::Green, bits & 1 != 0);
        self.io.set_led(Led::Red, bits & 2 != 0);
    }

    /// Returns whether the mode was reached. Only an FPGA reboot can fail,
    /// by the FPGA never reporting DONE.
    pub fn set_power_mode(&mut self, mode: PowerMode) -> bool {
        info!("power mode {}", mode);
        match mode {
            PowerMode::Idle => {
                self.spi.release();
                self.io.set_power_drive(PowerDrive::Off);
            }
            PowerMode::SoftOn => self.io.set_power_drive(PowerDrive::Soft),
            PowerMode::FullOn => self.io.set_power_drive(PowerDrive::Full),
            PowerMode::FlashEngage => {
                self.spi.fpga_prog(true);
                self.spi.engage();
                return true;
            }
            PowerMode::FpgaReboot => {
                self.spi.release();
                self.spi.fpga_prog(false);
                return self.spi.fpga_wait_boot().is_ok();
            }
        }
        // The flash may have been swapped while the board was unpowered.
        self.spi.reset_lockout();
        true
    }
}
