// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! LPC1343 peripherals, and the board wiring on top of them.
//!
//! There is no maintained peripheral access crate for this part, so the
//! registers we touch are described here by hand. Peripherals with a
//! contiguous register file get a `#[repr(C)]` block of `VolatileCell`s
//! behind a zero-sized handle that derefs to it. The system control and pin
//! configuration blocks are sparse and we only poke a handful of registers in
//! them, so those are plain addresses wrapped in [`Reg`].
//!
//! Interrupt numbering and the vector table follow the layout `cortex-m-rt`
//! expects from a device crate, so `#[interrupt]` works in the firmware.

use core::convert::Infallible;
use core::marker::PhantomData;
use core::ops::Deref;
use core::sync::atomic::{AtomicU16, Ordering};

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::NVIC;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorType, SpiBus};
use vcell::VolatileCell;

use crate::app::Platform;
use crate::board::{BoardIo, Chip, Led, PowerDrive, SpiPins};
use crate::config::DPC_PRIORITY;
use crate::dpc::{Reprogram, SoftInterrupt};
use crate::usb::sie::{DeviceStatus, Sie, UsbRegisters};

/// Core clock once the PLL is up.
pub const CORE_HZ: u32 = 24_000_000;

/// Busy-waits for `ms` milliseconds at the PLL clock.
pub fn delay_ms(ms: u32) {
    cortex_m::asm::delay(ms * (CORE_HZ / 1000));
}

///////////////////////////////////////////////////////////////////////////////
// Interrupts.

/// Device interrupts we name. The 40 start-logic wakeup vectors at the bottom
/// of the table are never enabled and are left out.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(non_camel_case_types)]
#[repr(u16)]
pub enum Interrupt {
    /// Unused by the hardware design; borrowed as the deferred procedure call.
    I2C0 = 40,
    CT16B0 = 41,
    CT16B1 = 42,
    CT32B0 = 43,
    CT32B1 = 44,
    SSP0 = 45,
    UART = 46,
    USB_IRQ = 47,
    USB_FIQ = 48,
    ADC = 49,
    WDT = 50,
    BOD = 51,
    PIO3 = 53,
    PIO2 = 54,
    PIO1 = 55,
    PIO0 = 56,
    SSP1 = 57,
}

unsafe impl InterruptNumber for Interrupt {
    #[inline(always)]
    fn number(self) -> u16 {
        self as u16
    }
}

pub use self::Interrupt as interrupt;
#[cfg(feature = "rt")]
pub use cortex_m_rt::interrupt;

#[cfg(feature = "rt")]
mod vectors {
    extern "C" {
        fn I2C0();
        fn CT16B0();
        fn CT16B1();
        fn CT32B0();
        fn CT32B1();
        fn SSP0();
        fn UART();
        fn USB_IRQ();
        fn USB_FIQ();
        fn ADC();
        fn WDT();
        fn BOD();
        fn PIO3();
        fn PIO2();
        fn PIO1();
        fn PIO0();
        fn SSP1();
    }

    #[doc(hidden)]
    pub union Vector {
        _handler: unsafe extern "C" fn(),
        _reserved: u32,
    }

    const WAKEUP: Vector = Vector { _reserved: 0 };

    #[doc(hidden)]
    #[link_section = ".vector_table.interrupts"]
    #[no_mangle]
    pub static __INTERRUPTS: [Vector; 58] = [
        WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP,
        WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP,
        WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP,
        WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP, WAKEUP,
        Vector { _handler: I2C0 },
        Vector { _handler: CT16B0 },
        Vector { _handler: CT16B1 },
        Vector { _handler: CT32B0 },
        Vector { _handler: CT32B1 },
        Vector { _handler: SSP0 },
        Vector { _handler: UART },
        Vector { _handler: USB_IRQ },
        Vector { _handler: USB_FIQ },
        Vector { _handler: ADC },
        Vector { _handler: WDT },
        Vector { _handler: BOD },
        Vector { _reserved: 0 },
        Vector { _handler: PIO3 },
        Vector { _handler: PIO2 },
        Vector { _handler: PIO1 },
        Vector { _handler: PIO0 },
        Vector { _handler: SSP1 },
    ];
}

///////////////////////////////////////////////////////////////////////////////
// Sparse register blocks.

/// A single memory-mapped 32-bit register.
#[derive(Copy, Clone)]
pub struct Reg(usize);

impl Reg {
    pub const fn at(addr: usize) -> Self {
        Self(addr)
    }

    #[inline(always)]
    fn cell(self) -> &'static VolatileCell<u32> {
        // Every `Reg` is built from a constant peripheral address below.
        unsafe { &*(self.0 as *const VolatileCell<u32>) }
    }

    #[inline(always)]
    pub fn read(self) -> u32 {
        self.cell().get()
    }

    #[inline(always)]
    pub fn write(self, value: u32) {
        self.cell().set(value)
    }

    #[inline(always)]
    pub fn modify(self, f: impl FnOnce(u32) -> u32) {
        self.write(f(self.read()))
    }
}

pub mod syscon {
    use super::Reg;

    const BASE: usize = 0x4004_8000;

    pub const PRESETCTRL: Reg = Reg::at(BASE + 0x004);
    pub const SYSPLLCTRL: Reg = Reg::at(BASE + 0x008);
    pub const SYSPLLSTAT: Reg = Reg::at(BASE + 0x00C);
    pub const USBPLLCTRL: Reg = Reg::at(BASE + 0x010);
    pub const USBPLLSTAT: Reg = Reg::at(BASE + 0x014);
    pub const SYSOSCCTRL: Reg = Reg::at(BASE + 0x020);
    pub const SYSPLLCLKSEL: Reg = Reg::at(BASE + 0x040);
    pub const SYSPLLCLKUEN: Reg = Reg::at(BASE + 0x044);
    pub const USBPLLCLKSEL: Reg = Reg::at(BASE + 0x048);
    pub const USBPLLCLKUEN: Reg = Reg::at(BASE + 0x04C);
    pub const MAINCLKSEL: Reg = Reg::at(BASE + 0x070);
    pub const MAINCLKUEN: Reg = Reg::at(BASE + 0x074);
    pub const SYSAHBCLKCTRL: Reg = Reg::at(BASE + 0x080);
    pub const SSPCLKDIV: Reg = Reg::at(BASE + 0x094);
    pub const PDRUNCFG: Reg = Reg::at(BASE + 0x238);

    // PDRUNCFG bits are power-*down* controls.
    pub const PD_ADC: u32 = 1 << 4;
    pub const PD_WDTOSC: u32 = 1 << 6;
    pub const PD_USBPAD: u32 = 1 << 10;

    /// Latches a new clock source selection: the update-enable register has
    /// to see a 0 then a 1.
    pub fn update(uen: Reg) {
        uen.write(0);
        uen.write(1);
    }
}

pub mod iocon {
    use super::Reg;

    const BASE: usize = 0x4004_4000;

    pub const PIO0_1: Reg = Reg::at(BASE + 0x10);
    pub const PIO1_8: Reg = Reg::at(BASE + 0x14);
    pub const PIO0_3: Reg = Reg::at(BASE + 0x2C);
    pub const PIO0_4: Reg = Reg::at(BASE + 0x30);
    pub const PIO0_5: Reg = Reg::at(BASE + 0x34);
    pub const PIO1_9: Reg = Reg::at(BASE + 0x38);
    pub const PIO0_6: Reg = Reg::at(BASE + 0x4C);
    pub const PIO0_7: Reg = Reg::at(BASE + 0x50);
    pub const PIO0_8: Reg = Reg::at(BASE + 0x60);
    pub const PIO0_9: Reg = Reg::at(BASE + 0x64);
    pub const PIO0_10: Reg = Reg::at(BASE + 0x68);
    pub const PIO1_10: Reg = Reg::at(BASE + 0x6C);
    pub const PIO0_11: Reg = Reg::at(BASE + 0x74);
    pub const PIO1_0: Reg = Reg::at(BASE + 0x78);
    pub const PIO1_1: Reg = Reg::at(BASE + 0x7C);
    pub const PIO1_2: Reg = Reg::at(BASE + 0x80);
    pub const PIO1_3: Reg = Reg::at(BASE + 0x90);
    pub const PIO3_2: Reg = Reg::at(BASE + 0x9C);
    pub const PIO1_5: Reg = Reg::at(BASE + 0xA0);

    pub const MODE_PULLUP: u32 = 0x10;
    pub const ADMODE_DIGITAL: u32 = 0x80;
}

/// One GPIO port. Data is accessed through the masked window, so writes only
/// touch the pins named in the mask.
#[derive(Copy, Clone)]
pub struct Port(usize);

pub const GPIO0: Port = Port(0x5000_0000);
pub const GPIO1: Port = Port(0x5001_0000);
pub const GPIO3: Port = Port(0x5003_0000);

impl Port {
    fn data(self, mask: u32) -> Reg {
        Reg::at(self.0 + ((mask as usize) << 2))
    }

    fn dir(self) -> Reg {
        Reg::at(self.0 + 0x8000)
    }

    pub fn read(self, mask: u32) -> u32 {
        self.data(mask).read()
    }

    pub fn write(self, mask: u32, value: u32) {
        self.data(mask).write(value)
    }

    /// Drives the masked pins to `value`, making them outputs.
    pub fn drive(self, mask: u32, value: u32) {
        self.dir().modify(|d| d | mask);
        self.write(mask, value);
    }

    /// Returns the masked pins to inputs.
    pub fn float(self, mask: u32) {
        self.dir().modify(|d| d & !mask);
    }
}

///////////////////////////////////////////////////////////////////////////////
// Contiguous register blocks.

macro_rules! peripheral {
    ($name:ident, $block:ty, $addr:expr) => {
        pub struct $name {
            _marker: PhantomData<*const ()>,
        }

        unsafe impl Send for $name {}

        impl $name {
            #[inline(always)]
            pub const fn ptr() -> *const $block {
                $addr as *const _
            }

            /// Creates a handle to the peripheral.
            ///
            /// # Safety
            ///
            /// Handles are not counted. The caller must make sure two handles
            /// are never in use from contexts that can preempt each other.
            pub unsafe fn steal() -> Self {
                Self {
                    _marker: PhantomData,
                }
            }
        }

        impl Deref for $name {
            type Target = $block;

            #[inline(always)]
            fn deref(&self) -> &Self::Target {
                unsafe { &*Self::ptr() }
            }
        }
    };
}

#[repr(C)]
pub struct UsbBlock {
    pub devintst: VolatileCell<u32>,
    pub devinten: VolatileCell<u32>,
    pub devintclr: VolatileCell<u32>,
    pub devintset: VolatileCell<u32>,
    pub cmdcode: VolatileCell<u32>,
    pub cmddata: VolatileCell<u32>,
    pub rxdata: VolatileCell<u32>,
    pub txdata: VolatileCell<u32>,
    pub rxplen: VolatileCell<u32>,
    pub txplen: VolatileCell<u32>,
    pub ctrl: VolatileCell<u32>,
    pub devfiqsel: VolatileCell<u32>,
}

#[repr(C)]
pub struct SspBlock {
    pub cr0: VolatileCell<u32>,
    pub cr1: VolatileCell<u32>,
    pub dr: VolatileCell<u32>,
    pub sr: VolatileCell<u32>,
    pub cpsr: VolatileCell<u32>,
}

#[repr(C)]
pub struct AdcBlock {
    pub cr: VolatileCell<u32>,
    pub gdr: VolatileCell<u32>,
    _reserved: VolatileCell<u32>,
    pub inten: VolatileCell<u32>,
    pub dr: [VolatileCell<u32>; 8],
}

#[repr(C)]
pub struct TimerBlock {
    pub ir: VolatileCell<u32>,
    pub tcr: VolatileCell<u32>,
    pub tc: VolatileCell<u32>,
    pub pr: VolatileCell<u32>,
    pub pc: VolatileCell<u32>,
    pub mcr: VolatileCell<u32>,
    pub mr0: VolatileCell<u32>,
}

peripheral!(Usb, UsbBlock, 0x4002_0000);
peripheral!(Ssp0, SspBlock, 0x4004_0000);
peripheral!(Adc, AdcBlock, 0x4001_C000);
peripheral!(Ct32b1, TimerBlock, 0x4001_8000);

impl UsbRegisters for Usb {
    fn interrupt_status(&self) -> u32 {
        self.devintst.get()
    }

    fn clear_interrupts(&mut self, bits: u32) {
        self.devintclr.set(bits)
    }

    fn set_interrupts(&mut self, bits: u32) {
        self.devintset.set(bits)
    }

    fn enable_interrupts(&mut self, bits: u32) {
        self.devinten.set(bits)
    }

    fn write_command(&mut self, word: u32) {
        self.cmdcode.set(word)
    }

    fn read_command_data(&mut self) -> u32 {
        self.cmddata.get()
    }

    fn select_buffer(&mut self, word: u32) {
        self.ctrl.set(word)
    }

    fn rx_packet_length(&mut self) -> u32 {
        self.rxplen.get()
    }

    fn read_rx_word(&mut self) -> u32 {
        self.rxdata.get()
    }

    fn write_tx_length(&mut self, len: u32) {
        self.txplen.set(len)
    }

    fn write_tx_word(&mut self, word: u32) {
        self.txdata.set(word)
    }
}

///////////////////////////////////////////////////////////////////////////////
// SSP0, as the SPI master for the flash and FPGA.

const SSP_SR_TNF: u32 = 1 << 1;
const SSP_SR_RNE: u32 = 1 << 2;
const SSP_SR_BSY: u32 = 1 << 4;

impl Ssp0 {
    /// Takes the block out of reset and sets it up as an 8-bit master at the
    /// fastest rate it supports.
    pub fn init(&mut self) {
        syscon::PRESETCTRL.modify(|r| r | 1);
        syscon::SSPCLKDIV.write(1);
        self.cr0.set(0x0007);
        self.cpsr.set(2);
        self.cr1.set(0x0002);
        while self.sr.get() & SSP_SR_RNE != 0 {
            self.dr.get();
        }
    }

    fn exchange(&mut self, out: u8) -> u8 {
        while self.sr.get() & SSP_SR_TNF == 0 {}
        self.dr.set(u32::from(out));
        while self.sr.get() & SSP_SR_RNE == 0 {}
        self.dr.get() as u8
    }
}

impl ErrorType for Ssp0 {
    type Error = Infallible;
}

impl SpiBus<u8> for Ssp0 {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        for w in words {
            *w = self.exchange(0);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        for &w in words {
            self.exchange(w);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        for i in 0..read.len().max(write.len()) {
            let b = self.exchange(write.get(i).copied().unwrap_or(0));
            if let Some(r) = read.get_mut(i) {
                *r = b;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        for w in words {
            *w = self.exchange(*w);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Infallible> {
        while self.sr.get() & SSP_SR_BSY != 0 {}
        Ok(())
    }
}

///////////////////////////////////////////////////////////////////////////////
// ADC. Channels 0-2 are scanned in burst mode; the completion interrupt for
// channel 2 feeds an accumulator and finished sums are published here.

static ADC_SUMS: [AtomicU16; 3] = [AtomicU16::new(0), AtomicU16::new(0), AtomicU16::new(0)];

impl Adc {
    pub fn init(&mut self) {
        syscon::PDRUNCFG.modify(|r| r & !syscon::PD_ADC);
        self.cr.set(0);
        self.inten.set(1 << 2);
        // AD0-2, divide by 40 for a 0.6 MHz conversion clock, burst.
        self.cr.set(0x07 | (39 << 8) | (1 << 16));
    }

    /// Latest conversion of the three channels, 10 bits each.
    pub fn sample(&self) -> [u16; 3] {
        [0, 1, 2].map(|i| ((self.dr[i].get() >> 6) & 0x3FF) as u16)
    }
}

pub fn publish_adc(sums: [u16; 3]) {
    for (slot, sum) in ADC_SUMS.iter().zip(sums) {
        slot.store(sum, Ordering::Relaxed);
    }
}

///////////////////////////////////////////////////////////////////////////////
// Periodic tick.

impl Ct32b1 {
    pub fn init(&mut self, hz: u32) {
        self.tcr.set(0);
        self.pr.set(0);
        self.pc.set(0);
        self.tc.set(0);
        self.ir.set(self.ir.get());
        // Interrupt and reset on MR0.
        self.mcr.set(3);
        self.mr0.set(CORE_HZ / hz);
        self.tcr.set(1);
    }

    pub fn acknowledge(&mut self) {
        self.ir.set(self.ir.get());
    }

    /// Stops the timer and its match logic. The ROM bootloader misbehaves if
    /// it is left running.
    pub fn stop(&mut self) {
        self.tcr.set(0);
        self.mcr.set(0);
        self.mr0.set(0);
    }
}

///////////////////////////////////////////////////////////////////////////////
// Board pins.

const LED_GREEN: u32 = 1 << 4; // PIO0_4
const LED_RED: u32 = 1 << 5; // PIO0_5
const VIN_SOFTON: u32 = 1 << 7; // PIO0_7
const VIN_ON: u32 = 1 << 10; // PIO1_10
const SENSE: u32 = 0x300; // PIO1_8, PIO1_9
const BUTTON: u32 = 1 << 1; // PIO0_1
const FPGA_PROG: u32 = 1 << 2; // PIO1_2
const FPGA_DONE: u32 = 1 << 3; // PIO1_3
const FLASH_CS: u32 = 1 << 5; // PIO1_5
const FPGA_CS: u32 = 1 << 2; // PIO3_2
const SPI_PINS: u32 = 0x700; // PIO0_8-10

/// Applies the pin functions the rest of the firmware assumes.
pub fn configure_pins() {
    use iocon::*;

    PIO0_4.write(0);
    PIO0_5.write(0);
    PIO0_1.write(MODE_PULLUP);
    // VBUS and USB_CONNECT#.
    PIO0_3.write(1);
    PIO0_6.write(1);

    PIO1_8.write(MODE_PULLUP);
    PIO1_9.write(MODE_PULLUP);
    PIO0_7.write(0);
    PIO1_10.write(ADMODE_DIGITAL);

    // Analog inputs: VIN/3, 3V3 and 1V2 rails.
    PIO0_11.write(2);
    PIO1_0.write(2);
    PIO1_1.write(2);

    PIO0_8.write(0);
    PIO0_9.write(0);
    PIO0_10.write(1);
    PIO1_5.write(0);

    PIO3_2.write(0);
    PIO1_3.write(1 | ADMODE_DIGITAL);
    PIO1_2.write(1 | ADMODE_DIGITAL | MODE_PULLUP);
}

/// Everything on the board that isn't the SPI bus.
pub struct Io {
    drive: PowerDrive,
    uid: [u8; 16],
}

impl Io {
    pub fn new(uid: [u8; 16]) -> Self {
        let mut io = Self {
            drive: PowerDrive::Off,
            uid,
        };
        io.set_power_drive(PowerDrive::Off);
        io
    }
}

impl BoardIo for Io {
    fn set_led(&mut self, led: Led, on: bool) {
        let mask = match led {
            Led::Green => LED_GREEN,
            Led::Red => LED_RED,
        };
        GPIO0.drive(mask, if on { 0 } else { mask });
    }

    fn set_power_drive(&mut self, drive: PowerDrive) {
        let bits = drive as u8;
        // Both enables pull a P-FET gate low; releasing them turns it off.
        if bits & 2 != 0 {
            GPIO1.drive(VIN_ON, 0);
        } else {
            GPIO1.float(VIN_ON);
        }
        if bits & 1 != 0 {
            GPIO0.drive(VIN_SOFTON, 0);
        } else {
            GPIO0.float(VIN_SOFTON);
        }
        self.drive = drive;
    }

    fn power_drive(&self) -> PowerDrive {
        self.drive
    }

    fn sense_bits(&self) -> u8 {
        GPIO1.float(SENSE);
        (GPIO1.read(SENSE) >> 8) as u8 & 3
    }

    fn button_pressed(&self) -> bool {
        GPIO0.float(BUTTON);
        GPIO0.read(BUTTON) == 0
    }

    fn adc_averages(&self) -> [u16; 3] {
        [0, 1, 2].map(|i| ADC_SUMS[i].load(Ordering::Relaxed))
    }

    fn device_uid(&self) -> [u8; 16] {
        self.uid
    }
}

/// Control lines of the SPI bus.
pub struct Pins {
    _marker: PhantomData<*const ()>,
}

unsafe impl Send for Pins {}

impl Pins {
    pub fn new() -> Self {
        GPIO1.float(FPGA_DONE);
        Self {
            _marker: PhantomData,
        }
    }
}

impl DelayNs for Pins {
    fn delay_ns(&mut self, ns: u32) {
        let cycles = u64::from(ns) * u64::from(CORE_HZ / 1_000_000) / 1000;
        cortex_m::asm::delay(cycles.max(1) as u32);
    }
}

impl SpiPins for Pins {
    fn engage(&mut self) {
        iocon::PIO1_5.write(0);
        iocon::PIO0_8.write(1);
        iocon::PIO0_9.write(1);
        iocon::PIO0_10.write(2);
    }

    fn release(&mut self) {
        iocon::PIO1_5.write(0);
        iocon::PIO0_8.write(0);
        iocon::PIO0_9.write(0);
        iocon::PIO0_10.write(1);
        GPIO0.float(SPI_PINS);
        GPIO1.float(FLASH_CS);
    }

    fn select(&mut self, chip: Chip, asserted: bool) {
        let (port, mask) = match chip {
            Chip::Flash => (GPIO1, FLASH_CS),
            Chip::Fpga => (GPIO3, FPGA_CS),
        };
        port.drive(mask, if asserted { 0 } else { mask });
    }

    fn set_fpga_prog(&mut self, high: bool) {
        GPIO1.drive(FPGA_PROG, if high { FPGA_PROG } else { 0 });
    }

    fn fpga_done(&self) -> bool {
        GPIO1.read(FPGA_DONE) != 0
    }
}

///////////////////////////////////////////////////////////////////////////////
// Deferred procedure call on the I2C0 vector.

pub struct DpcIrq {
    _private: (),
}

impl DpcIrq {
    /// # Safety
    ///
    /// The I2C0 vector must not be used for anything else.
    pub const unsafe fn steal() -> Self {
        Self { _private: () }
    }
}

impl SoftInterrupt for DpcIrq {
    fn enable(&self) {
        unsafe { NVIC::unmask(Interrupt::I2C0) }
    }

    fn disable(&self) {
        NVIC::mask(Interrupt::I2C0)
    }

    fn pend(&self) {
        NVIC::pend(Interrupt::I2C0)
    }

    fn unpend(&self) {
        NVIC::unpend(Interrupt::I2C0)
    }

    fn set_lowest_priority(&self) {
        // The only other writer of this register is bring-up, before any
        // handle exists.
        unsafe {
            let mut nvic = cortex_m::Peripherals::steal().NVIC;
            nvic.set_priority(Interrupt::I2C0, DPC_PRIORITY);
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// ROM in-application programming entry.

const IAP_ENTRY: usize = 0x1FFF_1FF1;
const IAP_READ_UID: u32 = 58;
const IAP_REINVOKE_ISP: u32 = 57;

fn call_iap(command: &[u32; 5], result: &mut [u32; 5]) {
    let iap: extern "C" fn(*const u32, *mut u32) = unsafe { core::mem::transmute(IAP_ENTRY) };
    iap(command.as_ptr(), result.as_mut_ptr());
}

/// The chip's 128-bit unique id, as its four words in little-endian order.
pub fn read_uid() -> [u8; 16] {
    let mut result = [0; 5];
    call_iap(&[IAP_READ_UID, 0, 0, 0, 0], &mut result);
    let mut uid = [0; 16];
    for (chunk, word) in uid.chunks_exact_mut(4).zip(&result[1..]) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    uid
}

/// Drops the USB connection and hands the chip to the ROM bootloader.
pub struct Isp {
    _marker: PhantomData<*const ()>,
}

unsafe impl Send for Isp {}

impl Isp {
    /// # Safety
    ///
    /// [`Reprogram::reprogram`] tears down the USB engine and timer behind
    /// the back of whatever else owns them.
    pub unsafe fn steal() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl Isp {
    /// Tears the firmware down and jumps into the ROM's ISP mode. Does not
    /// come back.
    pub fn enter(&mut self) -> ! {
        info!("entering ISP");
        for n in 0..2 {
            // ICER0/1.
            Reg::at(0xE000_E180 + 4 * n).write(!0);
        }

        unsafe { Ct32b1::steal() }.stop();

        // Disconnect, and tell the host the device went away.
        Sie::new(unsafe { Usb::steal() }).set_device_status(DeviceStatus::BUS_RESET);
        delay_ms(100);
        syscon::PDRUNCFG.modify(|r| r | syscon::PD_USBPAD);
        delay_ms(20);

        // Back onto the internal RC oscillator, which is what ISP expects.
        syscon::MAINCLKSEL.write(0);
        syscon::update(syscon::MAINCLKUEN);

        // ROM erratum: ISP will not start unless this word is clear.
        Reg::at(0x1000_0054).write(0);

        let mut result = [0; 5];
        call_iap(&[IAP_REINVOKE_ISP, 0, 0, 0, 0], &mut result);
        loop {
            cortex_m::asm::nop();
        }
    }
}

impl Reprogram for Isp {
    fn reprogram(&mut self) {
        self.enter()
    }
}

///////////////////////////////////////////////////////////////////////////////

pub struct Lpc1343;

impl Platform for Lpc1343 {
    type Usb = Usb;
    type Io = Io;
    type Bus = Ssp0;
    type Pins = Pins;
    type Irq = DpcIrq;
    type Isp = Isp;
}
