// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Board-management firmware for the LPC1343 on the FPGA test carrier.
//!
//! The microcontroller sits between a USB host and an FPGA board. It switches
//! the board's power, watches its supply rails, owns the SPI configuration
//! flash when the FPGA isn't using it, and offers a WinUSB bulk stream for
//! whatever the host wants to say to the firmware.
//!
//! `main` is one linear bring-up: pins, clocks, peripherals, then the
//! application object. It is written top to bottom in the order the hardware
//! wants things done, so it can be read alongside the LPC13xx user manual.
//! Everything after that happens in interrupt handlers. Bring-up splits the
//! application into one part per handler and hands each part over; from
//! then on a handler owns its part outright and runs without masking
//! anything, so the NVIC priorities decide who preempts whom. The handlers,
//! by priority:
//!
//! - ADC: scan results into the oversampling accumulator. Highest priority,
//!   since the burst scanner does not wait for us.
//! - CT32B1: the periodic tick.
//! - USB_IRQ: the USB device engine, control requests and bulk endpoints.
//! - I2C0: not an I2C interrupt at all. The vector is otherwise unused and is
//!   pended by software to run deferred work at the lowest priority.

#![no_std]
#![no_main]

use core::cell::Cell;

use cortex_m::interrupt::Mutex;
use cortex_m::peripheral::NVIC;
use cortex_m_rt::entry;

#[cfg(feature = "defmt")]
use defmt_rtt as _;
use panic_halt as _;

use signtest_mcu::app::{App, Deferred, Parts, UsbContext};
use signtest_mcu::board::{AdcAccumulator, BoardIo, Led};
use signtest_mcu::config::{TICK_HZ, TICK_PRIORITY, USB_PRIORITY};
use signtest_mcu::dpc::Dpc;
use signtest_mcu::lpc13xx::{
    self, configure_pins, delay_ms, interrupt, syscon, Adc, Ct32b1, DpcIrq, Io, Isp,
    Lpc1343, Pins, Ssp0, Usb,
};
use signtest_mcu::serial::{RxRing, TxRing};

static DPC: Dpc<DpcIrq> = Dpc::new(unsafe { DpcIrq::steal() });

/// Parts of the application on their way from bring-up to the handler that
/// owns them. Each handler takes its part on first entry.
static USB_CONTEXT: Mutex<Cell<Option<UsbContext<'static, Lpc1343>>>> =
    Mutex::new(Cell::new(None));
static DEFERRED: Mutex<Cell<Option<Deferred<'static, Lpc1343>>>> = Mutex::new(Cell::new(None));

#[entry]
fn main() -> ! {
    // We've come out of the boot ROM running at 12 MHz from the internal RC
    // oscillator. Only the bus clocks the ROM needed are on.

    let mut cp = cortex_m::Peripherals::take().unwrap();

    //////////////////////////////////////////////////////////////////////////
    // Clock gates. Turn on the AHB clocks of everything we touch: GPIO,
    // IOCON, SSP0, the timers, the ADC and the USB register interface.

    syscon::SYSAHBCLKCTRL.write(0x16D5F);

    //////////////////////////////////////////////////////////////////////////
    // Pins. Put the board into a known, safe state before doing anything
    // slow: FPGA board unpowered, red LED off, green LED on until bring-up
    // finishes.

    configure_pins();
    let mut io = Io::new(lpc13xx::read_uid());
    io.set_led(Led::Red, false);
    io.set_led(Led::Green, true);

    //////////////////////////////////////////////////////////////////////////
    // Clocks. USB needs an accurate 48 MHz, which means the crystal. We run
    // the core from the same crystal at 24 MHz through the system PLL.
    //
    // If something (a debugger, usually) has already switched us onto the
    // PLL, leave it alone.

    if syscon::MAINCLKSEL.read() & 3 == 0 {
        // Crystal oscillator on, and everything except the watchdog
        // oscillator and USB pads powered. The pads come up last.
        syscon::SYSOSCCTRL.write(0);
        syscon::PDRUNCFG.write(syscon::PD_WDTOSC | syscon::PD_USBPAD);
        delay_ms(5);

        // System PLL: 12 MHz crystal, M=2 P=4, giving 24 MHz.
        syscon::SYSPLLCTRL.write(0x41);
        syscon::SYSPLLCLKSEL.write(1);
        syscon::update(syscon::SYSPLLCLKUEN);

        // USB PLL: M=4 P=2, giving 48 MHz.
        syscon::USBPLLCTRL.write(0x23);
        syscon::USBPLLCLKSEL.write(1);
        syscon::update(syscon::USBPLLCLKUEN);

        while syscon::SYSPLLSTAT.read() & 1 == 0 {}
        while syscon::USBPLLSTAT.read() & 1 == 0 {}
        delay_ms(100);

        // And switch the core over.
        syscon::MAINCLKSEL.write(3);
        syscon::update(syscon::MAINCLKUEN);
    }

    delay_ms(10);

    //////////////////////////////////////////////////////////////////////////
    // SPI. SSP0 is set up once and then left alone; who can see it is
    // decided by pin muxing. Building the application below releases the
    // bus to the FPGA.

    let mut ssp = unsafe { Ssp0::steal() };
    ssp.init();
    let pins = Pins::new();

    //////////////////////////////////////////////////////////////////////////
    // ADC. Channels 0-2 are scanned continuously by the hardware; we are
    // interrupted at the end of each scan.

    let mut adc = unsafe { Adc::steal() };
    NVIC::mask(interrupt::ADC);
    adc.init();

    //////////////////////////////////////////////////////////////////////////
    // Tick.

    let mut timer = unsafe { Ct32b1::steal() };
    timer.init(TICK_HZ);

    //////////////////////////////////////////////////////////////////////////
    // USB. Power the pads and build the application around the hardware
    // handles. Starting it disconnects and reconnects the soft-connect pin,
    // so the host sees a fresh device even after a warm reset.

    syscon::PDRUNCFG.modify(|r| r & !syscon::PD_USBPAD);

    let rx = cortex_m::singleton!(: RxRing = RxRing::new()).unwrap();
    let tx = cortex_m::singleton!(: TxRing = TxRing::new()).unwrap();

    let parts = Parts::<Lpc1343> {
        usb: unsafe { Usb::steal() },
        io,
        bus: ssp,
        pins,
        isp: unsafe { Isp::steal() },
    };
    let mut app = App::new(parts, &DPC, rx, tx);
    app.start();
    app.board_mut().io.set_led(Led::Green, false);

    let (usb, deferred) = app.split();
    cortex_m::interrupt::free(|cs| {
        USB_CONTEXT.borrow(cs).set(Some(usb));
        DEFERRED.borrow(cs).set(Some(deferred));
    });

    //////////////////////////////////////////////////////////////////////////
    // Interrupts. The I2C0 vector's priority and enable are handled by the
    // application itself.

    unsafe {
        cp.NVIC.set_priority(interrupt::ADC, 0);
        cp.NVIC.set_priority(interrupt::CT32B1, TICK_PRIORITY);
        cp.NVIC.set_priority(interrupt::USB_IRQ, USB_PRIORITY);

        NVIC::unmask(interrupt::ADC);
        NVIC::unmask(interrupt::CT32B1);
        NVIC::unmask(interrupt::USB_IRQ);
    }

    loop {
        cortex_m::asm::wfi();
    }
}

#[interrupt]
fn ADC() {
    static mut ACC: AdcAccumulator = AdcAccumulator::new();

    let sample = unsafe { Adc::steal() }.sample();
    if let Some(sums) = ACC.add(sample) {
        lpc13xx::publish_adc(sums);
    }
}

#[interrupt]
fn CT32B1() {
    unsafe { Ct32b1::steal() }.acknowledge();
    DPC.tick();
}

#[interrupt]
fn USB_IRQ() {
    static mut CONTEXT: Option<UsbContext<'static, Lpc1343>> = None;

    if CONTEXT.is_none() {
        *CONTEXT = cortex_m::interrupt::free(|cs| USB_CONTEXT.borrow(cs).take());
    }
    if let Some(context) = CONTEXT {
        context.interrupt();
    }
}

#[interrupt]
fn I2C0() {
    static mut CONTEXT: Option<Deferred<'static, Lpc1343>> = None;

    if CONTEXT.is_none() {
        *CONTEXT = cortex_m::interrupt::free(|cs| DEFERRED.borrow(cs).take());
    }
    if let Some(context) = CONTEXT {
        context.run();
    }
}
