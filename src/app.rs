// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Everything the firmware owns, in one place.
//!
//! [`App`] is put together during bring-up and then [split](App::split) into
//! one part per interrupt priority. Each part is owned outright by the
//! handler that runs it, so no handler has to lock out the others:
//!
//! - [`UsbContext`] runs in the USB interrupt. It holds the USB engine and
//!   the board, and is the only thing that touches either.
//! - [`Deferred`] runs in the deferred-work interrupt, below USB. It holds
//!   the application end of the serial stream and the reprogram action.
//! - The tick needs nothing but the shared [`Dpc`].
//!
//! What they do share is the [`Dpc`] (atomics) and the serial rings
//! (single-producer single-consumer).
//!
//! Keeping the glue in the library means it runs under test against the
//! simulated hardware.

use embedded_hal::spi::SpiBus;

use crate::arbiter::Arbiter;
use crate::board::{Board, BoardIo, SpiPins};
use crate::dpc::{Dpc, Reprogram, SoftInterrupt};
use crate::serial::{self, RxRing, SerialPort, TxRing};
use crate::usb::sie::UsbRegisters;
use crate::usb::UsbDevice;
use crate::vendor::Vendor;

/// The hardware the application runs on.
pub trait Platform {
    type Usb: UsbRegisters;
    type Io: BoardIo;
    type Bus: SpiBus<u8>;
    type Pins: SpiPins;
    type Irq: SoftInterrupt;
    type Isp: Reprogram;
}

/// Hardware handles, as produced by platform bring-up.
pub struct Parts<P: Platform> {
    pub usb: P::Usb,
    pub io: P::Io,
    pub bus: P::Bus,
    pub pins: P::Pins,
    pub isp: P::Isp,
}

/// The USB interrupt's share.
pub struct UsbContext<'a, P: Platform> {
    usb: UsbDevice<'a, P::Usb>,
    board: Board<P::Io, P::Bus, P::Pins>,
    dpc: &'a Dpc<P::Irq>,
}

impl<'a, P: Platform> UsbContext<'a, P> {
    pub fn interrupt(&mut self) {
        let mut vendor = Vendor::new(&mut self.board, self.dpc.countdown());
        let events = self.usb.on_interrupt(&mut vendor);
        if events.serial_progress {
            self.dpc.trigger();
        }
    }

    pub fn usb(&self) -> &UsbDevice<'a, P::Usb> {
        &self.usb
    }

    pub fn board(&self) -> &Board<P::Io, P::Bus, P::Pins> {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board<P::Io, P::Bus, P::Pins> {
        &mut self.board
    }
}

/// The deferred-work interrupt's share.
pub struct Deferred<'a, P: Platform> {
    dpc: &'a Dpc<P::Irq>,
    serial: SerialPort<'a>,
    isp: P::Isp,
}

impl<'a, P: Platform> Deferred<'a, P> {
    /// Advances the reprogram countdown.
    pub fn run(&mut self) {
        self.run_with(|_| {});
    }

    /// Advances the reprogram countdown, then hands the serial stream to
    /// `work`. Bytes `work` leaves in the receive queue stay there for next
    /// time; bytes it queues for sending go out on the next USB frame.
    pub fn run_with(&mut self, work: impl FnOnce(&mut SerialPort<'a>)) {
        self.dpc.run(&mut self.isp);
        work(&mut self.serial);
    }
}

pub struct App<'a, P: Platform> {
    usb: UsbContext<'a, P>,
    deferred: Deferred<'a, P>,
}

impl<'a, P: Platform> App<'a, P> {
    pub fn new(
        parts: Parts<P>,
        dpc: &'a Dpc<P::Irq>,
        rx: &'a mut RxRing,
        tx: &'a mut TxRing,
    ) -> Self {
        dpc.init();
        let (endpoints, serial) = serial::split(rx, tx);
        let uid = parts.io.device_uid();
        Self {
            usb: UsbContext {
                usb: UsbDevice::new(parts.usb, endpoints, uid),
                board: Board::new(parts.io, Arbiter::new(parts.bus, parts.pins)),
                dpc,
            },
            deferred: Deferred {
                dpc,
                serial,
                isp: parts.isp,
            },
        }
    }

    /// Connects to the bus and lets deferred work run. Interrupts should
    /// still be masked at the NVIC when this is called.
    pub fn start(&mut self) {
        let dpc = self.usb.dpc;
        dpc.suspend();
        self.usb.usb.reset();
        dpc.resume();
    }

    /// Hands each part to the context that runs it.
    pub fn split(self) -> (UsbContext<'a, P>, Deferred<'a, P>) {
        (self.usb, self.deferred)
    }

    pub fn usb_interrupt(&mut self) {
        self.usb.interrupt();
    }

    pub fn tick(&self) {
        self.usb.dpc.tick();
    }

    pub fn dpc_work(&mut self) {
        self.deferred.run();
    }

    pub fn usb(&self) -> &UsbDevice<'a, P::Usb> {
        self.usb.usb()
    }

    pub fn board(&self) -> &Board<P::Io, P::Bus, P::Pins> {
        self.usb.board()
    }

    pub fn board_mut(&mut self) -> &mut Board<P::Io, P::Bus, P::Pins> {
        self.usb.board_mut()
    }

    #[cfg(test)]
    fn usb_mut(&mut self) -> &mut UsbDevice<'a, P::Usb> {
        &mut self.usb.usb
    }
}
