// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The USB device.
//!
//! [`UsbDevice`] owns the SIE and everything whose lifetime is tied to the
//! bus: the control pipe, the scratch pad, the current configuration and the
//! interrupt side of the serial stream. The firmware calls
//! [`UsbDevice::on_interrupt`] from the USB interrupt handler and that's the
//! whole interface.
//!
//! Standard requests are answered here. Vendor requests are passed to a
//! [`VendorHandler`], which gets the scratch pad and response buffer to work
//! with, and answers with the same [`Action`]/[`Stall`] vocabulary.

pub mod control;
pub mod descriptors;
pub mod endpoint;
pub mod setup;
pub mod sie;

use num_traits::FromPrimitive;
use zerocopy::AsBytes;

use self::control::{Action, ControlPipe, Source, Stall};
use self::endpoint::EndpointError;
use self::setup::{DescriptorType, RequestKind, SetupPacket, StandardRequest};
use self::sie::{DevInt, DeviceStatus, EndpointControl, EndpointStatus, Sie, UsbRegisters};
use crate::config::{MANUFACTURER, PRODUCT};
use crate::scratch::ScratchPad;
use crate::serial::SerialEndpoints;

// Physical endpoint numbers of the endpoints we use.
pub const EP0_OUT: u8 = 0;
pub const EP0_IN: u8 = 1;
/// Logical endpoint 1 IN. Enabled but unused.
pub const EP1_IN: u8 = 3;
pub const BULK_OUT: u8 = 6;
pub const BULK_IN: u8 = 7;

/// Interrupt sources we service.
const ENABLED_INTERRUPTS: DevInt = DevInt::FRAME
    .union(DevInt::EP0)
    .union(DevInt::EP1)
    .union(DevInt::EP3)
    .union(DevInt::EP6)
    .union(DevInt::EP7)
    .union(DevInt::DEV_STAT);

/// Answers vendor-type control requests.
pub trait VendorHandler {
    /// `response` is the control pipe's response buffer; replies assembled
    /// there are sent with `Source::Response`.
    fn vendor_request(
        &mut self,
        setup: &SetupPacket,
        scratch: &mut ScratchPad,
        response: &mut [u8],
    ) -> Result<Action, Stall>;
}

/// What an interrupt did that someone outside the USB device cares about.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Events {
    /// Serial data moved in either direction.
    pub serial_progress: bool,
}

pub struct UsbDevice<'a, R> {
    sie: Sie<R>,
    control: ControlPipe,
    scratch: ScratchPad,
    configuration: u8,
    serial: SerialEndpoints<'a>,
    uid: [u8; 16],
}

impl<'a, R: UsbRegisters> UsbDevice<'a, R> {
    /// Wraps the hardware. Nothing is touched until `reset`.
    pub fn new(regs: R, serial: SerialEndpoints<'a>, uid: [u8; 16]) -> Self {
        Self {
            sie: Sie::new(regs),
            control: ControlPipe::new(),
            scratch: ScratchPad::new(),
            configuration: 0,
            serial,
            uid,
        }
    }

    pub fn sie(&self) -> &Sie<R> {
        &self.sie
    }

    pub fn sie_mut(&mut self) -> &mut Sie<R> {
        &mut self.sie
    }

    pub fn scratch(&self) -> &ScratchPad {
        &self.scratch
    }

    pub fn is_configured(&self) -> bool {
        self.configuration != 0
    }

    /// Brings the engine to the just-attached state and connects to the bus.
    /// Also used to recover from bus resets.
    pub fn reset(&mut self) {
        info!("usb reset");
        let sie = &mut self.sie;
        sie.enable_interrupts(ENABLED_INTERRUPTS);

        sie.set_device_status(DeviceStatus::empty());
        for ep in 0..=9 {
            sie.set_endpoint_status(ep, EndpointControl::DISABLED);
            if ep <= 7 {
                sie.select_endpoint_clear(ep);
            }
        }
        for ep in [EP0_OUT, EP0_IN, EP1_IN, BULK_OUT, BULK_IN] {
            sie.set_endpoint_status(ep, EndpointControl::empty());
        }

        sie.set_address(true, 0);
        sie.configure_device(false);

        // Reading the device status clears any pending status change.
        sie.clear_interrupts(DevInt::DEV_STAT);
        sie.device_status();
        sie.error_code();
        sie.clear_interrupts(DevInt::all());

        self.configuration = 0;
        self.control.cancel();
        self.scratch.clear();

        self.sie.set_device_status(DeviceStatus::CONNECT);
    }

    /// Raises a FRAME interrupt so the serial endpoints are looked at again
    /// without waiting for the next start-of-frame.
    pub fn hint_more_data(&mut self) {
        self.sie.set_interrupts(DevInt::FRAME);
    }

    /// Services every pending device interrupt.
    pub fn on_interrupt(&mut self, vendor: &mut impl VendorHandler) -> Events {
        let mut events = Events::default();
        let status = self.sie.interrupt_status();

        if status.contains(DevInt::FRAME) {
            self.sie.clear_interrupts(DevInt::FRAME);
            // Retry anything that stalled on ring space.
            events.serial_progress |= self.serial.try_receive(&mut self.sie);
            events.serial_progress |= self.serial.try_send(&mut self.sie);
        }
        if status.contains(DevInt::EP0) {
            self.sie.clear_interrupts(DevInt::EP0);
            if let Err(e) = self.control_out(vendor) {
                error!("ep0 out: {}", e);
            }
        }
        if status.contains(DevInt::EP1) {
            self.sie.clear_interrupts(DevInt::EP1);
            if let Err(e) = self.control.continue_transmit(&mut self.sie, &self.scratch) {
                error!("ep0 in: {}", e);
            }
        }
        if status.contains(DevInt::EP3) {
            self.sie.clear_interrupts(DevInt::EP3);
        }
        if status.contains(DevInt::EP6) {
            self.sie.clear_interrupts(DevInt::EP6);
            events.serial_progress |= self.serial.try_receive(&mut self.sie);
        }
        if status.contains(DevInt::EP7) {
            self.sie.clear_interrupts(DevInt::EP7);
            events.serial_progress |= self.serial.try_send(&mut self.sie);
        }
        if status.contains(DevInt::DEV_STAT) {
            self.sie.clear_interrupts(DevInt::DEV_STAT);
            let device = self.sie.device_status();
            if device.intersects(DeviceStatus::CONNECT_CHANGE | DeviceStatus::BUS_RESET) {
                self.reset();
            }
        }
        events
    }

    fn control_out(&mut self, vendor: &mut impl VendorHandler) -> Result<(), EndpointError> {
        let status = self.sie.select_endpoint_clear(EP0_OUT);
        if status.contains(EndpointStatus::SETUP) {
            self.handle_setup(vendor)
        } else if status.contains(EndpointStatus::FULL) {
            self.control.receive_out(&mut self.sie, &mut self.scratch)
        } else {
            Ok(())
        }
    }

    fn handle_setup(&mut self, vendor: &mut impl VendorHandler) -> Result<(), EndpointError> {
        let mut raw = [0; 8];
        let received = self.sie.read_packet_length(EP0_OUT) == raw.len();
        if received {
            self.sie.read_packet(EP0_OUT, &mut raw)?;
        }
        self.sie.select_endpoint(EP0_OUT);
        self.sie.clear_buffer();

        // Whatever we were doing, the host has moved on.
        self.control.cancel();

        let Some(setup) = received.then(|| SetupPacket::parse(&raw)).flatten() else {
            return Ok(());
        };
        trace!("setup {:x}", raw);

        let action = match setup.kind() {
            RequestKind::Standard => self.standard_request(&setup),
            RequestKind::Vendor => {
                vendor.vendor_request(&setup, &mut self.scratch, self.control.response_mut())
            }
            RequestKind::Class | RequestKind::Reserved => Err(Stall),
        };

        match action {
            Ok(action) => self.control.start(&mut self.sie, &self.scratch, &setup, action),
            Err(Stall) => {
                debug!("stall {=u8:x} {=u8:x}", setup.request_type, setup.request);
                control::stall(&mut self.sie);
                Ok(())
            }
        }
    }

    fn standard_request(&mut self, setup: &SetupPacket) -> Result<Action, Stall> {
        let request = StandardRequest::from_u8(setup.request).ok_or(Stall)?;
        match (request, setup.request_type) {
            (StandardRequest::GetStatus, _) => {
                self.control.response_mut()[..2].fill(0);
                Ok(Action::Send { source: Source::Response, len: 2 })
            }
            (StandardRequest::SetAddress, 0x00) => {
                // Latched by the engine, applied after our status stage.
                self.sie.set_address(true, setup.value() as u8);
                Ok(Action::Ack)
            }
            (StandardRequest::GetDescriptor, 0x80) => self.get_descriptor(setup),
            (StandardRequest::GetConfiguration, 0x80) => {
                self.control.response_mut()[0] = self.configuration;
                Ok(Action::Send { source: Source::Response, len: 1 })
            }
            (StandardRequest::SetConfiguration, 0x00) => {
                let configuration = u8::try_from(setup.value())
                    .ok()
                    .filter(|&c| c <= 1)
                    .ok_or(Stall)?;
                info!("configuration {=u8}", configuration);
                self.configuration = configuration;
                self.sie.configure_device(configuration != 0);
                Ok(Action::Ack)
            }
            _ => Err(Stall),
        }
    }

    fn get_descriptor(&mut self, setup: &SetupPacket) -> Result<Action, Stall> {
        fn from_static(bytes: &'static [u8]) -> Result<Action, Stall> {
            Ok(Action::Send { source: Source::Static(bytes), len: bytes.len() })
        }
        fn from_response(len: Option<usize>) -> Result<Action, Stall> {
            let len = len.ok_or(Stall)?;
            Ok(Action::Send { source: Source::Response, len })
        }

        let response = self.control.response_mut();
        let [index, ty] = setup.value().to_le_bytes();
        match DescriptorType::from_u8(ty).ok_or(Stall)? {
            DescriptorType::Device => from_static(descriptors::DEVICE_DESCRIPTOR.as_bytes()),
            DescriptorType::Config => from_static(descriptors::CONFIGURATION.as_bytes()),
            DescriptorType::String => match index {
                0 => from_static(&descriptors::LANGUAGE_IDS),
                1 => from_response(descriptors::string_descriptor(MANUFACTURER, response)),
                2 => from_response(descriptors::string_descriptor(PRODUCT, response)),
                3 => from_response(descriptors::serial_number_descriptor(&self.uid, response)),
                descriptors::OS_STRING_INDEX => {
                    from_response(descriptors::os_string_descriptor(response))
                }
                _ => Err(Stall),
            },
            // Delivered as part of the configuration.
            DescriptorType::Interface | DescriptorType::Endpoint => Err(Stall),
        }
    }
}
