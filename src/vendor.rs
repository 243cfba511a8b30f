// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The board protocol: vendor control requests.
//!
//! Bulk payloads (flash pages, SPI exchanges) never travel in the request
//! that acts on them. The host fills the scratch pad with one request, acts
//! on it with another, and reads the result back with a third. Every request
//! that can fail at the hardware level answers with a one-byte flag, 1 for
//! success; requests that make no sense stall.

use byteorder::{ByteOrder, LittleEndian};
use embedded_hal::spi::SpiBus;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use zerocopy::AsBytes;

use crate::arbiter::SpiError;
use crate::board::{Board, BoardIo, Chip, PowerMode, SpiPins};
use crate::config::{
    FLASH_ADDRESS_LIMIT, FLASH_BLOCK_SIZE, FLASH_PAGE_SIZE, FLASH_SECTOR_SIZE, MS_VENDOR_CODE,
    REPROGRAM_TICKS,
};
use crate::dpc::Countdown;
use crate::scratch::ScratchPad;
use crate::usb::control::{Action, Source, Stall};
use crate::usb::descriptors;
use crate::usb::setup::{Recipient, SetupPacket, UsbDir};
use crate::usb::VendorHandler;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VendorRequest {
    /// Jump to the ROM bootloader shortly.
    Reprogram = 0x02,
    Telemetry = 0x10,
    SetPowerMode = 0x11,
    SetLeds = 0x12,
    Button = 0x13,
    /// IN reads the scratch pad, OUT writes it.
    Scratch = 0x18,
    ScratchFill = 0x19,
    FlashExchange = 0x1A,
    FpgaExchange = 0x1B,
    EraseSector = 0x20,
    EraseBlock = 0x21,
    ReadPage = 0x22,
    ProgramPage = 0x23,
    FlashId = 0x24,
    MsDescriptor = MS_VENDOR_CODE as isize,
}

/// wIndex values of the Microsoft OS feature descriptor requests.
const MS_COMPAT_ID: u16 = 4;
const MS_EXT_PROPERTIES: u16 = 5;

/// Answers vendor requests against the board. Lives only for the duration
/// of one USB interrupt.
pub struct Vendor<'a, IO, B, P> {
    board: &'a mut Board<IO, B, P>,
    countdown: &'a Countdown,
}

impl<'a, IO, B, P> Vendor<'a, IO, B, P> {
    pub fn new(board: &'a mut Board<IO, B, P>, countdown: &'a Countdown) -> Self {
        Self { board, countdown }
    }
}

fn reply(response: &mut [u8], bytes: &[u8]) -> Result<Action, Stall> {
    response[..bytes.len()].copy_from_slice(bytes);
    Ok(Action::Send { source: Source::Response, len: bytes.len() })
}

fn flag(response: &mut [u8], ok: bool) -> Result<Action, Stall> {
    reply(response, &[u8::from(ok)])
}

/// Timeouts are the hardware's answer and go back to the host as a failure
/// flag. Bus faults mean we could not even ask.
fn outcome(result: Result<(), SpiError>) -> Result<bool, Stall> {
    match result {
        Ok(()) => Ok(true),
        Err(SpiError::Timeout) => Ok(false),
        Err(e) => Err(fault(e)),
    }
}

fn fault(e: SpiError) -> Stall {
    error!("spi fault {}", e);
    Stall
}

fn require(condition: bool) -> Result<(), Stall> {
    if condition {
        Ok(())
    } else {
        Err(Stall)
    }
}

fn flash_address(unit: u16, size: u32) -> Result<u32, Stall> {
    let address = u32::from(unit) * size;
    require(address < FLASH_ADDRESS_LIMIT)?;
    Ok(address)
}

impl<IO, B, P> Vendor<'_, IO, B, P>
where
    IO: BoardIo,
    B: SpiBus<u8>,
    P: SpiPins,
{
    fn unlocked(&mut self) -> Result<(), Stall> {
        if self.board.spi.flash_unlocked().map_err(fault)? {
            Ok(())
        } else {
            warn!("flash locked");
            Err(Stall)
        }
    }

    fn ms_descriptor(&self, setup: &SetupPacket, response: &mut [u8]) -> Result<Action, Stall> {
        match (setup.index(), setup.value()) {
            (MS_COMPAT_ID, value) if value >> 8 == 0 => {
                let bytes = descriptors::COMPAT_ID.as_bytes();
                Ok(Action::Send { source: Source::Static(bytes), len: bytes.len() })
            }
            (MS_EXT_PROPERTIES, 0) => {
                let len = descriptors::ext_properties_descriptor(response).ok_or(Stall)?;
                Ok(Action::Send { source: Source::Response, len })
            }
            _ => Err(Stall),
        }
    }
}

impl<IO, B, P> VendorHandler for Vendor<'_, IO, B, P>
where
    IO: BoardIo,
    B: SpiBus<u8>,
    P: SpiPins,
{
    fn vendor_request(
        &mut self,
        setup: &SetupPacket,
        scratch: &mut ScratchPad,
        response: &mut [u8],
    ) -> Result<Action, Stall> {
        let request = VendorRequest::from_u8(setup.request).ok_or(Stall)?;
        match (setup.recipient(), request) {
            (Some(Recipient::Device), _) => (),
            // Windows asks for the extended properties per interface.
            (Some(Recipient::Interface), VendorRequest::MsDescriptor) => (),
            _ => return Err(Stall),
        }
        debug!("vendor {}", request);

        let value = setup.value();
        let index = usize::from(setup.index());
        let length = usize::from(setup.length());

        match (request, setup.direction()) {
            (VendorRequest::Reprogram, _) => {
                self.countdown.arm(REPROGRAM_TICKS);
                Ok(Action::Ack)
            }
            (VendorRequest::Telemetry, UsbDir::In) => {
                reply(response, self.board.telemetry().as_bytes())
            }
            (VendorRequest::SetPowerMode, UsbDir::In) => {
                let mode = u8::try_from(value)
                    .ok()
                    .and_then(PowerMode::from_u8)
                    .ok_or(Stall)?;
                flag(response, self.board.set_power_mode(mode))
            }
            (VendorRequest::SetLeds, _) => {
                self.board.set_leds(value as u8);
                Ok(Action::Ack)
            }
            (VendorRequest::Button, UsbDir::In) => flag(response, self.board.io.button_pressed()),
            (VendorRequest::Scratch, UsbDir::In) => {
                scratch.readable(index, length)?;
                Ok(Action::Send { source: Source::Scratch { offset: index }, len: length })
            }
            (VendorRequest::Scratch, UsbDir::Out) => {
                scratch.writable(index, length)?;
                Ok(Action::Capture { offset: index, len: length })
            }
            (VendorRequest::ScratchFill, _) => {
                scratch.fill(0xFF);
                Ok(Action::Ack)
            }
            (VendorRequest::FlashExchange | VendorRequest::FpgaExchange, UsbDir::In) => {
                let chip = if request == VendorRequest::FlashExchange {
                    Chip::Flash
                } else {
                    Chip::Fpga
                };
                let window = scratch.writable(index, length)?;
                outcome(self.board.spi.exchange(chip, window))?;
                Ok(Action::Send { source: Source::Scratch { offset: index }, len: length })
            }
            (VendorRequest::EraseSector, UsbDir::In) => {
                let address = flash_address(value, FLASH_SECTOR_SIZE)?;
                self.unlocked()?;
                let ok = outcome(self.board.spi.erase_sector(address))?;
                flag(response, ok)
            }
            (VendorRequest::EraseBlock, UsbDir::In) => {
                let address = flash_address(value, FLASH_BLOCK_SIZE)?;
                self.unlocked()?;
                let ok = outcome(self.board.spi.erase_block(address))?;
                flag(response, ok)
            }
            (VendorRequest::ReadPage, UsbDir::In) => {
                let address = flash_address(value, FLASH_PAGE_SIZE)?;
                require(index <= FLASH_PAGE_SIZE as usize)?;
                let page = scratch.writable(0, index)?;
                let ok = outcome(self.board.spi.read(address, page))?;
                flag(response, ok)
            }
            (VendorRequest::ProgramPage, UsbDir::In) => {
                let address = flash_address(value, FLASH_PAGE_SIZE)?;
                require(index <= FLASH_PAGE_SIZE as usize)?;
                self.unlocked()?;
                let page = scratch.readable(0, index)?;
                let ok = outcome(self.board.spi.program(address, page))?;
                flag(response, ok)
            }
            (VendorRequest::FlashId, UsbDir::In) => {
                if value & 1 != 0 {
                    self.board.spi.override_lockout();
                }
                let id = self.board.spi.identify().map_err(fault)?;
                LittleEndian::write_u24(&mut response[..3], id);
                response[3] = u8::from(self.board.spi.flash_unlocked().map_err(fault)?);
                Ok(Action::Send { source: Source::Response, len: 4 })
            }
            (VendorRequest::MsDescriptor, UsbDir::In) => self.ms_descriptor(setup, response),
            _ => Err(Stall),
        }
    }
}
