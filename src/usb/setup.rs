// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SETUP packet layout and the request codes we understand.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned, U16};

/// Data stage direction, bit 7 of the request type. IN is device-to-host.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbDir {
    Out = 0,
    In = 0x80,
}

/// Bits 6:5 of the request type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

/// Bits 4:0 of the request type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// The eight bytes of a SETUP packet, as they arrive.
#[repr(C)]
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
pub struct SetupPacket {
    /// bmRequestType. See the accessors.
    pub request_type: u8,
    pub request: u8,
    /// wValue.
    pub value: U16<LittleEndian>,
    /// wIndex. Vendor requests use it as an offset or length.
    pub index: U16<LittleEndian>,
    /// wLength: exact size of an OUT data stage, upper bound of an IN one.
    pub length: U16<LittleEndian>,
}

impl SetupPacket {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        LayoutVerified::<_, Self>::new_unaligned(bytes).map(|lv| *lv.into_ref())
    }

    pub fn direction(&self) -> UsbDir {
        if self.request_type & 0x80 != 0 {
            UsbDir::In
        } else {
            UsbDir::Out
        }
    }

    pub fn kind(&self) -> RequestKind {
        match (self.request_type >> 5) & 3 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    /// `None` for the reserved recipient codes.
    pub fn recipient(&self) -> Option<Recipient> {
        Recipient::from_u8(self.request_type & 0x1F)
    }

    pub fn value(&self) -> u16 {
        self.value.get()
    }

    pub fn index(&self) -> u16 {
        self.index.get()
    }

    pub fn length(&self) -> u16 {
        self.length.get()
    }
}

/// The standard requests we answer. Anything else is stalled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StandardRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
    GetInterface = 0x0A,
    SetInterface = 0x0B,
}

/// Descriptor type codes, the high byte of GET_DESCRIPTOR's wValue.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DescriptorType {
    Device = 0x01,
    Config = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
}

/// Types of transfer that can be indicated by the `attributes` field on an
/// endpoint descriptor.
#[derive(Copy, Clone, Debug, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum TransferType {
    Control = 0,
    Bulk = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_get_descriptor() {
        let setup = SetupPacket::parse(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00]).unwrap();
        assert_eq!(setup.direction(), UsbDir::In);
        assert_eq!(setup.kind(), RequestKind::Standard);
        assert_eq!(setup.recipient(), Some(Recipient::Device));
        assert_eq!(StandardRequest::from_u8(setup.request), Some(StandardRequest::GetDescriptor));
        assert_eq!(setup.value(), 0x0100);
        assert_eq!(setup.length(), 64);
    }

    #[test]
    fn decodes_vendor_interface_request() {
        let setup = SetupPacket::parse(&[0xC1, 0x41, 0x00, 0x00, 0x05, 0x00, 0xFF, 0x00]).unwrap();
        assert_eq!(setup.kind(), RequestKind::Vendor);
        assert_eq!(setup.recipient(), Some(Recipient::Interface));
        assert_eq!(setup.index(), 5);
    }

    #[test]
    fn short_packet_is_rejected() {
        assert!(SetupPacket::parse(&[0; 7]).is_none());
    }
}
