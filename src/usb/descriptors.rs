// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Everything the host can ask us to describe ourselves with.
//!
//! The fixed descriptors are `static` structs laid out with `zerocopy` so
//! they can be handed to the control pipe as byte slices directly. Strings,
//! the serial number and the Microsoft extended properties depend on runtime
//! data (or are just annoying to spell out as UTF-16 by hand), so they are
//! assembled into the control pipe's response buffer on demand.

use byteorder::{ByteOrder, LittleEndian};
use zerocopy::{AsBytes, U16, U32};

use super::setup::{DescriptorType, TransferType};
use crate::config::{
    DEVICE_INTERFACE_GUID, MS_VENDOR_CODE, PACKET_SIZE, USB_DEVICE_RELEASE, USB_PID, USB_VID,
};

/// String descriptor index of the Microsoft OS string.
pub const OS_STRING_INDEX: u8 = 0xEE;

/// Top-level device descriptor, fetched first during enumeration.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct DeviceDescriptor {
    /// Always 18.
    pub length: u8,
    pub descriptor_type: DescriptorType,
    /// Version of the USB protocol, in binary-coded decimal.
    pub bcd_usb: U16<LittleEndian>,
    /// Class of device, giving a broad functional area. Zero defers to the
    /// interfaces.
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    /// Maximum packet size of the control endpoint.
    pub max_packet_size0: u8,
    pub vendor: U16<LittleEndian>,
    pub product: U16<LittleEndian>,
    /// Firmware release, BCD.
    pub bcd_device: U16<LittleEndian>,
    // String descriptor indices.
    pub manufacturer_s: u8,
    pub product_s: u8,
    pub serial_s: u8,
    pub num_configurations: u8,
}

/// Header of the one configuration we offer.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct ConfigurationDescriptor {
    pub length: u8,
    pub descriptor_type: DescriptorType,
    /// Size of the whole [`ConfigurationBlock`].
    pub total_length: U16<LittleEndian>,
    pub num_interfaces: u8,
    /// Value SET_CONFIGURATION selects us with.
    pub configuration_value: u8,
    pub configuration_s: u8,
    /// Bit 7 must be set. We do not claim self-power or remote wakeup.
    pub attributes: u8,
    /// Bus current draw, 2 mA units.
    pub max_power: u8,
}

/// The vendor-class interface carrying the bulk pair.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct InterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: DescriptorType,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_s: u8,
}

/// One bulk endpoint.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct EndpointDescriptor {
    pub length: u8,
    pub descriptor_type: DescriptorType,
    /// Logical endpoint number, with bit 7 set for IN.
    pub endpoint_address: u8,
    /// Transfer type in the bottom 2 bits, from `TransferType`.
    pub attributes: u8,
    pub max_packet_size: U16<LittleEndian>,
    pub interval: u8,
}

/// The configuration descriptor and everything under it, in the order the
/// host expects to receive them in response to a single request.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct ConfigurationBlock {
    pub configuration: ConfigurationDescriptor,
    pub interface: InterfaceDescriptor,
    pub endpoints: [EndpointDescriptor; 2],
}

const fn le16(x: u16) -> U16<LittleEndian> {
    U16::from_bytes(u16::to_le_bytes(x))
}

const fn le32(x: u32) -> U32<LittleEndian> {
    U32::from_bytes(u32::to_le_bytes(x))
}

const fn bulk_endpoint(endpoint_address: u8) -> EndpointDescriptor {
    EndpointDescriptor {
        length: core::mem::size_of::<EndpointDescriptor>() as u8,
        descriptor_type: DescriptorType::Endpoint,
        endpoint_address,
        attributes: TransferType::Bulk as u8,
        max_packet_size: le16(PACKET_SIZE as u16),
        interval: 0,
    }
}

pub static DEVICE_DESCRIPTOR: DeviceDescriptor = DeviceDescriptor {
    length: core::mem::size_of::<DeviceDescriptor>() as u8,
    descriptor_type: DescriptorType::Device,
    bcd_usb: le16(0x0200),
    device_class: 0,
    device_subclass: 0,
    device_protocol: 0,
    max_packet_size0: PACKET_SIZE as u8,
    vendor: le16(USB_VID),
    product: le16(USB_PID),
    bcd_device: le16(USB_DEVICE_RELEASE),
    manufacturer_s: 1,
    product_s: 2,
    serial_s: 3,
    num_configurations: 1,
};

pub static CONFIGURATION: ConfigurationBlock = ConfigurationBlock {
    configuration: ConfigurationDescriptor {
        length: core::mem::size_of::<ConfigurationDescriptor>() as u8,
        descriptor_type: DescriptorType::Config,
        total_length: le16(core::mem::size_of::<ConfigurationBlock>() as u16),
        num_interfaces: 1,
        configuration_value: 1,
        configuration_s: 0,
        attributes: 0x80,
        max_power: 0x32,
    },
    interface: InterfaceDescriptor {
        length: core::mem::size_of::<InterfaceDescriptor>() as u8,
        descriptor_type: DescriptorType::Interface,
        interface_number: 0,
        alternate_setting: 0,
        num_endpoints: 2,
        // Vendor specific; WinUSB binds through the OS descriptors below.
        interface_class: 0xFF,
        interface_subclass: 0,
        interface_protocol: 0,
        interface_s: 0,
    },
    // Logical endpoint 3 in both directions.
    endpoints: [bulk_endpoint(0x83), bulk_endpoint(0x03)],
};

static_assertions::const_assert_eq!(core::mem::size_of::<DeviceDescriptor>(), 18);
static_assertions::const_assert_eq!(core::mem::size_of::<ConfigurationBlock>(), 32);

/// String descriptor zero: US English only.
pub static LANGUAGE_IDS: [u8; 4] = [4, DescriptorType::String as u8, 0x09, 0x04];

/// Microsoft OS 1.0 extended compat ID descriptor, fetched with our vendor
/// code and index 4. One function section, binding interface 0 to WinUSB.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct CompatIdDescriptor {
    pub length: U32<LittleEndian>,
    pub bcd_version: U16<LittleEndian>,
    pub index: U16<LittleEndian>,
    pub count: u8,
    pub reserved: [u8; 7],
    pub first_interface: u8,
    /// Must be 1.
    pub reserved1: u8,
    pub compatible_id: [u8; 8],
    pub sub_compatible_id: [u8; 8],
    pub reserved2: [u8; 6],
}

pub static COMPAT_ID: CompatIdDescriptor = CompatIdDescriptor {
    length: le32(core::mem::size_of::<CompatIdDescriptor>() as u32),
    bcd_version: le16(0x0100),
    index: le16(4),
    count: 1,
    reserved: [0; 7],
    first_interface: 0,
    reserved1: 1,
    compatible_id: *b"WINUSB\0\0",
    sub_compatible_id: [0; 8],
    reserved2: [0; 6],
};

static_assertions::const_assert_eq!(core::mem::size_of::<CompatIdDescriptor>(), 40);

/// Registry properties published through the extended properties
/// descriptor, as (name, value) pairs of REG_SZ strings.
pub const EXT_PROPERTIES: &[(&str, &str)] = &[("DeviceInterfaceGUID", DEVICE_INTERFACE_GUID)];

const REG_SZ: u32 = 1;

/// Appends little-endian fields to a byte buffer, noting when something did
/// not fit instead of panicking.
struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
    overflow: bool,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0, overflow: false }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        match self.buf.get_mut(self.pos..self.pos + bytes.len()) {
            Some(dest) => {
                dest.copy_from_slice(bytes);
                self.pos += bytes.len();
            }
            None => self.overflow = true,
        }
    }

    fn u16(&mut self, x: u16) {
        let mut b = [0; 2];
        LittleEndian::write_u16(&mut b, x);
        self.bytes(&b);
    }

    fn u32(&mut self, x: u32) {
        let mut b = [0; 4];
        LittleEndian::write_u32(&mut b, x);
        self.bytes(&b);
    }

    fn utf16(&mut self, s: &str) {
        for unit in s.encode_utf16() {
            self.u16(unit);
        }
    }

    fn finish(self) -> Option<usize> {
        if self.overflow {
            None
        } else {
            Some(self.pos)
        }
    }
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}

/// Builds a string descriptor for `s` into `out`. Returns the descriptor
/// length, or `None` if `out` (or the one-byte length field) is too small.
pub fn string_descriptor(s: &str, out: &mut [u8]) -> Option<usize> {
    let len = u8::try_from(2 + utf16_len(s)).ok()?;
    let mut w = Writer::new(out);
    w.bytes(&[len, DescriptorType::String as u8]);
    w.utf16(s);
    w.finish()
}

/// The Microsoft OS string: "MSFT100" followed by the vendor request code
/// the host should use for the feature descriptors, and a pad byte.
pub fn os_string_descriptor(out: &mut [u8]) -> Option<usize> {
    const SIGNATURE: &str = "MSFT100";
    let len = (2 + utf16_len(SIGNATURE) + 2) as u8;
    let mut w = Writer::new(out);
    w.bytes(&[len, DescriptorType::String as u8]);
    w.utf16(SIGNATURE);
    w.bytes(&[MS_VENDOR_CODE, 0]);
    w.finish()
}

/// Serial number string: the chip's 128-bit unique ID as upper-case hex,
/// most significant byte first.
pub fn serial_number_descriptor(uid: &[u8; 16], out: &mut [u8]) -> Option<usize> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut w = Writer::new(out);
    w.bytes(&[2 + 4 * uid.len() as u8, DescriptorType::String as u8]);
    for &b in uid.iter().rev() {
        w.u16(u16::from(HEX[usize::from(b >> 4)]));
        w.u16(u16::from(HEX[usize::from(b & 0xF)]));
    }
    w.finish()
}

/// Microsoft OS 1.0 extended properties descriptor (index 5) carrying
/// `EXT_PROPERTIES`.
pub fn ext_properties_descriptor(out: &mut [u8]) -> Option<usize> {
    // Size, type, name length, data length, and a NUL for each string.
    const PROPERTY_OVERHEAD: usize = 4 + 4 + 2 + 4 + 2 + 2;
    const HEADER: usize = 10;

    let total = HEADER
        + EXT_PROPERTIES
            .iter()
            .map(|(name, value)| PROPERTY_OVERHEAD + utf16_len(name) + utf16_len(value))
            .sum::<usize>();

    let mut w = Writer::new(out);
    w.u32(total as u32);
    w.u16(0x0100);
    w.u16(5);
    w.u16(EXT_PROPERTIES.len() as u16);
    for (name, value) in EXT_PROPERTIES {
        w.u32((PROPERTY_OVERHEAD + utf16_len(name) + utf16_len(value)) as u32);
        w.u32(REG_SZ);
        w.u16((utf16_len(name) + 2) as u16);
        w.utf16(name);
        w.u16(0);
        w.u32((utf16_len(value) + 2) as u32);
        w.utf16(value);
        w.u16(0);
    }
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_descriptor_bytes() {
        assert_eq!(
            DEVICE_DESCRIPTOR.as_bytes(),
            &[
                0x12, 1, 0x00, 0x02, 0, 0, 0, 64, 0x4C, 0x54, 0x7F, 0x4C, 1, 0, 1, 2, 3, 1
            ]
        );
    }

    #[test]
    fn configuration_block_bytes() {
        let bytes = CONFIGURATION.as_bytes();
        assert_eq!(&bytes[..9], &[9, 2, 32, 0, 1, 1, 0, 0x80, 0x32]);
        assert_eq!(&bytes[9..18], &[9, 4, 0, 0, 2, 0xFF, 0, 0, 0]);
        assert_eq!(&bytes[18..25], &[7, 5, 0x83, 2, 64, 0, 0]);
        assert_eq!(&bytes[25..], &[7, 5, 0x03, 2, 64, 0, 0]);
    }

    #[test]
    fn compat_id_names_winusb() {
        let bytes = COMPAT_ID.as_bytes();
        assert_eq!(&bytes[..9], &[0x28, 0, 0, 0, 0x00, 0x01, 0x04, 0x00, 0x01]);
        assert_eq!(&bytes[16..18], &[0, 1]);
        assert_eq!(&bytes[18..26], b"WINUSB\0\0");
    }

    #[test]
    fn string_is_utf16() {
        let mut out = [0; 64];
        let len = string_descriptor("Hi", &mut out).unwrap();
        assert_eq!(&out[..len], &[6, 3, b'H', 0, b'i', 0]);
    }

    #[test]
    fn string_too_big_for_buffer() {
        let mut out = [0; 4];
        assert_eq!(string_descriptor("Hello", &mut out), None);
    }

    #[test]
    fn os_string_carries_vendor_code() {
        let mut out = [0; 64];
        let len = os_string_descriptor(&mut out).unwrap();
        assert_eq!(len, 18);
        assert_eq!(out[0], 18);
        assert_eq!(&out[2..6], &[b'M', 0, b'S', 0]);
        assert_eq!(&out[16..18], &[0x41, 0]);
    }

    #[test]
    fn serial_is_reversed_hex() {
        let mut uid = [0; 16];
        uid[15] = 0xAB;
        uid[0] = 0x1F;
        let mut out = [0; 128];
        let len = serial_number_descriptor(&uid, &mut out).unwrap();
        assert_eq!(len, 66);
        assert_eq!(out[0], 66);
        assert_eq!(&out[2..6], &[b'A', 0, b'B', 0]);
        assert_eq!(&out[62..66], &[b'1', 0, b'F', 0]);
    }

    #[test]
    fn ext_properties_layout() {
        let mut out = [0; 256];
        let len = ext_properties_descriptor(&mut out).unwrap();
        // 10 header + 18 overhead + 19 and 38 UTF-16 characters.
        assert_eq!(len, 10 + 18 + 38 + 76);
        assert_eq!(LittleEndian::read_u32(&out[0..4]) as usize, len);
        assert_eq!(&out[4..10], &[0x00, 0x01, 5, 0, 1, 0]);
        assert_eq!(LittleEndian::read_u32(&out[10..14]) as usize, len - 10);
        assert_eq!(LittleEndian::read_u32(&out[14..18]), REG_SZ);
        assert_eq!(LittleEndian::read_u16(&out[18..20]), 40);
        assert_eq!(&out[20..24], &[b'D', 0, b'e', 0]);
        // Data length sits after the name and its terminator.
        assert_eq!(LittleEndian::read_u32(&out[60..64]), 78);
        assert_eq!(&out[64..66], &[b'{', 0]);
        assert_eq!(&out[len - 2..len], &[0, 0]);
    }
}
