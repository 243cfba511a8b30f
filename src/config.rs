// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device identity, sizes and timing budgets.

use static_assertions::const_assert;

// USB identity. The IDs are arbitrary but stable; host tools match on them.
pub const USB_VID: u16 = 0x544C;
pub const USB_PID: u16 = 0x4C7F;
pub const USB_DEVICE_RELEASE: u16 = 0x0001;

pub const MANUFACTURER: &str = "MatrixDriver";
pub const PRODUCT: &str = "MatrixDriver Test Device";

/// Vendor request code the host should use to fetch the Microsoft OS feature
/// descriptors. Advertised through the 0xEE string descriptor.
pub const MS_VENDOR_CODE: u8 = 0x41;

/// Interface GUID handed to WinUSB through the extended properties
/// descriptor. Host applications open the device by this GUID.
pub const DEVICE_INTERFACE_GUID: &str = "{b86d3dd6-c9d8-4401-959b-efbbd9bf1f3c}";

/// Max packet size of every endpoint, control included.
pub const PACKET_SIZE: usize = 64;

/// Host-visible staging buffer for vendor payloads.
pub const SCRATCH_SIZE: usize = 256;

/// Room for descriptors assembled at runtime (strings, extended properties)
/// and small vendor replies.
pub const RESPONSE_SIZE: usize = 256;

pub const SERIAL_RX_SIZE: usize = 128;
pub const SERIAL_TX_SIZE: usize = 512;

const_assert!(SERIAL_RX_SIZE.is_power_of_two());
const_assert!(SERIAL_TX_SIZE.is_power_of_two());
const_assert!(SERIAL_RX_SIZE > PACKET_SIZE);
const_assert!(SCRATCH_SIZE <= u16::MAX as usize);
const_assert!(SCRATCH_SIZE <= RESPONSE_SIZE);

pub const FLASH_SECTOR_SIZE: u32 = 4096;
pub const FLASH_BLOCK_SIZE: u32 = 65536;
pub const FLASH_PAGE_SIZE: u32 = 256;
/// Largest address reachable with a 3-byte address.
pub const FLASH_ADDRESS_LIMIT: u32 = 1 << 24;

const_assert!(FLASH_PAGE_SIZE as usize <= SCRATCH_SIZE);

cfg_if::cfg_if! {
    if #[cfg(feature = "flash-mx25l")] {
        /// JEDEC id of the Macronix MX25L part fitted to some boards.
        pub const FLASH_ID: u32 = 0xC2_2013;
    } else {
        /// JEDEC id of the Spansion S25FL116K. Sector and block sizes above
        /// assume this part; anything else must be explicitly overridden by
        /// the host before it is erased or programmed.
        pub const FLASH_ID: u32 = 0x01_4015;
    }
}

/// Status polls before a flash erase/program is reported as failed.
pub const FLASH_BUSY_BUDGET: u32 = 1_000_000;
/// DONE polls before an FPGA reboot is reported as failed.
pub const FPGA_BOOT_BUDGET: u32 = 1_000_000;

/// Periodic ticks between a reprogram request and the jump into ISP, giving
/// the status stage of the request time to reach the host.
pub const REPROGRAM_TICKS: u8 = 5;

/// Periodic tick rate.
pub const TICK_HZ: u32 = 100;

// NVIC priorities, raw 8-bit values (the LPC1343 implements the top three
// bits). The USB engine sits just below the tick; the DPC is the lowest.
pub const TICK_PRIORITY: u8 = 0x00;
pub const USB_PRIORITY: u8 = 0x40;
pub const DPC_PRIORITY: u8 = 0xF8;
