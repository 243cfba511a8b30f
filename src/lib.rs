// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Board-management coprocessor firmware for the signtest carrier board.
//!
//! An LPC1343 sits between a USB host and a carrier board holding an FPGA and
//! the SPI flash it boots from. Over USB it offers:
//!
//! - a vendor control protocol for telemetry, power sequencing, LEDs, the
//!   flash (erase/program/read/identify) and raw SPI exchanges with either the
//!   flash or the FPGA, staged through a 256-byte scratch pad;
//! - a pair of bulk endpoints acting as a byte stream;
//! - Microsoft OS descriptors, so Windows binds WinUSB without an INF.
//!
//! There is no USB stack crate underneath. The control pipe is a small state
//! machine driven directly off the LPC13xx Serial Interface Engine (SIE)
//! command interface, which makes it possible to read the whole exchange from
//! the SETUP packet to the status stage in a handful of files:
//!
//! - [`usb::sie`] and [`usb::endpoint`] talk to the hardware,
//! - [`usb::control`] runs the data and status stages,
//! - [`usb`] decodes standard requests and glues the endpoints together,
//! - [`vendor`] implements the board protocol on top of [`board`] and
//!   [`arbiter`].
//!
//! Everything that touches registers sits behind a trait, so the library is
//! `no_std` on the target but builds and tests on the host. The firmware
//! image itself lives in `src/main.rs` and the LPC1343 implementations of the
//! traits in [`lpc13xx`].

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod app;
pub mod arbiter;
pub mod board;
pub mod config;
pub mod dpc;
pub mod retry;
pub mod ring;
pub mod scratch;
pub mod serial;
pub mod usb;
pub mod vendor;

#[cfg(target_os = "none")]
pub mod lpc13xx;

#[cfg(test)]
mod mock;
