// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deferred procedure calls.
//!
//! Interrupt handlers that want follow-up work done outside their own context
//! pend a spare NVIC source that has no hardware user and sits at the lowest
//! priority. Its handler runs once every higher-priority handler has
//! returned, and multiple triggers before it gets to run coalesce into one
//! call because the NVIC only has a single pending bit per source.
//!
//! The source can be masked for stretches where the work must not run (USB
//! bring-up); masking nests.
//!
//! A [`Dpc`] is shared by reference between the tick, the USB interrupt and
//! the deferred handler itself, all at different priorities. Its state is
//! kept in atomics so none of them needs a critical section to touch it.

use core::sync::atomic::{AtomicU8, Ordering};

/// NVIC operations on the interrupt source used for deferred work.
pub trait SoftInterrupt {
    fn enable(&self);
    fn disable(&self);
    /// Sets the pending bit. Idempotent.
    fn pend(&self);
    fn unpend(&self);
    fn set_lowest_priority(&self);
}

/// Hands the chip back to the ROM bootloader.
///
/// The hardware implementation never returns (see `lpc13xx::Isp::enter`).
/// The method is declared returning so test doubles can record the call.
pub trait Reprogram {
    fn reprogram(&mut self);
}

/// Ticks left until a pending reprogram. Zero means nothing is scheduled.
#[derive(Debug)]
pub struct Countdown(AtomicU8);

impl Countdown {
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Schedules the reprogram `ticks` ticks from now, replacing any earlier
    /// schedule.
    pub fn arm(&self, ticks: u8) {
        self.0.store(ticks, Ordering::Relaxed);
    }

    pub fn is_armed(&self) -> bool {
        self.remaining() != 0
    }

    pub fn remaining(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }

    /// Advances by one tick. Returns `true` exactly once, on the tick that
    /// brings an armed countdown to zero.
    pub fn tick(&self) -> bool {
        self.0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            == Ok(1)
    }
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Dpc<S> {
    irq: S,
    /// The source is unmasked only while this is zero.
    suspend_count: AtomicU8,
    countdown: Countdown,
    /// Periodic ticks recorded since the handler last ran.
    pending_ticks: AtomicU8,
}

impl<S: SoftInterrupt> Dpc<S> {
    pub const fn new(irq: S) -> Self {
        Self {
            irq,
            suspend_count: AtomicU8::new(0),
            countdown: Countdown::new(),
            pending_ticks: AtomicU8::new(0),
        }
    }

    /// Leaves the source at the lowest priority, not pending and masked. A
    /// `suspend`/`resume` pair switches it on once the rest of the system is
    /// ready.
    pub fn init(&self) {
        self.irq.disable();
        self.irq.set_lowest_priority();
        self.irq.unpend();
    }

    pub fn suspend(&self) {
        self.irq.disable();
        self.suspend_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Undoes one `suspend`, unmasking the source when the last suspension
    /// is lifted. Every call must match an earlier `suspend`.
    pub fn resume(&self) {
        let previous = self
            .suspend_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        debug_assert!(previous.is_ok(), "dpc resumed without a matching suspend");
        match previous {
            Ok(1) => self.irq.enable(),
            Ok(_) => {}
            Err(_) => error!("unbalanced dpc resume"),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_count.load(Ordering::Relaxed) != 0
    }

    /// Requests a call to `run`. Requests coalesce until it happens.
    pub fn trigger(&self) {
        self.irq.pend();
    }

    /// Records one periodic tick for `run` to account for.
    pub fn tick(&self) {
        let _ = self
            .pending_ticks
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_add(1)));
        self.trigger();
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    /// Body of the deferred-work handler. Advances the reprogram countdown
    /// once for every tick recorded since the last call, and fires the
    /// reprogram when it runs out.
    ///
    /// Calls that were triggered by anything other than a tick leave the
    /// countdown alone.
    pub fn run(&self, reprogram: &mut impl Reprogram) {
        let ticks = self.pending_ticks.swap(0, Ordering::Relaxed);
        for _ in 0..ticks {
            if self.countdown.tick() {
                warn!("reprogramming");
                reprogram.reprogram();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn irq(&self) -> &S {
        &self.irq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CountingReprogram, MockIrq};

    fn dpc() -> Dpc<MockIrq> {
        let dpc = Dpc::new(MockIrq::default());
        dpc.init();
        dpc
    }

    #[test]
    fn starts_masked_and_lowest() {
        let dpc = dpc();
        assert!(!dpc.irq().enabled.get());
        assert!(!dpc.irq().pending.get());
        assert!(dpc.irq().lowest.get());
        assert!(!dpc.is_suspended());
    }

    #[test]
    fn nested_suspend_needs_matching_resumes() {
        let dpc = dpc();
        dpc.suspend();
        dpc.resume();
        assert!(dpc.irq().enabled.get());

        dpc.suspend();
        dpc.suspend();
        assert!(!dpc.irq().enabled.get());
        dpc.resume();
        assert!(!dpc.irq().enabled.get());
        assert!(dpc.is_suspended());
        dpc.resume();
        assert!(dpc.irq().enabled.get());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "without a matching suspend")]
    fn unbalanced_resume_is_caught() {
        let dpc = dpc();
        dpc.resume();
    }

    #[test]
    fn triggers_coalesce() {
        let dpc = dpc();
        dpc.trigger();
        dpc.trigger();
        dpc.trigger();
        assert!(dpc.irq().pending.get());
        assert_eq!(dpc.irq().pends.get(), 3);
    }

    #[test]
    fn countdown_fires_once_after_five_ticks() {
        let dpc = dpc();
        let mut isp = CountingReprogram::default();
        dpc.countdown().arm(5);

        for _ in 0..4 {
            dpc.tick();
            dpc.run(&mut isp);
        }
        assert_eq!(isp.calls, 0);
        assert_eq!(dpc.countdown().remaining(), 1);

        dpc.tick();
        dpc.run(&mut isp);
        assert_eq!(isp.calls, 1);

        for _ in 0..10 {
            dpc.tick();
            dpc.run(&mut isp);
        }
        assert_eq!(isp.calls, 1);
    }

    #[test]
    fn ticks_batched_into_one_run_still_count() {
        let dpc = dpc();
        let mut isp = CountingReprogram::default();
        dpc.countdown().arm(5);
        for _ in 0..7 {
            dpc.tick();
        }
        dpc.run(&mut isp);
        assert_eq!(isp.calls, 1);
        assert!(!dpc.countdown().is_armed());
    }

    #[test]
    fn untimed_runs_leave_countdown_alone() {
        let dpc = dpc();
        let mut isp = CountingReprogram::default();
        dpc.countdown().arm(2);
        for _ in 0..10 {
            dpc.trigger();
            dpc.run(&mut isp);
        }
        assert_eq!(dpc.countdown().remaining(), 2);
        assert_eq!(isp.calls, 0);
    }

    #[test]
    fn rearming_replaces_the_schedule() {
        let countdown = Countdown::new();
        countdown.arm(3);
        assert!(!countdown.tick());
        countdown.arm(1);
        assert!(countdown.tick());
        assert!(!countdown.tick());
    }
}
