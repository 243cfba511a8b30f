// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded polling.

/// A bounded poll ran out of attempts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeout;

/// Calls `done` until it returns `true`, giving up after `budget` failed
/// polls. On success, returns the number of polls that came back `false`
/// first.
///
/// `done` is consulted at most `budget + 1` times: a condition that becomes
/// true on the very last allowed poll still counts as success.
pub fn poll_until(budget: u32, mut done: impl FnMut() -> bool) -> Result<u32, Timeout> {
    let mut misses = 0;
    while !done() {
        misses += 1;
        if misses > budget {
            return Err(Timeout);
        }
    }
    Ok(misses)
}
