// SPDX-License-Identifier: GPL-3.0-or-later

// Phase stepping engine. Replaces plain step/dir drive by synthesizing the
// coil currents of each stepper every refresh tick.
// Host builds (tests) get std, the firmware build is no_std.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

pub mod consts;
pub mod util;
pub mod drivers;

#[cfg(target_os = "none")]
pub mod logging;

pub use drivers::phstep;
