// SPDX-License-Identifier: GPL-3.0-or-later

// Phase stepping: the motor coil currents are computed by the MCU at a fixed
// rate and sent to the drivers, instead of letting the drivers step.

mod fixed;
pub use fixed::*;

mod angle;
pub use angle::*;

mod sine_table;
pub use sine_table::*;

mod correction;
pub use correction::*;

mod synth;
pub use synth::*;

mod axis;
pub use axis::*;

mod engine;
pub use engine::*;

mod tx;
pub use tx::*;

mod refresh;
pub use refresh::*;

mod burst;
pub use burst::*;

mod storage;
pub use storage::*;

mod commands;
pub use commands::*;

pub mod calibration;

#[cfg(test)]
mod testing;
