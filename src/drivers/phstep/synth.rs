// SPDX-License-Identifier: GPL-3.0-or-later

// Turns an electrical angle and a magnitude into the two coil currents.
// Integer only, this runs in the refresh interrupt.

use crate::consts::phase_stepping::hardware::*;
use super::{Acc, ElectricalAngle, Fixed, HarmonicCorrection, Magnitude, SineTable};

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct CurrentCommand {
    pub a: i16,
    pub b: i16,
}

impl CurrentCommand {
    pub const ZERO: Self = Self { a: 0, b: 0 };
}

// Current of a single coil, saturated to what the driver accepts.
pub fn phase_current(
    table: &SineTable,
    correction: &HarmonicCorrection,
    angle: ElectricalAngle,
    magnitude: Magnitude,
) -> i16 {
    let sum = Acc::from_fixed(table.sample(angle)).saturating_add(correction.evaluate(table, angle));
    let units: Fixed<0> = sum.mul_narrow(magnitude.as_fixed());
    num::clamp(units.to_bits(), -COMMAND_LIMIT, COMMAND_LIMIT) as i16
}

pub fn synthesize(
    table: &SineTable,
    correction: &HarmonicCorrection,
    angle: ElectricalAngle,
    magnitude: Magnitude,
) -> CurrentCommand {
    // Motor is idle, no current.
    if magnitude.is_zero() {
        return CurrentCommand::ZERO;
    }

    CurrentCommand {
        a: phase_current(table, correction, angle, magnitude),
        b: phase_current(table, correction, angle.quarter_shifted(), magnitude),
    }
}

// MOTOR_PERIOD / 2pi in Q8
const TICKS_PER_RADIAN: Fixed<8> = Fixed::from_bits(41722);

// Burst mode can't shape the current, it only decides where the driver's own
// sine table should be. The correction sum is then read as a phase offset in
// radians, converted to angle ticks.
pub fn phase_shift(table: &SineTable, correction: &HarmonicCorrection, angle: ElectricalAngle) -> i32 {
    if correction.is_identity() {
        return 0;
    }
    correction.evaluate(table, angle).mul_narrow::<8, 0>(TICKS_PER_RADIAN).to_bits()
}
