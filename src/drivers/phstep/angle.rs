// SPDX-License-Identifier: GPL-3.0-or-later

use num::Integer;

use crate::consts::phase_stepping::hardware::*;

/// Position within one electrical revolution, in `[0, MOTOR_PERIOD)`.
/// Arithmetic wraps, it never clamps.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct ElectricalAngle(u16);

impl ElectricalAngle {
    pub const ZERO: Self = Self(0);
    pub const QUARTER_PERIOD: i32 = MOTOR_PERIOD as i32 / 4;
    pub const HALF_PERIOD: i32 = MOTOR_PERIOD as i32 / 2;

    pub fn new(ticks: i32) -> Self {
        Self(ticks.mod_floor(&(MOTOR_PERIOD as i32)) as u16)
    }

    // `position` is in microsteps, and `microsteps_per_period` of them make
    // one electrical revolution.
    pub fn from_position(position: i32, microsteps_per_period: u32) -> Self {
        let per_period = microsteps_per_period.max(1) as i64;
        let p = (position as i64).mod_floor(&per_period);
        Self((p * MOTOR_PERIOD as i64 / per_period) as u16)
    }

    pub fn ticks(self) -> u32 {
        self.0 as u32
    }

    pub fn wrapping_add(self, delta: i32) -> Self {
        Self::new(self.0 as i32 + delta.mod_floor(&(MOTOR_PERIOD as i32)))
    }

    // Phase B leads phase A by a quarter period.
    pub fn quarter_shifted(self) -> Self {
        self.wrapping_add(Self::QUARTER_PERIOD)
    }

    /// Shortest signed distance from `from` to `self`, in `(-512, 512]`.
    pub fn phase_difference(self, from: Self) -> i32 {
        let d = (self.0 as i32 - from.0 as i32).mod_floor(&(MOTOR_PERIOD as i32));
        if d > Self::HALF_PERIOD { d - MOTOR_PERIOD as i32 } else { d }
    }
}
