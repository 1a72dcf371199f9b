// SPDX-License-Identifier: GPL-3.0-or-later

use bitflags::bitflags;

use crate::consts::phase_stepping::hardware::*;
use crate::util::Packed;
use super::Magnitude;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Axis {
    X = 0,
    Y = 1,
}

impl Axis {
    pub const ALL: [Axis; SUPPORTED_AXIS_COUNT] = [Axis::X, Axis::Y];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn mask(self) -> AxisMask {
        match self {
            Axis::X => AxisMask::X,
            Axis::Y => AxisMask::Y,
        }
    }
}

bitflags! {
    pub struct AxisMask: u8 {
        const X = 1 << 0;
        const Y = 1 << 1;
    }
}

impl AxisMask {
    pub fn axes(self) -> impl Iterator<Item = Axis> {
        Axis::ALL.into_iter().filter(move |a| self.contains(a.mask()))
    }
}

/// What the motion subsystem hands to the refresh interrupt, once per
/// planner step.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct MotionSample {
    pub mechanical_position: i32, // microsteps
    pub magnitude: Magnitude,
    pub enabled: bool,
}

pub const MOTION_WORDS: usize = 3;

impl Packed for MotionSample {
    const WORDS: usize = MOTION_WORDS;

    fn pack(&self, words: &mut [i32]) {
        words[0] = self.mechanical_position;
        words[1] = self.magnitude.to_bits();
        words[2] = self.enabled as i32;
    }

    fn unpack(words: &[i32]) -> Self {
        Self {
            mechanical_position: words[0],
            magnitude: Magnitude::from_bits(words[1]),
            enabled: words[2] != 0,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AxisConfig {
    // 256 microsteps on a 4 full step electrical period is 1024.
    pub microsteps_per_period: u32,
    // Motor wired backwards. Positions are negated before anything else.
    pub inverted: bool,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self { microsteps_per_period: DEFAULT_MICROSTEPS_PER_PERIOD, inverted: false }
    }
}
