// SPDX-License-Identifier: GPL-3.0-or-later

use core::f64::consts::FRAC_PI_2;

use crate::consts::phase_stepping::hardware::*;
use super::{ElectricalAngle, Fixed, Sample};

const QUARTER: usize = SIN_PERIOD / 4;

// One full sine period, SIN_FRACTION times oversampled compared to the
// electrical angle resolution.
pub struct SineTable {
    samples: [i16; SIN_PERIOD],
}

impl SineTable {
    // Computes a quarter wave and mirrors it. The table is then exactly
    // antisymmetric, t[i + SIN_PERIOD/2] == -t[i], which keeps the two halves
    // of the current waveform balanced.
    pub fn new() -> Self {
        let mut quarter = [0i16; QUARTER + 1];
        for (i, q) in quarter.iter_mut().enumerate() {
            let x = libm::sin(FRAC_PI_2 * i as f64 / QUARTER as f64);
            *q = libm::round(x * i16::MAX as f64) as i16;
        }

        let mut samples = [0i16; SIN_PERIOD];
        for (i, s) in samples.iter_mut().enumerate() {
            *s = match i / QUARTER {
                0 => quarter[i],
                1 => quarter[2 * QUARTER - i],
                2 => -quarter[i - 2 * QUARTER],
                _ => -quarter[4 * QUARTER - i],
            };
        }

        Self { samples }
    }

    pub fn sample(&self, angle: ElectricalAngle) -> Sample {
        self.at(angle.ticks() as usize * SIN_FRACTION as usize)
    }

    // Raw table index, wrapped.
    pub fn at(&self, index: usize) -> Sample {
        Fixed::from_bits(self.samples[index % SIN_PERIOD] as i32)
    }

    // (sin(order*angle), cos(order*angle))
    pub fn harmonic(&self, angle: ElectricalAngle, order: usize) -> (Sample, Sample) {
        let i = order * angle.ticks() as usize * SIN_FRACTION as usize;
        (self.at(i), self.at(i + QUARTER))
    }
}

impl Default for SineTable {
    fn default() -> Self {
        Self::new()
    }
}
