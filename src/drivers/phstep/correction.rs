// SPDX-License-Identifier: GPL-3.0-or-later

use crate::consts::phase_stepping::hardware::*;
use crate::util::Packed;
use super::{Acc, ElectricalAngle, Fixed, Sample, SineTable};

// One harmonic of the correction: s*sin(h*theta) + c*cos(h*theta)
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct HarmonicTerm {
    pub sin: Sample,
    pub cos: Sample,
}

// The same term seen as mag*sin(h*theta + pha). This is what calibration
// searches over, and what the command layer shows.
#[derive(Clone, Copy, PartialEq, Default, Debug)]
pub struct SpectralItem {
    pub mag: f32,
    pub pha: f32,
}

impl HarmonicTerm {
    pub const ZERO: Self = Self { sin: Fixed::ZERO, cos: Fixed::ZERO };

    pub fn from_spectral(item: SpectralItem) -> Self {
        Self {
            sin: Fixed::from_f32(item.mag * libm::cosf(item.pha)),
            cos: Fixed::from_f32(item.mag * libm::sinf(item.pha)),
        }
    }

    pub fn spectral(&self) -> SpectralItem {
        let (s, c) = (self.sin.to_f32(), self.cos.to_f32());
        SpectralItem { mag: libm::hypotf(s, c), pha: libm::atan2f(c, s) }
    }
}

/// Correction added to the base sine, for harmonics 1 to CORRECTION_HARMONICS.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HarmonicCorrection {
    terms: [HarmonicTerm; CORRECTION_HARMONICS],
}

impl HarmonicCorrection {
    pub const IDENTITY: Self = Self { terms: [HarmonicTerm::ZERO; CORRECTION_HARMONICS] };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    // Harmonic orders start at 1.
    pub fn term(&self, order: usize) -> Option<HarmonicTerm> {
        self.terms.get(order.checked_sub(1)?).copied()
    }

    pub fn term_mut(&mut self, order: usize) -> Option<&mut HarmonicTerm> {
        self.terms.get_mut(order.checked_sub(1)?)
    }

    pub fn terms(&self) -> impl Iterator<Item = (usize, &HarmonicTerm)> {
        self.terms.iter().enumerate().map(|(i, t)| (i + 1, t))
    }

    // Sum of all the terms at `angle`. Zero terms are skipped, most tables
    // only have a couple of harmonics set.
    pub fn evaluate(&self, table: &SineTable, angle: ElectricalAngle) -> Acc {
        self.terms()
            .filter(|(_, t)| **t != HarmonicTerm::ZERO)
            .fold(Acc::ZERO, |acc, (order, t)| {
                let (s, c) = table.harmonic(angle, order);
                acc.mac(t.sin, s).mac(t.cos, c)
            })
    }
}

impl Default for HarmonicCorrection {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Forward, Direction::Backward];
}

// The motor ripple is not the same in both directions, so each axis carries
// one table per direction.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct CorrectionSet {
    pub forward: HarmonicCorrection,
    pub backward: HarmonicCorrection,
}

pub const CORRECTION_WORDS: usize = 2 * 2 * CORRECTION_HARMONICS;

impl CorrectionSet {
    pub const IDENTITY: Self = Self {
        forward: HarmonicCorrection::IDENTITY,
        backward: HarmonicCorrection::IDENTITY,
    };

    pub fn get(&self, direction: Direction) -> &HarmonicCorrection {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    pub fn get_mut(&mut self, direction: Direction) -> &mut HarmonicCorrection {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Backward => &mut self.backward,
        }
    }
}

// Forward then backward, and for each harmonic sin then cos.
// The persisted format uses the same order.
impl Packed for CorrectionSet {
    const WORDS: usize = CORRECTION_WORDS;

    fn pack(&self, words: &mut [i32]) {
        let terms = self.forward.terms.iter().chain(self.backward.terms.iter());
        for (w, t) in words.chunks_exact_mut(2).zip(terms) {
            w[0] = t.sin.to_bits();
            w[1] = t.cos.to_bits();
        }
    }

    fn unpack(words: &[i32]) -> Self {
        let mut set = Self::IDENTITY;
        let terms = set.forward.terms.iter_mut().chain(set.backward.terms.iter_mut());
        for (t, w) in terms.zip(words.chunks_exact(2)) {
            *t = HarmonicTerm { sin: Fixed::from_bits(w[0]), cos: Fixed::from_bits(w[1]) };
        }
        set
    }
}
