// SPDX-License-Identifier: GPL-3.0-or-later

// Helpers for probe rigs: turn an accelerometer capture into a single number
// telling how much the machine shakes at a given harmonic of the electrical
// period.

use core::f32::consts::TAU;

use heapless::Vec;

use crate::consts::phase_stepping::calibration::*;

// Fixed size capture buffer. The first samples out of the accelerometer FIFO
// predate the move and are dropped.
pub struct ResonanceCapture<const N: usize> {
    samples: Vec<f32, N>,
    skipped: usize,
}

impl<const N: usize> ResonanceCapture<N> {
    pub fn new() -> Self {
        Self { samples: Vec::new(), skipped: 0 }
    }

    // Returns false once the buffer is full.
    pub fn push(&mut self, sample: f32) -> bool {
        if self.skipped < STALE_SAMPLE_COUNT {
            self.skipped += 1;
            return true;
        }
        self.samples.push(sample).is_ok()
    }

    pub fn is_full(&self) -> bool {
        self.samples.is_full()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.skipped = 0;
    }
}

impl<const N: usize> Default for ResonanceCapture<N> {
    fn default() -> Self {
        Self::new()
    }
}

// Amplitude of bin `bin` of the DFT, naive. A pure tone with a whole number
// of periods in the signal reads as its amplitude.
pub fn dft_magnitude(signal: &[f32], bin: usize) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    let len = signal.len() as f32;
    let (re, im) = signal.iter().enumerate().fold((0.0, 0.0), |(re, im), (k, &x)| {
        let w = TAU * (bin * k) as f32 / len;
        (re + x * libm::cosf(w), im - x * libm::sinf(w))
    });
    2.0 * libm::hypotf(re, im) / len
}

// Electrical periods per second when the motor turns at `speed_rps`.
pub fn electrical_freq(speed_rps: f32, full_steps_per_rev: u32) -> f32 {
    speed_rps * full_steps_per_rev as f32 / 4.0
}

// (motor periods, samples) such that the samples cover exactly that many
// whole motor periods. Harmonic h then lands on bin periods*h.
pub fn matching_samples_count(sample_count: usize, sampling_freq: f32, electrical_freq: f32) -> Option<(usize, usize)> {
    if !(sampling_freq > 0.0 && electrical_freq > 0.0) {
        return None;
    }
    let period_samples = sampling_freq / electrical_freq;
    let periods = (sample_count as f32 / period_samples) as usize;
    if periods == 0 {
        return None;
    }
    let samples = libm::roundf(periods as f32 * period_samples) as usize;
    Some((periods, samples.min(sample_count)))
}

// Response at `harmonic`, averaged with the two neighbouring bins to soak up
// the leakage from a slightly wrong speed.
pub fn harmonic_response(signal: &[f32], sampling_freq: f32, electrical_freq: f32, harmonic: usize) -> Option<f32> {
    let (periods, count) = matching_samples_count(signal.len(), sampling_freq, electrical_freq)?;
    if count < 3 {
        return None;
    }
    let signal = &signal[..count];
    let bin = periods * harmonic;
    if bin == 0 || bin + 1 >= count {
        return Some(dft_magnitude(signal, bin));
    }
    let sum: f32 = (bin - 1..=bin + 1).map(|b| dft_magnitude(signal, b)).sum();
    Some(sum / 3.0)
}
