// SPDX-License-Identifier: GPL-3.0-or-later

// Fakes for the hardware the engine talks to.

use super::*;
use super::calibration::{CalibrationPhase, ProbeRig};

pub struct RecordingBus {
    pub busy: AxisMask,
    pub sent: Vec<(Axis, TxFrame)>,
}

impl Default for RecordingBus {
    fn default() -> Self {
        Self { busy: AxisMask::empty(), sent: Vec::new() }
    }
}

impl DriverBus for RecordingBus {
    fn is_busy(&self, axis: Axis) -> bool {
        self.busy.contains(axis.mask())
    }

    fn submit(&mut self, axis: Axis, frame: &TxFrame) {
        self.sent.push((axis, *frame));
    }
}

// Like the DMA, remembers where the sequence lives, not only what it was.
#[derive(Default)]
pub struct RecordingChannel {
    pub busy: bool,
    pub loaded: Option<BurstSequence>,
    pub loaded_from: Option<*const BurstSequence>,
    pub fired: Vec<BurstSequence>,
}

impl BurstChannel for RecordingChannel {
    fn is_busy(&self) -> bool {
        self.busy
    }

    fn load(&mut self, events: &BurstSequence) {
        self.loaded = Some(*events);
        self.loaded_from = Some(events as *const BurstSequence);
    }

    fn fire(&mut self) {
        if let Some(events) = self.loaded.take() {
            self.fired.push(events);
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct StoreFailure;

#[derive(Default)]
pub struct MemStore {
    pub records: [Option<[u8; ENCODED_LEN]>; 2],
    pub enabled: [Option<bool>; 2],
    pub fail: bool,
}

impl CorrectionStore for MemStore {
    type Error = StoreFailure;

    fn read(&mut self, axis: Axis, buf: &mut [u8; ENCODED_LEN]) -> Result<bool, StoreFailure> {
        if self.fail {
            return Err(StoreFailure);
        }
        match &self.records[axis.index()] {
            Some(r) => {
                buf.copy_from_slice(r);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn write(&mut self, axis: Axis, buf: &[u8; ENCODED_LEN]) -> Result<(), StoreFailure> {
        if self.fail {
            return Err(StoreFailure);
        }
        self.records[axis.index()] = Some(*buf);
        Ok(())
    }

    fn read_enabled(&mut self, axis: Axis) -> Result<Option<bool>, StoreFailure> {
        if self.fail {
            return Err(StoreFailure);
        }
        Ok(self.enabled[axis.index()])
    }

    fn write_enabled(&mut self, axis: Axis, enabled: bool) -> Result<(), StoreFailure> {
        if self.fail {
            return Err(StoreFailure);
        }
        self.enabled[axis.index()] = Some(enabled);
        Ok(())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RigFailure;

// A motor with a known ripple. The measured vibration is whatever ripple the
// live correction table leaves uncancelled, plus a noise floor.
pub struct SimulatedRig<'e> {
    pub engine: &'e Engine,
    pub ripple: Vec<(Axis, Direction, usize, SpectralItem)>,
    pub floor: f32,
    // Ignore the table and always answer this
    pub constant: [Option<f32>; 2],
    // Number of upcoming measurements that fail
    pub failures: usize,
    pub measurements: usize,
}

impl<'e> SimulatedRig<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self {
            engine,
            ripple: Vec::new(),
            floor: 0.001,
            constant: [None; 2],
            failures: 0,
            measurements: 0,
        }
    }
}

impl ProbeRig for SimulatedRig<'_> {
    type Error = RigFailure;

    fn measure(&mut self, axis: Axis, phase: &CalibrationPhase, direction: Direction) -> Result<f32, RigFailure> {
        self.measurements += 1;
        if self.failures > 0 {
            self.failures -= 1;
            return Err(RigFailure);
        }
        if let Some(c) = self.constant[axis.index()] {
            return Ok(c);
        }

        let ripple = self.ripple.iter()
            .find(|(a, d, h, _)| *a == axis && *d == direction && *h == phase.harmonic)
            .map(|(_, _, _, item)| HarmonicTerm::from_spectral(*item))
            .unwrap_or_default();
        let applied = self.engine.correction(axis).get(direction).term(phase.harmonic).unwrap_or_default();

        let ds = ripple.sin.to_f32() - applied.sin.to_f32();
        let dc = ripple.cos.to_f32() - applied.cos.to_f32();
        Ok(libm::hypotf(ds, dc) + self.floor)
    }
}
