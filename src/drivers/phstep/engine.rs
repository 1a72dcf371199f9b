// SPDX-License-Identifier: GPL-3.0-or-later

// Everything the refresh interrupt shares with the tasks. There is one
// Engine for the whole firmware. It is created at boot and borrowed by the
// refresh loop, the motion subsystem and calibration.
//
// The interrupt only ever touches atomics in here. Faults are latched and
// logged later by whoever calls take_faults().

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::consts::phase_stepping::{hardware::*, refresh::*};
use crate::util::{Handoff, PublishError};
use super::*;

pub(crate) struct AxisShared {
    pub(crate) motion: Handoff<MotionSample, MOTION_WORDS>,
    pub(crate) correction: Handoff<CorrectionSet, CORRECTION_WORDS>,
    missed_tx: AtomicU32,
    late_ticks: AtomicU32,
    enabled: AtomicBool,
    faulted: AtomicBool,
    fault_transitions: AtomicU32,
}

impl AxisShared {
    fn new() -> Self {
        Self {
            motion: Handoff::new(MotionSample::default()),
            correction: Handoff::new(CorrectionSet::IDENTITY),
            missed_tx: AtomicU32::new(0),
            late_ticks: AtomicU32::new(0),
            enabled: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            fault_transitions: AtomicU32::new(0),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.enabled.load(Ordering::Acquire) && !self.faulted.load(Ordering::Acquire)
    }

    pub(crate) fn record_late(&self) {
        self.late_ticks.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct AxisStatus {
    pub enabled: bool,
    pub faulted: bool,
    pub missed_count: u32,
    pub late_ticks: u32,
    pub fault_transitions: u32,
}

pub struct Engine {
    table: SineTable,
    axes: [AxisShared; SUPPORTED_AXIS_COUNT],
    pending_faults: AtomicU8,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            table: SineTable::new(),
            axes: [AxisShared::new(), AxisShared::new()],
            pending_faults: AtomicU8::new(0),
        }
    }

    pub fn sine_table(&self) -> &SineTable {
        &self.table
    }

    pub(crate) fn axis(&self, axis: Axis) -> &AxisShared {
        &self.axes[axis.index()]
    }

    // Motion subsystem side

    pub fn publish_motion(&self, axis: Axis, sample: MotionSample) -> Result<(), PublishError> {
        self.axis(axis).motion.publish(&sample)
    }

    pub fn motion(&self, axis: Axis) -> MotionSample {
        self.axis(axis).motion.read()
    }

    // Axes that faulted since the last call. The motion subsystem must drive
    // them with plain step/dir until they are explicitly enabled again.
    pub fn take_faults(&self) -> AxisMask {
        let faults = AxisMask::from_bits_truncate(self.pending_faults.swap(0, Ordering::AcqRel));
        for axis in faults.axes() {
            warn!("Phase stepping disabled on {:?}: {} missed transmissions",
                axis, self.missed_count(axis));
        }
        faults
    }

    // Enabling clears a previous fault and the missed transmission count.
    pub fn enable(&self, axis: Axis) {
        let a = self.axis(axis);
        a.missed_tx.store(0, Ordering::Relaxed);
        a.faulted.store(false, Ordering::Release);
        a.enabled.store(true, Ordering::Release);
        info!("Phase stepping enabled on {:?}", axis);
    }

    pub fn disable(&self, axis: Axis) {
        self.axis(axis).enabled.store(false, Ordering::Release);
        info!("Phase stepping disabled on {:?}", axis);
    }

    pub fn is_enabled(&self, axis: Axis) -> bool {
        self.axis(axis).is_active()
    }

    pub fn is_faulted(&self, axis: Axis) -> bool {
        self.axis(axis).faulted.load(Ordering::Acquire)
    }

    pub fn missed_count(&self, axis: Axis) -> u32 {
        self.axis(axis).missed_tx.load(Ordering::Relaxed)
    }

    // Read and reset in one go, so no increment from the interrupt gets lost.
    pub fn take_missed_count(&self, axis: Axis) -> u32 {
        self.axis(axis).missed_tx.swap(0, Ordering::AcqRel)
    }

    pub fn status(&self, axis: Axis) -> AxisStatus {
        let a = self.axis(axis);
        AxisStatus {
            enabled: a.is_active(),
            faulted: a.faulted.load(Ordering::Acquire),
            missed_count: a.missed_tx.load(Ordering::Relaxed),
            late_ticks: a.late_ticks.load(Ordering::Relaxed),
            fault_transitions: a.fault_transitions.load(Ordering::Relaxed),
        }
    }

    // Corrections

    pub fn correction(&self, axis: Axis) -> CorrectionSet {
        self.axis(axis).correction.read()
    }

    // The interrupt picks up the new set on its next tick, never half of it.
    pub fn publish_correction(&self, axis: Axis, set: &CorrectionSet) -> Result<(), PublishError> {
        self.axis(axis).correction.publish(set)
    }

    // What the refresh loop would command for `axis` moving in `direction`.
    pub fn synthesize(
        &self,
        axis: Axis,
        direction: Direction,
        angle: ElectricalAngle,
        magnitude: Magnitude,
    ) -> CurrentCommand {
        let set = self.correction(axis);
        synthesize(&self.table, set.get(direction), angle, magnitude)
    }

    // Interrupt side

    pub(crate) fn record_missed(&self, axis: Axis) {
        let a = self.axis(axis);
        let missed = a.missed_tx.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if missed > ALLOWED_MISSED_TX && !a.faulted.swap(true, Ordering::AcqRel) {
            a.enabled.store(false, Ordering::Release);
            a.fault_transitions.fetch_add(1, Ordering::Relaxed);
            self.pending_faults.fetch_or(axis.mask().bits(), Ordering::AcqRel);
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_fires_once_past_the_threshold() {
        let engine = Engine::new();
        engine.enable(Axis::X);

        for _ in 0..ALLOWED_MISSED_TX {
            engine.record_missed(Axis::X);
        }
        assert!(engine.is_enabled(Axis::X));
        assert!(engine.take_faults().is_empty());

        engine.record_missed(Axis::X);
        assert!(!engine.is_enabled(Axis::X));
        assert!(engine.is_faulted(Axis::X));
        assert_eq!(engine.take_faults(), AxisMask::X);

        for _ in 0..10 {
            engine.record_missed(Axis::X);
        }
        assert!(engine.take_faults().is_empty());
        assert_eq!(engine.status(Axis::X).fault_transitions, 1);
        assert!(!engine.is_enabled(Axis::Y) && !engine.is_faulted(Axis::Y));
    }

    #[test]
    fn enable_clears_fault_and_counter() {
        let engine = Engine::new();
        engine.enable(Axis::Y);
        for _ in 0..=ALLOWED_MISSED_TX {
            engine.record_missed(Axis::Y);
        }
        assert!(engine.is_faulted(Axis::Y));

        engine.enable(Axis::Y);
        assert!(engine.is_enabled(Axis::Y));
        assert_eq!(engine.missed_count(Axis::Y), 0);
    }

    #[test]
    fn take_missed_count_resets_to_zero() {
        let engine = Engine::new();
        engine.enable(Axis::X);
        engine.record_missed(Axis::X);
        engine.record_missed(Axis::X);
        assert_eq!(engine.take_missed_count(Axis::X), 2);
        assert_eq!(engine.missed_count(Axis::X), 0);
    }

    #[test]
    fn published_correction_is_used_for_synthesis() {
        let engine = Engine::new();
        let mut set = CorrectionSet::IDENTITY;
        set.backward.term_mut(1).unwrap().sin = Sample::from_f32(0.5);
        engine.publish_correction(Axis::X, &set).unwrap();

        let angle = ElectricalAngle::new(256);
        let mag = Magnitude::from_units(100);
        assert_eq!(engine.synthesize(Axis::X, Direction::Forward, angle, mag).a, 100);
        assert_eq!(engine.synthesize(Axis::X, Direction::Backward, angle, mag).a, 150);
        assert_eq!(engine.synthesize(Axis::Y, Direction::Backward, angle, mag).a, 100);
    }
}
