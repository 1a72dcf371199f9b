// SPDX-License-Identifier: GPL-3.0-or-later

// Burst mode: instead of streaming currents over SPI, the driver runs on its
// own sine table and we feed it step pulses. Each refresh tick computes the
// GPIO edges for the next 100us, and a DMA channel plays them on the GPIO
// set/reset register at 2Mhz. The CPU only comes back at BURST_REFRESH_FREQ.
//
// The driver must be at 256 microsteps, so one step is one angle tick.

use bitflags::bitflags;

use crate::consts::phase_stepping::{burst::*, hardware::*, refresh::*};
use crate::util::DoubleBuffer;
use super::*;
use super::refresh::{tick_is_late, AxisTracker};

bitflags! {
    pub struct PinMask: u16 {
        const X_STEP = 1 << 0;
        const X_DIR  = 1 << 1;
        const Y_STEP = 1 << 2;
        const Y_DIR  = 1 << 3;
    }
}

impl PinMask {
    pub fn step(axis: Axis) -> Self {
        match axis {
            Axis::X => Self::X_STEP,
            Axis::Y => Self::Y_STEP,
        }
    }

    pub fn dir(axis: Axis) -> Self {
        match axis {
            Axis::X => Self::X_DIR,
            Axis::Y => Self::Y_DIR,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GpioEvent {
    pub set: PinMask,
    pub clear: PinMask,
}

impl GpioEvent {
    pub const NONE: Self = Self { set: PinMask::empty(), clear: PinMask::empty() };

    // BSRR layout: the low half sets pins, the high half resets them.
    pub fn bsrr(&self) -> u32 {
        self.set.bits() as u32 | (self.clear.bits() as u32) << 16
    }

    pub fn merge(&mut self, other: &GpioEvent) {
        self.set |= other.set;
        self.clear |= other.clear;
    }
}

impl Default for GpioEvent {
    fn default() -> Self {
        Self::NONE
    }
}

pub type BurstSequence = [GpioEvent; GPIO_BUFFER_SIZE];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BurstPlan {
    pub events: BurstSequence,
    // Signed number of steps in `events`
    pub steps: i32,
}

/// Edges that move the driver from `driver_phase` toward `target`. At most
/// MAX_STEPS_PER_BURST steps, the rest is left for the next burst.
/// The dir pin is set in slot 0, and step k of n rises at 1 + k*199/n.
pub fn build_burst_sequence(
    axis: Axis,
    driver_phase: ElectricalAngle,
    target: ElectricalAngle,
    magnitude: Magnitude,
) -> BurstPlan {
    let mut events = [GpioEvent::NONE; GPIO_BUFFER_SIZE];
    if magnitude.is_zero() {
        return BurstPlan { events, steps: 0 };
    }

    let diff = target.phase_difference(driver_phase);
    let n = diff.unsigned_abs().min(MAX_STEPS_PER_BURST);
    if n == 0 {
        return BurstPlan { events, steps: 0 };
    }

    let dir = PinMask::dir(axis);
    events[0] = if diff > 0 {
        GpioEvent { set: dir, clear: PinMask::empty() }
    } else {
        GpioEvent { set: PinMask::empty(), clear: dir }
    };

    let span = GPIO_BUFFER_SIZE as u32 - 1;
    let step = PinMask::step(axis);
    for k in 0..n {
        let rise = 1 + (k * span / n) as usize;
        events[rise].set |= step;
        events[rise + 1].clear |= step;
    }

    let steps = n as i32;
    BurstPlan { events, steps: if diff > 0 { steps } else { -steps } }
}

pub trait BurstChannel {
    /// True while the previous sequence is still playing.
    fn is_busy(&self) -> bool;

    /// Points the DMA at `events`. They are not written again until the
    /// channel is no longer busy.
    fn load(&mut self, events: &BurstSequence);

    fn fire(&mut self);
}

pub struct BurstRefresh<'e, C: BurstChannel> {
    engine: &'e Engine,
    channel: C,
    trackers: [AxisTracker; SUPPORTED_AXIS_COUNT],
    // Where the driver's own table is, given the steps that were played
    driver_phase: [ElectricalAngle; SUPPORTED_AXIS_COUNT],
    // Steps sitting in the next half, per axis. None when the axis is not in it.
    staged: [Option<i32>; SUPPORTED_AXIS_COUNT],
    buffer: DoubleBuffer<BurstSequence>,
    last_tick_us: Option<u32>,
}

impl<'e, C: BurstChannel> BurstRefresh<'e, C> {
    // Assumes the drivers currently sit at the electrical angle of the
    // published positions.
    pub fn new(engine: &'e Engine, channel: C, configs: [AxisConfig; SUPPORTED_AXIS_COUNT]) -> Self {
        let trackers = Axis::ALL.map(|axis| AxisTracker::new(engine.axis(axis), configs[axis.index()]));
        let driver_phase = [trackers[0].angle(), trackers[1].angle()];
        Self {
            engine,
            channel,
            trackers,
            driver_phase,
            staged: [None; SUPPORTED_AXIS_COUNT],
            buffer: DoubleBuffer::filled([GpioEvent::NONE; GPIO_BUFFER_SIZE]),
            last_tick_us: None,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    // The half the channel was last pointed at.
    pub fn in_flight(&self) -> &BurstSequence {
        self.buffer.in_flight()
    }

    pub fn driver_phase(&self, axis: Axis) -> ElectricalAngle {
        self.driver_phase[axis.index()]
    }

    // After the driver was reset, or moved by something else.
    pub fn set_driver_phase(&mut self, axis: Axis, phase: ElectricalAngle) {
        self.driver_phase[axis.index()] = phase;
    }

    pub fn set_phase_origin(&mut self, axis: Axis, position: i32) {
        self.trackers[axis.index()].set_phase_origin(position);
    }

    pub fn on_interrupt(&mut self, now_us: u32) {
        let late = tick_is_late(&mut self.last_tick_us, now_us, BURST_REFRESH_PERIOD_US);

        self.fire_staged();

        // Prepare the next burst
        let table = self.engine.sine_table();
        let next = self.buffer.next_mut();
        *next = [GpioEvent::NONE; GPIO_BUFFER_SIZE];

        for axis in Axis::ALL {
            let shared = self.engine.axis(axis);
            let tracker = &mut self.trackers[axis.index()];
            if !shared.is_active() {
                tracker.pause();
                continue;
            }

            tracker.sync(shared);
            if !tracker.motion().enabled {
                continue;
            }
            if late {
                shared.record_late();
            }

            let angle = tracker.angle();
            let target = angle.wrapping_add(phase_shift(table, tracker.correction(), angle));
            let plan = build_burst_sequence(axis, self.driver_phase[axis.index()], target, tracker.motion().magnitude);
            for (slot, event) in next.iter_mut().zip(plan.events.iter()) {
                slot.merge(event);
            }
            self.staged[axis.index()] = Some(plan.steps);
        }
    }

    // Plays what the previous tick prepared. If the channel is still busy
    // with the burst before that, the staged steps are dropped and the
    // driver phase stays put, so the next burst catches up.
    fn fire_staged(&mut self) {
        if self.staged.iter().all(Option::is_none) {
            return;
        }

        if self.channel.is_busy() {
            for axis in Axis::ALL {
                if self.staged[axis.index()].is_some() {
                    self.engine.record_missed(axis);
                }
            }
        } else {
            self.channel.load(self.buffer.next());
            self.channel.fire();
            self.buffer.swap();
            for axis in Axis::ALL {
                if let Some(steps) = self.staged[axis.index()] {
                    let phase = &mut self.driver_phase[axis.index()];
                    *phase = phase.wrapping_add(steps);
                }
            }
        }

        self.staged = [None; SUPPORTED_AXIS_COUNT];
    }
}
