// SPDX-License-Identifier: GPL-3.0-or-later

// The refresh interrupt. Every tick, for every enabled axis: pick up the
// latest motion sample, compute the coil currents, and ship them to the
// driver in the next half of the frame double buffer.
//
// If the previous frame is still being transferred, the tick is a missed
// transmission. The new command is dropped and the driver keeps the last
// one. Too many of those and the axis is faulted (see Engine).

use crate::consts::phase_stepping::{hardware::*, refresh::*};
use crate::util::DoubleBuffer;
use super::*;
use super::engine::AxisShared;

// Per axis state private to the interrupt.
pub(crate) struct AxisTracker {
    config: AxisConfig,
    motion: MotionSample,
    motion_seen: u32,
    correction: CorrectionSet,
    correction_seen: u32,
    direction: Direction,
    // Added to the angle derived from the position
    zero_phase: i32,
    // Set while the axis is off. Where it went meanwhile is not a move.
    rebase: bool,
}

impl AxisTracker {
    // Task context: reads are allowed to spin here.
    pub(crate) fn new(shared: &AxisShared, config: AxisConfig) -> Self {
        let (motion_seen, motion) = shared.motion.snapshot();
        let (correction_seen, correction) = shared.correction.snapshot();
        Self {
            config,
            motion,
            motion_seen,
            correction,
            correction_seen,
            direction: Direction::Forward,
            zero_phase: 0,
            rebase: false,
        }
    }

    fn oriented(&self, position: i32) -> i32 {
        if self.config.inverted { position.wrapping_neg() } else { position }
    }

    // Picks up what the tasks published since the last tick. A read that
    // races with a publish is retried on the next tick.
    pub(crate) fn sync(&mut self, shared: &AxisShared) {
        if self.rebase {
            if let Some((seen, m)) = shared.motion.try_snapshot() {
                self.motion_seen = seen;
                self.motion = m;
                self.rebase = false;
            }
        } else if let Some(m) = shared.motion.try_read_since(&mut self.motion_seen) {
            let delta = self.oriented(m.mechanical_position)
                .wrapping_sub(self.oriented(self.motion.mechanical_position));
            if delta > 0 {
                self.direction = Direction::Forward;
            } else if delta < 0 {
                self.direction = Direction::Backward;
            }
            self.motion = m;
        }
        if let Some(c) = shared.correction.try_read_since(&mut self.correction_seen) {
            self.correction = c;
        }
    }

    // The axis is off. The next sync takes the motion as it is, and keeps
    // the direction.
    pub(crate) fn pause(&mut self) {
        self.rebase = true;
    }

    pub(crate) fn motion(&self) -> &MotionSample {
        &self.motion
    }

    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn angle(&self) -> ElectricalAngle {
        let position = self.oriented(self.motion.mechanical_position);
        ElectricalAngle::from_position(position, self.config.microsteps_per_period)
            .wrapping_add(self.zero_phase)
    }

    pub(crate) fn correction(&self) -> &HarmonicCorrection {
        self.correction.get(self.direction)
    }

    // The motor stays where it is, but from now on `position` designates
    // the current electrical angle.
    pub(crate) fn set_phase_origin(&mut self, position: i32) {
        let current = self.angle();
        let raw = ElectricalAngle::from_position(self.oriented(position), self.config.microsteps_per_period);
        self.zero_phase = current.phase_difference(raw);
        self.motion.mechanical_position = position;
    }
}

// Tells if the interrupt came in later than it should have. Only used for
// telemetry: a late tick is not a missed transmission.
pub(crate) fn tick_is_late(last_tick_us: &mut Option<u32>, now_us: u32, period_us: u32) -> bool {
    let late = match *last_tick_us {
        Some(prev) => now_us.wrapping_sub(prev) >= 2 * period_us - UPDATE_DURATION_US,
        None => false,
    };
    *last_tick_us = Some(now_us);
    late
}

pub struct SpiRefresh<'e, B: DriverBus> {
    engine: &'e Engine,
    bus: B,
    trackers: [AxisTracker; SUPPORTED_AXIS_COUNT],
    frames: [DoubleBuffer<TxFrame>; SUPPORTED_AXIS_COUNT],
    last_tick_us: Option<u32>,
}

impl<'e, B: DriverBus> SpiRefresh<'e, B> {
    pub fn new(engine: &'e Engine, bus: B, configs: [AxisConfig; SUPPORTED_AXIS_COUNT]) -> Self {
        Self {
            engine,
            bus,
            trackers: Axis::ALL.map(|axis| AxisTracker::new(engine.axis(axis), configs[axis.index()])),
            frames: [DoubleBuffer::filled(TxFrame::default()), DoubleBuffer::filled(TxFrame::default())],
            last_tick_us: None,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn set_phase_origin(&mut self, axis: Axis, position: i32) {
        self.trackers[axis.index()].set_phase_origin(position);
    }

    pub fn electrical_angle(&self, axis: Axis) -> ElectricalAngle {
        self.trackers[axis.index()].angle()
    }

    // Which correction table the axis currently runs with.
    pub fn direction(&self, axis: Axis) -> Direction {
        self.trackers[axis.index()].direction()
    }

    // Last frame handed to the DMA for this axis.
    pub fn last_frame(&self, axis: Axis) -> &TxFrame {
        self.frames[axis.index()].in_flight()
    }

    // Refresh timer interrupt. `now_us` is the free running 1Mhz tick counter.
    pub fn on_interrupt(&mut self, now_us: u32) {
        let late = tick_is_late(&mut self.last_tick_us, now_us, REFRESH_PERIOD_US);
        let table = self.engine.sine_table();

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

            if self.bus.is_busy(axis) {
                self.engine.record_missed(axis);
                continue;
            }

            let cmd = synthesize(table, tracker.correction(), tracker.angle(), tracker.motion().magnitude);
            let frames = &mut self.frames[axis.index()];
            *frames.next_mut() = TxFrame::xdirect(cmd);
            self.bus.submit(axis, frames.next());
            frames.swap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::testing::*;
    use crate::util::SharedWithInterrupt;

    fn setup(engine: &Engine, axis: Axis, position: i32) {
        engine.enable(axis);
        engine.publish_motion(axis, MotionSample {
            mechanical_position: position,
            magnitude: Magnitude::from_units(200),
            enabled: true,
        }).unwrap();
    }

    #[test]
    fn sends_one_frame_per_enabled_axis() {
        let engine = Engine::new();
        setup(&engine, Axis::X, 256);
        let mut refresh = SpiRefresh::new(&engine, RecordingBus::default(), Default::default());

        refresh.on_interrupt(0);
        let bus = refresh.bus();
        assert_eq!(bus.sent.len(), 1);
        let (axis, frame) = bus.sent[0];
        assert_eq!(axis, Axis::X);
        assert_eq!(frame.command(), Some(CurrentCommand { a: 200, b: 0 }));
        assert_eq!(*refresh.last_frame(Axis::X), frame);
    }

    #[test]
    fn follows_published_motion() {
        let engine = Engine::new();
        setup(&engine, Axis::Y, 0);
        let mut refresh = SpiRefresh::new(&engine, RecordingBus::default(), Default::default());
        refresh.on_interrupt(0);

        setup(&engine, Axis::Y, 512);
        refresh.on_interrupt(25);
        let cmd = refresh.bus().sent[1].1.command().unwrap();
        assert_eq!(cmd, CurrentCommand { a: 0, b: -200 });
        assert_eq!(refresh.electrical_angle(Axis::Y).ticks(), 512);
    }

    #[test]
    fn disabled_motion_sends_nothing() {
        let engine = Engine::new();
        engine.enable(Axis::X);
        let mut refresh = SpiRefresh::new(&engine, RecordingBus::default(), Default::default());
        refresh.on_interrupt(0);
        assert!(refresh.bus().sent.is_empty());
    }

    #[test]
    fn busy_bus_counts_missed_and_faults_once() {
        let engine = Engine::new();
        setup(&engine, Axis::X, 0);
        let mut bus = RecordingBus::default();
        bus.busy = AxisMask::X;
        let mut refresh = SpiRefresh::new(&engine, bus, Default::default());

        let mut now = 0;
        for _ in 0..ALLOWED_MISSED_TX {
            refresh.on_interrupt(now);
            now += REFRESH_PERIOD_US;
        }
        assert_eq!(engine.missed_count(Axis::X), ALLOWED_MISSED_TX);
        assert!(engine.take_faults().is_empty());

        refresh.on_interrupt(now);
        assert_eq!(engine.take_faults(), AxisMask::X);
        assert_eq!(engine.missed_count(Axis::X), ALLOWED_MISSED_TX + 1);

        for _ in 0..100 {
            now += REFRESH_PERIOD_US;
            refresh.on_interrupt(now);
        }
        assert!(engine.take_faults().is_empty());
        assert_eq!(engine.status(Axis::X).fault_transitions, 1);
        assert!(refresh.bus().sent.is_empty());
    }

    #[test]
    fn missed_count_only_grows_on_busy_bus() {
        let engine = Engine::new();
        setup(&engine, Axis::X, 0);
        let mut refresh = SpiRefresh::new(&engine, RecordingBus::default(), Default::default());

        let mut last = 0;
        for i in 0..100u32 {
            refresh.bus_mut().busy = if i % 3 == 0 { AxisMask::X } else { AxisMask::empty() };
            refresh.on_interrupt(i * REFRESH_PERIOD_US);
            let missed = engine.missed_count(Axis::X);
            assert!(missed >= last);
            last = missed;
        }
        assert_eq!(last, 34);
        assert_eq!(engine.take_missed_count(Axis::X), 34);
        assert_eq!(engine.missed_count(Axis::X), 0);
    }

    #[test]
    fn late_ticks_are_telemetry_only() {
        let engine = Engine::new();
        setup(&engine, Axis::X, 0);
        let mut refresh = SpiRefresh::new(&engine, RecordingBus::default(), Default::default());
        refresh.on_interrupt(0);
        refresh.on_interrupt(25);
        refresh.on_interrupt(100);
        let status = engine.status(Axis::X);
        assert_eq!(status.late_ticks, 1);
        assert_eq!(status.missed_count, 0);
    }

    #[test]
    fn direction_picks_the_correction_table() {
        let engine = Engine::new();
        let mut set = CorrectionSet::IDENTITY;
        set.backward.term_mut(1).unwrap().sin = Sample::from_f32(0.1);
        engine.publish_correction(Axis::X, &set).unwrap();
        setup(&engine, Axis::X, 300);
        let mut refresh = SpiRefresh::new(&engine, RecordingBus::default(), Default::default());

        setup(&engine, Axis::X, 256);
        refresh.on_interrupt(0);
        // Moving backward, 1.1 * 200 at the peak
        assert_eq!(refresh.direction(Axis::X), Direction::Backward);
        assert_eq!(refresh.bus().sent[0].1.command().unwrap().a, 220);

        setup(&engine, Axis::X, 257);
        refresh.on_interrupt(25);
        assert_eq!(refresh.direction(Axis::X), Direction::Forward);
        assert_eq!(refresh.bus().sent[1].1.command().unwrap().a, 200);
    }

    #[test]
    fn reenabled_axis_keeps_its_direction() {
        let engine = Engine::new();
        setup(&engine, Axis::X, 0);
        let mut refresh = SpiRefresh::new(&engine, RecordingBus::default(), Default::default());

        setup(&engine, Axis::X, 10);
        refresh.on_interrupt(0);
        assert_eq!(refresh.direction(Axis::X), Direction::Forward);

        // Moved back by plain stepping while phase stepping was off
        engine.disable(Axis::X);
        engine.publish_motion(Axis::X, MotionSample {
            mechanical_position: -50,
            magnitude: Magnitude::from_units(200),
            enabled: true,
        }).unwrap();
        refresh.on_interrupt(25);
        assert_eq!(refresh.bus().sent.len(), 1);

        engine.enable(Axis::X);
        refresh.on_interrupt(50);
        assert_eq!(refresh.direction(Axis::X), Direction::Forward);
        assert_eq!(refresh.electrical_angle(Axis::X), ElectricalAngle::new(1024 - 50));

        setup(&engine, Axis::X, -60);
        refresh.on_interrupt(75);
        assert_eq!(refresh.direction(Axis::X), Direction::Backward);
    }

    #[test]
    fn inverted_axis_runs_the_other_way() {
        let engine = Engine::new();
        setup(&engine, Axis::X, 256);
        let config = AxisConfig { inverted: true, ..Default::default() };
        let refresh = SpiRefresh::new(&engine, RecordingBus::default(), [config, config]);
        assert_eq!(refresh.electrical_angle(Axis::X).ticks(), 768);
    }

    #[test]
    fn phase_origin_keeps_the_motor_still() {
        let engine = Engine::new();
        setup(&engine, Axis::X, 100);
        let refresh = SharedWithInterrupt::new(
            SpiRefresh::new(&engine, RecordingBus::default(), Default::default()));

        unsafe { refresh.lock_from_interrupt(|r| r.on_interrupt(0)) };
        refresh.lock(|r| r.set_phase_origin(Axis::X, 0));
        assert_eq!(refresh.lock(|r| r.electrical_angle(Axis::X)).ticks(), 100);

        setup(&engine, Axis::X, 10);
        unsafe { refresh.lock_from_interrupt(|r| r.on_interrupt(25)) };
        assert_eq!(refresh.lock(|r| r.electrical_angle(Axis::X)).ticks(), 110);
    }

    #[test]
    fn new_correction_is_seen_whole() {
        let engine = Engine::new();
        setup(&engine, Axis::X, 256);
        let mut refresh = SpiRefresh::new(&engine, RecordingBus::default(), Default::default());

        let mut set = CorrectionSet::IDENTITY;
        set.forward.term_mut(1).unwrap().sin = Sample::from_f32(-0.5);
        engine.publish_correction(Axis::X, &set).unwrap();
        refresh.on_interrupt(0);
        assert_eq!(refresh.bus().sent[0].1.command().unwrap().a, 100);
    }
}
