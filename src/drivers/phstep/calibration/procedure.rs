// SPDX-License-Identifier: GPL-3.0-or-later

// Calibration of the harmonic corrections.
//
// Idle -> PickAxis -> Enabling -> ProbingX -> ProbingY -> Ok | XFailed | YFailed -> Idle
//
// The Calibrator is stepped from the calibration task. Each step does at most
// one pair of measurements (forward and backward), so an abort is noticed
// quickly. Requests come in through a CalibrationControl shared with the UI.
//
// For each axis and each calibration phase (one harmonic):
//   Phase 1: Measure the baseline vibration with the table as it is.
//   Phase 2: Golden search the phase of the correction term.
//   Phase 3: Golden search its magnitude, with the phase found above.
// Forward and backward tables are searched at the same time. The phase score
// is best/baseline for each direction.
//
// Trial tables go live through the engine as they are tried. On failure or
// abort, every selected axis gets back the exact table it had before. While
// another writer holds a correction, the run stays in its state and puts the
// tables in place on the next step.

use core::f32::consts::TAU;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::consts::phase_stepping::{calibration::*, hardware::*};
use crate::phstep::*;
use super::GoldenSearch;

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct CalibrationPhase {
    pub harmonic: usize,
    pub speed: f32, // revolutions per second
    pub revs: f32, // length of one measurement move
    pub iterations: u8, // per search
    // Where the searches start. None: from the current table.
    pub pha: Option<f32>,
    pub mag: Option<f32>,
    pub pha_window: f32,
    pub mag_window: f32,
}

impl CalibrationPhase {
    fn new(harmonic: usize) -> Self {
        Self {
            harmonic,
            speed: DEFAULT_SPEED_RPS,
            revs: DEFAULT_REVOLUTIONS,
            iterations: DEFAULT_SEARCH_ITERATIONS,
            pha: None,
            mag: Some(DEFAULT_START_MAG),
            pha_window: TAU,
            mag_window: DEFAULT_MAG_WINDOW,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct CalibrationConfig {
    pub phases: [CalibrationPhase; 2],
    pub retry_count: u8,
    // Any score above this fails the axis.
    pub rejection_threshold: f32,
}

impl CalibrationConfig {
    fn is_valid(&self) -> bool {
        self.phases.iter().all(|p| (1..=CORRECTION_HARMONICS).contains(&p.harmonic))
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            phases: [CalibrationPhase::new(1), CalibrationPhase::new(2)],
            retry_count: RETRY_COUNT,
            rejection_threshold: DEFAULT_REJECTION_THRESHOLD,
        }
    }
}

/// Moves the axis and measures how much the machine vibrates.
pub trait ProbeRig {
    type Error: core::fmt::Debug;

    /// Moves `axis` by `phase.revs` revolutions at `phase.speed`, in
    /// `direction`, and returns the vibration at `phase.harmonic`.
    fn measure(&mut self, axis: Axis, phase: &CalibrationPhase, direction: Direction) -> Result<f32, Self::Error>;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CalibrationState {
    Idle,
    PickAxis,
    Enabling,
    ProbingX,
    ProbingY,
    Ok,
    XFailed,
    YFailed,
}

impl CalibrationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::XFailed | Self::YFailed)
    }

    fn probing(axis: Axis) -> Self {
        match axis {
            Axis::X => Self::ProbingX,
            Axis::Y => Self::ProbingY,
        }
    }

    fn failed(axis: Axis) -> Self {
        match axis {
            Axis::X => Self::XFailed,
            Axis::Y => Self::YFailed,
        }
    }
}

// Residual vibration relative to the baseline, for harmonic phase 1 and 2,
// forward and backward. Lower is better, 1.0 is no improvement.
#[derive(Clone, Copy, PartialEq, Default, Debug)]
pub struct Scores {
    pub p1f: f32,
    pub p1b: f32,
    pub p2f: f32,
    pub p2b: f32,
}

impl Scores {
    pub fn max(&self) -> f32 {
        [self.p1b, self.p2f, self.p2b].into_iter().fold(self.p1f, f32::max)
    }

    // NaN never passes.
    pub fn within(&self, threshold: f32) -> bool {
        [self.p1f, self.p1b, self.p2f, self.p2b].iter().all(|s| *s <= threshold)
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct CalibrationResult {
    pub axis: Axis,
    pub scores: Scores,
    pub correction: CorrectionSet,
    // false when the store refused the new table. It is live until reboot.
    pub persisted: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CalibrationError {
    // A calibration is already running. Requests are not queued.
    Busy,
    EmptySelection,
}

// The UI side of the calibration. Lives next to the Engine.
//
// Runs are numbered from 1. An abort names the run it was meant for, so one
// that comes in as a run ends can't cancel the next one.
pub struct CalibrationControl {
    in_flight: AtomicBool,
    requested: AtomicU8,
    run: AtomicU32,
    // Run to abort, 0 for none
    abort: AtomicU32,
}

impl CalibrationControl {
    pub const fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            requested: AtomicU8::new(0),
            run: AtomicU32::new(0),
            abort: AtomicU32::new(0),
        }
    }

    pub fn start(&self, axes: AxisMask) -> Result<(), CalibrationError> {
        if axes.is_empty() {
            return Err(CalibrationError::EmptySelection);
        }
        if self.in_flight.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(CalibrationError::Busy);
        }
        // Only the winner of in_flight gets here.
        let run = self.run.load(Ordering::Relaxed).wrapping_add(1).max(1);
        self.run.store(run, Ordering::Release);
        self.requested.store(axes.bits(), Ordering::Release);
        Ok(())
    }

    pub fn abort(&self) {
        let run = self.run.load(Ordering::Acquire);
        if self.is_busy() {
            self.abort_run(run);
        }
    }

    fn abort_run(&self, run: u32) {
        self.abort.store(run, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn take_request(&self) -> Option<AxisMask> {
        let axes = AxisMask::from_bits_truncate(self.requested.swap(0, Ordering::AcqRel));
        (!axes.is_empty()).then_some(axes)
    }

    fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::Acquire) == self.run.load(Ordering::Acquire)
    }

    fn finish(&self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

impl Default for CalibrationControl {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Stage {
    Baseline,
    Phase(u8),
    Magnitude(u8),
}

#[derive(Debug)]
enum ProbeFailure<E> {
    Measurement(E),
    Busy,
}

impl<E> From<crate::util::PublishError> for ProbeFailure<E> {
    fn from(_: crate::util::PublishError) -> Self {
        ProbeFailure::Busy
    }
}

enum Progress {
    Running,
    Done(Scores),
}

fn ratio(min: f32, baseline: f32) -> f32 {
    if baseline > 0.0 {
        min / baseline
    } else if min <= 0.0 {
        0.0
    } else {
        f32::INFINITY
    }
}

// Probing of a single axis. `working` is the table being built, and is what
// the engine runs with while probing.
struct AxisProbe {
    axis: Axis,
    phase_index: usize,
    stage: Stage,
    baseline: [f32; 2],
    start: [SpectralItem; 2],
    searches: [GoldenSearch; 2],
    working: CorrectionSet,
    scores: [[f32; 2]; 2],
}

impl AxisProbe {
    fn new(axis: Axis) -> Self {
        Self {
            axis,
            phase_index: 0,
            stage: Stage::Baseline,
            baseline: [0.0; 2],
            start: [SpectralItem::default(); 2],
            searches: [GoldenSearch::new(0.0, 0.0); 2],
            working: CorrectionSet::IDENTITY,
            scores: [[0.0; 2]; 2],
        }
    }

    fn apply(&mut self, harmonic: usize, direction: Direction, item: SpectralItem) {
        if let Some(term) = self.working.get_mut(direction).term_mut(harmonic) {
            *term = HarmonicTerm::from_spectral(item);
        }
    }

    fn measure_pair<R: ProbeRig>(
        &self,
        rig: &mut R,
        phase: &CalibrationPhase,
        retry_count: u8,
    ) -> Result<[f32; 2], ProbeFailure<R::Error>> {
        let mut attempt = 0;
        loop {
            let res = rig.measure(self.axis, phase, Direction::Forward)
                .and_then(|f| Ok([f, rig.measure(self.axis, phase, Direction::Backward)?]));
            match res {
                Ok(r) => return Ok(r),
                Err(e) => {
                    attempt += 1;
                    warn!("Measurement failed on {:?} (attempt {}): {:?}", self.axis, attempt, e);
                    if attempt >= retry_count.max(1) {
                        return Err(ProbeFailure::Measurement(e));
                    }
                }
            }
        }
    }

    fn advance<R: ProbeRig>(
        &mut self,
        config: &CalibrationConfig,
        engine: &Engine,
        rig: &mut R,
    ) -> Result<Progress, ProbeFailure<R::Error>> {
        let phase = config.phases[self.phase_index];
        let h = phase.harmonic;

        match self.stage {
            Stage::Baseline => {
                self.baseline = self.measure_pair(rig, &phase, config.retry_count)?;
                debug!("{:?} harmonic {}: baseline {:?}", self.axis, h, self.baseline);

                for (i, d) in Direction::ALL.into_iter().enumerate() {
                    let current = self.working.get(d).term(h).unwrap_or_default().spectral();
                    self.start[i] = SpectralItem {
                        mag: phase.mag.unwrap_or(current.mag),
                        pha: phase.pha.unwrap_or(current.pha),
                    };
                    self.searches[i] = GoldenSearch::around(self.start[i].pha, phase.pha_window);
                }
                self.stage = Stage::Phase(0);
            }

            Stage::Phase(i) if i < phase.iterations => {
                for (j, d) in Direction::ALL.into_iter().enumerate() {
                    let item = SpectralItem { mag: self.start[j].mag, pha: self.searches[j].point() };
                    self.apply(h, d, item);
                }
                engine.publish_correction(self.axis, &self.working)?;

                let [f, b] = self.measure_pair(rig, &phase, config.retry_count)?;
                self.searches[0].submit(f);
                self.searches[1].submit(b);
                debug!("{:?} harmonic {} phase search {}: {} {}", self.axis, h, i, f, b);
                self.stage = Stage::Phase(i + 1);
            }

            Stage::Phase(_) => {
                // Keep the best phase, then look for the magnitude around the start.
                for (j, d) in Direction::ALL.into_iter().enumerate() {
                    if let Some((pha, _)) = self.searches[j].best() {
                        self.start[j].pha = pha;
                    }
                    let item = self.start[j];
                    self.apply(h, d, item);
                    self.searches[j] = GoldenSearch::around(self.start[j].mag, phase.mag_window);
                }
                engine.publish_correction(self.axis, &self.working)?;
                self.stage = Stage::Magnitude(0);
            }

            Stage::Magnitude(i) if i < phase.iterations => {
                for (j, d) in Direction::ALL.into_iter().enumerate() {
                    let item = SpectralItem { mag: self.searches[j].point(), pha: self.start[j].pha };
                    self.apply(h, d, item);
                }
                engine.publish_correction(self.axis, &self.working)?;

                let [f, b] = self.measure_pair(rig, &phase, config.retry_count)?;
                self.searches[0].submit(f);
                self.searches[1].submit(b);
                debug!("{:?} harmonic {} magnitude search {}: {} {}", self.axis, h, i, f, b);
                self.stage = Stage::Magnitude(i + 1);
            }

            Stage::Magnitude(_) => {
                for (j, d) in Direction::ALL.into_iter().enumerate() {
                    let (mag, min) = self.searches[j].best().unwrap_or((self.start[j].mag, self.baseline[j]));
                    let item = SpectralItem { mag, pha: self.start[j].pha };
                    self.apply(h, d, item);
                    self.scores[self.phase_index][j] = ratio(min, self.baseline[j]);
                }
                engine.publish_correction(self.axis, &self.working)?;
                info!("{:?} harmonic {}: scores {:?}", self.axis, h, self.scores[self.phase_index]);

                if self.phase_index + 1 < config.phases.len() {
                    self.phase_index += 1;
                    self.stage = Stage::Baseline;
                } else {
                    let [[p1f, p1b], [p2f, p2b]] = self.scores;
                    return Ok(Progress::Done(Scores { p1f, p1b, p2f, p2b }));
                }
            }
        }

        Ok(Progress::Running)
    }
}

pub struct Calibrator<'c> {
    control: &'c CalibrationControl,
    config: CalibrationConfig,
    state: CalibrationState,
    selection: AxisMask,
    // What each selected axis had before the run
    snapshots: [Option<(CorrectionSet, bool)>; SUPPORTED_AXIS_COUNT],
    results: [Option<CalibrationResult>; SUPPORTED_AXIS_COUNT],
    probe: Option<AxisProbe>,
    // Where the run ends once its tables are published
    concluding: Option<CalibrationState>,
}

impl<'c> Calibrator<'c> {
    pub fn new(control: &'c CalibrationControl, config: CalibrationConfig) -> Self {
        Self {
            control,
            config,
            state: CalibrationState::Idle,
            selection: AxisMask::empty(),
            snapshots: [None; SUPPORTED_AXIS_COUNT],
            results: [None; SUPPORTED_AXIS_COUNT],
            probe: None,
            concluding: None,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    // Results of the last run, for the UI.
    pub fn result(&self, axis: Axis) -> Option<&CalibrationResult> {
        self.results[axis.index()].as_ref()
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: CalibrationConfig) -> Result<(), CalibrationError> {
        if self.control.is_busy() {
            return Err(CalibrationError::Busy);
        }
        self.config = config;
        Ok(())
    }

    // Back to uncorrected, without probing anything.
    pub fn restore_defaults<S: CorrectionStore>(
        &mut self,
        engine: &Engine,
        store: &mut S,
        axes: AxisMask,
    ) -> CommandResult<(), S::Error> {
        if self.control.is_busy() {
            return Err(CommandError::Busy);
        }
        for axis in axes.axes() {
            engine.publish_correction(axis, &CorrectionSet::IDENTITY)?;
            save_correction(engine, store, axis)?;
            info!("Restored default correction on {:?}", axis);
        }
        Ok(())
    }

    pub fn step<R: ProbeRig, S: CorrectionStore>(
        &mut self,
        engine: &Engine,
        rig: &mut R,
        store: &mut S,
    ) -> CalibrationState {
        let next = match (self.concluding, self.state) {
            (Some(target), _) => self.conclude(engine, store, target),
            (None, CalibrationState::Idle) => match self.control.take_request() {
                Some(axes) => {
                    self.selection = axes;
                    CalibrationState::PickAxis
                }
                None => CalibrationState::Idle,
            },
            (None, CalibrationState::PickAxis) => self.pick_axis(),
            (None, CalibrationState::Enabling) => self.enable_axes(engine, store),
            (None, CalibrationState::ProbingX) => self.probe(engine, rig, store, Axis::X),
            (None, CalibrationState::ProbingY) => self.probe(engine, rig, store, Axis::Y),
            (None, CalibrationState::Ok)
            | (None, CalibrationState::XFailed)
            | (None, CalibrationState::YFailed) => CalibrationState::Idle,
        };

        if next != self.state {
            debug!("Calibration: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
        self.state
    }

    fn pick_axis(&mut self) -> CalibrationState {
        self.results = [None; SUPPORTED_AXIS_COUNT];
        self.snapshots = [None; SUPPORTED_AXIS_COUNT];

        match self.selection.axes().next() {
            Some(_) if self.config.is_valid() => {
                info!("Calibrating {:?}", self.selection);
                CalibrationState::Enabling
            }
            Some(first) => {
                error!("Invalid calibration config: {:?}", self.config);
                self.control.finish();
                CalibrationState::failed(first)
            }
            None => {
                self.control.finish();
                CalibrationState::Idle
            }
        }
    }

    // Every selected axis starts from an identity table, a clean missed
    // transmission count, and phase stepping on.
    fn enable_axes<S: CorrectionStore>(&mut self, engine: &Engine, store: &mut S) -> CalibrationState {
        for axis in self.selection.axes() {
            self.snapshots[axis.index()] = Some((engine.correction(axis), engine.is_enabled(axis)));
        }

        for axis in self.selection.axes() {
            engine.disable(axis);
            if engine.publish_correction(axis, &CorrectionSet::IDENTITY).is_err() {
                warn!("Could not reset the correction of {:?}", axis);
                return self.conclude(engine, store, CalibrationState::failed(axis));
            }
            engine.take_missed_count(axis);
            engine.enable(axis);
        }

        self.next_axis(None)
    }

    fn next_axis(&mut self, after: Option<Axis>) -> CalibrationState {
        let next = self.selection.axes().find(|a| after.map_or(true, |after| *a > after));
        match next {
            Some(axis) => {
                self.probe = Some(AxisProbe::new(axis));
                CalibrationState::probing(axis)
            }
            None => {
                self.probe = None;
                CalibrationState::Ok
            }
        }
    }

    fn probe<R: ProbeRig, S: CorrectionStore>(
        &mut self,
        engine: &Engine,
        rig: &mut R,
        store: &mut S,
        axis: Axis,
    ) -> CalibrationState {
        if self.control.abort_requested() {
            warn!("Calibration aborted");
            return self.conclude(engine, store, CalibrationState::Idle);
        }

        let probe = match self.probe.as_mut() {
            Some(p) if p.axis == axis => p,
            _ => return self.conclude(engine, store, CalibrationState::failed(axis)),
        };

        match probe.advance(&self.config, engine, rig) {
            Ok(Progress::Running) => CalibrationState::probing(axis),
            Ok(Progress::Done(scores)) => {
                if !scores.within(self.config.rejection_threshold) {
                    warn!("Calibration of {:?} rejected: {:?}", axis, scores);
                    return self.conclude(engine, store, CalibrationState::failed(axis));
                }
                self.results[axis.index()] = Some(CalibrationResult {
                    axis,
                    scores,
                    correction: probe.working,
                    persisted: false,
                });

                match self.next_axis(Some(axis)) {
                    CalibrationState::Ok => self.conclude(engine, store, CalibrationState::Ok),
                    next => next,
                }
            }
            Err(e) => {
                warn!("Calibration of {:?} failed: {:?}", axis, e);
                self.conclude(engine, store, CalibrationState::failed(axis))
            }
        }
    }

    // Ends the run in `target`: Ok commits the results, anything else puts
    // the snapshots back. The control is released only once every table is
    // published.
    fn conclude<S: CorrectionStore>(
        &mut self,
        engine: &Engine,
        store: &mut S,
        target: CalibrationState,
    ) -> CalibrationState {
        self.probe = None;
        let published = match target {
            CalibrationState::Ok => self.commit(engine, store),
            _ => self.restore(engine),
        };

        if !published {
            if self.concluding.is_none() {
                warn!("Correction busy, calibration ends on the next step");
            }
            self.concluding = Some(target);
            return self.state;
        }

        if target == CalibrationState::Ok {
            info!("Calibration done");
        }
        self.concluding = None;
        self.control.finish();
        target
    }

    // Publishing is idempotent, so a partial commit is simply redone.
    fn commit<S: CorrectionStore>(&mut self, engine: &Engine, store: &mut S) -> bool {
        for axis in self.selection.axes() {
            if let Some(result) = self.results[axis.index()].as_mut() {
                if engine.publish_correction(axis, &result.correction).is_err() {
                    return false;
                }
                result.persisted = match save_correction(engine, store, axis) {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Failed to save the correction of {:?}: {:?}", axis, e);
                        false
                    }
                };
            }
            self.restore_enabled(engine, axis);
        }
        true
    }

    fn restore(&self, engine: &Engine) -> bool {
        let mut published = true;
        for axis in self.selection.axes() {
            if let Some((set, _)) = self.snapshots[axis.index()] {
                published &= engine.publish_correction(axis, &set).is_ok();
            }
            self.restore_enabled(engine, axis);
        }
        published
    }

    fn restore_enabled(&self, engine: &Engine, axis: Axis) {
        if let Some((_, was_enabled)) = self.snapshots[axis.index()] {
            if was_enabled {
                engine.enable(axis);
            } else {
                engine.disable(axis);
            }
        }
    }
}
