// SPDX-License-Identifier: GPL-3.0-or-later

// What the gcode layer can do to phase stepping outside of calibration:
// turn it on and off per axis, and inspect or hand edit the correction tables.

use crate::consts::phase_stepping::hardware::*;
use crate::util::PublishError;
use super::*;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CommandError<E> {
    // Tables can only be edited while phase stepping is off on the axis.
    AxisEnabled(Axis),
    InvalidHarmonic(usize),
    Busy,
    Store(E),
}

impl<E> From<PublishError> for CommandError<E> {
    fn from(_: PublishError) -> Self {
        CommandError::Busy
    }
}

impl<E> From<StorageError<E>> for CommandError<E> {
    fn from(e: StorageError<E>) -> Self {
        match e {
            StorageError::Store(e) => CommandError::Store(e),
            StorageError::Format(_) | StorageError::Busy => CommandError::Busy,
        }
    }
}

pub type CommandResult<T, E> = Result<T, CommandError<E>>;

pub fn set_enabled<S: CorrectionStore>(
    engine: &Engine,
    store: &mut S,
    axes: AxisMask,
    enabled: bool,
) -> CommandResult<(), S::Error> {
    for axis in axes.axes() {
        if enabled {
            engine.enable(axis);
        } else {
            engine.disable(axis);
        }
        store.write_enabled(axis, enabled).map_err(CommandError::Store)?;
    }
    Ok(())
}

pub fn read_correction(engine: &Engine, axis: Axis, direction: Direction) -> [SpectralItem; CORRECTION_HARMONICS] {
    let set = engine.correction(axis);
    let mut items = [SpectralItem::default(); CORRECTION_HARMONICS];
    for ((_, term), item) in set.get(direction).terms().zip(items.iter_mut()) {
        *item = term.spectral();
    }
    items
}

fn ensure_disabled<E>(engine: &Engine, axis: Axis) -> CommandResult<(), E> {
    if engine.is_enabled(axis) {
        return Err(CommandError::AxisEnabled(axis));
    }
    Ok(())
}

pub fn write_correction_term<S: CorrectionStore>(
    engine: &Engine,
    store: &mut S,
    axis: Axis,
    direction: Direction,
    harmonic: usize,
    item: SpectralItem,
) -> CommandResult<(), S::Error> {
    ensure_disabled::<S::Error>(engine, axis)?;

    let mut set = engine.correction(axis);
    let term = set.get_mut(direction).term_mut(harmonic)
        .ok_or(CommandError::InvalidHarmonic(harmonic))?;
    *term = HarmonicTerm::from_spectral(item);

    engine.publish_correction(axis, &set)?;
    save_correction(engine, store, axis)?;
    Ok(())
}

pub fn reset_correction<S: CorrectionStore>(
    engine: &Engine,
    store: &mut S,
    axes: AxisMask,
) -> CommandResult<(), S::Error> {
    for axis in axes.axes() {
        ensure_disabled::<S::Error>(engine, axis)?;
    }
    for axis in axes.axes() {
        engine.publish_correction(axis, &CorrectionSet::IDENTITY)?;
        save_correction(engine, store, axis)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::testing::*;

    #[test]
    fn enable_is_persisted() {
        let engine = Engine::new();
        let mut store = MemStore::default();
        set_enabled(&engine, &mut store, AxisMask::all(), true).unwrap();
        assert!(engine.is_enabled(Axis::X) && engine.is_enabled(Axis::Y));
        set_enabled(&engine, &mut store, AxisMask::Y, false).unwrap();
        assert!(!engine.is_enabled(Axis::Y));
        assert_eq!(store.enabled, [Some(true), Some(false)]);
    }

    #[test]
    fn edit_needs_a_disabled_axis() {
        let engine = Engine::new();
        let mut store = MemStore::default();
        engine.enable(Axis::X);
        let item = SpectralItem { mag: 0.01, pha: 0.5 };
        assert_eq!(
            write_correction_term(&engine, &mut store, Axis::X, Direction::Forward, 2, item),
            Err(CommandError::AxisEnabled(Axis::X)),
        );
        assert_eq!(
            reset_correction(&engine, &mut store, AxisMask::X),
            Err(CommandError::AxisEnabled(Axis::X)),
        );
        assert_eq!(engine.correction(Axis::X), CorrectionSet::IDENTITY);
    }

    #[test]
    fn edit_and_read_back() {
        let engine = Engine::new();
        let mut store = MemStore::default();
        let item = SpectralItem { mag: 0.01, pha: 0.5 };
        write_correction_term(&engine, &mut store, Axis::Y, Direction::Backward, 4, item).unwrap();

        let items = read_correction(&engine, Axis::Y, Direction::Backward);
        assert!((items[3].mag - 0.01).abs() < 1e-4);
        assert!((items[3].pha - 0.5).abs() < 1e-2);
        assert_eq!(read_correction(&engine, Axis::Y, Direction::Forward)[3].mag, 0.0);
        assert!(store.records[Axis::Y.index()].is_some());

        assert_eq!(
            write_correction_term(&engine, &mut store, Axis::Y, Direction::Backward, 17, item),
            Err(CommandError::InvalidHarmonic(17)),
        );

        reset_correction(&engine, &mut store, AxisMask::Y).unwrap();
        assert_eq!(engine.correction(Axis::Y), CorrectionSet::IDENTITY);
    }
}
