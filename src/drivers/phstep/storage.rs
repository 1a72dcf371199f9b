// SPDX-License-Identifier: GPL-3.0-or-later

// Persisted corrections. One record per axis:
//   32 reserved bytes, all zeros for now
//   forward then backward table, each harmonic as sin then cos, i32 little endian

use crate::consts::phase_stepping::storage::*;
use crate::util::{Packed, PublishError};
use super::*;

pub const ENCODED_LEN: usize = RESERVED_HEADER_LEN + CORRECTION_WORDS * 4;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FormatError {
    Corrupted,
    UnsupportedVersion,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum StorageError<E> {
    Store(E),
    Format(FormatError),
    Busy,
}

impl<E> From<PublishError> for StorageError<E> {
    fn from(_: PublishError) -> Self {
        StorageError::Busy
    }
}

pub type StorageResult<T, E> = Result<T, StorageError<E>>;

// Backed by the config store on the printer. Errors are whatever the flash
// layer produces.
pub trait CorrectionStore {
    type Error: core::fmt::Debug;

    /// Returns false when nothing was ever saved for `axis`.
    fn read(&mut self, axis: Axis, buf: &mut [u8; ENCODED_LEN]) -> Result<bool, Self::Error>;
    fn write(&mut self, axis: Axis, buf: &[u8; ENCODED_LEN]) -> Result<(), Self::Error>;

    fn read_enabled(&mut self, axis: Axis) -> Result<Option<bool>, Self::Error>;
    fn write_enabled(&mut self, axis: Axis, enabled: bool) -> Result<(), Self::Error>;
}

pub fn encode_correction(set: &CorrectionSet) -> [u8; ENCODED_LEN] {
    let mut words = [0; CORRECTION_WORDS];
    set.pack(&mut words);

    let mut buf = [0; ENCODED_LEN];
    for (chunk, w) in buf[RESERVED_HEADER_LEN..].chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&w.to_le_bytes());
    }
    buf
}

pub fn decode_correction(buf: &[u8]) -> Result<CorrectionSet, FormatError> {
    if buf.len() != ENCODED_LEN {
        return Err(FormatError::Corrupted);
    }
    let (header, body) = buf.split_at(RESERVED_HEADER_LEN);
    if header.iter().any(|b| *b != 0) {
        return Err(FormatError::UnsupportedVersion);
    }

    let mut words = [0; CORRECTION_WORDS];
    for (w, chunk) in words.iter_mut().zip(body.chunks_exact(4)) {
        *w = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(CorrectionSet::unpack(&words))
}

pub fn save_correction<S: CorrectionStore>(engine: &Engine, store: &mut S, axis: Axis) -> StorageResult<(), S::Error> {
    let buf = encode_correction(&engine.correction(axis));
    store.write(axis, &buf).map_err(StorageError::Store)
}

// Boot time. A record we can't read is logged and left out, the axis then
// runs uncorrected. Only store failures are returned.
pub fn load_from_store<S: CorrectionStore>(engine: &Engine, store: &mut S) -> StorageResult<(), S::Error> {
    for axis in Axis::ALL {
        let mut buf = [0; ENCODED_LEN];
        if store.read(axis, &mut buf).map_err(StorageError::Store)? {
            match decode_correction(&buf) {
                Ok(set) => engine.publish_correction(axis, &set)?,
                Err(e) => warn!("Ignoring stored correction for {:?}: {:?}", axis, e),
            }
        }

        match store.read_enabled(axis).map_err(StorageError::Store)? {
            Some(true) => engine.enable(axis),
            Some(false) | None => engine.disable(axis),
        }
    }
    Ok(())
}
