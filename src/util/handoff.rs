// SPDX-License-Identifier: GPL-3.0-or-later

// Lock free handoff of a small value from tasks to the refresh interrupt.
//
// The value lives in two banks of atomic words. A writer fills the inactive
// bank, flips `active`, and bumps `generation` before and after doing so.
// A reader takes the generation, copies the active bank, and checks the
// generation again. If it moved, the copy may be torn and is thrown away;
// the interrupt then keeps running on the value it had. Nothing here ever
// blocks the reader.
//
// Writers are serialized with a try-lock. A second writer gets `Busy`
// instead of waiting, since it may well be preempting the first one.

use core::marker::PhantomData;
use core::sync::atomic::{fence, AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};

pub trait Packed: Copy {
    const WORDS: usize;
    fn pack(&self, words: &mut [i32]);
    fn unpack(words: &[i32]) -> Self;
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PublishError {
    Busy,
}

pub struct Handoff<T: Packed, const N: usize> {
    banks: [[AtomicI32; N]; 2],
    active: AtomicUsize,
    generation: AtomicU32,
    writing: AtomicBool,
    _value: PhantomData<fn() -> T>,
}

impl<T: Packed, const N: usize> Handoff<T, N> {
    pub fn new(initial: T) -> Self {
        debug_assert_eq!(T::WORDS, N);

        let mut words = [0; N];
        initial.pack(&mut words);

        Self {
            banks: [
                core::array::from_fn(|i| AtomicI32::new(words[i])),
                core::array::from_fn(|_| AtomicI32::new(0)),
            ],
            active: AtomicUsize::new(0),
            generation: AtomicU32::new(0),
            writing: AtomicBool::new(false),
            _value: PhantomData,
        }
    }

    pub fn publish(&self, value: &T) -> Result<(), PublishError> {
        if self.writing.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_err() {
            return Err(PublishError::Busy);
        }

        let mut words = [0; N];
        value.pack(&mut words);

        let next = self.active.load(Ordering::Relaxed) ^ 1;
        self.generation.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
        for (slot, w) in self.banks[next].iter().zip(words) {
            slot.store(w, Ordering::Relaxed);
        }
        self.active.store(next, Ordering::Release);
        self.generation.fetch_add(1, Ordering::Release);

        self.writing.store(false, Ordering::Release);
        Ok(())
    }

    fn read_consistent(&self) -> Option<(u32, T)> {
        let g1 = self.generation.load(Ordering::Acquire);
        let bank = &self.banks[self.active.load(Ordering::Acquire)];

        let mut words = [0; N];
        for (w, slot) in words.iter_mut().zip(bank) {
            *w = slot.load(Ordering::Relaxed);
        }

        fence(Ordering::Acquire);
        let g2 = self.generation.load(Ordering::Relaxed);
        (g1 == g2).then(|| (g1, T::unpack(&words)))
    }

    /// Never blocks. `None` means a publish raced with us.
    pub fn try_read(&self) -> Option<T> {
        self.read_consistent().map(|(_, v)| v)
    }

    /// Like `try_read`, with the generation to give to `try_read_since`.
    pub fn try_snapshot(&self) -> Option<(u32, T)> {
        self.read_consistent()
    }

    /// Returns the value only if it was published after `seen`, and moves
    /// `seen` forward. Saves the unpacking when nothing changed.
    pub fn try_read_since(&self, seen: &mut u32) -> Option<T> {
        if self.generation.load(Ordering::Relaxed) == *seen {
            return None;
        }
        let (g, v) = self.read_consistent()?;
        *seen = g;
        Some(v)
    }

    // Task side only: spins for as long as a publish is in progress.
    pub fn snapshot(&self) -> (u32, T) {
        loop {
            if let Some(r) = self.read_consistent() {
                return r;
            }
            core::hint::spin_loop();
        }
    }

    pub fn read(&self) -> T {
        self.snapshot().1
    }

    // Makes publish() see another writer in the middle of its work.
    #[cfg(test)]
    pub(crate) fn hold_writer(&self, held: bool) {
        self.writing.store(held, Ordering::Release);
    }
}
