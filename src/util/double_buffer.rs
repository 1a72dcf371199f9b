// SPDX-License-Identifier: GPL-3.0-or-later

// Two halves of a DMA buffer. The CPU only ever writes the next half; the
// other one belongs to the hardware until its transfer completes.
pub struct DoubleBuffer<T> {
    halves: [T; 2],
    next: usize,
}

impl<T> DoubleBuffer<T> {
    pub fn new(first: T, second: T) -> Self {
        Self { halves: [first, second], next: 0 }
    }

    pub fn next(&self) -> &T {
        &self.halves[self.next]
    }

    pub fn next_mut(&mut self) -> &mut T {
        &mut self.halves[self.next]
    }

    pub fn in_flight(&self) -> &T {
        &self.halves[self.next ^ 1]
    }

    // Call right after handing next() to the hardware.
    pub fn swap(&mut self) {
        self.next ^= 1;
    }
}

impl<T: Copy> DoubleBuffer<T> {
    pub fn filled(v: T) -> Self {
        Self::new(v, v)
    }
}
