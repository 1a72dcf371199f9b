// SPDX-License-Identifier: GPL-3.0-or-later

mod shared_with_interrupt;
pub use shared_with_interrupt::*;

mod handoff;
pub use handoff::*;

mod double_buffer;
pub use double_buffer::*;
