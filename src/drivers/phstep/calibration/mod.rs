// SPDX-License-Identifier: GPL-3.0-or-later

mod golden_search;
pub use golden_search::*;

mod analysis;
pub use analysis::*;

mod procedure;
pub use procedure::*;
