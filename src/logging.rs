// SPDX-License-Identifier: GPL-3.0-or-later

use log::{Record, Metadata, LevelFilter};

struct Logger;

impl log::Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            rtt_target::rprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }
    fn flush(&self) {}
}

static LOGGER: Logger = Logger;

// Must be called before the refresh interrupt is unmasked. The engine never
// logs from the interrupt, but faults are drained and logged from tasks.
pub fn init_logging() {
    rtt_target::rtt_init_print!(NoBlockSkip, 4096);
    // Only fails if a logger was already installed, which is fine.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Debug);
}
