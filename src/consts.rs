// SPDX-License-Identifier: GPL-3.0-or-later

pub mod phase_stepping {
    pub mod hardware {
        pub const SUPPORTED_AXIS_COUNT: usize = 2;

        // Ticks per electrical revolution (4 full steps).
        pub const MOTOR_PERIOD: u32 = 1024;
        // The sine table is oversampled so that harmonics land on exact entries.
        pub const SIN_FRACTION: u32 = 4;
        pub const SIN_PERIOD: usize = (SIN_FRACTION * MOTOR_PERIOD) as usize;
        pub const SIN_LUT_FRACTIONAL: u32 = 15;

        pub const MAG_FRACTIONAL: u32 = 8;
        // In driver command units. Leaves some headroom for the corrections.
        pub const CURRENT_AMPLITUDE: i32 = 248;
        // XDIRECT coil currents are 9 bit signed.
        pub const COMMAND_LIMIT: i32 = 255;

        pub const CORRECTION_HARMONICS: usize = 16;

        // 256 microsteps times 4 full steps
        pub const DEFAULT_MICROSTEPS_PER_PERIOD: u32 = 1024;
    }

    pub mod refresh {
        // The timer runs at 1Mhz, everything below is in us.
        pub const TICK_FREQ: u32 = 1_000_000;
        pub const REFRESH_FREQ: u32 = 40_000;
        // With burst mode, the DMA free runs the step edges and we can afford
        // to come back 4 times less often.
        pub const BURST_REFRESH_FREQ: u32 = 10_000;

        pub const REFRESH_PERIOD_US: u32 = TICK_FREQ / REFRESH_FREQ;
        pub const BURST_REFRESH_PERIOD_US: u32 = TICK_FREQ / BURST_REFRESH_FREQ;

        // Worst case time spent in the interrupt. Used to tell if a tick came late.
        pub const UPDATE_DURATION_US: u32 = 20;

        // Once an axis misses more than this, phase stepping is turned off for it.
        pub const ALLOWED_MISSED_TX: u32 = 5000;
    }

    pub mod burst {
        // 200 slots over one 100us burst period: 2Mhz slot rate.
        pub const GPIO_BUFFER_SIZE: usize = 200;
        // A step needs a rising and a falling slot, and slot 0 is for the dir pin.
        pub const MAX_STEPS_PER_BURST: u32 = (GPIO_BUFFER_SIZE as u32 - 1) / 2;
    }

    pub mod calibration {
        pub const RETRY_COUNT: u8 = 4;
        // Calibration is rejected when any score is above this. Tune on the
        // actual machine; a score of 1.0 means no improvement at all.
        pub const DEFAULT_REJECTION_THRESHOLD: f32 = 0.8;

        pub const DEFAULT_SPEED_RPS: f32 = 2.0;
        pub const DEFAULT_REVOLUTIONS: f32 = 1.0;
        pub const DEFAULT_SEARCH_ITERATIONS: u8 = 12;
        // Starting amplitude when the current table has none for the harmonic.
        pub const DEFAULT_START_MAG: f32 = 0.02;
        pub const DEFAULT_MAG_WINDOW: f32 = 0.04;

        // The first few accelerometer samples are stale (FIFO content from before the move).
        pub const STALE_SAMPLE_COUNT: usize = 20;
    }

    pub mod storage {
        // Leaves room for a header in future revisions. Must be all zeros today.
        pub const RESERVED_HEADER_LEN: usize = 32;
    }
}
