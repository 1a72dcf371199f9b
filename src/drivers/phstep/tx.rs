// SPDX-License-Identifier: GPL-3.0-or-later

// The driver side of the SPI refresh: a TMC2130 style XDIRECT write per axis
// per tick, sent by DMA.

use super::{Axis, CurrentCommand};

const WRITE_FLAG: u8 = 0x80;
pub const XDIRECT_REGISTER: u8 = 0x2D;
pub const FRAME_LEN: usize = 5;

const COIL_MASK: u32 = 0x1FF;

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct TxFrame(pub [u8; FRAME_LEN]);

impl TxFrame {
    // Register address, then the 32 bit data word MSB first. Coil A goes in
    // the low 9 bits, coil B at bit 16.
    pub fn xdirect(cmd: CurrentCommand) -> Self {
        let data = ((cmd.b as u32 & COIL_MASK) << 16) | (cmd.a as u32 & COIL_MASK);
        let mut frame = [0; FRAME_LEN];
        frame[0] = WRITE_FLAG | XDIRECT_REGISTER;
        frame[1..].copy_from_slice(&data.to_be_bytes());
        Self(frame)
    }

    pub fn command(&self) -> Option<CurrentCommand> {
        if self.0[0] != WRITE_FLAG | XDIRECT_REGISTER {
            return None;
        }
        let mut data = [0; 4];
        data.copy_from_slice(&self.0[1..]);
        let data = u32::from_be_bytes(data);
        // sign extend the 9 bit values
        let coil = |v: u32| (((v & COIL_MASK) << 23) as i32 >> 23) as i16;
        Some(CurrentCommand { a: coil(data), b: coil(data >> 16) })
    }
}

pub trait DriverBus {
    /// True while the frame last submitted for `axis` is still on the wire.
    fn is_busy(&self, axis: Axis) -> bool;

    /// Starts the transfer. `frame` is not written again until `is_busy`
    /// returns false for that axis.
    fn submit(&mut self, axis: Axis, frame: &TxFrame);
}
