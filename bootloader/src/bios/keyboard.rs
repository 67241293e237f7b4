/// INT 16h Keyboard Services

use crate::bios::realmode::{RealModeContext, RealModeExecutor};
use crate::bios::{KeyboardServices, ShiftFlags};

/// Keys the menu and countdown care about, as `scan << 8 | ascii`.
pub mod keys {
    pub const RETURN: u16 = 0x1C0D;
    pub const ESCAPE: u16 = 0x011B;
    pub const BACKSPACE: u16 = 0x0E08;
    pub const TAB: u16 = 0x0F09;
    pub const UP_ARROW: u16 = 0x4800;
    pub const DOWN_ARROW: u16 = 0x5000;
    pub const F5: u16 = 0x3F00;
    pub const F8: u16 = 0x4200;
    pub const F10: u16 = 0x4400;

    /// Mask selecting the ASCII half of a keystroke.
    pub const ASCII_MASK: u16 = 0x7F;
}

pub struct BiosKeyboard<'a> {
    exec: &'a RealModeExecutor,
}

impl<'a> BiosKeyboard<'a> {
    pub fn new(exec: &'a RealModeExecutor) -> Self {
        Self { exec }
    }
}

impl KeyboardServices for BiosKeyboard<'_> {
    fn key_available(&mut self) -> bool {
        // INT 16h AH=01h: zero flag set means the buffer is empty.
        let mut ctx = RealModeContext::new();
        ctx.set_ah(0x01);
        if unsafe { self.exec.execute_int(0x16, &mut ctx) }.is_err() {
            return false;
        }
        !ctx.zero()
    }

    fn read_key(&mut self) -> u16 {
        // INT 16h AH=00h blocks until a keystroke arrives.
        let mut ctx = RealModeContext::new();
        if unsafe { self.exec.execute_int(0x16, &mut ctx) }.is_err() {
            return 0;
        }
        ctx.ax()
    }

    fn shift_flags(&mut self) -> ShiftFlags {
        // INT 16h AH=02h returns the modifier bitmap in AL.
        let mut ctx = RealModeContext::new();
        ctx.set_ah(0x02);
        if unsafe { self.exec.execute_int(0x16, &mut ctx) }.is_err() {
            return ShiftFlags::empty();
        }
        ShiftFlags::from_bits_truncate(ctx.al())
    }
}

#[cfg(test)]
mod tests {
    use super::keys;

    #[test]
    fn test_ascii_mask_strips_scan_code() {
        assert_eq!(keys::RETURN & keys::ASCII_MASK, 0x0D);
        assert_eq!(keys::F8 & keys::ASCII_MASK, 0, "function keys carry no ASCII");
        assert_eq!((b'v' as u16) & keys::ASCII_MASK, b'v' as u16);
    }
}
