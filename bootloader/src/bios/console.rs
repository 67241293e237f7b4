/// INT 10h Text Console
///
/// Teletype output on video page zero. Newlines are expanded to CRLF so
/// log lines and menu text can use plain `\n`.

use core::fmt;

use crate::bios::realmode::{RealModeContext, RealModeExecutor};
use crate::bios::ConsoleOut;

/// Rows of the standard text mode.
pub const SCREEN_ROWS: u8 = 25;

/// Columns of the standard text mode.
pub const SCREEN_COLS: u8 = 80;

pub struct BiosConsole<'a> {
    exec: &'a RealModeExecutor,
}

impl<'a> BiosConsole<'a> {
    pub fn new(exec: &'a RealModeExecutor) -> Self {
        Self { exec }
    }

    /// INT 10h AH=0Eh: teletype one byte at the cursor.
    fn teletype(&self, byte: u8) {
        let mut ctx = RealModeContext::new();
        ctx.set_ah(0x0E);
        ctx.set_al(byte);
        ctx.ebx = 0x0007; // page 0, light grey
        let _ = unsafe { self.exec.execute_int(0x10, &mut ctx) };
    }

    pub fn put_char(&self, c: char) {
        if c == '\n' {
            self.teletype(b'\r');
        }
        self.teletype(if c.is_ascii() { c as u8 } else { b'?' });
    }

    /// INT 10h AH=02h: move the cursor.
    pub fn set_cursor(&self, row: u8, col: u8) {
        let mut ctx = RealModeContext::new();
        ctx.set_ah(0x02);
        ctx.edx = (((row as u32) << 8) | col as u32) & 0xFFFF;
        let _ = unsafe { self.exec.execute_int(0x10, &mut ctx) };
    }

    /// INT 10h AH=03h: current cursor position as (row, col).
    pub fn cursor(&self) -> (u8, u8) {
        let mut ctx = RealModeContext::new();
        ctx.set_ah(0x03);
        if unsafe { self.exec.execute_int(0x10, &mut ctx) }.is_err() {
            return (0, 0);
        }
        (((ctx.edx >> 8) & 0xFF) as u8, (ctx.edx & 0xFF) as u8)
    }

    /// INT 10h AH=06h: blank the whole screen and home the cursor.
    pub fn clear_screen(&self) {
        let mut ctx = RealModeContext::new();
        ctx.set_ax(0x0600);
        ctx.ebx = 0x0700;
        ctx.ecx = 0;
        ctx.edx = (((SCREEN_ROWS as u32 - 1) << 8) | (SCREEN_COLS as u32 - 1)) & 0xFFFF;
        let _ = unsafe { self.exec.execute_int(0x10, &mut ctx) };
        self.set_cursor(0, 0);
    }

    /// Blank the rest of the current line.
    pub fn clear_to_end_of_line(&self) {
        let (row, col) = self.cursor();
        for _ in col..SCREEN_COLS {
            self.teletype(b' ');
        }
        self.set_cursor(row, col);
    }
}

impl ConsoleOut for BiosConsole<'_> {
    fn write_str(&self, s: &str) {
        for c in s.chars() {
            self.put_char(c);
        }
    }
}

/// `core::fmt` adapter over any console sink.
pub struct ConsoleWriter<'a>(pub &'a dyn ConsoleOut);

impl fmt::Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}
