/// INT 1Ah Timer Ticks
///
/// The firmware counts timer ticks at 18.2 Hz since midnight. The raw
/// counter wraps daily; callers only ever difference nearby readings, so a
/// monotonic extension is not needed.

use crate::bios::realmode::{RealModeContext, RealModeExecutor};
use crate::bios::TickSource;

pub struct BiosTicks<'a> {
    exec: &'a RealModeExecutor,
}

impl<'a> BiosTicks<'a> {
    pub fn new(exec: &'a RealModeExecutor) -> Self {
        Self { exec }
    }
}

impl TickSource for BiosTicks<'_> {
    fn ticks(&mut self) -> u64 {
        // INT 1Ah AH=00h: tick count in CX:DX.
        let mut ctx = RealModeContext::new();
        if unsafe { self.exec.execute_int(0x1A, &mut ctx) }.is_err() {
            return 0;
        }
        (((ctx.ecx & 0xFFFF) as u64) << 16) | ((ctx.edx & 0xFFFF) as u64)
    }
}
