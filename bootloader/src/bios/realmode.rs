/// Real Mode INT Bridge
///
/// BIOS services only exist in real mode, so every call drops back through
/// a dispatch thunk installed by the stage-one glue. The executor owns the
/// register context marshalling; the thunk itself is a flat function
/// pointer so tests can install a scripted firmware instead.

use crate::error::{BootError, Result};

/// Low-memory transfer buffer shared with the firmware. INT 13h reads land
/// here before being copied out; the buffer must stay below 1 MiB.
pub const TRANSFER_BUF_ADDR: u32 = 0x8000;

/// Size of the transfer buffer.
pub const TRANSFER_BUF_LEN: usize = 0x8000;

/// Register file handed to and returned from a real-mode INT call.
///
/// The stage-one thunk reads this frame by byte offset, so the layout
/// is part of the hand-off ABI.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RealModeContext {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u16,
    pub ds: u16,
    /// EFLAGS after the call; carry signals failure for most services.
    pub eflags: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<RealModeContext>(), 32);

impl RealModeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ah(&self) -> u8 {
        ((self.eax >> 8) & 0xFF) as u8
    }

    pub fn al(&self) -> u8 {
        (self.eax & 0xFF) as u8
    }

    pub fn ax(&self) -> u16 {
        (self.eax & 0xFFFF) as u16
    }

    pub fn set_ah(&mut self, val: u8) {
        self.eax = (self.eax & 0xFFFF_00FF) | ((val as u32) << 8);
    }

    pub fn set_al(&mut self, val: u8) {
        self.eax = (self.eax & 0xFFFF_FF00) | (val as u32);
    }

    pub fn set_ax(&mut self, val: u16) {
        self.eax = (self.eax & 0xFFFF_0000) | (val as u32);
    }

    pub fn carry(&self) -> bool {
        self.eflags & 0x1 != 0
    }

    pub fn zero(&self) -> bool {
        self.eflags & 0x40 != 0
    }

    /// Point ES:BX at a low-memory physical address.
    pub fn set_es_bx(&mut self, addr: u32) {
        self.es = ((addr >> 4) & 0xF000) as u16;
        self.ebx = addr & 0xFFFF;
    }

    /// Point DS:SI at a low-memory physical address.
    pub fn set_ds_si(&mut self, addr: u32) {
        self.ds = ((addr >> 4) & 0xF000) as u16;
        self.esi = addr & 0xFFFF;
    }
}

/// Signature of the mode-switch thunk. The thunk saves protected-mode
/// state, loads the context, issues `int <n>`, and stores the resulting
/// registers and flags back into the context.
pub type IntDispatch = unsafe fn(int_num: u8, ctx: &mut RealModeContext);

/// Issues BIOS interrupts through the installed dispatch thunk.
pub struct RealModeExecutor {
    dispatch: Option<IntDispatch>,
}

impl RealModeExecutor {
    pub const fn new() -> Self {
        Self { dispatch: None }
    }

    /// Install the mode-switch thunk. Called once during early startup,
    /// before any firmware service is used.
    pub fn init(&mut self, dispatch: IntDispatch) {
        self.dispatch = Some(dispatch);
    }

    pub fn is_initialized(&self) -> bool {
        self.dispatch.is_some()
    }

    /// Execute a BIOS interrupt with the given register context.
    ///
    /// # Safety
    ///
    /// The context must describe a call the firmware can service; buffer
    /// pointers in it must reference valid low memory.
    pub unsafe fn execute_int(&self, int_num: u8, ctx: &mut RealModeContext) -> Result {
        let dispatch = self.dispatch.ok_or(BootError::NotInitialized)?;
        unsafe { dispatch(int_num, ctx) };
        Ok(())
    }
}

impl Default for RealModeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_accessors() {
        let mut ctx = RealModeContext::new();
        ctx.set_ah(0x42);
        ctx.set_al(0x11);
        assert_eq!(ctx.ax(), 0x4211);
        ctx.set_ax(0x0201);
        assert_eq!(ctx.ah(), 0x02);
        assert_eq!(ctx.al(), 0x01);
    }

    #[test]
    fn test_flag_bits() {
        let mut ctx = RealModeContext::new();
        assert!(!ctx.carry());
        ctx.eflags = 0x41;
        assert!(ctx.carry());
        assert!(ctx.zero());
    }

    #[test]
    fn test_segment_offset_split() {
        let mut ctx = RealModeContext::new();
        ctx.set_es_bx(0x8000);
        assert_eq!(ctx.es, 0);
        assert_eq!(ctx.ebx, 0x8000);
        ctx.set_es_bx(0x1_2345);
        assert_eq!(ctx.es, 0x1000);
        assert_eq!(ctx.ebx, 0x2345);
    }

    #[test]
    fn test_uninitialized_executor_refuses_calls() {
        let exec = RealModeExecutor::new();
        let mut ctx = RealModeContext::new();
        let err = unsafe { exec.execute_int(0x13, &mut ctx) }.unwrap_err();
        assert_eq!(err, BootError::NotInitialized);
    }

    #[test]
    fn test_dispatch_receives_context() {
        fn fake(int_num: u8, ctx: &mut RealModeContext) {
            assert_eq!(int_num, 0x16);
            ctx.set_ax(0x1C0D);
        }
        let mut exec = RealModeExecutor::new();
        exec.init(fake);
        let mut ctx = RealModeContext::new();
        unsafe { exec.execute_int(0x16, &mut ctx) }.unwrap();
        assert_eq!(ctx.ax(), 0x1C0D);
    }
}
