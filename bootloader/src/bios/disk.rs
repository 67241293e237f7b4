/// INT 13h Disk Services
///
/// Classic CHS reads for old controllers and packet-interface (EBIOS)
/// reads for everything else. Transfers land in the low-memory buffer the
/// firmware can address and are copied out to the caller.

use crate::bios::realmode::{RealModeContext, RealModeExecutor, TRANSFER_BUF_ADDR, TRANSFER_BUF_LEN};
use crate::bios::{DiskServices, DriveGeometry, SECTOR_SIZE};
use crate::error::{BootError, Result};

/// Disk address packet location, just below the transfer buffer.
const DAP_ADDR: u32 = 0x7F00;

/// Well-known INT 13h status bytes.
const ERROR_NAMES: &[(u8, &str)] = &[
    (0x10, "Media error"),
    (0x11, "Corrected ECC error"),
    (0x20, "Controller or device error"),
    (0x40, "Seek failed"),
    (0x80, "Device timeout"),
    (0xAA, "Drive not ready"),
];

/// Describe a firmware status byte for diagnostics.
pub fn error_name(status: u8) -> &'static str {
    ERROR_NAMES
        .iter()
        .find(|(code, _)| *code == status)
        .map(|(_, name)| *name)
        .unwrap_or("Error")
}

pub struct BiosDiskServices<'a> {
    exec: &'a RealModeExecutor,
}

impl<'a> BiosDiskServices<'a> {
    pub fn new(exec: &'a RealModeExecutor) -> Self {
        Self { exec }
    }

    /// INT 13h AH=41h: packet interface installation check.
    fn check_ebios(&self, device: u32) -> bool {
        let mut ctx = RealModeContext::new();
        ctx.set_ah(0x41);
        ctx.ebx = 0x55AA;
        ctx.edx = device & 0xFF;
        if unsafe { self.exec.execute_int(0x13, &mut ctx) }.is_err() {
            return false;
        }
        // Function supported, signature echoed, drive-access bit set.
        !ctx.carry() && (ctx.ebx & 0xFFFF) == 0xAA55 && (ctx.ecx & 0x1) != 0
    }

    /// INT 13h AH=4B01h: CD emulation status. A drive booted with no
    /// emulation presents 2 KiB blocks.
    fn check_no_emulation(&self, device: u32) -> bool {
        // 0x13-byte specification packet, returned at DS:SI.
        unsafe {
            core::ptr::write_bytes(DAP_ADDR as *mut u8, 0, 0x13);
            *(DAP_ADDR as *mut u8) = 0x13;
        }
        let mut ctx = RealModeContext::new();
        ctx.set_ax(0x4B01);
        ctx.edx = device & 0xFF;
        ctx.set_ds_si(DAP_ADDR);
        if unsafe { self.exec.execute_int(0x13, &mut ctx) }.is_err() {
            return false;
        }
        if ctx.carry() {
            return false;
        }
        let media_type = unsafe { *((DAP_ADDR + 1) as *const u8) };
        media_type & 0x0F == 0
    }

    fn copy_from_transfer_buf(buf: &mut [u8]) {
        let src = unsafe { core::slice::from_raw_parts(TRANSFER_BUF_ADDR as *const u8, buf.len()) };
        buf.copy_from_slice(src);
    }

    fn copy_to_transfer_buf(buf: &[u8]) {
        let dst = unsafe { core::slice::from_raw_parts_mut(TRANSFER_BUF_ADDR as *mut u8, buf.len()) };
        dst.copy_from_slice(buf);
    }

    /// Build the disk address packet for an AH=42h/43h transfer.
    fn write_dap(block: u64, count: u32) {
        unsafe {
            let dap = DAP_ADDR as *mut u8;
            core::ptr::write_bytes(dap, 0, 16);
            *dap = 16; // packet size
            *(dap.add(2) as *mut u16) = count as u16;
            *(dap.add(4) as *mut u16) = (TRANSFER_BUF_ADDR & 0xFFFF) as u16;
            *(dap.add(6) as *mut u16) = ((TRANSFER_BUF_ADDR >> 4) & 0xF000) as u16;
            *(dap.add(8) as *mut u64) = block;
        }
    }

    fn packet_io(&self, op: u8, device: u32, block: u64, count: u32, len: usize) -> Result {
        if len > TRANSFER_BUF_LEN {
            return Err(BootError::BufferOverflow("disk transfer"));
        }
        Self::write_dap(block, count);
        let mut ctx = RealModeContext::new();
        ctx.set_ah(op);
        ctx.edx = device & 0xFF;
        ctx.set_ds_si(DAP_ADDR);
        unsafe { self.exec.execute_int(0x13, &mut ctx) }?;
        if ctx.carry() {
            let status = ctx.ah();
            log::trace!("int13 fn {:02X} dev {:#x} status {:02X} ({})", op, device, status, error_name(status));
            return Err(BootError::DiskRead(status));
        }
        Ok(())
    }
}

impl DiskServices for BiosDiskServices<'_> {
    fn geometry(&mut self, device: u32) -> Result<DriveGeometry> {
        // INT 13h AH=08h: legacy drive parameters.
        let mut ctx = RealModeContext::new();
        ctx.set_ah(0x08);
        ctx.edx = device & 0xFF;
        unsafe { self.exec.execute_int(0x13, &mut ctx) }?;
        if ctx.carry() {
            return Err(BootError::GeometryUnavailable);
        }
        let cl = (ctx.ecx & 0xFF) as u32;
        let ch = ((ctx.ecx >> 8) & 0xFF) as u32;
        let dh = ((ctx.edx >> 8) & 0xFF) as u32;
        let spt = cl & 0x3F;
        if spt == 0 {
            return Err(BootError::GeometryUnavailable);
        }
        Ok(DriveGeometry {
            sectors_per_track: spt,
            heads: dh + 1,
            cylinders: (ch | ((cl & 0xC0) << 2)) + 1,
            ebios: self.check_ebios(device),
            no_emulation: self.check_no_emulation(device),
        })
    }

    fn read_chs(
        &mut self,
        device: u32,
        cylinder: u32,
        head: u32,
        sector: u32,
        count: u32,
        buf: &mut [u8],
    ) -> Result {
        if buf.len() > TRANSFER_BUF_LEN || buf.len() < count as usize * SECTOR_SIZE {
            return Err(BootError::BufferOverflow("disk transfer"));
        }
        let mut ctx = RealModeContext::new();
        ctx.set_ah(0x02);
        ctx.set_al(count as u8);
        // CL carries sector 1..63 plus cylinder bits 8-9.
        ctx.ecx = (((cylinder & 0xFF) << 8) | ((sector + 1) & 0x3F) | ((cylinder >> 2) & 0xC0)) & 0xFFFF;
        ctx.edx = (((head & 0xFF) << 8) | (device & 0xFF)) & 0xFFFF;
        ctx.set_es_bx(TRANSFER_BUF_ADDR);
        unsafe { self.exec.execute_int(0x13, &mut ctx) }?;
        if ctx.carry() {
            let status = ctx.ah();
            log::trace!("int13 chs read dev {:#x} status {:02X} ({})", device, status, error_name(status));
            return Err(BootError::DiskRead(status));
        }
        Self::copy_from_transfer_buf(&mut buf[..count as usize * SECTOR_SIZE]);
        Ok(())
    }

    fn read_lba(&mut self, device: u32, block: u64, count: u32, buf: &mut [u8]) -> Result {
        self.packet_io(0x42, device, block, count, buf.len())?;
        Self::copy_from_transfer_buf(buf);
        Ok(())
    }

    fn write_lba(&mut self, device: u32, block: u64, count: u32, buf: &[u8]) -> Result {
        Self::copy_to_transfer_buf(buf);
        self.packet_io(0x43, device, block, count, buf.len())
    }
}
