//! # MPU Isolation Setup
//!
//! One-time configuration of the ARMv7-M Memory Protection Unit,
//! partitioning the address space into kernel, task and peripheral regions.
//! Isolation is coarse by design: code is execute-only, RAM never executes,
//! the running task's stack carries a no-access trip-wire at its lowest
//! words, and the kernel's own flash range is reserved to privileged code.
//!
//! Too few hardware regions is graceful degradation, not failure: the part
//! boots with isolation skipped and a warning logged. A misaligned
//! base/size pairing, on the other hand, is a configuration bug and is
//! reported as [`KernelError::Misaligned`].
//!
//! Region priority on overlap is "highest index wins", which is why the
//! stack guard sits at a higher index than the stack region it punches a
//! hole into. The software stack canary lives at `base + GUARD_SIZE`,
//! directly above the band, so the tick-path sweep stays out of the
//! no-access region.
//!
//! The register encodings and the region plan are pure and host-tested;
//! only the thin `hw` layer at the bottom touches the memory-mapped unit.

use bitflags::bitflags;

use crate::error::KernelError;
use crate::task::StackRegion;

// Fixed memory map for the reference part (matches memory.x).
pub const FLASH_BASE: u32 = 0x0800_0000;
pub const FLASH_SIZE: usize = 512 * 1024;
pub const RAM_BASE: u32 = 0x2000_0000;
pub const RAM_SIZE: usize = 128 * 1024;
pub const PERIPH_BASE: u32 = 0x4000_0000;
pub const PERIPH_SIZE: usize = 512 * 1024 * 1024;
/// Flash prefix holding kernel code and rodata, privileged-only.
pub const KERNEL_FLASH_SIZE: usize = 64 * 1024;

pub use crate::config::GUARD_SIZE;

bitflags! {
    /// MPU_CTRL bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MpuCtrl: u32 {
        /// Turn the unit on.
        const ENABLE = 1 << 0;
        /// Keep the MPU active in HardFault and NMI handlers.
        const HFNMIENA = 1 << 1;
        /// Privileged code falls back to the default memory map where no
        /// region matches.
        const PRIVDEFENA = 1 << 2;
    }
}

bitflags! {
    /// Per-region attribute bits beyond the access-permission field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionAttrs: u32 {
        /// Instruction fetches from this region fault.
        const EXECUTE_NEVER = 1 << 0;
        /// Strongly-ordered device memory (peripheral space).
        const DEVICE = 1 << 1;
    }
}

/// ARMv7-M AP-field encodings actually used by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AccessPerm {
    /// No access at any privilege level.
    NoAccess = 0b000,
    /// Privileged read-write, unprivileged no access.
    PrivilegedOnly = 0b001,
    /// Read-write at any privilege level.
    ReadWrite = 0b011,
    /// Read-only at any privilege level.
    ReadOnly = 0b110,
}

/// RASR size class: a region covers `1 << (field + 1)` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSize(u8);

impl RegionSize {
    /// Size class for `bytes`, which must be a power of two of at least 32.
    pub const fn from_bytes(bytes: usize) -> Option<Self> {
        if bytes >= 32 && bytes.is_power_of_two() {
            Some(Self(bytes.trailing_zeros() as u8 - 1))
        } else {
            None
        }
    }

    /// Region size in bytes.
    pub const fn bytes(self) -> usize {
        1 << (self.0 + 1)
    }

    const fn field(self) -> u32 {
        self.0 as u32
    }
}

// RBAR/RASR bit positions.
const RBAR_VALID: u32 = 1 << 4;
const RASR_ENABLE: u32 = 1 << 0;
const RASR_SIZE_SHIFT: u32 = 1;
const RASR_B: u32 = 1 << 16;
const RASR_C: u32 = 1 << 17;
const RASR_S: u32 = 1 << 18;
const RASR_AP_SHIFT: u32 = 24;
const RASR_XN: u32 = 1 << 28;

/// One validated MPU region: index, aligned base, size class, permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpuRegion {
    index: u8,
    base: u32,
    size: RegionSize,
    perm: AccessPerm,
    attrs: RegionAttrs,
}

impl MpuRegion {
    /// Build a region, rejecting a base that is not aligned to the region
    /// size. Alignment problems are configuration bugs, never runtime
    /// conditions to recover from.
    pub fn new(
        index: u8,
        base: u32,
        size: RegionSize,
        perm: AccessPerm,
        attrs: RegionAttrs,
    ) -> Result<Self, KernelError> {
        if base as usize % size.bytes() != 0 {
            return Err(KernelError::Misaligned);
        }
        Ok(Self {
            index,
            base,
            size,
            perm,
            attrs,
        })
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size_bytes(&self) -> usize {
        self.size.bytes()
    }

    pub fn perm(&self) -> AccessPerm {
        self.perm
    }

    pub fn attrs(&self) -> RegionAttrs {
        self.attrs
    }

    /// Region Base Address Register value: aligned base, VALID, index.
    pub fn rbar(&self) -> u32 {
        self.base | RBAR_VALID | self.index as u32
    }

    /// Region Attribute and Size Register value.
    pub fn rasr(&self) -> u32 {
        let mut v = RASR_ENABLE | (self.size.field() << RASR_SIZE_SHIFT);
        v |= (self.perm as u32) << RASR_AP_SHIFT;
        if self.attrs.contains(RegionAttrs::EXECUTE_NEVER) {
            v |= RASR_XN;
        }
        if self.attrs.contains(RegionAttrs::DEVICE) {
            // Shareable device memory: TEX=0, C=0, B=1, S=1.
            v |= RASR_B | RASR_S;
        } else {
            // Normal write-back memory: C=1, B=1.
            v |= RASR_C | RASR_B;
        }
        v
    }
}

/// The fixed, ordered region set the kernel programs at boot:
///
/// | idx | range                         | access                  |
/// |-----|-------------------------------|-------------------------|
/// | 0   | flash                         | read-only, executable   |
/// | 1   | RAM                           | read-write, no execute  |
/// | 2   | peripheral space              | read-write, XN, device  |
/// | 3   | first task's stack            | read-write, no execute  |
/// | 4   | stack guard (lowest 32 bytes) | no access (trip-wire)   |
/// | 5   | kernel flash prefix           | privileged only         |
///
/// The guard and kernel regions deliberately overlap their parents at a
/// higher index so they take precedence.
pub fn region_plan(task_stack: StackRegion) -> Result<[MpuRegion; 6], KernelError> {
    let stack_size =
        RegionSize::from_bytes(task_stack.size()).ok_or(KernelError::Misaligned)?;
    let flash = RegionSize::from_bytes(FLASH_SIZE).ok_or(KernelError::Misaligned)?;
    let ram = RegionSize::from_bytes(RAM_SIZE).ok_or(KernelError::Misaligned)?;
    let periph = RegionSize::from_bytes(PERIPH_SIZE).ok_or(KernelError::Misaligned)?;
    let guard = RegionSize::from_bytes(GUARD_SIZE).ok_or(KernelError::Misaligned)?;
    let kernel = RegionSize::from_bytes(KERNEL_FLASH_SIZE).ok_or(KernelError::Misaligned)?;

    Ok([
        MpuRegion::new(0, FLASH_BASE, flash, AccessPerm::ReadOnly, RegionAttrs::empty())?,
        MpuRegion::new(1, RAM_BASE, ram, AccessPerm::ReadWrite, RegionAttrs::EXECUTE_NEVER)?,
        MpuRegion::new(
            2,
            PERIPH_BASE,
            periph,
            AccessPerm::ReadWrite,
            RegionAttrs::EXECUTE_NEVER | RegionAttrs::DEVICE,
        )?,
        MpuRegion::new(
            3,
            task_stack.base() as u32,
            stack_size,
            AccessPerm::ReadWrite,
            RegionAttrs::EXECUTE_NEVER,
        )?,
        MpuRegion::new(
            4,
            task_stack.base() as u32,
            guard,
            AccessPerm::NoAccess,
            RegionAttrs::EXECUTE_NEVER,
        )?,
        MpuRegion::new(
            5,
            FLASH_BASE,
            kernel,
            AccessPerm::PrivilegedOnly,
            RegionAttrs::empty(),
        )?,
    ])
}

// ---------------------------------------------------------------------------
// Hardware access (Cortex-M only)
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod hw {
    use super::MpuCtrl;

    const MPU_TYPE: *const u32 = 0xE000_ED90 as *const u32;
    const MPU_CTRL: *mut u32 = 0xE000_ED94 as *mut u32;
    const MPU_RNR: *mut u32 = 0xE000_ED98 as *mut u32;
    const MPU_RBAR: *mut u32 = 0xE000_ED9C as *mut u32;
    const MPU_RASR: *mut u32 = 0xE000_EDA0 as *mut u32;

    /// Number of regions this part implements (MPU_TYPE.DREGION).
    pub fn region_count() -> u8 {
        unsafe { (core::ptr::read_volatile(MPU_TYPE) >> 8) as u8 }
    }

    pub unsafe fn write_region(index: u8, rbar: u32, rasr: u32) {
        core::ptr::write_volatile(MPU_RNR, index as u32);
        core::ptr::write_volatile(MPU_RBAR, rbar);
        core::ptr::write_volatile(MPU_RASR, rasr);
    }

    pub unsafe fn set_ctrl(ctrl: MpuCtrl) {
        core::ptr::write_volatile(MPU_CTRL, ctrl.bits());
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }
}

/// Program one region. The unit must be disabled while regions change.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn mpu_region(region: &MpuRegion) {
    unsafe { hw::write_region(region.index(), region.rbar(), region.rasr()) };
}

/// Enable the unit. Always the last step of configuration.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn mpu_enable() {
    unsafe { hw::set_ctrl(MpuCtrl::ENABLE | MpuCtrl::PRIVDEFENA | MpuCtrl::HFNMIENA) };
}

/// Program the full isolation plan around `task_stack` and switch the unit
/// on.
///
/// A part with fewer than [`crate::config::MIN_MPU_REGIONS`] regions boots without
/// isolation — degraded, logged, not fatal. Misaligned configuration is a
/// build bug and comes back as an error.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn mpu_init(task_stack: StackRegion) -> Result<(), KernelError> {
    let regions = hw::region_count();
    if regions < crate::config::MIN_MPU_REGIONS {
        log::warn!("mpu: only {} regions, isolation disabled", regions);
        return Ok(());
    }

    let plan = region_plan(task_stack)?;
    unsafe { hw::set_ctrl(MpuCtrl::empty()) };
    for region in plan.iter() {
        mpu_region(region);
    }
    mpu_enable();
    log::info!("mpu: isolation enabled, {} regions", plan.len());
    Ok(())
}
