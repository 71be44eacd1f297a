//! This module contains the global descriptor table of the kernel
//! and the task state that tells the CPU which stack to use when a
//! trap arrives from user mode.

use core::fmt;
use core::mem::size_of;

use x86_64::structures::gdt::SegmentSelector;
use x86_64::PrivilegeLevel;

use crate::config::GDT_ENTRIES;

/// Executable segment
pub const STA_X: u8 = 0x8;
/// Writeable (data) segment
pub const STA_W: u8 = 0x2;
/// Readable (code) segment
pub const STA_R: u8 = 0x2;
/// Available 32-bit task state segment
pub const STS_T32A: u8 = 0x9;

/// The 32-bit task state segment. The kernel only uses it for `esp0` and
/// `ss0`, the stack the processor switches to on a user to kernel trap.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TaskState {
  link: u32,
  /// Stack pointer loaded on a switch to ring 0
  pub esp0: u32,
  /// Stack segment loaded on a switch to ring 0
  pub ss0: u16,
  padding1: u16,
  esp1: u32,
  ss1: u16,
  padding2: u16,
  esp2: u32,
  ss2: u16,
  padding3: u16,
  cr3: u32,
  eip: u32,
  eflags: u32,
  eax: u32,
  ecx: u32,
  edx: u32,
  ebx: u32,
  esp: u32,
  ebp: u32,
  esi: u32,
  edi: u32,
  es: u16,
  padding4: u16,
  cs: u16,
  padding5: u16,
  ss: u16,
  padding6: u16,
  ds: u16,
  padding7: u16,
  fs: u16,
  padding8: u16,
  gs: u16,
  padding9: u16,
  ldt: u16,
  padding10: u16,
  t: u16,
  /// Offset of the I/O permission bitmap
  pub iomb: u16,
}

const _: () = assert!(size_of::<TaskState>() == 104);

impl TaskState {
  /// A task state that switches to `esp0:ss0` on privilege elevation.
  /// The I/O bitmap is placed past the segment limit, so user code gets
  /// no port access.
  pub fn new(esp0: u32, ss0: SegmentSelector) -> Self {
    TaskState {
      esp0,
      ss0: ss0.0,
      iomb: size_of::<TaskState>() as u16,
      ..TaskState::default()
    }
  }
}

/// A legacy 8-byte segment descriptor:
///
/// Bits    Name        Description
/// 0-15    limit_low   segment limit 15:0
/// 16-39   base_low    segment base 23:0
/// 40-43   type        STA_* / STS_* type
/// 44      s           0: system, 1: code or data
/// 45-46   dpl         descriptor privilege level
/// 47      p           present
/// 48-51   limit_high  segment limit 19:16
/// 52      avl         free for software use
/// 53      reserved
/// 54      db          0: 16-bit, 1: 32-bit
/// 55      g           limit scaled by 4K
/// 56-63   base_high   segment base 31:24
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SegmentDescriptor(u64);

impl SegmentDescriptor {
  /// The null descriptor
  pub const fn null() -> Self {
    SegmentDescriptor(0)
  }

  fn build(typ: u8, system: bool, base: u32, limit: u32, dpl: PrivilegeLevel, granular: bool) -> Self {
    let base = base as u64;
    let limit = limit as u64;
    let mut bits = limit & 0xffff;
    bits |= (base & 0xff_ffff) << 16;
    bits |= ((typ & 0xf) as u64) << 40;
    if !system {
      bits |= 1 << 44;
    }
    bits |= (dpl as u64) << 45;
    bits |= 1 << 47;
    bits |= ((limit >> 16) & 0xf) << 48;
    bits |= 1 << 54;
    if granular {
      bits |= 1 << 55;
    }
    bits |= ((base >> 24) & 0xff) << 56;
    SegmentDescriptor(bits)
  }

  /// A flat 4GB code or data segment
  pub fn flat(typ: u8, dpl: PrivilegeLevel) -> Self {
    Self::build(typ, false, 0, 0xffff_ffff >> 12, dpl, true)
  }

  /// A system descriptor referencing a task state segment
  pub fn task_state(tss: &'static TaskState) -> Self {
    let base = tss as *const TaskState as usize as u32;
    Self::build(
      STS_T32A,
      true,
      base,
      size_of::<TaskState>() as u32,
      PrivilegeLevel::Ring0,
      false,
    )
  }

  /// Segment base address
  pub fn base(&self) -> u32 {
    ((self.0 >> 16) & 0xff_ffff) as u32 | (((self.0 >> 56) & 0xff) << 24) as u32
  }

  /// Segment limit, unscaled
  pub fn limit(&self) -> u32 {
    (self.0 & 0xffff) as u32 | (((self.0 >> 48) & 0xf) << 16) as u32
  }

  /// Type field
  pub fn typ(&self) -> u8 {
    ((self.0 >> 40) & 0xf) as u8
  }

  /// Whether this is a system (TSS, gate) descriptor
  pub fn is_system(&self) -> bool {
    self.0 & (1 << 44) == 0
  }

  /// Descriptor privilege level
  pub fn privilege_level(&self) -> PrivilegeLevel {
    PrivilegeLevel::from_u16(((self.0 >> 45) & 3) as u16)
  }

  /// Present bit
  pub fn is_present(&self) -> bool {
    self.0 & (1 << 47) != 0
  }

  /// Raw descriptor bits
  pub fn bits(&self) -> u64 {
    self.0
  }
}

impl fmt::Debug for SegmentDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SegmentDescriptor")
      .field("base", &format_args!("{:#x}", self.base()))
      .field("limit", &format_args!("{:#x}", self.limit()))
      .field("type", &self.typ())
      .field("system", &self.is_system())
      .field("dpl", &self.privilege_level())
      .field("present", &self.is_present())
      .finish()
  }
}

/// Errors raised while editing the descriptor table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GdtError {
  /// The selector points past the end of the table
  OutOfRange(SegmentSelector),
  /// Slot 0 is the null descriptor and cannot be replaced
  NullSelector,
}

impl fmt::Display for GdtError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GdtError::OutOfRange(selector) => {
        write!(f, "selector {:#x} is outside the descriptor table", selector.0)
      }
      GdtError::NullSelector => write!(f, "the null descriptor cannot be replaced"),
    }
  }
}

/// Global descriptor table with flat kernel and user segments and one
/// slot for the task state descriptor:
///
/// 0x00 null, 0x08 kernel text, 0x10 kernel data,
/// 0x18 user text, 0x20 user data, 0x28 task state
#[derive(Debug, Clone)]
#[repr(C)]
pub struct GlobalDescriptorTable {
  entries: [SegmentDescriptor; GDT_ENTRIES],
}

impl GlobalDescriptorTable {
  /// The kernel's segment layout, with an empty task state slot
  pub fn new() -> Self {
    GlobalDescriptorTable {
      entries: [
        SegmentDescriptor::null(),
        SegmentDescriptor::flat(STA_X | STA_R, PrivilegeLevel::Ring0),
        SegmentDescriptor::flat(STA_W, PrivilegeLevel::Ring0),
        SegmentDescriptor::flat(STA_X | STA_R, PrivilegeLevel::Ring3),
        SegmentDescriptor::flat(STA_W, PrivilegeLevel::Ring3),
        SegmentDescriptor::null(),
      ],
    }
  }

  /// Descriptor a selector refers to
  pub fn entry(&self, selector: SegmentSelector) -> Option<SegmentDescriptor> {
    self.entries.get(selector.index() as usize).copied()
  }

  /// Install `descriptor` in the slot named by `selector`
  pub fn set_entry(
    &mut self,
    selector: SegmentSelector,
    descriptor: SegmentDescriptor,
  ) -> Result<(), GdtError> {
    let index = selector.index() as usize;
    if index == 0 {
      return Err(GdtError::NullSelector);
    }
    let slot = self
      .entries
      .get_mut(index)
      .ok_or(GdtError::OutOfRange(selector))?;
    *slot = descriptor;
    Ok(())
  }

  /// Install the task state descriptor for `tss`.
  /// * `&'static TaskState` the CPU keeps reading the task state after
  /// this returns, so it has to live for the rest of the kernel.
  pub fn set_task_state(
    &mut self,
    selector: SegmentSelector,
    tss: &'static TaskState,
  ) -> Result<(), GdtError> {
    self.set_entry(selector, SegmentDescriptor::task_state(tss))
  }
}

impl Default for GlobalDescriptorTable {
  fn default() -> Self {
    Self::new()
  }
}
