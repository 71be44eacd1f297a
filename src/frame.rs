//! The trap frame built by the entry stubs.
//!
//! Every stub pushes the same record before calling into the router, so
//! the layout below is shared with assembly and must not change:
//!
//! | offset | field |
//! |--------|-------|
//! | 0      | general registers, in `pushal` order |
//! | 32     | `es`, padded to 32 bits |
//! | 36     | `ds`, padded to 32 bits |
//! | 40     | trap number |
//! | 44     | error code, zero when the vector has none |
//! | 48     | `eip` |
//! | 52     | `cs`, padded to 32 bits |
//! | 56     | `eflags` |
//! | 60     | `esp`, only valid after a privilege change |
//! | 64     | `ss`, padded, only valid after a privilege change |

use core::fmt;

use x86_64::structures::gdt::SegmentSelector;
use x86_64::PrivilegeLevel;

use crate::vector::Trap;

/// General registers as pushed by `pushal`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct PushRegs {
  /// edi
  pub edi: u32,
  /// esi
  pub esi: u32,
  /// ebp
  pub ebp: u32,
  /// esp at the time of `pushal`, ignored on restore
  pub oesp: u32,
  /// ebx
  pub ebx: u32,
  /// edx
  pub edx: u32,
  /// ecx
  pub ecx: u32,
  /// eax
  pub eax: u32,
}

impl fmt::Display for PushRegs {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "  edi  0x{:08x}", self.edi)?;
    writeln!(f, "  esi  0x{:08x}", self.esi)?;
    writeln!(f, "  ebp  0x{:08x}", self.ebp)?;
    writeln!(f, "  oesp 0x{:08x}", self.oesp)?;
    writeln!(f, "  ebx  0x{:08x}", self.ebx)?;
    writeln!(f, "  edx  0x{:08x}", self.edx)?;
    writeln!(f, "  ecx  0x{:08x}", self.ecx)?;
    writeln!(f, "  eax  0x{:08x}", self.eax)
  }
}

/// Processor state captured on trap entry
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
  /// General registers
  pub regs: PushRegs,
  /// Extra data segment
  pub es: u16,
  padding1: u16,
  /// Data segment
  pub ds: u16,
  padding2: u16,
  /// Raw vector number
  pub trapno: u32,
  /// Hardware error code, or zero
  pub err: u32,
  /// Interrupted instruction pointer
  pub eip: u32,
  /// Interrupted code segment
  pub cs: u16,
  padding3: u16,
  /// Interrupted flags register
  pub eflags: u32,
  /// Interrupted stack pointer, only pushed on a privilege change
  pub esp: u32,
  /// Interrupted stack segment, only pushed on a privilege change
  pub ss: u16,
  padding4: u16,
}

const _: () = {
  use core::mem::{offset_of, size_of};
  assert!(size_of::<PushRegs>() == 32);
  assert!(size_of::<TrapFrame>() == 68);
  assert!(offset_of!(TrapFrame, es) == 32);
  assert!(offset_of!(TrapFrame, ds) == 36);
  assert!(offset_of!(TrapFrame, trapno) == 40);
  assert!(offset_of!(TrapFrame, err) == 44);
  assert!(offset_of!(TrapFrame, eip) == 48);
  assert!(offset_of!(TrapFrame, cs) == 52);
  assert!(offset_of!(TrapFrame, eflags) == 56);
  assert!(offset_of!(TrapFrame, esp) == 60);
  assert!(offset_of!(TrapFrame, ss) == 64);
};

impl TrapFrame {
  /// A zeroed frame for vector `trapno` interrupted in segment `cs`
  pub fn new(trapno: u32, cs: SegmentSelector) -> Self {
    TrapFrame {
      trapno,
      cs: cs.0,
      ..TrapFrame::default()
    }
  }

  /// Classified vector of this frame
  pub fn trap(&self) -> Trap {
    Trap::from_number(self.trapno)
  }

  /// Interrupted code segment selector
  pub fn code_segment(&self) -> SegmentSelector {
    SegmentSelector(self.cs)
  }

  /// Privilege level of the interrupted code, taken from the low two
  /// bits of `cs`
  pub fn privilege(&self) -> PrivilegeLevel {
    self.code_segment().rpl()
  }

  /// Whether the trap came from user mode. Rings 1 and 2 count as kernel.
  pub fn from_user(&self) -> bool {
    self.privilege() == PrivilegeLevel::Ring3
  }

  /// The hardware error code, for the vectors that have one
  pub fn error_code(&self) -> Option<u32> {
    if self.trap().has_error_code() {
      Some(self.err)
    } else {
      None
    }
  }

  /// The interrupted stack, which the processor only pushes when the trap
  /// crossed from user to kernel privilege
  pub fn user_stack(&self) -> Option<(u32, SegmentSelector)> {
    if self.from_user() {
      Some((self.esp, SegmentSelector(self.ss)))
    } else {
      None
    }
  }

  /// Store a system call result where the interrupted code expects it
  pub fn set_return_value(&mut self, value: i32) {
    self.regs.eax = value as u32;
  }

  /// Value in the return register
  pub fn return_value(&self) -> i32 {
    self.regs.eax as i32
  }
}

impl fmt::Display for TrapFrame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "TRAP frame at {:p}", self)?;
    write!(f, "{}", self.regs)?;
    writeln!(f, "  es   0x----{:04x}", self.es)?;
    writeln!(f, "  ds   0x----{:04x}", self.ds)?;
    writeln!(f, "  trap 0x{:08x} {}", self.trapno, self.trap().name())?;
    writeln!(f, "  err  0x{:08x}", self.err)?;
    writeln!(f, "  eip  0x{:08x}", self.eip)?;
    writeln!(f, "  cs   0x----{:04x}", self.cs)?;
    writeln!(f, "  flag 0x{:08x}", self.eflags)?;
    if let Some((esp, ss)) = self.user_stack() {
      writeln!(f, "  esp  0x{:08x}", esp)?;
      writeln!(f, "  ss   0x----{:04x}", ss.0)?;
    }
    Ok(())
  }
}
