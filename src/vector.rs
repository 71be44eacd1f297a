//! Trap numbers.
//!
//! The processor defines the exception vectors 0 through 19; vector 48 is
//! reserved by the kernel for system calls. Any other number that shows up
//! in a trap frame is classified as [Trap::Unknown] and still dispatched.

use core::fmt;

use crate::config::T_SYSCALL;

/// A classified trap vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trap {
  /// 0: divide error
  DivideError,
  /// 1: debug exception
  Debug,
  /// 2: non-maskable interrupt
  NonMaskableInterrupt,
  /// 3: breakpoint (`int3`)
  Breakpoint,
  /// 4: overflow (`into`)
  Overflow,
  /// 5: bounds check (`bound`)
  BoundRangeExceeded,
  /// 6: illegal opcode
  InvalidOpcode,
  /// 7: device not available
  DeviceNotAvailable,
  /// 8: double fault
  DoubleFault,
  /// 10: invalid task switch segment
  InvalidTss,
  /// 11: segment not present
  SegmentNotPresent,
  /// 12: stack exception
  StackFault,
  /// 13: general protection fault
  GeneralProtection,
  /// 14: page fault
  PageFault,
  /// 16: x87 floating point error
  FloatingPointError,
  /// 17: alignment check
  AlignmentCheck,
  /// 18: machine check
  MachineCheck,
  /// 19: SIMD floating point error
  SimdFloatingPoint,
  /// 48: system call
  Syscall,
  /// Any vector this kernel installs no gate for
  Unknown(u32),
}

impl Trap {
  /// Every vector that receives a gate, in vector order
  pub const DEFINED: [Trap; 19] = [
    Trap::DivideError,
    Trap::Debug,
    Trap::NonMaskableInterrupt,
    Trap::Breakpoint,
    Trap::Overflow,
    Trap::BoundRangeExceeded,
    Trap::InvalidOpcode,
    Trap::DeviceNotAvailable,
    Trap::DoubleFault,
    Trap::InvalidTss,
    Trap::SegmentNotPresent,
    Trap::StackFault,
    Trap::GeneralProtection,
    Trap::PageFault,
    Trap::FloatingPointError,
    Trap::AlignmentCheck,
    Trap::MachineCheck,
    Trap::SimdFloatingPoint,
    Trap::Syscall,
  ];

  /// Classify a raw vector number
  pub const fn from_number(trapno: u32) -> Trap {
    match trapno {
      0 => Trap::DivideError,
      1 => Trap::Debug,
      2 => Trap::NonMaskableInterrupt,
      3 => Trap::Breakpoint,
      4 => Trap::Overflow,
      5 => Trap::BoundRangeExceeded,
      6 => Trap::InvalidOpcode,
      7 => Trap::DeviceNotAvailable,
      8 => Trap::DoubleFault,
      10 => Trap::InvalidTss,
      11 => Trap::SegmentNotPresent,
      12 => Trap::StackFault,
      13 => Trap::GeneralProtection,
      14 => Trap::PageFault,
      16 => Trap::FloatingPointError,
      17 => Trap::AlignmentCheck,
      18 => Trap::MachineCheck,
      19 => Trap::SimdFloatingPoint,
      T_SYSCALL => Trap::Syscall,
      other => Trap::Unknown(other),
    }
  }

  /// The architectural vector number
  pub const fn number(self) -> u32 {
    match self {
      Trap::DivideError => 0,
      Trap::Debug => 1,
      Trap::NonMaskableInterrupt => 2,
      Trap::Breakpoint => 3,
      Trap::Overflow => 4,
      Trap::BoundRangeExceeded => 5,
      Trap::InvalidOpcode => 6,
      Trap::DeviceNotAvailable => 7,
      Trap::DoubleFault => 8,
      Trap::InvalidTss => 10,
      Trap::SegmentNotPresent => 11,
      Trap::StackFault => 12,
      Trap::GeneralProtection => 13,
      Trap::PageFault => 14,
      Trap::FloatingPointError => 16,
      Trap::AlignmentCheck => 17,
      Trap::MachineCheck => 18,
      Trap::SimdFloatingPoint => 19,
      Trap::Syscall => T_SYSCALL,
      Trap::Unknown(trapno) => trapno,
    }
  }

  /// Human readable name used in diagnostics
  pub const fn name(self) -> &'static str {
    match self {
      Trap::DivideError => "Divide error",
      Trap::Debug => "Debug",
      Trap::NonMaskableInterrupt => "Non-Maskable Interrupt",
      Trap::Breakpoint => "Breakpoint",
      Trap::Overflow => "Overflow",
      Trap::BoundRangeExceeded => "BOUND Range Exceeded",
      Trap::InvalidOpcode => "Invalid Opcode",
      Trap::DeviceNotAvailable => "Device Not Available",
      Trap::DoubleFault => "Double Fault",
      Trap::InvalidTss => "Invalid TSS",
      Trap::SegmentNotPresent => "Segment Not Present",
      Trap::StackFault => "Stack Fault",
      Trap::GeneralProtection => "General Protection",
      Trap::PageFault => "Page Fault",
      Trap::FloatingPointError => "x87 FPU Floating-Point Error",
      Trap::AlignmentCheck => "Alignment Check",
      Trap::MachineCheck => "Machine-Check",
      Trap::SimdFloatingPoint => "SIMD Floating-Point Exception",
      Trap::Syscall => "System call",
      // no gate is installed for the legacy coprocessor vector
      Trap::Unknown(9) => "Coprocessor Segment Overrun",
      Trap::Unknown(_) => "(unknown trap)",
    }
  }

  /// Whether the processor pushes an error code for this vector.
  /// For the others the entry stub pushes a zero in its place.
  pub const fn has_error_code(self) -> bool {
    matches!(
      self,
      Trap::DoubleFault
        | Trap::InvalidTss
        | Trap::SegmentNotPresent
        | Trap::StackFault
        | Trap::GeneralProtection
        | Trap::PageFault
        | Trap::AlignmentCheck
    )
  }

  /// Whether user-mode software may raise this vector with an `int`
  /// instruction. Every other gate is kernel only.
  pub const fn user_invocable(self) -> bool {
    matches!(self, Trap::Breakpoint | Trap::Syscall)
  }
}

impl fmt::Display for Trap {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.name(), self.number())
  }
}
