//! System call bridge.
//!
//! User code loads the call number into `eax` and up to five arguments
//! into `edx`, `ecx`, `ebx`, `edi` and `esi`, in that order, then executes
//! `int $T_SYSCALL`. The result comes back in `eax`.

use crate::frame::{PushRegs, TrapFrame};

/// The kernel's system call entry point
pub trait Syscalls {
  /// Run system call `num`. Validating the arguments is up to the callee.
  fn syscall(&mut self, num: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32) -> i32;
}

impl<F> Syscalls for F
where
  F: FnMut(u32, u32, u32, u32, u32, u32) -> i32,
{
  fn syscall(&mut self, num: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32) -> i32 {
    self(num, a1, a2, a3, a4, a5)
  }
}

/// A system call decoded from the saved registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallArgs {
  /// Call number
  pub num: u32,
  /// Positional arguments
  pub args: [u32; 5],
}

impl SyscallArgs {
  /// Apply the register convention
  pub fn decode(regs: &PushRegs) -> Self {
    SyscallArgs {
      num: regs.eax,
      args: [regs.edx, regs.ecx, regs.ebx, regs.edi, regs.esi],
    }
  }
}

/// Run the system call described by `frame` and store its result in the
/// frame's return register. Nothing else in the frame changes.
pub fn dispatch<S: Syscalls + ?Sized>(frame: &mut TrapFrame, syscalls: &mut S) -> i32 {
  let SyscallArgs { num, args: [a1, a2, a3, a4, a5] } = SyscallArgs::decode(&frame.regs);
  let ret = syscalls.syscall(num, a1, a2, a3, a4, a5);
  frame.set_return_value(ret);
  ret
}
