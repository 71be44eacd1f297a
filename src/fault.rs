//! Page fault policy: a fault in the kernel halts the machine, a fault in
//! user mode destroys the environment that caused it. Nothing is ever
//! remapped or retried.

use core::fmt::Write;

use log::debug;
use x86_64::structures::idt::PageFaultErrorCode;

use crate::cpu::Cpu;
use crate::env::Exit;
use crate::frame::TrapFrame;
use crate::trap::{Action, Fatal, Origin};

/// Handle a page fault described by `frame`
pub(crate) fn page_fault<C, W>(origin: Origin, frame: &TrapFrame, cpu: &C, console: &mut W) -> Action
where
  C: Cpu + ?Sized,
  W: Write + ?Sized,
{
  // cr2 is overwritten by the next fault, read it before anything else
  let va = cpu.fault_address();
  let err = PageFaultErrorCode::from_bits_truncate(frame.err as u64);

  let env = match origin {
    Origin::Kernel => {
      let _ = write!(console, "{}", frame);
      return Action::Halt(Fatal::KernelPageFault { va, eip: frame.eip });
    }
    Origin::User(env) => env,
  };

  debug!("user page fault in {} at {:08x} ({:?})", env, va, err);
  let _ = writeln!(
    console,
    "[{}] user fault va {:08x} ip {:08x} {}",
    env,
    va,
    frame.eip,
    describe(err)
  );
  let _ = write!(console, "{}", frame);

  Action::Destroy(
    env,
    Exit::PageFault {
      va,
      eip: frame.eip,
      err,
    },
  )
}

/// Short description of a page fault error code, e.g. `[write, not-present]`
fn describe(err: PageFaultErrorCode) -> Describe {
  Describe(err)
}

struct Describe(PageFaultErrorCode);

impl core::fmt::Display for Describe {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    let access = if self.0.contains(PageFaultErrorCode::INSTRUCTION_FETCH) {
      "fetch"
    } else if self.0.contains(PageFaultErrorCode::CAUSED_BY_WRITE) {
      "write"
    } else {
      "read"
    };
    let cause = if self.0.contains(PageFaultErrorCode::PROTECTION_VIOLATION) {
      "protection"
    } else {
      "not-present"
    };
    write!(f, "[{}, {}]", access, cause)
  }
}
