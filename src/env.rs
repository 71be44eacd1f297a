//! The interface to the environment (execution context) manager.
//!
//! Environments, their saved trap frames and the run queue all belong to
//! the manager. The trap layer only saves a frame into the current
//! environment, asks for an environment to be destroyed, and hands the
//! processor back.

use core::fmt;

use x86_64::structures::idt::PageFaultErrorCode;

use crate::frame::TrapFrame;
use crate::vector::Trap;

/// Identifier of an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvId(pub u32);

impl fmt::Display for EnvId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:08x}", self.0)
  }
}

/// Why the trap layer destroyed an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
  /// Access to an unmapped or protected page
  PageFault {
    /// Faulting linear address, from `cr2`
    va: u32,
    /// Faulting instruction
    eip: u32,
    /// Decoded hardware error code
    err: PageFaultErrorCode,
  },
  /// A trap the kernel has no handler for
  Unhandled {
    /// The trap
    trap: Trap,
    /// Interrupted instruction
    eip: u32,
    /// Raw error code from the frame
    err: u32,
  },
}

impl fmt::Display for Exit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Exit::PageFault { va, eip, err } => {
        write!(f, "page fault va {:08x} ip {:08x} ({:?})", va, eip, err)
      }
      Exit::Unhandled { trap, eip, err } => {
        write!(f, "{} at ip {:08x} err {:08x}", trap, eip, err)
      }
    }
  }
}

/// The environment manager as seen from the trap layer
pub trait Environments {
  /// The environment that was running when the trap arrived
  fn current(&self) -> Option<EnvId>;

  /// Copy `frame` into the saved state of `env` and return the saved copy.
  /// Resuming `env` later restarts it from this copy.
  fn persist_frame(&mut self, env: EnvId, frame: &TrapFrame) -> &mut TrapFrame;

  /// Free `env`. It must never be scheduled again.
  fn destroy(&mut self, env: EnvId, exit: Exit);

  /// Whether some environment can be run
  fn has_runnable(&self) -> bool;

  /// Give the processor to the next runnable environment. Never returns.
  fn run_next(&mut self) -> !;
}
