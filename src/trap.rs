//! The trap router.
//!
//! Every trap goes through the same steps: find out whether it came from
//! user mode (and if so save the frame into the current environment),
//! route it on its vector, apply the handler's verdict, then give the
//! processor to a runnable environment.
//!
//! The entry stubs call the kernel's `trap` symbol with a pointer to the
//! frame they built; the kernel wires that to [TrapRouter::trap] with its
//! environment manager, system call table and console.

use core::fmt::{self, Write};

use log::{debug, error, trace, warn};

use crate::cpu::Cpu;
use crate::env::{EnvId, Environments, Exit};
use crate::fault;
use crate::frame::TrapFrame;
use crate::syscall::{self, Syscalls};
use crate::vector::Trap;

/// Privilege the trapped code was running at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
  /// The kernel itself. There is no environment to blame.
  Kernel,
  /// User code of the given environment
  User(EnvId),
}

/// Conditions that stop the whole machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatal {
  /// The kernel touched a page it has no access to
  KernelPageFault {
    /// Faulting linear address
    va: u32,
    /// Faulting instruction
    eip: u32,
  },
  /// The kernel raised an exception it has no handler for
  UnhandledKernelTrap {
    /// The trap
    trap: Trap,
    /// Interrupted instruction
    eip: u32,
  },
  /// A trap arrived from user mode while no environment was running
  NoCurrentEnvironment {
    /// The trap
    trap: Trap,
  },
  /// No environment is left to resume
  NothingRunnable,
}

impl fmt::Display for Fatal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Fatal::KernelPageFault { va, eip } => {
        write!(f, "page fault in kernel at va {:08x} ip {:08x}", va, eip)
      }
      Fatal::UnhandledKernelTrap { trap, eip } => {
        write!(f, "unhandled trap in kernel: {} at ip {:08x}", trap, eip)
      }
      Fatal::NoCurrentEnvironment { trap } => {
        write!(f, "{} from user mode with no current environment", trap)
      }
      Fatal::NothingRunnable => write!(f, "no runnable environment to resume"),
    }
  }
}

/// What a handler decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
  /// Handled, carry on
  Resume,
  /// Kill the environment
  Destroy(EnvId, Exit),
  /// Stop the machine
  Halt(Fatal),
}

/// Outcome of routing one trap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
  /// Give the processor to the next runnable environment
  Resume,
  /// Stop the machine
  Halt(Fatal),
}

/// Routes traps to their handlers. Borrows the kernel services it needs
/// for the duration of one trap.
pub struct TrapRouter<'k, E: ?Sized, S: ?Sized, C: ?Sized, W: ?Sized> {
  envs: &'k mut E,
  syscalls: &'k mut S,
  cpu: &'k C,
  console: &'k mut W,
}

impl<'k, E, S, C, W> TrapRouter<'k, E, S, C, W>
where
  E: Environments + ?Sized,
  S: Syscalls + ?Sized,
  C: Cpu + ?Sized,
  W: Write + ?Sized,
{
  /// Create a router over the given services
  pub fn new(envs: &'k mut E, syscalls: &'k mut S, cpu: &'k C, console: &'k mut W) -> Self {
    TrapRouter {
      envs,
      syscalls,
      cpu,
      console,
    }
  }

  /// Handle one trap, then resume the next runnable environment.
  /// A fatal condition panics with its description instead.
  pub fn trap(mut self, tf: &mut TrapFrame) -> ! {
    match self.dispatch(tf) {
      Disposition::Resume => self.envs.run_next(),
      Disposition::Halt(fatal) => {
        error!("{}", fatal);
        panic!("{}", fatal)
      }
    }
  }

  /// Classify and handle one trap without transferring control.
  ///
  /// A trap from user mode is copied into the current environment first
  /// and handled on that copy; `tf` is left untouched. A trap from the
  /// kernel is handled in place.
  pub fn dispatch(&mut self, tf: &mut TrapFrame) -> Disposition {
    trace!("incoming trap frame at {:p}", tf);
    if self.cpu.interrupts_enabled() {
      warn!("trap {} entered with interrupts enabled", tf.trapno);
    }

    let trap = tf.trap();
    let action = if tf.from_user() {
      let env = match self.envs.current() {
        Some(env) => env,
        None => return self.halt(Fatal::NoCurrentEnvironment { trap }),
      };
      // the stack copy is stale from here on
      let saved = self.envs.persist_frame(env, tf);
      debug!("{} from user environment {}", trap, env);
      route(trap, Origin::User(env), saved, self.syscalls, self.cpu, self.console)
    } else {
      debug!("{} from kernel", trap);
      route(trap, Origin::Kernel, tf, self.syscalls, self.cpu, self.console)
    };

    match action {
      Action::Resume => {}
      Action::Destroy(env, exit) => {
        warn!("destroying environment {}: {}", env, exit);
        self.envs.destroy(env, exit);
      }
      Action::Halt(fatal) => return self.halt(fatal),
    }

    if !self.envs.has_runnable() {
      return self.halt(Fatal::NothingRunnable);
    }
    Disposition::Resume
  }

  fn halt(&mut self, fatal: Fatal) -> Disposition {
    let _ = writeln!(self.console, "kernel panic: {}", fatal);
    Disposition::Halt(fatal)
  }
}

fn route<S, C, W>(
  trap: Trap,
  origin: Origin,
  frame: &mut TrapFrame,
  syscalls: &mut S,
  cpu: &C,
  console: &mut W,
) -> Action
where
  S: Syscalls + ?Sized,
  C: Cpu + ?Sized,
  W: Write + ?Sized,
{
  match trap {
    Trap::PageFault => fault::page_fault(origin, frame, cpu, console),
    Trap::Syscall => {
      let ret = syscall::dispatch(frame, syscalls);
      trace!("system call returned {}", ret);
      Action::Resume
    }
    Trap::DivideError
    | Trap::Debug
    | Trap::NonMaskableInterrupt
    | Trap::Breakpoint
    | Trap::Overflow
    | Trap::BoundRangeExceeded
    | Trap::InvalidOpcode
    | Trap::DeviceNotAvailable
    | Trap::DoubleFault
    | Trap::InvalidTss
    | Trap::SegmentNotPresent
    | Trap::StackFault
    | Trap::GeneralProtection
    | Trap::FloatingPointError
    | Trap::AlignmentCheck
    | Trap::MachineCheck
    | Trap::SimdFloatingPoint
    | Trap::Unknown(_) => unhandled(trap, origin, frame, console),
  }
}

/// Unexpected trap: the user environment or the kernel has a bug
fn unhandled<W: Write + ?Sized>(trap: Trap, origin: Origin, frame: &TrapFrame, console: &mut W) -> Action {
  let _ = write!(console, "{}", frame);
  match origin {
    Origin::Kernel => Action::Halt(Fatal::UnhandledKernelTrap {
      trap,
      eip: frame.eip,
    }),
    Origin::User(env) => Action::Destroy(
      env,
      Exit::Unhandled {
        trap,
        eip: frame.eip,
        err: frame.err,
      },
    ),
  }
}
