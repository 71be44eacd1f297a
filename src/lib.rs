//! Trap and exception dispatch for a 32-bit protected-mode kernel.
//!
//! At boot [init] builds the interrupt descriptor table and the task
//! state, and loads both. From then on every exception and system call
//! enters through an assembly stub that pushes a [TrapFrame] and calls the
//! kernel's `trap` symbol, which hands the frame to [TrapRouter::trap]:
//!
//! ```ignore
//! #[no_mangle]
//! pub extern "C" fn trap(tf: *mut TrapFrame) -> ! {
//!   let kernel = kernel();
//!   TrapRouter::new(&mut kernel.envs, &mut kernel.syscalls, &I386, &mut Console)
//!     .trap(unsafe { &mut *tf })
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

#[macro_use]
extern crate lazy_static;

pub mod config;
pub mod console;
pub mod cpu;
pub mod env;
mod fault;
pub mod frame;
pub mod gdt;
pub mod idt;
pub mod syscall;
pub mod trap;
pub mod vector;

use spin::Once;

pub use config::GateConfig;
pub use cpu::Cpu;
pub use env::{EnvId, Environments, Exit};
pub use frame::{PushRegs, TrapFrame};
pub use gdt::{GdtError, GlobalDescriptorTable};
pub use idt::{EntryStubs, TrapTables};
pub use syscall::Syscalls;
pub use trap::{Disposition, Fatal, TrapRouter};
pub use vector::Trap;

static TABLES: Once<TrapTables> = Once::new();

/// Build the trap tables from `stubs` and make them active on `cpu`.
/// The tables are built on the first call only; later calls reload the
/// same tables.
pub fn init_with<C: Cpu>(
  stubs: &EntryStubs,
  gdt: &mut GlobalDescriptorTable,
  cpu: &mut C,
) -> Result<&'static TrapTables, GdtError> {
  let config = GateConfig::default();
  let tables = TABLES.call_once(|| TrapTables::new(stubs, &config));
  tables.load(gdt, &config, cpu)?;
  log::info!(
    "trap gates loaded, kernel stack at {:#010x}",
    config.kernel_stack_top
  );
  Ok(tables)
}

/// Init procedure for the trap layer, with the linked entry stubs.
/// `gdt` must be the descriptor table the processor is using.
#[cfg(target_arch = "x86")]
pub fn init(gdt: &mut GlobalDescriptorTable) -> Result<&'static TrapTables, GdtError> {
  init_with(&EntryStubs::linked(), gdt, &mut cpu::I386)
}
