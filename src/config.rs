//! Compile-time layout of the kernel as seen by the trap layer:
//! segment selectors, the kernel stack, well-known vectors and
//! the console devices.

use x86_64::structures::gdt::SegmentSelector;
use x86_64::PrivilegeLevel;

/// All physical memory is mapped at this address
pub const KERNBASE: u32 = 0xf000_0000;

/// Bytes mapped by a page
pub const PGSIZE: u32 = 4096;

/// Size of the kernel stack
pub const KSTKSIZE: u32 = 8 * PGSIZE;

/// Top of the kernel stack. The CPU switches to this stack whenever a
/// trap raises the privilege level from user to kernel.
pub const KSTACKTOP: u32 = 0xefc0_0000;

/// Kernel text segment
pub const GD_KT: SegmentSelector = SegmentSelector::new(1, PrivilegeLevel::Ring0);
/// Kernel data segment
pub const GD_KD: SegmentSelector = SegmentSelector::new(2, PrivilegeLevel::Ring0);
/// User text segment, with RPL 3
pub const GD_UT: SegmentSelector = SegmentSelector::new(3, PrivilegeLevel::Ring3);
/// User data segment, with RPL 3
pub const GD_UD: SegmentSelector = SegmentSelector::new(4, PrivilegeLevel::Ring3);
/// Task state segment
pub const GD_TSS: SegmentSelector = SegmentSelector::new(5, PrivilegeLevel::Ring0);

/// Number of descriptors in the global descriptor table
pub const GDT_ENTRIES: usize = 6;

/// Number of gates in the interrupt descriptor table
pub const IDT_ENTRIES: usize = 256;

/// Software vector reserved for system calls
pub const T_SYSCALL: u32 = 48;

/// Virtual address of the CGA/VGA text buffer
pub const CGA_BUF: u32 = KERNBASE + 0xb8000;

/// I/O port of the first serial line
pub const COM1: u16 = 0x3f8;

/// Parameters used to build the gate table and the task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
  /// Code segment every gate jumps into
  pub kernel_code: SegmentSelector,
  /// Stack segment loaded on a user to kernel transition
  pub kernel_data: SegmentSelector,
  /// Selector of the GDT slot that receives the task state descriptor
  pub tss_selector: SegmentSelector,
  /// Stack pointer loaded on a user to kernel transition
  pub kernel_stack_top: u32,
}

impl Default for GateConfig {
  fn default() -> Self {
    GateConfig {
      kernel_code: GD_KT,
      kernel_data: GD_KD,
      tss_selector: GD_TSS,
      kernel_stack_top: KSTACKTOP,
    }
  }
}
