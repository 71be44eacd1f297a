//! The processor state the trap layer touches directly: the fault address
//! register, the interrupt flag, and the IDT and task registers.

use x86_64::registers::rflags::RFlags;
use x86_64::structures::gdt::SegmentSelector;

use crate::idt::DescriptorTablePointer;

/// Access to processor registers
pub trait Cpu {
  /// Linear address of the most recent page fault (`cr2`)
  fn fault_address(&self) -> u32;

  /// Current flags register
  fn eflags(&self) -> u32;

  /// Whether external interrupts are currently delivered
  fn interrupts_enabled(&self) -> bool {
    RFlags::from_bits_truncate(self.eflags() as u64).contains(RFlags::INTERRUPT_FLAG)
  }

  /// Load the interrupt descriptor table register.
  ///
  /// # Safety
  /// `pointer` must describe a valid table that outlives its use by the CPU.
  unsafe fn load_idt(&mut self, pointer: &DescriptorTablePointer);

  /// Load the task register.
  ///
  /// # Safety
  /// `selector` must name a present, available task state descriptor in the
  /// active GDT.
  unsafe fn load_task_register(&mut self, selector: SegmentSelector);
}

/// The processor this kernel runs on
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Clone, Copy)]
pub struct I386;

#[cfg(target_arch = "x86")]
impl Cpu for I386 {
  fn fault_address(&self) -> u32 {
    let value: u32;
    unsafe {
      core::arch::asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
  }

  fn eflags(&self) -> u32 {
    let value: u32;
    unsafe {
      core::arch::asm!("pushfd", "pop {}", out(reg) value, options(nomem, preserves_flags));
    }
    value
  }

  unsafe fn load_idt(&mut self, pointer: &DescriptorTablePointer) {
    unsafe {
      core::arch::asm!("lidt [{}]", in(reg) pointer, options(readonly, nostack, preserves_flags));
    }
  }

  unsafe fn load_task_register(&mut self, selector: SegmentSelector) {
    unsafe {
      core::arch::asm!("ltr {0:x}", in(reg) selector.0, options(nostack, preserves_flags));
    }
  }
}
