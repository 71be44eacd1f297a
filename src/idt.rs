//! This modules defines the IDT (interrupt descriptor table) used by the
//! kernel in 32-bit protected mode, and builds it once at boot together
//! with the task state that tells the CPU where the kernel stack is.
//!
//! The vectors with a gate are:
//! 0 -> Divide error
//! 1 -> Debug
//! 2 -> Non-maskable interrupt
//! 3 -> Breakpoint (user invocable)
//! 4 -> Overflow
//! 5 -> Bound range exceeded
//! 6 -> Invalid opcode
//! 7 -> Device not available
//! 8 -> Double fault
//! 10 -> Invalid TSS
//! 11 -> Segment not present
//! 12 -> Stack-segment fault
//! 13 -> General protection fault
//! 14 -> Page fault
//! 16 -> x87 floating point error
//! 17 -> Alignment check
//! 18 -> Machine check
//! 19 -> SIMD floating point error
//! 48 -> System call (user invocable)
//! See https://wiki.osdev.org/Exceptions for detailed reference

use core::fmt;
use core::mem::size_of;

use x86_64::structures::gdt::SegmentSelector;
use x86_64::PrivilegeLevel;

use crate::config::{GateConfig, IDT_ENTRIES};
use crate::cpu::Cpu;
use crate::gdt::{GdtError, GlobalDescriptorTable, TaskState};
use crate::vector::Trap;

/// GateOptions wraps the upper 16 bits of the first gate word:
/// Bits    Name        Description
/// 0-4     Args        Number of arguments, 0 for interrupt and trap gates
/// 5-7     Reserved
/// 8-11    Type        0b1110: 32-bit interrupt gate, 0b1111: 32-bit trap gate
/// 12      Must be 0   System descriptor
/// 13-14   DPL         The minimal privilege level required for calling this gate
/// 15      Present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct GateOptions(u16);

const MINIMAL_VALID_OPTION: u16 = 0b0000111000000000;

impl GateOptions {
  /// Create a new option with all 0s except must-1 bits
  pub fn minimal() -> Self {
    GateOptions(MINIMAL_VALID_OPTION)
  }

  /// Create a new option with reasonable default.
  /// Present -> True
  /// Disable Interrupts -> True
  pub fn new() -> Self {
    let mut opt = Self::minimal();
    opt.set_present(true).disable_interrupts(true);
    opt
  }

  /// Set the present bit of the option.
  pub fn set_present(&mut self, present: bool) -> &mut Self {
    if present {
      self.0 |= 1 << 15;
    } else {
      self.0 &= !(1 << 15);
    }

    self
  }

  /// Choose between an interrupt gate, which clears IF on entry, and a
  /// trap gate, which leaves it alone.
  pub fn disable_interrupts(&mut self, disable: bool) -> &mut Self {
    if disable {
      self.0 &= !(1 << 8);
    } else {
      self.0 |= 1 << 8;
    }

    self
  }

  /// Set privilege level.
  pub fn set_privilege_level(&mut self, dpl: PrivilegeLevel) -> &mut Self {
    self.0 = (self.0 & 0x9fff) | ((dpl as u16) << 13);

    self
  }

  /// Present bit
  pub fn is_present(&self) -> bool {
    self.0 & (1 << 15) != 0
  }

  /// Whether entering through this gate clears IF
  pub fn disables_interrupts(&self) -> bool {
    self.0 & (1 << 8) == 0
  }

  /// Descriptor privilege level
  pub fn privilege_level(&self) -> PrivilegeLevel {
    PrivilegeLevel::from_u16((self.0 >> 13) & 3)
  }

  /// Gate type field
  pub fn gate_type(&self) -> u8 {
    ((self.0 >> 8) & 0xf) as u8
  }
}

impl Default for GateOptions {
  fn default() -> Self {
    Self::new()
  }
}

/// An IDT gate of the following format:
/// Type    Name          Description
/// u16     offset_low    lower bits of the address of the entry stub
/// u16     selector      code segment the stub runs in
/// u16     options       See [GateOptions]
/// u16     offset_high   upper bits of the address of the entry stub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct GateDescriptor {
  offset_low: u16,
  selector: SegmentSelector,
  options: GateOptions,
  offset_high: u16,
}

const _: () = assert!(size_of::<GateDescriptor>() == 8);

impl GateDescriptor {
  /// A present 32-bit interrupt gate to `offset` in segment `selector`
  /// that may be invoked by software running at `dpl` or above
  pub fn new(selector: SegmentSelector, offset: u32, dpl: PrivilegeLevel) -> Self {
    let mut options = GateOptions::new();
    options.set_privilege_level(dpl);
    GateDescriptor {
      offset_low: offset as u16,
      selector,
      options,
      offset_high: (offset >> 16) as u16,
    }
  }

  /// Create a missing IDT entry
  pub fn missing() -> Self {
    GateDescriptor {
      offset_low: 0,
      selector: SegmentSelector::new(0, PrivilegeLevel::Ring0),
      options: GateOptions::minimal(),
      offset_high: 0,
    }
  }

  /// Address of the entry stub
  pub fn offset(&self) -> u32 {
    (self.offset_high as u32) << 16 | self.offset_low as u32
  }

  /// Code segment of the entry stub
  pub fn selector(&self) -> SegmentSelector {
    self.selector
  }

  /// Type, privilege and present bits
  pub fn options(&self) -> GateOptions {
    self.options
  }

  /// The descriptor as the CPU reads it
  pub fn bits(&self) -> u64 {
    self.offset_low as u64
      | (self.selector.0 as u64) << 16
      | (self.options.0 as u64) << 32
      | (self.offset_high as u64) << 48
  }
}

/// Value loaded with `lidt`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, packed)]
pub struct DescriptorTablePointer {
  /// Size of the table in bytes, minus one
  pub limit: u16,
  /// Linear address of the table
  pub base: u32,
}

/// A fault the CPU raises instead of entering a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateFault {
  /// `int n` from a privilege level numerically above the gate's DPL
  Privilege {
    /// Vector that was invoked
    vector: u8,
    /// Privilege level of the caller
    cpl: PrivilegeLevel,
    /// Privilege level the gate requires
    dpl: PrivilegeLevel,
  },
  /// The gate's present bit is clear
  NotPresent {
    /// Vector that was invoked
    vector: u8,
  },
}

impl GateFault {
  /// The exception delivered in place of the requested vector
  pub fn exception(&self) -> Trap {
    match self {
      GateFault::Privilege { .. } => Trap::GeneralProtection,
      GateFault::NotPresent { .. } => Trap::SegmentNotPresent,
    }
  }

  /// Error code pushed with that exception: the vector's IDT index with
  /// the IDT bit set
  pub fn error_code(&self) -> u32 {
    let vector = match self {
      GateFault::Privilege { vector, .. } | GateFault::NotPresent { vector } => *vector,
    };
    (vector as u32) << 3 | 0b10
  }
}

impl fmt::Display for GateFault {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GateFault::Privilege { vector, cpl, dpl } => write!(
        f,
        "vector {} requires {:?}, invoked from {:?}",
        vector, dpl, cpl
      ),
      GateFault::NotPresent { vector } => write!(f, "vector {} has no gate", vector),
    }
  }
}

/// IDT is just an array of 256 gates, one per vector.
#[derive(Debug, Clone)]
#[repr(C)]
pub struct InterruptDescriptorTable([GateDescriptor; IDT_ENTRIES]);

impl InterruptDescriptorTable {
  /// Create an IDT with all entries missing
  pub fn new() -> Self {
    Self([GateDescriptor::missing(); IDT_ENTRIES])
  }

  /// Gate for a raw vector
  pub fn gate(&self, vector: u8) -> &GateDescriptor {
    &self.0[vector as usize]
  }

  /// Install the gate for a trap. Returns `None`, leaving the table
  /// unchanged, when the trap number is not a vector of this table.
  pub fn set_gate(&mut self, trap: Trap, gate: GateDescriptor) -> Option<&mut GateDescriptor> {
    let slot = self.0.get_mut(trap.number() as usize)?;
    *slot = gate;
    Some(slot)
  }

  /// Pointer and limit to hand to `lidt`
  pub fn pointer(&self) -> DescriptorTablePointer {
    DescriptorTablePointer {
      base: self as *const _ as usize as u32,
      // limit is the maximum-addressible byte, which is size - 1.
      limit: (size_of::<Self>() - 1) as u16,
    }
  }

  /// Check an `int vector` executed at privilege `cpl` the way the CPU
  /// does before it enters the gate.
  pub fn software_interrupt(
    &self,
    vector: u8,
    cpl: PrivilegeLevel,
  ) -> Result<&GateDescriptor, GateFault> {
    let gate = self.gate(vector);
    let dpl = gate.options.privilege_level();
    if (cpl as u8) > (dpl as u8) {
      return Err(GateFault::Privilege { vector, cpl, dpl });
    }
    if !gate.options.is_present() {
      return Err(GateFault::NotPresent { vector });
    }
    Ok(gate)
  }

  /// Deliver a processor-raised exception. The gate DPL is not checked
  /// for these.
  pub fn hardware_exception(&self, vector: u8) -> Result<&GateDescriptor, GateFault> {
    let gate = self.gate(vector);
    if !gate.options.is_present() {
      return Err(GateFault::NotPresent { vector });
    }
    Ok(gate)
  }
}

impl Default for InterruptDescriptorTable {
  fn default() -> Self {
    Self::new()
  }
}

/// Addresses of the per-vector entry stubs, in [Trap::DEFINED] order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStubs([u32; Trap::DEFINED.len()]);

impl EntryStubs {
  /// Look up every stub address with `f`
  pub fn from_fn(mut f: impl FnMut(Trap) -> u32) -> Self {
    let mut addrs = [0; Trap::DEFINED.len()];
    for (addr, trap) in addrs.iter_mut().zip(Trap::DEFINED.iter()) {
      *addr = f(*trap);
    }
    EntryStubs(addrs)
  }

  /// Stub for a trap, if it has a gate
  pub fn get(&self, trap: Trap) -> Option<u32> {
    Trap::DEFINED
      .iter()
      .position(|defined| *defined == trap)
      .map(|index| self.0[index])
  }

  /// The stubs linked into the kernel image
  #[cfg(target_arch = "x86")]
  pub fn linked() -> Self {
    extern "C" {
      fn trap_entry_divide_error();
      fn trap_entry_debug();
      fn trap_entry_nmi();
      fn trap_entry_breakpoint();
      fn trap_entry_overflow();
      fn trap_entry_bound_range();
      fn trap_entry_invalid_opcode();
      fn trap_entry_device_not_available();
      fn trap_entry_double_fault();
      fn trap_entry_invalid_tss();
      fn trap_entry_segment_not_present();
      fn trap_entry_stack_fault();
      fn trap_entry_general_protection();
      fn trap_entry_page_fault();
      fn trap_entry_fp_error();
      fn trap_entry_alignment_check();
      fn trap_entry_machine_check();
      fn trap_entry_simd_error();
      fn trap_entry_syscall();
    }

    Self::from_fn(|trap| {
      let stub: unsafe extern "C" fn() = match trap {
        Trap::DivideError => trap_entry_divide_error,
        Trap::Debug => trap_entry_debug,
        Trap::NonMaskableInterrupt => trap_entry_nmi,
        Trap::Breakpoint => trap_entry_breakpoint,
        Trap::Overflow => trap_entry_overflow,
        Trap::BoundRangeExceeded => trap_entry_bound_range,
        Trap::InvalidOpcode => trap_entry_invalid_opcode,
        Trap::DeviceNotAvailable => trap_entry_device_not_available,
        Trap::DoubleFault => trap_entry_double_fault,
        Trap::InvalidTss => trap_entry_invalid_tss,
        Trap::SegmentNotPresent => trap_entry_segment_not_present,
        Trap::StackFault => trap_entry_stack_fault,
        Trap::GeneralProtection => trap_entry_general_protection,
        Trap::PageFault => trap_entry_page_fault,
        Trap::FloatingPointError => trap_entry_fp_error,
        Trap::AlignmentCheck => trap_entry_alignment_check,
        Trap::MachineCheck => trap_entry_machine_check,
        Trap::SimdFloatingPoint => trap_entry_simd_error,
        Trap::Syscall => trap_entry_syscall,
        Trap::Unknown(_) => return 0,
      };
      stub as usize as u32
    })
  }
}

/// The gate table and the task state, built once at boot and read-only
/// afterwards.
#[derive(Debug, Clone)]
pub struct TrapTables {
  idt: InterruptDescriptorTable,
  tss: TaskState,
}

impl TrapTables {
  /// Install one interrupt gate per defined trap. Breakpoint and system
  /// call are reachable from ring 3, every other gate is kernel only.
  pub fn new(stubs: &EntryStubs, config: &GateConfig) -> Self {
    let mut idt = InterruptDescriptorTable::new();
    for trap in Trap::DEFINED.iter().copied() {
      let dpl = if trap.user_invocable() {
        PrivilegeLevel::Ring3
      } else {
        PrivilegeLevel::Ring0
      };
      let offset = stubs.get(trap).unwrap_or(0);
      idt.set_gate(trap, GateDescriptor::new(config.kernel_code, offset, dpl));
    }

    TrapTables {
      idt,
      tss: TaskState::new(config.kernel_stack_top, config.kernel_data),
    }
  }

  /// The gate table
  pub fn idt(&self) -> &InterruptDescriptorTable {
    &self.idt
  }

  /// The privilege-elevation stack record
  pub fn task_state(&self) -> &TaskState {
    &self.tss
  }

  /// Make these tables the active configuration of the processor: write
  /// the task state descriptor into `gdt`, load the task register and
  /// load the IDT.
  /// * `&'static self` the CPU reads both tables for the whole lifetime
  /// of the kernel.
  pub fn load<C: Cpu>(
    &'static self,
    gdt: &mut GlobalDescriptorTable,
    config: &GateConfig,
    cpu: &mut C,
  ) -> Result<(), GdtError> {
    gdt.set_task_state(config.tss_selector, &self.tss)?;
    unsafe {
      cpu.load_task_register(config.tss_selector);
      cpu.load_idt(&self.idt.pointer());
    }
    Ok(())
  }
}
