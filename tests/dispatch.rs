//! Routing of traps through the router, end to end against fake
//! environment and processor state.

mod common;

use common::{no_syscalls, run_trap, FakeCpu, FakeEnvs};
use trapgate::config::{GD_KT, GD_UD, GD_UT, T_SYSCALL};
use trapgate::{Disposition, EnvId, Exit, Fatal, PushRegs, Trap, TrapFrame, TrapRouter};
use x86_64::structures::idt::PageFaultErrorCode;

fn user_frame(trapno: u32) -> TrapFrame {
  let mut tf = TrapFrame::new(trapno, GD_UT);
  tf.regs = PushRegs {
    edi: 0x1111_0001,
    esi: 0x2222_0002,
    ebp: 0xeebf_df80,
    oesp: 0xefbf_ffdc,
    ebx: 0x3333_0003,
    edx: 0x4444_0004,
    ecx: 0x5555_0005,
    eax: 0x6666_0006,
  };
  tf.es = GD_UD.0;
  tf.ds = GD_UD.0;
  tf.eip = 0x0080_0039;
  tf.eflags = 0x0000_0282;
  tf.esp = 0xeebf_df7c;
  tf.ss = GD_UD.0;
  tf
}

fn kernel_frame(trapno: u32) -> TrapFrame {
  let mut tf = TrapFrame::new(trapno, GD_KT);
  tf.eip = 0xf010_0a3c;
  tf.eflags = 0x0000_0086;
  tf
}

#[test]
fn user_trap_is_saved_verbatim() {
  for trapno in [0, 1, 3, 6, 13, 19, 77] {
    let mut envs = FakeEnvs::with(&[0x1000, 0x1001]);
    let cpu = FakeCpu::faulting_at(0);
    let mut console = String::new();
    let mut tf = user_frame(trapno);
    let original = tf;

    TrapRouter::new(&mut envs, &mut no_syscalls, &cpu, &mut console).dispatch(&mut tf);

    assert_eq!(envs.saved(0x1000), original, "trap {}", trapno);
    assert_eq!(tf, original);
  }
}

#[test]
fn kernel_trap_leaves_saved_frames_alone() {
  for trapno in [0, 3, 13, 14, 200] {
    let mut envs = FakeEnvs::with(&[0x1000]);
    let cpu = FakeCpu::faulting_at(0x10);
    let mut console = String::new();
    let mut tf = kernel_frame(trapno);

    TrapRouter::new(&mut envs, &mut no_syscalls, &cpu, &mut console).dispatch(&mut tf);

    assert_eq!(envs.saved(0x1000), TrapFrame::default());
  }
}

#[test]
fn every_kernel_trap_halts() {
  // a kernel-mode system call is serviced, see kernel_syscall_is_handled_in_place
  for trapno in (0..=255).filter(|trapno| *trapno != T_SYSCALL) {
    let mut envs = FakeEnvs::with(&[0x1000]);
    let cpu = FakeCpu::faulting_at(0x0000_0004);
    let mut console = String::new();
    let mut tf = kernel_frame(trapno);

    let disposition =
      TrapRouter::new(&mut envs, &mut no_syscalls, &cpu, &mut console).dispatch(&mut tf);

    let expected = if trapno == 14 {
      Fatal::KernelPageFault {
        va: 0x0000_0004,
        eip: 0xf010_0a3c,
      }
    } else {
      Fatal::UnhandledKernelTrap {
        trap: Trap::from_number(trapno),
        eip: 0xf010_0a3c,
      }
    };
    assert_eq!(disposition, Disposition::Halt(expected), "trap {}", trapno);
    assert!(envs.destroyed.is_empty());
  }
}

#[test]
fn kernel_fault_never_reaches_run_next() {
  let mut envs = FakeEnvs::with(&[0x1000]);
  let cpu = FakeCpu::faulting_at(0);
  let mut console = String::new();
  let mut tf = kernel_frame(13);

  let outcome = run_trap(&mut envs, &mut no_syscalls, &cpu, &mut console, &mut tf);

  let message = outcome.unwrap_err();
  assert!(message.starts_with("unhandled trap in kernel: General Protection (13)"));
  assert_eq!(envs.run_next_calls, 0);
  assert!(console.contains("TRAP frame at"));
}

#[test]
fn kernel_page_fault_halts_without_destroying() {
  let mut envs = FakeEnvs::with(&[0x1000]);
  let cpu = FakeCpu::faulting_at(0xf100_0000);
  let mut console = String::new();
  let mut tf = kernel_frame(14);

  let message = run_trap(&mut envs, &mut no_syscalls, &cpu, &mut console, &mut tf).unwrap_err();

  assert_eq!(message, "page fault in kernel at va f1000000 ip f0100a3c");
  assert!(envs.destroyed.is_empty());
  assert_eq!(envs.run_next_calls, 0);
  assert_eq!(cpu.cr2_reads.get(), 1);
}

#[test]
fn syscall_round_trip() {
  let mut envs = FakeEnvs::with(&[0x1000, 0x1001]);
  let cpu = FakeCpu::faulting_at(0);
  let mut console = String::new();
  let mut tf = user_frame(T_SYSCALL);
  tf.regs.eax = 9;
  let mut calls = Vec::new();
  let mut syscalls = |num: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32| {
    calls.push((num, a1, a2, a3, a4, a5));
    -7
  };

  let resumed = run_trap(&mut envs, &mut syscalls, &cpu, &mut console, &mut tf);

  assert_eq!(
    calls,
    vec![(9, 0x4444_0004, 0x5555_0005, 0x3333_0003, 0x1111_0001, 0x2222_0002)]
  );
  assert_eq!(resumed, Ok(EnvId(0x1000)));
  assert_eq!(envs.saved(0x1000).return_value(), -7);
  assert_eq!(envs.saved(0x1000).regs.edx, 0x4444_0004);
  // the stack copy is never written back
  assert_eq!(tf.regs.eax, 9);
  assert!(envs.destroyed.is_empty());
  assert!(console.is_empty());
}

#[test]
fn kernel_syscall_is_handled_in_place() {
  let mut envs = FakeEnvs::with(&[0x1000]);
  let cpu = FakeCpu::faulting_at(0);
  let mut console = String::new();
  let mut tf = kernel_frame(T_SYSCALL);
  tf.regs.eax = 1;
  let mut syscalls = |num: u32, _: u32, _: u32, _: u32, _: u32, _: u32| num as i32 + 41;

  let disposition =
    TrapRouter::new(&mut envs, &mut syscalls, &cpu, &mut console).dispatch(&mut tf);

  assert_eq!(disposition, Disposition::Resume);
  assert_eq!(tf.return_value(), 42);
  assert_eq!(envs.saved(0x1000), TrapFrame::default());
}

#[test]
fn user_page_fault_destroys_environment() {
  let mut envs = FakeEnvs::with(&[0x1000, 0x1001]);
  let cpu = FakeCpu::faulting_at(0xdead_beef);
  let mut console = String::new();
  let mut tf = user_frame(14);
  tf.err = 0b110;

  let resumed = run_trap(&mut envs, &mut no_syscalls, &cpu, &mut console, &mut tf);

  assert_eq!(cpu.cr2_reads.get(), 1);
  assert_eq!(
    envs.destroyed,
    vec![(
      EnvId(0x1000),
      Exit::PageFault {
        va: 0xdead_beef,
        eip: 0x0080_0039,
        err: PageFaultErrorCode::CAUSED_BY_WRITE | PageFaultErrorCode::USER_MODE,
      }
    )]
  );
  assert!(console.starts_with("[00001000] user fault va deadbeef ip 00800039 [write, not-present]\n"));
  assert!(console.contains("  trap 0x0000000e Page Fault\n"));
  // someone else gets the processor
  assert_eq!(resumed, Ok(EnvId(0x1001)));
}

#[test]
fn user_breakpoint_takes_default_path() {
  let mut envs = FakeEnvs::with(&[0x1000, 0x1001]);
  let cpu = FakeCpu::faulting_at(0);
  let mut console = String::new();
  let mut tf = user_frame(3);

  let disposition =
    TrapRouter::new(&mut envs, &mut no_syscalls, &cpu, &mut console).dispatch(&mut tf);

  assert_eq!(disposition, Disposition::Resume);
  assert_eq!(
    envs.destroyed,
    vec![(
      EnvId(0x1000),
      Exit::Unhandled {
        trap: Trap::Breakpoint,
        eip: 0x0080_0039,
        err: 0
      }
    )]
  );
  assert!(console.contains("  trap 0x00000003 Breakpoint\n"));
  assert!(console.contains("  esp  0xeebfdf7c\n"));
}

#[test]
fn unknown_vector_follows_privilege() {
  let cpu = FakeCpu::faulting_at(0);

  let mut envs = FakeEnvs::with(&[0x1000, 0x1001]);
  let mut console = String::new();
  let mut tf = user_frame(200);
  let disposition =
    TrapRouter::new(&mut envs, &mut no_syscalls, &cpu, &mut console).dispatch(&mut tf);
  assert_eq!(disposition, Disposition::Resume);
  assert!(matches!(
    envs.destroyed.as_slice(),
    [(EnvId(0x1000), Exit::Unhandled { trap: Trap::Unknown(200), .. })]
  ));
  assert!(console.contains("  trap 0x000000c8 (unknown trap)\n"));

  let mut envs = FakeEnvs::with(&[0x1000]);
  let mut console = String::new();
  let mut tf = kernel_frame(200);
  let disposition =
    TrapRouter::new(&mut envs, &mut no_syscalls, &cpu, &mut console).dispatch(&mut tf);
  assert_eq!(
    disposition,
    Disposition::Halt(Fatal::UnhandledKernelTrap {
      trap: Trap::Unknown(200),
      eip: 0xf010_0a3c
    })
  );
  assert!(console.contains("(unknown trap)"));
}

#[test]
fn user_trap_without_environment_halts() {
  let mut envs = FakeEnvs::with(&[0x1000]);
  envs.current = None;
  let cpu = FakeCpu::faulting_at(0);
  let mut console = String::new();
  let mut tf = user_frame(0);

  let disposition =
    TrapRouter::new(&mut envs, &mut no_syscalls, &cpu, &mut console).dispatch(&mut tf);

  assert_eq!(
    disposition,
    Disposition::Halt(Fatal::NoCurrentEnvironment {
      trap: Trap::DivideError
    })
  );
  assert_eq!(envs.saved(0x1000), TrapFrame::default());
}

#[test]
fn last_environment_dying_halts() {
  let mut envs = FakeEnvs::with(&[0x1000]);
  let cpu = FakeCpu::faulting_at(0x0);
  let mut console = String::new();
  let mut tf = user_frame(14);

  let message = run_trap(&mut envs, &mut no_syscalls, &cpu, &mut console, &mut tf).unwrap_err();

  assert_eq!(message, "no runnable environment to resume");
  assert_eq!(envs.destroyed.len(), 1);
  assert_eq!(envs.run_next_calls, 0);
}
