//! In-memory stand-ins for the environment manager and the processor.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use log::{Level, LevelFilter, Log, Metadata, Record};

use trapgate::idt::DescriptorTablePointer;
use trapgate::{Cpu, EnvId, Environments, Exit, TrapFrame, TrapRouter};
use x86_64::structures::gdt::SegmentSelector;

/// Panic payload standing in for the context switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resumed(pub EnvId);

#[derive(Debug, Clone)]
pub struct Env {
  pub frame: TrapFrame,
  pub runnable: bool,
}

#[derive(Debug, Default)]
pub struct FakeEnvs {
  pub envs: BTreeMap<EnvId, Env>,
  pub current: Option<EnvId>,
  pub destroyed: Vec<(EnvId, Exit)>,
  pub run_next_calls: usize,
}

impl FakeEnvs {
  /// Environments with the given ids, the first one running
  pub fn with(ids: &[u32]) -> Self {
    let mut envs = FakeEnvs::default();
    for id in ids {
      envs.envs.insert(
        EnvId(*id),
        Env {
          frame: TrapFrame::default(),
          runnable: true,
        },
      );
    }
    envs.current = ids.first().map(|id| EnvId(*id));
    envs
  }

  pub fn saved(&self, id: u32) -> TrapFrame {
    self.envs[&EnvId(id)].frame
  }
}

impl Environments for FakeEnvs {
  fn current(&self) -> Option<EnvId> {
    self.current
  }

  fn persist_frame(&mut self, env: EnvId, frame: &TrapFrame) -> &mut TrapFrame {
    let saved = &mut self.envs.get_mut(&env).expect("unknown environment").frame;
    *saved = *frame;
    saved
  }

  fn destroy(&mut self, env: EnvId, exit: Exit) {
    if let Some(e) = self.envs.get_mut(&env) {
      e.runnable = false;
    }
    if self.current == Some(env) {
      self.current = None;
    }
    self.destroyed.push((env, exit));
  }

  fn has_runnable(&self) -> bool {
    self.envs.values().any(|e| e.runnable)
  }

  fn run_next(&mut self) -> ! {
    self.run_next_calls += 1;
    let next = self
      .current
      .filter(|id| self.envs[id].runnable)
      .or_else(|| {
        self
          .envs
          .iter()
          .find(|(_, e)| e.runnable)
          .map(|(id, _)| *id)
      })
      .expect("run_next with nothing runnable");
    panic::panic_any(Resumed(next))
  }
}

#[derive(Debug, Default)]
pub struct FakeCpu {
  pub cr2: u32,
  pub eflags: u32,
  pub cr2_reads: Cell<usize>,
  pub idt: Option<DescriptorTablePointer>,
  pub task_register: Option<SegmentSelector>,
}

impl FakeCpu {
  pub fn faulting_at(va: u32) -> Self {
    FakeCpu {
      cr2: va,
      eflags: 0x2,
      ..FakeCpu::default()
    }
  }
}

impl Cpu for FakeCpu {
  fn fault_address(&self) -> u32 {
    self.cr2_reads.set(self.cr2_reads.get() + 1);
    self.cr2
  }

  fn eflags(&self) -> u32 {
    self.eflags
  }

  unsafe fn load_idt(&mut self, pointer: &DescriptorTablePointer) {
    self.idt = Some(*pointer);
  }

  unsafe fn load_task_register(&mut self, selector: SegmentSelector) {
    self.task_register = Some(selector);
  }
}

/// Run the diverging entry point and report where control went:
/// `Ok(env)` for a context switch, `Err(message)` for a halt.
pub fn run_trap<S>(
  envs: &mut FakeEnvs,
  syscalls: &mut S,
  cpu: &FakeCpu,
  console: &mut String,
  tf: &mut TrapFrame,
) -> Result<EnvId, String>
where
  S: trapgate::Syscalls,
{
  let result = panic::catch_unwind(AssertUnwindSafe(|| {
    TrapRouter::new(&mut *envs, &mut *syscalls, cpu, &mut *console).trap(&mut *tf);
  }));
  let payload = match result {
    Ok(()) => unreachable!("trap returned to its caller"),
    Err(payload) => payload,
  };
  match payload.downcast::<Resumed>() {
    Ok(resumed) => Ok(resumed.0),
    Err(payload) => Err(
      payload
        .downcast::<String>()
        .map(|message| *message)
        .unwrap_or_default(),
    ),
  }
}

/// A system call table that must never be reached
pub fn no_syscalls(_: u32, _: u32, _: u32, _: u32, _: u32, _: u32) -> i32 {
  panic!("unexpected system call")
}

/// One captured `log` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logged {
  pub level: Level,
  pub message: String,
}

thread_local! {
  static CAPTURED: RefCell<Option<Vec<Logged>>> = RefCell::new(None);
}

/// Keeps the records of whichever test thread is capturing
struct CaptureLogger;

impl Log for CaptureLogger {
  fn enabled(&self, _metadata: &Metadata) -> bool {
    true
  }

  fn log(&self, record: &Record) {
    CAPTURED.with(|captured| {
      if let Some(records) = captured.borrow_mut().as_mut() {
        records.push(Logged {
          level: record.level(),
          message: record.args().to_string(),
        });
      }
    });
  }

  fn flush(&self) {}
}

/// Run `f` and return the log records it emitted on this thread
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, Vec<Logged>) {
  static INSTALL: Once = Once::new();
  static LOGGER: CaptureLogger = CaptureLogger;
  INSTALL.call_once(|| {
    log::set_logger(&LOGGER).expect("another logger is installed");
    log::set_max_level(LevelFilter::Trace);
  });

  CAPTURED.with(|captured| *captured.borrow_mut() = Some(Vec::new()));
  let result = f();
  let records = CAPTURED.with(|captured| captured.borrow_mut().take().unwrap_or_default());
  (result, records)
}

/// Whether `records` hold one at `level` containing `text`
pub fn logged(records: &[Logged], level: Level, text: &str) -> bool {
  records
    .iter()
    .any(|record| record.level == level && record.message.contains(text))
}
