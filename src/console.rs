//! Kernel console: the CGA text buffer, mirrored to COM1, plus the
//! `log` backend that writes records to it.

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::{Mutex, MutexGuard};
use volatile::Volatile;

use crate::config;

lazy_static! {
  /// Global writer instance that drives the CGA buffer.
  static ref WRITER: Mutex<Writer> = Mutex::new(Writer::new(
    // the text buffer is mapped just above KERNBASE
    unsafe { &mut *(config::CGA_BUF as usize as *mut Buffer) },
    ColorCode::new(Color::LightGray, Color::Black),
  ));
}

#[cfg(feature = "serial-console")]
lazy_static! {
  static ref SERIAL1: Mutex<uart_16550::SerialPort> = {
    let mut port = unsafe { uart_16550::SerialPort::new(config::COM1) };
    port.init();
    Mutex::new(port)
  };
}

/// Lock a console device. The kernel runs on one processor with
/// interrupts off, so a lock that is already held belongs to code a fault
/// interrupted, and that code never resumes. The lock is broken so the
/// diagnostic of that fault still gets out.
fn acquire<T>(lock: &'static Mutex<T>) -> MutexGuard<'static, T> {
  if let Some(guard) = lock.try_lock() {
    return guard;
  }
  unsafe { lock.force_unlock() };
  lock.lock()
}

/// Handle to the kernel console, usable wherever a [Write] sink is
/// expected, e.g. as the trap router's diagnostic output.
#[derive(Debug, Default, Clone, Copy)]
pub struct Console;

impl Write for Console {
  fn write_str(&mut self, s: &str) -> fmt::Result {
    acquire(&*WRITER).write_str(s)?;
    #[cfg(feature = "serial-console")]
    acquire(&*SERIAL1).write_str(s)?;
    Ok(())
  }
}

/// `log` backend writing to the console, colored by level on screen
struct ConsoleLogger;

impl Log for ConsoleLogger {
  fn enabled(&self, metadata: &Metadata) -> bool {
    metadata.level() <= log::max_level()
  }

  fn log(&self, record: &Record) {
    if !self.enabled(record.metadata()) {
      return;
    }

    let mut writer = acquire(&*WRITER);
    let previous = writer.set_color(level_color(record.level()));
    let _ = writeln!(
      writer,
      "[{}] {}: {}",
      record.level(),
      record.target(),
      record.args()
    );
    writer.set_color(previous);
    drop(writer);

    #[cfg(feature = "serial-console")]
    let _ = writeln!(
      acquire(&*SERIAL1),
      "[{}] {}: {}",
      record.level(),
      record.target(),
      record.args()
    );
  }

  fn flush(&self) {}
}

fn level_color(level: Level) -> ColorCode {
  let foreground = match level {
    Level::Error => Color::LightRed,
    Level::Warn => Color::Yellow,
    Level::Info => Color::LightGreen,
    Level::Debug => Color::LightBlue,
    Level::Trace => Color::DarkGray,
  };
  ColorCode::new(foreground, Color::Black)
}

/// Route `log` records to the console at or below `level`
pub fn init_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
  static LOGGER: ConsoleLogger = ConsoleLogger;

  log::set_logger(&LOGGER)?;
  log::set_max_level(level);
  Ok(())
}

/// Represents the color recognized by VGA
/// Each color occupies at most the small four bits
/// of the underlieing u8
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Color {
  Black = 0,
  Blue = 1,
  Green = 2,
  Cyan = 3,
  Red = 4,
  Magenta = 5,
  Brown = 6,
  LightGray = 7,
  DarkGray = 8,
  LightBlue = 9,
  LightGreen = 10,
  LightCyan = 11,
  LightRed = 12,
  Pink = 13,
  Yellow = 14,
  White = 15,
}

/// ColorCode represents an entire color code byte for VGA,
/// whose layout is <background>|<foreground>.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct ColorCode(u8);

impl ColorCode {
  fn new(foreground: Color, background: Color) -> ColorCode {
    ColorCode((background as u8) << 4 | foreground as u8)
  }
}

/// One cell of the text buffer: an ASCII byte and its [ColorCode]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
struct ScreenChar {
  ascii_character: u8,
  color_code: ColorCode,
}

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;

#[repr(transparent)]
struct Buffer {
  /// Volatile so that writes to the device memory are never optimized away
  chars: [[Volatile<ScreenChar>; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

/// Writes text at the bottom row of the buffer, scrolling up on newline
struct Writer {
  column_position: usize,
  color_code: ColorCode,
  buffer: &'static mut Buffer,
}

impl Writer {
  fn new(buffer: &'static mut Buffer, color_code: ColorCode) -> Self {
    Writer {
      column_position: 0,
      color_code,
      buffer,
    }
  }

  /// Switch the color of later output, returning the old one
  fn set_color(&mut self, color_code: ColorCode) -> ColorCode {
    core::mem::replace(&mut self.color_code, color_code)
  }

  fn write_byte(&mut self, byte: u8) {
    match byte {
      b'\n' => self.new_line(),
      byte => {
        if self.column_position >= BUFFER_WIDTH {
          self.new_line();
        }

        let row = BUFFER_HEIGHT - 1;
        let col = self.column_position;
        let color_code = self.color_code;
        self.buffer.chars[row][col].write(ScreenChar {
          ascii_character: byte,
          color_code,
        });
        self.column_position += 1;
      }
    }
  }

  fn new_line(&mut self) {
    for row in 1..BUFFER_HEIGHT {
      for col in 0..BUFFER_WIDTH {
        let c = self.buffer.chars[row][col].read();
        self.buffer.chars[row - 1][col].write(c);
      }
    }
    self.clear_row(BUFFER_HEIGHT - 1);
    self.column_position = 0;
  }

  fn clear_row(&mut self, row: usize) {
    let blank = ScreenChar {
      ascii_character: b' ',
      color_code: self.color_code,
    };
    for col in 0..BUFFER_WIDTH {
      self.buffer.chars[row][col].write(blank);
    }
  }
}

impl Write for Writer {
  fn write_str(&mut self, s: &str) -> fmt::Result {
    for byte in s.bytes() {
      match byte {
        // printable ASCII byte or newline
        0x20..=0x7e | b'\n' => self.write_byte(byte),
        // not part of printable ASCII range
        _ => self.write_byte(0xfe),
      }
    }
    Ok(())
  }
}
