//! CP/M CLI - run an unmodified CP/M-80 `.COM` file on top of the BDOS
//! emulator, using the current directory as the A: drive.
//!
//! Usage:
//!   cpm PROGRAM.COM [--trace] [--dump-regs]

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};

use cpm_core::{CpmConsole, CpmEmulator, ExitReason};

/// Host-level failures that never reach the guest - distinct from guest
/// terminations, which always exit 0 (the spec makes no distinction
/// between normal and fatal *guest* outcomes at the process level).
const EX_USAGE: u8 = 1;
const EX_SOFTWARE: u8 = 70;

/// Run a CP/M-80 `.COM` file against a BDOS emulator core.
#[derive(Parser, Debug)]
#[command(name = "cpm")]
#[command(about = "Run a CP/M .COM file")]
struct Args {
    /// Path to the .COM file to run.
    program: Option<PathBuf>,

    /// Raise BDOS dispatch logging to debug level.
    #[arg(short, long)]
    trace: bool,

    /// Print the final register state after the program exits.
    #[arg(long)]
    dump_regs: bool,
}

/// A real terminal console: raw-mode keyboard polling via `crossterm`,
/// direct writes to stdout. No threads, no channels - `get_key` and
/// `wait_for_key` poll synchronously from the emulator's own run loop.
struct TerminalConsole;

impl CpmConsole for TerminalConsole {
    fn write(&mut self, ch: u8) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();

        match ch {
            0x0D => {
                let _ = handle.write_all(b"\r");
            }
            0x0A => {
                let _ = handle.write_all(b"\n");
            }
            0x08 => {
                let _ = handle.write_all(b"\x08 \x08");
            }
            0x07 => {
                let _ = handle.write_all(b"\x07");
            }
            _ => {
                let _ = handle.write_all(&[ch]);
            }
        }
        let _ = handle.flush();
    }

    fn has_key(&self) -> bool {
        event::poll(Duration::from_millis(0)).unwrap_or(false)
    }

    fn get_key(&mut self) -> Option<u8> {
        if !event::poll(Duration::from_millis(0)).unwrap_or(false) {
            return None;
        }
        match event::read() {
            Ok(Event::Key(key_event)) => translate_key(key_event.code, key_event.modifiers),
            _ => None,
        }
    }

    fn wait_for_key(&mut self) -> u8 {
        loop {
            if event::poll(Duration::from_millis(50)).unwrap_or(false) {
                if let Ok(Event::Key(key_event)) = event::read() {
                    if let Some(ch) = translate_key(key_event.code, key_event.modifiers) {
                        return ch;
                    }
                }
            }
        }
    }
}

/// Translate crossterm key events to CP/M key codes.
fn translate_key(code: KeyCode, modifiers: KeyModifiers) -> Option<u8> {
    if modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = code {
            let upper = c.to_ascii_uppercase();
            if upper.is_ascii_uppercase() {
                return Some(upper as u8 - 64); // Ctrl+A=1, Ctrl+C=3, etc.
            }
        }
    }

    match code {
        KeyCode::Char(c) => Some(c as u8),
        KeyCode::Enter => Some(13),
        KeyCode::Backspace => Some(8),
        KeyCode::Tab => Some(9),
        KeyCode::Esc => Some(27),
        _ => None,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.trace { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let Some(program_path) = args.program else {
        eprintln!("usage: cpm PROGRAM.COM [--trace] [--dump-regs]");
        return ExitCode::from(EX_USAGE);
    };

    let data = match std::fs::read(&program_path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("cpm: cannot read {}: {e}", program_path.display());
            return ExitCode::from(EX_USAGE);
        }
    };

    let mut emu = CpmEmulator::new(TerminalConsole);
    emu.load_com(&data);

    let raw_mode_enabled = enable_raw_mode().is_ok();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| emu.run()));
    if raw_mode_enabled {
        let _ = disable_raw_mode();
    }

    let info = match result {
        Ok(info) => info,
        Err(_) => {
            eprintln!("cpm: emulator panicked");
            return ExitCode::from(EX_SOFTWARE);
        }
    };

    log::info!("program exited: {:?} (pc={:#06x})", info.reason, info.pc);
    if args.dump_regs {
        eprintln!("exit pc = {:#06x}", info.pc);
    }

    match info.reason {
        ExitReason::FatalDispatch(message) => {
            eprintln!("cpm: {message}");
            ExitCode::SUCCESS
        }
        ExitReason::WarmBoot | ExitReason::ProgramTerminate | ExitReason::Halt => {
            ExitCode::SUCCESS
        }
    }
}
