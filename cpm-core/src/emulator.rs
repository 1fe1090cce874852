//! CP/M Emulator - integrates the Z80 CPU with BDOS handling.

use std::num::NonZeroU16;

use z80emu::host::TsCounter;
use z80emu::{Cpu, Io, Memory, Reg8, StkReg16, Z80NMOS};

use crate::bdos::{addr, unsupported_function_name, BdosFunction, ExtendedError, Fcb, RECORD_SIZE};
use crate::console::CpmConsole;
use crate::error::CpmError;
use crate::files::FileRegistry;
use crate::memory::GuestMemory;
use crate::{CpmExitInfo, ExitReason};

type TsClock = TsCounter<i32>;

/// CP/M Emulator bus: the memory/IO side `z80emu`'s interpreter drives.
///
/// In principle, the opcode-fetch hook is the trap point - the spec
/// frames `CALL 5`/warm-boot interception as happening on instruction
/// fetch, not on a memory read. But `z80emu`'s `Memory::read_opcode`
/// hands the hook only an address, never the CPU's register file, and
/// BDOS dispatch needs the C/DE/E argument registers and must write
/// A/B/HL results back. So the actual trap lives one level up, in the
/// run loop, which checks the program counter before calling
/// `execute_next` at all and only reaches this `Bus` for every other
/// address. `read_opcode` here is consequently a pure pass-through.
struct Bus<'a> {
    memory: &'a mut GuestMemory,
}

impl Memory for Bus<'_> {
    type Timestamp = i32;

    fn read_debug(&self, addr: u16) -> u8 {
        self.memory.read(addr)
    }

    fn read_mem(&self, addr: u16, _ts: Self::Timestamp) -> u8 {
        self.memory.read(addr)
    }

    fn read_opcode(&mut self, pc: u16, _ir: u16, _ts: Self::Timestamp) -> u8 {
        self.memory.read(pc)
    }

    fn write_mem(&mut self, addr: u16, value: u8, _ts: Self::Timestamp) {
        self.memory.write(addr, value);
    }
}

impl Io for Bus<'_> {
    type Timestamp = i32;
    type WrIoBreak = ();
    type RetiBreak = ();

    fn read_io(&mut self, _port: u16, _ts: Self::Timestamp) -> (u8, Option<NonZeroU16>) {
        (0xFF, None)
    }

    fn write_io(
        &mut self,
        _port: u16,
        _value: u8,
        _ts: Self::Timestamp,
    ) -> (Option<Self::WrIoBreak>, Option<NonZeroU16>) {
        (None, None)
    }
}

/// CP/M Emulator state: the whole hosted machine.
pub struct CpmEmulator<C: CpmConsole> {
    cpu: Z80NMOS,
    clock: TsClock,
    memory: GuestMemory,
    console: C,
    dma: u16,
    files: FileRegistry,
}

impl<C: CpmConsole> CpmEmulator<C> {
    /// Create a new emulator with the given console. Open files live in
    /// the host's current working directory, keyed by canonical CP/M
    /// filename - there is no drive indirection.
    pub fn new(console: C) -> Self {
        let mut emu = Self {
            cpu: Z80NMOS::default(),
            clock: TsClock::default(),
            memory: GuestMemory::new(),
            console,
            dma: addr::DEFAULT_DMA,
            files: FileRegistry::new(),
        };
        emu.init_zero_page();
        emu
    }

    /// Seed the CP/M conventional fixed structure in low memory. The
    /// run loop intercepts 0x0000 and 0x0005 before they would ever be
    /// executed through, so these bytes only need to satisfy guests
    /// that inspect them as data.
    fn init_zero_page(&mut self) {
        self.memory.write(0x0000, 0xC3); // JP
        self.memory.write(0x0001, 0x00);
        self.memory.write(0x0002, 0x00);

        self.memory.write(0x0003, 0x00); // IOBYTE
        self.memory.write(0x0004, 0x00); // current drive

        self.memory.write(0x0005, 0xC3); // JP (data only; trapped before fetch)
        self.memory.write(0x0006, (addr::BIOS_TARGET & 0xFF) as u8);
        self.memory.write(0x0007, (addr::BIOS_TARGET >> 8) as u8);
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    /// Load a `.COM` image into memory at the Transient Program Area
    /// (0x0100), truncated if it would run past the top of memory.
    pub fn load_com(&mut self, data: &[u8]) {
        let max_len = (0x10000 - addr::TPA as usize).min(data.len());
        self.memory.copy_in(addr::TPA, &data[..max_len]);
    }

    /// Write raw bytes into guest memory at an arbitrary address -
    /// used to place FCBs and scratch data ahead of a run.
    pub fn load_at(&mut self, address: u16, data: &[u8]) {
        self.memory.copy_in(address, data);
    }

    /// Read back `len` bytes of guest memory starting at `address`.
    pub fn peek(&self, address: u16, len: usize) -> Vec<u8> {
        self.memory.copy_out(address, len)
    }

    /// Run from the CP/M conventional entry point: `PC=0x0100`,
    /// `SP=0x0000` so the first stack push lands at 0xFFFF, all other
    /// registers zero.
    pub fn run(&mut self) -> CpmExitInfo {
        self.run_from(addr::TPA)
    }

    fn run_from(&mut self, start_address: u16) -> CpmExitInfo {
        self.cpu = Z80NMOS::default();
        self.cpu.set_pc(start_address);
        self.cpu.set_sp(0x0000);

        loop {
            let pc = self.cpu.get_pc();

            if pc == addr::WARM_BOOT {
                return CpmExitInfo {
                    reason: ExitReason::WarmBoot,
                    pc,
                };
            }

            if pc == addr::BDOS_ENTRY {
                if let Some(exit) = self.handle_bdos() {
                    return exit;
                }
                // Emulate the RET the real BDOS entry would execute,
                // without the CPU ever fetching it: pop the return
                // address CALL 5 pushed and resume there.
                let ret_addr = self.pop16();
                self.cpu.set_pc(ret_addr);
                continue;
            }

            let mut bus = Bus {
                memory: &mut self.memory,
            };
            let _ = self
                .cpu
                .execute_next(&mut bus, &mut self.clock, None::<fn(z80emu::CpuDebug)>);

            if self.cpu.is_halt() {
                return CpmExitInfo {
                    reason: ExitReason::Halt,
                    pc: self.cpu.get_pc(),
                };
            }
        }
    }

    fn pop16(&mut self) -> u16 {
        let sp = self.cpu.get_sp();
        let lo = self.memory.read(sp);
        let hi = self.memory.read(sp.wrapping_add(1));
        self.cpu.set_sp(sp.wrapping_add(2));
        u16::from_le_bytes([lo, hi])
    }

    /// Mirror a 16-bit BDOS result into A (low byte), B (high byte), and
    /// HL (full word) per the CP/M register-return convention.
    fn set_result(&mut self, result: u16) {
        self.cpu.set_reg(Reg8::A, None, (result & 0xFF) as u8);
        self.cpu.set_reg(Reg8::B, None, ((result >> 8) & 0xFF) as u8);
        self.cpu.set_reg16(StkReg16::HL, result);
    }

    fn read_fcb(&self, fcb_addr: u16) -> [u8; 36] {
        let bytes = self.memory.copy_out(fcb_addr, 36);
        let mut fcb = [0u8; 36];
        fcb.copy_from_slice(&bytes);
        fcb
    }

    /// Perform one BDOS call. Returns `Some(exit)` if the program
    /// should terminate as a result (Program Terminate, or an
    /// unrecognized function number - fail-fast, since silently
    /// returning success would corrupt guest state).
    fn handle_bdos(&mut self) -> Option<CpmExitInfo> {
        let func = self.cpu.get_reg(Reg8::C, None);
        let de = self.cpu.get_reg16(StkReg16::DE);
        let e = self.cpu.get_reg(Reg8::E, None);

        log::debug!(target: "cpm_core::bdos", "function {func} (de={de:#06x})");

        match BdosFunction::try_from(func) {
            Ok(BdosFunction::ProgramTerminate) => {
                return Some(CpmExitInfo {
                    reason: ExitReason::ProgramTerminate,
                    pc: self.cpu.get_pc(),
                });
            }
            Ok(BdosFunction::ConsoleOutput) => self.console.write(e),
            Ok(BdosFunction::DirectConsoleIO) => self.bdos_direct_console_io(e),
            Ok(BdosFunction::BufferedInput) => self.bdos_buffered_input(de),
            Ok(BdosFunction::ResetAllDrives) => self.set_result(0),
            Ok(BdosFunction::SelectDrive) => {
                let result = if e == 0 { 0x0000 } else { 0x00FF };
                self.set_result(result);
            }
            Ok(BdosFunction::OpenFile) => self.bdos_open_file(de),
            Ok(BdosFunction::CloseFile) => self.bdos_close_file(de),
            Ok(BdosFunction::DeleteFile) => self.bdos_delete_file(de),
            Ok(BdosFunction::ReadSequential) => self.bdos_read_sequential(de),
            Ok(BdosFunction::WriteSequential) => self.bdos_write_sequential(de),
            Ok(BdosFunction::MakeFile) => self.bdos_make_file(de),
            Ok(BdosFunction::GetDrive) => self.set_result(0),
            Ok(BdosFunction::ReadRandom) => self.bdos_read_random(de),
            Err(code) => {
                let name = unsupported_function_name(code).unwrap_or("unknown function");
                let message =
                    format!("unsupported BDOS function {code} ({name}), argument {de:#06x}");
                log::error!(target: "cpm_core::bdos", "fatal: {message}");
                return Some(CpmExitInfo {
                    reason: ExitReason::FatalDispatch(message),
                    pc: self.cpu.get_pc(),
                });
            }
        }

        None
    }

    fn bdos_direct_console_io(&mut self, e: u8) {
        if e == 0xFF {
            // Non-blocking read, no echo, no line editing.
            let mut byte = self.console.get_key().unwrap_or(0);
            if byte == b'\n' {
                byte = b'\r';
            }
            self.set_result(byte as u16);
        } else {
            // Any other E is a character to output, same as function 2.
            self.console.write(e);
            self.set_result(0);
        }
    }

    fn bdos_buffered_input(&mut self, de: u16) {
        let descriptor = if de == 0 { self.dma } else { de };
        let max_len = (self.memory.read(descriptor) as usize).max(2);
        let capacity = max_len - 2;

        let mut pos = 0usize;
        loop {
            let ch = self.console.wait_for_key();
            if ch == b'\r' || ch == b'\n' {
                break;
            } else if ch == 8 || ch == 127 {
                if pos > 0 {
                    pos -= 1;
                    self.console.write(8);
                    self.console.write(b' ');
                    self.console.write(8);
                }
            } else if pos < capacity {
                self.memory.write(descriptor + 2 + pos as u16, ch);
                pos += 1;
                self.console.write(ch);
            }
        }

        self.memory.write(descriptor + 1, pos as u8);
        self.set_result(0);
    }

    fn bdos_open_file(&mut self, fcb_addr: u16) {
        let bytes = self.read_fcb(fcb_addr);
        let fcb = Fcb::new(&bytes);
        let name = fcb.canonical_filename();

        if fcb.has_wildcard() {
            self.set_result(ExtendedError::FilenameContainsWildcard.result_word());
            return;
        }

        match self.files.open_existing(&name) {
            Ok(_) => self.set_result(0),
            Err(CpmError::FileAlreadyOpen(_)) => {
                self.set_result(ExtendedError::FileAlreadyOpen.result_word());
            }
            Err(_) => self.set_result(0x00FF),
        }
    }

    fn bdos_close_file(&mut self, fcb_addr: u16) {
        let name = Fcb::new(&self.read_fcb(fcb_addr)).canonical_filename();

        match self.files.close(&name) {
            Ok(()) => self.set_result(0),
            Err(_) => self.set_result(0x00FF),
        }
    }

    fn bdos_delete_file(&mut self, fcb_addr: u16) {
        let bytes = self.read_fcb(fcb_addr);
        let fcb = Fcb::new(&bytes);
        let name = fcb.canonical_filename();

        if fcb.has_wildcard() {
            // Not walked for matches; deletion requires an exact,
            // unambiguous name.
            self.set_result(ExtendedError::FilenameContainsWildcard.result_word());
            return;
        }

        match self.files.delete(&name) {
            Ok(()) => self.set_result(0),
            Err(CpmError::FileAlreadyOpen(_)) => {
                self.set_result(ExtendedError::FileAlreadyOpen.result_word());
            }
            Err(_) => self.set_result(0x00FF),
        }
    }

    fn bdos_make_file(&mut self, fcb_addr: u16) {
        let bytes = self.read_fcb(fcb_addr);
        let fcb = Fcb::new(&bytes);
        let name = fcb.canonical_filename();

        if fcb.has_wildcard() {
            self.set_result(ExtendedError::FilenameContainsWildcard.result_word());
            return;
        }

        match self.files.create(&name) {
            Ok(_) => self.set_result(0),
            Err(CpmError::FileAlreadyOpen(_)) => {
                self.set_result(ExtendedError::FileAlreadyExists.result_word());
            }
            Err(_) => self.set_result(ExtendedError::SoftwareError.result_word()),
        }
    }

    fn bdos_read_sequential(&mut self, fcb_addr: u16) {
        let name = Fcb::new(&self.read_fcb(fcb_addr)).canonical_filename();

        let Some(handle) = self.files.lookup(&name) else {
            self.set_result(9);
            return;
        };

        use std::io::Read;
        let mut buf = [0u8; RECORD_SIZE];
        let file = &mut self.files.get_mut(handle).expect("handle is valid").file;
        let n = match file.read(&mut buf) {
            Ok(n) => n,
            Err(_) => {
                self.set_result(ExtendedError::SoftwareError.result_word());
                return;
            }
        };

        if n == 0 {
            self.set_result(1); // end of file
            return;
        }

        buf[n..].fill(0);
        let dma = self.dma;
        self.memory.copy_in(dma, &buf);
        self.set_result(0);
    }

    fn bdos_write_sequential(&mut self, fcb_addr: u16) {
        let name = Fcb::new(&self.read_fcb(fcb_addr)).canonical_filename();

        let Some(handle) = self.files.lookup(&name) else {
            self.set_result(9);
            return;
        };

        use std::io::Write as _;
        let record = self.memory.copy_out(self.dma, RECORD_SIZE);
        let file = &mut self.files.get_mut(handle).expect("handle is valid").file;
        match file.write_all(&record) {
            Ok(()) => self.set_result(0),
            Err(_) => self.set_result(ExtendedError::SoftwareError.result_word()),
        }
    }

    fn bdos_read_random(&mut self, fcb_addr: u16) {
        let fcb_bytes = self.read_fcb(fcb_addr);
        let fcb = Fcb::new(&fcb_bytes);
        let name = fcb.canonical_filename();
        let record = fcb.random_record();

        let Some(handle) = self.files.lookup(&name) else {
            self.set_result(9);
            return;
        };

        use std::io::{Read, Seek, SeekFrom};
        let offset = record as u64 * RECORD_SIZE as u64;
        let file = &mut self.files.get_mut(handle).expect("handle is valid").file;

        if file.seek(SeekFrom::Start(offset)).is_err() {
            self.set_result(6); // record number out of range
            return;
        }

        let mut buf = [0u8; RECORD_SIZE];
        let n = file.read(&mut buf).unwrap_or(0);
        if n == 0 {
            self.set_result(1); // reading unwritten data
            return;
        }

        buf[n..].fill(0);
        let dma = self.dma;
        self.memory.copy_in(dma, &buf);
        self.set_result(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HeadlessConsole;

    #[test]
    fn test_zero_page_seeds_bdos_vector() {
        let emu = CpmEmulator::new(HeadlessConsole::new());
        assert_eq!(emu.memory.read(0x0005), 0xC3);
        assert_eq!(emu.memory.read(0x0006), (addr::BIOS_TARGET & 0xFF) as u8);
        assert_eq!(emu.memory.read(0x0007), (addr::BIOS_TARGET >> 8) as u8);
    }

    #[test]
    fn test_hello_world_via_console_output() {
        // LD C,2; LD E,'H'; CALL 5; LD E,'i'; CALL 5; JP 0
        let program = [
            0x0E, 0x02, 0x1E, b'H', 0xCD, 0x05, 0x00, 0x1E, b'i', 0xCD, 0x05, 0x00, 0xC3, 0x00,
            0x00,
        ];

        let mut emu = CpmEmulator::new(HeadlessConsole::new());
        emu.load_com(&program);

        let result = emu.run();

        assert_eq!(result.reason, ExitReason::WarmBoot);
        assert_eq!(emu.console().output_string(), "Hi");
    }

    #[test]
    fn test_warm_boot_terminates_cleanly() {
        let program = [0xC3, 0x00, 0x00]; // JP 0
        let mut emu = CpmEmulator::new(HeadlessConsole::new());
        emu.load_com(&program);

        let result = emu.run();
        assert_eq!(result.reason, ExitReason::WarmBoot);
        assert!(emu.console().output().is_empty());
    }

    #[test]
    fn test_unknown_bdos_function_is_fatal() {
        // LD C,200; CALL 5
        let program = [0x0E, 200, 0xCD, 0x05, 0x00];
        let mut emu = CpmEmulator::new(HeadlessConsole::new());
        emu.load_com(&program);

        let result = emu.run();
        assert!(matches!(result.reason, ExitReason::FatalDispatch(_)));
    }

    #[test]
    fn test_program_terminate_function_zero() {
        // LD C,0; CALL 5
        let program = [0x0E, 0x00, 0xCD, 0x05, 0x00];
        let mut emu = CpmEmulator::new(HeadlessConsole::new());
        emu.load_com(&program);

        let result = emu.run();
        assert_eq!(result.reason, ExitReason::ProgramTerminate);
    }

    #[test]
    fn test_direct_console_input_consumes_queued_key() {
        // LD C,6; LD E,0xFF; CALL 5; LD C,0; CALL 5
        let program = [
            0x0E, 0x06, 0x1E, 0xFF, 0xCD, 0x05, 0x00, 0x0E, 0x00, 0xCD, 0x05, 0x00,
        ];
        let mut emu = CpmEmulator::new(HeadlessConsole::with_input(b"\n"));
        emu.load_com(&program);
        emu.run();
        assert!(!emu.console().has_key());
    }
}
