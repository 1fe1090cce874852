//! Integration tests driving whole `.COM` byte sequences through the
//! BDOS dispatcher's file-handling functions, against real host files
//! in a temporary working directory.
//!
//! Covers scenarios 3-6 from the specification's testable properties:
//! open-read-close, random read beyond EOF, wildcard rejection on open,
//! and duplicate open rejection. Scenarios 1-2 (console output, warm
//! boot) are already exercised in `emulator.rs`'s unit tests.

use cpm_core::{CpmEmulator, HeadlessConsole};

const FCB_SIZE: usize = 36;
const DMA: u16 = 0x0080;

const FCB1: u16 = 0x1000; // TEST.TXT
const FCB2: u16 = 0x1100; // X.DAT
const FCB3: u16 = 0x1200; // ?EST.TXT (wildcard)

const AA_BLOCK: u16 = 0x1300; // 128 bytes of 0xAA, for scenario 3's write
const ZERO_BLOCK: u16 = 0x1380; // 128 zero bytes, to clear DMA before a read
const BB_BLOCK: u16 = 0x1500; // 128 bytes of 0xBB, for scenario 4's write

const R_MAKE1: u16 = 0x1400;
const R_WRITE1: u16 = 0x1401;
const R_CLOSE1: u16 = 0x1402;
const R_OPEN1: u16 = 0x1403;
const R_READ1: u16 = 0x1404;
const R_READ2: u16 = 0x1405;

const R_MAKE2: u16 = 0x1410;
const R_WRITE2: u16 = 0x1411;
const R_CLOSE2: u16 = 0x1412;
const R_OPEN2: u16 = 0x1413;
const R_READRAND_EOF: u16 = 0x1414;
const R_READRAND_OK: u16 = 0x1415;

const R_WILD_A: u16 = 0x1420;
const R_WILD_H: u16 = 0x1421;

const R_DUP_OPEN1: u16 = 0x1430;
const R_DUP_OPEN2_A: u16 = 0x1431;
const R_DUP_OPEN2_H: u16 = 0x1432;
const R_DUP_CLOSE: u16 = 0x1433;
const R_DUP_OPEN3: u16 = 0x1434;

const F_OPEN: u8 = 15;
const F_CLOSE: u8 = 16;
const F_READ: u8 = 20;
const F_WRITE: u8 = 21;
const F_MAKE: u8 = 22;
const F_READRAND: u8 = 33;

fn fcb(name: &str, ext: &str) -> [u8; FCB_SIZE] {
    let mut bytes = [0u8; FCB_SIZE];
    let name_bytes = name.as_bytes();
    let ext_bytes = ext.as_bytes();
    for i in 0..8 {
        bytes[1 + i] = *name_bytes.get(i).unwrap_or(&b' ');
    }
    for i in 0..3 {
        bytes[9 + i] = *ext_bytes.get(i).unwrap_or(&b' ');
    }
    bytes
}

/// Tiny Z80 assembler, just expressive enough for BDOS call sequences.
struct Asm(Vec<u8>);

impl Asm {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn ld_de(mut self, nn: u16) -> Self {
        let b = nn.to_le_bytes();
        self.0.extend([0x11, b[0], b[1]]);
        self
    }

    fn ld_hl(mut self, nn: u16) -> Self {
        let b = nn.to_le_bytes();
        self.0.extend([0x21, b[0], b[1]]);
        self
    }

    fn ld_bc(mut self, nn: u16) -> Self {
        let b = nn.to_le_bytes();
        self.0.extend([0x01, b[0], b[1]]);
        self
    }

    fn ld_c(mut self, n: u8) -> Self {
        self.0.extend([0x0E, n]);
        self
    }

    fn ld_a(mut self, n: u8) -> Self {
        self.0.extend([0x3E, n]);
        self
    }

    /// LDIR: copy BC bytes from (HL) to (DE).
    fn ldir(mut self) -> Self {
        self.0.extend([0xED, 0xB0]);
        self
    }

    fn call_bdos(mut self) -> Self {
        self.0.extend([0xCD, 0x05, 0x00]);
        self
    }

    /// LD (nn),A
    fn store_a(mut self, addr: u16) -> Self {
        let b = addr.to_le_bytes();
        self.0.extend([0x32, b[0], b[1]]);
        self
    }

    /// LD A,H then LD (nn),A - stashes the result word's high byte.
    fn store_h_as_a(mut self, addr: u16) -> Self {
        self.0.push(0x7C);
        self.store_a(addr)
    }

    fn jp0(mut self) -> Self {
        self.0.extend([0xC3, 0x00, 0x00]);
        self
    }

    /// Fill the default DMA buffer (128 bytes) from a static source block.
    fn fill_dma(self, src: u16) -> Self {
        self.ld_hl(src).ld_de(DMA).ld_bc(128).ldir()
    }

    /// LD DE,fcb; LD C,func; CALL 5.
    fn call(self, func: u8, fcb_addr: u16) -> Self {
        self.ld_de(fcb_addr).ld_c(func).call_bdos()
    }

    fn finish(self) -> Vec<u8> {
        self.0
    }
}

#[test]
fn end_to_end_file_scenarios() {
    let original_dir = std::env::current_dir().expect("current dir");
    let temp = tempfile::tempdir().expect("tempdir");
    std::env::set_current_dir(temp.path()).expect("chdir into tempdir");

    let program = Asm::new()
        // Scenario 3: make, write, close, reopen, read, read-past-eof, close.
        .fill_dma(AA_BLOCK)
        .call(F_MAKE, FCB1)
        .store_a(R_MAKE1)
        .call(F_WRITE, FCB1)
        .store_a(R_WRITE1)
        .call(F_CLOSE, FCB1)
        .store_a(R_CLOSE1)
        .call(F_OPEN, FCB1)
        .store_a(R_OPEN1)
        .fill_dma(ZERO_BLOCK)
        .call(F_READ, FCB1)
        .store_a(R_READ1)
        .call(F_READ, FCB1)
        .store_a(R_READ2)
        .call(F_CLOSE, FCB1)
        // Scenario 4: random read beyond EOF.
        .fill_dma(BB_BLOCK)
        .call(F_MAKE, FCB2)
        .store_a(R_MAKE2)
        .call(F_WRITE, FCB2)
        .store_a(R_WRITE2)
        .call(F_CLOSE, FCB2)
        .store_a(R_CLOSE2)
        .call(F_OPEN, FCB2)
        .store_a(R_OPEN2)
        .ld_a(5)
        .store_a(FCB2 + 0x21) // random record = 5 (offset 640, past EOF)
        .call(F_READRAND, FCB2)
        .store_a(R_READRAND_EOF)
        .ld_a(0)
        .store_a(FCB2 + 0x21) // random record = 0
        .call(F_READRAND, FCB2)
        .store_a(R_READRAND_OK)
        // Scenario 5: wildcard rejection on open.
        .call(F_OPEN, FCB3)
        .store_a(R_WILD_A)
        .store_h_as_a(R_WILD_H)
        // Scenario 6: duplicate open rejection (FCB1 was closed above).
        .call(F_OPEN, FCB1)
        .store_a(R_DUP_OPEN1)
        .call(F_OPEN, FCB1)
        .store_a(R_DUP_OPEN2_A)
        .store_h_as_a(R_DUP_OPEN2_H)
        .call(F_CLOSE, FCB1)
        .store_a(R_DUP_CLOSE)
        .call(F_OPEN, FCB1)
        .store_a(R_DUP_OPEN3)
        .call(F_CLOSE, FCB1)
        .jp0()
        .finish();

    let mut emu = CpmEmulator::new(HeadlessConsole::new());
    emu.load_at(FCB1, &fcb("TEST", "TXT"));
    emu.load_at(FCB2, &fcb("X", "DAT"));
    emu.load_at(FCB3, &fcb("?EST", "TXT"));
    emu.load_at(AA_BLOCK, &[0xAA; 128]);
    emu.load_at(ZERO_BLOCK, &[0x00; 128]);
    emu.load_at(BB_BLOCK, &[0xBB; 128]);
    emu.load_com(&program);

    emu.run();

    std::env::set_current_dir(&original_dir).expect("restore cwd");

    // Scenario 3: open-read-close a 128-byte file.
    assert_eq!(emu.peek(R_MAKE1, 1), vec![0]);
    assert_eq!(emu.peek(R_WRITE1, 1), vec![0]);
    assert_eq!(emu.peek(R_CLOSE1, 1), vec![0]);
    assert_eq!(emu.peek(R_OPEN1, 1), vec![0]);
    assert_eq!(emu.peek(R_READ1, 1), vec![0]);
    assert_eq!(emu.peek(DMA, 128), vec![0xAA; 128]);
    assert_eq!(emu.peek(R_READ2, 1), vec![1], "second read must report EOF");

    // Scenario 4: random read beyond EOF, then a valid random read.
    assert_eq!(emu.peek(R_MAKE2, 1), vec![0]);
    assert_eq!(emu.peek(R_WRITE2, 1), vec![0]);
    assert_eq!(emu.peek(R_OPEN2, 1), vec![0]);
    assert_eq!(
        emu.peek(R_READRAND_EOF, 1),
        vec![1],
        "record 5 is past the single 128-byte record written"
    );
    assert_eq!(emu.peek(R_READRAND_OK, 1), vec![0]);

    // Scenario 5: a wildcard filename is rejected, not opened.
    assert_eq!(emu.peek(R_WILD_A, 1), vec![0xFF]);
    assert_eq!(emu.peek(R_WILD_H, 1), vec![0x02], "FilenameContainsWildcard");

    // Scenario 6: a second open of an already-open file is rejected;
    // closing and reopening succeeds again.
    assert_eq!(emu.peek(R_DUP_OPEN1, 1), vec![0]);
    assert_eq!(emu.peek(R_DUP_OPEN2_A, 1), vec![0xFF]);
    assert_eq!(emu.peek(R_DUP_OPEN2_H, 1), vec![0x01], "FileAlreadyOpen");
    assert_eq!(emu.peek(R_DUP_CLOSE, 1), vec![0]);
    assert_eq!(emu.peek(R_DUP_OPEN3, 1), vec![0]);
}
