//! BDOS (Basic Disk Operating System) implementation.
//!
//! This module handles the CP/M 2.2 system calls this emulator services,
//! plus the symbolic naming of the much larger CP/M/MP/M/CP/Net function
//! space (supplemented from the original distribution's function table)
//! so the fatal fall-through path can name what it refuses to do.

pub mod fcb;

pub use fcb::Fcb;

/// BDOS function numbers this dispatcher actually implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BdosFunction {
    ProgramTerminate = 0,
    ConsoleOutput = 2,
    DirectConsoleIO = 6,
    BufferedInput = 10,
    ResetAllDrives = 13,
    SelectDrive = 14,
    OpenFile = 15,
    CloseFile = 16,
    DeleteFile = 19,
    ReadSequential = 20,
    WriteSequential = 21,
    MakeFile = 22,
    GetDrive = 25,
    ReadRandom = 33,
}

impl TryFrom<u8> for BdosFunction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ProgramTerminate),
            2 => Ok(Self::ConsoleOutput),
            6 => Ok(Self::DirectConsoleIO),
            10 => Ok(Self::BufferedInput),
            13 => Ok(Self::ResetAllDrives),
            14 => Ok(Self::SelectDrive),
            15 => Ok(Self::OpenFile),
            16 => Ok(Self::CloseFile),
            19 => Ok(Self::DeleteFile),
            20 => Ok(Self::ReadSequential),
            21 => Ok(Self::WriteSequential),
            22 => Ok(Self::MakeFile),
            25 => Ok(Self::GetDrive),
            33 => Ok(Self::ReadRandom),
            _ => Err(value),
        }
    }
}

/// Symbolic names for BDOS functions this dispatcher recognizes by number
/// but deliberately does not implement (CP/M 1-3, MP/M, CP/Net, Z80DOS).
/// Purely cosmetic: used only to make the fatal fall-through diagnostic
/// readable. Grounded on `examples/original_source/include/bdos.hpp`.
pub fn unsupported_function_name(func: u8) -> Option<&'static str> {
    let name = match func {
        1 => "C_READ (console input)",
        3 => "A_READ (reader input)",
        4 => "A_WRITE (punch output)",
        5 => "L_WRITE (list output)",
        7 => "A_STATIN / get IOBYTE",
        8 => "A_STATOUT / set IOBYTE",
        9 => "C_WRITESTR ($-terminated string)",
        11 => "C_STAT (console status)",
        12 => "S_BDOSVER (return version)",
        17 => "F_SFIRST (search first)",
        18 => "F_SNEXT (search next)",
        23 => "F_RENAME (rename file)",
        24 => "DRV_LOGINVEC (login vector)",
        26 => "F_DMAOFF (set DMA address)",
        27 => "DRV_ALLOCVEC (allocation vector)",
        28 => "DRV_SETRO (set drive read-only)",
        29 => "DRV_ROVEC (read-only vector)",
        30 => "F_ATTRIB (set file attributes)",
        31 => "DRV_DPB (get disk parameter block)",
        32 => "F_USERNUM (get/set user number)",
        34 => "F_WRITERAND (random write)",
        35 => "F_SIZE (compute file size)",
        36 => "F_RANDREC (set random record)",
        37 => "DRV_RESET (selective disk reset)",
        38 => "DRV_ACCESS (MP/M drive access)",
        39 => "DRV_FREE (MP/M drive free)",
        40 => "F_WRITEZF (random write, zero fill)",
        41..=50 => "MP/M process/queue/device function",
        54 | 55 => "Z80DOS/ZPM3 timestamp extension",
        59 | 60 => "CP/M 3 loader/RSX call",
        64..=71 => "CP/Net call",
        98..=112 => "CP/M 3 time/date/label/password/serial/console",
        128..=164 => "MP/M process/queue/device function",
        _ => return None,
    };
    Some(name)
}

/// Record size in CP/M (always 128 bytes).
pub const RECORD_SIZE: usize = 128;

/// Extended error kinds carried in the high byte of HL on a reportable
/// failure (low byte of HL / register A is 0xFF in all these cases).
/// The exact numeric values are this implementation's own convention -
/// CP/M 3's extended error taxonomy is explicitly not reproduced bit-
/// exact outside of registers A and H.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtendedError {
    FileAlreadyOpen = 0x01,
    FilenameContainsWildcard = 0x02,
    FileAlreadyExists = 0x03,
    SoftwareError = 0x04,
}

impl ExtendedError {
    /// Build the full 16-bit BDOS result word for this error: low byte
    /// 0xFF (mirrored into A), high byte this error's code.
    pub fn result_word(self) -> u16 {
        ((self as u16) << 8) | 0x00FF
    }
}

/// Memory addresses significant to this single-drive, no-CBIOS model.
pub mod addr {
    /// Transient Program Area - where .COM files load.
    pub const TPA: u16 = 0x0100;
    /// Warm-boot vector. A fetch here terminates the emulator.
    pub const WARM_BOOT: u16 = 0x0000;
    /// BDOS entry point. A fetch here traps to the dispatcher.
    pub const BDOS_ENTRY: u16 = 0x0005;
    /// Default DMA buffer.
    pub const DEFAULT_DMA: u16 = 0x0080;
    /// Conventional BIOS location encoded as data at 0x0005-0x0007 for
    /// guests that inspect, but never execute through, the JP at 0x0005.
    pub const BIOS_TARGET: u16 = 0xFE00;
}
