use std::fmt::Display;
use std::fmt::Error;
use std::fmt::Formatter;

use crate::zbytes;

/// Smallest plausible story file. Anything under a kilobyte cannot hold a
/// header, object table, dictionary and code at once.
pub const MIN_IMAGE_SIZE: usize = 1024;

/// Version 3 files top out well below this; the cap guards against loading
/// something that is not a story file at all.
pub const MAX_IMAGE_SIZE: usize = 256 * 1024;

/// Parsed copy of the 64-byte story file header.
///
/// Addresses are kept as the raw 16-bit header words; the program counter
/// and packed addresses widen to 32 bits elsewhere.
#[derive(Debug)]
pub struct Header {
    pub version: u8,
    pub flags1: u8,
    /// Bit 4 of flags1: the game wants a status line.
    pub status_line: bool,
    pub high_mem: u16,
    pub initial_pc: u16,
    pub dictionary: u16,
    pub object_table: u16,
    pub globals: u16,
    pub static_mem: u16,
    pub abbrev_table: u16,
    /// File length in bytes (the header stores it in 2-byte units).
    pub file_len: u32,
    pub checksum: u16,
}

impl Header {
    /// Parse and validate the header. Any failure here is fatal at load
    /// time; no execution begins on a malformed image.
    pub fn parse(mem: &[u8]) -> Result<Header, String> {
        if mem.len() < 64 {
            return Err(format!("Story file too small for a header: {} bytes", mem.len()));
        }
        if mem.len() < MIN_IMAGE_SIZE || mem.len() > MAX_IMAGE_SIZE {
            return Err(format!(
                "Story file size {} outside supported range {}..{} bytes",
                mem.len(),
                MIN_IMAGE_SIZE,
                MAX_IMAGE_SIZE
            ));
        }

        let header = Header {
            version: mem[0x00],
            flags1: mem[0x01],
            status_line: mem[0x01] & 0x10 != 0,
            high_mem: zbytes::read_word(mem, 0x04)?,
            initial_pc: zbytes::read_word(mem, 0x06)?,
            dictionary: zbytes::read_word(mem, 0x08)?,
            object_table: zbytes::read_word(mem, 0x0A)?,
            globals: zbytes::read_word(mem, 0x0C)?,
            static_mem: zbytes::read_word(mem, 0x0E)?,
            abbrev_table: zbytes::read_word(mem, 0x18)?,
            file_len: zbytes::read_word(mem, 0x1A)? as u32 * 2,
            checksum: zbytes::read_word(mem, 0x1C)?,
        };

        if header.version != 3 {
            return Err(format!(
                "Unsupported Z-machine version {}, only version 3 story files run here",
                header.version
            ));
        }

        let len = mem.len() as u16;
        for (what, addr) in [
            ("initial program counter", header.initial_pc),
            ("dictionary", header.dictionary),
            ("object table", header.object_table),
            ("global variables", header.globals),
            ("static memory base", header.static_mem),
        ] {
            if addr == 0 || (mem.len() <= u16::MAX as usize && addr >= len) {
                return Err(format!("Header {} address {:04x} out of range", what, addr));
            }
        }
        // The abbreviation table may be absent (zero) but must not dangle.
        if header.abbrev_table as usize >= mem.len() {
            return Err(format!(
                "Header abbreviations address {:04x} out of range",
                header.abbrev_table
            ));
        }

        Ok(header)
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "
Z-code version:           {}
Start PC:                 {:#06x}
Dictionary address:       {:#06x}
Object table address:     {:#06x}
Global variables address: {:#06x}
Size of dynamic memory:   {:#06x}
Abbreviations address:    {:#06x}
File size:                {:#06x}
Checksum:                 {:#06x}
",
            self.version,
            self.initial_pc,
            self.dictionary,
            self.object_table,
            self.globals,
            self.static_mem,
            self.abbrev_table,
            self.file_len,
            self.checksum,
        )
    }
}
