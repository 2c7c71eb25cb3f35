//! ELF file loading
//!
//! Loads a little-endian RISC-V ELF executable into hart memory:
//! every PT_LOAD segment is copied to its physical address
//! (`p_filesz` bytes from the file, zero-filled up to `p_memsz`), and
//! the entry point address is reported for the caller to assign to
//! the pc. Segments that do not fit in the hart's memory are
//! rejected.

use std::path::Path;

use elf::abi::PT_LOAD;
use elf::endian::AnyEndian;
use elf::ElfBytes;
use log::info;
use thiserror::Error;

use crate::memory::Wordsize;
use crate::Hart;

#[derive(Debug, Error)]
pub enum ElfLoadError {
    #[error("failed to read ELF file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse ELF file: {0}")]
    Parse(#[from] elf::ParseError),
    #[error("ELF file contains no program headers")]
    NoSegments,
    #[error("segment at 0x{addr:x} ({size} bytes) does not fit in memory of size {memory_size}")]
    SegmentOutOfRange {
        addr: u64,
        size: u64,
        memory_size: u64,
    },
}

/// Read an ELF file from disk and load its PT_LOAD segments into the
/// hart's memory. Returns the entry point address on success.
pub fn load_elf_file(hart: &mut Hart, path: impl AsRef<Path>) -> Result<u64, ElfLoadError> {
    let file_data = std::fs::read(path.as_ref())?;
    let file = ElfBytes::<AnyEndian>::minimal_parse(file_data.as_slice())?;

    let segments = file.segments().ok_or(ElfLoadError::NoSegments)?;
    for header in segments.iter() {
        if header.p_type != PT_LOAD {
            continue;
        }
        let addr = header.p_paddr;
        let memory_size = hart.memory.size();
        let fits = addr
            .checked_add(header.p_memsz)
            .map(|end| end <= memory_size)
            .unwrap_or(false);
        if !fits {
            return Err(ElfLoadError::SegmentOutOfRange {
                addr,
                size: header.p_memsz,
                memory_size,
            });
        }
        info!(
            "loading segment: paddr=0x{:x} filesz=0x{:x} memsz=0x{:x}",
            addr, header.p_filesz, header.p_memsz
        );

        let data = file.segment_data(&header)?;
        for (offset, byte) in data.iter().enumerate() {
            hart.memory
                .write(addr + offset as u64, (*byte).into(), Wordsize::Byte)
                .expect("segment range was checked against the memory size");
        }
        // The part of the segment beyond the file image is zeroed
        // (typically .bss)
        for offset in header.p_filesz..header.p_memsz {
            hart.memory
                .write(addr + offset, 0, Wordsize::Byte)
                .expect("segment range was checked against the memory size");
        }
    }

    Ok(file.ehdr.e_entry)
}
