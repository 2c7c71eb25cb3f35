//! Hex file loading
//!
//! Loads a simple textual byte-image format into hart memory. Each
//! line either sets the write pointer (`@` followed by a hexadecimal
//! address) or holds one or more whitespace-separated tokens of two
//! hexadecimal digits, written as sequential bytes at the pointer.
//! Anything outside that grammar, including blank lines, is an
//! error, as is writing outside the memory.

use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::memory::Wordsize;
use crate::Hart;

#[derive(Debug, Error)]
pub enum HexLoadError {
    #[error("failed to read hex file: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: blank lines are not allowed")]
    BlankLine { line: usize },
    #[error("line {line}: malformed address token '{token}'")]
    MalformedAddress { line: usize, token: String },
    #[error("line {line}: malformed byte token '{token}'")]
    MalformedByte { line: usize, token: String },
    #[error("line {line}: write at 0x{addr:x} is outside the memory")]
    AddressOutOfRange { line: usize, addr: u64 },
}

/// Read a hex file from disk and set memory locations accordingly
pub fn load_hex_file(hart: &mut Hart, path: impl AsRef<Path>) -> Result<(), HexLoadError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let mut pointer: u64 = 0;
    for (n, line) in text.lines().enumerate() {
        let line_number = n + 1;
        let mut tokens = line.split_whitespace().peekable();
        if tokens.peek().is_none() {
            return Err(HexLoadError::BlankLine { line: line_number });
        }
        if let Some(address) = tokens.peek().and_then(|t| t.strip_prefix('@')) {
            pointer = u64::from_str_radix(address, 16).map_err(|_| {
                HexLoadError::MalformedAddress {
                    line: line_number,
                    token: line.trim().to_string(),
                }
            })?;
            tokens.next();
            // An address line holds nothing but the address
            if tokens.peek().is_some() {
                return Err(HexLoadError::MalformedAddress {
                    line: line_number,
                    token: line.trim().to_string(),
                });
            }
            debug!("hex load pointer moved to 0x{pointer:x}");
            continue;
        }
        for token in tokens {
            if token.len() != 2 {
                return Err(HexLoadError::MalformedByte {
                    line: line_number,
                    token: token.to_string(),
                });
            }
            let byte =
                u8::from_str_radix(token, 16).map_err(|_| HexLoadError::MalformedByte {
                    line: line_number,
                    token: token.to_string(),
                })?;
            hart.memory
                .write(pointer, byte.into(), Wordsize::Byte)
                .map_err(|_| HexLoadError::AddressOutOfRange {
                    line: line_number,
                    addr: pointer,
                })?;
            pointer += 1;
        }
    }
    Ok(())
}
