// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minimal Intel HEX reader.
//!
//! Reads the subset of the format that AVR toolchains emit for parts with
//! a 16-bit address space: data records (type 00) and the end-of-file
//! record (type 01). Record checksums are verified and both hex digit
//! cases are accepted. Extended-linear-address records (type 04) would
//! silently alias addresses if ignored, so they are rejected with their
//! own error; all other record types are rejected as unsupported.
//!
//! The result is one contiguous image: data records land at their record
//! address, and any gaps between records read as 0xFF, the erased state
//! of the flash this image is destined for.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum HexError {
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("line {line}: record does not start with ':'")]
    MissingStartCode { line: usize },

    #[error("line {line}: invalid hex digit")]
    BadDigit { line: usize },

    #[error("line {line}: record shorter than its declared length")]
    Truncated { line: usize },

    #[error("line {line}: checksum mismatch (record sums to {sum:#04x})")]
    Checksum { line: usize, sum: u8 },

    #[error("line {line}: extended linear address records not supported")]
    ExtendedAddress { line: usize },

    #[error("line {line}: unsupported record type {kind:#04x}")]
    UnsupportedRecord { line: usize, kind: u8 },

    #[error("line {line}: record ends beyond the {max}-byte image")]
    TooBig { line: usize, max: usize },
}

/// A decoded image.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Image {
    /// Contiguous bytes from address zero up to the highest address any
    /// data record touched; gaps are 0xFF.
    pub data: Vec<u8>,
    /// Total payload bytes across all data records (differs from
    /// `data.len()` only when records leave gaps).
    pub record_bytes: usize,
}

/// Reads and parses `path`. `max_size` bounds the image (normally the
/// target's flash size).
pub fn load(path: &Path, max_size: usize) -> Result<Image, HexError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        HexError::Io {
            path: path.to_owned(),
            source,
        }
    })?;
    parse(&text, max_size)
}

/// Parses HEX text. Lines may end in `\r`, `\n`, or both; blank lines are
/// tolerated.
pub fn parse(text: &str, max_size: usize) -> Result<Image, HexError> {
    let mut image = Image::default();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim_end_matches('\r');
        if trimmed.is_empty() {
            continue;
        }

        let Some(hex) = trimmed.strip_prefix(':') else {
            return Err(HexError::MissingStartCode { line });
        };

        let record = decode_pairs(hex, line)?;
        // Length, 16-bit address, type, and checksum are always present.
        if record.len() < 5 {
            return Err(HexError::Truncated { line });
        }

        let data_len = record[0] as usize;
        if record.len() < 5 + data_len {
            return Err(HexError::Truncated { line });
        }
        let record = &record[..5 + data_len];

        let sum = record
            .iter()
            .fold(0u8, |acc, &byte| acc.wrapping_add(byte));
        if sum != 0 {
            return Err(HexError::Checksum { line, sum });
        }

        let address = u16::from_be_bytes([record[1], record[2]]) as usize;
        let kind = record[3];
        let payload = &record[4..4 + data_len];

        match kind {
            0x00 => {
                let end = address + data_len;
                if end > max_size {
                    return Err(HexError::TooBig {
                        line,
                        max: max_size,
                    });
                }
                if end > image.data.len() {
                    image.data.resize(end, 0xFF);
                }
                image.data[address..end].copy_from_slice(payload);
                image.record_bytes += data_len;
            }
            0x01 => break,
            0x04 => return Err(HexError::ExtendedAddress { line }),
            kind => {
                return Err(HexError::UnsupportedRecord { line, kind })
            }
        }
    }

    Ok(image)
}

/// Decodes a run of hex digit pairs, either case.
fn decode_pairs(hex: &str, line: usize) -> Result<Vec<u8>, HexError> {
    let digits = hex.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(HexError::Truncated { line });
    }

    digits
        .chunks_exact(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16);
            let lo = (pair[1] as char).to_digit(16);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((hi * 16 + lo) as u8),
                _ => Err(HexError::BadDigit { line }),
            }
        })
        .collect()
}
