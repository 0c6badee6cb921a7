//! Program Image: the flat memory contents produced by the assembler.

use crate::isa::IsaConfig;
use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;
use thiserror::Error;

/// Errors loading or saving an image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The byte count does not match the configured regions.
    #[error("image is {found} bytes, expected {expected}")]
    WrongSize {
        /// Bytes expected for the configuration.
        expected: usize,
        /// Bytes supplied.
        found: usize,
    },

    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An assembled program: instruction region followed by configuration
/// region. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    isa: IsaConfig,
    bytes: Vec<u8>,
}

impl ProgramImage {
    pub(crate) fn from_parts(isa: IsaConfig, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), isa.image_len());
        Self { isa, bytes }
    }

    /// Wrap raw image bytes, checking the length against `isa`.
    pub fn from_bytes(isa: IsaConfig, bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.len() != isa.image_len() {
            return Err(ImageError::WrongSize {
                expected: isa.image_len(),
                found: bytes.len(),
            });
        }
        Ok(Self { isa, bytes })
    }

    /// Read a raw image file.
    pub fn load(path: &Path, isa: IsaConfig) -> Result<Self, ImageError> {
        let bytes = std::fs::read(path)?;
        log::info!("Loaded image from {} ({} bytes)", path.display(), bytes.len());
        Self::from_bytes(isa, bytes)
    }

    /// Write the raw image bytes to a file.
    pub fn save(&self, path: &Path) -> Result<(), ImageError> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }

    /// The configuration this image was built for.
    pub fn isa(&self) -> &IsaConfig {
        &self.isa
    }

    /// All image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of memory lines.
    pub fn num_lines(&self) -> usize {
        self.bytes.len() / self.isa.bytes_in_line
    }

    /// Bytes of line `line`, or `None` past the end of the image.
    pub fn line(&self, line: usize) -> Option<&[u8]> {
        let width = self.isa.bytes_in_line;
        let start = line.checked_mul(width)?;
        self.bytes.get(start..start.checked_add(width)?)
    }

    /// The image as machine words, one little-endian word per line.
    ///
    /// Only meaningful for lines of at most 8 bytes.
    pub fn words(&self) -> Vec<u64> {
        self.bytes
            .chunks(self.isa.bytes_in_line)
            .map(|chunk| LittleEndian::read_uint(chunk, chunk.len()))
            .collect()
    }

    /// Instruction region bytes.
    pub fn instruction_region(&self) -> &[u8] {
        &self.bytes[..self.isa.instruction_lines * self.isa.bytes_in_line]
    }

    /// Configuration region bytes.
    pub fn config_region(&self) -> &[u8] {
        &self.bytes[self.isa.instruction_lines * self.isa.bytes_in_line..]
    }

    /// Hex dump of up to `lines` lines from `start_line`, one line per row.
    pub fn hex_dump(&self, start_line: usize, lines: usize) -> String {
        let mut out = String::new();
        for line in start_line..start_line.saturating_add(lines) {
            let Some(bytes) = self.line(line) else { break };
            out.push_str(&format!("{:04X}:", line));
            for b in bytes {
                out.push_str(&format!(" {:02X}", b));
            }
            out.push('\n');
        }
        out
    }
}
