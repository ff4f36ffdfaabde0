use std::io;

use thiserror::Error;

/// Failures surfaced by parsing, extraction, verification and writing.
///
/// Parse errors abort the read; integrity mismatches abort the current
/// operation but leave the package usable.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("given file is not a VPK (magic 0x{0:08X})")]
    InvalidMagic(u32),

    #[error("bad VPK version: {0}")]
    InvalidVersion(u32),

    #[error("unsupported VPK version 0x{0:08X} (Respawn dialect)")]
    Unsupported(u32),

    #[error("invalid VPK data: {0}")]
    InvalidFormat(String),

    #[error("{0}")]
    InvalidState(&'static str),

    #[error("{0}")]
    OutOfRange(&'static str),

    #[error("CRC32 mismatch for read data (expected {expected:08X}, got {actual:08X}).")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("{subject} checksum mismatch (expected {expected}, got {actual})")]
    HashMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    #[error("VPK signature is not valid")]
    SignatureInvalid,

    #[error("chunk file '{0}' not found")]
    ChunkNotFound(String),

    #[error("archive does not fit in 0x7FFE chunk files")]
    TooManyChunks,
}

pub type Result<T> = std::result::Result<T, Error>;
