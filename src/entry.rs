//! Tree entries and chunk-hash table records.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Chunk index of entries whose bytes live in the directory file itself.
pub const EMBEDDED_CHUNK_INDEX: u16 = 0x7FFF;

/// Terminator closing every tree entry record.
pub const ENTRY_TERMINATOR: u16 = 0xFFFF;

/// On-disk size of one chunk-hash table record.
pub const CHUNK_HASH_RECORD_SIZE: u32 = 28;

/// A single logical file inside the archive.
///
/// `directory` and `type_name` are never empty; a single space marks a root
/// entry or a file without an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// File name without the extension.
    pub file_name: String,
    /// Normalized directory, `" "` when the entry sits at the root.
    pub directory: String,
    /// Extension without the dot, `" "` when absent.
    pub type_name: String,
    /// CRC32 of the complete content (preload and archive bytes).
    pub crc32: u32,
    /// Preload bytes stored inline in the tree; may be empty.
    pub small_data: Vec<u8>,
    /// Chunk file holding the body, or [`EMBEDDED_CHUNK_INDEX`].
    pub chunk_index: u16,
    /// Offset of the body inside its data region.
    pub offset: u32,
    /// Archive-resident byte count, preload excluded.
    pub length: u32,
}

impl Entry {
    /// Complete content size: archive bytes plus preload bytes.
    pub fn total_length(&self) -> u32 {
        self.length + self.small_data.len() as u32
    }

    /// Recomposes the logical path, skipping the space sentinels.
    pub fn full_path(&self) -> String {
        let mut path = String::new();
        if self.directory != " " {
            path.push_str(&self.directory);
            path.push('/');
        }
        path.push_str(&self.file_name);
        if self.type_name != " " {
            path.push('.');
            path.push_str(&self.type_name);
        }
        path
    }

    pub(crate) fn read_from<R: Read + ?Sized>(
        input: &mut R,
        type_name: &str,
        directory: &str,
        file_name: String,
    ) -> Result<Entry> {
        let crc32 = input.read_u32::<LittleEndian>()?;
        let small_data_size = input.read_u16::<LittleEndian>()?;
        let chunk_index = input.read_u16::<LittleEndian>()?;
        let offset = input.read_u32::<LittleEndian>()?;
        let length = input.read_u32::<LittleEndian>()?;

        let terminator = input.read_u16::<LittleEndian>()?;
        if terminator != ENTRY_TERMINATOR {
            return Err(Error::InvalidFormat(format!(
                "bad entry terminator 0x{terminator:04X}"
            )));
        }

        let mut small_data = vec![0u8; small_data_size as usize];
        input.read_exact(&mut small_data)?;

        Ok(Entry {
            file_name,
            directory: directory.to_string(),
            type_name: type_name.to_string(),
            crc32,
            small_data,
            chunk_index,
            offset,
            length,
        })
    }
}

/// Streaming digest used by the per-chunk hash table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Md5,
    Blake3,
}

impl HashKind {
    fn from_raw(raw: u16) -> Result<HashKind> {
        match raw {
            0 => Ok(HashKind::Md5),
            1 => Ok(HashKind::Blake3),
            other => Err(Error::InvalidFormat(format!("unknown hash kind {other}"))),
        }
    }

    fn to_raw(self) -> u16 {
        match self {
            HashKind::Md5 => 0,
            HashKind::Blake3 => 1,
        }
    }
}

/// One record of the per-chunk hash table: a checksum over `length` bytes of
/// a chunk at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHash {
    pub chunk_index: u16,
    pub kind: HashKind,
    pub offset: u32,
    pub length: u32,
    pub checksum: [u8; 16],
}

impl ChunkHash {
    pub(crate) fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<ChunkHash> {
        let mut chunk_index = input.read_u16::<LittleEndian>()?;
        let raw_kind = input.read_u16::<LittleEndian>()?;

        // Older archives store a 32 bit chunk index; (0, 0x8000) is how an
        // embedded MD5 record comes out when split into the two 16 bit fields.
        let kind = if chunk_index == 0 && raw_kind == 0x8000 {
            chunk_index = EMBEDDED_CHUNK_INDEX;
            HashKind::Md5
        } else {
            HashKind::from_raw(raw_kind)?
        };

        let offset = input.read_u32::<LittleEndian>()?;
        let length = input.read_u32::<LittleEndian>()?;
        let mut checksum = [0u8; 16];
        input.read_exact(&mut checksum)?;

        Ok(ChunkHash {
            chunk_index,
            kind,
            offset,
            length,
            checksum,
        })
    }

    pub(crate) fn write_to<W: Write + ?Sized>(&self, output: &mut W) -> io::Result<()> {
        output.write_u16::<LittleEndian>(self.chunk_index)?;
        output.write_u16::<LittleEndian>(self.kind.to_raw())?;
        output.write_u32::<LittleEndian>(self.offset)?;
        output.write_u32::<LittleEndian>(self.length)?;
        output.write_all(&self.checksum)
    }
}
