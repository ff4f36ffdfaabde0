//! Laying out new archives: chunk placement, tree emission and the hash
//! sections.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use buf_read_write::BufStream;
use byteorder::{LittleEndian, WriteBytesExt};
use log::debug;
use md5::{Digest, Md5};
use ordermap::OrderMap;

use crate::codec;
use crate::entry::{ChunkHash, EMBEDDED_CHUNK_INDEX, ENTRY_TERMINATOR, Entry, HashKind};
use crate::error::{Error, Result};
use crate::package::{MAGIC, Package};
use crate::paths;
use crate::verify::md5_region;

/// Chunk files are hashed in fractions of this many bytes.
pub(crate) const HASH_FRACTION_SIZE: u32 = 1024 * 1024;

/// Chunk indices stop one short of the embedded sentinel.
const MAX_CHUNKS: u32 = 0x7FFE;

/// Where one entry's bytes land in the output.
struct Placement {
    chunk_index: u16,
    offset: u32,
}

impl Package {
    /// Writes the archive to `<base>_dir.vpk`, splitting entry data across
    /// `<base>_NNN.vpk` chunk files of roughly `max_chunk_size` bytes when a
    /// size is given. Always emits version 2.
    pub fn write(&mut self, target: impl AsRef<Path>, max_chunk_size: Option<u32>) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::InvalidState("cannot write an empty archive"));
        }
        if max_chunk_size == Some(0) {
            return Err(Error::OutOfRange("chunk size must be positive"));
        }

        let target = target.as_ref().to_string_lossy();
        let (base, _) = paths::sanitize_archive_name(&target);
        let directory_path = PathBuf::from(format!("{base}_dir.vpk"));

        let flattened: Vec<&Entry> = self.entries.iter().collect();
        let placements = match max_chunk_size {
            None => embedded_placements(&flattened),
            Some(chunk_size) => assign_chunks(&flattened, chunk_size)?,
        };

        let mut chunk_hashes = Vec::new();
        if max_chunk_size.is_some() {
            self.write_chunk_files(base, &flattened, &placements, &mut chunk_hashes)?;
        }
        self.write_directory_file(
            &directory_path,
            &flattened,
            &placements,
            &chunk_hashes,
            max_chunk_size.is_none(),
        )?;

        debug!(
            "wrote {} with {} entries across {} chunk files",
            directory_path.display(),
            flattened.len(),
            chunk_hashes
                .last()
                .map(|record: &ChunkHash| u32::from(record.chunk_index) + 1)
                .unwrap_or(0)
        );
        self.written = true;
        Ok(())
    }

    fn write_chunk_files(
        &self,
        base: &str,
        entries: &[&Entry],
        placements: &[Placement],
        chunk_hashes: &mut Vec<ChunkHash>,
    ) -> Result<()> {
        let chunk_count = placements
            .last()
            .map(|placement| u32::from(placement.chunk_index) + 1)
            .unwrap_or(0);

        for chunk_index in 0..chunk_count as u16 {
            let path = PathBuf::from(format!("{base}_{chunk_index:03}.vpk"));
            let mut output = BufWriter::new(
                OpenOptions::new()
                    .create(true)
                    .truncate(true)
                    .write(true)
                    .open(&path)?,
            );
            for (entry, placement) in entries.iter().zip(placements) {
                if placement.chunk_index != chunk_index {
                    continue;
                }
                let data = self.read_entry(entry, false)?;
                output.write_all(&data)?;
            }
            output.flush()?;
            drop(output);

            hash_chunk_file(&path, chunk_index, chunk_hashes)?;
        }
        Ok(())
    }

    fn write_directory_file(
        &self,
        path: &Path,
        entries: &[&Entry],
        placements: &[Placement],
        chunk_hashes: &[ChunkHash],
        embed_data: bool,
    ) -> Result<()> {
        let mut stream = BufStream::new(
            OpenOptions::new()
                .create(true)
                .truncate(true)
                .read(true)
                .write(true)
                .open(path)?,
        );

        stream.write_u32::<LittleEndian>(MAGIC)?;
        stream.write_u32::<LittleEndian>(2)?;
        let size_fields_offset = stream.stream_position()?;
        stream.write_u32::<LittleEndian>(0)?; // tree
        stream.write_u32::<LittleEndian>(0)?; // file data
        stream.write_u32::<LittleEndian>(0)?; // chunk hash table
        stream.write_u32::<LittleEndian>(48)?; // section checksums
        stream.write_u32::<LittleEndian>(0)?; // signature

        let tree_start = stream.stream_position()?;
        write_tree(&mut stream, entries, placements)?;
        let tree_size = (stream.stream_position()? - tree_start) as u32;

        let data_start = stream.stream_position()?;
        if embed_data {
            for entry in entries {
                let data = self.read_entry(entry, false)?;
                stream.write_all(&data)?;
            }
        }
        let file_data_size = (stream.stream_position()? - data_start) as u32;

        let table_start = stream.stream_position()?;
        for record in chunk_hashes {
            record.write_to(&mut stream)?;
        }
        let table_size = (stream.stream_position()? - table_start) as u32;
        let end = stream.stream_position()?;

        // the header bytes are part of the whole file digest, so the size
        // fields have to be final before hashing starts
        stream.seek(SeekFrom::Start(size_fields_offset))?;
        stream.write_u32::<LittleEndian>(tree_size)?;
        stream.write_u32::<LittleEndian>(file_data_size)?;
        stream.write_u32::<LittleEndian>(table_size)?;
        stream.seek(SeekFrom::Start(end))?;
        stream.flush()?;

        let tree_digest = md5_region(&mut stream, tree_start, u64::from(tree_size))?;
        // hashes to the digest of empty input when the table is absent
        let table_digest = md5_region(&mut stream, table_start, u64::from(table_size))?;
        let whole_digest: [u8; 16] = {
            let mut hasher = Md5::new();
            let mut view = codec::region(&mut stream, 0, end)?;
            io::copy(&mut view, &mut hasher)?;
            hasher.update(tree_digest);
            hasher.update(table_digest);
            hasher.finalize().into()
        };

        stream.seek(SeekFrom::End(0))?;
        stream.write_all(&tree_digest)?;
        stream.write_all(&table_digest)?;
        stream.write_all(&whole_digest)?;
        stream.flush()?;
        Ok(())
    }
}

/// Single-file mode: everything lands in the embedded data region.
fn embedded_placements(entries: &[&Entry]) -> Vec<Placement> {
    let mut offset = 0u32;
    entries
        .iter()
        .map(|entry| {
            let placement = Placement {
                chunk_index: EMBEDDED_CHUNK_INDEX,
                offset,
            };
            offset += entry.total_length();
            placement
        })
        .collect()
}

/// Next-fit placement: entries fill the current chunk until its running
/// offset reaches the chunk size, then the next chunk starts. A single entry
/// larger than the chunk size stays contiguous and overflows its chunk.
fn assign_chunks(entries: &[&Entry], chunk_size: u32) -> Result<Vec<Placement>> {
    let mut chunk_index = 0u32;
    let mut offset = 0u32;
    let mut placements = Vec::with_capacity(entries.len());
    for entry in entries {
        if chunk_index >= MAX_CHUNKS {
            return Err(Error::TooManyChunks);
        }
        placements.push(Placement {
            chunk_index: chunk_index as u16,
            offset,
        });
        offset = offset.saturating_add(entry.total_length());
        if offset >= chunk_size {
            chunk_index += 1;
            offset = 0;
        }
    }
    Ok(placements)
}

fn write_tree<W: Write>(
    output: &mut W,
    entries: &[&Entry],
    placements: &[Placement],
) -> Result<()> {
    // group by extension and directory, preserving first appearance
    let mut tree: OrderMap<&str, OrderMap<&str, Vec<usize>>> = OrderMap::new();
    for (index, entry) in entries.iter().enumerate() {
        tree.entry(entry.type_name.as_str())
            .or_default()
            .entry(entry.directory.as_str())
            .or_default()
            .push(index);
    }

    for (type_name, directories) in &tree {
        codec::write_nul_string(output, type_name)?;
        for (directory, members) in directories {
            codec::write_nul_string(output, directory)?;
            for &index in members {
                let entry = entries[index];
                let placement = &placements[index];
                codec::write_nul_string(output, &entry.file_name)?;
                output.write_u32::<LittleEndian>(entry.crc32)?;
                // preload is redistributed into the data region
                output.write_u16::<LittleEndian>(0)?;
                output.write_u16::<LittleEndian>(placement.chunk_index)?;
                output.write_u32::<LittleEndian>(placement.offset)?;
                output.write_u32::<LittleEndian>(entry.total_length())?;
                output.write_u16::<LittleEndian>(ENTRY_TERMINATOR)?;
            }
            output.write_u8(0)?;
        }
        output.write_u8(0)?;
    }
    output.write_u8(0)?;
    Ok(())
}

/// Appends one MD5 record per fraction of the freshly written chunk file.
fn hash_chunk_file(path: &Path, chunk_index: u16, records: &mut Vec<ChunkHash>) -> Result<()> {
    let mut input = BufReader::new(File::open(path)?);
    let mut offset = 0u32;
    loop {
        let mut hasher = Md5::new();
        let mut fraction = Read::by_ref(&mut input).take(u64::from(HASH_FRACTION_SIZE));
        let copied = io::copy(&mut fraction, &mut hasher)? as u32;
        if copied == 0 {
            break;
        }
        records.push(ChunkHash {
            chunk_index,
            kind: HashKind::Md5,
            offset,
            length: copied,
            checksum: hasher.finalize().into(),
        });
        offset += copied;
        if copied < HASH_FRACTION_SIZE {
            break;
        }
    }
    Ok(())
}
