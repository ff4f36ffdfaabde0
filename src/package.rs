//! The archive context: parsing, lookup, mutation and extraction.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;
use memmap2::Mmap;

use crate::codec;
use crate::entry::{CHUNK_HASH_RECORD_SIZE, ChunkHash, EMBEDDED_CHUNK_INDEX, Entry};
use crate::error::{Error, Result};
use crate::paths;
use crate::store::{CasePolicy, EntryStore};

/// First four bytes of every VPK file.
pub const MAGIC: u32 = 0x55AA_1234;

/// Version tag of the Respawn dialect, detected and rejected.
const RESPAWN_VERSION: u32 = 0x0003_0002;

/// Byte source an archive can be parsed from.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// How the trailing signature block signs the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureKind {
    /// The signature covers every byte before the signature block.
    #[default]
    FullFile,
    /// A kind tag from the newer block layout this library does not
    /// interpret further; preserved as read.
    Other(i32),
}

impl SignatureKind {
    fn from_raw(raw: i32) -> SignatureKind {
        match raw {
            0 => SignatureKind::FullFile,
            other => SignatureKind::Other(other),
        }
    }
}

/// A VPK archive: either a self-contained file or a directory file with
/// sibling `<base>_NNN.vpk` chunk files.
///
/// The package exclusively owns its primary byte source and every memory map
/// it opens; entries returned by [`Package::find_entry`] borrow from it.
pub struct Package {
    pub(crate) source: Option<Mutex<Box<dyn ReadSeek>>>,
    /// Path of the backing file when the source came from disk; memory maps
    /// of embedded data need it.
    pub(crate) source_path: Option<PathBuf>,
    /// Archive name with `.vpk` and `_dir` stripped; chunk paths derive
    /// from it.
    pub(crate) base_path: Option<PathBuf>,
    pub(crate) is_dir: bool,
    pub(crate) version: u32,
    pub(crate) header_size: u32,
    pub(crate) tree_size: u32,
    pub(crate) file_data_section_size: u32,
    pub(crate) archive_md5_section_size: u32,
    pub(crate) other_md5_section_size: u32,
    pub(crate) signature_section_size: u32,
    pub(crate) tree_checksum: [u8; 16],
    pub(crate) hash_table_checksum: [u8; 16],
    pub(crate) whole_file_checksum: [u8; 16],
    pub(crate) public_key: Vec<u8>,
    pub(crate) signature: Vec<u8>,
    pub(crate) signature_kind: SignatureKind,
    pub(crate) entries: EntryStore,
    pub(crate) chunk_hashes: Vec<ChunkHash>,
    pub(crate) mapped_chunks: Mutex<HashMap<u16, Arc<Mmap>>>,
    pub(crate) written: bool,
}

impl Default for Package {
    fn default() -> Self {
        Package::new()
    }
}

impl Package {
    /// An empty archive; populate it with [`Package::read_stream`] or
    /// [`Package::add_file`].
    pub fn new() -> Self {
        Package {
            source: None,
            source_path: None,
            base_path: None,
            is_dir: false,
            version: 0,
            header_size: 0,
            tree_size: 0,
            file_data_section_size: 0,
            archive_md5_section_size: 0,
            other_md5_section_size: 0,
            signature_section_size: 0,
            tree_checksum: [0; 16],
            hash_table_checksum: [0; 16],
            whole_file_checksum: [0; 16],
            public_key: Vec::new(),
            signature: Vec::new(),
            signature_kind: SignatureKind::FullFile,
            entries: EntryStore::default(),
            chunk_hashes: Vec::new(),
            mapped_chunks: Mutex::new(HashMap::new()),
            written: false,
        }
    }

    /// Derives the base name and the `_dir` flag from an archive file name.
    pub fn set_file_name(&mut self, file_name: impl AsRef<Path>) {
        let text = file_name.as_ref().to_string_lossy();
        let (base, is_dir) = paths::sanitize_archive_name(&text);
        self.base_path = Some(PathBuf::from(base));
        self.is_dir = is_dir;
    }

    /// Opens and parses an archive from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Package> {
        let path = path.as_ref();
        let mut package = Package::new();
        package.set_file_name(path);
        let file = File::open(path)?;
        package.source_path = Some(path.to_path_buf());
        package.read_source(Box::new(BufReader::new(file)))?;
        Ok(package)
    }

    /// Parses an archive from an arbitrary byte source.
    ///
    /// A file name must have been set first so entries pointing into chunk
    /// files can be located later.
    pub fn read_stream(&mut self, source: Box<dyn ReadSeek>) -> Result<()> {
        if self.base_path.is_none() {
            return Err(Error::InvalidState(
                "a file name must be set before reading from a stream",
            ));
        }
        self.read_source(source)
    }

    /// Fixes the lookup mode to binary search under `policy`.
    ///
    /// Must be called before any entry is read or added.
    pub fn optimize_for_binary_search(&mut self, policy: CasePolicy) -> Result<()> {
        self.entries.optimize(policy)
    }

    /// Resolves a logical path to its entry. Separator style and leading
    /// separators do not matter; an empty path finds nothing.
    pub fn find_entry(&self, file_path: &str) -> Option<&Entry> {
        if file_path.is_empty() {
            return None;
        }
        let split = paths::split_file_path(file_path);
        self.entries
            .find(&split.directory, &split.file_name, &split.extension)
    }

    /// Stages a new file. Content is held in memory (as preload bytes) until
    /// the archive is written.
    pub fn add_file(&mut self, file_path: &str, data: Vec<u8>) -> Result<()> {
        if self.written {
            return Err(Error::InvalidState("archive has already been written"));
        }
        let split = paths::split_file_path(file_path);
        let crc32 = crc32fast::hash(&data);
        self.entries.add(Entry {
            file_name: split.file_name,
            directory: split.directory,
            type_name: split.extension,
            crc32,
            small_data: data,
            chunk_index: EMBEDDED_CHUNK_INDEX,
            offset: 0,
            length: 0,
        });
        Ok(())
    }

    /// Removes an entry, returning it if it existed.
    pub fn remove_file(&mut self, file_path: &str) -> Result<Option<Entry>> {
        if self.written {
            return Err(Error::InvalidState("archive has already been written"));
        }
        if file_path.is_empty() {
            return Ok(None);
        }
        let split = paths::split_file_path(file_path);
        Ok(self
            .entries
            .remove(&split.directory, &split.file_name, &split.extension))
    }

    /// Materializes an entry's content: preload bytes followed by archive
    /// bytes, optionally checked against the stored CRC32.
    pub fn read_entry(&self, entry: &Entry, validate_crc: bool) -> Result<Vec<u8>> {
        let mut output = vec![0u8; entry.total_length() as usize];
        self.read_entry_into(entry, &mut output, validate_crc)?;
        Ok(output)
    }

    /// Like [`Package::read_entry`] but into a caller-provided buffer, which
    /// must hold at least [`Entry::total_length`] bytes. Returns the number
    /// of bytes produced.
    pub fn read_entry_into(
        &self,
        entry: &Entry,
        output: &mut [u8],
        validate_crc: bool,
    ) -> Result<usize> {
        let total = entry.total_length() as usize;
        if output.len() < total {
            return Err(Error::OutOfRange(
                "output buffer is smaller than the entry's total length",
            ));
        }
        let output = &mut output[..total];
        output[..entry.small_data.len()].copy_from_slice(&entry.small_data);

        if entry.length > 0 {
            let body = &mut output[entry.small_data.len()..];
            if entry.chunk_index == EMBEDDED_CHUNK_INDEX {
                let source = self.source.as_ref().ok_or(Error::InvalidState(
                    "entry references archive data but no source is loaded",
                ))?;
                let mut source = source.lock().unwrap();
                let offset = u64::from(self.header_size)
                    + u64::from(self.tree_size)
                    + u64::from(entry.offset);
                source.seek(SeekFrom::Start(offset))?;
                source.read_exact(body)?;
            } else {
                let mut chunk = self.open_chunk(entry.chunk_index)?;
                chunk.seek(SeekFrom::Start(u64::from(entry.offset)))?;
                chunk.read_exact(body)?;
            }
        }

        if validate_crc {
            let actual = crc32fast::hash(output);
            if actual != entry.crc32 {
                return Err(Error::CrcMismatch {
                    expected: entry.crc32,
                    actual,
                });
            }
        }
        Ok(total)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    /// Size of the directory tree, recomputed from the actual layout.
    pub fn tree_size(&self) -> u32 {
        self.tree_size
    }

    pub fn file_data_section_size(&self) -> u32 {
        self.file_data_section_size
    }

    pub fn archive_md5_section_size(&self) -> u32 {
        self.archive_md5_section_size
    }

    pub fn other_md5_section_size(&self) -> u32 {
        self.other_md5_section_size
    }

    pub fn signature_section_size(&self) -> u32 {
        self.signature_section_size
    }

    pub fn tree_checksum(&self) -> &[u8; 16] {
        &self.tree_checksum
    }

    pub fn hash_table_checksum(&self) -> &[u8; 16] {
        &self.hash_table_checksum
    }

    pub fn whole_file_checksum(&self) -> &[u8; 16] {
        &self.whole_file_checksum
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn signature_kind(&self) -> SignatureKind {
        self.signature_kind
    }

    pub fn entries(&self) -> &EntryStore {
        &self.entries
    }

    pub fn chunk_hashes(&self) -> &[ChunkHash] {
        &self.chunk_hashes
    }

    /// Whether the parsed file name carried the `_dir` marker.
    pub fn is_dir_vpk(&self) -> bool {
        self.is_dir
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    fn read_source(&mut self, mut input: Box<dyn ReadSeek>) -> Result<()> {
        let magic = input.read_u32::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(Error::InvalidMagic(magic));
        }

        let version = input.read_u32::<LittleEndian>()?;
        match version {
            1 | 2 => {}
            RESPAWN_VERSION => return Err(Error::Unsupported(version)),
            other => return Err(Error::InvalidVersion(other)),
        }
        self.version = version;

        self.tree_size = input.read_u32::<LittleEndian>()?;
        if version == 2 {
            self.file_data_section_size = input.read_u32::<LittleEndian>()?;
            self.archive_md5_section_size = input.read_u32::<LittleEndian>()?;
            self.other_md5_section_size = input.read_u32::<LittleEndian>()?;
            self.signature_section_size = input.read_u32::<LittleEndian>()?;
        }
        self.header_size = input.stream_position()? as u32;

        self.read_tree(&mut input)?;

        if version == 2 {
            input.seek(SeekFrom::Current(i64::from(self.file_data_section_size)))?;
            self.read_chunk_hashes(&mut input)?;
            self.read_other_md5(&mut input)?;
            self.read_signature(&mut input)?;
        }

        debug!(
            "parsed VPK v{} with {} entries and {} chunk hash records",
            version,
            self.entries.len(),
            self.chunk_hashes.len()
        );
        self.source = Some(Mutex::new(input));
        Ok(())
    }

    fn read_tree(&mut self, input: &mut Box<dyn ReadSeek>) -> Result<()> {
        let mut scratch = Vec::new();
        loop {
            let type_name = codec::read_nul_string(input, &mut scratch)?;
            if type_name.is_empty() {
                break;
            }
            loop {
                let directory = codec::read_nul_string(input, &mut scratch)?;
                if directory.is_empty() {
                    break;
                }
                loop {
                    let file_name = codec::read_nul_string(input, &mut scratch)?;
                    if file_name.is_empty() {
                        break;
                    }
                    let entry = Entry::read_from(input, &type_name, &directory, file_name)?;
                    self.entries.ingest(entry);
                }
            }
        }
        // the declared tree size may be tampered with; trust the layout
        self.tree_size = input.stream_position()? as u32 - self.header_size;
        self.entries.finish_ingest();
        Ok(())
    }

    fn read_chunk_hashes(&mut self, input: &mut Box<dyn ReadSeek>) -> Result<()> {
        if self.archive_md5_section_size == 0 {
            return Ok(());
        }
        if self.archive_md5_section_size % CHUNK_HASH_RECORD_SIZE != 0 {
            return Err(Error::InvalidFormat(format!(
                "chunk hash section size {} is not a multiple of {CHUNK_HASH_RECORD_SIZE}",
                self.archive_md5_section_size
            )));
        }
        let count = self.archive_md5_section_size / CHUNK_HASH_RECORD_SIZE;
        self.chunk_hashes = (0..count)
            .map(|_| ChunkHash::read_from(input))
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn read_other_md5(&mut self, input: &mut Box<dyn ReadSeek>) -> Result<()> {
        // older archives use other sizes here; the block is simply absent then
        if self.other_md5_section_size != 48 {
            return Ok(());
        }
        input.read_exact(&mut self.tree_checksum)?;
        input.read_exact(&mut self.hash_table_checksum)?;
        input.read_exact(&mut self.whole_file_checksum)?;
        Ok(())
    }

    fn read_signature(&mut self, input: &mut Box<dyn ReadSeek>) -> Result<()> {
        if self.signature_section_size == 0 {
            return Ok(());
        }
        let first = input.read_u32::<LittleEndian>()?;
        if self.signature_section_size == 20 && first == MAGIC {
            let kind = input.read_i32::<LittleEndian>()?;
            let public_key_size = input.read_i32::<LittleEndian>()?;
            let signature_size = input.read_i32::<LittleEndian>()?;
            let _reserved = input.read_i32::<LittleEndian>()?;
            self.signature_kind = SignatureKind::from_raw(kind);
            if public_key_size > 0 {
                self.public_key = vec![0u8; public_key_size as usize];
                input.read_exact(&mut self.public_key)?;
            }
            if signature_size > 0 {
                self.signature = vec![0u8; signature_size as usize];
                input.read_exact(&mut self.signature)?;
            }
        } else {
            self.public_key = vec![0u8; first as usize];
            input.read_exact(&mut self.public_key)?;
            let signature_size = input.read_i32::<LittleEndian>()?;
            if signature_size > 0 {
                self.signature = vec![0u8; signature_size as usize];
                input.read_exact(&mut self.signature)?;
            }
            self.signature_kind = SignatureKind::FullFile;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use byteorder::WriteBytesExt;

    use super::*;
    use crate::codec::write_nul_string;
    use crate::entry::ENTRY_TERMINATOR;

    fn write_entry_record(
        out: &mut Vec<u8>,
        crc32: u32,
        small_data: &[u8],
        chunk_index: u16,
        offset: u32,
        length: u32,
        terminator: u16,
    ) {
        out.extend_from_slice(&crc32.to_le_bytes());
        out.extend_from_slice(&(small_data.len() as u16).to_le_bytes());
        out.extend_from_slice(&chunk_index.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&terminator.to_le_bytes());
        out.extend_from_slice(small_data);
    }

    /// A version 2 archive with one embedded entry carrying both preload
    /// bytes and a body in the file data section.
    fn preload_archive(preload: &[u8], body: &[u8]) -> Vec<u8> {
        let mut content = preload.to_vec();
        content.extend_from_slice(body);
        let crc32 = crc32fast::hash(&content);

        let mut tree = Vec::new();
        write_nul_string(&mut tree, "bin").unwrap();
        write_nul_string(&mut tree, "files").unwrap();
        write_nul_string(&mut tree, "payload").unwrap();
        write_entry_record(
            &mut tree,
            crc32,
            preload,
            EMBEDDED_CHUNK_INDEX,
            0,
            body.len() as u32,
            ENTRY_TERMINATOR,
        );
        tree.write_u8(0).unwrap();
        tree.write_u8(0).unwrap();
        tree.write_u8(0).unwrap();

        let mut archive = Vec::new();
        archive.extend_from_slice(&MAGIC.to_le_bytes());
        archive.extend_from_slice(&2u32.to_le_bytes());
        archive.extend_from_slice(&(tree.len() as u32).to_le_bytes());
        archive.extend_from_slice(&(body.len() as u32).to_le_bytes());
        archive.extend_from_slice(&0u32.to_le_bytes());
        archive.extend_from_slice(&0u32.to_le_bytes());
        archive.extend_from_slice(&0u32.to_le_bytes());
        archive.extend_from_slice(&tree);
        archive.extend_from_slice(body);
        archive
    }

    fn read_in_memory(bytes: Vec<u8>) -> Package {
        let mut package = Package::new();
        package.set_file_name("test.vpk");
        package.read_stream(Box::new(Cursor::new(bytes))).unwrap();
        package
    }

    #[test]
    fn rejects_bad_magic() {
        let mut package = Package::new();
        package.set_file_name("test.vpk");
        let result = package.read_stream(Box::new(Cursor::new(vec![0u8; 12])));
        assert!(matches!(result, Err(Error::InvalidMagic(0))));
    }

    #[test]
    fn rejects_respawn_dialect() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.extend_from_slice(&0x0003_0002u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());

        let mut package = Package::new();
        package.set_file_name("test.vpk");
        let result = package.read_stream(Box::new(Cursor::new(bytes)));
        assert!(matches!(result, Err(Error::Unsupported(0x0003_0002))));
    }

    #[test]
    fn rejects_unknown_versions() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.extend_from_slice(&7u32.to_le_bytes());

        let mut package = Package::new();
        package.set_file_name("test.vpk");
        let result = package.read_stream(Box::new(Cursor::new(bytes)));
        assert!(matches!(result, Err(Error::InvalidVersion(7))));
    }

    #[test]
    fn stream_read_requires_a_file_name() {
        let mut package = Package::new();
        let result = package.read_stream(Box::new(Cursor::new(Vec::new())));
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn bad_tree_terminator_is_invalid_format() {
        let mut tree = Vec::new();
        write_nul_string(&mut tree, "txt").unwrap();
        write_nul_string(&mut tree, " ").unwrap();
        write_nul_string(&mut tree, "a").unwrap();
        write_entry_record(&mut tree, 0, &[], EMBEDDED_CHUNK_INDEX, 0, 0, 0xFFFE);
        tree.write_u8(0).unwrap();
        tree.write_u8(0).unwrap();
        tree.write_u8(0).unwrap();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(tree.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&tree);

        let mut package = Package::new();
        package.set_file_name("test.vpk");
        let result = package.read_stream(Box::new(Cursor::new(bytes)));
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn reads_preload_and_body_as_one_buffer() {
        let preload: Vec<u8> = (0u8..56).collect();
        let body: Vec<u8> = (0u8..=255).cycle().take(588).collect();
        let package = read_in_memory(preload_archive(&preload, &body));

        let entry = package.find_entry("files/payload.bin").unwrap();
        assert_eq!(entry.small_data.len(), 56);
        assert_eq!(entry.length, 588);
        assert_eq!(entry.total_length(), 644);

        let data = package.read_entry(entry, true).unwrap();
        assert_eq!(data.len(), 644);
        assert_eq!(&data[..56], &preload[..]);
        assert_eq!(&data[56..], &body[..]);
    }

    #[test]
    fn tree_size_is_recomputed_from_the_layout() {
        let preload: Vec<u8> = vec![1, 2, 3];
        let body: Vec<u8> = vec![4, 5, 6, 7];
        let mut bytes = preload_archive(&preload, &body);
        // tamper with the declared tree size
        bytes[8] = 1;
        let package = read_in_memory(bytes);

        let entry = package.find_entry("files/payload.bin").unwrap();
        let data = package.read_entry(entry, true).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn small_output_buffers_are_rejected() {
        let package = read_in_memory(preload_archive(&[1, 2], &[3, 4]));
        let entry = package.find_entry("files/payload.bin").unwrap();
        let mut short = [0u8; 3];
        assert!(matches!(
            package.read_entry_into(entry, &mut short, false),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn crc_mismatch_reports_both_values_in_hex() {
        let package = read_in_memory(preload_archive(&[9, 9], &[8, 8]));
        let entry = package.find_entry("files/payload.bin").unwrap();

        let mut corrupted = entry.clone();
        corrupted.crc32 = 0xDEAD_BEEF;
        let error = package.read_entry(&corrupted, true).unwrap_err();
        let message = error.to_string();
        assert!(message.contains("expected DEADBEEF"), "message: {message}");
        assert!(message.starts_with("CRC32 mismatch for read data"));

        // without validation the read succeeds
        assert!(package.read_entry(&corrupted, false).is_ok());
    }

    #[test]
    fn finds_entries_across_separator_styles() {
        let mut package = Package::new();
        package
            .add_file("addons/chess/chess.vdf", b"chess data".to_vec())
            .unwrap();

        let expected = package.find_entry("addons/chess/chess.vdf").unwrap().clone();
        for path in [
            "addons\\chess\\chess.vdf",
            "addons/chess\\chess.vdf",
            "\\addons/chess/chess.vdf",
            "/addons/chess/chess.vdf",
        ] {
            assert_eq!(package.find_entry(path), Some(&expected), "path {path}");
        }
        assert!(package.find_entry("addons/hello/chess.vdf").is_none());
        assert!(package.find_entry("").is_none());
    }

    #[test]
    fn mutation_after_write_is_rejected() {
        let mut package = Package::new();
        package.add_file("a.txt", b"a".to_vec()).unwrap();
        package.written = true;
        assert!(matches!(
            package.add_file("b.txt", b"b".to_vec()),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            package.remove_file("a.txt"),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn reads_version_one_archives() {
        let mut tree = Vec::new();
        write_nul_string(&mut tree, "txt").unwrap();
        write_nul_string(&mut tree, " ").unwrap();
        write_nul_string(&mut tree, "note").unwrap();
        let body = b"twelve bytes";
        write_entry_record(
            &mut tree,
            crc32fast::hash(body),
            &[],
            EMBEDDED_CHUNK_INDEX,
            0,
            body.len() as u32,
            ENTRY_TERMINATOR,
        );
        tree.write_u8(0).unwrap();
        tree.write_u8(0).unwrap();
        tree.write_u8(0).unwrap();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(tree.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&tree);
        bytes.extend_from_slice(body);

        let package = read_in_memory(bytes);
        assert_eq!(package.version(), 1);
        assert_eq!(package.header_size(), 12);

        let entry = package.find_entry("note.txt").unwrap();
        assert_eq!(package.read_entry(entry, true).unwrap(), body);
    }

    #[test]
    fn missing_chunk_files_are_reported() {
        let mut entry_in_chunk = Entry {
            file_name: "lost".to_string(),
            directory: " ".to_string(),
            type_name: "bin".to_string(),
            crc32: 0,
            small_data: Vec::new(),
            chunk_index: 0,
            offset: 0,
            length: 8,
        };
        let package = read_in_memory(preload_archive(&[], &[0]));
        let result = package.read_entry(&entry_in_chunk, false);
        assert!(matches!(result, Err(Error::ChunkNotFound(_))));

        entry_in_chunk.chunk_index = 1;
        assert!(matches!(
            package.read_entry(&entry_in_chunk, false),
            Err(Error::ChunkNotFound(_))
        ));
    }

    #[test]
    fn every_entry_is_found_by_its_full_path() {
        let mut package = Package::new();
        for path in [
            "a.txt",
            "noext",
            "dir/a.txt",
            "dir/sub/deep.bin",
            "dir/sub/other",
        ] {
            package.add_file(path, path.as_bytes().to_vec()).unwrap();
        }
        let entries: Vec<Entry> = package.entries().iter().cloned().collect();
        for entry in &entries {
            assert_eq!(
                package.find_entry(&entry.full_path()),
                Some(entry),
                "path {}",
                entry.full_path()
            );
        }
    }

    #[test]
    fn legacy_hash_records_are_rewritten_at_parse() {
        let mut bytes = preload_archive(&[], &[1, 2, 3, 4]);
        // append one legacy chunk hash record and patch the section size
        let record_offset = bytes.len();
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0x8000u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        assert_eq!(bytes.len() - record_offset, 28);
        bytes[16..20].copy_from_slice(&28u32.to_le_bytes());

        let package = read_in_memory(bytes);
        let hashes = package.chunk_hashes();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes[0].chunk_index, EMBEDDED_CHUNK_INDEX);
    }
}
