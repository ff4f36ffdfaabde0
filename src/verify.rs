//! Integrity checks: section checksums, per-chunk hashes, per-file CRCs and
//! the RSA signature.

use std::io::{self, Read, Seek, Write};

use itertools::Itertools;
use log::debug;
use md5::{Digest, Md5};
use rsa::pkcs8::DecodePublicKey;
use rsa::sha2::Sha256;
use rsa::{Pkcs1v15Sign, RsaPublicKey};

use crate::codec;
use crate::entry::{ChunkHash, EMBEDDED_CHUNK_INDEX, Entry, HashKind};
use crate::error::{Error, Result};
use crate::package::Package;

/// Streaming 16-byte digest with one variant per [`HashKind`].
pub(crate) enum ChunkHasher {
    Md5(Md5),
    Blake3(Box<blake3::Hasher>),
}

impl ChunkHasher {
    pub(crate) fn new(kind: HashKind) -> ChunkHasher {
        match kind {
            HashKind::Md5 => ChunkHasher::Md5(Md5::new()),
            HashKind::Blake3 => ChunkHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    pub(crate) fn finish(self) -> [u8; 16] {
        match self {
            ChunkHasher::Md5(hasher) => hasher.finalize().into(),
            ChunkHasher::Blake3(hasher) => {
                let mut checksum = [0u8; 16];
                hasher.finalize_xof().fill(&mut checksum);
                checksum
            }
        }
    }
}

impl Write for ChunkHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ChunkHasher::Md5(hasher) => hasher.update(buf),
            ChunkHasher::Blake3(hasher) => {
                hasher.update(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

fn expect_match(subject: &str, expected: &[u8; 16], actual: [u8; 16]) -> Result<()> {
    if *expected != actual {
        return Err(Error::HashMismatch {
            subject: subject.to_string(),
            expected: hex_upper(expected),
            actual: hex_upper(&actual),
        });
    }
    Ok(())
}

pub(crate) fn md5_region<R: Read + Seek>(source: &mut R, offset: u64, length: u64) -> Result<[u8; 16]> {
    let mut hasher = Md5::new();
    let mut view = codec::region(source, offset, length)?;
    io::copy(&mut view, &mut hasher)?;
    Ok(hasher.finalize().into())
}

impl Package {
    /// Verifies the tree, hash-table and whole-file checksums and, when
    /// signing material is present, the signature. The batch counterpart of
    /// the individual queries.
    pub fn verify_hashes(&self) -> Result<()> {
        if self.version != 2 {
            return Err(Error::InvalidState(
                "only version 2 archives carry checksum sections",
            ));
        }
        if self.other_md5_section_size != 48 {
            return Err(Error::InvalidState("archive has no checksum block"));
        }
        let source = self
            .source
            .as_ref()
            .ok_or(Error::InvalidState("no source is loaded"))?;

        {
            let mut source = source.lock().unwrap();

            let tree = md5_region(
                &mut *source,
                u64::from(self.header_size),
                u64::from(self.tree_size),
            )?;
            expect_match("file tree", &self.tree_checksum, tree)?;

            let table_offset = u64::from(self.header_size)
                + u64::from(self.tree_size)
                + u64::from(self.file_data_section_size);
            let table = md5_region(
                &mut *source,
                table_offset,
                u64::from(self.archive_md5_section_size),
            )?;
            expect_match("chunk hash table", &self.hash_table_checksum, table)?;

            // everything before the whole file checksum itself
            let whole_length = table_offset + u64::from(self.archive_md5_section_size) + 32;
            let whole = md5_region(&mut *source, 0, whole_length)?;
            expect_match("whole file", &self.whole_file_checksum, whole)?;
        }

        if !self.is_signature_valid() {
            return Err(Error::SignatureInvalid);
        }
        debug!("verified section checksums");
        Ok(())
    }

    /// Verifies every record of the per-chunk hash table.
    pub fn verify_chunk_hashes(&self) -> Result<()> {
        self.verify_chunk_hashes_with(|_| {})
    }

    /// Like [`Package::verify_chunk_hashes`], reporting a human-readable
    /// line per record.
    pub fn verify_chunk_hashes_with(&self, mut progress: impl FnMut(&str)) -> Result<()> {
        let mut records: Vec<&ChunkHash> = self.chunk_hashes.iter().collect();
        records.sort_by_key(|record| (record.chunk_index, record.offset));

        for (chunk_index, group) in &records.into_iter().chunk_by(|record| record.chunk_index) {
            if chunk_index == EMBEDDED_CHUNK_INDEX {
                // embedded records hash the directory file's data region; the
                // primary source stays open
                let source = self
                    .source
                    .as_ref()
                    .ok_or(Error::InvalidState("no source is loaded"))?;
                let mut source = source.lock().unwrap();
                let base = u64::from(self.header_size) + u64::from(self.tree_size);
                for record in group {
                    check_chunk_record(&mut *source, base, record, &mut progress)?;
                }
            } else {
                // one handle per chunk, dropped when the group ends
                let mut chunk = self.open_chunk(chunk_index)?;
                for record in group {
                    check_chunk_record(&mut chunk, 0, record, &mut progress)?;
                }
            }
        }
        debug!("verified {} chunk hash records", self.chunk_hashes.len());
        Ok(())
    }

    /// Re-reads every entry with CRC validation, in `(chunk, offset)` order.
    pub fn verify_file_checksums(&self) -> Result<()> {
        self.verify_file_checksums_with(|_| {})
    }

    /// Like [`Package::verify_file_checksums`], reporting each file path.
    pub fn verify_file_checksums_with(&self, mut progress: impl FnMut(&str)) -> Result<()> {
        let mut all: Vec<&Entry> = self.entries.iter().collect();
        all.sort_by_key(|entry| (entry.chunk_index, entry.offset));
        for entry in all {
            progress(&entry.full_path());
            self.read_entry(entry, true)?;
        }
        Ok(())
    }

    /// Whether the signature block validates. Missing signing material counts
    /// as valid; parse or verification failures report `false` rather than
    /// raising.
    pub fn is_signature_valid(&self) -> bool {
        if self.public_key.is_empty() || self.signature.is_empty() {
            return true;
        }
        let Ok(key) = RsaPublicKey::from_public_key_der(&self.public_key) else {
            return false;
        };
        let Ok(digest) = self.signed_region_sha256() else {
            return false;
        };
        key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &self.signature)
            .is_ok()
    }

    /// SHA-256 over everything before the signature block.
    fn signed_region_sha256(&self) -> Result<[u8; 32]> {
        let source = self
            .source
            .as_ref()
            .ok_or(Error::InvalidState("no source is loaded"))?;
        let mut source = source.lock().unwrap();
        let length = u64::from(self.header_size)
            + u64::from(self.tree_size)
            + u64::from(self.file_data_section_size)
            + u64::from(self.archive_md5_section_size)
            + u64::from(self.other_md5_section_size);

        let mut hasher = Sha256::new();
        let mut view = codec::region(&mut *source, 0, length)?;
        let mut buf = [0u8; 8192];
        loop {
            let read = view.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(hasher.finalize().into())
    }
}

fn check_chunk_record<R: Read + Seek>(
    source: &mut R,
    base: u64,
    record: &ChunkHash,
    progress: &mut impl FnMut(&str),
) -> Result<()> {
    let mut hasher = ChunkHasher::new(record.kind);
    let mut view = codec::region(source, base + u64::from(record.offset), u64::from(record.length))?;
    io::copy(&mut view, &mut hasher)?;
    let actual = hasher.finish();

    let subject = if record.chunk_index == EMBEDDED_CHUNK_INDEX {
        format!("embedded data at offset {}", record.offset)
    } else {
        format!(
            "chunk {:03} at offset {}",
            record.chunk_index, record.offset
        )
    };
    expect_match(&subject, &record.checksum, actual)?;
    progress(&format!(
        "validated {} ({} bytes, {:?})",
        subject, record.length, record.kind
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::write_nul_string;
    use crate::entry::{CHUNK_HASH_RECORD_SIZE, ENTRY_TERMINATOR};
    use crate::package::MAGIC;

    /// A version 2 archive with one embedded entry and a chunk hash record
    /// of the given kind covering the whole data region.
    fn hashed_archive(body: &[u8], kind: HashKind, checksum: [u8; 16]) -> Vec<u8> {
        let mut tree = Vec::new();
        write_nul_string(&mut tree, "bin").unwrap();
        write_nul_string(&mut tree, " ").unwrap();
        write_nul_string(&mut tree, "data").unwrap();
        tree.extend_from_slice(&crc32fast::hash(body).to_le_bytes());
        tree.extend_from_slice(&0u16.to_le_bytes());
        tree.extend_from_slice(&EMBEDDED_CHUNK_INDEX.to_le_bytes());
        tree.extend_from_slice(&0u32.to_le_bytes());
        tree.extend_from_slice(&(body.len() as u32).to_le_bytes());
        tree.extend_from_slice(&ENTRY_TERMINATOR.to_le_bytes());
        tree.extend_from_slice(&[0, 0, 0]);

        let record = ChunkHash {
            chunk_index: EMBEDDED_CHUNK_INDEX,
            kind,
            offset: 0,
            length: body.len() as u32,
            checksum,
        };
        let mut table = Vec::new();
        record.write_to(&mut table).unwrap();

        let mut archive = Vec::new();
        archive.extend_from_slice(&MAGIC.to_le_bytes());
        archive.extend_from_slice(&2u32.to_le_bytes());
        archive.extend_from_slice(&(tree.len() as u32).to_le_bytes());
        archive.extend_from_slice(&(body.len() as u32).to_le_bytes());
        archive.extend_from_slice(&CHUNK_HASH_RECORD_SIZE.to_le_bytes());
        archive.extend_from_slice(&0u32.to_le_bytes());
        archive.extend_from_slice(&0u32.to_le_bytes());
        archive.extend_from_slice(&tree);
        archive.extend_from_slice(body);
        archive.extend_from_slice(&table);
        archive
    }

    fn read_in_memory(bytes: Vec<u8>) -> Package {
        let mut package = Package::new();
        package.set_file_name("verify_test.vpk");
        package.read_stream(Box::new(Cursor::new(bytes))).unwrap();
        package
    }

    #[test]
    fn embedded_blake3_records_verify() {
        let body = b"embedded chunk bytes hashed with blake3";
        let mut checksum = [0u8; 16];
        checksum.copy_from_slice(&blake3::hash(body).as_bytes()[..16]);

        let package = read_in_memory(hashed_archive(body, HashKind::Blake3, checksum));
        let mut lines = Vec::new();
        package
            .verify_chunk_hashes_with(|line| lines.push(line.to_string()))
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("embedded data"), "line: {}", lines[0]);
    }

    #[test]
    fn embedded_md5_records_verify() {
        let body = b"embedded chunk bytes hashed with md5";
        let checksum: [u8; 16] = Md5::digest(body).into();
        let package = read_in_memory(hashed_archive(body, HashKind::Md5, checksum));
        package.verify_chunk_hashes().unwrap();
    }

    #[test]
    fn corrupt_chunk_records_report_a_mismatch() {
        let body = b"these bytes will not match";
        let package = read_in_memory(hashed_archive(body, HashKind::Md5, [0x11; 16]));
        let error = package.verify_chunk_hashes().unwrap_err();
        let message = error.to_string();
        assert!(matches!(error, Error::HashMismatch { .. }));
        assert!(message.contains("1111"), "message: {message}");
    }

    #[test]
    fn verify_hashes_requires_a_checksum_block() {
        let body = b"x";
        let package = read_in_memory(hashed_archive(body, HashKind::Md5, Md5::digest(body).into()));
        assert!(matches!(
            package.verify_hashes(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn file_checksum_sweep_reports_each_path() {
        let body = b"swept";
        let package = read_in_memory(hashed_archive(body, HashKind::Md5, Md5::digest(body).into()));
        let mut seen = Vec::new();
        package
            .verify_file_checksums_with(|path| seen.push(path.to_string()))
            .unwrap();
        assert_eq!(seen, ["data.bin"]);
    }

    #[test]
    fn chunk_hashers_produce_sixteen_bytes() {
        let data = b"the quick brown fox jumps over the lazy dog";

        let mut md5 = ChunkHasher::new(HashKind::Md5);
        md5.write_all(data).unwrap();
        let md5_sum = md5.finish();
        let expected: [u8; 16] = Md5::digest(data).into();
        assert_eq!(md5_sum, expected);

        let mut b3 = ChunkHasher::new(HashKind::Blake3);
        b3.write_all(data).unwrap();
        let b3_sum = b3.finish();
        assert_eq!(&b3_sum[..], &blake3::hash(data).as_bytes()[..16]);
    }

    #[test]
    fn hex_is_uppercase() {
        assert_eq!(hex_upper(&[0xDE, 0xAD, 0x01]), "DEAD01");
    }

    #[test]
    fn missing_signature_material_is_valid() {
        let package = Package::new();
        assert!(package.is_signature_valid());
    }

    #[test]
    fn garbage_signature_material_is_invalid() {
        let mut package = Package::new();
        package.public_key = vec![1, 2, 3];
        package.signature = vec![4, 5, 6];
        assert!(!package.is_signature_valid());
    }
}
