//! Resolving entries to byte sources: sibling chunk files and memory maps.

use std::fs::File;
use std::io::{self, BufReader};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::entry::{EMBEDDED_CHUNK_INDEX, Entry};
use crate::error::{Error, Result};
use crate::package::Package;

/// Entries at or below this size are served from an owned buffer instead of
/// a memory map.
pub(crate) const SMALL_ENTRY_LIMIT: u32 = 4096;

/// An entry's bytes: either an owned buffer or a view into a memory map
/// cached by the package. Views must be dropped before the package.
pub struct EntryView {
    inner: ViewInner,
}

enum ViewInner {
    Owned(Vec<u8>),
    Mapped {
        map: Arc<Mmap>,
        offset: usize,
        length: usize,
    },
}

impl EntryView {
    fn owned(data: Vec<u8>) -> EntryView {
        EntryView {
            inner: ViewInner::Owned(data),
        }
    }

    fn mapped(map: Arc<Mmap>, offset: usize, length: usize) -> EntryView {
        EntryView {
            inner: ViewInner::Mapped {
                map,
                offset,
                length,
            },
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.inner, ViewInner::Mapped { .. })
    }
}

impl Deref for EntryView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.inner {
            ViewInner::Owned(data) => data,
            ViewInner::Mapped {
                map,
                offset,
                length,
            } => &map[*offset..*offset + *length],
        }
    }
}

impl AsRef<[u8]> for EntryView {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl Package {
    /// Path of the sibling chunk file `<base>_NNN.vpk`.
    pub(crate) fn chunk_path(&self, chunk_index: u16) -> Result<PathBuf> {
        let base = self.base_path.as_ref().ok_or(Error::InvalidState(
            "a file name is required to locate chunk files",
        ))?;
        Ok(PathBuf::from(format!(
            "{}_{:03}.vpk",
            base.display(),
            chunk_index
        )))
    }

    /// Opens a chunk file for one read pass; the handle is dropped with the
    /// caller, never cached.
    pub(crate) fn open_chunk(&self, chunk_index: u16) -> Result<BufReader<File>> {
        let path = self.chunk_path(chunk_index)?;
        let file = File::open(&path).map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                Error::ChunkNotFound(path.display().to_string())
            } else {
                Error::Io(error)
            }
        })?;
        Ok(BufReader::new(file))
    }

    /// Returns an entry's bytes, memory-mapping the containing file when
    /// that pays off.
    ///
    /// Small entries, entries with preload bytes, and embedded entries of
    /// stream-backed archives come back as owned buffers; everything else is
    /// a view into a map cached per chunk for the package's lifetime.
    pub fn map_entry(&self, entry: &Entry) -> Result<EntryView> {
        if entry.total_length() <= SMALL_ENTRY_LIMIT || !entry.small_data.is_empty() {
            return Ok(EntryView::owned(self.read_entry(entry, false)?));
        }

        let (key, path, base_offset) = if entry.chunk_index == EMBEDDED_CHUNK_INDEX {
            let Some(path) = self.source_path.clone() else {
                // not file backed, nothing to map
                return Ok(EntryView::owned(self.read_entry(entry, false)?));
            };
            let base = u64::from(self.header_size) + u64::from(self.tree_size);
            (EMBEDDED_CHUNK_INDEX, path, base)
        } else {
            (entry.chunk_index, self.chunk_path(entry.chunk_index)?, 0)
        };

        let map = self.mapped_chunk(key, &path)?;
        let offset = base_offset + u64::from(entry.offset);
        let end = offset + u64::from(entry.length);
        if end > map.len() as u64 {
            return Err(Error::InvalidFormat(format!(
                "entry range {offset}..{end} exceeds '{}'",
                path.display()
            )));
        }
        Ok(EntryView::mapped(
            map,
            offset as usize,
            entry.length as usize,
        ))
    }

    fn mapped_chunk(&self, key: u16, path: &Path) -> Result<Arc<Mmap>> {
        let mut cache = self.mapped_chunks.lock().unwrap();
        if let Some(map) = cache.get(&key) {
            return Ok(Arc::clone(map));
        }
        let file = File::open(path).map_err(|error| {
            if error.kind() == io::ErrorKind::NotFound {
                Error::ChunkNotFound(path.display().to_string())
            } else {
                Error::Io(error)
            }
        })?;
        let map = Arc::new(unsafe { Mmap::map(&file)? });
        cache.insert(key, Arc::clone(&map));
        Ok(map)
    }
}
