//! Read, verify, and author Valve Pak (`.vpk`) archives.
//!
//! A VPK is either a self-contained file or a `_dir.vpk` directory file with
//! numbered `_NNN.vpk` chunk files next to it. This crate parses the
//! directory tree, resolves entries by logical path, extracts their bytes
//! across chunk files, checks every hash the format carries, and writes new
//! archives with correct layout and checksums.
//!
//! # Example
//!
//! ```
//! let mut package = vpk::Package::new();
//! package.add_file("addons/chess/chess.vdf", b"chess data".to_vec())?;
//!
//! // separator style does not matter
//! let entry = package.find_entry("addons\\chess\\chess.vdf").unwrap();
//! assert_eq!(entry.full_path(), "addons/chess/chess.vdf");
//!
//! let data = package.read_entry(entry, true)?;
//! assert_eq!(data, b"chess data");
//! # Ok::<(), vpk::Error>(())
//! ```
//!
//! Writing splits data across chunk files when a chunk size is given:
//!
//! ```no_run
//! # fn main() -> vpk::Result<()> {
//! let mut package = vpk::Package::new();
//! package.add_file("models/chair.mdl", std::fs::read("chair.mdl")?)?;
//! package.write("out/props.vpk", Some(32 * 1024 * 1024))?;
//!
//! let read_back = vpk::Package::open("out/props_dir.vpk")?;
//! read_back.verify_hashes()?;
//! read_back.verify_chunk_hashes()?;
//! # Ok(())
//! # }
//! ```

mod codec;
pub mod entry;
pub mod error;
pub mod package;
pub mod paths;
pub mod store;
pub mod stream;
mod verify;
mod write;

pub use entry::{ChunkHash, EMBEDDED_CHUNK_INDEX, Entry, HashKind};
pub use error::{Error, Result};
pub use package::{MAGIC, Package, ReadSeek, SignatureKind};
pub use store::{CasePolicy, EntryStore};
pub use stream::EntryView;
