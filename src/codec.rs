//! Little-endian primitives live in [`byteorder`]; this module adds the two
//! pieces the VPK layout needs on top: null-terminated UTF-8 strings and
//! sub-range views used by the hashing passes.

use std::io::{self, Read, Seek, SeekFrom, Take, Write};

use crate::error::{Error, Result};

/// Reads bytes into `scratch` until a `0x00` terminator and decodes them as
/// UTF-8. The scratch buffer is reused across calls by the tree parser.
pub(crate) fn read_nul_string<R: Read + ?Sized>(
    input: &mut R,
    scratch: &mut Vec<u8>,
) -> Result<String> {
    scratch.clear();
    let mut byte = [0u8; 1];
    loop {
        input.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        scratch.push(byte[0]);
    }
    let text = std::str::from_utf8(scratch)
        .map_err(|_| Error::InvalidFormat("tree string is not valid UTF-8".to_string()))?;
    Ok(text.to_string())
}

pub(crate) fn write_nul_string<W: Write + ?Sized>(output: &mut W, text: &str) -> io::Result<()> {
    output.write_all(text.as_bytes())?;
    output.write_all(&[0])
}

/// A read-only view over `length` bytes of `source` starting at `offset`.
///
/// The base source is seeked on construction; views over the same source must
/// be consumed sequentially.
pub(crate) fn region<R: Read + Seek>(
    source: &mut R,
    offset: u64,
    length: u64,
) -> io::Result<Take<&mut R>> {
    source.seek(SeekFrom::Start(offset))?;
    Ok(source.take(length))
}
