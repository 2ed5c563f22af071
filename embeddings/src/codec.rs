//! Primitives for the binary snapshot layout.
//!
//! Every integer and float is stored in native byte order, and every array
//! is preceded by a `u64` length, matching the files older runs produced.

use std::io::{Read, Write};

use byteorder::{ByteOrder, NativeEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{EmbeddingError, Result};

/// Allocate a vector of `len` copies of `fill`, reporting failure instead of
/// aborting.
pub(crate) fn try_filled<T: Clone>(len: usize, fill: T, columns: usize) -> Result<Vec<T>> {
    let mut values = Vec::new();
    values
        .try_reserve_exact(len)
        .map_err(|_| EmbeddingError::AllocationFailed {
            rows: len / columns.max(1),
            columns,
        })?;
    values.resize(len, fill);
    Ok(values)
}

pub(crate) fn read_len<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let len = reader
        .read_u64::<NativeEndian>()
        .map_err(|e| EmbeddingError::from_read(e, what))?;
    usize::try_from(len)
        .map_err(|_| EmbeddingError::MalformedFile(format!("{what} length {len} out of range")))
}

pub(crate) fn write_len<W: Write>(writer: &mut W, len: usize) -> Result<()> {
    writer.write_u64::<NativeEndian>(len as u64)?;
    Ok(())
}

/// Read exactly `len` bytes. The buffer grows with the bytes actually
/// present, so a corrupt length cannot force a large allocation.
pub(crate) fn read_bytes<R: Read>(reader: &mut R, len: usize, what: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader.take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() < len {
        return Err(EmbeddingError::MalformedFile(format!("truncated {what}")));
    }
    Ok(bytes)
}

fn read_array_bytes<R: Read>(
    reader: &mut R,
    len: usize,
    width: usize,
    what: &str,
) -> Result<Vec<u8>> {
    let size = len
        .checked_mul(width)
        .ok_or_else(|| EmbeddingError::MalformedFile(format!("{what} length {len} out of range")))?;
    read_bytes(reader, size, what)
}

pub(crate) fn read_u32s<R: Read>(reader: &mut R, len: usize, what: &str) -> Result<Vec<u32>> {
    let bytes = read_array_bytes(reader, len, 4, what)?;
    let mut values = try_filled(len, 0u32, 1)?;
    NativeEndian::read_u32_into(&bytes, &mut values);
    Ok(values)
}

pub(crate) fn write_u32s<W: Write>(writer: &mut W, values: &[u32]) -> Result<()> {
    let mut bytes = vec![0u8; values.len() * 4];
    NativeEndian::write_u32_into(values, &mut bytes);
    writer.write_all(&bytes)?;
    Ok(())
}

pub(crate) fn read_f64s<R: Read>(reader: &mut R, len: usize, what: &str) -> Result<Vec<f64>> {
    let bytes = read_array_bytes(reader, len, 8, what)?;
    let mut values = try_filled(len, 0f64, 1)?;
    NativeEndian::read_f64_into(&bytes, &mut values);
    Ok(values)
}

pub(crate) fn write_f64s<W: Write>(writer: &mut W, values: &[f64]) -> Result<()> {
    let mut bytes = vec![0u8; values.len() * 8];
    NativeEndian::write_f64_into(values, &mut bytes);
    writer.write_all(&bytes)?;
    Ok(())
}

pub(crate) fn read_f32s_into<R: Read>(reader: &mut R, values: &mut [f32], what: &str) -> Result<()> {
    reader
        .read_f32_into::<NativeEndian>(values)
        .map_err(|e| EmbeddingError::from_read(e, what))
}
