//! Integer codecs used by the shard format.
//!
//! Monotone `u32` sequences are stored as LEB128 varints of the difference to
//! the previous element (the first element is a delta from 0). The "sized"
//! variant prefixes the run with the element count so decoders can allocate
//! once. Fixed-width integers are big-endian.

use crate::api::DocumentSection;
use crate::error::{Result, ShardError};

/// Append `v` as an unsigned LEB128 varint.
pub fn write_uvarint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Read one varint at `*off`, advancing it. Values wider than 32 bits are rejected.
pub fn read_uvarint(data: &[u8], off: &mut usize) -> Result<u32> {
    let mut shift = 0u32;
    let mut out: u64 = 0;
    loop {
        if *off >= data.len() {
            return Err(ShardError::encoding(
                "varint",
                "unexpected EOF while reading varint",
            ));
        }
        let b = data[*off];
        *off += 1;
        out |= ((b & 0x7F) as u64) << shift;
        if (b & 0x80) == 0 {
            return u32::try_from(out)
                .map_err(|_| ShardError::encoding("varint", "varint overflows u32"));
        }
        shift += 7;
        if shift >= 35 {
            return Err(ShardError::encoding("varint", "varint too long"));
        }
    }
}

/// Delta-encode a strictly increasing sequence.
pub fn to_deltas(offsets: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(offsets.len() * 2);
    let mut last = 0u32;
    for &v in offsets {
        write_uvarint(&mut out, v.wrapping_sub(last) as u64);
        last = v;
    }
    out
}

/// Inverse of [`to_deltas`]. An empty run decodes to an empty sequence.
pub fn from_deltas(data: &[u8]) -> Result<Vec<u32>> {
    let mut out = Vec::with_capacity(data.len());
    let mut off = 0usize;
    let mut last = 0u32;
    while off < data.len() {
        let delta = read_uvarint(data, &mut off)?;
        last = last.wrapping_add(delta);
        out.push(last);
    }
    Ok(out)
}

/// Delta-encode with a leading element count.
pub fn to_sized_deltas(offsets: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(offsets.len() * 2 + 5);
    write_uvarint(&mut out, offsets.len() as u64);
    let mut last = 0u32;
    for &v in offsets {
        write_uvarint(&mut out, v.wrapping_sub(last) as u64);
        last = v;
    }
    out
}

/// Inverse of [`to_sized_deltas`]. The empty byte run decodes to nothing.
pub fn from_sized_deltas(data: &[u8]) -> Result<Vec<u32>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut off = 0usize;
    let count = read_uvarint(data, &mut off)? as usize;
    // every element needs at least one byte
    if count > data.len() - off {
        return Err(ShardError::encoding(
            "sized deltas",
            format!("count {} exceeds {} remaining bytes", count, data.len() - off),
        ));
    }
    let mut out = Vec::with_capacity(count);
    let mut last = 0u32;
    for _ in 0..count {
        let delta = read_uvarint(data, &mut off)?;
        last = last.wrapping_add(delta);
        out.push(last);
    }
    Ok(out)
}

/// Leading element count of a sized-delta run, without decoding the rest.
pub fn sized_deltas_len(data: &[u8]) -> Result<u32> {
    if data.is_empty() {
        return Ok(0);
    }
    let mut off = 0usize;
    read_uvarint(data, &mut off)
}

/// Document sections are stored as sized deltas of the flattened
/// `start, end` pairs.
pub fn marshal_doc_sections(secs: &[DocumentSection]) -> Vec<u8> {
    let flat: Vec<u32> = secs.iter().flat_map(|s| [s.start, s.end]).collect();
    to_sized_deltas(&flat)
}

pub fn unmarshal_doc_sections(data: &[u8]) -> Result<Vec<DocumentSection>> {
    let flat = from_sized_deltas(data)?;
    if flat.len() % 2 != 0 {
        return Err(ShardError::encoding(
            "doc sections",
            format!("odd number of offsets: {}", flat.len()),
        ));
    }
    Ok(flat
        .chunks_exact(2)
        .map(|p| DocumentSection {
            start: p[0],
            end: p[1],
        })
        .collect())
}

#[inline]
pub fn be_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

#[inline]
pub fn be_u64(data: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[at..at + 8]);
    u64::from_be_bytes(b)
}

/// Decode a big-endian `u32` array; the blob size must be a multiple of 4.
pub fn u32s_from_be(section: &'static str, blob: &[u8]) -> Result<Vec<u32>> {
    if blob.len() % 4 != 0 {
        return Err(ShardError::encoding(
            section,
            format!("section size % 4 != 0: sz {}", blob.len()),
        ));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn u64s_from_be(section: &'static str, blob: &[u8]) -> Result<Vec<u64>> {
    if blob.len() % 8 != 0 {
        return Err(ShardError::encoding(
            section,
            format!("section size % 8 != 0: sz {}", blob.len()),
        ));
    }
    Ok(blob.chunks_exact(8).map(|c| be_u64(c, 0)).collect())
}

pub fn u16s_from_be(section: &'static str, blob: &[u8]) -> Result<Vec<u16>> {
    if blob.len() % 2 != 0 {
        return Err(ShardError::encoding(
            section,
            format!("section size % 2 != 0: sz {}", blob.len()),
        ));
    }
    Ok(blob
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}
