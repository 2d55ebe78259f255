//! Minimal CARv1 codec.
//!
//! Layout: a varint-framed dag-cbor header `{roots: [cid], version: 1}`
//! followed by block frames of `varint(cid_len + data_len) || cid || data`.
//! Block CIDs are self-describing, so a block-offset index can always be
//! regenerated by walking the frames.

use std::io::Cursor;

use cid::Cid;

use crate::{Result, StoreError};

const CBOR_TAG_CID: u64 = 42;

/// Parsed archive header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarHeader {
    /// Root CIDs the archive claims.
    pub roots: Vec<Cid>,
}

/// One indexed block: where its data lives inside the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLocation {
    /// Absolute offset of the block data (past the CID).
    pub offset: u64,
    /// Length of the block data.
    pub len: u64,
}

/// Encode the archive header with the given roots.
pub fn encode_header(roots: &[Cid]) -> Vec<u8> {
    let mut body = Vec::with_capacity(64);
    body.push(0xa2); // map(2)
    write_cbor_text(&mut body, "roots");
    write_cbor_array_header(&mut body, roots.len() as u64);
    for root in roots {
        write_cbor_tag(&mut body, CBOR_TAG_CID);
        let mut cid_bytes = vec![0x00];
        cid_bytes.extend_from_slice(&root.to_bytes());
        write_cbor_bytes(&mut body, &cid_bytes);
    }
    write_cbor_text(&mut body, "version");
    body.push(0x01);

    let mut out = Vec::with_capacity(body.len() + 2);
    write_varint(&mut out, body.len() as u64);
    out.extend_from_slice(&body);
    out
}

/// Append one block frame, returning the location of its data bytes.
///
/// `base` is the absolute offset at which the frame is being written.
pub fn encode_block(out: &mut Vec<u8>, base: u64, cid: &Cid, data: &[u8]) -> BlockLocation {
    let cid_bytes = cid.to_bytes();
    let frame_len = (cid_bytes.len() + data.len()) as u64;

    let start = out.len();
    write_varint(out, frame_len);
    out.extend_from_slice(&cid_bytes);
    let data_offset = base + (out.len() - start) as u64;
    out.extend_from_slice(data);

    BlockLocation {
        offset: data_offset,
        len: data.len() as u64,
    }
}

/// Build a complete single-block archive in memory.
pub fn single_block_archive(root: &Cid, data: &[u8]) -> Vec<u8> {
    let mut out = encode_header(std::slice::from_ref(root));
    let base = out.len() as u64;
    let mut frame = Vec::with_capacity(data.len() + 48);
    encode_block(&mut frame, base, root, data);
    out.extend_from_slice(&frame);
    out
}

/// Walk an archive, returning its header and every block location.
pub fn scan(archive: &[u8]) -> Result<(CarHeader, Vec<(Cid, BlockLocation)>)> {
    let mut cursor = Cursor::new(archive);

    let header_len = read_varint(&mut cursor)?
        .ok_or_else(|| StoreError::BadArchive("missing header".into()))?;
    let header_start = cursor.position() as usize;
    let header_end = header_start + header_len as usize;
    if archive.len() < header_end {
        return Err(StoreError::BadArchive("truncated header".into()));
    }
    let header = parse_header(&archive[header_start..header_end])?;
    cursor.set_position(header_end as u64);

    let mut blocks = Vec::new();
    loop {
        let frame_len = match read_varint(&mut cursor)? {
            Some(len) => len,
            None => break,
        };
        if frame_len == 0 {
            return Err(StoreError::BadArchive("zero-length block frame".into()));
        }
        let frame_start = cursor.position();
        let frame_end = frame_start + frame_len;
        if (archive.len() as u64) < frame_end {
            return Err(StoreError::BadArchive("truncated block frame".into()));
        }

        let cid = Cid::read_bytes(&mut cursor)
            .map_err(|e| StoreError::BadArchive(format!("block cid: {}", e)))?;
        let data_offset = cursor.position();
        if data_offset > frame_end {
            return Err(StoreError::BadArchive("cid overruns block frame".into()));
        }
        blocks.push((
            cid,
            BlockLocation {
                offset: data_offset,
                len: frame_end - data_offset,
            },
        ));
        cursor.set_position(frame_end);
    }

    Ok((header, blocks))
}

fn parse_header(body: &[u8]) -> Result<CarHeader> {
    let mut cursor = Cursor::new(body);
    let first = read_u8(&mut cursor)?;
    if first >> 5 != 5 {
        return Err(StoreError::BadArchive("header is not a cbor map".into()));
    }
    let entries = (first & 0x1f) as usize;

    let mut roots = Vec::new();
    for _ in 0..entries {
        let key = read_cbor_text(&mut cursor)?;
        match key.as_str() {
            "roots" => {
                let count = read_cbor_array_header(&mut cursor)?;
                for _ in 0..count {
                    read_cbor_tag(&mut cursor)?;
                    let bytes = read_cbor_bytes(&mut cursor)?;
                    let raw = bytes
                        .strip_prefix(&[0x00])
                        .ok_or_else(|| StoreError::BadArchive("cid missing multibase prefix".into()))?;
                    let cid = Cid::try_from(raw)
                        .map_err(|e| StoreError::BadArchive(format!("root cid: {}", e)))?;
                    roots.push(cid);
                }
            }
            "version" => {
                let version = read_u8(&mut cursor)?;
                if version != 0x01 {
                    return Err(StoreError::BadArchive("unsupported car version".into()));
                }
            }
            other => {
                return Err(StoreError::BadArchive(format!("unknown header key {}", other)));
            }
        }
    }

    Ok(CarHeader { roots })
}

// --- varint (unsigned LEB128) ---

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Read a varint; `None` at clean end-of-input.
fn read_varint(cursor: &mut Cursor<&[u8]>) -> Result<Option<u64>> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    let mut first = true;
    loop {
        let pos = cursor.position() as usize;
        let data = *cursor.get_ref();
        if pos >= data.len() {
            if first {
                return Ok(None);
            }
            return Err(StoreError::BadArchive("truncated varint".into()));
        }
        let byte = data[pos];
        cursor.set_position(pos as u64 + 1);

        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some(value));
        }
        shift += 7;
        if shift >= 64 {
            return Err(StoreError::BadArchive("varint overflow".into()));
        }
        first = false;
    }
}

// --- tiny cbor helpers (just what the header needs) ---

fn write_cbor_text(out: &mut Vec<u8>, s: &str) {
    debug_assert!(s.len() <= 23);
    out.push(0x60 | s.len() as u8);
    out.extend_from_slice(s.as_bytes());
}

fn write_cbor_array_header(out: &mut Vec<u8>, len: u64) {
    debug_assert!(len <= 23);
    out.push(0x80 | len as u8);
}

fn write_cbor_tag(out: &mut Vec<u8>, tag: u64) {
    debug_assert!(tag < 256);
    out.push(0xd8);
    out.push(tag as u8);
}

fn write_cbor_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    if bytes.len() <= 23 {
        out.push(0x40 | bytes.len() as u8);
    } else {
        debug_assert!(bytes.len() < 256);
        out.push(0x58);
        out.push(bytes.len() as u8);
    }
    out.extend_from_slice(bytes);
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    let pos = cursor.position() as usize;
    let data = *cursor.get_ref();
    let byte = *data
        .get(pos)
        .ok_or_else(|| StoreError::BadArchive("truncated header".into()))?;
    cursor.set_position(pos as u64 + 1);
    Ok(byte)
}

fn read_cbor_text(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let first = read_u8(cursor)?;
    if first >> 5 != 3 {
        return Err(StoreError::BadArchive("expected cbor text".into()));
    }
    let len = (first & 0x1f) as usize;
    let mut out = vec![0u8; len];
    for slot in out.iter_mut() {
        *slot = read_u8(cursor)?;
    }
    String::from_utf8(out).map_err(|_| StoreError::BadArchive("non-utf8 header key".into()))
}

fn read_cbor_array_header(cursor: &mut Cursor<&[u8]>) -> Result<usize> {
    let first = read_u8(cursor)?;
    if first >> 5 != 4 {
        return Err(StoreError::BadArchive("expected cbor array".into()));
    }
    Ok((first & 0x1f) as usize)
}

fn read_cbor_tag(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let first = read_u8(cursor)?;
    if first == 0xd8 {
        return Ok(u64::from(read_u8(cursor)?));
    }
    if first >> 5 == 6 {
        return Ok(u64::from(first & 0x1f));
    }
    Err(StoreError::BadArchive("expected cbor tag".into()))
}

fn read_cbor_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let first = read_u8(cursor)?;
    if first >> 5 != 2 {
        return Err(StoreError::BadArchive("expected cbor bytes".into()));
    }
    let len = match first & 0x1f {
        n @ 0..=23 => n as usize,
        24 => read_u8(cursor)? as usize,
        _ => return Err(StoreError::BadArchive("oversized cbor bytes".into())),
    };
    let mut out = vec![0u8; len];
    for slot in out.iter_mut() {
        *slot = read_u8(cursor)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemipfs_core::cid as cids;

    #[test]
    fn test_single_block_archive_roundtrip() {
        let data = b"sealed response bytes".to_vec();
        let root = cids::sum(&data);
        let archive = single_block_archive(&root, &data);

        let (header, blocks) = scan(&archive).unwrap();
        assert_eq!(header.roots, vec![root]);
        assert_eq!(blocks.len(), 1);

        let (cid, loc) = blocks[0];
        assert_eq!(cid, root);
        let slice = &archive[loc.offset as usize..(loc.offset + loc.len) as usize];
        assert_eq!(slice, data.as_slice());
    }

    #[test]
    fn test_multi_block_archive_scan() {
        let a = b"block a".to_vec();
        let b = b"block b is longer".to_vec();
        let root = cids::sum(&a);

        let mut archive = encode_header(std::slice::from_ref(&root));
        let base = archive.len() as u64;
        let mut frames = Vec::new();
        encode_block(&mut frames, base, &root, &a);
        let frames_len = frames.len() as u64;
        encode_block(&mut frames, base + frames_len, &cids::sum(&b), &b);
        archive.extend_from_slice(&frames);

        let (header, blocks) = scan(&archive).unwrap();
        assert_eq!(header.roots.len(), 1);
        assert_eq!(blocks.len(), 2);

        for (cid, loc) in &blocks {
            let slice = &archive[loc.offset as usize..(loc.offset + loc.len) as usize];
            assert_eq!(*cid, cids::sum(slice));
        }
    }

    #[test]
    fn test_empty_roots_header() {
        let archive = encode_header(&[]);
        let (header, blocks) = scan(&archive).unwrap();
        assert!(header.roots.is_empty());
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_truncated_archive_fails() {
        let data = b"payload".to_vec();
        let root = cids::sum(&data);
        let archive = single_block_archive(&root, &data);

        let result = scan(&archive[..archive.len() - 3]);
        assert!(matches!(result, Err(StoreError::BadArchive(_))));
    }

    #[test]
    fn test_garbage_fails() {
        assert!(scan(&[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 16384, u32::MAX as u64] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut cursor = Cursor::new(buf.as_slice());
            assert_eq!(read_varint(&mut cursor).unwrap(), Some(value));
        }
    }
}
