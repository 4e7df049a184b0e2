//! svndiff0 binary delta codec
//!
//! Incoming text deltas are decoded window by window against the base text.
//! Outgoing content is always encoded as a single new-data window per
//! window-size chunk; clients accept that as a degenerate but valid delta.

use svngit_core::{BridgeError, Result};

const HEADER: &[u8; 4] = b"SVN\0";

/// Maximum target view per emitted window
const ENCODE_WINDOW: usize = 100 * 1024;

fn truncated() -> BridgeError {
    BridgeError::ProtocolViolation("truncated svndiff data".into())
}

/// Read one 7-bit big-endian variable-length integer
fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    loop {
        let byte = *buf.get(*pos).ok_or_else(truncated)?;
        *pos += 1;
        value = value
            .checked_shl(7)
            .and_then(|v| v.checked_add((byte & 0x7f) as u64))
            .ok_or_else(|| BridgeError::ProtocolViolation("svndiff integer overflow".into()))?;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    let mut bytes = [0u8; 10];
    let mut n = 0;
    loop {
        bytes[n] = (value & 0x7f) as u8;
        value >>= 7;
        n += 1;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let mut b = bytes[i];
        if i > 0 {
            b |= 0x80;
        }
        out.push(b);
    }
}

/// Instruction selector bits (top two bits of the first byte)
const OP_COPY_SOURCE: u8 = 0b00;
const OP_COPY_TARGET: u8 = 0b01;
const OP_COPY_NEW: u8 = 0b10;

struct Window {
    sview_offset: u64,
    sview_len: u64,
    tview_len: u64,
    instructions: Vec<u8>,
    new_data: Vec<u8>,
}

fn read_window(buf: &[u8], pos: &mut usize) -> Result<Window> {
    let sview_offset = read_varint(buf, pos)?;
    let sview_len = read_varint(buf, pos)?;
    let tview_len = read_varint(buf, pos)?;
    let ins_len = read_varint(buf, pos)? as usize;
    let new_len = read_varint(buf, pos)? as usize;
    let ins_end = pos.checked_add(ins_len).ok_or_else(truncated)?;
    let new_end = ins_end.checked_add(new_len).ok_or_else(truncated)?;
    if new_end > buf.len() {
        return Err(truncated());
    }
    let window = Window {
        sview_offset,
        sview_len,
        tview_len,
        instructions: buf[*pos..ins_end].to_vec(),
        new_data: buf[ins_end..new_end].to_vec(),
    };
    *pos = new_end;
    Ok(window)
}

fn apply_window(window: &Window, source: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let sview_end = window
        .sview_offset
        .checked_add(window.sview_len)
        .filter(|end| *end as usize <= source.len())
        .ok_or_else(|| {
            BridgeError::ProtocolViolation("svndiff source view outside the base text".into())
        })?;
    let sview = &source[window.sview_offset as usize..sview_end as usize];

    let mut target = Vec::with_capacity(window.tview_len as usize);
    let mut pos = 0usize;
    let mut new_pos = 0usize;
    let ins = &window.instructions;

    while pos < ins.len() {
        let first = ins[pos];
        pos += 1;
        let op = first >> 6;
        let mut length = (first & 0x3f) as u64;
        if length == 0 {
            length = read_varint(ins, &mut pos)?;
        }
        let length = length as usize;
        match op {
            OP_COPY_SOURCE => {
                let offset = read_varint(ins, &mut pos)? as usize;
                let end = offset.checked_add(length).ok_or_else(truncated)?;
                if end > sview.len() {
                    return Err(BridgeError::ProtocolViolation(
                        "svndiff source copy outside the source view".into(),
                    ));
                }
                target.extend_from_slice(&sview[offset..end]);
            }
            OP_COPY_TARGET => {
                // May overlap its own output; copy byte by byte.
                let offset = read_varint(ins, &mut pos)? as usize;
                if offset >= target.len() {
                    return Err(BridgeError::ProtocolViolation(
                        "svndiff target copy ahead of the output".into(),
                    ));
                }
                for i in 0..length {
                    let b = target[offset + i];
                    target.push(b);
                }
            }
            OP_COPY_NEW => {
                let end = new_pos.checked_add(length).ok_or_else(truncated)?;
                if end > window.new_data.len() {
                    return Err(truncated());
                }
                target.extend_from_slice(&window.new_data[new_pos..end]);
                new_pos = end;
            }
            _ => {
                return Err(BridgeError::ProtocolViolation(
                    "reserved svndiff instruction".into(),
                ))
            }
        }
    }

    if target.len() as u64 != window.tview_len {
        return Err(BridgeError::ProtocolViolation(format!(
            "svndiff window produced {} bytes, declared {}",
            target.len(),
            window.tview_len
        )));
    }
    out.extend_from_slice(&target);
    Ok(())
}

/// Apply a complete svndiff0 delta to `source`, producing the new text
pub fn apply(source: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    if delta.len() < 4 || &delta[..4] != HEADER {
        return Err(BridgeError::ProtocolViolation(
            "missing svndiff header".into(),
        ));
    }
    let mut pos = 4;
    let mut out = Vec::new();
    while pos < delta.len() {
        let window = read_window(delta, &mut pos)?;
        apply_window(&window, source, &mut out)?;
    }
    Ok(out)
}

/// Encode `target` as an svndiff0 delta of pure new-data windows
pub fn encode_full(target: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(target.len() + 16);
    out.extend_from_slice(HEADER);
    for chunk in target.chunks(ENCODE_WINDOW) {
        // One new-data instruction covering the whole chunk.
        let mut ins = Vec::with_capacity(6);
        ins.push(OP_COPY_NEW << 6);
        write_varint(&mut ins, chunk.len() as u64);

        write_varint(&mut out, 0); // sview offset
        write_varint(&mut out, 0); // sview length
        write_varint(&mut out, chunk.len() as u64);
        write_varint(&mut out, ins.len() as u64);
        write_varint(&mut out, chunk.len() as u64);
        out.extend_from_slice(&ins);
        out.extend_from_slice(chunk);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_round_trip() {
        for value in [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut pos = 0;
            assert_eq!(read_varint(&buf, &mut pos).unwrap(), value);
            assert_eq!(pos, buf.len());
        }
        // 128 takes the two-byte form 0x81 0x00.
        let mut buf = Vec::new();
        write_varint(&mut buf, 128);
        assert_eq!(buf, vec![0x81, 0x00]);
    }

    #[test]
    fn test_encode_full_applies_to_anything() {
        let text = b"fresh content, no base needed";
        let delta = encode_full(text);
        assert_eq!(apply(b"", &delta).unwrap(), text);
        assert_eq!(apply(b"old base", &delta).unwrap(), text);
    }

    #[test]
    fn test_empty_target() {
        let delta = encode_full(b"");
        assert_eq!(delta, HEADER);
        assert_eq!(apply(b"anything", &delta).unwrap(), b"");
    }

    #[test]
    fn test_source_copy_instruction() {
        // Window: copy 5 bytes from source offset 0, then 6 new bytes.
        let mut delta = HEADER.to_vec();
        let mut ins = Vec::new();
        ins.push((OP_COPY_SOURCE << 6) | 5);
        write_varint(&mut ins, 0); // source offset
        ins.push((OP_COPY_NEW << 6) | 6);
        write_varint(&mut delta, 0); // sview offset
        write_varint(&mut delta, 5); // sview len
        write_varint(&mut delta, 11); // tview len
        write_varint(&mut delta, ins.len() as u64);
        write_varint(&mut delta, 6);
        delta.extend_from_slice(&ins);
        delta.extend_from_slice(b" world");

        assert_eq!(apply(b"hello, base", &delta).unwrap(), b"hello world");
    }

    #[test]
    fn test_target_copy_repeats_output() {
        // "ab" from new data, then target-copy 4 bytes from offset 0:
        // classic overlapping run producing "ababab".
        let mut delta = HEADER.to_vec();
        let mut ins = Vec::new();
        ins.push((OP_COPY_NEW << 6) | 2);
        ins.push((OP_COPY_TARGET << 6) | 4);
        write_varint(&mut ins, 0);
        write_varint(&mut delta, 0);
        write_varint(&mut delta, 0);
        write_varint(&mut delta, 6);
        write_varint(&mut delta, ins.len() as u64);
        write_varint(&mut delta, 2);
        delta.extend_from_slice(&ins);
        delta.extend_from_slice(b"ab");

        assert_eq!(apply(b"", &delta).unwrap(), b"ababab");
    }

    #[test]
    fn test_corrupt_deltas_rejected() {
        assert!(apply(b"", b"NOT").is_err());
        assert!(apply(b"", b"SVN\x01").is_err());
        // Declared target length that the instructions cannot produce.
        let mut delta = HEADER.to_vec();
        write_varint(&mut delta, 0);
        write_varint(&mut delta, 0);
        write_varint(&mut delta, 99);
        write_varint(&mut delta, 0);
        write_varint(&mut delta, 0);
        assert!(apply(b"", &delta).is_err());
    }
}
