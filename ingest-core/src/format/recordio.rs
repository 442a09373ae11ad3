// ingest-core/src/format/recordio.rs

//! Framed record container (MXNet RecordIO) with a text offset index.
//!
//! Frame layout (all fields little-endian):
//!
//! ```text
//! [0..4)    magic 0xced7230a
//! [4..8)    length/flag word: low 29 bits length, high 3 bits part flag
//! [8..12)   label count (u32)
//! [12..16)  label (f32)
//! [16..24)  record id, low 64 bits
//! [24..32)  record id, high 64 bits (reserved)
//! [32..)    label_count f32 labels, then payload
//! ```
//!
//! The length in the second word covers the 24-byte image header, the inline
//! labels and the payload.

use crate::error::{IngestError, Result};
use crate::storage::StorageReader;

/// Magic number opening every frame.
pub const RECORDIO_MAGIC: u32 = 0xced7_230a;

/// Magic plus length/flag word.
pub const FRAME_PREFIX_LEN: usize = 8;

/// Size of the fixed image header following the prefix.
pub const IMAGE_HEADER_LEN: usize = 24;

const LENGTH_BITS: u32 = 29;
const LENGTH_MASK: u32 = (1 << LENGTH_BITS) - 1;

/// Location of one frame in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameIndexEntry {
    pub seek_offset: u64,
    pub frame_length: u64,
}

/// Offsets of every frame, built once from the companion index file.
#[derive(Debug, Clone, Default)]
pub struct FrameIndex {
    entries: Vec<FrameIndexEntry>,
}

impl FrameIndex {
    /// Builds the index from the text of an `.idx` file.
    ///
    /// Each line holds `<index> <byte_offset>`. Offsets are sorted, the data
    /// file length is appended as a sentinel, and each frame spans the gap
    /// to the next offset.
    ///
    /// # Errors
    ///
    /// Returns a format error for malformed lines or offsets past the end of
    /// the data file, and a dataset error if no offsets are listed.
    pub fn parse(index_text: &str, data_len: u64, context: &str) -> Result<Self> {
        let mut offsets = Vec::new();

        for (line_no, line) in index_text.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let (Some(index), Some(offset)) = (fields.next(), fields.next()) else {
                if line.trim().is_empty() {
                    continue;
                }
                return Err(IngestError::format(
                    context,
                    format!("line {}: expected '<index> <offset>'", line_no + 1),
                ));
            };

            if index.parse::<u64>().is_err() {
                return Err(IngestError::format(
                    context,
                    format!("line {}: invalid record index '{index}'", line_no + 1),
                ));
            }
            let offset: u64 = offset.parse().map_err(|_| {
                IngestError::format(
                    context,
                    format!("line {}: invalid byte offset '{offset}'", line_no + 1),
                )
            })?;
            if offset >= data_len {
                return Err(IngestError::format(
                    context,
                    format!(
                        "line {}: offset {offset} is past the end of the data file ({data_len} bytes)",
                        line_no + 1
                    ),
                ));
            }
            offsets.push(offset);
        }

        if offsets.is_empty() {
            return Err(IngestError::dataset(context, "index file lists no records"));
        }

        offsets.push(data_len);
        offsets.sort_unstable();
        offsets.dedup();

        let entries = offsets
            .windows(2)
            .map(|w| FrameIndexEntry {
                seek_offset: w[0],
                frame_length: w[1] - w[0],
            })
            .collect();

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[FrameIndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Splits the length/flag word into `(length, flag)`.
pub fn decode_length_flag(word: u32) -> (u32, u32) {
    (word & LENGTH_MASK, word >> LENGTH_BITS)
}

/// Fixed header fields of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    /// Bytes following the length/flag word.
    pub length: u32,
    pub label_count: u32,
    pub label: f32,
    pub record_id: u64,
    pub reserved_id: u64,
}

/// A decoded frame with the absolute location of its payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedFrame {
    pub header: FrameHeader,
    /// The header label, or the first inline label of a multi-label frame.
    pub label: f32,
    pub payload_offset: u64,
    pub payload_length: u64,
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn u64_at(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

/// Decodes the first 32 bytes of a frame.
///
/// A multi-label frame's first inline label is taken from the four bytes
/// after the header when `bytes` holds them.
///
/// # Errors
///
/// Returns a format error for a wrong magic, a multi-part flag, or lengths
/// that do not fit the frame.
pub fn decode_frame(bytes: &[u8], entry: &FrameIndexEntry, context: &str) -> Result<DecodedFrame> {
    let fixed = FRAME_PREFIX_LEN + IMAGE_HEADER_LEN;
    if bytes.len() < fixed {
        return Err(IngestError::format(
            context,
            format!("frame at offset {} is shorter than its header", entry.seek_offset),
        ));
    }

    let magic = u32_at(bytes, 0);
    if magic != RECORDIO_MAGIC {
        return Err(IngestError::format(
            context,
            format!("invalid frame magic {magic:#010x} at offset {}", entry.seek_offset),
        ));
    }

    let (length, flag) = decode_length_flag(u32_at(bytes, 4));
    if flag != 0 {
        return Err(IngestError::format(
            context,
            format!("multi-part frame (flag {flag}) at offset {} is not supported", entry.seek_offset),
        ));
    }

    let header = FrameHeader {
        length,
        label_count: u32_at(bytes, 8),
        label: f32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        record_id: u64_at(bytes, 16),
        reserved_id: u64_at(bytes, 24),
    };

    let labels_len = header.label_count as u64 * 4;
    let overhead = IMAGE_HEADER_LEN as u64 + labels_len;
    if (length as u64) < overhead {
        return Err(IngestError::format(
            context,
            format!(
                "frame length {length} at offset {} is smaller than its headers ({overhead} bytes)",
                entry.seek_offset
            ),
        ));
    }
    if FRAME_PREFIX_LEN as u64 + length as u64 > entry.frame_length {
        return Err(IngestError::format(
            context,
            format!(
                "frame length {length} at offset {} exceeds the indexed frame size {}",
                entry.seek_offset, entry.frame_length
            ),
        ));
    }

    let label = match bytes.get(fixed..fixed + 4) {
        Some(inline) if header.label_count > 0 => f32::from_le_bytes([inline[0], inline[1], inline[2], inline[3]]),
        _ => header.label,
    };

    Ok(DecodedFrame {
        header,
        label,
        payload_offset: entry.seek_offset + fixed as u64 + labels_len,
        payload_length: length as u64 - overhead,
    })
}

/// Reads and decodes the frame described by `entry`.
///
/// # Errors
///
/// Returns a storage error if the header bytes cannot be read and a format
/// error if they do not decode.
pub fn read_frame(
    reader: &mut dyn StorageReader,
    entry: &FrameIndexEntry,
    context: &str,
) -> Result<DecodedFrame> {
    let fixed = FRAME_PREFIX_LEN + IMAGE_HEADER_LEN;
    if entry.frame_length < fixed as u64 {
        return Err(IngestError::format(
            context,
            format!("frame at offset {} is shorter than its header", entry.seek_offset),
        ));
    }
    // Include the first inline label when the frame is long enough to hold one
    let wanted = (fixed as u64 + 4).min(entry.frame_length) as usize;
    let bytes = reader.read_range(entry.seek_offset, wanted)?;
    decode_frame(&bytes, entry, context)
}
