// ingest-core/src/format/tar.rs

//! Single-pass member index for uncompressed tar archives.
//!
//! The archive is scanned header by header once, and each regular member is
//! recorded with the byte range of its contents. Records are then served by
//! seeking straight to that range; nothing is extracted.

use tracing::debug;

use crate::error::{IngestError, Result};
use crate::storage::StorageReader;

pub const TAR_BLOCK_LEN: usize = 512;
pub const USTAR_MAGIC_OFFSET: usize = 257;

const NAME_RANGE: std::ops::Range<usize> = 0..100;
const SIZE_RANGE: std::ops::Range<usize> = 124..136;
const CHECKSUM_RANGE: std::ops::Range<usize> = 148..156;
const TYPEFLAG_OFFSET: usize = 156;
const PREFIX_RANGE: std::ops::Range<usize> = 345..500;

/// A regular file stored inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarMember {
    pub path: String,
    pub data_offset: u64,
    pub size: u64,
}

#[inline(always)]
pub fn is_ustar_header(header: &[u8]) -> bool {
    header.len() >= TAR_BLOCK_LEN && &header[USTAR_MAGIC_OFFSET..USTAR_MAGIC_OFFSET + 5] == b"ustar"
}

/// Walks every header of the archive behind `reader`.
///
/// Regular files (typeflag `'0'` or NUL) are returned in archive order. GNU
/// long names (`'L'`) apply to the member that follows them; directories,
/// links and extended headers are skipped. Two consecutive zero blocks, or
/// the end of the data, finish the scan.
///
/// # Errors
///
/// Returns a format error when a size field is not octal, a header checksum
/// does not match, a header is cut short, or a member runs past the end of
/// the archive. Storage errors from the reader are propagated.
pub fn scan_archive(reader: &mut dyn StorageReader, context: &str) -> Result<Vec<TarMember>> {
    let archive_len = reader.size();
    let mut members = Vec::new();
    let mut pending_longname: Option<String> = None;
    let mut zero_blocks = 0u32;
    let mut offset = 0u64;

    while offset < archive_len {
        if archive_len - offset < TAR_BLOCK_LEN as u64 {
            return Err(IngestError::format(
                context,
                format!("truncated header at offset {offset}"),
            ));
        }
        let header = reader.read_range(offset, TAR_BLOCK_LEN)?;

        if is_zero_block(&header) {
            zero_blocks += 1;
            if zero_blocks >= 2 {
                break;
            }
            offset += TAR_BLOCK_LEN as u64;
            continue;
        }
        zero_blocks = 0;

        verify_checksum(&header, offset, context)?;

        let size = parse_tar_size_octal(&header[SIZE_RANGE]).ok_or_else(|| {
            IngestError::format(context, format!("invalid size field in header at offset {offset}"))
        })?;
        let data_offset = offset + TAR_BLOCK_LEN as u64;
        if data_offset + size > archive_len {
            return Err(IngestError::format(
                context,
                format!("member at offset {offset} claims {size} bytes past the end of the archive"),
            ));
        }

        match header[TYPEFLAG_OFFSET] {
            b'0' | 0 => {
                let path = pending_longname.take().unwrap_or_else(|| build_ustar_name(&header));
                members.push(TarMember {
                    path,
                    data_offset,
                    size,
                });
            }
            b'L' => {
                let raw = reader.read_range(data_offset, size as usize)?;
                pending_longname = Some(String::from_utf8_lossy(cstr_bytes(&raw)).into_owned());
            }
            other => {
                debug!(context, typeflag = other, offset, "skipping non-regular tar entry");
                pending_longname = None;
            }
        }

        offset = data_offset + size + tar_pad(size);
    }

    debug!(context, members = members.len(), "scanned tar archive");
    Ok(members)
}

#[inline(always)]
fn tar_pad(size: u64) -> u64 {
    let rem = size % TAR_BLOCK_LEN as u64;
    if rem == 0 {
        0
    } else {
        TAR_BLOCK_LEN as u64 - rem
    }
}

fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

fn build_ustar_name(header: &[u8]) -> String {
    let name = cstr_bytes(&header[NAME_RANGE]);
    let prefix = cstr_bytes(&header[PREFIX_RANGE]);

    let mut out = Vec::with_capacity(name.len() + prefix.len() + 1);
    if is_ustar_header(header) && !prefix.is_empty() {
        out.extend_from_slice(prefix);
        if !out.ends_with(b"/") {
            out.push(b'/');
        }
    }
    out.extend_from_slice(name);
    String::from_utf8_lossy(&out).into_owned()
}

fn cstr_bytes(field: &[u8]) -> &[u8] {
    match field.iter().position(|&b| b == 0) {
        Some(i) => &field[..i],
        None => field,
    }
}

/// Parses a NUL/space padded octal field.
///
/// Leading padding is skipped and the digits run until the first non-octal
/// byte, which must be padding too. An all-padding field is zero.
fn parse_tar_size_octal(field: &[u8]) -> Option<u64> {
    let mut i = 0;
    while i < field.len() && (field[i] == 0 || field[i] == b' ') {
        i += 1;
    }
    let mut end = i;
    while end < field.len() && (b'0'..=b'7').contains(&field[end]) {
        end += 1;
    }
    if field[end..].iter().any(|&b| b != 0 && b != b' ') {
        return None;
    }

    let mut value: u64 = 0;
    for &d in &field[i..end] {
        value = value.checked_mul(8)?.checked_add(u64::from(d - b'0'))?;
    }
    Some(value)
}

/// The checksum is the byte sum of the header with its own field read as
/// spaces.
fn verify_checksum(header: &[u8], offset: u64, context: &str) -> Result<()> {
    let stored = parse_tar_size_octal(&header[CHECKSUM_RANGE]).ok_or_else(|| {
        IngestError::format(context, format!("invalid checksum field in header at offset {offset}"))
    })?;
    let computed: u64 = header
        .iter()
        .enumerate()
        .map(|(i, &b)| if CHECKSUM_RANGE.contains(&i) { u64::from(b' ') } else { u64::from(b) })
        .sum();

    if stored != computed {
        return Err(IngestError::format(
            context,
            format!("header checksum mismatch at offset {offset}: stored {stored}, computed {computed}"),
        ));
    }
    Ok(())
}
