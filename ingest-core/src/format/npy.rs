// ingest-core/src/format/npy.rs

//! NumPy `.npy` array header parsing.
//!
//! File layout:
//!
//! ```text
//! [0..6)   magic "\x93NUMPY"
//! [6]      major version (must be 1)
//! [7]      minor version
//! [8..10)  header length (u16, little-endian)
//! [10..10+len) ASCII dict: {'descr': '<f4', 'fortran_order': False, 'shape': (3, 4), }
//! ```
//!
//! `10 + len` is always a multiple of 16 and is where the array data starts.

use std::fmt;

use crate::error::{IngestError, Result};
use crate::storage::StorageReader;

/// Magic bytes at the start of every `.npy` file.
pub const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Length of the fixed prefix preceding the header text.
pub const PREFIX_LEN: usize = 10;

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    U8,
    U32,
    I8,
    I32,
    F16,
    F32,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::F16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
        }
    }

    fn from_code(code: &str, context: &str) -> Result<Self> {
        match code {
            "u1" => Ok(DType::U8),
            "u4" => Ok(DType::U32),
            "i1" => Ok(DType::I8),
            "i4" => Ok(DType::I32),
            "f2" => Ok(DType::F16),
            "f4" => Ok(DType::F32),
            "u2" | "u8" | "i2" | "i8" | "f8" => Err(IngestError::format(
                context,
                format!("unsupported dtype code '{code}'"),
            )),
            _ => Err(IngestError::format(
                context,
                format!("unknown dtype code '{code}'"),
            )),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::U8 => "uint8",
            DType::U32 => "uint32",
            DType::I8 => "int8",
            DType::I32 => "int32",
            DType::F16 => "float16",
            DType::F32 => "float32",
        };
        f.write_str(name)
    }
}

/// Byte order marker of a dtype descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// `<`
    Little,
    /// `=`
    Native,
    /// `|`, used by single-byte types
    NotApplicable,
}

/// Parsed metadata of one array file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayHeader {
    pub dtype: DType,
    pub byte_order: ByteOrder,
    /// Whether the file stored the data column-major. The shape is already
    /// reversed in that case.
    pub fortran_order: bool,
    pub shape: Vec<usize>,
    pub data_offset: u64,
}

impl ArrayHeader {
    /// Number of elements; 1 for a scalar.
    ///
    /// Saturates instead of overflowing. Headers from [`read_header`] never
    /// reach the limit.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().fold(1, |acc, &d| acc.saturating_mul(d))
    }

    /// Size of the array data in bytes.
    pub fn num_bytes(&self) -> usize {
        self.num_elements().saturating_mul(self.dtype.size())
    }
}

/// Validates the 10-byte prefix and returns the header text length.
///
/// # Errors
///
/// Returns a format error for a bad magic, a major version other than 1, or
/// a header length that leaves the data unaligned.
pub fn parse_prefix(prefix: &[u8], context: &str) -> Result<usize> {
    if prefix.len() < PREFIX_LEN {
        return Err(IngestError::format(context, "file too short for an npy prefix"));
    }
    if &prefix[..6] != NPY_MAGIC {
        return Err(IngestError::format(context, "file is not a numpy file"));
    }

    let major = prefix[6];
    if major != 1 {
        return Err(IngestError::format(
            context,
            format!("unsupported npy format version {}.{}", major, prefix[7]),
        ));
    }

    let header_len = u16::from_le_bytes([prefix[8], prefix[9]]) as usize;
    if (header_len + PREFIX_LEN) % 16 != 0 {
        return Err(IngestError::format(
            context,
            format!("header length {header_len} is not 16-byte aligned"),
        ));
    }

    Ok(header_len)
}

/// Parses a complete header: prefix followed by the dictionary text.
///
/// # Errors
///
/// Returns a format error if the prefix or the dictionary is malformed.
pub fn parse_header(bytes: &[u8], context: &str) -> Result<ArrayHeader> {
    let header_len = parse_prefix(bytes, context)?;
    let end = PREFIX_LEN + header_len;
    if bytes.len() < end {
        return Err(IngestError::format(context, "header is truncated"));
    }
    parse_dict(&bytes[PREFIX_LEN..end], end as u64, context)
}

/// Reads and parses the header at the start of `reader`.
///
/// # Errors
///
/// Returns a storage error if the bytes cannot be read and a format error if
/// they do not form a valid header.
pub fn read_header(reader: &mut dyn StorageReader, context: &str) -> Result<ArrayHeader> {
    if reader.size() < PREFIX_LEN as u64 {
        return Err(IngestError::format(context, "file too short for an npy prefix"));
    }
    let prefix = reader.read_range(0, PREFIX_LEN)?;
    let header_len = parse_prefix(&prefix, context)?;

    if reader.size() < (PREFIX_LEN + header_len) as u64 {
        return Err(IngestError::format(context, "header is truncated"));
    }
    let text = reader.read_range(PREFIX_LEN as u64, header_len)?;
    parse_dict(&text, (PREFIX_LEN + header_len) as u64, context)
}

/// Parses the dictionary literal of a header.
fn parse_dict(text: &[u8], data_offset: u64, context: &str) -> Result<ArrayHeader> {
    let mut scan = Scanner::new(text, context);

    scan.skip_spaces();
    scan.expect(b"{")?;

    scan.field_name("descr")?;
    let descr = scan.string_value()?;
    let (byte_order, code) = split_descr(&descr, context)?;
    let dtype = DType::from_code(code, context)?;
    scan.skip_spaces();
    scan.expect(b",")?;

    scan.field_name("fortran_order")?;
    let fortran_order = if scan.try_skip(b"True") {
        true
    } else if scan.try_skip(b"False") {
        false
    } else {
        return Err(scan.error("failed to parse fortran_order field"));
    };
    scan.skip_spaces();
    scan.expect(b",")?;

    scan.field_name("shape")?;
    let mut shape = scan.shape_tuple()?;

    scan.skip_spaces();
    if scan.try_skip(b",") {
        scan.skip_spaces();
    }
    scan.expect(b"}")?;
    scan.skip_spaces();
    if !scan.at_end() {
        return Err(scan.error("unexpected trailing bytes after header"));
    }

    if fortran_order {
        shape.reverse();
    }

    let fits = array_byte_len(&shape, dtype.size())
        .and_then(|len| u64::try_from(len).ok())
        .and_then(|len| data_offset.checked_add(len))
        .is_some();
    if !fits {
        return Err(IngestError::format(context, "array size overflows"));
    }

    Ok(ArrayHeader {
        dtype,
        byte_order,
        fortran_order,
        shape,
        data_offset,
    })
}

/// Byte length of a row-major array, or `None` on overflow.
fn array_byte_len(shape: &[usize], elem_size: usize) -> Option<usize> {
    shape.iter().try_fold(elem_size, |acc, &d| acc.checked_mul(d))
}

fn split_descr<'a>(descr: &'a str, context: &str) -> Result<(ByteOrder, &'a str)> {
    let mut chars = descr.chars();
    let order = match chars.next() {
        Some('<') => ByteOrder::Little,
        Some('=') => ByteOrder::Native,
        Some('|') => ByteOrder::NotApplicable,
        Some('>') => {
            return Err(IngestError::format(context, "big-endian data is not supported"));
        }
        _ => {
            return Err(IngestError::format(
                context,
                format!("invalid dtype descriptor '{descr}'"),
            ));
        }
    };
    Ok((order, chars.as_str()))
}

/// Byte cursor over the header text.
struct Scanner<'a> {
    text: &'a [u8],
    pos: usize,
    context: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a [u8], context: &'a str) -> Self {
        Self { text, pos: 0, context }
    }

    fn error(&self, message: &str) -> IngestError {
        IngestError::format(self.context, format!("{message} at header byte {}", self.pos))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn try_skip(&mut self, what: &[u8]) -> bool {
        if self.text[self.pos.min(self.text.len())..].starts_with(what) {
            self.pos += what.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, what: &[u8]) -> Result<()> {
        if self.try_skip(what) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", String::from_utf8_lossy(what))))
        }
    }

    /// Consumes `'name':` with surrounding whitespace.
    fn field_name(&mut self, name: &str) -> Result<()> {
        self.skip_spaces();
        let found = self.string_value()?;
        if found != name {
            return Err(self.error(&format!("expected field '{name}', found '{found}'")));
        }
        self.skip_spaces();
        self.expect(b":")?;
        self.skip_spaces();
        Ok(())
    }

    /// Parses a quoted string, honouring backslash escapes.
    fn string_value(&mut self) -> Result<String> {
        let quote = match self.peek() {
            Some(q @ (b'\'' | b'"')) => q,
            _ => return Err(self.error("expected a quoted string")),
        };
        self.pos += 1;

        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ (b'\\' | b'\'' | b'"')) => out.push(c),
                        Some(b't') => out.push(b'\t'),
                        Some(b'n') => out.push(b'\n'),
                        Some(c) => out.extend_from_slice(&[b'\\', c]),
                        None => return Err(self.error("unterminated string")),
                    }
                    self.pos += 1;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }

        String::from_utf8(out).map_err(|_| self.error("string is not valid UTF-8"))
    }

    fn integer(&mut self) -> Result<usize> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected a number"));
        }

        // Digits only, so the slice is valid UTF-8
        let digits = std::str::from_utf8(&self.text[start..self.pos]).unwrap_or_default();
        digits
            .parse()
            .map_err(|_| self.error(&format!("dimension '{digits}' is out of range")))
    }

    /// Parses `(d0, d1, ...)`. A one-element tuple needs its trailing comma.
    fn shape_tuple(&mut self) -> Result<Vec<usize>> {
        self.expect(b"(")?;
        self.skip_spaces();

        let mut shape = Vec::new();
        if self.try_skip(b")") {
            return Ok(shape);
        }

        loop {
            shape.push(self.integer()?);
            self.skip_spaces();

            if self.try_skip(b",") {
                self.skip_spaces();
                if self.try_skip(b")") {
                    break;
                }
            } else if self.peek() == Some(b')') {
                if shape.len() == 1 {
                    return Err(self.error("the first number in a tuple must be followed by a comma"));
                }
                self.pos += 1;
                break;
            } else {
                return Err(self.error("expected ',' or ')' in shape tuple"));
            }
        }

        Ok(shape)
    }
}

/// Copies a row-major array into a larger row-major buffer.
///
/// `src` holds `shape` elements of `elem_size` bytes. They are written into
/// `dst`, laid out as `max_shape`, at the same multi-index; elements outside
/// `shape` are left untouched. Returns the number of bytes copied.
///
/// # Errors
///
/// Returns a format error if the ranks differ, a dimension exceeds its
/// maximum, or either buffer is too small.
pub fn copy_strided(
    src: &[u8],
    shape: &[usize],
    elem_size: usize,
    max_shape: &[usize],
    dst: &mut [u8],
) -> Result<usize> {
    const CONTEXT: &str = "strided copy";

    if shape.len() != max_shape.len() {
        return Err(IngestError::format(
            CONTEXT,
            format!("rank {} does not match target rank {}", shape.len(), max_shape.len()),
        ));
    }
    if let Some(d) = (0..shape.len()).find(|&d| shape[d] > max_shape[d]) {
        return Err(IngestError::format(
            CONTEXT,
            format!("dimension {d} of size {} exceeds maximum {}", shape[d], max_shape[d]),
        ));
    }

    let (Some(src_len), Some(dst_len)) = (array_byte_len(shape, elem_size), array_byte_len(max_shape, elem_size)) else {
        return Err(IngestError::format(CONTEXT, "array size overflows"));
    };
    if src.len() < src_len || dst.len() < dst_len {
        return Err(IngestError::format(CONTEXT, "buffer too small for array"));
    }
    if src_len == 0 {
        return Ok(0);
    }

    let Some((&inner, outer)) = shape.split_last() else {
        // Scalar
        dst[..elem_size].copy_from_slice(&src[..elem_size]);
        return Ok(elem_size);
    };
    let row_bytes = inner * elem_size;

    // Byte stride of each outer dimension in the target layout
    let mut dst_strides = vec![0usize; outer.len()];
    let mut stride = max_shape[max_shape.len() - 1] * elem_size;
    for d in (0..outer.len()).rev() {
        dst_strides[d] = stride;
        stride *= max_shape[d];
    }

    let rows: usize = outer.iter().product();
    let mut index = vec![0usize; outer.len()];
    for row in 0..rows {
        let dst_offset: usize = index.iter().zip(&dst_strides).map(|(i, s)| i * s).sum();
        let src_offset = row * row_bytes;
        dst[dst_offset..dst_offset + row_bytes].copy_from_slice(&src[src_offset..src_offset + row_bytes]);

        // Odometer increment over the outer dimensions
        for d in (0..outer.len()).rev() {
            index[d] += 1;
            if index[d] < outer[d] {
                break;
            }
            index[d] = 0;
        }
    }

    Ok(src_len)
}
