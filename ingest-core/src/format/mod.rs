// ingest-core/src/format/mod.rs

//! On-disk container formats.
//!
//! Each submodule only knows how to locate records and decode headers inside
//! one container layout. Turning those locations into a record list is the
//! job of the adapters in [`crate::sources`].

pub mod npy;
pub mod recordio;
pub mod tar;

pub use npy::{copy_strided, read_header, ArrayHeader, ByteOrder, DType};
pub use recordio::{read_frame, DecodedFrame, FrameHeader, FrameIndex, FrameIndexEntry};
pub use tar::{scan_archive, TarMember};
