//! Reading and writing of `.wpress` archives.
//!
//! An archive is a plain sequence of records. Each record is a fixed size [`Header`]
//! followed by the raw bytes of one file. There is no index, so archives are always
//! read front to back with a [`Reader`] and produced in one pass with a [`Writer`].

mod common;
mod error;
pub mod ops;
mod reader;
mod writer;

pub use crate::common::{
    Header, CONTENT_SIZE, EOF_BLOCK, EXTENSION, FILENAME_SIZE, HEADER_SIZE, MTIME_SIZE,
    PREFIX_SIZE,
};
pub use crate::error::{ArchiveError, FileParseError, ParseError, Result};
pub use crate::ops::{compress, extract, list};
pub use crate::reader::{Reader, CHUNK_SIZE};
pub use crate::writer::Writer;
