use std::{io, num::ParseIntError, path::PathBuf};

pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

/// Errors raised while decoding an archive stream.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Header is incomplete: expected {expected} bytes, {missing} missing")]
    IncompleteHeader { expected: usize, missing: usize },

    #[error("Header size field `{text}` is not a decimal number")]
    InvalidSize {
        text: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Header mtime field `{text}` is not a decimal number")]
    InvalidMtime {
        text: String,
        #[source]
        source: ParseIntError,
    },

    #[error("Data for `{}` is incomplete: expected {expected} bytes, {missing} missing", .path.display())]
    IncompleteData {
        path: PathBuf,
        expected: u64,
        missing: u64,
    },

    #[error("Cannot read from archive")]
    Read(#[source] io::Error),
}

/// Errors raised while turning a file (or caller supplied values) into a header.
#[derive(Debug, thiserror::Error)]
pub enum FileParseError {
    #[error("File `{}` has no associated name", .0.display())]
    NameIsNone(PathBuf),

    #[error("Filename `{0}` is empty or contains a path separator")]
    InvalidName(String),

    #[error("Filename `{0}` is longer than the maximum of 255 bytes")]
    NameLengthExceeded(String),

    #[error("String representation of the size {0} exceeds the maximum of 14 bytes")]
    SizeLengthExceeded(u64),

    #[error("String representation of the UNIX modified time {0} exceeds the maximum of 12 bytes")]
    MtimeLengthExceeded(i64),

    #[error("Prefix `{0}` exceeds the maximum of 4096 bytes")]
    PrefixLengthExceeded(String),

    #[error("Prefix `{0}` must be a relative path")]
    AbsolutePrefix(String),

    #[error("Cannot read metadata of `{}`", .path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot read file `{}`", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("File `{}` changed while archiving: expected {expected} bytes, copied {copied}", .path.display())]
    SizeChanged {
        path: PathBuf,
        expected: u64,
        copied: u64,
    },
}

/// Top level error for every archive operation.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    FileParse(#[from] FileParseError),

    #[error("Cannot open archive `{}`", .path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot create file `{}`", .path.display())]
    FileCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot write to `{}`", .path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot create directory `{}`", .path.display())]
    DirCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot add entry `{}`", .path.display())]
    EntryAddition {
        path: PathBuf,
        #[source]
        source: jwalk::Error,
    },

    #[error("Cannot canonicalize path `{}`", .path.display())]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot set modified time of `{}`", .path.display())]
    SetModified {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Output directory `{}` already exists", .path.display())]
    DestinationExists { path: PathBuf },

    #[error("Input `{}` is not a directory", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("Cannot derive a name from `{}`", .path.display())]
    NoBaseName { path: PathBuf },
}
