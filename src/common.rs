use crate::error::{FileParseError, ParseError};
use std::{
    ffi::{OsStr, OsString},
    ops::Range,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub const HEADER_SIZE: usize = 4377;
pub const FILENAME_SIZE: usize = 255;
pub const CONTENT_SIZE: usize = 14;
pub const MTIME_SIZE: usize = 12;
pub const PREFIX_SIZE: usize = 4096;

const SIZE_BEGIN: usize = FILENAME_SIZE;
const MTIME_BEGIN: usize = SIZE_BEGIN + CONTENT_SIZE;
const PREFIX_BEGIN: usize = MTIME_BEGIN + MTIME_SIZE;

/// A header sized block of zeroes marking the end of an archive.
pub const EOF_BLOCK: &[u8] = &[0; HEADER_SIZE];

/// File extension of wpress archives, without the leading dot.
pub const EXTENSION: &str = "wpress";

const _: () = assert!(PREFIX_BEGIN + PREFIX_SIZE == HEADER_SIZE);

/// Metadata of a single file stored in the archive. On disk it takes up exactly
/// [`HEADER_SIZE`] bytes and is directly followed by `size` bytes of file content.
///
/// | Field  | Offset | Width |
/// |--------|--------|-------|
/// | name   | 0      | 255   |
/// | size   | 255    | 14    |
/// | mtime  | 269    | 12    |
/// | prefix | 281    | 4096  |
///
/// Every field is text padded with NUL bytes. The size and mtime are decimal numbers.
/// Name and prefix bytes are kept exactly as stored, archives written by other tools
/// are not always UTF-8.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    name: String,
    size: u64,
    mtime: i64,
    prefix: String,
    raw_name: Vec<u8>,
    raw_prefix: Vec<u8>,
}

fn field(block: &[u8], range: Range<usize>) -> &[u8] {
    let bytes = &block[range];
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(unix)]
pub(crate) fn os_bytes(s: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    s.as_bytes().to_vec()
}

#[cfg(not(unix))]
pub(crate) fn os_bytes(s: &OsStr) -> Vec<u8> {
    s.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
fn os_string(bytes: &[u8]) -> OsString {
    use std::os::unix::ffi::OsStrExt;
    OsStr::from_bytes(bytes).to_os_string()
}

#[cfg(not(unix))]
fn os_string(bytes: &[u8]) -> OsString {
    OsString::from(text(bytes))
}

// Floors like `time_t`, so 1.5s before the epoch is -2.
fn unix_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(before) => {
            let before = before.duration();
            -(before.as_secs() as i64) - i64::from(before.subsec_nanos() > 0)
        }
    }
}

impl Header {
    /// Creates a header after checking that every field fits its fixed width window.
    pub fn new<N, P>(name: N, size: u64, mtime: i64, prefix: P) -> Result<Header, FileParseError>
    where
        N: Into<String>,
        P: Into<String>,
    {
        Header::from_raw(
            name.into().into_bytes(),
            size,
            mtime,
            prefix.into().into_bytes(),
        )
    }

    pub(crate) fn from_raw(
        raw_name: Vec<u8>,
        size: u64,
        mtime: i64,
        raw_prefix: Vec<u8>,
    ) -> Result<Header, FileParseError> {
        let header = Header {
            name: text(&raw_name),
            size,
            mtime,
            prefix: text(&raw_prefix),
            raw_name,
            raw_prefix,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), FileParseError> {
        if self.raw_name.is_empty() || self.raw_name.contains(&b'/') {
            return Err(FileParseError::InvalidName(self.name.clone()));
        }
        if self.raw_name.len() > FILENAME_SIZE {
            return Err(FileParseError::NameLengthExceeded(self.name.clone()));
        }
        if self.size.to_string().len() > CONTENT_SIZE {
            return Err(FileParseError::SizeLengthExceeded(self.size));
        }
        if self.mtime.to_string().len() > MTIME_SIZE {
            return Err(FileParseError::MtimeLengthExceeded(self.mtime));
        }
        if self.raw_prefix.len() > PREFIX_SIZE {
            return Err(FileParseError::PrefixLengthExceeded(self.prefix.clone()));
        }
        if self.raw_prefix.first() == Some(&b'/') || Path::new(&self.prefix).has_root() {
            return Err(FileParseError::AbsolutePrefix(self.prefix.clone()));
        }
        Ok(())
    }

    /// Decodes a single header block.
    ///
    /// Returns `Ok(None)` when the block is the all zero end of archive marker.
    pub fn from_bytes(block: &[u8]) -> Result<Option<Header>, ParseError> {
        if block.len() != HEADER_SIZE {
            return Err(ParseError::IncompleteHeader {
                expected: HEADER_SIZE,
                missing: HEADER_SIZE.saturating_sub(block.len()),
            });
        }
        if block == EOF_BLOCK {
            return Ok(None);
        }

        let size = text(field(block, SIZE_BEGIN..MTIME_BEGIN));
        let mtime = text(field(block, MTIME_BEGIN..PREFIX_BEGIN));
        let raw_name = field(block, 0..SIZE_BEGIN).to_vec();
        let raw_prefix = field(block, PREFIX_BEGIN..HEADER_SIZE).to_vec();
        Ok(Some(Header {
            name: text(&raw_name),
            size: size
                .parse()
                .map_err(|source| ParseError::InvalidSize {
                    text: size.clone(),
                    source,
                })?,
            mtime: mtime
                .parse()
                .map_err(|source| ParseError::InvalidMtime {
                    text: mtime.clone(),
                    source,
                })?,
            prefix: text(&raw_prefix),
            raw_name,
            raw_prefix,
        }))
    }

    /// Encodes the header into exactly [`HEADER_SIZE`] bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FileParseError> {
        self.validate()?;
        let size = self.size.to_string();
        let mtime = self.mtime.to_string();
        let mut block = vec![0; HEADER_SIZE];
        let fields = [
            (0, self.raw_name.as_slice()),
            (SIZE_BEGIN, size.as_bytes()),
            (MTIME_BEGIN, mtime.as_bytes()),
            (PREFIX_BEGIN, self.raw_prefix.as_slice()),
        ];
        for (begin, bytes) in fields {
            block[begin..begin + bytes.len()].copy_from_slice(bytes);
        }
        Ok(block)
    }

    /// Builds the header of the file at `path`, to be stored under `prefix`.
    pub fn from_file_metadata<P: AsRef<Path>>(
        path: P,
        prefix: &str,
    ) -> Result<Header, FileParseError> {
        Header::from_file_raw(path.as_ref(), prefix.as_bytes().to_vec())
    }

    pub(crate) fn from_file_raw(path: &Path, raw_prefix: Vec<u8>) -> Result<Header, FileParseError> {
        let metadata = std::fs::metadata(path).map_err(|source| FileParseError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .ok_or_else(|| FileParseError::NameIsNone(path.to_path_buf()))?;
        let modified = metadata
            .modified()
            .map_err(|source| FileParseError::Metadata {
                path: path.to_path_buf(),
                source,
            })?;
        Header::from_raw(
            os_bytes(name),
            metadata.len(),
            unix_seconds(modified),
            raw_prefix,
        )
    }

    /// Base name of the file, lossily decoded as UTF-8.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn name_bytes(&self) -> &[u8] {
        &self.raw_name
    }

    /// Length of the file content following the header.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Modification time in seconds since the UNIX epoch.
    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    pub fn modified(&self) -> SystemTime {
        let secs = Duration::from_secs(self.mtime.unsigned_abs());
        if self.mtime < 0 {
            UNIX_EPOCH - secs
        } else {
            UNIX_EPOCH + secs
        }
    }

    /// Directory of the file relative to the archived root, empty for top level files.
    /// Lossily decoded as UTF-8.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn prefix_bytes(&self) -> &[u8] {
        &self.raw_prefix
    }

    /// The prefix joined with the name, exactly as stored. On unix the raw bytes are kept,
    /// elsewhere invalid UTF-8 is replaced.
    pub fn path(&self) -> PathBuf {
        [os_string(&self.raw_prefix), os_string(&self.raw_name)]
            .iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    type Result<T> = std::result::Result<T, Box<dyn Error>>;

    fn block_with(fields: &[(usize, &[u8])]) -> Vec<u8> {
        let mut block = vec![0; HEADER_SIZE];
        for (begin, bytes) in fields {
            block[*begin..*begin + bytes.len()].copy_from_slice(bytes);
        }
        block
    }

    #[test]
    fn decode_handwritten_block() -> Result<()> {
        let block = block_with(&[
            (0, &b"test.txt"[..]),
            (255, &b"1024"[..]),
            (269, &b"1672531200"[..]),
            (281, &b"wp-content/uploads"[..]),
        ]);
        let header = Header::from_bytes(&block)?.ok_or("unexpected end of archive")?;
        assert_eq!(header.name(), "test.txt");
        assert_eq!(header.size(), 1024);
        assert_eq!(header.mtime(), 1672531200);
        assert_eq!(
            header.modified(),
            UNIX_EPOCH + Duration::from_secs(1672531200)
        );
        assert_eq!(header.prefix(), "wp-content/uploads");
        Ok(())
    }

    #[test]
    fn encode_then_decode_preserves_fields() -> Result<()> {
        let header = Header::new("test.txt", 1024, 1672531200, "wp-content/uploads")?;
        let block = header.to_bytes()?;
        assert_eq!(block.len(), HEADER_SIZE);
        assert_eq!(&block[255..259], b"1024");
        assert!(block[259..269].iter().all(|&b| b == 0));
        assert_eq!(Header::from_bytes(&block)?, Some(header));
        Ok(())
    }

    #[test]
    fn zero_block_is_end_of_archive() -> Result<()> {
        assert_eq!(Header::from_bytes(EOF_BLOCK)?, None);
        assert_eq!(Header::from_bytes(&vec![0; HEADER_SIZE])?, None);
        Ok(())
    }

    #[test]
    fn short_block_is_incomplete() {
        let err = Header::from_bytes(&[0; 100]).unwrap_err();
        assert!(matches!(
            err,
            ParseError::IncompleteHeader { missing, .. } if missing == HEADER_SIZE - 100
        ));
    }

    #[test]
    fn non_numeric_fields_are_rejected() {
        let block = block_with(&[(0, &b"a"[..]), (255, &b"12ab"[..]), (269, &b"0"[..])]);
        assert!(matches!(
            Header::from_bytes(&block),
            Err(ParseError::InvalidSize { .. })
        ));

        let block = block_with(&[(0, &b"a"[..]), (255, &b"12"[..]), (269, &b"soon"[..])]);
        assert!(matches!(
            Header::from_bytes(&block),
            Err(ParseError::InvalidMtime { .. })
        ));

        // a name alone leaves the numeric fields empty
        let block = block_with(&[(0, &b"a"[..])]);
        assert!(Header::from_bytes(&block).is_err());
    }

    #[test]
    fn fields_must_fit() {
        assert!(matches!(
            Header::new("a".repeat(256), 0, 0, ""),
            Err(FileParseError::NameLengthExceeded(_))
        ));
        assert!(Header::new("a".repeat(255), 0, 0, "").is_ok());
        assert!(matches!(
            Header::new("a", 100_000_000_000_000, 0, ""),
            Err(FileParseError::SizeLengthExceeded(_))
        ));
        assert!(Header::new("a", 99_999_999_999_999, 0, "").is_ok());
        assert!(matches!(
            Header::new("a", 0, 1_000_000_000_000, ""),
            Err(FileParseError::MtimeLengthExceeded(_))
        ));
        assert!(matches!(
            Header::new("a", 0, 0, "x".repeat(4097)),
            Err(FileParseError::PrefixLengthExceeded(_))
        ));
    }

    #[test]
    fn names_and_prefixes_are_checked() {
        assert!(matches!(
            Header::new("sub/file.txt", 0, 0, ""),
            Err(FileParseError::InvalidName(_))
        ));
        assert!(matches!(
            Header::new("", 0, 0, ""),
            Err(FileParseError::InvalidName(_))
        ));
        assert!(matches!(
            Header::new("file.txt", 0, 0, "/etc"),
            Err(FileParseError::AbsolutePrefix(_))
        ));
    }

    #[test]
    fn negative_mtime() -> Result<()> {
        let header = Header::new("old", 3, -86400, "")?;
        let decoded = Header::from_bytes(&header.to_bytes()?)?.ok_or("unexpected end")?;
        assert_eq!(decoded.mtime(), -86400);
        assert_eq!(decoded.modified(), UNIX_EPOCH - Duration::from_secs(86400));
        Ok(())
    }

    #[test]
    fn pre_epoch_times_round_down() {
        assert_eq!(unix_seconds(UNIX_EPOCH - Duration::from_millis(1500)), -2);
        assert_eq!(unix_seconds(UNIX_EPOCH - Duration::from_secs(2)), -2);
        assert_eq!(unix_seconds(UNIX_EPOCH + Duration::from_millis(1500)), 1);
        assert_eq!(unix_seconds(UNIX_EPOCH), 0);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_keep_their_bytes() -> Result<()> {
        use std::os::unix::ffi::OsStrExt;

        // Latin-1 encoded `café.txt` under `données`
        let block = block_with(&[
            (0, &b"caf\xe9.txt"[..]),
            (255, &b"3"[..]),
            (269, &b"0"[..]),
            (281, &b"donn\xe9es"[..]),
        ]);
        let header = Header::from_bytes(&block)?.ok_or("unexpected end")?;
        assert_eq!(header.name(), "caf\u{fffd}.txt");
        assert_eq!(header.name_bytes(), b"caf\xe9.txt");
        assert_eq!(header.prefix_bytes(), b"donn\xe9es");
        assert_eq!(
            header.path().as_os_str().as_bytes(),
            b"donn\xe9es/caf\xe9.txt"
        );
        assert_eq!(header.to_bytes()?, block);
        Ok(())
    }

    #[test]
    fn path_joins_prefix_and_name() -> Result<()> {
        assert_eq!(
            Header::new("file2.txt", 5, 0, "sub")?.path(),
            Path::new("sub/file2.txt")
        );
        assert_eq!(
            Header::new("file.txt", 4, 0, "")?.path(),
            Path::new("file.txt")
        );
        Ok(())
    }
}
