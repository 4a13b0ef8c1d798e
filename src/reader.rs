use crate::common::{Header, HEADER_SIZE};
use crate::error::{ArchiveError, ParseError, Result};
use clean_path::Clean;
use std::{
    fs::{create_dir_all, File},
    io::{self, BufReader, BufWriter, ErrorKind, Read, Write},
    path::{Component, Path, PathBuf},
};

/// Bytes moved per read while copying file content out of the archive.
pub const CHUNK_SIZE: usize = 512;

/// Forward only reader over a wpress archive stream.
///
/// Records are visited strictly in stream order. A body left unread when the next
/// header is requested gets drained first, so the cursor always rests on a record boundary.
pub struct Reader<R> {
    inner: R,
    current: Option<Header>,
    pending: u64,
    finished: bool,
    preserve_mtime: bool,
}

// Keeps only the normal components so that a record can never escape the destination.
fn trim_clean<P: AsRef<Path>>(path: P) -> PathBuf {
    path.as_ref()
        .clean()
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

impl Reader<BufReader<File>> {
    /// Creates a new `Reader` with the path supplied as the source file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ArchiveError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Reader::new(BufReader::new(file)))
    }
}

impl<R: Read> Reader<R> {
    pub fn new(inner: R) -> Reader<R> {
        Reader {
            inner,
            current: None,
            pending: 0,
            finished: false,
            preserve_mtime: false,
        }
    }

    /// Applies each header's modification time to the files it extracts. Off by default.
    pub fn set_preserve_mtime(&mut self, preserve: bool) -> &mut Self {
        self.preserve_mtime = preserve;
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn read_block(&mut self) -> Result<Option<Vec<u8>>, ParseError> {
        let mut block = vec![0; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            match self.inner.read(&mut block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ParseError::Read(e)),
            }
        }
        match filled {
            0 => Ok(None),
            HEADER_SIZE => Ok(Some(block)),
            n => Err(ParseError::IncompleteHeader {
                expected: HEADER_SIZE,
                missing: HEADER_SIZE - n,
            }),
        }
    }

    /// Advances to the next record and returns its header.
    ///
    /// Returns `Ok(None)` once the stream ends on a record boundary or the all zero
    /// terminator block is reached. Nothing past the terminator is consumed.
    pub fn next_header(&mut self) -> Result<Option<Header>> {
        if self.pending > 0 {
            self.skip_body()?;
        }
        self.current = None;
        if self.finished {
            return Ok(None);
        }
        let header = match self.read_block()? {
            Some(block) => Header::from_bytes(&block)?,
            None => None,
        };
        match header {
            Some(header) => {
                tracing::trace!(path = %header.path().display(), size = header.size(), "read header");
                self.pending = header.size();
                self.current = Some(header.clone());
                Ok(Some(header))
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    // `destination` only labels write errors.
    fn copy_into<W: Write>(&mut self, writer: &mut W, destination: &Path) -> Result<u64> {
        let mut buf = [0; CHUNK_SIZE];
        let mut copied = 0;
        while self.pending > 0 {
            let want = self.pending.min(CHUNK_SIZE as u64) as usize;
            let n = match self.inner.read(&mut buf[..want]) {
                Ok(0) => {
                    let header = self.current.as_ref();
                    return Err(ParseError::IncompleteData {
                        path: header.map(Header::path).unwrap_or_default(),
                        expected: header.map_or(copied + self.pending, Header::size),
                        missing: self.pending,
                    }
                    .into());
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ParseError::Read(e).into()),
            };
            writer
                .write_all(&buf[..n])
                .map_err(|source| ArchiveError::FileWrite {
                    path: destination.to_path_buf(),
                    source,
                })?;
            self.pending -= n as u64;
            copied += n as u64;
        }
        Ok(copied)
    }

    /// Copies the content of the current record into `writer`.
    pub fn copy_body<W: Write>(&mut self, writer: &mut W) -> Result<u64> {
        let label = self.current.as_ref().map(Header::path).unwrap_or_default();
        self.copy_into(writer, &label)
    }

    /// Discards the content of the current record.
    pub fn skip_body(&mut self) -> Result<u64> {
        self.copy_body(&mut io::sink())
    }

    fn extract_current(&mut self, header: &Header, destination: &Path) -> Result<PathBuf> {
        let path = destination.join(trim_clean(header.path()));
        let dir = path.parent().unwrap_or(destination);
        create_dir_all(dir).map_err(|source| ArchiveError::DirCreation {
            path: dir.to_path_buf(),
            source,
        })?;
        let file = File::create(&path).map_err(|source| ArchiveError::FileCreation {
            path: path.clone(),
            source,
        })?;
        let mut handle = BufWriter::new(file);
        self.copy_into(&mut handle, &path)?;
        handle.flush().map_err(|source| ArchiveError::FileWrite {
            path: path.clone(),
            source,
        })?;
        if self.preserve_mtime {
            handle
                .get_ref()
                .set_modified(header.modified())
                .map_err(|source| ArchiveError::SetModified {
                    path: path.clone(),
                    source,
                })?;
        }
        tracing::debug!(path = %path.display(), size = header.size(), "extracted");
        Ok(path)
    }

    /// Extracts all the files inside the archive to the provided destination directory.
    /// Returns the number of files extracted.
    pub fn extract_to<P: AsRef<Path>>(&mut self, destination: P) -> Result<usize> {
        let destination = destination.as_ref();
        let mut count = 0;
        while let Some(header) = self.next_header()? {
            self.extract_current(&header, destination)?;
            count += 1;
        }
        Ok(count)
    }

    /// Extracts all the files inside the archive to the current directory.
    pub fn extract(&mut self) -> Result<usize> {
        self.extract_to(".")
    }

    /// Extracts every record matching `filename` to a destination directory preserving the
    /// directory hierarchy. A record matches by its bare name, its stored path or its cleaned
    /// path. Returns the number of files extracted.
    pub fn extract_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        filename: P,
        destination: Q,
    ) -> Result<usize> {
        let q = filename.as_ref();
        let destination = destination.as_ref();
        let mut count = 0;
        while let Some(header) = self.next_header()? {
            let stored = header.path();
            if Path::new(header.name()) == q || trim_clean(&stored) == q || stored == q {
                self.extract_current(&header, destination)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Reads the rest of the archive and returns the headers of every remaining record.
    pub fn headers(&mut self) -> Result<Vec<Header>> {
        let mut headers = Vec::new();
        while let Some(header) = self.next_header()? {
            headers.push(header);
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EOF_BLOCK;
    use std::io::Cursor;

    fn record(name: &str, prefix: &str, content: &[u8]) -> Vec<u8> {
        let header = Header::new(name, content.len() as u64, 1672531200, prefix).unwrap();
        let mut bytes = header.to_bytes().unwrap();
        bytes.extend_from_slice(content);
        bytes
    }

    fn archive() -> Vec<u8> {
        let mut bytes = record("file.txt", "", b"test");
        bytes.extend(record("file2.txt", "sub", b"test2"));
        bytes
    }

    #[test]
    fn empty_stream_has_no_records() -> Result<()> {
        let mut r = Reader::new(Cursor::new(Vec::new()));
        assert!(r.next_header()?.is_none());
        Ok(())
    }

    #[test]
    fn headers_in_stream_order() -> Result<()> {
        let mut r = Reader::new(Cursor::new(archive()));
        let names: Vec<_> = r.headers()?.iter().map(Header::path).collect();
        assert_eq!(names, [PathBuf::from("file.txt"), PathBuf::from("sub/file2.txt")]);
        Ok(())
    }

    #[test]
    fn unread_bodies_are_skipped() -> Result<()> {
        let mut r = Reader::new(Cursor::new(archive()));
        assert_eq!(r.next_header()?.map(|h| h.size()), Some(4));
        let second = r.next_header()?.ok_or(ParseError::Read(ErrorKind::UnexpectedEof.into()))?;
        let mut body = Vec::new();
        assert_eq!(r.copy_body(&mut body)?, 5);
        assert_eq!(second.name(), "file2.txt");
        assert_eq!(body, b"test2");
        assert!(r.next_header()?.is_none());
        Ok(())
    }

    #[test]
    fn stops_at_terminator() -> Result<()> {
        let mut bytes = record("file.txt", "", b"test");
        bytes.extend_from_slice(EOF_BLOCK);
        bytes.extend_from_slice(b"trailing garbage");
        let mut r = Reader::new(Cursor::new(bytes));
        assert_eq!(r.headers()?.len(), 1);
        assert!(r.next_header()?.is_none());

        let rest = r.into_inner();
        assert_eq!(rest.position() as usize, HEADER_SIZE * 2 + 4);
        Ok(())
    }

    #[test]
    fn truncated_header() {
        let mut bytes = archive();
        bytes.extend_from_slice(&[b'x'; 100]);
        let mut r = Reader::new(Cursor::new(bytes));
        let err = r.headers().unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::Parse(ParseError::IncompleteHeader { missing, .. })
                if missing == HEADER_SIZE - 100
        ));
    }

    #[test]
    fn truncated_body() -> Result<()> {
        let mut bytes = archive();
        bytes.truncate(bytes.len() - 2);
        let mut r = Reader::new(Cursor::new(bytes));
        r.next_header()?;
        r.next_header()?;
        let err = r.copy_body(&mut Vec::new()).unwrap_err();
        match err {
            ArchiveError::Parse(ParseError::IncompleteData {
                path,
                expected,
                missing,
            }) => {
                assert_eq!(path, Path::new("sub/file2.txt"));
                assert_eq!(expected, 5);
                assert_eq!(missing, 2);
            }
            err => panic!("unexpected error: {err}"),
        }
        Ok(())
    }

    #[test]
    fn malformed_header_aborts() {
        let mut bytes = archive();
        let second = HEADER_SIZE + 4;
        bytes[second + 255..second + 269].copy_from_slice(b"not a number!!");
        let mut r = Reader::new(Cursor::new(bytes));
        assert!(matches!(
            r.headers(),
            Err(ArchiveError::Parse(ParseError::InvalidSize { .. }))
        ));
    }

    #[test]
    fn clean_paths_stay_inside() {
        assert_eq!(trim_clean("/etc/passwd"), Path::new("etc/passwd"));
        assert_eq!(trim_clean("../../x/./y"), Path::new("x/y"));
        assert_eq!(trim_clean("a/../b/c"), Path::new("b/c"));
        assert_eq!(trim_clean("wp-content/uploads/a.png"), Path::new("wp-content/uploads/a.png"));
    }
}
