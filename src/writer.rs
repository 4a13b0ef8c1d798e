use crate::common::{os_bytes, Header, EOF_BLOCK};
use crate::error::{ArchiveError, FileParseError, Result};
use jwalk::{Parallelism, WalkDir};
use std::{
    collections::HashSet,
    fs::{create_dir_all, File},
    io::{BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

const COPY_BUFFER: usize = 8 * 1024;

struct Entry {
    path: PathBuf,
    prefix: Vec<u8>,
}

/// Structure to write multiple files and corresponding metadata into a wpress archive.
pub struct Writer<W> {
    inner: W,
    label: PathBuf,
    entries: Vec<Entry>,
    excluded: HashSet<PathBuf>,
    terminator: bool,
}

fn canonicalize(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|source| ArchiveError::Canonicalize {
        path: path.to_path_buf(),
        source,
    })
}

// Archive prefixes always use `/`, whatever the host separator.
fn prefix_of(relative: &Path) -> Vec<u8> {
    relative
        .parent()
        .map(|dir| {
            dir.components()
                .map(|c| os_bytes(c.as_os_str()))
                .collect::<Vec<_>>()
                .join(&b'/')
        })
        .unwrap_or_default()
}

impl Writer<BufWriter<File>> {
    /// Creates a new `Writer` with the destination being the path supplied. Missing parent
    /// directories are created and the archive itself is never added to itself.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            create_dir_all(dir).map_err(|source| ArchiveError::DirCreation {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let file = File::create(path).map_err(|source| ArchiveError::FileCreation {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = Writer::new(BufWriter::new(file));
        writer.label = path.to_path_buf();
        writer.exclude(path)?;
        Ok(writer)
    }
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W) -> Writer<W> {
        Writer {
            inner,
            label: PathBuf::new(),
            entries: vec![],
            excluded: HashSet::new(),
            terminator: false,
        }
    }

    /// Never archive the file at `path`. The path must exist.
    pub fn exclude<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut Self> {
        self.excluded.insert(canonicalize(path.as_ref())?);
        Ok(self)
    }

    /// Appends the all zero end of archive block after the last record. Off by default.
    pub fn set_terminator(&mut self, terminator: bool) -> &mut Self {
        self.terminator = terminator;
        self
    }

    /// Lazily adds paths to the `Writer`. It merely tells the `Writer` to note the supplied path
    /// and does not write to the underlying stream. To write, use the `write` method after
    /// `add`ing all the files.
    ///
    /// A directory is walked recursively and its files are stored relative to it. A regular
    /// file is stored at the top level. Anything else is ignored.
    pub fn add<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut Self> {
        let path = path.as_ref();
        if path.is_dir() {
            self.add_dir(path)?;
        } else if path.is_file() {
            let path = canonicalize(path)?;
            if self.excluded.contains(&path) {
                tracing::warn!(path = %path.display(), "skipping excluded file");
            } else {
                self.entries.push(Entry {
                    path,
                    prefix: Vec::new(),
                });
            }
        }
        // Do not add symbolic links or devices.
        Ok(self)
    }

    fn add_dir(&mut self, dir: &Path) -> Result<()> {
        let root = canonicalize(dir)?;
        let walker = WalkDir::new(&root)
            .sort(true)
            .skip_hidden(false)
            .follow_links(false)
            .parallelism(Parallelism::Serial);
        for entry in walker {
            let entry = entry.map_err(|source| ArchiveError::EntryAddition {
                path: source.path().map_or_else(|| root.clone(), Path::to_path_buf),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if self.excluded.contains(&path) {
                tracing::warn!(path = %path.display(), "skipping excluded file");
                continue;
            }
            let prefix = prefix_of(path.strip_prefix(&root).unwrap_or(path.as_path()));
            tracing::trace!(
                path = %path.display(),
                prefix = %String::from_utf8_lossy(&prefix),
                "queued"
            );
            self.entries.push(Entry { path, prefix });
        }
        Ok(())
    }

    fn write_entry(&mut self, entry: &Entry) -> Result<()> {
        let header = Header::from_file_raw(&entry.path, entry.prefix.clone())?;
        let mut handle = File::open(&entry.path).map_err(|source| FileParseError::FileRead {
            path: entry.path.clone(),
            source,
        })?;
        let bytes = header.to_bytes()?;
        self.inner
            .write_all(&bytes)
            .map_err(|source| ArchiveError::FileWrite {
                path: self.label.clone(),
                source,
            })?;

        // Read and write errors name different files, so no `io::copy` here.
        let mut body = (&mut handle).take(header.size());
        let mut buf = [0; COPY_BUFFER];
        let mut copied = 0;
        loop {
            let n = match body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(FileParseError::FileRead {
                        path: entry.path.clone(),
                        source,
                    }
                    .into())
                }
            };
            self.inner
                .write_all(&buf[..n])
                .map_err(|source| ArchiveError::FileWrite {
                    path: self.label.clone(),
                    source,
                })?;
            copied += n as u64;
        }
        if copied != header.size() {
            return Err(FileParseError::SizeChanged {
                path: entry.path.clone(),
                expected: header.size(),
                copied,
            }
            .into());
        }
        tracing::debug!(path = %header.path().display(), size = header.size(), "archived");
        Ok(())
    }

    /// Writes header structures and associated data to the underlying stream and hands the
    /// stream back. Since the `Writer` is consumed, the same records cannot be written twice.
    pub fn write(mut self) -> Result<W> {
        let entries = std::mem::take(&mut self.entries);
        for entry in entries.iter() {
            self.write_entry(entry)?;
        }
        if self.terminator {
            self.inner
                .write_all(EOF_BLOCK)
                .map_err(|source| ArchiveError::FileWrite {
                    path: self.label.clone(),
                    source,
                })?;
        }
        self.inner.flush().map_err(|source| ArchiveError::FileWrite {
            path: self.label.clone(),
            source,
        })?;
        Ok(self.inner)
    }

    pub fn files_count(&self) -> usize {
        self.entries.len()
    }
}
