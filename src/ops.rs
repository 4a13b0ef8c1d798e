//! Whole archive operations on paths, as used by the command line front end.

use crate::common::{Header, EXTENSION};
use crate::error::{ArchiveError, Result};
use crate::reader::Reader;
use crate::writer::Writer;
use std::path::{Path, PathBuf};

/// Extracts the archive at `input` into `output`.
///
/// Refuses to touch an existing `output` unless `force` is set. Returns the number of
/// extracted files.
pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q, force: bool) -> Result<usize> {
    extract_with(input, output, force, false)
}

/// Like [`extract`], optionally restoring each file's modification time.
pub fn extract_with<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    force: bool,
    preserve_mtime: bool,
) -> Result<usize> {
    let (input, output) = (input.as_ref(), output.as_ref());
    if !force && output.exists() {
        return Err(ArchiveError::DestinationExists {
            path: output.to_path_buf(),
        });
    }
    let mut reader = Reader::open(input)?;
    reader.set_preserve_mtime(preserve_mtime);
    let count = reader.extract_to(output)?;
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        count,
        "extracted archive"
    );
    Ok(count)
}

/// Archives every regular file below `input` into a new archive at `output`.
/// Returns the number of archived files.
pub fn compress<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<usize> {
    compress_with(input, output, false)
}

/// Like [`compress`], optionally closing the archive with the end of archive block.
pub fn compress_with<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    terminator: bool,
) -> Result<usize> {
    let (input, output) = (input.as_ref(), output.as_ref());
    if !input.is_dir() {
        return Err(ArchiveError::NotADirectory {
            path: input.to_path_buf(),
        });
    }
    let mut writer = Writer::create(output)?;
    writer.set_terminator(terminator).add(input)?;
    let count = writer.files_count();
    writer.write()?;
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        count,
        "created archive"
    );
    Ok(count)
}

/// Returns the headers of every record in the archive at `input`.
pub fn list<P: AsRef<Path>>(input: P) -> Result<Vec<Header>> {
    Reader::open(input)?.headers()
}

/// `backup.wpress` extracts into `backup` by default.
pub fn default_extract_dir<P: AsRef<Path>>(input: P) -> Result<PathBuf> {
    let input = input.as_ref();
    input
        .file_stem()
        .map(PathBuf::from)
        .ok_or_else(|| ArchiveError::NoBaseName {
            path: input.to_path_buf(),
        })
}

/// `site/` compresses into `site.wpress` by default.
pub fn default_archive_path<P: AsRef<Path>>(input: P) -> Result<PathBuf> {
    let input = input.as_ref();
    let mut name = match input.file_name() {
        Some(name) => name.to_os_string(),
        // `.`, `..` and friends only get a name once resolved
        None => std::fs::canonicalize(input)
            .map_err(|source| ArchiveError::Canonicalize {
                path: input.to_path_buf(),
                source,
            })?
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| ArchiveError::NoBaseName {
                path: input.to_path_buf(),
            })?,
    };
    name.push(".");
    name.push(EXTENSION);
    Ok(PathBuf::from(name))
}
